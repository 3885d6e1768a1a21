//! Color palette and style helpers for the dashboard.

use ratatui::style::{Color, Modifier, Style};

use wedash_core::unit::UnitStatus;

/// Palette tokens for the dark theme.
#[derive(Clone, Debug)]
pub struct Palette {
    pub text: Color,
    pub text_dim: Color,
    pub accent: Color,
    pub success: Color,
    pub warn: Color,
    pub error: Color,
    pub selection_bg: Color,
    pub selection_fg: Color,
    pub key_hint: Color,
    pub panel_border: Color,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            text: Color::Rgb(212, 212, 212),
            text_dim: Color::Rgb(140, 140, 140),
            accent: Color::Rgb(79, 193, 255),
            success: Color::Rgb(78, 201, 176),
            warn: Color::Rgb(220, 180, 100),
            error: Color::Rgb(244, 135, 113),
            selection_bg: Color::Rgb(38, 79, 120),
            selection_fg: Color::White,
            key_hint: Color::Rgb(206, 145, 120),
            panel_border: Color::Rgb(60, 60, 60),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Theme {
    pub palette: Palette,
}

impl Theme {
    pub fn status_style(&self, status: UnitStatus) -> Style {
        let p = &self.palette;
        match status {
            UnitStatus::Active => Style::default().fg(p.success),
            UnitStatus::Failed => Style::default().fg(p.error).add_modifier(Modifier::BOLD),
            UnitStatus::Stopped => Style::default().fg(p.text_dim),
            UnitStatus::Unknown => Style::default().fg(p.warn),
        }
    }

    pub fn status_icon(&self, status: UnitStatus) -> &'static str {
        match status {
            UnitStatus::Active => "●",
            UnitStatus::Failed => "✗",
            UnitStatus::Stopped => "○",
            UnitStatus::Unknown => "?",
        }
    }

    pub fn selected(&self) -> Style {
        Style::default()
            .bg(self.palette.selection_bg)
            .fg(self.palette.selection_fg)
            .add_modifier(Modifier::BOLD)
    }

    pub fn text(&self) -> Style {
        Style::default().fg(self.palette.text)
    }

    pub fn dim(&self) -> Style {
        Style::default().fg(self.palette.text_dim)
    }

    pub fn accent(&self) -> Style {
        Style::default().fg(self.palette.accent)
    }

    pub fn key_hint(&self) -> Style {
        Style::default().fg(self.palette.key_hint)
    }

    pub fn border(&self) -> Style {
        Style::default().fg(self.palette.panel_border)
    }

    pub fn tab(&self, active: bool) -> Style {
        if active {
            Style::default()
                .fg(self.palette.accent)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            self.dim()
        }
    }
}

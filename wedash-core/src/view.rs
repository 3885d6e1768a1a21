//! View projection: the pure function from (store, tab, search) to the
//! ordered list of visible units. No hidden state, recomputed every tick.

use crate::logbuf::LogSession;
use crate::store::UnitStore;
use crate::unit::Unit;

/// Filter tab over the unit list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FilterTab {
    #[default]
    All,
    Active,
    Failed,
}

impl FilterTab {
    pub fn cycle(self) -> Self {
        match self {
            Self::All => Self::Active,
            Self::Active => Self::Failed,
            Self::Failed => Self::All,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::All => "All",
            Self::Active => "Active",
            Self::Failed => "Failed",
        }
    }

    fn matches(&self, unit: &Unit) -> bool {
        match self {
            Self::All => true,
            Self::Active => unit.status.is_active(),
            Self::Failed => unit.status.is_failed(),
        }
    }
}

/// Case-insensitive substring match against identity, project, or the
/// descriptor-derived name. Any one field matching is enough.
pub fn matches_search(unit: &Unit, query: &str) -> bool {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return true;
    }
    unit.meta.identity.to_lowercase().contains(&q)
        || unit.meta.project.to_lowercase().contains(&q)
        || unit.meta.name.to_lowercase().contains(&q)
}

/// The derived, read-only projection handed to the renderer.
#[derive(Debug)]
pub struct ViewState<'a> {
    pub units: Vec<&'a Unit>,
    pub session: Option<&'a LogSession>,
}

impl<'a> ViewState<'a> {
    /// Recompute the visible set. Sort is stable: identity ascending, ties
    /// broken by discovery order, so the list never flickers between
    /// recomputes.
    pub fn project(
        store: &'a UnitStore,
        session: Option<&'a LogSession>,
        tab: FilterTab,
        search: &str,
    ) -> Self {
        let mut units: Vec<&Unit> = store
            .iter()
            .filter(|u| tab.matches(u) && matches_search(u, search))
            .collect();
        units.sort_by(|a, b| {
            a.meta
                .identity
                .cmp(&b.meta.identity)
                .then(a.discovery_order.cmp(&b.discovery_order))
        });
        Self { units, session }
    }

    pub fn identities(&self) -> Vec<&str> {
        self.units.iter().map(|u| u.identity()).collect()
    }

    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.units.iter().position(|u| u.identity() == id)
    }
}

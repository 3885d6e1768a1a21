pub mod backend;
pub mod command;
pub mod logbuf;
pub mod reducer;
pub mod settings;
pub mod state;
pub mod store;
pub mod unit;
pub mod view;

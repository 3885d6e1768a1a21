pub mod filelog;
pub mod journal;
pub mod proc;

pub mod batch_import;
pub mod checkins;
pub mod core;
pub mod habits;
pub mod tags;

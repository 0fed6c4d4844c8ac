//! Staged rebate scheduling (component C) and agreement versioning
//! (component D).

pub mod config;
pub mod engine;
pub mod versioning;

pub use engine::{compute_schedule, merge_received_amount};
pub use versioning::{activate, create_new_version, history, Activation, NewVersion};

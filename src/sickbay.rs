//! Health checking and recovery for instances
//!
//! Provides:
//! - Reachability probing over HTTPS
//! - Stop/start recovery with bounded run-state waits
//! - Post-restart address detection

pub mod checker;
pub mod recovery;

pub use checker::{Prober, HttpProber};

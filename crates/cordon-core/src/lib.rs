//! # cordon-core
//!
//! Composable Linux process isolation primitives.
//!
//! This crate provides:
//! - identity/privilege inspection of the calling process
//! - children cloned into new user, network or pid namespaces
//! - filesystem root detachment for the calling process
//! - no-new-privileges plus a seccomp-BPF allow-list
//! - parent/child synchronization and a driver tying them together

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod driver;
pub mod error;
pub mod identity;
pub mod isolation;
pub mod mode;
pub mod pipe;
pub mod wait;

pub use config::CordonConfig;
pub use driver::{Driver, RunOutcome};
pub use error::CordonError;
pub use mode::IsolationMode;

/// Crate-level result type
pub type Result<T> = std::result::Result<T, CordonError>;

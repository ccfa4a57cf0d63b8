//! Local sidecar supervisor.
//!
//! Launches a sidecar runtime process next to an application, keeps its
//! app id and ports consistent across restarts, evicts stale instances and
//! port holders, and relaunches it when it disappears.

pub mod cli;
pub mod config;
pub mod error;
pub mod settings;
pub mod sidecar;
pub mod testing;

pub use config::Config;
pub use error::{Error, Result};

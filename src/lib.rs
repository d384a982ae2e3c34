pub mod cli;
pub mod config;
pub mod core;
pub mod errors;
pub mod orchestrator;

// Re-exports
pub use crate::config::Settings;
pub use crate::core::{ManagementApi, PrismClient, VmIdentity};
pub use crate::errors::{CloneError, CloneResult};
pub use crate::orchestrator::{CleanupReport, Orchestrator};

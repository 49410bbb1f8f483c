//! Module discovery, activation state, and lifecycle.

mod ledger;
mod manager;
mod manifest;

pub use ledger::MigrationLedger;
pub use manager::ModuleManager;
pub use manifest::ModuleManifest;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("module '{0}' is not known")]
    ModuleNotFound(String),
    #[error("module '{0}' is not active")]
    NotActive(String),
    #[error("module '{module}' requires '{dependency}' which is not active")]
    DependencyNotActive { module: String, dependency: String },
    #[error("cannot deactivate '{module}': active module '{dependent}' depends on it")]
    DependedUpon { module: String, dependent: String },
    #[error("invalid manifest for module '{id}': {reason}")]
    InvalidManifest { id: String, reason: String },
    #[error("module '{module}' failed to boot")]
    Boot {
        module: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("migration '{migration}' of module '{module}' failed")]
    Migration {
        module: String,
        migration: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("modules have not been discovered yet")]
    NotDiscovered,
    #[error("module state error: {0}")]
    State(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

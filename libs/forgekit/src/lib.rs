//! # ForgeKit - Composition core for Forge CMS
//!
//! A plugin-host library: a service container, module and theme
//! discovery/activation lifecycles, and an ordered route table with
//! typed handlers.
//!
//! ## Boot flow
//!
//! ```rust,ignore
//! let config = forgekit_bootstrap::AppConfig::load_or_default(Some("forge.yaml"))?;
//! let app = forgekit::App::new(config)?;
//! app.boot(|app, router| core_routes(app, router)).await?;
//! let response = app.handle(Request::get("/posts/hello")).await;
//! ```
//!
//! Modules and themes are discovered from on-disk JSON manifests; their
//! executable entry points are compiled into the binary and registered
//! through [`inventory`], keyed by manifest identifier. Which discovered
//! modules actually run is decided by a persisted active set, so a broken
//! or deactivated module never blocks the rest of the system.

pub use anyhow::Result;
pub use async_trait::async_trait;

// Re-export inventory so module crates submit entry points without a
// direct dependency.
pub use inventory;

pub mod app;
pub mod config;
pub mod container;
pub mod contracts;
pub mod http;
pub mod module;
pub mod router;
pub mod theme;

pub use app::App;
pub use config::ConfigStore;
pub use container::{Container, ContainerError};
pub use contracts::{Migration, Module, ModuleEntryPoint, ThemeEntryPoint, ThemeHooks};
pub use http::{Request, Response};
pub use module::{ModuleError, ModuleManager, ModuleManifest};
pub use router::{handler, Action, GroupAttributes, Handler, Params, Route, Router, RouterError};
pub use theme::{ThemeError, ThemeManager, ThemeManifest};

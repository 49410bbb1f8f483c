//! Contracts implemented by module and theme authors.
//!
//! Manifests on disk describe *what* exists; these traits are the
//! executable side, compiled into the binary and registered through
//! [`inventory`] under the manifest identifier (or its `class` override).
//! Managers look entry points up by key at boot; a manifest with no
//! matching entry point is a data-only bundle and simply has no hooks.

use std::sync::Arc;

use async_trait::async_trait;

use crate::app::App;
use crate::router::Router;

/// A discoverable, independently activatable feature unit.
///
/// All hooks default to no-ops so a module only implements what it needs.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// Runs during application boot (and immediately after activation on a
    /// running system). A failure here aborts boot: by the time boot hooks
    /// run, other modules may already depend on this one's side effects.
    async fn boot(&self, app: &Arc<App>) -> anyhow::Result<()> {
        let _ = app;
        Ok(())
    }

    /// One-time setup, run on first activation before migrations.
    async fn install(&self, app: &Arc<App>) -> anyhow::Result<()> {
        let _ = app;
        Ok(())
    }

    /// Schema/data migrations. Each is applied at most once, tracked by
    /// name in the migration ledger.
    fn migrations(&self) -> Vec<Arc<dyn Migration>> {
        Vec::new()
    }

    /// Register this module's routes. Called in active-set order, after
    /// core routes and before theme routes.
    fn register_routes(&self, app: &Arc<App>, router: &Router) -> anyhow::Result<()> {
        let _ = (app, router);
        Ok(())
    }
}

/// A named, idempotent migration step.
#[async_trait]
pub trait Migration: Send + Sync {
    fn name(&self) -> &str;
    async fn up(&self, app: &Arc<App>) -> anyhow::Result<()>;
}

/// Executable hooks for a presentation bundle. Most themes are pure data
/// and never provide one.
#[async_trait]
pub trait ThemeHooks: Send + Sync + 'static {
    /// Runs when the theme becomes active (at boot and on activation).
    async fn boot(&self, app: &Arc<App>) -> anyhow::Result<()> {
        let _ = app;
        Ok(())
    }

    /// Register theme routes. Called after module routes.
    fn register_routes(&self, app: &Arc<App>, router: &Router) -> anyhow::Result<()> {
        let _ = (app, router);
        Ok(())
    }
}

/// Inventory-submitted constructor for a module entry point.
pub struct ModuleEntryPoint {
    pub name: &'static str,
    pub construct: fn() -> Arc<dyn Module>,
}

inventory::collect!(ModuleEntryPoint);

/// Inventory-submitted constructor for a theme entry point.
pub struct ThemeEntryPoint {
    pub name: &'static str,
    pub construct: fn() -> Arc<dyn ThemeHooks>,
}

inventory::collect!(ThemeEntryPoint);

/// Find the module entry point registered under `key`, if any.
pub fn module_entry(key: &str) -> Option<&'static ModuleEntryPoint> {
    inventory::iter::<ModuleEntryPoint>
        .into_iter()
        .find(|e| e.name == key)
}

/// Find the theme entry point registered under `key`, if any.
pub fn theme_entry(key: &str) -> Option<&'static ThemeEntryPoint> {
    inventory::iter::<ThemeEntryPoint>
        .into_iter()
        .find(|e| e.name == key)
}

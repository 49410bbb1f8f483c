//! Module manager: discovery, the persisted active set, and boot.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::app::App;
use crate::contracts::{module_entry, Module};
use crate::router::Router;

use super::{MigrationLedger, ModuleError, ModuleManifest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unbooted,
    Discovered,
    Booted,
}

struct Inner {
    phase: Phase,
    /// Everything with a valid manifest on disk, keyed by id.
    known: BTreeMap<String, ModuleManifest>,
    /// Activation order; also boot order.
    active: Vec<String>,
    instances: BTreeMap<String, Arc<dyn Module>>,
}

/// Owns the module directory scan, the `active_modules.json` state file,
/// and the per-module lifecycle (install, migrations, boot).
pub struct ModuleManager {
    modules_dir: PathBuf,
    state_path: PathBuf,
    ledger: MigrationLedger,
    default_active: Vec<String>,
    inner: RwLock<Inner>,
    persist_lock: Mutex<()>,
}

impl ModuleManager {
    pub fn new(
        modules_dir: PathBuf,
        state_dir: &Path,
        default_active: Vec<String>,
    ) -> Result<Self, ModuleError> {
        let ledger = MigrationLedger::load(state_dir.join("migrations.json"))?;
        Ok(Self {
            modules_dir,
            state_path: state_dir.join("active_modules.json"),
            ledger,
            default_active,
            inner: RwLock::new(Inner {
                phase: Phase::Unbooted,
                known: BTreeMap::new(),
                active: Vec::new(),
                instances: BTreeMap::new(),
            }),
            persist_lock: Mutex::new(()),
        })
    }

    // ---- discovery ----------------------------------------------------

    /// Scan the modules directory for subdirectories carrying a
    /// `module.json`. Invalid manifests are logged and skipped; they
    /// never abort the scan.
    pub fn discover(&self) -> Result<usize, ModuleError> {
        let mut known = BTreeMap::new();
        match std::fs::read_dir(&self.modules_dir) {
            Ok(entries) => {
                for entry in entries {
                    let entry = entry?;
                    let dir = entry.path();
                    if !dir.is_dir() || !dir.join("module.json").exists() {
                        continue;
                    }
                    match ModuleManifest::load(&dir) {
                        Ok(manifest) => {
                            debug!(module = %manifest.id, version = %manifest.version, "discovered module");
                            known.insert(manifest.id.clone(), manifest);
                        }
                        Err(err) => {
                            warn!(dir = %dir.display(), error = %err, "skipping invalid module manifest");
                        }
                    }
                }
            }
            Err(err) => {
                warn!(dir = %self.modules_dir.display(), error = %err, "modules directory is not readable");
            }
        }

        let count = known.len();
        let mut inner = self.inner.write();
        inner.known = known;
        if inner.phase == Phase::Unbooted {
            inner.phase = Phase::Discovered;
        }
        Ok(count)
    }

    /// Load the persisted active set, or fall back to the configured
    /// default. Unknown ids are dropped with a warning, and modules whose
    /// dependencies did not survive the filtering are dropped too.
    pub fn load_active(&self) -> Result<(), ModuleError> {
        let requested: Vec<String> = if self.state_path.exists() {
            let raw = std::fs::read_to_string(&self.state_path)?;
            serde_json::from_str(&raw).map_err(|e| {
                ModuleError::State(format!(
                    "corrupt state file {}: {e}",
                    self.state_path.display()
                ))
            })?
        } else {
            self.default_active.clone()
        };

        let mut inner = self.inner.write();
        let mut active: Vec<String> = requested
            .into_iter()
            .filter(|id| {
                let ok = inner.known.contains_key(id);
                if !ok {
                    warn!(module = %id, "active module is not installed, dropping");
                }
                ok
            })
            .collect();

        // dependency gate: keep removing until a fixed point
        loop {
            let current = active.clone();
            let before = active.len();
            active.retain(|id| {
                let manifest = &inner.known[id];
                for dep in &manifest.dependencies {
                    if !current.iter().any(|a| a == dep) {
                        warn!(module = %id, dependency = %dep, "dependency not active, dropping module");
                        return false;
                    }
                }
                true
            });
            if active.len() == before {
                break;
            }
        }

        inner.active = active;
        Ok(())
    }

    // ---- lifecycle ----------------------------------------------------

    /// Boot every active module in activation order. A boot failure is
    /// fatal; a module with no compiled-in entry point is skipped.
    pub async fn boot(&self, app: &Arc<App>) -> Result<(), ModuleError> {
        let active = {
            let inner = self.inner.read();
            inner.active.clone()
        };
        for id in &active {
            self.boot_one(app, id).await?;
        }
        self.inner.write().phase = Phase::Booted;
        info!(count = active.len(), "modules booted");
        Ok(())
    }

    /// Boot a single active module: first-run install, pending
    /// migrations, then `boot`. Returns `None` when the module has no
    /// entry point compiled into this binary.
    pub async fn boot_one(
        &self,
        app: &Arc<App>,
        id: &str,
    ) -> Result<Option<Arc<dyn Module>>, ModuleError> {
        let manifest = {
            let inner = self.inner.read();
            if let Some(existing) = inner.instances.get(id) {
                return Ok(Some(existing.clone()));
            }
            let manifest = inner
                .known
                .get(id)
                .ok_or_else(|| ModuleError::ModuleNotFound(id.to_string()))?
                .clone();
            for dep in &manifest.dependencies {
                if !inner.active.iter().any(|a| a == dep) {
                    return Err(ModuleError::DependencyNotActive {
                        module: id.to_string(),
                        dependency: dep.clone(),
                    });
                }
            }
            manifest
        };

        let Some(entry) = module_entry(manifest.entry_key()) else {
            debug!(module = %id, key = %manifest.entry_key(), "no entry point in this binary, skipping");
            return Ok(None);
        };
        let instance: Arc<dyn Module> = (entry.construct)();

        let install_key = MigrationLedger::key(id, "@install");
        if !self.ledger.contains(&install_key) {
            instance
                .install(app)
                .await
                .map_err(|source| ModuleError::Boot {
                    module: id.to_string(),
                    source,
                })?;
            self.ledger.record(&install_key)?;
            info!(module = %id, "module installed");
        }

        for migration in instance.migrations() {
            let key = MigrationLedger::key(id, migration.name());
            if self.ledger.contains(&key) {
                continue;
            }
            migration
                .up(app)
                .await
                .map_err(|source| ModuleError::Migration {
                    module: id.to_string(),
                    migration: migration.name().to_string(),
                    source,
                })?;
            self.ledger.record(&key)?;
            info!(module = %id, migration = %migration.name(), "migration applied");
        }

        instance.boot(app).await.map_err(|source| ModuleError::Boot {
            module: id.to_string(),
            source,
        })?;
        debug!(module = %id, "module booted");

        // other components locate the instance through the container
        app.container()
            .bind_instance(format!("module.{id}"), instance.clone());
        self.inner
            .write()
            .instances
            .insert(id.to_string(), instance.clone());
        Ok(Some(instance))
    }

    /// Let every booted module contribute its routes, in activation
    /// order.
    pub fn load_routes(&self, app: &Arc<App>, router: &Router) -> Result<(), ModuleError> {
        let booted: Vec<(String, Arc<dyn Module>)> = {
            let inner = self.inner.read();
            inner
                .active
                .iter()
                .filter_map(|id| inner.instances.get(id).map(|m| (id.clone(), m.clone())))
                .collect()
        };
        for (id, instance) in booted {
            instance
                .register_routes(app, router)
                .map_err(|source| ModuleError::Boot { module: id, source })?;
        }
        Ok(())
    }

    // ---- activation state ---------------------------------------------

    /// Mark a known module active and persist the set. Dependencies must
    /// already be active. Returns `false` when it was active already.
    pub fn activate(&self, id: &str) -> Result<bool, ModuleError> {
        {
            let mut inner = self.inner.write();
            if inner.phase == Phase::Unbooted {
                return Err(ModuleError::NotDiscovered);
            }
            let Some(manifest) = inner.known.get(id) else {
                return Err(ModuleError::ModuleNotFound(id.to_string()));
            };
            if inner.active.iter().any(|a| a == id) {
                return Ok(false);
            }
            for dep in &manifest.dependencies {
                if !inner.active.iter().any(|a| a == dep) {
                    return Err(ModuleError::DependencyNotActive {
                        module: id.to_string(),
                        dependency: dep.clone(),
                    });
                }
            }
            inner.active.push(id.to_string());
        }
        self.persist_active()?;
        info!(module = %id, "module activated");
        Ok(true)
    }

    /// Remove a module from the active set, refusing while another
    /// active module depends on it. Its instance is evicted; persisted
    /// state updates atomically.
    pub fn deactivate(&self, id: &str) -> Result<bool, ModuleError> {
        {
            let mut inner = self.inner.write();
            if inner.phase == Phase::Unbooted {
                return Err(ModuleError::NotDiscovered);
            }
            if !inner.known.contains_key(id) {
                return Err(ModuleError::ModuleNotFound(id.to_string()));
            }
            if !inner.active.iter().any(|a| a == id) {
                return Ok(false);
            }
            for other in &inner.active {
                if other == id {
                    continue;
                }
                if inner.known[other].dependencies.iter().any(|d| d == id) {
                    return Err(ModuleError::DependedUpon {
                        module: id.to_string(),
                        dependent: other.clone(),
                    });
                }
            }
            inner.active.retain(|a| a != id);
            inner.instances.remove(id);
        }
        self.persist_active()?;
        info!(module = %id, "module deactivated");
        Ok(true)
    }

    fn persist_active(&self) -> Result<(), ModuleError> {
        let _guard = self.persist_lock.lock();
        let snapshot = {
            let inner = self.inner.read();
            inner.active.clone()
        };
        let body = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| ModuleError::State(e.to_string()))?;
        if let Some(parent) = self.state_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = tempfile::NamedTempFile::new_in(
            self.state_path
                .parent()
                .unwrap_or_else(|| Path::new(".")),
        )?;
        std::fs::write(tmp.path(), body)?;
        tmp.persist(&self.state_path)
            .map_err(|e| ModuleError::State(e.to_string()))?;
        Ok(())
    }

    // ---- inspection ---------------------------------------------------

    pub fn is_active(&self, id: &str) -> bool {
        self.inner.read().active.iter().any(|a| a == id)
    }

    pub fn active(&self) -> Vec<String> {
        self.inner.read().active.clone()
    }

    /// All known manifests, sorted by id.
    pub fn manifests(&self) -> Vec<ModuleManifest> {
        self.inner.read().known.values().cloned().collect()
    }

    pub fn instance(&self, id: &str) -> Option<Arc<dyn Module>> {
        self.inner.read().instances.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_module(root: &Path, id: &str, deps: &[&str]) {
        let dir = root.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        let deps = deps
            .iter()
            .map(|d| format!("\"{d}\""))
            .collect::<Vec<_>>()
            .join(",");
        std::fs::write(
            dir.join("module.json"),
            format!(
                r#"{{"name": "{id}", "version": "0.1.0", "description": "{id} module", "main": "{id}", "dependencies": [{deps}]}}"#
            ),
        )
        .unwrap();
    }

    fn manager(tmp: &tempfile::TempDir, default_active: &[&str]) -> ModuleManager {
        ModuleManager::new(
            tmp.path().join("modules"),
            &tmp.path().join("state"),
            default_active.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn discovers_valid_manifests_and_skips_broken_ones() {
        let tmp = tempfile::tempdir().unwrap();
        let modules = tmp.path().join("modules");
        seed_module(&modules, "blog", &[]);
        seed_module(&modules, "pages", &[]);
        let broken = modules.join("broken");
        std::fs::create_dir_all(&broken).unwrap();
        std::fs::write(broken.join("module.json"), "nope").unwrap();
        // directory without a manifest is ignored entirely
        std::fs::create_dir_all(modules.join("assets")).unwrap();

        let mgr = manager(&tmp, &[]);
        assert_eq!(mgr.discover().unwrap(), 2);
        let ids: Vec<String> = mgr.manifests().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["blog", "pages"]);
    }

    #[test]
    fn defaults_apply_when_no_state_file_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let modules = tmp.path().join("modules");
        seed_module(&modules, "blog", &[]);
        seed_module(&modules, "pages", &[]);

        let mgr = manager(&tmp, &["blog", "ghost"]);
        mgr.discover().unwrap();
        mgr.load_active().unwrap();
        // "ghost" is not installed, silently dropped
        assert_eq!(mgr.active(), vec!["blog"]);
    }

    #[test]
    fn load_active_drops_modules_with_missing_dependencies() {
        let tmp = tempfile::tempdir().unwrap();
        let modules = tmp.path().join("modules");
        seed_module(&modules, "core", &[]);
        seed_module(&modules, "shop", &["core"]);
        seed_module(&modules, "reports", &["shop"]);

        let mgr = manager(&tmp, &["shop", "reports"]);
        mgr.discover().unwrap();
        mgr.load_active().unwrap();
        // "core" is not active, so "shop" drops, so "reports" drops too
        assert!(mgr.active().is_empty());
    }

    #[test]
    fn activation_round_trips_through_the_state_file() {
        let tmp = tempfile::tempdir().unwrap();
        let modules = tmp.path().join("modules");
        seed_module(&modules, "blog", &[]);
        seed_module(&modules, "pages", &[]);

        let mgr = manager(&tmp, &[]);
        mgr.discover().unwrap();
        mgr.load_active().unwrap();
        assert!(mgr.activate("blog").unwrap());
        assert!(!mgr.activate("blog").unwrap());
        assert!(matches!(
            mgr.activate("ghost"),
            Err(ModuleError::ModuleNotFound(_))
        ));

        // a fresh manager sees the persisted set
        let fresh = manager(&tmp, &["pages"]);
        fresh.discover().unwrap();
        fresh.load_active().unwrap();
        assert_eq!(fresh.active(), vec!["blog"]);
    }

    #[test]
    fn activation_enforces_the_dependency_gate() {
        let tmp = tempfile::tempdir().unwrap();
        let modules = tmp.path().join("modules");
        seed_module(&modules, "core", &[]);
        seed_module(&modules, "shop", &["core"]);

        let mgr = manager(&tmp, &[]);
        mgr.discover().unwrap();
        mgr.load_active().unwrap();

        assert!(matches!(
            mgr.activate("shop"),
            Err(ModuleError::DependencyNotActive { module, dependency })
                if module == "shop" && dependency == "core"
        ));
        mgr.activate("core").unwrap();
        mgr.activate("shop").unwrap();
        assert_eq!(mgr.active(), vec!["core", "shop"]);
    }

    #[test]
    fn deactivation_refuses_while_dependents_are_active() {
        let tmp = tempfile::tempdir().unwrap();
        let modules = tmp.path().join("modules");
        seed_module(&modules, "core", &[]);
        seed_module(&modules, "shop", &["core"]);

        let mgr = manager(&tmp, &[]);
        mgr.discover().unwrap();
        mgr.load_active().unwrap();
        mgr.activate("core").unwrap();
        mgr.activate("shop").unwrap();

        assert!(matches!(
            mgr.deactivate("core"),
            Err(ModuleError::DependedUpon { dependent, .. }) if dependent == "shop"
        ));
        assert!(mgr.deactivate("shop").unwrap());
        assert!(mgr.deactivate("core").unwrap());
        assert!(!mgr.deactivate("core").unwrap());
    }

    #[test]
    fn state_operations_require_discovery_first() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(&tmp, &[]);
        assert!(matches!(
            mgr.activate("blog"),
            Err(ModuleError::NotDiscovered)
        ));
    }
}

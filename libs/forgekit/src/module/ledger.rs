//! Persistent record of applied migrations.

use std::collections::BTreeSet;
use std::path::PathBuf;

use parking_lot::Mutex;

use super::ModuleError;

/// JSON file of `"module:migration"` keys that have already run.
/// Consulted before each migration so re-booting never re-applies one.
#[derive(Debug)]
pub struct MigrationLedger {
    path: PathBuf,
    applied: Mutex<BTreeSet<String>>,
}

impl MigrationLedger {
    pub fn load(path: PathBuf) -> Result<Self, ModuleError> {
        let applied = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str::<BTreeSet<String>>(&raw).map_err(|e| {
                ModuleError::State(format!("corrupt ledger {}: {e}", path.display()))
            })?
        } else {
            BTreeSet::new()
        };
        Ok(Self {
            path,
            applied: Mutex::new(applied),
        })
    }

    pub fn key(module: &str, migration: &str) -> String {
        format!("{module}:{migration}")
    }

    pub fn contains(&self, key: &str) -> bool {
        self.applied.lock().contains(key)
    }

    /// Record a key and flush the whole set to disk atomically.
    pub fn record(&self, key: &str) -> Result<(), ModuleError> {
        let snapshot = {
            let mut applied = self.applied.lock();
            applied.insert(key.to_string());
            applied.clone()
        };
        let body = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| ModuleError::State(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = tempfile::NamedTempFile::new_in(
            self.path.parent().unwrap_or_else(|| std::path::Path::new(".")),
        )?;
        std::fs::write(tmp.path(), body)?;
        tmp.persist(&self.path)
            .map_err(|e| ModuleError::State(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_survive_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state").join("migrations.json");

        let ledger = MigrationLedger::load(path.clone()).unwrap();
        assert!(!ledger.contains("blog:create_posts_table"));
        ledger.record("blog:create_posts_table").unwrap();
        assert!(ledger.contains("blog:create_posts_table"));

        let reloaded = MigrationLedger::load(path).unwrap();
        assert!(reloaded.contains("blog:create_posts_table"));
        assert!(!reloaded.contains("pages:create_pages_table"));
    }

    #[test]
    fn corrupt_ledger_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("migrations.json");
        std::fs::write(&path, "{]").unwrap();
        assert!(matches!(
            MigrationLedger::load(path),
            Err(ModuleError::State(_))
        ));
    }
}

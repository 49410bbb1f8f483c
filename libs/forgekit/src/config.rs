//! Process-wide configuration store.
//!
//! Wraps the typed [`forgekit_bootstrap::AppConfig`] as a dotted-key JSON
//! view, layered with admin overrides. Overrides are the only mutation
//! path after boot; persisted ones (e.g. the active theme) are written to
//! a flat file in the state directory and re-applied on the next load.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use forgekit_bootstrap::AppConfig;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

pub struct ConfigStore {
    base: Value,
    overrides: RwLock<BTreeMap<String, Value>>,
    overrides_path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("overrides", &self.overrides.read().len())
            .field("overrides_path", &self.overrides_path)
            .finish()
    }
}

impl ConfigStore {
    /// Build a store over `config`, re-applying any overrides persisted at
    /// `overrides_path` by a previous run.
    pub fn from_config(config: &AppConfig, overrides_path: Option<PathBuf>) -> Result<Arc<Self>> {
        let base = serde_json::to_value(config).context("config is not serializable")?;

        let mut overrides = BTreeMap::new();
        if let Some(path) = &overrides_path {
            if path.exists() {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("cannot read config overrides {}", path.display()))?;
                overrides = serde_json::from_str(&raw)
                    .with_context(|| format!("malformed config overrides {}", path.display()))?;
            }
        }

        Ok(Arc::new(Self {
            base,
            overrides: RwLock::new(overrides),
            overrides_path,
            write_lock: Mutex::new(()),
        }))
    }

    /// Look up a dotted key ("site.active_theme"); overrides win over the
    /// loaded configuration.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(v) = self.overrides.read().get(key) {
            return Some(v.clone());
        }
        let mut cursor = &self.base;
        for segment in key.split('.') {
            cursor = cursor.get(segment)?;
        }
        Some(cursor.clone())
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key)?.as_str().map(|s| s.to_string())
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// In-memory override, visible to every later `get` in this process.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.overrides.write().insert(key.into(), value);
    }

    /// Override `key` and write the full override map to disk so the
    /// change survives a restart. Writers are serialized; the file is
    /// replaced atomically.
    pub fn set_persistent(&self, key: impl Into<String>, value: Value) -> Result<()> {
        self.set(key, value);
        let Some(path) = &self.overrides_path else {
            return Ok(());
        };

        let _guard = self.write_lock.lock();
        let snapshot = self.overrides.read().clone();
        let json = serde_json::to_string_pretty(&snapshot)?;

        let dir = path.parent().context("overrides path has no parent")?;
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(path)
            .with_context(|| format!("cannot persist config overrides {}", path.display()))?;
        Ok(())
    }

    /// The merged view: base config with overrides applied on top.
    pub fn all(&self) -> Value {
        let mut merged = self.base.clone();
        for (key, value) in self.overrides.read().iter() {
            set_dotted(&mut merged, key, value.clone());
        }
        merged
    }
}

fn set_dotted(target: &mut Value, key: &str, value: Value) {
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    let Value::Object(obj) = target else { return };
    match key.split_once('.') {
        None => {
            obj.insert(key.to_string(), value);
        }
        Some((head, rest)) => {
            let child = obj
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            set_dotted(child, rest, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> Arc<ConfigStore> {
        ConfigStore::from_config(&AppConfig::default(), None).unwrap()
    }

    #[test]
    fn dotted_lookup_reads_typed_config() {
        let cfg = store();
        assert_eq!(cfg.get_str("site.active_theme").as_deref(), Some("default"));
        assert_eq!(cfg.get("server.port"), Some(json!(8090)));
        assert!(cfg.get("site.missing").is_none());
        assert!(cfg.has("themes.dir"));
    }

    #[test]
    fn overrides_shadow_base() {
        let cfg = store();
        cfg.set("site.active_theme", json!("dusk"));
        assert_eq!(cfg.get_str("site.active_theme").as_deref(), Some("dusk"));
        // merged view reflects the override
        assert_eq!(cfg.all()["site"]["active_theme"], json!("dusk"));
    }

    #[test]
    fn persistent_overrides_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overrides.json");

        let cfg = ConfigStore::from_config(&AppConfig::default(), Some(path.clone())).unwrap();
        cfg.set_persistent("site.active_theme", json!("dusk")).unwrap();

        let reloaded = ConfigStore::from_config(&AppConfig::default(), Some(path)).unwrap();
        assert_eq!(reloaded.get_str("site.active_theme").as_deref(), Some("dusk"));
    }
}

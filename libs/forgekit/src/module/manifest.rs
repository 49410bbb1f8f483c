//! `module.json` manifest parsing and validation.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ModuleError;

/// Declarative metadata shipped alongside a module in its directory.
///
/// The module id is the directory name; the manifest never states it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleManifest {
    #[serde(skip)]
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    /// Entry artifact the bundle declares. Required by the manifest
    /// format; entry points are compiled in and looked up by key, so
    /// the value is informational here.
    pub main: String,
    /// Optional entry-point key override; defaults to the module id.
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ModuleManifest {
    /// Load and validate `<dir>/module.json`, stamping the directory name
    /// in as the module id.
    pub fn load(dir: &Path) -> Result<Self, ModuleError> {
        let id = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = dir.join("module.json");
        let raw = std::fs::read_to_string(&path).map_err(|e| ModuleError::InvalidManifest {
            id: id.clone(),
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        let mut manifest: ModuleManifest =
            serde_json::from_str(&raw).map_err(|e| ModuleError::InvalidManifest {
                id: id.clone(),
                reason: e.to_string(),
            })?;
        manifest.id = id;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<(), ModuleError> {
        if self.name.trim().is_empty() {
            return Err(ModuleError::InvalidManifest {
                id: self.id.clone(),
                reason: "'name' must not be empty".into(),
            });
        }
        if self.version.trim().is_empty() {
            return Err(ModuleError::InvalidManifest {
                id: self.id.clone(),
                reason: "'version' must not be empty".into(),
            });
        }
        if self.dependencies.iter().any(|d| d == &self.id) {
            return Err(ModuleError::InvalidManifest {
                id: self.id.clone(),
                reason: "module cannot depend on itself".into(),
            });
        }
        Ok(())
    }

    /// Key used to find the compiled-in entry point.
    pub fn entry_key(&self) -> &str {
        self.class.as_deref().unwrap_or(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_manifest(dir: &Path, body: &str) {
        std::fs::write(dir.join("module.json"), body).unwrap();
    }

    #[test]
    fn loads_minimal_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("blog");
        std::fs::create_dir(&dir).unwrap();
        write_manifest(
            &dir,
            r#"{"name": "Blog", "version": "1.0.0", "description": "Posts.", "main": "blog"}"#,
        );

        let m = ModuleManifest::load(&dir).unwrap();
        assert_eq!(m.id, "blog");
        assert_eq!(m.name, "Blog");
        assert_eq!(m.entry_key(), "blog");
        assert!(m.dependencies.is_empty());
    }

    #[test]
    fn class_overrides_entry_key() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("blog");
        std::fs::create_dir(&dir).unwrap();
        write_manifest(
            &dir,
            r#"{"name": "Blog", "version": "1.0.0", "description": "Posts.", "main": "blog", "class": "blog_v2"}"#,
        );
        let m = ModuleManifest::load(&dir).unwrap();
        assert_eq!(m.entry_key(), "blog_v2");
    }

    #[test]
    fn rejects_empty_name_and_self_dependency() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("bad");
        std::fs::create_dir(&dir).unwrap();

        write_manifest(
            &dir,
            r#"{"name": "", "version": "1.0.0", "description": "x", "main": "bad"}"#,
        );
        assert!(matches!(
            ModuleManifest::load(&dir),
            Err(ModuleError::InvalidManifest { .. })
        ));

        write_manifest(
            &dir,
            r#"{"name": "Bad", "version": "1.0.0", "description": "x", "main": "bad", "dependencies": ["bad"]}"#,
        );
        assert!(matches!(
            ModuleManifest::load(&dir),
            Err(ModuleError::InvalidManifest { .. })
        ));
    }

    #[test]
    fn every_required_field_must_be_declared() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("blog");
        std::fs::create_dir(&dir).unwrap();

        // description and main both absent
        write_manifest(&dir, r#"{"name": "Blog", "version": "1.0.0"}"#);
        assert!(matches!(
            ModuleManifest::load(&dir),
            Err(ModuleError::InvalidManifest { .. })
        ));

        // main absent
        write_manifest(
            &dir,
            r#"{"name": "Blog", "version": "1.0.0", "description": "Posts."}"#,
        );
        assert!(matches!(
            ModuleManifest::load(&dir),
            Err(ModuleError::InvalidManifest { .. })
        ));

        // description absent
        write_manifest(
            &dir,
            r#"{"name": "Blog", "version": "1.0.0", "main": "blog"}"#,
        );
        assert!(matches!(
            ModuleManifest::load(&dir),
            Err(ModuleError::InvalidManifest { .. })
        ));
    }

    #[test]
    fn rejects_unknown_fields_and_bad_json() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("odd");
        std::fs::create_dir(&dir).unwrap();

        write_manifest(
            &dir,
            r#"{"name": "Odd", "version": "1", "description": "x", "main": "odd", "bogus": 1}"#,
        );
        assert!(ModuleManifest::load(&dir).is_err());

        write_manifest(&dir, "not json");
        assert!(ModuleManifest::load(&dir).is_err());
    }
}

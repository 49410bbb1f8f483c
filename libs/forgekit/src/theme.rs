//! Theme discovery, selection, and lookup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::app::App;
use crate::config::ConfigStore;
use crate::contracts::{theme_entry, ThemeHooks};
use crate::router::Router;

#[derive(Debug, Error)]
pub enum ThemeError {
    #[error("theme '{0}' is not installed")]
    ThemeNotFound(String),
    #[error("invalid manifest for theme '{id}': {reason}")]
    InvalidManifest { id: String, reason: String },
    #[error("theme '{theme}' failed to boot")]
    Boot {
        theme: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to persist theme selection")]
    Persist(#[source] anyhow::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// `theme.json` metadata; the theme id is its directory name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThemeManifest {
    #[serde(skip)]
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    #[serde(default)]
    pub author: String,
    /// Capability tags modules can probe, e.g. "blog" or "widgets".
    #[serde(default)]
    pub supports: Vec<String>,
    /// Optional entry-point key override for themes that ship hooks.
    #[serde(default)]
    pub class: Option<String>,
}

impl ThemeManifest {
    pub fn load(dir: &Path) -> Result<Self, ThemeError> {
        let id = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = dir.join("theme.json");
        let raw = std::fs::read_to_string(&path).map_err(|e| ThemeError::InvalidManifest {
            id: id.clone(),
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        let mut manifest: ThemeManifest =
            serde_json::from_str(&raw).map_err(|e| ThemeError::InvalidManifest {
                id: id.clone(),
                reason: e.to_string(),
            })?;
        manifest.id = id;
        if manifest.name.trim().is_empty() {
            return Err(ThemeError::InvalidManifest {
                id: manifest.id,
                reason: "'name' must not be empty".into(),
            });
        }
        if manifest.version.trim().is_empty() {
            return Err(ThemeError::InvalidManifest {
                id: manifest.id,
                reason: "'version' must not be empty".into(),
            });
        }
        Ok(manifest)
    }

    pub fn entry_key(&self) -> &str {
        self.class.as_deref().unwrap_or(&self.id)
    }
}

struct Inner {
    /// BTreeMap so the fallback pick is the lexicographically first id.
    themes: BTreeMap<String, ThemeManifest>,
    active: Option<String>,
    hooks: Option<Arc<dyn ThemeHooks>>,
    /// Theme whose routes currently sit in the router, if any.
    routes_installed: Option<String>,
}

/// Scans the themes directory and tracks the active theme. Themes are
/// data-first (templates and assets on disk); hooks are optional and
/// compiled in.
pub struct ThemeManager {
    themes_dir: PathBuf,
    base_url: String,
    inner: RwLock<Inner>,
}

fn route_scope(theme: &str) -> String {
    format!("theme:{theme}")
}

impl ThemeManager {
    pub fn new(themes_dir: PathBuf, base_url: impl Into<String>) -> Self {
        Self {
            themes_dir,
            base_url: base_url.into(),
            inner: RwLock::new(Inner {
                themes: BTreeMap::new(),
                active: None,
                hooks: None,
                routes_installed: None,
            }),
        }
    }

    /// Scan for subdirectories carrying a `theme.json`; invalid manifests
    /// are logged and skipped.
    pub fn discover(&self) -> Result<usize, ThemeError> {
        let mut themes = BTreeMap::new();
        match std::fs::read_dir(&self.themes_dir) {
            Ok(entries) => {
                for entry in entries {
                    let entry = entry?;
                    let dir = entry.path();
                    if !dir.is_dir() || !dir.join("theme.json").exists() {
                        continue;
                    }
                    match ThemeManifest::load(&dir) {
                        Ok(manifest) => {
                            debug!(theme = %manifest.id, version = %manifest.version, "discovered theme");
                            themes.insert(manifest.id.clone(), manifest);
                        }
                        Err(err) => {
                            warn!(dir = %dir.display(), error = %err, "skipping invalid theme manifest");
                        }
                    }
                }
            }
            Err(err) => {
                warn!(dir = %self.themes_dir.display(), error = %err, "themes directory is not readable");
            }
        }
        let count = themes.len();
        self.inner.write().themes = themes;
        Ok(count)
    }

    /// Make the configured theme active, falling back to the
    /// lexicographically first installed theme when it is missing. With
    /// no themes installed at all, no theme is active.
    pub fn select_active(&self, configured: &str) {
        let mut inner = self.inner.write();
        if inner.themes.contains_key(configured) {
            inner.active = Some(configured.to_string());
            return;
        }
        match inner.themes.keys().next().cloned() {
            Some(fallback) => {
                warn!(configured = %configured, fallback = %fallback, "configured theme not installed, falling back");
                inner.active = Some(fallback);
            }
            None => {
                warn!("no themes installed");
                inner.active = None;
            }
        }
    }

    /// Switch the active theme and persist the choice through the config
    /// store so it survives restarts.
    pub fn activate(&self, config: &ConfigStore, id: &str) -> Result<(), ThemeError> {
        {
            let mut inner = self.inner.write();
            if !inner.themes.contains_key(id) {
                return Err(ThemeError::ThemeNotFound(id.to_string()));
            }
            inner.active = Some(id.to_string());
            inner.hooks = None;
        }
        config
            .set_persistent("site.active_theme", Value::String(id.to_string()))
            .map_err(ThemeError::Persist)?;
        info!(theme = %id, "theme activated");
        Ok(())
    }

    /// Boot the active theme's compiled-in hooks, when it ships any.
    pub async fn boot(&self, app: &Arc<App>) -> Result<(), ThemeError> {
        let Some(manifest) = self.active_manifest() else {
            return Ok(());
        };
        let Some(entry) = theme_entry(manifest.entry_key()) else {
            debug!(theme = %manifest.id, "theme has no hooks in this binary");
            return Ok(());
        };
        let hooks: Arc<dyn ThemeHooks> = (entry.construct)();
        hooks.boot(app).await.map_err(|source| ThemeError::Boot {
            theme: manifest.id.clone(),
            source,
        })?;
        self.inner.write().hooks = Some(hooks);
        debug!(theme = %manifest.id, "theme booted");
        Ok(())
    }

    /// Let the booted theme's hooks contribute routes, after module
    /// routes. Routes a previously installed theme left in the router
    /// are dropped first, so switching (or re-activating) never piles
    /// up stale registrations.
    pub fn load_routes(&self, app: &Arc<App>, router: &Router) -> Result<(), ThemeError> {
        let (previous, current) = {
            let mut inner = self.inner.write();
            let previous = inner.routes_installed.take();
            let current = match (&inner.active, &inner.hooks) {
                (Some(t), Some(h)) => Some((t.clone(), h.clone())),
                _ => None,
            };
            inner.routes_installed = current.as_ref().map(|(t, _)| t.clone());
            (previous, current)
        };
        if let Some(prev) = previous {
            router.clear_scope(&route_scope(&prev));
        }
        let Some((theme, hooks)) = current else {
            return Ok(());
        };
        router
            .scoped(route_scope(&theme), |r| hooks.register_routes(app, r))
            .map_err(|source| ThemeError::Boot { theme, source })
    }

    // ---- lookup -------------------------------------------------------

    pub fn active(&self) -> Option<String> {
        self.inner.read().active.clone()
    }

    pub fn active_manifest(&self) -> Option<ThemeManifest> {
        let inner = self.inner.read();
        let id = inner.active.as_ref()?;
        inner.themes.get(id).cloned()
    }

    /// Does the active theme declare the given capability tag?
    pub fn supports(&self, tag: &str) -> bool {
        self.active_manifest()
            .map(|m| m.supports.iter().any(|s| s == tag))
            .unwrap_or(false)
    }

    /// Add a capability tag to the active theme. In-memory only; the
    /// manifest on disk is untouched.
    pub fn add_support(&self, tag: &str) {
        let mut inner = self.inner.write();
        let Some(id) = inner.active.clone() else {
            return;
        };
        if let Some(manifest) = inner.themes.get_mut(&id) {
            if !manifest.supports.iter().any(|s| s == tag) {
                manifest.supports.push(tag.to_string());
            }
        }
    }

    /// Remove a capability tag from the active theme. In-memory only.
    pub fn remove_support(&self, tag: &str) {
        let mut inner = self.inner.write();
        let Some(id) = inner.active.clone() else {
            return;
        };
        if let Some(manifest) = inner.themes.get_mut(&id) {
            manifest.supports.retain(|s| s != tag);
        }
    }

    /// Absolute URL for an asset of the active theme.
    pub fn asset_url(&self, relative: &str) -> Option<String> {
        let active = self.active()?;
        Some(format!(
            "{}/themes/{}/assets/{}",
            self.base_url,
            active,
            relative.trim_start_matches('/')
        ))
    }

    /// Path to a template of the active theme, if the file exists.
    pub fn template_path(&self, name: &str) -> Option<PathBuf> {
        let active = self.active()?;
        let path = self
            .themes_dir
            .join(active)
            .join("templates")
            .join(format!("{name}.html"));
        path.exists().then_some(path)
    }

    /// All installed themes, sorted by id.
    pub fn manifests(&self) -> Vec<ThemeManifest> {
        self.inner.read().themes.values().cloned().collect()
    }
}

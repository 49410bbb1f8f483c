use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Main application configuration with strongly-typed global sections
/// and a flexible per-module configuration bag.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Core server configuration.
    pub server: ServerConfig,
    /// Site-level configuration (name, base URL, active theme).
    pub site: SiteConfig,
    /// Module system configuration.
    #[serde(default)]
    pub modules: ModulesConfig,
    /// Theme system configuration.
    #[serde(default)]
    pub themes: ThemesConfig,
    /// Logging configuration (optional, uses defaults if None).
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub home_dir: String, // will be normalized to absolute path
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub timeout_sec: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SiteConfig {
    pub name: String,
    /// "production" or "development".
    pub env: String,
    pub debug: bool,
    /// Absolute base URL used for reverse routing and asset links.
    pub base_url: String,
    pub active_theme: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModulesConfig {
    /// Directory scanned for module manifests.
    pub dir: String,
    /// Active set used when no persisted state exists yet.
    #[serde(default = "default_active_modules")]
    pub default_active: Vec<String>,
    /// Per-module configuration bag: module id → arbitrary JSON/YAML value.
    #[serde(default)]
    pub settings: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ThemesConfig {
    /// Directory scanned for theme manifests.
    pub dir: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// "trace", "debug", "info", "warn", "error" or "off".
    pub console_level: String,
    /// Log file name under `<home_dir>/logs`, e.g. "forge.log". None disables file output.
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default = "default_file_level")]
    pub file_level: String,
}

fn default_active_modules() -> Vec<String> {
    vec!["blog".to_string(), "pages".to_string()]
}

fn default_file_level() -> String {
    "debug".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            // Empty => resolved to $HOME/.forge by normalize_home_dir_inplace().
            home_dir: String::new(),
            host: "127.0.0.1".to_string(),
            port: 8090,
            timeout_sec: 30,
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            name: "Forge".to_string(),
            env: "production".to_string(),
            debug: false,
            base_url: "http://localhost:8090".to_string(),
            active_theme: "default".to_string(),
        }
    }
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            dir: "modules".to_string(),
            default_active: default_active_modules(),
            settings: HashMap::new(),
        }
    }
}

impl Default for ThemesConfig {
    fn default() -> Self {
        Self {
            dir: "themes".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            console_level: "info".to_string(),
            file: Some("forge.log".to_string()),
            file_level: default_file_level(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            site: SiteConfig::default(),
            modules: ModulesConfig::default(),
            themes: ThemesConfig::default(),
            logging: Some(LoggingConfig::default()),
        }
    }
}

impl AppConfig {
    /// Load configuration with layered loading: defaults → YAML file → environment variables.
    /// Also normalizes `server.home_dir` into an absolute path and creates the directory.
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Yaml},
            Figment,
        };

        let figment = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(config_path.as_ref()))
            // Example: FORGE__SERVER__PORT=8090 maps to server.port
            .merge(Env::prefixed("FORGE__").split("__"));

        let mut config: AppConfig = figment
            .extract()
            .context("Failed to extract config from figment")?;

        normalize_home_dir_inplace(&mut config.server)
            .context("Failed to resolve server.home_dir")?;
        normalize_base_url_inplace(&mut config.site)?;

        Ok(config)
    }

    /// Load configuration from file or fall back to defaults.
    /// Also normalizes `server.home_dir` into an absolute path and creates the directory.
    pub fn load_or_default<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_layered(path),
            None => {
                let mut c = Self::default();
                normalize_home_dir_inplace(&mut c.server)
                    .context("Failed to resolve server.home_dir (defaults)")?;
                normalize_base_url_inplace(&mut c.site)?;
                Ok(c)
            }
        }
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config to YAML")
    }

    /// Apply overrides from command line arguments.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            self.server.port = port;
        }

        let logging = self.logging.get_or_insert_with(LoggingConfig::default);
        logging.console_level = match args.verbose {
            0 => logging.console_level.clone(), // keep
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        };
    }

    /// Directory holding runtime state files (active modules, migration
    /// ledger, persisted config overrides). Created on demand by callers.
    pub fn state_dir(&self) -> PathBuf {
        Path::new(&self.server.home_dir).join("state")
    }

    pub fn modules_dir(&self) -> PathBuf {
        PathBuf::from(&self.modules.dir)
    }

    pub fn themes_dir(&self) -> PathBuf {
        PathBuf::from(&self.themes.dir)
    }
}

/// Command line arguments structure.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config: Option<String>,
    pub port: Option<u16>,
    pub print_config: bool,
    pub verbose: u8,
}

const fn default_subdir() -> &'static str {
    ".forge"
}

/// Resolve `server.home_dir` to an absolute path and create it.
/// An empty value means "use the platform default" ($HOME/.forge).
fn normalize_home_dir_inplace(server: &mut ServerConfig) -> Result<()> {
    let raw = server.home_dir.trim();
    let path = if raw.is_empty() {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .context("HOME is not set and server.home_dir is empty")?;
        home.join(default_subdir())
    } else {
        let p = PathBuf::from(raw);
        if p.is_absolute() {
            p
        } else {
            std::env::current_dir()
                .context("cannot resolve current dir")?
                .join(p)
        }
    };

    std::fs::create_dir_all(&path)
        .with_context(|| format!("cannot create home_dir {}", path.display()))?;

    server.home_dir = path.to_string_lossy().to_string();
    Ok(())
}

/// Validate `site.base_url` and strip any trailing slash so reverse-routed
/// URLs never contain "//".
fn normalize_base_url_inplace(site: &mut SiteConfig) -> Result<()> {
    let parsed = url::Url::parse(&site.base_url)
        .with_context(|| format!("site.base_url is not a valid URL: {}", site.base_url))?;
    site.base_url = parsed.as_str().trim_end_matches('/').to_string();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.server.port, 8090);
        assert_eq!(cfg.site.active_theme, "default");
        assert_eq!(cfg.modules.default_active, vec!["blog", "pages"]);
    }

    #[test]
    fn yaml_round_trip() {
        let cfg = AppConfig::default();
        let yaml = cfg.to_yaml().unwrap();
        let back: AppConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.server.host, cfg.server.host);
        assert_eq!(back.site.base_url, cfg.site.base_url);
    }

    #[test]
    fn layered_load_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_path = dir.path().join("forge.yaml");
        std::fs::write(
            &cfg_path,
            format!(
                "server:\n  home_dir: {}\n  host: 0.0.0.0\n  port: 9000\nsite:\n  base_url: http://example.com/\n",
                dir.path().join("home").display()
            ),
        )
        .unwrap();

        let cfg = AppConfig::load_layered(&cfg_path).unwrap();
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.port, 9000);
        // trailing slash removed
        assert_eq!(cfg.site.base_url, "http://example.com");
        assert!(Path::new(&cfg.server.home_dir).is_absolute());
        assert!(Path::new(&cfg.server.home_dir).exists());
    }

    #[test]
    fn cli_overrides_take_precedence() {
        let mut cfg = AppConfig::default();
        cfg.apply_cli_overrides(&CliArgs {
            port: Some(1234),
            verbose: 2,
            ..Default::default()
        });
        assert_eq!(cfg.server.port, 1234);
        assert_eq!(cfg.logging.unwrap().console_level, "trace");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_path = dir.path().join("forge.yaml");
        std::fs::write(
            &cfg_path,
            format!(
                "server:\n  home_dir: {}\nsite:\n  base_url: not-a-url\n",
                dir.path().join("home").display()
            ),
        )
        .unwrap();
        assert!(AppConfig::load_layered(&cfg_path).is_err());
    }
}

//! The application aggregate: container, config, router, module and
//! theme managers wired together behind one boot sequence.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use forgekit_bootstrap::AppConfig;

use crate::config::ConfigStore;
use crate::container::Container;
use crate::http::{Request, Response};
use crate::module::{ModuleError, ModuleManager};
use crate::router::Router;
use crate::theme::{ThemeError, ThemeManager};

/// Shared application handle. Everything that needs the app gets an
/// explicit `&Arc<App>`; there is intentionally no global accessor.
pub struct App {
    container: Container,
    config: Arc<ConfigStore>,
    router: Arc<Router>,
    modules: Arc<ModuleManager>,
    themes: Arc<ThemeManager>,
    site_name: String,
    environment: String,
    debug: bool,
    booted: AtomicBool,
}

impl App {
    /// Assemble the app from a loaded configuration. Creates the state
    /// directory and binds the core services into the container; nothing
    /// is discovered or booted yet.
    pub fn new(config: AppConfig) -> anyhow::Result<Arc<Self>> {
        let state_dir: PathBuf = config.state_dir();
        std::fs::create_dir_all(&state_dir)
            .with_context(|| format!("cannot create state dir {}", state_dir.display()))?;

        let store = ConfigStore::from_config(&config, Some(state_dir.join("overrides.json")))?;
        let base_url = config.site.base_url.clone();
        let router = Arc::new(Router::new(base_url.clone()));
        let modules = Arc::new(ModuleManager::new(
            config.modules_dir(),
            &state_dir,
            config.modules.default_active.clone(),
        )?);
        let themes = Arc::new(ThemeManager::new(config.themes_dir(), base_url));

        let container = Container::new();
        container.bind_arc("config", store.clone());
        container.bind_arc("router", router.clone());
        container.bind_arc("modules", modules.clone());
        container.bind_arc("themes", themes.clone());

        Ok(Arc::new(Self {
            container,
            config: store,
            router,
            modules,
            themes,
            site_name: config.site.name.clone(),
            environment: config.site.env.clone(),
            debug: config.site.debug,
            booted: AtomicBool::new(false),
        }))
    }

    /// Boot the platform: discover modules and themes, apply the active
    /// sets, run lifecycles, then build the route table (core routes
    /// first, then module routes, then theme routes).
    pub async fn boot<F>(self: &Arc<Self>, core_routes: F) -> anyhow::Result<()>
    where
        F: FnOnce(&Arc<App>, &Router) -> anyhow::Result<()>,
    {
        if self.booted.swap(true, Ordering::SeqCst) {
            anyhow::bail!("application is already booted");
        }

        let found = self.modules.discover()?;
        self.modules.load_active()?;
        info!(found, active = self.modules.active().len(), "modules discovered");

        self.themes.discover()?;
        let configured = self
            .config
            .get_str("site.active_theme")
            .unwrap_or_default();
        self.themes.select_active(&configured);

        self.modules.boot(self).await?;
        self.themes.boot(self).await?;

        core_routes(self, &self.router).context("core route registration failed")?;
        self.modules.load_routes(self, &self.router)?;
        self.themes.load_routes(self, &self.router)?;

        info!(
            site = %self.site_name,
            env = %self.environment,
            theme = self.themes.active().as_deref().unwrap_or("-"),
            "application booted"
        );
        Ok(())
    }

    /// Dispatch one request. Handler failures never escape: they are
    /// logged and turned into a 500, with the error chain in the body
    /// only when debug mode is on.
    pub async fn handle(&self, request: Request) -> Response {
        let path = request.path().to_string();
        match self.router.dispatch(request).await {
            Ok(response) => response,
            Err(err) => {
                error!(path = %path, error = format!("{err:#}"), "request failed");
                if self.debug {
                    Response::internal_error(&format!("{err:#}"))
                } else {
                    Response::internal_error("Internal Server Error")
                }
            }
        }
    }

    // ---- runtime module/theme switching -------------------------------

    /// Activate a module; on a booted app it is also booted and its
    /// routes registered immediately.
    pub async fn activate_module(self: &Arc<Self>, id: &str) -> Result<(), ModuleError> {
        let newly = self.modules.activate(id)?;
        if newly && self.booted.load(Ordering::SeqCst) {
            if let Some(instance) = self.modules.boot_one(self, id).await? {
                instance
                    .register_routes(self, &self.router)
                    .map_err(|source| ModuleError::Boot {
                        module: id.to_string(),
                        source,
                    })?;
            }
        }
        Ok(())
    }

    pub fn deactivate_module(&self, id: &str) -> Result<(), ModuleError> {
        if self.modules.deactivate(id)? {
            self.container.forget(&format!("module.{id}"));
        }
        Ok(())
    }

    /// Switch the active theme, persist it, and boot its hooks when the
    /// app is already running.
    pub async fn activate_theme(self: &Arc<Self>, id: &str) -> Result<(), ThemeError> {
        self.themes.activate(&self.config, id)?;
        if self.booted.load(Ordering::SeqCst) {
            self.themes.boot(self).await?;
            self.themes.load_routes(self, &self.router)?;
        }
        Ok(())
    }

    // ---- accessors ----------------------------------------------------

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn modules(&self) -> &Arc<ModuleManager> {
        &self.modules
    }

    pub fn themes(&self) -> &Arc<ThemeManager> {
        &self.themes
    }

    pub fn site_name(&self) -> &str {
        &self.site_name
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn is_booted(&self) -> bool {
        self.booted.load(Ordering::SeqCst)
    }

    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("site", &self.site_name)
            .field("environment", &self.environment)
            .field("booted", &self.is_booted())
            .finish()
    }
}

//! Static pages addressed by slug.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use forgekit::{
    handler, inventory, App, Migration, Module, ModuleEntryPoint, Response, Router,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub slug: String,
    pub title: String,
    pub html: String,
}

pub struct PageRepo {
    pages: RwLock<BTreeMap<String, Page>>,
}

impl PageRepo {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let pages = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            let list: Vec<Page> = serde_json::from_str(&raw)
                .with_context(|| format!("corrupt page store {}", path.display()))?;
            list.into_iter().map(|p| (p.slug.clone(), p)).collect()
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            pages: RwLock::new(pages),
        })
    }

    pub fn get(&self, slug: &str) -> Option<Page> {
        self.pages.read().get(slug).cloned()
    }

    pub fn insert(&self, page: Page) {
        self.pages.write().insert(page.slug.clone(), page);
    }
}

fn store_path(app: &App) -> PathBuf {
    let home = app
        .config()
        .get_str("server.home_dir")
        .unwrap_or_default();
    Path::new(&home).join("state").join("pages").join("pages.json")
}

struct SeedDefaultPages;

#[forgekit::async_trait]
impl Migration for SeedDefaultPages {
    fn name(&self) -> &str {
        "seed_default_pages"
    }

    async fn up(&self, app: &Arc<App>) -> anyhow::Result<()> {
        let path = store_path(app);
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let seed = vec![Page {
            slug: "about".into(),
            title: "About".into(),
            html: format!("<p>{} runs on Forge CMS.</p>", app.site_name()),
        }];
        std::fs::write(&path, serde_json::to_string_pretty(&seed)?)?;
        info!(path = %path.display(), "page store created");
        Ok(())
    }
}

pub struct PagesModule;

#[forgekit::async_trait]
impl Module for PagesModule {
    async fn boot(&self, app: &Arc<App>) -> anyhow::Result<()> {
        let repo = Arc::new(PageRepo::load(&store_path(app))?);
        app.container().bind_arc("pages.repo", repo);
        Ok(())
    }

    fn migrations(&self) -> Vec<Arc<dyn Migration>> {
        vec![Arc::new(SeedDefaultPages)]
    }

    fn register_routes(&self, app: &Arc<App>, router: &Router) -> anyhow::Result<()> {
        let show = {
            let app = app.clone();
            handler(move |_req, params| {
                let app = app.clone();
                async move {
                    let repo: Arc<PageRepo> = app.container().resolve("pages.repo")?;
                    match repo.get(params.get(0).unwrap_or("")) {
                        Some(page) => Ok(Response::html(format!(
                            "<h1>{}</h1>{}",
                            page.title, page.html
                        ))),
                        None => Ok(Response::not_found()),
                    }
                }
            })
        };
        router.get("/pages/{slug}", show, Some("pages.show"))?;

        // shorthand for the one page every site has
        let about = {
            let app = app.clone();
            handler(move |_req, _params| {
                let app = app.clone();
                async move {
                    let repo: Arc<PageRepo> = app.container().resolve("pages.repo")?;
                    match repo.get("about") {
                        Some(page) => Ok(Response::html(format!(
                            "<h1>{}</h1>{}",
                            page.title, page.html
                        ))),
                        None => Ok(Response::not_found()),
                    }
                }
            })
        };
        router.get("/about", about, Some("pages.about"))?;
        Ok(())
    }
}

fn construct() -> Arc<dyn Module> {
    Arc::new(PagesModule)
}

inventory::submit! {
    ModuleEntryPoint { name: "pages", construct }
}

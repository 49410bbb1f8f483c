//! Full boot-to-dispatch flow over a temporary installation.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use forgekit::inventory;
use forgekit::{
    handler, App, Migration, Module, ModuleEntryPoint, Request, Response, Router,
};
use forgekit_bootstrap::AppConfig;
use http::StatusCode;

static MIGRATIONS_RUN: AtomicUsize = AtomicUsize::new(0);

struct CreateNotesTable;

#[forgekit::async_trait]
impl Migration for CreateNotesTable {
    fn name(&self) -> &str {
        "create_notes_table"
    }

    async fn up(&self, _app: &Arc<App>) -> anyhow::Result<()> {
        MIGRATIONS_RUN.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Notes;

#[forgekit::async_trait]
impl Module for Notes {
    async fn boot(&self, app: &Arc<App>) -> anyhow::Result<()> {
        app.container().bind_instance("notes.greeting", "hello".to_string());
        Ok(())
    }

    fn migrations(&self) -> Vec<Arc<dyn Migration>> {
        vec![Arc::new(CreateNotesTable)]
    }

    fn register_routes(&self, app: &Arc<App>, router: &Router) -> anyhow::Result<()> {
        let app = app.clone();
        router.get(
            "/notes",
            handler(move |_req, _params| {
                let app = app.clone();
                async move {
                    let greeting: Arc<String> = app.container().resolve("notes.greeting")?;
                    Ok(Response::text(format!("{greeting} from {}", app.site_name())))
                }
            }),
            Some("notes.index"),
        )?;
        Ok(())
    }
}

fn construct_notes() -> Arc<dyn Module> {
    Arc::new(Notes)
}

inventory::submit! {
    ModuleEntryPoint { name: "notes", construct: construct_notes }
}

fn seed_module(root: &Path, id: &str) {
    let dir = root.join(id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("module.json"),
        format!(
            r#"{{"name": "{id}", "version": "0.1.0", "description": "{id} module", "main": "{id}"}}"#
        ),
    )
    .unwrap();
}

fn test_config(tmp: &tempfile::TempDir, default_active: &[&str]) -> AppConfig {
    let mut config = AppConfig::default();
    config.server.home_dir = tmp.path().join("home").display().to_string();
    config.modules.dir = tmp.path().join("modules").display().to_string();
    config.modules.default_active = default_active.iter().map(|s| s.to_string()).collect();
    config.themes.dir = tmp.path().join("themes").display().to_string();
    config
}

#[tokio::test]
async fn boots_dispatches_and_reboots_without_reapplying_migrations() {
    let tmp = tempfile::tempdir().unwrap();
    seed_module(&tmp.path().join("modules"), "notes");
    // a data-only module: valid manifest, no entry point in this binary
    seed_module(&tmp.path().join("modules"), "gallery");

    let app = App::new(test_config(&tmp, &["notes", "gallery"])).unwrap();
    app.boot(|_, router| {
        router.get(
            "/",
            handler(|_r, _p| async { Ok(Response::html("<h1>home</h1>")) }),
            Some("home"),
        )?;
        Ok(())
    })
    .await
    .unwrap();

    let runs_after_first_boot = MIGRATIONS_RUN.load(Ordering::SeqCst);
    assert_eq!(runs_after_first_boot, 1);

    // core route
    let resp = app.handle(Request::get("/")).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert!(resp.body_string().contains("home"));

    // module route sees the service the module bound during boot
    let resp = app.handle(Request::get("/notes")).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert!(resp.body_string().starts_with("hello from "));

    // reverse routing
    let url = app.router().url_for("notes.index", &[]).unwrap();
    assert!(url.ends_with("/notes"));

    // no route
    let resp = app.handle(Request::get("/nowhere")).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);

    // the data-only module is active but has no instance
    assert!(app.modules().is_active("gallery"));
    assert!(app.modules().instance("gallery").is_none());

    // a second app over the same home dir: ledger prevents a re-run
    let app2 = App::new(test_config(&tmp, &["notes", "gallery"])).unwrap();
    app2.boot(|_, _| Ok(())).await.unwrap();
    assert_eq!(MIGRATIONS_RUN.load(Ordering::SeqCst), runs_after_first_boot);
    let resp = app2.handle(Request::get("/notes")).await;
    assert_eq!(resp.status, StatusCode::OK);
}

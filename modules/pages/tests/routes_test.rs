//! Pages routes over a booted application.

use forgekit::{App, Request};
use forgekit_bootstrap::AppConfig;
use http::StatusCode;

// Link the module crate so its inventory-registered entry point is
// compiled into this test binary.
use forge_module_pages as _;

fn test_config(tmp: &tempfile::TempDir) -> AppConfig {
    let modules = tmp.path().join("modules");
    let pages = modules.join("pages");
    std::fs::create_dir_all(&pages).unwrap();
    std::fs::write(
        pages.join("module.json"),
        r#"{"name": "Pages", "version": "0.1.0", "description": "Static pages.", "main": "pages"}"#,
    )
    .unwrap();

    let mut config = AppConfig::default();
    config.server.home_dir = tmp.path().join("home").display().to_string();
    config.modules.dir = modules.display().to_string();
    config.modules.default_active = vec!["pages".to_string()];
    config.themes.dir = tmp.path().join("themes").display().to_string();
    config
}

#[tokio::test]
async fn about_is_served_by_slug_and_by_shorthand() {
    let tmp = tempfile::tempdir().unwrap();
    let app = App::new(test_config(&tmp)).unwrap();
    app.boot(|_, _| Ok(())).await.unwrap();

    for path in ["/pages/about", "/about"] {
        let resp = app.handle(Request::get(path)).await;
        assert_eq!(resp.status, StatusCode::OK, "path {path}");
        assert!(resp.body_string().contains("Forge CMS"));
    }

    let resp = app.handle(Request::get("/pages/missing")).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

//! Core routes and middleware the server contributes before any module.

use std::sync::Arc;

use http::StatusCode;

use forgekit::{handler, App, Request, Response, Router};

pub fn core_routes(app: &Arc<App>, router: &Router) -> anyhow::Result<()> {
    // admin routes compare x-admin-token against the configured token;
    // with no token configured the admin surface stays closed
    let auth_app = app.clone();
    router.register_middleware("auth.admin", move |req: &Request| {
        let expected = auth_app.config().get_str("modules.settings.admin.token");
        let provided = req
            .headers
            .get("x-admin-token")
            .and_then(|v| v.to_str().ok());
        match (expected, provided) {
            (Some(expected), Some(provided)) if expected == provided => None,
            _ => Some(Response::new(StatusCode::FORBIDDEN)),
        }
    });

    let home_app = app.clone();
    router.get(
        "/",
        handler(move |_req, _params| {
            let app = home_app.clone();
            async move { render_home(&app).await }
        }),
        Some("home"),
    )?;

    router.get(
        "/healthz",
        handler(|_req, _params| async { Ok(Response::text("ok")) }),
        Some("healthz"),
    )?;

    Ok(())
}

/// The active theme's `home` template when it has one, a bare heading
/// otherwise.
async fn render_home(app: &Arc<App>) -> anyhow::Result<Response> {
    let Some(path) = app.themes().template_path("home") else {
        return Ok(Response::html(format!("<h1>{}</h1>", app.site_name())));
    };
    let mut html = tokio::fs::read_to_string(&path).await?;
    html = html.replace("{{site_name}}", app.site_name());
    if let Some(css) = app.themes().asset_url("css/app.css") {
        html = html.replace("{{asset:css/app.css}}", &css);
    }
    Ok(Response::html(html))
}

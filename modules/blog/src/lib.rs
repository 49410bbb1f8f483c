//! Blog module: slug-addressed posts with a public listing and an
//! admin-only view of unpublished drafts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use http::StatusCode;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use forgekit::{
    handler, inventory, App, Migration, Module, ModuleEntryPoint, Response, Router,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub slug: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub published: bool,
}

/// In-memory post store backed by a JSON file under the state dir.
pub struct PostIndex {
    path: PathBuf,
    posts: RwLock<BTreeMap<String, Post>>,
}

impl PostIndex {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let posts = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            let list: Vec<Post> = serde_json::from_str(&raw)
                .with_context(|| format!("corrupt post store {}", path.display()))?;
            list.into_iter().map(|p| (p.slug.clone(), p)).collect()
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            posts: RwLock::new(posts),
        })
    }

    pub fn get(&self, slug: &str) -> Option<Post> {
        self.posts.read().get(slug).cloned()
    }

    pub fn published(&self) -> Vec<Post> {
        self.posts
            .read()
            .values()
            .filter(|p| p.published)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Post> {
        self.posts.read().values().cloned().collect()
    }

    /// Upsert by slug.
    pub fn insert(&self, post: Post) {
        self.posts.write().insert(post.slug.clone(), post);
    }

    pub fn remove(&self, slug: &str) -> Option<Post> {
        self.posts.write().remove(slug)
    }

    /// Write the whole index back to its JSON file.
    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&self.all())?)
            .with_context(|| format!("cannot write {}", self.path.display()))?;
        Ok(())
    }
}

fn store_path(app: &App) -> PathBuf {
    let home = app
        .config()
        .get_str("server.home_dir")
        .unwrap_or_default();
    Path::new(&home).join("state").join("blog").join("posts.json")
}

/// Creates the post store file with a couple of starter posts. Runs
/// once; the ledger keeps it from clobbering user data later.
struct CreatePostsStore;

#[forgekit::async_trait]
impl Migration for CreatePostsStore {
    fn name(&self) -> &str {
        "create_posts_store"
    }

    async fn up(&self, app: &Arc<App>) -> anyhow::Result<()> {
        let path = store_path(app);
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let seed = vec![
            Post {
                slug: "welcome".into(),
                title: "Welcome".into(),
                body: "This site just came online.".into(),
                published: true,
            },
            Post {
                slug: "draft-roadmap".into(),
                title: "Roadmap".into(),
                body: "Not ready yet.".into(),
                published: false,
            },
        ];
        std::fs::write(&path, serde_json::to_string_pretty(&seed)?)?;
        info!(path = %path.display(), "post store created");
        Ok(())
    }
}

fn render_list(app: &App, title: &str, posts: &[Post]) -> Response {
    let mut html = String::new();
    if let Some(css) = app.themes().asset_url("css/app.css") {
        html.push_str(&format!(r#"<link rel="stylesheet" href="{css}">"#));
    }
    html.push_str(&format!("<h1>{title}</h1><ul>"));
    for post in posts {
        let href = app
            .router()
            .url_for("posts.show", &[("slug", &post.slug)])
            .unwrap_or_else(|_| format!("/posts/{}", post.slug));
        html.push_str(&format!(r#"<li><a href="{href}">{}</a></li>"#, post.title));
    }
    html.push_str("</ul>");
    Response::html(html)
}

pub struct BlogModule;

#[forgekit::async_trait]
impl Module for BlogModule {
    async fn boot(&self, app: &Arc<App>) -> anyhow::Result<()> {
        let index = Arc::new(PostIndex::load(&store_path(app))?);
        app.container().bind_arc("blog.posts", index);
        Ok(())
    }

    fn migrations(&self) -> Vec<Arc<dyn Migration>> {
        vec![Arc::new(CreatePostsStore)]
    }

    fn register_routes(&self, app: &Arc<App>, router: &Router) -> anyhow::Result<()> {
        let index_app = app.clone();
        let show_app = app.clone();
        router.register_controller(
            "posts",
            [
                (
                    "index",
                    handler(move |_req, _params| {
                        let app = index_app.clone();
                        async move {
                            let posts: Arc<PostIndex> = app.container().resolve("blog.posts")?;
                            Ok(render_list(&app, "Posts", &posts.published()))
                        }
                    }),
                ),
                (
                    "show",
                    handler(move |_req, params| {
                        let app = show_app.clone();
                        async move {
                            let posts: Arc<PostIndex> = app.container().resolve("blog.posts")?;
                            let slug = params.get(0).unwrap_or("");
                            match posts.get(slug).filter(|p| p.published) {
                                Some(post) => Ok(Response::html(format!(
                                    "<h1>{}</h1><p>{}</p>",
                                    post.title, post.body
                                ))),
                                None => Ok(Response::not_found()),
                            }
                        }
                    }),
                ),
            ],
        );

        router.get("/posts", "posts@index", Some("posts.index"))?;
        router.get("/posts/{slug}", "posts@show", Some("posts.show"))?;

        let admin_app = app.clone();
        let store_app = app.clone();
        let update_app = app.clone();
        let destroy_app = app.clone();
        router.register_controller(
            "admin.posts",
            [
                (
                    "index",
                    handler(move |_req, _params| {
                        let app = admin_app.clone();
                        async move {
                            let posts: Arc<PostIndex> = app.container().resolve("blog.posts")?;
                            Ok(render_list(&app, "All posts", &posts.all()))
                        }
                    }),
                ),
                (
                    "store",
                    handler(move |req, _params| {
                        let app = store_app.clone();
                        async move {
                            let posts: Arc<PostIndex> = app.container().resolve("blog.posts")?;
                            let Ok(post) = serde_json::from_slice::<Post>(&req.body) else {
                                return Ok(Response::text("invalid post payload")
                                    .with_status(StatusCode::UNPROCESSABLE_ENTITY));
                            };
                            let slug = post.slug.clone();
                            posts.insert(post);
                            posts.save()?;
                            Ok(Response::text(slug).with_status(StatusCode::CREATED))
                        }
                    }),
                ),
                (
                    "update",
                    handler(move |req, params| {
                        let app = update_app.clone();
                        async move {
                            let posts: Arc<PostIndex> = app.container().resolve("blog.posts")?;
                            let slug = params.get(0).unwrap_or("").to_string();
                            if posts.get(&slug).is_none() {
                                return Ok(Response::not_found());
                            }
                            let Ok(mut post) = serde_json::from_slice::<Post>(&req.body) else {
                                return Ok(Response::text("invalid post payload")
                                    .with_status(StatusCode::UNPROCESSABLE_ENTITY));
                            };
                            // the URL owns the identity
                            post.slug = slug.clone();
                            posts.insert(post);
                            posts.save()?;
                            Ok(Response::text(slug))
                        }
                    }),
                ),
                (
                    "destroy",
                    handler(move |_req, params| {
                        let app = destroy_app.clone();
                        async move {
                            let posts: Arc<PostIndex> = app.container().resolve("blog.posts")?;
                            let slug = params.get(0).unwrap_or("");
                            if posts.remove(slug).is_none() {
                                return Ok(Response::not_found());
                            }
                            posts.save()?;
                            Ok(Response::new(StatusCode::NO_CONTENT))
                        }
                    }),
                ),
            ],
        );

        router.group(
            forgekit::GroupAttributes::prefix("admin").middleware("auth.admin"),
            |router| {
                router.get("/posts", "admin.posts@index", Some("admin.posts.index"))?;
                router.post("/posts", "admin.posts@store", Some("admin.posts.store"))?;
                router.put(
                    "/posts/{slug}",
                    "admin.posts@update",
                    Some("admin.posts.update"),
                )?;
                router.delete(
                    "/posts/{slug}",
                    "admin.posts@destroy",
                    Some("admin.posts.destroy"),
                )?;
                Ok(())
            },
        )?;
        Ok(())
    }
}

fn construct() -> Arc<dyn Module> {
    Arc::new(BlogModule)
}

inventory::submit! {
    ModuleEntryPoint { name: "blog", construct }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_index_loads_and_filters() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("posts.json");
        let posts = vec![
            Post {
                slug: "a".into(),
                title: "A".into(),
                body: "".into(),
                published: true,
            },
            Post {
                slug: "b".into(),
                title: "B".into(),
                body: "".into(),
                published: false,
            },
        ];
        std::fs::write(&path, serde_json::to_string(&posts).unwrap()).unwrap();

        let index = PostIndex::load(&path).unwrap();
        assert_eq!(index.all().len(), 2);
        assert_eq!(index.published().len(), 1);
        assert!(index.get("b").is_some());
        assert!(index.get("c").is_none());
    }

    #[test]
    fn mutations_round_trip_through_save() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("posts.json");

        let index = PostIndex::load(&path).unwrap();
        index.insert(Post {
            slug: "one".into(),
            title: "One".into(),
            body: "".into(),
            published: true,
        });
        index.save().unwrap();

        let reloaded = PostIndex::load(&path).unwrap();
        assert!(reloaded.get("one").is_some());
        assert!(reloaded.remove("one").is_some());
        assert!(reloaded.remove("one").is_none());
        reloaded.save().unwrap();

        assert!(PostIndex::load(&path).unwrap().all().is_empty());
    }

    #[test]
    fn missing_store_file_means_empty_index() {
        let tmp = tempfile::tempdir().unwrap();
        let index = PostIndex::load(&tmp.path().join("nope.json")).unwrap();
        assert!(index.all().is_empty());
    }

    #[test]
    fn corrupt_store_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("posts.json");
        std::fs::write(&path, "[{").unwrap();
        assert!(PostIndex::load(&path).is_err());
    }
}

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::Response;
use tracing::debug;

use super::{Decorator, Handler, SharedHandler};

/// Serves files from a media root for GET requests nothing else handled.
#[derive(Debug, Clone)]
pub struct FileServeDecorator {
    root: PathBuf,
}

impl FileServeDecorator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Decorator for FileServeDecorator {
    fn decorate(&self, next: SharedHandler) -> SharedHandler {
        Arc::new(FileServe {
            root: self.root.clone(),
            next,
        })
    }
}

struct FileServe {
    root: PathBuf,
    next: SharedHandler,
}

/// Maps a URL path onto a file below `root`; `None` for paths that try to
/// leave it.
fn resolve(root: &Path, url_path: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(url_path).ok()?;
    let mut relative = PathBuf::new();
    for component in Path::new(decoded.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if decoded.ends_with('/') || relative.as_os_str().is_empty() {
        relative.push("index.html");
    }
    Some(root.join(relative))
}

impl FileServe {
    async fn try_serve(&self, url_path: &str) -> Option<Response> {
        let path = resolve(&self.root, url_path)?;
        let meta = tokio::fs::metadata(&path).await.ok()?;
        if !meta.is_file() {
            return None;
        }
        let content = tokio::fs::read(&path).await.ok()?;

        let mime = mime_guess::from_path(&path).first_or_octet_stream();
        debug!("Serving static file {}", path.display());

        let mut response = Response::new(Body::from(content));
        *response.status_mut() = StatusCode::OK;
        if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
        Some(response)
    }
}

#[async_trait]
impl Handler for FileServe {
    async fn handle(&self, req: Request) -> Response {
        if req.method() == Method::GET {
            let url_path = req.uri().path().to_string();
            if let Some(response) = self.try_serve(&url_path).await {
                return response;
            }
        }
        self.next.handle(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::testing::{body_string, Echo};

    fn get(path: &str) -> Request {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let root = Path::new("/srv/media");
        assert_eq!(resolve(root, "/app.js"), Some(root.join("app.js")));
        assert_eq!(resolve(root, "/"), Some(root.join("index.html")));
        assert_eq!(resolve(root, "/docs/"), Some(root.join("docs/index.html")));
        assert_eq!(resolve(root, "/../etc/passwd"), None);
        assert_eq!(resolve(root, "/a/%2E%2E/%2E%2E/x"), None);
    }

    #[tokio::test]
    async fn test_serves_existing_file_else_forwards() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>mohawk</h1>").unwrap();
        std::fs::write(dir.path().join("style.css"), "body {}").unwrap();

        let echo = Arc::new(Echo::default());
        let handler = FileServeDecorator::new(dir.path()).decorate(echo.clone());

        let response = handler.handle(get("/")).await;
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");
        assert_eq!(body_string(response).await, "<h1>mohawk</h1>");

        let response = handler.handle(get("/style.css")).await;
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/css");

        handler.handle(get("/missing.js")).await;
        let post = Request::builder()
            .method("POST")
            .uri("/style.css")
            .body(Body::empty())
            .unwrap();
        handler.handle(post).await;

        assert_eq!(echo.seen.lock().as_slice(), ["/missing.js", "/style.css"]);
    }
}

//! Prefix-scoped routing with `:name` parameters and trailing `*name` captures.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::Method;
use axum::response::Response;
use futures::future::BoxFuture;
use tracing::debug;

use crate::middleware::{Handler, SharedHandler};

/// Path parameters captured by a route, by name.
pub type Params = HashMap<String, String>;

pub type RouteFn = Arc<dyn Fn(Request, Params) -> BoxFuture<'static, Response> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Rest(String),
}

impl Segment {
    fn parse(pattern: &str) -> Vec<Segment> {
        let trimmed = pattern.trim_matches('/');
        if trimmed.is_empty() {
            return Vec::new();
        }

        let segments: Vec<Segment> = trimmed
            .split('/')
            .map(|s| {
                if let Some(name) = s.strip_prefix(':') {
                    Segment::Param(name.to_string())
                } else if let Some(name) = s.strip_prefix('*') {
                    Segment::Rest(name.to_string())
                } else {
                    Segment::Literal(s.to_string())
                }
            })
            .collect();

        let rest_at = segments.iter().position(|s| matches!(s, Segment::Rest(_)));
        if let Some(pos) = rest_at {
            assert!(
                pos == segments.len() - 1,
                "catch-all segment must be last in pattern {:?}",
                pattern
            );
        }
        segments
    }
}

struct Route {
    method: Method,
    segments: Vec<Segment>,
    handler: RouteFn,
}

impl Route {
    fn capture(&self, parts: &[&str]) -> Option<Params> {
        let mut params = Params::new();

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(lit) => {
                    if parts.get(i) != Some(&lit.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let part = parts.get(i).filter(|p| !p.is_empty())?;
                    params.insert(name.clone(), unescape(part));
                }
                Segment::Rest(name) => {
                    let rest = parts.get(i..).filter(|r| !r.is_empty())?;
                    params.insert(name.clone(), unescape(&rest.join("/")));
                    return Some(params);
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(params)
    }
}

/// Two patterns clash when they differ only in parameter names.
fn same_shape(a: &[Segment], b: &[Segment]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|pair| match pair {
            (Segment::Literal(x), Segment::Literal(y)) => x == y,
            (Segment::Param(_), Segment::Param(_)) | (Segment::Rest(_), Segment::Rest(_)) => true,
            _ => false,
        })
}

fn unescape(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Routes for one URL prefix. Patterns are relative to the prefix.
pub struct Router {
    prefix: String,
    routes: Vec<Route>,
}

impl Router {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            routes: Vec::new(),
        }
    }

    /// Registers `handler` for `method` and `pattern`.
    ///
    /// # Panics
    ///
    /// Registering the same method and pattern twice is a programming error
    /// and panics.
    pub fn add<F, Fut>(&mut self, method: Method, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(Request, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let segments = Segment::parse(pattern);
        let duplicate = self
            .routes
            .iter()
            .any(|r| r.method == method && same_shape(&r.segments, &segments));
        assert!(
            !duplicate,
            "route {} {}{} registered twice",
            method, self.prefix, pattern
        );

        let handler: RouteFn =
            Arc::new(move |req: Request, params: Params| -> BoxFuture<'static, Response> {
                Box::pin(handler(req, params))
            });
        self.routes.push(Route {
            method,
            segments,
            handler,
        });
        self
    }

    /// Finds the first route registered for `method` whose pattern fits `path`.
    pub fn find(&self, method: &Method, path: &str) -> Option<(RouteFn, Params)> {
        let rest = path.strip_prefix(self.prefix.as_str())?;
        let rest = rest.trim_end_matches('/');
        let parts: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split('/').collect()
        };

        self.routes
            .iter()
            .filter(|r| &r.method == method)
            .find_map(|r| r.capture(&parts).map(|params| (r.handler.clone(), params)))
    }
}

/// Tries each router in order; the first match dispatches, otherwise the
/// request goes to the fallback.
pub struct RouterChain {
    routers: Vec<Router>,
    fallback: SharedHandler,
}

#[async_trait]
impl Handler for RouterChain {
    async fn handle(&self, req: Request) -> Response {
        let found = self
            .routers
            .iter()
            .find_map(|r| r.find(req.method(), req.uri().path()));

        match found {
            Some((handler, params)) => {
                debug!("Matched {} {} {:?}", req.method(), req.uri().path(), params);
                handler(req, params).await
            }
            None => self.fallback.handle(req).await,
        }
    }
}

pub fn append(fallback: SharedHandler, routers: Vec<Router>) -> SharedHandler {
    Arc::new(RouterChain { routers, fallback })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::testing::body_string;
    use axum::body::Body;
    use axum::http::StatusCode;
    use pretty_assertions::assert_eq;

    fn reply(
        text: &'static str,
    ) -> impl Fn(Request, Params) -> BoxFuture<'static, Response> + Send + Sync {
        move |_req: Request, params: Params| -> BoxFuture<'static, Response> {
            let mut keys: Vec<_> = params.into_iter().collect();
            keys.sort();
            let body = format!("{} {:?}", text, keys);
            Box::pin(async move { Response::new(Body::from(body)) })
        }
    }

    fn lookup(router: &Router, method: Method, path: &str) -> Option<Params> {
        router.find(&method, path).map(|(_, params)| params)
    }

    fn gauges() -> Router {
        let mut r = Router::new("/hawkular/metrics/gauges/");
        r.add(Method::GET, ":id/raw", reply("raw"))
            .add(Method::POST, "raw", reply("post"))
            .add(Method::POST, "raw/query", reply("query"))
            .add(Method::DELETE, ":id/tags/:tags", reply("deltags"))
            .add(Method::GET, "files/*path", reply("files"));
        r
    }

    #[test]
    fn test_captures_named_params() {
        let r = gauges();
        let params = lookup(&r, Method::GET, "/hawkular/metrics/gauges/cpu.load/raw").unwrap();
        assert_eq!(params["id"], "cpu.load");

        let params =
            lookup(&r, Method::DELETE, "/hawkular/metrics/gauges/cpu/tags/host,dc").unwrap();
        assert_eq!(params["id"], "cpu");
        assert_eq!(params["tags"], "host,dc");
    }

    #[test]
    fn test_params_are_unescaped() {
        let r = gauges();
        let params = lookup(&r, Method::GET, "/hawkular/metrics/gauges/a%20b%2Fc/raw").unwrap();
        assert_eq!(params["id"], "a b/c");
    }

    #[test]
    fn test_rest_capture() {
        let r = gauges();
        let params = lookup(&r, Method::GET, "/hawkular/metrics/gauges/files/a/b/c.txt").unwrap();
        assert_eq!(params["path"], "a/b/c.txt");
        assert!(lookup(&r, Method::GET, "/hawkular/metrics/gauges/files").is_none());
    }

    #[test]
    fn test_method_prefix_and_shape_must_fit() {
        let r = gauges();
        assert!(lookup(&r, Method::PUT, "/hawkular/metrics/gauges/cpu/raw").is_none());
        assert!(lookup(&r, Method::GET, "/hawkular/metrics/counters/cpu/raw").is_none());
        assert!(lookup(&r, Method::GET, "/other/gauges/cpu/raw").is_none());
        assert!(lookup(&r, Method::GET, "/hawkular/metrics/gauges/cpu/raw/extra").is_none());
        assert!(lookup(&r, Method::GET, "/hawkular/metrics/gauges//raw").is_none());
        assert!(lookup(&r, Method::POST, "/hawkular/metrics/gauges/raw/").is_some());
    }

    #[test]
    fn test_earlier_registration_wins() {
        let mut r = Router::new("/p/");
        r.add(Method::GET, ":id", reply("param"))
            .add(Method::GET, "fixed", reply("literal"));

        let (handler, _) = r.find(&Method::GET, "/p/fixed").unwrap();
        let response = tokio_test::block_on(handler(
            Request::builder().uri("/p/fixed").body(Body::empty()).unwrap(),
            Params::new(),
        ));
        assert_eq!(tokio_test::block_on(body_string(response)), "param []");
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_duplicate_registration_panics() {
        let mut r = Router::new("/p/");
        r.add(Method::GET, ":id/raw", reply("a"));
        r.add(Method::GET, ":other/raw", reply("b"));
    }

    #[tokio::test]
    async fn test_chain_dispatches_or_falls_back() {
        use crate::middleware::testing::Echo;

        let mut status = Router::new("/hawkular/metrics/");
        status.add(Method::GET, "status", reply("status"));
        let fallback = Arc::new(Echo::default());
        let chain = append(fallback.clone(), vec![gauges(), status]);

        let response = chain
            .handle(
                Request::builder()
                    .uri("/hawkular/metrics/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(body_string(response).await, "status []");

        let response = chain
            .handle(
                Request::builder()
                    .uri("/hawkular/metrics/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(fallback.seen.lock().as_slice(), ["/hawkular/metrics/nope"]);
    }
}

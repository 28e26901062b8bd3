use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use axum::response::Response;

use super::{Decorator, Handler, SharedHandler};

pub const ALLOW_ORIGIN: &str = "*";
pub const ALLOW_HEADERS: &str = "authorization,content-type,hawkular-tenant";
pub const ALLOW_METHODS: &str = "GET, POST, DELETE, PUT";

/// Standard response headers: JSON content type plus CORS.
pub fn defaults() -> [(HeaderName, HeaderValue); 4] {
    [
        (
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        ),
        (
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static(ALLOW_ORIGIN),
        ),
        (
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        ),
        (
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        ),
    ]
}

/// Fills in any default header the inner handlers did not set.
pub fn apply_defaults(headers: &mut HeaderMap) {
    for (name, value) in defaults() {
        headers.entry(name).or_insert(value);
    }
}

#[derive(Debug, Clone, Default)]
pub struct DefaultHeadersDecorator;

impl Decorator for DefaultHeadersDecorator {
    fn decorate(&self, next: SharedHandler) -> SharedHandler {
        Arc::new(DefaultHeaders { next })
    }
}

struct DefaultHeaders {
    next: SharedHandler,
}

#[async_trait]
impl Handler for DefaultHeaders {
    async fn handle(&self, req: Request) -> Response {
        let mut response = self.next.handle(req).await;
        apply_defaults(response.headers_mut());
        response
    }
}

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::Response;
use tracing::warn;

use super::{headers, Handler};

/// Capability advertisement returned for CORS preflight requests.
pub const OPTIONS_BODY: &str = r#"{"GET":{},"PUT":{},"POST":{}}"#;
pub const NOT_FOUND_BODY: &str = "Page not found - 404\n";

/// Terminal handler for requests no route matched.
#[derive(Debug, Clone, Default)]
pub struct BadRequestHandler;

#[async_trait]
impl Handler for BadRequestHandler {
    async fn handle(&self, req: Request) -> Response {
        if req.method() == Method::OPTIONS {
            let mut response = Response::new(Body::from(OPTIONS_BODY));
            headers::apply_defaults(response.headers_mut());
            return response;
        }

        let accept_encoding = req
            .headers()
            .get(header::ACCEPT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        warn!(
            "Page not found - 404: Accept-Encoding: {}, {:>4} {}",
            accept_encoding,
            req.method(),
            req.uri()
        );

        let mut response = Response::new(Body::from(NOT_FOUND_BODY));
        *response.status_mut() = StatusCode::NOT_FOUND;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}

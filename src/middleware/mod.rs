//! Request pipeline: a chain of decorators ending in the router chain and the
//! fallback handler.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use axum::response::Response;

pub mod auth;
pub mod bad_request;
pub mod gzip;
pub mod headers;
pub mod logging;
pub mod static_files;

pub use auth::AuthDecorator;
pub use bad_request::BadRequestHandler;
pub use gzip::{GzipDecodeDecorator, GzipEncodeDecorator};
pub use headers::DefaultHeadersDecorator;
pub use logging::LoggingDecorator;
pub use static_files::FileServeDecorator;

/// Largest request or response body any stage buffers in memory.
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Anything that turns a request into a response.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, req: Request) -> Response;
}

pub type SharedHandler = Arc<dyn Handler>;

/// Wraps the next handler in the chain with one cross-cutting concern.
pub trait Decorator: Send + Sync {
    fn decorate(&self, next: SharedHandler) -> SharedHandler;
}

/// Composes `decorators` around `core`. The first decorator is the outermost:
/// it sees the request first and the response last.
pub fn append(core: SharedHandler, decorators: Vec<Box<dyn Decorator>>) -> SharedHandler {
    decorators
        .into_iter()
        .rev()
        .fold(core, |next, decorator| decorator.decorate(next))
}

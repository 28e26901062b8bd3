use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{ConnectInfo, Request};
use axum::http::header;
use axum::response::Response;
use tracing::{debug, info};

use super::{Decorator, Handler, SharedHandler};
use crate::metrics::RequestTimer;

/// Logs every request before passing it on. Never short-circuits.
#[derive(Debug, Clone, Default)]
pub struct LoggingDecorator;

impl Decorator for LoggingDecorator {
    fn decorate(&self, next: SharedHandler) -> SharedHandler {
        Arc::new(Logged { next })
    }
}

struct Logged {
    next: SharedHandler,
}

#[async_trait]
impl Handler for Logged {
    async fn handle(&self, req: Request) -> Response {
        let timer = RequestTimer::start(req.method());

        let remote = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string())
            .unwrap_or_else(|| "-".to_string());
        let accept_encoding = req
            .headers()
            .get(header::ACCEPT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        info!(
            "{} Accept-Encoding: {}, {:>4} {}",
            remote,
            accept_encoding,
            req.method(),
            req.uri()
        );
        debug!("Request headers: {:?}", req.headers());

        let response = self.next.handle(req).await;
        timer.finish(response.status());
        response
    }
}

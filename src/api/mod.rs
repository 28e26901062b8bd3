//! REST surface: route tables, pipeline assembly and the HTTP listener.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Request;
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use futures::future::{BoxFuture, FutureExt};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::MohawkError;
use crate::middleware::{
    self, AuthDecorator, BadRequestHandler, Decorator, DefaultHeadersDecorator,
    FileServeDecorator, GzipDecodeDecorator, GzipEncodeDecorator, Handler, LoggingDecorator,
    SharedHandler,
};
use crate::models::MetricType;
use crate::router::{self, Params, Router};
use crate::storage::Backend;
use crate::Result;

pub mod handlers;
pub mod params;

use params::View;

pub const API_PREFIX: &str = "/hawkular/metrics/";

/// Paths reachable without a token.
pub const AUTH_EXEMPT: &str = "^/hawkular/metrics/status$";

/// State shared by every handler.
pub struct ServerContext {
    pub backend: Arc<dyn Backend>,
}

impl ServerContext {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

/// Adapts a fallible handler into a route, turning errors into responses.
fn bind<F, Fut>(
    ctx: &Arc<ServerContext>,
    f: F,
) -> impl Fn(Request, Params) -> BoxFuture<'static, Response> + Send + Sync + 'static
where
    F: Fn(Arc<ServerContext>, Request, Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    let ctx = ctx.clone();
    move |req: Request, params: Params| -> BoxFuture<'static, Response> {
        let fut = f(ctx.clone(), req, params);
        async move { fut.await.unwrap_or_else(IntoResponse::into_response) }.boxed()
    }
}

/// Data routes shared by gauges and counters.
fn metric_router(ctx: &Arc<ServerContext>, kind: MetricType, prefix: &str) -> Router {
    let mut r = Router::new(prefix);
    r.add(Method::GET, ":id/raw", bind(ctx, move |c, req, p| {
        handlers::get_data(c, kind, View::Raw, req, p)
    }))
    .add(Method::GET, ":id/stats", bind(ctx, move |c, req, p| {
        handlers::get_data(c, kind, View::Stats, req, p)
    }))
    .add(Method::POST, "raw", bind(ctx, move |c, req, p| {
        handlers::post_data(c, kind, req, p)
    }))
    .add(Method::POST, "raw/query", bind(ctx, move |c, req, p| {
        handlers::post_query(c, kind, req, p)
    }))
    .add(Method::PUT, ":id/tags", bind(ctx, move |c, req, p| {
        handlers::put_tags(c, kind, req, p)
    }));

    // deprecated aliases
    r.add(Method::GET, ":id/data", bind(ctx, move |c, req, p| {
        handlers::get_data(c, kind, View::Auto, req, p)
    }))
    .add(Method::POST, "data", bind(ctx, move |c, req, p| {
        handlers::post_data(c, kind, req, p)
    }))
    .add(Method::POST, "stats/query", bind(ctx, move |c, req, p| {
        handlers::post_query(c, kind, req, p)
    }));
    r
}

/// All routers, in matching order.
pub fn routers(ctx: &Arc<ServerContext>) -> Vec<Router> {
    let mut gauges = metric_router(ctx, MetricType::Gauge, "/hawkular/metrics/gauges/");
    gauges
        .add(Method::PUT, "tags", bind(ctx, |c, req, p| {
            handlers::put_multi_tags(c, MetricType::Gauge, req, p)
        }))
        .add(Method::DELETE, ":id/raw", bind(ctx, |c, req, p| {
            handlers::delete_data(c, MetricType::Gauge, req, p)
        }))
        .add(Method::DELETE, ":id/tags/:tags", bind(ctx, |c, req, p| {
            handlers::delete_tags(c, MetricType::Gauge, req, p)
        }));

    let counters = metric_router(ctx, MetricType::Counter, "/hawkular/metrics/counters/");

    let mut availability = Router::new("/hawkular/metrics/availability/");
    availability
        .add(Method::GET, ":id/raw", bind(ctx, |c, req, p| {
            handlers::get_data(c, MetricType::Availability, View::Raw, req, p)
        }))
        .add(Method::GET, ":id/stats", bind(ctx, |c, req, p| {
            handlers::get_data(c, MetricType::Availability, View::Stats, req, p)
        }));

    let mut root = Router::new(API_PREFIX);
    root.add(Method::GET, "status", bind(ctx, handlers::status))
        .add(Method::GET, "tenants", bind(ctx, handlers::tenants))
        .add(Method::GET, "metrics", bind(ctx, handlers::list_metrics));

    let mut process = Router::new("/");
    process.add(Method::GET, "metrics", bind(ctx, handlers::self_metrics));

    vec![gauges, counters, availability, root, process]
}

/// Builds the full request pipeline: decorators around the router chain,
/// which falls back to static files and finally the bad-request handler.
pub fn build_handler(config: &ServerConfig, ctx: Arc<ServerContext>) -> Result<SharedHandler> {
    let fallback = FileServeDecorator::new(config.media.clone())
        .decorate(Arc::new(BadRequestHandler));
    let core = router::append(fallback, routers(&ctx));

    let mut decorators: Vec<Box<dyn Decorator>> = vec![
        Box::new(LoggingDecorator),
        Box::new(DefaultHeadersDecorator),
    ];
    if !config.token.is_empty() {
        decorators.push(Box::new(AuthDecorator::new(&config.token, AUTH_EXEMPT)?));
    }
    if config.gzip {
        decorators.push(Box::new(GzipDecodeDecorator::new(true)));
        decorators.push(Box::new(GzipEncodeDecorator::new(true)));
    }

    Ok(middleware::append(core, decorators))
}

/// Wraps the pipeline in an axum app that sends every request through it.
pub fn app(handler: SharedHandler) -> axum::Router {
    axum::Router::new().fallback(move |req: Request| {
        let handler = handler.clone();
        async move { handler.handle(req).await }
    })
}

/// Listens on `config.port` until `shutdown` resolves.
pub async fn serve<S>(config: &ServerConfig, ctx: Arc<ServerContext>, shutdown: S) -> Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let handler = build_handler(config, ctx)?;
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| MohawkError::Configuration(format!("can't listen on {}: {}", addr, e)))?;

    info!("Start server, listen on http://{}", addr);
    axum::serve(
        listener,
        app(handler).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(|e| MohawkError::Internal(format!("server error: {}", e)))?;

    info!("Server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    fn context() -> Arc<ServerContext> {
        Arc::new(ServerContext::new(Arc::new(MemoryBackend::new())))
    }

    #[test]
    fn test_routes_cover_rest_surface() {
        let routers = routers(&context());
        let hit = |method: Method, path: &str| routers.iter().any(|r| r.find(&method, path).is_some());

        assert!(hit(Method::GET, "/hawkular/metrics/status"));
        assert!(hit(Method::GET, "/hawkular/metrics/gauges/cpu/raw"));
        assert!(hit(Method::GET, "/hawkular/metrics/counters/hits/stats"));
        assert!(hit(Method::GET, "/hawkular/metrics/availability/db/raw"));
        assert!(hit(Method::POST, "/hawkular/metrics/gauges/raw/query"));
        assert!(hit(Method::POST, "/hawkular/metrics/counters/stats/query"));
        assert!(hit(Method::PUT, "/hawkular/metrics/gauges/tags"));
        assert!(hit(Method::DELETE, "/hawkular/metrics/gauges/cpu/tags/a,b"));
        assert!(hit(Method::GET, "/metrics"));

        assert!(!hit(Method::DELETE, "/hawkular/metrics/counters/hits/raw"));
        assert!(!hit(Method::POST, "/hawkular/metrics/availability/raw"));
        assert!(!hit(Method::GET, "/hawkular/metrics/unknown"));
    }
}

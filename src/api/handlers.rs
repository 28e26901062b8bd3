//! Request handlers: translate REST calls into storage calls.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::params::{now_ms, tenant, DataParams, QueryBody, View};
use super::ServerContext;
use crate::error::MohawkError;
use crate::metrics::{self, record_storage_operation};
use crate::middleware::MAX_BODY_BYTES;
use crate::models::{
    AvailabilityPoint, DataPoint, MetricKey, MetricType, QueryResult, Tags,
};
use crate::router::Params;
use crate::Result;

pub const API_VERSION: &str = "0.21.0";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Serialize)]
pub struct Status {
    #[serde(rename = "MetricsService")]
    pub metrics_service: &'static str,
    #[serde(rename = "Implementation-Version")]
    pub implementation_version: &'static str,
    #[serde(rename = "MohawkVersion")]
    pub mohawk_version: &'static str,
    #[serde(rename = "MohawkBackend")]
    pub mohawk_backend: &'static str,
}

#[derive(Debug, Deserialize)]
struct MetricData {
    id: String,
    #[serde(default)]
    data: Vec<DataPoint>,
}

#[derive(Debug, Deserialize)]
struct MetricTags {
    id: String,
    #[serde(default)]
    tags: Tags,
}

async fn read_json<T: DeserializeOwned>(req: Request) -> Result<T> {
    let bytes = to_bytes(req.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|e| MohawkError::InvalidArgument(format!("can't read body: {}", e)))?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn param(params: &Params, name: &str) -> Result<String> {
    params
        .get(name)
        .cloned()
        .ok_or_else(|| MohawkError::InvalidArgument(format!("missing path parameter {}", name)))
}

fn ok() -> Response {
    StatusCode::OK.into_response()
}

/// Renders a query result: raw points in the requested order and limit,
/// availability values as state names.
fn render(kind: MetricType, result: QueryResult, params: &DataParams) -> Result<Value> {
    match result {
        QueryResult::Raw(mut points) => {
            if params.descending()? {
                points.reverse();
            }
            if let Some(limit) = params.limit()? {
                points.truncate(limit);
            }
            if kind == MetricType::Availability {
                let points: Vec<AvailabilityPoint> = points.into_iter().map(Into::into).collect();
                Ok(serde_json::to_value(points)?)
            } else {
                Ok(serde_json::to_value(points)?)
            }
        }
        QueryResult::Stats(buckets) => Ok(serde_json::to_value(buckets)?),
    }
}

pub async fn status(ctx: Arc<ServerContext>, _req: Request, _params: Params) -> Result<Response> {
    let status = Status {
        metrics_service: "STARTED",
        implementation_version: API_VERSION,
        mohawk_version: VERSION,
        mohawk_backend: ctx.backend.name(),
    };
    let body = format!("{}\n", serde_json::to_string(&status)?);
    Ok(Response::new(Body::from(body)))
}

pub async fn tenants(ctx: Arc<ServerContext>, _req: Request, _params: Params) -> Result<Response> {
    record_storage_operation("list_tenants");
    let tenants = ctx.backend.list_tenants().await?;
    let body: Vec<Value> = tenants.into_iter().map(|id| json!({ "id": id })).collect();
    Ok(Json(body).into_response())
}

pub async fn list_metrics(
    ctx: Arc<ServerContext>,
    req: Request,
    _params: Params,
) -> Result<Response> {
    let tenant = tenant(req.headers());
    let query = DataParams::from_uri(req.uri())?;
    let kind = query
        .kind
        .as_deref()
        .map(str::parse::<MetricType>)
        .transpose()?;
    let filters = query.tag_filters()?;

    record_storage_operation("list_metrics");
    let metrics = ctx.backend.list_metrics(&tenant, kind, &filters).await?;
    Ok(Json(metrics).into_response())
}

pub async fn get_data(
    ctx: Arc<ServerContext>,
    kind: MetricType,
    view: View,
    req: Request,
    params: Params,
) -> Result<Response> {
    let tenant = tenant(req.headers());
    let metric = MetricKey::new(kind, param(&params, "id")?);
    let query = DataParams::from_uri(req.uri())?;
    let range = query.range(now_ms())?;
    let query_kind = query.query_kind(view, range)?;

    debug!("Query {} {} {:?} {:?}", tenant, metric, range, query_kind);
    record_storage_operation("query");
    let result = ctx.backend.query(&tenant, &metric, range, query_kind).await?;
    Ok(Json(render(kind, result, &query)?).into_response())
}

pub async fn post_data(
    ctx: Arc<ServerContext>,
    kind: MetricType,
    req: Request,
    _params: Params,
) -> Result<Response> {
    let tenant = tenant(req.headers());
    let items: Vec<MetricData> = read_json(req).await?;

    for item in items {
        let metric = MetricKey::new(kind, item.id);
        record_storage_operation("write");
        ctx.backend.write(&tenant, &metric, &item.data).await?;
        debug!("Wrote {} points to {} {}", item.data.len(), tenant, metric);
    }
    Ok(ok())
}

pub async fn post_query(
    ctx: Arc<ServerContext>,
    kind: MetricType,
    req: Request,
    _params: Params,
) -> Result<Response> {
    let tenant = tenant(req.headers());
    let body: QueryBody = read_json(req).await?;
    let query = body.params();
    let range = query.range(now_ms())?;
    let query_kind = query.query_kind(View::Auto, range)?;

    let mut ids = body.ids.clone();
    let filters = query.tag_filters()?;
    if !filters.is_empty() {
        record_storage_operation("list_metrics");
        let tagged = ctx.backend.list_metrics(&tenant, Some(kind), &filters).await?;
        ids.extend(tagged.into_iter().map(|m| m.id));
    }
    ids.sort();
    ids.dedup();

    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let metric = MetricKey::new(kind, id);
        record_storage_operation("query");
        let result = ctx.backend.query(&tenant, &metric, range, query_kind).await?;
        out.push(json!({ "id": metric.id, "data": render(kind, result, &query)? }));
    }
    Ok(Json(out).into_response())
}

pub async fn put_tags(
    ctx: Arc<ServerContext>,
    kind: MetricType,
    req: Request,
    params: Params,
) -> Result<Response> {
    let tenant = tenant(req.headers());
    let metric = MetricKey::new(kind, param(&params, "id")?);
    let tags: Tags = read_json(req).await?;

    record_storage_operation("put_tags");
    ctx.backend.put_tags(&tenant, &metric, &tags).await?;
    Ok(ok())
}

pub async fn put_multi_tags(
    ctx: Arc<ServerContext>,
    kind: MetricType,
    req: Request,
    _params: Params,
) -> Result<Response> {
    let tenant = tenant(req.headers());
    let items: Vec<MetricTags> = read_json(req).await?;

    for item in items {
        let metric = MetricKey::new(kind, item.id);
        record_storage_operation("put_tags");
        ctx.backend.put_tags(&tenant, &metric, &item.tags).await?;
    }
    Ok(ok())
}

pub async fn delete_data(
    ctx: Arc<ServerContext>,
    kind: MetricType,
    req: Request,
    params: Params,
) -> Result<Response> {
    let tenant = tenant(req.headers());
    let metric = MetricKey::new(kind, param(&params, "id")?);
    let range = DataParams::from_uri(req.uri())?.range(now_ms())?;

    record_storage_operation("delete_data");
    ctx.backend.delete_data(&tenant, &metric, range).await?;
    info!("Deleted {} {} in [{}, {})", tenant, metric, range.start, range.end);
    Ok(ok())
}

pub async fn delete_tags(
    ctx: Arc<ServerContext>,
    kind: MetricType,
    req: Request,
    params: Params,
) -> Result<Response> {
    let tenant = tenant(req.headers());
    let metric = MetricKey::new(kind, param(&params, "id")?);
    let keys: Vec<String> = param(&params, "tags")?
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect();
    if keys.is_empty() {
        return Err(MohawkError::InvalidArgument("no tag keys given".to_string()));
    }

    record_storage_operation("delete_tags");
    ctx.backend.delete_tags(&tenant, &metric, &keys).await?;
    Ok(ok())
}

/// Prometheus text exposition of the server's own metrics.
pub async fn self_metrics(
    _ctx: Arc<ServerContext>,
    _req: Request,
    _params: Params,
) -> Result<Response> {
    let mut response = Response::new(Body::from(metrics::render()));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::testing::body_string;
    use crate::storage::MemoryBackend;
    use pretty_assertions::assert_eq;

    fn context() -> Arc<ServerContext> {
        Arc::new(ServerContext::new(Arc::new(MemoryBackend::new())))
    }

    fn request(uri: &str, body: &str) -> Request {
        Request::builder()
            .uri(uri)
            .header("Hawkular-Tenant", "acme")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn id(value: &str) -> Params {
        Params::from([("id".to_string(), value.to_string())])
    }

    #[tokio::test]
    async fn test_status_body() {
        let response = status(context(), request("/", ""), Params::new()).await.unwrap();
        let body = body_string(response).await;
        assert_eq!(
            body,
            format!(
                "{{\"MetricsService\":\"STARTED\",\"Implementation-Version\":\"0.21.0\",\
                 \"MohawkVersion\":\"{}\",\"MohawkBackend\":\"memory\"}}\n",
                VERSION
            )
        );
    }

    #[tokio::test]
    async fn test_post_then_get_raw() {
        let ctx = context();
        let body = r#"[{"id":"cpu","data":[{"timestamp":3000,"value":3.0},{"timestamp":1000,"value":1.0}]}]"#;
        post_data(ctx.clone(), MetricType::Gauge, request("/", body), Params::new())
            .await
            .unwrap();

        let response = get_data(
            ctx.clone(),
            MetricType::Gauge,
            View::Raw,
            request("/?start=0&end=10000&order=DESC&limit=1", ""),
            id("cpu"),
        )
        .await
        .unwrap();
        assert_eq!(
            body_string(response).await,
            r#"[{"timestamp":3000,"value":3.0}]"#
        );
    }

    #[tokio::test]
    async fn test_availability_rendered_as_states() {
        let ctx = context();
        let metric = MetricKey::new(MetricType::Availability, "db");
        ctx.backend
            .write(
                "acme",
                &metric,
                &[DataPoint::new(1000, 1.0), DataPoint::new(2000, 0.0)],
            )
            .await
            .unwrap();

        let response = get_data(
            ctx,
            MetricType::Availability,
            View::Raw,
            request("/?start=0&end=10000", ""),
            id("db"),
        )
        .await
        .unwrap();
        assert_eq!(
            body_string(response).await,
            r#"[{"timestamp":1000,"value":"up"},{"timestamp":2000,"value":"down"}]"#
        );
    }

    #[tokio::test]
    async fn test_delete_tags_needs_keys() {
        let params = Params::from([
            ("id".to_string(), "cpu".to_string()),
            ("tags".to_string(), " , ".to_string()),
        ]);
        let err = delete_tags(context(), MetricType::Gauge, request("/", ""), params)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_bad_body_is_400() {
        let err = post_data(
            context(),
            MetricType::Gauge,
            request("/", "{not json"),
            Params::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}

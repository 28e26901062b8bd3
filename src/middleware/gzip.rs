use std::io::{Read, Write};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, warn};

use super::{Decorator, Handler, SharedHandler, MAX_BODY_BYTES};
use crate::error::MohawkError;

fn has_gzip(headers: &HeaderMap, name: header::HeaderName) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|enc| enc.trim().split(';').next() == Some("gzip"))
}

/// Inflates gzip request bodies. A no-op when disabled.
#[derive(Debug, Clone)]
pub struct GzipDecodeDecorator {
    enabled: bool,
}

impl GzipDecodeDecorator {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl Decorator for GzipDecodeDecorator {
    fn decorate(&self, next: SharedHandler) -> SharedHandler {
        if !self.enabled {
            return next;
        }
        Arc::new(GzipDecode { next })
    }
}

struct GzipDecode {
    next: SharedHandler,
}

#[async_trait]
impl Handler for GzipDecode {
    async fn handle(&self, req: Request) -> Response {
        if !has_gzip(req.headers(), header::CONTENT_ENCODING) {
            return self.next.handle(req).await;
        }

        let (mut parts, body) = req.into_parts();
        let compressed = match to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return MohawkError::InvalidArgument(format!("can't read body: {}", e))
                    .into_response()
            }
        };

        let mut inflated = Vec::new();
        if let Err(e) = GzDecoder::new(compressed.as_ref()).read_to_end(&mut inflated) {
            warn!("Rejecting malformed gzip body: {}", e);
            return MohawkError::InvalidArgument(format!("bad gzip body: {}", e)).into_response();
        }
        debug!("Inflated request body {} -> {} bytes", compressed.len(), inflated.len());

        parts.headers.remove(header::CONTENT_ENCODING);
        parts.headers.remove(header::CONTENT_LENGTH);
        self.next
            .handle(Request::from_parts(parts, Body::from(inflated)))
            .await
    }
}

/// Compresses responses for clients that accept gzip. A no-op when disabled.
#[derive(Debug, Clone)]
pub struct GzipEncodeDecorator {
    enabled: bool,
}

impl GzipEncodeDecorator {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl Decorator for GzipEncodeDecorator {
    fn decorate(&self, next: SharedHandler) -> SharedHandler {
        if !self.enabled {
            return next;
        }
        Arc::new(GzipEncode { next })
    }
}

struct GzipEncode {
    next: SharedHandler,
}

fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

#[async_trait]
impl Handler for GzipEncode {
    async fn handle(&self, req: Request) -> Response {
        let accepts = has_gzip(req.headers(), header::ACCEPT_ENCODING);
        let response = self.next.handle(req).await;
        if !accepts || response.headers().contains_key(header::CONTENT_ENCODING) {
            return response;
        }

        let (mut parts, body) = response.into_parts();
        let plain = match to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return MohawkError::Internal(format!("can't read response body: {}", e))
                    .into_response()
            }
        };
        if plain.is_empty() {
            return Response::from_parts(parts, Body::empty());
        }

        match compress(&plain) {
            Ok(packed) => {
                parts
                    .headers
                    .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
                parts
                    .headers
                    .insert(header::VARY, HeaderValue::from_static("Accept-Encoding"));
                parts.headers.remove(header::CONTENT_LENGTH);
                Response::from_parts(parts, Body::from(packed))
            }
            Err(e) => {
                warn!("Sending uncompressed response, gzip failed: {}", e);
                Response::from_parts(parts, Body::from(plain))
            }
        }
    }
}

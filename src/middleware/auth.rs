use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::{header, Method};
use axum::response::{IntoResponse, Response};
use regex::Regex;
use tracing::warn;

use super::{Decorator, Handler, SharedHandler};
use crate::error::MohawkError;
use crate::Result;

/// Rejects requests without `Authorization: Bearer <token>`, except for paths
/// matching the exemption pattern and CORS preflight `OPTIONS`, which
/// browsers send without credentials.
#[derive(Debug, Clone)]
pub struct AuthDecorator {
    token: Arc<str>,
    exempt: Regex,
}

impl AuthDecorator {
    pub fn new(token: &str, exempt_pattern: &str) -> Result<Self> {
        let exempt = Regex::new(exempt_pattern).map_err(|e| {
            MohawkError::Configuration(format!("bad auth exemption pattern: {}", e))
        })?;
        Ok(Self {
            token: Arc::from(token),
            exempt,
        })
    }
}

impl Decorator for AuthDecorator {
    fn decorate(&self, next: SharedHandler) -> SharedHandler {
        Arc::new(Auth {
            token: self.token.clone(),
            exempt: self.exempt.clone(),
            next,
        })
    }
}

struct Auth {
    token: Arc<str>,
    exempt: Regex,
    next: SharedHandler,
}

impl Auth {
    fn authorized(&self, req: &Request) -> bool {
        req.headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map_or(false, |presented| presented.trim() == &*self.token)
    }
}

#[async_trait]
impl Handler for Auth {
    async fn handle(&self, req: Request) -> Response {
        if req.method() == Method::OPTIONS
            || self.exempt.is_match(req.uri().path())
            || self.authorized(&req)
        {
            return self.next.handle(req).await;
        }

        warn!("Unauthorized request: {} {}", req.method(), req.uri());
        MohawkError::Unauthorized.into_response()
    }
}

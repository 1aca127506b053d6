//! Request logging middleware for the HTTP API.
//!
//! Every request gets a start and a finish event on the `api` target, tagged
//! with the API area it hit (`orders`, `drafts`, `integration`, ...) and,
//! for order and draft routes, the sector. Health probes are logged at debug.

use actix_web::Error;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready};
use actix_web::http::StatusCode;
use futures_util::future::LocalBoxFuture;
use std::future::{Ready, ready};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::INTEGRATION_KEY_HEADER;
use crate::models::OrderSector;

/// Characters of the integration key that may appear in logs.
const KEY_PREFIX_LEN: usize = 6;

/// Request logger middleware factory.
pub struct RequestLogger;

impl<S, B> Transform<S, ServiceRequest> for RequestLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggerMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggerMiddleware { service }))
    }
}

pub struct RequestLoggerMiddleware<S> {
    service: S,
}

/// Which part of the API a path belongs to, and the sector when it has one.
fn classify_path(path: &str) -> (&'static str, Option<OrderSector>) {
    let mut segments = path
        .trim_start_matches('/')
        .trim_start_matches("api/v1")
        .split('/')
        .filter(|s| !s.is_empty());

    match segments.next() {
        Some("orders") => ("orders", segments.next().and_then(OrderSector::parse)),
        // /drafts/{session}/{sector}/...
        Some("drafts") => ("drafts", segments.nth(1).and_then(OrderSector::parse)),
        Some("integration") => ("integration", None),
        Some("admin") => ("admin", None),
        Some("health") | Some("ready") => ("health", None),
        Some("swagger-ui") | Some("api-docs") => ("docs", None),
        _ => ("other", None),
    }
}

/// `abcdef...` for a key, `short` when it is too short to show any of it.
fn key_prefix(key: &str) -> String {
    key.get(..KEY_PREFIX_LEN)
        .filter(|_| key.len() > KEY_PREFIX_LEN)
        .map(|prefix| format!("{}...", prefix))
        .unwrap_or_else(|| "short".to_string())
}

struct RequestInfo {
    method: String,
    path: String,
    area: &'static str,
    sector: &'static str,
}

impl RequestInfo {
    fn finished(&self, status: StatusCode, elapsed_ms: u128) {
        let code = status.as_u16();
        if status.is_server_error() {
            error!(target: "api", method = %self.method, path = %self.path, area = self.area,
                sector = self.sector, status = code, duration_ms = %elapsed_ms, "Request failed");
        } else if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::UNAUTHORIZED {
            warn!(target: "api", method = %self.method, path = %self.path, area = self.area,
                status = code, duration_ms = %elapsed_ms, "Request rejected by auth");
        } else if status.is_client_error() {
            warn!(target: "api", method = %self.method, path = %self.path, area = self.area,
                sector = self.sector, status = code, duration_ms = %elapsed_ms, "Client error");
        } else if self.area == "health" {
            debug!(target: "api", path = %self.path, status = code, "Health probe");
        } else {
            info!(target: "api", method = %self.method, path = %self.path, area = self.area,
                sector = self.sector, status = code, duration_ms = %elapsed_ms, "Request completed");
        }
    }
}

impl<S, B> Service<ServiceRequest> for RequestLoggerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start = Instant::now();
        let (area, sector) = classify_path(req.path());
        let info = RequestInfo {
            method: req.method().to_string(),
            path: req.path().to_string(),
            area,
            sector: sector.map(|s| s.as_str()).unwrap_or("-"),
        };

        if area != "health" {
            let remote_addr = req
                .connection_info()
                .realip_remote_addr()
                .unwrap_or("unknown")
                .to_string();
            let key = req
                .headers()
                .get(INTEGRATION_KEY_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(key_prefix)
                .unwrap_or_else(|| "none".to_string());
            let content_length = req
                .headers()
                .get("content-length")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("0")
                .to_string();

            info!(
                target: "api",
                method = %info.method,
                path = %info.path,
                area = info.area,
                sector = info.sector,
                remote_addr = %remote_addr,
                integration_key = %key,
                content_length = %content_length,
                "Request started"
            );
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let res = fut.await?;
            info.finished(res.status(), start.elapsed().as_millis());
            Ok(res)
        })
    }
}

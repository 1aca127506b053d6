//! Actix-web extractors for integration and admin key authentication.
//!
//! Secret header values are wrapped in `SecretString` as soon as they are
//! read and are never logged.

use actix_web::dev::Payload;
use actix_web::{FromRequest, HttpRequest, web};
use secrecy::{ExposeSecret, SecretString};
use std::future::{Ready, ready};
use tracing::{debug, warn};

use super::{AdminKey, OwnerSession, SessionCache};
use crate::config::{ADMIN_KEY_HEADER, INTEGRATION_KEY_HEADER};
use crate::error::{AppError, AppResult};
use crate::services::RateLimiter;

/// Extract a secret header value, wrapping it in SecretString.
/// Returns None if the header is missing or invalid UTF-8.
fn extract_secret_header(req: &HttpRequest, header_name: &str) -> Option<SecretString> {
    req.headers()
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .map(|s| SecretString::from(s.to_string()))
}

/// Address failed authentications are counted against.
///
/// The connecting peer, unless `trust_forwarded` is set, in which case the
/// client reported by `Forwarded`/`X-Forwarded-For` is used.
pub fn client_ip(req: &HttpRequest, trust_forwarded: bool) -> String {
    if trust_forwarded {
        return req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("unknown")
            .to_string();
    }
    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn app_state<T: 'static>(req: &HttpRequest) -> AppResult<&web::Data<T>> {
    req.app_data::<web::Data<T>>()
        .ok_or_else(|| AppError::Database("Internal configuration error".to_string()))
}

/// Authenticate an integration request by its `X-Integration-Key` header.
///
/// Blocked addresses are refused before the key is looked at. Each failure
/// counts toward the block; the failure that trips it answers 429 directly.
pub fn authenticate_request(req: &HttpRequest) -> AppResult<OwnerSession> {
    let sessions = app_state::<SessionCache>(req)?;
    let limiter = app_state::<RateLimiter>(req)?;
    let ip = client_ip(req, limiter.trusts_forwarded());

    if let Some(remaining) = limiter.check(&ip) {
        return Err(AppError::RateLimited {
            retry_after_secs: remaining.as_secs().max(1),
        });
    }

    let provided = extract_secret_header(req, INTEGRATION_KEY_HEADER);
    let session = provided
        .as_ref()
        .and_then(|key| sessions.verify(key.expose_secret()));

    match session {
        Some(session) => {
            limiter.record_success(&ip);
            debug!("Integration request authenticated from {}", ip);
            Ok(session)
        }
        None => {
            warn!("Rejected integration request from {}", ip);
            if let Some(blocked) = limiter.record_failure(&ip) {
                return Err(AppError::RateLimited {
                    retry_after_secs: blocked.as_secs(),
                });
            }
            let message = if provided.is_none() {
                format!("Missing {} header", INTEGRATION_KEY_HEADER)
            } else {
                "Invalid integration key".to_string()
            };
            Err(AppError::Unauthorized(message))
        }
    }
}

/// Extractor that requires a valid integration key.
pub struct IntegrationAuth {
    pub session: OwnerSession,
}

impl FromRequest for IntegrationAuth {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authenticate_request(req).map(|session| IntegrationAuth { session }))
    }
}

/// Extractor that requires the bootstrap admin key.
pub struct AdminAuth;

impl FromRequest for AdminAuth {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let result = app_state::<AdminKey>(req).and_then(|stored| {
            match extract_secret_header(req, ADMIN_KEY_HEADER) {
                Some(ref provided) if stored.verify(provided.expose_secret()) => Ok(AdminAuth),
                Some(_) => Err(AppError::Unauthorized("Invalid admin key".to_string())),
                None => Err(AppError::Unauthorized(format!(
                    "Missing {} header",
                    ADMIN_KEY_HEADER
                ))),
            }
        });
        ready(result)
    }
}

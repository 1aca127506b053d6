//! Admin endpoints.

use actix_web::{HttpResponse, web};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::auth::{AdminAuth, IntegrationKey, SessionCache};
use crate::error::{AppError, AppResult};

/// Shortest integration key accepted when the caller supplies one.
const MIN_KEY_LENGTH: usize = 24;
const GENERATED_KEY_LENGTH: usize = 40;

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RotateKeyRequest {
    /// New key; generated when omitted.
    pub key: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RotateKeyResponse {
    pub rotated: bool,
    /// Present only when the server generated the key.
    pub generated_key: Option<String>,
}

fn generate_key() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_KEY_LENGTH)
        .map(char::from)
        .collect()
}

/// Replace the integration key without restarting the server.
#[utoipa::path(
    post,
    path = "/api/v1/admin/integration-key",
    tag = "Admin",
    request_body = RotateKeyRequest,
    responses(
        (status = 200, description = "Key rotated", body = RotateKeyResponse),
        (status = 400, description = "Key too short", body = crate::error::ErrorResponse),
        (status = 401, description = "Invalid admin key", body = crate::error::ErrorResponse),
        (status = 409, description = "No owner session to rotate", body = crate::error::ErrorResponse),
    ),
    security(("admin_key" = []))
)]
pub async fn rotate_integration_key(
    _auth: AdminAuth,
    sessions: web::Data<SessionCache>,
    body: Option<web::Json<RotateKeyRequest>>,
) -> AppResult<HttpResponse> {
    let request = body.map(|b| b.into_inner()).unwrap_or_default();

    let (key, generated_key) = match request.key {
        Some(key) if key.len() < MIN_KEY_LENGTH => {
            return Err(AppError::InvalidInput(format!(
                "Integration key must be at least {} characters",
                MIN_KEY_LENGTH
            )));
        }
        Some(key) => (key, None),
        None => {
            let key = generate_key();
            (key.clone(), Some(key))
        }
    };

    if !sessions.rotate_key(IntegrationKey::new(key)) {
        return Err(AppError::Conflict(
            "No authenticated owner session".to_string(),
        ));
    }

    info!("Integration key rotated by admin");
    Ok(HttpResponse::Ok().json(RotateKeyResponse {
        rotated: true,
        generated_key,
    }))
}

/// Configure admin routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/admin/integration-key").route(web::post().to(rotate_integration_key)),
    );
}

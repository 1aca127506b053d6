//! Media draft API handlers.
//!
//! A draft is addressed by `(session, sector, order id | "new")` and holds
//! the attachments of one open order form.

use actix_multipart::Multipart;
use actix_web::{HttpResponse, web};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::orders::parse_sector;
use crate::auth::IntegrationAuth;
use crate::error::{AppError, AppResult};
use crate::models::MediaFile;
use crate::services::OrderService;
use crate::services::media::RawFile;
use crate::services::media_set::{DraftKey, validate_session_id};

#[derive(Debug, Serialize, ToSchema)]
pub struct DraftResponse {
    pub files: Vec<MediaFile>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct RemoveMediaQuery {
    /// Storage path of the file to remove.
    pub path: String,
}

fn describe_size(bytes: usize) -> String {
    if bytes >= 1024 * 1024 {
        format!("{} MB", bytes / 1024 / 1024)
    } else {
        format!("{} bytes", bytes)
    }
}

fn parse_draft_key(session: &str, sector: &str, order: &str) -> AppResult<DraftKey> {
    let order_id = match order {
        "new" => None,
        id => Some(
            Uuid::parse_str(id)
                .map_err(|_| AppError::InvalidInput(format!("Invalid order id '{}'", id)))?,
        ),
    };
    DraftKey::new(session, parse_sector(sector)?, order_id)
}

/// Open a draft, restoring mirrored files and merging the saved list.
#[utoipa::path(
    get,
    path = "/api/v1/drafts/{session}/{sector}/{order}",
    tag = "Drafts",
    params(
        ("session" = String, Path, description = "Form session id"),
        ("sector" = String, Path, description = "phone | computer"),
        ("order" = String, Path, description = "Order id or `new`")
    ),
    responses(
        (status = 200, description = "Draft files with fresh URLs", body = DraftResponse),
        (status = 404, description = "Order not found", body = crate::error::ErrorResponse),
    ),
    security(("integration_key" = []))
)]
pub async fn open_draft(
    _auth: IntegrationAuth,
    service: web::Data<OrderService>,
    path: web::Path<(String, String, String)>,
) -> AppResult<HttpResponse> {
    let (session, sector, order) = path.into_inner();
    let key = parse_draft_key(&session, &sector, &order)?;
    let files = service.open_draft(key).await?;
    Ok(HttpResponse::Ok().json(DraftResponse { files }))
}

/// Upload attachments into a draft.
///
/// Each file is stored and added to the draft as soon as its part has been
/// read, before the next part is. A failing file, or one over the per-file
/// size limit, is reported and the rest of the batch continues.
#[utoipa::path(
    post,
    path = "/api/v1/drafts/{session}/{sector}/{order}/media",
    tag = "Drafts",
    params(
        ("session" = String, Path, description = "Form session id"),
        ("sector" = String, Path, description = "phone | computer"),
        ("order" = String, Path, description = "Order id or `new`")
    ),
    request_body(content_type = "multipart/form-data", description = "Photos and videos"),
    responses(
        (status = 200, description = "Batch report", body = crate::services::media_pipeline::BatchReport),
        (status = 400, description = "Invalid request", body = crate::error::ErrorResponse),
    ),
    security(("integration_key" = []))
)]
pub async fn upload_media(
    _auth: IntegrationAuth,
    service: web::Data<OrderService>,
    max_upload_size: web::Data<usize>,
    path: web::Path<(String, String, String)>,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    let (session, sector, order) = path.into_inner();
    let key = parse_draft_key(&session, &sector, &order)?;
    let limit = *max_upload_size.get_ref();

    let mut batch = service.media().begin_batch(key)?;
    let mut parts = 0usize;

    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| AppError::InvalidInput(format!("Multipart error: {}", e)))?;

        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .ok_or_else(|| AppError::InvalidInput("Missing filename in multipart".to_string()))?
            .to_string();
        let content_type = field.content_type().map(|m| m.essence_str().to_string());
        parts += 1;

        let mut data = Vec::new();
        let mut oversized = false;
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| AppError::InvalidInput(format!("Read error: {}", e)))?;
            if oversized {
                continue;
            }
            if data.len() + chunk.len() > limit {
                // Keep reading so the next part can be reached.
                oversized = true;
                data = Vec::new();
                continue;
            }
            data.extend_from_slice(&chunk);
        }

        if oversized {
            warn!("Refusing {}: larger than {} bytes", filename, limit);
            let message = format!(
                "{}: file is larger than the {} upload limit",
                filename,
                describe_size(limit)
            );
            batch.reject(filename, message);
            continue;
        }

        batch.push(RawFile::new(filename, content_type, data)).await?;
    }

    if parts == 0 {
        return Err(AppError::InvalidInput("No files in upload".to_string()));
    }

    Ok(HttpResponse::Ok().json(batch.finish()))
}

/// Remove one attachment: the blob first, then the list entry.
#[utoipa::path(
    delete,
    path = "/api/v1/drafts/{session}/{sector}/{order}/media",
    tag = "Drafts",
    params(
        ("session" = String, Path, description = "Form session id"),
        ("sector" = String, Path, description = "phone | computer"),
        ("order" = String, Path, description = "Order id or `new`"),
        RemoveMediaQuery
    ),
    responses(
        (status = 200, description = "Remaining files", body = DraftResponse),
        (status = 404, description = "File not in draft", body = crate::error::ErrorResponse),
        (status = 500, description = "Blob deletion failed; draft unchanged", body = crate::error::ErrorResponse),
    ),
    security(("integration_key" = []))
)]
pub async fn remove_media(
    _auth: IntegrationAuth,
    service: web::Data<OrderService>,
    path: web::Path<(String, String, String)>,
    query: web::Query<RemoveMediaQuery>,
) -> AppResult<HttpResponse> {
    let (session, sector, order) = path.into_inner();
    let key = parse_draft_key(&session, &sector, &order)?;
    let files = service.media().remove_file(key, &query.path).await?;
    Ok(HttpResponse::Ok().json(DraftResponse { files }))
}

/// Drop every draft of a form session (the form was closed).
#[utoipa::path(
    delete,
    path = "/api/v1/drafts/{session}",
    tag = "Drafts",
    params(("session" = String, Path, description = "Form session id")),
    responses(
        (status = 204, description = "Session closed"),
        (status = 400, description = "Invalid session id", body = crate::error::ErrorResponse),
    ),
    security(("integration_key" = []))
)]
pub async fn close_session(
    _auth: IntegrationAuth,
    service: web::Data<OrderService>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let session = path.into_inner();
    validate_session_id(&session)?;
    service.media().close_session(&session).await;
    info!("Form session {} closed", session);
    Ok(HttpResponse::NoContent().finish())
}

/// Configure draft routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/drafts/{session}").route(web::delete().to(close_session)))
        .service(
            web::resource("/drafts/{session}/{sector}/{order}").route(web::get().to(open_draft)),
        )
        .service(
            web::resource("/drafts/{session}/{sector}/{order}/media")
                .route(web::post().to(upload_media))
                .route(web::delete().to(remove_media)),
        );
}

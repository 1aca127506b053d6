//! Integration endpoint for the external automation tool.
//!
//! A single POST route dispatches on `action`. Responses are
//! `{success: true, data, ...}` on success and `{error}` otherwise.

use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse, web};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::authenticate_request;
use crate::error::{AppError, AppResult};
use crate::models::{LookupKind, OrderFields, OrderFilters, OrderSector};
use crate::services::OrderService;

/// Integration request envelope.
#[derive(Debug, Deserialize, ToSchema)]
pub struct IntegrationRequest {
    /// `list | get | create | update | delete | get_situations |
    /// get_withdrawal_situations | get_employees | get_equipment_locations`
    pub action: String,
    /// `phone_orders | computer_orders`; required for order actions.
    pub table: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub filters: Option<JsonValue>,
    #[schema(value_type = Option<Object>)]
    pub data: Option<JsonValue>,
    pub id: Option<String>,
}

/// Error body of the integration endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct IntegrationError {
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    List,
    Get,
    Create,
    Update,
    Delete,
    Lookup(LookupKind),
}

impl Action {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "list" => Some(Self::List),
            "get" => Some(Self::Get),
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            "get_situations" => Some(Self::Lookup(LookupKind::Situation)),
            "get_withdrawal_situations" => Some(Self::Lookup(LookupKind::WithdrawalSituation)),
            "get_employees" => Some(Self::Lookup(LookupKind::Employee)),
            "get_equipment_locations" => Some(Self::Lookup(LookupKind::EquipmentLocation)),
            _ => None,
        }
    }
}

fn error_response(err: &AppError) -> HttpResponse {
    let (status, _) = err.status_and_code();
    let mut builder = HttpResponse::build(status);
    if let AppError::RateLimited { retry_after_secs } = err {
        builder.insert_header(("Retry-After", retry_after_secs.to_string()));
    }
    builder.json(IntegrationError {
        error: err.public_message(),
    })
}

fn require_table(request: &IntegrationRequest) -> AppResult<OrderSector> {
    let table = request
        .table
        .as_deref()
        .ok_or_else(|| AppError::InvalidInput("Missing table".to_string()))?;
    OrderSector::from_table(table)
        .ok_or_else(|| AppError::InvalidInput(format!("Unknown table '{}'", table)))
}

fn require_id(request: &IntegrationRequest) -> AppResult<Uuid> {
    let id = request
        .id
        .as_deref()
        .ok_or_else(|| AppError::InvalidInput("Missing id".to_string()))?;
    Uuid::parse_str(id).map_err(|_| AppError::InvalidInput(format!("Invalid id '{}'", id)))
}

fn require_data(request: &IntegrationRequest) -> AppResult<OrderFields> {
    let data = request
        .data
        .clone()
        .ok_or_else(|| AppError::InvalidInput("Missing data".to_string()))?;
    serde_json::from_value(data).map_err(|e| AppError::InvalidInput(format!("Invalid data: {}", e)))
}

fn parse_filters(request: &IntegrationRequest) -> AppResult<OrderFilters> {
    match request.filters.clone() {
        None | Some(JsonValue::Null) => Ok(OrderFilters {
            limit: 50,
            ..Default::default()
        }),
        Some(value) => serde_json::from_value(value)
            .map_err(|e| AppError::InvalidInput(format!("Invalid filters: {}", e))),
    }
}

async fn dispatch(
    service: &OrderService,
    request: IntegrationRequest,
) -> AppResult<(StatusCode, JsonValue)> {
    let action = Action::parse(&request.action)
        .ok_or_else(|| AppError::InvalidInput(format!("Unknown action '{}'", request.action)))?;

    match action {
        Action::List => {
            let sector = require_table(&request)?;
            let filters = parse_filters(&request)?;
            let (orders, total) = service.list(sector, &filters).await?;
            Ok((
                StatusCode::OK,
                json!({ "success": true, "data": orders, "count": total }),
            ))
        }
        Action::Get => {
            let sector = require_table(&request)?;
            let order = service.get(sector, require_id(&request)?).await?;
            Ok((StatusCode::OK, json!({ "success": true, "data": order })))
        }
        Action::Create => {
            let sector = require_table(&request)?;
            let saved = service.create(sector, require_data(&request)?, None).await?;
            info!(
                "Integration created {} order with OS number {}",
                sector, saved.order.os_number
            );
            Ok((
                StatusCode::CREATED,
                json!({
                    "success": true,
                    "data": saved.order,
                    "reassigned_from": saved.reassigned_from,
                    "retries": saved.retries,
                }),
            ))
        }
        Action::Update => {
            let sector = require_table(&request)?;
            let id = require_id(&request)?;
            let saved = service
                .update(sector, id, require_data(&request)?, None)
                .await?;
            Ok((
                StatusCode::OK,
                json!({
                    "success": true,
                    "data": saved.order,
                    "reassigned_from": saved.reassigned_from,
                }),
            ))
        }
        Action::Delete => {
            let sector = require_table(&request)?;
            let id = require_id(&request)?;
            service.delete(sector, id).await?;
            Ok((
                StatusCode::OK,
                json!({ "success": true, "data": { "id": id, "deleted": true } }),
            ))
        }
        Action::Lookup(kind) => {
            let items = service.lookups(kind).await?;
            Ok((StatusCode::OK, json!({ "success": true, "data": items })))
        }
    }
}

/// Run an integration action.
///
/// Authenticated by `X-Integration-Key`. Five failed attempts within a
/// minute block the caller's address for 15 minutes.
#[utoipa::path(
    post,
    path = "/api/v1/integration",
    tag = "Integration",
    request_body = IntegrationRequest,
    responses(
        (status = 200, description = "Action succeeded"),
        (status = 201, description = "Order created"),
        (status = 400, description = "Invalid request or missing fields", body = IntegrationError),
        (status = 401, description = "Missing or invalid key", body = IntegrationError),
        (status = 404, description = "Order not found", body = IntegrationError),
        (status = 429, description = "Too many failed attempts", body = IntegrationError),
        (status = 500, description = "Internal error", body = IntegrationError),
    ),
    security(
        ("integration_key" = [])
    )
)]
pub async fn integration(
    req: HttpRequest,
    service: web::Data<OrderService>,
    body: web::Bytes,
) -> HttpResponse {
    if let Err(e) = authenticate_request(&req) {
        return error_response(&e);
    }

    let request: IntegrationRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return error_response(&AppError::InvalidInput(format!("Invalid JSON body: {}", e)));
        }
    };
    let action = request.action.clone();

    match dispatch(&service, request).await {
        Ok((status, body)) => HttpResponse::build(status).json(body),
        Err(e) => {
            warn!("Integration action '{}' failed: {}", action, e);
            error_response(&e)
        }
    }
}

/// Configure integration routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/integration").route(web::post().to(integration)));
}

//! Service order API handlers used by the technician front end.

use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::IntegrationAuth;
use crate::error::{AppError, AppResult};
use crate::models::{ExistingOrderSummary, OrderFields, OrderFilters, OrderSector, ServiceOrder};
use crate::services::OrderService;
use crate::services::media_set::DraftKey;

pub(crate) fn parse_sector(raw: &str) -> AppResult<OrderSector> {
    OrderSector::parse(raw)
        .ok_or_else(|| AppError::InvalidInput(format!("Unknown sector '{}'", raw)))
}

/// Optional media draft to fold into a save.
#[derive(Debug, Deserialize, IntoParams)]
pub struct DraftQuery {
    /// Form session whose draft media should be attached.
    pub draft_session: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct CheckNumberQuery {
    /// Order being edited; it does not conflict with itself.
    pub exclude: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NextNumberResponse {
    pub os_number: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckNumberResponse {
    pub exists: bool,
    pub existing: Option<ExistingOrderSummary>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<ServiceOrder>,
    pub total: u64,
}

fn draft_key(
    query: &DraftQuery,
    sector: OrderSector,
    order_id: Option<Uuid>,
) -> AppResult<Option<DraftKey>> {
    query
        .draft_session
        .as_deref()
        .map(|session| DraftKey::new(session, sector, order_id))
        .transpose()
}

/// Suggest the next OS number for a sector.
#[utoipa::path(
    get,
    path = "/api/v1/orders/{sector}/next-number",
    tag = "Orders",
    params(("sector" = String, Path, description = "phone | computer")),
    responses(
        (status = 200, description = "Suggested number", body = NextNumberResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ErrorResponse),
    ),
    security(("integration_key" = []))
)]
pub async fn next_number(
    _auth: IntegrationAuth,
    service: web::Data<OrderService>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let sector = parse_sector(&path)?;
    let os_number = service.next_number(sector).await?;
    Ok(HttpResponse::Ok().json(NextNumberResponse { os_number }))
}

/// Check whether an OS number is held by another order.
#[utoipa::path(
    get,
    path = "/api/v1/orders/{sector}/check-number/{os_number}",
    tag = "Orders",
    params(
        ("sector" = String, Path, description = "phone | computer"),
        ("os_number" = i32, Path, description = "Number to check"),
        CheckNumberQuery
    ),
    responses(
        (status = 200, description = "Check result", body = CheckNumberResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ErrorResponse),
    ),
    security(("integration_key" = []))
)]
pub async fn check_number(
    _auth: IntegrationAuth,
    service: web::Data<OrderService>,
    path: web::Path<(String, i32)>,
    query: web::Query<CheckNumberQuery>,
) -> AppResult<HttpResponse> {
    let (sector, os_number) = path.into_inner();
    let sector = parse_sector(&sector)?;
    let existing = service
        .check_number(sector, os_number, query.exclude)
        .await?;
    Ok(HttpResponse::Ok().json(CheckNumberResponse {
        exists: existing.is_some(),
        existing,
    }))
}

/// List non-deleted orders.
#[utoipa::path(
    get,
    path = "/api/v1/orders/{sector}",
    tag = "Orders",
    params(("sector" = String, Path, description = "phone | computer"), OrderFilters),
    responses(
        (status = 200, description = "Matching orders", body = OrderListResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ErrorResponse),
    ),
    security(("integration_key" = []))
)]
pub async fn list_orders(
    _auth: IntegrationAuth,
    service: web::Data<OrderService>,
    path: web::Path<String>,
    query: web::Query<OrderFilters>,
) -> AppResult<HttpResponse> {
    let sector = parse_sector(&path)?;
    let (orders, total) = service.list(sector, &query).await?;
    Ok(HttpResponse::Ok().json(OrderListResponse { orders, total }))
}

/// Create an order. A taken OS number is replaced with a free one and the
/// response says so.
#[utoipa::path(
    post,
    path = "/api/v1/orders/{sector}",
    tag = "Orders",
    params(("sector" = String, Path, description = "phone | computer"), DraftQuery),
    request_body = OrderFields,
    responses(
        (status = 201, description = "Order created", body = crate::services::orders::SavedOrder),
        (status = 400, description = "Missing required fields", body = crate::error::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ErrorResponse),
        (status = 409, description = "No free OS number found", body = crate::error::ErrorResponse),
    ),
    security(("integration_key" = []))
)]
pub async fn create_order(
    _auth: IntegrationAuth,
    service: web::Data<OrderService>,
    path: web::Path<String>,
    query: web::Query<DraftQuery>,
    body: web::Json<OrderFields>,
) -> AppResult<HttpResponse> {
    let sector = parse_sector(&path)?;
    let draft = draft_key(&query, sector, None)?;
    let saved = service.create(sector, body.into_inner(), draft).await?;
    Ok(HttpResponse::Created().json(saved))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{sector}/{id}",
    tag = "Orders",
    params(
        ("sector" = String, Path, description = "phone | computer"),
        ("id" = Uuid, Path, description = "Order id")
    ),
    responses(
        (status = 200, description = "Order", body = ServiceOrder),
        (status = 404, description = "Not found", body = crate::error::ErrorResponse),
    ),
    security(("integration_key" = []))
)]
pub async fn get_order(
    _auth: IntegrationAuth,
    service: web::Data<OrderService>,
    path: web::Path<(String, Uuid)>,
) -> AppResult<HttpResponse> {
    let (sector, id) = path.into_inner();
    let order = service.get(parse_sector(&sector)?, id).await?;
    Ok(HttpResponse::Ok().json(order))
}

/// Partially update an order.
#[utoipa::path(
    put,
    path = "/api/v1/orders/{sector}/{id}",
    tag = "Orders",
    params(
        ("sector" = String, Path, description = "phone | computer"),
        ("id" = Uuid, Path, description = "Order id"),
        DraftQuery
    ),
    request_body = OrderFields,
    responses(
        (status = 200, description = "Order updated", body = crate::services::orders::SavedOrder),
        (status = 400, description = "Invalid fields", body = crate::error::ErrorResponse),
        (status = 404, description = "Not found", body = crate::error::ErrorResponse),
    ),
    security(("integration_key" = []))
)]
pub async fn update_order(
    _auth: IntegrationAuth,
    service: web::Data<OrderService>,
    path: web::Path<(String, Uuid)>,
    query: web::Query<DraftQuery>,
    body: web::Json<OrderFields>,
) -> AppResult<HttpResponse> {
    let (sector, id) = path.into_inner();
    let sector = parse_sector(&sector)?;
    let draft = draft_key(&query, sector, Some(id))?;
    let saved = service.update(sector, id, body.into_inner(), draft).await?;
    Ok(HttpResponse::Ok().json(saved))
}

/// Soft-delete an order.
#[utoipa::path(
    delete,
    path = "/api/v1/orders/{sector}/{id}",
    tag = "Orders",
    params(
        ("sector" = String, Path, description = "phone | computer"),
        ("id" = Uuid, Path, description = "Order id")
    ),
    responses(
        (status = 204, description = "Order deleted"),
        (status = 404, description = "Not found", body = crate::error::ErrorResponse),
    ),
    security(("integration_key" = []))
)]
pub async fn delete_order(
    _auth: IntegrationAuth,
    service: web::Data<OrderService>,
    path: web::Path<(String, Uuid)>,
) -> AppResult<HttpResponse> {
    let (sector, id) = path.into_inner();
    service.delete(parse_sector(&sector)?, id).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// Configure order routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/orders/{sector}")
            .route(web::get().to(list_orders))
            .route(web::post().to(create_order)),
    )
    .service(web::resource("/orders/{sector}/next-number").route(web::get().to(next_number)))
    .service(
        web::resource("/orders/{sector}/check-number/{os_number}")
            .route(web::get().to(check_number)),
    )
    .service(
        web::resource("/orders/{sector}/{id}")
            .route(web::get().to(get_order))
            .route(web::put().to(update_order))
            .route(web::delete().to(delete_order)),
    );
}

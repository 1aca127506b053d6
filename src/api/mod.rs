//! API endpoint modules.

pub mod admin;
pub mod drafts;
pub mod health;
pub mod integration;
pub mod openapi;
pub mod orders;

pub use admin::configure_routes as configure_admin_routes;
pub use drafts::configure_routes as configure_draft_routes;
pub use health::configure_health_routes;
pub use integration::configure_routes as configure_integration_routes;
pub use openapi::ApiDoc;
pub use orders::configure_routes as configure_order_routes;

use actix_web::web;

/// Every `/api/v1` route.
pub fn configure_api(cfg: &mut web::ServiceConfig) {
    cfg.configure(configure_health_routes)
        .configure(configure_integration_routes)
        .configure(configure_order_routes)
        .configure(configure_draft_routes)
        .configure(configure_admin_routes);
}

//! OpenAPI documentation configuration.

use utoipa::OpenApi;

use crate::{api, error, models, services};

/// OpenAPI documentation.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Repair Desk Server",
        version = "0.1.0",
        description = "Service order intake for phone and computer repair: OS number allocation, order media drafts and the automation integration endpoint"
    ),
    servers(
        (url = "/", description = "Local server")
    ),
    paths(
        // Health endpoints
        api::health::health,
        api::health::ready,
        // Integration
        api::integration::integration,
        // Orders
        api::orders::next_number,
        api::orders::check_number,
        api::orders::list_orders,
        api::orders::create_order,
        api::orders::get_order,
        api::orders::update_order,
        api::orders::delete_order,
        // Drafts
        api::drafts::open_draft,
        api::drafts::upload_media,
        api::drafts::remove_media,
        api::drafts::close_session,
        // Admin
        api::admin::rotate_integration_key,
    ),
    components(
        schemas(
            error::ErrorResponse,
            api::health::HealthResponse,
            api::health::ReadyResponse,
            api::integration::IntegrationRequest,
            api::integration::IntegrationError,
            models::OrderSector,
            models::OrderFields,
            models::ServiceOrder,
            models::ExistingOrderSummary,
            models::MediaFile,
            models::MediaKind,
            models::LookupItem,
            api::orders::NextNumberResponse,
            api::orders::CheckNumberResponse,
            api::orders::OrderListResponse,
            services::orders::SavedOrder,
            services::os_number::Retried,
            api::drafts::DraftResponse,
            services::media_pipeline::BatchReport,
            services::media_pipeline::FileFailure,
            api::admin::RotateKeyRequest,
            api::admin::RotateKeyResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Integration", description = "Automation tool pass-through"),
        (name = "Orders", description = "Service orders and OS numbers"),
        (name = "Drafts", description = "Order media drafts"),
        (name = "Admin", description = "Key management")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Add key security schemes.
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};

        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "integration_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-Integration-Key"))),
            );
            components.add_security_scheme(
                "admin_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-Admin-Key"))),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_integration_route() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/v1/integration"));
        assert!(doc.paths.paths.contains_key("/api/v1/orders/{sector}/next-number"));
    }
}

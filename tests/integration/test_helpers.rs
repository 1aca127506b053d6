//! Shared test helpers.

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, dev::ServiceResponse, test, web};
use image::{ImageFormat, Rgb, RgbImage};
use repair_desk_lib::api;
use repair_desk_lib::auth::{AdminKey, IntegrationKey, SessionCache};
use repair_desk_lib::db::MemoryOrderStore;
use repair_desk_lib::models::{LookupKind, OrderFields};
use repair_desk_lib::services::media::UnavailableHeicTranscoder;
use repair_desk_lib::services::{
    DurableStore, MediaPipeline, MemoryBlobStore, MemoryDurableStore, OrderService, OrderStore,
    OsNumberAllocator, RateLimiter,
};
use serde_json::Value;
use uuid::Uuid;

pub const OWNER_ID: Uuid = Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_0001);
pub const INTEGRATION_KEY: &str = "test-integration-key-0123456789";
pub const ADMIN_KEY: &str = "test-admin-key-0123456789";
pub const DEFAULT_SITUATION: &str = "In queue";

/// Everything a test needs, backed by in-memory stores.
pub struct TestContext {
    pub store: Arc<MemoryOrderStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub drafts: Arc<dyn DurableStore>,
    pub service: web::Data<OrderService>,
    pub sessions: web::Data<SessionCache>,
    pub limiter: web::Data<RateLimiter>,
    pub in_queue: Uuid,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_drafts(Arc::new(MemoryDurableStore::new()))
    }

    /// Context whose limiter keys on the proxy-reported client address.
    pub fn behind_proxy() -> Self {
        Self {
            limiter: web::Data::new(RateLimiter::behind_proxy()),
            ..Self::new()
        }
    }

    pub fn with_drafts(drafts: Arc<dyn DurableStore>) -> Self {
        let store = Arc::new(MemoryOrderStore::new());
        let in_queue = store.add_lookup(OWNER_ID, LookupKind::Situation, DEFAULT_SITUATION);
        let blobs = Arc::new(MemoryBlobStore::new());
        let service = build_service(store.clone(), blobs.clone(), drafts.clone(), 10);

        Self {
            store,
            blobs,
            drafts,
            service: web::Data::new(service),
            sessions: web::Data::new(SessionCache::signed_in(
                OWNER_ID,
                IntegrationKey::new(INTEGRATION_KEY),
            )),
            limiter: web::Data::new(RateLimiter::new()),
            in_queue,
        }
    }
}

/// Order service over the given stores with a short retry backoff.
pub fn build_service(
    store: Arc<MemoryOrderStore>,
    blobs: Arc<MemoryBlobStore>,
    drafts: Arc<dyn DurableStore>,
    max_retries: u32,
) -> OrderService {
    let media = Arc::new(MediaPipeline::new(
        blobs,
        drafts,
        Arc::new(UnavailableHeicTranscoder),
        Duration::from_secs(3600),
    ));
    let dyn_store: Arc<dyn OrderStore> = store;
    OrderService::new(
        dyn_store.clone(),
        media,
        OWNER_ID,
        max_retries,
        DEFAULT_SITUATION,
    )
    .with_allocator(OsNumberAllocator::new(dyn_store, max_retries).with_backoff_ms(1, 3))
}

/// Create a test app with every API route.
pub async fn create_test_app(
    ctx: &TestContext,
) -> impl actix_web::dev::Service<
    actix_http::Request,
    Response = ServiceResponse,
    Error = actix_web::Error,
> {
    create_test_app_with_limit(ctx, 50 * 1024 * 1024).await
}

/// Create a test app refusing uploaded files over `max_file_size` bytes.
pub async fn create_test_app_with_limit(
    ctx: &TestContext,
    max_file_size: usize,
) -> impl actix_web::dev::Service<
    actix_http::Request,
    Response = ServiceResponse,
    Error = actix_web::Error,
> {
    test::init_service(
        App::new()
            .app_data(ctx.service.clone())
            .app_data(ctx.sessions.clone())
            .app_data(ctx.limiter.clone())
            .app_data(web::Data::new(AdminKey::new(Some(ADMIN_KEY.to_string()))))
            .app_data(web::Data::new(max_file_size))
            .service(web::scope("/api/v1").configure(api::configure_api)),
    )
    .await
}

/// POST an integration request from a client connecting from `ip`.
pub async fn call_integration<S>(app: &S, key: Option<&str>, ip: &str, body: Value) -> (u16, Value)
where
    S: actix_web::dev::Service<
            actix_http::Request,
            Response = ServiceResponse,
            Error = actix_web::Error,
        >,
{
    call_integration_via(app, key, ip, None, body).await
}

/// POST an integration request from peer `ip`, optionally claiming to
/// forward for `forwarded_for`.
pub async fn call_integration_via<S>(
    app: &S,
    key: Option<&str>,
    ip: &str,
    forwarded_for: Option<&str>,
    body: Value,
) -> (u16, Value)
where
    S: actix_web::dev::Service<
            actix_http::Request,
            Response = ServiceResponse,
            Error = actix_web::Error,
        >,
{
    let peer: SocketAddr = format!("{}:40000", ip).parse().unwrap();
    let mut req = test::TestRequest::post()
        .uri("/api/v1/integration")
        .peer_addr(peer)
        .set_json(body);
    if let Some(forwarded) = forwarded_for {
        req = req.insert_header(("X-Forwarded-For", forwarded));
    }
    if let Some(key) = key {
        req = req.insert_header(("X-Integration-Key", key));
    }

    let resp = test::call_service(app, req.to_request()).await;
    let status = resp.status().as_u16();
    let body: Value = test::read_body_json(resp).await;
    (status, body)
}

/// Complete phone order fields.
pub fn phone_fields(client: &str, os_number: Option<i32>) -> OrderFields {
    OrderFields {
        os_number,
        client_name: Some(client.to_string()),
        client_phone: Some("11 97777-1234".to_string()),
        device_brand: Some(Some("Samsung".to_string())),
        device_model: Some("Galaxy A54".to_string()),
        defect: Some("Cracked screen".to_string()),
        ..Default::default()
    }
}

/// Complete computer order fields.
pub fn computer_fields(client: &str) -> OrderFields {
    OrderFields {
        client_name: Some(client.to_string()),
        client_phone: Some("11 3333-4444".to_string()),
        equipment_type: Some("Notebook".to_string()),
        device_brand: Some(Some("Dell".to_string())),
        defect: Some("Does not power on".to_string()),
        ..Default::default()
    }
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    RgbImage::from_pixel(width, height, Rgb([200, 40, 40]))
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

pub const BOUNDARY: &str = "----repair-desk-test-boundary";

/// Encode `(filename, content type, bytes)` parts as multipart/form-data.
pub fn multipart_body(files: &[(&str, &str, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, content_type, data) in files {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\n",
                name
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

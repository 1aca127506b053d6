//! Repair Desk Server - Main entry point.
//!
//! Starts the Actix-web server with configured routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{App, HttpServer, http::header, web};
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use repair_desk_lib::api::{self, ApiDoc};
use repair_desk_lib::auth::{AdminKey, IntegrationKey, SessionCache};
use repair_desk_lib::config::{Config, INTEGRATION_KEY_HEADER};
use repair_desk_lib::db::DbPool;
use repair_desk_lib::middleware::RequestLogger;
use repair_desk_lib::services::media::{HEIC_SUPPORTED, default_transcoder};
use repair_desk_lib::services::{
    CleanupConfig, FileDurableStore, MediaPipeline, OrderService, RateLimiter, S3Storage,
    start_cleanup_task,
};

/// Perform health check (for Docker healthcheck).
async fn health_check() -> bool {
    // Simple check - just verify we can load config
    Config::from_env().is_ok()
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Check for --health-check flag (used by Docker HEALTHCHECK)
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|arg| arg == "--health-check") {
        dotenvy::dotenv().ok();
        if health_check().await {
            std::process::exit(0);
        } else {
            std::process::exit(1);
        }
    }

    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            error!("");
            error!("Please check your environment variables:");
            error!("  - RUST_ENV must be set to 'development' or 'production'");
            error!("  - In production, DATABASE_URL, RDS_INTEGRATION_KEY and S3_* must be set");
            error!("  - In production, values must not match development defaults");
            std::process::exit(1);
        }
    };

    info!("========================================");
    info!("  Repair Desk Server");
    info!("  Environment: {}", config.environment);
    info!("========================================");

    if config.is_development() {
        warn!("Running in DEVELOPMENT mode - do not use in production!");
        if !HEIC_SUPPORTED {
            warn!("Built without the `heic` feature; HEIC uploads will be rejected");
        }
    }

    let pool = DbPool::new(&config)
        .await
        .expect("Failed to initialize database");
    pool.run_migrations()
        .await
        .expect("Failed to run migrations");
    info!("Database migrations complete");

    pool.ensure_situation(config.owner_id, &config.default_situation)
        .await
        .expect("Failed to seed default situation");

    let storage = S3Storage::new(&config.storage)
        .await
        .expect("Failed to initialize object storage");

    let drafts =
        FileDurableStore::new(&config.session_dir).expect("Failed to open draft session directory");
    info!("Media drafts stored under {:?}", config.session_dir);

    let media = Arc::new(MediaPipeline::new(
        Arc::new(storage),
        Arc::new(drafts),
        default_transcoder(),
        Duration::from_secs(config.signed_url_ttl_secs),
    ));

    let orders = web::Data::new(OrderService::new(
        Arc::new(pool.clone()),
        media.clone(),
        config.owner_id,
        config.save_max_retries,
        config.default_situation.clone(),
    ));

    let sessions = web::Data::new(SessionCache::new());
    sessions.begin_loading();
    sessions.sign_in(repair_desk_lib::auth::OwnerSession {
        owner_id: config.owner_id,
        integration_key: IntegrationKey::new(config.integration_key.clone()),
    });

    let limiter = Arc::new(if config.trust_proxy_headers {
        info!("Rate limiting by proxy-reported client address");
        RateLimiter::behind_proxy()
    } else {
        RateLimiter::new()
    });

    start_cleanup_task(
        media,
        limiter.clone(),
        CleanupConfig {
            draft_retention_hours: config.draft_retention_hours,
            interval_secs: config.cleanup_interval_secs,
        },
    );
    let limiter = web::Data::from(limiter);
    let admin_key = AdminKey::new(config.admin_key.clone());
    if !admin_key.is_configured() {
        warn!("No admin key configured; key rotation endpoint is disabled");
    }

    let bind_address = config.bind_address();
    let max_upload_size = config.max_upload_size;
    let is_development = config.is_development();

    info!(
        "Upload limit: {}MB per file",
        max_upload_size / 1024 / 1024
    );

    let worker_count = if is_development {
        info!(
            "Starting server at http://{} (4 workers - development mode)",
            bind_address
        );
        4
    } else {
        let cpus = num_cpus::get();
        info!(
            "Starting server at http://{} ({} workers)",
            bind_address, cpus
        );
        cpus
    };

    let openapi = ApiDoc::openapi();

    // Start HTTP server
    let server = HttpServer::new(move || {
        let integration_header = header::HeaderName::from_static("x-integration-key");
        let cors = if is_development {
            Cors::default()
                .allowed_origin("http://localhost:3000")
                .allowed_origin("http://127.0.0.1:3000")
        } else {
            Cors::default()
        }
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            header::AUTHORIZATION,
            header::ACCEPT,
            header::CONTENT_TYPE,
            integration_header,
        ])
        .max_age(3600);

        App::new()
            // CORS must wrap before other middleware
            .wrap(cors)
            .wrap(RequestLogger)
            .app_data(web::Data::new(pool.clone()))
            .app_data(orders.clone())
            .app_data(sessions.clone())
            .app_data(limiter.clone())
            .app_data(web::Data::new(admin_key.clone()))
            .app_data(web::Data::new(max_upload_size))
            .app_data(web::JsonConfig::default().limit(1024 * 1024))
            .service(web::scope("/api/v1").configure(api::configure_api))
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone()),
            )
    });

    info!("Integration clients authenticate with the {} header", INTEGRATION_KEY_HEADER);

    server
        .workers(worker_count)
        .bind(&bind_address)?
        .run()
        .await
}

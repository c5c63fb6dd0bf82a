use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use catalog_core::{CoreConfig, StudyService};

/// Main entry point for the study catalog server
///
/// Opens the filesystem stores and serves the REST API with OpenAPI/Swagger UI.
///
/// # Environment Variables
/// - `STUDY_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `STUDY_DATA_DIR`: Directory holding blobs and metadata (default: "study_data")
/// - `STUDY_BLOB_PREFIX`, `STUDY_PUBLIC_BASE_URL`, `STUDY_CALL_TIMEOUT_SECS`,
///   `STUDY_QUERY_RETRIES`, `STUDY_ORPHAN_GRACE_SECS`: see `CoreConfig::from_env`
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - the configuration is invalid or the data directory cannot be opened,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("catalog_core=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("STUDY_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let cfg = Arc::new(CoreConfig::from_env()?);
    let service = Arc::new(StudyService::open(cfg)?);
    let app = api_rest::router(service);

    tracing::info!("++ Starting study catalog REST on {}", rest_addr);

    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("-- Shutting down study catalog REST");
        })
        .await?;

    Ok(())
}

use smartstop::api::{self, ApiState};
use smartstop::bus::ReadingSource;
use smartstop::bus::readings::ReadingBuffer;
use smartstop::cache::PredictionCache;
use smartstop::config::{self, Config};
use smartstop::coverage::CoverageEstimator;
use smartstop::coverage::feed::{CoverageFeed, FileFrameSource};
use smartstop::estimation;
use smartstop::estimation::model::Predictor;
use smartstop::estimation::refresh::{RefreshContext, spawn_refresh_task};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn init_tracing(level: &str) {
    let max_level = level.parse::<tracing::Level>().unwrap_or(tracing::Level::INFO);
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(max_level)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_default()?;
    init_tracing(&config.logging.level);
    tracing::info!(
        app = %config.app.name,
        config_path = config::DEFAULT_CONFIG_PATH,
        "smartstop starting"
    );

    let predictor: Arc<dyn Predictor> =
        Arc::from(estimation::load_predictor_or_default(config.predictor_path()));
    let buffer = Arc::new(ReadingBuffer::new(
        config.retention(),
        config.max_buffered_readings(),
    ));

    let source: Arc<dyn ReadingSource> = Arc::clone(&buffer) as Arc<dyn ReadingSource>;
    let mut context = RefreshContext::new(source, predictor)
        .with_window(config.fusion_window())
        .with_anchor(config.window_anchor())
        .with_max_capacity(config.max_capacity());
    if let Some(feed) = build_coverage_feed(&config)? {
        context = context.with_coverage(feed);
    }

    let cache = PredictionCache::new();
    let reader = cache.reader();
    let cancel = CancellationToken::new();
    let refresh_interval = config.refresh_interval();
    tracing::info!(
        interval_ms = refresh_interval.as_millis(),
        window_secs = config.fusion_window().as_secs(),
        "Starting prediction refresh loop"
    );
    let refresh_handle = spawn_refresh_task(
        cache,
        Arc::new(context),
        refresh_interval,
        config.refresh_timeout(),
        cancel.clone(),
    );

    let app = api::router(ApiState {
        cache: reader,
        buffer,
        stale_after: config.stale_after(),
    });
    let port = config.server_port();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    if let Err(err) = refresh_handle.await {
        tracing::warn!(error = %err, "Refresh loop ended abnormally");
    }
    tracing::info!("smartstop stopped");
    Ok(())
}

/// Coverage is optional; a configured but unreadable reference image is fatal.
fn build_coverage_feed(config: &Config) -> Result<Option<CoverageFeed>, Box<dyn std::error::Error>> {
    let Some(reference) = config.coverage_reference() else {
        tracing::info!("No coverage reference configured, coverage disabled");
        return Ok(None);
    };
    let Some(frame_path) = config.coverage_frame() else {
        tracing::warn!("Coverage reference set without frame_path, coverage disabled");
        return Ok(None);
    };

    let estimator = CoverageEstimator::from_path(reference, config.coverage_settings())?;
    let (width, height) = estimator.dimensions();
    tracing::info!(
        reference = %reference.display(),
        width,
        height,
        metric = %config.coverage_metric(),
        field = %config.coverage_field(),
        "Coverage estimator loaded"
    );

    Ok(Some(CoverageFeed::new(
        Arc::new(estimator),
        Arc::new(FileFrameSource::new(frame_path)),
        config.coverage_metric(),
        config.coverage_field(),
    )))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

//! Periodic refresh: fuse the current window, run the predictor, publish.

use crate::bus::ReadingSource;
use crate::cache::{Prediction, PredictionCache};
use crate::coverage::feed::CoverageFeed;
use crate::error::AppError;
use crate::estimation::model::{PredictError, Predictor};
use crate::estimation::occupancy::{DEFAULT_MAX_CAPACITY, Occupancy};
use crate::fusion::{DEFAULT_WINDOW, FusionWindow, fuse};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the fusion window ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowAnchor {
    /// Wall clock at the start of the cycle.
    #[default]
    Now,
    /// Capture time of the newest buffered reading.
    LatestReading,
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("reading source failed: {0}")]
    Source(#[from] AppError),
    #[error("no valid readings in window")]
    NoData,
    #[error(transparent)]
    Predictor(#[from] PredictError),
    #[error("predictor returned invalid capacity: {0}")]
    InvalidOutput(f64),
    #[error("refresh timed out after {0:?}")]
    Timeout(Duration),
    #[error("refresh task failed: {0}")]
    Join(String),
    #[error("previous refresh still running")]
    Busy,
}

/// Everything one refresh cycle needs. Shared with the blocking worker.
#[derive(Debug, Clone)]
pub struct RefreshContext {
    source: Arc<dyn ReadingSource>,
    predictor: Arc<dyn Predictor>,
    coverage: Option<CoverageFeed>,
    window: Duration,
    anchor: WindowAnchor,
    max_capacity: f64,
}

impl RefreshContext {
    pub fn new(source: Arc<dyn ReadingSource>, predictor: Arc<dyn Predictor>) -> Self {
        Self {
            source,
            predictor,
            coverage: None,
            window: DEFAULT_WINDOW,
            anchor: WindowAnchor::default(),
            max_capacity: DEFAULT_MAX_CAPACITY,
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_anchor(mut self, anchor: WindowAnchor) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn with_coverage(mut self, coverage: CoverageFeed) -> Self {
        self.coverage = Some(coverage);
        self
    }

    pub fn with_max_capacity(mut self, max_capacity: f64) -> Self {
        self.max_capacity = max_capacity;
        self
    }
}

/// Synchronous body of one cycle.
pub fn compute_prediction(ctx: &RefreshContext, now: SystemTime) -> Result<Prediction, RefreshError> {
    let end = match ctx.anchor {
        WindowAnchor::Now => now,
        WindowAnchor::LatestReading => ctx.source.latest_captured_at()?.unwrap_or(now),
    };
    let window = FusionWindow::new(end, ctx.window);
    let mut readings = ctx.source.snapshot(&window)?;

    if let Some(feed) = &ctx.coverage {
        match feed.sample(end) {
            // Coverage is sampled last, so it wins ties with collector readings.
            Ok(reading) => readings.push(reading.with_sequence(u64::MAX)),
            Err(err) => warn!(error = %err, field = %feed.field(), "Coverage sample failed, continuing without it"),
        }
    }

    let fusion = fuse(&readings, &window, ctx.predictor.schema());
    let features = fusion.features;
    if features.is_all_sentinel() {
        return Err(RefreshError::NoData);
    }
    if !fusion.diagnostics.missing_fields.is_empty() {
        debug!(
            missing = ?fusion.diagnostics.missing_fields,
            in_window = fusion.diagnostics.readings_in_window,
            "Fused vector has missing fields"
        );
    }

    let capacity = ctx.predictor.predict(&features)?;
    if !capacity.is_finite() || capacity < 0.0 {
        return Err(RefreshError::InvalidOutput(capacity));
    }

    Ok(Prediction {
        capacity,
        computed_at: now,
        occupancy: Occupancy::from_capacity(capacity, ctx.max_capacity),
        observed_fields: features.observed_count(),
    })
}

type CycleHandle = JoinHandle<Result<Prediction, RefreshError>>;

/// Owns the write side of the cache and runs refresh cycles one at a time.
///
/// A cycle that exceeds the timeout is published as a failure and its result,
/// if it ever arrives, is dropped. Until that abandoned computation finishes,
/// later cycles are skipped rather than run alongside it.
#[derive(Debug)]
pub struct RefreshWorker {
    cache: PredictionCache,
    ctx: Arc<RefreshContext>,
    timeout: Duration,
    in_flight: Option<CycleHandle>,
}

impl RefreshWorker {
    pub fn new(cache: PredictionCache, ctx: Arc<RefreshContext>, timeout: Duration) -> Self {
        Self {
            cache,
            ctx,
            timeout,
            in_flight: None,
        }
    }

    pub fn cache(&self) -> &PredictionCache {
        &self.cache
    }

    /// True while an abandoned computation is still running.
    pub fn is_busy(&self) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Run one cycle off the async runtime and publish its outcome exactly once.
    pub async fn run_cycle(&mut self) -> Result<f64, RefreshError> {
        if self.is_busy() {
            warn!("Previous refresh still running, skipping cycle");
            return Err(RefreshError::Busy);
        }
        self.in_flight = None;

        self.cache.begin_refresh();
        let now = SystemTime::now();

        let worker_ctx = Arc::clone(&self.ctx);
        let mut task = tokio::task::spawn_blocking(move || compute_prediction(&worker_ctx, now));
        let outcome = match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => Err(RefreshError::Join(err.to_string())),
            Err(_) => {
                self.in_flight = Some(task);
                Err(RefreshError::Timeout(self.timeout))
            }
        };

        match outcome {
            Ok(prediction) => {
                let capacity = prediction.capacity;
                info!(
                    capacity,
                    occupancy_percent = prediction.occupancy.percent,
                    observed_fields = prediction.observed_fields,
                    "Prediction refreshed"
                );
                self.cache.publish(Ok(prediction), now);
                Ok(capacity)
            }
            Err(err) => {
                warn!(error = %err, "Prediction refresh failed, keeping last value");
                self.cache.publish(Err(err.to_string()), now);
                Err(err)
            }
        }
    }
}

/// Spawn the fixed-cadence refresh loop. The first cycle runs immediately.
///
/// A zero interval falls back to [`DEFAULT_REFRESH_INTERVAL`].
pub fn spawn_refresh_task(
    cache: PredictionCache,
    ctx: Arc<RefreshContext>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let interval = if interval.is_zero() {
        warn!("Refresh interval is zero, using default");
        DEFAULT_REFRESH_INTERVAL
    } else {
        interval
    };
    let mut worker = RefreshWorker::new(cache, ctx, timeout);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Refresh loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    // Outcome is already logged and published.
                    let _ = worker.run_cycle().await;
                }
            }
        }
    })
}

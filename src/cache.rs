//! Last-known capacity estimate shared between the refresh task and readers.
//!
//! The refresh task owns the single [`PredictionCache`] writer. Readers hold a
//! [`CacheReader`] and always get a complete snapshot without waiting on a
//! refresh in progress.

use crate::estimation::occupancy::Occupancy;
use serde::Serialize;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;

pub const SUCCESS_MESSAGE: &str = "Prediction successful";
pub const NO_DATA_MESSAGE: &str = "No data available";
pub const STALE_MESSAGE: &str = "Serving last successful prediction";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePhase {
    Uninitialized,
    Refreshing,
    Ready,
}

/// Output of one successful refresh cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub capacity: f64,
    pub computed_at: SystemTime,
    pub occupancy: Occupancy,
    pub observed_fields: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedPrediction {
    /// Last successfully computed capacity. Survives failed refreshes.
    pub capacity: Option<f64>,
    pub computed_at: Option<SystemTime>,
    pub occupancy: Option<Occupancy>,
    pub success: bool,
    pub error_reason: Option<String>,
    pub phase: CachePhase,
    pub last_attempt_at: Option<SystemTime>,
}

impl CachedPrediction {
    fn uninitialized() -> Self {
        Self {
            capacity: None,
            computed_at: None,
            occupancy: None,
            success: false,
            error_reason: None,
            phase: CachePhase::Uninitialized,
            last_attempt_at: None,
        }
    }

    pub fn has_value(&self) -> bool {
        self.capacity.is_some()
    }

    /// Time since the value was computed, if there is one.
    pub fn age(&self, now: SystemTime) -> Option<Duration> {
        self.computed_at
            .map(|computed_at| now.duration_since(computed_at).unwrap_or(Duration::ZERO))
    }

    /// A missing value counts as stale.
    pub fn is_stale(&self, now: SystemTime, bound: Duration) -> bool {
        self.age(now).is_none_or(|age| age > bound)
    }

    pub fn message(&self) -> &'static str {
        if self.success {
            SUCCESS_MESSAGE
        } else if self.has_value() {
            STALE_MESSAGE
        } else {
            NO_DATA_MESSAGE
        }
    }
}

/// Writer side. Each publish replaces the whole record in one step.
#[derive(Debug)]
pub struct PredictionCache {
    tx: watch::Sender<CachedPrediction>,
}

impl PredictionCache {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(CachedPrediction::uninitialized());
        Self { tx }
    }

    pub fn reader(&self) -> CacheReader {
        CacheReader {
            rx: self.tx.subscribe(),
        }
    }

    pub fn begin_refresh(&self) {
        self.tx.send_modify(|cached| cached.phase = CachePhase::Refreshing);
    }

    /// Record the outcome of one refresh cycle.
    ///
    /// A failure never discards the previous capacity; it only marks the
    /// record unsuccessful and stores the reason.
    pub fn publish(&self, outcome: Result<Prediction, String>, attempted_at: SystemTime) {
        self.tx.send_modify(|cached| {
            cached.last_attempt_at = Some(attempted_at);
            match outcome {
                Ok(prediction) => {
                    cached.capacity = Some(prediction.capacity);
                    cached.computed_at = Some(prediction.computed_at);
                    cached.occupancy = Some(prediction.occupancy);
                    cached.success = true;
                    cached.error_reason = None;
                    cached.phase = CachePhase::Ready;
                }
                Err(reason) => {
                    cached.success = false;
                    cached.error_reason = Some(reason);
                    cached.phase = if cached.has_value() {
                        CachePhase::Ready
                    } else {
                        CachePhase::Uninitialized
                    };
                }
            }
        });
    }

    pub fn read(&self) -> CachedPrediction {
        self.tx.borrow().clone()
    }
}

impl Default for PredictionCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheap to clone; one per API handler or consumer.
#[derive(Debug, Clone)]
pub struct CacheReader {
    rx: watch::Receiver<CachedPrediction>,
}

impl CacheReader {
    pub fn read(&self) -> CachedPrediction {
        self.rx.borrow().clone()
    }

    /// Wait for the next publish. Returns `false` once the writer is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimation::occupancy::OccupancyBand;
    use std::time::UNIX_EPOCH;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn prediction(capacity: f64, secs: u64) -> Prediction {
        Prediction {
            capacity,
            computed_at: at(secs),
            occupancy: Occupancy::from_capacity(capacity, 30.0),
            observed_fields: 3,
        }
    }

    #[test]
    fn starts_uninitialized_without_value() {
        let cache = PredictionCache::new();
        let cached = cache.reader().read();

        assert_eq!(cached.phase, CachePhase::Uninitialized);
        assert!(!cached.success);
        assert_eq!(cached.capacity, None);
        assert_eq!(cached.message(), NO_DATA_MESSAGE);
        assert!(cached.is_stale(at(0), Duration::from_secs(60)));
    }

    #[test]
    fn failure_keeps_last_capacity() {
        let cache = PredictionCache::new();
        let reader = cache.reader();

        cache.begin_refresh();
        assert_eq!(reader.read().phase, CachePhase::Refreshing);
        cache.publish(Ok(prediction(12.0, 30)), at(30));
        cache.begin_refresh();
        cache.publish(Err("predictor error".to_string()), at(60));

        let cached = reader.read();
        assert_eq!(cached.capacity, Some(12.0));
        assert_eq!(cached.computed_at, Some(at(30)));
        assert!(!cached.success);
        assert_eq!(cached.error_reason.as_deref(), Some("predictor error"));
        assert_eq!(cached.last_attempt_at, Some(at(60)));
        assert_eq!(cached.phase, CachePhase::Ready);
        assert_eq!(cached.message(), STALE_MESSAGE);
        assert_eq!(cached.occupancy.map(|o| o.band), Some(OccupancyBand::Low));
    }

    #[test]
    fn failure_before_first_value_stays_uninitialized() {
        let cache = PredictionCache::new();

        cache.begin_refresh();
        cache.publish(Err("empty window".to_string()), at(5));

        let cached = cache.read();
        assert_eq!(cached.phase, CachePhase::Uninitialized);
        assert_eq!(cached.capacity, None);
        assert_eq!(cached.error_reason.as_deref(), Some("empty window"));
    }

    #[test]
    fn success_clears_previous_error() {
        let cache = PredictionCache::new();

        cache.publish(Err("timeout".to_string()), at(5));
        cache.publish(Ok(prediction(4.0, 10)), at(10));

        let cached = cache.read();
        assert!(cached.success);
        assert_eq!(cached.error_reason, None);
        assert_eq!(cached.message(), SUCCESS_MESSAGE);
    }

    #[test]
    fn staleness_is_measured_from_computed_at() {
        let cache = PredictionCache::new();
        cache.publish(Ok(prediction(4.0, 100)), at(100));

        let cached = cache.read();
        assert_eq!(cached.age(at(130)), Some(Duration::from_secs(30)));
        assert!(!cached.is_stale(at(130), Duration::from_secs(60)));
        assert!(cached.is_stale(at(161), Duration::from_secs(60)));
        assert_eq!(cached.age(at(50)), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn readers_are_notified_of_publishes() {
        let cache = PredictionCache::new();
        let mut reader = cache.reader();

        cache.publish(Ok(prediction(9.0, 1)), at(1));

        assert!(reader.changed().await);
        assert_eq!(reader.read().capacity, Some(9.0));
    }
}

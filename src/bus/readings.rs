use crate::bus::{MAX_CLOCK_SKEW, Reading, ReadingSource};
use crate::error::AppError;
use crate::fusion::FusionWindow;
use std::collections::VecDeque;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_READINGS: usize = 10_000;

#[derive(Debug, Default)]
struct BufferInner {
    readings: VecDeque<Reading>,
    next_sequence: u64,
}

/// In-memory reading store fed by collectors and read by the refresh cycle.
///
/// Readings captured further in the future than [`MAX_CLOCK_SKEW`] are dropped
/// on ingest. Readings older than the retention period (relative to the newest
/// remaining capture) are pruned, and the buffer never holds more than
/// `max_readings`.
#[derive(Debug)]
pub struct ReadingBuffer {
    inner: RwLock<BufferInner>,
    retention: Duration,
    max_readings: usize,
}

impl ReadingBuffer {
    pub fn new(retention: Duration, max_readings: usize) -> Self {
        Self {
            inner: RwLock::new(BufferInner::default()),
            retention,
            max_readings: max_readings.max(1),
        }
    }

    /// Store one reading, assigning its ingestion sequence number.
    pub fn ingest(&self, reading: Reading) -> Result<u64, AppError> {
        let mut guard = self.inner.write().map_err(|_| AppError::BufferLock)?;
        let sequence = push_reading(&mut guard, reading);
        self.prune(&mut guard, SystemTime::now());
        Ok(sequence)
    }

    /// Store a batch of readings in order. Returns how many were stored.
    pub fn ingest_batch(&self, readings: Vec<Reading>) -> Result<usize, AppError> {
        let mut guard = self.inner.write().map_err(|_| AppError::BufferLock)?;
        let count = readings.len();
        for reading in readings {
            push_reading(&mut guard, reading);
        }
        self.prune(&mut guard, SystemTime::now());
        Ok(count)
    }

    pub fn len(&self) -> Result<usize, AppError> {
        let guard = self.inner.read().map_err(|_| AppError::BufferLock)?;
        Ok(guard.readings.len())
    }

    pub fn is_empty(&self) -> Result<bool, AppError> {
        Ok(self.len()? == 0)
    }

    fn prune(&self, inner: &mut BufferInner, now: SystemTime) {
        let horizon = now + MAX_CLOCK_SKEW;
        let before = inner.readings.len();
        inner.readings.retain(|r| r.captured_at <= horizon);
        let future = before - inner.readings.len();
        if future > 0 {
            warn!(dropped = future, "Dropped readings captured in the future");
        }

        let newest = inner.readings.iter().map(|r| r.captured_at).max();
        if let Some(cutoff) = newest.and_then(|newest| newest.checked_sub(self.retention)) {
            let before = inner.readings.len();
            inner.readings.retain(|r| r.captured_at >= cutoff);
            let dropped = before - inner.readings.len();
            if dropped > 0 {
                debug!(dropped, "Pruned readings past retention");
            }
        }
        while inner.readings.len() > self.max_readings {
            inner.readings.pop_front();
        }
    }
}

impl Default for ReadingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION, DEFAULT_MAX_READINGS)
    }
}

fn push_reading(inner: &mut BufferInner, reading: Reading) -> u64 {
    let sequence = inner.next_sequence;
    inner.next_sequence += 1;
    inner.readings.push_back(reading.with_sequence(sequence));
    sequence
}

impl ReadingSource for ReadingBuffer {
    fn snapshot(&self, window: &FusionWindow) -> Result<Vec<Reading>, AppError> {
        let guard = self.inner.read().map_err(|_| AppError::BufferLock)?;
        Ok(guard
            .readings
            .iter()
            .filter(|reading| window.contains(reading.captured_at))
            .cloned()
            .collect())
    }

    fn latest_captured_at(&self) -> Result<Option<SystemTime>, AppError> {
        let guard = self.inner.read().map_err(|_| AppError::BufferLock)?;
        Ok(guard.readings.iter().map(|r| r.captured_at).max())
    }
}

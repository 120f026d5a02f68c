use smartstop::bus::Reading;
use smartstop::bus::readings::ReadingBuffer;
use smartstop::cache::{CacheReader, Prediction, PredictionCache};
use smartstop::estimation::linear::LinearPredictor;
use smartstop::estimation::model::{PredictError, Predictor};
use smartstop::estimation::occupancy::Occupancy;
use smartstop::estimation::refresh::{
    RefreshContext, RefreshError, RefreshWorker, spawn_refresh_task,
};
use smartstop::fusion::FeatureVector;
use smartstop::fusion::schema::FieldSchema;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct SlowPredictor {
    schema: FieldSchema,
    delay: Duration,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl SlowPredictor {
    fn new(delay: Duration) -> Self {
        Self {
            schema: FieldSchema::default(),
            delay,
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }
}

impl Predictor for SlowPredictor {
    fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    fn predict(&self, _features: &FeatureVector) -> Result<f64, PredictError> {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(99.0)
    }
}

fn buffer_with_people(count: i64) -> Result<Arc<ReadingBuffer>, Box<dyn std::error::Error>> {
    let buffer = ReadingBuffer::default();
    buffer.ingest(Reading::new("ir-01", "people_count", count, SystemTime::now()))?;
    Ok(Arc::new(buffer))
}

async fn wait_for_value(reader: &mut CacheReader) -> Result<(), Box<dyn std::error::Error>> {
    while !reader.read().has_value() {
        let changed = tokio::time::timeout(Duration::from_secs(5), reader.changed()).await?;
        if !changed {
            return Err("cache writer dropped before publishing".into());
        }
    }
    Ok(())
}

#[tokio::test]
async fn loop_publishes_first_cycle_immediately() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = Arc::new(RefreshContext::new(
        buffer_with_people(6)?,
        Arc::new(LinearPredictor::with_defaults()),
    ));
    let cache = PredictionCache::new();
    let mut reader = cache.reader();
    let cancel = CancellationToken::new();

    let handle = spawn_refresh_task(
        cache,
        ctx,
        Duration::from_secs(3600),
        Duration::from_secs(5),
        cancel.clone(),
    );

    wait_for_value(&mut reader).await?;
    assert_eq!(reader.read().capacity, Some(6.0));
    assert!(reader.read().success);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle).await??;
    Ok(())
}

#[tokio::test]
async fn timed_out_cycle_keeps_previous_value() -> Result<(), Box<dyn std::error::Error>> {
    let predictor = SlowPredictor::new(Duration::from_millis(300));
    let ctx = Arc::new(RefreshContext::new(buffer_with_people(4)?, Arc::new(predictor)));
    let cache = PredictionCache::new();
    let earlier = SystemTime::now();
    cache.publish(
        Ok(Prediction {
            capacity: 7.0,
            computed_at: earlier,
            occupancy: Occupancy::from_capacity(7.0, 30.0),
            observed_fields: 1,
        }),
        earlier,
    );

    let mut worker = RefreshWorker::new(cache, ctx, Duration::from_millis(20));

    let result = worker.run_cycle().await;

    assert!(matches!(result, Err(RefreshError::Timeout(_))));
    let cached = worker.cache().read();
    assert_eq!(cached.capacity, Some(7.0));
    assert_eq!(cached.computed_at, Some(earlier));
    assert!(!cached.success);
    assert!(
        cached
            .error_reason
            .as_deref()
            .is_some_and(|reason| reason.contains("timed out"))
    );
    Ok(())
}

#[tokio::test]
async fn cancelled_loop_exits_and_drops_writer() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = Arc::new(RefreshContext::new(
        Arc::new(ReadingBuffer::default()),
        Arc::new(LinearPredictor::with_defaults()),
    ));
    let cache = PredictionCache::new();
    let mut reader = cache.reader();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let handle = spawn_refresh_task(
        cache,
        ctx,
        Duration::from_millis(10),
        Duration::from_secs(1),
        cancel,
    );
    tokio::time::timeout(Duration::from_secs(5), handle).await??;

    // Writer is gone once the task has ended.
    let changed = tokio::time::timeout(Duration::from_secs(5), reader.changed()).await?;
    assert!(!changed);
    assert!(!reader.read().has_value());
    Ok(())
}

#[tokio::test]
async fn timed_out_cycle_never_overlaps_the_next() -> Result<(), Box<dyn std::error::Error>> {
    let predictor = Arc::new(SlowPredictor::new(Duration::from_millis(300)));
    let ctx = Arc::new(RefreshContext::new(
        buffer_with_people(4)?,
        Arc::clone(&predictor) as Arc<dyn Predictor>,
    ));
    let mut worker = RefreshWorker::new(PredictionCache::new(), ctx, Duration::from_millis(20));

    assert!(matches!(worker.run_cycle().await, Err(RefreshError::Timeout(_))));
    assert!(worker.is_busy());
    assert!(matches!(worker.run_cycle().await, Err(RefreshError::Busy)));
    assert!(matches!(worker.run_cycle().await, Err(RefreshError::Busy)));

    while worker.is_busy() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(matches!(worker.run_cycle().await, Err(RefreshError::Timeout(_))));
    while worker.is_busy() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(predictor.max_running.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn zero_interval_does_not_kill_the_loop() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = Arc::new(RefreshContext::new(
        buffer_with_people(2)?,
        Arc::new(LinearPredictor::with_defaults()),
    ));
    let cache = PredictionCache::new();
    let mut reader = cache.reader();
    let cancel = CancellationToken::new();

    let handle = spawn_refresh_task(
        cache,
        ctx,
        Duration::ZERO,
        Duration::from_secs(5),
        cancel.clone(),
    );

    wait_for_value(&mut reader).await?;
    assert_eq!(reader.read().capacity, Some(2.0));

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle).await??;
    Ok(())
}

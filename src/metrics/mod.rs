// Private module declaration
mod server;

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    IntGauge, Opts, Registry,
};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for the order event pipeline
// ============================================================================
//
// Provides metrics for:
// - Publish outcomes and broker ack latency
// - Consumer processing (throughput, latency, failures by kind)
// - Retries, offset commits and consumer workers
// - Dead-letter writes, including writes that were lost
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

/// Registry plus every metric the pipeline records
pub struct Metrics {
    registry: Registry,

    // Publisher
    pub events_published: IntCounterVec,
    pub publish_failures: IntCounterVec,
    pub publish_duration: HistogramVec,

    // Consumer
    pub events_processed: IntCounterVec,
    pub events_failed: IntCounterVec,
    pub processing_duration: HistogramVec,
    pub retries_scheduled: IntCounterVec,
    pub offsets_committed: IntCounter,
    pub commit_failures: IntCounter,
    pub consumer_workers: IntGauge,

    // Dead letters
    pub dlq_messages_total: IntCounter,
    pub dlq_messages_by_kind: IntCounterVec,
    pub dlq_write_failures: IntCounter,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Publisher
        let events_published = IntCounterVec::new(
            Opts::new("order_events_published_total", "Order events acknowledged by the broker"),
            &["event_type"],
        )?;
        registry.register(Box::new(events_published.clone()))?;

        let publish_failures = IntCounterVec::new(
            Opts::new("order_events_publish_failures_total", "Order events the broker never acknowledged"),
            &["event_type"],
        )?;
        registry.register(Box::new(publish_failures.clone()))?;

        let publish_duration = HistogramVec::new(
            HistogramOpts::new("order_events_publish_duration_seconds", "Time from enqueue to broker ack")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
            &["event_type"],
        )?;
        registry.register(Box::new(publish_duration.clone()))?;

        // Consumer
        let events_processed = IntCounterVec::new(
            Opts::new("order_events_processed_total", "Order events handled and committed"),
            &["event_type"],
        )?;
        registry.register(Box::new(events_processed.clone()))?;

        let events_failed = IntCounterVec::new(
            Opts::new("order_events_failed_total", "Processing attempts that failed"),
            &["kind"],
        )?;
        registry.register(Box::new(events_failed.clone()))?;

        let processing_duration = HistogramVec::new(
            HistogramOpts::new("order_events_processing_duration_seconds", "Handler duration per event")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["event_type"],
        )?;
        registry.register(Box::new(processing_duration.clone()))?;

        let retries_scheduled = IntCounterVec::new(
            Opts::new("order_events_retries_total", "Records left uncommitted for redelivery"),
            &["kind"],
        )?;
        registry.register(Box::new(retries_scheduled.clone()))?;

        let offsets_committed = IntCounter::new(
            "order_events_offsets_committed_total",
            "Offsets committed to the consumer group",
        )?;
        registry.register(Box::new(offsets_committed.clone()))?;

        let commit_failures = IntCounter::new(
            "order_events_commit_failures_total",
            "Offset commits rejected by the broker",
        )?;
        registry.register(Box::new(commit_failures.clone()))?;

        let consumer_workers = IntGauge::new(
            "order_events_consumer_workers",
            "Consumer workers currently running",
        )?;
        registry.register(Box::new(consumer_workers.clone()))?;

        // Dead letters
        let dlq_messages_total = IntCounter::new(
            "dlq_messages_total",
            "Total records written to the dead letter topic",
        )?;
        registry.register(Box::new(dlq_messages_total.clone()))?;

        let dlq_messages_by_kind = IntCounterVec::new(
            Opts::new("dlq_messages_by_kind", "Dead-lettered records by failure kind"),
            &["kind"],
        )?;
        registry.register(Box::new(dlq_messages_by_kind.clone()))?;

        let dlq_write_failures = IntCounter::new(
            "dlq_write_failures_total",
            "Dead-letter writes that failed; the source offset was committed anyway",
        )?;
        registry.register(Box::new(dlq_write_failures.clone()))?;

        Ok(Self {
            registry,
            events_published,
            publish_failures,
            publish_duration,
            events_processed,
            events_failed,
            processing_duration,
            retries_scheduled,
            offsets_committed,
            commit_failures,
            consumer_workers,
            dlq_messages_total,
            dlq_messages_by_kind,
            dlq_write_failures,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_publish(&self, event_type: &str, duration_secs: f64, success: bool) {
        if success {
            self.events_published.with_label_values(&[event_type]).inc();
        } else {
            self.publish_failures.with_label_values(&[event_type]).inc();
        }
        self.publish_duration.with_label_values(&[event_type]).observe(duration_secs);
    }

    pub fn record_processed(&self, event_type: &str, duration_secs: f64) {
        self.events_processed.with_label_values(&[event_type]).inc();
        self.processing_duration.with_label_values(&[event_type]).observe(duration_secs);
    }

    pub fn record_failure(&self, kind: &str) {
        self.events_failed.with_label_values(&[kind]).inc();
    }

    pub fn record_retry(&self, kind: &str) {
        self.retries_scheduled.with_label_values(&[kind]).inc();
    }

    pub fn record_commit(&self, success: bool) {
        if success {
            self.offsets_committed.inc();
        } else {
            self.commit_failures.inc();
        }
    }

    pub fn record_dlq_message(&self, kind: &str) {
        self.dlq_messages_total.inc();
        self.dlq_messages_by_kind.with_label_values(&[kind]).inc();
    }

    pub fn record_dlq_write_failure(&self) {
        self.dlq_write_failures.inc();
    }
}

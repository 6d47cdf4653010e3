use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::codec::{self, OrderEvent, SchemaContext};
use crate::messaging::{ConsumerRecord, RecordSource};
use crate::metrics::Metrics;

use super::dlq::DeadLetterWriter;
use super::handler::{EventHandler, ProcessingFailure};
use super::policy::{Decision, RetryPolicy};

// ============================================================================
// Consumer Worker - fetch / process / commit for one group member
// ============================================================================
//
// Records of a partition are handled strictly in receipt order. A record's
// offset is committed before the next record of that partition is touched.
// When a record is left for redelivery the partition is rewound and the
// rest of the batch for that partition is skipped, so nothing after it can
// be committed first.
//
// ============================================================================

const FETCH_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Fetching,
    Processing,
    Committing,
    Retrying,
    DeadLettering,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::Idle => "idle",
            LoopState::Fetching => "fetching",
            LoopState::Processing => "processing",
            LoopState::Committing => "committing",
            LoopState::Retrying => "retrying",
            LoopState::DeadLettering => "dead_lettering",
        };
        f.write_str(name)
    }
}

/// Everything the workers share.
pub(crate) struct Pipeline {
    pub handler: Arc<dyn EventHandler>,
    pub dead_letters: Arc<DeadLetterWriter>,
    pub schema: Arc<SchemaContext>,
    pub policy: RetryPolicy,
    pub max_poll_records: usize,
    pub metrics: Arc<Metrics>,
}

pub(crate) struct Worker {
    id: usize,
    source: Box<dyn RecordSource>,
    pipeline: Arc<Pipeline>,
    state: LoopState,
    attempts: HashMap<(i32, i64), u32>,
}

/// What became of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    /// Committed, or given up on and committed.
    Done,
    /// Left uncommitted; the partition was rewound to it.
    Rewound,
}

impl Worker {
    pub fn new(id: usize, source: Box<dyn RecordSource>, pipeline: Arc<Pipeline>) -> Self {
        Self {
            id,
            source,
            pipeline,
            state: LoopState::Idle,
            attempts: HashMap::new(),
        }
    }

    fn transition(&mut self, next: LoopState) {
        if self.state != next {
            tracing::trace!(worker = self.id, from = %self.state, to = %next, "Consumer state");
            self.state = next;
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(worker = self.id, "Consumer worker started");
        self.pipeline.metrics.consumer_workers.inc();

        while !cancel.is_cancelled() {
            self.transition(LoopState::Fetching);
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                fetched = self.source.fetch(self.pipeline.max_poll_records) => fetched,
            };

            match fetched {
                Ok(batch) => {
                    tracing::debug!(worker = self.id, records = batch.len(), "Fetched batch");
                    self.process_batch(batch, &cancel).await;
                }
                Err(e) => {
                    tracing::warn!(worker = self.id, error = %e, "Fetch failed, backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(FETCH_ERROR_BACKOFF) => {}
                    }
                }
            }
            self.transition(LoopState::Idle);
        }

        self.transition(LoopState::Idle);
        if let Err(e) = self.source.close().await {
            tracing::warn!(worker = self.id, error = %e, "Failed to release partitions cleanly");
        }
        self.pipeline.metrics.consumer_workers.dec();
        tracing::info!(worker = self.id, "Consumer worker stopped");
    }

    async fn process_batch(&mut self, batch: Vec<ConsumerRecord>, cancel: &CancellationToken) {
        // Partitions rewound during this batch. The seek makes the next fetch
        // start at the rewound record, so only the rest of this batch is stale.
        let mut rewound: HashSet<i32> = HashSet::new();

        for record in batch {
            // Finish the record in hand, then stop; the rest is redelivered.
            if cancel.is_cancelled() {
                break;
            }

            if rewound.contains(&record.partition) {
                tracing::trace!(
                    worker = self.id,
                    partition = record.partition,
                    offset = record.offset,
                    "Skipping record behind a pending redelivery"
                );
                continue;
            }

            self.forget_attempts_before(&record);
            self.transition(LoopState::Processing);
            if self.process_record(&record, cancel).await == Progress::Rewound {
                rewound.insert(record.partition);
            }
        }
    }

    /// Drop attempt counts for offsets the partition has moved past, e.g.
    /// after a rebalance handed it back with a later committed offset.
    fn forget_attempts_before(&mut self, record: &ConsumerRecord) {
        self.attempts
            .retain(|&(partition, offset), _| partition != record.partition || offset >= record.offset);
    }

    async fn process_record(&mut self, record: &ConsumerRecord, cancel: &CancellationToken) -> Progress {
        let started = Instant::now();

        let event = match codec::decode(&record.payload, &self.pipeline.schema, record.position()) {
            Ok(event) => event,
            Err(e) => return self.handle_failure(record, None, e.into(), cancel).await,
        };

        tracing::info!(
            worker = self.id,
            order_id = %event.order_id,
            event_type = %event.event_type,
            partition = record.partition,
            offset = record.offset,
            "Received order event"
        );

        match self.pipeline.handler.handle(&event).await {
            Ok(()) => {
                self.attempts.remove(&(record.partition, record.offset));
                if self.commit(record).await {
                    self.pipeline
                        .metrics
                        .record_processed(event.event_type.as_str(), started.elapsed().as_secs_f64());
                    tracing::info!(
                        worker = self.id,
                        order_id = %event.order_id,
                        offset = record.offset,
                        "✅ Order event processed"
                    );
                }
                Progress::Done
            }
            Err(e) => self.handle_failure(record, Some(&event), e.into(), cancel).await,
        }
    }

    async fn handle_failure(
        &mut self,
        record: &ConsumerRecord,
        event: Option<&OrderEvent>,
        failure: ProcessingFailure,
        cancel: &CancellationToken,
    ) -> Progress {
        let key = (record.partition, record.offset);
        let attempt = {
            let count = self.attempts.entry(key).or_insert(0);
            *count += 1;
            *count
        };

        self.pipeline.metrics.record_failure(failure.kind());
        tracing::error!(
            worker = self.id,
            order_id = event.map(|e| e.order_id.as_str()).unwrap_or("<undecoded>"),
            partition = record.partition,
            offset = record.offset,
            attempt,
            error = %failure,
            "Error processing order event"
        );

        match self.pipeline.policy.decide(record, &failure, attempt) {
            Decision::Retry { backoff } => {
                self.transition(LoopState::Retrying);
                self.pipeline.metrics.record_retry(failure.kind());

                if let Err(e) = self.source.rewind(record.partition, record.offset).await {
                    // Without a rewind the record never comes back in this
                    // session, so it is parked instead of silently stalling.
                    tracing::error!(worker = self.id, error = %e, "Rewind failed, dead-lettering instead");
                    self.dead_letter(record, event, &failure, attempt).await;
                    return Progress::Done;
                }

                tracing::warn!(
                    worker = self.id,
                    partition = record.partition,
                    offset = record.offset,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "Leaving record uncommitted for redelivery"
                );

                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(backoff) => {}
                }
                Progress::Rewound
            }
            Decision::DeadLetter => {
                self.dead_letter(record, event, &failure, attempt).await;
                Progress::Done
            }
        }
    }

    async fn dead_letter(
        &mut self,
        record: &ConsumerRecord,
        event: Option<&OrderEvent>,
        failure: &ProcessingFailure,
        attempt: u32,
    ) {
        self.transition(LoopState::DeadLettering);
        match self.pipeline.dead_letters.write(record, event, failure, attempt).await {
            Ok(_) => self.pipeline.metrics.record_dlq_message(failure.kind()),
            Err(e) => {
                self.pipeline.metrics.record_dlq_write_failure();
                tracing::error!(
                    alert = "dlq_write_failed",
                    worker = self.id,
                    dlq_topic = self.pipeline.dead_letters.topic(),
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "🚨 Dead-letter write failed; committing anyway, record may be lost"
                );
            }
        }
        self.attempts.remove(&(record.partition, record.offset));
        self.commit(record).await;
    }

    async fn commit(&mut self, record: &ConsumerRecord) -> bool {
        self.transition(LoopState::Committing);
        match self.source.commit(record.partition, record.offset).await {
            Ok(()) => {
                self.pipeline.metrics.record_commit(true);
                true
            }
            Err(e) => {
                self.pipeline.metrics.record_commit(false);
                tracing::error!(
                    worker = self.id,
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Offset commit failed; a later commit on this partition supersedes it, otherwise the record is redelivered after a restart or rebalance"
                );
                false
            }
        }
    }
}

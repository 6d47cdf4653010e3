use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::codec::SchemaContext;
use crate::config::PipelineConfig;
use crate::messaging::{BrokerError, SourceFactory};
use crate::metrics::Metrics;

use super::dlq::DeadLetterWriter;
use super::handler::EventHandler;
use super::worker::{Pipeline, Worker};

// ============================================================================
// Consumer Loop - runs N workers in one consumer group
// ============================================================================
//
// Each worker owns one group member and therefore an exclusive set of
// partitions. The handler, dead-letter writer and schema context are shared.
//
// ============================================================================

pub struct ConsumerLoop {
    workers: usize,
    sources: Arc<dyn SourceFactory>,
    pipeline: Arc<Pipeline>,
}

impl ConsumerLoop {
    pub fn new(
        config: &PipelineConfig,
        sources: Arc<dyn SourceFactory>,
        handler: Arc<dyn EventHandler>,
        dead_letters: Arc<DeadLetterWriter>,
        schema: Arc<SchemaContext>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            workers: config.consumer.workers.max(1),
            sources,
            pipeline: Arc::new(Pipeline {
                handler,
                dead_letters,
                schema,
                policy: config.consumer.retry.clone(),
                max_poll_records: config.consumer.max_poll_records.max(1),
                metrics,
            }),
        }
    }

    /// Run until `cancel` fires. Every member joins the group before any
    /// worker starts, so a connection failure aborts the whole loop.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), BrokerError> {
        let mut members = Vec::with_capacity(self.workers);
        for id in 0..self.workers {
            members.push(self.sources.new_source(id).await?);
        }

        tracing::info!(
            workers = self.workers,
            max_poll_records = self.pipeline.max_poll_records,
            max_attempts = self.pipeline.policy.max_attempts,
            dlq_topic = self.pipeline.dead_letters.topic(),
            "🚀 Starting consumer loop"
        );

        let handles: Vec<_> = members
            .into_iter()
            .enumerate()
            .map(|(id, source)| {
                let worker = Worker::new(id, source, self.pipeline.clone());
                tokio::spawn(worker.run(cancel.clone()))
            })
            .collect();

        for result in futures_util::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Consumer worker panicked");
            }
        }

        tracing::info!("Consumer loop stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{EventType, OrderEvent, WireStatus};
    use crate::consumer::{DeadLetterRecord, HandlerError, RetryPolicy};
    use crate::domain::order::{Order, OrderStatus};
    use crate::messaging::{EventSink, InMemoryBroker, OutboundRecord};
    use crate::publisher::Publisher;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::task::JoinHandle;

    const TOPIC: &str = "order-events";
    const DLQ: &str = "order-events-dlq";
    const GROUP: &str = "notification-service";

    enum Behaviour {
        Succeed,
        AlwaysFail,
        FailTransientTimes(u32),
    }

    struct RecordingHandler {
        behaviour: Behaviour,
        calls: AtomicU32,
        seen: Mutex<Vec<OrderEvent>>,
    }

    impl RecordingHandler {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: AtomicU32::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<OrderEvent> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle(&self, event: &OrderEvent) -> Result<(), HandlerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.behaviour {
                Behaviour::Succeed => {}
                Behaviour::AlwaysFail => {
                    return Err(HandlerError::Permanent("notification dispatch failed".to_string()))
                }
                Behaviour::FailTransientTimes(n) if call <= n => {
                    return Err(HandlerError::Transient("smtp relay unavailable".to_string()))
                }
                Behaviour::FailTransientTimes(_) => {}
            }
            self.seen.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct Harness {
        broker: InMemoryBroker,
        schema: Arc<SchemaContext>,
        metrics: Arc<Metrics>,
        config: PipelineConfig,
    }

    impl Harness {
        fn new(partitions: usize, workers: usize, retry: RetryPolicy) -> Self {
            let mut config = PipelineConfig::default();
            config.consumer.workers = workers;
            config.consumer.retry = retry;
            config.consumer.dlq_write_timeout = Duration::from_millis(200);
            Self {
                broker: InMemoryBroker::new(partitions),
                schema: Arc::new(SchemaContext::order_events(2, Some(1)).unwrap()),
                metrics: Arc::new(Metrics::new().unwrap()),
                config,
            }
        }

        fn publisher(&self) -> Publisher {
            Publisher::new(
                Arc::new(self.broker.clone()),
                self.schema.clone(),
                &self.config,
                self.metrics.clone(),
            )
        }

        fn start(&self, handler: Arc<dyn EventHandler>) -> (CancellationToken, JoinHandle<Result<(), BrokerError>>) {
            let dead_letters = Arc::new(DeadLetterWriter::new(
                Arc::new(self.broker.clone()),
                DLQ,
                self.config.consumer.dlq_write_timeout,
            ));
            let consumer = ConsumerLoop::new(
                &self.config,
                Arc::new(self.broker.source_factory(GROUP, TOPIC, self.config.consumer.workers)),
                handler,
                dead_letters,
                self.schema.clone(),
                self.metrics.clone(),
            );
            let cancel = CancellationToken::new();
            let token = cancel.clone();
            let handle = tokio::spawn(async move { consumer.run(token).await });
            (cancel, handle)
        }

        fn committed(&self, partition: i32) -> Option<i64> {
            self.broker.committed_offset(GROUP, TOPIC, partition)
        }

        fn main_topic_commits(&self) -> Vec<(i32, i64)> {
            self.broker
                .commit_log()
                .into_iter()
                .filter(|c| c.topic == TOPIC)
                .map(|c| (c.partition, c.offset))
                .collect()
        }
    }

    async fn wait_until(what: &str, condition: impl Fn() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn stop(cancel: CancellationToken, handle: JoinHandle<Result<(), BrokerError>>) {
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("consumer loop did not stop")
            .unwrap()
            .unwrap();
    }

    fn widget_order() -> Order {
        Order::new("C1", "a@b.com", "Widget", 2, 19.98).with_id("O1")
    }

    #[tokio::test]
    async fn test_created_event_is_handled_once_and_committed() {
        let harness = Harness::new(3, 1, RetryPolicy::default());
        let handler = RecordingHandler::new(Behaviour::Succeed);
        let (cancel, handle) = harness.start(handler.clone());

        let before = chrono::Utc::now().timestamp_millis();
        let outcome = harness
            .publisher()
            .publish_order(&widget_order(), EventType::OrderCreated)
            .unwrap()
            .await;
        assert!(outcome.is_delivered());

        let partition = harness.broker.partition_for("O1");
        wait_until("commit of O1", || harness.committed(partition) == Some(1)).await;
        stop(cancel, handle).await;

        let seen = handler.seen();
        assert_eq!(seen.len(), 1);
        let event = &seen[0];
        assert_eq!(event.order_id, "O1");
        assert_eq!(event.customer_id, "C1");
        assert_eq!(event.customer_email, "a@b.com");
        assert_eq!(event.product_name, "Widget");
        assert_eq!(event.quantity, 2);
        assert_eq!(event.total_amount, 19.98);
        assert_eq!(event.status, WireStatus::Created);
        assert_eq!(event.event_type, EventType::OrderCreated);
        assert!(event.event_timestamp >= before);

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(harness.broker.records(DLQ).is_empty());
        assert_eq!(harness.metrics.events_processed.with_label_values(&["ORDER_CREATED"]).get(), 1);
    }

    #[tokio::test]
    async fn test_failing_handler_dead_letters_once_and_advances() {
        let harness = Harness::new(1, 1, RetryPolicy::default());
        let handler = RecordingHandler::new(Behaviour::AlwaysFail);
        let (cancel, handle) = harness.start(handler.clone());

        harness
            .publisher()
            .publish_order(&widget_order(), EventType::OrderCreated)
            .unwrap()
            .await;

        wait_until("offset to advance", || harness.committed(0) == Some(1)).await;
        stop(cancel, handle).await;

        let dead = harness.broker.records(DLQ);
        assert_eq!(dead.len(), 1);
        let letter: DeadLetterRecord = serde_json::from_slice(&dead[0].payload).unwrap();
        assert_eq!(letter.order_id.as_deref(), Some("O1"));
        assert!(!letter.error_message.is_empty());
        assert_eq!(letter.failure_count, 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(harness.metrics.dlq_messages_total.get(), 1);
    }

    #[tokio::test]
    async fn test_same_key_events_arrive_in_publish_order() {
        let harness = Harness::new(4, 2, RetryPolicy::default());
        let handler = RecordingHandler::new(Behaviour::Succeed);
        let (cancel, handle) = harness.start(handler.clone());

        let publisher = harness.publisher();
        let order = widget_order();
        let sequence = [
            OrderStatus::Created,
            OrderStatus::Confirmed,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
        ];
        let mut handles = Vec::new();
        for status in sequence {
            let event_type = if status == OrderStatus::Created {
                EventType::OrderCreated
            } else {
                EventType::OrderUpdated
            };
            handles.push(publisher.publish_order(&order.clone().with_status(status), event_type).unwrap());
        }
        for delivery in handles {
            assert!(delivery.await.is_delivered());
        }

        wait_until("all four events", || handler.seen().len() == 4).await;
        stop(cancel, handle).await;

        let statuses: Vec<_> = handler.seen().iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![WireStatus::Created, WireStatus::Confirmed, WireStatus::Shipped, WireStatus::Delivered]
        );
    }

    #[tokio::test]
    async fn test_every_event_committed_exactly_once() {
        let harness = Harness::new(3, 3, RetryPolicy::default());
        let handler = RecordingHandler::new(Behaviour::Succeed);
        let (cancel, handle) = harness.start(handler.clone());

        let publisher = harness.publisher();
        for i in 0..12 {
            let order = Order::new(format!("C{}", i), "c@example.com", "Gadget", 1, 5.0).with_id(format!("O{}", i));
            publisher.publish_order(&order, EventType::OrderCreated).unwrap().await;
        }

        wait_until("twelve commits", || harness.main_topic_commits().len() == 12).await;
        // Give a redelivery, if any, a chance to show up.
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop(cancel, handle).await;

        let mut commits = harness.main_topic_commits();
        assert_eq!(commits.len(), 12);
        commits.sort();
        commits.dedup();
        assert_eq!(commits.len(), 12);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 12);
    }

    #[tokio::test]
    async fn test_transient_failure_is_redelivered_then_succeeds() {
        let retry = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            multiplier: 2.0,
        };
        let harness = Harness::new(1, 1, retry);
        let handler = RecordingHandler::new(Behaviour::FailTransientTimes(2));
        let (cancel, handle) = harness.start(handler.clone());

        let publisher = harness.publisher();
        let order = widget_order();
        publisher.publish_order(&order, EventType::OrderCreated).unwrap().await;
        publisher
            .publish_order(&order.with_status(OrderStatus::Confirmed), EventType::OrderUpdated)
            .unwrap()
            .await;

        wait_until("both offsets committed", || harness.committed(0) == Some(2)).await;
        stop(cancel, handle).await;

        // Offset 1 must never be committed ahead of offset 0.
        assert_eq!(harness.main_topic_commits(), vec![(0, 0), (0, 1)]);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 4);
        let statuses: Vec<_> = handler.seen().iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![WireStatus::Created, WireStatus::Confirmed]);
        assert!(harness.broker.records(DLQ).is_empty());
        assert_eq!(harness.metrics.retries_scheduled.with_label_values(&["handler"]).get(), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_dead_letters_after_max_attempts() {
        let retry = RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(5),
            multiplier: 1.0,
        };
        let harness = Harness::new(1, 1, retry);
        let handler = RecordingHandler::new(Behaviour::FailTransientTimes(u32::MAX));
        let (cancel, handle) = harness.start(handler.clone());

        harness
            .publisher()
            .publish_order(&widget_order(), EventType::OrderCreated)
            .unwrap()
            .await;

        wait_until("offset to advance", || harness.committed(0) == Some(1)).await;
        stop(cancel, handle).await;

        let dead = harness.broker.records(DLQ);
        assert_eq!(dead.len(), 1);
        let letter: DeadLetterRecord = serde_json::from_slice(&dead[0].payload).unwrap();
        assert_eq!(letter.failure_count, 2);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_malformed_payload_skips_retry_and_dead_letters() {
        let retry = RetryPolicy::with_max_attempts(5);
        let harness = Harness::new(1, 1, retry);
        let handler = RecordingHandler::new(Behaviour::Succeed);
        let (cancel, handle) = harness.start(handler.clone());

        harness
            .broker
            .enqueue(OutboundRecord::new(TOPIC, "O1", b"{\"orderId\":\"O1\"}".to_vec()))
            .unwrap()
            .await
            .unwrap();

        wait_until("offset to advance", || harness.committed(0) == Some(1)).await;
        stop(cancel, handle).await;

        let dead = harness.broker.records(DLQ);
        assert_eq!(dead.len(), 1);
        let letter: DeadLetterRecord = serde_json::from_slice(&dead[0].payload).unwrap();
        assert_eq!(letter.failure_kind, "decode");
        assert_eq!(letter.failure_count, 1);
        assert_eq!(letter.original_payload().unwrap(), b"{\"orderId\":\"O1\"}".to_vec());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dead_letter_write_failure_still_commits() {
        let harness = Harness::new(1, 1, RetryPolicy::default());
        harness.broker.fail_sends_to(DLQ);
        let handler = RecordingHandler::new(Behaviour::AlwaysFail);
        let (cancel, handle) = harness.start(handler.clone());

        let publisher = harness.publisher();
        publisher.publish_order(&widget_order(), EventType::OrderCreated).unwrap().await;
        let other = Order::new("C2", "b@c.com", "Gizmo", 1, 3.5).with_id("O2");
        publisher.publish_order(&other, EventType::OrderCreated).unwrap().await;

        wait_until("both offsets committed", || harness.committed(0) == Some(2)).await;
        stop(cancel, handle).await;

        assert!(harness.broker.records(DLQ).is_empty());
        assert_eq!(harness.metrics.dlq_write_failures.get(), 2);
        assert_eq!(harness.metrics.dlq_messages_total.get(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_releases_members_and_resumes_from_commit() {
        let harness = Harness::new(2, 2, RetryPolicy::default());
        let first = RecordingHandler::new(Behaviour::Succeed);
        let (cancel, handle) = harness.start(first.clone());

        let publisher = harness.publisher();
        publisher.publish_order(&widget_order(), EventType::OrderCreated).unwrap().await;
        wait_until("first event", || first.seen().len() == 1).await;
        stop(cancel, handle).await;
        assert_eq!(harness.metrics.consumer_workers.get(), 0);

        // Published while nobody is consuming.
        publisher
            .publish_order(&widget_order().with_status(OrderStatus::Cancelled), EventType::OrderCancelled)
            .unwrap()
            .await;

        let second = RecordingHandler::new(Behaviour::Succeed);
        let (cancel, handle) = harness.start(second.clone());
        wait_until("second event", || second.seen().len() == 1).await;
        stop(cancel, handle).await;

        assert_eq!(second.seen()[0].event_type, EventType::OrderCancelled);
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
    }
}

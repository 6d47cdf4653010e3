use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use order_events::codec::SchemaContext;
use order_events::config::PipelineConfig;
use order_events::consumer::{ConsumerLoop, DeadLetterWriter};
use order_events::domain::order::{Order, OrderStatus};
use order_events::messaging::{EventSink, InMemoryBroker, KafkaSink, KafkaSourceFactory, SourceFactory};
use order_events::metrics::{self, Metrics};
use order_events::notification::NotificationService;
use order_events::publisher::{OrderEvents, Publisher};

#[derive(Parser, Debug)]
#[command(name = "order-events", about = "Order lifecycle events over Kafka / Redpanda")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Run the notification consumer group (default).
    Consume,
    /// Publish one order lifecycle: create, confirm, ship, cancel.
    Demo {
        /// Run producer and consumer against an in-process broker.
        #[arg(long)]
        in_memory: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=order_events=trace order-events consume
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_events=debug"))
        )
        .init();

    let command = cli.command.unwrap_or(Command::Consume);

    let config = PipelineConfig::from_env()?;
    tracing::info!(
        brokers = %config.bootstrap_servers,
        security_protocol = config.security_protocol.as_str(),
        group = %config.consumer_group_id,
        topic = %config.topics.order_events,
        dlq_topic = %config.topics.dead_letter,
        schema_registry = %config.schema_registry_url,
        schema_id = config.schema_id,
        "🚀 Starting order-events ({:?})",
        command
    );

    // === Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());
    spawn_metrics_server(&metrics, config.metrics_port);

    let schema = Arc::new(SchemaContext::order_events(config.schema_id, config.legacy_schema_id)?);

    match command {
        Command::Consume => consume(&config, schema, metrics).await,
        Command::Demo { in_memory: true } => demo_in_memory(&config, schema, metrics).await,
        Command::Demo { in_memory: false } => demo_kafka(&config, schema, metrics).await,
    }
}

fn spawn_metrics_server(metrics: &Arc<Metrics>, port: u16) {
    let shared = metrics.clone();
    std::thread::spawn(move || {
        let served = actix_web::rt::System::new().block_on(metrics::start_metrics_server(shared, port));
        if let Err(e) = served {
            tracing::error!("Metrics server error: {}", e);
        }
    });
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("🛑 Shutdown requested, finishing in-flight records"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
        }
        token.cancel();
    });
}

fn consumer_loop(
    config: &PipelineConfig,
    sources: Arc<dyn SourceFactory>,
    dlq_sink: Arc<dyn EventSink>,
    schema: Arc<SchemaContext>,
    metrics: Arc<Metrics>,
) -> ConsumerLoop {
    let handler = Arc::new(NotificationService::from_config(&config.notification));
    let dead_letters = Arc::new(DeadLetterWriter::new(
        dlq_sink,
        config.topics.dead_letter.clone(),
        config.consumer.dlq_write_timeout,
    ));
    ConsumerLoop::new(config, sources, handler, dead_letters, schema, metrics)
}

// === consume: notification workers against Kafka ===
async fn consume(config: &PipelineConfig, schema: Arc<SchemaContext>, metrics: Arc<Metrics>) -> anyhow::Result<()> {
    let dlq_sink = Arc::new(KafkaSink::new(config)?);
    let sources = Arc::new(KafkaSourceFactory::new(config));
    let consumer = consumer_loop(config, sources, dlq_sink.clone(), schema, metrics);

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    consumer.run(cancel).await?;
    dlq_sink.flush(Duration::from_secs(10))?;

    tracing::info!("👋 Consumer stopped");
    Ok(())
}

/// create -> confirm -> ship -> cancel for one order, like a client of the
/// order service would drive it.
async fn publish_lifecycle(events: &OrderEvents) -> anyhow::Result<()> {
    let order = Order::new(
        "customer-1",
        "customer-1@example.com",
        "Mechanical Keyboard",
        2,
        149.98,
    );
    tracing::info!(order_id = %order.id, "📝 Demonstrating order lifecycle");

    let outcome = events.order_created(&order)?.await;
    tracing::info!("✅ Order created: {} ({})", order.id, outcome);

    let (confirmed, delivery) = events.status_changed(&order, OrderStatus::Confirmed)?;
    tracing::info!("✅ Order confirmed: {} ({})", confirmed.id, delivery.await);

    let (shipped, delivery) = events.status_changed(&confirmed, OrderStatus::Shipped)?;
    tracing::info!("✅ Order shipped: {} ({})", shipped.id, delivery.await);

    let (cancelled, delivery) = events.order_cancelled(&shipped)?;
    tracing::info!("✅ Order cancelled: {} ({})", cancelled.id, delivery.await);

    Ok(())
}

// === demo: publish a lifecycle to Kafka ===
async fn demo_kafka(config: &PipelineConfig, schema: Arc<SchemaContext>, metrics: Arc<Metrics>) -> anyhow::Result<()> {
    let sink = Arc::new(KafkaSink::new(config)?);
    let events = OrderEvents::new(Publisher::new(sink, schema, config, metrics));

    publish_lifecycle(&events).await?;
    events.publisher().flush(Duration::from_secs(10));

    tracing::info!("🎉 Demo complete! Run `order-events consume` to see the notifications");
    Ok(())
}

// === demo --in-memory: full pipeline without a broker ===
async fn demo_in_memory(config: &PipelineConfig, schema: Arc<SchemaContext>, metrics: Arc<Metrics>) -> anyhow::Result<()> {
    let broker = InMemoryBroker::new(3);
    let sink: Arc<dyn EventSink> = Arc::new(broker.clone());

    let sources = Arc::new(broker.source_factory(
        &config.consumer_group_id,
        &config.topics.order_events,
        config.consumer.workers,
    ));
    let consumer = consumer_loop(config, sources, sink.clone(), schema.clone(), metrics.clone());

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let token = cancel.clone();
    let running = tokio::spawn(async move { consumer.run(token).await });

    let events = OrderEvents::new(Publisher::new(sink, schema, config, metrics.clone()));
    publish_lifecycle(&events).await?;

    // Wait a bit for the consumer to catch up
    let published = broker.records(&config.topics.order_events).len() as u64;
    for _ in 0..50 {
        if metrics.offsets_committed.get() >= published {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    cancel.cancel();
    running.await??;

    tracing::info!(
        committed = metrics.offsets_committed.get(),
        dead_lettered = broker.records(&config.topics.dead_letter).len(),
        "🎉 Demo complete!"
    );
    Ok(())
}

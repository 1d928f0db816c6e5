use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use everruns_consumer::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Messages seeded into the demo queue (override with SAMPLE_MESSAGES)
const DEFAULT_SAMPLE_MESSAGES: usize = 20;

/// Simulated processing time per message
const PROCESSING_TIME: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();

    // RUST_LOG wins; otherwise LOG_LEVEL applies to the consumer crates
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "debug".to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("everruns_consumer={log_level},everruns_sample_consumer={log_level}")
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("everruns-sample-consumer starting...");
    if let Ok(path) = dotenv {
        tracing::info!("Loaded .env from {:?}", path);
    }

    let config = ConsumerConfig::default()
        .with_concurrency(10)
        .with_max_messages_per_poll(5)
        .with_env_overrides();

    let queue = Arc::new(InMemoryQueue::new("sample").with_max_receive_count(5));
    let seeded = std::env::var("SAMPLE_MESSAGES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_SAMPLE_MESSAGES);
    for i in 0..seeded {
        let body = serde_json::json!({ "order_id": i, "amount": 10 * (i + 1) });
        queue.send(serde_json::to_vec(&body).context("Failed to encode sample message")?);
    }
    tracing::info!(queue = %queue.name(), seeded, "Seeded sample queue");

    let handler = handler_fn(|ctx: HandlerContext, message: MessageEnvelope| async move {
        let body: serde_json::Value = message.decode_json()?;
        tracing::info!(
            slot = ctx.slot(),
            message_id = %message.message_id(),
            receive_count = message.receive_count(),
            %body,
            "Processing message"
        );
        tokio::time::sleep(PROCESSING_TIME).await;
        Ok(())
    });

    let consumer: Arc<dyn Component> = Arc::new(
        Consumer::new("sample-consumer", queue, Arc::new(handler), config)
            .context("Failed to create consumer")?,
    );

    let cancel = CancellationToken::new();
    let run = consumer.start(cancel.clone());
    tokio::pin!(run);

    // Run the consumer (blocks until shutdown or fatal failure)
    let result = tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
            consumer.stop();
            run.await
        }
    };

    if let Err(e) = result {
        tracing::error!(component = %consumer.name(), error = %e, "Consumer error");
        return Err(e).context("Consumer terminated");
    }

    tracing::info!("Consumer shutdown complete");
    Ok(())
}

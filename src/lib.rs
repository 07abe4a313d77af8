pub mod broker;
pub mod conf;
pub mod handler;
pub mod health;
pub mod logging;
pub mod message;
pub mod pipeline;
pub mod producer;
pub mod transform;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};

pub use crate::broker::{AckMode, AmqpBroker, Broker, InMemoryBroker, Settlement};
pub use crate::conf::Config;
pub use crate::handler::{ConsumerHandler, HandlerError, MessageHandler};
pub use crate::health::{
    HealthState, HealthStatus, SharedHealthState, run_health_server, shared_health_state,
};
pub use crate::logging::{LogFormat, init_logging};
pub use crate::message::Message;
pub use crate::pipeline::{Emitted, Pipeline, PipelineBuilder, PipelineError, Sink, Stage};
pub use crate::producer::Producer;
pub use crate::transform::{CaseMode, StdoutSink, normalizing_pipeline, processed_line, uppercase};

/// Declare `queue` and feed its deliveries through `pipeline` until the
/// subscription ends.
///
/// # Errors
/// Returns an error if the queue cannot be declared or the subscription fails
/// on the broker side. Handler failures are settled per `ack_mode` and do not
/// end the loop.
pub async fn run_consumer(
    broker: Arc<dyn Broker>,
    queue: &str,
    pipeline: Arc<Pipeline>,
    ack_mode: AckMode,
    health_state: SharedHealthState,
) -> Result<()> {
    broker
        .declare(queue)
        .await
        .context("Failed to declare queue")?;

    let handler = Arc::new(ConsumerHandler::new(pipeline).with_health(health_state.clone()));

    health_state.write().await.set(HealthStatus::Healthy);
    println!(" [*] Waiting for messages. To exit press CTRL+C");

    let result = broker.subscribe(queue, handler, ack_mode).await;
    if let Err(e) = &result {
        error!(event = "consumer_failed", error = %e, "Subscription ended with an error");
        health_state.write().await.set(HealthStatus::Unhealthy);
    }
    result
}

/// Connect to RabbitMQ and run the consumer and its health server until
/// `shutdown` completes.
///
/// # Errors
/// Returns an error if the broker is unreachable after the configured retries,
/// the health server fails, or the subscription fails.
pub async fn run_consumer_until<S>(
    config: Config,
    health_state: SharedHealthState,
    shutdown: S,
) -> Result<()>
where
    S: Future<Output = ()>,
{
    info!(
        event = "config_loaded",
        queue = %config.queue,
        ack_mode = config.ack_mode.as_str(),
        case_mode = ?config.case_mode,
        health_port = config.health_port,
        "Configuration loaded"
    );

    let health_server = run_health_server(config.health_port, health_state.clone());

    let consumer = async {
        let broker = match AmqpBroker::connect(
            &config.amqp_dsn,
            config.connect_retries,
            config.prefetch,
        )
        .await
        {
            Ok(broker) => broker,
            Err(e) => {
                health_state.write().await.set(HealthStatus::Unhealthy);
                return Err(e);
            }
        };

        let pipeline = Arc::new(normalizing_pipeline(config.case_mode, StdoutSink));
        run_consumer(
            Arc::new(broker),
            &config.queue,
            pipeline,
            config.ack_mode,
            health_state.clone(),
        )
        .await
    };

    tokio::pin!(health_server);
    tokio::pin!(consumer);
    tokio::pin!(shutdown);

    tokio::select! {
        result = &mut health_server => {
            result.context("Health server failed")?;
        }
        result = &mut consumer => {
            result.context("Consumer failed")?;
        }
        () = &mut shutdown => {
            info!(event = "shutdown_signal", "Received shutdown signal, exiting");
        }
    }

    Ok(())
}

/// Connect to RabbitMQ and publish until the configured limit or `shutdown`.
///
/// # Errors
/// Returns an error if the broker is unreachable or a publish fails.
pub async fn run_producer_until<S>(config: Config, shutdown: S) -> Result<()>
where
    S: Future<Output = ()>,
{
    info!(
        event = "config_loaded",
        queue = %config.queue,
        interval_ms = config.publish_interval.as_millis() as u64,
        max_messages = ?config.producer_max_messages,
        "Configuration loaded"
    );

    let broker = AmqpBroker::connect(&config.amqp_dsn, config.connect_retries, config.prefetch)
        .await?;
    let producer = Producer::new(
        Arc::new(broker),
        config.queue,
        config.producer_message,
        config.publish_interval,
    )
    .with_max_messages(config.producer_max_messages);

    tokio::select! {
        result = producer.run() => {
            let sent = result.context("Producer failed")?;
            info!(event = "producer_finished", sent, "Published all messages");
        }
        () = shutdown => {
            info!(event = "shutdown_signal", "Received shutdown signal, exiting");
        }
    }

    Ok(())
}

/// Future that resolves on Ctrl-C.
pub async fn ctrl_c() {
    let _ = tokio::signal::ctrl_c().await;
}

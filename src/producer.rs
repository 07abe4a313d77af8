use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::time;
use tracing::info;

use crate::broker::Broker;

/// Publishes a fixed body to one queue at a fixed interval.
pub struct Producer {
    broker: Arc<dyn Broker>,
    queue: String,
    body: String,
    interval: Duration,
    max_messages: Option<u64>,
}

impl Producer {
    pub fn new(
        broker: Arc<dyn Broker>,
        queue: impl Into<String>,
        body: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            broker,
            queue: queue.into(),
            body: body.into(),
            interval,
            max_messages: None,
        }
    }

    /// Stop after `max` messages instead of running forever.
    pub fn with_max_messages(mut self, max: Option<u64>) -> Self {
        self.max_messages = max;
        self
    }

    /// Declare the queue, then publish until `max_messages` is reached (or
    /// forever). Returns the number of messages published.
    ///
    /// # Errors
    /// Declaration and publish failures end the loop.
    pub async fn run(&self) -> anyhow::Result<u64> {
        self.broker
            .declare(&self.queue)
            .await
            .context("Failed to declare queue")?;

        let mut sent = 0u64;
        loop {
            self.broker
                .publish(&self.queue, self.body.as_bytes())
                .await
                .context("Failed to publish message")?;
            sent += 1;

            println!(" [x] Sent '{}'", self.body);
            info!(
                event = "message_sent",
                queue = %self.queue,
                sequence = sent,
                bytes = self.body.len(),
                "Sent message"
            );

            if self.max_messages.is_some_and(|max| sent >= max) {
                return Ok(sent);
            }

            time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;

    #[tokio::test(start_paused = true)]
    async fn publishes_on_interval_until_limit() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = Producer::new(
            broker.clone(),
            "input_queue",
            "Hello from Producer!",
            Duration::from_secs(2),
        )
        .with_max_messages(Some(3));

        let started = time::Instant::now();
        let sent = producer.run().await.unwrap();

        assert_eq!(sent, 3);
        assert_eq!(broker.pending("input_queue").await, Some(3));
        // Two sleeps between three publishes, none after the last.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(4) && elapsed < Duration::from_secs(6));
    }

    #[tokio::test]
    async fn publish_failure_ends_the_loop() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.close().await;
        let producer = Producer::new(broker, "input_queue", "x", Duration::from_millis(1));

        let err = producer.run().await.unwrap_err();
        assert!(format!("{err:#}").contains("Failed to publish message"));
    }
}

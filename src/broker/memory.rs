//! Process-local broker with RabbitMQ-like delivery semantics.
//!
//! Queues are FIFO. A requeued message goes back to the head of its queue
//! with `redelivered` set. [`InMemoryBroker::close`] ends every subscription
//! once its queue is drained.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info};

use super::{AckMode, Broker, Settlement};
use crate::handler::MessageHandler;
use crate::message::Message;

#[derive(Debug, Clone)]
struct Queued {
    body: Vec<u8>,
    redelivered: bool,
}

/// One delivery made by the broker, for inspection in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub queue: String,
    pub body: Vec<u8>,
    pub redelivered: bool,
    pub settlement: Settlement,
}

#[derive(Debug, Default)]
struct State {
    queues: HashMap<String, VecDeque<Queued>>,
    next_delivery_tag: u64,
    deliveries: Vec<DeliveryRecord>,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct InMemoryBroker {
    state: Mutex<State>,
    notify: Notify,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop accepting publishes; subscriptions return once their queue is empty.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    pub async fn queue_count(&self) -> usize {
        self.state.lock().await.queues.len()
    }

    /// Messages waiting in `queue`, or `None` if it was never declared.
    pub async fn pending(&self, queue: &str) -> Option<usize> {
        self.state.lock().await.queues.get(queue).map(VecDeque::len)
    }

    /// Every delivery made so far, in delivery order.
    pub async fn deliveries(&self) -> Vec<DeliveryRecord> {
        self.state.lock().await.deliveries.clone()
    }

    async fn next_delivery(&self, queue: &str) -> anyhow::Result<Option<Message>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                let queued = state
                    .queues
                    .get_mut(queue)
                    .ok_or_else(|| anyhow::anyhow!("queue '{queue}' has not been declared"))?
                    .pop_front();

                if let Some(queued) = queued {
                    state.next_delivery_tag += 1;
                    return Ok(Some(Message {
                        body: queued.body,
                        delivery_tag: state.next_delivery_tag,
                        redelivered: queued.redelivered,
                    }));
                }

                if state.closed {
                    return Ok(None);
                }
            }

            notified.await;
        }
    }

    async fn settle(&self, queue: &str, message: Message, settlement: Settlement) {
        let mut state = self.state.lock().await;
        state.deliveries.push(DeliveryRecord {
            queue: queue.to_string(),
            body: message.body.clone(),
            redelivered: message.redelivered,
            settlement,
        });

        if settlement == Settlement::Requeue {
            if let Some(q) = state.queues.get_mut(queue) {
                q.push_front(Queued {
                    body: message.body,
                    redelivered: true,
                });
            }
        }
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn declare(&self, queue: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.queues.entry(queue.to_string()).or_default();
        debug!(%queue, "Queue declared");
        Ok(())
    }

    async fn publish(&self, queue: &str, body: &[u8]) -> anyhow::Result<()> {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                anyhow::bail!("broker is closed");
            }
            state
                .queues
                .get_mut(queue)
                .ok_or_else(|| anyhow::anyhow!("queue '{queue}' has not been declared"))?
                .push_back(Queued {
                    body: body.to_vec(),
                    redelivered: false,
                });
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
        ack_mode: AckMode,
    ) -> anyhow::Result<()> {
        info!(
            event = "consumer_started",
            %queue,
            ack_mode = ack_mode.as_str(),
            "In-memory consumer started"
        );

        while let Some(message) = self.next_delivery(queue).await? {
            let outcome = handler.handle(&message).await;
            if let Err(e) = &outcome {
                error!(
                    event = "message_failed",
                    delivery_tag = message.delivery_tag,
                    error = %e,
                    "Failed to process message"
                );
            }

            let settlement = Settlement::decide(ack_mode, &outcome);
            self.settle(queue, message, settlement).await;
        }

        info!(event = "consumer_stopped", %queue, "Broker closed, consumer stopped");
        Ok(())
    }
}

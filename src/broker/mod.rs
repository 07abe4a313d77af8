//! Broker abstraction: idempotent queue declaration, fire-and-forget publish
//! and a sequential subscription loop that settles each delivery according to
//! an [`AckMode`].

pub mod amqp;
pub mod memory;

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::handler::{HandlerError, MessageHandler};

pub use amqp::AmqpBroker;
pub use memory::InMemoryBroker;

/// When a delivery is acknowledged relative to processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckMode {
    /// The broker forgets the message as soon as it is handed to the consumer.
    /// A failed handler loses it.
    #[default]
    BeforeProcess,
    /// Acknowledge only after the handler succeeds; failures are requeued
    /// (or discarded when the payload can never be decoded).
    AfterSuccess,
}

impl AckMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AckMode::BeforeProcess => "auto",
            AckMode::AfterSuccess => "after_success",
        }
    }
}

impl FromStr for AckMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "before_process" => Ok(AckMode::BeforeProcess),
            "after_success" | "manual" => Ok(AckMode::AfterSuccess),
            other => anyhow::bail!("unknown ack mode '{other}' (expected auto or after_success)"),
        }
    }
}

/// Broker action taken once a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Already acknowledged at delivery time.
    Nothing,
    Ack,
    /// Negative acknowledgment with requeue; the broker redelivers.
    Requeue,
    /// Reject without requeue.
    Discard,
}

impl Settlement {
    pub fn decide(ack_mode: AckMode, outcome: &Result<(), HandlerError>) -> Self {
        match (ack_mode, outcome) {
            (AckMode::BeforeProcess, _) => Settlement::Nothing,
            (AckMode::AfterSuccess, Ok(())) => Settlement::Ack,
            (AckMode::AfterSuccess, Err(HandlerError::Pipeline { .. })) => Settlement::Requeue,
            (AckMode::AfterSuccess, Err(HandlerError::Decode { .. })) => Settlement::Discard,
        }
    }
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare `queue` if it does not exist. Safe to call repeatedly.
    async fn declare(&self, queue: &str) -> anyhow::Result<()>;

    /// Publish `body` to `queue` without waiting for a broker confirmation.
    async fn publish(&self, queue: &str, body: &[u8]) -> anyhow::Result<()>;

    /// Deliver messages from `queue` to `handler` one at a time until the
    /// subscription ends.
    ///
    /// Handler failures are logged and settled per `ack_mode`; they never end
    /// the subscription. Broker-side failures do.
    async fn subscribe(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
        ack_mode: AckMode,
    ) -> anyhow::Result<()>;
}

use std::str::Utf8Error;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::health::SharedHealthState;
use crate::message::Message;
use crate::pipeline::{Emitted, Pipeline, PipelineError};

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("message {delivery_tag} is not valid UTF-8")]
    Decode {
        delivery_tag: u64,
        #[source]
        source: Utf8Error,
    },

    #[error("pipeline rejected message {delivery_tag}")]
    Pipeline {
        delivery_tag: u64,
        #[source]
        source: PipelineError,
    },
}

/// Called by a broker subscription once per delivery.
///
/// The broker owns the dispatch loop and the acknowledgment; the handler only
/// reports whether processing succeeded.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError>;
}

/// Decodes each delivery as text and emits it into a [`Pipeline`].
pub struct ConsumerHandler {
    pipeline: Arc<Pipeline>,
    health_state: Option<SharedHealthState>,
}

impl ConsumerHandler {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            health_state: None,
        }
    }

    /// Record processing outcomes in `health_state`.
    pub fn with_health(mut self, health_state: SharedHealthState) -> Self {
        self.health_state = Some(health_state);
        self
    }

    async fn record(&self, ok: bool) {
        if let Some(health_state) = &self.health_state {
            let mut state = health_state.write().await;
            if ok {
                state.messages_processed += 1;
                state.last_message_processed = Some(std::time::Instant::now());
            } else {
                state.messages_failed += 1;
            }
        }
    }
}

#[async_trait]
impl MessageHandler for ConsumerHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        info!(
            event = "message_received",
            bytes = message.body.len(),
            delivery_tag = message.delivery_tag,
            redelivered = message.redelivered,
            content = %message.preview(),
            "Received message"
        );

        let text = match message.text() {
            Ok(text) => text,
            Err(source) => {
                self.record(false).await;
                return Err(HandlerError::Decode {
                    delivery_tag: message.delivery_tag,
                    source,
                });
            }
        };

        match self.pipeline.emit(text) {
            Ok(Emitted::Delivered) => {
                self.record(true).await;
                Ok(())
            }
            Ok(Emitted::Dropped { stage }) => {
                debug!(delivery_tag = message.delivery_tag, %stage, "Message filtered out");
                self.record(true).await;
                Ok(())
            }
            Err(source) => {
                self.record(false).await;
                Err(HandlerError::Pipeline {
                    delivery_tag: message.delivery_tag,
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthState;
    use crate::transform::{CaseMode, normalizing_pipeline};
    use std::sync::Mutex;
    use tokio::sync::RwLock;

    fn recording_handler() -> (Arc<Mutex<Vec<String>>>, ConsumerHandler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let out = seen.clone();
        let pipeline = normalizing_pipeline(CaseMode::Unicode, move |v: &str| -> anyhow::Result<()> {
            out.lock().unwrap().push(v.to_string());
            Ok(())
        });
        (seen, ConsumerHandler::new(Arc::new(pipeline)))
    }

    #[tokio::test]
    async fn handle_decodes_and_emits() {
        let (seen, handler) = recording_handler();

        handler
            .handle(&Message::new("Hello from Producer!", 1))
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["HELLO FROM PRODUCER!"]);
    }

    #[tokio::test]
    async fn handle_reports_decode_failure() {
        let (seen, handler) = recording_handler();

        let err = handler
            .handle(&Message::new(vec![0xc3, 0x28], 9))
            .await
            .unwrap_err();

        assert!(matches!(err, HandlerError::Decode { delivery_tag: 9, .. }));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn handle_reports_stage_failure() {
        let pipeline = Pipeline::builder()
            .map("explode", |_| anyhow::bail!("stage fault"))
            .sink(|_: &str| -> anyhow::Result<()> { Ok(()) });
        let handler = ConsumerHandler::new(Arc::new(pipeline));

        let err = handler.handle(&Message::new("x", 3)).await.unwrap_err();

        match err {
            HandlerError::Pipeline {
                delivery_tag,
                source,
            } => {
                assert_eq!(delivery_tag, 3);
                assert_eq!(source.stage_name(), "explode");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn handle_updates_health_counters() {
        let (_, handler) = recording_handler();
        let health_state = Arc::new(RwLock::new(HealthState::default()));
        let handler = handler.with_health(health_state.clone());

        handler.handle(&Message::new("ok", 1)).await.unwrap();
        let _ = handler.handle(&Message::new(vec![0xff], 2)).await;

        let state = health_state.read().await;
        assert_eq!(state.messages_processed, 1);
        assert_eq!(state.messages_failed, 1);
        assert!(state.last_message_processed.is_some());
    }
}

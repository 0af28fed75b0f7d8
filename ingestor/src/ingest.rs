use crate::db::SampleSink;
use crate::errors::Result;
use crate::metrics::DROPPED_MESSAGES_TOTAL;
use crate::mqtt::{Message, MessageHandler};
use crate::payload::parse_payload;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

/// Parses each delivery and hands its batch to the sink.
///
/// Delivery is best effort: a message that fails to parse or store is
/// logged and dropped, never retried.
pub struct IngestHandler<S> {
    sink: Arc<S>,
}

impl<S: SampleSink> IngestHandler<S> {
    pub fn new(sink: Arc<S>) -> Self {
        Self { sink }
    }

    async fn process(&self, message: &Message) -> Result<u64> {
        let batch = parse_payload(&message.payload)?;
        info!(
            "Message received on {} - {} samples{}",
            message.topic,
            batch.len(),
            if message.meta.dup { " (redelivery)" } else { "" }
        );
        self.sink.save_samples(&batch).await
    }
}

#[async_trait]
impl<S: SampleSink + 'static> MessageHandler for IngestHandler<S> {
    async fn on_message(&self, message: Message) {
        if let Err(e) = self.process(&message).await {
            DROPPED_MESSAGES_TOTAL.inc();
            error!("Dropping message from {}: {}", message.topic, e);
        }
    }
}

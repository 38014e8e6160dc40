//! A thin wrapper around the event source queue.
//!
//! One queue message is one ingest batch. Messages are deleted only after
//! the batch's database transaction commits; anything else is left to the
//! queue's redelivery, which is safe under event deduplication.

use aws_sdk_sqs as sqs;
use aws_sdk_sqs::types::Message;

use crate::error::{Error, Result};

/// Longest long-poll wait the queue API allows.
const RECEIVE_WAIT_SECONDS: i32 = 20;

/// Messages fetched per receive call.
const RECEIVE_MAX_MESSAGES: i32 = 10;

/// A wrapper around the queue client which can be mocked.
#[derive(Debug, Clone)]
pub struct QueueClient {
    inner: sqs::Client,
    queue_url: String,
}

impl QueueClient {
    /// Wraps an existing queue client for one queue URL.
    #[must_use]
    pub fn new(inner: sqs::Client, queue_url: impl Into<String>) -> Self {
        Self {
            inner,
            queue_url: queue_url.into(),
        }
    }

    /// Creates a client from the ambient AWS configuration.
    pub async fn with_defaults(queue_url: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(sqs::Client::new(&config), queue_url)
    }

    /// The queue URL this client consumes from.
    #[must_use]
    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    /// Long-polls the queue for the next batch of messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the receive call fails.
    pub async fn receive(&self) -> Result<Vec<Message>> {
        let output = self
            .inner
            .receive_message()
            .queue_url(&self.queue_url)
            .wait_time_seconds(RECEIVE_WAIT_SECONDS)
            .max_number_of_messages(RECEIVE_MAX_MESSAGES)
            .send()
            .await
            .map_err(|e| Error::queue(format!("receive: {e}")))?;

        Ok(output.messages.unwrap_or_default())
    }

    /// Acknowledges a message after its batch committed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete call fails; the message will then be
    /// redelivered and deduplicated.
    pub async fn acknowledge(&self, receipt_handle: &str) -> Result<()> {
        self.inner
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| Error::queue(format!("delete: {e}")))?;

        Ok(())
    }
}

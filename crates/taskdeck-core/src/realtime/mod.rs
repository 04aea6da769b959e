//! Change notifications pushed by the remote store.

pub mod sse;
pub mod subscription;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::TaskResult;
use crate::models::ChangeRecord;

pub use sse::SseFeed;
pub use subscription::{ChangeSubscription, SubscriptionState};

/// Source of per-user change notifications.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open a stream of changes for `user_id`. Resolves once the feed has
    /// acknowledged the subscription.
    async fn open(&self, user_id: &str) -> TaskResult<FeedChannel>;
}

/// Receiver for delivered events.
pub trait ChangeSink: Send + Sync {
    fn deliver(&self, record: ChangeRecord);
}

/// An open feed. Dropping it stops whatever task is filling it.
pub struct FeedChannel {
    events: mpsc::Receiver<ChangeRecord>,
    forwarder: Option<JoinHandle<()>>,
}

impl FeedChannel {
    pub fn new(events: mpsc::Receiver<ChangeRecord>, forwarder: Option<JoinHandle<()>>) -> Self {
        Self { events, forwarder }
    }

    /// `None` once the feed is gone. A dropped connection looks exactly
    /// like a quiet one until then.
    pub async fn recv(&mut self) -> Option<ChangeRecord> {
        self.events.recv().await
    }
}

impl Drop for FeedChannel {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

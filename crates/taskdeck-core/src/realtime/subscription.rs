use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{ChangeFeed, ChangeSink, FeedChannel};
use crate::error::TaskResult;

/// `Closed → Opening → Active → Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Closed,
    Opening,
    Active,
}

/// One filtered change stream for the signed-in user.
///
/// At most one identity is subscribed at a time: opening for a new identity
/// tears the previous stream down (and waits for its pump to stop) before
/// the new one is requested. There is no reconnect loop; if the transport
/// drops, the subscription simply goes quiet.
pub struct ChangeSubscription {
    feed: Arc<dyn ChangeFeed>,
    user_id: Option<String>,
    state_tx: watch::Sender<SubscriptionState>,
    /// Signals the pump task to stop
    cancel_tx: Option<watch::Sender<bool>>,
    pump: Option<JoinHandle<()>>,
}

impl ChangeSubscription {
    pub fn new(feed: Arc<dyn ChangeFeed>) -> Self {
        let (state_tx, _) = watch::channel(SubscriptionState::Closed);
        Self {
            feed,
            user_id: None,
            state_tx,
            cancel_tx: None,
            pump: None,
        }
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SubscriptionState> {
        self.state_tx.subscribe()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    fn set_state(&self, state: SubscriptionState) {
        self.state_tx.send_replace(state);
    }

    /// Sign-in transition. A no-op when `user_id` is already subscribed.
    pub async fn open(&mut self, user_id: &str, sink: Arc<dyn ChangeSink>) -> TaskResult<()> {
        if self.user_id.as_deref() == Some(user_id) && self.state() != SubscriptionState::Closed {
            return Ok(());
        }

        // Never two identities at once
        self.close().await;

        self.set_state(SubscriptionState::Opening);
        self.user_id = Some(user_id.to_string());
        debug!(user_id, "opening change subscription");

        let channel = match self.feed.open(user_id).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!(user_id, error = %e, "change subscription failed to open");
                self.user_id = None;
                self.set_state(SubscriptionState::Closed);
                return Err(e);
            }
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.pump = Some(tokio::spawn(pump(channel, sink, cancel_rx)));
        self.cancel_tx = Some(cancel_tx);
        self.set_state(SubscriptionState::Active);
        info!(user_id, "change subscription active");
        Ok(())
    }

    /// Sign-out / identity-change transition.
    pub async fn close(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(true);
        }
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }

        if self.state() != SubscriptionState::Closed {
            info!(user_id = ?self.user_id, "change subscription closed");
            self.set_state(SubscriptionState::Closed);
        }
        self.user_id = None;
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

async fn pump(
    mut channel: FeedChannel,
    sink: Arc<dyn ChangeSink>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    break;
                }
            }
            record = channel.recv() => match record {
                Some(record) => sink.deliver(record),
                None => {
                    debug!("change feed ended");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::models::task::fixtures::make_task;
    use crate::models::ChangeRecord;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct FakeFeed {
        senders: Mutex<Vec<(String, mpsc::Sender<ChangeRecord>)>>,
        fail: AtomicBool,
    }

    impl FakeFeed {
        fn sender(&self, index: usize) -> mpsc::Sender<ChangeRecord> {
            self.senders.lock()[index].1.clone()
        }

        fn open_count(&self) -> usize {
            self.senders.lock().len()
        }
    }

    #[async_trait]
    impl ChangeFeed for FakeFeed {
        async fn open(&self, user_id: &str) -> TaskResult<FeedChannel> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(TaskError::transport("realtime unavailable"));
            }
            let (tx, rx) = mpsc::channel(16);
            self.senders.lock().push((user_id.to_string(), tx));
            Ok(FeedChannel::new(rx, None))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<ChangeRecord>>,
    }

    impl ChangeSink for RecordingSink {
        fn deliver(&self, record: ChangeRecord) {
            self.records.lock().push(record);
        }
    }

    async fn wait_for_records(sink: &RecordingSink, count: usize) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while sink.records.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("records not delivered");
    }

    #[tokio::test]
    async fn test_open_delivers_events() {
        let feed = Arc::new(FakeFeed::default());
        let sink = Arc::new(RecordingSink::default());
        let mut subscription = ChangeSubscription::new(feed.clone());
        assert_eq!(subscription.state(), SubscriptionState::Closed);

        subscription.open("user-1", sink.clone()).await.unwrap();
        assert_eq!(subscription.state(), SubscriptionState::Active);
        assert_eq!(subscription.user_id(), Some("user-1"));

        let record = ChangeRecord::inserted(&make_task("t1", "Buy milk", 100));
        feed.sender(0).send(record.clone()).await.unwrap();
        wait_for_records(&sink, 1).await;
        assert_eq!(sink.records.lock()[0], record);
    }

    #[tokio::test]
    async fn test_identity_change_closes_previous_stream_first() {
        let feed = Arc::new(FakeFeed::default());
        let sink = Arc::new(RecordingSink::default());
        let mut subscription = ChangeSubscription::new(feed.clone());

        subscription.open("user-1", sink.clone()).await.unwrap();
        let first = feed.sender(0);

        subscription.open("user-2", sink.clone()).await.unwrap();
        // The first pump has stopped and dropped its receiver
        assert!(first.is_closed());
        assert_eq!(feed.open_count(), 2);
        assert_eq!(subscription.user_id(), Some("user-2"));
        assert_eq!(subscription.state(), SubscriptionState::Active);
    }

    #[tokio::test]
    async fn test_same_identity_is_not_reopened() {
        let feed = Arc::new(FakeFeed::default());
        let sink = Arc::new(RecordingSink::default());
        let mut subscription = ChangeSubscription::new(feed.clone());

        subscription.open("user-1", sink.clone()).await.unwrap();
        subscription.open("user-1", sink).await.unwrap();
        assert_eq!(feed.open_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_open_returns_to_closed() {
        let feed = Arc::new(FakeFeed::default());
        feed.fail.store(true, Ordering::SeqCst);
        let mut subscription = ChangeSubscription::new(feed);
        let mut states = subscription.watch_state();

        let result = subscription
            .open("user-1", Arc::new(RecordingSink::default()))
            .await;
        assert!(matches!(result, Err(TaskError::Transport(_))));
        assert_eq!(subscription.state(), SubscriptionState::Closed);
        assert!(subscription.user_id().is_none());
        // Went through Opening on the way
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), SubscriptionState::Closed);
    }

    #[tokio::test]
    async fn test_close_stops_delivery() {
        let feed = Arc::new(FakeFeed::default());
        let sink = Arc::new(RecordingSink::default());
        let mut subscription = ChangeSubscription::new(feed.clone());

        subscription.open("user-1", sink.clone()).await.unwrap();
        let sender = feed.sender(0);
        subscription.close().await;

        assert_eq!(subscription.state(), SubscriptionState::Closed);
        assert!(sender.is_closed());
        assert!(sink.records.lock().is_empty());
    }
}

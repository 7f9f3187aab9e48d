//! Message channel: appends messages to a thread and keeps live, fully
//! ordered views of a thread's messages.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use futures_util::Stream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use alumnet_db::{ChangeEvent, Document, Filter, NewDocument, SharedStore, blocking};
use alumnet_types::models::ChatMessage;

use crate::error::{ChatError, ChatResult};
use crate::order::sort_messages;
use crate::resolver::{messages_path, validate_thread_id};

/// One emission of a live view: the whole ordered thread, or the terminal error.
pub type Snapshot = ChatResult<Vec<ChatMessage>>;

/// Lifecycle of a live view as seen by its consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    Unsubscribed = 0,
    Subscribing = 1,
    Live = 2,
}

impl ChannelState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Subscribing,
            2 => Self::Live,
            _ => Self::Unsubscribed,
        }
    }
}

#[derive(Clone)]
pub struct MessageChannel {
    store: SharedStore,
}

impl MessageChannel {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Appends a message with a server-assigned timestamp.
    ///
    /// Text that is empty after trimming is dropped without an error and
    /// without touching the store. The written message is not returned;
    /// subscribers see it on their next snapshot.
    pub async fn send(&self, thread_id: &str, sender_id: &str, text: &str) -> ChatResult<()> {
        if text.trim().is_empty() {
            debug!("Ignoring empty message for thread {}", thread_id);
            return Ok(());
        }
        validate_thread_id(thread_id)?;
        if sender_id.trim().is_empty() {
            return Err(ChatError::InvalidInput("missing sender id".into()));
        }

        let collection = messages_path(thread_id);
        let doc = NewDocument::new()
            .field("sender_id", sender_id)
            .field("text", text)
            .server_timestamp("timestamp");

        let id = blocking(&self.store, move |store| store.create(&collection, doc))
            .await
            .map_err(ChatError::store)?;

        debug!("{} sent message {} to thread {}", sender_id, id, thread_id);
        Ok(())
    }

    /// Current ordered messages of a thread, read once.
    pub async fn snapshot(&self, thread_id: &str) -> ChatResult<Vec<ChatMessage>> {
        validate_thread_id(thread_id)?;
        load_messages(&self.store, messages_path(thread_id)).await
    }

    /// Opens a live view of a thread.
    ///
    /// The first item is the state at subscription time; every later write
    /// under the thread yields a fresh, fully sorted sequence. Only the newest
    /// sequence is held, so a slow reader skips stale ones. A store error
    /// while setting up is returned here; one after setup arrives as a final
    /// `Err` item. Nothing is retried.
    pub async fn subscribe(&self, thread_id: &str) -> ChatResult<ThreadSubscription> {
        validate_thread_id(thread_id)?;

        let collection = messages_path(thread_id);
        let state = Arc::new(AtomicU8::new(ChannelState::Subscribing as u8));

        // Register on the feed before the first read so no write slips between
        let changes = self.store.watch();

        let initial = match load_messages(&self.store, collection.clone()).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Subscription to thread {} failed: {}", thread_id, e);
                state.store(ChannelState::Unsubscribed as u8, Ordering::Release);
                return Err(e);
            }
        };

        let (tx, rx) = watch::channel(None);
        tx.send_replace(Some(Ok(initial)));
        state.store(ChannelState::Live as u8, Ordering::Release);

        let cancel = CancellationToken::new();
        tokio::spawn(run_live_query(
            self.store.clone(),
            collection,
            changes,
            tx,
            cancel.clone(),
            state.clone(),
        ));

        debug!("Subscribed to thread {}", thread_id);
        Ok(ThreadSubscription {
            thread_id: thread_id.to_string(),
            rx: Some(rx),
            cancel,
            state,
        })
    }
}

/// Handle to a live thread view. Dropping it unsubscribes.
pub struct ThreadSubscription {
    thread_id: String,
    rx: Option<watch::Receiver<Option<Snapshot>>>,
    cancel: CancellationToken,
    state: Arc<AtomicU8>,
}

impl ThreadSubscription {
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn state(&self) -> ChannelState {
        if self.rx.is_none() {
            return ChannelState::Unsubscribed;
        }
        ChannelState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Waits for the newest snapshot not yet seen. `None` once unsubscribed
    /// or after the terminal error has been delivered.
    pub async fn recv(&mut self) -> Option<Snapshot> {
        loop {
            let rx = self.rx.as_mut()?;
            if rx.changed().await.is_err() {
                self.rx = None;
                return None;
            }
            let Some(item) = (*rx.borrow_and_update()).clone() else {
                continue;
            };
            if item.is_err() {
                self.rx = None;
            }
            return Some(item);
        }
    }

    /// Stops the live query. Idempotent; pending snapshots are discarded.
    pub fn unsubscribe(&mut self) {
        if self.rx.take().is_some() {
            debug!("Unsubscribed from thread {}", self.thread_id);
        }
        self.cancel.cancel();
        self.state
            .store(ChannelState::Unsubscribed as u8, Ordering::Release);
    }

    pub fn into_stream(self) -> impl Stream<Item = Snapshot> {
        futures_util::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|item| (item, sub))
        })
    }
}

impl Drop for ThreadSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_live_query(
    store: SharedStore,
    collection: String,
    mut changes: broadcast::Receiver<ChangeEvent>,
    tx: watch::Sender<Option<Snapshot>>,
    cancel: CancellationToken,
    state: Arc<AtomicU8>,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tx.closed() => break,
            event = changes.recv() => match event {
                Ok(change) if change.collection == collection => {}
                Ok(_) => continue,
                Err(RecvError::Lagged(n)) => {
                    // Snapshots are full re-reads, so a lag only costs a query
                    warn!("Change feed lagged by {} events on {}", n, collection);
                }
                Err(RecvError::Closed) => break,
            }
        }

        let result = load_messages(&store, collection.clone()).await;
        if cancel.is_cancelled() {
            break;
        }

        match result {
            Ok(messages) => {
                if tx.send(Some(Ok(messages))).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Live query on {} ended: {}", collection, e);
                let _ = tx.send(Some(Err(e)));
                break;
            }
        }
    }

    state.store(ChannelState::Unsubscribed as u8, Ordering::Release);
}

async fn load_messages(store: &SharedStore, collection: String) -> ChatResult<Vec<ChatMessage>> {
    let docs = blocking(store, move |store| store.query(&collection, &Filter::all()))
        .await
        .map_err(ChatError::store)?;

    let mut messages: Vec<ChatMessage> = docs.iter().filter_map(to_message).collect();
    sort_messages(&mut messages);
    Ok(messages)
}

fn to_message(doc: &Document) -> Option<ChatMessage> {
    let (Some(sender_id), Some(text)) = (doc.get_str("sender_id"), doc.get_str("text")) else {
        warn!("Skipping malformed message {}/{}", doc.collection, doc.id);
        return None;
    };

    Some(ChatMessage {
        id: doc.id.clone(),
        sender_id: sender_id.to_string(),
        text: text.to_string(),
        timestamp: doc.get_timestamp("timestamp"),
        seq: doc.seq,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::MessageOrder;
    use crate::testing::TestStore;
    use alumnet_db::DocumentStore;
    use std::time::Duration;

    fn channel() -> (Arc<TestStore>, MessageChannel) {
        let store = Arc::new(TestStore::new());
        let channel = MessageChannel::new(store.clone());
        (store, channel)
    }

    /// Receives until a snapshot holds `n` messages.
    async fn recv_len(sub: &mut ThreadSubscription, n: usize) -> Vec<ChatMessage> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let messages = sub.recv().await.expect("subscription ended").unwrap();
                if messages.len() == n {
                    return messages;
                }
            }
        })
        .await
        .expect("timed out waiting for snapshot")
    }

    fn texts(messages: &[ChatMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.text.as_str()).collect()
    }

    #[tokio::test]
    async fn conversation_is_emitted_in_send_order() {
        let (_store, channel) = channel();
        let mut sub = channel.subscribe("u1_u2").await.unwrap();
        assert_eq!(sub.state(), ChannelState::Live);
        assert!(recv_len(&mut sub, 0).await.is_empty());

        channel.send("u1_u2", "u1", "hello").await.unwrap();
        channel.send("u1_u2", "u2", "hi back").await.unwrap();

        let messages = recv_len(&mut sub, 2).await;
        assert_eq!(texts(&messages), vec!["hello", "hi back"]);
        assert_eq!(messages[0].sender_id, "u1");
        assert_eq!(messages[1].sender_id, "u2");
        assert!(messages.iter().all(|m| m.timestamp.is_some()));
    }

    #[tokio::test]
    async fn blank_text_never_reaches_the_store() {
        let (store, channel) = channel();

        channel.send("u1_u2", "u1", "").await.unwrap();
        channel.send("u1_u2", "u1", "  \n\t").await.unwrap();
        assert_eq!(store.calls(), 0);

        assert!(channel.snapshot("u1_u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_ids_are_invalid() {
        let (store, channel) = channel();
        assert!(matches!(
            channel.send("", "u1", "hi").await,
            Err(ChatError::InvalidInput(_))
        ));
        assert!(matches!(
            channel.send("u1_u2", " ", "hi").await,
            Err(ChatError::InvalidInput(_))
        ));
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn every_emission_is_ordered() {
        let (_store, channel) = channel();
        let mut sub = channel.subscribe("a_b").await.unwrap();

        for i in 0..20 {
            let sender = if i % 2 == 0 { "a" } else { "b" };
            channel.send("a_b", sender, &format!("m{}", i)).await.unwrap();
        }

        loop {
            let messages = sub.recv().await.unwrap().unwrap();
            let keys: Vec<_> = messages.iter().map(MessageOrder::of).collect();
            assert!(keys.windows(2).all(|w| w[0] <= w[1]));
            if messages.len() == 20 {
                let expected: Vec<String> = (0..20).map(|i| format!("m{}", i)).collect();
                assert_eq!(texts(&messages), expected);
                break;
            }
        }
    }

    #[tokio::test]
    async fn pending_timestamp_sorts_last_until_resolved() {
        let (store, channel) = channel();
        let path = messages_path("a_b");
        let mut sub = channel.subscribe("a_b").await.unwrap();

        // A write whose server timestamp has not landed yet
        let pending = store
            .inner()
            .create(&path, NewDocument::new().field("sender_id", "a").field("text", "early"))
            .unwrap();
        channel.send("a_b", "b", "later").await.unwrap();

        let messages = recv_len(&mut sub, 2).await;
        assert_eq!(texts(&messages), vec!["later", "early"]);
        assert!(messages[1].timestamp.is_none());

        store
            .inner()
            .update(
                &path,
                &pending,
                NewDocument::new().field("timestamp", "2000-01-01T00:00:00.000Z"),
            )
            .unwrap();

        let messages = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let messages = sub.recv().await.unwrap().unwrap();
                if messages.iter().all(|m| m.timestamp.is_some()) {
                    return messages;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(texts(&messages), vec!["early", "later"]);
    }

    #[tokio::test]
    async fn removed_messages_drop_out_of_the_next_emission() {
        let (store, channel) = channel();
        let path = messages_path("a_b");
        let mut sub = channel.subscribe("a_b").await.unwrap();

        channel.send("a_b", "a", "x").await.unwrap();
        channel.send("a_b", "b", "y").await.unwrap();
        let messages = recv_len(&mut sub, 2).await;
        assert_eq!(texts(&messages), vec!["x", "y"]);

        assert!(store.inner().delete(&path, &messages[0].id).unwrap());
        assert_eq!(texts(&recv_len(&mut sub, 1).await), vec!["y"]);
    }

    #[tokio::test]
    async fn slow_reader_gets_the_newest_sequence() {
        let (_store, channel) = channel();
        let mut sub = channel.subscribe("a_b").await.unwrap();
        recv_len(&mut sub, 0).await;

        for i in 0..200 {
            channel.send("a_b", "a", &format!("m{}", i)).await.unwrap();
        }
        // Let the live query work through every change before reading
        tokio::time::sleep(Duration::from_secs(1)).await;

        let latest = sub.recv().await.unwrap().unwrap();
        assert_eq!(latest.len(), 200);
        assert_eq!(latest.last().unwrap().text, "m199");

        let stale = tokio::time::timeout(Duration::from_millis(100), sub.recv()).await;
        assert!(stale.is_err(), "stale snapshot was queued");
    }

    #[tokio::test]
    async fn unsubscribe_stops_updates() {
        let (_store, channel) = channel();
        let mut sub = channel.subscribe("u1_u2").await.unwrap();
        recv_len(&mut sub, 0).await;

        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(sub.state(), ChannelState::Unsubscribed);

        channel.send("u1_u2", "u1", "anyone?").await.unwrap();
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn other_threads_do_not_emit() {
        let (_store, channel) = channel();
        let mut sub = channel.subscribe("a_b").await.unwrap();
        recv_len(&mut sub, 0).await;

        channel.send("a_c", "a", "elsewhere").await.unwrap();
        let quiet = tokio::time::timeout(Duration::from_millis(150), sub.recv()).await;
        assert!(quiet.is_err(), "unexpected emission for another thread");

        channel.send("a_b", "a", "here").await.unwrap();
        assert_eq!(texts(&recv_len(&mut sub, 1).await), vec!["here"]);
    }

    #[tokio::test]
    async fn setup_failure_is_reported_once() {
        let (store, channel) = channel();
        store.fail(true);

        let err = channel.subscribe("u1_u2").await.err().unwrap();
        assert_eq!(err.code(), "store_unavailable");
    }

    #[tokio::test]
    async fn failure_after_setup_ends_the_subscription() {
        let (store, channel) = channel();
        let mut sub = channel.subscribe("u1_u2").await.unwrap();
        recv_len(&mut sub, 0).await;

        store.fail(true);
        store
            .inner()
            .create(
                &messages_path("u1_u2"),
                NewDocument::new().field("sender_id", "u1").field("text", "x"),
            )
            .unwrap();

        let item = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(item, Err(ChatError::StoreUnavailable(_))));
        assert!(sub.recv().await.is_none());
        assert_eq!(sub.state(), ChannelState::Unsubscribed);
    }

    #[tokio::test]
    async fn stream_adapter_yields_snapshots() {
        use futures_util::StreamExt;

        let (_store, channel) = channel();
        channel.send("u1_u2", "u1", "hello").await.unwrap();

        let sub = channel.subscribe("u1_u2").await.unwrap();
        let mut stream = Box::pin(sub.into_stream());
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(texts(&first), vec!["hello"]);
    }
}

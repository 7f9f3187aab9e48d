use std::collections::HashMap;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use alumnet_chat::{ChatResult, MessageChannel};
use alumnet_types::events::GatewayEvent;

/// Routes events to one gateway connection and owns its thread
/// subscriptions. Each subscribed thread has a forwarding task that turns
/// snapshots into `ThreadSnapshot` events.
pub struct Dispatcher {
    outbound: mpsc::UnboundedSender<GatewayEvent>,
    forwarders: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(outbound: mpsc::UnboundedSender<GatewayEvent>) -> Self {
        Self {
            outbound,
            forwarders: Mutex::new(HashMap::new()),
        }
    }

    /// Queues an event for the client. Dropped silently once the
    /// connection is gone.
    pub fn emit(&self, event: GatewayEvent) {
        let _ = self.outbound.send(event);
    }

    /// Starts (or restarts) the live view of a thread. The first snapshot
    /// follows immediately. A failure to subscribe is returned and leaves
    /// any previous view of the thread stopped.
    pub async fn subscribe(&self, messages: &MessageChannel, thread_id: &str) -> ChatResult<()> {
        let mut forwarders = self.forwarders.lock().await;
        if let Some(previous) = forwarders.remove(thread_id) {
            previous.abort();
        }

        let mut subscription = messages.subscribe(thread_id).await?;
        let outbound = self.outbound.clone();
        let thread = thread_id.to_string();

        let handle = tokio::spawn(async move {
            while let Some(snapshot) = subscription.recv().await {
                let event = match snapshot {
                    Ok(messages) => GatewayEvent::ThreadSnapshot {
                        thread_id: thread.clone(),
                        messages,
                    },
                    Err(e) => {
                        warn!("Live view of thread {} failed: {}", thread, e);
                        let _ = outbound.send(GatewayEvent::Error {
                            code: e.code().to_string(),
                            message: e.to_string(),
                            thread_id: Some(thread.clone()),
                        });
                        let _ = outbound.send(GatewayEvent::Unsubscribed { thread_id: thread });
                        return;
                    }
                };
                if outbound.send(event).is_err() {
                    return;
                }
            }
        });

        forwarders.insert(thread_id.to_string(), handle);
        debug!("Forwarding thread {} ({} live)", thread_id, forwarders.len());
        Ok(())
    }

    /// Stops the live view of a thread. `false` if there was none.
    pub async fn unsubscribe(&self, thread_id: &str) -> bool {
        match self.forwarders.lock().await.remove(thread_id) {
            Some(handle) => {
                let live = !handle.is_finished();
                handle.abort();
                live
            }
            None => false,
        }
    }

    /// Threads with a running forwarder.
    pub async fn subscribed(&self) -> Vec<String> {
        let forwarders = self.forwarders.lock().await;
        let mut threads: Vec<String> = forwarders
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        threads.sort();
        threads
    }

    /// Stops every live view. Called when the connection closes.
    pub async fn shutdown(&self) {
        let mut forwarders = self.forwarders.lock().await;
        for (_, handle) in forwarders.drain() {
            handle.abort();
        }
    }
}

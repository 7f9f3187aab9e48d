use serde::{Deserialize, Serialize};

use crate::models::ChatMessage;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: String, email: String },

    /// Reply to `OpenThread`
    ThreadResolved {
        other_user_id: String,
        thread_id: String,
    },

    /// Full ordered message list of a subscribed thread.
    /// Always replaces whatever the client showed before.
    ThreadSnapshot {
        thread_id: String,
        messages: Vec<ChatMessage>,
    },

    /// The thread's live view ended (client request or terminal store error)
    Unsubscribed { thread_id: String },

    /// A command failed. `code` is one of `unauthenticated`, `invalid_input`,
    /// `not_found`, `forbidden`, `store_unavailable`.
    Error {
        code: String,
        message: String,
        thread_id: Option<String>,
    },
}

impl GatewayEvent {
    /// Returns the thread this event is about, if any.
    pub fn thread_id(&self) -> Option<&str> {
        match self {
            Self::ThreadResolved { thread_id, .. }
            | Self::ThreadSnapshot { thread_id, .. }
            | Self::Unsubscribed { thread_id } => Some(thread_id),
            Self::Error { thread_id, .. } => thread_id.as_deref(),
            Self::Ready { .. } => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Find or create the thread with another user
    OpenThread { other_user_id: String },

    /// Start receiving `ThreadSnapshot` events for a thread
    Subscribe { thread_id: String },

    /// Stop receiving snapshots for a thread
    Unsubscribe { thread_id: String },

    /// Append a message to a thread
    SendMessage { thread_id: String, text: String },
}

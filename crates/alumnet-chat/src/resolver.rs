//! Thread identity: maps an unordered pair of users to the one document
//! that holds their conversation.

use std::str::FromStr;

use serde_json::json;
use tracing::{debug, info};

use alumnet_db::{Direction, DocumentStore, Filter, NewDocument, SharedStore, blocking, transaction};
use alumnet_types::models::Thread;

use crate::error::{ChatError, ChatResult};

/// Collection holding thread documents.
pub const THREADS: &str = "chats";

/// Builds the thread key `"{first}_{second}"`.
pub fn canonical_key(first: &str, second: &str) -> String {
    format!("{}_{}", first, second)
}

/// Collection holding the messages of one thread.
pub fn messages_path(thread_id: &str) -> String {
    format!("{}/{}/messages", THREADS, thread_id)
}

/// How a missing thread gets created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ThreadStrategy {
    /// Look up `current_other`, then `other_current`, else create
    /// `current_other`. Two first contacts racing from opposite sides can
    /// end up with one thread each.
    #[default]
    Lazy,
    /// Lookup and create in one store transaction; new threads are keyed
    /// by the lexicographically smaller id first.
    Transactional,
}

impl FromStr for ThreadStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lazy" => Ok(Self::Lazy),
            "transactional" => Ok(Self::Transactional),
            other => Err(format!("unknown thread strategy '{}'", other)),
        }
    }
}

#[derive(Clone)]
pub struct ThreadResolver {
    store: SharedStore,
    strategy: ThreadStrategy,
}

impl ThreadResolver {
    pub fn new(store: SharedStore, strategy: ThreadStrategy) -> Self {
        Self { store, strategy }
    }

    /// Returns the id of the thread between the caller and `other_user_id`,
    /// creating it on first contact.
    ///
    /// No store access happens when the caller is unauthenticated or the ids
    /// are invalid.
    pub async fn resolve_thread(
        &self,
        current_user_id: Option<&str>,
        other_user_id: &str,
    ) -> ChatResult<String> {
        let current = current_user_id.ok_or(ChatError::Unauthenticated)?;
        validate_pair(current, other_user_id)?;

        let current = current.to_string();
        let other = other_user_id.to_string();
        let strategy = self.strategy;

        let (thread_id, created) = blocking(&self.store, move |store| match strategy {
            ThreadStrategy::Lazy => resolve_lazy(store, &current, &other),
            ThreadStrategy::Transactional => resolve_transactional(store, &current, &other),
        })
        .await
        .map_err(ChatError::store)?;

        if created {
            info!("Created thread {} ({:?})", thread_id, strategy);
        } else {
            debug!("Resolved existing thread {}", thread_id);
        }
        Ok(thread_id)
    }

    /// Loads a thread by id.
    pub async fn thread(&self, thread_id: &str) -> ChatResult<Thread> {
        validate_thread_id(thread_id)?;

        let id = thread_id.to_string();
        let doc = blocking(&self.store, move |store| store.get(THREADS, &id))
            .await
            .map_err(ChatError::store)?
            .ok_or_else(|| ChatError::NotFound(format!("thread {}", thread_id)))?;

        doc.decode::<Thread>().map_err(ChatError::store)
    }

    /// Threads the user takes part in, newest first.
    pub async fn list_threads(&self, user_id: &str) -> ChatResult<Vec<Thread>> {
        if user_id.trim().is_empty() {
            return Err(ChatError::InvalidInput("missing user id".into()));
        }

        let filter = Filter::all()
            .array_contains("participants", user_id)
            .order_by("created_at", Direction::Descending);

        let docs = blocking(&self.store, move |store| store.query(THREADS, &filter))
            .await
            .map_err(ChatError::store)?;

        docs.iter()
            .map(|doc| doc.decode::<Thread>().map_err(ChatError::store))
            .collect()
    }
}

/// True if `user_id` is one of the thread's participants.
pub fn is_participant(thread: &Thread, user_id: &str) -> bool {
    thread.participants.iter().any(|p| p == user_id)
}

fn validate_pair(current: &str, other: &str) -> ChatResult<()> {
    for id in [current, other] {
        if id.trim().is_empty() {
            return Err(ChatError::InvalidInput("missing user id".into()));
        }
        // `_` joins the pair in the thread key, so it must not occur in an id
        if id.contains(['/', '_']) {
            return Err(ChatError::InvalidInput(format!("malformed user id '{}'", id)));
        }
    }
    if current == other {
        return Err(ChatError::InvalidInput("cannot open a thread with yourself".into()));
    }
    Ok(())
}

pub(crate) fn validate_thread_id(thread_id: &str) -> ChatResult<()> {
    if thread_id.trim().is_empty() || thread_id.contains('/') {
        return Err(ChatError::InvalidInput(format!("malformed thread id '{}'", thread_id)));
    }
    Ok(())
}

fn new_thread(current: &str, other: &str) -> NewDocument {
    NewDocument::new()
        .field("participants", json!([current, other]))
        .server_timestamp("created_at")
}

fn resolve_lazy(store: &dyn DocumentStore, current: &str, other: &str) -> anyhow::Result<(String, bool)> {
    let forward = canonical_key(current, other);
    if store.get(THREADS, &forward)?.is_some() {
        return Ok((forward, false));
    }

    let reverse = canonical_key(other, current);
    if store.get(THREADS, &reverse)?.is_some() {
        return Ok((reverse, false));
    }

    store.set(THREADS, &forward, new_thread(current, other))?;
    Ok((forward, true))
}

fn resolve_transactional(
    store: &dyn DocumentStore,
    current: &str,
    other: &str,
) -> anyhow::Result<(String, bool)> {
    transaction(store, |tx| {
        // Threads made under the lazy strategy may sit at either key
        for key in [canonical_key(current, other), canonical_key(other, current)] {
            if tx.get(THREADS, &key)?.is_some() {
                return Ok((key, false));
            }
        }

        let key = if current <= other {
            canonical_key(current, other)
        } else {
            canonical_key(other, current)
        };
        tx.set(THREADS, &key, new_thread(current, other))?;
        Ok((key, true))
    })
}

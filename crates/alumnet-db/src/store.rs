use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use tokio::sync::broadcast;

use crate::filter::Filter;
use crate::models::{ChangeEvent, Document, NewDocument};

/// Generic document store over named collections.
///
/// A collection path has an odd number of `/`-separated segments
/// (`users`, `chats/{id}/messages`); a document is addressed by its
/// collection path plus a key. Calls block; async callers go through
/// [`blocking`].
pub trait DocumentStore: Send + Sync + 'static {
    /// Inserts under a freshly generated key and returns the key.
    fn create(&self, collection: &str, doc: NewDocument) -> Result<String>;

    /// Writes the document at `id`, replacing it if present.
    fn set(&self, collection: &str, id: &str, doc: NewDocument) -> Result<()>;

    fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>>;

    /// Merges fields into an existing document. `false` if it is absent.
    fn update(&self, collection: &str, id: &str, doc: NewDocument) -> Result<bool>;

    fn delete(&self, collection: &str, id: &str) -> Result<bool>;

    /// Runs `f` inside one atomic transaction. An `Err` from `f` rolls back.
    fn run_transaction(&self, f: &mut dyn FnMut(&dyn StoreTx) -> Result<()>) -> Result<()>;

    /// Subscribes to the feed of committed changes.
    fn watch(&self) -> broadcast::Receiver<ChangeEvent>;
}

/// Operations available inside a transaction.
pub trait StoreTx {
    fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;
    fn set(&self, collection: &str, id: &str, doc: NewDocument) -> Result<()>;
}

pub type SharedStore = Arc<dyn DocumentStore>;

/// Runs `f` in a transaction and hands back its result.
pub fn transaction<S, T, F>(store: &S, mut f: F) -> Result<T>
where
    S: DocumentStore + ?Sized,
    F: FnMut(&dyn StoreTx) -> Result<T>,
{
    let mut out = None;
    store.run_transaction(&mut |tx: &dyn StoreTx| {
        out = Some(f(tx)?);
        Ok(())
    })?;
    out.ok_or_else(|| anyhow!("transaction produced no result"))
}

/// Runs blocking store work off the async runtime.
pub async fn blocking<T, F>(store: &SharedStore, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn DocumentStore) -> Result<T> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
}

pub(crate) fn validate_collection(collection: &str) -> Result<()> {
    let segments: Vec<&str> = collection.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        bail!("Invalid collection path '{}': empty segment", collection);
    }
    if segments.len() % 2 == 0 {
        bail!("Invalid collection path '{}': points at a document", collection);
    }
    Ok(())
}

pub(crate) fn validate_key(collection: &str, id: &str) -> Result<()> {
    validate_collection(collection)?;
    if id.is_empty() || id.contains('/') {
        bail!("Invalid document key '{}' in '{}'", id, collection);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_paths() {
        assert!(validate_collection("users").is_ok());
        assert!(validate_collection("chats/a_b/messages").is_ok());
        assert!(validate_collection("chats/a_b").is_err());
        assert!(validate_collection("chats//messages").is_err());
        assert!(validate_collection("").is_err());

        assert!(validate_key("users", "u1").is_ok());
        assert!(validate_key("users", "").is_err());
        assert!(validate_key("users", "a/b").is_err());
    }

    #[tokio::test]
    async fn blocking_runs_on_the_store() {
        let store: SharedStore = Arc::new(crate::Database::open_in_memory().unwrap());
        let id = blocking(&store, |s| s.create("posts", NewDocument::new()))
            .await
            .unwrap();
        let found = blocking(&store, move |s| s.get("posts", &id)).await.unwrap();
        assert!(found.is_some());
    }
}

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, bail};
use tokio::sync::broadcast;

use alumnet_db::{ChangeEvent, Database, Document, DocumentStore, Filter, NewDocument, StoreTx};

/// In-memory store that counts calls and can be switched into failure mode.
/// The change feed keeps working while failing.
pub struct TestStore {
    inner: Database,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl TestStore {
    pub fn new() -> Self {
        Self {
            inner: Database::open_in_memory().unwrap(),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// Direct access that bypasses counting and failure injection.
    pub fn inner(&self) -> &Database {
        &self.inner
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        Ok(())
    }
}

impl DocumentStore for TestStore {
    fn create(&self, collection: &str, doc: NewDocument) -> Result<String> {
        self.enter()?;
        self.inner.create(collection, doc)
    }

    fn set(&self, collection: &str, id: &str, doc: NewDocument) -> Result<()> {
        self.enter()?;
        self.inner.set(collection, id, doc)
    }

    fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.enter()?;
        self.inner.get(collection, id)
    }

    fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        self.enter()?;
        self.inner.query(collection, filter)
    }

    fn update(&self, collection: &str, id: &str, doc: NewDocument) -> Result<bool> {
        self.enter()?;
        self.inner.update(collection, id, doc)
    }

    fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        self.enter()?;
        self.inner.delete(collection, id)
    }

    fn run_transaction(&self, f: &mut dyn FnMut(&dyn StoreTx) -> Result<()>) -> Result<()> {
        self.enter()?;
        self.inner.run_transaction(f)
    }

    fn watch(&self) -> broadcast::Receiver<ChangeEvent> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.watch()
    }
}

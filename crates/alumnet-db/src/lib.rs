pub mod filter;
pub mod migrations;
pub mod models;
mod queries;
pub mod store;

pub use filter::{Direction, Filter};
pub use models::{ChangeEvent, ChangeKind, Document, NewDocument};
pub use store::{DocumentStore, SharedStore, StoreTx, blocking, transaction};

use anyhow::Result;
use rusqlite::{Connection, TransactionBehavior};
use std::cell::RefCell;
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Capacity of the change feed. Slow subscribers that fall further behind
/// see `Lagged` and re-read their query.
const CHANGE_FEED_CAPACITY: usize = 1024;

/// SQLite-backed document store with a live change feed.
pub struct Database {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let db = Self::from_connection(conn)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Private, non-persistent database. Used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrations::run(&conn)?;

        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(Self {
            conn: Mutex::new(conn),
            changes,
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&mut conn)
    }

    /// Publishes a committed change. Having no subscribers is not an error.
    fn publish(&self, event: ChangeEvent) {
        debug!("{:?} {}/{}", event.kind, event.collection, event.id);
        let _ = self.changes.send(event);
    }
}

impl DocumentStore for Database {
    fn create(&self, collection: &str, doc: NewDocument) -> Result<String> {
        store::validate_collection(collection)?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        let event = self.with_conn(|conn| queries::insert_document(conn, collection, &id, doc))?;
        self.publish(event);
        Ok(id)
    }

    fn set(&self, collection: &str, id: &str, doc: NewDocument) -> Result<()> {
        store::validate_key(collection, id)?;
        let event = self.with_conn(|conn| queries::set_document(conn, collection, id, doc))?;
        self.publish(event);
        Ok(())
    }

    fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        store::validate_key(collection, id)?;
        self.with_conn(|conn| queries::get_document(conn, collection, id))
    }

    fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        store::validate_collection(collection)?;
        self.with_conn(|conn| queries::list_documents(conn, collection, filter))
    }

    fn update(&self, collection: &str, id: &str, doc: NewDocument) -> Result<bool> {
        store::validate_key(collection, id)?;
        match self.with_conn(|conn| queries::merge_document(conn, collection, id, doc))? {
            Some(event) => {
                self.publish(event);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        store::validate_key(collection, id)?;
        match self.with_conn(|conn| queries::delete_document(conn, collection, id))? {
            Some(event) => {
                self.publish(event);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn run_transaction(&self, f: &mut dyn FnMut(&dyn StoreTx) -> Result<()>) -> Result<()> {
        let events = self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let scope = SqliteTx {
                conn: &tx,
                events: RefCell::new(Vec::new()),
            };
            f(&scope)?;
            let events = scope.events.into_inner();
            tx.commit()?;
            Ok(events)
        })?;

        // Changes become visible only after commit
        for event in events {
            self.publish(event);
        }
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

/// Transaction scope handed to `run_transaction` closures. A dropped,
/// uncommitted transaction rolls back.
struct SqliteTx<'a> {
    conn: &'a Connection,
    events: RefCell<Vec<ChangeEvent>>,
}

impl StoreTx for SqliteTx<'_> {
    fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        store::validate_key(collection, id)?;
        queries::get_document(self.conn, collection, id)
    }

    fn set(&self, collection: &str, id: &str, doc: NewDocument) -> Result<()> {
        store::validate_key(collection, id)?;
        let event = queries::set_document(self.conn, collection, id, doc)?;
        self.events.borrow_mut().push(event);
        Ok(())
    }
}

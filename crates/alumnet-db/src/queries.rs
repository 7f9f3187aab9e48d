use anyhow::{Result, anyhow};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::{Map, Value};

use crate::filter::Filter;
use crate::models::{ChangeEvent, ChangeKind, Document, NewDocument};

// Every function here takes a plain `&Connection` so the same code runs
// inside and outside a transaction (`rusqlite::Transaction` derefs to it).

pub(crate) fn get_document(conn: &Connection, collection: &str, id: &str) -> Result<Option<Document>> {
    let mut stmt = conn.prepare_cached(
        "SELECT seq, data FROM documents WHERE collection = ?1 AND id = ?2",
    )?;

    let row = stmt
        .query_row([collection, id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })
        .optional()?;

    row.map(|(seq, data)| to_document(collection, id, seq, &data))
        .transpose()
}

pub(crate) fn list_documents(conn: &Connection, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, seq, data FROM documents WHERE collection = ?1 ORDER BY seq ASC",
    )?;

    let rows = stmt
        .query_map([collection], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let docs = rows
        .into_iter()
        .map(|(id, seq, data)| to_document(collection, &id, seq, &data))
        .collect::<Result<Vec<_>>>()?;

    Ok(filter.apply(docs))
}

pub(crate) fn insert_document(
    conn: &Connection,
    collection: &str,
    id: &str,
    doc: NewDocument,
) -> Result<ChangeEvent> {
    let data = Value::Object(doc.resolve(Utc::now())).to_string();
    conn.execute(
        "INSERT INTO documents (collection, id, data) VALUES (?1, ?2, ?3)",
        (collection, id, &data),
    )?;
    Ok(change(collection, id, ChangeKind::Added))
}

/// Writes the whole document, replacing any existing fields. An existing
/// document keeps its sequence number.
pub(crate) fn set_document(
    conn: &Connection,
    collection: &str,
    id: &str,
    doc: NewDocument,
) -> Result<ChangeEvent> {
    if get_document(conn, collection, id)?.is_none() {
        return insert_document(conn, collection, id, doc);
    }

    let data = Value::Object(doc.resolve(Utc::now())).to_string();
    conn.execute(
        "UPDATE documents
         SET data = ?3, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
         WHERE collection = ?1 AND id = ?2",
        (collection, id, &data),
    )?;
    Ok(change(collection, id, ChangeKind::Modified))
}

/// Merges fields into an existing document. Returns `None` if it is absent.
pub(crate) fn merge_document(
    conn: &Connection,
    collection: &str,
    id: &str,
    doc: NewDocument,
) -> Result<Option<ChangeEvent>> {
    let Some(existing) = get_document(conn, collection, id)? else {
        return Ok(None);
    };

    let mut data = existing.data;
    data.extend(doc.resolve(Utc::now()));
    let data = Value::Object(data).to_string();

    conn.execute(
        "UPDATE documents
         SET data = ?3, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
         WHERE collection = ?1 AND id = ?2",
        (collection, id, &data),
    )?;
    Ok(Some(change(collection, id, ChangeKind::Modified)))
}

pub(crate) fn delete_document(conn: &Connection, collection: &str, id: &str) -> Result<Option<ChangeEvent>> {
    let removed = conn.execute(
        "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
        (collection, id),
    )?;
    Ok((removed > 0).then(|| change(collection, id, ChangeKind::Removed)))
}

fn to_document(collection: &str, id: &str, seq: i64, data: &str) -> Result<Document> {
    let data: Map<String, Value> = match serde_json::from_str(data)? {
        Value::Object(map) => map,
        other => return Err(anyhow!("Corrupt document {}/{}: {}", collection, id, other)),
    };
    Ok(Document {
        collection: collection.to_string(),
        id: id.to_string(),
        seq,
        data,
    })
}

fn change(collection: &str, id: &str, kind: ChangeKind) -> ChangeEvent {
    ChangeEvent {
        collection: collection.to_string(),
        id: id.to_string(),
        kind,
    }
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

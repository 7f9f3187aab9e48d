/// Document types. These map directly to rows of the `documents` table.
/// Distinct from alumnet-types models so the store stays schema-free.
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// A stored document: its key, its collection path, the store's write
/// sequence number and the JSON fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub collection: String,
    pub id: String,
    pub seq: i64,
    pub data: Map<String, Value>,
}

impl Document {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }

    /// Reads an RFC 3339 timestamp field. Missing, null or unparsable
    /// values all read as `None`.
    pub fn get_timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        self.get_str(field)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Deserializes the fields into `T`, with the document key exposed as `id`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let mut data = self.data.clone();
        data.insert("id".into(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(data))
            .with_context(|| format!("decoding {}/{}", self.collection, self.id))
    }
}

/// Fields to write. Names listed in `server_timestamps` are filled in by the
/// store with the commit time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewDocument {
    pub fields: Map<String, Value>,
    pub server_timestamps: Vec<String>,
}

impl NewDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a document from any serializable struct. The `id` field, if
    /// present, is dropped: keys live outside the data.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self> {
        match serde_json::to_value(value)? {
            Value::Object(mut fields) => {
                fields.remove("id");
                Ok(Self { fields, server_timestamps: Vec::new() })
            }
            other => anyhow::bail!("document must be a JSON object, got {}", other),
        }
    }

    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn server_timestamp(mut self, name: &str) -> Self {
        self.server_timestamps.push(name.to_string());
        self
    }

    /// Resolves server timestamps against `now` and returns the final fields.
    pub(crate) fn resolve(self, now: DateTime<Utc>) -> Map<String, Value> {
        let mut fields = self.fields;
        let stamp = now.to_rfc3339_opts(SecondsFormat::Millis, true);
        for name in self.server_timestamps {
            fields.insert(name, Value::String(stamp.clone()));
        }
        fields
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// Published on the store's change feed after every committed write.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub collection: String,
    pub id: String,
    pub kind: ChangeKind,
}

use std::collections::HashMap;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use time::{Date, OffsetDateTime};

use crate::util::{parse_date, parse_datetime};

/// Wire shape of a row-level change record.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub pk_names: Option<Vec<String>>,
    #[serde(default)]
    pub is_ddl: bool,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub es: i64,
    #[serde(default)]
    pub ts: i64,
    #[serde(default)]
    pub sql: String,
    #[serde(default)]
    pub data: Option<Vec<HashMap<String, Value>>>,
    #[serde(default)]
    pub old: Option<Vec<HashMap<String, Value>>>,
    #[serde(default)]
    pub sql_type: Option<HashMap<String, Value>>,
    #[serde(default)]
    pub mysql_type: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Insert,
    Update,
    Delete,
}

impl Op {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Some(Op::Insert),
            "UPDATE" => Some(Op::Update),
            "DELETE" => Some(Op::Delete),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Op::Insert => "insert",
            Op::Update => "update",
            Op::Delete => "delete",
        }
    }
}

/// Textual column values with total coercions. A missing or unparseable
/// value coerces to zero or empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: HashMap<String, Option<String>>,
}

impl Row {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            columns: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), Some(value.into())))
                .collect(),
        }
    }

    fn from_wire(raw: HashMap<String, Value>) -> Self {
        let columns = raw
            .into_iter()
            .map(|(key, value)| {
                let text = match value {
                    Value::Null => None,
                    Value::String(text) => Some(text),
                    other => Some(other.to_string()),
                };
                (key, text)
            })
            .collect();
        Self { columns }
    }

    /// True when the column is present, even with a null value. On a
    /// before-image this means the column changed.
    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub fn raw(&self, column: &str) -> Option<&str> {
        self.columns.get(column).and_then(|value| value.as_deref())
    }

    pub fn string(&self, column: &str) -> String {
        self.raw(column).unwrap_or_default().to_string()
    }

    pub fn u64(&self, column: &str) -> u64 {
        self.raw(column)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn i64(&self, column: &str) -> i64 {
        self.raw(column)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn i32(&self, column: &str) -> i32 {
        self.raw(column)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn bool(&self, column: &str) -> bool {
        matches!(
            self.raw(column).map(str::trim),
            Some("1") | Some("true") | Some("TRUE")
        )
    }

    pub fn date(&self, column: &str) -> Option<Date> {
        self.raw(column).and_then(parse_date)
    }

    pub fn datetime(&self, column: &str) -> Option<OffsetDateTime> {
        self.raw(column).and_then(parse_datetime)
    }

    pub fn json<T>(&self, column: &str) -> T
    where
        T: DeserializeOwned + Default,
    {
        self.raw(column)
            .filter(|value| !value.trim().is_empty())
            .and_then(|value| serde_json::from_str(value).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutationEvent {
    pub table: String,
    pub op: Op,
    pub primary_key: Option<String>,
    pub after: Row,
    pub before: Option<Row>,
    /// Logical timestamp, used as the external version for the search index.
    pub ts: i64,
}

impl MutationEvent {
    pub fn new(table: impl Into<String>, op: Op, after: Row, ts: i64) -> Self {
        Self {
            table: table.into(),
            op,
            primary_key: None,
            after,
            before: None,
            ts,
        }
    }

    pub fn with_before(mut self, before: Row) -> Self {
        self.before = Some(before);
        self
    }

    /// Whether the update touched `column`. Inserts count as touching everything.
    pub fn changed(&self, column: &str) -> bool {
        match self.op {
            Op::Insert => true,
            Op::Delete => false,
            Op::Update => self
                .before
                .as_ref()
                .is_some_and(|before| before.contains(column)),
        }
    }

    /// `is_deleted` flipped from 0 to 1 in this update.
    pub fn is_soft_delete(&self) -> bool {
        if self.op != Op::Update {
            return false;
        }
        let Some(before) = self.before.as_ref() else {
            return false;
        };
        before.contains("is_deleted") && !before.bool("is_deleted") && self.after.bool("is_deleted")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    Malformed(String),
    TableMismatch { expected: String, actual: String },
    EmptyData,
    Ddl,
    UnknownType(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    Events(Vec<MutationEvent>),
    Skip(SkipReason),
}

/// Decodes one envelope into one event per after-image row.
pub fn decode(payload: &[u8], expected_table: &str) -> DecodeOutcome {
    let envelope: Envelope = match serde_json::from_slice(payload) {
        Ok(envelope) => envelope,
        Err(err) => return DecodeOutcome::Skip(SkipReason::Malformed(err.to_string())),
    };
    decode_envelope(envelope, expected_table)
}

pub fn decode_envelope(envelope: Envelope, expected_table: &str) -> DecodeOutcome {
    if envelope.is_ddl {
        return DecodeOutcome::Skip(SkipReason::Ddl);
    }
    if envelope.table != expected_table {
        return DecodeOutcome::Skip(SkipReason::TableMismatch {
            expected: expected_table.to_string(),
            actual: envelope.table,
        });
    }
    let Some(op) = Op::parse(&envelope.kind) else {
        return DecodeOutcome::Skip(SkipReason::UnknownType(envelope.kind));
    };
    let data = envelope.data.unwrap_or_default();
    if data.is_empty() {
        return DecodeOutcome::Skip(SkipReason::EmptyData);
    }

    let mut old = envelope.old.unwrap_or_default().into_iter();
    let pk_column = envelope
        .pk_names
        .as_ref()
        .and_then(|names| names.first().cloned());
    let events = data
        .into_iter()
        .map(|raw| {
            let after = Row::from_wire(raw);
            let before = old.next().map(Row::from_wire);
            let primary_key = pk_column
                .as_deref()
                .and_then(|column| after.raw(column))
                .map(str::to_string);
            MutationEvent {
                table: envelope.table.clone(),
                op,
                primary_key,
                after,
                before,
                ts: envelope.ts,
            }
        })
        .collect();
    DecodeOutcome::Events(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bytes(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn decodes_insert_with_coercions() {
        let payload = bytes(json!({
            "table": "likes",
            "type": "INSERT",
            "pkNames": ["id"],
            "isDdl": false,
            "ts": 1700,
            "data": [{
                "id": "11",
                "user_id": "7",
                "post_id": "42",
                "created_at": "2025-01-01 00:00:00",
                "score": "not-a-number",
                "media_info": "[{\"url\":\"a.png\"}]"
            }]
        }));
        let DecodeOutcome::Events(events) = decode(&payload, "likes") else {
            panic!("expected events");
        };
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.op, Op::Insert);
        assert_eq!(event.ts, 1700);
        assert_eq!(event.primary_key.as_deref(), Some("11"));
        assert_eq!(event.after.u64("post_id"), 42);
        assert_eq!(event.after.i64("score"), 0);
        assert_eq!(event.after.u64("missing"), 0);
        assert_eq!(
            event.after.datetime("created_at").unwrap().unix_timestamp(),
            1_735_689_600
        );
        let media: Vec<Value> = event.after.json("media_info");
        assert_eq!(media.len(), 1);
        let broken: Vec<Value> = event.after.json("score");
        assert!(broken.is_empty());
    }

    #[test]
    fn mismatched_table_and_empty_data_skip() {
        let other = bytes(json!({"table": "posts", "type": "INSERT", "data": [{"id": "1"}]}));
        assert!(matches!(
            decode(&other, "likes"),
            DecodeOutcome::Skip(SkipReason::TableMismatch { .. })
        ));
        let empty = bytes(json!({"table": "likes", "type": "DELETE", "data": []}));
        assert_eq!(
            decode(&empty, "likes"),
            DecodeOutcome::Skip(SkipReason::EmptyData)
        );
        assert!(matches!(
            decode(b"not json", "likes"),
            DecodeOutcome::Skip(SkipReason::Malformed(_))
        ));
    }

    #[test]
    fn before_image_drives_change_detection() {
        let payload = bytes(json!({
            "table": "post_comments",
            "type": "UPDATE",
            "old": [{"is_deleted": "0"}],
            "data": [{"id": "99", "is_deleted": "1", "status": "1"}]
        }));
        let DecodeOutcome::Events(events) = decode(&payload, "post_comments") else {
            panic!("expected events");
        };
        assert!(events[0].is_soft_delete());
        assert!(events[0].changed("is_deleted"));
        assert!(!events[0].changed("content_version"));
    }

    #[test]
    fn null_columns_are_present_but_empty() {
        let payload = bytes(json!({
            "table": "posts",
            "type": "update",
            "old": [{"content_version": null}],
            "data": [{"id": "5", "title": null}]
        }));
        let DecodeOutcome::Events(events) = decode(&payload, "posts") else {
            panic!("expected events");
        };
        assert!(events[0].changed("content_version"));
        assert_eq!(events[0].after.string("title"), "");
    }
}

//! # Change Events
//!
//! Row-change events as emitted by the database triggers.
//!
//! A trigger publishes one JSON object per changed row, e.g.
//!
//! ```text
//! {"table": "workouts", "action": "INSERT", "user_id": "u-1", "data": {...}}
//! ```
//!
//! Key spellings vary between trigger generations, so parsing accepts
//! `topic`/`table`, `action`/`operation`, `owner_id`/`user_id`/`userId`
//! and `payload`/`data`. When several spellings are present the first
//! non-null one in that order wins.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::{RealtimeError, RealtimeResult};

/// Kind of row change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// New row inserted
    Insert,
    /// Existing row updated
    Update,
    /// Row deleted
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Insert => "insert",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = RealtimeError;

    /// Case-insensitive, so `TG_OP` values (`INSERT`) parse directly.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insert" => Ok(Action::Insert),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            other => Err(RealtimeError::InvalidEvent(format!(
                "unknown action '{}'",
                other
            ))),
        }
    }
}

/// A validated row-change event.
///
/// Lives for a single delivery pass; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Topic (table) the row belongs to
    pub topic: String,
    /// What happened to the row
    pub action: Action,
    /// Owning user, if the row has one
    pub owner_id: Option<String>,
    /// Row data as published by the trigger
    pub payload: Value,
}

const TOPIC_KEYS: &[&str] = &["topic", "table"];
const ACTION_KEYS: &[&str] = &["action", "operation"];
const OWNER_KEYS: &[&str] = &["owner_id", "user_id", "userId"];
const PAYLOAD_KEYS: &[&str] = &["payload", "data"];

/// First non-null value among `keys`, in order
fn first_present<'a>(raw: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| raw.get(*key))
        .find(|value| !value.is_null())
}

fn string_field(raw: &Map<String, Value>, keys: &[&str], name: &str) -> RealtimeResult<Option<String>> {
    match first_present(raw, keys) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(RealtimeError::InvalidEvent(format!(
            "{} must be a string, got {}",
            name, other
        ))),
    }
}

impl ChangeEvent {
    /// Create an event
    pub fn new(
        topic: impl Into<String>,
        action: Action,
        owner_id: Option<String>,
        payload: Value,
    ) -> Self {
        Self {
            topic: topic.into(),
            action,
            owner_id,
            payload,
        }
    }

    /// Parse and validate a raw notification payload.
    pub fn parse(raw: &str) -> RealtimeResult<Self> {
        let raw: Map<String, Value> = serde_json::from_str(raw)
            .map_err(|e| RealtimeError::InvalidEvent(format!("malformed JSON: {}", e)))?;

        let topic = string_field(&raw, TOPIC_KEYS, "table")?
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RealtimeError::InvalidEvent("missing table".to_string()))?;

        let action = string_field(&raw, ACTION_KEYS, "action")?
            .ok_or_else(|| RealtimeError::InvalidEvent("missing action".to_string()))?
            .parse::<Action>()?;

        let owner_id = match first_present(&raw, OWNER_KEYS) {
            None => None,
            Some(Value::String(s)) => {
                let s = s.trim();
                (!s.is_empty()).then(|| s.to_string())
            }
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(other) => {
                return Err(RealtimeError::InvalidEvent(format!(
                    "owner id must be a string or number, got {}",
                    other
                )))
            }
        };

        Ok(Self {
            topic,
            action,
            owner_id,
            payload: first_present(&raw, PAYLOAD_KEYS)
                .cloned()
                .unwrap_or(Value::Null),
        })
    }
}

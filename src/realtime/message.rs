//! # Wire Messages
//!
//! Every frame is a JSON text frame shaped `{"event": <name>, "data": <payload>}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::event::Action;

/// Message from client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join the per-(user, table) room
    SubscribeToTable(String),

    /// Pull the most recent rows of a table
    RequestDataRefresh(String),

    /// Progress update to echo to the user's other devices
    WorkoutProgress(Value),

    /// Logged meal to echo to the user's other devices
    MealLogged(Value),
}

/// Message to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once after the handshake is accepted
    Connected {
        message: String,
        #[serde(rename = "userId")]
        user_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Wire payload is `{"table": "<topic>"}`, the same key
    /// `data_refresh` and `database_change` use.
    SubscriptionConfirmed {
        table: String,
    },

    SubscriptionError {
        message: String,
    },

    DataRefresh {
        table: String,
        data: Vec<Value>,
        timestamp: DateTime<Utc>,
    },

    DataRefreshError {
        message: String,
    },

    /// Full row change, owner only
    DatabaseChange {
        table: String,
        action: Action,
        data: Value,
    },

    /// Content-free change cue for everyone
    GlobalUpdate {
        #[serde(rename = "type")]
        kind: String,
        action: Action,
        timestamp: DateTime<Utc>,
    },

    WorkoutProgressUpdate(Value),

    MealUpdate(Value),

    /// Frame could not be understood
    Error {
        message: String,
    },
}

impl ServerMessage {
    /// Event name as it appears on the wire
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::Connected { .. } => "connected",
            ServerMessage::SubscriptionConfirmed { .. } => "subscription_confirmed",
            ServerMessage::SubscriptionError { .. } => "subscription_error",
            ServerMessage::DataRefresh { .. } => "data_refresh",
            ServerMessage::DataRefreshError { .. } => "data_refresh_error",
            ServerMessage::DatabaseChange { .. } => "database_change",
            ServerMessage::GlobalUpdate { .. } => "global_update",
            ServerMessage::WorkoutProgressUpdate(_) => "workout_progress_update",
            ServerMessage::MealUpdate(_) => "meal_update",
            ServerMessage::Error { .. } => "error",
        }
    }
}

/// Same-user updates relayed between a user's connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerUpdate {
    WorkoutProgress,
    MealLogged,
}

impl PeerUpdate {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerUpdate::WorkoutProgress => "workout_progress",
            PeerUpdate::MealLogged => "meal_logged",
        }
    }

    /// Build the outbound message, stamped with sender identity and time.
    pub fn into_message(self, payload: Value, user_id: &str, at: DateTime<Utc>) -> ServerMessage {
        let stamped = stamp(payload, user_id, at);
        match self {
            PeerUpdate::WorkoutProgress => ServerMessage::WorkoutProgressUpdate(stamped),
            PeerUpdate::MealLogged => ServerMessage::MealUpdate(stamped),
        }
    }
}

/// Merge `userId` and `timestamp` into an object payload; wrap anything
/// else under `data`.
fn stamp(payload: Value, user_id: &str, at: DateTime<Utc>) -> Value {
    let mut object = match payload {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("data".to_string(), other);
            map
        }
    };
    object.insert("userId".to_string(), Value::String(user_id.to_string()));
    object.insert("timestamp".to_string(), Value::String(at.to_rfc3339()));
    Value::Object(object)
}

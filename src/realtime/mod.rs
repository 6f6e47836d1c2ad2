//! # Real-Time Fan-out
//!
//! Pushes row changes from the database to authenticated WebSocket clients.
//!
//! ## Architecture
//!
//! - **Listener**: one `LISTEN` on the notify channel, parses change events
//! - **Router**: owner-scoped delivery plus a global change cue
//! - **Registry**: sessions and rooms behind one lock
//! - **WebSocket**: per-connection reader and writer
//!
//! Delivery is best-effort: a slow or closed client is skipped, never waited on.

pub mod errors;
pub mod event;
pub mod listener;
pub mod message;
pub mod registry;
pub mod router;
pub mod topics;
pub mod websocket;

pub use errors::{DeliveryError, RealtimeError, RealtimeResult};
pub use event::{Action, ChangeEvent};
pub use listener::{EventListener, FeedMessage, PostgresFeed};
pub use message::{ClientMessage, PeerUpdate, ServerMessage};
pub use registry::{
    outbound_channel, ConnectionId, ConnectionRegistry, DeliveryReport, OutboundReceiver,
    OutboundSender, RoomId, Session,
};
pub use router::{DispatchOutcome, EventRouter, RefreshPolicy};
pub use topics::AllowedTopics;
pub use websocket::{run_connection, DisconnectReason, CLOSE_GOING_AWAY};

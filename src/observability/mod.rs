//! Observability subsystem for rowcast
//!
//! - Structured logging (`tracing`, text or JSON lines)
//! - Operational counters
//! - Process runtime figures for `/metrics`
//!
//! # Usage
//!
//! ```ignore
//! use rowcast::observability::{init_logging, LogFormat, MetricsRegistry};
//!
//! init_logging("info", LogFormat::Json)?;
//!
//! let metrics = MetricsRegistry::new();
//! metrics.increment_events_received();
//! ```

pub mod logging;
pub mod metrics;
pub mod runtime;

pub use logging::{init_logging, LogFormat};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use runtime::{memory_usage, MemoryUsage};

//! # Utility Modules
//!
//! Supporting utilities shared by the server and client worlds.
//!
//! ## Components
//! - **Buffer Pool**: reusable byte buffers for the send and framing paths
//! - **Metrics**: per-world observability counters
//! - **Logging**: `tracing` subscriber setup from configuration

pub mod buffer_pool;
pub mod logging;
pub mod metrics;

pub use buffer_pool::{BufferPool, Pool};
pub use metrics::{Metrics, MetricsSnapshot};

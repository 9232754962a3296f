//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! resilience primitives produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters and gauges via the `metrics` facade)
//!
//! Consumers:
//!     → stdout (pretty or compact)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Logging is advisory; no resilience decision depends on it
//! - Metric updates are no-ops until a recorder is installed

pub mod logging;
pub mod metrics;

//! Guarded upstream subsystem.
//!
//! # Data Flow
//! ```text
//! GuardConfig.upstreams
//!     → registry.rs (one breaker per upstream name)
//!     → http.rs (reqwest client + base URL + request options)
//!     → guarded.rs (breaker → retry → call)
//! ```

pub mod guarded;
pub mod http;
pub mod registry;

pub use guarded::GuardedUpstream;
pub use http::{HttpUpstream, RequestOptions, UpstreamError};
pub use registry::UpstreamRegistry;

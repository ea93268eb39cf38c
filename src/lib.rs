//! A statsd client for pushing metrics from proxy runtime extensions over UDP.
//!
//! ## Basics
//!
//! `statsd-emitter` is a small, synchronous statsd client intended to be
//! embedded in runtime extensions of reverse proxies, where the host's
//! configuration language wants to emit counters, timers and gauges to a
//! statsd-compatible daemon running locally or remotely.
//!
//! ## High-level features
//!
//! - counters, timers and gauges in the standard statsd line format
//! - configurable key prefix/suffix applied to every metric
//! - lazy connection to the daemon, re-established automatically on the
//!   emission after a send failure
//!
//! ## Behavior
//!
//! This client makes some explicit trade-offs to accomplish its task:
//!
//! - Every operation is a blocking, synchronous call; there is no internal
//!   runtime, no batching and no sampling
//! - Each emitted metric is exactly one UDP datagram with no trailing
//!   newline
//! - Emission is best-effort: any failure drops the metric, reports it
//!   through the returned error and via [`tracing`], and never faults the
//!   host process
//! - A failed send tears the connection down; the next emission resolves
//!   and dials the daemon again, with no re-send of the dropped metric
//!
//! ## Usage
//!
//! ```no_run
//! use statsd_emitter::StatsdBuilder;
//!
//! // Configure the client once, during host initialization. The builder is
//! // the only mutation window; after build() the configuration is fixed.
//! let client = StatsdBuilder::new()
//!     .set_destination("stats.example.com", "8125")
//!     .set_prefix("web.")
//!     .build();
//!
//! // Emit from request handling. Keys and values are Options because host
//! // context may simply not have them; absent inputs drop the metric.
//! let _ = client.increment(Some("requests"));
//! let _ = client.timing(Some("latency"), Some(320));
//! let _ = client.gauge(Some("mem"), Some(333));
//! ```
//!
//! The client logs through [`tracing`]; install whatever subscriber the
//! host process uses to collect its diagnostics.
mod common;
pub use self::common::{
    EmitError, TransmitError, DEFAULT_HOST, DEFAULT_MAX_PACKET_SIZE, DEFAULT_PORT,
};

mod builder;
pub use self::builder::StatsdBuilder;

pub mod formatting;

mod connection;

mod client;
pub use self::client::StatsdClient;

//! goodput - TCP throughput measurement
//!
//! A client streams synthetic payload to a server over one or more TCP
//! connections and both ends report the achieved bandwidth, per interval and
//! in aggregate.
//!
//! # Features
//!
//! - Duration-bounded or exact byte-count transfers
//! - Periodic interval reports with nominal window labels
//! - Up to five parallel streams per client
//! - Application-level end-of-stream handshake
//! - Plain or JSON-lines output through a single serialized printer
//! - Asynchronous I/O using tokio

pub mod client;
pub mod config;
pub mod error;
pub mod interval_reporter;
pub mod measurements;
pub mod protocol;
pub mod server;

pub use client::Client;
pub use config::{Config, Mode, Unit};
pub use error::{Error, Result};
pub use interval_reporter::Reporter;
pub use measurements::StreamSummary;
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

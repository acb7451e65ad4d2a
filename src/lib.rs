//! perfmux - network performance test server
//!
//! Accepts control connections from test clients, negotiates one test per
//! `(remote address, protocol, test type)`, and measures the traffic the
//! client then sends to a set of well-known data-plane ports:
//!
//! - TCP bandwidth, TCP connections/s and TCP latency
//! - UDP packets/s
//! - HTTP bandwidth
//!
//! # Library Usage
//!
//! ```ignore
//! use perfmux::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = Server::new(ServerConfig::default());
//!     server.run().await
//! }
//! ```
//!
//! # Modules
//!
//! - [`control`] - Control channel handshake state machine
//! - [`tcp`], [`udp`], [`http`] - Data-plane handlers
//! - [`registry`] - Live test records
//! - [`stats`] - Result counters and latency percentiles
//! - [`serve`] - Listener wiring

pub mod config;
pub mod control;
pub mod http;
pub mod net;
pub mod protocol;
pub mod registry;
pub mod report;
pub mod serve;
pub mod session;
pub mod stats;
pub mod tcp;
pub mod udp;
pub mod ui;

pub use protocol::{SessionMessage, TestId, TestParam, TestProtocol, TestType};
pub use registry::{SessionTable, Test, TestRegistry};
pub use serve::{Ports, Server, ServerConfig};

//! Worker communication module.
//!
//! All database work happens on a background worker. The caller talks to it
//! over a single pair of message channels carrying JSON envelopes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Caller (Rust + Tokio)                       │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │                    ChannelTransport                       │  │
//! │  │  - Uninitialized → Handshaking → Ready → Closed           │  │
//! │  │  - Correlation IDs for concurrent requests                │  │
//! │  │  - Per-request timeouts                                   │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │                              │                                  │
//! │            outbound (JSON)   │   inbound (JSON)                 │
//! │                              ▼                                  │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │              Worker (background thread + SQLite)                │
//! │  start → ready, open → opfs file, exec → rows/changes, close    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use opfs_sql::worker::{handshake, ChannelTransport, Host, ThreadHost};
//! use opfs_sql::worker::protocol::OperationKind;
//!
//! let host = ThreadHost::new("/var/lib/opfs-sql");
//! let transport = ChannelTransport::new(host.spawn().await?, Duration::from_secs(30));
//! handshake::start(&transport, Duration::from_secs(10)).await?;
//!
//! let result = transport
//!     .send(OperationKind::Open, json!({"filename": "app.db", "vfs": "opfs"}))
//!     .await?;
//! ```

mod agent;
pub mod handshake;
mod host;
pub mod protocol;
mod registry;
mod transport;

pub use host::{Capabilities, Host, ThreadHost, WorkerChannel, WorkerHandle};
pub use registry::{CorrelationRegistry, Outcome};
pub use transport::{ChannelTransport, TransportState};

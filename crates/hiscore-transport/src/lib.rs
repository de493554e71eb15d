//! # hiscore-transport
//!
//! Transport abstraction layer for the hiscore realtime hub.
//!
//! The hub never touches sockets directly. A connection is split into a
//! [`FrameReader`] and a [`FrameWriter`] so that a client's read loop and
//! write loop can each own exactly one half:
//!
//! - **axum** - WebSocket upgrades handled by the HTTP server
//! - **memory** - channel-backed connections for tests and benchmarks
//!
//! ```rust,ignore
//! use hiscore_transport::{Connection, Inbound};
//!
//! async fn echo_pings(conn: Box<dyn Connection>) {
//!     let (mut writer, mut reader) = conn.split();
//!     while let Ok(Some(frame)) = reader.recv().await {
//!         if let Inbound::Ping = frame {
//!             let _ = writer.send_ping().await;
//!         }
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;
pub mod upgrade;

pub use traits::{Connection, FrameReader, FrameWriter, Inbound, TransportError};

pub use upgrade::AxumConnection;
pub use memory::{MemoryConnection, MemoryPeer, Outbound};

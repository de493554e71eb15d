//! # hiscore-core
//!
//! Realtime fan-out for the hiscore hub.
//!
//! ## Architecture
//!
//! ```text
//! Notifier ──┐
//!            ├──► Hub (control loop) ──► outbound queue ──► write loop ──► transport
//! read loop ─┘         ▲
//!     ▲                └── register / unregister / subscribe / unsubscribe
//!     └── transport
//! ```
//!
//! - [`Hub`]: single-writer registry of clients and topic memberships.
//!   Broadcasts never block; slow consumers are evicted.
//! - [`ClientSession`]: the read and write loops for one connection.
//! - [`Notifier`]: turns score and leaderboard events into broadcasts.

pub mod client;
pub mod hub;
pub mod notifier;
pub mod session;
pub mod topic;

pub use client::{ClientHandle, ClientId, ClientState};
pub use hub::{Hub, HubConfig, HubError, HubStats};
pub use notifier::Notifier;
pub use session::{ClientSession, SessionConfig};
pub use topic::{validate_topic_name, TopicName, MAX_TOPIC_NAME_LENGTH};

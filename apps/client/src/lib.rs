#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![deny(clippy::unwrap_used)]

//! Client side of office presence: keeps one participant connected to a room,
//! publishes its movement and mirrors everyone else's.

pub mod agent;
pub mod config;
mod connection;
pub mod error;
pub mod layout;
pub mod state;
pub mod transport;
pub mod view;

pub use agent::SyncAgent;
pub use config::{color_for, AgentConfig, RetryPolicy};
pub use error::SyncError;
pub use layout::MapLayout;
pub use movement_core::InputState;
pub use state::{ConnectionState, Indicator};
pub use transport::{Connector, Transport, WsConnector};
pub use view::{RemoteParticipant, ViewModel};

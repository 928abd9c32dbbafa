//! WebSocket Gateway
//!
//! Real-time communication via WebSocket connections.

pub mod gateway;
pub mod handler;
pub mod messages;

pub use gateway::{ConnectedClient, Gateway, Outbound};
pub use handler::{close_connection, open_connection, ws_handler};
pub use messages::{ClientEvent, RawFrame};

//! Event chat relay gateway.
//!
//! Accepts TCP clients, authenticates them against the identity gateway, and
//! keeps every participant of an event in sync with the event's full history.

pub mod broadcast;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use broadcast::{BroadcastEngine, PublishReport};
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use server::{GatewayConfig, GatewayState, serve, start_server};

//! Reconnecting WebSocket client for robot controller links.
//!
//! This crate provides:
//! - A WebSocket connection to a remote controller (`ws` or `wss`)
//! - Automatic reconnection with exponential backoff
//! - Typed dispatch of inbound JSON messages on their `type` field
//! - An event stream for diagnostic frontends (open/close/error/reconnect)
//!
//! The surrounding tooling (windows, forms, log panes) stays outside this
//! crate: it builds payloads, registers handlers, and renders events.

mod client;
mod config;
mod dispatch;
mod endpoint;
mod error;
mod tls;

pub use client::{LinkClient, LinkEvent, LinkState};
pub use config::{LinkConfig, ReconnectPolicy};
pub use dispatch::{HandlerRegistry, MessageHandler};
pub use endpoint::Endpoint;
pub use error::{LinkError, LinkResult};

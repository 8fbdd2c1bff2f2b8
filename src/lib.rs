//! Relays decoded EVM contract events to WebSocket subscribers, sharing one
//! upstream listener per (contract, event) across all interested clients.

pub mod config;
pub mod domain;
pub mod error;
pub mod relay;
pub mod server;
pub mod services;
pub mod websocket;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{Result, ServerError};
pub use relay::EventRelay;
pub use server::{routes, AppState};

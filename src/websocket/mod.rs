pub mod client_manager;
pub mod handler;

pub use client_manager::{Client, ClientManager, ClientSender};
pub use handler::{handle_connection, Session};

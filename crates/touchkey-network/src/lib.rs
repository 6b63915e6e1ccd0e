//! Socket transport for the presence signal.
//!
//! # Components
//!
//! - **BroadcastServer**: Unix socket server writing the current state to
//!   every client on connect and on every aggregate change
//! - **PresenceClient**: client decoding those lines, used by
//!   `touchkey watch`
//!
//! Both sides frame the `U2F_0\n` / `U2F_1\n` lines with
//! [`touchkey_protocol::PresenceCodec`].

mod client;
mod server;

pub use client::{ClientError, PresenceClient, PresenceClientConfig};
pub use server::{BroadcastServer, ConnectionInfo, ServerConfig, ServerError};

//! Multi-client chat over plain newline-delimited TCP.
//!
//! The server relays every line a client sends to all connected clients;
//! the client shows what it receives and sends what the user types.
//!
//! - [`connection`] reads and writes newline-terminated UTF-8 lines.
//! - [`registry`] keeps the set of active sessions and broadcasts to them.
//! - [`session`] drives one accepted connection from accept to teardown.
//! - [`server`] owns the listener and spawns a task per connection.
//! - [`client`] connects to a server and forwards lines to a display.
//! - [`display`] is the transcript sink the core writes to.
//! - [`cli`] and [`config`] cover the binary's flags and the shared port.

pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod display;
pub mod error;
pub mod registry;
pub mod server;
pub mod session;

pub use client::{Client, ConnectionState};
pub use error::ChatError;
pub use server::{Server, ServerHandle};

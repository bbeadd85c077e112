//! Estima Network Library
//!
//! TCP transport for estimation rooms.
//!
//! # Architecture
//!
//! - **Server**: hosts the [`RoomDirectory`], the authority for every room
//! - **Client**: connects to a server and streams its events
//! - **Protocol**: length-prefixed JSON messages tagged by event name
//!
//! # Usage
//!
//! ```ignore
//! let server = Server::start(ServerOptions::new(addr)).await?;
//!
//! let mut client = Client::connect(server.addr()).await?;
//! client.create_room("alice", Some("Sprint 12".into())).await?;
//!
//! while let Some(event) = client.next_event().await {
//!     match event {
//!         ClientEvent::Message(ServerMessage::RoomCreated(room)) => { /* handle */ }
//!         _ => {}
//!     }
//! }
//! ```

pub mod client;
pub mod directory;
pub mod error;
mod frame;
pub mod protocol;
pub mod server;

pub use client::{Client, ClientEvent, ConnectionState};
pub use directory::{RoomDirectory, ROOM_NOT_FOUND};
pub use error::{Error, Result};
pub use protocol::{ClientMessage, ServerMessage};
pub use server::{Server, ServerOptions};

/// Default port for Estima servers
pub const DEFAULT_PORT: u16 = 7341;

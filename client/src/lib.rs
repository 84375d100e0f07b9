//! Client-side library for the grid game: the connection handshake, the
//! per-tick receive-state/send-move exchange, and the decision logic of
//! the automated player.

pub mod bot;
pub mod connection;

pub use connection::{ClientError, Connection};

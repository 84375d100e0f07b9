//! # Game Server Library
//!
//! Authoritative server for the grid game: it owns the occupancy grid
//! and the player registry, keeps every connected client synchronized at
//! a fixed tick rate, and resolves all simultaneous moves into a single
//! consistent next state.
//!
//! ## Module Organization
//!
//! ### Config Module (`config`)
//! The startup configuration record: grid and display dimensions plus
//! the client capacity, loaded once from a TOML file with compiled-in
//! defaults.
//!
//! ### Game Module (`game`)
//! The canonical game state and the per-tick move resolution:
//! - the row-major occupancy grid and its invariant
//! - player spawn, elimination and trail bookkeeping
//! - the collision resolver (head-on pairs, bounds, occupied cells)
//!
//! ### Connection Module (`connection`)
//! Exclusive ownership of each client transport plus the registry keyed
//! by player id, with non-blocking framed send/receive primitives.
//!
//! ### Network Module (`network`)
//! The tick synchronizer and the pre-game acceptance window:
//! - broadcast → collect → timeout-evict → apply → advance, every tick
//! - the blocking per-connection handshake (name in, color out)
//! - the communication deadline that turns stragglers into removals
//!
//! ## Tick Model
//!
//! The loop is gated by a periodic timer at 10 ticks per second by
//! default. Within a tick all socket work is non-blocking and bounded by
//! the communication deadline; state mutation is strictly sequential, so
//! no tick's apply phase ever overlaps another's.

pub mod config;
pub mod connection;
pub mod game;
pub mod network;

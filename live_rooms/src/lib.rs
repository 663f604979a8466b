//! Coordination engine for ephemeral live-stream chat rooms.
//!
//! Rooms live in memory; membership changes and messages are fanned out to
//! connected clients over WebSockets and recorded in SQLite on a background
//! worker.

pub mod api;
pub mod channel;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod gateway;
pub mod housekeeping;
pub mod messages;
pub mod model;
pub mod outbox;
pub mod registry;
pub mod room;
pub mod rooms;
pub mod session;
pub mod typing;
pub mod ws;

pub use engine::{ChatEngine, Limits};
pub use error::{ErrorKind, RoomError, StoreError};
pub use gateway::PersistenceGateway;

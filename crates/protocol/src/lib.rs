//! Session event and state types for the keeper client.
//!
//! This crate contains the serde-serializable shapes of the notifications a
//! coordination-service session delivers to its watcher, plus the derived
//! connection status the client tracks from them.
//!
//! # Design Philosophy
//!
//! Types in this crate are pure data: no behavior beyond serialization and
//! the status transition table. Session lifecycle, retries and tracing live
//! in `keeper-rs`.

pub mod event;
pub mod status;

pub use event::*;
pub use status::*;

//! keeper: connection-state and retry layer for coordination-service sessions.
//!
//! The [`Client`] owns one remote session (ZooKeeper-style), recreates it
//! when the server expires it, lets callers wait with a bound for the session
//! to connect, and runs operations inside a [`RetryLoop`] driven by a
//! replaceable [`RetryPolicy`]. Every attempt is timed and reported to a
//! swappable [`TracerDriver`].
//!
//! The wire protocol is not part of this crate: sessions come from a
//! caller-supplied [`SessionFactory`] and are handed back as
//! [`RemoteSession`] trait objects, downcastable to the concrete client.

pub mod client;
pub mod config;
pub mod connection;
pub mod ensemble;
pub mod error;
pub mod retry;
pub mod session;
pub mod testing;
pub mod tracer;

pub use client::{Client, ClientBuilder};
pub use config::ClientConfig;
pub use connection::{ConnectionState, SessionWatcherRelay, WatcherGuard};
pub use ensemble::{EnsembleProvider, FixedEnsembleProvider};
pub use error::{Error, Result};
pub use keeper_protocol::{ConnectionStatus, EventType, KeeperState, WatchedEvent};
pub use retry::{RetryDecision, RetryLoop, RetryPolicy};
pub use session::{RemoteSession, SessionFactory, Watcher};
pub use tracer::{DefaultTracerDriver, NoopTracerDriver, SharedTracer, TimeTrace, TimedEvent, TracerDriver};

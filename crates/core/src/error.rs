//! Error types for the keeper client.

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the client, the connection state and retry loops.
#[derive(Debug, Error)]
pub enum Error {
	/// The session factory could not produce a session.
	#[error("failed to create session: {0}")]
	Connection(#[source] io::Error),

	/// The connection to the ensemble was lost or never came up in time.
	#[error("connection lost: {0}")]
	ConnectionLoss(String),

	/// The server expired the session.
	#[error("session expired")]
	SessionExpired,

	/// The session was moved to another server mid-request.
	#[error("session moved")]
	SessionMoved,

	/// The server did not answer before the operation timeout.
	#[error("operation timed out: {0}")]
	OperationTimeout(String),

	#[error("client has not been started")]
	NotStarted,

	#[error("client has already been started")]
	AlreadyStarted,

	/// A blocking wait was interrupted because the client was closed.
	#[error("interrupted while waiting for connection")]
	Interrupted,

	/// Non-retryable failure reported by an operation (bad version, missing node, ...).
	#[error("operation failed: {0}")]
	Operation(String),

	#[error("invalid configuration: {0}")]
	Config(String),

	#[error("I/O error: {0}")]
	Io(#[from] io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Transient failures a retry loop may absorb.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			Self::Connection(_) | Self::ConnectionLoss(_) | Self::SessionExpired | Self::SessionMoved | Self::OperationTimeout(_)
		)
	}

	pub fn is_interrupted(&self) -> bool {
		matches!(self, Self::Interrupted)
	}

	pub fn is_timeout(&self) -> bool {
		matches!(self, Self::OperationTimeout(_))
	}

	/// Shorthand for [`Error::ConnectionLoss`].
	pub fn connection_loss(message: impl Into<String>) -> Self {
		Self::ConnectionLoss(message.into())
	}

	/// Shorthand for [`Error::Operation`].
	pub fn operation(message: impl Into<String>) -> Self {
		Self::Operation(message.into())
	}
}

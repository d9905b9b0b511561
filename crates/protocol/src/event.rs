//! Watcher notifications delivered by a remote session.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of change a [`WatchedEvent`] reports.
///
/// `None` marks a session-level notification (connect, disconnect, expiry);
/// the other variants are node watches and never affect connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
	None,
	NodeCreated,
	NodeDeleted,
	NodeDataChanged,
	NodeChildrenChanged,
}

/// State of the session at the time an event was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeeperState {
	Disconnected,
	SyncConnected,
	AuthFailed,
	ConnectedReadOnly,
	SaslAuthenticated,
	Expired,
}

impl KeeperState {
	/// Returns `true` for states in which requests can be served.
	pub fn is_connected(self) -> bool {
		matches!(self, Self::SyncConnected | Self::ConnectedReadOnly)
	}
}

impl fmt::Display for KeeperState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Self::Disconnected => "disconnected",
			Self::SyncConnected => "sync-connected",
			Self::AuthFailed => "auth-failed",
			Self::ConnectedReadOnly => "connected-read-only",
			Self::SaslAuthenticated => "sasl-authenticated",
			Self::Expired => "expired",
		};
		f.write_str(name)
	}
}

/// A single notification from the session to its watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchedEvent {
	pub event_type: EventType,
	pub state: KeeperState,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub path: Option<String>,
}

impl WatchedEvent {
	/// Session-level event carrying only a state change.
	pub fn session(state: KeeperState) -> Self {
		Self {
			event_type: EventType::None,
			state,
			path: None,
		}
	}

	/// Node watch event for `path`, observed while the session is in `state`.
	pub fn node(event_type: EventType, state: KeeperState, path: impl Into<String>) -> Self {
		Self {
			event_type,
			state,
			path: Some(path.into()),
		}
	}

	/// Returns `true` when this event describes the session rather than a node.
	pub fn is_session_event(&self) -> bool {
		self.event_type == EventType::None
	}
}

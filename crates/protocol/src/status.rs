//! Connection status derived from session events.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::event::KeeperState;

/// Connectedness of a session as last reported by its watcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
	Connected,
	#[default]
	Disconnected,
	Expired,
}

impl ConnectionStatus {
	/// Status after a session-level event in `state` arrives.
	///
	/// `SaslAuthenticated` carries no connectivity information and keeps the
	/// current status.
	pub fn after(self, state: KeeperState) -> Self {
		match state {
			KeeperState::SyncConnected | KeeperState::ConnectedReadOnly => Self::Connected,
			KeeperState::Disconnected | KeeperState::AuthFailed => Self::Disconnected,
			KeeperState::Expired => Self::Expired,
			KeeperState::SaslAuthenticated => self,
		}
	}

	pub fn is_connected(self) -> bool {
		self == Self::Connected
	}

	/// Compact encoding for storage in an atomic.
	pub fn as_u8(self) -> u8 {
		match self {
			Self::Connected => 0,
			Self::Disconnected => 1,
			Self::Expired => 2,
		}
	}

	/// Inverse of [`ConnectionStatus::as_u8`]; unknown values decode as disconnected.
	pub fn from_u8(value: u8) -> Self {
		match value {
			0 => Self::Connected,
			2 => Self::Expired,
			_ => Self::Disconnected,
		}
	}
}

impl fmt::Display for ConnectionStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Connected => "connected",
			Self::Disconnected => "disconnected",
			Self::Expired => "expired",
		})
	}
}

//! Client configuration loaded from JSON.
//!
//! ```json
//! {
//!   "connectString": "zk1:2181,zk2:2181,zk3:2181",
//!   "sessionTimeoutMs": 60000,
//!   "connectionTimeoutMs": 15000
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 15_000;

/// Settings shared by every client built from the same file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
	/// Static ensemble address; ignored when an ensemble provider is supplied.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub connect_string: Option<String>,
	pub session_timeout_ms: u64,
	pub connection_timeout_ms: u64,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			connect_string: None,
			session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
			connection_timeout_ms: DEFAULT_CONNECTION_TIMEOUT_MS,
		}
	}
}

impl ClientConfig {
	pub fn new(connect_string: impl Into<String>) -> Self {
		Self {
			connect_string: Some(connect_string.into()),
			..Self::default()
		}
	}

	pub fn from_json_str(json: &str) -> Result<Self> {
		let config: Self = serde_json::from_str(json)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads and validates a JSON config file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let contents = std::fs::read_to_string(path.as_ref())?;
		Self::from_json_str(&contents)
	}

	pub fn validate(&self) -> Result<()> {
		if self.session_timeout_ms == 0 {
			return Err(Error::Config("sessionTimeoutMs must be greater than zero".into()));
		}
		if self.connect_string.as_deref().is_some_and(|s| s.trim().is_empty()) {
			return Err(Error::Config("connectString must not be empty".into()));
		}
		Ok(())
	}

	pub fn session_timeout(&self) -> Duration {
		Duration::from_millis(self.session_timeout_ms)
	}

	pub fn connection_timeout(&self) -> Duration {
		Duration::from_millis(self.connection_timeout_ms)
	}
}

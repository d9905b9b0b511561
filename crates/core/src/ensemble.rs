//! Sources of the ensemble connection string.

/// Supplies the address list used when a session is (re)created.
///
/// The value may change over the client's lifetime; it is read again every
/// time a session is created and never cached by the client.
pub trait EnsembleProvider: Send + Sync {
	fn connection_string(&self) -> String;
}

impl<F> EnsembleProvider for F
where
	F: Fn() -> String + Send + Sync,
{
	fn connection_string(&self) -> String {
		self()
	}
}

/// Provider for a static connection string such as `"zk1:2181,zk2:2181"`.
#[derive(Debug, Clone)]
pub struct FixedEnsembleProvider {
	connect_string: String,
}

impl FixedEnsembleProvider {
	pub fn new(connect_string: impl Into<String>) -> Self {
		Self {
			connect_string: connect_string.into(),
		}
	}
}

impl EnsembleProvider for FixedEnsembleProvider {
	fn connection_string(&self) -> String {
		self.connect_string.clone()
	}
}

//! Slot holding the single live session.

use std::io;
use std::sync::Arc;

use crate::session::RemoteSession;

/// The current session together with the address it was created against.
#[derive(Default)]
pub(super) struct HandleSlot {
	session: Option<Arc<dyn RemoteSession>>,
	connect_string: Option<String>,
}

impl HandleSlot {
	pub(super) fn session(&self) -> Option<Arc<dyn RemoteSession>> {
		self.session.clone()
	}

	pub(super) fn install(&mut self, session: Arc<dyn RemoteSession>, connect_string: String) {
		debug_assert!(self.session.is_none(), "previous session must be released first");
		self.session = Some(session);
		self.connect_string = Some(connect_string);
	}

	/// Returns `true` when a session exists and `current` differs from the
	/// address it was created with.
	pub(super) fn has_new_connection_string(&self, current: &str) -> bool {
		self.connect_string.as_deref().is_some_and(|used| used != current)
	}

	/// Releases the session, then closes it. The slot is empty afterwards
	/// even when closing fails.
	pub(super) async fn release(&mut self) -> io::Result<()> {
		self.connect_string = None;
		let Some(session) = self.session.take() else {
			return Ok(());
		};
		session.close().await
	}
}

//! The single watcher every session reports to.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Weak;

use keeper_protocol::{KeeperState, WatchedEvent};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::StateInner;
use crate::session::Watcher;

/// Receives raw session events, updates connection status, then forwards the
/// event to whichever parent watcher is installed at that moment.
pub struct SessionWatcherRelay {
	state: Weak<StateInner>,
}

impl SessionWatcherRelay {
	pub(super) fn new(state: Weak<StateInner>) -> Self {
		Self { state }
	}
}

impl Watcher for SessionWatcherRelay {
	fn process(&self, event: &WatchedEvent) {
		// Sessions can outlive their client; late events are dropped.
		let Some(state) = self.state.upgrade() else {
			return;
		};

		if event.is_session_event() {
			apply_session_event(&state, event.state);
		}

		let Some(parent) = state.parent_watcher() else {
			return;
		};
		if catch_unwind(AssertUnwindSafe(|| parent.process(event))).is_err() {
			error!(
				target = "keeper.connection",
				event_type = ?event.event_type,
				state = %event.state,
				"watcher panicked while processing event"
			);
		}
	}
}

impl fmt::Debug for SessionWatcherRelay {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SessionWatcherRelay")
			.field("attached", &(self.state.strong_count() > 0))
			.finish()
	}
}

fn apply_session_event(state: &StateInner, keeper_state: KeeperState) {
	let (previous, next) = state.transition(keeper_state);
	if previous.is_connected() != next.is_connected() {
		// A new connection attempt begins whenever connectedness flips.
		*state.connection_start.lock() = Instant::now();
	}

	match keeper_state {
		KeeperState::AuthFailed => {
			error!(target = "keeper.connection", "authentication failed");
		}
		KeeperState::Expired => {
			warn!(target = "keeper.connection", "session expired; it will be recreated on next use");
			state.mark_expired();
			state.tracer.count("session-expired", 1);
		}
		_ => {
			debug!(
				target = "keeper.connection",
				state = %keeper_state,
				%previous,
				status = %next,
				"session event"
			);
		}
	}
}

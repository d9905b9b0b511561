//! Connection state for a single coordination-service session.
//!
//! [`ConnectionState`] owns the live session handle, the factory used to
//! (re)create it, the ensemble provider, and the [`SessionWatcherRelay`] the
//! session reports to. Status is derived only from delivered events; the
//! remote side is never polled.
//!
//! # Expiration
//!
//! An `Expired` event marks the handle stale. The next call to
//! [`ConnectionState::session`] closes it and creates a fresh session against
//! the ensemble's current address, so callers only ever observe a short
//! disconnected period.
//!
//! # Watcher substitution
//!
//! The relay forwards every event to one parent watcher. The bounded wait in
//! the client temporarily replaces that watcher with one that also releases a
//! latch, using [`ConnectionState::install_temporary_watcher`]; the returned
//! guard puts the previous watcher back when dropped.

mod handle;
mod relay;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use keeper_protocol::{ConnectionStatus, KeeperState};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use self::handle::HandleSlot;
pub use self::relay::SessionWatcherRelay;
use crate::ensemble::EnsembleProvider;
use crate::error::{Error, Result};
use crate::session::{RemoteSession, SessionFactory, Watcher};
use crate::tracer::SharedTracer;

pub(crate) struct StateInner {
	status: AtomicU8,
	expired: AtomicBool,
	parent_watcher: Mutex<Option<Arc<dyn Watcher>>>,
	connection_start: Mutex<Instant>,
	handle: tokio::sync::Mutex<HandleSlot>,
	factory: Arc<dyn SessionFactory>,
	ensemble: Arc<dyn EnsembleProvider>,
	session_timeout: Duration,
	connection_timeout: Duration,
	tracer: SharedTracer,
}

impl StateInner {
	fn status(&self) -> ConnectionStatus {
		ConnectionStatus::from_u8(self.status.load(Ordering::Acquire))
	}

	fn store_status(&self, status: ConnectionStatus) {
		self.status.store(status.as_u8(), Ordering::Release);
	}

	/// Applies a session-level event; returns the status before and after.
	fn transition(&self, state: KeeperState) -> (ConnectionStatus, ConnectionStatus) {
		let raw = match self.status.fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
			Some(ConnectionStatus::from_u8(raw).after(state).as_u8())
		}) {
			Ok(raw) | Err(raw) => raw,
		};
		let previous = ConnectionStatus::from_u8(raw);
		(previous, previous.after(state))
	}

	fn mark_expired(&self) {
		self.expired.store(true, Ordering::Release);
	}

	fn parent_watcher(&self) -> Option<Arc<dyn Watcher>> {
		self.parent_watcher.lock().clone()
	}
}

/// Tracks connectedness of one session and hands out the live handle.
pub struct ConnectionState {
	inner: Arc<StateInner>,
	relay: Arc<SessionWatcherRelay>,
}

impl ConnectionState {
	/// Creates an idle connection state; no session exists until
	/// [`ConnectionState::start`] or [`ConnectionState::session`] is called.
	pub fn new(
		factory: Arc<dyn SessionFactory>,
		ensemble: Arc<dyn EnsembleProvider>,
		session_timeout: Duration,
		connection_timeout: Duration,
		watcher: Option<Arc<dyn Watcher>>,
		tracer: SharedTracer,
	) -> Self {
		let inner = Arc::new(StateInner {
			status: AtomicU8::new(ConnectionStatus::Disconnected.as_u8()),
			expired: AtomicBool::new(false),
			parent_watcher: Mutex::new(watcher),
			connection_start: Mutex::new(Instant::now()),
			handle: tokio::sync::Mutex::new(HandleSlot::default()),
			factory,
			ensemble,
			session_timeout,
			connection_timeout,
			tracer,
		});
		let relay = Arc::new(SessionWatcherRelay::new(Arc::downgrade(&inner)));
		Self { inner, relay }
	}

	pub fn is_connected(&self) -> bool {
		self.status().is_connected()
	}

	pub fn status(&self) -> ConnectionStatus {
		self.inner.status()
	}

	pub fn session_timeout(&self) -> Duration {
		self.inner.session_timeout
	}

	pub fn connection_timeout(&self) -> Duration {
		self.inner.connection_timeout
	}

	/// The watcher handed to every session this state creates.
	pub fn relay(&self) -> Arc<SessionWatcherRelay> {
		Arc::clone(&self.relay)
	}

	/// Creates the initial session.
	pub async fn start(&self) -> Result<()> {
		debug!(target = "keeper.connection", "starting");
		let mut slot = self.inner.handle.lock().await;
		self.reset(&mut slot).await.map(|_| ())
	}

	/// Releases the session. The handle is dropped even if closing it fails.
	pub async fn close(&self) -> Result<()> {
		debug!(target = "keeper.connection", "closing");
		let mut slot = self.inner.handle.lock().await;
		self.inner.expired.store(false, Ordering::Release);
		self.inner.store_status(ConnectionStatus::Disconnected);
		slot.release().await.map_err(Error::Io)
	}

	/// Returns the live session, recreating it first if it expired or its
	/// connection attempt outlived the session timeout.
	pub async fn session(&self) -> Result<Arc<dyn RemoteSession>> {
		let mut slot = self.inner.handle.lock().await;

		if self.inner.expired.swap(false, Ordering::AcqRel) {
			info!(target = "keeper.connection", "recreating expired session");
			return self.reset(&mut slot).await;
		}

		if !self.is_connected() {
			if let Some(session) = self.check_timeouts(&mut slot).await? {
				return Ok(session);
			}
		}

		match slot.session() {
			Some(session) => Ok(session),
			None => self.reset(&mut slot).await,
		}
	}

	/// Atomically installs `watcher` as the parent watcher and returns the
	/// one it replaced.
	pub fn substitute_parent_watcher(&self, watcher: Option<Arc<dyn Watcher>>) -> Option<Arc<dyn Watcher>> {
		std::mem::replace(&mut *self.inner.parent_watcher.lock(), watcher)
	}

	/// Installs the watcher built by `make` from the current parent watcher.
	///
	/// Construction and installation happen under the watcher lock, so no event
	/// can slip between reading the previous watcher and replacing it. The
	/// previous watcher is restored when the guard drops.
	pub fn install_temporary_watcher<F>(&self, make: F) -> WatcherGuard<'_>
	where
		F: FnOnce(Option<Arc<dyn Watcher>>) -> Arc<dyn Watcher>,
	{
		let mut parent = self.inner.parent_watcher.lock();
		let previous = parent.take();
		*parent = Some(make(previous.clone()));
		WatcherGuard {
			state: self,
			previous: Some(previous),
		}
	}

	/// Closes the current session (if any) and creates a new one against the
	/// ensemble's current address.
	async fn reset(&self, slot: &mut HandleSlot) -> Result<Arc<dyn RemoteSession>> {
		*self.inner.connection_start.lock() = Instant::now();
		self.inner.store_status(ConnectionStatus::Disconnected);

		if let Err(err) = slot.release().await {
			warn!(target = "keeper.connection", error = %err, "failed to close previous session");
		}

		let connect_string = self.inner.ensemble.connection_string();
		let watcher: Arc<dyn Watcher> = self.relay.clone();
		let session = self
			.inner
			.factory
			.create(&connect_string, self.inner.session_timeout, watcher)
			.await
			.map_err(|err| {
				error!(
					target = "keeper.connection",
					%connect_string,
					error = %err,
					"session factory failed"
				);
				Error::Connection(err)
			})?;

		debug!(
			target = "keeper.connection",
			%connect_string,
			session_id = session.session_id(),
			"session created"
		);
		slot.install(Arc::clone(&session), connect_string);
		Ok(session)
	}

	/// Applies the connection timeout while disconnected. Returns a fresh
	/// session when the old one was replaced.
	async fn check_timeouts(&self, slot: &mut HandleSlot) -> Result<Option<Arc<dyn RemoteSession>>> {
		let elapsed = self.inner.connection_start.lock().elapsed();
		let threshold = self.inner.session_timeout.min(self.inner.connection_timeout);
		if elapsed < threshold {
			return Ok(None);
		}

		let current = self.inner.ensemble.connection_string();
		if slot.has_new_connection_string(&current) {
			info!(target = "keeper.connection", %current, "ensemble address changed; recreating session");
			return self.reset(slot).await.map(Some);
		}

		if elapsed > self.inner.session_timeout {
			warn!(
				target = "keeper.connection",
				elapsed_ms = elapsed.as_millis() as u64,
				session_timeout_ms = self.inner.session_timeout.as_millis() as u64,
				"connection attempt outlived the session timeout; recreating session"
			);
			return self.reset(slot).await.map(Some);
		}

		error!(
			target = "keeper.connection",
			elapsed_ms = elapsed.as_millis() as u64,
			connection_timeout_ms = self.inner.connection_timeout.as_millis() as u64,
			"connection timed out"
		);
		self.inner.tracer.count("connections-timed-out", 1);
		Err(Error::connection_loss(format!(
			"not connected after {} ms",
			elapsed.as_millis()
		)))
	}
}

impl fmt::Debug for ConnectionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ConnectionState")
			.field("status", &self.status())
			.field("session_timeout", &self.inner.session_timeout)
			.field("connection_timeout", &self.inner.connection_timeout)
			.finish_non_exhaustive()
	}
}

/// Restores the previous parent watcher on drop.
#[must_use = "the previous watcher is restored as soon as the guard is dropped"]
pub struct WatcherGuard<'a> {
	state: &'a ConnectionState,
	previous: Option<Option<Arc<dyn Watcher>>>,
}

impl Drop for WatcherGuard<'_> {
	fn drop(&mut self) {
		if let Some(previous) = self.previous.take() {
			self.state.substitute_parent_watcher(previous);
		}
	}
}

#[cfg(test)]
mod tests;

//! In-memory fakes for exercising the client without an ensemble.
//!
//! # Example
//!
//! ```ignore
//! let (factory, controller) = FakeSessionFactoryBuilder::new().auto_connect(false).build();
//! let client = Client::builder()
//!     .connect_string("zk1:2181")
//!     .session_factory(factory)
//!     .retry_policy(|_: u32, _: Duration| RetryDecision::GiveUp)
//!     .build()?;
//! client.start().await?;
//!
//! controller.connect();
//! assert!(client.is_connected());
//! ```

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use keeper_protocol::{KeeperState, WatchedEvent};
use parking_lot::Mutex;

use crate::session::{RemoteSession, SessionFactory, Watcher};
use crate::tracer::{TimedEvent, TracerDriver};

/// Builder for a fake session factory and its controller.
pub struct FakeSessionFactoryBuilder {
	auto_connect: bool,
	failures: usize,
	fail_close: bool,
}

impl FakeSessionFactoryBuilder {
	pub fn new() -> Self {
		Self {
			auto_connect: true,
			failures: 0,
			fail_close: false,
		}
	}

	/// Deliver `SyncConnected` as soon as a session is created (default: on).
	pub fn auto_connect(mut self, enabled: bool) -> Self {
		self.auto_connect = enabled;
		self
	}

	/// Fail the first `count` create calls with `ConnectionRefused`.
	pub fn fail_first(mut self, count: usize) -> Self {
		self.failures = count;
		self
	}

	/// Make every session's `close` return an error.
	pub fn fail_close(mut self, enabled: bool) -> Self {
		self.fail_close = enabled;
		self
	}

	/// Returns the factory to hand to the client and a controller for
	/// delivering events and inspecting created sessions.
	pub fn build(self) -> (Arc<FakeSessionFactory>, FakeSessionController) {
		let shared = Arc::new(Shared {
			sessions: Mutex::new(Vec::new()),
			addresses: Mutex::new(Vec::new()),
			watcher: Mutex::new(None),
			auto_connect: AtomicBool::new(self.auto_connect),
			pending_failures: AtomicUsize::new(self.failures),
			fail_close: self.fail_close,
			next_id: AtomicI64::new(1),
		});

		let factory = Arc::new(FakeSessionFactory {
			shared: Arc::clone(&shared),
		});
		(factory, FakeSessionController { shared })
	}
}

impl Default for FakeSessionFactoryBuilder {
	fn default() -> Self {
		Self::new()
	}
}

struct Shared {
	sessions: Mutex<Vec<Arc<FakeSession>>>,
	addresses: Mutex<Vec<String>>,
	watcher: Mutex<Option<Arc<dyn Watcher>>>,
	auto_connect: AtomicBool,
	pending_failures: AtomicUsize,
	fail_close: bool,
	next_id: AtomicI64,
}

impl Shared {
	fn take_failure(&self) -> bool {
		self.pending_failures
			.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
			.is_ok()
	}
}

/// Session factory that creates [`FakeSession`]s.
pub struct FakeSessionFactory {
	shared: Arc<Shared>,
}

impl SessionFactory for FakeSessionFactory {
	fn create<'a>(
		&'a self,
		connect_string: &'a str,
		_session_timeout: Duration,
		watcher: Arc<dyn Watcher>,
	) -> BoxFuture<'a, io::Result<Arc<dyn RemoteSession>>> {
		Box::pin(async move {
			self.shared.addresses.lock().push(connect_string.to_string());
			if self.shared.take_failure() {
				return Err(io::Error::new(
					io::ErrorKind::ConnectionRefused,
					format!("fake ensemble refused {connect_string}"),
				));
			}

			let session = Arc::new(FakeSession {
				id: self.shared.next_id.fetch_add(1, Ordering::SeqCst),
				connect_string: connect_string.to_string(),
				closed: AtomicBool::new(false),
				fail_close: self.shared.fail_close,
			});
			self.shared.sessions.lock().push(Arc::clone(&session));
			*self.shared.watcher.lock() = Some(Arc::clone(&watcher));

			if self.shared.auto_connect.load(Ordering::Acquire) {
				watcher.process(&WatchedEvent::session(KeeperState::SyncConnected));
			}
			Ok(session as Arc<dyn RemoteSession>)
		})
	}
}

/// Delivers events to the most recently created session's watcher and
/// inspects what the factory produced.
pub struct FakeSessionController {
	shared: Arc<Shared>,
}

impl FakeSessionController {
	/// Deliver a raw event, as the session's event thread would.
	pub fn deliver(&self, event: WatchedEvent) {
		let watcher = self.shared.watcher.lock().clone();
		if let Some(watcher) = watcher {
			watcher.process(&event);
		}
	}

	pub fn connect(&self) {
		self.deliver(WatchedEvent::session(KeeperState::SyncConnected));
	}

	pub fn disconnect(&self) {
		self.deliver(WatchedEvent::session(KeeperState::Disconnected));
	}

	pub fn expire(&self) {
		self.deliver(WatchedEvent::session(KeeperState::Expired));
	}

	pub fn set_auto_connect(&self, enabled: bool) {
		self.shared.auto_connect.store(enabled, Ordering::Release);
	}

	/// Fail the next `count` create calls.
	pub fn fail_next(&self, count: usize) {
		self.shared.pending_failures.store(count, Ordering::Release);
	}

	/// Number of sessions successfully created.
	pub fn created(&self) -> usize {
		self.shared.sessions.lock().len()
	}

	/// Addresses passed to every create call, including failed ones.
	pub fn addresses(&self) -> Vec<String> {
		self.shared.addresses.lock().clone()
	}

	pub fn sessions(&self) -> Vec<Arc<FakeSession>> {
		self.shared.sessions.lock().clone()
	}

	/// The most recently created session.
	pub fn current(&self) -> Option<Arc<FakeSession>> {
		self.shared.sessions.lock().last().cloned()
	}
}

/// Session produced by [`FakeSessionFactory`].
#[derive(Debug)]
pub struct FakeSession {
	id: i64,
	connect_string: String,
	closed: AtomicBool,
	fail_close: bool,
}

impl FakeSession {
	pub fn connect_string(&self) -> &str {
		&self.connect_string
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}
}

impl RemoteSession for FakeSession {
	fn session_id(&self) -> i64 {
		self.id
	}

	fn close(&self) -> BoxFuture<'_, io::Result<()>> {
		Box::pin(async move {
			self.closed.store(true, Ordering::Release);
			if self.fail_close {
				return Err(io::Error::other("fake close failure"));
			}
			Ok(())
		})
	}
}

/// Tracer that keeps everything it receives.
#[derive(Debug, Default)]
pub struct RecordingTracer {
	events: Mutex<Vec<TimedEvent>>,
	counts: Mutex<HashMap<String, i64>>,
}

impl RecordingTracer {
	pub fn events(&self) -> Vec<TimedEvent> {
		self.events.lock().clone()
	}

	pub fn events_named(&self, name: &str) -> Vec<TimedEvent> {
		self.events.lock().iter().filter(|e| e.name == name).cloned().collect()
	}

	pub fn successes(&self) -> usize {
		self.events.lock().iter().filter(|e| e.success).count()
	}

	pub fn failures(&self) -> usize {
		self.events.lock().iter().filter(|e| !e.success).count()
	}

	/// Current value of counter `name` (zero if never touched).
	pub fn count(&self, name: &str) -> i64 {
		self.counts.lock().get(name).copied().unwrap_or(0)
	}
}

impl TracerDriver for RecordingTracer {
	fn add_trace(&self, event: &TimedEvent) {
		self.events.lock().push(event.clone());
	}

	fn add_count(&self, name: &str, delta: i64) {
		*self.counts.lock().entry(name.to_string()).or_insert(0) += delta;
	}
}

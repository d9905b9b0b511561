//! The client facade.
//!
//! [`Client`] composes the connection state, the current retry policy and
//! the current tracer, and owns the start/close lifecycle.
//!
//! # Example
//!
//! ```ignore
//! let client = Client::builder()
//!     .config(ClientConfig::load("keeper.json")?)
//!     .session_factory(Arc::new(MyFactory::default()))
//!     .retry_policy(|count: u32, _: Duration| {
//!         if count < 3 {
//!             RetryDecision::Retry { sleep: Duration::from_millis(500) }
//!         } else {
//!             RetryDecision::GiveUp
//!         }
//!     })
//!     .build()?;
//!
//! client.start().await?;
//! if !client.block_until_connected_or_timed_out().await? {
//!     warn!("ensemble not reachable yet");
//! }
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use keeper_protocol::{ConnectionStatus, WatchedEvent};
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::config::ClientConfig;
use crate::connection::ConnectionState;
use crate::ensemble::{EnsembleProvider, FixedEnsembleProvider};
use crate::error::{Error, Result};
use crate::retry::{RetryLoop, RetryPolicy};
use crate::session::{RemoteSession, SessionFactory, Watcher};
use crate::tracer::{DefaultTracerDriver, SharedTracer, TimeTrace, TracerDriver};

/// Longest single wait inside the bounded connection wait.
pub const POLL_SLICE: Duration = Duration::from_secs(1);

/// Smallest amount charged against the wait budget per iteration.
const MIN_ELAPSED: Duration = Duration::from_millis(1);

/// Name of the timed event recorded by the public bounded wait.
pub const BLOCK_TRACE: &str = "blockUntilConnectedOrTimedOut";

/// Managed session with retry and connection-wait support.
pub struct Client {
	state: ConnectionState,
	retry_policy: RwLock<Arc<dyn RetryPolicy>>,
	tracer: SharedTracer,
	connection_timeout: Duration,
	started: AtomicBool,
	closes: AtomicU64,
	interrupt: Notify,
}

impl Client {
	pub fn builder() -> ClientBuilder {
		ClientBuilder::default()
	}

	/// Creates the session. Must be called exactly once before use.
	///
	/// If the session cannot be created the client returns to the not-started
	/// state and `start` may be called again.
	pub async fn start(&self) -> Result<()> {
		debug!(target = "keeper.client", "starting");

		if self.started.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
			error!(target = "keeper.client", "already started");
			return Err(Error::AlreadyStarted);
		}

		if let Err(err) = self.state.start().await {
			self.started.store(false, Ordering::Release);
			return Err(err);
		}
		Ok(())
	}

	/// Closes the session and interrupts pending connection waits.
	///
	/// Safe to call repeatedly and before [`Client::start`]; failures are
	/// logged, never returned.
	pub async fn close(&self) {
		debug!(target = "keeper.client", "closing");

		self.started.store(false, Ordering::Release);
		self.closes.fetch_add(1, Ordering::AcqRel);
		self.interrupt.notify_waiters();

		if let Err(err) = self.state.close().await {
			error!(target = "keeper.client", error = %err, "failed to close session");
		}
	}

	pub fn is_started(&self) -> bool {
		self.started.load(Ordering::Acquire)
	}

	pub fn is_connected(&self) -> bool {
		self.state.is_connected()
	}

	pub fn status(&self) -> ConnectionStatus {
		self.state.status()
	}

	pub fn connection_timeout(&self) -> Duration {
		self.connection_timeout
	}

	/// Returns the managed session, recreating it if it expired.
	pub async fn session(&self) -> Result<Arc<dyn RemoteSession>> {
		if !self.is_started() {
			return Err(Error::NotStarted);
		}
		self.state.session().await
	}

	/// Waits up to the configured connection timeout for the session to
	/// connect. Returns the connection status at the end of the wait.
	pub async fn block_until_connected_or_timed_out(&self) -> Result<bool> {
		self.block_until_connected_within(self.connection_timeout).await
	}

	/// Same as [`Client::block_until_connected_or_timed_out`] with an explicit
	/// budget.
	///
	/// Fails with [`Error::NotStarted`] before start and with
	/// [`Error::Interrupted`] if the client is closed during the wait.
	pub async fn block_until_connected_within(&self, timeout: Duration) -> Result<bool> {
		// Read before the started check so a close racing with this call interrupts it.
		let epoch = self.close_epoch();
		if !self.is_started() {
			return Err(Error::NotStarted);
		}

		debug!(target = "keeper.client", timeout_ms = timeout.as_millis() as u64, "waiting for connection");
		let trace = self.start_trace(BLOCK_TRACE);

		self.wait_for_connection(timeout, epoch).await?;

		let connected = self.is_connected();
		trace.commit_with(connected);
		debug!(target = "keeper.client", connected, "finished waiting for connection");
		Ok(connected)
	}

	/// Creates a retry loop bound to the current retry policy.
	pub fn new_retry_loop(&self) -> RetryLoop {
		RetryLoop::new(self.retry_policy(), self.tracer.clone())
	}

	pub fn retry_policy(&self) -> Arc<dyn RetryPolicy> {
		Arc::clone(&self.retry_policy.read())
	}

	/// Replaces the retry policy for loops created from now on.
	pub fn set_retry_policy(&self, policy: Arc<dyn RetryPolicy>) {
		*self.retry_policy.write() = policy;
	}

	pub fn tracer_driver(&self) -> Arc<dyn TracerDriver> {
		self.tracer.get()
	}

	/// Replaces the tracer; running retry loops pick it up on their next commit.
	pub fn set_tracer_driver(&self, driver: Arc<dyn TracerDriver>) {
		self.tracer.set(driver);
	}

	/// Starts timing `name` against the current tracer.
	pub fn start_trace(&self, name: impl Into<String>) -> TimeTrace {
		TimeTrace::new(name, self.tracer.get())
	}

	/// Number of closes so far; a wait started at one epoch is interrupted
	/// once the counter moves.
	pub(crate) fn close_epoch(&self) -> u64 {
		self.closes.load(Ordering::Acquire)
	}

	/// Polls for connection in slices of at most [`POLL_SLICE`], waking early
	/// on any session event, until connected or `budget` is spent.
	///
	/// `epoch` must be read with [`Client::close_epoch`] before the caller
	/// checks that the client is started.
	pub(crate) async fn wait_for_connection(&self, budget: Duration, epoch: u64) -> Result<()> {
		let mut remaining = budget;

		while !self.state.is_connected() && !remaining.is_zero() {
			let interrupted = self.interrupt.notified();
			tokio::pin!(interrupted);
			interrupted.as_mut().enable();
			if self.close_epoch() != epoch {
				return Err(Error::Interrupted);
			}

			let latch = Arc::new(Notify::new());
			let guard = self.state.install_temporary_watcher(|previous| {
				Arc::new(LatchWatcher {
					previous,
					latch: Arc::clone(&latch),
				}) as Arc<dyn Watcher>
			});

			let began = Instant::now();
			let outcome = tokio::select! {
				biased;
				_ = &mut interrupted => Err(Error::Interrupted),
				_ = tokio::time::timeout(POLL_SLICE, latch.notified()) => Ok(()),
			};
			drop(guard);
			outcome?;

			remaining = remaining.saturating_sub(began.elapsed().max(MIN_ELAPSED));
		}
		Ok(())
	}
}

impl fmt::Debug for Client {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Client")
			.field("state", &self.state)
			.field("connection_timeout", &self.connection_timeout)
			.field("started", &self.is_started())
			.finish_non_exhaustive()
	}
}

/// Forwards to the watcher it replaced, then releases the waiter.
struct LatchWatcher {
	previous: Option<Arc<dyn Watcher>>,
	latch: Arc<Notify>,
}

impl Watcher for LatchWatcher {
	fn process(&self, event: &WatchedEvent) {
		if let Some(previous) = &self.previous {
			previous.process(event);
		}
		self.latch.notify_one();
	}
}

/// Builder for [`Client`].
///
/// A session factory, a retry policy and either a connect string or an
/// ensemble provider are required.
#[derive(Default)]
pub struct ClientBuilder {
	config: ClientConfig,
	ensemble: Option<Arc<dyn EnsembleProvider>>,
	factory: Option<Arc<dyn SessionFactory>>,
	watcher: Option<Arc<dyn Watcher>>,
	retry_policy: Option<Arc<dyn RetryPolicy>>,
	tracer: Option<Arc<dyn TracerDriver>>,
}

impl ClientBuilder {
	/// Replaces connect string and timeouts with those from `config`.
	pub fn config(mut self, config: ClientConfig) -> Self {
		self.config = config;
		self
	}

	pub fn connect_string(mut self, connect_string: impl Into<String>) -> Self {
		self.config.connect_string = Some(connect_string.into());
		self
	}

	/// Dynamic ensemble source; takes precedence over the connect string.
	pub fn ensemble_provider(mut self, provider: Arc<dyn EnsembleProvider>) -> Self {
		self.ensemble = Some(provider);
		self
	}

	pub fn session_factory(mut self, factory: Arc<dyn SessionFactory>) -> Self {
		self.factory = Some(factory);
		self
	}

	pub fn session_timeout(mut self, timeout: Duration) -> Self {
		self.config.session_timeout_ms = timeout.as_millis() as u64;
		self
	}

	pub fn connection_timeout(mut self, timeout: Duration) -> Self {
		self.config.connection_timeout_ms = timeout.as_millis() as u64;
		self
	}

	/// Default watcher receiving every session event.
	pub fn watcher(mut self, watcher: Arc<dyn Watcher>) -> Self {
		self.watcher = Some(watcher);
		self
	}

	pub fn retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
		self.retry_policy = Some(Arc::new(policy));
		self
	}

	/// Tracer to start with; defaults to [`DefaultTracerDriver`].
	pub fn tracer_driver(mut self, driver: Arc<dyn TracerDriver>) -> Self {
		self.tracer = Some(driver);
		self
	}

	pub fn build(self) -> Result<Client> {
		self.config.validate()?;

		let factory = self.factory.ok_or_else(|| Error::Config("a session factory is required".into()))?;
		let retry_policy = self.retry_policy.ok_or_else(|| Error::Config("a retry policy is required".into()))?;
		let ensemble = match (self.ensemble, self.config.connect_string.clone()) {
			(Some(provider), _) => provider,
			(None, Some(connect_string)) => Arc::new(FixedEnsembleProvider::new(connect_string)) as Arc<dyn EnsembleProvider>,
			(None, None) => {
				return Err(Error::Config("a connect string or ensemble provider is required".into()));
			}
		};

		let tracer = SharedTracer::new(self.tracer.unwrap_or_else(|| Arc::new(DefaultTracerDriver)));
		let state = ConnectionState::new(
			factory,
			ensemble,
			self.config.session_timeout(),
			self.config.connection_timeout(),
			self.watcher,
			tracer.clone(),
		);

		Ok(Client {
			state,
			retry_policy: RwLock::new(retry_policy),
			tracer,
			connection_timeout: self.config.connection_timeout(),
			started: AtomicBool::new(false),
			closes: AtomicU64::new(0),
			interrupt: Notify::new(),
		})
	}
}

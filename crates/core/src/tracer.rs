//! Timing and counter instrumentation.
//!
//! Every retry attempt and every [`TimeTrace`] ends up as a [`TimedEvent`]
//! handed to the active [`TracerDriver`]. The driver is swappable at runtime
//! through [`SharedTracer`]; the default driver writes to `tracing`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::trace;

/// Immutable record of one timed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedEvent {
	pub name: String,
	pub elapsed: Duration,
	pub success: bool,
}

/// Sink for timed events and named counters.
///
/// Implementations must be cheap and must not fail; they are called inline on
/// every retry attempt.
pub trait TracerDriver: Send + Sync {
	/// Records a completed timed operation.
	fn add_trace(&self, event: &TimedEvent);

	/// Adds `delta` to the counter `name`.
	fn add_count(&self, name: &str, delta: i64);
}

/// Writes events to the `keeper.trace` target at trace level.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTracerDriver;

impl TracerDriver for DefaultTracerDriver {
	fn add_trace(&self, event: &TimedEvent) {
		trace!(
			target = "keeper.trace",
			name = %event.name,
			elapsed_ms = event.elapsed.as_millis() as u64,
			success = event.success,
			"trace"
		);
	}

	fn add_count(&self, name: &str, delta: i64) {
		trace!(target = "keeper.trace", %name, delta, "counter");
	}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracerDriver;

impl TracerDriver for NoopTracerDriver {
	fn add_trace(&self, _event: &TimedEvent) {}

	fn add_count(&self, _name: &str, _delta: i64) {}
}

/// Swappable reference to the current tracer, shared between the client,
/// its connection state and every retry loop it creates.
///
/// Readers always see the driver installed at the moment they call
/// [`SharedTracer::get`].
#[derive(Clone)]
pub struct SharedTracer {
	inner: Arc<RwLock<Arc<dyn TracerDriver>>>,
}

impl SharedTracer {
	pub fn new(driver: Arc<dyn TracerDriver>) -> Self {
		Self {
			inner: Arc::new(RwLock::new(driver)),
		}
	}

	pub fn get(&self) -> Arc<dyn TracerDriver> {
		Arc::clone(&self.inner.read())
	}

	/// Installs `driver` and returns the previous one.
	pub fn set(&self, driver: Arc<dyn TracerDriver>) -> Arc<dyn TracerDriver> {
		std::mem::replace(&mut *self.inner.write(), driver)
	}

	/// Adds to a counter on the current driver.
	pub fn count(&self, name: &str, delta: i64) {
		self.get().add_count(name, delta);
	}
}

impl Default for SharedTracer {
	fn default() -> Self {
		Self::new(Arc::new(DefaultTracerDriver))
	}
}

impl fmt::Debug for SharedTracer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SharedTracer").finish_non_exhaustive()
	}
}

/// Running timer for a named operation.
///
/// The driver is captured when the trace starts. Consume the trace with
/// [`TimeTrace::commit`] or [`TimeTrace::commit_with`].
#[must_use = "a TimeTrace records nothing until it is committed"]
pub struct TimeTrace {
	name: String,
	driver: Arc<dyn TracerDriver>,
	started: Instant,
}

impl TimeTrace {
	pub fn new(name: impl Into<String>, driver: Arc<dyn TracerDriver>) -> Self {
		Self {
			name: name.into(),
			driver,
			started: Instant::now(),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Records a successful event.
	pub fn commit(self) {
		self.commit_with(true);
	}

	/// Records an event with the given outcome.
	pub fn commit_with(self, success: bool) {
		let event = TimedEvent {
			name: self.name,
			elapsed: self.started.elapsed(),
			success,
		};
		self.driver.add_trace(&event);
	}
}

impl fmt::Debug for TimeTrace {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TimeTrace").field("name", &self.name).field("started", &self.started).finish()
	}
}

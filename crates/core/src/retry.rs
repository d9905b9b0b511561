//! Retry loop and the policy it consults.
//!
//! Every coordination-service call should run inside a [`RetryLoop`]. The
//! simplest form is [`RetryLoop::call_with_retry`]:
//!
//! ```ignore
//! let data = RetryLoop::call_with_retry(&client, |session| async move {
//!     let zk = session.downcast_arc::<MyZooKeeper>().ok().unwrap();
//!     zk.get_data("/config").await
//! })
//! .await?;
//! ```
//!
//! Callers that need more control drive the loop by hand:
//!
//! ```ignore
//! let mut retry_loop = client.new_retry_loop();
//! while retry_loop.should_continue() {
//!     match do_work(&client).await {
//!         Ok(value) => {
//!             retry_loop.mark_complete();
//!             return Ok(value);
//!         }
//!         Err(err) => retry_loop.take_error(err).await?,
//!     }
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::session::RemoteSession;
use crate::tracer::{SharedTracer, TimedEvent};

/// Name of the timed event recorded for each attempt.
pub const ATTEMPT_TRACE: &str = "retry-loop-attempt";

/// What a [`RetryPolicy`] wants the loop to do after a retryable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
	/// Sleep for `sleep`, then try again.
	Retry { sleep: Duration },
	/// Stop and surface the failure.
	GiveUp,
}

impl RetryDecision {
	/// Retry without sleeping.
	pub const IMMEDIATELY: Self = Self::Retry { sleep: Duration::ZERO };

	pub fn should_retry(&self) -> bool {
		matches!(self, Self::Retry { .. })
	}
}

/// Decides whether a failed attempt is retried and how long to wait first.
///
/// `retry_count` is the number of retries already performed (zero on the
/// first failure) and `elapsed` is the time since the loop started.
/// Implementations must not depend on shared mutable state: one policy
/// instance serves every concurrent loop of a client.
pub trait RetryPolicy: Send + Sync {
	fn decide(&self, retry_count: u32, elapsed: Duration) -> RetryDecision;
}

impl<F> RetryPolicy for F
where
	F: Fn(u32, Duration) -> RetryDecision + Send + Sync,
{
	fn decide(&self, retry_count: u32, elapsed: Duration) -> RetryDecision {
		self(retry_count, elapsed)
	}
}

/// One sequence of attempts at an operation.
///
/// The policy is fixed when the loop is created; the tracer is read at each
/// commit so a swap on the client applies immediately.
pub struct RetryLoop {
	policy: Arc<dyn RetryPolicy>,
	tracer: SharedTracer,
	started: Instant,
	attempt_started: Instant,
	retry_count: u32,
	done: bool,
}

impl RetryLoop {
	pub fn new(policy: Arc<dyn RetryPolicy>, tracer: SharedTracer) -> Self {
		let now = Instant::now();
		Self {
			policy,
			tracer,
			started: now,
			attempt_started: now,
			retry_count: 0,
			done: false,
		}
	}

	/// Runs `operation` against the client's session until it succeeds, fails
	/// with a non-retryable error, or the policy gives up.
	///
	/// Each attempt fetches the current session (recreating it if it expired)
	/// and waits up to the connection timeout for it to connect before
	/// calling `operation`.
	pub async fn call_with_retry<T, F, Fut>(client: &Client, mut operation: F) -> Result<T>
	where
		F: FnMut(Arc<dyn RemoteSession>) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let mut retry_loop = client.new_retry_loop();
		loop {
			let attempt = async {
				let epoch = client.close_epoch();
				let session = client.session().await?;
				client.wait_for_connection(client.connection_timeout(), epoch).await?;
				operation(session).await
			};

			match attempt.await {
				Ok(value) => {
					retry_loop.mark_complete();
					return Ok(value);
				}
				Err(err) => retry_loop.take_error(err).await?,
			}
		}
	}

	/// `true` until [`RetryLoop::mark_complete`] is called.
	pub fn should_continue(&self) -> bool {
		!self.done
	}

	/// Records the current attempt as successful and ends the loop.
	pub fn mark_complete(&mut self) {
		if self.done {
			return;
		}
		self.done = true;
		self.commit_attempt(true);
	}

	/// Number of retries the policy has allowed so far.
	pub fn retry_count(&self) -> u32 {
		self.retry_count
	}

	/// Time since the loop was created.
	pub fn elapsed(&self) -> Duration {
		self.started.elapsed()
	}

	/// Whether `err` is transient and may be retried.
	pub fn is_retryable(err: &Error) -> bool {
		err.is_retryable()
	}

	/// Records the current attempt as failed and decides what happens next.
	///
	/// Returns `Ok(())` after sleeping when the loop should try again, or the
	/// error itself when it is fatal or the policy gives up.
	pub async fn take_error(&mut self, err: Error) -> Result<()> {
		self.commit_attempt(false);

		if !Self::is_retryable(&err) {
			debug!(target = "keeper.retry", error = %err, "non-retryable failure");
			self.done = true;
			return Err(err);
		}

		match self.policy.decide(self.retry_count, self.elapsed()) {
			RetryDecision::Retry { sleep } => {
				self.retry_count += 1;
				self.tracer.count("retries-allowed", 1);
				debug!(
					target = "keeper.retry",
					error = %err,
					retry = self.retry_count,
					sleep_ms = sleep.as_millis() as u64,
					"retrying"
				);
				if !sleep.is_zero() {
					tokio::time::sleep(sleep).await;
				}
				self.attempt_started = Instant::now();
				Ok(())
			}
			RetryDecision::GiveUp => {
				self.tracer.count("retries-disallowed", 1);
				debug!(
					target = "keeper.retry",
					error = %err,
					retries = self.retry_count,
					"retry policy gave up"
				);
				self.done = true;
				Err(err)
			}
		}
	}

	fn commit_attempt(&self, success: bool) {
		let event = TimedEvent {
			name: ATTEMPT_TRACE.to_string(),
			elapsed: self.attempt_started.elapsed(),
			success,
		};
		self.tracer.get().add_trace(&event);
	}
}

impl fmt::Debug for RetryLoop {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RetryLoop")
			.field("retry_count", &self.retry_count)
			.field("done", &self.done)
			.field("started", &self.started)
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::RecordingTracer;

	fn loop_with(policy: impl RetryPolicy + 'static) -> (RetryLoop, Arc<RecordingTracer>) {
		let tracer = Arc::new(RecordingTracer::default());
		(RetryLoop::new(Arc::new(policy), SharedTracer::new(tracer.clone())), tracer)
	}

	#[tokio::test]
	async fn retryable_error_continues_when_policy_allows() {
		let (mut retry_loop, tracer) = loop_with(|_: u32, _: Duration| RetryDecision::IMMEDIATELY);

		retry_loop.take_error(Error::connection_loss("drop")).await.unwrap();
		assert!(retry_loop.should_continue());
		assert_eq!(retry_loop.retry_count(), 1);
		assert_eq!(tracer.count("retries-allowed"), 1);
		assert_eq!(tracer.failures(), 1);
	}

	#[tokio::test]
	async fn fatal_error_is_returned_without_consulting_policy() {
		let (mut retry_loop, tracer) = loop_with(|_: u32, _: Duration| -> RetryDecision {
			unreachable!("policy must not be consulted for fatal errors")
		});

		let err = retry_loop.take_error(Error::operation("bad version")).await.unwrap_err();
		assert!(matches!(err, Error::Operation(_)));
		assert!(!retry_loop.should_continue());
		assert_eq!(tracer.count("retries-disallowed"), 0);
	}

	#[tokio::test]
	async fn give_up_returns_last_error_and_counts() {
		let (mut retry_loop, tracer) = loop_with(|count: u32, _: Duration| {
			if count < 1 { RetryDecision::IMMEDIATELY } else { RetryDecision::GiveUp }
		});

		retry_loop.take_error(Error::SessionMoved).await.unwrap();
		let err = retry_loop.take_error(Error::OperationTimeout("second".into())).await.unwrap_err();

		assert!(matches!(err, Error::OperationTimeout(ref msg) if msg == "second"));
		assert_eq!(tracer.count("retries-allowed"), 1);
		assert_eq!(tracer.count("retries-disallowed"), 1);
		assert_eq!(tracer.events_named(ATTEMPT_TRACE).len(), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn policy_sleep_is_honored() {
		let (mut retry_loop, _tracer) = loop_with(|_: u32, _: Duration| RetryDecision::Retry {
			sleep: Duration::from_millis(250),
		});

		let before = Instant::now();
		retry_loop.take_error(Error::SessionExpired).await.unwrap();
		assert!(before.elapsed() >= Duration::from_millis(250));
	}

	#[tokio::test(start_paused = true)]
	async fn policy_sees_count_and_elapsed() {
		let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
		let sink = Arc::clone(&seen);
		let (mut retry_loop, _tracer) = loop_with(move |count: u32, elapsed: Duration| {
			sink.lock().push((count, elapsed));
			RetryDecision::Retry {
				sleep: Duration::from_millis(100),
			}
		});

		retry_loop.take_error(Error::SessionExpired).await.unwrap();
		retry_loop.take_error(Error::SessionExpired).await.unwrap();

		let seen = seen.lock();
		assert_eq!(seen[0].0, 0);
		assert_eq!(seen[1].0, 1);
		assert!(seen[1].1 >= Duration::from_millis(100));
	}

	#[tokio::test]
	async fn mark_complete_records_one_success() {
		let (mut retry_loop, tracer) = loop_with(|_: u32, _: Duration| RetryDecision::GiveUp);
		retry_loop.mark_complete();
		retry_loop.mark_complete();

		assert!(!retry_loop.should_continue());
		assert_eq!(tracer.successes(), 1);
	}

	#[test]
	fn decision_helpers() {
		assert!(RetryDecision::IMMEDIATELY.should_retry());
		assert!(!RetryDecision::GiveUp.should_retry());
	}
}

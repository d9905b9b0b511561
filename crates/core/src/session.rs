//! Capabilities the client consumes: remote sessions, the factory that
//! creates them, and the watcher they report to.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use downcast_rs::{DowncastSync, impl_downcast};
use futures_util::future::BoxFuture;
use keeper_protocol::WatchedEvent;

/// Live connection to the coordination service.
///
/// Handles are owned by the connection state, which may close and replace
/// them when the session expires. Callers downcast to the concrete client type
/// to issue requests:
///
/// ```ignore
/// let session = client.session().await?;
/// let zk = session.downcast_arc::<MyZooKeeper>().ok().unwrap();
/// ```
pub trait RemoteSession: DowncastSync {
	/// Server-assigned session id.
	fn session_id(&self) -> i64;

	/// Closes the session and releases its resources.
	fn close(&self) -> BoxFuture<'_, io::Result<()>>;
}

impl_downcast!(sync RemoteSession);

/// Creates sessions against an ensemble address.
///
/// The returned session reports connection changes to `watcher`, which is the
/// relay owned by the connection state.
pub trait SessionFactory: Send + Sync {
	fn create<'a>(
		&'a self,
		connect_string: &'a str,
		session_timeout: Duration,
		watcher: Arc<dyn Watcher>,
	) -> BoxFuture<'a, io::Result<Arc<dyn RemoteSession>>>;
}

/// Receiver of session notifications.
pub trait Watcher: Send + Sync {
	fn process(&self, event: &WatchedEvent);
}

impl<F> Watcher for F
where
	F: Fn(&WatchedEvent) + Send + Sync,
{
	fn process(&self, event: &WatchedEvent) {
		self(event)
	}
}

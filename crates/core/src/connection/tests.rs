use std::sync::Arc;
use std::time::Duration;

use keeper_protocol::{ConnectionStatus, EventType, KeeperState, WatchedEvent};
use parking_lot::Mutex;
use proptest::prelude::*;

use super::*;
use crate::ensemble::FixedEnsembleProvider;
use crate::testing::{FakeSessionController, FakeSessionFactoryBuilder, RecordingTracer};

fn state_with(builder: FakeSessionFactoryBuilder, watcher: Option<Arc<dyn Watcher>>) -> (ConnectionState, FakeSessionController) {
	let (factory, controller) = builder.build();
	let state = ConnectionState::new(
		factory,
		Arc::new(FixedEnsembleProvider::new("zk1:2181")),
		Duration::from_secs(60),
		Duration::from_secs(15),
		watcher,
		SharedTracer::default(),
	);
	(state, controller)
}

fn recording_watcher() -> (Arc<dyn Watcher>, Arc<Mutex<Vec<WatchedEvent>>>) {
	let seen = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&seen);
	let watcher: Arc<dyn Watcher> = Arc::new(move |event: &WatchedEvent| sink.lock().push(event.clone()));
	(watcher, seen)
}

#[tokio::test]
async fn start_creates_one_session_and_connects() {
	let (state, controller) = state_with(FakeSessionFactoryBuilder::new(), None);
	assert!(!state.is_connected());

	state.start().await.unwrap();

	assert!(state.is_connected());
	assert_eq!(controller.created(), 1);
	assert_eq!(controller.addresses(), vec!["zk1:2181".to_string()]);
}

#[tokio::test]
async fn session_reuses_live_handle() {
	let (state, controller) = state_with(FakeSessionFactoryBuilder::new(), None);
	state.start().await.unwrap();

	let first = state.session().await.unwrap();
	let second = state.session().await.unwrap();

	assert_eq!(first.session_id(), second.session_id());
	assert_eq!(controller.created(), 1);
}

#[tokio::test]
async fn relay_tracks_events_and_forwards_them() {
	let (watcher, seen) = recording_watcher();
	let (state, controller) = state_with(FakeSessionFactoryBuilder::new().auto_connect(false), Some(watcher));
	state.start().await.unwrap();
	assert_eq!(state.status(), ConnectionStatus::Disconnected);

	controller.connect();
	assert!(state.is_connected());

	controller.deliver(WatchedEvent::node(EventType::NodeDataChanged, KeeperState::Disconnected, "/a"));
	assert!(state.is_connected(), "node events must not change status");

	controller.disconnect();
	assert!(!state.is_connected());

	let states: Vec<_> = seen.lock().iter().map(|e| e.state).collect();
	assert_eq!(
		states,
		vec![KeeperState::SyncConnected, KeeperState::Disconnected, KeeperState::Disconnected]
	);
}

#[tokio::test]
async fn expired_session_is_recreated_on_next_use() {
	let (factory, controller) = FakeSessionFactoryBuilder::new().build();
	let tracer = Arc::new(RecordingTracer::default());
	let state = ConnectionState::new(
		factory,
		Arc::new(FixedEnsembleProvider::new("zk1:2181")),
		Duration::from_secs(60),
		Duration::from_secs(15),
		None,
		SharedTracer::new(tracer.clone()),
	);
	state.start().await.unwrap();
	let first = state.session().await.unwrap();

	controller.expire();
	assert_eq!(state.status(), ConnectionStatus::Expired);
	assert_eq!(tracer.count("session-expired"), 1);

	let second = state.session().await.unwrap();
	assert_ne!(first.session_id(), second.session_id());
	assert!(controller.sessions()[0].is_closed(), "expired session must be closed");
	assert!(state.is_connected());
	assert_eq!(controller.created(), 2);
}

#[tokio::test]
async fn expired_session_uses_fresh_ensemble_address() {
	let (factory, controller) = FakeSessionFactoryBuilder::new().build();
	let address = Arc::new(Mutex::new("zk1:2181".to_string()));
	let source = Arc::clone(&address);
	let state = ConnectionState::new(
		factory,
		Arc::new(move || source.lock().clone()),
		Duration::from_secs(60),
		Duration::from_secs(15),
		None,
		SharedTracer::default(),
	);
	state.start().await.unwrap();

	*address.lock() = "zk2:2181".to_string();
	controller.expire();
	state.session().await.unwrap();

	assert_eq!(controller.addresses(), vec!["zk1:2181".to_string(), "zk2:2181".to_string()]);
}

#[tokio::test]
async fn factory_failure_is_a_connection_error() {
	let (state, controller) = state_with(FakeSessionFactoryBuilder::new().fail_first(1), None);

	let err = state.start().await.unwrap_err();
	assert!(matches!(err, Error::Connection(_)));

	state.session().await.unwrap();
	assert_eq!(controller.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnected_past_connection_timeout_reports_connection_loss() {
	let (factory, controller) = FakeSessionFactoryBuilder::new().auto_connect(false).build();
	let tracer = Arc::new(RecordingTracer::default());
	let state = ConnectionState::new(
		factory,
		Arc::new(FixedEnsembleProvider::new("zk1:2181")),
		Duration::from_secs(10),
		Duration::from_secs(2),
		None,
		SharedTracer::new(tracer.clone()),
	);
	state.start().await.unwrap();

	// Within the connection timeout the pending session is handed out.
	state.session().await.unwrap();

	tokio::time::advance(Duration::from_secs(3)).await;
	let Err(err) = state.session().await else {
		panic!("expected connection loss");
	};
	assert!(matches!(err, Error::ConnectionLoss(_)));
	assert_eq!(tracer.count("connections-timed-out"), 1);
	assert_eq!(controller.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn brief_disconnect_after_long_uptime_keeps_session() {
	let (state, controller) = state_with(FakeSessionFactoryBuilder::new(), None);
	state.start().await.unwrap();
	let first = state.session().await.unwrap();

	tokio::time::advance(Duration::from_secs(120)).await;
	controller.disconnect();

	let current = state.session().await.unwrap();
	assert_eq!(current.session_id(), first.session_id());
	assert_eq!(controller.created(), 1);
	assert!(!controller.sessions()[0].is_closed());
}

#[tokio::test(start_paused = true)]
async fn connection_timeout_counts_from_the_disconnect() {
	let (state, controller) = state_with(FakeSessionFactoryBuilder::new(), None);
	state.start().await.unwrap();

	tokio::time::advance(Duration::from_secs(30)).await;
	controller.disconnect();
	state.session().await.unwrap();

	tokio::time::advance(Duration::from_secs(16)).await;
	let Err(err) = state.session().await else {
		panic!("expected connection loss once the connection timeout elapsed");
	};
	assert!(matches!(err, Error::ConnectionLoss(_)));
	assert_eq!(controller.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn reconnect_restarts_connection_clock() {
	let (state, controller) = state_with(FakeSessionFactoryBuilder::new(), None);
	state.start().await.unwrap();

	controller.disconnect();
	tokio::time::advance(Duration::from_secs(10)).await;
	controller.connect();
	tokio::time::advance(Duration::from_secs(10)).await;
	controller.disconnect();

	// 20 s since the first disconnect, but only 0 s since the latest one.
	state.session().await.unwrap();
	assert_eq!(controller.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnected_past_session_timeout_resets() {
	let (factory, controller) = FakeSessionFactoryBuilder::new().auto_connect(false).build();
	let state = ConnectionState::new(
		factory,
		Arc::new(FixedEnsembleProvider::new("zk1:2181")),
		Duration::from_secs(1),
		Duration::from_secs(3),
		None,
		SharedTracer::default(),
	);
	state.start().await.unwrap();

	tokio::time::advance(Duration::from_millis(1500)).await;
	state.session().await.unwrap();

	assert_eq!(controller.created(), 2);
	assert!(controller.sessions()[0].is_closed());
}

#[tokio::test(start_paused = true)]
async fn changed_ensemble_address_resets_when_timed_out() {
	let (factory, controller) = FakeSessionFactoryBuilder::new().auto_connect(false).build();
	let address = Arc::new(Mutex::new("zk1:2181".to_string()));
	let source = Arc::clone(&address);
	let state = ConnectionState::new(
		factory,
		Arc::new(move || source.lock().clone()),
		Duration::from_secs(10),
		Duration::from_secs(2),
		None,
		SharedTracer::default(),
	);
	state.start().await.unwrap();

	*address.lock() = "zk9:2181".to_string();
	tokio::time::advance(Duration::from_secs(3)).await;
	let session = state.session().await.unwrap();

	assert_eq!(controller.created(), 2);
	let fake = session.downcast_arc::<crate::testing::FakeSession>().ok().unwrap();
	assert_eq!(fake.connect_string(), "zk9:2181");
}

#[tokio::test]
async fn close_releases_handle_even_when_close_fails() {
	let (state, controller) = state_with(FakeSessionFactoryBuilder::new().fail_close(true), None);
	state.start().await.unwrap();

	assert!(state.close().await.is_err());
	assert!(!state.is_connected());
	assert!(controller.current().unwrap().is_closed());

	// The failed close still emptied the slot, so the next use creates anew.
	state.session().await.unwrap();
	assert_eq!(controller.created(), 2);
}

#[tokio::test]
async fn close_without_session_is_ok() {
	let (state, _controller) = state_with(FakeSessionFactoryBuilder::new(), None);
	state.close().await.unwrap();
	state.close().await.unwrap();
}

#[test]
fn substitute_returns_previous_watcher() {
	let (original, seen) = recording_watcher();
	let (state, _controller) = state_with(FakeSessionFactoryBuilder::new(), Some(original));

	let replacement: Arc<dyn Watcher> = Arc::new(|_: &WatchedEvent| {});
	let previous = state.substitute_parent_watcher(Some(replacement));
	assert!(previous.is_some());

	state.relay().process(&WatchedEvent::session(KeeperState::SyncConnected));
	assert!(seen.lock().is_empty());

	state.substitute_parent_watcher(previous);
	state.relay().process(&WatchedEvent::session(KeeperState::Disconnected));
	assert_eq!(seen.lock().len(), 1);
}

fn fail_watcher(event: &WatchedEvent) {
	panic!("temporary watcher failed on {:?}", event.state);
}

#[test]
fn temporary_watcher_chains_and_restores_after_panic() {
	let (original, seen) = recording_watcher();
	let (state, _controller) = state_with(FakeSessionFactoryBuilder::new(), Some(original));
	let relay = state.relay();

	{
		let _guard = state.install_temporary_watcher(|previous| {
			Arc::new(move |event: &WatchedEvent| {
				if let Some(previous) = &previous {
					previous.process(event);
				}
				fail_watcher(event);
			}) as Arc<dyn Watcher>
		});
		relay.process(&WatchedEvent::session(KeeperState::SyncConnected));
		assert!(state.is_connected(), "status updates survive a panicking watcher");
	}

	relay.process(&WatchedEvent::session(KeeperState::Disconnected));
	relay.process(&WatchedEvent::session(KeeperState::SyncConnected));

	let states: Vec<_> = seen.lock().iter().map(|e| e.state).collect();
	assert_eq!(
		states,
		vec![KeeperState::SyncConnected, KeeperState::Disconnected, KeeperState::SyncConnected]
	);
}

#[test]
fn relay_ignores_events_after_state_dropped() {
	let (state, _controller) = state_with(FakeSessionFactoryBuilder::new(), None);
	let relay = state.relay();
	drop(state);
	relay.process(&WatchedEvent::session(KeeperState::SyncConnected));
}

fn session_state() -> impl Strategy<Value = KeeperState> {
	prop_oneof![
		Just(KeeperState::SyncConnected),
		Just(KeeperState::ConnectedReadOnly),
		Just(KeeperState::Disconnected),
		Just(KeeperState::Expired),
	]
}

proptest! {
	#[test]
	fn status_reflects_most_recent_event(events in proptest::collection::vec(session_state(), 1..40)) {
		let (state, _controller) = state_with(FakeSessionFactoryBuilder::new(), None);
		let relay = state.relay();

		for keeper_state in events {
			relay.process(&WatchedEvent::session(keeper_state));
			prop_assert_eq!(state.is_connected(), keeper_state.is_connected());
			prop_assert_eq!(state.status() == ConnectionStatus::Expired, keeper_state == KeeperState::Expired);
		}
	}
}

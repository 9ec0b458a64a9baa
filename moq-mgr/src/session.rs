//! The supervisor: owns the engine session, drives the announce and catalog
//! loops, and reconciles subscription workers against the catalog.
//!
//! Everything here assumes it is driven from inside a tokio runtime; the
//! FFI layer enters the global runtime before calling in.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast as channel;
use url::Url;

use moq_core::{Broadcast, BroadcastConsumer, BroadcastProducer, OriginConsumer, SessionMode};
use moq_quic::{Client, ClientConfig, QuicSession};

use crate::catalog::{CatalogProcessor, CATALOG_TRACK, CATALOG_TRACK_ALIAS};
use crate::consumer::{Consumer, SubscriptionConfig};
use crate::producer::{BroadcastConfig, Producer};

type Engine = moq_core::Session<QuicSession>;

/// Minimum interval between reconnection attempts.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(3);

/// How many reconnection attempts before giving up.
const MAX_RECONNECT_ATTEMPTS: usize = 5;

pub type MessageCallback = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Clone)]
pub struct SessionConfig {
	pub server_url: Url,
	pub namespace: String,
	pub reconnect_on_failure: bool,
	pub client_config: ClientConfig,
}

/// A managed session. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Session {
	config: SessionConfig,
	mode: SessionMode,

	client: Arc<RwLock<Option<Client>>>,
	engine: Arc<RwLock<Option<Engine>>>,
	broadcast_producer: Arc<RwLock<Option<BroadcastProducer>>>,
	broadcast_consumer: Arc<RwLock<Option<BroadcastConsumer>>>,

	// Consumer state: what the caller wants, what the catalog offers, and
	// the workers bridging the two.
	catalog: CatalogProcessor,
	catalog_workers: Arc<Mutex<Vec<Consumer>>>,
	requested: Arc<Mutex<HashMap<String, SubscriptionConfig>>>,
	active: Arc<Mutex<HashMap<String, Consumer>>>,

	// Serializes reconciliation; never held while the `active` lock is.
	reconcile_lock: Arc<Mutex<()>>,

	// Producer state.
	producers: Arc<Mutex<HashMap<String, Arc<Producer>>>>,
	broadcast_configs: Arc<Mutex<Vec<BroadcastConfig>>>,

	connected: Arc<AtomicBool>,
	stopped: Arc<AtomicBool>,
	shutdown: channel::Sender<()>,
	last_attempt: Arc<Mutex<Option<Instant>>>,

	error_callback: Arc<RwLock<Option<MessageCallback>>>,
	status_callback: Arc<RwLock<Option<MessageCallback>>>,

	// Session-layer event callbacks; the argument is the broadcast path or
	// the close reason.
	announced_callback: Arc<RwLock<Option<MessageCallback>>>,
	cancelled_callback: Arc<RwLock<Option<MessageCallback>>>,
	closed_callback: Arc<RwLock<Option<MessageCallback>>>,
}

impl Session {
	pub fn new(config: SessionConfig, mode: SessionMode) -> Self {
		let (shutdown, _) = channel::channel(16);

		Self {
			config,
			mode,
			client: Default::default(),
			engine: Default::default(),
			broadcast_producer: Default::default(),
			broadcast_consumer: Default::default(),
			catalog: CatalogProcessor::new(),
			catalog_workers: Default::default(),
			requested: Default::default(),
			active: Default::default(),
			reconcile_lock: Default::default(),
			producers: Default::default(),
			broadcast_configs: Default::default(),
			connected: Default::default(),
			stopped: Default::default(),
			shutdown,
			last_attempt: Default::default(),
			error_callback: Default::default(),
			status_callback: Default::default(),
			announced_callback: Default::default(),
			cancelled_callback: Default::default(),
			closed_callback: Default::default(),
		}
	}

	pub fn set_error_callback<F>(&self, callback: F)
	where
		F: Fn(&str) + Send + Sync + 'static,
	{
		*self.error_callback.write() = Some(Box::new(callback));
	}

	pub fn set_status_callback<F>(&self, callback: F)
	where
		F: Fn(&str) + Send + Sync + 'static,
	{
		*self.status_callback.write() = Some(Box::new(callback));
	}

	/// Invoked with the path of every broadcast announced by the peer.
	pub fn on_broadcast_announced<F>(&self, callback: F)
	where
		F: Fn(&str) + Send + Sync + 'static,
	{
		*self.announced_callback.write() = Some(Box::new(callback));
	}

	/// Invoked with the path of every broadcast withdrawn by the peer.
	pub fn on_broadcast_cancelled<F>(&self, callback: F)
	where
		F: Fn(&str) + Send + Sync + 'static,
	{
		*self.cancelled_callback.write() = Some(Box::new(callback));
	}

	/// Invoked once with the reason when an established session dies.
	pub fn on_connection_closed<F>(&self, callback: F)
	where
		F: Fn(&str) + Send + Sync + 'static,
	{
		*self.closed_callback.write() = Some(Box::new(callback));
	}

	fn emit(slot: &RwLock<Option<MessageCallback>>, argument: &str) {
		if let Some(callback) = slot.read().as_ref() {
			if catch_unwind(AssertUnwindSafe(|| callback(argument))).is_err() {
				tracing::error!("event callback panicked");
			}
		}
	}

	/// Request a subscription by track name.
	///
	/// The worker starts once the track appears in the catalog.
	pub fn add_subscription(&self, subscription: SubscriptionConfig) {
		self.requested
			.lock()
			.insert(subscription.track_name.clone(), subscription);

		if self.connected.load(Ordering::SeqCst) {
			self.reconcile();
		}
	}

	/// Register a broadcast track to publish. Must precede [Self::start].
	pub fn add_broadcast(&self, broadcast: BroadcastConfig) {
		self.broadcast_configs.lock().push(broadcast);
	}

	/// Look up the producer worker for a configured broadcast track.
	pub fn producer(&self, track_name: &str) -> Option<Arc<Producer>> {
		self.producers.lock().get(track_name).cloned()
	}

	fn notify_error(&self, error: &str) {
		tracing::error!("{}", error);
		if let Some(callback) = self.error_callback.read().as_ref() {
			if catch_unwind(AssertUnwindSafe(|| callback(error))).is_err() {
				tracing::error!("error callback panicked");
			}
		}
	}

	fn notify_status(&self, status: &str) {
		tracing::info!("{}", status);
		if let Some(callback) = self.status_callback.read().as_ref() {
			if catch_unwind(AssertUnwindSafe(|| callback(status))).is_err() {
				tracing::error!("status callback panicked");
			}
		}
	}

	/// Connect to the server. A single attempt; reconnection only happens
	/// after a previously-established session fails, and only if enabled.
	pub async fn start(&self) -> Result<()> {
		if self.connected.load(Ordering::SeqCst) {
			return Ok(());
		}

		self.stopped.store(false, Ordering::SeqCst);
		*self.last_attempt.lock() = Some(Instant::now());

		let client = self
			.config
			.client_config
			.clone()
			.init()
			.context("failed to initialize client")?;

		self.notify_status(&format!("connecting to {}", self.config.server_url));

		let engine = client
			.connect(&self.config.server_url, self.mode)
			.await
			.context("failed to connect")?;

		*self.client.write() = Some(client);
		*self.engine.write() = Some(engine.clone());
		self.connected.store(true, Ordering::SeqCst);

		self.notify_status("connected");

		self.handle_connected(&engine)?;
		self.spawn_monitor(engine);

		Ok(())
	}

	/// Bring up workers for the fresh session.
	fn handle_connected(&self, engine: &Engine) -> Result<()> {
		if self.mode.is_publisher() {
			let broadcast = Broadcast::produce();
			let mut broadcast_producer = broadcast.producer;

			let configs = self.broadcast_configs.lock().clone();
			let mut producers = HashMap::new();
			for config in configs {
				let producer = Arc::new(Producer::new(config.clone()));
				producer.initialize(&mut broadcast_producer)?;
				producers.insert(config.track_name.clone(), producer);
			}

			engine
				.publish(&self.config.namespace, broadcast.consumer.clone())
				.context("failed to publish broadcast")?;

			*self.broadcast_producer.write() = Some(broadcast_producer);
			*self.producers.lock() = producers;

			self.notify_status(&format!("published broadcast '{}'", self.config.namespace));
		}

		if self.mode.is_subscriber() {
			let origin = engine
				.origin_consumer()
				.context("failed to take the announcement consumer")?;

			let this = self.clone();
			tokio::spawn(async move {
				this.run_announce_loop(origin).await;
			});
		}

		Ok(())
	}

	/// Watch for our namespace to (dis)appear.
	async fn run_announce_loop(&self, mut origin: OriginConsumer) {
		let mut shutdown = self.shutdown.subscribe();

		loop {
			let announce = tokio::select! {
				_ = shutdown.recv() => break,
				announce = origin.announced() => announce,
			};

			let Some(announce) = announce else { break };

			if announce.active {
				Self::emit(&self.announced_callback, &announce.path);
			} else {
				Self::emit(&self.cancelled_callback, &announce.path);
			}

			if announce.path != self.config.namespace {
				continue;
			}

			if announce.active {
				self.handle_broadcast_available();
			} else {
				self.handle_broadcast_lost();
			}
		}

		tracing::debug!("announce loop ended");
	}

	fn handle_broadcast_available(&self) {
		let Some(engine) = self.engine.read().clone() else { return };

		let broadcast = match engine.consume(&self.config.namespace) {
			Ok(broadcast) => broadcast,
			Err(err) => {
				self.notify_error(&format!("failed to consume broadcast: {}", err));
				return;
			}
		};

		self.notify_status(&format!("broadcast '{}' available", self.config.namespace));

		// A (re)announced broadcast is a fresh object; rebind everything.
		*self.broadcast_consumer.write() = Some(broadcast.clone());
		self.stop_catalog_workers();
		self.stop_workers();

		// Subscribe under both accepted catalog track names; only the one
		// the publisher uses will ever deliver frames.
		let mut workers = Vec::new();
		for name in [CATALOG_TRACK, CATALOG_TRACK_ALIAS] {
			let this = self.clone();
			let worker = Consumer::new(
				broadcast.clone(),
				SubscriptionConfig {
					track_name: name.to_string(),
					data_callback: Arc::new(move |data| this.handle_catalog(data)),
				},
			);
			workers.push(worker);
		}
		*self.catalog_workers.lock() = workers;
	}

	fn handle_broadcast_lost(&self) {
		self.notify_status(&format!("broadcast '{}' withdrawn", self.config.namespace));

		*self.broadcast_consumer.write() = None;
		self.stop_catalog_workers();
		self.stop_workers();
	}

	/// One catalog frame: a full snapshot replacing the previous one.
	fn handle_catalog(&self, data: &[u8]) {
		match self.catalog.process(data) {
			Ok(()) => self.reconcile(),
			Err(err) => {
				// Subscriptions stay in their current state.
				self.notify_error(&format!("catalog error: {}", err));
			}
		}
	}

	/// Align the active workers with `requested ∩ available`.
	fn reconcile(&self) {
		let _guard = self.reconcile_lock.lock();

		if self.stopped.load(Ordering::SeqCst) {
			return;
		}

		let Some(broadcast) = self.broadcast_consumer.read().clone() else { return };
		let available = self.catalog.available();
		let requested = self.requested.lock().clone();

		// Compute the diff while holding the worker lock, then act on it
		// after the lock is released.
		let stale: Vec<Consumer> = {
			let mut active = self.active.lock();
			let gone: Vec<String> = active
				.keys()
				.filter(|name| !available.contains_key(*name))
				.cloned()
				.collect();
			gone.into_iter().filter_map(|name| active.remove(&name)).collect()
		};

		for worker in stale {
			self.notify_status(&format!("stopping subscription '{}'", worker.track_name()));
			worker.stop();
		}

		for (name, subscription) in requested {
			// A callback may have stopped us mid-reconciliation.
			if self.stopped.load(Ordering::SeqCst) {
				return;
			}

			if !available.contains_key(&name) {
				continue;
			}
			if self.active.lock().contains_key(&name) {
				continue;
			}

			let worker = Consumer::new(broadcast.clone(), subscription);
			self.active.lock().insert(name.clone(), worker);
			self.notify_status(&format!("started subscription '{}'", name));
		}
	}

	fn stop_workers(&self) {
		let workers: Vec<Consumer> = {
			let mut active = self.active.lock();
			active.drain().map(|(_, worker)| worker).collect()
		};

		for worker in workers {
			worker.stop();
		}
	}

	fn stop_catalog_workers(&self) {
		let workers: Vec<Consumer> = std::mem::take(&mut *self.catalog_workers.lock());

		for worker in workers {
			worker.stop();
		}
	}

	fn spawn_monitor(&self, engine: Engine) {
		let this = self.clone();
		let mut shutdown = self.shutdown.subscribe();

		tokio::spawn(async move {
			let error = tokio::select! {
				err = engine.closed() => Some(err),
				_ = shutdown.recv() => None,
			};

			// A local stop already cleaned up.
			let Some(error) = error else { return };

			tracing::warn!(%error, "session closed");
			this.connected.store(false, Ordering::SeqCst);
			Self::emit(&this.closed_callback, &error.to_string());
			this.notify_error(&format!("connection lost: {}", error));
			this.handle_disconnected();

			if this.config.reconnect_on_failure && !this.stopped.load(Ordering::SeqCst) {
				this.run_reconnect().await;
			}
		});
	}

	/// Tear down everything bound to the dead session.
	fn handle_disconnected(&self) {
		self.stop_catalog_workers();
		self.stop_workers();

		for producer in self.producers.lock().values() {
			producer.reset();
		}

		*self.broadcast_consumer.write() = None;
		*self.broadcast_producer.write() = None;
		*self.engine.write() = None;
		*self.client.write() = None;
	}

	/// Bounded reconnection, at least [RECONNECT_INTERVAL] apart.
	async fn run_reconnect(&self) {
		let mut shutdown = self.shutdown.subscribe();

		for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
			let wait = {
				let last = self.last_attempt.lock();
				last.map(|at| RECONNECT_INTERVAL.saturating_sub(at.elapsed()))
					.unwrap_or_default()
			};

			if !wait.is_zero() {
				tokio::select! {
					_ = tokio::time::sleep(wait) => {}
					_ = shutdown.recv() => return,
				}
			}

			if self.stopped.load(Ordering::SeqCst) {
				return;
			}

			self.notify_status(&format!(
				"reconnecting (attempt {}/{})",
				attempt, MAX_RECONNECT_ATTEMPTS
			));

			match self.start().await {
				Ok(()) => {
					self.notify_status("reconnected");
					return;
				}
				Err(err) => {
					self.notify_error(&format!("reconnect failed: {}", err));
				}
			}
		}

		self.notify_error("reconnection attempts exhausted");
	}

	/// Stop the session. Idempotent, and safe to call from any callback.
	pub fn stop(&self) {
		if self.stopped.swap(true, Ordering::SeqCst) {
			return;
		}

		self.connected.store(false, Ordering::SeqCst);
		let _ = self.shutdown.send(());

		if let Some(engine) = self.engine.read().clone() {
			engine.close();
		}

		self.handle_disconnected();
		self.notify_status("session stopped");
	}

	pub fn is_running(&self) -> bool {
		self.connected.load(Ordering::SeqCst)
	}

	pub fn namespace(&self) -> &str {
		&self.config.namespace
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::consumer::DataCallback;
	use std::sync::atomic::AtomicUsize;

	fn test_session(mode: SessionMode) -> Session {
		Session::new(
			SessionConfig {
				server_url: "https://relay.invalid:4443".parse().unwrap(),
				namespace: "ns".into(),
				reconnect_on_failure: false,
				client_config: ClientConfig::default(),
			},
			mode,
		)
	}

	fn collecting_callback() -> (DataCallback, Arc<Mutex<Vec<Vec<u8>>>>) {
		let received = Arc::new(Mutex::new(Vec::new()));
		let callback = {
			let received = received.clone();
			Arc::new(move |data: &[u8]| {
				received.lock().push(data.to_vec());
			}) as DataCallback
		};
		(callback, received)
	}

	// Drive the gating logic directly: bind a local broadcast and feed
	// catalog documents through the same path the catalog worker uses.
	fn bind_local_broadcast(session: &Session) -> moq_core::BroadcastProducer {
		let broadcast = Broadcast::produce();
		*session.broadcast_consumer.write() = Some(broadcast.consumer.clone());
		session.connected.store(true, Ordering::SeqCst);
		broadcast.producer
	}

	fn active_names(session: &Session) -> Vec<String> {
		let mut names: Vec<String> = session.active.lock().keys().cloned().collect();
		names.sort();
		names
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn catalog_gating() {
		let session = test_session(SessionMode::Subscribe);
		let mut producer = bind_local_broadcast(&session);

		let (video_cb, video_frames) = collecting_callback();
		let (audio_cb, audio_frames) = collecting_callback();

		session.add_subscription(SubscriptionConfig {
			track_name: "video/hd".into(),
			data_callback: video_cb,
		});
		session.add_subscription(SubscriptionConfig {
			track_name: "audio/data".into(),
			data_callback: audio_cb,
		});

		// Nothing starts before the catalog advertises a track.
		assert!(active_names(&session).is_empty());

		// The publisher creates its tracks before advertising them.
		let mut track = producer.create_track("video/hd").unwrap();

		session.handle_catalog(
			br#"{"tracks":[{"trackName":"video/hd","type":"video","priority":60}]}"#,
		);

		// Exactly the requested-and-available track has a worker.
		assert_eq!(active_names(&session), vec!["video/hd"]);

		// The worker pumps frames into the right callback.
		let mut group = track.create_group(0u64).unwrap();
		group.write_frame("F1").unwrap();
		group.finish().unwrap();

		tokio::time::timeout(Duration::from_secs(2), async {
			while video_frames.lock().is_empty() {
				tokio::task::yield_now().await;
			}
		})
		.await
		.expect("frame was not delivered");

		assert_eq!(video_frames.lock()[0], b"F1");
		assert!(audio_frames.lock().is_empty());
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn catalog_withdrawal_stops_worker() {
		let session = test_session(SessionMode::Subscribe);
		let _producer = bind_local_broadcast(&session);

		let (callback, _frames) = collecting_callback();
		session.add_subscription(SubscriptionConfig {
			track_name: "video/hd".into(),
			data_callback: callback,
		});

		session.handle_catalog(
			br#"{"tracks":[{"trackName":"video/hd","type":"video","priority":60}]}"#,
		);
		assert_eq!(active_names(&session), vec!["video/hd"]);

		// An empty catalog withdraws the track within one reconciliation.
		session.handle_catalog(br#"{"tracks":[]}"#);
		assert!(active_names(&session).is_empty());
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn hang_catalog_gating() {
		let session = test_session(SessionMode::Subscribe);
		let _producer = bind_local_broadcast(&session);

		let (callback, _frames) = collecting_callback();
		session.add_subscription(SubscriptionConfig {
			track_name: "video/hd".into(),
			data_callback: callback,
		});

		session.handle_catalog(
			br#"{
				"video": { "priority": 60, "renditions": { "video/hd": {} } },
				"audio": { "priority": 70, "renditions": { "audio/data": {} } }
			}"#,
		);

		// audio/data is available but not requested: no worker.
		assert_eq!(active_names(&session), vec!["video/hd"]);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn invalid_catalog_keeps_workers() {
		let session = test_session(SessionMode::Subscribe);
		let _producer = bind_local_broadcast(&session);

		let errors = Arc::new(AtomicUsize::new(0));
		{
			let errors = errors.clone();
			session.set_error_callback(move |_| {
				errors.fetch_add(1, Ordering::SeqCst);
			});
		}

		let (callback, _frames) = collecting_callback();
		session.add_subscription(SubscriptionConfig {
			track_name: "video/hd".into(),
			data_callback: callback,
		});

		session.handle_catalog(
			br#"{"tracks":[{"trackName":"video/hd","type":"video","priority":60}]}"#,
		);
		assert_eq!(active_names(&session), vec!["video/hd"]);

		// Garbage leaves the worker set untouched and reports an error.
		session.handle_catalog(b"not json at all");
		assert_eq!(active_names(&session), vec!["video/hd"]);
		assert_eq!(errors.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn workers_subset_of_requested_and_available() {
		let session = test_session(SessionMode::Subscribe);
		let _producer = bind_local_broadcast(&session);

		let (callback, _frames) = collecting_callback();
		session.add_subscription(SubscriptionConfig {
			track_name: "a".into(),
			data_callback: callback.clone(),
		});

		// Catalog advertises a, b; only a is requested.
		session.handle_catalog(
			br#"{"tracks":[
				{"trackName":"a","type":"data","priority":1},
				{"trackName":"b","type":"data","priority":1}
			]}"#,
		);
		assert_eq!(active_names(&session), vec!["a"]);

		// Requesting b afterwards starts it on the next reconciliation.
		session.add_subscription(SubscriptionConfig {
			track_name: "b".into(),
			data_callback: callback,
		});
		assert_eq!(active_names(&session), vec!["a", "b"]);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn stop_from_callback_does_not_deadlock() {
		let session = test_session(SessionMode::Subscribe);
		let _producer = bind_local_broadcast(&session);

		{
			let this = session.clone();
			session.set_status_callback(move |_| {
				this.stop();
			});
		}

		let (callback, _frames) = collecting_callback();
		session.add_subscription(SubscriptionConfig {
			track_name: "a".into(),
			data_callback: callback,
		});

		// Reconciliation notifies status, whose callback stops the session.
		session.handle_catalog(br#"{"tracks":[{"trackName":"a","type":"data","priority":1}]}"#);

		assert!(!session.is_running());
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn stop_is_idempotent() {
		let session = test_session(SessionMode::Subscribe);
		session.stop();
		session.stop();
		assert!(!session.is_running());
	}
}

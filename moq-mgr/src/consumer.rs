//! A subscription worker: owns one track subscription and pumps every frame
//! into the application's data callback.
//!
//! The worker retries subscription establishment at a fixed interval until
//! it is stopped or the track ends. Errors inside a single group abort that
//! group only; the worker keeps reading the next one.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use moq_core::BroadcastConsumer;

/// How long to wait before retrying a failed subscription.
const RETRY_INTERVAL: Duration = Duration::from_secs(3);

pub type DataCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

#[derive(Clone)]
pub struct SubscriptionConfig {
	pub track_name: String,
	pub data_callback: DataCallback,
}

pub struct Consumer {
	track_name: String,
	stop: watch::Sender<bool>,
	handle: Mutex<Option<JoinHandle<()>>>,
}

impl Consumer {
	/// Create the worker and immediately start pumping.
	pub fn new(broadcast: BroadcastConsumer, config: SubscriptionConfig) -> Self {
		let (stop, stop_rx) = watch::channel(false);
		let track_name = config.track_name.clone();

		let handle = tokio::spawn(Self::run(broadcast, config, stop_rx));

		tracing::info!(track = %track_name, "consumer started");

		Self {
			track_name,
			stop,
			handle: Mutex::new(Some(handle)),
		}
	}

	async fn run(broadcast: BroadcastConsumer, config: SubscriptionConfig, mut stop: watch::Receiver<bool>) {
		loop {
			if *stop.borrow() {
				break;
			}

			match Self::run_subscription(&broadcast, &config, &mut stop).await {
				Ok(()) => {
					// End-of-track; the supervisor releases us on withdrawal.
					tracing::info!(track = %config.track_name, "track ended");
					break;
				}
				Err(err) => {
					tracing::warn!(track = %config.track_name, %err, "subscription failed; retrying");
				}
			}

			tokio::select! {
				_ = tokio::time::sleep(RETRY_INTERVAL) => {}
				_ = stop.changed() => {}
			}
		}

		tracing::debug!(track = %config.track_name, "consumer loop ended");
	}

	async fn run_subscription(
		broadcast: &BroadcastConsumer,
		config: &SubscriptionConfig,
		stop: &mut watch::Receiver<bool>,
	) -> Result<(), moq_core::Error> {
		let mut track = broadcast.subscribe_track(config.track_name.as_str())?;

		loop {
			let group = tokio::select! {
				_ = stop.wait_for(|stopped| *stopped) => return Ok(()),
				group = track.next_group() => group?,
			};

			let mut group = match group {
				Some(group) => group,
				None => return Ok(()),
			};

			loop {
				let frame = tokio::select! {
					_ = stop.wait_for(|stopped| *stopped) => return Ok(()),
					frame = group.read_frame() => frame,
				};

				match frame {
					Ok(Some(payload)) => Self::deliver(config, &payload),
					Ok(None) => break,
					Err(err) => {
						// Only this group is lost.
						tracing::warn!(track = %config.track_name, %err, "group aborted");
						break;
					}
				}
			}
		}
	}

	// The callback belongs to the application; a panic inside it must not
	// take the worker down.
	fn deliver(config: &SubscriptionConfig, payload: &[u8]) {
		let callback = &config.data_callback;
		if catch_unwind(AssertUnwindSafe(|| callback(payload))).is_err() {
			tracing::error!(track = %config.track_name, "data callback panicked");
		}
	}

	/// Stop the worker. Idempotent and safe to call from any callback.
	pub fn stop(&self) {
		let _ = self.stop.send(true);

		if let Some(handle) = self.handle.lock().take() {
			// The stop flag wakes the loop; abort covers a stuck callback.
			handle.abort();
		}

		tracing::info!(track = %self.track_name, "consumer stopped");
	}

	pub fn is_running(&self) -> bool {
		if *self.stop.borrow() {
			return false;
		}

		self.handle
			.lock()
			.as_ref()
			.map(|handle| !handle.is_finished())
			.unwrap_or(false)
	}

	pub fn track_name(&self) -> &str {
		&self.track_name
	}
}

impl Drop for Consumer {
	fn drop(&mut self) {
		self.stop();
	}
}

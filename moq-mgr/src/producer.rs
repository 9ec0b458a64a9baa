//! A producer worker: owns the track for one configured broadcast and the
//! group currently being written to it.

use anyhow::{Context, Result};
use bytes::Bytes;
use parking_lot::Mutex;

use moq_core::{BroadcastProducer, GroupProducer, Track, TrackProducer};

#[derive(Clone, Debug)]
pub struct BroadcastConfig {
	pub track_name: String,
	pub priority: u8,
}

pub struct Producer {
	config: BroadcastConfig,
	track: Mutex<Option<TrackProducer>>,
	group: Mutex<Option<GroupProducer>>,
}

impl Producer {
	pub fn new(config: BroadcastConfig) -> Self {
		Self {
			config,
			track: Mutex::new(None),
			group: Mutex::new(None),
		}
	}

	/// Create the track inside the broadcast. Called on every (re)connect.
	pub fn initialize(&self, broadcast: &mut BroadcastProducer) -> Result<()> {
		let track = Track::new(&self.config.track_name).with_priority(self.config.priority);
		let track = broadcast
			.create_track(track)
			.context("failed to create track")?;

		*self.track.lock() = Some(track);

		tracing::info!(track = %self.config.track_name, "producer initialized");
		Ok(())
	}

	/// Start a new group, finishing the current one.
	pub fn start_group(&self) -> Result<()> {
		let mut track = self.track.lock();
		let track = track.as_mut().context("producer not initialized")?;

		let group = track.append_group().context("failed to create group")?;
		*self.group.lock() = Some(group);

		Ok(())
	}

	/// Append a frame to the current group.
	pub fn write_frame(&self, data: &[u8]) -> Result<()> {
		let mut group = self.group.lock();
		let group = group.as_mut().context("group not started")?;

		group
			.write_frame(Bytes::copy_from_slice(data))
			.context("failed to write frame")?;
		Ok(())
	}

	/// Finish the current group; consumers see end-of-group.
	pub fn finish_group(&self) -> Result<()> {
		if let Some(mut group) = self.group.lock().take() {
			group.finish().context("failed to finish group")?;
		}
		Ok(())
	}

	/// Write a whole object as a single-frame group.
	pub fn write_object(&self, data: &[u8]) -> Result<()> {
		self.start_group()?;
		self.write_frame(data)?;
		self.finish_group()?;
		Ok(())
	}

	/// Drop the live handles, e.g. when the session disconnects.
	pub fn reset(&self) {
		if let Some(mut group) = self.group.lock().take() {
			let _ = group.finish();
		}
		*self.track.lock() = None;
	}

	pub fn track_name(&self) -> &str {
		&self.config.track_name
	}

	pub fn is_initialized(&self) -> bool {
		self.track.lock().is_some()
	}
}

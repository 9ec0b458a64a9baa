//! A broadcast is a collection of tracks, split into a [BroadcastProducer]
//! and [BroadcastConsumer] handle.
//!
//! The producer inserts tracks up front or serves them on demand via
//! [BroadcastProducer::requested_track]. The consumer subscribes by name;
//! subscribing to a track that does not exist (yet) is not an error, the
//! returned consumer simply yields nothing until a producer fulfills it.
//!
//! The consumer half is the shareable, read-only view handed to a session
//! for publishing; it never aliases the producer.

use std::{
	collections::{hash_map, HashMap, HashSet, VecDeque},
	task::Poll,
};

use crate::Error;

use super::state::{Consumer, Producer};
use super::{Produce, Track, TrackConsumer, TrackProducer};

/// A collection of tracks published together under one path.
#[derive(Clone, Copy, Debug, Default)]
pub struct Broadcast {}

impl Broadcast {
	pub fn produce() -> Produce<BroadcastProducer, BroadcastConsumer> {
		let producer = BroadcastProducer::new();
		Produce {
			consumer: producer.consume(),
			producer,
		}
	}
}

#[derive(Default)]
struct State {
	// All tracks by name, including pending subscriber requests.
	tracks: HashMap<String, TrackProducer>,

	// Requested tracks the producer has not picked up yet.
	requested: VecDeque<TrackProducer>,

	// Names whose map entry is a subscriber request, not a published track.
	// A published track with the same name displaces the request entry.
	requested_names: HashSet<String>,

	// No more tracks will be inserted or served.
	fin: bool,
}

impl State {
	fn request(&mut self, track: Track) -> TrackConsumer {
		let producer = TrackProducer::new(track);
		// Create the consumer before queueing to keep the request used.
		let consumer = producer.consume();
		self.requested_names.insert(producer.name.clone());
		self.tracks.insert(producer.name.clone(), producer.clone());
		self.requested.push_back(producer);
		consumer
	}
}

/// Publish a broadcast by inserting tracks, or serving them on request.
#[derive(Clone, Default)]
pub struct BroadcastProducer {
	state: Producer<State>,
}

impl BroadcastProducer {
	pub fn new() -> Self {
		Self::default()
	}

	/// Produce a new track and insert it into the broadcast.
	pub fn create_track<T: Into<Track>>(&mut self, track: T) -> Result<TrackProducer, Error> {
		let track = TrackProducer::new(track);
		self.insert_track(track.clone())?;
		Ok(track)
	}

	/// Insert an existing track producer into the broadcast.
	///
	/// Only an actively published track counts as a duplicate. A pending
	/// subscriber request for the same name is displaced and aborted, which
	/// tells its subscribers to subscribe again and reach the real track.
	pub fn insert_track(&mut self, track: TrackProducer) -> Result<(), Error> {
		let name = track.name.clone();

		let displaced = self.state.modify(|state| {
			let displaced = state.requested_names.remove(&name);
			match state.tracks.entry(name) {
				hash_map::Entry::Vacant(entry) => {
					entry.insert(track);
					Ok(None)
				}
				hash_map::Entry::Occupied(mut entry) => {
					if displaced || entry.get().is_closed() {
						Ok(Some(entry.insert(track)))
					} else {
						Err(Error::Duplicate)
					}
				}
			}
		})??;

		if let Some(displaced) = displaced {
			let _ = displaced.abort(Error::Cancel);
		}

		Ok(())
	}

	/// Remove a track from the lookup.
	pub fn remove_track(&mut self, name: &str) -> Result<TrackProducer, Error> {
		self.state
			.modify(|state| state.tracks.remove(name).ok_or(Error::NotFound))?
	}

	/// Return the next track requested by a subscriber.
	///
	/// Returns None once the broadcast is finished.
	pub async fn requested_track(&mut self) -> Result<Option<TrackProducer>, Error> {
		self.state
			.wait_modify(|state| {
				if let Some(track) = state.requested.pop_front() {
					return Poll::Ready(Some(track));
				}
				if state.fin {
					return Poll::Ready(None);
				}
				Poll::Pending
			})
			.await
	}

	/// No more tracks; pending requests are served, new ones are rejected.
	pub fn finish(&mut self) -> Result<(), Error> {
		self.state.modify(|state| state.fin = true)
	}

	pub fn abort(self, err: Error) -> Result<(), Error> {
		self.state.close(err)
	}

	/// Create a new consumer for the broadcast.
	pub fn consume(&self) -> BroadcastConsumer {
		BroadcastConsumer {
			state: self.state.consume(),
		}
	}

	/// Block until there are no active consumers.
	pub async fn unused(&self) {
		self.state.unused().await
	}

	pub fn is_clone(&self, other: &Self) -> bool {
		self.state.is_clone(&other.state)
	}
}

/// Subscribe to tracks within a broadcast.
#[derive(Clone)]
pub struct BroadcastConsumer {
	state: Consumer<State>,
}

impl BroadcastConsumer {
	/// Subscribe to a track by name.
	///
	/// If the track is not published, a request is queued for the producer;
	/// the returned consumer yields nothing until it is fulfilled. Dropping
	/// every consumer of an unfulfilled request cancels it.
	pub fn subscribe_track<T: Into<Track>>(&self, track: T) -> Result<TrackConsumer, Error> {
		let track = track.into();

		self.state.modify(|state| {
			// An existing live track or request is shared.
			if let Some(existing) = state.tracks.get(&track.name) {
				if !existing.is_closed() {
					return Ok(existing.consume());
				}
			}

			if state.fin {
				return Err(Error::Closed);
			}

			// Either the name is unknown or its previous request died.
			Ok(state.request(track))
		})?
	}

	/// Look up a track that is already published, without requesting it.
	pub fn get_track(&self, name: &str) -> Option<TrackConsumer> {
		self.state.borrow(|state| {
			state
				.tracks
				.get(name)
				.filter(|track| !track.is_closed())
				.map(|track| track.consume())
		})
	}

	/// Block until the broadcast is closed.
	pub async fn closed(&self) -> Error {
		self.state.closed().await
	}

	pub fn is_clone(&self, other: &Self) -> bool {
		self.state.is_clone(&other.state)
	}
}

#[cfg(test)]
use futures::FutureExt;

#[cfg(test)]
impl BroadcastProducer {
	pub fn assert_used(&self) {
		assert!(self.unused().now_or_never().is_none(), "should be used");
	}

	pub fn assert_unused(&self) {
		assert!(self.unused().now_or_never().is_some(), "should be unused");
	}

	pub fn assert_request(&mut self) -> TrackProducer {
		self.requested_track()
			.now_or_never()
			.expect("request would have blocked")
			.expect("broadcast errored")
			.expect("broadcast was finished")
	}

	pub fn assert_no_request(&mut self) {
		assert!(
			self.requested_track().now_or_never().is_none(),
			"request would not have blocked"
		);
	}
}

#[cfg(test)]
impl BroadcastConsumer {
	pub fn assert_not_closed(&self) {
		assert!(self.closed().now_or_never().is_none(), "should not be closed");
	}

	pub fn assert_closed(&self) {
		assert!(self.closed().now_or_never().is_some(), "should be closed");
	}

	pub fn assert_subscribe<T: Into<Track>>(&self, track: T) -> TrackConsumer {
		self.subscribe_track(track).expect("subscribe error")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn insert() {
		let mut broadcast = Broadcast::produce();

		let mut track1 = broadcast.producer.create_track("track1").unwrap();
		track1.append_group().unwrap();

		let mut sub = broadcast.consumer.assert_subscribe("track1");
		sub.assert_group();

		// Duplicate inserts are rejected.
		assert!(matches!(
			broadcast.producer.create_track("track1"),
			Err(Error::Duplicate)
		));
	}

	#[tokio::test]
	async fn requests() {
		let mut broadcast = Broadcast::produce();

		let mut sub1 = broadcast.consumer.assert_subscribe("missing");
		sub1.assert_not_closed();
		sub1.assert_no_group();

		// A second subscription to the same name reuses the request.
		let sub2 = broadcast.consumer.assert_subscribe("missing");
		assert!(sub2.is_clone(&sub1));

		// The producer sees exactly one request.
		let mut requested = broadcast.producer.assert_request();
		broadcast.producer.assert_no_request();
		assert_eq!(requested.name, "missing");

		// Fulfilling it reaches both subscribers.
		requested.append_group().unwrap();
		sub1.assert_group();
	}

	#[tokio::test]
	async fn request_cancelled() {
		let mut broadcast = Broadcast::produce();

		let sub = broadcast.consumer.assert_subscribe("missing");
		let requested = broadcast.producer.assert_request();

		// Dropping all subscribers makes the requested producer unused,
		// at which point whoever serves it aborts the track.
		drop(sub);
		assert!(requested.unused().now_or_never().is_some());
		requested.abort(Error::Cancel).unwrap();

		// A later subscribe after the request died issues a fresh one.
		let _sub2 = broadcast.consumer.assert_subscribe("missing");
		let requested2 = broadcast.producer.assert_request();
		assert_eq!(requested2.name, "missing");
	}

	#[tokio::test]
	async fn insert_displaces_request() {
		let mut broadcast = Broadcast::produce();

		// A subscriber asks for a track before the publisher creates it.
		let sub = broadcast.consumer.assert_subscribe("early");

		// The publisher creating the track is not a duplicate.
		let mut track = broadcast.producer.create_track("early").unwrap();
		track.append_group().unwrap();

		// The dangling request is aborted so its subscriber resubscribes.
		sub.assert_closed();

		// New subscribers attach to the published track.
		let mut sub2 = broadcast.consumer.assert_subscribe("early");
		sub2.assert_group();
	}

	#[tokio::test]
	async fn finish() {
		let mut broadcast = Broadcast::produce();
		broadcast.producer.finish().unwrap();

		assert!(matches!(
			broadcast.consumer.subscribe_track("late"),
			Err(Error::Closed)
		));
	}

	#[tokio::test]
	async fn closed() {
		let broadcast = Broadcast::produce();

		broadcast.consumer.assert_not_closed();
		drop(broadcast.producer);
		broadcast.consumer.assert_closed();

		// Requests after the producer is gone fail.
		assert!(broadcast.consumer.subscribe_track("track").is_err());
	}

	#[tokio::test]
	async fn unused() {
		let broadcast = Broadcast::produce();
		let producer = broadcast.producer;
		producer.assert_used();

		let consumer2 = broadcast.consumer.clone();
		drop(broadcast.consumer);
		producer.assert_used();

		drop(consumer2);
		producer.assert_unused();
	}
}

//! A track is a sequence of groups, split into a [TrackProducer] and
//! [TrackConsumer] handle.
//!
//! Groups are delivered to consumers in arrival order, which is not
//! necessarily sequence order; anybody who cares about ordering across
//! groups must use [Group::sequence]. Within a group, frames are ordered.
//!
//! Creating a new group implicitly finishes the previous one created by the
//! same producer. A cloned [TrackConsumer] receives a copy of every unread
//! group (fanout).

use std::{collections::HashSet, fmt, ops::Deref, task::Poll};

use crate::Error;

use super::state::{Consumer, Producer};
use super::{Group, GroupConsumer, GroupProducer, Produce};

/// Static information about a track.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Track {
	pub name: String,

	/// Smaller is more important during congestion; 0 is the highest.
	pub priority: u8,
}

impl Track {
	pub fn new<T: ToString>(name: T) -> Self {
		Self {
			name: name.to_string(),
			priority: 0,
		}
	}

	pub fn with_priority(mut self, priority: u8) -> Self {
		self.priority = priority;
		self
	}

	pub fn produce(self) -> Produce<TrackProducer, TrackConsumer> {
		let producer = TrackProducer::new(self);
		Produce {
			consumer: producer.consume(),
			producer,
		}
	}
}

impl fmt::Display for Track {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.name)
	}
}

impl From<&str> for Track {
	fn from(name: &str) -> Self {
		Self::new(name)
	}
}

impl From<String> for Track {
	fn from(name: String) -> Self {
		Self { name, priority: 0 }
	}
}

impl From<&Track> for Track {
	fn from(track: &Track) -> Self {
		track.clone()
	}
}

#[derive(Default)]
struct State {
	// Groups in arrival order, kept for fanout.
	groups: Vec<GroupProducer>,

	// Sequences seen so far, to reject duplicates.
	duplicates: HashSet<u64>,

	// The highest sequence number created.
	max_sequence: Option<u64>,

	// No more groups will be created.
	fin: bool,
}

impl State {
	fn create_group(&mut self, group: Group) -> Result<GroupProducer, Error> {
		if self.fin {
			return Err(Error::Closed);
		}

		if !self.duplicates.insert(group.sequence) {
			return Err(Error::Duplicate);
		}

		let group = GroupProducer::new(group);
		self.max_sequence = Some(self.max_sequence.unwrap_or_default().max(group.sequence));

		self.groups.push(group.clone());
		Ok(group)
	}
}

/// A producer for a track, used to create new groups.
///
/// Groups may be created concurrently through separate clones; each handle
/// only finishes the groups it created itself.
pub struct TrackProducer {
	info: Track,
	state: Producer<State>,

	// The group most recently created through this handle, if still open.
	current: Option<GroupProducer>,
}

impl TrackProducer {
	pub fn new<T: Into<Track>>(info: T) -> Self {
		Self {
			info: info.into(),
			state: Producer::default(),
			current: None,
		}
	}

	pub fn info(&self) -> &Track {
		&self.info
	}

	/// Create a new group with the given sequence number.
	///
	/// Implicitly finishes the previous group created through this handle.
	/// A sequence lower than the last one is allowed; consumers will simply
	/// observe it out of order. A duplicate sequence is an error.
	pub fn create_group<T: Into<Group>>(&mut self, info: T) -> Result<GroupProducer, Error> {
		let info = info.into();
		let group = self.state.modify(|state| state.create_group(info))??;

		if let Some(mut previous) = self.current.replace(group.clone()) {
			let _ = previous.finish();
		}

		Ok(group)
	}

	/// Create a new group with the next sequence number.
	pub fn append_group(&mut self) -> Result<GroupProducer, Error> {
		let group = self.state.modify(|state| {
			let sequence = state.max_sequence.map(|max| max + 1).unwrap_or(0);
			state.create_group(Group { sequence })
		})??;

		if let Some(mut previous) = self.current.replace(group.clone()) {
			let _ = previous.finish();
		}

		Ok(group)
	}

	/// No more groups; consumers see end-of-track after the buffered ones.
	pub fn finish(&mut self) -> Result<(), Error> {
		if let Some(mut current) = self.current.take() {
			let _ = current.finish();
		}
		self.state.modify(|state| state.fin = true)
	}

	pub fn abort(self, err: Error) -> Result<(), Error> {
		self.state.close(err)
	}

	/// Create a new consumer for the track.
	pub fn consume(&self) -> TrackConsumer {
		TrackConsumer {
			info: self.info.clone(),
			state: self.state.consume(),
			index: 0,
		}
	}

	/// Block until there are no active consumers.
	pub async fn unused(&self) {
		self.state.unused().await
	}

	pub fn is_closed(&self) -> bool {
		self.state.is_closed()
	}

	pub fn is_clone(&self, other: &Self) -> bool {
		self.state.is_clone(&other.state)
	}
}

impl Clone for TrackProducer {
	fn clone(&self) -> Self {
		Self {
			info: self.info.clone(),
			state: self.state.clone(),
			// Clones don't inherit the open group; they finish their own.
			current: None,
		}
	}
}

impl Deref for TrackProducer {
	type Target = Track;

	fn deref(&self) -> &Self::Target {
		&self.info
	}
}

/// A consumer for a track, used to read groups in arrival order.
#[derive(Clone)]
pub struct TrackConsumer {
	info: Track,
	state: Consumer<State>,

	// The number of groups we've returned.
	index: usize,
}

impl TrackConsumer {
	pub fn info(&self) -> &Track {
		&self.info
	}

	/// Return the next group, or None at end-of-track.
	pub async fn next_group(&mut self) -> Result<Option<GroupConsumer>, Error> {
		let index = self.index;
		let group = self
			.state
			.wait(|state| {
				if let Some(group) = state.groups.get(index) {
					return Poll::Ready(Some(group.consume()));
				}
				if state.fin {
					return Poll::Ready(None);
				}
				Poll::Pending
			})
			.await?;

		if group.is_some() {
			self.index += 1;
		}

		Ok(group)
	}

	/// Block until the track is closed.
	pub async fn closed(&self) -> Error {
		self.state.closed().await
	}

	pub fn is_clone(&self, other: &Self) -> bool {
		self.state.is_clone(&other.state)
	}
}

impl Deref for TrackConsumer {
	type Target = Track;

	fn deref(&self) -> &Self::Target {
		&self.info
	}
}

#[cfg(test)]
use futures::FutureExt;

#[cfg(test)]
impl TrackConsumer {
	pub fn assert_group(&mut self) -> GroupConsumer {
		self.next_group()
			.now_or_never()
			.expect("group would have blocked")
			.expect("track errored")
			.expect("track was finished")
	}

	pub fn assert_no_group(&mut self) {
		assert!(
			self.next_group().now_or_never().is_none(),
			"next group would not have blocked"
		);
	}

	pub fn assert_fin(&mut self) {
		let group = self
			.next_group()
			.now_or_never()
			.expect("group would have blocked")
			.expect("track errored");
		assert!(group.is_none(), "expected end-of-track");
	}

	pub fn assert_not_closed(&self) {
		assert!(self.closed().now_or_never().is_none(), "should not be closed");
	}

	pub fn assert_closed(&self) {
		assert!(self.closed().now_or_never().is_some(), "should be closed");
	}
}

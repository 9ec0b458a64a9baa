//! A group is an ordered stream of frames, split into a [GroupProducer] and
//! [GroupConsumer] handle.
//!
//! Frames are opaque byte payloads, delivered to every consumer in the order
//! they were written. A consumer can be cloned, in which case each clone
//! receives a copy of every unread frame (fanout).
//!
//! A finished group ends with `None`; an aborted group ends with an error.

use std::{ops::Deref, task::Poll};

use bytes::Bytes;

use crate::Error;

use super::state::{Consumer, Producer};
use super::Produce;

/// A group carries a sequence number because groups can arrive out of order.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Group {
	pub sequence: u64,
}

impl<T: Into<u64>> From<T> for Group {
	fn from(sequence: T) -> Self {
		Self {
			sequence: sequence.into(),
		}
	}
}

impl Group {
	pub fn produce(self) -> Produce<GroupProducer, GroupConsumer> {
		let producer = GroupProducer::new(self);
		Produce {
			consumer: producer.consume(),
			producer,
		}
	}
}

#[derive(Default)]
struct State {
	// The frames written thus far, kept for fanout.
	frames: Vec<Bytes>,

	// No more frames will be written.
	fin: bool,
}

/// Write a group, frame-by-frame.
#[derive(Clone)]
pub struct GroupProducer {
	info: Group,
	state: Producer<State>,
}

impl GroupProducer {
	pub fn new<T: Into<Group>>(info: T) -> Self {
		Self {
			info: info.into(),
			state: Producer::default(),
		}
	}

	pub fn info(&self) -> &Group {
		&self.info
	}

	/// Append a frame to the group.
	///
	/// Zero-length frames are valid. Fails once the group is finished.
	pub fn write_frame<B: Into<Bytes>>(&mut self, frame: B) -> Result<(), Error> {
		let frame = frame.into();
		self.state.modify(|state| {
			if state.fin {
				return Err(Error::Closed);
			}
			state.frames.push(frame);
			Ok(())
		})?
	}

	/// Clean termination of the group; consumers see end-of-group.
	///
	/// Idempotent, so a producer can be finished again implicitly.
	pub fn finish(&mut self) -> Result<(), Error> {
		self.state.modify(|state| state.fin = true)
	}

	/// Abort the group; consumers see an error after any buffered frames.
	pub fn abort(self, err: Error) -> Result<(), Error> {
		self.state.close(err)
	}

	/// Create a new consumer for the group.
	pub fn consume(&self) -> GroupConsumer {
		GroupConsumer {
			info: self.info.clone(),
			state: self.state.consume(),
			index: 0,
		}
	}

	/// Block until there are no active consumers.
	pub async fn unused(&self) {
		self.state.unused().await
	}
}

impl Deref for GroupProducer {
	type Target = Group;

	fn deref(&self) -> &Self::Target {
		&self.info
	}
}

/// Read a group, frame-by-frame.
///
/// A lazy, finite, non-restartable sequence: each clone continues from the
/// current offset but then runs independently.
#[derive(Clone)]
pub struct GroupConsumer {
	info: Group,
	state: Consumer<State>,

	// The number of frames we've read.
	index: usize,
}

impl GroupConsumer {
	pub fn info(&self) -> &Group {
		&self.info
	}

	/// Read the next frame, or None at end-of-group.
	pub async fn read_frame(&mut self) -> Result<Option<Bytes>, Error> {
		let index = self.index;
		let frame = self
			.state
			.wait(|state| {
				if let Some(frame) = state.frames.get(index) {
					return Poll::Ready(Some(frame.clone()));
				}
				if state.fin {
					return Poll::Ready(None);
				}
				Poll::Pending
			})
			.await?;

		if frame.is_some() {
			self.index += 1;
		}

		Ok(frame)
	}

	/// Block until the group is finished or aborted.
	pub async fn closed(&self) -> Result<(), Error> {
		let res = self
			.state
			.wait(|state| if state.fin { Poll::Ready(()) } else { Poll::Pending })
			.await;
		res.map(|_| ())
	}
}

impl Deref for GroupConsumer {
	type Target = Group;

	fn deref(&self) -> &Self::Target {
		&self.info
	}
}

#[cfg(test)]
use futures::FutureExt;

#[cfg(test)]
impl GroupConsumer {
	pub fn assert_frame<B: AsRef<[u8]>>(&mut self, expected: B) {
		let frame = self
			.read_frame()
			.now_or_never()
			.expect("read would have blocked")
			.expect("read errored")
			.expect("group was finished");
		assert_eq!(frame, expected.as_ref());
	}

	pub fn assert_fin(&mut self) {
		let frame = self
			.read_frame()
			.now_or_never()
			.expect("read would have blocked")
			.expect("read errored");
		assert!(frame.is_none(), "expected end-of-group");
	}

	pub fn assert_no_frame(&mut self) {
		assert!(self.read_frame().now_or_never().is_none(), "read would not have blocked");
	}

	pub fn assert_error(&mut self) {
		self.read_frame()
			.now_or_never()
			.expect("read would have blocked")
			.expect_err("expected an error");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn write_read() {
		let mut group = Group::produce(Group { sequence: 0 });

		group.producer.write_frame("hello").unwrap();
		group.producer.finish().unwrap();

		group.consumer.assert_frame("hello");
		group.consumer.assert_fin();
	}

	#[tokio::test]
	async fn frames_in_order() {
		let mut group = Group::produce(Group { sequence: 3 });

		group.producer.write_frame("one").unwrap();
		group.producer.write_frame("two").unwrap();
		group.producer.write_frame("three").unwrap();
		group.producer.finish().unwrap();

		group.consumer.assert_frame("one");
		group.consumer.assert_frame("two");
		group.consumer.assert_frame("three");
		group.consumer.assert_fin();
	}

	#[tokio::test]
	async fn write_after_finish() {
		let mut group = Group::produce(Group { sequence: 0 });

		group.producer.finish().unwrap();
		assert!(matches!(group.producer.write_frame("late"), Err(Error::Closed)));

		// The consumer sees a clean end, never the failed write.
		group.consumer.assert_fin();
	}

	#[tokio::test]
	async fn empty_group() {
		let mut group = Group::produce(Group { sequence: 0 });
		group.producer.finish().unwrap();
		group.consumer.assert_fin();
	}

	#[tokio::test]
	async fn zero_length_frame() {
		let mut group = Group::produce(Group { sequence: 0 });

		group.producer.write_frame(Bytes::new()).unwrap();
		group.producer.finish().unwrap();

		group.consumer.assert_frame("");
		group.consumer.assert_fin();
	}

	#[tokio::test]
	async fn fanout() {
		let mut group = Group::produce(Group { sequence: 0 });
		let mut consumer2 = group.consumer.clone();

		group.producer.write_frame("data").unwrap();
		group.producer.finish().unwrap();

		group.consumer.assert_frame("data");
		consumer2.assert_frame("data");
	}

	#[tokio::test]
	async fn abort() {
		let mut group = Group::produce(Group { sequence: 0 });

		group.producer.write_frame("data").unwrap();
		group.producer.abort(Error::Cancel).unwrap();

		// Buffered frames drain first, then the error surfaces.
		group.consumer.assert_frame("data");
		group.consumer.assert_error();
	}

	#[tokio::test]
	async fn drop_without_finish() {
		let mut group = Group::produce(Group { sequence: 0 });

		group.producer.write_frame("data").unwrap();
		drop(group.producer);

		group.consumer.assert_frame("data");
		group.consumer.assert_error();
	}

	#[tokio::test]
	async fn max_sequence() {
		let group = Group::produce(Group { sequence: u64::MAX });
		assert_eq!(group.producer.sequence, u64::MAX);
	}
}

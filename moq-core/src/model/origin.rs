//! An origin is the collection of broadcasts visible within a session,
//! split into an [OriginProducer] and [OriginConsumer] handle.
//!
//! Publishing a broadcast announces its path; closing the broadcast
//! withdraws it. The consumer observes these transitions as a lazy,
//! non-restartable sequence of [Announce] values and can bind to any
//! currently-active broadcast by path.
//!
//! The announce queue is bounded. Consecutive duplicates for a path are
//! suppressed, and under pressure the oldest withdraw/re-activate pair for
//! a path collapses into a single active observation. A withdrawal that is
//! the last state of a path is never dropped.

use std::{
	collections::{HashMap, VecDeque},
	task::Poll,
};

use crate::Error;

use super::state::{Consumer, Producer};
use super::{BroadcastConsumer, Produce};

/// A `(path, active)` transition for a broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Announce {
	pub path: String,
	pub active: bool,
}

/// How many transitions we queue before coalescing kicks in.
const QUEUE_BOUND: usize = 32;

pub struct Origin {}

impl Origin {
	pub fn produce() -> Produce<OriginProducer, OriginConsumer> {
		let producer = OriginProducer::default();
		Produce {
			consumer: producer.consume(),
			producer,
		}
	}
}

#[derive(Default)]
struct State {
	// Currently active broadcasts by path.
	broadcasts: HashMap<String, BroadcastConsumer>,

	// Transitions not yet observed by the consumer.
	updates: VecDeque<Announce>,

	// No more broadcasts will be published.
	fin: bool,
}

impl State {
	fn push_update(&mut self, path: &str, active: bool) {
		// Suppress consecutive duplicates for the same path.
		if let Some(last) = self.updates.iter().rev().find(|a| a.path == path) {
			if last.active == active {
				return;
			}
		}

		if self.updates.len() >= QUEUE_BOUND {
			self.collapse();
		}

		self.updates.push_back(Announce {
			path: path.to_string(),
			active,
		});
	}

	// Drop the oldest withdraw/re-activate pair for some path, leaving the
	// path observed as continuously active. Never touches a withdrawal that
	// is the last queued state of its path.
	fn collapse(&mut self) {
		for i in 0..self.updates.len() {
			if self.updates[i].active {
				continue;
			}

			let path = self.updates[i].path.clone();
			let next = self
				.updates
				.iter()
				.enumerate()
				.skip(i + 1)
				.find(|(_, a)| a.path == path);

			if let Some((j, next)) = next {
				debug_assert!(next.active, "duplicate suppression should alternate");
				self.updates.remove(j);
				self.updates.remove(i);
				return;
			}
		}
	}
}

/// Publish broadcasts into an origin.
#[derive(Clone, Default)]
pub struct OriginProducer {
	state: Producer<State>,
}

impl OriginProducer {
	/// Publish a broadcast at the given path, announcing it to the consumer.
	///
	/// The path must not be actively published. The broadcast is withdrawn
	/// automatically when it closes.
	pub fn publish<T: ToString>(&mut self, path: T, broadcast: BroadcastConsumer) -> Result<(), Error> {
		let path = path.to_string();

		self.state.modify(|state| {
			if state.fin {
				return Err(Error::Closed);
			}
			if state.broadcasts.contains_key(&path) {
				return Err(Error::Duplicate);
			}

			state.broadcasts.insert(path.clone(), broadcast.clone());
			state.push_update(&path, true);
			Ok(())
		})??;

		// Withdraw the path once the broadcast closes.
		let this = self.clone();
		tokio::spawn(async move {
			broadcast.closed().await;
			this.unpublish(&path, &broadcast);
		});

		Ok(())
	}

	// Remove the path if it still maps to this exact broadcast.
	fn unpublish(&self, path: &str, broadcast: &BroadcastConsumer) {
		let _ = self.state.modify(|state| {
			if let Some(current) = state.broadcasts.get(path) {
				if current.is_clone(broadcast) {
					state.broadcasts.remove(path);
					state.push_update(path, false);
				}
			}
		});
	}

	/// Withdraw a path immediately, without waiting for its broadcast to
	/// close. A no-op if the path is not active.
	pub fn withdraw(&mut self, path: &str) -> Result<(), Error> {
		self.state.modify(|state| {
			if state.broadcasts.remove(path).is_some() {
				state.push_update(path, false);
			}
		})
	}

	/// No more announcements; the consumer sees end-of-stream after draining.
	pub fn finish(&mut self) -> Result<(), Error> {
		self.state.modify(|state| state.fin = true)
	}

	pub fn abort(self, err: Error) -> Result<(), Error> {
		self.state.close(err)
	}

	/// Create a new consumer for the origin.
	pub fn consume(&self) -> OriginConsumer {
		OriginConsumer {
			state: self.state.consume(),
		}
	}
}

/// Observe announcements and bind to active broadcasts.
///
/// The announce queue is shared, so only one consumer should call
/// [Self::announced]; clones are fine for [Self::consume] lookups.
#[derive(Clone)]
pub struct OriginConsumer {
	state: Consumer<State>,
}

impl OriginConsumer {
	/// Return the next announcement, or None at end-of-stream.
	pub async fn announced(&mut self) -> Option<Announce> {
		loop {
			let ready = self
				.state
				.wait(|state| {
					if !state.updates.is_empty() {
						Poll::Ready(true)
					} else if state.fin {
						Poll::Ready(false)
					} else {
						Poll::Pending
					}
				})
				.await;

			match ready {
				Ok(true) => match self.state.modify(|state| state.updates.pop_front()) {
					Ok(Some(update)) => return Some(update),
					Ok(None) => continue,
					Err(_) => return None,
				},
				Ok(false) | Err(_) => return None,
			}
		}
	}

	/// Return the next announcement if one is already queued.
	pub fn try_announced(&mut self) -> Option<Announce> {
		self.state
			.modify(|state| state.updates.pop_front())
			.ok()
			.flatten()
	}

	/// Bind to a currently-active broadcast.
	pub fn consume(&self, path: &str) -> Option<BroadcastConsumer> {
		self.state.borrow(|state| state.broadcasts.get(path).cloned())
	}

	/// Snapshot of every currently-active path.
	pub fn paths(&self) -> Vec<String> {
		self.state.borrow(|state| state.broadcasts.keys().cloned().collect())
	}

	/// Block until the origin is closed.
	pub async fn closed(&self) -> Error {
		self.state.closed().await
	}
}

//! A tiny wake-up primitive shared by every producer/consumer state.
//!
//! Poll functions receive a [Waiter] and register it with any [WaiterList]
//! they want to be woken by. Registration is tracked so a waiter that
//! completes (or is dropped) removes itself from every list.

use std::{
	collections::HashMap,
	future::Future,
	marker::PhantomData,
	pin::Pin,
	sync::{
		atomic::{self, AtomicU64},
		Arc, Mutex,
	},
	task::{Context, Poll, Waker},
};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

struct WaiterState {
	id: u64,
	registered: Mutex<Vec<WaiterList>>,
}

impl WaiterState {
	fn new() -> Self {
		Self {
			id: NEXT_ID.fetch_add(1, atomic::Ordering::Relaxed),
			registered: Mutex::new(Vec::new()),
		}
	}

	fn clear(&mut self) {
		for list in self.registered.lock().unwrap().drain(..) {
			list.unregister(self.id);
		}
	}

	fn register(&self, list: &WaiterList, waker: Waker) {
		self.registered.lock().unwrap().push(list.clone());
		list.register(self.id, waker);
	}
}

impl Drop for WaiterState {
	fn drop(&mut self) {
		self.clear();
	}
}

/// Handle passed to poll functions.
pub struct Waiter<'a> {
	state: Option<&'a WaiterState>,
	waker: &'a Waker,
}

impl Waiter<'_> {
	pub fn register(&self, list: &WaiterList) {
		if let Some(state) = self.state {
			state.register(list, self.waker.clone());
		}
	}

	/// A waiter that never wakes, for one-shot polling.
	pub fn noop() -> Self {
		Self {
			state: None,
			waker: Waker::noop(),
		}
	}
}

#[derive(Clone, Debug, Default)]
pub struct WaiterList {
	wakers: Arc<Mutex<HashMap<u64, Waker>>>,
}

impl WaiterList {
	pub fn new() -> Self {
		Self::default()
	}

	fn register(&self, id: u64, waker: Waker) {
		self.wakers.lock().unwrap().insert(id, waker);
	}

	fn unregister(&self, id: u64) {
		self.wakers.lock().unwrap().remove(&id);
	}

	pub fn notify(&self) {
		for (_, waker) in self.wakers.lock().unwrap().drain() {
			waker.wake();
		}
	}
}

pub struct WaiterFn<F, R> {
	poll: F,
	state: WaiterState,
	_marker: PhantomData<R>,
}

/// Turn a poll function into a future.
pub fn waiter_fn<F, R>(poll: F) -> WaiterFn<F, R>
where
	F: FnMut(&Waiter<'_>) -> Poll<R>,
{
	WaiterFn {
		poll,
		state: WaiterState::new(),
		_marker: PhantomData,
	}
}

impl<F, R> Future for WaiterFn<F, R>
where
	F: FnMut(&Waiter<'_>) -> Poll<R> + Unpin,
	R: Unpin,
{
	type Output = R;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<R> {
		let this = self.get_mut();

		let waiter = Waiter {
			state: Some(&this.state),
			waker: cx.waker(),
		};

		let res = (this.poll)(&waiter);
		if res.is_ready() {
			// Already have a result; don't leave stale registrations behind.
			this.state.clear();
		}

		res
	}
}

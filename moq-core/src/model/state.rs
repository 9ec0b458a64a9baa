//! The shared state behind every producer/consumer pair.
//!
//! A [Producer] mutates the value and wakes any waiting consumers.
//! A [Consumer] polls the value until some condition is met.
//! Both sides are reference counted: when the last producer is dropped the
//! state is closed with [Error::Cancel], and when the last consumer is
//! dropped the producer's `unused()` resolves.
//!
//! Graceful end-of-stream is not modeled here; each value carries its own
//! `fin` flag so consumers can drain buffered data before observing it.

use std::{
	sync::{Arc, Mutex},
	task::Poll,
};

use crate::Error;

use super::waiter::{waiter_fn, Waiter, WaiterList};

struct State<T> {
	value: T,
	closed: Result<(), Error>,
	producers: usize,
	consumers: usize,
	waiters: WaiterList,
}

pub(crate) struct Producer<T> {
	state: Arc<Mutex<State<T>>>,
}

impl<T> Producer<T> {
	pub fn new(value: T) -> Self {
		Self {
			state: Arc::new(Mutex::new(State {
				value,
				closed: Ok(()),
				producers: 1,
				consumers: 0,
				waiters: WaiterList::new(),
			})),
		}
	}

	/// Mutate the value and wake any waiters.
	///
	/// Returns an error if the state was closed.
	pub fn modify<F, R>(&self, f: F) -> Result<R, Error>
	where
		F: FnOnce(&mut T) -> R,
	{
		let mut state = self.state.lock().unwrap();
		state.closed.clone()?;

		let res = f(&mut state.value);
		let waiters = state.waiters.clone();
		drop(state);

		waiters.notify();
		Ok(res)
	}

	/// Read the value without waking anybody.
	pub fn borrow<F, R>(&self, f: F) -> R
	where
		F: FnOnce(&T) -> R,
	{
		f(&self.state.lock().unwrap().value)
	}

	/// Close the state with an error; all future operations fail.
	pub fn close(&self, err: Error) -> Result<(), Error> {
		let mut state = self.state.lock().unwrap();
		state.closed.clone()?;
		state.closed = Err(err);

		let waiters = state.waiters.clone();
		drop(state);

		waiters.notify();
		Ok(())
	}

	pub fn is_closed(&self) -> bool {
		self.state.lock().unwrap().closed.is_err()
	}

	/// Create a new consumer of the state.
	pub fn consume(&self) -> Consumer<T> {
		self.state.lock().unwrap().consumers += 1;
		Consumer {
			state: self.state.clone(),
		}
	}

	/// Poll the value with mutable access, registering the waiter on Pending.
	pub fn poll_modify<F, R>(&self, waiter: &Waiter<'_>, mut f: F) -> Poll<Result<R, Error>>
	where
		F: FnMut(&mut T) -> Poll<R>,
	{
		let mut state = self.state.lock().unwrap();

		if let Poll::Ready(res) = f(&mut state.value) {
			return Poll::Ready(Ok(res));
		}

		if let Err(err) = &state.closed {
			return Poll::Ready(Err(err.clone()));
		}

		waiter.register(&state.waiters);
		Poll::Pending
	}

	pub async fn wait_modify<F, R>(&self, mut f: F) -> Result<R, Error>
	where
		F: FnMut(&mut T) -> Poll<R> + Unpin,
		R: Unpin,
	{
		waiter_fn(move |waiter| self.poll_modify(waiter, &mut f)).await
	}

	pub fn poll_unused(&self, waiter: &Waiter<'_>) -> Poll<()> {
		let state = self.state.lock().unwrap();
		if state.consumers == 0 {
			return Poll::Ready(());
		}

		waiter.register(&state.waiters);
		Poll::Pending
	}

	/// Block until there are no active consumers.
	pub async fn unused(&self) {
		waiter_fn(move |waiter| self.poll_unused(waiter)).await
	}

	/// Check if this is the same underlying state as another producer.
	pub fn is_clone(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.state, &other.state)
	}
}

impl<T: Default> Default for Producer<T> {
	fn default() -> Self {
		Self::new(T::default())
	}
}

impl<T> Clone for Producer<T> {
	fn clone(&self) -> Self {
		self.state.lock().unwrap().producers += 1;
		Self {
			state: self.state.clone(),
		}
	}
}

impl<T> Drop for Producer<T> {
	fn drop(&mut self) {
		let mut state = self.state.lock().unwrap();
		state.producers -= 1;

		if state.producers > 0 {
			return;
		}

		if state.closed.is_ok() {
			state.closed = Err(Error::Cancel);
		}

		let waiters = state.waiters.clone();
		drop(state);

		waiters.notify();
	}
}

pub(crate) struct Consumer<T> {
	state: Arc<Mutex<State<T>>>,
}

impl<T> Consumer<T> {
	/// Poll the value, registering the waiter on Pending.
	///
	/// A Ready result from `f` wins over the closed error, so consumers can
	/// drain buffered data before observing the close.
	pub fn poll<F, R>(&self, waiter: &Waiter<'_>, mut f: F) -> Poll<Result<R, Error>>
	where
		F: FnMut(&T) -> Poll<R>,
	{
		let state = self.state.lock().unwrap();

		if let Poll::Ready(res) = f(&state.value) {
			return Poll::Ready(Ok(res));
		}

		if let Err(err) = &state.closed {
			return Poll::Ready(Err(err.clone()));
		}

		waiter.register(&state.waiters);
		Poll::Pending
	}

	/// Block until `f` returns Ready, or the state is closed.
	pub async fn wait<F, R>(&self, mut f: F) -> Result<R, Error>
	where
		F: FnMut(&T) -> Poll<R> + Unpin,
		R: Unpin,
	{
		waiter_fn(move |waiter| self.poll(waiter, &mut f)).await
	}

	pub fn borrow<F, R>(&self, f: F) -> R
	where
		F: FnOnce(&T) -> R,
	{
		f(&self.state.lock().unwrap().value)
	}

	/// Mutate the value from the consumer side.
	///
	/// Used when a consumer registers interest, like requesting a track.
	pub fn modify<F, R>(&self, f: F) -> Result<R, Error>
	where
		F: FnOnce(&mut T) -> R,
	{
		let mut state = self.state.lock().unwrap();
		state.closed.clone()?;

		let res = f(&mut state.value);
		let waiters = state.waiters.clone();
		drop(state);

		waiters.notify();
		Ok(res)
	}

	pub fn poll_closed(&self, waiter: &Waiter<'_>) -> Poll<Error> {
		let state = self.state.lock().unwrap();
		if let Err(err) = &state.closed {
			return Poll::Ready(err.clone());
		}

		waiter.register(&state.waiters);
		Poll::Pending
	}

	/// Block until the state is closed, returning the error.
	pub async fn closed(&self) -> Error {
		waiter_fn(move |waiter| self.poll_closed(waiter)).await
	}

	pub fn is_closed(&self) -> bool {
		self.state.lock().unwrap().closed.is_err()
	}

	/// Check if this is the same underlying state as another consumer.
	pub fn is_clone(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.state, &other.state)
	}
}

impl<T> Clone for Consumer<T> {
	fn clone(&self) -> Self {
		self.state.lock().unwrap().consumers += 1;
		Self {
			state: self.state.clone(),
		}
	}
}

impl<T> Drop for Consumer<T> {
	fn drop(&mut self) {
		let mut state = self.state.lock().unwrap();
		state.consumers -= 1;

		if state.consumers > 0 {
			return;
		}

		let waiters = state.waiters.clone();
		drop(state);

		waiters.notify();
	}
}

//! An in-memory transport, connecting two [Session]s over channels.
//!
//! Used by the end-to-end tests to run a full publisher/subscriber pair
//! without a network. Streams honor the semantics the engine relies on:
//! FIN vs reset, stop codes, and connection close ending every stream.

use std::collections::VecDeque;
use std::pin::pin;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::{mpsc, watch, Notify};

use crate::transport;

#[derive(thiserror::Error, Debug, Clone)]
pub enum MemError {
	#[error("stream reset: code={0}")]
	Reset(u32),

	#[error("stream stopped: code={0}")]
	Stopped(u32),

	#[error("connection closed: code={0}")]
	Closed(u32),
}

impl transport::Error for MemError {
	fn stream_error(&self) -> Option<u32> {
		match self {
			Self::Reset(code) | Self::Stopped(code) => Some(*code),
			Self::Closed(_) => None,
		}
	}

	fn session_error(&self) -> Option<u32> {
		match self {
			Self::Closed(code) => Some(*code),
			_ => None,
		}
	}
}

#[derive(Default)]
struct PipeState {
	chunks: VecDeque<Bytes>,
	fin: bool,
	reset: Option<u32>,
	stopped: Option<u32>,
}

#[derive(Default)]
struct Pipe {
	state: Mutex<PipeState>,
	notify: Notify,
}

pub struct SendHalf {
	pipe: Arc<Pipe>,
	closed: watch::Receiver<Option<u32>>,
}

impl transport::SendStream for SendHalf {
	type Error = MemError;

	async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), MemError> {
		if let Some(code) = *self.closed.borrow() {
			return Err(MemError::Closed(code));
		}

		let mut state = self.pipe.state.lock().unwrap();
		if let Some(code) = state.stopped {
			return Err(MemError::Stopped(code));
		}

		state.chunks.push_back(chunk);
		drop(state);

		self.pipe.notify.notify_waiters();
		Ok(())
	}

	fn finish(&mut self) {
		self.pipe.state.lock().unwrap().fin = true;
		self.pipe.notify.notify_waiters();
	}

	fn reset(&mut self, code: u32) {
		let mut state = self.pipe.state.lock().unwrap();
		if state.fin || state.reset.is_some() {
			return;
		}
		state.reset = Some(code);
		drop(state);

		self.pipe.notify.notify_waiters();
	}

	fn set_priority(&mut self, _priority: i32) {}

	async fn closed(&mut self) -> Result<(), MemError> {
		loop {
			let mut notified = pin!(self.pipe.notify.notified());
			notified.as_mut().enable();

			if let Some(code) = *self.closed.borrow() {
				return Err(MemError::Closed(code));
			}

			if let Some(code) = self.pipe.state.lock().unwrap().stopped {
				return Err(MemError::Stopped(code));
			}

			let mut closed = self.closed.clone();
			tokio::select! {
				_ = notified => {}
				// wait_for sees a close that landed before this iteration.
				_ = closed.wait_for(|code| code.is_some()) => {}
			}
		}
	}
}

impl Drop for SendHalf {
	fn drop(&mut self) {
		// Like QUIC, a stream that is never finished is reset.
		let mut state = self.pipe.state.lock().unwrap();
		if !state.fin && state.reset.is_none() {
			state.reset = Some(0);
			drop(state);
			self.pipe.notify.notify_waiters();
		}
	}
}

pub struct RecvHalf {
	pipe: Arc<Pipe>,
	closed: watch::Receiver<Option<u32>>,
}

impl transport::RecvStream for RecvHalf {
	type Error = MemError;

	async fn read_chunk(&mut self, max: usize) -> Result<Option<Bytes>, MemError> {
		loop {
			let mut notified = pin!(self.pipe.notify.notified());
			notified.as_mut().enable();

			if let Some(code) = *self.closed.borrow() {
				return Err(MemError::Closed(code));
			}

			{
				let mut state = self.pipe.state.lock().unwrap();

				if let Some(front) = state.chunks.front_mut() {
					let chunk = if front.len() > max {
						front.split_to(max)
					} else {
						state.chunks.pop_front().unwrap()
					};
					return Ok(Some(chunk));
				}

				if let Some(code) = state.reset {
					return Err(MemError::Reset(code));
				}

				if state.fin {
					return Ok(None);
				}
			}

			let mut closed = self.closed.clone();
			tokio::select! {
				_ = notified => {}
				// wait_for sees a close that landed before this iteration.
				_ = closed.wait_for(|code| code.is_some()) => {}
			}
		}
	}

	fn stop(&mut self, code: u32) {
		let mut state = self.pipe.state.lock().unwrap();
		if state.stopped.is_none() {
			state.stopped = Some(code);
			drop(state);
			self.pipe.notify.notify_waiters();
		}
	}
}

type BiStream = (SendHalf, RecvHalf);

/// One endpoint of an in-memory connection.
#[derive(Clone)]
pub struct Session {
	closed_tx: Arc<watch::Sender<Option<u32>>>,
	closed_rx: watch::Receiver<Option<u32>>,

	uni_tx: mpsc::UnboundedSender<RecvHalf>,
	uni_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<RecvHalf>>>,

	bi_tx: mpsc::UnboundedSender<BiStream>,
	bi_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<BiStream>>>,
}

/// Create two connected sessions.
///
/// Closing either endpoint closes the connection for both.
pub fn pair() -> (Session, Session) {
	let (closed_tx, closed_rx) = watch::channel(None);
	let closed_tx = Arc::new(closed_tx);

	let (a_uni_tx, b_uni_rx) = mpsc::unbounded_channel();
	let (b_uni_tx, a_uni_rx) = mpsc::unbounded_channel();
	let (a_bi_tx, b_bi_rx) = mpsc::unbounded_channel();
	let (b_bi_tx, a_bi_rx) = mpsc::unbounded_channel();

	let a = Session {
		closed_tx: closed_tx.clone(),
		closed_rx: closed_rx.clone(),
		uni_tx: a_uni_tx,
		uni_rx: Arc::new(tokio::sync::Mutex::new(a_uni_rx)),
		bi_tx: a_bi_tx,
		bi_rx: Arc::new(tokio::sync::Mutex::new(a_bi_rx)),
	};

	let b = Session {
		closed_tx,
		closed_rx,
		uni_tx: b_uni_tx,
		uni_rx: Arc::new(tokio::sync::Mutex::new(b_uni_rx)),
		bi_tx: b_bi_tx,
		bi_rx: Arc::new(tokio::sync::Mutex::new(b_bi_rx)),
	};

	(a, b)
}

impl Session {
	fn error(&self) -> Option<MemError> {
		self.closed_rx.borrow().map(MemError::Closed)
	}

	fn new_pipe(&self) -> (SendHalf, RecvHalf) {
		let pipe = Arc::new(Pipe::default());
		let send = SendHalf {
			pipe: pipe.clone(),
			closed: self.closed_rx.clone(),
		};
		let recv = RecvHalf {
			pipe,
			closed: self.closed_rx.clone(),
		};
		(send, recv)
	}
}

impl transport::Session for Session {
	type SendStream = SendHalf;
	type RecvStream = RecvHalf;
	type Error = MemError;

	async fn open_uni(&self) -> Result<SendHalf, MemError> {
		if let Some(err) = self.error() {
			return Err(err);
		}

		let (send, recv) = self.new_pipe();
		self.uni_tx.send(recv).map_err(|_| MemError::Closed(0))?;
		Ok(send)
	}

	async fn open_bi(&self) -> Result<(SendHalf, RecvHalf), MemError> {
		if let Some(err) = self.error() {
			return Err(err);
		}

		// One pipe per direction; the peer gets the matching halves.
		let (send, peer_recv) = self.new_pipe();
		let (peer_send, recv) = self.new_pipe();
		self.bi_tx
			.send((peer_send, peer_recv))
			.map_err(|_| MemError::Closed(0))?;
		Ok((send, recv))
	}

	async fn accept_uni(&self) -> Result<RecvHalf, MemError> {
		let mut rx = self.uni_rx.lock().await;
		let mut closed = self.closed_rx.clone();

		tokio::select! {
			stream = rx.recv() => stream.ok_or(MemError::Closed(0)),
			_ = closed.wait_for(|code| code.is_some()) => Err(self.error().unwrap()),
		}
	}

	async fn accept_bi(&self) -> Result<(SendHalf, RecvHalf), MemError> {
		let mut rx = self.bi_rx.lock().await;
		let mut closed = self.closed_rx.clone();

		tokio::select! {
			stream = rx.recv() => stream.ok_or(MemError::Closed(0)),
			_ = closed.wait_for(|code| code.is_some()) => Err(self.error().unwrap()),
		}
	}

	fn close(&self, code: u32, _reason: &str) {
		self.closed_tx.send_if_modified(|closed| {
			if closed.is_none() {
				*closed = Some(code);
				true
			} else {
				false
			}
		});
	}

	async fn closed(&self) -> MemError {
		let mut closed = self.closed_rx.clone();
		let code = *closed
			.wait_for(|code| code.is_some())
			.await
			.expect("close sender dropped");
		MemError::Closed(code.unwrap())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::{RecvStream, SendStream, Session as _};

	#[tokio::test]
	async fn uni_roundtrip() {
		let (a, b) = pair();

		let mut send = a.open_uni().await.unwrap();
		send.write_chunk(Bytes::from("hello")).await.unwrap();
		send.finish();

		let mut recv = b.accept_uni().await.unwrap();
		assert_eq!(recv.read_chunk(usize::MAX).await.unwrap().unwrap(), "hello");
		assert!(recv.read_chunk(usize::MAX).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn reset_observed() {
		let (a, b) = pair();

		let mut send = a.open_uni().await.unwrap();
		send.write_chunk(Bytes::from("partial")).await.unwrap();
		send.reset(7);

		let mut recv = b.accept_uni().await.unwrap();
		// Buffered data is still readable, then the reset surfaces.
		assert_eq!(recv.read_chunk(usize::MAX).await.unwrap().unwrap(), "partial");
		match recv.read_chunk(usize::MAX).await {
			Err(MemError::Reset(7)) => {}
			other => panic!("expected reset, got {:?}", other.map(|_| ())),
		}
	}

	#[tokio::test]
	async fn close_ends_accept() {
		let (a, b) = pair();

		let accept = tokio::spawn(async move { b.accept_uni().await });
		a.close(3, "bye");

		match accept.await.unwrap() {
			Err(MemError::Closed(3)) => {}
			other => panic!("expected close, got {:?}", other.map(|_| ())),
		}
	}

	#[tokio::test]
	async fn drop_without_finish_resets() {
		let (a, b) = pair();

		let mut send = a.open_uni().await.unwrap();
		send.write_chunk(Bytes::from("x")).await.unwrap();
		drop(send);

		let mut recv = b.accept_uni().await.unwrap();
		assert_eq!(recv.read_chunk(usize::MAX).await.unwrap().unwrap(), "x");
		assert!(recv.read_chunk(usize::MAX).await.is_err());
	}
}

//! The session engine: a connection state machine multiplexing broadcasts,
//! tracks and groups over one transport connection.
//!
//! A [Session] has a publisher half serving local broadcasts to the peer and
//! a subscriber half mirroring remote broadcasts into a local origin. Which
//! halves are active depends on the [SessionMode].

mod publisher;
mod subscriber;


use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::coding::Stream;
use crate::message::{self, StreamType};
use crate::{transport, BroadcastConsumer, Error, Origin, OriginConsumer};

use publisher::Publisher;
use subscriber::Subscriber;

/// Which directions a session supports, as negotiated by the application.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionMode {
	/// Only publish local broadcasts.
	Publish = 0,

	/// Only consume remote broadcasts.
	Subscribe = 1,

	/// Both directions.
	Both = 2,
}

impl SessionMode {
	pub fn is_publisher(&self) -> bool {
		matches!(self, Self::Publish | Self::Both)
	}

	pub fn is_subscriber(&self) -> bool {
		matches!(self, Self::Subscribe | Self::Both)
	}
}

impl TryFrom<i32> for SessionMode {
	type Error = Error;

	fn try_from(mode: i32) -> Result<Self, Error> {
		match mode {
			0 => Ok(Self::Publish),
			1 => Ok(Self::Subscribe),
			2 => Ok(Self::Both),
			_ => Err(Error::Unsupported),
		}
	}
}

/// The lifecycle of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
	Connecting,
	Connected,
	Closing,
	Closed,
	Terminated,
}

#[derive(Clone)]
struct Status {
	state: SessionState,
	error: Option<Error>,
}

// Dropping the last session handle closes the connection, cancelling every
// producer and consumer derived from it.
struct CloseGuard<S: transport::Session> {
	transport: S,
	status: Arc<watch::Sender<Status>>,
}

impl<S: transport::Session> Drop for CloseGuard<S> {
	fn drop(&mut self) {
		let closing = self.status.send_if_modified(|status| {
			if matches!(
				status.state,
				SessionState::Closing | SessionState::Closed | SessionState::Terminated
			) {
				return false;
			}
			status.state = SessionState::Closing;
			true
		});

		if closing {
			self.transport.close(0, "");
		}
	}
}

/// An established session.
///
/// Cheap to clone; all clones share the same connection.
#[derive(Clone)]
pub struct Session<S: transport::Session> {
	transport: S,
	mode: SessionMode,

	status_tx: Arc<watch::Sender<Status>>,
	status_rx: watch::Receiver<Status>,

	// Local broadcasts we publish to the peer.
	local: crate::OriginProducer,

	// Remote broadcasts announced by the peer; this clone is only used for
	// path lookups, never to pop announcements.
	remote: OriginConsumer,

	// The one announcement consumer handed out to the application.
	origin_slot: Arc<Mutex<Option<OriginConsumer>>>,

	_guard: Arc<CloseGuard<S>>,
}

impl<S: transport::Session> Session<S> {
	/// Establish a session as the client: open the session stream and
	/// negotiate a version.
	pub async fn connect(transport: S, mode: SessionMode) -> Result<Self, Error> {
		let mut setup = Stream::open(&transport).await?;
		setup.writer.encode(&StreamType::Session).await?;
		setup
			.writer
			.encode(&message::ClientSetup {
				versions: vec![message::VERSION],
			})
			.await?;

		let server: message::ServerSetup = setup.reader.decode().await?;
		if server.version != message::VERSION {
			return Err(Error::Version);
		}

		tracing::debug!(version = server.version, "session connected");
		Ok(Self::start(transport, mode, setup))
	}

	/// Establish a session as the accepting side of the handshake.
	pub async fn accept(transport: S, mode: SessionMode) -> Result<Self, Error> {
		let mut setup = Stream::accept(&transport).await?;
		let kind: StreamType = setup.reader.decode().await?;
		if kind != StreamType::Session {
			return Err(Error::UnexpectedStream);
		}

		let client: message::ClientSetup = setup.reader.decode().await?;
		if !client.versions.contains(&message::VERSION) {
			return Err(Error::Version);
		}

		setup
			.writer
			.encode(&message::ServerSetup {
				version: message::VERSION,
			})
			.await?;

		tracing::debug!(version = message::VERSION, "session accepted");
		Ok(Self::start(transport, mode, setup))
	}

	fn start(transport: S, mode: SessionMode, mut setup: Stream<S>) -> Self {
		let local = Origin::produce();
		let remote = Origin::produce();

		let (status_tx, status_rx) = watch::channel(Status {
			state: SessionState::Connected,
			error: None,
		});
		let status_tx = Arc::new(status_tx);

		let publisher = Publisher::new(transport.clone(), local.consumer);
		let subscriber = Subscriber::new(transport.clone(), remote.producer, mode.is_subscriber());

		let session = Self {
			transport: transport.clone(),
			mode,
			status_tx: status_tx.clone(),
			status_rx,
			local: local.producer,
			remote: remote.consumer.clone(),
			origin_slot: Arc::new(Mutex::new(Some(remote.consumer))),
			_guard: Arc::new(CloseGuard {
				transport: transport.clone(),
				status: status_tx.clone(),
			}),
		};

		let sub = subscriber.clone();
		tokio::spawn(async move {
			let res = tokio::select! {
				// The connection verdict wins when the halves fail with it.
				biased;
				err = transport.closed() => match transport::Error::session_error(&err) {
					Some(0) => Ok(()),
					Some(code) => Err(Error::from_code(code)),
					None => Err(Error::Transport),
				},
				// Peer finishing the session stream is a graceful close.
				res = setup.reader.closed() => res,
				res = publisher.run() => res,
				res = subscriber.run() => res,
			};

			let closing = matches!(
				status_tx.borrow().state,
				SessionState::Closing | SessionState::Closed
			);

			match &res {
				Ok(()) => {
					tracing::info!("session closed");
					transport.close(0, "");
				}
				Err(Error::Transport) => {
					tracing::info!("session terminated");
					transport.close(Error::Transport.to_code(), "");
				}
				Err(err) => {
					tracing::warn!(%err, "session error");
					transport.close(err.to_code(), &err.to_string());
				}
			}

			// A locally- or peer-initiated close is graceful: consumers see
			// end-of-stream. Anything else is a termination with an error.
			let error = match (&res, closing) {
				(Ok(()), _) | (_, true) => None,
				(Err(err), false) => Some(err.clone()),
			};

			sub.teardown(error.clone());

			status_tx.send_modify(|status| {
				status.state = match &error {
					None => SessionState::Closed,
					Some(_) => SessionState::Terminated,
				};
				status.error = error;
			});
		});

		session
	}

	/// Publish a broadcast under the given path.
	///
	/// The peer observes `announce(path, active=true)`. The path must be
	/// unique among currently-published paths in this session.
	pub fn publish<T: ToString>(&self, path: T, broadcast: BroadcastConsumer) -> Result<(), Error> {
		if !self.mode.is_publisher() {
			return Err(Error::Unsupported);
		}
		if !self.is_alive() {
			return Err(Error::Closed);
		}

		let mut local = self.local.clone();
		local.publish(path, broadcast)
	}

	/// Bind to a broadcast announced by the peer.
	pub fn consume(&self, path: &str) -> Result<BroadcastConsumer, Error> {
		if !self.mode.is_subscriber() {
			return Err(Error::Unsupported);
		}
		if !self.is_connected() {
			return Err(Error::Closed);
		}

		self.remote.consume(path).ok_or(Error::NotFound)
	}

	/// Take the announcement consumer for this session.
	///
	/// There is at most one; a second call returns `Duplicate`.
	pub fn origin_consumer(&self) -> Result<OriginConsumer, Error> {
		if !self.mode.is_subscriber() {
			return Err(Error::Unsupported);
		}
		if !self.is_connected() {
			return Err(Error::Closed);
		}

		self.origin_slot.lock().unwrap().take().ok_or(Error::Duplicate)
	}

	pub fn mode(&self) -> SessionMode {
		self.mode
	}

	pub fn state(&self) -> SessionState {
		self.status_rx.borrow().state
	}

	/// Whether the session is currently connected.
	pub fn is_connected(&self) -> bool {
		self.state() == SessionState::Connected
	}

	/// Whether the session has not yet closed or failed.
	pub fn is_alive(&self) -> bool {
		!matches!(self.state(), SessionState::Closed | SessionState::Terminated)
	}

	/// Close the session gracefully. Idempotent.
	pub fn close(&self) {
		let closing = self.status_tx.send_if_modified(|status| {
			if matches!(status.state, SessionState::Closing | SessionState::Closed | SessionState::Terminated) {
				return false;
			}
			status.state = SessionState::Closing;
			true
		});

		if closing {
			self.transport.close(0, "");
		}
	}

	/// Block until the session is closed or terminated.
	///
	/// Returns `Cancel` for a graceful close, or the terminating error.
	pub async fn closed(&self) -> Error {
		let mut status = self.status_rx.clone();
		let status = status
			.wait_for(|status| matches!(status.state, SessionState::Closed | SessionState::Terminated))
			.await;

		match status {
			Ok(status) => status.error.clone().unwrap_or(Error::Cancel),
			Err(_) => Error::Cancel,
		}
	}
}

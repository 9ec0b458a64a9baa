//! The publisher half of a session: serves local broadcasts to the peer.
//!
//! The peer opens control streams at us; an announce stream receives the
//! active paths and their transitions, and each subscribe stream pins one
//! track, whose groups we serve on dedicated unidirectional streams.

use std::sync::{
	atomic::{AtomicBool, Ordering},
	Arc,
};

use futures::{stream::FuturesUnordered, StreamExt};

use crate::coding::{Stream, Writer};
use crate::message::{self, StreamType};
use crate::{transport, Error, GroupConsumer, OriginConsumer, Track};

/// Map the track priority onto the transport, where larger is more
/// important; our 0 is the highest.
fn transport_priority(priority: u8) -> i32 {
	-i32::from(priority)
}

pub(super) struct Publisher<S: transport::Session> {
	session: S,
	origin: OriginConsumer,

	// Only one announce stream may drain the origin at a time.
	announcing: Arc<AtomicBool>,
}

impl<S: transport::Session> Publisher<S> {
	pub fn new(session: S, origin: OriginConsumer) -> Self {
		Self {
			session,
			origin,
			announcing: Default::default(),
		}
	}

	/// Accept control streams from the peer until the session dies.
	pub async fn run(self) -> Result<(), Error> {
		loop {
			let mut stream = Stream::accept(&self.session).await?;

			// A malformed or unexpected header only kills this stream.
			match stream.reader.decode::<StreamType>().await {
				Ok(StreamType::Announce) => self.recv_announce(stream),
				Ok(StreamType::Subscribe) => self.recv_subscribe(stream),
				Ok(StreamType::Session) => {
					tracing::warn!("unexpected session stream");
					stream.writer.abort(&Error::UnexpectedStream);
				}
				Err(err) => {
					tracing::warn!(%err, "control stream header error");
					stream.writer.abort(&err);
				}
			}
		}
	}

	fn recv_announce(&self, mut stream: Stream<S>) {
		if self.announcing.swap(true, Ordering::AcqRel) {
			tracing::warn!("duplicate announce stream");
			stream.writer.abort(&Error::Duplicate);
			return;
		}

		let mut origin = self.origin.clone();
		let announcing = self.announcing.clone();

		tokio::spawn(async move {
			match Self::run_announce(&mut stream, &mut origin).await {
				Ok(()) => tracing::debug!("announcing complete"),
				Err(err) => {
					match &err {
						Error::Cancel | Error::Transport => tracing::debug!("announcing cancelled"),
						err => tracing::warn!(%err, "announcing error"),
					}
					stream.writer.abort(&err);
				}
			}

			announcing.store(false, Ordering::Release);
		});
	}

	async fn run_announce(stream: &mut Stream<S>, origin: &mut OriginConsumer) -> Result<(), Error> {
		let request: message::AnnounceRequest = stream.reader.decode().await?;
		let prefix = request.prefix;

		// Transitions up to this point are covered by the snapshot.
		while origin.try_announced().is_some() {}

		let mut active = origin.paths();
		active.retain(|path| path.starts_with(&prefix));
		stream.writer.encode(&message::AnnounceInit { active }).await?;

		loop {
			tokio::select! {
				biased;
				res = stream.reader.closed() => return res,
				update = origin.announced() => match update {
					Some(update) => {
						if update.path.starts_with(&prefix) {
							tracing::debug!(path = %update.path, active = update.active, "announce");
							stream.writer.encode(&update).await?;
						}
					}
					None => {
						stream.writer.finish();
						return Ok(());
					}
				},
			}
		}
	}

	fn recv_subscribe(&self, mut stream: Stream<S>) {
		let session = self.session.clone();
		let origin = self.origin.clone();

		tokio::spawn(async move {
			if let Err(err) = Self::run_subscribe(session, &mut stream, origin).await {
				match &err {
					Error::Cancel | Error::Transport => tracing::debug!(%err, "subscribe cancelled"),
					err => tracing::warn!(%err, "subscribe error"),
				}
				stream.writer.abort(&err);
			}
		});
	}

	async fn run_subscribe(session: S, stream: &mut Stream<S>, origin: OriginConsumer) -> Result<(), Error> {
		let subscribe: message::Subscribe = stream.reader.decode().await?;

		let broadcast = origin.consume(&subscribe.broadcast).ok_or(Error::NotFound)?;
		let track = Track {
			name: subscribe.track.clone(),
			priority: subscribe.priority,
		};
		let mut track = broadcast.subscribe_track(track)?;

		stream.writer.encode(&message::SubscribeOk {
			priority: subscribe.priority,
		})
		.await?;

		tracing::debug!(
			id = subscribe.id,
			broadcast = %subscribe.broadcast,
			track = %subscribe.track,
			"subscribed"
		);

		let priority = transport_priority(subscribe.priority);

		// All of the groups we're currently serving.
		let mut tasks = FuturesUnordered::new();

		loop {
			tokio::select! {
				biased;
				// The subscriber closing its stream cancels the subscription.
				res = stream.reader.closed() => {
					res?;
					break;
				}
				group = track.next_group() => match group? {
					Some(group) => {
						let header = message::GroupHeader {
							sequence: group.sequence,
							track_id: subscribe.id,
						};
						tasks.push(Self::serve_group(session.clone(), header, priority, group));
					}
					None => break,
				},
				Some(()) = tasks.next(), if !tasks.is_empty() => {}
			}
		}

		// Let outstanding groups flush before finishing the control stream.
		while tasks.next().await.is_some() {}

		stream.writer.finish();
		Ok(())
	}

	async fn serve_group(session: S, header: message::GroupHeader, priority: i32, mut group: GroupConsumer) {
		let stream = match session.open_uni().await {
			Ok(stream) => stream,
			Err(err) => {
				tracing::debug!(err = %err, "failed to open group stream");
				return;
			}
		};

		let mut writer = Writer::new(stream);
		writer.set_priority(priority);

		match Self::run_group(&mut writer, header, &mut group).await {
			Ok(()) => writer.finish(),
			Err(err) => {
				match &err {
					Error::Cancel | Error::Transport => {}
					err => tracing::warn!(%err, "group stream error"),
				}
				writer.abort(&err);
			}
		}
	}

	async fn run_group(
		writer: &mut Writer<S::SendStream>,
		header: message::GroupHeader,
		group: &mut GroupConsumer,
	) -> Result<(), Error> {
		writer.encode(&header).await?;

		loop {
			let frame = tokio::select! {
				biased;
				res = writer.closed() => {
					res?;
					return Err(Error::Cancel);
				}
				frame = group.read_frame() => frame,
			};

			match frame? {
				Some(payload) => {
					writer.encode(&payload.len()).await?;
					writer.write_all(payload).await?;
				}
				None => return Ok(()),
			}
		}
	}
}

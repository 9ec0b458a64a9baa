//! The subscriber half of a session: mirrors remote broadcasts locally.
//!
//! Announcements from the peer materialize as broadcasts in the remote
//! origin. Subscribing to one of their tracks opens a subscribe stream and
//! binds a session-scoped track id; incoming group streams are demuxed by
//! that id and pumped into the track.

use std::collections::HashMap;
use std::sync::{
	atomic::{AtomicU64, Ordering},
	Arc, Mutex,
};

use crate::coding::{Reader, Stream};
use crate::message::{self, StreamType};
use crate::{transport, Announce, Broadcast, BroadcastProducer, Error, Group, OriginProducer, TrackProducer};

pub(super) struct Subscriber<S: transport::Session> {
	session: S,
	origin: OriginProducer,

	// Whether we ask the peer for announcements at all.
	subscriber: bool,

	// Active subscriptions by track id, for demuxing group streams.
	lookup: Arc<Mutex<HashMap<u64, TrackProducer>>>,

	// Producers backing each announced broadcast.
	broadcasts: Arc<Mutex<HashMap<String, BroadcastProducer>>>,

	next_id: Arc<AtomicU64>,
}

impl<S: transport::Session> Clone for Subscriber<S> {
	fn clone(&self) -> Self {
		Self {
			session: self.session.clone(),
			origin: self.origin.clone(),
			subscriber: self.subscriber,
			lookup: self.lookup.clone(),
			broadcasts: self.broadcasts.clone(),
			next_id: self.next_id.clone(),
		}
	}
}

impl<S: transport::Session> Subscriber<S> {
	pub fn new(session: S, origin: OriginProducer, subscriber: bool) -> Self {
		Self {
			session,
			origin,
			subscriber,
			lookup: Default::default(),
			broadcasts: Default::default(),
			next_id: Default::default(),
		}
	}

	pub async fn run(&self) -> Result<(), Error> {
		if self.subscriber {
			tokio::select! {
				res = self.run_announce() => res,
				res = self.run_data() => res,
			}
		} else {
			// Not subscribe-capable; just drain unsolicited streams.
			self.run_data().await
		}
	}

	/// Ask the peer for announcements and mirror them into the origin.
	async fn run_announce(&self) -> Result<(), Error> {
		let mut stream = Stream::open(&self.session).await?;
		stream.writer.encode(&StreamType::Announce).await?;
		stream
			.writer
			.encode(&message::AnnounceRequest {
				prefix: String::new(),
			})
			.await?;

		let init: message::AnnounceInit = stream.reader.decode().await?;
		for path in init.active {
			self.announce(path, true);
		}

		while let Some(update) = stream.reader.decode_maybe::<Announce>().await? {
			self.announce(update.path, update.active);
		}

		// The peer stopped announcing; nothing more to subscribe to.
		Err(Error::Cancel)
	}

	fn announce(&self, path: String, active: bool) {
		let mut broadcasts = self.broadcasts.lock().unwrap();

		if !active {
			if let Some(mut producer) = broadcasts.remove(&path) {
				tracing::debug!(%path, "unannounced");
				// Withdraw synchronously so an immediate re-announce of the
				// same path doesn't collide with the old entry.
				let _ = self.origin.clone().withdraw(&path);
				let _ = producer.finish();
			}
			return;
		}

		// Re-announcing an active path is suppressed.
		if broadcasts.contains_key(&path) {
			return;
		}

		let broadcast = Broadcast::produce();
		let mut origin = self.origin.clone();
		if let Err(err) = origin.publish(&path, broadcast.consumer.clone()) {
			tracing::warn!(%path, %err, "failed to announce broadcast");
			return;
		}

		tracing::debug!(%path, "announced");
		broadcasts.insert(path.clone(), broadcast.producer.clone());

		let this = self.clone();
		tokio::spawn(async move {
			this.serve_broadcast(path, broadcast.producer).await;
		});
	}

	/// Turn every requested track on this broadcast into a subscription.
	async fn serve_broadcast(&self, path: String, mut producer: BroadcastProducer) {
		while let Ok(Some(track)) = producer.requested_track().await {
			let id = self.next_id.fetch_add(1, Ordering::Relaxed);
			self.lookup.lock().unwrap().insert(id, track.clone());

			let this = self.clone();
			let path = path.clone();
			let broadcast = producer.clone();
			tokio::spawn(async move {
				this.run_subscribe(path, id, broadcast, track).await;
			});
		}
	}

	async fn run_subscribe(&self, path: String, id: u64, mut broadcast: BroadcastProducer, track: TrackProducer) {
		let name = track.name.clone();
		let res = self.run_subscribe_inner(&path, id, &track).await;

		self.lookup.lock().unwrap().remove(&id);
		// Let a later subscribe issue a fresh request.
		let _ = broadcast.remove_track(&name);

		match res {
			Ok(()) => {
				// The publisher finished the track; consumers see
				// end-of-stream after draining.
				tracing::debug!(broadcast = %path, track = %name, "subscription ended");
				let mut track = track;
				let _ = track.finish();
			}
			Err(err) => {
				match &err {
					Error::Cancel => tracing::debug!(broadcast = %path, track = %name, "subscription cancelled"),
					err => tracing::warn!(broadcast = %path, track = %name, %err, "subscription error"),
				}
				let _ = track.abort(err);
			}
		}
	}

	async fn run_subscribe_inner(&self, path: &str, id: u64, track: &TrackProducer) -> Result<(), Error> {
		let mut stream = Stream::open(&self.session).await?;
		stream.writer.encode(&StreamType::Subscribe).await?;
		stream
			.writer
			.encode(&message::Subscribe {
				id,
				broadcast: path.to_string(),
				track: track.name.clone(),
				priority: track.priority,
			})
			.await?;

		let _ok: message::SubscribeOk = stream.reader.decode().await?;
		tracing::debug!(broadcast = %path, track = %track.name, id, "subscribed");

		tokio::select! {
			biased;
			// Dropping every consumer cancels the subscription on the peer.
			_ = track.unused() => Err(Error::Cancel),
			res = stream.reader.closed() => res,
		}
	}

	/// Demux incoming group streams by track id.
	async fn run_data(&self) -> Result<(), Error> {
		loop {
			let stream = self.session.accept_uni().await.map_err(Error::from_transport)?;

			let this = self.clone();
			tokio::spawn(async move {
				let mut reader = Reader::new(stream);
				if let Err(err) = this.run_group(&mut reader).await {
					match &err {
						Error::Cancel | Error::Transport => {}
						err => tracing::warn!(%err, "group stream error"),
					}
					reader.abort(&err);
				}
			});
		}
	}

	async fn run_group(&self, reader: &mut Reader<S::RecvStream>) -> Result<(), Error> {
		let header: message::GroupHeader = reader.decode().await?;

		let track = self.lookup.lock().unwrap().get(&header.track_id).cloned();
		let mut track = match track {
			Some(track) => track,
			None => {
				// No current subscription; drain and discard.
				tracing::warn!(track_id = header.track_id, "group for unknown subscription");
				while reader.read(32 * 1024).await?.is_some() {}
				return Ok(());
			}
		};

		let mut group = track.create_group(Group {
			sequence: header.sequence,
		})?;

		match Self::pump_group(reader, &mut group).await {
			Ok(()) => {
				group.finish()?;
				Ok(())
			}
			Err(err) => {
				// A partial frame or reset aborts this group only.
				let _ = group.abort(err.clone());
				Err(err)
			}
		}
	}

	async fn pump_group(reader: &mut Reader<S::RecvStream>, group: &mut crate::GroupProducer) -> Result<(), Error> {
		loop {
			// Each frame is a varint length followed by that many bytes.
			match reader.decode_maybe::<usize>().await? {
				Some(size) => {
					let payload = reader.read_exact(size).await?;
					group.write_frame(payload)?;
				}
				None => return Ok(()),
			}
		}
	}

	/// End every live object owned by the subscriber half.
	///
	/// With no error, consumers observe a graceful end-of-stream; with one,
	/// they observe the error.
	pub fn teardown(&self, error: Option<Error>) {
		let tracks: Vec<_> = self.lookup.lock().unwrap().drain().map(|(_, track)| track).collect();
		let broadcasts: Vec<_> = self
			.broadcasts
			.lock()
			.unwrap()
			.drain()
			.map(|(_, broadcast)| broadcast)
			.collect();

		match error {
			None => {
				for mut track in tracks {
					let _ = track.finish();
				}
				for mut broadcast in broadcasts {
					let _ = broadcast.finish();
				}
				let mut origin = self.origin.clone();
				let _ = origin.finish();
			}
			Some(err) => {
				for track in tracks {
					let _ = track.abort(err.clone());
				}
				for broadcast in broadcasts {
					let _ = broadcast.abort(err.clone());
				}
				let _ = self.origin.clone().abort(err);
			}
		}
	}
}

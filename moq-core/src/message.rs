//! Control and data messages exchanged over the session.
//!
//! Bidirectional streams start with a [StreamType] tag. Group streams are
//! unidirectional and start with a [GroupHeader]; the sequence and track id
//! are fixed 8-byte integers so the full u64 range is representable.

use bytes::{Buf, BufMut};

use crate::coding::{decode_u64_fixed, encode_u64_fixed, Decode, DecodeError, Encode};
use crate::Announce;

/// The one protocol version we speak.
pub const VERSION: u64 = 1;

/// The role of a bidirectional stream, sent as its first varint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamType {
	Session,
	Announce,
	Subscribe,
}

impl Encode for StreamType {
	fn encode<W: BufMut>(&self, w: &mut W) {
		let tag: u64 = match self {
			Self::Session => 0,
			Self::Announce => 1,
			Self::Subscribe => 2,
		};
		tag.encode(w);
	}
}

impl Decode for StreamType {
	fn decode<B: Buf>(r: &mut B) -> Result<Self, DecodeError> {
		match u64::decode(r)? {
			0 => Ok(Self::Session),
			1 => Ok(Self::Announce),
			2 => Ok(Self::Subscribe),
			_ => Err(DecodeError::InvalidValue),
		}
	}
}

/// Sent by the client on the session stream to negotiate a version.
#[derive(Clone, Debug)]
pub struct ClientSetup {
	pub versions: Vec<u64>,
}

impl Encode for ClientSetup {
	fn encode<W: BufMut>(&self, w: &mut W) {
		self.versions.encode(w);
	}
}

impl Decode for ClientSetup {
	fn decode<B: Buf>(r: &mut B) -> Result<Self, DecodeError> {
		Ok(Self {
			versions: Vec::<u64>::decode(r)?,
		})
	}
}

/// The server's chosen version.
#[derive(Clone, Debug)]
pub struct ServerSetup {
	pub version: u64,
}

impl Encode for ServerSetup {
	fn encode<W: BufMut>(&self, w: &mut W) {
		self.version.encode(w);
	}
}

impl Decode for ServerSetup {
	fn decode<B: Buf>(r: &mut B) -> Result<Self, DecodeError> {
		Ok(Self {
			version: u64::decode(r)?,
		})
	}
}

/// Sent by the subscriber to request announcements under a prefix.
#[derive(Clone, Debug)]
pub struct AnnounceRequest {
	pub prefix: String,
}

impl Encode for AnnounceRequest {
	fn encode<W: BufMut>(&self, w: &mut W) {
		self.prefix.encode(w);
	}
}

impl Decode for AnnounceRequest {
	fn decode<B: Buf>(r: &mut B) -> Result<Self, DecodeError> {
		Ok(Self {
			prefix: String::decode(r)?,
		})
	}
}

/// The first reply on an announce stream: every currently-active path.
#[derive(Clone, Debug)]
pub struct AnnounceInit {
	pub active: Vec<String>,
}

impl Encode for AnnounceInit {
	fn encode<W: BufMut>(&self, w: &mut W) {
		self.active.encode(w);
	}
}

impl Decode for AnnounceInit {
	fn decode<B: Buf>(r: &mut B) -> Result<Self, DecodeError> {
		Ok(Self {
			active: Vec::<String>::decode(r)?,
		})
	}
}

// Announcements travel as the observable `(path, active)` tuple; the model
// type doubles as the wire message.
impl Encode for Announce {
	fn encode<W: BufMut>(&self, w: &mut W) {
		self.path.encode(w);
		self.active.encode(w);
	}
}

impl Decode for Announce {
	fn decode<B: Buf>(r: &mut B) -> Result<Self, DecodeError> {
		Ok(Self {
			path: String::decode(r)?,
			active: bool::decode(r)?,
		})
	}
}

/// Sent by the subscriber to request all future groups for a track.
///
/// Groups will carry the provided id instead of the full track name.
#[derive(Clone, Debug)]
pub struct Subscribe {
	pub id: u64,
	pub broadcast: String,
	pub track: String,
	pub priority: u8,
}

impl Encode for Subscribe {
	fn encode<W: BufMut>(&self, w: &mut W) {
		self.id.encode(w);
		self.broadcast.encode(w);
		self.track.encode(w);
		self.priority.encode(w);
	}
}

impl Decode for Subscribe {
	fn decode<B: Buf>(r: &mut B) -> Result<Self, DecodeError> {
		Ok(Self {
			id: u64::decode(r)?,
			broadcast: String::decode(r)?,
			track: String::decode(r)?,
			priority: u8::decode(r)?,
		})
	}
}

/// The publisher's acknowledgement of a subscription.
#[derive(Clone, Debug, Default)]
pub struct SubscribeOk {
	pub priority: u8,
}

impl Encode for SubscribeOk {
	fn encode<W: BufMut>(&self, w: &mut W) {
		self.priority.encode(w);
	}
}

impl Decode for SubscribeOk {
	fn decode<B: Buf>(r: &mut B) -> Result<Self, DecodeError> {
		Ok(Self {
			priority: u8::decode(r)?,
		})
	}
}

/// The fixed header of every group stream.
///
/// Followed by any number of `(length varint, payload)` frames; the stream
/// FIN marks end-of-group and a reset marks an aborted group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupHeader {
	pub sequence: u64,
	pub track_id: u64,
}

impl Encode for GroupHeader {
	fn encode<W: BufMut>(&self, w: &mut W) {
		encode_u64_fixed(self.sequence, w);
		encode_u64_fixed(self.track_id, w);
	}
}

impl Decode for GroupHeader {
	fn decode<B: Buf>(r: &mut B) -> Result<Self, DecodeError> {
		Ok(Self {
			sequence: decode_u64_fixed(r)?,
			track_id: decode_u64_fixed(r)?,
		})
	}
}

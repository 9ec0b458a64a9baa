use crate::{coding, transport};

/// A list of possible errors that can occur during the session.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
	#[error("transport error")]
	Transport,

	#[error("decode error")]
	Decode,

	#[error("unsupported versions")]
	Version,

	/// An unexpected stream type was received
	#[error("unexpected stream type")]
	UnexpectedStream,

	/// Some varint exceeded the addressable range
	#[error("varint bounds exceeded")]
	BoundsExceeded,

	/// The broadcast/track/group is a duplicate
	#[error("duplicate")]
	Duplicate,

	// Cancel is returned when there are no more readers.
	#[error("cancelled")]
	Cancel,

	/// The producer was finished; no further writes are possible.
	#[error("closed")]
	Closed,

	#[error("not found")]
	NotFound,

	#[error("wrong frame size")]
	WrongSize,

	#[error("protocol violation")]
	ProtocolViolation,

	#[error("unexpected message")]
	UnexpectedMessage,

	#[error("unsupported")]
	Unsupported,

	#[error("too large")]
	TooLarge,

	// The application closes the stream with a code.
	#[error("app code={0}")]
	App(u16),
}

impl Error {
	/// An integer code that is sent over the wire.
	pub fn to_code(&self) -> u32 {
		match self {
			Self::Cancel => 0,
			Self::Closed => 1,
			Self::Transport => 4,
			Self::Decode => 5,
			Self::Version => 9,
			Self::UnexpectedStream => 10,
			Self::BoundsExceeded => 11,
			Self::Duplicate => 12,
			Self::NotFound => 13,
			Self::WrongSize => 14,
			Self::ProtocolViolation => 15,
			Self::UnexpectedMessage => 16,
			Self::Unsupported => 17,
			Self::TooLarge => 18,
			Self::App(app) => *app as u32 + 64,
		}
	}

	/// Decode an error from a wire code.
	pub fn from_code(code: u32) -> Self {
		match code {
			0 => Self::Cancel,
			1 => Self::Closed,
			4 => Self::Transport,
			5 => Self::Decode,
			9 => Self::Version,
			10 => Self::UnexpectedStream,
			11 => Self::BoundsExceeded,
			12 => Self::Duplicate,
			13 => Self::NotFound,
			14 => Self::WrongSize,
			15 => Self::ProtocolViolation,
			16 => Self::UnexpectedMessage,
			17 => Self::Unsupported,
			18 => Self::TooLarge,
			code if code >= 64 => match u16::try_from(code - 64) {
				Ok(app) => Self::App(app),
				Err(_) => Self::ProtocolViolation,
			},
			_ => Self::ProtocolViolation,
		}
	}

	/// Convert a transport error into an [Error], decoding stream reset codes.
	pub fn from_transport(err: impl transport::Error) -> Self {
		if let Some(code) = err.stream_error() {
			return Self::from_code(code);
		}

		tracing::warn!(%err, "transport error");
		Self::Transport
	}
}

impl From<coding::DecodeError> for Error {
	fn from(err: coding::DecodeError) -> Self {
		match err {
			coding::DecodeError::BoundsExceeded => Error::BoundsExceeded,
			err => {
				tracing::warn!(%err, "decode error");
				Error::Decode
			}
		}
	}
}

pub type Result<T> = std::result::Result<T, Error>;

//! The transport the engine runs on top of.
//!
//! The engine never talks to a QUIC implementation directly; it consumes
//! these traits instead. A real implementation lives in `moq-quic`, and an
//! in-memory pair is available for tests.

use std::future::Future;

use bytes::Bytes;

#[cfg(test)]
pub(crate) mod mem;

/// An error produced by the transport.
///
/// Stream resets and connection closes carry an application error code,
/// which the engine maps back into [crate::Error] values.
pub trait Error: std::error::Error + Send + Sync + 'static {
	/// The application error code of a stream reset, if any.
	fn stream_error(&self) -> Option<u32>;

	/// The application error code of a connection close, if any.
	fn session_error(&self) -> Option<u32>;
}

/// A QUIC(ish) connection: a bag of bidirectional and unidirectional streams.
pub trait Session: Clone + Send + Sync + 'static {
	type SendStream: SendStream<Error = Self::Error>;
	type RecvStream: RecvStream<Error = Self::Error>;
	type Error: Error;

	/// Open a new unidirectional stream.
	fn open_uni(&self) -> impl Future<Output = Result<Self::SendStream, Self::Error>> + Send;

	/// Open a new bidirectional stream.
	fn open_bi(&self) -> impl Future<Output = Result<(Self::SendStream, Self::RecvStream), Self::Error>> + Send;

	/// Accept the next unidirectional stream opened by the peer.
	fn accept_uni(&self) -> impl Future<Output = Result<Self::RecvStream, Self::Error>> + Send;

	/// Accept the next bidirectional stream opened by the peer.
	fn accept_bi(&self) -> impl Future<Output = Result<(Self::SendStream, Self::RecvStream), Self::Error>> + Send;

	/// Close the connection with an application error code.
	fn close(&self, code: u32, reason: &str);

	/// Block until the connection is closed, returning the reason.
	fn closed(&self) -> impl Future<Output = Self::Error> + Send;
}

/// The write half of a stream.
pub trait SendStream: Send {
	type Error: Error;

	/// Write an entire chunk, blocking on transport back-pressure.
	fn write_chunk(&mut self, chunk: Bytes) -> impl Future<Output = Result<(), Self::Error>> + Send;

	/// Gracefully half-close the stream; the peer sees end-of-stream.
	fn finish(&mut self);

	/// Abruptly close the stream with an error code; the peer sees a reset.
	fn reset(&mut self, code: u32);

	/// Update the transmission priority; larger is more important.
	fn set_priority(&mut self, priority: i32);

	/// Block until the peer stops the stream or the connection dies.
	fn closed(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// The read half of a stream.
pub trait RecvStream: Send {
	type Error: Error;

	/// Return the next chunk of data, up to `max` bytes.
	///
	/// Returns `None` after the peer finishes the stream, or an error if it
	/// was reset.
	fn read_chunk(&mut self, max: usize) -> impl Future<Output = Result<Option<Bytes>, Self::Error>> + Send;

	/// Tell the peer to stop sending, with an error code.
	fn stop(&mut self, code: u32);
}

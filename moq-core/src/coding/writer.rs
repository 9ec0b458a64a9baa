use bytes::{Bytes, BytesMut};

use crate::coding::Encode;
use crate::{transport, Error};

/// A writer for encoding messages onto a stream.
///
/// The stream is reset on Drop unless it was finished first.
pub struct Writer<S: transport::SendStream> {
	stream: S,
	buffer: BytesMut,
	fin: bool,
}

impl<S: transport::SendStream> Writer<S> {
	pub fn new(stream: S) -> Self {
		Self {
			stream,
			buffer: Default::default(),
			fin: false,
		}
	}

	pub async fn encode<T: Encode>(&mut self, msg: &T) -> Result<(), Error> {
		self.buffer.clear();
		msg.encode(&mut self.buffer);

		let chunk = self.buffer.split().freeze();
		self.stream.write_chunk(chunk).await.map_err(Error::from_transport)
	}

	/// Write an entire payload, blocking on transport back-pressure.
	pub async fn write_all(&mut self, data: Bytes) -> Result<(), Error> {
		self.stream.write_chunk(data).await.map_err(Error::from_transport)
	}

	/// Mark the clean termination of the stream.
	pub fn finish(&mut self) {
		self.fin = true;
		self.stream.finish();
	}

	pub fn abort(&mut self, err: &Error) {
		// Treated as terminal so Drop doesn't reset a second time.
		self.fin = true;
		self.stream.reset(err.to_code());
	}

	/// Block until the peer stops the stream or the connection dies.
	pub async fn closed(&mut self) -> Result<(), Error> {
		self.stream.closed().await.map_err(Error::from_transport)
	}

	pub fn set_priority(&mut self, priority: i32) {
		self.stream.set_priority(priority);
	}
}

impl<S: transport::SendStream> Drop for Writer<S> {
	fn drop(&mut self) {
		if !self.fin {
			self.stream.reset(Error::Cancel.to_code());
		}
	}
}

use std::{cmp, io};

use bytes::{Buf, Bytes, BytesMut};

use crate::coding::{Decode, DecodeError};
use crate::{transport, Error};

/// How much we ask the transport for in one go.
const READ_CHUNK: usize = 32 * 1024;

/// A reader for decoding messages from a stream.
pub struct Reader<S: transport::RecvStream> {
	stream: S,
	buffer: BytesMut,
}

impl<S: transport::RecvStream> Reader<S> {
	pub fn new(stream: S) -> Self {
		Self {
			stream,
			buffer: Default::default(),
		}
	}

	/// Decode the next message from the stream.
	pub async fn decode<T: Decode>(&mut self) -> Result<T, Error> {
		loop {
			let mut cursor = io::Cursor::new(self.buffer.as_ref());
			match T::decode(&mut cursor) {
				Ok(msg) => {
					self.buffer.advance(cursor.position() as usize);
					return Ok(msg);
				}
				Err(DecodeError::Short) => {
					// Stream ended while we still need more data.
					if !self.read_more().await? {
						return Err(Error::Decode);
					}
				}
				Err(e) => return Err(e.into()),
			}
		}
	}

	/// Decode the next message unless the stream is finished.
	pub async fn decode_maybe<T: Decode>(&mut self) -> Result<Option<T>, Error> {
		if !self.has_more().await? {
			return Ok(None);
		}

		Ok(Some(self.decode().await?))
	}

	/// Returns a non-empty chunk of data, or None once the stream is finished.
	pub async fn read(&mut self, max: usize) -> Result<Option<Bytes>, Error> {
		if !self.buffer.is_empty() {
			let size = cmp::min(max, self.buffer.len());
			return Ok(Some(self.buffer.split_to(size).freeze()));
		}

		self.stream.read_chunk(max).await.map_err(Error::from_transport)
	}

	/// Read exactly the given number of bytes from the stream.
	pub async fn read_exact(&mut self, size: usize) -> Result<Bytes, Error> {
		while self.buffer.len() < size {
			let chunk = self
				.stream
				.read_chunk(size - self.buffer.len())
				.await
				.map_err(Error::from_transport)?
				.ok_or(Error::Decode)?;
			self.buffer.extend_from_slice(&chunk);
		}

		Ok(self.buffer.split_to(size).freeze())
	}

	/// Wait until the stream is finished, erroring if there are any more bytes.
	pub async fn closed(&mut self) -> Result<(), Error> {
		if self.has_more().await? {
			return Err(Error::Decode);
		}

		Ok(())
	}

	/// Returns true if there is more data available in the buffer or stream.
	async fn has_more(&mut self) -> Result<bool, Error> {
		if !self.buffer.is_empty() {
			return Ok(true);
		}

		self.read_more().await
	}

	/// Try to read more data from the stream. Returns false on a clean finish.
	async fn read_more(&mut self) -> Result<bool, Error> {
		match self.stream.read_chunk(READ_CHUNK).await {
			Ok(Some(chunk)) => {
				self.buffer.extend_from_slice(&chunk);
				Ok(true)
			}
			Ok(None) => Ok(false),
			Err(e) => Err(Error::from_transport(e)),
		}
	}

	/// Tell the peer to stop sending, with the given error.
	pub fn abort(&mut self, err: &Error) {
		self.stream.stop(err.to_code());
	}
}

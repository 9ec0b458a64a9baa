//! The `moq_core::transport` implementation over quinn.

use bytes::Bytes;
use moq_core::transport;

#[derive(thiserror::Error, Debug)]
pub enum QuicError {
	#[error("connection error: {0}")]
	Connection(#[from] quinn::ConnectionError),

	#[error("write error: {0}")]
	Write(#[from] quinn::WriteError),

	#[error("read error: {0}")]
	Read(#[from] quinn::ReadError),

	#[error("stream closed")]
	Closed,
}

// Application error codes above u32 are never produced by this library.
fn app_code(code: quinn::VarInt) -> Option<u32> {
	u32::try_from(code.into_inner()).ok()
}

impl transport::Error for QuicError {
	fn stream_error(&self) -> Option<u32> {
		match self {
			Self::Write(quinn::WriteError::Stopped(code)) => app_code(*code),
			Self::Read(quinn::ReadError::Reset(code)) => app_code(*code),
			_ => None,
		}
	}

	fn session_error(&self) -> Option<u32> {
		match self {
			Self::Connection(quinn::ConnectionError::ApplicationClosed(close)) => app_code(close.error_code),
			_ => None,
		}
	}
}

/// A quinn connection exposed through the engine's transport traits.
#[derive(Clone)]
pub struct QuicSession {
	inner: quinn::Connection,
}

impl QuicSession {
	pub fn new(inner: quinn::Connection) -> Self {
		Self { inner }
	}
}

impl transport::Session for QuicSession {
	type SendStream = QuicSendStream;
	type RecvStream = QuicRecvStream;
	type Error = QuicError;

	async fn open_uni(&self) -> Result<QuicSendStream, QuicError> {
		let stream = self.inner.open_uni().await?;
		Ok(QuicSendStream { inner: stream })
	}

	async fn open_bi(&self) -> Result<(QuicSendStream, QuicRecvStream), QuicError> {
		let (send, recv) = self.inner.open_bi().await?;
		Ok((QuicSendStream { inner: send }, QuicRecvStream { inner: recv }))
	}

	async fn accept_uni(&self) -> Result<QuicRecvStream, QuicError> {
		let stream = self.inner.accept_uni().await?;
		Ok(QuicRecvStream { inner: stream })
	}

	async fn accept_bi(&self) -> Result<(QuicSendStream, QuicRecvStream), QuicError> {
		let (send, recv) = self.inner.accept_bi().await?;
		Ok((QuicSendStream { inner: send }, QuicRecvStream { inner: recv }))
	}

	fn close(&self, code: u32, reason: &str) {
		self.inner.close(quinn::VarInt::from_u32(code), reason.as_bytes());
	}

	async fn closed(&self) -> QuicError {
		QuicError::Connection(self.inner.closed().await)
	}
}

pub struct QuicSendStream {
	inner: quinn::SendStream,
}

impl transport::SendStream for QuicSendStream {
	type Error = QuicError;

	async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), QuicError> {
		self.inner.write_chunk(chunk).await?;
		Ok(())
	}

	fn finish(&mut self) {
		// Fails only if already finished or reset.
		let _ = self.inner.finish();
	}

	fn reset(&mut self, code: u32) {
		let _ = self.inner.reset(quinn::VarInt::from_u32(code));
	}

	fn set_priority(&mut self, priority: i32) {
		let _ = self.inner.set_priority(priority);
	}

	async fn closed(&mut self) -> Result<(), QuicError> {
		match self.inner.stopped().await {
			Ok(None) => Ok(()),
			Ok(Some(code)) => Err(QuicError::Write(quinn::WriteError::Stopped(code))),
			Err(quinn::StoppedError::ConnectionLost(err)) => Err(QuicError::Connection(err)),
			Err(quinn::StoppedError::ZeroRttRejected) => Err(QuicError::Closed),
		}
	}
}

pub struct QuicRecvStream {
	inner: quinn::RecvStream,
}

impl transport::RecvStream for QuicRecvStream {
	type Error = QuicError;

	async fn read_chunk(&mut self, max: usize) -> Result<Option<Bytes>, QuicError> {
		match self.inner.read_chunk(max, true).await? {
			Some(chunk) => Ok(Some(chunk.bytes)),
			None => Ok(None),
		}
	}

	fn stop(&mut self, code: u32) {
		let _ = self.inner.stop(quinn::VarInt::from_u32(code));
	}
}

use crate::{transport, Error};

use super::{Reader, Writer};

/// Both halves of a bidirectional control stream.
pub struct Stream<S: transport::Session> {
	pub writer: Writer<S::SendStream>,
	pub reader: Reader<S::RecvStream>,
}

impl<S: transport::Session> Stream<S> {
	pub async fn open(session: &S) -> Result<Self, Error> {
		let (send, recv) = session.open_bi().await.map_err(Error::from_transport)?;
		Ok(Self {
			writer: Writer::new(send),
			reader: Reader::new(recv),
		})
	}

	pub async fn accept(session: &S) -> Result<Self, Error> {
		let (send, recv) = session.accept_bi().await.map_err(Error::from_transport)?;
		Ok(Self {
			writer: Writer::new(send),
			reader: Reader::new(recv),
		})
	}
}

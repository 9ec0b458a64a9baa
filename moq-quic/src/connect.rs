/// Why a connect attempt failed.
#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
	#[error("invalid url: {0}")]
	InvalidUrl(String),

	#[error("dns error: {0}")]
	Dns(String),

	#[error("tls error: {0}")]
	Tls(String),

	#[error("network error: {0}")]
	Network(String),

	#[error("session error: {0}")]
	Session(#[from] moq_core::Error),

	#[error("{0}")]
	General(String),
}

/// The coarse result codes reported across the library boundary.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectCode {
	Success = 0,
	InvalidArgument = 1,
	NetworkError = 2,
	TlsError = 3,
	DnsError = 4,
	GeneralError = 5,
}

impl ConnectError {
	pub fn code(&self) -> ConnectCode {
		match self {
			Self::InvalidUrl(_) => ConnectCode::InvalidArgument,
			Self::Dns(_) => ConnectCode::DnsError,
			Self::Tls(_) => ConnectCode::TlsError,
			Self::Network(_) => ConnectCode::NetworkError,
			Self::Session(_) | Self::General(_) => ConnectCode::GeneralError,
		}
	}
}

/// Classify a failed QUIC dial.
///
/// TLS problems surface inside the transport error during the handshake, so
/// we sniff the message; everything else on the wire is a network failure.
pub fn classify_connection(err: quinn::ConnectionError) -> ConnectError {
	match &err {
		quinn::ConnectionError::TransportError(transport) => {
			let reason = transport.to_string();
			if reason.contains("crypt")
				|| reason.contains("certificate")
				|| reason.contains("handshake")
				|| reason.contains("tls")
			{
				ConnectError::Tls(reason)
			} else {
				ConnectError::Network(reason)
			}
		}
		quinn::ConnectionError::VersionMismatch
		| quinn::ConnectionError::ConnectionClosed(_)
		| quinn::ConnectionError::ApplicationClosed(_)
		| quinn::ConnectionError::Reset
		| quinn::ConnectionError::TimedOut
		| quinn::ConnectionError::LocallyClosed => ConnectError::Network(err.to_string()),
		_ => ConnectError::General(err.to_string()),
	}
}

use std::net;
use std::path::PathBuf;
use std::sync::Arc;
use std::time;

use anyhow::Context;
use url::Url;

use moq_core::{Session, SessionMode};

use crate::{classify_connection, ConnectError, QuicSession};

/// TLS configuration for the client.
#[derive(Clone, Default, Debug)]
pub struct ClientTls {
	/// Use the TLS root at this path, encoded as PEM.
	///
	/// If unset, system roots are used instead.
	pub root: Option<PathBuf>,

	/// Danger: Disable TLS certificate verification.
	///
	/// Fine for local development, but use with caution in production.
	pub disable_verify: bool,
}

/// Configuration for the MoQ client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
	/// Listen for UDP packets on the given address.
	pub bind: net::SocketAddr,

	pub tls: ClientTls,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			bind: "[::]:0".parse().unwrap(),
			tls: ClientTls::default(),
		}
	}
}

impl ClientConfig {
	pub fn init(self) -> anyhow::Result<Client> {
		let provider = Arc::new(rustls::crypto::ring::default_provider());

		// Create a list of acceptable root certificates.
		let mut roots = rustls::RootCertStore::empty();

		match &self.tls.root {
			Some(path) => {
				let root = std::fs::File::open(path).context("failed to open root cert file")?;
				let mut root = std::io::BufReader::new(root);

				let root = rustls_pemfile::certs(&mut root)
					.next()
					.context("no roots found")?
					.context("failed to read root cert")?;

				roots.add(root).context("failed to add root cert")?;
			}
			None => {
				let native = rustls_native_certs::load_native_certs();

				for err in native.errors {
					tracing::warn!(%err, "failed to load root cert");
				}

				for cert in native.certs {
					roots.add(cert).context("failed to add root cert")?;
				}
			}
		}

		let mut tls = rustls::ClientConfig::builder_with_provider(provider.clone())
			.with_protocol_versions(&[&rustls::version::TLS13])?
			.with_root_certificates(roots)
			.with_no_client_auth();

		// Allow disabling TLS verification altogether.
		if self.tls.disable_verify {
			tracing::warn!("TLS server certificate verification is disabled; a man-in-the-middle attack is possible.");

			let noop = NoCertificateVerification(provider);
			tls.dangerous().set_certificate_verifier(Arc::new(noop));
		}

		tls.alpn_protocols = vec![moq_core::ALPN.as_bytes().to_vec()];

		let tls: quinn::crypto::rustls::QuicClientConfig =
			tls.try_into().context("TLS provider rejected the configuration")?;

		let mut config = quinn::ClientConfig::new(Arc::new(tls));

		let mut transport = quinn::TransportConfig::default();
		transport.keep_alive_interval(Some(time::Duration::from_secs(4)));
		transport.max_idle_timeout(Some(time::Duration::from_secs(10).try_into()?));
		config.transport_config(Arc::new(transport));

		let mut endpoint = quinn::Endpoint::client(self.bind).context("failed to bind UDP socket")?;
		endpoint.set_default_client_config(config);

		Ok(Client { endpoint })
	}
}

/// Client for establishing MoQ sessions over QUIC.
///
/// Create via [ClientConfig::init].
#[derive(Clone)]
pub struct Client {
	endpoint: quinn::Endpoint,
}

impl Client {
	/// Establish a QUIC connection followed by the MoQ handshake.
	///
	/// The URL must look like `https://host:port`; the port defaults to 443.
	pub async fn connect(&self, url: &Url, mode: SessionMode) -> Result<Session<QuicSession>, ConnectError> {
		if !matches!(url.scheme(), "https" | "moq") {
			return Err(ConnectError::InvalidUrl(format!("unsupported scheme: {}", url.scheme())));
		}

		let host = url
			.host_str()
			.ok_or_else(|| ConnectError::InvalidUrl("missing host".into()))?
			.to_string();
		let port = url.port().unwrap_or(443);

		// Resolve the hostname ourselves so failures classify as DNS errors.
		let addr = tokio::net::lookup_host((host.as_str(), port))
			.await
			.map_err(|err| ConnectError::Dns(err.to_string()))?
			.next()
			.ok_or_else(|| ConnectError::Dns(format!("no addresses for {}", host)))?;

		tracing::debug!(%url, %addr, "connecting");

		let connecting = self
			.endpoint
			.connect(addr, &host)
			.map_err(|err| ConnectError::Network(err.to_string()))?;

		let connection = connecting.await.map_err(classify_connection)?;

		tracing::debug!(%url, "QUIC connection established");

		let session = Session::connect(QuicSession::new(connection), mode).await?;
		Ok(session)
	}
}

use rustls::pki_types::{CertificateDer, ServerName, UnixTime};

#[derive(Debug)]
struct NoCertificateVerification(Arc<rustls::crypto::CryptoProvider>);

impl rustls::client::danger::ServerCertVerifier for NoCertificateVerification {
	fn verify_server_cert(
		&self,
		_end_entity: &CertificateDer<'_>,
		_intermediates: &[CertificateDer<'_>],
		_server_name: &ServerName<'_>,
		_ocsp: &[u8],
		_now: UnixTime,
	) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
		Ok(rustls::client::danger::ServerCertVerified::assertion())
	}

	fn verify_tls12_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &rustls::DigitallySignedStruct,
	) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
		rustls::crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
	}

	fn verify_tls13_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &rustls::DigitallySignedStruct,
	) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
		rustls::crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
	}

	fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
		self.0.signature_verification_algorithms.supported_schemes()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_bind_is_wildcard() {
		let config = ClientConfig::default();
		assert!(config.bind.ip().is_unspecified());
		assert_eq!(config.bind.port(), 0);
	}

	// Building the endpoint registers the UDP socket with the runtime.
	#[tokio::test]
	async fn ipv4_bind_accepted() {
		let config = ClientConfig {
			bind: "0.0.0.0:0".parse().unwrap(),
			..Default::default()
		};
		assert!(config.bind.is_ipv4());
		config.init().expect("failed to build client");
	}
}

//! Session transport: dials a server address and hands back a stream the
//! IRC codec can frame.
//!
//! Addresses are `host:port` (IPv6 hosts in brackets). TLS connections do not
//! verify the server certificate: the networks this bot lives on are mostly
//! self-hosted with self-signed certificates.

use std::io;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{self, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Combined async read+write trait for type-erased transport streams.
pub trait IrcTransport: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> IrcTransport for T {}

/// A connected stream suitable for framing with `IrcCodec`.
///
/// Both plain `TcpStream` and `TlsStream<TcpStream>` satisfy this type.
pub type IrcStream = Box<dyn IrcTransport>;

/// How sessions reach their servers.
#[derive(Clone)]
pub enum Transport {
    /// TCP wrapped in TLS, certificate unchecked.
    Tls(TlsConnector),
    /// Bare TCP.
    Plain,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tls(_) => f.write_str("Transport::Tls"),
            Self::Plain => f.write_str("Transport::Plain"),
        }
    }
}

impl Transport {
    /// Build the TLS transport.
    pub fn tls() -> Result<Self, rustls::Error> {
        let provider = Arc::new(crypto::ring::default_provider());
        let config = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
            .with_no_client_auth();
        Ok(Self::Tls(TlsConnector::from(Arc::new(config))))
    }

    /// Open a connection to `address`.
    pub async fn connect(&self, address: &str) -> io::Result<IrcStream> {
        let tcp = TcpStream::connect(address).await?;
        // Line-oriented chat: flush small frames immediately.
        tcp.set_nodelay(true)?;

        match self {
            Self::Plain => {
                debug!(%address, "transport: plain TCP connected");
                Ok(Box::new(tcp))
            }
            Self::Tls(connector) => {
                let name = server_name(address)?;
                let stream = connector.connect(name, tcp).await?;
                debug!(%address, "transport: TLS established");
                Ok(Box::new(stream))
            }
        }
    }
}

/// Extract the TLS server name (SNI) from a `host:port` address.
fn server_name(address: &str) -> io::Result<ServerName<'static>> {
    let host = match address.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => host,
        _ => address,
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    ServerName::try_from(host.to_owned())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("{address}: {e}")))
}

/// Certificate verifier that accepts any chain but still checks handshake
/// signatures against the provider's algorithms.
#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_name_from_host_port() {
        let name = server_name("irc.example:6697").unwrap();
        assert_eq!(name.to_str(), "irc.example");
    }

    #[test]
    fn server_name_from_bracketed_ipv6() {
        let name = server_name("[::1]:6697").unwrap();
        assert!(matches!(name, ServerName::IpAddress(_)));
    }

    #[test]
    fn server_name_without_port() {
        let name = server_name("irc.example").unwrap();
        assert_eq!(name.to_str(), "irc.example");
    }

    #[test]
    fn tls_transport_builds() {
        assert!(matches!(Transport::tls(), Ok(Transport::Tls(_))));
    }

    #[tokio::test]
    async fn plain_connect_refused_is_io_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(Transport::Plain.connect(&addr.to_string()).await.is_err());
    }
}

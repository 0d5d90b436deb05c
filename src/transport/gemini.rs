//! Gemini client over TLS
//!
//! Request: `<absolute-url>\r\n`. Response: `<status><space><meta>\r\n`
//! followed by the body until the server closes the connection.

use crate::transport::{Response, Transport, TransportError};
use crate::url::DEFAULT_PORT;
use ::url::{Host, Url};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

/// Longest meta string a server may send
pub const MAX_META_LEN: usize = 1024;

/// Status, space, meta, CRLF
const MAX_HEADER_LEN: usize = 2 + 1 + MAX_META_LEN + 2;

/// Accepts any server certificate
///
/// Gemini servers overwhelmingly use self-signed certificates and the crawler
/// keeps no trust store, so only the handshake signatures are checked.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
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
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// [`Transport`] speaking Gemini over `tokio-rustls`
#[derive(Clone)]
pub struct GeminiTransport {
    connector: TlsConnector,
}

impl GeminiTransport {
    /// Builds a client that accepts self-signed server certificates
    pub fn new() -> Result<Self, TransportError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| TransportError::TlsConfig(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
            .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
        })
    }

    async fn request(&self, url: &Url) -> Result<Response, TransportError> {
        let (server_name, host) = match url.host() {
            Some(Host::Domain(domain)) => {
                let name = ServerName::try_from(domain.to_string())
                    .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", url, e)))?;
                (name, domain.to_string())
            }
            Some(Host::Ipv4(ip)) => (ServerName::IpAddress(IpAddr::V4(ip).into()), ip.to_string()),
            Some(Host::Ipv6(ip)) => (ServerName::IpAddress(IpAddr::V6(ip).into()), ip.to_string()),
            None => return Err(TransportError::InvalidUrl(url.to_string())),
        };
        let port = url.port().unwrap_or(DEFAULT_PORT);

        let tcp = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(TransportError::Connect)?;
        let mut stream = self
            .connector
            .connect(server_name, tcp)
            .await
            .map_err(TransportError::Handshake)?;

        stream.write_all(format!("{}\r\n", url).as_bytes()).await?;
        stream.flush().await?;

        let mut reader = BufReader::new(stream);
        let mut header = Vec::new();
        (&mut reader)
            .take(MAX_HEADER_LEN as u64)
            .read_until(b'\n', &mut header)
            .await?;
        let (status, meta) = parse_header(&header)?;

        if status / 10 != 2 {
            return Err(TransportError::Status { status, meta });
        }

        let mut body = Vec::new();
        match reader.read_to_end(&mut body).await {
            Ok(_) => {}
            // Plenty of servers close the socket without a TLS close_notify
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {}
            Err(e) => return Err(e.into()),
        }

        tracing::trace!("{} answered {} {} ({} bytes)", url, status, meta, body.len());
        Ok(Response { status, meta, body })
    }
}

#[async_trait::async_trait]
impl Transport for GeminiTransport {
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<Response, TransportError> {
        tokio::time::timeout(timeout, self.request(url))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
    }
}

/// Parses a raw response header line into status and meta
///
/// The line must end in `\n` (a preceding `\r` is optional), start with two
/// ASCII digits, and carry at most [`MAX_META_LEN`] bytes of meta after a
/// single space.
pub fn parse_header(raw: &[u8]) -> Result<(u8, String), TransportError> {
    let malformed = |reason: &str| TransportError::MalformedHeader(reason.to_string());

    let line = raw
        .strip_suffix(b"\n")
        .ok_or_else(|| malformed("header not terminated by CRLF"))?;
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let line = std::str::from_utf8(line).map_err(|_| malformed("header is not UTF-8"))?;

    let digits = line.get(..2).ok_or_else(|| malformed("missing status"))?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed("status is not two digits"));
    }
    let status: u8 = digits.parse().map_err(|_| malformed("status is not two digits"))?;

    let meta = match &line[2..] {
        "" => "",
        rest => rest
            .strip_prefix(' ')
            .ok_or_else(|| malformed("status not followed by a space"))?,
    };
    if meta.len() > MAX_META_LEN {
        return Err(malformed("meta longer than 1024 bytes"));
    }

    Ok((status, meta.to_string()))
}

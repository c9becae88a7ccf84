//! TLS client configuration and handshakes.

use std::sync::{Arc, OnceLock};

use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::TlsConnector;
use tracing::trace;

use crate::error::{Error, Result};

/// Holds the two client configurations a connector can need: the verifying
/// one (webpki roots) and, built on first use, the dangerous unverified one
/// behind `verify_ssl = false`.
pub(crate) struct TlsClient {
    verified: OnceLock<Arc<ClientConfig>>,
    unverified: OnceLock<Arc<ClientConfig>>,
}

impl TlsClient {
    pub(crate) fn new() -> TlsClient {
        TlsClient {
            verified: OnceLock::new(),
            unverified: OnceLock::new(),
        }
    }

    fn config(&self, verify: bool) -> Arc<ClientConfig> {
        if verify {
            Arc::clone(self.verified.get_or_init(|| {
                let mut roots = RootCertStore::empty();
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                let mut config = ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_no_client_auth();
                config.alpn_protocols = vec![b"http/1.1".to_vec()];
                Arc::new(config)
            }))
        } else {
            Arc::clone(self.unverified.get_or_init(|| {
                let mut config = ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(NoVerification))
                    .with_no_client_auth();
                config.alpn_protocols = vec![b"http/1.1".to_vec()];
                Arc::new(config)
            }))
        }
    }

    /// Run the client handshake over an established stream.
    pub(crate) async fn handshake(
        &self,
        host: &str,
        tcp: TcpStream,
        verify: bool,
    ) -> Result<TlsStream<TcpStream>> {
        let server_name = ServerName::try_from(host.to_owned()).map_err(Error::tls)?;
        let connector = TlsConnector::from(self.config(verify));
        trace!(host, verify, "starting tls handshake");
        connector
            .connect(server_name, tcp)
            .await
            .map_err(Error::tls)
    }
}

impl std::fmt::Debug for TlsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad("TlsClient")
    }
}

/// Certificate verifier that accepts anything, for `verify_ssl = false`.
#[derive(Debug)]
struct NoVerification;

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        tokio_rustls::rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

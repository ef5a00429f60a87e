//! TLS context provider
//!
//! QUIC always runs over TLS. When the caller does not bring its own identity
//! the selector asks its [`TlsProvider`] for one, which generates a
//! self-signed certificate the first time and hands out the same context
//! afterwards. Dialers skip certificate verification, matching the
//! self-signed listener side.

use crate::error::TransportError;
use parking_lot::Mutex;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;
use tracing::info;

/// Subject name placed in generated certificates
const SELF_SIGNED_NAME: &str = "localhost";

/// Ensure rustls crypto provider is installed.
pub fn ensure_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Certificate chain, private key and ALPN identifiers of a listener
#[derive(Debug)]
pub struct TlsContext {
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    alpn: Vec<Vec<u8>>,
}

impl TlsContext {
    /// Wrap a caller-supplied identity
    pub fn new(
        cert_chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
        alpn: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            cert_chain,
            key,
            alpn,
        }
    }

    /// Generate an ephemeral self-signed identity
    pub fn self_signed(alpn: Vec<Vec<u8>>) -> Result<Self, TransportError> {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec![SELF_SIGNED_NAME.to_string()])
                .map_err(TransportError::tls)?;

        let key = PrivateKeyDer::from(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
        Ok(Self::new(vec![cert.der().clone()], key, alpn))
    }

    pub fn cert_chain(&self) -> &[CertificateDer<'static>] {
        &self.cert_chain
    }

    pub fn alpn_protocols(&self) -> &[Vec<u8>] {
        &self.alpn
    }

    /// Build a rustls server configuration from this identity
    pub fn server_config(&self) -> Result<rustls::ServerConfig, TransportError> {
        ensure_crypto_provider();

        let mut config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(self.cert_chain.clone(), self.key.clone_key())
            .map_err(TransportError::tls)?;
        config.alpn_protocols = self.alpn.clone();
        Ok(config)
    }
}

/// Client configuration that accepts any server certificate
pub fn insecure_client_config(alpn: Vec<Vec<u8>>) -> rustls::ClientConfig {
    ensure_crypto_provider();

    let mut config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(NoServerVerification::new())
        .with_no_client_auth();
    config.alpn_protocols = alpn;
    config
}

/// Lazily builds one TLS context and shares it
///
/// Concurrent first use is coalesced: the slot lock is held while the
/// certificate is generated, so every caller gets the same context.
#[derive(Debug)]
pub struct TlsProvider {
    alpn: Vec<Vec<u8>>,
    context: Mutex<Option<Arc<TlsContext>>>,
}

impl TlsProvider {
    /// Create a provider that generates on first use
    pub fn new(alpn: Vec<Vec<u8>>) -> Self {
        Self {
            alpn,
            context: Mutex::new(None),
        }
    }

    /// Create a provider pre-loaded with a caller-supplied context
    pub fn with_context(context: TlsContext) -> Self {
        Self {
            alpn: context.alpn.clone(),
            context: Mutex::new(Some(Arc::new(context))),
        }
    }

    /// Get the shared context, generating it if none exists yet
    pub fn get_or_create(&self) -> Result<Arc<TlsContext>, TransportError> {
        let mut slot = self.context.lock();
        if let Some(context) = slot.as_ref() {
            return Ok(context.clone());
        }

        info!("Generating self-signed TLS identity");
        let context = Arc::new(TlsContext::self_signed(self.alpn.clone())?);
        *slot = Some(context.clone());
        Ok(context)
    }

    /// Whether a context has been built or supplied
    pub fn is_initialized(&self) -> bool {
        self.context.lock().is_some()
    }

    /// Drop the current context; the next use generates a fresh one
    pub fn reset(&self) {
        self.context.lock().take();
    }

    /// Client configuration matching this provider's ALPN identifiers
    pub fn client_config(&self) -> rustls::ClientConfig {
        insecure_client_config(self.alpn.clone())
    }
}

#[derive(Debug)]
struct NoServerVerification {
    crypto: Arc<CryptoProvider>,
}

impl NoServerVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            crypto: Arc::new(rustls::crypto::ring::default_provider()),
        })
    }
}

impl ServerCertVerifier for NoServerVerification {
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
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.crypto.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.crypto.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.crypto
            .signature_verification_algorithms
            .supported_schemes()
    }
}

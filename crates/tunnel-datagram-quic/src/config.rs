//! QUIC configuration for datagram tunnels

use crate::cert::generate_self_signed_cert;
use crate::ensure_crypto_provider;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tunnel_datagram::{MuxerConfig, TransportError, TransportResult, MAX_DATAGRAM_FRAME_SIZE};

/// Default ALPN protocol for datagram tunnels
pub const DEFAULT_ALPN: &str = "tunnel-datagram";

/// Smallest MTU a QUIC path is required to support
const QUIC_MIN_MTU: u16 = 1200;

/// TLS identity of a server endpoint
#[derive(Debug, Clone)]
pub enum ServerIdentity {
    /// PEM files on disk, read when the endpoint is built
    Files { cert_path: PathBuf, key_path: PathBuf },
    /// PEM text held in memory
    Pem { cert_pem: String, key_pem: String },
}

/// QUIC-specific configuration
#[derive(Debug, Clone)]
pub struct QuicConfig {
    /// Server certificate and key (servers only)
    pub server_identity: Option<ServerIdentity>,

    /// Whether to verify the server's TLS certificate
    pub verify_server_cert: bool,

    /// Custom root CA certificates in DER form (system roots when empty)
    pub root_certs: Vec<Vec<u8>>,

    /// Application-Layer Protocol Negotiation (ALPN) protocols
    pub alpn_protocols: Vec<String>,

    /// Keep-alive interval
    pub keep_alive_interval: Duration,

    /// Maximum idle timeout
    pub max_idle_timeout: Duration,

    /// Largest datagram frame muxers on this endpoint produce
    ///
    /// quinn advertises its own limit from the receive buffer size, so this
    /// value reaches the wire only through [`muxer_config`](Self::muxer_config).
    pub max_datagram_frame_size: usize,

    /// MTU assumed before path MTU discovery completes
    ///
    /// Must leave room for a full datagram frame plus QUIC packet overhead,
    /// otherwise maximum-size frames are refused until discovery raises it.
    pub initial_mtu: u16,

    /// Bytes of inbound datagrams buffered before the oldest are dropped
    pub datagram_receive_buffer_size: usize,

    /// Bytes of outbound datagrams buffered before the oldest are dropped
    pub datagram_send_buffer_size: usize,
}

impl QuicConfig {
    fn base() -> Self {
        Self {
            server_identity: None,
            verify_server_cert: true,
            root_certs: Vec::new(),
            alpn_protocols: vec![DEFAULT_ALPN.to_string()],
            keep_alive_interval: Duration::from_secs(3),
            max_idle_timeout: Duration::from_secs(10),
            max_datagram_frame_size: MAX_DATAGRAM_FRAME_SIZE,
            initial_mtu: 1452,
            datagram_receive_buffer_size: 1024 * 1024,
            datagram_send_buffer_size: 1024 * 1024,
        }
    }

    /// Create a client configuration with defaults
    ///
    /// Uses webpki root CAs for certificate verification.
    /// For development/testing with self-signed certs, use `.with_insecure_skip_verify()`.
    pub fn client_default() -> Self {
        Self::base()
    }

    /// Create a client configuration that skips certificate verification
    ///
    /// **INSECURE**: only for local development against self-signed certificates.
    pub fn client_insecure() -> Self {
        Self::client_default().with_insecure_skip_verify()
    }

    /// Create a server configuration from PEM certificate and key files
    pub fn server_default(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Self {
        Self {
            server_identity: Some(ServerIdentity::Files {
                cert_path: cert_path.as_ref().to_path_buf(),
                key_path: key_path.as_ref().to_path_buf(),
            }),
            ..Self::base()
        }
    }

    /// Create a server with a freshly generated self-signed certificate
    ///
    /// Each call produces a new certificate held in memory, so tests running
    /// in parallel never share key material.
    pub fn server_ephemeral() -> TransportResult<Self> {
        let cert = generate_self_signed_cert().map_err(|e| {
            TransportError::TlsError(format!("Failed to generate self-signed cert: {}", e))
        })?;

        Ok(Self {
            server_identity: Some(ServerIdentity::Pem {
                cert_pem: cert.cert_pem,
                key_pem: cert.key_pem,
            }),
            ..Self::base()
        })
    }

    /// Set custom keep-alive interval
    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Set custom idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.max_idle_timeout = timeout;
        self
    }

    /// Set the maximum datagram frame size
    pub fn with_max_datagram_frame_size(mut self, size: usize) -> Self {
        self.max_datagram_frame_size = size;
        self
    }

    /// Set the initial path MTU
    pub fn with_initial_mtu(mut self, mtu: u16) -> Self {
        self.initial_mtu = mtu;
        self
    }

    /// Disable server certificate verification (INSECURE - only for testing!)
    pub fn with_insecure_skip_verify(mut self) -> Self {
        self.verify_server_cert = false;
        self
    }

    /// Set custom ALPN protocols
    pub fn with_alpn_protocols(mut self, protocols: Vec<String>) -> Self {
        self.alpn_protocols = protocols;
        self
    }

    /// Muxer settings matching this endpoint's frame size
    pub fn muxer_config(&self) -> MuxerConfig {
        MuxerConfig::default().with_max_frame_size(self.max_datagram_frame_size)
    }

    /// Validate the configuration
    pub fn validate(&self) -> TransportResult<()> {
        if self.keep_alive_interval.is_zero() {
            return Err(TransportError::ConfigurationError(
                "Keep-alive interval must be > 0".to_string(),
            ));
        }

        if self.max_idle_timeout < self.keep_alive_interval * 2 {
            return Err(TransportError::ConfigurationError(
                "Idle timeout must be at least 2x keep-alive interval".to_string(),
            ));
        }

        if self.initial_mtu < QUIC_MIN_MTU {
            return Err(TransportError::ConfigurationError(format!(
                "Initial MTU must be at least {}",
                QUIC_MIN_MTU
            )));
        }

        if self.max_datagram_frame_size == 0
            || self.max_datagram_frame_size >= self.initial_mtu as usize
        {
            return Err(TransportError::ConfigurationError(format!(
                "Datagram frame size {} must be between 1 and the initial MTU {}",
                self.max_datagram_frame_size, self.initial_mtu
            )));
        }

        if self.datagram_receive_buffer_size < self.max_datagram_frame_size {
            return Err(TransportError::ConfigurationError(
                "Datagram receive buffer must hold at least one frame".to_string(),
            ));
        }

        Ok(())
    }

    fn transport_config(&self) -> TransportResult<quinn::TransportConfig> {
        let idle_timeout = quinn::IdleTimeout::try_from(self.max_idle_timeout).map_err(|e| {
            TransportError::ConfigurationError(format!("Invalid idle timeout: {}", e))
        })?;

        let mut transport = quinn::TransportConfig::default();
        transport.keep_alive_interval(Some(self.keep_alive_interval));
        transport.max_idle_timeout(Some(idle_timeout));
        transport.initial_mtu(self.initial_mtu);
        transport.datagram_receive_buffer_size(Some(self.datagram_receive_buffer_size));
        transport.datagram_send_buffer_size(self.datagram_send_buffer_size);

        Ok(transport)
    }

    fn alpn(&self) -> Vec<Vec<u8>> {
        self.alpn_protocols
            .iter()
            .map(|s| s.as_bytes().to_vec())
            .collect()
    }

    /// Build quinn ClientConfig
    pub(crate) fn build_client_config(&self) -> TransportResult<quinn::ClientConfig> {
        ensure_crypto_provider();

        let mut client_crypto = if self.verify_server_cert {
            let mut roots = quinn::rustls::RootCertStore::empty();

            if self.root_certs.is_empty() {
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            } else {
                for cert_der in &self.root_certs {
                    roots
                        .add(quinn::rustls::pki_types::CertificateDer::from(
                            cert_der.clone(),
                        ))
                        .map_err(|e| {
                            TransportError::ConfigurationError(format!(
                                "Invalid root cert: {}",
                                e
                            ))
                        })?;
                }
            }

            quinn::rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        } else {
            quinn::rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(SkipVerification::new())
                .with_no_client_auth()
        };

        client_crypto.alpn_protocols = self.alpn();

        let mut client_config = quinn::ClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(client_crypto)
                .map_err(|e| TransportError::TlsError(e.to_string()))?,
        ));
        client_config.transport_config(Arc::new(self.transport_config()?));

        Ok(client_config)
    }

    /// Build quinn ServerConfig
    pub(crate) fn build_server_config(&self) -> TransportResult<quinn::ServerConfig> {
        ensure_crypto_provider();

        let identity = self.server_identity.as_ref().ok_or_else(|| {
            TransportError::ConfigurationError("Server certificate required".to_string())
        })?;

        let (cert_pem, key_pem) = match identity {
            ServerIdentity::Files {
                cert_path,
                key_path,
            } => (read_pem(cert_path)?, read_pem(key_path)?),
            ServerIdentity::Pem { cert_pem, key_pem } => (cert_pem.clone(), key_pem.clone()),
        };

        let certs = parse_certs(&cert_pem)?;
        let key = parse_private_key(&key_pem)?;

        let mut server_crypto = quinn::rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| TransportError::TlsError(format!("Invalid cert/key: {}", e)))?;

        server_crypto.alpn_protocols = self.alpn();

        let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(server_crypto)
                .map_err(|e| TransportError::TlsError(e.to_string()))?,
        ));
        server_config.transport_config(Arc::new(self.transport_config()?));

        Ok(server_config)
    }
}

// Helper functions for loading certificates

fn read_pem(path: &Path) -> TransportResult<String> {
    fs::read_to_string(path).map_err(|e| {
        TransportError::TlsError(format!("Failed to read {}: {}", path.display(), e))
    })
}

fn parse_certs(
    pem: &str,
) -> TransportResult<Vec<quinn::rustls::pki_types::CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::TlsError(format!("Failed to parse certs: {}", e)))?;

    if certs.is_empty() {
        return Err(TransportError::TlsError("No certificates found".to_string()));
    }

    Ok(certs)
}

fn parse_private_key(pem: &str) -> TransportResult<quinn::rustls::pki_types::PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut pem.as_bytes())
        .map_err(|e| TransportError::TlsError(format!("Failed to parse key: {}", e)))?
        .ok_or_else(|| TransportError::TlsError("No private key found".to_string()))
}

// Certificate verifier that skips verification (INSECURE - only for testing!)
#[derive(Debug)]
struct SkipVerification;

impl SkipVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl quinn::rustls::client::danger::ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &quinn::rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[quinn::rustls::pki_types::CertificateDer<'_>],
        _server_name: &quinn::rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: quinn::rustls::pki_types::UnixTime,
    ) -> Result<quinn::rustls::client::danger::ServerCertVerified, quinn::rustls::Error> {
        Ok(quinn::rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &quinn::rustls::pki_types::CertificateDer<'_>,
        _dss: &quinn::rustls::DigitallySignedStruct,
    ) -> Result<quinn::rustls::client::danger::HandshakeSignatureValid, quinn::rustls::Error> {
        Ok(quinn::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &quinn::rustls::pki_types::CertificateDer<'_>,
        _dss: &quinn::rustls::DigitallySignedStruct,
    ) -> Result<quinn::rustls::client::danger::HandshakeSignatureValid, quinn::rustls::Error> {
        Ok(quinn::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<quinn::rustls::SignatureScheme> {
        use quinn::rustls::SignatureScheme;
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}

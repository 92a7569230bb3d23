//! Self-signed certificate generation for development and tests
//!
//! Datagram endpoints still need a TLS identity because QUIC always runs
//! TLS 1.3. These certificates are only suitable for loopback testing and
//! local development; clients must skip verification or trust them explicitly.

use rcgen::{CertificateParams, DistinguishedName, DnType, Ia5String, SanType, SerialNumber};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::{Duration, SystemTime};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SelfSignedError {
    #[error("Certificate generation failed: {0}")]
    GenerationFailed(String),

    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),
}

/// PEM-encoded certificate and private key
#[derive(Debug, Clone)]
pub struct SelfSignedCertificate {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Generate a certificate valid for `localhost`, `127.0.0.1` and `::1`
///
/// Valid for 90 days, with a random serial number so that certificates from
/// parallel test runs never collide.
pub fn generate_self_signed_cert() -> Result<SelfSignedCertificate, SelfSignedError> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "Tunnel Datagram Development Certificate");
    dn.push(DnType::OrganizationName, "Tunnel Dev");
    params.distinguished_name = dn;

    let localhost = Ia5String::try_from("localhost")
        .map_err(|e| SelfSignedError::GenerationFailed(e.to_string()))?;
    params.subject_alt_names = vec![
        SanType::DnsName(localhost),
        SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        SanType::IpAddress(IpAddr::V6(Ipv6Addr::LOCALHOST)),
    ];

    let not_before = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_err(|e| SelfSignedError::GenerationFailed(e.to_string()))?;
    params.not_before = time::OffsetDateTime::from_unix_timestamp(not_before.as_secs() as i64)
        .map_err(|e| SelfSignedError::GenerationFailed(e.to_string()))?;

    let not_after = not_before + Duration::from_secs(90 * 24 * 60 * 60);
    params.not_after = time::OffsetDateTime::from_unix_timestamp(not_after.as_secs() as i64)
        .map_err(|e| SelfSignedError::GenerationFailed(e.to_string()))?;

    params.serial_number = Some(SerialNumber::from(rand::random::<u64>()));

    let key_pair = rcgen::KeyPair::generate()
        .map_err(|e| SelfSignedError::KeyGenerationFailed(e.to_string()))?;

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| SelfSignedError::GenerationFailed(e.to_string()))?;

    Ok(SelfSignedCertificate {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_self_signed_cert() {
        let cert = generate_self_signed_cert().unwrap();

        assert!(cert.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(cert.key_pem.contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn test_certificates_are_unique() {
        let a = generate_self_signed_cert().unwrap();
        let b = generate_self_signed_cert().unwrap();
        assert_ne!(a.cert_pem, b.cert_pem);
    }
}

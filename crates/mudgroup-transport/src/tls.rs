//! TLS plumbing for encrypted sessions.
//!
//! Group members identify each other by self-signed certificates. There is
//! no certificate authority, so the verifiers here accept any certificate
//! the remote side presents and only check that the handshake signatures
//! are genuine. Whether a certificate is *trusted* is decided later by the
//! application, keyed on its [`Secret`].

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{ClientConfig, DigitallySignedStruct, DistinguishedName, ServerConfig, SignatureScheme};
use sha2::{Digest, Sha256};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::TransportError;

/// Name sent in the client hello. Certificates are never matched against
/// it, it only has to be a syntactically valid DNS name.
const GROUP_SERVER_NAME: &str = "group.manager";

// ---------------------------------------------------------------------------
// Secret
// ---------------------------------------------------------------------------

/// A peer's stable identity: the SHA-256 digest of its DER certificate,
/// as lowercase hex.
///
/// Two secrets compare equal regardless of the case they were written in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Secret(String);

impl Secret {
    /// Wraps an existing hex string, normalizing it to lowercase.
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_ascii_lowercase())
    }

    /// Computes the secret of a DER-encoded certificate.
    pub fn from_certificate_der(der: &[u8]) -> Self {
        let digest = Sha256::digest(der);
        Self(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    /// Computes the secret of the first certificate in a PEM document.
    pub fn from_certificate_pem(pem: &str) -> Result<Self, TransportError> {
        let der = parse_certificates(pem)?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::InvalidIdentity("no certificate found".into()))?;
        Ok(Self::from_certificate_der(der.as_ref()))
    }

    /// Returns the hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the remote side proved about itself during the TLS handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    pub secret: Secret,
    pub certificate_pem: String,
}

impl PeerIdentity {
    /// Builds the identity from the certificate chain the peer presented.
    pub(crate) fn from_chain(chain: Option<&[CertificateDer<'static>]>) -> Option<Self> {
        let leaf = chain?.first()?;
        Some(Self {
            secret: Secret::from_certificate_der(leaf.as_ref()),
            certificate_pem: der_to_pem(leaf.as_ref()),
        })
    }
}

/// Encodes a DER certificate as a PEM block.
pub fn der_to_pem(der: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(der);
    let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
    for line in encoded.as_bytes().chunks(64) {
        // base64 output is pure ASCII.
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}

// ---------------------------------------------------------------------------
// TlsIdentity / TlsContext
// ---------------------------------------------------------------------------

/// The local certificate chain and private key, parsed and ready for rustls.
#[derive(Debug)]
pub struct TlsIdentity {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl TlsIdentity {
    /// Parses a PEM certificate and PEM private key.
    pub fn from_pem(certificate_pem: &str, private_key_pem: &str) -> Result<Self, TransportError> {
        let chain = parse_certificates(certificate_pem)?;
        if chain.is_empty() {
            return Err(TransportError::InvalidIdentity("no certificate found".into()));
        }
        let mut cursor = std::io::Cursor::new(private_key_pem.as_bytes());
        let key = rustls_pemfile::private_key(&mut cursor)
            .map_err(|e| TransportError::InvalidIdentity(format!("key parsing failed: {e}")))?
            .ok_or_else(|| TransportError::InvalidIdentity("no private key found".into()))?;
        Ok(Self { chain, key })
    }

    /// Returns the secret other members will see for this identity.
    pub fn secret(&self) -> Option<Secret> {
        self.chain
            .first()
            .map(|der| Secret::from_certificate_der(der.as_ref()))
    }
}

/// Acceptor and connector sharing one local identity.
///
/// Cheap to clone: both halves are `Arc`s internally.
#[derive(Clone)]
pub struct TlsContext {
    acceptor: TlsAcceptor,
    connector: TlsConnector,
}

impl TlsContext {
    /// Builds server and client configurations that present `identity`
    /// and accept any well-formed certificate from the other side.
    pub fn new(identity: &TlsIdentity) -> Result<Self, TransportError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let algorithms = provider.signature_verification_algorithms;

        let server = ServerConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()?
            .with_client_cert_verifier(Arc::new(AnyClientCert { algorithms }))
            .with_single_cert(identity.chain.clone(), identity.key.clone_key())?;

        let client = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AnyServerCert { algorithms }))
            .with_client_auth_cert(identity.chain.clone(), identity.key.clone_key())?;

        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(server)),
            connector: TlsConnector::from(Arc::new(client)),
        })
    }

    pub(crate) fn acceptor(&self) -> &TlsAcceptor {
        &self.acceptor
    }

    pub(crate) fn connector(&self) -> &TlsConnector {
        &self.connector
    }

    pub(crate) fn server_name() -> Result<ServerName<'static>, TransportError> {
        ServerName::try_from(GROUP_SERVER_NAME)
            .map_err(|e| TransportError::InvalidIdentity(e.to_string()))
    }
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext").finish_non_exhaustive()
    }
}

fn parse_certificates(pem: &str) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let mut cursor = std::io::Cursor::new(pem.as_bytes());
    rustls_pemfile::certs(&mut cursor)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::InvalidIdentity(format!("certificate parsing failed: {e}")))
}

// ---------------------------------------------------------------------------
// Verifiers
// ---------------------------------------------------------------------------

/// Accepts any server certificate but still verifies handshake signatures.
#[derive(Debug)]
struct AnyServerCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for AnyServerCert {
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
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// Requires a client certificate, accepts any, verifies signatures.
#[derive(Debug)]
struct AnyClientCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ClientCertVerifier for AnyClientCert {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed() -> (String, String) {
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::default().self_signed(&key).unwrap();
        (cert.pem(), key.serialize_pem())
    }

    #[test]
    fn test_secret_new_normalizes_case() {
        assert_eq!(Secret::new("ABCdef"), Secret::new("abcDEF"));
        assert_eq!(Secret::new(" AB ").as_str(), "ab");
    }

    #[test]
    fn test_secret_from_der_is_lowercase_sha256_hex() {
        let secret = Secret::from_certificate_der(b"");
        assert_eq!(
            secret.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_der_to_pem_round_trips_through_secret() {
        let (cert_pem, key_pem) = self_signed();
        let identity = TlsIdentity::from_pem(&cert_pem, &key_pem).unwrap();
        let der = identity.chain[0].as_ref().to_vec();
        let pem = der_to_pem(&der);
        assert_eq!(
            Secret::from_certificate_pem(&pem).unwrap(),
            Secret::from_certificate_der(&der)
        );
        assert_eq!(identity.secret(), Some(Secret::from_certificate_der(&der)));
    }

    #[test]
    fn test_tls_identity_from_pem_rejects_garbage() {
        assert!(TlsIdentity::from_pem("nope", "nope").is_err());
    }

    #[test]
    fn test_tls_context_new_builds_from_generated_identity() {
        let (cert_pem, key_pem) = self_signed();
        let identity = TlsIdentity::from_pem(&cert_pem, &key_pem).unwrap();
        assert!(TlsContext::new(&identity).is_ok());
    }
}

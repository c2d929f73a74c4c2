//! The local self-signed identity.

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use mudgroup_transport::{Secret, TlsIdentity};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_RSA_SHA256};

use crate::TrustError;

const ORGANIZATION: &str = "MUME";
const ORGANIZATIONAL_UNIT: &str = "MMapper";
const COMMON_NAME: &str = "GroupManager";

/// Roughly ten years.
const VALIDITY_DAYS: u64 = 3650;

/// This member's certificate and private key, both PEM encoded.
#[derive(Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub certificate_pem: String,
    pub private_key_pem: String,
    /// Digest of `certificate_pem`; what other members see.
    pub secret: Secret,
    pub expires_at: DateTime<Utc>,
}

impl LocalIdentity {
    /// Generates a fresh self-signed identity valid from today.
    pub fn generate() -> Result<Self, TrustError> {
        Self::generate_at(Utc::now())
    }

    /// Generates an identity whose validity starts at `now`.
    pub fn generate_at(now: DateTime<Utc>) -> Result<Self, TrustError> {
        let expires_at = now
            .checked_add_days(Days::new(VALIDITY_DAYS))
            .and_then(midnight)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut params = CertificateParams::new(vec!["group.manager".to_string()])?;
        let mut name = DistinguishedName::new();
        name.push(DnType::OrganizationName, ORGANIZATION);
        name.push(DnType::OrganizationalUnitName, ORGANIZATIONAL_UNIT);
        name.push(DnType::CommonName, COMMON_NAME);
        params.distinguished_name = name;
        set_validity(&mut params, now, expires_at);

        let key_pair = generate_key_pair()?;
        let cert = params.self_signed(&key_pair)?;

        tracing::info!(%expires_at, "generated new local identity");
        Ok(Self {
            certificate_pem: cert.pem(),
            private_key_pem: key_pair.serialize_pem(),
            secret: Secret::from_certificate_der(cert.der()),
            expires_at,
        })
    }

    /// Rebuilds an identity from stored PEM text.
    ///
    /// The secret is recomputed from the certificate, never trusted from
    /// storage.
    pub fn from_pem(
        certificate_pem: impl Into<String>,
        private_key_pem: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Result<Self, TrustError> {
        let certificate_pem = certificate_pem.into();
        let private_key_pem = private_key_pem.into();
        // Parse both halves now so a broken pair is caught before TLS needs it.
        TlsIdentity::from_pem(&certificate_pem, &private_key_pem)?;
        let secret = Secret::from_certificate_pem(&certificate_pem)?;
        Ok(Self {
            certificate_pem,
            private_key_pem,
            secret,
            expires_at,
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Parses the PEM pair for the TLS layer.
    pub fn tls_identity(&self) -> Result<TlsIdentity, TrustError> {
        Ok(TlsIdentity::from_pem(&self.certificate_pem, &self.private_key_pem)?)
    }
}

impl std::fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the private key.
        f.debug_struct("LocalIdentity")
            .field("secret", &self.secret)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// RSA 2048 when the crypto backend can generate it, ECDSA P-256 otherwise.
fn generate_key_pair() -> Result<KeyPair, TrustError> {
    match KeyPair::generate_for(&PKCS_RSA_SHA256) {
        Ok(key_pair) => Ok(key_pair),
        Err(rcgen::Error::KeyGenerationUnavailable) => {
            tracing::warn!("RSA key generation unavailable, using ECDSA");
            Ok(KeyPair::generate()?)
        }
        Err(e) => Err(e.into()),
    }
}

fn midnight(at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    // rcgen only takes calendar dates; cap the day so every month has it.
    let day = at.day().min(28);
    NaiveDate::from_ymd_opt(at.year(), at.month(), day)?
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
}

fn set_validity(params: &mut CertificateParams, from: DateTime<Utc>, until: DateTime<Utc>) {
    params.not_before = rcgen::date_time_ymd(from.year(), from.month() as u8, from.day() as u8);
    params.not_after = rcgen::date_time_ymd(until.year(), until.month() as u8, until.day() as u8);
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_generate_produces_parseable_identity() {
        let identity = LocalIdentity::generate().expect("generate");
        assert!(identity.certificate_pem.contains("BEGIN CERTIFICATE"));
        let tls = identity.tls_identity().expect("tls identity");
        assert_eq!(tls.secret(), Some(identity.secret.clone()));
        assert_eq!(identity.secret.as_str().len(), 64);
    }

    #[test]
    fn test_generate_uses_rsa_key() {
        let identity = LocalIdentity::generate().expect("generate");
        let key = KeyPair::from_pem(&identity.private_key_pem).expect("key");
        assert!(key.is_compatible(&PKCS_RSA_SHA256));
    }

    #[test]
    fn test_generate_twice_gives_distinct_secrets() {
        let a = LocalIdentity::generate().expect("a");
        let b = LocalIdentity::generate().expect("b");
        assert_ne!(a.secret, b.secret);
    }

    #[test]
    fn test_generate_at_expires_about_ten_years_later() {
        let now = Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap();
        let identity = LocalIdentity::generate_at(now).expect("generate");
        assert_eq!(identity.expires_at.year(), 2034);
        assert!(identity.expires_at.day() <= 28);
        assert!(!identity.is_expired_at(now));
        assert!(identity.is_expired_at(identity.expires_at));
    }

    #[test]
    fn test_from_pem_recomputes_secret() {
        let original = LocalIdentity::generate().expect("generate");
        let loaded = LocalIdentity::from_pem(
            original.certificate_pem.clone(),
            original.private_key_pem.clone(),
            original.expires_at,
        )
        .expect("load");
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_from_pem_garbage_is_invalid_identity() {
        let err = LocalIdentity::from_pem("nope", "nope", Utc::now()).unwrap_err();
        assert!(matches!(err, TrustError::InvalidIdentity(_)));
    }

    #[test]
    fn test_debug_hides_private_key() {
        let identity = LocalIdentity::generate().expect("generate");
        let printed = format!("{identity:?}");
        assert!(!printed.contains("PRIVATE KEY"));
    }
}

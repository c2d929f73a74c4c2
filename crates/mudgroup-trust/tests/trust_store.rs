//! Integration tests for identity lifecycle and revocation events.

use std::sync::Arc;

use chrono::{Duration, Utc};
use mudgroup_trust::{
    LocalIdentity, MemoryBackend, Secret, TrustBackend, TrustEvent, TrustStore,
};

fn open(backend: &Arc<MemoryBackend>) -> TrustStore {
    let shared: Arc<dyn TrustBackend> = backend.clone();
    TrustStore::open(shared).expect("open")
}

// =========================================================================
// Identity lifecycle
// =========================================================================

#[test]
fn test_open_first_use_generates_and_saves_identity() {
    let backend = Arc::new(MemoryBackend::new());
    let store = open(&backend);
    let saved = backend.load_identity().expect("saved");
    assert_eq!(saved.secret, store.secret());
}

#[test]
fn test_open_valid_stored_identity_is_kept() {
    let identity = LocalIdentity::generate().expect("generate");
    let backend = Arc::new(MemoryBackend::with_identity(identity.clone()));
    let store = open(&backend);
    assert_eq!(store.secret(), identity.secret);
}

#[test]
fn test_open_expired_identity_is_replaced() {
    let long_ago = Utc::now() - Duration::days(365 * 11);
    let expired = LocalIdentity::generate_at(long_ago).expect("generate");
    assert!(expired.is_expired());
    let backend = Arc::new(MemoryBackend::with_identity(expired.clone()));

    let store = open(&backend);
    assert_ne!(store.secret(), expired.secret);
    assert!(!store.local_identity().is_expired());
}

#[test]
fn test_open_unreadable_identity_is_replaced() {
    let mut broken = LocalIdentity::generate().expect("generate");
    broken.certificate_pem = "not a certificate".into();
    let backend = Arc::new(MemoryBackend::with_identity(broken.clone()));

    let store = open(&backend);
    assert_ne!(store.local_identity().certificate_pem, broken.certificate_pem);
    assert!(store.local_identity().tls_identity().is_ok());
}

#[test]
fn test_open_deduplicates_stored_contacts() {
    let backend = Arc::new(MemoryBackend::with_contacts([
        Secret::new("aa"),
        Secret::new("AA"),
        Secret::new("bb"),
    ]));
    let store = open(&backend);
    assert_eq!(store.contacts(), vec![Secret::new("aa"), Secret::new("bb")]);
}

// =========================================================================
// Events
// =========================================================================

#[tokio::test]
async fn test_revoke_emits_event_after_removal() {
    let backend = Arc::new(MemoryBackend::new());
    let store = open(&backend);
    let secret = Secret::new("deadbeef");
    store.allow(&secret);
    let mut events = store.subscribe();

    assert!(store.revoke(&secret));
    assert_eq!(events.recv().await.unwrap(), TrustEvent::Revoked(secret.clone()));
    assert!(!store.is_allowed(&secret));
    assert!(backend.load_contacts().is_empty());
}

#[tokio::test]
async fn test_refresh_emits_new_secret_and_persists_it() {
    let backend = Arc::new(MemoryBackend::new());
    let store = open(&backend);
    let before = store.secret();
    let mut events = store.subscribe();

    let after = store.refresh().expect("refresh");
    assert_ne!(before, after);
    assert_eq!(events.recv().await.unwrap(), TrustEvent::Refreshed(after.clone()));
    assert_eq!(backend.load_identity().unwrap().secret, after);
}

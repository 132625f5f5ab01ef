//! Integration tests for encrypted token storage across store instances.

mod common;

use assert_fs::prelude::*;
use common::*;
use photo_library_scan::core::auth::CredentialStore;
use photo_library_scan::core::config::ClientConfig;
use photo_library_scan::error::{AuthError, EnvelopeError};
use predicates::prelude::*;
use std::sync::Arc;

fn client_with_passphrase(passphrase: &str) -> ClientConfig {
    let mut client = client();
    client.passphrase = Some(zeroize::Zeroizing::new(passphrase.to_string()));
    client
}

#[test]
fn tokens_survive_a_new_store_and_never_hit_disk_in_clear() {
    let temp = assert_fs::TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::new());

    let first = CredentialStore::new(temp.path(), client(), library.clone());
    first.store_tokens("personal", &tokens("secret-access-token")).unwrap();

    let file = temp.child("personal.enc");
    file.assert(predicate::path::is_file());
    file.assert(predicate::str::contains("secret-access-token").not());

    let second = CredentialStore::new(temp.path(), client(), library.clone());
    let token = second.get_valid_access_token("personal", false).unwrap();
    assert_eq!(token.value, "secret-access-token");
    assert!(!token.refreshed);
    // A valid token needs no network
    assert!(library.requests.lock().unwrap().is_empty());
}

#[test]
fn wrong_passphrase_cannot_open_stored_tokens() {
    let temp = assert_fs::TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::new());

    CredentialStore::new(temp.path(), client(), library.clone())
        .store_tokens("default", &tokens("a1"))
        .unwrap();

    let intruder = CredentialStore::new(temp.path(), client_with_passphrase("not the passphrase"), library);
    let result = intruder.get_valid_access_token("default", false);
    assert!(matches!(
        result,
        Err(AuthError::Envelope(EnvelopeError::DecryptionFailed))
    ));
}

#[test]
fn identities_are_kept_apart() {
    let temp = assert_fs::TempDir::new().unwrap();
    let store = CredentialStore::new(temp.path(), client(), Arc::new(FakeLibrary::new()));

    store.store_tokens("work", &tokens("work-token")).unwrap();
    store.store_tokens("home", &tokens("home-token")).unwrap();

    temp.child("work.enc").assert(predicate::path::is_file());
    temp.child("home.enc").assert(predicate::path::is_file());
    assert!(!store.has_credentials("other"));
    assert_eq!(store.get_valid_access_token("home", false).unwrap().value, "home-token");
    assert!(matches!(
        store.get_valid_access_token("other", false),
        Err(AuthError::NotAuthorized { .. })
    ));
    assert!(store.token_path("../escape").is_err());
}

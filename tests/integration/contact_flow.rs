//! Integration tests for the signup and contact-list flow.
//!
//! Runs a real in-process gateway and drives it through the client
//! library: account creation via the consumed auth interface, profile
//! registration, user search, and the contact invariants (no duplicates,
//! no self-adds, not-found for unregistered emails).

use std::sync::Arc;

use parley::client::{ClientError, ServerConnection};
use parley::identity::{AuthGateway, LocalAuth};
use parley_server::gateway::{self, GatewayState};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Starts an in-process gateway and returns its ws:// URL and state.
async fn start_gateway() -> (String, Arc<GatewayState>) {
    let state = Arc::new(GatewayState::new());
    let (addr, _handle) = gateway::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start test gateway");
    (format!("ws://{addr}/ws"), state)
}

/// Signs up an account, connects, and registers a profile.
async fn signed_up_client(url: &str, auth: &LocalAuth, email: &str, username: &str) -> ServerConnection {
    let identity = auth
        .sign_up(email, "hunter22")
        .await
        .expect("sign up should succeed");
    let connection = ServerConnection::connect(url, identity)
        .await
        .expect("connect should succeed");
    connection
        .create_profile(username, "Test", username)
        .await
        .expect("profile creation should succeed");
    connection
}

// ---------------------------------------------------------------------------
// Signup and search
// ---------------------------------------------------------------------------

#[tokio::test]
async fn signup_connect_and_create_profile() {
    let (url, _state) = start_gateway().await;
    let auth = LocalAuth::new();

    let identity = auth.sign_up("alice@x.com", "hunter22").await.unwrap();
    let connection = ServerConnection::connect(&url, identity.clone())
        .await
        .unwrap();

    let user = connection
        .create_profile("Alice", "Smith", "alice")
        .await
        .unwrap();
    assert_eq!(user.id, identity.user_id);
    assert_eq!(user.email, identity.email);
    assert_eq!(user.profile.username, "alice");
}

#[tokio::test]
async fn search_finds_registered_user_case_insensitively() {
    let (url, _state) = start_gateway().await;
    let auth = LocalAuth::new();
    let _alice = signed_up_client(&url, &auth, "alice@x.com", "alice").await;
    let bob = signed_up_client(&url, &auth, "bob@x.com", "bob").await;

    let found = bob.search_user("ALICE@X.com").await.unwrap();
    assert_eq!(found.email.as_str(), "alice@x.com");
    assert_eq!(found.profile.username, "alice");
}

#[tokio::test]
async fn search_unknown_email_is_not_found() {
    let (url, _state) = start_gateway().await;
    let auth = LocalAuth::new();
    let alice = signed_up_client(&url, &auth, "alice@x.com", "alice").await;

    let result = alice.search_user("ghost@x.com").await;
    assert!(matches!(result, Err(ClientError::NotFound(_))));
}

#[tokio::test]
async fn duplicate_username_is_a_conflict() {
    let (url, _state) = start_gateway().await;
    let auth = LocalAuth::new();
    let _alice = signed_up_client(&url, &auth, "alice@x.com", "alice").await;

    let identity = auth.sign_up("bob@x.com", "hunter22").await.unwrap();
    let bob = ServerConnection::connect(&url, identity).await.unwrap();

    let result = bob.create_profile("Bob", "Jones", "ALICE").await;
    assert!(matches!(result, Err(ClientError::Conflict(_))));
}

// ---------------------------------------------------------------------------
// Contact invariants
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_contact_then_list_returns_it() {
    let (url, _state) = start_gateway().await;
    let auth = LocalAuth::new();
    let _bob = signed_up_client(&url, &auth, "bob@x.com", "bob").await;
    let alice = signed_up_client(&url, &auth, "alice@x.com", "alice").await;

    let added = alice.add_contact("bob@x.com").await.unwrap();
    assert_eq!(added.as_str(), "bob@x.com");

    let contacts = alice.list_contacts().await.unwrap();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].as_str(), "bob@x.com");
}

#[tokio::test]
async fn second_identical_add_fails_with_conflict() {
    let (url, _state) = start_gateway().await;
    let auth = LocalAuth::new();
    let _bob = signed_up_client(&url, &auth, "bob@x.com", "bob").await;
    let alice = signed_up_client(&url, &auth, "alice@x.com", "alice").await;

    alice.add_contact("bob@x.com").await.unwrap();
    let second = alice.add_contact("bob@x.com").await;

    assert!(matches!(second, Err(ClientError::Conflict(_))));
    assert_eq!(alice.list_contacts().await.unwrap().len(), 1);
}

#[tokio::test]
async fn self_add_always_fails_and_creates_no_record() {
    let (url, _state) = start_gateway().await;
    let auth = LocalAuth::new();
    let alice = signed_up_client(&url, &auth, "alice@x.com", "alice").await;

    // Case differences must not smuggle a self-add through.
    for attempt in ["alice@x.com", "ALICE@X.COM"] {
        let result = alice.add_contact(attempt).await;
        assert!(
            matches!(result, Err(ClientError::Validation(_))),
            "self-add {attempt:?} must be rejected"
        );
    }

    assert!(alice.list_contacts().await.unwrap().is_empty());
}

#[tokio::test]
async fn adding_unregistered_email_is_not_found() {
    let (url, _state) = start_gateway().await;
    let auth = LocalAuth::new();
    let alice = signed_up_client(&url, &auth, "alice@x.com", "alice").await;

    let result = alice.add_contact("nobody@x.com").await;
    assert!(matches!(result, Err(ClientError::NotFound(_))));
    assert!(alice.list_contacts().await.unwrap().is_empty());
}

#[tokio::test]
async fn adding_malformed_email_is_a_validation_error() {
    let (url, _state) = start_gateway().await;
    let auth = LocalAuth::new();
    let alice = signed_up_client(&url, &auth, "alice@x.com", "alice").await;

    let result = alice.add_contact("not-an-email").await;
    assert!(matches!(result, Err(ClientError::Validation(_))));
}

#[tokio::test]
async fn contacts_are_per_owner() {
    let (url, _state) = start_gateway().await;
    let auth = LocalAuth::new();
    let _carol = signed_up_client(&url, &auth, "carol@x.com", "carol").await;
    let alice = signed_up_client(&url, &auth, "alice@x.com", "alice").await;
    let bob = signed_up_client(&url, &auth, "bob@x.com", "bob").await;

    alice.add_contact("carol@x.com").await.unwrap();

    assert_eq!(alice.list_contacts().await.unwrap().len(), 1);
    assert!(bob.list_contacts().await.unwrap().is_empty());
}

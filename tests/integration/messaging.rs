//! Integration tests for conversations: ordered delivery, late
//! subscription, validation, isolation between conversations, and the
//! draft-preserving send flow — all over a real in-process gateway.

use std::sync::Arc;
use std::time::Duration;

use parley::client::{ClientError, ServerConnection};
use parley::identity::Identity;
use parley::session::{ChatSession, SendState};
use parley_proto::message::Message;
use parley_proto::user::{Email, UserId};
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

fn identity(email: &str) -> Identity {
    Identity {
        user_id: UserId::new(format!("u-{email}")),
        email: Email::parse(email).expect("test email should parse"),
    }
}

async fn client(url: &str, email: &str) -> ServerConnection {
    ServerConnection::connect(url, identity(email))
        .await
        .expect("connect should succeed")
}

/// Receives the next message with a timeout so a broken stream fails the
/// test instead of hanging it.
async fn recv_message(session: &mut ChatSession) -> Message {
    tokio::time::timeout(Duration::from_secs(5), session.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("stream ended unexpectedly")
}

// ---------------------------------------------------------------------------
// End-to-end exchange
// ---------------------------------------------------------------------------

/// Alice adds Bob, opens the conversation, sends "hi"; Bob receives it and
/// replies "hello"; timestamps never decrease.
#[tokio::test]
async fn two_users_exchange_messages_in_order() {
    let (url, _state) = start_gateway().await;
    let alice = client(&url, "alice@x.com").await;
    let bob = client(&url, "bob@x.com").await;

    let mut alice_session = alice.open_conversation("bob@x.com").await.unwrap();
    let mut bob_session = bob.open_conversation("alice@x.com").await.unwrap();
    assert_eq!(alice_session.conversation(), bob_session.conversation());

    alice_session.set_draft("hi");
    let hi = alice_session.submit().await.unwrap();

    let received = recv_message(&mut bob_session).await;
    assert_eq!(received.text, "hi");
    assert_eq!(received.sender.as_str(), "alice@x.com");
    assert_eq!(received.id, hi.id);

    bob_session.set_draft("hello");
    let hello = bob_session.submit().await.unwrap();
    assert!(hello.timestamp >= hi.timestamp);

    // Alice's stream carries both messages in order.
    let first = recv_message(&mut alice_session).await;
    let second = recv_message(&mut alice_session).await;
    assert_eq!(first.text, "hi");
    assert_eq!(second.text, "hello");
    assert_eq!(second.sender.as_str(), "bob@x.com");
    assert!(second.timestamp >= first.timestamp);
}

// ---------------------------------------------------------------------------
// Late subscription
// ---------------------------------------------------------------------------

/// A subscriber arriving after three messages receives exactly those
/// three in order, then each later message exactly once.
#[tokio::test]
async fn late_subscriber_gets_history_then_live_exactly_once() {
    let (url, _state) = start_gateway().await;
    let alice = client(&url, "alice@x.com").await;
    let bob = client(&url, "bob@x.com").await;

    let mut alice_session = alice.open_conversation("bob@x.com").await.unwrap();
    for i in 0..3 {
        alice_session.set_draft(format!("history {i}"));
        alice_session.submit().await.unwrap();
    }

    let mut bob_session = bob.open_conversation("alice@x.com").await.unwrap();

    alice_session.set_draft("live 0");
    alice_session.submit().await.unwrap();

    let mut received = Vec::new();
    for _ in 0..4 {
        received.push(recv_message(&mut bob_session).await);
    }

    let texts: Vec<&str> = received.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["history 0", "history 1", "history 2", "live 0"]);

    for i in 0..received.len() {
        for j in (i + 1)..received.len() {
            assert_ne!(received[i].id, received[j].id, "no duplicate deliveries");
        }
    }
    assert!(bob_session.try_recv().is_none(), "nothing further buffered");
}

// ---------------------------------------------------------------------------
// Validation and draft preservation
// ---------------------------------------------------------------------------

/// A whitespace-only submit is rejected locally, the draft survives, and
/// the conversation's stored history is unchanged.
#[tokio::test]
async fn empty_submit_is_rejected_and_log_unchanged() {
    let (url, state) = start_gateway().await;
    let alice = client(&url, "alice@x.com").await;

    let mut session = alice.open_conversation("bob@x.com").await.unwrap();
    let key = session.conversation().clone();

    session.set_draft("  \n ");
    let result = session.submit().await;

    assert!(matches!(result, Err(ClientError::Validation(_))));
    assert_eq!(session.draft(), "  \n ", "draft must survive the failure");

    let history = state
        .log
        .history(&key, &Email::parse("alice@x.com").unwrap())
        .await
        .unwrap();
    assert!(history.is_empty(), "nothing may be stored");
}

/// When the gateway drops the connection, a submit fails, the draft and
/// send state reflect the failure, and nothing is lost for a retry.
#[tokio::test]
async fn draft_survives_connection_loss() {
    let (url, state) = start_gateway().await;
    let alice = client(&url, "alice@x.com").await;
    let mut session = alice.open_conversation("bob@x.com").await.unwrap();

    state.close_all_connections().await;

    // Wait for the client to observe the disconnect (up to 5 seconds).
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while alice.is_connected() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!alice.is_connected(), "client should observe the disconnect");

    session.set_draft("do not lose me");
    let result = session.submit().await;

    assert!(result.is_err(), "submit must fail on a dead connection");
    assert_eq!(session.draft(), "do not lose me");
    assert!(matches!(session.send_state(), SendState::Failed(_)));
}

// ---------------------------------------------------------------------------
// Conversation isolation
// ---------------------------------------------------------------------------

/// Messages of one conversation never reach a subscriber of another, even
/// when the conversations share a participant.
#[tokio::test]
async fn messages_do_not_leak_across_conversations() {
    let (url, _state) = start_gateway().await;
    let alice = client(&url, "alice@x.com").await;
    let carol = client(&url, "carol@x.com").await;

    // Carol subscribes to her own conversation with Alice.
    let mut carol_session = carol.open_conversation("alice@x.com").await.unwrap();

    // Alice talks to Bob.
    let mut alice_bob = alice.open_conversation("bob@x.com").await.unwrap();
    alice_bob.set_draft("for bob only");
    alice_bob.submit().await.unwrap();

    // Alice's own stream sees it; Carol's must not.
    assert_eq!(recv_message(&mut alice_bob).await.text, "for bob only");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(carol_session.try_recv().is_none());
}

// ---------------------------------------------------------------------------
// Concurrent senders
// ---------------------------------------------------------------------------

/// Both participants sending concurrently still produce one ascending
/// sequence, observed identically by both subscribers.
#[tokio::test]
async fn concurrent_senders_observe_one_ordered_sequence() {
    let (url, _state) = start_gateway().await;
    let alice = client(&url, "alice@x.com").await;
    let bob = client(&url, "bob@x.com").await;

    let alice_session = alice.open_conversation("bob@x.com").await.unwrap();
    let bob_session = bob.open_conversation("alice@x.com").await.unwrap();

    let (mut alice_session, mut bob_session) = tokio::join!(
        async move {
            let mut session = alice_session;
            for i in 0..10 {
                session.set_draft(format!("alice {i}"));
                session.submit().await.unwrap();
            }
            session
        },
        async move {
            let mut session = bob_session;
            for i in 0..10 {
                session.set_draft(format!("bob {i}"));
                session.submit().await.unwrap();
            }
            session
        }
    );

    let mut alice_seen = Vec::new();
    let mut bob_seen = Vec::new();
    for _ in 0..20 {
        alice_seen.push(recv_message(&mut alice_session).await);
        bob_seen.push(recv_message(&mut bob_session).await);
    }

    assert_eq!(alice_seen, bob_seen, "identical sequence for all subscribers");
    for pair in alice_seen.windows(2) {
        assert!(
            pair[0].timestamp <= pair[1].timestamp,
            "timestamps must never decrease"
        );
    }

    // Each sender's own messages stay in their submission order.
    let alice_msgs: Vec<&str> = alice_seen
        .iter()
        .filter(|m| m.sender.as_str() == "alice@x.com")
        .map(|m| m.text.as_str())
        .collect();
    let expected: Vec<String> = (0..10).map(|i| format!("alice {i}")).collect();
    assert_eq!(alice_msgs, expected.iter().map(String::as_str).collect::<Vec<_>>());
}

// ---------------------------------------------------------------------------
// Session close
// ---------------------------------------------------------------------------

/// After close, no further messages are delivered to the session; the
/// other participant is unaffected.
#[tokio::test]
async fn closed_session_stops_receiving() {
    let (url, _state) = start_gateway().await;
    let alice = client(&url, "alice@x.com").await;
    let bob = client(&url, "bob@x.com").await;

    let mut alice_session = alice.open_conversation("bob@x.com").await.unwrap();
    let mut bob_session = bob.open_conversation("alice@x.com").await.unwrap();

    bob_session.close().await.unwrap();
    bob_session.close().await.unwrap(); // idempotent

    alice_session.set_draft("anyone there?");
    alice_session.submit().await.unwrap();

    // Alice still receives her own append; Bob's closed session does not.
    assert_eq!(recv_message(&mut alice_session).await.text, "anyone there?");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(bob_session.try_recv().is_none());
}

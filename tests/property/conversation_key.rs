//! Property-based tests for conversation-key algebra and frame codecs.
//!
//! Uses proptest to verify:
//! 1. The conversation key is symmetric: `between(a, b) == between(b, a)`.
//! 2. Keys for distinct unordered pairs are distinct.
//! 3. A key admits exactly its own two participants.
//! 4. Client and server frames survive encode → decode round-trips.
//! 5. Random bytes never cause a panic in the decoders.

use proptest::prelude::*;

use parley_proto::codec;
use parley_proto::frame::{ClientFrame, ErrorKind, ServerFrame};
use parley_proto::message::{ConversationKey, Message, MessageId, SendToken, Timestamp};
use parley_proto::user::Email;
use uuid::Uuid;

// --- Strategies ---

/// Strategy for generating valid, canonical email addresses.
fn arb_email() -> impl Strategy<Value = Email> {
    "[a-z0-9]{1,12}@[a-z0-9]{1,12}\\.[a-z]{2,4}"
        .prop_map(|s| Email::parse(&s).expect("generated email should parse"))
}

/// Strategy for generating arbitrary `Timestamp` values.
fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
    any::<u64>().prop_map(Timestamp::from_millis)
}

/// Strategy for generating arbitrary stored messages.
fn arb_message() -> impl Strategy<Value = Message> {
    (
        any::<u128>(),
        arb_email(),
        arb_email(),
        "[^\x00]{1,512}",
        arb_timestamp(),
    )
        .prop_map(|(id, a, b, text, timestamp)| Message {
            id: MessageId::from_uuid(Uuid::from_u128(id)),
            conversation: ConversationKey::between(a.clone(), b),
            sender: a,
            text,
            timestamp,
        })
}

/// Strategy for generating arbitrary error kinds.
fn arb_error_kind() -> impl Strategy<Value = ErrorKind> {
    prop_oneof![
        Just(ErrorKind::Validation),
        Just(ErrorKind::Conflict),
        Just(ErrorKind::Unauthorized),
        Just(ErrorKind::NotFound),
        Just(ErrorKind::Unavailable),
    ]
}

/// Strategy for generating arbitrary client frames.
fn arb_client_frame() -> impl Strategy<Value = ClientFrame> {
    prop_oneof![
        (".{1,64}", ".{1,64}").prop_map(|(user_id, email)| ClientFrame::Hello { user_id, email }),
        ".{0,64}".prop_map(|email| ClientFrame::SearchUser { email }),
        ".{0,64}".prop_map(|email| ClientFrame::AddContact { email }),
        Just(ClientFrame::ListContacts),
        ".{0,64}".prop_map(|other| ClientFrame::Open { other }),
        (arb_email(), arb_email(), "[^\x00]{1,512}", any::<u128>()).prop_map(
            |(a, b, text, token)| ClientFrame::Send {
                conversation: ConversationKey::between(a, b),
                text,
                token: SendToken::from_uuid(Uuid::from_u128(token)),
            }
        ),
        (arb_email(), arb_email()).prop_map(|(a, b)| ClientFrame::Close {
            conversation: ConversationKey::between(a, b),
        }),
    ]
}

/// Strategy for generating arbitrary server frames.
fn arb_server_frame() -> impl Strategy<Value = ServerFrame> {
    prop_oneof![
        arb_email().prop_map(|email| ServerFrame::Welcome { email }),
        arb_message().prop_map(|message| ServerFrame::Message { message }),
        arb_message().prop_map(|message| ServerFrame::Sent { message }),
        prop::collection::vec(arb_email(), 0..8).prop_map(|emails| ServerFrame::Contacts { emails }),
        (arb_error_kind(), ".{0,128}").prop_map(|(kind, reason)| ServerFrame::Error { kind, reason }),
    ]
}

// --- Property tests ---

proptest! {
    /// The key for (a, b) equals the key for (b, a).
    #[test]
    fn conversation_key_is_symmetric(a in arb_email(), b in arb_email()) {
        let ab = ConversationKey::between(a.clone(), b.clone());
        let ba = ConversationKey::between(b, a);
        prop_assert_eq!(ab, ba);
    }

    /// Keys differ whenever the unordered participant pair differs.
    #[test]
    fn distinct_pairs_have_distinct_keys(
        a in arb_email(),
        b in arb_email(),
        c in arb_email(),
        d in arb_email(),
    ) {
        let unordered = |x: &Email, y: &Email| {
            if x <= y { (x.clone(), y.clone()) } else { (y.clone(), x.clone()) }
        };
        let first = ConversationKey::between(a.clone(), b.clone());
        let second = ConversationKey::between(c.clone(), d.clone());
        if unordered(&a, &b) == unordered(&c, &d) {
            prop_assert_eq!(first, second);
        } else {
            prop_assert_ne!(first, second);
        }
    }

    /// A key admits exactly its own participants.
    #[test]
    fn key_admits_exactly_its_participants(a in arb_email(), b in arb_email(), other in arb_email()) {
        let key = ConversationKey::between(a.clone(), b.clone());
        prop_assert!(key.includes(&a));
        prop_assert!(key.includes(&b));
        if other != a && other != b {
            prop_assert!(!key.includes(&other));
            prop_assert_eq!(key.other(&other), None);
        }
    }

    /// Any client frame survives an encode → decode round-trip.
    #[test]
    fn client_frame_round_trip(frame in arb_client_frame()) {
        let bytes = codec::encode_client(&frame).expect("encode should succeed");
        let decoded = codec::decode_client(&bytes).expect("decode should succeed");
        prop_assert_eq!(frame, decoded);
    }

    /// Any server frame survives an encode → decode round-trip.
    #[test]
    fn server_frame_round_trip(frame in arb_server_frame()) {
        let bytes = codec::encode_server(&frame).expect("encode should succeed");
        let decoded = codec::decode_server(&bytes).expect("decode should succeed");
        prop_assert_eq!(frame, decoded);
    }

    /// Random bytes never cause a panic when decoded — they return Err
    /// (or a coincidentally valid frame) gracefully.
    #[test]
    fn random_bytes_decode_no_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode_client(&bytes);
        let _ = codec::decode_server(&bytes);
    }
}

//! Wire frames exchanged between Parley clients and the gateway.
//!
//! Every WebSocket binary frame carries exactly one [`ClientFrame`] or
//! [`ServerFrame`], postcard-encoded. The first frame on a connection must
//! be [`ClientFrame::Hello`]; the gateway answers with
//! [`ServerFrame::Welcome`] before accepting anything else.
//!
//! Emails sent by clients travel as raw strings and are parsed and
//! canonicalized server-side; everything the server emits uses the
//! canonical domain types.

use serde::{Deserialize, Serialize};

use crate::message::{ConversationKey, Message, SendToken};
use crate::user::{Email, User};

/// Frames sent by a client to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientFrame {
    /// Presents the caller's identity. Must be the first frame.
    ///
    /// The credential itself is verified by the hosting platform; the
    /// gateway checks the asserted pair against the user directory.
    Hello {
        /// Identity-provider-issued user id.
        user_id: String,
        /// Verified email address.
        email: String,
    },

    /// Registers the caller's user record (second step of signup).
    CreateProfile {
        /// Given name.
        first_name: String,
        /// Family name.
        surname: String,
        /// Requested globally unique handle.
        username: String,
    },

    /// Looks up a registered user by email.
    SearchUser {
        /// Email to search for.
        email: String,
    },

    /// Adds a registered user to the caller's contact list.
    AddContact {
        /// Email of the contact to add.
        email: String,
    },

    /// Requests the caller's contact list.
    ListContacts,

    /// Opens the conversation with another user and subscribes to it.
    ///
    /// The gateway derives the conversation key from the caller's own
    /// email and `other`; history then live messages are streamed as
    /// [`ServerFrame::Message`] frames.
    Open {
        /// Email of the other participant.
        other: String,
    },

    /// Appends a message to a conversation.
    Send {
        /// The conversation to append to.
        conversation: ConversationKey,
        /// Message text.
        text: String,
        /// Idempotency token; retries reuse the same token.
        token: SendToken,
    },

    /// Closes the caller's subscription to a conversation. Idempotent.
    Close {
        /// The conversation to unsubscribe from.
        conversation: ConversationKey,
    },
}

/// Frames sent by the gateway to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerFrame {
    /// Acknowledges [`ClientFrame::Hello`] with the canonicalized email.
    Welcome {
        /// Canonical email the session is bound to.
        email: Email,
    },

    /// The user record created by [`ClientFrame::CreateProfile`].
    ProfileCreated {
        /// The newly registered user.
        user: User,
    },

    /// A [`ClientFrame::SearchUser`] hit.
    UserFound {
        /// The matching registered user.
        user: User,
    },

    /// The contact was added to the caller's list.
    ContactAdded {
        /// Canonical email of the added contact.
        email: Email,
    },

    /// The caller's contact list. Empty when no contacts exist.
    Contacts {
        /// Contact emails in insertion order.
        emails: Vec<Email>,
    },

    /// The conversation subscription is active; history follows.
    Opened {
        /// The derived conversation key.
        conversation: ConversationKey,
    },

    /// A message in a subscribed conversation (history or live).
    Message {
        /// The stored message.
        message: Message,
    },

    /// A [`ClientFrame::Send`] was appended (or matched a prior token).
    Sent {
        /// The stored message, with log-assigned id and timestamp.
        message: Message,
    },

    /// The subscription is closed. Sent even if none was active.
    Closed {
        /// The conversation that was unsubscribed.
        conversation: ConversationKey,
    },

    /// An operation failed. The connection stays usable.
    Error {
        /// Failure classification.
        kind: ErrorKind,
        /// Human-readable description.
        reason: String,
    },
}

/// Classification of operation failures on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed input: empty message, bad email, missing profile fields.
    /// Never retried automatically.
    Validation,
    /// The operation conflicts with existing state (duplicate contact,
    /// taken username). Nothing was written.
    Conflict,
    /// The caller is not allowed to perform the operation. Deliberately
    /// generic: does not reveal whether the target exists.
    Unauthorized,
    /// The referenced user does not exist.
    NotFound,
    /// Transient failure; safe to retry. Sends are idempotent per token.
    Unavailable,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not-found",
            Self::Unavailable => "unavailable",
        };
        write!(f, "{s}")
    }
}

//! Message and conversation types.
//!
//! A conversation has no record of its own: it is addressed by a
//! [`ConversationKey`] derived from its two participants and materializes
//! with its first message. Message identifiers and timestamps are assigned
//! by the message log at append time, never by the client.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::user::Email;

/// Maximum allowed message text size in bytes (16 KiB).
pub const MAX_TEXT_SIZE: usize = 16 * 1024;

/// Unique identifier for a message, based on UUID v7 for time-ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new time-ordered message identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `MessageId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-supplied idempotency token attached to each send.
///
/// Retrying a send with the same token after a transient failure returns
/// the already-stored message instead of appending a duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SendToken(Uuid);

impl SendToken {
    /// Creates a fresh token for a new send attempt.
    #[must_use]
    pub fn fresh() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `SendToken` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SendToken {
    fn default() -> Self {
        Self::fresh()
    }
}

impl std::fmt::Display for SendToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Millisecond-precision UTC timestamp, assigned by the message log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Order-independent identifier for the channel between two users.
///
/// The participant pair is sorted at construction, so the key for
/// (alice, bob) and (bob, alice) is identical, and keys for distinct
/// unordered pairs differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    lo: Email,
    hi: Email,
}

impl ConversationKey {
    /// Derives the canonical key for the conversation between two emails.
    #[must_use]
    pub fn between(a: Email, b: Email) -> Self {
        if a <= b { Self { lo: a, hi: b } } else { Self { lo: b, hi: a } }
    }

    /// Returns the two participants in canonical order.
    #[must_use]
    pub const fn participants(&self) -> (&Email, &Email) {
        (&self.lo, &self.hi)
    }

    /// Returns `true` if the given email is one of the two participants.
    #[must_use]
    pub fn includes(&self, email: &Email) -> bool {
        self.lo == *email || self.hi == *email
    }

    /// Returns the participant other than `email`, if `email` participates.
    #[must_use]
    pub fn other(&self, email: &Email) -> Option<&Email> {
        if self.lo == *email {
            Some(&self.hi)
        } else if self.hi == *email {
            Some(&self.lo)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.lo, self.hi)
    }
}

/// A stored chat message. Immutable once created; the log is append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Log-assigned identifier.
    pub id: MessageId,
    /// The conversation this message belongs to.
    pub conversation: ConversationKey,
    /// Email of the sender (always a participant of the key).
    pub sender: Email,
    /// Message text, non-empty after trimming.
    pub text: String,
    /// Log-assigned timestamp, non-decreasing within a conversation.
    pub timestamp: Timestamp,
}

/// Error returned when message text fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TextError {
    /// Text is empty or whitespace-only.
    #[error("message text is empty")]
    Empty,
    /// Text exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the text in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

/// Validates message text for appending.
///
/// # Errors
///
/// Returns [`TextError::Empty`] if the text is empty after trimming, or
/// [`TextError::TooLarge`] if it exceeds [`MAX_TEXT_SIZE`].
pub fn validate_text(text: &str) -> Result<(), TextError> {
    if text.trim().is_empty() {
        return Err(TextError::Empty);
    }
    let size = text.len();
    if size > MAX_TEXT_SIZE {
        return Err(TextError::TooLarge {
            size,
            max: MAX_TEXT_SIZE,
        });
    }
    Ok(())
}

//! Conversation access control.
//!
//! A caller may read or write a conversation iff their email is one of the
//! two participants encoded in its key. This check runs before every
//! message-log operation — queries are scoped to the key up front, never
//! filtered after retrieval by the consumer.

use parley_proto::message::ConversationKey;
use parley_proto::user::Email;

/// Error returned when a caller is not a participant of a conversation.
///
/// The message is deliberately generic: a denied caller must not learn
/// whether the conversation exists or has messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    /// The caller is not a participant of the conversation.
    #[error("access denied")]
    Denied,
}

/// Authorizes `caller` for the conversation identified by `key`.
///
/// # Errors
///
/// Returns [`AccessError::Denied`] unless `caller` is one of the key's two
/// participants.
pub fn authorize(caller: &Email, key: &ConversationKey) -> Result<(), AccessError> {
    if key.includes(caller) {
        Ok(())
    } else {
        tracing::debug!(caller = %caller, conversation = %key, "conversation access denied");
        Err(AccessError::Denied)
    }
}

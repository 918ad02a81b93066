//! Append-only per-conversation message log with live subscriptions.
//!
//! The log owns all message state. Each conversation is guarded by its own
//! mutex: appends on one key are linearizable, appends on different keys
//! proceed in parallel, and no global write lock exists. Identifiers and
//! timestamps are assigned here at append time — never by the client — with
//! timestamps clamped to be non-decreasing within a conversation.
//!
//! A subscription delivers the full history first and live appends after,
//! through one channel filled under the conversation lock, so a late
//! subscriber sees no gap and no duplicate. Delivery channels are
//! unbounded; a subscriber that went away is pruned when a send to it
//! fails, the same way the gateway drops dead client connections.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, mpsc};

use parley_proto::message::{
    ConversationKey, Message, MessageId, SendToken, TextError, Timestamp, validate_text,
};
use parley_proto::user::Email;

use crate::access::{self, AccessError};

/// Errors that can occur on log operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogError {
    /// The caller is not a participant of the conversation.
    #[error("access denied")]
    Denied,
    /// The message text failed validation.
    #[error(transparent)]
    InvalidText(#[from] TextError),
}

impl From<AccessError> for LogError {
    fn from(_: AccessError) -> Self {
        Self::Denied
    }
}

/// Per-conversation state: the ordered message vec, the idempotency table,
/// and the live subscriber channels.
#[derive(Default)]
struct ConversationState {
    messages: Vec<Message>,
    delivered_tokens: HashMap<SendToken, MessageId>,
    subscribers: HashMap<u64, mpsc::UnboundedSender<Message>>,
    next_subscriber: u64,
}

/// The append-only message log, keyed by [`ConversationKey`].
pub struct MessageLog {
    conversations: RwLock<HashMap<ConversationKey, Arc<Mutex<ConversationState>>>>,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageLog {
    /// Creates a new, empty log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the shared state for a key, creating it on first use.
    ///
    /// A conversation has no standalone record until someone touches it;
    /// the entry materializes here.
    async fn conversation(&self, key: &ConversationKey) -> Arc<Mutex<ConversationState>> {
        {
            let map = self.conversations.read().await;
            if let Some(conv) = map.get(key) {
                return Arc::clone(conv);
            }
        }
        let mut map = self.conversations.write().await;
        Arc::clone(map.entry(key.clone()).or_default())
    }

    /// Appends a message and fans it out to every live subscriber.
    ///
    /// The caller must be a participant of `key`. The id and timestamp are
    /// assigned here; the timestamp never decreases within a conversation,
    /// even when both participants append concurrently, because the whole
    /// append runs under the conversation mutex.
    ///
    /// A `token` already seen by this conversation returns the message it
    /// produced and appends nothing, making retries after transient
    /// failures safe.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Denied`] for non-participants and
    /// [`LogError::InvalidText`] for empty or oversized text. Failures
    /// leave the log unchanged.
    pub async fn append(
        &self,
        key: &ConversationKey,
        caller: &Email,
        text: &str,
        token: SendToken,
    ) -> Result<Message, LogError> {
        access::authorize(caller, key)?;
        validate_text(text)?;

        let conv = self.conversation(key).await;
        let mut state = conv.lock().await;

        if let Some(id) = state.delivered_tokens.get(&token)
            && let Some(existing) = state.messages.iter().find(|m| m.id == *id)
        {
            tracing::debug!(
                conversation = %key,
                message_id = %existing.id,
                "send token already delivered, returning stored message"
            );
            return Ok(existing.clone());
        }

        let mut timestamp = Timestamp::now();
        if let Some(last) = state.messages.last()
            && last.timestamp > timestamp
        {
            timestamp = last.timestamp;
        }

        let message = Message {
            id: MessageId::new(),
            conversation: key.clone(),
            sender: caller.clone(),
            text: text.to_string(),
            timestamp,
        };

        state.messages.push(message.clone());
        state.delivered_tokens.insert(token, message.id.clone());

        // Fan out; subscribers whose receiver is gone are pruned here.
        state
            .subscribers
            .retain(|_, tx| tx.send(message.clone()).is_ok());

        tracing::debug!(
            conversation = %key,
            sender = %caller,
            subscribers = state.subscribers.len(),
            "message appended"
        );
        drop(state);

        Ok(message)
    }

    /// Opens a live subscription to a conversation.
    ///
    /// The caller must be a participant. The returned [`Subscription`]
    /// yields the full existing history first, then each subsequent append
    /// exactly once, in ascending timestamp order. Every subscriber of a
    /// key observes the identical sequence.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Denied`] for non-participants, regardless of
    /// whether the conversation has messages.
    pub async fn subscribe(
        &self,
        key: &ConversationKey,
        caller: &Email,
    ) -> Result<Subscription, LogError> {
        access::authorize(caller, key)?;

        let conv = self.conversation(key).await;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = conv.lock().await;
        for message in &state.messages {
            // Unbounded send only fails if the receiver is gone, and we
            // hold it right here.
            let _ = tx.send(message.clone());
        }
        let id = state.next_subscriber;
        state.next_subscriber += 1;
        state.subscribers.insert(id, tx);
        drop(state);

        tracing::debug!(conversation = %key, subscriber = id, "subscription opened");

        Ok(Subscription {
            conversation: conv,
            key: key.clone(),
            id,
            rx,
            active: true,
        })
    }

    /// Returns the ordered message history of a conversation.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Denied`] for non-participants.
    pub async fn history(
        &self,
        key: &ConversationKey,
        caller: &Email,
    ) -> Result<Vec<Message>, LogError> {
        access::authorize(caller, key)?;
        let conv = self.conversation(key).await;
        let state = conv.lock().await;
        Ok(state.messages.clone())
    }
}

/// A live, cancellable subscription to one conversation.
///
/// States: active on creation, inactive after [`unsubscribe`]
/// (idempotent) — there are no others. Once `unsubscribe` returns, no
/// further messages are delivered to this subscription; messages already
/// buffered may still be read. Dropping an active subscription closes its
/// channel, and the log prunes the dead sender on the next append.
///
/// [`unsubscribe`]: Subscription::unsubscribe
pub struct Subscription {
    conversation: Arc<Mutex<ConversationState>>,
    key: ConversationKey,
    id: u64,
    rx: mpsc::UnboundedReceiver<Message>,
    active: bool,
}

impl Subscription {
    /// Receives the next message: history first, then live appends.
    ///
    /// Returns `None` once the subscription is unsubscribed (or the log
    /// side is gone) and the buffer is drained — the caller can detect
    /// this and re-subscribe.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// The conversation this subscription is attached to.
    #[must_use]
    pub const fn conversation(&self) -> &ConversationKey {
        &self.key
    }

    /// Whether the subscription is still registered with the log.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Cancels the subscription. Safe to call repeatedly.
    ///
    /// Removal happens under the conversation lock, so this cannot race
    /// with an in-flight append: after return, no new message reaches this
    /// subscription.
    pub async fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        let mut state = self.conversation.lock().await;
        state.subscribers.remove(&self.id);
        drop(state);
        tracing::debug!(conversation = %self.key, subscriber = self.id, "subscription closed");
    }
}

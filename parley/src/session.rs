//! Chat session: drives one conversation view.
//!
//! A session owns the live message stream for one conversation and the
//! draft the user is composing. The draft is cleared only after the server
//! confirms the append — a failed send keeps the draft and surfaces the
//! error, and resubmitting reuses the same send token so a retry can never
//! store the message twice.

use tokio::sync::mpsc;

use parley_proto::message::{ConversationKey, Message, MessageId, SendToken, validate_text};

use crate::client::{ClientError, ServerConnection};

/// Outcome of the most recent submit, observable by the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendState {
    /// Nothing submitted yet (or the session was just opened).
    Idle,
    /// A submit is in flight.
    Pending,
    /// The last submit was confirmed and stored under this id.
    Confirmed(MessageId),
    /// The last submit failed; the draft is preserved.
    Failed(String),
}

/// One open conversation: ordered incoming stream plus outgoing draft.
pub struct ChatSession {
    connection: ServerConnection,
    conversation: ConversationKey,
    incoming: mpsc::UnboundedReceiver<Message>,
    draft: String,
    pending_token: Option<SendToken>,
    send_state: SendState,
    closed: bool,
}

impl ChatSession {
    pub(crate) fn new(
        connection: ServerConnection,
        conversation: ConversationKey,
        incoming: mpsc::UnboundedReceiver<Message>,
    ) -> Self {
        Self {
            connection,
            conversation,
            incoming,
            draft: String::new(),
            pending_token: None,
            send_state: SendState::Idle,
            closed: false,
        }
    }

    /// The conversation this session is attached to.
    #[must_use]
    pub const fn conversation(&self) -> &ConversationKey {
        &self.conversation
    }

    /// The draft text currently being composed.
    #[must_use]
    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Replaces the draft. Also resets a stale retry token: edited text is
    /// a new message, not a retry of the failed one.
    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
        self.pending_token = None;
    }

    /// Outcome of the most recent [`submit`](Self::submit).
    #[must_use]
    pub const fn send_state(&self) -> &SendState {
        &self.send_state
    }

    /// Receives the next message: history first, then live appends, in
    /// ascending timestamp order.
    ///
    /// Returns `None` once the session is closed and the buffer is
    /// drained.
    pub async fn recv(&mut self) -> Option<Message> {
        self.incoming.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Message> {
        self.incoming.try_recv().ok()
    }

    /// Submits the current draft.
    ///
    /// On success the draft is cleared and the stored message returned.
    /// On failure the draft is untouched and the same token is reused by
    /// the next submit, so a retry after a transient error cannot append
    /// a duplicate. Retry is manual: the caller resubmits.
    ///
    /// # Errors
    ///
    /// [`ClientError::Validation`] for an empty draft (checked locally,
    /// nothing is sent), [`ClientError::Closed`] after [`close`], or the
    /// mapped server error.
    ///
    /// [`close`]: Self::close
    pub async fn submit(&mut self) -> Result<Message, ClientError> {
        if self.closed {
            return Err(ClientError::Closed);
        }
        validate_text(&self.draft).map_err(|e| ClientError::Validation(e.to_string()))?;

        let token = self
            .pending_token
            .get_or_insert_with(SendToken::fresh)
            .clone();
        self.send_state = SendState::Pending;

        match self
            .connection
            .send_message(&self.conversation, &self.draft, token)
            .await
        {
            Ok(message) => {
                // Clear only once the append is confirmed.
                self.draft.clear();
                self.pending_token = None;
                self.send_state = SendState::Confirmed(message.id.clone());
                Ok(message)
            }
            Err(e) => {
                self.send_state = SendState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Closes the session. Safe to call repeatedly.
    ///
    /// After the first call returns, no new messages are delivered;
    /// messages already buffered can still be read via
    /// [`recv`](Self::recv)/[`try_recv`](Self::try_recv).
    ///
    /// # Errors
    ///
    /// Transport-level [`ClientError`] variants from the first call;
    /// subsequent calls return `Ok` without touching the network.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.connection.close_conversation(&self.conversation).await
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }
}

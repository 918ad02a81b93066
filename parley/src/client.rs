//! WebSocket connection to the Parley gateway.
//!
//! [`ServerConnection`] owns the socket: it performs the hello/welcome
//! handshake, spawns a background reader task, and splits incoming frames
//! into two paths — live `Message` frames are routed to the channel of the
//! conversation they belong to, everything else answers the serialized
//! request path. One request is in flight at a time, so replies cannot
//! interleave.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use parley_proto::codec;
use parley_proto::frame::{ClientFrame, ErrorKind, ServerFrame};
use parley_proto::message::{ConversationKey, Message, SendToken};
use parley_proto::user::{Email, EmailError, User};

use crate::identity::Identity;
use crate::session::ChatSession;

/// Type alias for the write half of the WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;

/// Type alias for the read half of the WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Timeout for establishing the WebSocket connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the welcome reply during the handshake.
const HELLO_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for a request/response exchange.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors surfaced by client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server URL could not be parsed.
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
    /// Connecting or waiting for a reply timed out; safe to retry.
    #[error("timed out waiting for the server")]
    Timeout,
    /// The connection to the gateway is gone; reconnect to continue.
    #[error("connection closed")]
    Closed,
    /// The hello/welcome handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// The server sent something the client did not expect.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The request was rejected as malformed; do not retry unchanged.
    #[error("validation failed: {0}")]
    Validation(String),
    /// The request conflicts with existing state; nothing was written.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The caller is not allowed to perform the operation.
    #[error("access denied")]
    Unauthorized,
    /// The referenced user does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Transient server-side failure; safe to retry.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl From<EmailError> for ClientError {
    fn from(e: EmailError) -> Self {
        Self::Validation(e.to_string())
    }
}

/// Maps a wire error frame onto [`ClientError`].
fn error_from_wire(kind: ErrorKind, reason: String) -> ClientError {
    match kind {
        ErrorKind::Validation => ClientError::Validation(reason),
        ErrorKind::Conflict => ClientError::Conflict(reason),
        ErrorKind::Unauthorized => ClientError::Unauthorized,
        ErrorKind::NotFound => ClientError::NotFound(reason),
        ErrorKind::Unavailable => ClientError::Unavailable(reason),
    }
}

/// Senders for the per-conversation live message channels.
type ConversationChannels = parking_lot::Mutex<HashMap<ConversationKey, mpsc::UnboundedSender<Message>>>;

struct ConnectionInner {
    identity: Identity,
    ws_sender: Mutex<WsSender>,
    /// Non-message frames from the reader task. Held for the whole
    /// request/response exchange so replies cannot interleave.
    responses: Mutex<mpsc::Receiver<ServerFrame>>,
    conversations: Arc<ConversationChannels>,
    connected: Arc<AtomicBool>,
    /// Kept alive for the connection's lifetime.
    _reader_handle: tokio::task::JoinHandle<()>,
}

/// A live connection to the gateway, cheap to clone.
#[derive(Clone)]
pub struct ServerConnection {
    inner: Arc<ConnectionInner>,
}

impl ServerConnection {
    /// Connects to a gateway and performs the hello/welcome handshake.
    ///
    /// # Errors
    ///
    /// - [`ClientError::InvalidUrl`] if `server_url` does not parse.
    /// - [`ClientError::Timeout`] if connecting or the welcome times out.
    /// - [`ClientError::Handshake`] for protocol violations during the
    ///   handshake, and the mapped server error if the gateway rejects the
    ///   asserted identity.
    pub async fn connect(server_url: &str, identity: Identity) -> Result<Self, ClientError> {
        let url = Url::parse(server_url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;

        let (ws_stream, _response) =
            tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str()))
                .await
                .map_err(|_| {
                    tracing::warn!(url = server_url, "gateway connect timed out");
                    ClientError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(url = server_url, error = %e, "gateway connect failed");
                    ClientError::Handshake(e.to_string())
                })?;

        let (mut ws_sender, mut ws_reader) = ws_stream.split();

        // Present the asserted identity.
        let hello = ClientFrame::Hello {
            user_id: identity.user_id.as_str().to_string(),
            email: identity.email.as_str().to_string(),
        };
        let bytes =
            codec::encode_client(&hello).map_err(|e| ClientError::Protocol(e.to_string()))?;
        ws_sender
            .send(WsMessage::Binary(bytes.into()))
            .await
            .map_err(|e| ClientError::Handshake(format!("failed to send hello: {e}")))?;

        wait_for_welcome(&mut ws_reader, &identity.email).await?;
        tracing::info!(email = %identity.email, url = server_url, "session established");

        let (responses_tx, responses_rx) = mpsc::channel(64);
        let conversations: Arc<ConversationChannels> =
            Arc::new(parking_lot::Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        let reader_handle = tokio::spawn(reader_loop(
            ws_reader,
            responses_tx,
            Arc::clone(&conversations),
            Arc::clone(&connected),
        ));

        Ok(Self {
            inner: Arc::new(ConnectionInner {
                identity,
                ws_sender: Mutex::new(ws_sender),
                responses: Mutex::new(responses_rx),
                conversations,
                connected,
                _reader_handle: reader_handle,
            }),
        })
    }

    /// The identity this connection is bound to.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    /// Whether the connection to the gateway is still up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Relaxed)
    }

    /// Registers the caller's user record (second step of signup).
    ///
    /// # Errors
    ///
    /// [`ClientError::Conflict`] for a taken username or email,
    /// [`ClientError::Validation`] for an empty username.
    pub async fn create_profile(
        &self,
        first_name: &str,
        surname: &str,
        username: &str,
    ) -> Result<User, ClientError> {
        let reply = self
            .request(ClientFrame::CreateProfile {
                first_name: first_name.to_string(),
                surname: surname.to_string(),
                username: username.to_string(),
            })
            .await?;
        match reply {
            ServerFrame::ProfileCreated { user } => Ok(user),
            other => Err(unexpected(&other)),
        }
    }

    /// Looks up a registered user by email.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotFound`] when no user has that email,
    /// [`ClientError::Validation`] for a malformed address.
    pub async fn search_user(&self, email: &str) -> Result<User, ClientError> {
        let reply = self
            .request(ClientFrame::SearchUser {
                email: email.to_string(),
            })
            .await?;
        match reply {
            ServerFrame::UserFound { user } => Ok(user),
            other => Err(unexpected(&other)),
        }
    }

    /// Adds a registered user to the caller's contact list.
    ///
    /// # Errors
    ///
    /// [`ClientError::Validation`] for self-adds and malformed addresses,
    /// [`ClientError::Conflict`] for an already-added contact,
    /// [`ClientError::NotFound`] when the email has no account.
    pub async fn add_contact(&self, email: &str) -> Result<Email, ClientError> {
        let reply = self
            .request(ClientFrame::AddContact {
                email: email.to_string(),
            })
            .await?;
        match reply {
            ServerFrame::ContactAdded { email } => Ok(email),
            other => Err(unexpected(&other)),
        }
    }

    /// Returns the caller's contacts; empty when none exist.
    ///
    /// # Errors
    ///
    /// Transport-level [`ClientError`] variants only.
    pub async fn list_contacts(&self) -> Result<Vec<Email>, ClientError> {
        let reply = self.request(ClientFrame::ListContacts).await?;
        match reply {
            ServerFrame::Contacts { emails } => Ok(emails),
            other => Err(unexpected(&other)),
        }
    }

    /// Opens the conversation with another user.
    ///
    /// Subscribes to the conversation and returns a [`ChatSession`] whose
    /// stream yields the full history first, then live messages.
    ///
    /// # Errors
    ///
    /// [`ClientError::Validation`] for a malformed email, plus the mapped
    /// server error if the gateway refuses the subscription.
    pub async fn open_conversation(&self, other: &str) -> Result<ChatSession, ClientError> {
        let other = Email::parse(other)?;
        let key = ConversationKey::between(self.inner.identity.email.clone(), other.clone());

        // Register the live channel before asking the server to open, so
        // history frames racing the reply are never dropped.
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.conversations.lock().insert(key.clone(), tx);

        let reply = self
            .request(ClientFrame::Open {
                other: other.as_str().to_string(),
            })
            .await;
        let reply = match reply {
            Ok(frame) => frame,
            Err(e) => {
                self.inner.conversations.lock().remove(&key);
                return Err(e);
            }
        };

        match reply {
            ServerFrame::Opened { conversation } if conversation == key => {
                Ok(ChatSession::new(self.clone(), key, rx))
            }
            other => {
                self.inner.conversations.lock().remove(&key);
                Err(unexpected(&other))
            }
        }
    }

    /// Appends a message to a conversation. Used by [`ChatSession`].
    pub(crate) async fn send_message(
        &self,
        conversation: &ConversationKey,
        text: &str,
        token: SendToken,
    ) -> Result<Message, ClientError> {
        let reply = self
            .request(ClientFrame::Send {
                conversation: conversation.clone(),
                text: text.to_string(),
                token,
            })
            .await?;
        match reply {
            ServerFrame::Sent { message } => Ok(message),
            other => Err(unexpected(&other)),
        }
    }

    /// Unsubscribes from a conversation. Used by [`ChatSession`].
    pub(crate) async fn close_conversation(
        &self,
        conversation: &ConversationKey,
    ) -> Result<(), ClientError> {
        // Dropping the sender ends the session's stream once drained.
        self.inner.conversations.lock().remove(conversation);

        let reply = self
            .request(ClientFrame::Close {
                conversation: conversation.clone(),
            })
            .await?;
        match reply {
            ServerFrame::Closed { .. } => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Sends one frame and waits for the matching reply.
    ///
    /// The response receiver is held for the whole exchange, so concurrent
    /// callers are serialized and replies cannot interleave.
    async fn request(&self, frame: ClientFrame) -> Result<ServerFrame, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::Closed);
        }

        let mut responses = self.inner.responses.lock().await;

        // Drop any stale reply left over from a timed-out exchange.
        while responses.try_recv().is_ok() {}

        let bytes =
            codec::encode_client(&frame).map_err(|e| ClientError::Protocol(e.to_string()))?;
        {
            let mut sender = self.inner.ws_sender.lock().await;
            sender
                .send(WsMessage::Binary(bytes.into()))
                .await
                .map_err(|e| {
                    tracing::warn!(error = %e, "gateway send failed");
                    self.inner.connected.store(false, Ordering::Relaxed);
                    ClientError::Closed
                })?;
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, responses.recv()).await {
            Ok(Some(ServerFrame::Error { kind, reason })) => Err(error_from_wire(kind, reason)),
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(ClientError::Closed),
            Err(_) => Err(ClientError::Timeout),
        }
    }
}

/// Returns a protocol error for a reply of the wrong shape.
fn unexpected(frame: &ServerFrame) -> ClientError {
    ClientError::Protocol(format!("unexpected reply: {frame:?}"))
}

/// Waits for the `Welcome` frame that answers `Hello`.
async fn wait_for_welcome(reader: &mut WsReader, expected: &Email) -> Result<(), ClientError> {
    let frame = tokio::time::timeout(HELLO_TIMEOUT, reader.next())
        .await
        .map_err(|_| ClientError::Timeout)?;

    match frame {
        Some(Ok(WsMessage::Binary(data))) => match codec::decode_server(&data) {
            Ok(ServerFrame::Welcome { email }) if email == *expected => Ok(()),
            Ok(ServerFrame::Welcome { email }) => Err(ClientError::Handshake(format!(
                "welcomed as {email}, expected {expected}"
            ))),
            Ok(ServerFrame::Error { kind, reason }) => Err(error_from_wire(kind, reason)),
            Ok(other) => Err(ClientError::Handshake(format!(
                "unexpected frame during handshake: {other:?}"
            ))),
            Err(e) => Err(ClientError::Handshake(format!(
                "malformed welcome frame: {e}"
            ))),
        },
        Some(Ok(WsMessage::Close(_))) | None => Err(ClientError::Closed),
        Some(Ok(_)) => Err(ClientError::Handshake(
            "unexpected non-binary frame during handshake".into(),
        )),
        Some(Err(e)) => Err(ClientError::Handshake(e.to_string())),
    }
}

/// Background task that reads gateway frames and dispatches them.
///
/// Live `Message` frames go to their conversation's channel; a message for
/// a conversation with no open session is dropped with a debug log (the
/// session was closed while the frame was in flight). Every other frame
/// answers the request path. Malformed frames are logged and skipped.
async fn reader_loop(
    mut ws_reader: WsReader,
    responses: mpsc::Sender<ServerFrame>,
    conversations: Arc<ConversationChannels>,
    connected: Arc<AtomicBool>,
) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(WsMessage::Binary(data)) => match codec::decode_server(&data) {
                Ok(ServerFrame::Message { message }) => {
                    let delivered = {
                        let channels = conversations.lock();
                        channels
                            .get(&message.conversation)
                            .is_some_and(|tx| tx.send(message.clone()).is_ok())
                    };
                    if !delivered {
                        tracing::debug!(
                            conversation = %message.conversation,
                            "dropping message for closed session"
                        );
                    }
                }
                Ok(frame) => {
                    if responses.send(frame).await.is_err() {
                        // Connection dropped by the owner; exit.
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "malformed gateway frame, skipping");
                }
            },
            Ok(WsMessage::Close(_)) => {
                tracing::info!("gateway closed the connection");
                break;
            }
            Ok(_) => {
                // Ignore ping/pong/text frames.
            }
            Err(e) => {
                tracing::warn!(error = %e, "gateway read error");
                break;
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    tracing::info!("gateway reader task exiting");
}

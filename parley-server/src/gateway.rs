//! WebSocket gateway: session handshake, frame dispatch, and live
//! message forwarding.
//!
//! The gateway accepts WebSocket connections, binds each to an asserted
//! identity via the `Hello` frame, and exposes the directory, contact
//! registry, and message log as request/response frames. Conversation
//! subscriptions are forwarded to the client as `Message` frames by a
//! per-conversation task; everything a connection opened is torn down when
//! it goes away.
//!
//! Credential verification is the hosting platform's job. The gateway
//! checks the asserted (id, email) pair against the directory record when
//! one exists; a mismatch is rejected before any operation runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};

use parley_proto::codec;
use parley_proto::frame::{ClientFrame, ErrorKind, ServerFrame};
use parley_proto::message::ConversationKey;
use parley_proto::user::{Email, User, UserId, UserProfile};

use crate::contacts::{ContactError, ContactRegistry};
use crate::directory::{DirectoryError, UserDirectory};
use crate::log::{LogError, MessageLog};

/// Shared gateway state: the three stores plus the live connections.
pub struct GatewayState {
    /// Registered user records.
    pub directory: UserDirectory,
    /// Directed contact relations.
    pub contacts: ContactRegistry,
    /// The append-only message log.
    pub log: MessageLog,
    /// Writer channels of live connections, keyed by connection id.
    connections: RwLock<HashMap<u64, mpsc::UnboundedSender<WsMessage>>>,
    next_connection: AtomicU64,
}

impl Default for GatewayState {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayState {
    /// Creates empty gateway state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            directory: UserDirectory::new(),
            contacts: ContactRegistry::new(),
            log: MessageLog::new(),
            connections: RwLock::new(HashMap::new()),
            next_connection: AtomicU64::new(0),
        }
    }

    /// Registers a connection's writer channel, returning its id.
    async fn register(&self, sender: mpsc::UnboundedSender<WsMessage>) -> u64 {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        self.connections.write().await.insert(id, sender);
        id
    }

    /// Removes a connection from the registry.
    async fn unregister(&self, id: u64) {
        self.connections.write().await.remove(&id);
    }

    /// Sends a WebSocket Close frame to every connected client.
    ///
    /// Each client's reader then observes the disconnect. Useful for
    /// graceful shutdown and testing.
    pub async fn close_all_connections(&self) {
        let connections = self.connections.read().await;
        for (id, sender) in connections.iter() {
            tracing::info!(connection = id, "sending close frame to client");
            let _ = sender.send(WsMessage::Close(None));
        }
    }
}

/// Per-connection session: the bound identity, the outbound channel, and
/// the forwarding task for each open conversation.
struct Session {
    user_id: UserId,
    email: Email,
    out: mpsc::UnboundedSender<WsMessage>,
    subscriptions: HashMap<ConversationKey, tokio::task::JoinHandle<()>>,
}

impl Session {
    /// Queues a frame for the writer task. A failed send means the writer
    /// is gone; the reader loop will notice the closed socket shortly.
    fn send(&self, frame: &ServerFrame) {
        if let Some(msg) = encode_ws(frame) {
            let _ = self.out.send(msg);
        }
    }

    fn send_error(&self, kind: ErrorKind, reason: impl Into<String>) {
        self.send(&ServerFrame::Error {
            kind,
            reason: reason.into(),
        });
    }
}

/// Encodes a server frame into a WebSocket binary message.
fn encode_ws(frame: &ServerFrame) -> Option<WsMessage> {
    match codec::encode_server(frame) {
        Ok(bytes) => Some(WsMessage::Binary(bytes.into())),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode server frame");
            None
        }
    }
}

/// Handles an upgraded WebSocket connection for a single client.
///
/// The connection lifecycle:
/// 1. Wait for a `Hello` frame and validate the asserted identity.
/// 2. Send `Welcome` back and register the connection.
/// 3. Enter the frame loop, dispatching operations against the stores.
/// 4. On disconnect, tear down every subscription the connection opened.
pub async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some((user_id, raw_email)) = wait_for_hello(&mut ws_receiver).await else {
        tracing::warn!("connection closed before hello");
        return;
    };

    let email = match Email::parse(&raw_email) {
        Ok(email) => email,
        Err(e) => {
            let frame = ServerFrame::Error {
                kind: ErrorKind::Validation,
                reason: e.to_string(),
            };
            let _ = send_frame(&mut ws_sender, &frame).await;
            return;
        }
    };

    // An existing record for this email must carry the asserted id.
    if let Some(existing) = state.directory.lookup(&email).await
        && existing.id != user_id
    {
        tracing::warn!(email = %email, "hello identity does not match directory record");
        let frame = ServerFrame::Error {
            kind: ErrorKind::Unauthorized,
            reason: "access denied".into(),
        };
        let _ = send_frame(&mut ws_sender, &frame).await;
        return;
    }

    if send_frame(&mut ws_sender, &ServerFrame::Welcome { email: email.clone() })
        .await
        .is_err()
    {
        tracing::warn!(email = %email, "failed to send welcome");
        return;
    }

    tracing::info!(email = %email, "client session established");

    // Writer task: forwards queued messages to the WebSocket.
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let connection_id = state.register(tx.clone()).await;
    let writer_email = email.clone();
    let write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(email = %writer_email, "WebSocket write failed");
                break;
            }
        }
    });

    let mut session = Session {
        user_id,
        email: email.clone(),
        out: tx,
        subscriptions: HashMap::new(),
    };

    // Reader loop: dispatch frames until the client goes away.
    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            WsMessage::Binary(data) => {
                handle_frame(&state, &mut session, &data).await;
            }
            WsMessage::Close(_) => {
                tracing::info!(email = %email, "received close frame");
                break;
            }
            _ => {
                // Ignore text, ping, pong frames.
            }
        }
    }

    // Clean up: stop every forwarding task this connection owns.
    for (_, forward) in session.subscriptions.drain() {
        forward.abort();
    }
    write_task.abort();
    state.unregister(connection_id).await;
    tracing::info!(email = %email, "client disconnected");
}

/// Waits for the first frame on the WebSocket, expecting `Hello`.
///
/// Returns the asserted identity, or `None` if the connection closes or an
/// unexpected frame arrives first.
async fn wait_for_hello(
    receiver: &mut (impl StreamExt<Item = Result<WsMessage, axum::Error>> + Unpin),
) -> Option<(UserId, String)> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            WsMessage::Binary(data) => match codec::decode_client(&data) {
                Ok(ClientFrame::Hello { user_id, email }) => {
                    if user_id.is_empty() || email.is_empty() {
                        tracing::warn!("received Hello with empty identity");
                        return None;
                    }
                    return Some((UserId::new(user_id), email));
                }
                Ok(other) => {
                    tracing::warn!(frame = ?other, "expected Hello, got different frame");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to decode hello frame");
                    return None;
                }
            },
            WsMessage::Close(_) => return None,
            _ => {
                // Skip non-binary frames (ping/pong) during the handshake.
            }
        }
    }
    None
}

/// Handles one binary frame from an identified session.
async fn handle_frame(state: &Arc<GatewayState>, session: &mut Session, data: &[u8]) {
    let frame = match codec::decode_client(data) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(email = %session.email, error = %e, "failed to decode frame");
            session.send_error(ErrorKind::Validation, "malformed frame");
            return;
        }
    };

    match frame {
        ClientFrame::Hello { .. } => {
            tracing::warn!(email = %session.email, "duplicate Hello from identified session");
        }
        ClientFrame::CreateProfile {
            first_name,
            surname,
            username,
        } => {
            let user = User {
                id: session.user_id.clone(),
                email: session.email.clone(),
                profile: UserProfile {
                    first_name,
                    surname,
                    username,
                },
            };
            match state.directory.register(user.clone()).await {
                Ok(()) => session.send(&ServerFrame::ProfileCreated { user }),
                Err(e @ DirectoryError::EmptyUsername) => {
                    session.send_error(ErrorKind::Validation, e.to_string());
                }
                Err(e) => session.send_error(ErrorKind::Conflict, e.to_string()),
            }
        }
        ClientFrame::SearchUser { email } => match Email::parse(&email) {
            Ok(email) => match state.directory.lookup(&email).await {
                Some(user) => session.send(&ServerFrame::UserFound { user }),
                None => session.send_error(ErrorKind::NotFound, "no user with that email"),
            },
            Err(e) => session.send_error(ErrorKind::Validation, e.to_string()),
        },
        ClientFrame::AddContact { email } => {
            let contact = match Email::parse(&email) {
                Ok(email) => email,
                Err(e) => {
                    session.send_error(ErrorKind::Validation, e.to_string());
                    return;
                }
            };
            if state.directory.lookup(&contact).await.is_none() {
                session.send_error(ErrorKind::NotFound, "no user with that email");
                return;
            }
            match state
                .contacts
                .add(&session.user_id, &session.email, contact.clone())
                .await
            {
                Ok(()) => session.send(&ServerFrame::ContactAdded { email: contact }),
                Err(e @ ContactError::SelfAdd) => {
                    session.send_error(ErrorKind::Validation, e.to_string());
                }
                Err(e @ ContactError::AlreadyAdded) => {
                    session.send_error(ErrorKind::Conflict, e.to_string());
                }
            }
        }
        ClientFrame::ListContacts => {
            let emails = state.contacts.list(&session.user_id).await;
            session.send(&ServerFrame::Contacts { emails });
        }
        ClientFrame::Open { other } => {
            let other = match Email::parse(&other) {
                Ok(email) => email,
                Err(e) => {
                    session.send_error(ErrorKind::Validation, e.to_string());
                    return;
                }
            };
            let key = ConversationKey::between(session.email.clone(), other);
            match state.log.subscribe(&key, &session.email).await {
                Ok(mut subscription) => {
                    // Re-opening replaces the previous subscription.
                    if let Some(old) = session.subscriptions.remove(&key) {
                        old.abort();
                    }
                    session.send(&ServerFrame::Opened {
                        conversation: key.clone(),
                    });
                    let out = session.out.clone();
                    let forward = tokio::spawn(async move {
                        while let Some(message) = subscription.recv().await {
                            let Some(msg) = encode_ws(&ServerFrame::Message { message }) else {
                                continue;
                            };
                            if out.send(msg).is_err() {
                                break;
                            }
                        }
                    });
                    session.subscriptions.insert(key, forward);
                }
                Err(e) => send_log_error(session, &e),
            }
        }
        ClientFrame::Send {
            conversation,
            text,
            token,
        } => match state
            .log
            .append(&conversation, &session.email, &text, token)
            .await
        {
            Ok(message) => session.send(&ServerFrame::Sent { message }),
            Err(e) => send_log_error(session, &e),
        },
        ClientFrame::Close { conversation } => {
            if let Some(forward) = session.subscriptions.remove(&conversation) {
                forward.abort();
            }
            // Closing is idempotent: acknowledged whether or not a
            // subscription was active.
            session.send(&ServerFrame::Closed { conversation });
        }
    }
}

/// Maps a log error onto the wire taxonomy.
fn send_log_error(session: &Session, error: &LogError) {
    match error {
        LogError::Denied => session.send_error(ErrorKind::Unauthorized, "access denied"),
        LogError::InvalidText(e) => session.send_error(ErrorKind::Validation, e.to_string()),
    }
}

/// Encodes and sends a frame directly on a WebSocket sender (used before
/// the writer task exists).
async fn send_frame(
    ws_sender: &mut (impl SinkExt<WsMessage, Error = axum::Error> + Unpin),
    frame: &ServerFrame,
) -> Result<(), String> {
    let bytes = codec::encode_server(frame).map_err(|e| e.to_string())?;
    ws_sender
        .send(WsMessage::Binary(bytes.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// Starts the gateway on the given address and returns the bound address
/// and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(GatewayState::new())).await
}

/// Starts the gateway with pre-populated [`GatewayState`].
///
/// This is the entry point used by both `main.rs` and test code; tests
/// keep the `Arc` to inspect store state directly.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<GatewayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "gateway server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<GatewayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

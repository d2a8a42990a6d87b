//! Chat channel: WebSocket sessions for live customer conversations.
//!
//! Each connection belongs to a session (`/ws/chat?session=<id>`). Client
//! frames become `InboundMessage`s fed into the pipeline; replies and
//! escalation notices are broadcast to every socket on the session, so a
//! reconnecting client picks the conversation back up.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channels::ReplySender;
use crate::error::{ChannelError, PipelineError};
use crate::pipeline::processor::MessageProcessor;
use crate::pipeline::types::{Channel, InboundMessage};

/// Sent to the customer when their message goes to a human.
pub const ESCALATION_NOTICE: &str =
    "Sua mensagem foi encaminhada para um de nossos atendentes. Retornaremos em breve.";

const SESSION_BUFFER: usize = 32;

// ── JSON Protocol ───────────────────────────────────────────────────────

/// Message from chat client → server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientFrame {
    #[serde(rename = "message")]
    Message {
        content: String,
        #[serde(default)]
        name: Option<String>,
    },
}

/// Message from server → chat client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// First frame on every connection.
    Session { session_id: String },
    Reply { content: String },
    Escalated { message: String },
    Error { message: String },
}

// ── Session hub ─────────────────────────────────────────────────────────

/// Live chat sessions, each with its own broadcast channel.
pub struct ChatHub {
    sessions: Mutex<HashMap<String, broadcast::Sender<ServerFrame>>>,
}

impl ChatHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Subscribe to a session's frames, opening the session if needed.
    pub async fn subscribe(&self, session: &str) -> broadcast::Receiver<ServerFrame> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(session.to_string())
            .or_insert_with(|| broadcast::channel(SESSION_BUFFER).0)
            .subscribe()
    }

    /// Push a frame to every socket on `session`.
    pub async fn send(&self, session: &str, frame: ServerFrame) -> Result<(), ChannelError> {
        let sessions = self.sessions.lock().await;
        let tx = sessions
            .get(session)
            .ok_or_else(|| ChannelError::SessionClosed(session.to_string()))?;
        tx.send(frame)
            .map(|_| ())
            .map_err(|_| ChannelError::SessionClosed(session.to_string()))
    }

    /// Drop the session once its last socket is gone.
    pub async fn release(&self, session: &str) {
        let mut sessions = self.sessions.lock().await;
        if sessions
            .get(session)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            sessions.remove(session);
            debug!(session, "Chat session closed");
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

// ── Reply sender ────────────────────────────────────────────────────────

/// Delivers pipeline replies to the customer's chat session.
pub struct ChatReplySender {
    hub: Arc<ChatHub>,
}

impl ChatReplySender {
    pub fn new(hub: Arc<ChatHub>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl ReplySender for ChatReplySender {
    fn channel(&self) -> Channel {
        Channel::Chat
    }

    async fn send_reply(&self, message: &InboundMessage, reply: &str) -> Result<(), ChannelError> {
        self.hub
            .send(
                &message.sender,
                ServerFrame::Reply {
                    content: reply.to_string(),
                },
            )
            .await
    }

    async fn notify_escalated(&self, message: &InboundMessage) -> Result<(), ChannelError> {
        self.hub
            .send(
                &message.sender,
                ServerFrame::Escalated {
                    message: ESCALATION_NOTICE.to_string(),
                },
            )
            .await
    }
}

/// Build the inbound message for a chat frame.
pub fn chat_message(session: &str, content: &str, name: Option<String>) -> InboundMessage {
    InboundMessage {
        id: Uuid::new_v4().to_string(),
        channel: Channel::Chat,
        sender: session.to_string(),
        sender_name: name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
        subject: String::new(),
        content: content.to_string(),
        reply_metadata: serde_json::json!({ "session": session }),
        received_at: Utc::now(),
    }
}

// ── WebSocket Handler ───────────────────────────────────────────────────

#[derive(Clone)]
struct ChatState {
    hub: Arc<ChatHub>,
    processor: Arc<MessageProcessor>,
}

#[derive(Debug, Deserialize)]
struct ChatQuery {
    session: Option<String>,
}

/// Build an Axum router with the `/ws/chat` endpoint.
pub fn chat_routes(hub: Arc<ChatHub>, processor: Arc<MessageProcessor>) -> Router {
    Router::new()
        .route("/ws/chat", get(ws_chat_handler))
        .with_state(ChatState { hub, processor })
}

async fn ws_chat_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ChatQuery>,
    State(state): State<ChatState>,
) -> impl IntoResponse {
    let session = query
        .session
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    info!(session = %session, "Chat client connecting");
    ws.on_upgrade(move |socket| handle_chat_socket(socket, state, session))
}

async fn handle_chat_socket(mut socket: WebSocket, state: ChatState, session: String) {
    let mut outgoing_rx = state.hub.subscribe(&session).await;

    let hello = ServerFrame::Session {
        session_id: session.clone(),
    };
    if let Ok(json) = serde_json::to_string(&hello)
        && socket.send(Message::Text(json.into())).await.is_err()
    {
        state.hub.release(&session).await;
        return;
    }

    loop {
        tokio::select! {
            // Forward session frames to this client
            result = outgoing_rx.recv() => {
                match result {
                    Ok(frame) => {
                        if let Ok(json) = serde_json::to_string(&frame)
                            && socket.send(Message::Text(json.into())).await.is_err()
                        {
                            debug!("Chat client disconnected during send");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, session = %session, "Chat client lagged behind session");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            // Receive messages from the customer
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(ClientFrame::Message { content, name }) => {
                                let content = content.trim();
                                if content.is_empty() {
                                    continue;
                                }
                                let message = chat_message(&session, content, name);
                                tokio::spawn(process_chat_message(state.clone(), message));
                            }
                            Err(e) => {
                                debug!(error = %e, text = %text, "Invalid JSON from chat client");
                                let frame = ServerFrame::Error {
                                    message: "invalid frame".to_string(),
                                };
                                if let Ok(json) = serde_json::to_string(&frame)
                                    && socket.send(Message::Text(json.into())).await.is_err()
                                {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(session = %session, "Chat client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Chat WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    drop(outgoing_rx);
    state.hub.release(&session).await;
}

/// Run a chat message through the pipeline. Replies reach the client via
/// `ChatReplySender`; only pipeline failures are reported here.
async fn process_chat_message(state: ChatState, message: InboundMessage) {
    let session = message.sender.clone();
    match state.processor.process(message).await {
        Ok(processed) => {
            debug!(
                session = %session,
                disposition = processed.disposition.label(),
                "Chat message processed"
            );
        }
        Err(PipelineError::Duplicate(_)) => {}
        Err(e) => {
            warn!(session = %session, error = %e, "Chat message processing failed");
            let _ = state
                .hub
                .send(
                    &session,
                    ServerFrame::Error {
                        message: "não foi possível processar sua mensagem".to_string(),
                    },
                )
                .await;
        }
    }
}

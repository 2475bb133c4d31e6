//! Socket front door: accept loop, handshake parsing, session pump.
//!
//! Each connection is peeked before the WebSocket upgrade so the
//! handshake fields can be authenticated first. Rejected connections get
//! a plain HTTP error whose body is one of the two canonical messages
//! and never join a room; admitted ones are upgraded and pumped until
//! disconnect.

use std::collections::HashMap;
use std::sync::Arc;

use colored::*;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::ai::AiClient;
use crate::auth::{self, AuthError, Handshake, ProjectDirectory, Session, TokenVerifier};
use crate::room::{self, Member, RoomStore, SessionState};
use crate::{ChatMessage, Frame};

/// Everything a connection handler needs, shared across all connections.
pub struct RelayContext {
    pub verifier: TokenVerifier,
    pub directory: ProjectDirectory,
    pub ai: AiClient,
    pub rooms: RoomStore,
}

// ---------------------------------------------------------------------------
// Accept loop
// ---------------------------------------------------------------------------

pub async fn serve(
    bind: &str,
    port: u16,
    ctx: Arc<RelayContext>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(format!("{}:{}", bind, port)).await?;

    eprintln!(
        "{}",
        format!("  Relay listening on ws://{}:{}", bind, port).bright_green()
    );
    eprintln!("{}", "  Press Ctrl+C to stop.".bright_blue());

    loop {
        let (stream, addr) = listener.accept().await?;
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, ctx).await {
                tracing::warn!(%addr, error = %e, "connection error");
            }
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    ctx: Arc<RelayContext>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Peek so the upgrade request stays in the socket for tungstenite.
    let mut peek_buf = vec![0u8; 4096];
    let n = stream.peek(&mut peek_buf).await?;

    let request = match parse_upgrade_request(&peek_buf[..n]) {
        Some(r) if r.is_websocket_upgrade => r,
        _ => {
            reject(&mut stream, n, "400 Bad Request", "WebSocket upgrade required").await?;
            return Ok(());
        }
    };
    let handshake = request.into_handshake();

    match auth::authenticate(&handshake, &ctx.verifier, &ctx.directory).await {
        Ok(session) => {
            let ws_stream = tokio_tungstenite::accept_async(stream).await?;
            run_session(ws_stream, session, ctx).await;
        }
        Err(err) => {
            tracing::info!(error = %err, "handshake rejected");
            let status = match err {
                AuthError::InvalidProject => "400 Bad Request",
                AuthError::Unauthenticated => "401 Unauthorized",
            };
            reject(&mut stream, n, status, &err.to_string()).await?;
        }
    }
    Ok(())
}

/// Consume the pending request bytes and answer with a plain HTTP error.
async fn reject(
    stream: &mut TcpStream,
    pending: usize,
    status: &str,
    body: &str,
) -> std::io::Result<()> {
    let mut drain = vec![0u8; pending];
    let _ = stream.read_exact(&mut drain).await;
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body,
    );
    stream.write_all(response.as_bytes()).await
}

// ---------------------------------------------------------------------------
// Handshake request parsing
// ---------------------------------------------------------------------------

/// The fields of a peeked upgrade request that admission cares about.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub path: String,
    pub query: HashMap<String, String>,
    pub bearer_token: Option<String>,
    pub is_websocket_upgrade: bool,
}

impl UpgradeRequest {
    /// Collapse the transport fields into the logical handshake. An
    /// explicit `token` query field wins over the Authorization header.
    pub fn into_handshake(self) -> Handshake {
        let UpgradeRequest {
            query,
            bearer_token,
            ..
        } = self;
        Handshake {
            project_id: query.get("projectId").cloned(),
            token: query.get("token").cloned().or(bearer_token),
        }
    }
}

/// Parse the peeked bytes as an HTTP upgrade request. Returns `None`
/// unless a complete request head is present.
pub fn parse_upgrade_request(buf: &[u8]) -> Option<UpgradeRequest> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(buf) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) | Err(_) => return None,
    }

    let path_and_query = req.path?;
    let (path, query_str) = match path_and_query.split_once('?') {
        Some((p, q)) => (p, q),
        None => (path_and_query, ""),
    };

    let mut bearer_token = None;
    let mut is_websocket_upgrade = false;
    for header in req.headers.iter() {
        if header.name.eq_ignore_ascii_case("authorization") {
            let value = String::from_utf8_lossy(header.value);
            if let Some(token) = value.strip_prefix("Bearer ") {
                bearer_token = Some(token.trim().to_string());
            }
        } else if header.name.eq_ignore_ascii_case("upgrade") {
            let value = String::from_utf8_lossy(header.value);
            is_websocket_upgrade = value.to_ascii_lowercase().contains("websocket");
        }
    }

    Some(UpgradeRequest {
        path: path.to_string(),
        query: parse_query(query_str),
        bearer_token,
        is_websocket_upgrade,
    })
}

/// Decode a percent-encoded query component ('+' means space).
pub fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hi = (bytes[i + 1] as char).to_digit(16);
                let lo = (bytes[i + 2] as char).to_digit(16);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi * 16 + lo) as u8);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Split a query string into decoded key/value pairs.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (url_decode(k), url_decode(v)),
            None => (url_decode(pair), String::new()),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Session pump
// ---------------------------------------------------------------------------

/// Drive one admitted session until disconnect: multiplex client frames
/// and room broadcasts, relay peer messages, trigger the assistant.
pub async fn run_session(
    ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    session: Session,
    ctx: Arc<RelayContext>,
) {
    let mut state = SessionState::Connecting;
    let mut room_rx = room::join_room(
        &ctx.rooms,
        &session.room_id,
        Member {
            id: session.id,
            email: session.claims.email.clone(),
        },
    );
    state = state.on_admitted();

    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    loop {
        tokio::select! {
            // Frame from this client.
            frame = ws_stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if !state.is_joined() {
                            continue;
                        }
                        match serde_json::from_str::<Frame>(&text) {
                            Ok(Frame::ProjectMessage(msg)) => {
                                handle_project_message(&ctx, &session, msg);
                            }
                            Err(_) => {} // Unknown or malformed frames are ignored.
                        }
                    }
                    Some(Ok(_)) => {} // Ignore binary / ping / pong frames.
                    Some(Err(_)) | None => break, // Connection closed or error.
                }
            }

            // Event from the room channel.
            event = room_rx.recv() => {
                match event {
                    Ok(ev) => {
                        if !ev.should_deliver_to(session.id) {
                            continue;
                        }
                        let frame = Frame::ProjectMessage(ev.into_message());
                        if let Ok(text) = serde_json::to_string(&frame) {
                            if ws_sink.send(WsMessage::Text(text)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(session = %session.id, missed, "receiver lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    room::leave_room(&ctx.rooms, &session.room_id, session.id);
    state = state.on_disconnect();
    tracing::info!(session = %session.id, room = %session.room_id, ?state, "session ended");
}

/// Relay a client message and, when triggered, dispatch the assistant.
///
/// The relay happens synchronously before the assistant task is spawned,
/// so peers always observe the human message before its reply. The
/// assistant call itself runs on its own task and never blocks the pump;
/// concurrent triggers proceed independently.
fn handle_project_message(ctx: &Arc<RelayContext>, session: &Session, msg: ChatMessage) {
    room::relay_to_peers(&ctx.rooms, &session.room_id, session.id, msg.clone());

    if let Some(prompt) = crate::strip_trigger(&msg.message) {
        tracing::debug!(room = %session.room_id, sender = %msg.sender, "assistant triggered");
        let ctx = Arc::clone(ctx);
        let room_id = session.room_id.clone();
        tokio::spawn(async move {
            let result = ctx.ai.generate(&prompt).await;
            room::broadcast_assistant(&ctx.rooms, &room_id, result);
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Per-session HTTP/WebSocket server
//!
//! Each live session binds an ephemeral port and serves the question
//! renderer at `/` plus a single WebSocket endpoint at `/ws`. Frames are
//! forwarded through an unbounded channel so the store never blocks on a
//! slow client.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use super::{page, SessionStore};
use crate::models::{ClientFrame, ServerFrame};

/// Shared stop flag for one session server
#[derive(Clone)]
pub struct ShutdownFlag {
    requested: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared by one session's handlers
#[derive(Clone)]
struct SessionServerState {
    store: SessionStore,
    session_id: String,
}

/// Bind an ephemeral port for the session and start serving.
///
/// Returns the bound port and the flag that stops the server.
pub(crate) async fn spawn_session_server(
    store: SessionStore,
    session_id: String,
) -> Result<(u16, ShutdownFlag), String> {
    let state = SessionServerState {
        store,
        session_id: session_id.clone(),
    };

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .map_err(|e| format!("Failed to bind ephemeral port: {}", e))?;
    let port = listener
        .local_addr()
        .map_err(|e| format!("Failed to read bound address: {}", e))?
        .port();

    let shutdown = ShutdownFlag::new();
    let flag = shutdown.clone();

    tokio::spawn(async move {
        let shutdown_signal = async move {
            loop {
                if flag.is_requested() {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        };

        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
        {
            log::warn!("Session server for {} exited with error: {}", session_id, e);
        }
    });

    Ok((port, shutdown))
}

/// Serve the embedded question renderer
async fn index_handler() -> Html<&'static str> {
    Html(page::INDEX_HTML)
}

async fn health_handler() -> &'static str {
    "OK"
}

/// WebSocket upgrade handler
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SessionServerState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle the session's WebSocket connection
async fn handle_websocket(socket: WebSocket, state: SessionServerState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();

    // Attaching replays every pending question into the channel first, so
    // the client sees them before anything pushed afterwards
    if !state.store.attach_client(&state.session_id, tx) {
        log::warn!(
            "WebSocket connect for unknown session {}, closing",
            state.session_id
        );
        return;
    }

    // Forward frames from the store to the client
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let is_end = matches!(frame, ServerFrame::End);
            match serde_json::to_string(&frame) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("Failed to serialize frame: {}", e);
                }
            }
            if is_end {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    });

    // Handle inbound frames until the client goes away
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(ClientFrame::Connected) => {
                    log::debug!("Client connected frame for session {}", state.session_id);
                }
                Ok(ClientFrame::Response { id, answer }) => {
                    state.store.record_response(&state.session_id, &id, answer);
                }
                Err(e) => {
                    // Malformed frames are ignored
                    log::debug!("Ignoring malformed frame: {}", e);
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                log::warn!("WebSocket error on session {}: {}", state.session_id, e);
                break;
            }
        }
    }

    state.store.detach_client(&state.session_id);
    send_task.abort();
}

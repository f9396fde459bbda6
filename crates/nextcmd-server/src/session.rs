use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use nextcmd_core::ids::SessionId;
use nextcmd_telemetry::names;

use crate::handlers;
use crate::protocol::{ProtocolError, RequestEnvelope, ResponseEnvelope};
use crate::server::AppState;

/// A live WebSocket session.
pub struct SessionInfo {
    pub id: SessionId,
    pub opened_at: Instant,
    messages: AtomicU64,
}

impl SessionInfo {
    fn new() -> Self {
        Self {
            id: SessionId::new(),
            opened_at: Instant::now(),
            messages: AtomicU64::new(0),
        }
    }

    /// Frames handled so far.
    pub fn messages(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }
}

/// Registry of open sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<SessionInfo>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> Arc<SessionInfo> {
        let info = Arc::new(SessionInfo::new());
        self.sessions.insert(info.id.clone(), Arc::clone(&info));
        info
    }

    pub fn unregister(&self, id: &SessionId) -> Option<Arc<SessionInfo>> {
        self.sessions.remove(id).map(|(_, info)| info)
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<SessionInfo>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

/// Drive one connection until the client leaves or the server shuts down.
///
/// Frames are handled in arrival order and each produces exactly one reply.
/// Replies go through a bounded queue drained by a writer task that also
/// sends heartbeat pings.
#[instrument(skip_all, fields(session_id = %session.id))]
pub async fn run_session(socket: WebSocket, session: Arc<SessionInfo>, state: AppState) {
    state
        .handler_state
        .metrics
        .counter_inc(names::SESSIONS_OPENED, 1);
    info!("session opened");

    let (ws_tx, mut ws_rx) = socket.split();
    let (tx, rx) = mpsc::channel::<String>(state.config.max_send_queue);
    let cancel = state.shutdown.child_token();

    let writer = tokio::spawn(write_loop(
        ws_tx,
        rx,
        state.config.heartbeat_interval,
        cancel.clone(),
    ));

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = ws_rx.next() => frame,
        };

        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                // Oversized frames surface here; the session ends without a reply.
                warn!(
                    error = %e,
                    max_message_size = state.config.max_message_size,
                    "socket read failed"
                );
                break;
            }
            None => break,
        };

        let decoded = match msg {
            WsMessage::Text(text) => RequestEnvelope::decode(text.as_str()),
            WsMessage::Binary(bytes) => RequestEnvelope::decode_bytes(&bytes),
            WsMessage::Close(_) => break,
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
        };
        session.messages.fetch_add(1, Ordering::Relaxed);

        let response = match decoded {
            Ok(request) => {
                debug!(kind = request.kind(), "request");
                handlers::dispatch(&state.handler_state, request).await
            }
            Err(e) => reject(&state, e),
        };

        if tx.send(response.to_json()).await.is_err() {
            debug!("writer gone");
            break;
        }
    }

    drop(tx);
    let _ = writer.await;
    state.sessions.unregister(&session.id);
    info!(
        messages = session.messages(),
        duration_ms = session.opened_at.elapsed().as_millis() as u64,
        "session closed"
    );
}

fn reject(state: &AppState, error: ProtocolError) -> ResponseEnvelope {
    state
        .handler_state
        .metrics
        .counter_inc(names::PROTOCOL_ERRORS, 1);
    warn!(error = %error, "rejected frame");
    error.into()
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<String>,
    heartbeat: Duration,
    cancel: CancellationToken,
) {
    let mut ping = tokio::time::interval(heartbeat);
    ping.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
            msg = rx.recv() => match msg {
                Some(text) => {
                    if sink.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = ping.tick() => {
                if sink.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    debug!("heartbeat failed");
                    break;
                }
                trace!("sent ping");
            }
        }
    }
    // Unblocks the reader if the socket died under it.
    cancel.cancel();
}

//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::{SinkExt, StreamExt};
use herald_core::Principal;
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::{ClientConnection, Outgoing};
use super::protocol::GraphQlWsProtocol;

/// How long queued frames may take to flush once the session is over.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the connection so broker frames can reach it
/// 2. Forwards queued frames to the socket from a writer task
/// 3. Feeds every inbound text frame to the protocol adapter
/// 4. On close, shutdown, or a frame that could not be queued, terminates
///    the session in the broker
#[instrument(skip_all, fields(session_id = %session_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    session_id: String,
    user: Option<Principal>,
    protocol: Arc<GraphQlWsProtocol>,
    queue_capacity: usize,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Outgoing>(queue_capacity.max(1));
    let connection = Arc::new(ClientConnection::new(session_id.clone(), user.clone(), send_tx));

    info!(user = ?user.as_ref().map(Principal::name), "client connected");
    counter!("ws_connections_total").increment(1);
    gauge!("ws_connections_active").increment(1.0);

    protocol.after_session_started(Arc::clone(&connection));

    let writer = {
        let connection = Arc::clone(&connection);
        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    biased;
                    () = connection.aborted() => {
                        let frame = CloseFrame {
                            code: close_code::PROTOCOL,
                            reason: "outbound frame dropped".into(),
                        };
                        let _ = ws_tx.send(Message::Close(Some(frame))).await;
                        break;
                    }
                    item = send_rx.recv() => item,
                };
                match item {
                    Some(Outgoing::Text(text)) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outgoing::Close) => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                    None => break,
                }
            }
        })
    };

    loop {
        let msg = tokio::select! {
            () = shutdown.cancelled() => {
                debug!("server shutting down, closing session");
                let _ = connection.close();
                break;
            }
            () = connection.aborted() => {
                warn!(dropped = connection.drop_count(), "outbound queue overflow, closing session");
                break;
            }
            msg = ws_rx.next() => msg,
        };
        let text = match msg {
            Some(Ok(Message::Text(t))) => t.to_string(),
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) => {
                debug!("client sent close frame");
                break;
            }
            Some(Err(e)) => {
                debug!(error = %e, "websocket read failed");
                break;
            }
            None => break,
        };
        protocol.handle_from_client(&connection, &text).await;
    }

    protocol.after_session_ended(&session_id, user).await;
    let _ = connection.close();
    let abort = writer.abort_handle();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        debug!("writer did not finish in time");
        abort.abort();
    }

    info!(
        age_ms = connection.age().as_millis() as u64,
        dropped = connection.drop_count(),
        "client disconnected"
    );
    counter!("ws_disconnections_total").increment(1);
    gauge!("ws_connections_active").decrement(1.0);
}

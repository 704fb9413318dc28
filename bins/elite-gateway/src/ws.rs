/// WebSocket Session Handling
///
/// **Responsibility:**
/// Accept submission messages on one client connection, queue each as a Job
/// and write back the single result for it.
///
/// **Concurrency:**
/// - Every inbound message is handled on its own task, so one connection can
///   have several jobs in flight
/// - A single writer task owns the socket sink; handlers reply through an mpsc
/// - When the client leaves, in-flight jobs still run to completion and their
///   results stay retrievable from the result cache
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use elite_common::submission::{recover_job_id, Submission};
use elite_common::types::{ErrorKind, ErrorResponse, SystemError};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::metrics;
use crate::AppState;

const OUTBOUND_BUFFER: usize = 64;

/// GET /ws - upgrade to a submission session
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4();
    info!(connection_id = %connection_id, "WebSocket client connected");

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if let Err(e) = sink.send(Message::Text(text)).await {
                debug!(error = %e, "Client went away before reply");
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    let error = SystemError::new(ErrorKind::Validation, "Binary frame is not UTF-8");
                    metrics::record_received();
                    metrics::record_rejected(error.kind);
                    let _ = tx.send(error_response(None, error)).await;
                    continue;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(connection_id = %connection_id, error = %e, "WebSocket read failed");
                break;
            }
        };

        let state = Arc::clone(&state);
        let tx = tx.clone();
        tokio::spawn(async move {
            let reply = process_message(&state, &text).await;
            if tx.send(reply).await.is_err() {
                debug!(connection_id = %connection_id, "Connection closed; result left in cache");
            }
        });
    }

    writer.abort();
    info!(connection_id = %connection_id, "WebSocket client disconnected");
}

/// Handle one submission message and produce the text to send back.
///
/// A verdict is relayed exactly as the worker published it. Anything that
/// prevents a verdict becomes an [`ErrorResponse`].
pub async fn process_message(state: &AppState, text: &str) -> String {
    metrics::record_received();

    let mut job = match Submission::parse(text).and_then(Submission::into_job) {
        Ok(job) => job,
        Err(error) => {
            warn!(error = %error.message, "Rejected submission");
            metrics::record_rejected(error.kind);
            return error_response(recover_job_id(text), error);
        }
    };
    let job_id = job.ensure_job_id().to_string();

    let manager = match state.broker().await {
        Ok(manager) => manager,
        Err(e) => {
            error!(job_id = %job_id, error = %e, "Broker unavailable");
            metrics::record_failure(e.kind());
            return error_response(Some(job_id), e.to_system_error());
        }
    };

    let started = Instant::now();
    match manager.submit(job).await {
        Ok(raw) => {
            metrics::record_round_trip(started.elapsed());
            raw.payload
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "Submission round trip failed");
            metrics::record_failure(e.kind());
            error_response(Some(job_id), e.to_system_error())
        }
    }
}

fn error_response(job_id: Option<String>, error: SystemError) -> String {
    let response = ErrorResponse { job_id, error };
    serde_json::to_string(&response).unwrap_or_else(|e| {
        error!(error = %e, "Failed to encode error response");
        r#"{"job_id":null,"error":{"kind":"internal","message":"unencodable error"}}"#.to_string()
    })
}

//! Per-run streaming channel
//!
//! The client attaches to an accepted run by id. It first receives the run's
//! current status, then every event the run publishes until teardown closes
//! the channel. Input and stop requests travel the other way.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info};

use super::AppState;
use crate::channel::{ClientMessage, Outbound, ServerEvent};
use crate::engine::ExecutionService;

pub async fn upgrade(
    ws: WebSocketUpgrade,
    Path(run_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, run_id, state))
}

/// First message for a newly attached client, and whether the channel
/// should close right after it
fn opening(service: &ExecutionService, run_id: &str) -> (Option<ServerEvent>, bool) {
    match service.status_of(run_id) {
        Some(status) => {
            let done = status.is_terminal() && !service.is_live(run_id);
            (Some(ServerEvent::Status(status)), done)
        }
        None => (None, true),
    }
}

/// Apply one client text frame. Input never blocks, so a stop behind a burst
/// of input is handled promptly.
async fn dispatch(service: &ExecutionService, run_id: &str, text: &str) {
    match ClientMessage::parse(text) {
        Some(ClientMessage::Input { data }) => service.send_input(run_id, &data),
        Some(ClientMessage::Stop) => service.stop(run_id).await,
        None => debug!("Ignoring malformed message for run {}: {}", run_id, text),
    }
}

async fn handle_socket(socket: WebSocket, run_id: String, state: AppState) {
    // Attach before reading the status so no event falls in between
    let (attachment, mut outbound) = state.hub.attach(&run_id);
    let (mut sink, mut stream) = socket.split();

    let (greeting, done) = opening(&state.service, &run_id);
    if let Some(event) = greeting {
        let _ = sink.send(Message::Text(event.to_json().into())).await;
    }
    if done {
        info!("Run {} is not live; closing channel", run_id);
        state.hub.detach(&run_id, attachment);
        let _ = sink.send(Message::Close(None)).await;
        return;
    }
    info!("Client attached to run {}", run_id);

    let mut write_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            match message {
                Outbound::Event(event) => {
                    if sink
                        .send(Message::Text(event.to_json().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let service = state.service.clone();
    let reader_run_id = run_id.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => dispatch(&service, &reader_run_id, text.as_str()).await,
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => write_task.abort(),
    }

    state.hub.detach(&run_id, attachment);
    info!("Client detached from run {}", run_id);
}

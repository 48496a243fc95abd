//! Client session socket
//!
//! One WebSocket per phone client. The read loop feeds the frame router;
//! a spawned relay streams queued audio to the transcription provider; a
//! transcript consumer forwards partials and queues each final onto a
//! single turn-runner task that processes them strictly in arrival order.
//! Everything spawned for a session is cancelled together when the socket
//! closes.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use wink_brain::TurnOutcome;
use wink_core::{DeviceAction, ServerEvent, StatusState, TaskState, TaskStatus};
use wink_speech::TranscriptEvent;

use crate::devices::TaskUpdate;
use crate::framing::{FrameOutcome, FrameRouter};
use crate::metrics;
use crate::session::Session;
use crate::speaker::{OutboundChannel, SerialSpeaker};
use crate::state::AppState;
use crate::ServerError;

const GREETING: &str = "Connected. Tap Start and speak.";

/// Outbound half of the client socket, shared across session tasks.
pub struct SocketChannel {
    sender: tokio::sync::Mutex<SplitSink<WebSocket, Message>>,
}

impl SocketChannel {
    fn new(sender: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sender: tokio::sync::Mutex::new(sender),
        }
    }
}

#[async_trait]
impl OutboundChannel for SocketChannel {
    async fn send_event(&self, event: &ServerEvent) -> Result<(), ServerError> {
        let text = serde_json::to_string(event).map_err(|e| ServerError::Internal(e.to_string()))?;
        self.sender
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|e| ServerError::WebSocket(e.to_string()))
    }

    async fn send_binary(&self, payload: Vec<u8>) -> Result<(), ServerError> {
        self.sender
            .lock()
            .await
            .send(Message::Binary(payload))
            .await
            .map_err(|e| ServerError::WebSocket(e.to_string()))
    }
}

/// Handle WebSocket upgrade for the client channel.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    metrics::record_session_opened();

    let (sender, mut receiver) = socket.split();
    let channel: Arc<SocketChannel> = Arc::new(SocketChannel::new(sender));
    let session = Arc::new(Session::new(&state.config));
    let speaker = Arc::new(SerialSpeaker::new(
        channel.clone(),
        state.synthesizer.clone(),
        state.config.audio.tts_chunk_bytes,
    ));

    tracing::info!(session_id = %session.id, "client session connected");

    let _ = channel
        .send_event(&ServerEvent::AssistantText {
            text: GREETING.to_string(),
        })
        .await;
    let _ = channel
        .send_event(&ServerEvent::status(
            StatusState::Info,
            "Starting transcription worker...",
        ))
        .await;

    // One relay per session, fed by the session's audio queue. The watcher
    // below is the only observer of its fate: a crash while the session is
    // alive surfaces as an error status, a teardown abort stays quiet.
    let (transcripts_tx, transcripts_rx) = mpsc::unbounded_channel();
    let relay_task = {
        let relay = state.relay.clone();
        let queue = session.audio.clone();
        tokio::spawn(async move { relay.run(queue, transcripts_tx).await })
    };
    let relay_abort = relay_task.abort_handle();
    let relay_watch = {
        let channel = channel.clone();
        let session_id = session.id;
        tokio::spawn(async move {
            match relay_task.await {
                Ok(Ok(())) => {
                    tracing::debug!(session_id = %session_id, "transcription relay finished");
                },
                Ok(Err(e)) => {
                    tracing::error!(session_id = %session_id, error = %e, "transcription relay failed");
                    metrics::record_error("transcription_relay");
                    let _ = channel
                        .send_event(&ServerEvent::status(
                            StatusState::Error,
                            format!("Transcription worker failed: {}", e),
                        ))
                        .await;
                },
                Err(e) if !e.is_cancelled() => {
                    tracing::error!(session_id = %session_id, error = %e, "transcription relay panicked");
                    metrics::record_error("transcription_relay");
                    let _ = channel
                        .send_event(&ServerEvent::status(
                            StatusState::Error,
                            "Transcription worker crashed",
                        ))
                        .await;
                },
                Err(_) => {},
            }
        })
    };

    // One turn runner per session: finals are processed one at a time, in
    // the order they arrived, so history appends and the pending-action
    // confirmation sequence match what the user actually said. A panic in
    // a turn kills the runner; the watcher surfaces that instead of letting
    // turns vanish silently.
    let (turns_tx, turns_rx) = mpsc::unbounded_channel::<String>();
    let turn_runner = {
        let state = state.clone();
        let session = session.clone();
        let events: Arc<dyn OutboundChannel> = channel.clone();
        let speaker = speaker.clone();
        tokio::spawn(async move {
            run_turns(state, session, events, speaker, turns_rx).await;
        })
    };
    let turn_abort = turn_runner.abort_handle();
    let turn_watch = {
        let channel = channel.clone();
        let session_id = session.id;
        tokio::spawn(async move {
            match turn_runner.await {
                Ok(()) => {},
                Err(e) if !e.is_cancelled() => {
                    tracing::error!(session_id = %session_id, error = %e, "turn runner panicked");
                    metrics::record_error("turn");
                    let _ = channel
                        .send_event(&ServerEvent::status(
                            StatusState::Error,
                            "Assistant worker crashed",
                        ))
                        .await;
                },
                Err(_) => {},
            }
        })
    };

    let consumer = {
        let channel = channel.clone();
        tokio::spawn(async move {
            consume_transcripts(channel, turns_tx, transcripts_rx).await;
        })
    };

    let mut framer = FrameRouter::new(session.audio.clone(), session.latest_frame.clone());

    while let Some(message) = receiver.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(session_id = %session.id, error = %e, "client socket error");
                break;
            },
        };

        match message {
            Message::Text(raw) => {
                if framer.handle_text(&raw) == FrameOutcome::Stopped {
                    let _ = channel
                        .send_event(&ServerEvent::status(StatusState::Idle, "Stopped."))
                        .await;
                }
            },
            Message::Binary(payload) => {
                if let FrameOutcome::Rejected { reason } = framer.handle_binary(payload) {
                    let _ = channel
                        .send_event(&ServerEvent::status(StatusState::Error, reason))
                        .await;
                }
            },
            Message::Close(_) => break,
            // Pings are answered by the protocol layer.
            _ => {},
        }
    }

    // Teardown: cancel the relay and everything spawned for this session,
    // then wait for the relay watcher so cancellation has fully landed
    // before the session is considered gone.
    relay_abort.abort();
    consumer.abort();
    turn_abort.abort();
    session.abort_tasks();
    let _ = relay_watch.await;
    let _ = turn_watch.await;
    metrics::record_session_closed();
    tracing::info!(session_id = %session.id, "client session closed");
}

/// Forward transcript events to the client. Partials go straight out;
/// each final is also queued for the turn runner, so partials for the
/// next utterance are never blocked behind a slow turn.
async fn consume_transcripts(
    channel: Arc<SocketChannel>,
    turns: mpsc::UnboundedSender<String>,
    mut transcripts: mpsc::UnboundedReceiver<TranscriptEvent>,
) {
    while let Some(event) = transcripts.recv().await {
        match event {
            TranscriptEvent::Partial(text) => {
                let _ = channel.send_event(&ServerEvent::PartialTranscript { text }).await;
            },
            TranscriptEvent::Final(text) => {
                let _ = channel
                    .send_event(&ServerEvent::FinalTranscript { text: text.clone() })
                    .await;
                if turns.send(text).is_err() {
                    break;
                }
            },
        }
    }
}

/// Process final transcripts one at a time, in arrival order. Spawning a
/// task per final would let the scheduler run turns out of order; the
/// single runner keeps turn B from touching conversation state before
/// turn A has finished with it.
async fn run_turns(
    state: AppState,
    session: Arc<Session>,
    channel: Arc<dyn OutboundChannel>,
    speaker: Arc<SerialSpeaker>,
    mut turns: mpsc::UnboundedReceiver<String>,
) {
    while let Some(transcript) = turns.recv().await {
        run_turn(&state, &session, &channel, &speaker, transcript).await;
    }
}

async fn run_turn(
    state: &AppState,
    session: &Arc<Session>,
    channel: &Arc<dyn OutboundChannel>,
    speaker: &Arc<SerialSpeaker>,
    transcript: String,
) {
    metrics::record_turn();

    let frame = session.latest_frame();
    let task_status = session.task_status();

    let outcome = {
        let mut conversation = session.conversation.lock().await;
        conversation
            .handle_final_transcript(
                &transcript,
                frame.as_deref(),
                task_status.as_ref(),
                state.resolver.as_ref(),
            )
            .await
    };

    match outcome {
        Ok(TurnOutcome::Ignored) => {
            tracing::debug!(session_id = %session.id, "transcript ignored while dormant");
        },
        Ok(TurnOutcome::Reply { text }) => {
            speaker.speak(&text).await;
        },
        Ok(TurnOutcome::ReplyWithAction { text, action }) => {
            dispatch_action(state, session, channel, speaker, action).await;
            speaker.speak(&text).await;
        },
        Err(e) => {
            tracing::warn!(session_id = %session.id, error = %e, "turn failed");
            metrics::record_error("turn");
            let _ = channel
                .send_event(&ServerEvent::status(
                    StatusState::Error,
                    format!("Assistant error: {}", e),
                ))
                .await;
        },
    }
}

/// Send a confirmed action to its device and start watching its status.
/// Dispatch failure is a warning to the client, not a session error.
async fn dispatch_action(
    state: &AppState,
    session: &Arc<Session>,
    channel: &Arc<dyn OutboundChannel>,
    speaker: &Arc<SerialSpeaker>,
    action: DeviceAction,
) {
    let (watch_tx, watch_rx) = mpsc::unbounded_channel();

    match state.devices.dispatch(&action, watch_tx) {
        Ok(()) => {
            metrics::record_task_dispatched();
            let status = TaskStatus::queued(&action);
            session.set_task_status(status.clone());
            let _ = channel
                .send_event(&ServerEvent::status(TaskState::Queued, status.goal.clone()))
                .await;

            let watcher = {
                let session = session.clone();
                let channel = channel.clone();
                let speaker = speaker.clone();
                tokio::spawn(async move {
                    watch_task(session, channel, speaker, action, watch_rx).await;
                })
            };
            session.track(watcher.abort_handle());
        },
        Err(e) => {
            tracing::warn!(session_id = %session.id, device_id = %action.device_id, error = %e, "dispatch failed");
            metrics::record_error("dispatch");
            session.set_task_status(TaskStatus::failed(&action, "Device not connected"));
            let _ = channel
                .send_event(&ServerEvent::status(
                    StatusState::Warning,
                    format!("Device '{}' is not connected", action.device_id),
                ))
                .await;
        },
    }
}

/// Relay one task's status updates back to the client, and announce the
/// terminal state out loud.
async fn watch_task(
    session: Arc<Session>,
    channel: Arc<dyn OutboundChannel>,
    speaker: Arc<SerialSpeaker>,
    action: DeviceAction,
    mut updates: mpsc::UnboundedReceiver<TaskUpdate>,
) {
    while let Some(update) = updates.recv().await {
        let status = TaskStatus {
            device_id: action.device_id.clone(),
            goal: action.goal.clone(),
            state: update.state,
            message: update.message.clone(),
        };
        session.set_task_status(status);

        let _ = channel
            .send_event(&ServerEvent::status(update.state, update.message.clone()))
            .await;

        match update.state {
            TaskState::Completed => {
                let announcement = if update.message.trim().is_empty() {
                    "Task complete.".to_string()
                } else {
                    update.message.clone()
                };
                speaker.speak(&announcement).await;
                break;
            },
            TaskState::Failed => {
                let announcement = if update.message.trim().is_empty() {
                    "The task failed.".to_string()
                } else {
                    format!("The task failed: {}", update.message)
                };
                speaker.speak(&announcement).await;
                break;
            },
            _ => {},
        }
    }
}

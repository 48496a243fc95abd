//! Device channel socket
//!
//! Companion devices connect here, register with a device id, and receive
//! `laptop_task` commands. Status updates flow back through the registry to
//! whichever session dispatched the task. The socket writer is a dedicated
//! task draining an unbounded channel, so the registry can hand commands to
//! a device without touching the socket directly.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use wink_core::{DeviceCommand, DeviceEvent};

use crate::metrics;
use crate::state::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Handle WebSocket upgrade for the device channel.
pub async fn device_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_device_socket(socket, state))
}

async fn handle_device_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (command_tx, mut command_rx) = mpsc::unbounded_channel::<DeviceCommand>();

    let writer = tokio::spawn(async move {
        while let Some(command) = command_rx.recv().await {
            let text = match serde_json::to_string(&command) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "unserializable device command");
                    continue;
                },
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let pinger = {
        let command_tx = command_tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PING_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                if command_tx.send(DeviceCommand::Ping).is_err() {
                    break;
                }
            }
        })
    };

    // The id this connection registered under, for cleanup.
    let mut registered: Option<String> = None;

    while let Some(message) = receiver.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "device socket error");
                break;
            },
        };

        let raw = match message {
            Message::Text(raw) => raw,
            Message::Close(_) => break,
            _ => continue,
        };

        let event = match serde_json::from_str::<DeviceEvent>(&raw) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(error = %e, "unparseable device event");
                continue;
            },
        };

        match event {
            DeviceEvent::DeviceRegister {
                device_id,
                platform,
                capabilities,
            } => {
                state
                    .devices
                    .register(&device_id, platform, capabilities, command_tx.clone());
                metrics::record_device_registered();
                let _ = command_tx.send(DeviceCommand::Registered {
                    device_id: device_id.clone(),
                    message: "Registered with Wink".to_string(),
                });
                registered = Some(device_id);
            },
            DeviceEvent::StatusUpdate {
                device_id,
                status,
                message,
            } => {
                tracing::debug!(device_id = %device_id, state = %status, "device status update");
                state.devices.route_status(&device_id, status, message);
            },
            DeviceEvent::Pong { device_id } => {
                tracing::trace!(device_id = %device_id, "device pong");
            },
        }
    }

    pinger.abort();
    // Drop our command sender so the writer drains and exits. The registry
    // entry is removed only if this connection still owns it.
    if let Some(device_id) = registered {
        state.devices.deregister(&device_id, &command_tx);
    }
    drop(command_tx);
    let _ = writer.await;
}

//! Wink Server
//!
//! WebSocket and HTTP endpoints for the Wink assistant: the client session
//! socket, the companion-device socket, and the REST surface.

pub mod device_ws;
pub mod devices;
pub mod framing;
pub mod http;
pub mod metrics;
pub mod session;
pub mod speaker;
pub mod state;
pub mod websocket;

pub use devices::{DeviceRegistry, TaskUpdate};
pub use framing::{FrameOutcome, FrameRouter};
pub use http::create_router;
pub use metrics::init_metrics;
pub use session::Session;
pub use speaker::Speaker;
pub use state::AppState;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Device not connected: {0}")]
    DeviceNotConnected(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

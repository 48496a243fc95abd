//! Client session
//!
//! Per-connection state shared between the read loop, the transcript
//! consumer, turn tasks, and task-status watchers.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use uuid::Uuid;

use wink_brain::Conversation;
use wink_config::Settings;
use wink_core::{AudioQueue, TaskStatus};

/// One connected client session.
pub struct Session {
    pub id: Uuid,
    pub created_at: Instant,
    /// Conversation state machine; the async mutex keeps turns ordered even
    /// when the resolver call inside a turn takes a while.
    pub conversation: tokio::sync::Mutex<Conversation>,
    /// Most recent dispatched task, fed into the resolver prompt.
    task_status: Mutex<Option<TaskStatus>>,
    /// Audio ingestion queue feeding the transcription relay.
    pub audio: Arc<AudioQueue>,
    /// Most recent video frame, replaced wholesale on arrival.
    pub latest_frame: Arc<Mutex<Option<Vec<u8>>>>,
    /// Work spawned on behalf of this session, aborted together on teardown.
    tasks: Mutex<Vec<AbortHandle>>,
}

impl Session {
    pub fn new(config: &Settings) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Instant::now(),
            conversation: tokio::sync::Mutex::new(Conversation::new(&config.conversation)),
            task_status: Mutex::new(None),
            audio: Arc::new(AudioQueue::new(config.audio.queue_capacity)),
            latest_frame: Arc::new(Mutex::new(None)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn task_status(&self) -> Option<TaskStatus> {
        self.task_status.lock().clone()
    }

    pub fn set_task_status(&self, status: TaskStatus) {
        *self.task_status.lock() = Some(status);
    }

    /// Snapshot of the latest video frame, if any.
    pub fn latest_frame(&self) -> Option<Vec<u8>> {
        self.latest_frame.lock().clone()
    }

    /// Track a spawned task so teardown can cancel it.
    pub fn track(&self, handle: AbortHandle) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    /// Abort everything spawned for this session.
    pub fn abort_tasks(&self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }
}

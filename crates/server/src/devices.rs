//! Device registry and task router
//!
//! Tracks connected companion devices and routes `laptop_task` dispatches
//! to them. Each dispatch installs a status watcher for the device; status
//! updates arriving on the device channel are forwarded to whichever
//! session most recently dispatched to that device.

use dashmap::DashMap;
use tokio::sync::mpsc;

use wink_brain::{DeviceDirectory, DeviceInfo};
use wink_core::{DeviceAction, DeviceCommand, TaskState};

use crate::ServerError;

/// A task status update routed back to the dispatching session.
#[derive(Debug, Clone)]
pub struct TaskUpdate {
    pub state: TaskState,
    pub message: String,
}

struct DeviceHandle {
    platform: Option<String>,
    capabilities: Vec<String>,
    sender: mpsc::UnboundedSender<DeviceCommand>,
}

/// Registry of connected devices, keyed by device id.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: DashMap<String, DeviceHandle>,
    watchers: DashMap<String, mpsc::UnboundedSender<TaskUpdate>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device connection. A device id already in the registry is
    /// replaced, so a stale connection cannot shadow a reconnect. Returns
    /// `true` when a previous registration was displaced.
    pub fn register(
        &self,
        device_id: &str,
        platform: Option<String>,
        capabilities: Vec<String>,
        sender: mpsc::UnboundedSender<DeviceCommand>,
    ) -> bool {
        let replaced = self
            .devices
            .insert(
                device_id.to_string(),
                DeviceHandle {
                    platform,
                    capabilities,
                    sender,
                },
            )
            .is_some();

        if replaced {
            tracing::warn!(device_id, "device re-registered, replacing previous connection");
        } else {
            tracing::info!(device_id, "device registered");
        }
        replaced
    }

    /// Remove a device, but only if `sender` still identifies the current
    /// registration. A disconnecting connection that was already replaced by
    /// a reconnect must not tear down the newer one.
    pub fn deregister(&self, device_id: &str, sender: &mpsc::UnboundedSender<DeviceCommand>) -> bool {
        let removed = self
            .devices
            .remove_if(device_id, |_, handle| handle.sender.same_channel(sender))
            .is_some();
        if removed {
            tracing::info!(device_id, "device deregistered");
        }
        removed
    }

    pub fn is_connected(&self, device_id: &str) -> bool {
        self.devices.contains_key(device_id)
    }

    /// Send a task to a device and install `watcher` as the recipient of its
    /// subsequent status updates. Fails when the device is not connected.
    pub fn dispatch(
        &self,
        action: &DeviceAction,
        watcher: mpsc::UnboundedSender<TaskUpdate>,
    ) -> Result<(), ServerError> {
        let send_result = {
            let Some(handle) = self.devices.get(&action.device_id) else {
                return Err(ServerError::DeviceNotConnected(action.device_id.clone()));
            };
            handle.sender.send(DeviceCommand::LaptopTask {
                goal: action.goal.clone(),
            })
        };

        if send_result.is_err() {
            // Writer task is gone; the connection is effectively dead.
            self.devices.remove(&action.device_id);
            return Err(ServerError::DeviceNotConnected(action.device_id.clone()));
        }

        self.watchers.insert(action.device_id.clone(), watcher);
        tracing::info!(device_id = %action.device_id, goal = %action.goal, "task dispatched to device");
        Ok(())
    }

    /// Route a status update from the device channel to the watching
    /// session, if any. Updates for devices nobody is watching are dropped.
    pub fn route_status(&self, device_id: &str, state: TaskState, message: String) {
        let stale = match self.watchers.get(device_id) {
            Some(watcher) => watcher.send(TaskUpdate { state, message }).is_err(),
            None => {
                tracing::debug!(device_id, "status update with no watching session");
                return;
            },
        };
        if stale {
            self.watchers.remove(device_id);
        }
    }

    /// Send a ping to every connected device.
    pub fn ping_all(&self) {
        for entry in self.devices.iter() {
            let _ = entry.value().sender.send(DeviceCommand::Ping);
        }
    }

    pub fn list(&self) -> Vec<DeviceInfo> {
        self.devices
            .iter()
            .map(|entry| DeviceInfo {
                device_id: entry.key().clone(),
                platform: entry.value().platform.clone(),
                capabilities: entry.value().capabilities.clone(),
            })
            .collect()
    }
}

impl DeviceDirectory for DeviceRegistry {
    fn devices(&self) -> Vec<DeviceInfo> {
        self.list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(device_id: &str) -> DeviceAction {
        DeviceAction::new(device_id, "open the browser")
    }

    #[test]
    fn test_dispatch_to_missing_device_fails() {
        let registry = DeviceRegistry::new();
        let (watcher, _rx) = mpsc::unbounded_channel();
        let result = registry.dispatch(&action("laptop-1"), watcher);
        assert!(matches!(result, Err(ServerError::DeviceNotConnected(_))));
    }

    #[tokio::test]
    async fn test_dispatch_forwards_task_to_device() {
        let registry = DeviceRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("laptop-1", None, vec![], tx);

        let (watcher, _watch_rx) = mpsc::unbounded_channel();
        registry.dispatch(&action("laptop-1"), watcher).unwrap();

        match rx.recv().await.unwrap() {
            DeviceCommand::LaptopTask { goal } => assert_eq!(goal, "open the browser"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_status_routes_to_latest_watcher() {
        let registry = DeviceRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register("laptop-1", None, vec![], tx);

        let (first, mut first_rx) = mpsc::unbounded_channel();
        let (second, mut second_rx) = mpsc::unbounded_channel();
        registry.dispatch(&action("laptop-1"), first).unwrap();
        registry.dispatch(&action("laptop-1"), second).unwrap();

        registry.route_status("laptop-1", TaskState::Completed, "Done".to_string());

        let update = second_rx.recv().await.unwrap();
        assert_eq!(update.state, TaskState::Completed);
        assert!(first_rx.try_recv().is_err());
    }

    #[test]
    fn test_reregistration_replaces_handle() {
        let registry = DeviceRegistry::new();
        let (old_tx, _old_rx) = mpsc::unbounded_channel();
        let (new_tx, _new_rx) = mpsc::unbounded_channel();

        assert!(!registry.register("laptop-1", None, vec![], old_tx.clone()));
        assert!(registry.register("laptop-1", Some("macos".to_string()), vec![], new_tx));

        // The stale connection's deregister must not remove the new one.
        assert!(!registry.deregister("laptop-1", &old_tx));
        assert!(registry.is_connected("laptop-1"));

        let listed = registry.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].platform.as_deref(), Some("macos"));
    }

    #[test]
    fn test_dispatch_to_closed_channel_removes_device() {
        let registry = DeviceRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register("laptop-1", None, vec![], tx);
        drop(rx);

        let (watcher, _watch_rx) = mpsc::unbounded_channel();
        let result = registry.dispatch(&action("laptop-1"), watcher);
        assert!(matches!(result, Err(ServerError::DeviceNotConnected(_))));
        assert!(!registry.is_connected("laptop-1"));
    }
}

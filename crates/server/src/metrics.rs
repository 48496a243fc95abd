//! Prometheus metrics
//!
//! Counters for session and task activity, exported at `/metrics`.

use ::metrics::{counter, describe_counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder and describe the metrics. Safe to call
/// more than once; only the first call installs.
pub fn init_metrics() -> Option<&'static PrometheusHandle> {
    let handle = HANDLE.get_or_try_init(|| PrometheusBuilder::new().install_recorder());
    match handle {
        Ok(handle) => {
            describe_counter!("wink_sessions_total", "Client sessions opened");
            describe_counter!("wink_turns_total", "Completed conversation turns");
            describe_counter!("wink_tasks_dispatched_total", "Tasks dispatched to devices");
            describe_counter!("wink_devices_registered_total", "Device registrations");
            describe_counter!("wink_errors_total", "Errors by component");
            Some(handle)
        },
        Err(e) => {
            tracing::warn!(error = %e, "failed to install metrics recorder");
            None
        },
    }
}

pub fn record_session_opened() {
    counter!("wink_sessions_total").increment(1);
    gauge!("wink_sessions_active").increment(1.0);
}

pub fn record_session_closed() {
    gauge!("wink_sessions_active").decrement(1.0);
}

pub fn record_turn() {
    counter!("wink_turns_total").increment(1);
}

pub fn record_task_dispatched() {
    counter!("wink_tasks_dispatched_total").increment(1);
}

pub fn record_device_registered() {
    counter!("wink_devices_registered_total").increment(1);
}

pub fn record_error(component: &'static str) {
    counter!("wink_errors_total", "component" => component).increment(1);
}

/// Render the Prometheus exposition for `/metrics`.
pub async fn metrics_handler() -> String {
    match HANDLE.get() {
        Some(handle) => handle.render(),
        None => String::new(),
    }
}

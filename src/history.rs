//! Append-only history sink: one row per deployment state transition.
//!
//! Grounded in the upstream project's InfluxDB-backed `History.historize`
//! (`pkg/metrics/history.go`), which fires one `go routine` per point write
//! against measurements `deployment_failing` / `deployment_killed`. The
//! time-series database client itself is out of scope (§1); this crate
//! defines the sink trait and ships an in-memory ring implementation that
//! a production binary wires an `influxdb2`-backed sink behind.
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct FailingEvent {
    pub name: String,
    pub namespace: String,
    pub reason: String,
    pub team: String,
    pub slack_channel: String,
    pub cluster: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KilledEvent {
    pub name: String,
    pub namespace: String,
    pub method: String,
    pub team: String,
    pub slack_channel: String,
    pub dry_run: bool,
    pub cluster: String,
}

pub trait HistorySink: Send + Sync {
    fn record_failing(&self, event: FailingEvent);
    fn record_killed(&self, event: KilledEvent);
}

/// Discards every event. Useful when the binary is run without a
/// configured time-series backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHistory;

impl HistorySink for NullHistory {
    fn record_failing(&self, _event: FailingEvent) {}
    fn record_killed(&self, _event: KilledEvent) {}
}

/// Keeps every event in memory. Used by the HTTP debug surface and by
/// tests asserting on emitted history rows.
#[derive(Default)]
pub struct InMemoryHistory {
    failing: Mutex<Vec<FailingEvent>>,
    killed: Mutex<Vec<KilledEvent>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_events(&self) -> Vec<FailingEvent> {
        self.failing.lock().expect("history mutex poisoned").clone()
    }

    pub fn killed_events(&self) -> Vec<KilledEvent> {
        self.killed.lock().expect("history mutex poisoned").clone()
    }
}

impl HistorySink for InMemoryHistory {
    fn record_failing(&self, event: FailingEvent) {
        self.failing.lock().expect("history mutex poisoned").push(event);
    }

    fn record_killed(&self, event: KilledEvent) {
        self.killed.lock().expect("history mutex poisoned").push(event);
    }
}

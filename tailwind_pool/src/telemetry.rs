//! Typed lifecycle and KPI events (§4.G).
//!
//! The core only emits; consumers are decoupled via [`TelemetrySink`]. Nothing here requires a
//! handler to be registered — [`NullSink`] is the default, and [`LogSink`] is the one
//! ready-to-use implementation this crate ships, mirroring how the teacher's `workunit_store`
//! keeps metric *names* centralized in one enum-like surface rather than scattering string
//! literals across call sites.

use std::collections::BTreeMap;

/// One segment of an event path, e.g. `["compile", "start"]` renders as `compile.start`.
pub type EventPath = &'static [&'static str];

pub const COMPILE_START: EventPath = &["compile", "start"];
pub const COMPILE_STOP: EventPath = &["compile", "stop"];
pub const COMPILE_ERROR: EventPath = &["compile", "error"];
pub const POOL_PORT_CREATED: EventPath = &["pool", "port_created"];
pub const POOL_PORT_REUSED: EventPath = &["pool", "port_reused"];
pub const POOL_PORT_TERMINATED: EventPath = &["pool", "port_terminated"];
pub const POOL_EXHAUSTED: EventPath = &["pool", "exhausted"];
pub const MAINTENANCE_CLEANUP_COMPLETED: EventPath = &["maintenance", "cleanup_completed"];
pub const METRICS_SNAPSHOT: EventPath = &["metrics", "snapshot"];

/// A numeric measurement or a string tag attached to an [`Event`].
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Number(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// One emission: an event path plus its measurements and metadata, matching the envelope in the
/// external interfaces section.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub path: EventPath,
    pub measurements: BTreeMap<&'static str, Value>,
    pub metadata: BTreeMap<&'static str, Value>,
}

impl Event {
    pub fn new(path: EventPath) -> Self {
        Event {
            path,
            measurements: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_measurement(mut self, key: &'static str, value: impl Into<Value>) -> Self {
        self.measurements.insert(key, value.into());
        self
    }

    pub fn with_metadata(mut self, key: &'static str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key, value.into());
        self
    }

    pub fn path_str(&self) -> String {
        self.path.join(".")
    }
}

/// Receives events emitted by the pool. Implementations must not block for long; the pool calls
/// this synchronously from its own serializer.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: Event);
}

/// The default sink: discards every event. Used when an embedder hasn't wired up a real one.
#[derive(Default)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn emit(&self, _event: Event) {}
}

/// Logs every event at `debug` via the `log` facade, formatted as `path measurements metadata`.
#[derive(Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn emit(&self, event: Event) {
        log::debug!(
            "{} measurements={:?} metadata={:?}",
            event.path_str(),
            event.measurements,
            event.metadata
        );
    }
}

/// A sink that records every event it's given, for assertions elsewhere in this crate's tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingSink(pub(crate) std::sync::Mutex<Vec<Event>>);

#[cfg(test)]
impl TelemetrySink for RecordingSink {
    fn emit(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_path_renders_dotted() {
        let event = Event::new(COMPILE_START).with_metadata("fingerprint", "abc123");
        assert_eq!(event.path_str(), "compile.start");
    }

    #[test]
    fn recording_sink_observes_emitted_events() {
        let sink = RecordingSink::default();
        sink.emit(Event::new(POOL_PORT_CREATED).with_measurement("pool_size", 1_u64));
        let events = sink.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].path, POOL_PORT_CREATED);
    }
}

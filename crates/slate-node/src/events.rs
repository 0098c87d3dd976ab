use crate::output;
use serde::Serialize;
use slate_protocol::{LogRecord, MeshEvent};
use std::io::Write;

/// Emit a JSONL event to stdout (flushed immediately for piped output).
/// If --jsonl was provided, also writes to that file.
pub fn emit<T: Serialize>(event: &T) {
    if let Ok(json) = serde_json::to_string(event) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let _ = writeln!(lock, "{json}");
        let _ = lock.flush();

        output::write_jsonl_line(&json);
    }
}

/// RFC 3339 UTC timestamp for JSONL events.
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ── Session events ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventStarted {
    pub event: &'static str,
    pub id: String,
    pub namespace: u16,
    pub role: String,
    pub store: String,
    pub timestamp: String,
}

impl EventStarted {
    pub fn new(id: &str, namespace: u16, role: &str, store: &str) -> Self {
        Self {
            event: "started",
            id: id.to_string(),
            namespace,
            role: role.to_string(),
            store: store.to_string(),
            timestamp: now_iso(),
        }
    }
}

#[derive(Serialize)]
pub struct EventStopped {
    pub event: &'static str,
    pub events_seen: u64,
    pub snapshot_saved: Option<bool>,
    pub exported: Option<bool>,
    pub elapsed_s: f64,
    pub timestamp: String,
}

// ── Mesh events ─────────────────────────────────────────────────

/// A mesh event with a wall-clock stamp.
#[derive(Serialize)]
pub struct EventMesh<'a> {
    #[serde(flatten)]
    pub inner: &'a MeshEvent,
    pub timestamp: String,
}

impl<'a> EventMesh<'a> {
    pub fn new(inner: &'a MeshEvent) -> Self {
        Self {
            inner,
            timestamp: now_iso(),
        }
    }
}

#[derive(Serialize)]
pub struct EventLog<'a> {
    pub event: &'static str,
    #[serde(flatten)]
    pub record: &'a LogRecord,
}

impl<'a> EventLog<'a> {
    pub fn new(record: &'a LogRecord) -> Self {
        Self {
            event: "log",
            record,
        }
    }
}

// ── Command results ─────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventSent {
    pub event: &'static str,
    pub message_id: String,
    pub to: Option<String>,
    pub ok: bool,
}

#[derive(Serialize)]
pub struct EventLine<'a> {
    pub event: &'static str,
    pub line: &'a str,
}

#[derive(Serialize)]
pub struct EventDone {
    pub event: &'static str,
    pub op: &'static str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl EventDone {
    pub fn new(op: &'static str, ok: bool) -> Self {
        Self {
            event: "done",
            op,
            ok,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mesh_event_is_flattened() {
        let event = MeshEvent::RoutesChanged { table_size: 3 };
        let json = serde_json::to_value(EventMesh::new(&event)).unwrap();
        assert_eq!(json["event"], "routes_changed");
        assert_eq!(json["table_size"], 3);
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn log_record_is_flattened() {
        let record = LogRecord {
            level: "WARN".into(),
            target: "slate_protocol::node".into(),
            message: "register failed".into(),
        };
        let json = serde_json::to_value(EventLog::new(&record)).unwrap();
        assert_eq!(json["event"], "log");
        assert_eq!(json["level"], "WARN");
        assert_eq!(json["message"], "register failed");
    }

    #[test]
    fn done_detail_is_optional() {
        let json = serde_json::to_string(&EventDone::new("reset", true)).unwrap();
        assert_eq!(json, r#"{"event":"done","op":"reset","ok":true}"#);
    }
}

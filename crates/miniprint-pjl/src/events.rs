// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Session event reporting.
//
// Sessions never log through a process-wide logger.  Every observation is
// turned into an `EventRecord` and handed to an `EventSink` injected at
// construction time.  The sinks here cover the usual deployments:
//
//   - `TracingSink`    -- forwards to `tracing` (console / log file)
//   - `JsonLinesSink`  -- append-only JSON journal for offline analysis
//   - `MemorySink`     -- keeps records in memory (embedding, tests)
//   - `FanoutSink`     -- sends every record to several sinks

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use miniprint_core::error::{MiniprintError, Result};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum CloseReason {
    /// Nothing arrived within the idle timeout.
    IdleTimeout,
    /// Data arrived but framed to zero commands.
    EmptyRequest,
    /// The peer closed the connection (zero-byte read).
    ClientClosed,
    /// The read itself failed.
    ReceiveError(String),
    /// The request was not valid text.
    DecodeError(String),
    /// Writing the response failed.
    SendError(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdleTimeout => write!(f, "idle timeout"),
            Self::EmptyRequest => write!(f, "empty request"),
            Self::ClientClosed => write!(f, "client closed connection - possible port scan"),
            Self::ReceiveError(e) => write!(f, "receive error: {e}"),
            Self::DecodeError(e) => write!(f, "decode error: {e}"),
            Self::SendError(e) => write!(f, "send error: {e}"),
        }
    }
}

/// Something observed during a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SessionEvent {
    ConnectionOpened,
    ConnectionClosed {
        reason: CloseReason,
        /// Requests answered before the close.
        requests: u64,
    },
    RequestReceived {
        /// Payload, lossily decoded.
        raw: String,
        bytes: usize,
        /// SHA-256 of the exact bytes received, hex encoded.
        sha256: String,
    },
    ResponseSent {
        raw: String,
        bytes: usize,
    },
    CommandUnknown {
        verb: String,
        parameters: String,
    },
    HandlerError {
        verb: String,
        detail: String,
    },
}

impl SessionEvent {
    /// Build a `RequestReceived` event for the bytes of one read.
    pub fn request(bytes: &[u8]) -> Self {
        Self::RequestReceived {
            raw: String::from_utf8_lossy(bytes).into_owned(),
            bytes: bytes.len(),
            sha256: hex::encode(Sha256::digest(bytes)),
        }
    }

    pub fn response(raw: &str) -> Self {
        Self::ResponseSent {
            raw: raw.to_string(),
            bytes: raw.len(),
        }
    }
}

/// A `SessionEvent` with the context needed to correlate it.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: Uuid,
    pub peer: SocketAddr,
    #[serde(flatten)]
    pub event: SessionEvent,
}

impl EventRecord {
    pub fn new(session_id: Uuid, peer: SocketAddr, event: SessionEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id,
            peer,
            event,
        }
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Destination for session events.  Shared by every session, so
/// implementations must tolerate concurrent calls.
pub trait EventSink: Send + Sync {
    fn record(&self, record: &EventRecord);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, record: &EventRecord) {
        let session = &record.session_id;
        let peer = &record.peer;
        match &record.event {
            SessionEvent::ConnectionOpened => {
                info!(%session, %peer, "connection opened");
            }
            SessionEvent::ConnectionClosed { reason, requests } => match reason {
                CloseReason::ReceiveError(_)
                | CloseReason::DecodeError(_)
                | CloseReason::SendError(_) => {
                    warn!(%session, %peer, %reason, requests, "connection closed");
                }
                _ => {
                    info!(%session, %peer, %reason, requests, "connection closed");
                }
            },
            SessionEvent::RequestReceived { raw, bytes, sha256 } => {
                debug!(%session, %peer, ?raw, bytes, %sha256, "request received");
            }
            SessionEvent::ResponseSent { raw, bytes } => {
                info!(%session, %peer, ?raw, bytes, "response sent");
            }
            SessionEvent::CommandUnknown { verb, parameters } => {
                warn!(%session, %peer, %verb, ?parameters, "unknown command");
            }
            SessionEvent::HandlerError { verb, detail } => {
                error!(%session, %peer, %verb, %detail, "command handler failed");
            }
        }
    }
}

/// Appends one JSON object per event to a file.
#[derive(Debug)]
pub struct JsonLinesSink {
    file: Mutex<File>,
}

impl JsonLinesSink {
    /// Open (or create) `path` for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| MiniprintError::Journal(format!("open {}: {e}", path.display())))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl EventSink for JsonLinesSink {
    fn record(&self, record: &EventRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to serialize event record");
                return;
            }
        };
        let Ok(mut file) = self.file.lock() else {
            warn!("event journal lock poisoned -- record dropped");
            return;
        };
        if let Err(e) = writeln!(file, "{line}").and_then(|_| file.flush()) {
            warn!(error = %e, "failed to append to event journal");
        }
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<EventRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn records(&self) -> Vec<EventRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Just the events, in order.
    pub fn events(&self) -> Vec<SessionEvent> {
        self.records().into_iter().map(|r| r.event).collect()
    }
}

impl EventSink for MemorySink {
    fn record(&self, record: &EventRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
    }
}

/// Sends each record to every inner sink, in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn record(&self, record: &EventRecord) {
        for sink in &self.sinks {
            sink.record(record);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "192.0.2.7:40000".parse().unwrap()
    }

    #[test]
    fn request_event_fingerprints_payload() {
        let event = SessionEvent::request(b"@PJL INFO ID\r\n");
        let SessionEvent::RequestReceived { raw, bytes, sha256 } = event else {
            panic!("expected RequestReceived");
        };
        assert_eq!(raw, "@PJL INFO ID\r\n");
        assert_eq!(bytes, 14);
        assert_eq!(sha256.len(), 64);
        assert_eq!(
            sha256,
            hex::encode(Sha256::digest(b"@PJL INFO ID\r\n"))
        );
    }

    #[test]
    fn request_event_tolerates_invalid_utf8() {
        let SessionEvent::RequestReceived { raw, bytes, .. } = SessionEvent::request(&[0xff, b'A'])
        else {
            panic!("expected RequestReceived");
        };
        assert_eq!(bytes, 2);
        assert!(raw.ends_with('A'));
    }

    #[test]
    fn record_serializes_flat() {
        let record = EventRecord::new(
            Uuid::nil(),
            peer(),
            SessionEvent::ConnectionClosed {
                reason: CloseReason::IdleTimeout,
                requests: 3,
            },
        );
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["event"], "connection-closed");
        assert_eq!(json["reason"]["kind"], "idle-timeout");
        assert_eq!(json["requests"], 3);
        assert_eq!(json["peer"], "192.0.2.7:40000");
    }

    #[test]
    fn close_reason_display_mentions_scan() {
        assert!(CloseReason::ClientClosed.to_string().contains("possible port scan"));
        assert_eq!(
            CloseReason::DecodeError("bad".into()).to_string(),
            "decode error: bad"
        );
    }

    #[test]
    fn memory_sink_keeps_order() {
        let sink = MemorySink::new();
        sink.record(&EventRecord::new(Uuid::nil(), peer(), SessionEvent::ConnectionOpened));
        sink.record(&EventRecord::new(
            Uuid::nil(),
            peer(),
            SessionEvent::response("@PJL"),
        ));
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], SessionEvent::ConnectionOpened);
        assert!(matches!(events[1], SessionEvent::ResponseSent { bytes: 4, .. }));
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let a = Arc::new(MemorySink::new());
        let b = Arc::new(MemorySink::new());
        let fanout = FanoutSink::new().with(a.clone()).with(b.clone());
        assert_eq!(fanout.len(), 2);

        fanout.record(&EventRecord::new(Uuid::nil(), peer(), SessionEvent::ConnectionOpened));
        assert_eq!(a.events().len(), 1);
        assert_eq!(b.events().len(), 1);
    }

    #[test]
    fn json_lines_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        let sink = JsonLinesSink::open(&path).unwrap();
        sink.record(&EventRecord::new(Uuid::nil(), peer(), SessionEvent::ConnectionOpened));
        sink.record(&EventRecord::new(
            Uuid::nil(),
            peer(),
            SessionEvent::CommandUnknown {
                verb: "SET".into(),
                parameters: "COPIES=2".into(),
            },
        ));
        drop(sink);

        // Reopening appends rather than truncating.
        let sink = JsonLinesSink::open(&path).unwrap();
        sink.record(&EventRecord::new(Uuid::nil(), peer(), SessionEvent::ConnectionOpened));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["event"], "command-unknown");
        assert_eq!(second["verb"], "SET");
    }
}

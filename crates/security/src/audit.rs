//! Audit trail: every dispatched tool call and every turn outcome, on disk.
//!
//! [`AuditLogger`] turns [`DomainEvent`]s into [`AuditEntry`] records and
//! hands them to its sinks. [`DailyFileSink`] appends one JSON object per
//! line to `<dir>/<YYYY-MM-DD>.log`, one file per UTC day.

use chrono::{DateTime, Utc};
use conduit_core::error::ErrorCode;
use conduit_core::event::{DomainEvent, EventBus};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A single audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub event: AuditEvent,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Types of audited events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A tool call went through the dispatcher
    ToolExecution {
        tool_name: String,
        request_id: String,
        duration_ms: u64,
    },
    /// History was evicted from the context window
    ContextCompaction {
        evicted: usize,
        tokens_before: usize,
        tokens_after: usize,
    },
    /// A turn ended, committed or not
    Turn {
        messages_added: usize,
        iterations: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

impl AuditEntry {
    pub fn from_event(event: &DomainEvent) -> Self {
        match event {
            DomainEvent::ToolDispatched {
                session_id,
                request_id,
                tool_name,
                outcome,
                code,
                duration_ms,
                timestamp,
            } => Self {
                timestamp: *timestamp,
                session_id: session_id.clone(),
                event: AuditEvent::ToolExecution {
                    tool_name: tool_name.clone(),
                    request_id: request_id.clone(),
                    duration_ms: *duration_ms,
                },
                outcome: if code.is_none() {
                    AuditOutcome::Success
                } else {
                    AuditOutcome::Failure
                },
                code: *code,
                details: Some(outcome.clone()),
            },
            DomainEvent::ContextCompacted {
                session_id,
                evicted,
                tokens_before,
                tokens_after,
                timestamp,
            } => Self {
                timestamp: *timestamp,
                session_id: session_id.clone(),
                event: AuditEvent::ContextCompaction {
                    evicted: *evicted,
                    tokens_before: *tokens_before,
                    tokens_after: *tokens_after,
                },
                outcome: AuditOutcome::Success,
                code: None,
                details: None,
            },
            DomainEvent::TurnCompleted {
                session_id,
                messages_added,
                token_count,
                iterations,
                timestamp,
            } => Self {
                timestamp: *timestamp,
                session_id: session_id.clone(),
                event: AuditEvent::Turn {
                    messages_added: *messages_added,
                    iterations: *iterations,
                },
                outcome: AuditOutcome::Success,
                code: None,
                details: Some(format!("token_count={token_count}")),
            },
            DomainEvent::TurnFailed {
                session_id,
                code,
                message,
                timestamp,
            } => Self {
                timestamp: *timestamp,
                session_id: session_id.clone(),
                event: AuditEvent::Turn {
                    messages_added: 0,
                    iterations: 0,
                },
                outcome: AuditOutcome::Failure,
                code: Some(*code),
                details: Some(message.clone()),
            },
        }
    }
}

/// Where audit entries are written.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// Appends JSONL to one file per UTC day.
pub struct DailyFileSink {
    dir: PathBuf,
    // Serializes appends from concurrent recorders.
    write_lock: Mutex<()>,
}

impl DailyFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The file entries stamped at `at` go to.
    pub fn path_for(&self, at: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!("{}.log", at.format("%Y-%m-%d")))
    }

    fn append(&self, entry: &AuditEntry) -> std::io::Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(entry.timestamp))?;
        file.write_all(line.as_bytes())
    }
}

impl AuditSink for DailyFileSink {
    fn record(&self, entry: &AuditEntry) {
        if let Err(e) = self.append(entry) {
            warn!(dir = %self.dir.display(), error = %e, "Failed to write audit entry");
        }
    }
}

/// Mirrors audit entries into the tracing output.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditEntry) {
        debug!(
            session_id = %entry.session_id,
            outcome = ?entry.outcome,
            code = ?entry.code,
            "AUDIT: {:?}",
            entry.event
        );
    }
}

/// Fans audit entries out to its sinks.
#[derive(Default)]
pub struct AuditLogger {
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl AuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: impl AuditSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn record(&self, event: &DomainEvent) {
        let entry = AuditEntry::from_event(event);
        for sink in &self.sinks {
            sink.record(&entry);
        }
    }

    /// Record every event published on `bus` until all publishers are gone.
    ///
    /// Await the handle after dropping the last publisher to flush.
    pub fn attach(self, bus: &EventBus) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => self.record(&event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Audit log fell behind; events were dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            info!("Audit log detached");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn failed_turn(at: DateTime<Utc>) -> DomainEvent {
        DomainEvent::TurnFailed {
            session_id: "s1".into(),
            code: ErrorCode::Cancelled,
            message: "turn cancelled".into(),
            timestamp: at,
        }
    }

    fn dispatched(code: Option<ErrorCode>) -> DomainEvent {
        DomainEvent::ToolDispatched {
            session_id: "s1".into(),
            request_id: "call_1".into(),
            tool_name: "file_read".into(),
            outcome: if code.is_some() {
                "recoverable_error".into()
            } else {
                "success".into()
            },
            code,
            duration_ms: 4,
            timestamp: Utc::now(),
        }
    }

    fn read_lines(path: &Path) -> Vec<AuditEntry> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    struct Collect(Arc<Mutex<Vec<AuditEntry>>>);

    impl AuditSink for Collect {
        fn record(&self, entry: &AuditEntry) {
            self.0.lock().unwrap().push(entry.clone());
        }
    }

    #[test]
    fn tool_failures_carry_their_code() {
        let entry = AuditEntry::from_event(&dispatched(Some(ErrorCode::FileNotFound)));
        assert_eq!(entry.outcome, AuditOutcome::Failure);
        assert_eq!(entry.code, Some(ErrorCode::FileNotFound));
        assert_eq!(
            entry.event,
            AuditEvent::ToolExecution {
                tool_name: "file_read".into(),
                request_id: "call_1".into(),
                duration_ms: 4,
            }
        );

        let ok = AuditEntry::from_event(&dispatched(None));
        assert_eq!(ok.outcome, AuditOutcome::Success);
        assert_eq!(ok.details.as_deref(), Some("success"));
    }

    #[test]
    fn daily_file_gets_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DailyFileSink::new(dir.path().join("logs")).unwrap();
        let day = Utc.with_ymd_and_hms(2026, 3, 14, 23, 59, 0).unwrap();
        let next_day = Utc.with_ymd_and_hms(2026, 3, 15, 0, 1, 0).unwrap();

        let logger = AuditLogger::new().with_sink(sink);
        logger.record(&failed_turn(day));
        logger.record(&failed_turn(day));
        logger.record(&failed_turn(next_day));

        let first = read_lines(&dir.path().join("logs/2026-03-14.log"));
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].code, Some(ErrorCode::Cancelled));
        assert_eq!(first[0].details.as_deref(), Some("turn cancelled"));
        assert_eq!(read_lines(&dir.path().join("logs/2026-03-15.log")).len(), 1);
    }

    #[test]
    fn entry_json_shape() {
        let entry = AuditEntry::from_event(&dispatched(None));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["event"]["type"], "tool_execution");
        assert_eq!(json["outcome"], "success");
        assert!(json.get("code").is_none());
    }

    #[tokio::test]
    async fn attached_logger_drains_the_bus() {
        let bus = EventBus::new(16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handle = AuditLogger::new()
            .with_sink(Collect(seen.clone()))
            .with_sink(TracingSink)
            .attach(&bus);

        bus.publish(dispatched(None));
        bus.publish(failed_turn(Utc::now()));
        drop(bus);
        handle.await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[0].event, AuditEvent::ToolExecution { .. }));
        assert_eq!(seen[1].outcome, AuditOutcome::Failure);
    }
}

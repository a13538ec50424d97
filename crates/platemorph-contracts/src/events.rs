use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::bail;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::assets::AspectRatio;
use crate::attributes::AttributeSelection;

/// Everything a workspace reports about its lifecycle. Serialized with the
/// variant name in `type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkspaceEvent {
    WorkspaceHydrated {
        restored: Vec<String>,
        state: String,
    },
    SlotFilled {
        slot: String,
        name: String,
        aspect_ratio: AspectRatio,
    },
    SlotCleared {
        slot: String,
    },
    SlotsSwapped {
        reference: Option<String>,
        target: Option<String>,
    },
    SelectionChanged {
        attributes: AttributeSelection,
    },
    GenerationStarted {
        ticket: u64,
        attributes: AttributeSelection,
        aspect_ratio: AspectRatio,
    },
    GenerationSucceeded {
        ticket: u64,
        timestamp: i64,
    },
    GenerationFailed {
        ticket: u64,
        error_kind: String,
        message: String,
        retryable: bool,
    },
    GenerationDiscarded {
        ticket: u64,
        reason: String,
    },
    WorkspaceReset {
        discarded_generation: bool,
    },
}

impl WorkspaceEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            WorkspaceEvent::WorkspaceHydrated { .. } => "workspace_hydrated",
            WorkspaceEvent::SlotFilled { .. } => "slot_filled",
            WorkspaceEvent::SlotCleared { .. } => "slot_cleared",
            WorkspaceEvent::SlotsSwapped { .. } => "slots_swapped",
            WorkspaceEvent::SelectionChanged { .. } => "selection_changed",
            WorkspaceEvent::GenerationStarted { .. } => "generation_started",
            WorkspaceEvent::GenerationSucceeded { .. } => "generation_succeeded",
            WorkspaceEvent::GenerationFailed { .. } => "generation_failed",
            WorkspaceEvent::GenerationDiscarded { .. } => "generation_discarded",
            WorkspaceEvent::WorkspaceReset { .. } => "workspace_reset",
        }
    }
}

/// Appends one compact JSON line per [`WorkspaceEvent`], stamped with the
/// session id and an RFC 3339 `ts`. Clones share the file lock.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventLog>,
}

#[derive(Debug)]
struct EventLog {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventLog {
                path: path.into(),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn emit(&self, event: &WorkspaceEvent) -> anyhow::Result<Value> {
        let Value::Object(mut record) = serde_json::to_value(event)? else {
            bail!("{} did not serialize to an object", event.event_type());
        };
        record.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        record.insert(
            "ts".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
        );
        let line = serde_json::to_string(&record)?;

        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        writeln!(file, "{line}")?;
        Ok(Value::Object(record))
    }
}

/// Reads back a session log, skipping lines that are not JSON objects.
pub fn read_events(path: &Path) -> anyhow::Result<Vec<Value>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter(Value::is_object)
        .collect())
}

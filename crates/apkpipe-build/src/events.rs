use std::sync::{Arc, Mutex};

use apkpipe_toolchain::{LogLevel, LogSink, TracingLog};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::stage::Stage;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Started,
    Succeeded,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildEvent {
    Log { level: LogLevel, message: String },
    Stage { stage: Stage, status: StageStatus },
    Progress { percent: u32 },
}

/// Receives pipeline progress. Implementations must not block for long; they
/// are called inline between stages.
pub trait EventSink: LogSink {
    fn on_stage(&self, stage: Stage, status: StageStatus);
    fn on_progress(&self, percent: u32);
}

/// Emits everything through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, message: &str) {
        TracingLog.log(level, message);
    }
}

impl EventSink for TracingSink {
    fn on_stage(&self, stage: Stage, status: StageStatus) {
        info!(stage = stage.number(), ?status, "{}", stage.label());
    }

    fn on_progress(&self, percent: u32) {
        debug!("build progress {percent}%");
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _level: LogLevel, _message: &str) {}
}

impl EventSink for NullSink {
    fn on_stage(&self, _stage: Stage, _status: StageStatus) {}
    fn on_progress(&self, _percent: u32) {}
}

/// Forwards events to a channel so a front end can consume them on its own
/// task. Events are dropped once the receiver is gone.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<BuildEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BuildEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl LogSink for ChannelSink {
    fn log(&self, level: LogLevel, message: &str) {
        let _ = self.tx.send(BuildEvent::Log {
            level,
            message: message.to_string(),
        });
    }
}

impl EventSink for ChannelSink {
    fn on_stage(&self, stage: Stage, status: StageStatus) {
        let _ = self.tx.send(BuildEvent::Stage { stage, status });
    }

    fn on_progress(&self, percent: u32) {
        let _ = self.tx.send(BuildEvent::Progress { percent });
    }
}

/// Per-run log: keeps every line for the `BuildResult` and forwards to the
/// caller's sink.
pub(crate) struct BuildLog {
    lines: Mutex<Vec<String>>,
    sink: Arc<dyn EventSink>,
}

impl BuildLog {
    pub(crate) fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            lines: Mutex::new(Vec::new()),
            sink,
        }
    }

    pub(crate) fn stage(&self, stage: Stage, status: StageStatus) {
        self.sink.on_stage(stage, status);
    }

    pub(crate) fn progress(&self, percent: u32) {
        self.sink.on_progress(percent);
    }

    pub(crate) fn into_lines(self) -> Vec<String> {
        self.lines
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LogSink for BuildLog {
    fn log(&self, level: LogLevel, message: &str) {
        let line = match level {
            LogLevel::Info => message.to_string(),
            LogLevel::Warn => format!("Warning: {message}"),
            LogLevel::Error => format!("Error: {message}"),
        };
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line);
        self.sink.log(level, message);
    }
}

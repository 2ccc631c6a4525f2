//! Structured trace of scheduling decisions, optionally mirrored to a JSON-lines file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::core::common::{HostId, MigrationAction};
use crate::core::planner::SchedulerState;
use crate::negotiation::message::RoundId;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum TraceEntry {
    PlanComputed {
        time: f64,
        state: SchedulerState,
        overloaded: usize,
        migrations: Vec<MigrationAction>,
    },
    RoundStarted {
        time: f64,
        node: HostId,
        round: RoundId,
        excess: f64,
    },
    OfferReceived {
        time: f64,
        node: HostId,
        round: RoundId,
        from: HostId,
        slack: f64,
    },
    BusyReceived {
        time: f64,
        node: HostId,
        round: RoundId,
        from: HostId,
    },
    RoundCommitted {
        time: f64,
        node: HostId,
        round: RoundId,
        migrations: Vec<MigrationAction>,
    },
    RoundAborted {
        time: f64,
        node: HostId,
        round: RoundId,
        reason: String,
    },
    RoundCompleted {
        time: f64,
        node: HostId,
        round: RoundId,
    },
    MigrationApplied {
        time: f64,
        action: MigrationAction,
    },
    MigrationRejected {
        time: f64,
        action: MigrationAction,
        reason: String,
    },
    MessageDropped {
        time: f64,
        src: String,
        dst: String,
        tip: String,
    },
    MalformedMessage {
        time: f64,
        node: HostId,
        tip: String,
        error: String,
    },
    HostCrashed {
        time: f64,
        node: HostId,
    },
    HostRecovered {
        time: f64,
        node: HostId,
    },
}

pub struct TraceLog {
    log_file: Option<File>,
    entries: Vec<TraceEntry>,
}

impl TraceLog {
    pub fn new() -> Self {
        Self {
            log_file: None,
            entries: Vec::new(),
        }
    }

    pub fn with_log_file(log_path: &Path) -> std::io::Result<Self> {
        let log_file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(log_path)?;
        Ok(Self {
            log_file: Some(log_file),
            entries: Vec::new(),
        })
    }

    pub fn log(&mut self, entry: TraceEntry) {
        if let Some(log_file) = self.log_file.as_mut() {
            let written = serde_json::to_string(&entry)
                .map_err(std::io::Error::from)
                .and_then(|line| writeln!(log_file, "{}", line));
            if let Err(e) = written {
                log::warn!(target: "trace", "Can't write trace file, disabling it: {}", e);
                self.log_file = None;
            }
        }
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &Vec<TraceEntry> {
        &self.entries
    }
}

impl Default for TraceLog {
    fn default() -> Self {
        Self::new()
    }
}

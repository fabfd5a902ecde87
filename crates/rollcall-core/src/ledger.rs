//! Append-only attendance ledger backed by a two-column CSV file.
//!
//! Line 1 is always `Name,Time`; every other line is `IDENTITY,HH:MM:SS`.
//! Identities are written verbatim, without quoting.

use chrono::{Local, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const LEDGER_HEADER: &str = "Name,Time";
const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("attendance file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// When the in-memory seen-set is reconciled against the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupPolicy {
    /// Read the file once, on the first write of the run.
    OncePerRun,
    /// Re-read the file before every write.
    EveryWrite,
}

impl FromStr for DedupPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once-per-run" | "once" => Ok(Self::OncePerRun),
            "every-write" | "always" => Ok(Self::EveryWrite),
            other => Err(format!("unknown dedup policy {other:?} (expected once-per-run or every-write)")),
        }
    }
}

/// Outcome of [`Ledger::record_if_new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// A new line was appended with this time of day.
    Appended(NaiveTime),
    /// The identity was already in the file; nothing was written.
    AlreadyRecorded,
}

/// Deduplicated attendance record for one session.
pub struct Ledger {
    path: PathBuf,
    policy: DedupPolicy,
    seen: HashSet<String>,
    loaded: bool,
    /// Identities confirmed present this run, in first-seen order.
    marked: Vec<String>,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>, policy: DedupPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
            seen: HashSet::new(),
            loaded: false,
            marked: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the header line if the file is missing or empty.
    pub fn ensure_initialized(&self) -> Result<(), LedgerError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io(e))?;
        let len = file.metadata().map_err(|e| self.io(e))?.len();
        if len > 0 {
            return Ok(());
        }
        writeln!(file, "{LEDGER_HEADER}").map_err(|e| self.io(e))?;
        tracing::info!(path = %self.path.display(), "initialised attendance file");
        Ok(())
    }

    /// Append `identity` with the current local time unless it is already recorded.
    pub fn record_if_new(&mut self, identity: &str) -> Result<RecordOutcome, LedgerError> {
        self.record_at(identity, Local::now().time())
    }

    /// Same as [`record_if_new`](Self::record_if_new) with an explicit time of day.
    pub fn record_at(&mut self, identity: &str, time: NaiveTime) -> Result<RecordOutcome, LedgerError> {
        self.ensure_initialized()?;
        if !self.loaded || self.policy == DedupPolicy::EveryWrite {
            self.seen = self.read_identities()?;
            self.loaded = true;
        }

        if self.seen.contains(identity) {
            self.mark(identity);
            return Ok(RecordOutcome::AlreadyRecorded);
        }

        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io(e))?;
        writeln!(file, "{identity},{}", time.format(TIME_FORMAT)).map_err(|e| self.io(e))?;
        self.seen.insert(identity.to_string());
        self.mark(identity);

        tracing::info!(identity, time = %time.format(TIME_FORMAT), "attendance marked");
        Ok(RecordOutcome::Appended(time))
    }

    fn mark(&mut self, identity: &str) {
        if !self.marked.iter().any(|m| m == identity) {
            self.marked.push(identity.to_string());
        }
    }

    /// Identities confirmed present during this run, in first-seen order.
    pub fn marked(&self) -> &[String] {
        &self.marked
    }

    /// Current file contents, or `None` if the file has not been created.
    pub fn contents(&self) -> Result<Option<String>, LedgerError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io(e)),
        }
    }

    /// First column of every line after the header.
    fn read_identities(&self) -> Result<HashSet<String>, LedgerError> {
        let file = File::open(&self.path).map_err(|e| self.io(e))?;
        let mut names = HashSet::new();
        for line in BufReader::new(file).lines().skip(1) {
            let line = line.map_err(|e| self.io(e))?;
            let name = line.split(',').next().unwrap_or_default().trim();
            if !name.is_empty() {
                names.insert(name.to_string());
            }
        }
        Ok(names)
    }

    fn io(&self, source: std::io::Error) -> LedgerError {
        LedgerError::Io { path: self.path.clone(), source }
    }
}

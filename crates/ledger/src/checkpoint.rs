//! Append-only checkpoint file for out-of-band tamper detection.

use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tracing::warn;

/// Chain head at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub ts: DateTime<Utc>,
    /// `None` when the chain was empty.
    pub head_id: Option<i64>,
    pub head_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointReport {
    pub checked: usize,
    pub mismatched: Vec<Checkpoint>,
    pub unreadable_lines: usize,
}

impl CheckpointReport {
    pub fn is_valid(&self) -> bool {
        self.mismatched.is_empty() && self.unreadable_lines == 0
    }
}

pub(crate) fn append(path: &Path, checkpoint: &Checkpoint) -> Result<(), LedgerError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", serde_json::to_string(checkpoint)?)?;
    file.sync_all()?;
    Ok(())
}

/// Every readable checkpoint plus the number of lines that failed to parse.
pub(crate) fn read_all(path: &Path) -> Result<(Vec<Checkpoint>, usize), LedgerError> {
    if !path.exists() {
        return Ok((Vec::new(), 0));
    }
    let reader = BufReader::new(File::open(path)?);
    let mut checkpoints = Vec::new();
    let mut unreadable = 0;
    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Checkpoint>(&line) {
            Ok(checkpoint) => checkpoints.push(checkpoint),
            Err(e) => {
                warn!("Unreadable checkpoint at line {}: {}", line_num + 1, e);
                unreadable += 1;
            }
        }
    }
    Ok((checkpoints, unreadable))
}

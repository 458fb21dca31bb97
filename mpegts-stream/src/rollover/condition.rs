//! Conditions that close the current chunk.

use std::time::Duration;

use serde::Serialize;

/// Progress of the chunk being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkProgress {
    pub bytes: u64,
    /// Time since the first datagram of the chunk.
    pub elapsed: Duration,
    /// Time since the most recent datagram.
    pub idle: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RolloverCondition {
    ByteCount { bytes: u64 },
    ElapsedTime { after: Duration },
    /// No datagram for the given duration. Only ever satisfied by the timer.
    Idle { after: Duration },
    Any(Vec<RolloverCondition>),
}

impl RolloverCondition {
    pub fn is_satisfied(&self, progress: &ChunkProgress) -> bool {
        if progress.bytes == 0 {
            return false;
        }
        match self {
            RolloverCondition::ByteCount { bytes } => progress.bytes >= *bytes,
            RolloverCondition::ElapsedTime { after } => progress.elapsed >= *after,
            RolloverCondition::Idle { after } => progress.idle >= *after,
            RolloverCondition::Any(conditions) => {
                conditions.iter().any(|c| c.is_satisfied(progress))
            }
        }
    }

    /// Human readable description for logs.
    pub fn describe(&self) -> String {
        match self {
            RolloverCondition::ByteCount { bytes } => format!("{} bytes", bytes),
            RolloverCondition::ElapsedTime { after } => format!("{} ms elapsed", after.as_millis()),
            RolloverCondition::Idle { after } => format!("{} ms idle", after.as_millis()),
            RolloverCondition::Any(conditions) => conditions
                .iter()
                .map(RolloverCondition::describe)
                .collect::<Vec<_>>()
                .join(" or "),
        }
    }
}

//! Agency job queue.
//!
//! Long-running cluster operations (shard moves, server cleanout) run as
//! jobs that travel through `Target/ToDo` -> `Target/Pending` ->
//! `Target/Finished` (or `Target/Failed`) in the agency. Callers poll
//! `queryAgencyJob` with the job id until it leaves the active states.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    ToDo,
    Pending,
    Finished,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::ToDo => "ToDo",
            JobState::Pending => "Pending",
            JobState::Finished => "Finished",
            JobState::Failed => "Failed",
        }
    }

    /// Agency subtree the job record lives under while in this state.
    pub fn path(&self) -> &'static str {
        match self {
            JobState::ToDo => "Target/ToDo",
            JobState::Pending => "Target/Pending",
            JobState::Finished => "Target/Finished",
            JobState::Failed => "Target/Failed",
        }
    }

    pub fn all() -> [JobState; 4] {
        [
            JobState::ToDo,
            JobState::Pending,
            JobState::Finished,
            JobState::Failed,
        ]
    }
}

/// One proposed or executing shard move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveShardJob {
    pub database: String,
    pub collection: String,
    pub shard: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "isLeader")]
    pub is_leader: bool,
}

impl MoveShardJob {
    pub fn to_value(&self) -> Value {
        json!({
            "type": "moveShard",
            "database": self.database,
            "collection": self.collection,
            "shard": self.shard,
            "from": self.from,
            "to": self.to,
            "isLeader": self.is_leader,
        })
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_job_round_trip() {
        let job = MoveShardJob {
            database: "_system".into(),
            collection: "users".into(),
            shard: "s0002".into(),
            from: "PRMR-1".into(),
            to: "PRMR-2".into(),
            is_leader: true,
        };
        let value = job.to_value();
        assert_eq!(value["isLeader"], true);
        assert_eq!(MoveShardJob::from_value(&value), Some(job));
    }
}

use std::{collections::HashSet, fs, path::Path, path::PathBuf, time::Duration};

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::NodeError;
use crate::membership::Member;
use crate::protocol::NodeId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub members: Vec<Member>,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub questions_path: Option<PathBuf>,
}

/// All intervals in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub probe_interval_ms: u64,
    pub liveness_window_ms: u64,
    pub rpc_timeout_ms: u64,
    pub commit_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            election_timeout_min_ms: 1500,
            election_timeout_max_ms: 3000,
            heartbeat_interval_ms: 500,
            probe_interval_ms: 500,
            liveness_window_ms: 1500,
            rpc_timeout_ms: 500,
            commit_timeout_ms: 5000,
        }
    }
}

impl TimingConfig {
    pub fn election_timeout_min(&self) -> Duration {
        Duration::from_millis(self.election_timeout_min_ms)
    }

    pub fn election_timeout_max(&self) -> Duration {
        Duration::from_millis(self.election_timeout_max_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.liveness_window_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }
}

impl ClusterConfig {
    pub fn load(path: &Path) -> Result<Self, NodeError> {
        let raw = fs::read_to_string(path)?;
        let config: ClusterConfig = serde_json::from_str(&raw)?;
        info!(
            "Loaded cluster config from {} with {} members",
            path.display(),
            config.members.len()
        );
        Ok(config)
    }

    /// Checks the config is usable by node `local`.
    pub fn validate(&self, local: &NodeId) -> Result<(), NodeError> {
        if self.members.is_empty() {
            return Err(NodeError::Config("member list is empty".to_owned()));
        }
        let mut seen = HashSet::new();
        for member in &self.members {
            if !seen.insert(&member.id) {
                return Err(NodeError::Config(format!("duplicate member id {}", member.id)));
            }
        }
        if !seen.contains(local) {
            return Err(NodeError::Config(format!("{local} is not a cluster member")));
        }
        let timing = &self.timing;
        if timing.election_timeout_min_ms > timing.election_timeout_max_ms {
            return Err(NodeError::Config(
                "election_timeout_min_ms exceeds election_timeout_max_ms".to_owned(),
            ));
        }
        if timing.heartbeat_interval_ms >= timing.election_timeout_min_ms {
            return Err(NodeError::Config(
                "heartbeat_interval_ms must be below election_timeout_min_ms".to_owned(),
            ));
        }
        Ok(())
    }
}

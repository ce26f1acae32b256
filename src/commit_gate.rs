//! Commit gating on untracked drift.

use clap::ValueEnum;
use provenance_store::{CommitOverride, ParitySnapshot};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum CommitPolicy {
    /// Refuse commits while drift files exist, unless overridden.
    #[default]
    BlockOnDrift,
    /// Allow, but log the drift.
    Warn,
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "camelCase")]
pub enum CommitDecision {
    Allow,
    AllowWithOverride {
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    Block {
        drift_files: Vec<String>,
    },
}

impl CommitDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Block { .. })
    }
}

/// Whether a commit under `policy` can only proceed with an override.
#[must_use]
pub fn requires_override(parity: &ParitySnapshot, policy: CommitPolicy) -> bool {
    policy == CommitPolicy::BlockOnDrift && !parity.drift_files.is_empty()
}

pub fn evaluate(
    parity: &ParitySnapshot,
    policy: CommitPolicy,
    granted: Option<&CommitOverride>,
) -> CommitDecision {
    if parity.drift_files.is_empty() {
        return CommitDecision::Allow;
    }

    match policy {
        CommitPolicy::Off => CommitDecision::Allow,
        CommitPolicy::Warn => {
            tracing::warn!(
                drift = parity.drift_files.len(),
                "committing with untracked changes"
            );
            CommitDecision::Allow
        }
        CommitPolicy::BlockOnDrift => match granted {
            Some(granted) => CommitDecision::AllowWithOverride {
                reason: granted.reason.clone(),
            },
            None => CommitDecision::Block {
                drift_files: parity.drift_files.clone(),
            },
        },
    }
}

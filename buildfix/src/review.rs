//! Human review of proposed patches.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::feedback::classifier::ErrorGroup;
use crate::patch::Patch;

/// What the reviewer is shown. `error_group` is `None` for initial
/// modernization patches that were not triggered by a build error.
#[derive(Debug, Clone, Copy)]
pub struct ReviewRequest<'a> {
    pub patch: &'a Patch,
    pub error_group: Option<&'a ErrorGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "decision", content = "content")]
pub enum ReviewDecision {
    Approve,
    Reject,
    /// Apply this content instead of the proposal.
    EditAndApprove(String),
}

#[async_trait]
pub trait ReviewCollaborator: Send + Sync {
    async fn review(&self, request: &ReviewRequest<'_>) -> ReviewDecision;
}

/// Approves everything (`--auto-approve`).
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

#[async_trait]
impl ReviewCollaborator for AutoApprove {
    async fn review(&self, request: &ReviewRequest<'_>) -> ReviewDecision {
        tracing::info!(file = %request.patch.target_file.display(), "Auto-approving patch");
        ReviewDecision::Approve
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_auto_approve() {
        let patch = Patch::new("A.java", "a\n", "b\n");
        let decision = AutoApprove
            .review(&ReviewRequest {
                patch: &patch,
                error_group: None,
            })
            .await;
        assert_eq!(decision, ReviewDecision::Approve);
    }

    #[test]
    fn test_decision_serde() {
        let json = serde_json::to_string(&ReviewDecision::EditAndApprove("x".into())).unwrap();
        assert_eq!(json, r#"{"decision":"edit_and_approve","content":"x"}"#);
    }
}

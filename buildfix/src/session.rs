//! One upgrade session: initial modernization patches, then the fix loop.
//!
//! Initial patches come from outside the loop (a plan file or an external
//! analyzer). They pass the same scope check, review and patch engine as
//! loop-generated fixes and are included in rollback.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FixLoopResult;
use crate::feedback::fix_loop::{FixLoop, FixLoopReport, LoopOutcome};
use crate::patch::{AppliedPatch, Patch};
use crate::review::{ReviewDecision, ReviewRequest};

/// An initial patch that was not applied, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedPatch {
    pub target_file: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    /// Initial patches as received (dry run) or as offered for review.
    pub planned: Vec<Patch>,
    /// Initial patches written to disk.
    pub initial_applied: usize,
    pub skipped: Vec<SkippedPatch>,
    /// Initial patches whose file changed since the plan was made.
    pub conflicts: Vec<PathBuf>,
    /// `None` for a dry run.
    pub fix_loop: Option<FixLoopReport>,
}

impl SessionReport {
    pub fn outcome(&self) -> Option<LoopOutcome> {
        self.fix_loop.as_ref().map(|r| r.outcome)
    }
}

pub struct Session {
    id: Uuid,
    fix_loop: FixLoop,
    dry_run: bool,
}

impl Session {
    pub fn new(fix_loop: FixLoop) -> Self {
        Self {
            id: Uuid::new_v4(),
            fix_loop,
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn fix_loop(&self) -> &FixLoop {
        &self.fix_loop
    }

    pub async fn run(&self, initial_patches: Vec<Patch>) -> FixLoopResult<SessionReport> {
        let mut report = SessionReport {
            id: self.id,
            started_at: Utc::now(),
            dry_run: self.dry_run,
            planned: Vec::new(),
            initial_applied: 0,
            skipped: Vec::new(),
            conflicts: Vec::new(),
            fix_loop: None,
        };

        tracing::info!(
            session = %self.id,
            dry_run = self.dry_run,
            initial = initial_patches.len(),
            "Starting upgrade session"
        );

        if self.dry_run {
            for patch in &initial_patches {
                tracing::info!(file = %patch.target_file.display(), "Planned patch (dry run)");
            }
            report.planned = initial_patches;
            return Ok(report);
        }

        let applied = self.apply_initial(&initial_patches, &mut report).await?;
        report.initial_applied = applied.len();
        report.planned = initial_patches;

        report.fix_loop = Some(self.fix_loop.run_seeded(applied).await?);
        Ok(report)
    }

    async fn apply_initial(
        &self,
        patches: &[Patch],
        report: &mut SessionReport,
    ) -> FixLoopResult<Vec<AppliedPatch>> {
        let engine = self.fix_loop.engine();
        let mut applied = Vec::new();

        for patch in patches {
            if self.fix_loop.cancellation().is_cancelled() {
                break;
            }
            let skip = |reason: String| SkippedPatch {
                target_file: patch.target_file.clone(),
                reason,
            };

            if let Some(reason) = self.fix_loop.scope().exclusion_reason(&patch.target_file) {
                tracing::info!(file = %patch.target_file.display(), %reason, "Initial patch out of scope");
                report.skipped.push(skip(reason));
                continue;
            }
            if patch.is_noop() {
                report.skipped.push(skip("patch makes no change".to_string()));
                continue;
            }

            let request = ReviewRequest {
                patch,
                error_group: None,
            };
            let cancel = self.fix_loop.cancellation();
            let decision = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                decision = self.fix_loop.reviewer().review(&request) => decision,
            };
            let patch = match decision {
                ReviewDecision::Approve => patch.clone(),
                ReviewDecision::Reject if cancel.is_cancelled() => break,
                ReviewDecision::Reject => {
                    report.skipped.push(skip("rejected by reviewer".to_string()));
                    continue;
                }
                ReviewDecision::EditAndApprove(content) => patch.with_proposed(content),
            };

            match engine.apply(&patch) {
                Ok(done) => applied.push(done),
                Err(e) if e.is_conflict() => {
                    tracing::warn!(file = %patch.target_file.display(), "Initial patch conflicts with file on disk");
                    report.conflicts.push(patch.target_file.clone());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(applied)
    }
}

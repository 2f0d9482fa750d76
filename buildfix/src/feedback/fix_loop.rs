//! Fix Loop Controller: build, parse, classify, request fixes, apply, repeat.
//!
//! One run walks the [`FixLoopMachine`] from `Idle` to a terminal state:
//!
//! 1. build; exit 0 ends the run `Done`
//! 2. parse the output (a failed build with nothing recognizable yields one
//!    unattributed error) and classify it
//! 3. any non-actionable error ends the run `Aborted`; they are surfaced
//! 4. each actionable group with budget left gets fix requests until a patch
//!    is applied or its budget is spent; rejected and empty proposals are
//!    retried straight away with the reason fed back into the prompt
//! 5. at least one patch applied → next build, otherwise `Exhausted`
//!
//! Builds are capped by `max_build_cycles`, fix requests per group by
//! `max_attempts`. Cancellation is checked before every build and every fix
//! request, and interrupts a running build or request.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::FixLoopConfig;
use crate::error::{ConfigError, FailureKind, FixLoopResult};
use crate::feedback::build_runner::{detect_build_command, BuildAttempt, BuildExit, BuildRequest, BuildRunner};
use crate::feedback::classifier::{ErrorClassifier, ErrorGroup, NonActionable};
use crate::feedback::error_parser::{BuildError, ErrorKind, ErrorParser};
use crate::fix_request::{FixRequest, FixRequester};
use crate::patch::{AppliedPatch, Patch, PatchEngine};
use crate::review::{ReviewCollaborator, ReviewDecision, ReviewRequest};
use crate::scope::Scope;
use crate::state_machine::{FixLoopMachine, FixLoopState, TransitionRecord};

// ── Records ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixOutcome {
    Pending,
    Applied,
    Rejected,
    Exhausted,
    /// The file changed on disk before the fix could be written.
    Conflicted,
}

/// Fix history of one error group across the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixAttemptRecord {
    pub group_key: String,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub last_outcome: FixOutcome,
    /// Error kinds that were part of at least one fix request.
    #[serde(default)]
    pub tried_kinds: Vec<ErrorKind>,
}

impl FixAttemptRecord {
    pub fn new(group_key: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            group_key: group_key.into(),
            attempt_count: 0,
            max_attempts,
            last_outcome: FixOutcome::Pending,
            tried_kinds: Vec::new(),
        }
    }

    /// Whether a fix request has already covered an error of `kind`.
    pub fn tried(&self, kind: ErrorKind) -> bool {
        self.tried_kinds.contains(&kind)
    }

    /// Exhausted: no budget left and not already closed out.
    fn mark_exhausted(&mut self) -> bool {
        if matches!(self.last_outcome, FixOutcome::Exhausted | FixOutcome::Conflicted) {
            return false;
        }
        self.last_outcome = FixOutcome::Exhausted;
        true
    }

    pub fn remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt_count)
    }

    /// Whether the loop may still request fixes for this group.
    pub fn can_request(&self) -> bool {
        self.remaining() > 0
            && !matches!(
                self.last_outcome,
                FixOutcome::Exhausted | FixOutcome::Conflicted
            )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopOutcome {
    Done,
    Exhausted,
    Aborted,
}

impl std::fmt::Display for LoopOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Done => write!(f, "done"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// One occurrence from the failure taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopEvent {
    pub cycle: u32,
    pub kind: FailureKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_key: Option<String>,
    pub detail: String,
}

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixLoopReport {
    pub outcome: LoopOutcome,
    pub reason: String,
    pub history: Vec<BuildAttempt>,
    /// In order of first appearance.
    pub records: Vec<FixAttemptRecord>,
    /// Patches written by this run (and any seeded before it), oldest first.
    pub applied: Vec<AppliedPatch>,
    pub conflicts: Vec<PathBuf>,
    pub surfaced: Vec<NonActionable>,
    /// Errors from the last parsed build.
    pub remaining_errors: Vec<BuildError>,
    pub events: Vec<LoopEvent>,
    pub transitions: Vec<TransitionRecord>,
    pub rolled_back: Vec<PathBuf>,
    /// Files rollback had to leave alone.
    pub rollback_failures: Vec<PathBuf>,
    pub duration_ms: u64,
}

impl FixLoopReport {
    pub fn is_success(&self) -> bool {
        self.outcome == LoopOutcome::Done
    }

    pub fn build_count(&self) -> usize {
        self.history.len()
    }

    pub fn diff_summaries(&self) -> Vec<&str> {
        self.applied
            .iter()
            .map(|a| a.patch.diff_summary.as_str())
            .collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} after {} build(s): {} patch(es) applied, {} surfaced, {} conflict(s) ({})",
            self.outcome,
            self.history.len(),
            self.applied.len(),
            self.surfaced.len(),
            self.conflicts.len(),
            self.reason
        )
    }
}

// ── Controller ───────────────────────────────────────────────────────

/// Per-run mutable state.
#[derive(Default)]
struct RunState {
    history: Vec<BuildAttempt>,
    records: HashMap<String, FixAttemptRecord>,
    record_order: Vec<String>,
    applied: Vec<AppliedPatch>,
    conflicts: Vec<PathBuf>,
    surfaced: Vec<NonActionable>,
    last_errors: Vec<BuildError>,
    events: Vec<LoopEvent>,
}

impl RunState {
    fn event(&mut self, cycle: u32, kind: FailureKind, group_key: Option<&str>, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::warn!(cycle, kind = %kind, group = group_key.unwrap_or("-"), %detail, "Loop event");
        self.events.push(LoopEvent {
            cycle,
            kind,
            group_key: group_key.map(String::from),
            detail,
        });
    }

    fn record_mut(&mut self, key: &str, max_attempts: u32) -> &mut FixAttemptRecord {
        if !self.records.contains_key(key) {
            self.record_order.push(key.to_string());
        }
        self.records
            .entry(key.to_string())
            .or_insert_with(|| FixAttemptRecord::new(key, max_attempts))
    }
}

enum GroupResult {
    Applied,
    GaveUp,
    Conflicted,
    Cancelled,
}

/// The build-fix loop controller. Construct once per run.
pub struct FixLoop {
    config: FixLoopConfig,
    project_root: PathBuf,
    build_command: String,
    parser: ErrorParser,
    classifier: ErrorClassifier,
    engine: PatchEngine,
    builder: Arc<dyn BuildRunner>,
    requester: Arc<dyn FixRequester>,
    reviewer: Arc<dyn ReviewCollaborator>,
    cancel: CancellationToken,
}

impl FixLoop {
    pub fn new(
        config: FixLoopConfig,
        project_root: impl Into<PathBuf>,
        builder: Arc<dyn BuildRunner>,
        requester: Arc<dyn FixRequester>,
        reviewer: Arc<dyn ReviewCollaborator>,
    ) -> FixLoopResult<Self> {
        config.validate()?;
        let project_root = project_root.into();
        let build_command = match &config.build_command {
            Some(cmd) => cmd.clone(),
            None => detect_build_command(&project_root).ok_or_else(|| {
                ConfigError::invalid_value(
                    "build_command",
                    format!("no Gradle or Maven build found in {}", project_root.display()),
                )
            })?,
        };
        Ok(Self {
            parser: ErrorParser::new(&config, &project_root)?,
            classifier: ErrorClassifier::new(&config, &project_root)?,
            engine: PatchEngine::new(&project_root),
            config,
            project_root,
            build_command,
            builder,
            requester,
            reviewer,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn build_command(&self) -> &str {
        &self.build_command
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn engine(&self) -> &PatchEngine {
        &self.engine
    }

    pub fn scope(&self) -> &Scope {
        self.classifier.scope()
    }

    pub fn reviewer(&self) -> &Arc<dyn ReviewCollaborator> {
        &self.reviewer
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn run(&self) -> FixLoopResult<FixLoopReport> {
        self.run_seeded(Vec::new()).await
    }

    /// Run the loop; `seeded` patches were applied beforehand and take part
    /// in rollback.
    ///
    /// Only infrastructure failures (unreadable source file, failed write,
    /// illegal transition) return `Err`; those skip rollback.
    pub async fn run_seeded(&self, seeded: Vec<AppliedPatch>) -> FixLoopResult<FixLoopReport> {
        let start = Instant::now();
        let mut sm = FixLoopMachine::new();
        let mut run = RunState {
            applied: seeded,
            ..Default::default()
        };

        tracing::info!(
            project = %self.project_root.display(),
            command = %self.build_command,
            max_cycles = self.config.max_build_cycles,
            max_attempts = self.config.max_attempts,
            "Starting build-fix loop"
        );

        let (outcome, reason) = self.drive(&mut sm, &mut run).await?;

        let mut rolled_back = Vec::new();
        let mut rollback_failures = Vec::new();
        if outcome != LoopOutcome::Done && self.config.rollback_on_failure {
            for applied in run.applied.iter().rev() {
                let file = applied.patch.target_file.clone();
                match self.engine.revert(applied) {
                    Ok(()) => rolled_back.push(file),
                    Err(e) => {
                        tracing::warn!(file = %file.display(), error = %e, "Rollback skipped file");
                        rollback_failures.push(file);
                    }
                }
            }
        }

        tracing::info!(outcome = %outcome, builds = run.history.len(), summary = %sm.summary(), "Build-fix loop finished");

        let records = run
            .record_order
            .iter()
            .filter_map(|k| run.records.get(k).cloned())
            .collect();
        Ok(FixLoopReport {
            outcome,
            reason,
            history: run.history,
            records,
            applied: run.applied,
            conflicts: run.conflicts,
            surfaced: run.surfaced,
            remaining_errors: run.last_errors,
            events: run.events,
            transitions: sm.into_transitions(),
            rolled_back,
            rollback_failures,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn drive(
        &self,
        sm: &mut FixLoopMachine,
        run: &mut RunState,
    ) -> FixLoopResult<(LoopOutcome, String)> {
        let mut build_reason = String::from("initial build");
        loop {
            if self.cancel.is_cancelled() {
                return abort(sm, "cancelled before build");
            }
            if sm.building_transitions() >= self.config.max_build_cycles {
                let reason = format!("build cycle limit ({}) reached", self.config.max_build_cycles);
                sm.advance(FixLoopState::Exhausted, Some(&reason))?;
                return Ok((LoopOutcome::Exhausted, reason));
            }

            // ── Building ──
            sm.advance(FixLoopState::Building, Some(&build_reason))?;
            let cycle = sm.cycle();
            let request = BuildRequest {
                attempt_number: cycle,
                project_path: self.project_root.clone(),
                command: self.build_command.clone(),
                timeout: self.config.build_timeout(),
            };
            let attempt = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return abort(sm, "cancelled during build"),
                attempt = self.builder.run_build(&request) => attempt,
            };
            run.history.push(attempt.clone());

            if attempt.succeeded() {
                run.last_errors.clear();
                sm.advance(FixLoopState::Done, Some("build succeeded"))?;
                return Ok((LoopOutcome::Done, "build succeeded".to_string()));
            }
            let failure = if attempt.exit == BuildExit::TimedOut {
                FailureKind::BuildTimeout
            } else {
                FailureKind::BuildFailure
            };
            run.event(cycle, failure, None, format!("{} ({})", attempt.command, attempt.exit));

            // ── Parsing ──
            sm.advance(FixLoopState::Parsing, None)?;
            let mut errors = self.parser.parse(&attempt);
            if errors.is_empty() {
                errors.push(BuildError::unattributed(&attempt));
            }
            for e in errors.iter().filter(|e| e.kind == ErrorKind::Unknown && e.file.is_some()) {
                run.event(cycle, FailureKind::ParseAmbiguous, Some(&e.group_key), e.headline());
            }

            // ── Classifying ──
            sm.advance(
                FixLoopState::Classifying,
                Some(&format!("{} error(s)", errors.len())),
            )?;
            let classification = self.classifier.classify(&errors, &run.records);
            run.last_errors = errors;

            if !classification.non_actionable.is_empty() {
                for n in &classification.non_actionable {
                    run.event(
                        cycle,
                        FailureKind::NonActionableError,
                        Some(&n.error.group_key),
                        format!("{}: {}", n.reason, n.error.headline()),
                    );
                }
                let reason = format!(
                    "{} non-actionable error(s) need attention",
                    classification.non_actionable.len()
                );
                run.surfaced = classification.non_actionable;
                sm.advance(FixLoopState::Aborted, Some(&reason))?;
                return Ok((LoopOutcome::Aborted, reason));
            }
            if classification.actionable.is_empty() {
                sm.advance(FixLoopState::Done, Some("no errors reported"))?;
                return Ok((LoopOutcome::Done, "no errors reported".to_string()));
            }

            let max_attempts = self.config.max_attempts;
            for group in &classification.actionable {
                let record = run.record_mut(&group.key, max_attempts);
                if record.remaining() == 0 && record.mark_exhausted() {
                    let detail = format!("{} fix attempt(s) used", record.attempt_count);
                    run.event(cycle, FailureKind::AttemptBudgetExhausted, Some(&group.key), detail);
                }
            }
            let fixable: Vec<&ErrorGroup> = classification
                .actionable
                .iter()
                .filter(|g| run.record_mut(&g.key, max_attempts).can_request())
                .collect();
            if fixable.is_empty() {
                let reason = "no failing group has fix attempts left".to_string();
                sm.advance(FixLoopState::Exhausted, Some(&reason))?;
                return Ok((LoopOutcome::Exhausted, reason));
            }

            // ── Fixing ──
            let mut applied = 0usize;
            for group in fixable {
                let entry_reason = format!("group {}", group.key);
                sm.advance(FixLoopState::RequestingFix, Some(&entry_reason))?;
                match self.fix_group(sm, run, group).await? {
                    GroupResult::Applied => applied += 1,
                    GroupResult::GaveUp | GroupResult::Conflicted => {}
                    GroupResult::Cancelled => return abort(sm, "cancelled during fix"),
                }
            }

            if applied == 0 {
                let reason = "no patch could be applied this cycle".to_string();
                sm.advance(FixLoopState::Exhausted, Some(&reason))?;
                return Ok((LoopOutcome::Exhausted, reason));
            }
            build_reason = format!("{applied} patch(es) applied");
        }
    }

    /// Request, review and apply fixes for one group until one lands or
    /// the group's budget is spent. Entered and left in `RequestingFix` or
    /// `Applying`.
    async fn fix_group(
        &self,
        sm: &mut FixLoopMachine,
        run: &mut RunState,
        group: &ErrorGroup,
    ) -> FixLoopResult<GroupResult> {
        let cycle = sm.cycle();
        let max_attempts = self.config.max_attempts;
        let Some(file) = group.file.clone() else {
            return Ok(GroupResult::GaveUp);
        };
        let mut previous_failure: Option<String> = None;

        loop {
            let record = run.record_mut(&group.key, max_attempts);
            if record.remaining() == 0 {
                record.mark_exhausted();
                let detail = format!("{} fix attempt(s) used", record.attempt_count);
                run.event(cycle, FailureKind::AttemptBudgetExhausted, Some(&group.key), detail);
                return Ok(GroupResult::GaveUp);
            }
            if self.cancel.is_cancelled() {
                return Ok(GroupResult::Cancelled);
            }

            let source = self.engine.snapshot(&file)?;

            let record = run.record_mut(&group.key, max_attempts);
            record.attempt_count += 1;
            record.last_outcome = FixOutcome::Pending;
            for error in &group.errors {
                if !record.tried(error.kind) {
                    record.tried_kinds.push(error.kind);
                }
            }
            let attempt = record.attempt_count;

            let request = FixRequest {
                group,
                source: &source,
                attempt,
                previous_failure: previous_failure.as_deref(),
            };
            let proposal = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(GroupResult::Cancelled),
                proposal = self.requester.request_fix(&request) => proposal,
            };

            let patch = match proposal {
                Ok(patch) => patch,
                Err(no) => {
                    run.event(cycle, FailureKind::NoSuggestion, Some(&group.key), no.reason.clone());
                    previous_failure = Some(no.reason);
                    if run.record_mut(&group.key, max_attempts).remaining() > 0 {
                        sm.advance(FixLoopState::RequestingFix, Some("no suggestion, retrying"))?;
                    }
                    continue;
                }
            };

            sm.advance(FixLoopState::Applying, Some(&format!("attempt {attempt}")))?;
            let patch = match self.review(group, patch).await {
                Some(patch) => patch,
                None if self.cancel.is_cancelled() => return Ok(GroupResult::Cancelled),
                None => {
                    run.record_mut(&group.key, max_attempts).last_outcome = FixOutcome::Rejected;
                    tracing::info!(group = %group.key, attempt, "Patch rejected by reviewer");
                    previous_failure = Some("the reviewer rejected the proposed patch".to_string());
                    if run.record_mut(&group.key, max_attempts).remaining() > 0 {
                        sm.advance(FixLoopState::RequestingFix, Some("rejected, retrying"))?;
                    }
                    continue;
                }
            };

            match self.engine.apply(&patch) {
                Ok(applied) => {
                    run.record_mut(&group.key, max_attempts).last_outcome = FixOutcome::Applied;
                    run.applied.push(applied);
                    return Ok(GroupResult::Applied);
                }
                Err(e) if e.is_conflict() => {
                    run.record_mut(&group.key, max_attempts).last_outcome = FixOutcome::Conflicted;
                    run.conflicts.push(patch.target_file.clone());
                    run.event(cycle, FailureKind::PatchConflict, Some(&group.key), e.to_string());
                    return Ok(GroupResult::Conflicted);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// `None` when rejected, cancelled, or edited into a no-op.
    async fn review(&self, group: &ErrorGroup, patch: Patch) -> Option<Patch> {
        let request = ReviewRequest {
            patch: &patch,
            error_group: Some(group),
        };
        let decision = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            decision = self.reviewer.review(&request) => decision,
        };
        let reviewed = match decision {
            ReviewDecision::Approve => patch,
            ReviewDecision::Reject => return None,
            ReviewDecision::EditAndApprove(content) => patch.with_proposed(content),
        };
        (!reviewed.is_noop()).then_some(reviewed)
    }
}

fn abort(sm: &mut FixLoopMachine, reason: &str) -> FixLoopResult<(LoopOutcome, String)> {
    sm.abort(reason)?;
    Ok((LoopOutcome::Aborted, reason.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_budget() {
        let mut record = FixAttemptRecord::new("A.java", 2);
        assert!(record.can_request());
        record.attempt_count = 2;
        assert_eq!(record.remaining(), 0);
        assert!(!record.can_request());
    }

    #[test]
    fn test_mark_exhausted_once() {
        let mut record = FixAttemptRecord::new("A.java", 1);
        record.attempt_count = 1;
        record.last_outcome = FixOutcome::Applied;
        assert!(record.mark_exhausted());
        assert_eq!(record.last_outcome, FixOutcome::Exhausted);
        assert!(!record.mark_exhausted());

        let mut conflicted = FixAttemptRecord::new("B.java", 1);
        conflicted.last_outcome = FixOutcome::Conflicted;
        assert!(!conflicted.mark_exhausted());
        assert_eq!(conflicted.last_outcome, FixOutcome::Conflicted);
    }

    #[test]
    fn test_conflicted_group_not_retried() {
        let mut record = FixAttemptRecord::new("A.java", 3);
        record.attempt_count = 1;
        record.last_outcome = FixOutcome::Conflicted;
        assert!(!record.can_request());
    }

    #[test]
    fn test_record_order_kept() {
        let mut run = RunState::default();
        run.record_mut("b", 3);
        run.record_mut("a", 3);
        run.record_mut("b", 3).attempt_count += 1;
        assert_eq!(run.record_order, vec!["b".to_string(), "a".to_string()]);
        assert_eq!(run.records["b"].attempt_count, 1);
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(LoopOutcome::Exhausted.to_string(), "exhausted");
    }
}

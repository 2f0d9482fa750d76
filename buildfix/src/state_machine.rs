//! Fix loop state machine: explicit states and a legal-transition table.
//!
//! Every run starts at `Idle` and ends at `Done`, `Exhausted` or `Aborted`.
//! The controller calls [`FixLoopMachine::advance`] for each step; illegal
//! edges are rejected and every accepted edge is kept in the transition log
//! together with the build cycle it happened in.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixLoopState {
    Idle,
    /// Build subprocess running.
    Building,
    Parsing,
    Classifying,
    /// Waiting on the LLM collaborator for one error group.
    RequestingFix,
    /// Reviewing and writing a proposed patch.
    Applying,
    /// Build succeeded (terminal).
    Done,
    /// Budget spent with errors remaining (terminal).
    Exhausted,
    /// Non-actionable errors, cancellation or infrastructure failure (terminal).
    Aborted,
}

impl FixLoopState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Exhausted | Self::Aborted)
    }
}

impl fmt::Display for FixLoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Building => "Building",
            Self::Parsing => "Parsing",
            Self::Classifying => "Classifying",
            Self::RequestingFix => "RequestingFix",
            Self::Applying => "Applying",
            Self::Done => "Done",
            Self::Exhausted => "Exhausted",
            Self::Aborted => "Aborted",
        };
        f.write_str(name)
    }
}

/// ```text
/// Idle          → Building | Aborted
/// Building      → Done | Parsing | Aborted
/// Parsing       → Classifying | Aborted
/// Classifying   → Done | Aborted | Exhausted | RequestingFix
/// RequestingFix → Applying | RequestingFix | Building | Exhausted | Aborted
/// Applying      → RequestingFix | Building | Exhausted | Aborted
/// ```
fn is_legal_transition(from: FixLoopState, to: FixLoopState) -> bool {
    use FixLoopState::*;

    if to == Aborted && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Idle, Building)
            | (Building, Done)
            | (Building, Parsing)
            | (Parsing, Classifying)
            | (Classifying, Done)
            | (Classifying, Exhausted)
            | (Classifying, RequestingFix)
            // NoSuggestion / rejection → ask again, or next group
            | (RequestingFix, RequestingFix)
            | (RequestingFix, Applying)
            | (RequestingFix, Building)
            | (RequestingFix, Exhausted)
            | (Applying, RequestingFix)
            | (Applying, Building)
            | (Applying, Exhausted)
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: FixLoopState,
    pub to: FixLoopState,
    /// Build cycle at the time of the transition (0 before the first build).
    pub cycle: u32,
    /// Milliseconds since the machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: FixLoopState,
    pub to: FixLoopState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal state transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Tracks the current state and the full transition log of one run.
#[derive(Debug)]
pub struct FixLoopMachine {
    current: FixLoopState,
    cycle: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl FixLoopMachine {
    pub fn new() -> Self {
        Self {
            current: FixLoopState::Idle,
            cycle: 0,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> FixLoopState {
        self.current
    }

    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    /// Move to `to`. Entering `Building` starts a new cycle.
    pub fn advance(
        &mut self,
        to: FixLoopState,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        if to == FixLoopState::Building {
            self.cycle += 1;
        }

        tracing::debug!(
            from = %self.current,
            to = %to,
            cycle = self.cycle,
            reason = reason.unwrap_or(""),
            "State transition"
        );

        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            cycle: self.cycle,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    /// Transition to `Aborted`; legal from any non-terminal state.
    pub fn abort(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(FixLoopState::Aborted, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Number of transitions into `Building` so far.
    pub fn building_transitions(&self) -> u32 {
        self.transitions
            .iter()
            .filter(|t| t.to == FixLoopState::Building)
            .count() as u32
    }

    pub fn into_transitions(self) -> Vec<TransitionRecord> {
        self.transitions
    }

    /// One-line history, e.g. `Idle → Done (12ms, 2 transitions) [Building → Done]`.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} → {} ({}ms, {} transitions)",
            FixLoopState::Idle,
            self.current,
            self.created_at.elapsed().as_millis(),
            self.transitions.len(),
        );
        if !self.transitions.is_empty() {
            let states: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
            out.push_str(&format!(" [{}]", states.join(" → ")));
        }
        out
    }
}

impl Default for FixLoopMachine {
    fn default() -> Self {
        Self::new()
    }
}

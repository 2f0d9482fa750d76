//! Iterative build-fix loop for JDK upgrades.
//!
//! This library provides:
//! - a Build Runner that executes the project's Gradle/Maven build under a timeout
//! - an Error Parser for javac, Kotlin, Groovy, Gradle and Maven diagnostics
//! - an Error Classifier that splits errors into fixable groups and errors
//!   for the human
//! - a Fix Requester that turns one error group into a patch via an LLM
//! - a conflict-checked, reversible Patch Engine
//! - the Fix Loop Controller tying them together behind an explicit state machine
//!
//! # Usage
//!
//! ```ignore
//! let fix_loop = FixLoop::new(config, project, builder, requester, reviewer)?
//!     .with_cancellation(token);
//! let report = Session::new(fix_loop).run(initial_patches).await?;
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod feedback;
pub mod fix_request;
pub mod patch;
pub mod review;
pub mod scope;
pub mod session;
pub mod state_machine;

pub use config::{Actionability, ActionabilityTable, FixLoopConfig, GroupingPolicy, KindPattern};
pub use error::{
    ConfigError, FailureKind, FixLoopError, FixLoopResult, LlmError, NoSuggestion, PatchError,
};
pub use feedback::{
    BuildAttempt, BuildError, BuildExit, BuildRequest, BuildRunner, ErrorClassifier, ErrorGroup,
    ErrorKind, ErrorParser, FixAttemptRecord, FixLoop, FixLoopReport, FixOutcome, LoopEvent,
    LoopOutcome, ProcessBuildRunner,
};
pub use fix_request::{FixRequest, FixRequester, LlmClient, LlmFixRequester};
pub use patch::{AppliedPatch, Patch, PatchEngine, StructuredChange, StructuredResponse};
pub use review::{AutoApprove, ReviewCollaborator, ReviewDecision, ReviewRequest};
pub use scope::Scope;
pub use session::{Session, SessionReport, SkippedPatch};
pub use state_machine::{FixLoopMachine, FixLoopState, TransitionRecord};

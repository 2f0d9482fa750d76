//! Build feedback loop
//!
//! Runs the project build, turns its output into structured errors, decides
//! which of them the loop may fix, and drives fix requests until the build
//! passes or a bound is hit.
//!
//! # Architecture
//!
//! ```text
//! BuildRunner → ErrorParser → ErrorClassifier → FixRequester → PatchEngine
//!      ↑                                                           |
//!      └───────────────────────────────────────────────────────────┘
//! ```

pub mod build_runner;
pub mod classifier;
pub mod error_parser;
pub mod fix_loop;

pub use build_runner::{BuildAttempt, BuildExit, BuildRequest, BuildRunner, ProcessBuildRunner};
pub use classifier::{Classification, ErrorClassifier, ErrorGroup, NonActionable};
pub use error_parser::{BuildError, ErrorKind, ErrorParser};
pub use fix_loop::{FixAttemptRecord, FixLoop, FixLoopReport, FixOutcome, LoopEvent, LoopOutcome};

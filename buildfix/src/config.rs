//! Immutable configuration for the build-fix loop.
//!
//! Loaded from TOML (every field optional, defaults below), then overridden
//! by CLI flags, then handed by reference to the parser, classifier and
//! controller at construction. Nothing here is read from process-wide state.
//!
//! ```toml
//! build_command = "./gradlew compileJava --console=plain"
//! max_attempts = 3
//! max_build_cycles = 10
//! grouping = "by_file"
//! include = ["src/**"]
//!
//! [actionability]
//! missing_dependency = "non_actionable"
//!
//! [[kind_patterns]]
//! kind = "deprecated_api"
//! pattern = "(?i)jakarta"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::feedback::error_parser::ErrorKind;

/// How build errors are batched into fix requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingPolicy {
    /// One group (and one fix request) per file.
    #[default]
    ByFile,
    /// One group per (file, kind) pair.
    ByFileAndKind,
}

/// What the loop does with an error of a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actionability {
    /// Request fixes until the group's attempt budget is spent.
    Actionable,
    /// Allow exactly one fix attempt; still failing afterwards is surfaced.
    ActionableOnce,
    /// Never retried automatically; surfaced to the human.
    NonActionable,
}

/// Kind → actionability table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionabilityTable {
    pub syntax: Actionability,
    pub type_mismatch: Actionability,
    pub deprecated_api: Actionability,
    pub missing_dependency: Actionability,
    pub unknown: Actionability,
}

impl Default for ActionabilityTable {
    fn default() -> Self {
        Self {
            syntax: Actionability::Actionable,
            type_mismatch: Actionability::Actionable,
            deprecated_api: Actionability::Actionable,
            missing_dependency: Actionability::ActionableOnce,
            unknown: Actionability::NonActionable,
        }
    }
}

impl ActionabilityTable {
    pub fn get(&self, kind: ErrorKind) -> Actionability {
        match kind {
            ErrorKind::Syntax => self.syntax,
            ErrorKind::TypeMismatch => self.type_mismatch,
            ErrorKind::DeprecatedApi => self.deprecated_api,
            ErrorKind::MissingDependency => self.missing_dependency,
            ErrorKind::Unknown => self.unknown,
        }
    }

    pub fn set(&mut self, kind: ErrorKind, value: Actionability) {
        match kind {
            ErrorKind::Syntax => self.syntax = value,
            ErrorKind::TypeMismatch => self.type_mismatch = value,
            ErrorKind::DeprecatedApi => self.deprecated_api = value,
            ErrorKind::MissingDependency => self.missing_dependency = value,
            ErrorKind::Unknown => self.unknown = value,
        }
    }
}

/// Extra message pattern mapped onto an error kind. Checked before the
/// built-in patterns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindPattern {
    pub kind: ErrorKind,
    pub pattern: String,
}

/// Paths never patched, whatever `include` says.
pub const DEFAULT_SKIP: &[&str] = &[
    "build/**",
    "target/**",
    ".gradle/**",
    "out/**",
    "bin/**",
    "**/generated/**",
    ".idea/**",
    ".git/**",
];

/// Configuration for one run of the build-fix loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixLoopConfig {
    /// Build command; `None` detects Gradle wrapper / Gradle / Maven.
    pub build_command: Option<String>,
    /// Wall-clock limit for one build.
    pub build_timeout_secs: u64,
    /// Fix requests allowed per error group.
    pub max_attempts: u32,
    /// Upper bound on builds in one run.
    pub max_build_cycles: u32,
    /// Lines of context on each side of an error line.
    pub context_lines: usize,
    /// Files up to this size are sent whole.
    pub max_full_file_bytes: usize,
    /// Hard cap on prompt size.
    pub max_prompt_bytes: usize,
    /// Limit for one LLM fix request.
    pub fix_timeout_secs: u64,
    /// Errors per group included in a prompt.
    pub max_errors_per_group: usize,
    pub grouping: GroupingPolicy,
    pub actionability: ActionabilityTable,
    pub kind_patterns: Vec<KindPattern>,
    /// Globs (project-relative) a patch may target. Empty = everything.
    pub include: Vec<String>,
    /// Globs that are never patched.
    pub skip: Vec<String>,
    pub target_jdk: String,
    /// Free-form text appended to every fix prompt.
    pub extra_prompt: Option<String>,
    /// Revert this run's patches when it ends Exhausted or Aborted.
    pub rollback_on_failure: bool,
}

impl Default for FixLoopConfig {
    fn default() -> Self {
        Self {
            build_command: None,
            build_timeout_secs: 600,
            max_attempts: 3,
            max_build_cycles: 10,
            context_lines: 8,
            max_full_file_bytes: 12_000,
            max_prompt_bytes: 48_000,
            fix_timeout_secs: 120,
            max_errors_per_group: 20,
            grouping: GroupingPolicy::ByFile,
            actionability: ActionabilityTable::default(),
            kind_patterns: Vec::new(),
            include: Vec::new(),
            skip: DEFAULT_SKIP.iter().map(|s| s.to_string()).collect(),
            target_jdk: "21".to_string(),
            extra_prompt: None,
            rollback_on_failure: false,
        }
    }
}

impl FixLoopConfig {
    /// Parse a TOML document; missing fields keep their defaults.
    pub fn from_toml_str(source: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source, path)
    }

    /// Reject values that would make the loop meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid_value("max_attempts", "must be at least 1"));
        }
        if self.max_build_cycles == 0 {
            return Err(ConfigError::invalid_value(
                "max_build_cycles",
                "must be at least 1",
            ));
        }
        if self.build_timeout_secs == 0 {
            return Err(ConfigError::invalid_value(
                "build_timeout_secs",
                "must be at least 1",
            ));
        }
        if self.fix_timeout_secs == 0 {
            return Err(ConfigError::invalid_value(
                "fix_timeout_secs",
                "must be at least 1",
            ));
        }
        if self.max_prompt_bytes < 1_024 {
            return Err(ConfigError::invalid_value(
                "max_prompt_bytes",
                "must be at least 1024",
            ));
        }
        if let Some(cmd) = &self.build_command {
            if shlex::split(cmd).map_or(true, |parts| parts.is_empty()) {
                return Err(ConfigError::invalid_value(
                    "build_command",
                    format!("cannot split '{cmd}' into a program and arguments"),
                ));
            }
        }
        Ok(())
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn fix_timeout(&self) -> Duration {
        Duration::from_secs(self.fix_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FixLoopConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.max_build_cycles, 10);
        assert_eq!(config.grouping, GroupingPolicy::ByFile);
        assert_eq!(config.target_jdk, "21");
        assert!(config.skip.iter().any(|s| s == "build/**"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_actionability() {
        let table = ActionabilityTable::default();
        assert_eq!(table.get(ErrorKind::Syntax), Actionability::Actionable);
        assert_eq!(table.get(ErrorKind::TypeMismatch), Actionability::Actionable);
        assert_eq!(table.get(ErrorKind::DeprecatedApi), Actionability::Actionable);
        assert_eq!(
            table.get(ErrorKind::MissingDependency),
            Actionability::ActionableOnce
        );
        assert_eq!(table.get(ErrorKind::Unknown), Actionability::NonActionable);
    }

    #[test]
    fn test_toml_partial_override() {
        let source = r#"
            max_attempts = 2
            grouping = "by_file_and_kind"
            include = ["src/**"]

            [actionability]
            missing_dependency = "non_actionable"

            [[kind_patterns]]
            kind = "deprecated_api"
            pattern = "(?i)jakarta"
        "#;
        let config = FixLoopConfig::from_toml_str(source, Path::new("fix.toml")).unwrap();
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.max_build_cycles, 10);
        assert_eq!(config.grouping, GroupingPolicy::ByFileAndKind);
        assert_eq!(config.include, vec!["src/**".to_string()]);
        assert_eq!(
            config.actionability.get(ErrorKind::MissingDependency),
            Actionability::NonActionable
        );
        assert_eq!(
            config.actionability.get(ErrorKind::Syntax),
            Actionability::Actionable
        );
        assert_eq!(config.kind_patterns.len(), 1);
        assert_eq!(config.kind_patterns[0].kind, ErrorKind::DeprecatedApi);
    }

    #[test]
    fn test_validate_rejects_zero_budget() {
        let config = FixLoopConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_unsplittable_command() {
        let config = FixLoopConfig {
            build_command: Some("gradle \"unterminated".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = FixLoopConfig::from_toml_str("max_attempts = \"three\"", Path::new("x.toml"))
            .unwrap_err();
        assert!(err.to_string().contains("x.toml"));
    }
}

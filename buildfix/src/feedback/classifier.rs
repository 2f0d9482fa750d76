//! Error Classifier: splits parsed errors into fixable groups and errors
//! that must be handed to the human.
//!
//! Decisions are table-driven (`kind → Actionability`, from configuration)
//! plus a few facts about the file:
//!
//! | Condition                                     | Result          |
//! |-----------------------------------------------|-----------------|
//! | no file attribution                           | non-actionable  |
//! | file outside include scope / in a skip glob   | non-actionable  |
//! | file missing on disk                          | non-actionable  |
//! | kind is `NonActionable`                       | non-actionable  |
//! | kind is `ActionableOnce`, kind already tried  | non-actionable  |
//! | otherwise                                     | actionable      |

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{Actionability, ActionabilityTable, FixLoopConfig};
use crate::error::ConfigError;
use crate::feedback::error_parser::{BuildError, ErrorKind};
use crate::feedback::fix_loop::FixAttemptRecord;
use crate::scope::Scope;

/// Errors batched into one fix request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorGroup {
    pub key: String,
    pub file: Option<PathBuf>,
    /// Ordered by line, then by position in the build output.
    pub errors: Vec<BuildError>,
}

impl ErrorGroup {
    /// Most frequent kind in the group (ties go to the earliest).
    pub fn dominant_kind(&self) -> ErrorKind {
        let mut counts: Vec<(ErrorKind, usize)> = Vec::new();
        for e in &self.errors {
            match counts.iter_mut().find(|(k, _)| *k == e.kind) {
                Some((_, n)) => *n += 1,
                None => counts.push((e.kind, 1)),
            }
        }
        counts
            .iter()
            .fold(None, |best: Option<(ErrorKind, usize)>, &(k, n)| match best {
                Some((_, bn)) if bn >= n => best,
                _ => Some((k, n)),
            })
            .map(|(k, _)| k)
            .unwrap_or(ErrorKind::Unknown)
    }

    /// 1-based error lines, deduplicated, ascending.
    pub fn lines(&self) -> Vec<u32> {
        let mut lines: Vec<u32> = self.errors.iter().filter_map(|e| e.line).collect();
        lines.dedup();
        lines
    }
}

/// An error the loop will not fix, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonActionable {
    pub error: BuildError,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub actionable: Vec<ErrorGroup>,
    pub non_actionable: Vec<NonActionable>,
}

impl Classification {
    pub fn is_empty(&self) -> bool {
        self.actionable.is_empty() && self.non_actionable.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    table: ActionabilityTable,
    scope: Scope,
    root: PathBuf,
}

impl ErrorClassifier {
    pub fn new(config: &FixLoopConfig, project_root: &Path) -> Result<Self, ConfigError> {
        Ok(Self {
            table: config.actionability.clone(),
            scope: Scope::new(project_root, &config.include, &config.skip)?,
            root: project_root.to_path_buf(),
        })
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Partition `errors`. `records` holds the fix history per group key.
    pub fn classify(
        &self,
        errors: &[BuildError],
        records: &HashMap<String, FixAttemptRecord>,
    ) -> Classification {
        let mut classification = Classification::default();

        for error in errors {
            match self.rejection(error, records) {
                Some(reason) => {
                    tracing::debug!(group = %error.group_key, kind = %error.kind, %reason, "Non-actionable");
                    classification.non_actionable.push(NonActionable {
                        error: error.clone(),
                        reason,
                    });
                }
                None => {
                    let groups = &mut classification.actionable;
                    match groups.iter_mut().find(|g| g.key == error.group_key) {
                        Some(group) => group.errors.push(error.clone()),
                        None => groups.push(ErrorGroup {
                            key: error.group_key.clone(),
                            file: error.file.clone(),
                            errors: vec![error.clone()],
                        }),
                    }
                }
            }
        }

        for group in &mut classification.actionable {
            // Stable: equal lines keep output order.
            group.errors.sort_by_key(|e| e.line.unwrap_or(u32::MAX));
        }
        classification
    }

    fn rejection(
        &self,
        error: &BuildError,
        records: &HashMap<String, FixAttemptRecord>,
    ) -> Option<String> {
        let Some(file) = &error.file else {
            return Some("no file attribution".to_string());
        };
        if let Some(reason) = self.scope.exclusion_reason(file) {
            return Some(reason);
        }
        if !self.root.join(file).is_file() {
            return Some(format!("{} not found in project", file.display()));
        }
        match self.table.get(error.kind) {
            Actionability::Actionable => None,
            Actionability::NonActionable => {
                Some(format!("{} errors are not fixed automatically", error.kind))
            }
            Actionability::ActionableOnce => {
                let tried = records
                    .get(&error.group_key)
                    .map(|r| r.tried(error.kind))
                    .unwrap_or(false);
                tried.then(|| format!("{} error still present after a fix attempt", error.kind))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::fix_loop::FixOutcome;
    use std::fs;

    fn error(file: Option<&str>, line: u32, kind: ErrorKind) -> BuildError {
        BuildError {
            attempt: 1,
            file: file.map(PathBuf::from),
            line: Some(line),
            column: None,
            kind,
            raw_message: format!("{kind} at {line}"),
            group_key: file.unwrap_or("<build>").to_string(),
        }
    }

    fn project(files: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for f in files {
            let path = dir.path().join(f);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "class X {}\n").unwrap();
        }
        dir
    }

    #[test]
    fn test_groups_by_key_and_sorts_lines() {
        let dir = project(&["src/A.java", "src/B.java"]);
        let classifier = ErrorClassifier::new(&FixLoopConfig::default(), dir.path()).unwrap();
        let errors = vec![
            error(Some("src/B.java"), 9, ErrorKind::Syntax),
            error(Some("src/A.java"), 30, ErrorKind::TypeMismatch),
            error(Some("src/A.java"), 4, ErrorKind::Syntax),
        ];
        let c = classifier.classify(&errors, &HashMap::new());
        assert!(c.non_actionable.is_empty());
        let keys: Vec<_> = c.actionable.iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, vec!["src/B.java", "src/A.java"]);
        assert_eq!(c.actionable[1].lines(), vec![4, 30]);
    }

    #[test]
    fn test_non_actionable_reasons() {
        let dir = project(&["src/A.java", "build/gen/G.java"]);
        let classifier = ErrorClassifier::new(&FixLoopConfig::default(), dir.path()).unwrap();
        let errors = vec![
            error(None, 0, ErrorKind::MissingDependency),
            error(Some("build/gen/G.java"), 1, ErrorKind::Syntax),
            error(Some("src/Gone.java"), 1, ErrorKind::Syntax),
            error(Some("src/A.java"), 1, ErrorKind::Unknown),
        ];
        let c = classifier.classify(&errors, &HashMap::new());
        assert!(c.actionable.is_empty());
        let reasons: Vec<_> = c.non_actionable.iter().map(|n| n.reason.as_str()).collect();
        assert_eq!(reasons[0], "no file attribution");
        assert!(reasons[1].contains("skip pattern"));
        assert!(reasons[2].contains("not found"));
        assert!(reasons[3].contains("unknown"));
    }

    #[test]
    fn test_missing_dependency_actionable_once() {
        let dir = project(&["src/A.java"]);
        let classifier = ErrorClassifier::new(&FixLoopConfig::default(), dir.path()).unwrap();
        let errors = vec![error(Some("src/A.java"), 3, ErrorKind::MissingDependency)];

        let fresh = classifier.classify(&errors, &HashMap::new());
        assert_eq!(fresh.actionable.len(), 1);

        let mut records = HashMap::new();
        records.insert(
            "src/A.java".to_string(),
            FixAttemptRecord {
                group_key: "src/A.java".into(),
                attempt_count: 1,
                max_attempts: 3,
                last_outcome: FixOutcome::Applied,
                tried_kinds: vec![ErrorKind::MissingDependency],
            },
        );
        let retried = classifier.classify(&errors, &records);
        assert!(retried.actionable.is_empty());
        assert_eq!(retried.non_actionable.len(), 1);
    }

    #[test]
    fn test_missing_dependency_after_other_kind_fixed() {
        let dir = project(&["src/A.java"]);
        let classifier = ErrorClassifier::new(&FixLoopConfig::default(), dir.path()).unwrap();
        let mut record = FixAttemptRecord::new("src/A.java", 3);
        record.attempt_count = 1;
        record.last_outcome = FixOutcome::Applied;
        record.tried_kinds = vec![ErrorKind::TypeMismatch];
        let records = HashMap::from([("src/A.java".to_string(), record)]);

        let errors = vec![error(Some("src/A.java"), 1, ErrorKind::MissingDependency)];
        let c = classifier.classify(&errors, &records);
        assert_eq!(c.actionable.len(), 1);
        assert!(c.non_actionable.is_empty());
    }

    #[test]
    fn test_dominant_kind() {
        let group = ErrorGroup {
            key: "A.java".into(),
            file: Some("A.java".into()),
            errors: vec![
                error(Some("A.java"), 1, ErrorKind::Syntax),
                error(Some("A.java"), 2, ErrorKind::DeprecatedApi),
                error(Some("A.java"), 3, ErrorKind::DeprecatedApi),
            ],
        };
        assert_eq!(group.dominant_kind(), ErrorKind::DeprecatedApi);
    }
}

//! JVM build output parsing and error kind classification.
//!
//! Turns the raw text of a [`BuildAttempt`] into structured [`BuildError`]s.
//! Recognized diagnostic shapes:
//!
//! | Tool          | Shape |
//! |---------------|-------|
//! | javac         | `src/Foo.java:42: error: message` |
//! | Maven         | `[ERROR] /p/src/Foo.java:[42,17] message` |
//! | kotlinc       | `e: file:///p/Foo.kt:12:5 message`, `e: /p/Foo.kt: (12, 5): message` |
//! | groovyc       | `/p/Foo.groovy: 20: message @ line 20, column 5.` |
//! | Gradle script | `Build file '/p/build.gradle' line: 12` + `* What went wrong:` block |
//! | Dependencies  | `Could not resolve ...`, `Could not find g:a:v.` (no file) |
//!
//! Lines that match nothing are ignored. The kind of each diagnostic comes
//! from an ordered `(kind, regex)` table, first match wins, `Unknown`
//! otherwise. Parsing is a pure function of the output text and the parser
//! configuration.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{FixLoopConfig, GroupingPolicy};
use crate::error::ConfigError;
use crate::feedback::build_runner::{BuildAttempt, BuildExit};

/// Group key for errors with no file attribution.
pub const BUILD_GROUP_KEY: &str = "<build>";

/// Continuation lines kept per diagnostic.
const MAX_CONTINUATION_LINES: usize = 8;

// ── Diagnostic shapes ────────────────────────────────────────────────

static JAVAC_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<file>(?:[A-Za-z]:)?[^\s:][^:]*\.(?:java|groovy|kt|kts|scala)):(?P<line>\d+):(?:(?P<col>\d+):)?\s*error:\s*(?P<msg>.*)$",
    )
    .unwrap()
});

static MAVEN_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[ERROR\]\s+(?P<file>\S.*?\.(?:java|groovy|kt|kts|scala)):\[(?P<line>\d+)(?:,(?P<col>\d+))?\]\s*(?P<msg>.*)$",
    )
    .unwrap()
});

static KOTLIN_URI_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^e:\s+file://(?P<file>\S+?\.kts?):(?P<line>\d+):(?P<col>\d+)\s+(?P<msg>.*)$").unwrap()
});

static KOTLIN_PATH_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^e:\s+(?P<file>\S.*?\.kts?):\s*\((?P<line>\d+),\s*(?P<col>\d+)\):\s*(?P<msg>.*)$")
        .unwrap()
});

static GROOVY_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<file>\S.*?\.groovy):\s*(?P<line>\d+):\s*(?P<msg>.*?)(?:\s*@\s*line\s+\d+,\s*column\s+(?P<col>\d+)\.)?\s*$",
    )
    .unwrap()
});

static GRADLE_SCRIPT_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:Build|Settings|Script) file '(?P<file>[^']+)' line:\s*(?P<line>\d+)").unwrap()
});

static DEPENDENCY_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<msg>Could not (?:resolve|find) (?:all |dependencies |[\w.\-]+:[\w.\-]+).*?)\s*$")
        .unwrap()
});

static WARNING_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^\S.*:\d+:(?:\d+:)?\s*warning:|^w:\s|^\[WARNING\])").unwrap()
});

/// Lines that end a diagnostic's continuation block.
const CONTINUATION_STOPS: &[&str] = &[
    "> ", "* ", "FAILURE", "BUILD ", "[INFO]", "[ERROR]", "[WARNING]", "Note:", "e: ", "w: ",
    "> Task", "Execution failed",
];

// ── Kind patterns ────────────────────────────────────────────────────

const DEPRECATED_API_PATTERN: &str = r"(?i)(package (javax\.(xml\.bind|activation|annotation|jws|xml\.ws|xml\.soap|transaction)|sun\.|com\.sun\.)[\w.]*\s+does not exist|has been deprecated|deprecated and marked for removal|is not API|internal proprietary API|is not accessible|does not export|removed in (java|jdk)|SecurityManager|method does not override or implement)";
const MISSING_DEPENDENCY_PATTERN: &str = r"(?i)(package [\w.]+ does not exist|cannot find symbol|symbol not found|cannot resolve symbol|Could not (resolve|find) |unresolved reference|unable to resolve class|cannot access [\w.$]+|class file for [\w.$]+ not found|Failed to resolve|dependenc(y|ies) (could not|cannot) be resolved)";
const SYNTAX_PATTERN: &str = r"(?i)('[^']+' expected|<identifier> expected|illegal start of|unclosed (string|comment|character)|reached end of file while parsing|not a statement|unexpected token|expecting ['\w]|syntax error|unexpected input|class, interface, enum,? or record expected|orphaned )";
const TYPE_MISMATCH_PATTERN: &str = r"(?i)(incompatible types|type mismatch|cannot be converted to|cannot be applied to|no suitable (method|constructor)|bad operand type|inconvertible types|cannot infer type|cannot be cast|is not applicable|cannot assign)";

/// Closed set of error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Syntax,
    TypeMismatch,
    /// API removed or restricted in newer JDKs.
    DeprecatedApi,
    MissingDependency,
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 5] = [
        Self::Syntax,
        Self::TypeMismatch,
        Self::DeprecatedApi,
        Self::MissingDependency,
        Self::Unknown,
    ];

    /// Built-in classification table, in match order.
    pub fn default_patterns() -> Vec<(ErrorKind, &'static str)> {
        vec![
            (Self::DeprecatedApi, DEPRECATED_API_PATTERN),
            (Self::MissingDependency, MISSING_DEPENDENCY_PATTERN),
            (Self::Syntax, SYNTAX_PATTERN),
            (Self::TypeMismatch, TYPE_MISMATCH_PATTERN),
        ]
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax => write!(f, "syntax"),
            Self::TypeMismatch => write!(f, "type_mismatch"),
            Self::DeprecatedApi => write!(f, "deprecated_api"),
            Self::MissingDependency => write!(f, "missing_dependency"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One diagnostic extracted from build output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildError {
    /// `attempt_number` of the build this came from.
    pub attempt: u32,
    /// Project-relative when under the project root.
    pub file: Option<PathBuf>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub kind: ErrorKind,
    pub raw_message: String,
    pub group_key: String,
}

impl BuildError {
    /// Error standing in for a failed build whose output yielded no
    /// recognizable diagnostics. Never actionable (no file).
    pub fn unattributed(attempt: &BuildAttempt) -> Self {
        let headline = match attempt.exit {
            BuildExit::TimedOut => format!(
                "build timed out after {}ms with no recognizable diagnostics",
                attempt.duration_ms
            ),
            BuildExit::Killed => "build was killed with no recognizable diagnostics".to_string(),
            BuildExit::Code(code) => {
                format!("build failed (exit {code}) with no recognizable diagnostics")
            }
        };
        let tail = attempt.output_tail(20);
        let raw_message = if tail.is_empty() {
            headline
        } else {
            format!("{headline}; last output:\n{tail}")
        };
        Self {
            attempt: attempt.attempt_number,
            file: None,
            line: None,
            column: None,
            kind: ErrorKind::Unknown,
            raw_message,
            group_key: BUILD_GROUP_KEY.to_string(),
        }
    }

    /// First line of the message.
    pub fn headline(&self) -> &str {
        self.raw_message.lines().next().unwrap_or("")
    }

    /// `file:line: message` for prompts and reports.
    pub fn display_location(&self) -> String {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => format!("{}:{line}", file.display()),
            (Some(file), None) => file.display().to_string(),
            _ => BUILD_GROUP_KEY.to_string(),
        }
    }
}

/// Group key for `file`/`kind` under `policy`.
pub fn group_key(policy: GroupingPolicy, file: Option<&Path>, kind: ErrorKind) -> String {
    match (policy, file) {
        (_, None) => BUILD_GROUP_KEY.to_string(),
        (GroupingPolicy::ByFile, Some(f)) => f.display().to_string(),
        (GroupingPolicy::ByFileAndKind, Some(f)) => format!("{}#{kind}", f.display()),
    }
}

/// Parser state carried between lines.
enum Cursor {
    Idle,
    /// Appending continuation lines to `errors[idx]`.
    Collecting { idx: usize, taken: usize },
    /// Dropping the continuation lines of a warning.
    SkippingWarning,
}

/// Configured parser. Build once per run and reuse.
#[derive(Debug)]
pub struct ErrorParser {
    kind_patterns: Vec<(ErrorKind, Regex)>,
    grouping: GroupingPolicy,
    roots: Vec<PathBuf>,
}

impl ErrorParser {
    /// Compile configured kind patterns (checked first) followed by the
    /// built-in ones.
    pub fn new(config: &FixLoopConfig, project_root: &Path) -> Result<Self, ConfigError> {
        let mut kind_patterns = Vec::new();
        for extra in &config.kind_patterns {
            let re = Regex::new(&extra.pattern).map_err(|e| ConfigError::InvalidPattern {
                kind: extra.kind.to_string(),
                message: e.to_string(),
            })?;
            kind_patterns.push((extra.kind, re));
        }
        for (kind, pattern) in ErrorKind::default_patterns() {
            let re = Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                kind: kind.to_string(),
                message: e.to_string(),
            })?;
            kind_patterns.push((kind, re));
        }

        let mut roots = vec![project_root.to_path_buf()];
        if let Ok(canonical) = project_root.canonicalize() {
            if canonical != project_root {
                roots.push(canonical);
            }
        }

        Ok(Self {
            kind_patterns,
            grouping: config.grouping,
            roots,
        })
    }

    /// Kind for a diagnostic message.
    pub fn classify_message(&self, message: &str) -> ErrorKind {
        self.kind_patterns
            .iter()
            .find(|(_, re)| re.is_match(message))
            .map(|(kind, _)| *kind)
            .unwrap_or(ErrorKind::Unknown)
    }

    /// Extract every recognized diagnostic from `attempt`, in output order.
    pub fn parse(&self, attempt: &BuildAttempt) -> Vec<BuildError> {
        let output = attempt.combined_output();
        let lines: Vec<&str> = output.lines().map(|l| l.trim_end_matches('\r')).collect();

        let mut errors: Vec<BuildError> = Vec::new();
        let mut seen: HashSet<(Option<PathBuf>, Option<u32>, Option<u32>, String)> = HashSet::new();
        let mut cursor = Cursor::Idle;
        let mut resume_at = 0;

        for (i, line) in lines.iter().enumerate() {
            if i < resume_at {
                continue;
            }
            if WARNING_LINE.is_match(line) {
                cursor = Cursor::SkippingWarning;
                continue;
            }

            if let Some(diag) = self.match_diagnostic(line, &lines[i + 1..]) {
                resume_at = i + 1 + diag.consumed;
                let key = (
                    diag.file.clone(),
                    diag.line,
                    diag.column,
                    diag.message.clone(),
                );
                if !seen.insert(key) {
                    // Maven repeats each compiler error in its summary.
                    cursor = Cursor::SkippingWarning;
                    continue;
                }
                let kind = self.classify_message(&diag.message);
                let group_key = group_key(self.grouping, diag.file.as_deref(), kind);
                errors.push(BuildError {
                    attempt: attempt.attempt_number,
                    file: diag.file,
                    line: diag.line,
                    column: diag.column,
                    kind,
                    raw_message: diag.message,
                    group_key,
                });
                cursor = if diag.takes_continuation {
                    Cursor::Collecting {
                        idx: errors.len() - 1,
                        taken: 0,
                    }
                } else {
                    Cursor::Idle
                };
                continue;
            }

            cursor = match cursor {
                Cursor::Collecting { idx, taken } if is_continuation(line) => {
                    if taken < MAX_CONTINUATION_LINES {
                        errors[idx].raw_message.push('\n');
                        errors[idx].raw_message.push_str(line);
                    }
                    Cursor::Collecting {
                        idx,
                        taken: taken + 1,
                    }
                }
                Cursor::SkippingWarning if is_continuation(line) => Cursor::SkippingWarning,
                _ => Cursor::Idle,
            };
        }

        tracing::debug!(
            attempt = attempt.attempt_number,
            errors = errors.len(),
            "Parsed build output"
        );
        errors
    }

    fn match_diagnostic(&self, line: &str, rest: &[&str]) -> Option<Diagnostic> {
        let source_shapes = [
            &*JAVAC_ERROR,
            &*MAVEN_ERROR,
            &*KOTLIN_URI_ERROR,
            &*KOTLIN_PATH_ERROR,
            &*GROOVY_ERROR,
        ];
        for re in source_shapes {
            if let Some(caps) = re.captures(line) {
                return Some(self.located(&caps));
            }
        }
        if let Some(caps) = GRADLE_SCRIPT_ERROR.captures(line) {
            let file = caps.name("file").map(|m| self.relativize(m.as_str()));
            let line_no = caps.name("line").and_then(|m| m.as_str().parse().ok());
            let (message, consumed) = what_went_wrong(rest)
                .unwrap_or_else(|| ("build script error".to_string(), 0));
            return Some(Diagnostic {
                file,
                line: line_no,
                column: None,
                message,
                takes_continuation: false,
                consumed,
            });
        }
        if let Some(caps) = DEPENDENCY_ERROR.captures(line) {
            let message = caps.name("msg").map(|m| m.as_str()).unwrap_or(line);
            return Some(Diagnostic {
                file: None,
                line: None,
                column: None,
                message: message.to_string(),
                takes_continuation: false,
                consumed: 0,
            });
        }
        None
    }

    fn located(&self, caps: &regex::Captures<'_>) -> Diagnostic {
        Diagnostic {
            file: caps.name("file").map(|m| self.relativize(m.as_str())),
            line: caps.name("line").and_then(|m| m.as_str().parse().ok()),
            column: caps.name("col").and_then(|m| m.as_str().parse().ok()),
            message: caps
                .name("msg")
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default(),
            takes_continuation: true,
            consumed: 0,
        }
    }

    fn relativize(&self, raw: &str) -> PathBuf {
        let path = Path::new(raw);
        for root in &self.roots {
            if let Ok(rel) = path.strip_prefix(root) {
                return rel.to_path_buf();
            }
        }
        path.strip_prefix("./").unwrap_or(path).to_path_buf()
    }
}

struct Diagnostic {
    file: Option<PathBuf>,
    line: Option<u32>,
    column: Option<u32>,
    message: String,
    takes_continuation: bool,
    /// Following lines already folded into `message`.
    consumed: usize,
}

fn is_continuation(line: &str) -> bool {
    if line.trim().is_empty() {
        return false;
    }
    let trimmed = line.trim_start();
    if CONTINUATION_STOPS.iter().any(|s| line.starts_with(s) || trimmed.starts_with(s)) {
        return false;
    }
    // javac summary: "3 errors"
    let is_summary = trimmed
        .split_once(' ')
        .map(|(n, rest)| n.parse::<u32>().is_ok() && rest.starts_with("error"))
        .unwrap_or(false);
    !is_summary
}

/// Message under the `* What went wrong:` heading that follows a
/// Gradle `* Where:` block, and how many lines it spans from `rest[0]`.
fn what_went_wrong(rest: &[&str]) -> Option<(String, usize)> {
    let start = rest
        .iter()
        .take(8)
        .position(|l| l.trim_start().starts_with("* What went wrong:"))?;
    let block: Vec<&str> = rest[start + 1..]
        .iter()
        .take_while(|l| !l.trim().is_empty() && !l.starts_with("* "))
        .map(|l| l.trim())
        .collect();
    if block.is_empty() {
        return None;
    }
    let consumed = start + 1 + block.len();
    let message = block
        .into_iter()
        .take(MAX_CONTINUATION_LINES)
        .collect::<Vec<_>>()
        .join("\n");
    Some((message, consumed))
}

//! Build Runner: runs the project's build command and captures everything.
//!
//! Never fails: a non-zero exit, a command that cannot be spawned and a
//! timeout are all reported as data in the returned [`BuildAttempt`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

/// Exit code recorded when the build command could not be started.
pub const SPAWN_FAILURE_CODE: i32 = 127;

/// Gradle tasks compiled when no build command is configured.
pub const DEFAULT_GRADLE_TASKS: &str =
    "compileJava compileGroovy compileKotlin --console=plain --continue";

/// Time allowed for output readers to drain after the child is killed.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "code")]
pub enum BuildExit {
    Code(i32),
    /// Terminated by a signal.
    Killed,
    /// Killed by the runner after the timeout elapsed.
    TimedOut,
}

impl BuildExit {
    pub fn is_success(self) -> bool {
        self == Self::Code(0)
    }
}

impl std::fmt::Display for BuildExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code(c) => write!(f, "exit {c}"),
            Self::Killed => write!(f, "killed"),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

/// One execution of the build command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildAttempt {
    pub attempt_number: u32,
    pub command: String,
    pub exit: BuildExit,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
}

impl BuildAttempt {
    pub fn succeeded(&self) -> bool {
        self.exit.is_success()
    }

    /// stdout followed by stderr, the order the parser reads them in.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            return self.stdout.clone();
        }
        if self.stdout.is_empty() {
            return self.stderr.clone();
        }
        format!("{}\n{}", self.stdout, self.stderr)
    }

    /// Last `n` non-blank lines of the combined output.
    pub fn output_tail(&self, n: usize) -> String {
        let combined = self.combined_output();
        let lines: Vec<&str> = combined.lines().filter(|l| !l.trim().is_empty()).collect();
        lines[lines.len().saturating_sub(n)..].join("\n")
    }
}

#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub attempt_number: u32,
    pub project_path: PathBuf,
    pub command: String,
    pub timeout: Duration,
}

#[async_trait]
pub trait BuildRunner: Send + Sync {
    async fn run_build(&self, request: &BuildRequest) -> BuildAttempt;
}

/// Runs the build as a child process (no shell).
#[derive(Debug, Default, Clone)]
pub struct ProcessBuildRunner;

impl ProcessBuildRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BuildRunner for ProcessBuildRunner {
    async fn run_build(&self, request: &BuildRequest) -> BuildAttempt {
        let started_at = Utc::now();
        let start = Instant::now();

        let (exit, stdout, stderr) = match run_process(request).await {
            Ok(captured) => captured,
            Err(e) => {
                tracing::warn!(command = %request.command, error = %e, "Build command failed to start");
                (
                    BuildExit::Code(SPAWN_FAILURE_CODE),
                    String::new(),
                    format!("failed to start `{}`: {e}", request.command),
                )
            }
        };

        let attempt = BuildAttempt {
            attempt_number: request.attempt_number,
            command: request.command.clone(),
            exit,
            stdout,
            stderr,
            duration_ms: start.elapsed().as_millis() as u64,
            started_at,
        };
        tracing::info!(
            attempt = attempt.attempt_number,
            exit = %attempt.exit,
            duration_ms = attempt.duration_ms,
            "Build finished"
        );
        attempt
    }
}

async fn run_process(request: &BuildRequest) -> std::io::Result<(BuildExit, String, String)> {
    let parts = shlex::split(&request.command)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "unparseable command"))?;
    let (program, args) = parts
        .split_first()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"))?;

    let mut cmd = tokio::process::Command::new(resolve_program(program, &request.project_path));
    cmd.args(args)
        .current_dir(&request.project_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own process group so a kill reaches the whole build tree.
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn()?;

    let stdout_buf = Arc::new(Mutex::new(Vec::new()));
    let stderr_buf = Arc::new(Mutex::new(Vec::new()));
    let readers = [
        child.stdout.take().map(|s| spawn_reader(s, Arc::clone(&stdout_buf))),
        child.stderr.take().map(|s| spawn_reader(s, Arc::clone(&stderr_buf))),
    ];

    let exit = match tokio::time::timeout(request.timeout, child.wait()).await {
        Ok(status) => {
            let status = status?;
            for reader in readers.into_iter().flatten() {
                let _ = reader.await;
            }
            match status.code() {
                Some(code) => BuildExit::Code(code),
                None => BuildExit::Killed,
            }
        }
        Err(_) => {
            tracing::warn!(
                command = %request.command,
                timeout_secs = request.timeout.as_secs(),
                "Build timed out, killing"
            );
            let _ = child.kill().await;
            for reader in readers.into_iter().flatten() {
                let abort = reader.abort_handle();
                if tokio::time::timeout(DRAIN_GRACE, reader).await.is_err() {
                    // Grandchildren may still hold the pipe open.
                    abort.abort();
                }
            }
            BuildExit::TimedOut
        }
    };

    Ok((exit, take_lossy(&stdout_buf), take_lossy(&stderr_buf)))
}

/// `./gradlew` style programs resolve against the project directory.
fn resolve_program(program: &str, project: &Path) -> PathBuf {
    if program.starts_with("./") || program.starts_with(".\\") {
        project.join(program)
    } else {
        PathBuf::from(program)
    }
}

fn spawn_reader<R>(mut stream: R, sink: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut buf) = sink.lock() {
                        buf.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        }
    })
}

fn take_lossy(buf: &Arc<Mutex<Vec<u8>>>) -> String {
    match buf.lock() {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => String::new(),
    }
}

/// Pick a build command for `project`: Gradle wrapper, then Gradle, then
/// Maven. `None` when no build file is found.
pub fn detect_build_command(project: &Path) -> Option<String> {
    let wrapper = if cfg!(windows) { "gradlew.bat" } else { "gradlew" };
    if project.join(wrapper).is_file() {
        let prefix = if cfg!(windows) { "gradlew.bat" } else { "./gradlew" };
        return Some(format!("{prefix} {DEFAULT_GRADLE_TASKS}"));
    }
    let gradle_files = [
        "build.gradle",
        "build.gradle.kts",
        "settings.gradle",
        "settings.gradle.kts",
    ];
    if gradle_files.iter().any(|f| project.join(f).is_file()) {
        return Some(format!("gradle {DEFAULT_GRADLE_TASKS}"));
    }
    if project.join("pom.xml").is_file() {
        return Some("mvn -B -q compile".to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(dir: &Path, command: &str, timeout: Duration) -> BuildRequest {
        BuildRequest {
            attempt_number: 1,
            project_path: dir.to_path_buf(),
            command: command.to_string(),
            timeout,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_exit_and_streams() {
        let dir = tempfile::tempdir().unwrap();
        let attempt = ProcessBuildRunner::new()
            .run_build(&request(
                dir.path(),
                "sh -c 'echo compiling; echo Foo.java:1: error: boom >&2; exit 1'",
                Duration::from_secs(10),
            ))
            .await;
        assert_eq!(attempt.exit, BuildExit::Code(1));
        assert!(!attempt.succeeded());
        assert_eq!(attempt.stdout.trim(), "compiling");
        assert!(attempt.stderr.contains("error: boom"));
        assert_eq!(attempt.attempt_number, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_success() {
        let dir = tempfile::tempdir().unwrap();
        let attempt = ProcessBuildRunner::new()
            .run_build(&request(dir.path(), "true", Duration::from_secs(10)))
            .await;
        assert!(attempt.succeeded());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_keeps_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let attempt = ProcessBuildRunner::new()
            .run_build(&request(
                dir.path(),
                "sh -c 'echo started; sleep 30'",
                Duration::from_millis(500),
            ))
            .await;
        assert_eq!(attempt.exit, BuildExit::TimedOut);
        assert!(attempt.stdout.contains("started"));
        assert!(attempt.duration_ms < 10_000);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_data() {
        let dir = tempfile::tempdir().unwrap();
        let attempt = ProcessBuildRunner::new()
            .run_build(&request(
                dir.path(),
                "definitely-not-a-real-build-tool-xyz --flag",
                Duration::from_secs(5),
            ))
            .await;
        assert_eq!(attempt.exit, BuildExit::Code(SPAWN_FAILURE_CODE));
        assert!(attempt.stderr.contains("failed to start"));
    }

    #[test]
    fn test_detect_build_command() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_build_command(dir.path()), None);

        std::fs::write(dir.path().join("pom.xml"), "<project/>").unwrap();
        assert_eq!(
            detect_build_command(dir.path()).as_deref(),
            Some("mvn -B -q compile")
        );

        std::fs::write(dir.path().join("build.gradle.kts"), "").unwrap();
        assert!(detect_build_command(dir.path()).unwrap().starts_with("gradle compileJava"));

        #[cfg(unix)]
        {
            std::fs::write(dir.path().join("gradlew"), "#!/bin/sh\n").unwrap();
            assert!(detect_build_command(dir.path()).unwrap().starts_with("./gradlew "));
        }
    }

    #[test]
    fn test_output_tail() {
        let attempt = BuildAttempt {
            attempt_number: 2,
            command: "gradle".into(),
            exit: BuildExit::Code(1),
            stdout: "a\nb\n\n".into(),
            stderr: "c\nd".into(),
            duration_ms: 0,
            started_at: Utc::now(),
        };
        assert_eq!(attempt.output_tail(3), "b\nc\nd");
        assert_eq!(BuildExit::TimedOut.to_string(), "timed out");
    }
}

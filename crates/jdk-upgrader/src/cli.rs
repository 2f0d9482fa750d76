//! Command line, configuration assembly and report output.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use buildfix::{
    AutoApprove, FixLoop, FixLoopConfig, LlmFixRequester, LoopOutcome, ProcessBuildRunner,
    ReviewCollaborator, Session, SessionReport,
};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::EndpointConfig;
use crate::llm::ChatClient;
use crate::plan;
use crate::review::TerminalReviewer;

/// Exit code for failures before the loop could run.
pub const SETUP_ERROR: u8 = 3;

/// Upgrade a Gradle/Maven project to a newer JDK: apply planned changes,
/// then build and fix until the build passes.
#[derive(Debug, Parser)]
#[command(name = "jdk-upgrader", version, about)]
pub struct Args {
    /// Project root.
    #[arg(long, default_value = ".")]
    pub project_path: PathBuf,

    /// Show the planned patches without reviewing, applying or building.
    #[arg(long)]
    pub dry_run: bool,

    /// Approve every patch without asking.
    #[arg(long)]
    pub auto_approve: bool,

    /// Only patch files matching this glob (repeatable).
    #[arg(long = "include", value_name = "PATTERN")]
    pub include: Vec<String>,

    /// JSON plan of initial changes to apply before the first build.
    #[arg(long, value_name = "FILE")]
    pub plan: Option<PathBuf>,

    /// TOML configuration for the fix loop.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Build command (default: detected Gradle wrapper, Gradle or Maven).
    #[arg(long, value_name = "CMD")]
    pub build_command: Option<String>,

    /// Fix requests allowed per error group.
    #[arg(long, value_name = "N")]
    pub max_attempts: Option<u32>,

    /// Maximum number of builds.
    #[arg(long = "max-cycles", value_name = "N")]
    pub max_cycles: Option<u32>,

    /// JDK version to target.
    #[arg(long, value_name = "VERSION")]
    pub target_jdk: Option<String>,

    /// Revert every applied patch when the run does not end with a passing build.
    #[arg(long)]
    pub rollback_on_failure: bool,

    /// Print the report as JSON on stdout.
    #[arg(long)]
    pub json: bool,
}

impl Args {
    /// Config file (or defaults) with flags and endpoint settings applied.
    pub fn fix_loop_config(&self, endpoint: &EndpointConfig) -> Result<FixLoopConfig> {
        let mut config = match &self.config {
            Some(path) => FixLoopConfig::from_toml_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => FixLoopConfig::default(),
        };
        if let Some(cmd) = &self.build_command {
            config.build_command = Some(cmd.clone());
        }
        if let Some(n) = self.max_attempts {
            config.max_attempts = n;
        }
        if let Some(n) = self.max_cycles {
            config.max_build_cycles = n;
        }
        if let Some(jdk) = &self.target_jdk {
            config.target_jdk = jdk.clone();
        }
        if !self.include.is_empty() {
            config.include = self.include.clone();
        }
        if self.rollback_on_failure {
            config.rollback_on_failure = true;
        }
        if config.extra_prompt.is_none() {
            config.extra_prompt = endpoint.extra_prompt.clone();
        }
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

pub fn exit_code(outcome: Option<LoopOutcome>) -> u8 {
    match outcome {
        None | Some(LoopOutcome::Done) => 0,
        Some(LoopOutcome::Exhausted) => 1,
        Some(LoopOutcome::Aborted) => 2,
    }
}

/// Human-readable report.
pub fn render_report(report: &SessionReport) -> String {
    let mut out = String::new();
    if report.dry_run {
        out.push_str(&format!("Dry run: {} planned patch(es)\n", report.planned.len()));
        for patch in &report.planned {
            out.push('\n');
            out.push_str(&patch.diff_summary);
        }
        return out;
    }

    out.push_str(&format!(
        "Initial patches: {} applied, {} skipped, {} conflict(s)\n",
        report.initial_applied,
        report.skipped.len(),
        report.conflicts.len()
    ));
    for skipped in &report.skipped {
        out.push_str(&format!("  skipped {}: {}\n", skipped.target_file.display(), skipped.reason));
    }

    let Some(run) = &report.fix_loop else {
        return out;
    };
    out.push_str(&format!("Result: {}\n", run.summary()));
    for applied in &run.applied {
        out.push_str(&format!("  patched {}\n", applied.patch.target_file.display()));
    }
    for conflict in &run.conflicts {
        out.push_str(&format!("  conflict {} (changed on disk, left as is)\n", conflict.display()));
    }
    if !run.surfaced.is_empty() {
        out.push_str("Needs attention:\n");
        for item in &run.surfaced {
            out.push_str(&format!(
                "  {}: {} ({})\n",
                item.error.display_location(),
                item.error.headline(),
                item.reason
            ));
        }
    }
    for record in run.records.iter().filter(|r| r.attempt_count > 0) {
        out.push_str(&format!(
            "  {}: {}/{} attempt(s), last {:?}\n",
            record.group_key, record.attempt_count, record.max_attempts, record.last_outcome
        ));
    }
    if !run.rolled_back.is_empty() {
        out.push_str(&format!("Rolled back {} file(s)\n", run.rolled_back.len()));
    }
    for failed in &run.rollback_failures {
        out.push_str(&format!("  could not roll back {}\n", failed.display()));
    }
    out
}

pub async fn run(args: Args) -> Result<ExitCode> {
    let project = args
        .project_path
        .canonicalize()
        .with_context(|| format!("Project path {} not found", args.project_path.display()))?;

    let endpoint = EndpointConfig::from_env();
    let config = args.fix_loop_config(&endpoint)?;
    info!(
        project = %project.display(),
        llm = %endpoint.completions_url(),
        model = %endpoint.model,
        target_jdk = %config.target_jdk,
        "JDK upgrader starting"
    );

    let client = ChatClient::new(endpoint).context("Failed to build LLM client")?;
    let requester = Arc::new(LlmFixRequester::new(Arc::new(client), &config));
    let token = CancellationToken::new();
    let reviewer: Arc<dyn ReviewCollaborator> = if args.auto_approve {
        Arc::new(AutoApprove)
    } else {
        Arc::new(TerminalReviewer::new(token.clone()))
    };

    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping after the current step");
            ctrl_c.cancel();
        }
    });

    let fix_loop = FixLoop::new(
        config,
        &project,
        Arc::new(ProcessBuildRunner::new()),
        requester,
        reviewer,
    )
    .context("Failed to set up the build-fix loop")?
    .with_cancellation(token);

    let initial = match &args.plan {
        Some(path) => plan::load_plan(path, &project)?,
        None => Vec::new(),
    };

    let report = Session::new(fix_loop)
        .dry_run(args.dry_run)
        .run(initial)
        .await
        .context("Build-fix loop failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_report(&report));
    }
    Ok(ExitCode::from(exit_code(report.outcome())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> EndpointConfig {
        EndpointConfig::from_lookup(|_| None)
    }

    #[test]
    fn test_flags_parse() {
        let args = Args::try_parse_from([
            "jdk-upgrader",
            "--project-path",
            "/p",
            "--include",
            "src/**",
            "--include",
            "lib/**",
            "--max-attempts",
            "5",
            "--max-cycles",
            "4",
            "--dry-run",
            "--json",
        ])
        .unwrap();
        assert_eq!(args.project_path, PathBuf::from("/p"));
        assert_eq!(args.include, vec!["src/**", "lib/**"]);
        assert!(args.dry_run && args.json);
        assert!(!args.auto_approve);

        let config = args.fix_loop_config(&endpoint()).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.max_build_cycles, 4);
        assert_eq!(config.include, vec!["src/**", "lib/**"]);
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buildfix.toml");
        std::fs::write(&path, "max_attempts = 7\nbuild_timeout_secs = 30\n").unwrap();
        let args = Args::try_parse_from([
            "jdk-upgrader",
            "--config",
            path.to_str().unwrap(),
            "--build-command",
            "mvn -q compile",
            "--rollback-on-failure",
        ])
        .unwrap();
        let config = args.fix_loop_config(&endpoint()).unwrap();
        assert_eq!(config.max_attempts, 7);
        assert_eq!(config.build_timeout_secs, 30);
        assert_eq!(config.build_command.as_deref(), Some("mvn -q compile"));
        assert!(config.rollback_on_failure);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let args = Args::try_parse_from(["jdk-upgrader", "--max-attempts", "0"]).unwrap();
        assert!(args.fix_loop_config(&endpoint()).is_err());
    }

    #[test]
    fn test_extra_prompt_from_endpoint() {
        let args = Args::try_parse_from(["jdk-upgrader"]).unwrap();
        let mut endpoint = endpoint();
        endpoint.extra_prompt = Some("Keep Lombok.".into());
        let config = args.fix_loop_config(&endpoint).unwrap();
        assert_eq!(config.extra_prompt.as_deref(), Some("Keep Lombok."));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(Some(LoopOutcome::Done)), 0);
        assert_eq!(exit_code(None), 0);
        assert_eq!(exit_code(Some(LoopOutcome::Exhausted)), 1);
        assert_eq!(exit_code(Some(LoopOutcome::Aborted)), 2);
    }
}

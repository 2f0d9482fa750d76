//! End-to-end runs of the command through `cli::run`.

use std::fs;
use std::process::ExitCode;

use clap::Parser;
use jdk_upgrader::cli::{self, Args};

const SOURCE: &str = "package a;\nimport javax.xml.bind.JAXB;\nclass A {}\n";
const PLAN: &str = r#"{
  "summary": "jakarta",
  "changes": [{
    "reason": "javax.xml.bind is gone",
    "location": {"file_path": "src/A.java", "start_line": 2, "end_line": 2},
    "kind": "update",
    "before": "import javax.xml.bind.JAXB;",
    "after": "import jakarta.xml.bind.JAXB;"
  }]
}"#;

fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("src/A.java"), SOURCE).unwrap();
    fs::write(dir.path().join("plan.json"), PLAN).unwrap();
    dir
}

fn args(dir: &tempfile::TempDir, extra: &[&str]) -> Args {
    let root = dir.path().to_str().unwrap().to_string();
    let plan = dir.path().join("plan.json").to_str().unwrap().to_string();
    let mut argv = vec![
        "jdk-upgrader".to_string(),
        "--project-path".to_string(),
        root,
        "--plan".to_string(),
        plan,
    ];
    argv.extend(extra.iter().map(|s| s.to_string()));
    Args::try_parse_from(argv).unwrap()
}

#[tokio::test]
async fn test_dry_run_leaves_project_untouched() {
    let dir = project();
    let code = cli::run(args(&dir, &["--dry-run", "--build-command", "false"]))
        .await
        .unwrap();
    assert_eq!(code, ExitCode::from(0));
    assert_eq!(fs::read_to_string(dir.path().join("src/A.java")).unwrap(), SOURCE);
}

#[cfg(unix)]
#[tokio::test]
async fn test_plan_applied_and_build_passes() {
    let dir = project();
    let code = cli::run(args(&dir, &["--auto-approve", "--build-command", "true", "--json"]))
        .await
        .unwrap();
    assert_eq!(code, ExitCode::from(0));
    assert_eq!(
        fs::read_to_string(dir.path().join("src/A.java")).unwrap(),
        "package a;\nimport jakarta.xml.bind.JAXB;\nclass A {}\n"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_failing_build_without_diagnostics_aborts_and_rolls_back() {
    let dir = project();
    let code = cli::run(args(
        &dir,
        &["--auto-approve", "--build-command", "false", "--rollback-on-failure"],
    ))
    .await
    .unwrap();
    assert_eq!(code, ExitCode::from(2));
    assert_eq!(fs::read_to_string(dir.path().join("src/A.java")).unwrap(), SOURCE);
}

#[tokio::test]
async fn test_missing_project_is_setup_error() {
    let argv = ["jdk-upgrader", "--project-path", "/definitely/not/here", "--dry-run"];
    let err = cli::run(Args::try_parse_from(argv).unwrap()).await.unwrap_err();
    assert!(err.to_string().contains("not found"));
}

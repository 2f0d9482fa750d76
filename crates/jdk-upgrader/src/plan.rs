//! Initial modernization plans.
//!
//! A plan file holds one or more structured responses (the same shape the
//! fix requester asks the model for), typically produced by an analyzer
//! pass. Changes are grouped by file and composed onto the file's current
//! content, giving one [`Patch`] per file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use buildfix::patch::compose;
use buildfix::{Patch, PatchEngine, StructuredChange, StructuredResponse};
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(untagged)]
enum PlanFile {
    Many(Vec<StructuredResponse>),
    One(StructuredResponse),
}

/// Parse a plan document.
pub fn parse_plan(text: &str) -> Result<Vec<StructuredResponse>> {
    let plan: PlanFile = serde_json::from_str(text).context("Plan is not valid JSON")?;
    Ok(match plan {
        PlanFile::Many(responses) => responses,
        PlanFile::One(response) => vec![response],
    })
}

/// Turn responses into one patch per file, in path order. Files whose
/// changes compose to their current content are dropped.
pub fn patches_from_plan(
    responses: &[StructuredResponse],
    project_root: &Path,
) -> Result<Vec<Patch>> {
    let mut by_file: BTreeMap<PathBuf, Vec<StructuredChange>> = BTreeMap::new();
    for response in responses {
        for change in &response.changes {
            let file = change.location.file_path.trim().trim_start_matches("./");
            if file.is_empty() {
                bail!("Plan change '{}' has no file_path", change.reason);
            }
            by_file
                .entry(PathBuf::from(file))
                .or_default()
                .push(change.clone());
        }
    }

    let engine = PatchEngine::new(project_root);
    let mut patches = Vec::new();
    for (file, changes) in by_file {
        let rel = file.strip_prefix(project_root).unwrap_or(&file).to_path_buf();
        let original = engine
            .snapshot(&rel)
            .with_context(|| format!("Failed to read {} for plan", rel.display()))?;
        let proposed = compose(&original, &changes)
            .with_context(|| format!("Plan changes for {} do not apply", rel.display()))?;
        let patch = Patch::new(rel, original, proposed);
        if patch.is_noop() {
            tracing::info!(file = %patch.target_file.display(), "Plan leaves file unchanged");
            continue;
        }
        patches.push(patch);
    }
    Ok(patches)
}

/// Load `path` and build its patches against `project_root`.
pub fn load_plan(path: &Path, project_root: &Path) -> Result<Vec<Patch>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan {}", path.display()))?;
    let responses = parse_plan(&text).with_context(|| format!("In plan {}", path.display()))?;
    let patches = patches_from_plan(&responses, project_root)?;
    tracing::info!(plan = %path.display(), patches = patches.len(), "Loaded modernization plan");
    Ok(patches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const PLAN: &str = r#"[
      {
        "summary": "jakarta migration",
        "changes": [
          {
            "reason": "javax.xml.bind moved to jakarta",
            "location": {"file_path": "src/A.java", "start_line": 2, "end_line": 2},
            "kind": "update",
            "before": "import javax.xml.bind.JAXB;",
            "after": "import jakarta.xml.bind.JAXB;"
          }
        ]
      },
      {
        "summary": "remove finalizer",
        "changes": [
          {
            "reason": "finalize is deprecated for removal",
            "location": {"file_path": "src/A.java", "start_line": 4, "end_line": 4},
            "change_type": "delete",
            "before": "    protected void finalize() {}",
            "after": ""
          }
        ]
      }
    ]"#;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(
            dir.path().join("src/A.java"),
            "package a;\nimport javax.xml.bind.JAXB;\nclass A {\n    protected void finalize() {}\n}\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_changes_for_one_file_become_one_patch() {
        let dir = project();
        let responses = parse_plan(PLAN).unwrap();
        let patches = patches_from_plan(&responses, dir.path()).unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].target_file, PathBuf::from("src/A.java"));
        assert_eq!(
            patches[0].proposed_content,
            "package a;\nimport jakarta.xml.bind.JAXB;\nclass A {\n}\n"
        );
    }

    #[test]
    fn test_single_response_accepted() {
        let one = r#"{"summary": "s", "changes": []}"#;
        assert_eq!(parse_plan(one).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let responses = parse_plan(PLAN).unwrap();
        let err = patches_from_plan(&responses, dir.path()).unwrap_err();
        assert!(err.to_string().contains("src/A.java"));
    }

    #[test]
    fn test_load_plan_from_file() {
        let dir = project();
        let plan = dir.path().join("plan.json");
        fs::write(&plan, PLAN).unwrap();
        assert_eq!(load_plan(&plan, dir.path()).unwrap().len(), 1);
    }
}

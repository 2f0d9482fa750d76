//! Patch Engine: reversible, conflict-checked whole-file replacement.
//!
//! A [`Patch`] carries the snapshot it was built from. `apply` refuses to
//! write when the file on disk no longer hashes to that snapshot, and every
//! write goes through a temp file in the same directory followed by a rename,
//! so a crash leaves either the old or the new content, never a mix.
//! `revert` is the inverse of `apply` and is subject to the same check.

pub mod compose;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

use crate::error::PatchError;

pub use compose::{compose, ChangeKind, ChangeLocation, StructuredChange, StructuredResponse};

/// Lines of context in `diff_summary`.
const DIFF_CONTEXT: usize = 3;

/// A proposed full replacement of one file's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    /// Path relative to the project root.
    pub target_file: PathBuf,
    pub original_content: String,
    pub proposed_content: String,
    pub diff_summary: String,
}

impl Patch {
    pub fn new(
        target_file: impl Into<PathBuf>,
        original_content: impl Into<String>,
        proposed_content: impl Into<String>,
    ) -> Self {
        let target_file = target_file.into();
        let original_content = original_content.into();
        let proposed_content = proposed_content.into();
        let diff_summary = diff_summary(&target_file, &original_content, &proposed_content);
        Self {
            target_file,
            original_content,
            proposed_content,
            diff_summary,
        }
    }

    /// Same target and snapshot, different proposal (reviewer edits).
    pub fn with_proposed(&self, proposed_content: impl Into<String>) -> Self {
        Self::new(
            self.target_file.clone(),
            self.original_content.clone(),
            proposed_content,
        )
    }

    /// True when applying would not change the file.
    pub fn is_noop(&self) -> bool {
        self.original_content == self.proposed_content
    }

    pub fn original_hash(&self) -> String {
        content_hash(self.original_content.as_bytes())
    }
}

/// Record of a patch that was written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedPatch {
    pub patch: Patch,
    pub original_hash: String,
    pub applied_hash: String,
    pub applied_at: DateTime<Utc>,
}

/// Applies and reverts patches against files under one project root.
#[derive(Debug, Clone)]
pub struct PatchEngine {
    root: PathBuf,
}

impl PatchEngine {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for a project-relative target.
    pub fn resolve(&self, target: &Path) -> PathBuf {
        if target.is_absolute() {
            target.to_path_buf()
        } else {
            self.root.join(target)
        }
    }

    /// Read the current content of `target` as a snapshot for a new patch.
    pub fn snapshot(&self, target: &Path) -> Result<String, PatchError> {
        let path = self.resolve(target);
        let bytes = fs::read(&path).map_err(|e| PatchError::io(&path, e))?;
        String::from_utf8(bytes).map_err(|_| PatchError::NotText { path })
    }

    /// Write `patch.proposed_content` if the file still matches the snapshot.
    ///
    /// On conflict the file is not touched.
    pub fn apply(&self, patch: &Patch) -> Result<AppliedPatch, PatchError> {
        let path = self.resolve(&patch.target_file);
        let original_hash = patch.original_hash();

        let current = fs::read(&path).map_err(|e| PatchError::io(&path, e))?;
        if content_hash(&current) != original_hash {
            tracing::warn!(file = %patch.target_file.display(), "Snapshot mismatch, refusing to apply");
            return Err(PatchError::conflict(&patch.target_file));
        }

        write_atomic(&path, patch.proposed_content.as_bytes())?;

        let applied = AppliedPatch {
            patch: patch.clone(),
            original_hash,
            applied_hash: content_hash(patch.proposed_content.as_bytes()),
            applied_at: Utc::now(),
        };
        tracing::info!(
            file = %patch.target_file.display(),
            hash = %short(&applied.applied_hash),
            "Patch applied"
        );
        Ok(applied)
    }

    /// Restore the snapshot byte-for-byte if the file still holds the
    /// applied content.
    pub fn revert(&self, applied: &AppliedPatch) -> Result<(), PatchError> {
        let path = self.resolve(&applied.patch.target_file);
        let current = fs::read(&path).map_err(|e| PatchError::io(&path, e))?;
        if content_hash(&current) != applied.applied_hash {
            tracing::warn!(
                file = %applied.patch.target_file.display(),
                "File changed after apply, refusing to revert"
            );
            return Err(PatchError::conflict(&applied.patch.target_file));
        }

        write_atomic(&path, applied.patch.original_content.as_bytes())?;
        tracing::info!(file = %applied.patch.target_file.display(), "Patch reverted");
        Ok(())
    }
}

/// blake3 hex digest.
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

/// Temp file next to the target, then rename over it. Keeps the target's
/// permissions.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PatchError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{file_name}.buildfix.tmp"));

    let write = || -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        if let Ok(meta) = fs::metadata(path) {
            fs::set_permissions(&tmp_path, meta.permissions())?;
        }
        fs::rename(&tmp_path, path)
    };

    write().map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        PatchError::io(path, e)
    })
}

/// `path: +N -M` header followed by a unified diff.
fn diff_summary(path: &Path, original: &str, proposed: &str) -> String {
    let diff = TextDiff::from_lines(original, proposed);
    let (mut inserted, mut deleted) = (0usize, 0usize);
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => inserted += 1,
            ChangeTag::Delete => deleted += 1,
            ChangeTag::Equal => {}
        }
    }
    let display = path.display().to_string();
    let body = diff
        .unified_diff()
        .context_radius(DIFF_CONTEXT)
        .header(&format!("a/{display}"), &format!("b/{display}"))
        .to_string();
    format!("{display}: +{inserted} -{deleted}\n{body}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_with(name: &str, content: &str) -> (tempfile::TempDir, PatchEngine) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        let engine = PatchEngine::new(dir.path());
        (dir, engine)
    }

    #[test]
    fn test_diff_summary_header() {
        let patch = Patch::new("src/Foo.java", "a\nb\nc\n", "a\nB\nc\nd\n");
        assert!(patch.diff_summary.starts_with("src/Foo.java: +2 -1\n"));
        assert!(patch.diff_summary.contains("--- a/src/Foo.java"));
        assert!(patch.diff_summary.contains("+B"));
        assert!(patch.diff_summary.contains("-b"));
    }

    #[test]
    fn test_apply_then_revert_restores_bytes() {
        let original = "class Foo {\r\n  int x;\r\n}\r\n";
        let (dir, engine) = project_with("src/Foo.java", original);
        let patch = Patch::new("src/Foo.java", original, "class Foo {\r\n  long x;\r\n}\r\n");

        let applied = engine.apply(&patch).unwrap();
        let on_disk = fs::read_to_string(dir.path().join("src/Foo.java")).unwrap();
        assert_eq!(on_disk, patch.proposed_content);
        assert_eq!(applied.original_hash, content_hash(original.as_bytes()));

        engine.revert(&applied).unwrap();
        let bytes = fs::read(dir.path().join("src/Foo.java")).unwrap();
        assert_eq!(bytes, original.as_bytes());
    }

    #[test]
    fn test_conflict_leaves_file_untouched() {
        let (dir, engine) = project_with("Foo.java", "old\n");
        let patch = Patch::new("Foo.java", "old\n", "new\n");
        fs::write(dir.path().join("Foo.java"), "edited by someone else\n").unwrap();

        let err = engine.apply(&patch).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(
            fs::read_to_string(dir.path().join("Foo.java")).unwrap(),
            "edited by someone else\n"
        );
    }

    #[test]
    fn test_revert_conflict_when_changed_after_apply() {
        let (dir, engine) = project_with("Foo.java", "old\n");
        let applied = engine.apply(&Patch::new("Foo.java", "old\n", "new\n")).unwrap();
        fs::write(dir.path().join("Foo.java"), "newer\n").unwrap();

        assert!(engine.revert(&applied).unwrap_err().is_conflict());
        assert_eq!(
            fs::read_to_string(dir.path().join("Foo.java")).unwrap(),
            "newer\n"
        );
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let (dir, engine) = project_with("Foo.java", "old\n");
        engine.apply(&Patch::new("Foo.java", "old\n", "new\n")).unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["Foo.java".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_apply_preserves_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let (dir, engine) = project_with("gradlew", "#!/bin/sh\n");
        let path = dir.path().join("gradlew");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

        engine
            .apply(&Patch::new("gradlew", "#!/bin/sh\n", "#!/bin/sh\nexit 0\n"))
            .unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = PatchEngine::new(dir.path());
        let err = engine.apply(&Patch::new("Nope.java", "", "x")).unwrap_err();
        assert!(matches!(err, PatchError::Io { .. }));
    }

    #[test]
    fn test_snapshot_rejects_binary() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lib.jar"), [0xff, 0xfe, 0x00, 0x80]).unwrap();
        let engine = PatchEngine::new(dir.path());
        assert!(matches!(
            engine.snapshot(Path::new("lib.jar")),
            Err(PatchError::NotText { .. })
        ));
    }

    #[test]
    fn test_with_proposed_keeps_snapshot() {
        let patch = Patch::new("A.kt", "val a = 1\n", "val a = 2\n");
        let edited = patch.with_proposed("val a = 3\n");
        assert_eq!(edited.original_content, patch.original_content);
        assert!(edited.diff_summary.contains("+val a = 3"));
        assert!(!edited.is_noop());
        assert!(Patch::new("A.kt", "x", "x").is_noop());
    }
}

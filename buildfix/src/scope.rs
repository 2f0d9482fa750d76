//! Which project files the loop is allowed to patch.
//!
//! `include` globs narrow the set (empty = whole project) and `skip` globs
//! remove build output, generated sources and the like. Globs use gitignore
//! syntax relative to the project root.

use std::path::{Path, PathBuf};

use ignore::overrides::{Override, OverrideBuilder};

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Scope {
    root: PathBuf,
    include: Option<Override>,
    skip: Option<Override>,
}

impl Scope {
    pub fn new(root: &Path, include: &[String], skip: &[String]) -> Result<Self, ConfigError> {
        Ok(Self {
            root: root.to_path_buf(),
            include: build_globs(root, include)?,
            skip: build_globs(root, skip)?,
        })
    }

    /// Whole project, nothing skipped.
    pub fn everything(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            include: None,
            skip: None,
        }
    }

    /// `None` when `rel` may be patched, otherwise the reason it may not.
    pub fn exclusion_reason(&self, rel: &Path) -> Option<String> {
        let rel = rel.strip_prefix(&self.root).unwrap_or(rel);
        if rel.is_absolute() || rel.components().any(|c| c == std::path::Component::ParentDir) {
            return Some(format!("{} is outside the project", rel.display()));
        }
        if let Some(skip) = &self.skip {
            if skip.matched(rel, false).is_whitelist() {
                return Some(format!("{} matches a skip pattern", rel.display()));
            }
        }
        if let Some(include) = &self.include {
            if !include.matched(rel, false).is_whitelist() {
                return Some(format!("{} is outside the include scope", rel.display()));
            }
        }
        None
    }

    pub fn contains(&self, rel: &Path) -> bool {
        self.exclusion_reason(rel).is_none()
    }
}

fn build_globs(root: &Path, globs: &[String]) -> Result<Option<Override>, ConfigError> {
    if globs.is_empty() {
        return Ok(None);
    }
    let mut builder = OverrideBuilder::new(root);
    for glob in globs {
        builder.add(glob).map_err(|e| ConfigError::InvalidGlob {
            glob: glob.clone(),
            message: e.to_string(),
        })?;
    }
    let built = builder.build().map_err(|e| ConfigError::InvalidGlob {
        glob: globs.join(", "),
        message: e.to_string(),
    })?;
    Ok(Some(built))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_SKIP;

    fn strings(globs: &[&str]) -> Vec<String> {
        globs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_skip() {
        let scope = Scope::new(Path::new("/p"), &[], &strings(DEFAULT_SKIP)).unwrap();
        assert!(scope.contains(Path::new("src/main/java/Foo.java")));
        assert!(!scope.contains(Path::new("build/generated/Foo.java")));
        assert!(!scope.contains(Path::new("app/src/generated/Bar.java")));
        assert!(!scope.contains(Path::new("target/classes/X.java")));
    }

    #[test]
    fn test_include_narrows() {
        let scope = Scope::new(Path::new("/p"), &strings(&["src/main/**"]), &[]).unwrap();
        assert!(scope.contains(Path::new("src/main/java/Foo.java")));
        let reason = scope.exclusion_reason(Path::new("src/test/java/FooTest.java")).unwrap();
        assert!(reason.contains("include scope"));
    }

    #[test]
    fn test_outside_project() {
        let scope = Scope::everything(Path::new("/p"));
        assert!(!scope.contains(Path::new("../other/Foo.java")));
        assert!(!scope.contains(Path::new("/etc/passwd")));
        assert!(scope.contains(Path::new("/p/src/Foo.java")));
    }

    #[test]
    fn test_invalid_glob() {
        let err = Scope::new(Path::new("/p"), &strings(&["src/[a"]), &[]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidGlob { .. }));
    }
}

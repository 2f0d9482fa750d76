//! Source context for fix prompts.
//!
//! Small files are sent whole. Larger files are cut down to the package /
//! import header plus a window of lines around every error, with overlapping
//! or adjacent windows merged. All lines carry their 1-based number so the
//! model can answer with line ranges.

use std::path::Path;

/// A 1-based, inclusive line range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineWindow {
    pub start: usize,
    pub end: usize,
}

/// What a prompt shows of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceContext {
    /// The whole file is in `sections[0]`.
    pub whole_file: bool,
    /// Numbered excerpts in file order. When windowed, the header (if any)
    /// comes first.
    pub sections: Vec<String>,
}

/// Windows of `context` lines on each side of each error line, merged.
pub fn error_windows(error_lines: &[u32], context: usize, line_count: usize) -> Vec<LineWindow> {
    if line_count == 0 {
        return Vec::new();
    }
    let windows = error_lines
        .iter()
        .map(|&l| (l as usize).clamp(1, line_count))
        .map(|l| LineWindow {
            start: l.saturating_sub(context).max(1),
            end: (l + context).min(line_count),
        })
        .collect();
    merge_windows(windows)
}

/// Merge overlapping or adjacent windows into contiguous ranges.
pub fn merge_windows(mut windows: Vec<LineWindow>) -> Vec<LineWindow> {
    windows.sort_by_key(|w| w.start);
    let mut merged: Vec<LineWindow> = Vec::new();
    for w in windows {
        if let Some(last) = merged.last_mut() {
            if w.start <= last.end + 1 {
                last.end = last.end.max(w.end);
                continue;
            }
        }
        merged.push(w);
    }
    merged
}

/// `lines[start..=end]` (1-based) with right-aligned line numbers.
pub fn format_lines(lines: &[&str], start: usize, end: usize) -> String {
    let end = end.min(lines.len());
    if start == 0 || start > end {
        return String::new();
    }
    lines[start - 1..end]
        .iter()
        .enumerate()
        .map(|(i, l)| format!("{:5} | {}", start + i, l))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Number of leading lines that make up the package / import block.
pub fn header_len(lines: &[&str]) -> usize {
    let mut last_header = 0;
    for (i, line) in lines.iter().enumerate() {
        let t = line.trim_start();
        if t.starts_with("package ") || t.starts_with("import ") || t.starts_with("@file:") {
            last_header = i + 1;
        } else if t.is_empty()
            || t.starts_with("//")
            || t.starts_with("/*")
            || t.starts_with('*')
        {
            continue;
        } else {
            break;
        }
    }
    last_header
}

/// Build the context for `source` given the group's error lines.
pub fn source_context(
    source: &str,
    error_lines: &[u32],
    context_lines: usize,
    max_full_file_bytes: usize,
) -> SourceContext {
    let lines: Vec<&str> = source.lines().collect();

    if source.len() <= max_full_file_bytes {
        return SourceContext {
            whole_file: true,
            sections: vec![format_lines(&lines, 1, lines.len())],
        };
    }

    let header = header_len(&lines);
    let mut windows = if error_lines.is_empty() {
        // No line numbers: the header plus the start of the body.
        vec![LineWindow {
            start: 1,
            end: (header + 2 * context_lines + 1).min(lines.len()),
        }]
    } else {
        error_windows(error_lines, context_lines, lines.len())
    };
    let mut sections = Vec::new();
    if header > 0 {
        // Windows inside the header are already covered.
        windows.retain(|w| w.end > header);
        for w in &mut windows {
            w.start = w.start.max(header + 1);
        }
        sections.push(format_lines(&lines, 1, header));
    }
    sections.extend(windows.iter().map(|w| format_lines(&lines, w.start, w.end)));

    SourceContext {
        whole_file: false,
        sections,
    }
}

/// Language name for the prompt, from the file extension.
pub fn language_for(path: &Path) -> &'static str {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if name.ends_with(".gradle") || name.ends_with(".gradle.kts") {
        return "gradle";
    }
    match path.extension().and_then(|e| e.to_str()) {
        Some("java") => "java",
        Some("groovy") => "groovy",
        Some("kt") | Some("kts") => "kotlin",
        Some("xml") => "xml",
        Some("properties") => "properties",
        _ => "text",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_windows() {
        let merged = merge_windows(vec![
            LineWindow { start: 40, end: 60 },
            LineWindow { start: 1, end: 10 },
            LineWindow { start: 11, end: 20 },
            LineWindow { start: 55, end: 70 },
        ]);
        assert_eq!(
            merged,
            vec![LineWindow { start: 1, end: 20 }, LineWindow { start: 40, end: 70 }]
        );
    }

    #[test]
    fn test_error_windows_clamped() {
        let windows = error_windows(&[2, 99], 3, 50);
        assert_eq!(
            windows,
            vec![LineWindow { start: 1, end: 5 }, LineWindow { start: 47, end: 50 }]
        );
    }

    #[test]
    fn test_header_len() {
        let src = "// license\npackage a.b;\n\nimport java.util.List;\nimport javax.xml.bind.JAXB;\n\npublic class Foo {}\n";
        let lines: Vec<&str> = src.lines().collect();
        assert_eq!(header_len(&lines), 5);
    }

    #[test]
    fn test_small_file_sent_whole() {
        let ctx = source_context("a\nb\n", &[1], 8, 12_000);
        assert!(ctx.whole_file);
        assert_eq!(ctx.sections, vec!["    1 | a\n    2 | b".to_string()]);
    }

    #[test]
    fn test_large_file_windowed_with_header() {
        let mut src = String::from("package p;\nimport java.util.List;\n");
        for i in 3..=200 {
            src.push_str(&format!("    int f{i} = {i};\n"));
        }
        let ctx = source_context(&src, &[100], 2, 100);
        assert!(!ctx.whole_file);
        assert_eq!(ctx.sections.len(), 2);
        assert!(ctx.sections[0].contains("import java.util.List;"));
        assert!(ctx.sections[1].starts_with("   98 |"));
        assert!(ctx.sections[1].contains("  100 |     int f100 = 100;"));
        assert!(ctx.sections[1].ends_with("int f102 = 102;"));
    }

    #[test]
    fn test_large_file_without_error_lines_not_sent_whole() {
        let mut src = String::from("package p;\nimport java.util.List;\n");
        for i in 3..=200 {
            src.push_str(&format!("    int f{i} = {i};\n"));
        }
        let ctx = source_context(&src, &[], 2, 100);
        assert!(!ctx.whole_file);
        assert_eq!(ctx.sections.len(), 2);
        assert!(ctx.sections[0].contains("import java.util.List;"));
        assert!(ctx.sections[1].starts_with("    3 |"));
        assert!(ctx.sections[1].ends_with("int f7 = 7;"));
        assert!(!ctx.sections[1].contains("f8 "));
    }

    #[test]
    fn test_small_file_without_error_lines_sent_whole() {
        let ctx = source_context("a\nb\n", &[], 8, 12_000);
        assert!(ctx.whole_file);
    }

    #[test]
    fn test_language_for() {
        assert_eq!(language_for(Path::new("src/Foo.java")), "java");
        assert_eq!(language_for(Path::new("build.gradle.kts")), "gradle");
        assert_eq!(language_for(Path::new("App.kt")), "kotlin");
        assert_eq!(language_for(Path::new("x.groovy")), "groovy");
    }
}

//! Architectural Enforcement Integration Tests
//!
//! Source scans that keep the conversation core and CLI non-blocking:
//! - No thread sleeps or timer-based polling in production code
//! - No blocking file, network or HTTP I/O inside async functions
//!
//! Production code is everything under `builder/*/src` up to the first
//! `#[cfg(test)]` marker of each file.

use std::fs;
use std::path::{Path, PathBuf};

/// Source trees scanned by every check
pub const PRODUCTION_DIRS: [&str; 2] = ["builder/core/src", "builder/cli/src"];

/// One offending line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: PathBuf,
    pub line: usize,
    pub text: String,
    pub reason: &'static str,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.reason,
            self.text
        )
    }
}

/// Workspace root, two levels above this crate
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// Every production `.rs` file, with its test modules stripped
pub fn production_sources() -> Vec<(PathBuf, String)> {
    let root = workspace_root();
    let mut sources = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            sources.push((entry.path().to_path_buf(), strip_tests(&content)));
        }
    }

    sources
}

/// Drop everything from the first `#[cfg(test)]` onward
pub fn strip_tests(content: &str) -> String {
    content
        .lines()
        .take_while(|line| !line.trim_start().starts_with("#[cfg(test)]"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Code part of a line, without trailing `//` comments
pub fn code_part(line: &str) -> &str {
    if line.trim_start().starts_with("//") {
        return "";
    }
    line.split(" //").next().unwrap_or(line)
}

/// Whether the function enclosing `idx` is `async`
///
/// Scans backwards for the nearest `fn` signature; lines outside any
/// function count as non-async.
pub fn is_in_async_function(lines: &[&str], idx: usize) -> bool {
    for i in (0..=idx).rev() {
        let line = code_part(lines[i]).trim();
        if line.contains("async fn ") || line.contains("async move") {
            return true;
        }
        if line.starts_with("fn ") || line.contains(" fn ") {
            return false;
        }
    }
    false
}

/// Scan production sources, collecting lines for which `check` returns a reason
pub fn scan<F>(check: F) -> Vec<Violation>
where
    F: Fn(&[&str], usize, &str) -> Option<&'static str>,
{
    let mut violations = Vec::new();

    for (path, content) in production_sources() {
        let lines: Vec<&str> = content.lines().collect();
        for (idx, line) in lines.iter().enumerate() {
            let code = code_part(line);
            if let Some(reason) = check(&lines, idx, code) {
                violations.push(Violation {
                    path: path.clone(),
                    line: idx + 1,
                    text: line.trim().to_string(),
                    reason,
                });
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_tests_keeps_production_part() {
        let src = "fn a() {}\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}\n";
        assert_eq!(strip_tests(src), "fn a() {}");
    }

    #[test]
    fn test_async_detection() {
        let lines = vec![
            "pub async fn run() {",
            "    let x = 1;",
            "}",
            "pub fn load() {",
            "    let y = 2;",
            "}",
        ];
        assert!(is_in_async_function(&lines, 1));
        assert!(!is_in_async_function(&lines, 4));
    }

    #[test]
    fn test_comments_are_ignored() {
        assert_eq!(code_part("    // std::thread::sleep"), "");
        assert_eq!(code_part("let a = 1; // std::fs"), "let a = 1;");
    }

    #[test]
    fn test_production_sources_found() {
        let sources = production_sources();
        assert!(sources
            .iter()
            .any(|(path, _)| path.ends_with("orchestrator.rs")));
    }
}

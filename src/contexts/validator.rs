use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};
use tree_sitter::{Node, Parser};

use crate::error::SyntaxDiagnostic;

const LINT_TIMEOUT: Duration = Duration::from_secs(10);

/// Checks that a candidate file parses before it may be written.
///
/// Only `.py` files are parsed; anything else (manifests, config) passes.
pub fn validate(content: &str, filename: &str) -> Result<(), SyntaxDiagnostic> {
    if !filename.ends_with(".py") {
        return Ok(());
    }

    let diagnostic = |line: usize, message: String| SyntaxDiagnostic {
        file: filename.to_string(),
        line,
        message,
    };

    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| diagnostic(0, format!("python grammar unavailable: {}", e)))?;

    let tree = parser
        .parse(content, None)
        .ok_or_else(|| diagnostic(0, "parser produced no tree".to_string()))?;

    let root = tree.root_node();
    if !root.has_error() {
        return Ok(());
    }

    match first_error(root) {
        Some(node) => {
            let line = node.start_position().row + 1;
            let message = if node.is_missing() {
                format!("missing '{}'", node.kind())
            } else {
                let snippet = node
                    .utf8_text(content.as_bytes())
                    .unwrap_or("")
                    .lines()
                    .next()
                    .unwrap_or("")
                    .trim();
                format!("invalid syntax near '{}'", truncate(snippet, 40))
            };
            Err(diagnostic(line, message))
        }
        None => Err(diagnostic(1, "invalid syntax".to_string())),
    }
}

/// First ERROR or MISSING node in document order.
fn first_error(node: Node) -> Option<Node> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = first_error(child) {
            return Some(found);
        }
    }
    None
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Result of the advisory lint pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LintOutcome {
    Clean,
    Findings(String),
    Skipped(String),
}

/// Runs `ruff` over one written file.
///
/// Findings never block anything; they are logged and reported back.
pub async fn lint(repo_root: &Path, rel_path: &str) -> LintOutcome {
    run_linter("ruff", repo_root, rel_path).await
}

async fn run_linter(program: &str, repo_root: &Path, rel_path: &str) -> LintOutcome {
    let mut cmd = Command::new(program);
    cmd.arg("check")
        .arg(rel_path)
        .arg("--select=E,F")
        .current_dir(repo_root)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(LINT_TIMEOUT, cmd.output()).await {
        Err(_) => {
            warn!(file = rel_path, "lint timed out");
            return LintOutcome::Skipped("timed out".to_string());
        }
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(program, "linter not installed; skipping lint");
            return LintOutcome::Skipped(format!("{} not installed", program));
        }
        Ok(Err(e)) => {
            warn!(file = rel_path, error = %e, "failed to run lint");
            return LintOutcome::Skipped(e.to_string());
        }
        Ok(Ok(output)) => output,
    };

    if output.status.success() {
        LintOutcome::Clean
    } else {
        let findings = String::from_utf8_lossy(&output.stdout).trim().to_string();
        warn!(file = rel_path, "lint findings:\n{}", findings);
        LintOutcome::Findings(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_python_passes() {
        let src = "from fastapi import FastAPI\n\napp = FastAPI()\n\n\n@app.get(\"/healthz\")\ndef healthz():\n    return {\"status\": \"ok\"}\n";
        assert!(validate(src, "main.py").is_ok());
    }

    #[test]
    fn test_broken_python_reports_line() {
        let src = "import os\n\ndef broken(:\n    pass\n";
        let diag = validate(src, "app/main.py").unwrap_err();
        assert_eq!(diag.file, "app/main.py");
        assert_eq!(diag.line, 3);
        assert!(diag.to_string().starts_with("Syntax error in app/main.py at line 3"));
    }

    #[test]
    fn test_non_python_is_exempt() {
        assert!(validate("def broken(:", "requirements.txt").is_ok());
        assert!(validate("[project\n", "pyproject.toml").is_ok());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("ab", 10), "ab");
    }

    #[tokio::test]
    async fn test_lint_clean_file() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("x.py"), "x = 1\n").unwrap();
        let outcome = lint(dir.path(), "x.py").await;
        // Hosts without ruff skip the pass instead of reporting findings.
        assert!(
            matches!(outcome, LintOutcome::Clean | LintOutcome::Skipped(_)),
            "{:?}",
            outcome
        );
    }

    #[tokio::test]
    async fn test_missing_linter_is_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("x.py"), "import os\n").unwrap();
        let outcome = run_linter("fleetfix-no-such-linter", dir.path(), "x.py").await;
        assert_eq!(
            outcome,
            LintOutcome::Skipped("fleetfix-no-such-linter not installed".to_string())
        );
    }
}

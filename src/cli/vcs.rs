use anyhow::{Context, Result, bail};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

const LABEL_COLOR: &str = "fbca04";

/// Patterns every Python service repository should ignore.
const PYTHON_GITIGNORE: &[&str] = &[
    "__pycache__/",
    "*.py[cod]",
    "*$py.class",
    "*.so",
    "build/",
    "dist/",
    ".eggs/",
    "*.egg-info/",
    "*.egg",
    ".env",
    ".venv",
    "venv/",
    ".pytest_cache/",
    ".coverage",
    "htmlcov/",
    ".mypy_cache/",
    ".ruff_cache/",
];

fn run_command(program: &str, args: &[&str], cwd: Option<&Path>) -> Result<String> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    debug!(program, ?args, "running command");
    let output = cmd
        .output()
        .with_context(|| format!("Failed to execute {}", program))?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let detail = if stderr.is_empty() { stdout } else { stderr };
        bail!("Command failed: {} {}\n{}", program, args.join(" "), detail);
    }
    Ok(stdout)
}

pub fn gh_auth_status() -> Result<()> {
    run_command("gh", &["auth", "status"], None)
        .context("GitHub CLI is not authenticated (run `gh auth login`)")?;
    Ok(())
}

pub fn clone_repo(url: &str, dest: &Path) -> Result<()> {
    let dest = dest.to_string_lossy();
    run_command("git", &["clone", "--depth", "1", url, &dest], None)?;
    Ok(())
}

pub fn checkout_branch(repo: &Path, branch: &str) -> Result<()> {
    run_command("git", &["checkout", "-b", branch], Some(repo))?;
    Ok(())
}

/// Makes sure Python caches never get committed.
///
/// Returns true if `.gitignore` was created or extended.
pub fn ensure_gitignore(repo: &Path) -> Result<bool> {
    let path = repo.join(".gitignore");
    let existing = if path.exists() {
        fs::read_to_string(&path).context("Failed to read .gitignore")?
    } else {
        String::new()
    };

    let present: Vec<&str> = existing.lines().map(str::trim).collect();
    let missing: Vec<&str> = PYTHON_GITIGNORE
        .iter()
        .copied()
        .filter(|p| !present.contains(p))
        .collect();
    if missing.is_empty() {
        return Ok(false);
    }

    let content = if existing.trim().is_empty() {
        format!("# Python\n{}\n", missing.join("\n"))
    } else {
        format!(
            "{}\n\n# Python (fleet compliance)\n{}\n",
            existing.trim_end(),
            missing.join("\n")
        )
    };
    fs::write(&path, content).context("Failed to write .gitignore")?;
    Ok(true)
}

/// Stages everything and commits; false when there was nothing to commit.
pub fn commit_all(repo: &Path, message: &str) -> Result<bool> {
    if ensure_gitignore(repo)? {
        run_command("git", &["add", ".gitignore"], Some(repo))?;
    }
    run_command("git", &["add", "-A"], Some(repo))?;
    match run_command("git", &["commit", "-m", message], Some(repo)) {
        Ok(_) => Ok(true),
        Err(e) if e.to_string().to_lowercase().contains("nothing to commit") => Ok(false),
        Err(e) => Err(e),
    }
}

pub fn push_branch(repo: &Path, branch: &str) -> Result<()> {
    run_command("git", &["push", "-u", "origin", branch], Some(repo))?;
    Ok(())
}

/// Opens a pull request, or returns the URL of the one that already exists.
pub fn open_pr(
    repo: &Path,
    base: &str,
    head: &str,
    title: &str,
    body: &str,
    labels: &[String],
) -> Result<String> {
    for label in labels {
        if let Err(e) = run_command(
            "gh",
            &["label", "create", label, "--color", LABEL_COLOR, "--force"],
            Some(repo),
        ) {
            debug!(label = %label, error = %e, "label creation failed");
        }
    }

    let joined = labels.join(",");
    let mut args = vec![
        "pr", "create", "--base", base, "--head", head, "--title", title, "--body", body,
    ];
    if !labels.is_empty() {
        args.extend(["--label", joined.as_str()]);
    }

    let err = match run_command("gh", &args, Some(repo)) {
        Ok(url) => return Ok(url),
        Err(e) => e,
    };
    if let Some(url) = existing_pr_url(&err.to_string()) {
        info!(url = %url, "pull request already exists");
        return Ok(url);
    }
    if labels.is_empty() || !is_label_error(&err.to_string()) {
        return Err(err);
    }

    warn!("label rejected; retrying pull request without labels");
    args.truncate(args.len() - 2);
    match run_command("gh", &args, Some(repo)) {
        Ok(url) => Ok(url),
        Err(retry) => existing_pr_url(&retry.to_string()).ok_or(retry),
    }
}

fn pr_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"https://github\.com/[^/\s]+/[^/\s]+/pull/\d+").expect("valid regex")
    })
}

fn existing_pr_url(message: &str) -> Option<String> {
    if !message.to_lowercase().contains("already exists") {
        return None;
    }
    pr_url_re().find(message).map(|m| m.as_str().to_string())
}

fn is_label_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("label") && lower.contains("not found")
}

/// Repository name from its clone URL.
pub fn repo_name(url: &str) -> String {
    let last = url.trim_end_matches('/').rsplit(['/', ':']).next().unwrap_or(url);
    last.strip_suffix(".git").unwrap_or(last).to_string()
}

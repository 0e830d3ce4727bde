use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

use crate::data::ApplicationStructure;

/// Directory names that never contain service source.
const SKIP_DIRS: &[&str] = &[
    ".venv",
    "venv",
    "__pycache__",
    ".git",
    "node_modules",
    ".tox",
    "dist",
    "build",
    ".mypy_cache",
    ".pytest_cache",
    ".eggs",
];

/// Manifest candidates at the repository root, in priority order.
const MANIFEST_CANDIDATES: &[&str] = &["requirements.txt", "pyproject.toml", "setup.py"];

/// Infers the layout of a service repository.
pub trait StructureDiscoverer {
    fn discover(&self, repo_root: &Path) -> ApplicationStructure;
}

/// Text-pattern discovery over every Python file in the tree.
///
/// The first direct `FastAPI()` assignment in scan order becomes the entry
/// point; a factory function is only used when no direct assignment exists
/// anywhere. Scan order is depth-first with entries sorted by name, so
/// repeated scans of an unchanged tree agree.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternDiscoverer;

#[derive(Debug)]
struct Candidate {
    path: String,
    symbol: String,
    middleware: Vec<String>,
}

impl StructureDiscoverer for PatternDiscoverer {
    fn discover(&self, repo_root: &Path) -> ApplicationStructure {
        let mut structure = ApplicationStructure {
            manifest: find_manifest(repo_root),
            ..Default::default()
        };

        let mut direct: Option<Candidate> = None;
        let mut factory: Option<Candidate> = None;

        for file in collect_python_files(repo_root) {
            let Ok(content) = fs::read_to_string(&file) else {
                debug!(file = %file.display(), "skipping unreadable file");
                continue;
            };
            let rel = relative_path(repo_root, &file);

            if direct.is_none() {
                if let Some(symbol) = find_app_assignment(&content) {
                    direct = Some(Candidate {
                        path: rel.clone(),
                        symbol,
                        middleware: find_middleware(&content),
                    });
                }
            }

            if direct.is_none() && factory.is_none() {
                if let Some(symbol) = find_factory(&content) {
                    factory = Some(Candidate {
                        path: rel.clone(),
                        symbol,
                        middleware: find_middleware(&content),
                    });
                }
            }

            if router_re().is_match(&content) && !structure.router_files.contains(&rel) {
                structure.router_files.push(rel);
            }
        }

        let (chosen, is_factory) = match (direct, factory) {
            (Some(c), _) => (Some(c), false),
            (None, Some(c)) => (Some(c), true),
            (None, None) => (None, false),
        };

        if let Some(candidate) = chosen {
            structure.entry_point = Some(candidate.path);
            structure.app_variable = candidate.symbol;
            structure.middleware = candidate.middleware;
            structure.factory_pattern = is_factory;
        }

        structure
    }
}

/// Lists Python files under `root` in deterministic scan order.
pub fn collect_python_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    scan_directory(root, &mut files);
    files
}

fn scan_directory(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    // `DirEntry::file_type` does not follow symlinks; linked directories are skipped.
    let mut entries: Vec<(PathBuf, fs::FileType)> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_type().ok().map(|t| (e.path(), t)))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    for (path, file_type) in entries {
        if file_type.is_dir() {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if SKIP_DIRS.contains(&name) {
                continue;
            }
            scan_directory(&path, files);
        } else if file_type.is_symlink() && path.is_dir() {
            debug!(path = %path.display(), "skipping symlinked directory");
        } else if path.extension().and_then(|s| s.to_str()) == Some("py") {
            files.push(path);
        }
    }
}

fn find_manifest(repo_root: &Path) -> Option<String> {
    MANIFEST_CANDIDATES
        .iter()
        .find(|name| repo_root.join(name).is_file())
        .map(|name| name.to_string())
}

fn relative_path(root: &Path, file: &Path) -> String {
    let rel = file.strip_prefix(root).unwrap_or(file);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn find_app_assignment(content: &str) -> Option<String> {
    app_assignment_re()
        .captures(content)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
}

/// Finds a function that builds and returns an app.
///
/// Either the signature is annotated `-> FastAPI`, or a `FastAPI(...)`
/// construction appears inside the body of a top-level `def`.
fn find_factory(content: &str) -> Option<String> {
    if let Some(cap) = factory_signature_re().captures(content) {
        return cap.get(1).map(|m| m.as_str().to_string());
    }

    let mut current_def: Option<&str> = None;
    for line in content.lines() {
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        let indented = line.starts_with(' ') || line.starts_with('\t');
        if !indented {
            current_def = def_name_re()
                .captures(line)
                .and_then(|cap| cap.get(1))
                .map(|m| m.as_str());
            // One-line body: `def make(): return FastAPI()`
            if let Some(name) = current_def {
                let body = line.split_once("):").or_else(|| line.split_once(':'));
                if body.is_some_and(|(_, rest)| construction_re().is_match(rest)) {
                    return Some(name.to_string());
                }
            }
            continue;
        }
        if let Some(name) = current_def {
            if construction_re().is_match(line) {
                return Some(name.to_string());
            }
        }
    }
    None
}

fn find_middleware(content: &str) -> Vec<String> {
    let mut found = Vec::new();
    for cap in middleware_re().captures_iter(content) {
        let Some(m) = cap.get(1) else { continue };
        let symbol = m.as_str().rsplit('.').next().unwrap_or(m.as_str()).to_string();
        if !found.contains(&symbol) {
            found.push(symbol);
        }
    }
    found
}

fn app_assignment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^([A-Za-z_]\w*)\s*(?::\s*[\w.]+\s*)?=\s*(?:fastapi\.)?FastAPI\s*\(")
            .expect("valid regex")
    })
}

fn factory_signature_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(?:async\s+)?def\s+([A-Za-z_]\w*)\s*\([^)]*\)\s*->\s*(?:fastapi\.)?FastAPI\b")
            .expect("valid regex")
    })
}

fn def_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:async\s+)?def\s+([A-Za-z_]\w*)\s*\(").expect("valid regex"))
}

fn construction_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:fastapi\.)?FastAPI\s*\(").expect("valid regex"))
}

fn router_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)\b([A-Za-z_]\w*)\s*(?::\s*[\w.]+\s*)?=\s*(?:fastapi\.)?APIRouter\s*\(")
            .expect("valid regex")
    })
}

fn middleware_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\.add_middleware\s*\(\s*([A-Za-z_][\w.]*)").expect("valid regex")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_discovers_direct_instantiation() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "requirements.txt", "fastapi\n");
        write(
            dir.path(),
            "service/main.py",
            "from fastapi import FastAPI\nfrom starlette.middleware.gzip import GZipMiddleware\n\napplication = FastAPI(title=\"orders\")\napplication.add_middleware(GZipMiddleware)\n",
        );
        write(
            dir.path(),
            "service/routes/orders.py",
            "from fastapi import APIRouter\nrouter = APIRouter()\n",
        );

        let structure = PatternDiscoverer.discover(dir.path());
        assert_eq!(structure.entry_point.as_deref(), Some("service/main.py"));
        assert_eq!(structure.app_variable, "application");
        assert_eq!(structure.router_files, vec!["service/routes/orders.py"]);
        assert_eq!(structure.manifest.as_deref(), Some("requirements.txt"));
        assert_eq!(structure.middleware, vec!["GZipMiddleware"]);
        assert!(!structure.factory_pattern);
    }

    #[test]
    fn test_discovers_factory_from_body() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "app/factory.py",
            "from fastapi import FastAPI\n\n\ndef create_app():\n    app = FastAPI()\n    return app\n",
        );

        let structure = PatternDiscoverer.discover(dir.path());
        assert_eq!(structure.entry_point.as_deref(), Some("app/factory.py"));
        assert_eq!(structure.app_variable, "create_app");
        assert!(structure.factory_pattern);
    }

    #[test]
    fn test_discovers_factory_from_annotation() {
        let content = "def build(settings) -> FastAPI:\n    return make(settings)\n";
        assert_eq!(find_factory(content).as_deref(), Some("build"));
    }

    #[test]
    fn test_discovers_one_line_factory() {
        let content = "from fastapi import FastAPI\n\n\ndef create_app(): return FastAPI()\n";
        assert_eq!(find_factory(content).as_deref(), Some("create_app"));
        assert_eq!(find_factory("def helper(): return 1\n"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directories_are_not_followed() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "app/main.py", "app = FastAPI()\n");
        write(dir.path(), "app/routes.py", "router = APIRouter()\n");
        std::os::unix::fs::symlink(dir.path(), dir.path().join("app/loop")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("app"), dir.path().join("mirror")).unwrap();

        let structure = PatternDiscoverer.discover(dir.path());
        assert_eq!(structure.entry_point.as_deref(), Some("app/main.py"));
        assert_eq!(structure.router_files, vec!["app/routes.py"]);
        assert_eq!(collect_python_files(dir.path()).len(), 2);
    }

    #[test]
    fn test_direct_assignment_beats_earlier_factory() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "a_factory.py",
            "from fastapi import FastAPI\ndef make():\n    return FastAPI()\n",
        );
        write(dir.path(), "b_main.py", "from fastapi import FastAPI\napp = FastAPI()\n");

        let structure = PatternDiscoverer.discover(dir.path());
        assert_eq!(structure.entry_point.as_deref(), Some("b_main.py"));
        assert!(!structure.factory_pattern);
    }

    #[test]
    fn test_skips_non_source_directories() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), ".venv/lib/site.py", "app = FastAPI()\n");
        write(dir.path(), "node_modules/x/app.py", "app = FastAPI()\n");
        write(dir.path(), "build/gen.py", "app = FastAPI()\n");

        let structure = PatternDiscoverer.discover(dir.path());
        assert_eq!(structure.entry_point, None);
    }

    #[test]
    fn test_skip_matches_names_below_root_only() {
        // The repository itself lives inside a directory called "build".
        let outer = TempDir::new().unwrap();
        let root = outer.path().join("build").join("repo");
        write(&root, "main.py", "app = FastAPI()\n");

        let structure = PatternDiscoverer.discover(&root);
        assert_eq!(structure.entry_point.as_deref(), Some("main.py"));
    }

    #[test]
    fn test_first_match_wins_in_scan_order() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "zeta/main.py", "api = FastAPI()\n");
        write(dir.path(), "alpha/main.py", "app = FastAPI()\n");

        let first = PatternDiscoverer.discover(dir.path());
        let second = PatternDiscoverer.discover(dir.path());
        assert_eq!(first.entry_point.as_deref(), Some("alpha/main.py"));
        assert_eq!(first, second);
    }

    #[test]
    fn test_manifest_priority() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "setup.py", "from setuptools import setup\n");
        write(dir.path(), "pyproject.toml", "[project]\n");
        assert_eq!(find_manifest(dir.path()).as_deref(), Some("pyproject.toml"));
    }

    #[test]
    fn test_commented_assignment_is_ignored() {
        assert_eq!(find_app_assignment("# app = FastAPI()\n"), None);
        assert_eq!(
            find_app_assignment("app: FastAPI = FastAPI()\n").as_deref(),
            Some("app")
        );
    }
}

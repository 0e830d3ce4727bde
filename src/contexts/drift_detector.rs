use std::fs;
use std::path::Path;
use tracing::debug;

use super::discoverer::{PatternDiscoverer, StructureDiscoverer};
use crate::data::DriftReport;

pub const HEALTH_MARKER: &str = "/healthz";
pub const READINESS_MARKER: &str = "/readyz";
pub const LOGGING_MARKER: &str = "structlog";
pub const REQUEST_CONTEXT_MARKER: &str = "RequestContextMiddleware";

/// Decides which compliance features a repository lacks.
///
/// Detection only reads. Running it twice over an unchanged tree yields
/// equal reports.
#[derive(Debug, Clone)]
pub struct DriftDetector<D = PatternDiscoverer> {
    discoverer: D,
}

impl Default for DriftDetector {
    fn default() -> Self {
        Self::new(PatternDiscoverer)
    }
}

impl<D: StructureDiscoverer> DriftDetector<D> {
    pub fn new(discoverer: D) -> Self {
        Self { discoverer }
    }

    pub fn detect(&self, repo_root: &Path) -> DriftReport {
        let structure = self.discoverer.discover(repo_root);
        let Some(entry) = structure.entry_point.clone() else {
            debug!(repo = %repo_root.display(), "no FastAPI application found");
            return DriftReport::not_applicable(structure);
        };

        let mut combined = String::new();
        for rel in std::iter::once(&entry).chain(structure.router_files.iter()) {
            if let Ok(content) = fs::read_to_string(repo_root.join(rel)) {
                combined.push_str(&content);
                combined.push('\n');
            }
        }

        let manifest_mentions_logging = structure
            .manifest
            .as_ref()
            .and_then(|m| fs::read_to_string(repo_root.join(m)).ok())
            .map(|text| text.to_lowercase().contains(LOGGING_MARKER))
            .unwrap_or(false);

        let has_context_middleware = combined.contains(REQUEST_CONTEXT_MARKER)
            || structure
                .middleware
                .iter()
                .any(|m| m == REQUEST_CONTEXT_MARKER);

        DriftReport {
            applicable: true,
            missing_health: !combined.contains(HEALTH_MARKER),
            missing_readiness: !combined.contains(READINESS_MARKER),
            missing_logging: !(combined.contains(LOGGING_MARKER) || manifest_mentions_logging),
            missing_request_context: !has_context_middleware,
            structure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn repo(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (rel, content) in files {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        dir
    }

    #[test]
    fn test_bare_service_misses_everything() {
        let dir = repo(&[
            ("main.py", "from fastapi import FastAPI\napp = FastAPI()\n"),
            ("requirements.txt", "fastapi==0.110.0\n"),
        ]);
        let report = DriftDetector::<PatternDiscoverer>::default().detect(dir.path());
        assert!(report.applicable);
        assert!(report.missing_health);
        assert!(report.missing_readiness);
        assert!(report.missing_logging);
        assert!(report.missing_request_context);
    }

    #[test]
    fn test_markers_in_router_files_count() {
        let dir = repo(&[
            ("app/main.py", "from fastapi import FastAPI\napp = FastAPI()\n"),
            (
                "app/health.py",
                "from fastapi import APIRouter\nrouter = APIRouter()\n@router.get(\"/healthz\")\ndef h():\n    return {}\n",
            ),
        ]);
        let report = DriftDetector::<PatternDiscoverer>::default().detect(dir.path());
        assert!(!report.missing_health);
        assert!(report.missing_readiness);
    }

    #[test]
    fn test_logging_in_manifest_is_case_insensitive() {
        let dir = repo(&[
            ("main.py", "app = FastAPI()\n"),
            ("requirements.txt", "StructLog>=24\n"),
        ]);
        let report = DriftDetector::<PatternDiscoverer>::default().detect(dir.path());
        assert!(!report.missing_logging);
    }

    #[test]
    fn test_registered_middleware_counts() {
        let dir = repo(&[(
            "main.py",
            "from ctx import RequestContextMiddleware\napp = FastAPI()\napp.add_middleware(RequestContextMiddleware)\n",
        )]);
        let report = DriftDetector::<PatternDiscoverer>::default().detect(dir.path());
        assert!(!report.missing_request_context);
        assert_eq!(report.structure.middleware, vec!["RequestContextMiddleware"]);
    }

    #[test]
    fn test_missing_manifest_counts_as_missing_logging() {
        let dir = repo(&[("main.py", "app = FastAPI()\n")]);
        let report = DriftDetector::<PatternDiscoverer>::default().detect(dir.path());
        assert_eq!(report.structure.manifest, None);
        assert!(report.missing_logging);
    }

    #[test]
    fn test_unrecognized_repo_is_not_applicable() {
        let dir = repo(&[("tool.py", "print('hello')\n")]);
        let report = DriftDetector::<PatternDiscoverer>::default().detect(dir.path());
        assert!(!report.applicable);
        assert!(!report.has_drift());
    }
}

use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};

use super::pysource::{find_function, indent_of, leading_block_end, statement_end};
use crate::data::{ApplicationStructure, DriftReport, TransformationArtifact, HEALTH_TEST_PATH};

pub const STRUCTLOG_REQUIREMENT: &str = "structlog==24.2.0";
const COMPLIANCE_ROUTER: &str = "compliance_router";
const FACTORY_APP: &str = "_app";

/// The parts of a repository the fallback rewrites depend on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoSnapshot {
    pub entry_source: String,
    pub manifest_source: Option<String>,
    /// Existing files at the paths the fallback may create, with content.
    pub existing: BTreeMap<String, String>,
}

impl RepoSnapshot {
    pub fn capture(repo_root: &Path, structure: &ApplicationStructure) -> Self {
        let read = |rel: &str| fs::read_to_string(repo_root.join(rel)).ok();

        let mut existing = BTreeMap::new();
        let dir = structure.entry_dir().unwrap_or("");
        for name in [
            "middleware.py",
            "request_context.py",
            "logging_config.py",
            "structured_logging.py",
        ] {
            let rel = join(dir, name);
            if let Some(content) = read(&rel) {
                existing.insert(rel, content);
            }
        }
        if let Some(content) = read(HEALTH_TEST_PATH) {
            existing.insert(HEALTH_TEST_PATH.to_string(), content);
        }

        Self {
            entry_source: structure
                .entry_point
                .as_deref()
                .and_then(read)
                .unwrap_or_default(),
            manifest_source: structure.manifest.as_deref().and_then(read),
            existing,
        }
    }
}

fn join(dir: &str, file: &str) -> String {
    if dir.is_empty() {
        file.to_string()
    } else {
        format!("{}/{}", dir, file)
    }
}

fn module_of(path: &str) -> String {
    path.strip_suffix(".py").unwrap_or(path).replace('/', ".")
}

/// Deterministic generators for the four compliance features.
///
/// Output is a pure function of the drift report, the snapshot and the
/// service name.
#[derive(Debug, Clone)]
pub struct FallbackTemplateEngine {
    service_name: String,
}

/// Where a support module lives and whether this run must create it.
struct SupportModule {
    path: String,
    create: bool,
}

impl FallbackTemplateEngine {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn service_literal(&self) -> String {
        serde_json::to_string(&self.service_name).unwrap_or_else(|_| "\"service\"".to_string())
    }

    pub fn generate(&self, drift: &DriftReport, snapshot: &RepoSnapshot) -> Vec<TransformationArtifact> {
        let structure = &drift.structure;
        let Some(entry) = structure.entry_point.as_deref() else {
            warn!("no entry point discovered; fallback has nothing to patch");
            return Vec::new();
        };
        let dir = structure.entry_dir().unwrap_or("");

        let middleware = support_module(
            snapshot,
            dir,
            ["middleware.py", "request_context.py"],
            "RequestContextMiddleware",
            drift.missing_request_context,
        );
        let logging = support_module(
            snapshot,
            dir,
            ["logging_config.py", "structured_logging.py"],
            "def configure_logging",
            drift.missing_logging,
        );
        let middleware_module = middleware.as_ref().map(|m| module_of(&m.path));
        let logging_module = logging.as_ref().map(|m| module_of(&m.path));

        let mut artifacts = Vec::new();

        if drift.missing_logging && logging.is_some() {
            if let Some(manifest) = self.manifest_artifact(structure, snapshot) {
                artifacts.push(manifest);
            }
        }
        if let Some(module) = middleware.as_ref().filter(|m| m.create) {
            artifacts.push(TransformationArtifact::create(
                module.path.clone(),
                middleware_template(),
            ));
        }
        if let Some(module) = logging.as_ref().filter(|m| m.create) {
            // The template tolerates a missing context module on import.
            let context_module = middleware_module
                .clone()
                .unwrap_or_else(|| module_of(&join(dir, "middleware.py")));
            artifacts.push(TransformationArtifact::create(
                module.path.clone(),
                self.logging_template(&context_module),
            ));
        }

        let patched = self.patch_entry_point(
            drift,
            &snapshot.entry_source,
            middleware_module.as_deref(),
            logging_module.as_deref(),
        );
        if patched != snapshot.entry_source {
            artifacts.push(TransformationArtifact::update(entry, patched));
        }

        if !snapshot.existing.contains_key(HEALTH_TEST_PATH) {
            artifacts.push(TransformationArtifact::create(
                HEALTH_TEST_PATH,
                tests_template(structure),
            ));
        }

        artifacts
    }

    fn manifest_artifact(
        &self,
        structure: &ApplicationStructure,
        snapshot: &RepoSnapshot,
    ) -> Option<TransformationArtifact> {
        let Some(manifest) = structure.manifest.as_deref() else {
            return Some(TransformationArtifact::create(
                "requirements.txt",
                format!("{}\n", STRUCTLOG_REQUIREMENT),
            ));
        };
        let current = snapshot.manifest_source.as_deref()?;
        if current.to_lowercase().contains("structlog") {
            return None;
        }

        let updated = if manifest.ends_with("requirements.txt") {
            let trimmed = current.trim_end();
            if trimmed.is_empty() {
                Some(format!("{}\n", STRUCTLOG_REQUIREMENT))
            } else {
                Some(format!("{}\n{}\n", trimmed, STRUCTLOG_REQUIREMENT))
            }
        } else if manifest.ends_with("pyproject.toml") {
            insert_into_list(current, pyproject_deps_re())
                .or_else(|| insert_into_poetry_table(current))
        } else {
            insert_into_list(current, setup_requires_re())
        };

        match updated {
            Some(content) => Some(TransformationArtifact::update(manifest, content)),
            None => {
                warn!(manifest, "could not locate a dependency list to extend");
                None
            }
        }
    }

    fn patch_entry_point(
        &self,
        drift: &DriftReport,
        source: &str,
        middleware_module: Option<&str>,
        logging_module: Option<&str>,
    ) -> String {
        let structure = &drift.structure;
        let needs_routes = drift.missing_health || drift.missing_readiness;
        let mut lines: Vec<String> = source.lines().map(str::to_string).collect();

        let middleware_module = middleware_module.filter(|_| drift.missing_request_context);
        let logging_module = logging_module.filter(|_| drift.missing_logging);
        let register_middleware = middleware_module.is_some()
            && !source.contains(".add_middleware(RequestContextMiddleware");

        if structure.factory_pattern {
            let registrations = |var: &str| {
                let mut out = Vec::new();
                if register_middleware {
                    out.push(format!(
                        "{}.add_middleware(RequestContextMiddleware, service_name={})",
                        var,
                        self.service_literal()
                    ));
                }
                if needs_routes {
                    out.push(format!("{}.include_router({})", var, COMPLIANCE_ROUTER));
                }
                out
            };
            register_in_factory(&mut lines, &structure.app_variable, registrations);
        } else {
            if needs_routes {
                lines.extend(self.route_lines(drift, &structure.app_variable));
            }
            if register_middleware {
                let registration = vec![
                    String::new(),
                    "# Correlation middleware (trace_id/request_id)".to_string(),
                    format!(
                        "{}.add_middleware(RequestContextMiddleware, service_name={})",
                        structure.app_variable,
                        self.service_literal()
                    ),
                ];
                match find_app_statement(&lines, &structure.app_variable) {
                    Some(end) => {
                        lines.splice(end + 1..end + 1, registration);
                    }
                    None => lines.extend(registration),
                }
            }
        }

        // Module-level header: imports, logging bootstrap, factory router.
        let mut header = Vec::new();
        let imports = [
            logging_module.map(|m| format!("from {} import configure_logging", m)),
            middleware_module.map(|m| format!("from {} import RequestContextMiddleware", m)),
            (structure.factory_pattern && needs_routes && !source.contains("APIRouter"))
                .then(|| "from fastapi import APIRouter".to_string()),
        ];
        for line in imports.into_iter().flatten() {
            if !source.contains(&line) {
                header.push(line);
            }
        }
        if logging_module.is_some() && !source.contains("configure_logging()") {
            header.push(String::new());
            header.push("configure_logging()".to_string());
        }
        if structure.factory_pattern && needs_routes {
            header.push(String::new());
            header.push(format!("{} = APIRouter()", COMPLIANCE_ROUTER));
            header.extend(self.route_lines(drift, COMPLIANCE_ROUTER));
        }

        if !header.is_empty() {
            let at = leading_block_end(&lines);
            if at > 0 {
                header.insert(0, String::new());
            }
            if lines.get(at).is_some_and(|l| !l.trim().is_empty()) {
                header.push(String::new());
                header.push(String::new());
            }
            lines.splice(at..at, header);
        }

        let mut out = lines.join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        out
    }

    fn route_lines(&self, drift: &DriftReport, target: &str) -> Vec<String> {
        let service = self.service_literal();
        let mut out = Vec::new();
        let routes = [
            (drift.missing_health, "/healthz", "healthz", "ok"),
            (drift.missing_readiness, "/readyz", "readyz", "ready"),
        ];
        for (missing, path, handler, status) in routes {
            if !missing {
                continue;
            }
            out.push(String::new());
            out.push(String::new());
            out.push(format!("@{}.get(\"{}\")", target, path));
            out.push(format!("def {}():", handler));
            out.push(format!(
                "    return {{\"status\": \"{}\", \"service\": {}, \"version\": \"dev\", \"timestamp\": \"now\"}}",
                status, service
            ));
        }
        out
    }

    fn logging_template(&self, middleware_module: &str) -> String {
        LOGGING_TEMPLATE
            .replace("{middleware_module}", middleware_module)
            .replace("{service}", &self.service_literal())
    }
}

/// Picks the preferred path unless an unrelated file already sits there.
///
/// Returns `None` when both candidates hold unrelated modules; the feature
/// is then left out of this run entirely.
fn support_module(
    snapshot: &RepoSnapshot,
    dir: &str,
    names: [&str; 2],
    marker: &str,
    needed: bool,
) -> Option<SupportModule> {
    for name in names {
        let path = join(dir, name);
        match snapshot.existing.get(&path) {
            None => {
                return Some(SupportModule {
                    path,
                    create: needed,
                });
            }
            Some(content) if content.contains(marker) => {
                return Some(SupportModule {
                    path,
                    create: false,
                });
            }
            Some(_) => debug!(path = %path, "support path taken by an unrelated module"),
        }
    }
    if needed {
        warn!(
            candidates = ?names,
            dir,
            "no free path for support module; skipping feature"
        );
    }
    None
}

/// Last line of the top-level `<var> = FastAPI(...)` statement.
fn find_app_statement(lines: &[String], var: &str) -> Option<usize> {
    let pattern = format!(
        r"^{}\s*(?::\s*[\w.]+\s*)?=\s*(?:fastapi\.)?FastAPI\s*\(",
        regex::escape(var)
    );
    let re = Regex::new(&pattern).ok()?;
    let start = lines.iter().position(|l| re.is_match(l))?;
    Some(statement_end(lines, start))
}

/// Registers middleware and routers inside the factory before it returns.
fn register_in_factory<F>(lines: &mut Vec<String>, factory: &str, registrations: F)
where
    F: Fn(&str) -> Vec<String>,
{
    let Some((def_line, body_end)) = find_function(lines, factory) else {
        warn!(factory, "factory function not found; skipping registration");
        return;
    };
    let signature_end = statement_end(lines, def_line);
    let Some(body_indent) = lines[signature_end + 1..=body_end]
        .iter()
        .find(|l| !l.trim().is_empty())
        .map(|l| indent_of(l))
    else {
        return;
    };

    let Some(ret) = (signature_end + 1..=body_end).rev().find(|&i| {
        indent_of(&lines[i]) == body_indent && lines[i].trim_start().starts_with("return ")
    }) else {
        warn!(factory, "factory has no top-level return; skipping registration");
        return;
    };

    let pad = " ".repeat(body_indent);
    let returned = lines[ret].trim_start()["return ".len()..].trim().to_string();

    if identifier_re().is_match(&returned) {
        let block: Vec<String> = registrations(&returned)
            .into_iter()
            .map(|l| format!("{}{}", pad, l))
            .collect();
        lines.splice(ret..ret, block);
    } else {
        let end = statement_end(lines, ret);
        lines[ret] = format!("{}{} = {}", pad, FACTORY_APP, &lines[ret].trim_start()["return ".len()..]);
        let mut block: Vec<String> = registrations(FACTORY_APP)
            .into_iter()
            .map(|l| format!("{}{}", pad, l))
            .collect();
        block.push(format!("{}return {}", pad, FACTORY_APP));
        lines.splice(end + 1..end + 1, block);
    }
}

/// Adds the requirement as the first element of the list opened by `re`.
fn insert_into_list(source: &str, re: &Regex) -> Option<String> {
    let m = re.find(source)?;
    let rest = &source[m.end()..];
    let entry = if rest.trim_start().starts_with(']') {
        format!("\"{}\"", STRUCTLOG_REQUIREMENT)
    } else {
        format!("\"{}\", ", STRUCTLOG_REQUIREMENT)
    };
    Some(format!("{}{}{}", &source[..m.end()], entry, rest))
}

fn insert_into_poetry_table(source: &str) -> Option<String> {
    let header = "[tool.poetry.dependencies]";
    let idx = source.find(header)?;
    let line_end = source[idx..].find('\n').map(|n| idx + n + 1).unwrap_or(source.len());
    let mut out = String::with_capacity(source.len() + 32);
    out.push_str(&source[..line_end]);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("structlog = \"24.2.0\"\n");
    out.push_str(&source[line_end..]);
    Some(out)
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_]\w*$").expect("valid regex"))
}

fn pyproject_deps_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*dependencies\s*=\s*\[").expect("valid regex"))
}

fn setup_requires_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"install_requires\s*=\s*\[").expect("valid regex"))
}

pub fn middleware_template() -> String {
    MIDDLEWARE_TEMPLATE.to_string()
}

pub fn tests_template(structure: &ApplicationStructure) -> String {
    let module = structure
        .entry_module()
        .unwrap_or_else(|| "app.main".to_string());
    let symbol = &structure.app_variable;
    let target = if structure.factory_pattern {
        format!("{}()", symbol)
    } else {
        symbol.clone()
    };
    TESTS_TEMPLATE
        .replace("{module}", &module)
        .replace("{symbol}", symbol)
        .replace("{target}", &target)
}

const MIDDLEWARE_TEMPLATE: &str = r#"import contextvars
import uuid

from starlette.middleware.base import BaseHTTPMiddleware
from starlette.requests import Request
from starlette.responses import Response

trace_id_var = contextvars.ContextVar("trace_id", default="")
request_id_var = contextvars.ContextVar("request_id", default="")


def get_trace_id() -> str:
    return trace_id_var.get() or ""


def get_request_id() -> str:
    return request_id_var.get() or ""


def _extract_trace_id(traceparent: str) -> str:
    # W3C traceparent: 00-<trace_id>-<span_id>-<flags>
    parts = traceparent.split("-")
    if len(parts) >= 4 and len(parts[1]) == 32:
        return parts[1]
    return ""


class RequestContextMiddleware(BaseHTTPMiddleware):
    def __init__(self, app, service_name: str):
        super().__init__(app)
        self.service_name = service_name

    async def dispatch(self, request: Request, call_next):
        traceparent = request.headers.get("traceparent", "")
        trace_id = _extract_trace_id(traceparent) or uuid.uuid4().hex
        request_id = request.headers.get("x-request-id") or str(uuid.uuid4())

        trace_id_var.set(trace_id)
        request_id_var.set(request_id)

        response: Response = await call_next(request)
        response.headers["x-trace-id"] = trace_id
        response.headers["x-request-id"] = request_id
        return response
"#;

const LOGGING_TEMPLATE: &str = r#"import logging

import structlog

try:
    from {middleware_module} import get_request_id, get_trace_id
except ImportError:

    def get_trace_id() -> str:
        return ""

    def get_request_id() -> str:
        return ""


SERVICE_NAME = {service}


class _ContextFilter(logging.Filter):
    def filter(self, record: logging.LogRecord) -> bool:
        record.trace_id = get_trace_id()
        record.request_id = get_request_id()
        record.service = SERVICE_NAME
        return True


def _add_request_context(logger, method_name, event_dict):
    event_dict.setdefault("service", SERVICE_NAME)
    event_dict.setdefault("trace_id", get_trace_id())
    event_dict.setdefault("request_id", get_request_id())
    return event_dict


def configure_logging() -> None:
    logging.basicConfig(level=logging.INFO, format="%(message)s")
    logging.getLogger().addFilter(_ContextFilter())

    structlog.configure(
        processors=[
            _add_request_context,
            structlog.processors.TimeStamper(fmt="iso"),
            structlog.processors.add_log_level,
            structlog.processors.StackInfoRenderer(),
            structlog.processors.format_exc_info,
            structlog.processors.JSONRenderer(),
        ],
        wrapper_class=structlog.make_filtering_bound_logger(logging.INFO),
        cache_logger_on_first_use=True,
    )
"#;

const TESTS_TEMPLATE: &str = r#"from fastapi.testclient import TestClient

from {module} import {symbol}

client = TestClient({target})


def _lower_headers(response):
    return {k.lower(): v for k, v in response.headers.items()}


def test_healthz_ok():
    r = client.get("/healthz")
    assert r.status_code == 200


def test_readyz_ok():
    r = client.get("/readyz")
    assert r.status_code == 200


def test_headers_present():
    r = client.get("/healthz")
    headers = _lower_headers(r)
    assert "x-request-id" in headers
    assert "x-trace-id" in headers
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contexts::validator::validate;
    use crate::data::ArtifactKind;

    fn drift(entry: &str, manifest: Option<&str>, factory: Option<&str>) -> DriftReport {
        DriftReport {
            applicable: true,
            structure: ApplicationStructure {
                entry_point: Some(entry.to_string()),
                app_variable: factory.unwrap_or("app").to_string(),
                manifest: manifest.map(str::to_string),
                factory_pattern: factory.is_some(),
                ..Default::default()
            },
            missing_health: true,
            missing_readiness: true,
            missing_logging: true,
            missing_request_context: true,
        }
    }

    fn snapshot(entry: &str, manifest: Option<&str>) -> RepoSnapshot {
        RepoSnapshot {
            entry_source: entry.to_string(),
            manifest_source: manifest.map(str::to_string),
            existing: BTreeMap::new(),
        }
    }

    fn by_path<'a>(artifacts: &'a [TransformationArtifact], path: &str) -> &'a TransformationArtifact {
        artifacts
            .iter()
            .find(|a| a.path == path)
            .unwrap_or_else(|| panic!("missing artifact {}", path))
    }

    #[test]
    fn test_direct_app_gets_everything() {
        let engine = FallbackTemplateEngine::new("orders");
        let report = drift("app/main.py", Some("requirements.txt"), None);
        let snap = snapshot(
            "\"\"\"Orders.\"\"\"\nfrom fastapi import FastAPI\n\napp = FastAPI(\n    title=\"orders\",\n)\n\n\n@app.get(\"/orders\")\ndef list_orders():\n    return []\n",
            Some("fastapi==0.110.0\n"),
        );
        let artifacts = engine.generate(&report, &snap);

        let paths: Vec<&str> = artifacts.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "requirements.txt",
                "app/middleware.py",
                "app/logging_config.py",
                "app/main.py",
                "tests/test_health.py"
            ]
        );

        let main = &by_path(&artifacts, "app/main.py").content;
        assert!(main.contains("from app.logging_config import configure_logging\n"));
        assert!(main.contains("from app.middleware import RequestContextMiddleware\n"));
        assert!(main.contains(")\n\n# Correlation middleware (trace_id/request_id)\napp.add_middleware(RequestContextMiddleware, service_name=\"orders\")\n"));
        assert!(main.contains("@app.get(\"/healthz\")"));
        assert!(main.contains("@app.get(\"/readyz\")"));
        let import_at = main.find("from app.logging_config").unwrap();
        assert!(main.find("from fastapi import FastAPI").unwrap() < import_at);
        assert!(import_at < main.find("configure_logging()").unwrap());

        assert_eq!(
            by_path(&artifacts, "requirements.txt").content,
            "fastapi==0.110.0\nstructlog==24.2.0\n"
        );
        assert!(
            by_path(&artifacts, "app/logging_config.py")
                .content
                .contains("from app.middleware import get_request_id, get_trace_id")
        );
        assert!(
            by_path(&artifacts, "tests/test_health.py")
                .content
                .contains("from app.main import app\n\nclient = TestClient(app)")
        );

        for artifact in &artifacts {
            assert!(validate(&artifact.content, &artifact.path).is_ok(), "{}", artifact.path);
        }
    }

    #[test]
    fn test_existing_readiness_is_not_duplicated() {
        let engine = FallbackTemplateEngine::new("orders");
        let mut report = drift("main.py", Some("requirements.txt"), None);
        report.missing_readiness = false;
        let snap = snapshot(
            "from fastapi import FastAPI\napp = FastAPI()\n\n@app.get(\"/readyz\")\ndef ready():\n    return {}\n",
            Some("fastapi\n"),
        );
        let artifacts = engine.generate(&report, &snap);
        let main = &by_path(&artifacts, "main.py").content;
        assert_eq!(main.matches("/readyz").count(), 1);
        assert_eq!(main.matches("/healthz").count(), 1);
        assert!(main.contains("from logging_config import configure_logging"));
        assert!(main.contains("from middleware import RequestContextMiddleware"));
    }

    #[test]
    fn test_factory_registration_inside_body() {
        let engine = FallbackTemplateEngine::new("billing");
        let report = drift("svc/app.py", Some("requirements.txt"), Some("create_app"));
        let snap = snapshot(
            "from fastapi import FastAPI\n\n\ndef create_app():\n    app = FastAPI()\n    return app\n\n\napp = create_app()\n",
            Some("fastapi\n"),
        );
        let artifacts = engine.generate(&report, &snap);
        let main = &by_path(&artifacts, "svc/app.py").content;

        assert!(main.contains("from fastapi import APIRouter"));
        assert!(main.contains("compliance_router = APIRouter()"));
        assert!(main.contains("@compliance_router.get(\"/healthz\")"));
        assert!(main.contains(
            "    app = FastAPI()\n    app.add_middleware(RequestContextMiddleware, service_name=\"billing\")\n    app.include_router(compliance_router)\n    return app\n"
        ));
        assert!(main.find("compliance_router = APIRouter()").unwrap() < main.find("def create_app").unwrap());

        let tests = &by_path(&artifacts, "tests/test_health.py").content;
        assert!(tests.contains("from svc.app import create_app"));
        assert!(tests.contains("client = TestClient(create_app())"));

        for artifact in &artifacts {
            assert!(validate(&artifact.content, &artifact.path).is_ok(), "{}", artifact.path);
        }
    }

    #[test]
    fn test_factory_returning_constructor_is_rewritten() {
        let engine = FallbackTemplateEngine::new("billing");
        let mut report = drift("main.py", Some("requirements.txt"), Some("make"));
        report.missing_health = false;
        report.missing_readiness = false;
        let snap = snapshot(
            "from fastapi import FastAPI\n\n\ndef make():\n    return FastAPI(\n        title=\"b\",\n    )\n",
            Some("structlog\n"),
        );
        let artifacts = engine.generate(&report, &snap);
        let main = &by_path(&artifacts, "main.py").content;
        assert!(main.contains(
            "    _app = FastAPI(\n        title=\"b\",\n    )\n    _app.add_middleware(RequestContextMiddleware, service_name=\"billing\")\n    return _app\n"
        ));
        assert!(!main.contains("include_router"));
        assert!(validate(main, "main.py").is_ok());
    }

    #[test]
    fn test_no_manifest_creates_requirements() {
        let engine = FallbackTemplateEngine::new("orders");
        let report = drift("main.py", None, None);
        let artifacts = engine.generate(&report, &snapshot("app = FastAPI()\n", None));
        let req = by_path(&artifacts, "requirements.txt");
        assert_eq!(req.kind, ArtifactKind::Create);
        assert_eq!(req.content, "structlog==24.2.0\n");
    }

    #[test]
    fn test_pyproject_and_setup_lists() {
        let engine = FallbackTemplateEngine::new("orders");

        let report = drift("main.py", Some("pyproject.toml"), None);
        let snap = snapshot(
            "app = FastAPI()\n",
            Some("[project]\nname = \"orders\"\ndependencies = [\n    \"fastapi\",\n]\n"),
        );
        let artifacts = engine.generate(&report, &snap);
        assert!(
            by_path(&artifacts, "pyproject.toml")
                .content
                .contains("dependencies = [\"structlog==24.2.0\", \n    \"fastapi\",")
        );

        let report = drift("main.py", Some("setup.py"), None);
        let snap = snapshot(
            "app = FastAPI()\n",
            Some("from setuptools import setup\nsetup(name=\"x\", install_requires=[])\n"),
        );
        let artifacts = engine.generate(&report, &snap);
        let setup = by_path(&artifacts, "setup.py");
        assert!(setup.content.contains("install_requires=[\"structlog==24.2.0\"]"));
        assert!(validate(&setup.content, "setup.py").is_ok());
    }

    #[test]
    fn test_existing_support_files_are_not_recreated() {
        let engine = FallbackTemplateEngine::new("orders");
        let report = drift("main.py", Some("requirements.txt"), None);
        let mut snap = snapshot("app = FastAPI()\n", Some("fastapi\n"));
        snap.existing
            .insert("middleware.py".to_string(), "# cors helpers\n".to_string());
        snap.existing
            .insert(HEALTH_TEST_PATH.to_string(), "def test_x():\n    pass\n".to_string());

        let artifacts = engine.generate(&report, &snap);
        assert!(artifacts.iter().all(|a| a.path != "middleware.py"));
        assert!(artifacts.iter().all(|a| a.path != HEALTH_TEST_PATH));
        by_path(&artifacts, "request_context.py");
        assert!(
            by_path(&artifacts, "main.py")
                .content
                .contains("from request_context import RequestContextMiddleware")
        );
    }

    #[test]
    fn test_occupied_support_paths_skip_the_feature() {
        let engine = FallbackTemplateEngine::new("orders");
        let report = drift("main.py", Some("requirements.txt"), None);
        let mut snap = snapshot("from fastapi import FastAPI\napp = FastAPI()\n", Some("fastapi\n"));
        for name in ["middleware.py", "request_context.py"] {
            snap.existing
                .insert(name.to_string(), "# cors helpers\n".to_string());
        }

        let artifacts = engine.generate(&report, &snap);
        assert!(artifacts.iter().all(|a| a.path != "middleware.py"));
        assert!(artifacts.iter().all(|a| a.path != "request_context.py"));

        let main = &by_path(&artifacts, "main.py").content;
        assert!(!main.contains("RequestContextMiddleware"));
        assert!(main.contains("from logging_config import configure_logging"));
        assert!(main.contains("@app.get(\"/healthz\")"));
        assert!(
            by_path(&artifacts, "logging_config.py")
                .content
                .contains("from middleware import get_request_id, get_trace_id")
        );
        for artifact in &artifacts {
            assert!(validate(&artifact.content, &artifact.path).is_ok(), "{}", artifact.path);
        }

        for name in ["logging_config.py", "structured_logging.py"] {
            snap.existing
                .insert(name.to_string(), "LEVEL = 10\n".to_string());
        }
        let artifacts = engine.generate(&report, &snap);
        let paths: Vec<&str> = artifacts.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(paths, vec!["main.py", "tests/test_health.py"]);
        let main = &by_path(&artifacts, "main.py").content;
        assert!(!main.contains("configure_logging"));
        assert!(!main.contains("RequestContextMiddleware"));
        assert!(main.contains("@app.get(\"/readyz\")"));
    }

    #[test]
    fn test_service_name_is_escaped() {
        let engine = FallbackTemplateEngine::new("we\"ird");
        let report = drift("main.py", Some("requirements.txt"), None);
        let artifacts = engine.generate(&report, &snapshot("app = FastAPI()\n", Some("structlog\n")));
        for artifact in &artifacts {
            assert!(validate(&artifact.content, &artifact.path).is_ok(), "{}", artifact.path);
        }
    }
}

use std::fs;
use std::path::Path;
use tracing::warn;

use super::response_parser::{ExpectedOutput, expected_outputs};
use crate::data::{
    ApplicationStructure, ArtifactKind, ComplianceFeature, DriftReport, PolicyEvidenceSource,
    PolicyHit, SupportPaths,
};

pub const NO_EVIDENCE: &str = "No specific policy documents found.";

/// Current content of one repository file handed to the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoFile {
    pub path: String,
    pub content: String,
}

/// Declarative description of what must change and where.
#[derive(Debug, Clone)]
pub struct TransformationRequest {
    pub service_name: String,
    pub missing: Vec<ComplianceFeature>,
    pub structure: ApplicationStructure,
    pub files: Vec<RepoFile>,
    pub support: SupportPaths,
    pub outputs: Vec<ExpectedOutput>,
    pub policy_evidence: String,
}

/// Builds the request from data that has already been read.
pub fn plan(
    repo_files: &[RepoFile],
    service_name: &str,
    drift: &DriftReport,
    policy_evidence: &str,
) -> TransformationRequest {
    TransformationRequest {
        service_name: service_name.to_string(),
        missing: drift.missing_features(),
        structure: drift.structure.clone(),
        files: repo_files.to_vec(),
        support: drift.structure.support_paths(),
        outputs: expected_outputs(&drift.structure),
        policy_evidence: policy_evidence.to_string(),
    }
}

/// Reads the entry point, routers and manifest, in that order.
///
/// Files that cannot be read are left out.
pub fn read_repo_files(repo_root: &Path, structure: &ApplicationStructure) -> Vec<RepoFile> {
    let mut files: Vec<RepoFile> = Vec::new();
    let candidates = structure
        .entry_point
        .iter()
        .chain(structure.router_files.iter())
        .chain(structure.manifest.iter());

    for rel in candidates {
        if files.iter().any(|f| &f.path == rel) {
            continue;
        }
        if let Ok(content) = fs::read_to_string(repo_root.join(rel)) {
            files.push(RepoFile {
                path: rel.clone(),
                content,
            });
        }
    }
    files
}

/// Knowledge-base queries for the features a report is missing.
pub fn policy_queries(drift: &DriftReport) -> Vec<&'static str> {
    let mut queries = Vec::new();
    if drift.missing_health || drift.missing_readiness {
        queries.push("health endpoints kubernetes readiness liveness");
    }
    if drift.missing_logging {
        queries.push("structured logging observability");
    }
    if drift.missing_request_context {
        queries.push("trace propagation correlation request context");
    }
    queries
}

/// Collects policy excerpts; a failing search only loses its own hits.
pub fn gather_policy_evidence<E: PolicyEvidenceSource>(
    drift: &DriftReport,
    source: &E,
    limit: usize,
) -> String {
    let mut hits = Vec::new();
    for query in policy_queries(drift) {
        match source.search(query, limit) {
            Ok(found) => hits.extend(found),
            Err(e) => warn!(query, error = %e, "policy evidence search failed"),
        }
    }
    format_evidence(&hits)
}

pub fn format_evidence(hits: &[PolicyHit]) -> String {
    if hits.is_empty() {
        return NO_EVIDENCE.to_string();
    }
    hits.iter()
        .map(|hit| {
            format!(
                "--- {} (relevance: {:.2}) ---\n{}",
                hit.doc_id, hit.score, hit.excerpt
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn or_none(items: &[String]) -> String {
    if items.is_empty() {
        "None".to_string()
    } else {
        items.join(", ")
    }
}

impl TransformationRequest {
    /// Renders the prompt sent to the generation service.
    ///
    /// The output section headers are the exact labels the response parser
    /// anchors on.
    pub fn render_prompt(&self) -> String {
        let s = &self.structure;
        let mut out = String::new();

        out.push_str(
            "You are a compliance engineer. Transform this FastAPI application to add missing compliance features.\n\n",
        );
        out.push_str(&format!("## Service Name\n{}\n\n", self.service_name));

        out.push_str("## Discovered Application Structure\n");
        out.push_str(&format!(
            "- **Main App File**: {}\n",
            s.entry_point.as_deref().unwrap_or("Not found")
        ));
        out.push_str(&format!("- **App Variable Name**: {}\n", s.app_variable));
        out.push_str(&format!("- **Router Files**: {}\n", or_none(&s.router_files)));
        out.push_str(&format!(
            "- **Requirements File**: {}\n",
            s.manifest.as_deref().unwrap_or("Not found")
        ));
        out.push_str(&format!("- **Existing Middleware**: {}\n", or_none(&s.middleware)));
        out.push_str(&format!(
            "- **Factory Pattern**: {}\n\n",
            if s.factory_pattern { "Yes" } else { "No" }
        ));

        out.push_str("## Missing Compliance Features\n");
        for feature in &self.missing {
            out.push_str(&format!("- {}\n", feature.describe()));
        }
        out.push('\n');

        out.push_str(&format!(
            "## Policy Requirements (from knowledge base)\n{}\n\n",
            self.policy_evidence
        ));

        out.push_str("## Current Repository Files\n");
        for file in &self.files {
            let lang = if file.path.ends_with(".py") { "python" } else { "" };
            out.push_str(&format!(
                "### File: {}\n```{}\n{}\n```\n",
                file.path, lang, file.content
            ));
        }
        out.push('\n');

        out.push_str("## Your Task\nGenerate the COMPLETE updated/new files. Output these sections:\n\n");
        for output in &self.outputs {
            let label = match output.kind {
                ArtifactKind::Update => "UPDATED",
                ArtifactKind::Create => "NEW",
            };
            out.push_str(&format!("### {} {}\n", label, output.path));
            out.push_str(&self.section_guidance(&output.path));
            out.push_str("\n\n");
        }

        out.push_str("## Critical Requirements:\n");
        out.push_str("1. **Preserve existing functionality** - don't remove any existing routes, imports, or logic\n");
        out.push_str("2. **Match existing code style** - indentation, quotes, naming conventions\n");
        out.push_str("3. **Correct imports** - adjust import paths based on the actual app structure\n");
        out.push_str(&format!(
            "4. **Handle factory pattern** - if using {}(), apply middleware inside the factory\n\n",
            s.app_variable
        ));
        out.push_str("Output ONLY the code sections with the exact headers shown. No explanations.");
        out
    }

    fn section_guidance(&self, path: &str) -> String {
        if Some(path) == self.structure.entry_point.as_deref() {
            "(Complete updated file with all compliance features. Preserve ALL existing code and style. Add imports at top, configure_logging() call early, middleware after app creation, health endpoints.)".to_string()
        } else if path == self.structure.manifest_or_default() {
            "(Complete updated requirements with structlog==24.2.0 added if missing)".to_string()
        } else if path == self.support.middleware {
            "(RequestContextMiddleware implementation. Must:\n- Use contextvars for trace_id and request_id\n- Extract trace_id from W3C traceparent header: 00-<trace_id>-<span_id>-<flags>\n- Generate request_id from x-request-id header or uuid\n- Export get_trace_id() and get_request_id() functions\n- Add x-trace-id and x-request-id response headers)".to_string()
        } else if path == self.support.logging_config {
            format!(
                "(Structured logging configuration. Must:\n- Use structlog with JSON output\n- Inject trace_id, request_id, and service name \"{}\" into all log entries\n- Provide configure_logging() function to call at startup)",
                self.service_name
            )
        } else {
            "(Pytest tests. Must test:\n- GET /healthz returns 200\n- GET /readyz returns 200\n- Response includes x-request-id and x-trace-id headers\n- Import the correct app variable from the correct module)".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvidenceError;

    struct FixedEvidence(Vec<PolicyHit>);

    impl PolicyEvidenceSource for FixedEvidence {
        fn search(&self, _query: &str, limit: usize) -> Result<Vec<PolicyHit>, EvidenceError> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }
    }

    struct BrokenEvidence;

    impl PolicyEvidenceSource for BrokenEvidence {
        fn search(&self, _query: &str, _limit: usize) -> Result<Vec<PolicyHit>, EvidenceError> {
            Err(EvidenceError::Unavailable("offline".to_string()))
        }
    }

    fn drift(entry: &str) -> DriftReport {
        DriftReport {
            applicable: true,
            structure: ApplicationStructure {
                entry_point: Some(entry.to_string()),
                manifest: Some("requirements.txt".to_string()),
                ..Default::default()
            },
            missing_health: true,
            missing_readiness: false,
            missing_logging: true,
            missing_request_context: false,
        }
    }

    #[test]
    fn test_queries_follow_missing_features() {
        assert_eq!(
            policy_queries(&drift("main.py")),
            vec![
                "health endpoints kubernetes readiness liveness",
                "structured logging observability"
            ]
        );
    }

    #[test]
    fn test_evidence_formatting() {
        let source = FixedEvidence(vec![PolicyHit {
            doc_id: "ops/health.md".to_string(),
            score: 3.0,
            excerpt: "Services must expose /healthz".to_string(),
        }]);
        let text = gather_policy_evidence(&drift("main.py"), &source, 2);
        assert!(text.starts_with("--- ops/health.md (relevance: 3.00) ---\nServices must expose /healthz"));
    }

    #[test]
    fn test_failed_search_degrades_to_placeholder() {
        let text = gather_policy_evidence(&drift("main.py"), &BrokenEvidence, 2);
        assert_eq!(text, NO_EVIDENCE);
    }

    #[test]
    fn test_plan_colocates_support_files() {
        let report = drift("svc/api/main.py");
        let files = vec![RepoFile {
            path: "svc/api/main.py".to_string(),
            content: "app = FastAPI()\n".to_string(),
        }];
        let request = plan(&files, "orders", &report, NO_EVIDENCE);
        assert_eq!(request.support.middleware, "svc/api/middleware.py");
        assert_eq!(request.support.logging_config, "svc/api/logging_config.py");
        assert_eq!(
            request.missing,
            vec![ComplianceFeature::HealthEndpoint, ComplianceFeature::StructuredLogging]
        );

        let prompt = request.render_prompt();
        assert!(prompt.contains("### UPDATED svc/api/main.py"));
        assert!(prompt.contains("### UPDATED requirements.txt"));
        assert!(prompt.contains("### NEW svc/api/middleware.py"));
        assert!(prompt.contains("### NEW svc/api/logging_config.py"));
        assert!(prompt.contains("### NEW tests/test_health.py"));
        assert!(prompt.contains("### File: svc/api/main.py\n```python\napp = FastAPI()\n"));
        assert!(prompt.contains("service name \"orders\""));
    }
}

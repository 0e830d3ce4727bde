mod discoverer;
mod drift_detector;
mod patch_applier;
mod planner;
mod pysource;
mod response_parser;
mod templates;
pub mod validator;

pub use discoverer::{PatternDiscoverer, StructureDiscoverer, collect_python_files};
pub use drift_detector::{
    DriftDetector, HEALTH_MARKER, LOGGING_MARKER, READINESS_MARKER, REQUEST_CONTEXT_MARKER,
};
pub use patch_applier::{
    DEFAULT_EVIDENCE_LIMIT, DEFAULT_GENERATION_TIMEOUT, PatchApplier, PatchOutcome, PatchState,
    resolve_inside, write_artifacts,
};
pub use planner::{
    NO_EVIDENCE, RepoFile, TransformationRequest, format_evidence, gather_policy_evidence, plan,
    policy_queries, read_repo_files,
};
pub use response_parser::{ExpectedOutput, expected_outputs, extract_artifacts};
pub use templates::{FallbackTemplateEngine, RepoSnapshot, STRUCTLOG_REQUIREMENT};

use serde::{Deserialize, Serialize};

use super::structure::ApplicationStructure;

/// One of the operational features the fleet policy requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComplianceFeature {
    HealthEndpoint,
    ReadinessEndpoint,
    StructuredLogging,
    RequestContext,
}

impl ComplianceFeature {
    /// Human-readable line used in transformation requests.
    pub fn describe(&self) -> &'static str {
        match self {
            ComplianceFeature::HealthEndpoint => "/healthz endpoint (liveness probe)",
            ComplianceFeature::ReadinessEndpoint => "/readyz endpoint (readiness probe)",
            ComplianceFeature::StructuredLogging => "Structured logging with structlog",
            ComplianceFeature::RequestContext => {
                "RequestContextMiddleware for trace propagation (W3C traceparent)"
            }
        }
    }
}

/// Compliance verdict for one repository.
///
/// When `applicable` is false the repository is not a recognized FastAPI
/// service and the remaining flags carry no meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    pub applicable: bool,
    pub structure: ApplicationStructure,
    pub missing_health: bool,
    pub missing_readiness: bool,
    pub missing_logging: bool,
    pub missing_request_context: bool,
}

impl DriftReport {
    pub fn not_applicable(structure: ApplicationStructure) -> Self {
        Self {
            applicable: false,
            structure,
            missing_health: false,
            missing_readiness: false,
            missing_logging: false,
            missing_request_context: false,
        }
    }

    pub fn has_drift(&self) -> bool {
        self.applicable && !self.missing_features().is_empty()
    }

    /// Missing features in a fixed order.
    pub fn missing_features(&self) -> Vec<ComplianceFeature> {
        let mut features = Vec::new();
        if self.missing_health {
            features.push(ComplianceFeature::HealthEndpoint);
        }
        if self.missing_readiness {
            features.push(ComplianceFeature::ReadinessEndpoint);
        }
        if self.missing_logging {
            features.push(ComplianceFeature::StructuredLogging);
        }
        if self.missing_request_context {
            features.push(ComplianceFeature::RequestContext);
        }
        features
    }
}

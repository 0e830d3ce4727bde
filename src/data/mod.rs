mod artifact;
mod collaborators;
mod drift;
mod structure;

pub use artifact::{ArtifactKind, ArtifactOrigin, TransformationArtifact};
pub use collaborators::{
    ApprovalService, ApprovalVerdict, PolicyEvidenceSource, PolicyHit, RiskLevel, ScanReport,
    SECURITY_APPROVAL, SRE_APPROVAL, Severity, TransformationService, VulnerabilityFinding,
    VulnerabilityScanner,
};
pub use drift::{ComplianceFeature, DriftReport};
pub use structure::{ApplicationStructure, SupportPaths, HEALTH_TEST_PATH};

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::{EvidenceError, GenerationError, PolicyServiceError};

/// The generative transformation service.
///
/// Implementations send a prompt and resolve to the raw response text, or
/// `None` when the service produced nothing. Output is untrusted: callers
/// must parse and validate it before use.
pub trait TransformationService {
    fn transform(
        &self,
        prompt: &str,
    ) -> impl Future<Output = Result<Option<String>, GenerationError>> + Send;
}

/// A ranked excerpt returned by the policy knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyHit {
    pub doc_id: String,
    pub score: f64,
    pub excerpt: String,
}

/// The policy evidence (knowledge base) service.
pub trait PolicyEvidenceSource {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<PolicyHit>, EvidenceError>;
}

/// Approver role that maps to the `needs-sre-approval` label.
pub const SRE_APPROVAL: &str = "SRE-Prod";
/// Approver role that maps to the `needs-security-approval` label.
pub const SECURITY_APPROVAL: &str = "Security";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn title(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
            RiskLevel::Critical => "Critical",
        }
    }
}

/// Approvals the change-management service requires for one change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalVerdict {
    pub required_approvals: Vec<String>,
    pub risk_level: RiskLevel,
    pub rationale: String,
    pub auto_merge_allowed: bool,
    pub sla_hours: Option<u32>,
}

impl ApprovalVerdict {
    pub fn requires(&self, role: &str) -> bool {
        self.required_approvals.iter().any(|r| r == role)
    }

    /// Pull request labels implied by the required approvals.
    pub fn labels(&self) -> Vec<String> {
        let mut labels = Vec::new();
        if self.requires(SRE_APPROVAL) {
            labels.push("needs-sre-approval".to_string());
        }
        if self.requires(SECURITY_APPROVAL) {
            labels.push("needs-security-approval".to_string());
        }
        labels
    }
}

/// The approval-matrix service.
pub trait ApprovalService {
    fn evaluate(
        &self,
        service: &str,
        touched: &[String],
    ) -> impl Future<Output = Result<ApprovalVerdict, PolicyServiceError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// One vulnerable dependency reported by the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerabilityFinding {
    pub name: String,
    pub version: String,
    pub severity: Severity,
    pub cve: String,
    #[serde(default)]
    pub fixed_version: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanReport {
    pub findings: Vec<VulnerabilityFinding>,
    pub recommendations: Vec<String>,
}

impl ScanReport {
    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    /// No critical or high findings.
    pub fn is_compliant(&self) -> bool {
        self.count(Severity::Critical) == 0 && self.count(Severity::High) == 0
    }
}

/// The dependency vulnerability scanner. Takes `requirements.txt` text.
pub trait VulnerabilityScanner {
    fn scan(
        &self,
        requirements: &str,
    ) -> impl Future<Output = Result<ScanReport, PolicyServiceError>> + Send;
}

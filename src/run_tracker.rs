//! Run tracking for fleet runs
//!
//! Stores the per-repository outcome of each run as JSON under
//! `.fleetfix/runs/` so a run can be audited after the fact.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use crate::data::{ArtifactOrigin, ComplianceFeature, RiskLevel};

const TRACKER_DIR: &str = ".fleetfix";
const RUNS_DIR: &str = "runs";

/// How processing of one repository ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepoStatus {
    /// Not a recognized FastAPI service
    Skipped,
    /// Already compliant
    NoDrift,
    /// Patched (and possibly committed) without a pull request
    Patched,
    /// Patched and a pull request was opened or found
    PrOpened,
    Failed,
}

/// Outcome for a single repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoRecord {
    pub url: String,
    pub service: String,
    pub workspace: Option<PathBuf>,
    pub status: RepoStatus,
    #[serde(default)]
    pub missing: Vec<ComplianceFeature>,
    #[serde(default)]
    pub touched: Vec<String>,
    pub origin: Option<ArtifactOrigin>,
    /// Approver roles named by the approval service, if it was consulted
    #[serde(default)]
    pub required_approvals: Vec<String>,
    #[serde(default)]
    pub risk_level: Option<RiskLevel>,
    /// Vulnerable dependencies reported by the scanner
    #[serde(default)]
    pub vulnerabilities: usize,
    pub pr_url: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RepoRecord {
    pub fn new(url: &str, service: &str) -> Self {
        let now = Utc::now();
        Self {
            url: url.to_string(),
            service: service.to_string(),
            workspace: None,
            status: RepoStatus::Failed,
            missing: Vec::new(),
            touched: Vec::new(),
            origin: None,
            required_approvals: Vec::new(),
            risk_level: None,
            vulnerabilities: 0,
            pr_url: None,
            error: None,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn finish(mut self, status: RepoStatus) -> Self {
        self.status = status;
        self.finished_at = Utc::now();
        self
    }

    pub fn fail(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self.finish(RepoStatus::Failed)
    }

    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Main run tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTracker {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub records: Vec<RepoRecord>,
}

impl RunTracker {
    pub fn new(dry_run: bool) -> Self {
        let started_at = Utc::now();
        let run_id = format!(
            "{}-{}",
            started_at.format("%Y%m%dT%H%M%SZ"),
            short_id(&started_at.to_rfc3339())
        );
        Self {
            run_id,
            started_at,
            finished_at: None,
            dry_run,
            records: Vec::new(),
        }
    }

    pub fn record(&mut self, record: RepoRecord) {
        self.records.push(record);
    }

    pub fn count(&self, status: RepoStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }

    /// Save the run under `base/.fleetfix/runs/{run_id}.json`
    pub fn save(&mut self, base: &Path) -> Result<PathBuf> {
        self.finished_at = Some(Utc::now());

        let dir = base.join(TRACKER_DIR).join(RUNS_DIR);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let path = dir.join(format!("{}.json", self.run_id));
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize run tracker")?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write run record {}", path.display()))?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read run record {}", path.display()))?;
        serde_json::from_str(&content).context("Failed to parse run record")
    }

    /// Get a summary of the run
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!("Run {}:", self.run_id));
        for record in &self.records {
            let detail = match (&record.pr_url, &record.error) {
                (Some(url), _) => url.clone(),
                (None, Some(err)) => err.clone(),
                (None, None) => format!("{} file(s) touched", record.touched.len()),
            };
            lines.push(format!(
                "  {:<24} {:<9} {}",
                record.service,
                format!("{:?}", record.status),
                detail
            ));
        }
        if self.records.is_empty() {
            lines.push("  No repositories processed".to_string());
        }
        lines.join("\n")
    }
}

/// Six hex characters derived from `seed` and the current time.
pub fn short_id(seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(Utc::now().timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..6].to_string()
}

use serde::Serialize;
use std::fs;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::runtime::{Builder, Handle};
use tracing::{debug, info, warn};

use super::drift_detector::DriftDetector;
use super::planner::{gather_policy_evidence, plan, read_repo_files};
use super::response_parser::extract_artifacts;
use super::templates::{FallbackTemplateEngine, RepoSnapshot};
use super::validator::{self, LintOutcome};
use crate::data::{
    ArtifactOrigin, DriftReport, PolicyEvidenceSource, TransformationArtifact,
    TransformationService,
};
use crate::error::{GenerationError, PatchError, WriteError};

pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_EVIDENCE_LIMIT: usize = 2;

/// Stages of one patch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PatchState {
    CheckingSafety,
    Detecting,
    NotApplicable,
    NoDrift,
    NeedsPatch,
    Planning,
    Generating,
    Parsing,
    ParseEmpty,
    Validating,
    ValidationFailed,
    ValidationPassed,
    FallbackGenerating,
    Writing,
    Done,
}

/// What a completed cycle did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatchOutcome {
    /// Repository-relative paths actually written, sorted and unique.
    pub touched: Vec<String>,
    /// Which path produced the written batch; `None` if nothing was needed.
    pub origin: Option<ArtifactOrigin>,
    pub drift: DriftReport,
    /// Every state the cycle passed through, in order.
    pub trail: Vec<PatchState>,
}

/// Per-repository state carried between stages.
struct PatchCycle {
    repo_root: PathBuf,
    service_name: String,
    trail: Vec<PatchState>,
}

impl PatchCycle {
    fn enter(&mut self, state: PatchState) {
        debug!(repo = %self.repo_root.display(), stage = ?state, "patch cycle");
        self.trail.push(state);
    }

    fn finish(
        mut self,
        drift: DriftReport,
        touched: Vec<String>,
        origin: Option<ArtifactOrigin>,
    ) -> PatchOutcome {
        self.enter(PatchState::Done);
        PatchOutcome {
            touched,
            origin,
            drift,
            trail: self.trail,
        }
    }
}

/// Orchestrates safety check, detection, generation, validation and writes.
pub struct PatchApplier<G, E> {
    generator: G,
    evidence: E,
    workspace_root: PathBuf,
    detector: DriftDetector,
    generation_timeout: Duration,
    evidence_limit: usize,
    lint: bool,
}

impl<G, E> PatchApplier<G, E>
where
    G: TransformationService,
    E: PolicyEvidenceSource,
{
    pub fn new(generator: G, evidence: E, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            generator,
            evidence,
            workspace_root: workspace_root.into(),
            detector: DriftDetector::default(),
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
            evidence_limit: DEFAULT_EVIDENCE_LIMIT,
            lint: false,
        }
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn with_evidence_limit(mut self, limit: usize) -> Self {
        self.evidence_limit = limit;
        self
    }

    pub fn with_lint(mut self, lint: bool) -> Self {
        self.lint = lint;
        self
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Runs one patch cycle against `repo`.
    ///
    /// Only a safety violation is returned as an error. Unrecognized
    /// layouts, generation failures and invalid generated code all end in
    /// an `Ok` outcome, possibly with nothing touched.
    pub async fn apply(&self, repo: &Path, service_name: &str) -> Result<PatchOutcome, PatchError> {
        let mut cycle = PatchCycle {
            repo_root: repo.to_path_buf(),
            service_name: service_name.to_string(),
            trail: Vec::new(),
        };

        cycle.enter(PatchState::CheckingSafety);
        cycle.repo_root = self.check_safety(repo)?;

        cycle.enter(PatchState::Detecting);
        let drift = self.detector.detect(&cycle.repo_root);
        if !drift.applicable {
            info!(repo = %cycle.repo_root.display(), "not a recognized FastAPI service");
            cycle.enter(PatchState::NotApplicable);
            return Ok(cycle.finish(drift, Vec::new(), None));
        }
        if !drift.has_drift() {
            info!(repo = %cycle.repo_root.display(), "no compliance drift");
            cycle.enter(PatchState::NoDrift);
            return Ok(cycle.finish(drift, Vec::new(), None));
        }
        cycle.enter(PatchState::NeedsPatch);

        let (artifacts, origin) = match self.generate(&mut cycle, &drift).await {
            Some(batch) => (batch, ArtifactOrigin::Generated),
            None => {
                cycle.enter(PatchState::FallbackGenerating);
                let snapshot = RepoSnapshot::capture(&cycle.repo_root, &drift.structure);
                let batch = FallbackTemplateEngine::new(cycle.service_name.as_str())
                    .generate(&drift, &snapshot);
                (batch, ArtifactOrigin::Fallback)
            }
        };

        cycle.enter(PatchState::Writing);
        let touched = write_artifacts(&cycle.repo_root, &artifacts);
        info!(
            repo = %cycle.repo_root.display(),
            origin = ?origin,
            files = touched.len(),
            "patch written"
        );

        if self.lint {
            for rel in touched.iter().filter(|p| p.ends_with(".py")) {
                if let LintOutcome::Findings(_) = validator::lint(&cycle.repo_root, rel).await {
                    debug!(file = %rel, "lint findings are advisory");
                }
            }
        }

        Ok(cycle.finish(drift, touched, Some(origin)))
    }

    /// Synchronous entry point usable from plain code or from inside a
    /// running tokio runtime.
    ///
    /// Inside a runtime the cycle runs on a scoped worker thread with its
    /// own runtime, so the caller's scheduler is never re-entered.
    pub fn apply_blocking(
        &self,
        repo: &Path,
        service_name: &str,
    ) -> Result<PatchOutcome, PatchError>
    where
        G: Sync,
        E: Sync,
    {
        let outcome = match Handle::try_current() {
            Ok(_) => std::thread::scope(|scope| {
                scope
                    .spawn(|| block_on_fresh(self.apply(repo, service_name)))
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            }),
            Err(_) => block_on_fresh(self.apply(repo, service_name)),
        };
        outcome?
    }

    /// Canonical repository root, provided it lies strictly inside the
    /// workspace.
    fn check_safety(&self, repo: &Path) -> Result<PathBuf, PatchError> {
        let violation = || PatchError::SafetyViolation {
            target: repo.to_path_buf(),
            workspace: self.workspace_root.clone(),
        };
        let workspace = self.workspace_root.canonicalize().map_err(|_| violation())?;
        let target = repo.canonicalize().map_err(|_| violation())?;
        if target != workspace && target.starts_with(&workspace) {
            Ok(target)
        } else {
            Err(violation())
        }
    }

    /// Planning through validation; `None` means use the fallback.
    async fn generate(
        &self,
        cycle: &mut PatchCycle,
        drift: &DriftReport,
    ) -> Option<Vec<TransformationArtifact>> {
        cycle.enter(PatchState::Planning);
        let files = read_repo_files(&cycle.repo_root, &drift.structure);
        let evidence = gather_policy_evidence(drift, &self.evidence, self.evidence_limit);
        let request = plan(&files, &cycle.service_name, drift, &evidence);
        let prompt = request.render_prompt();

        cycle.enter(PatchState::Generating);
        let response = match tokio::time::timeout(
            self.generation_timeout,
            self.generator.transform(&prompt),
        )
        .await
        {
            Err(_) => Err(GenerationError::Timeout(self.generation_timeout.as_secs())),
            Ok(result) => result,
        };
        let raw = match response {
            Ok(Some(text)) if !text.trim().is_empty() => text,
            Ok(_) => {
                info!("generation returned nothing; using templates");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "generation unavailable; using templates");
                return None;
            }
        };

        cycle.enter(PatchState::Parsing);
        let artifacts = extract_artifacts(&raw, drift);
        if artifacts.is_empty() {
            info!("no file sections found in generated response");
            cycle.enter(PatchState::ParseEmpty);
            return None;
        }

        cycle.enter(PatchState::Validating);
        let failures: Vec<_> = artifacts
            .iter()
            .filter_map(|a| validator::validate(&a.content, &a.path).err())
            .collect();
        if !failures.is_empty() {
            for diagnostic in &failures {
                warn!("{}", diagnostic);
            }
            warn!(
                invalid = failures.len(),
                total = artifacts.len(),
                "discarding generated batch"
            );
            cycle.enter(PatchState::ValidationFailed);
            return None;
        }

        cycle.enter(PatchState::ValidationPassed);
        Some(artifacts)
    }
}

fn block_on_fresh<F: Future>(future: F) -> Result<F::Output, PatchError> {
    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(PatchError::Runtime)?;
    Ok(runtime.block_on(future))
}

/// Writes each artifact independently.
///
/// Returns the sorted, de-duplicated paths that landed on disk; rejected
/// or failed writes are logged and left out.
pub fn write_artifacts(repo_root: &Path, artifacts: &[TransformationArtifact]) -> Vec<String> {
    let mut touched = Vec::new();
    for artifact in artifacts {
        match write_artifact(repo_root, artifact) {
            Ok(()) => {
                debug!(file = %artifact.path, kind = ?artifact.kind, "wrote artifact");
                touched.push(artifact.path.clone());
            }
            Err(e) => warn!(error = %e, "artifact not written"),
        }
    }
    touched.sort();
    touched.dedup();
    touched
}

fn write_artifact(repo_root: &Path, artifact: &TransformationArtifact) -> Result<(), WriteError> {
    let target = resolve_inside(repo_root, &artifact.path)?;
    let io_err = |source| WriteError::Io {
        path: artifact.path.clone(),
        source,
    };

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut content = artifact.content.trim_end_matches('\n').to_string();
    content.push('\n');
    fs::write(&target, content).map_err(io_err)
}

/// Joins `rel` onto the root, refusing anything that could land outside it.
///
/// Paths that pass through a symlink are refused outright.
pub fn resolve_inside(repo_root: &Path, rel: &str) -> Result<PathBuf, WriteError> {
    let escape = || WriteError::PathEscape(rel.to_string());
    let rel_path = Path::new(rel);
    if rel.trim().is_empty() || rel_path.is_absolute() {
        return Err(escape());
    }
    if rel_path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(escape());
    }

    let root = repo_root.canonicalize().map_err(|_| escape())?;
    let target = root.join(rel_path);

    // No existing component may be a symlink, dangling or not.
    let mut walked = root.clone();
    for component in rel_path.components() {
        walked.push(component);
        match fs::symlink_metadata(&walked) {
            Ok(meta) if meta.file_type().is_symlink() => {
                debug!(path = %walked.display(), "refusing to write through symlink");
                return Err(escape());
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
    Ok(target)
}

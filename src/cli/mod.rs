use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

mod pr_body;
mod progress;
mod vcs;

use fleetfix::clients::{ApprovalClient, ChatCompletionsClient, Generator, SecurityScanClient};
use fleetfix::contexts::{DriftDetector, NO_EVIDENCE, PatchApplier, format_evidence};
use fleetfix::data::{
    ApprovalService, ApprovalVerdict, PolicyEvidenceSource, ScanReport, VulnerabilityScanner,
};
use fleetfix::registries::FileKnowledgeBase;
use fleetfix::run_tracker::{RepoRecord, RepoStatus, RunTracker, short_id};
use fleetfix::settings::Settings;
use pr_body::PrContext;
use progress::ProgressIndicator;

#[derive(Clone, Copy)]
pub struct Config {
    pub verbose: bool,
    pub dry_run: bool,
}

const FLEET_EVIDENCE_QUERY: &str =
    "structured logging trace propagation health readiness approval vulnerability evidence";
const FLEET_EVIDENCE_LIMIT: usize = 4;
const COMMIT_MESSAGE: &str = "chore: enforce logging/tracing/health gates";

type Applier = PatchApplier<Generator, FileKnowledgeBase>;

/// The optional approval and vulnerability-scan services.
struct PolicyServices {
    approvals: Option<ApprovalClient>,
    scanner: Option<SecurityScanClient>,
}

pub async fn detect(repo: PathBuf, _config: &Config) -> Result<()> {
    if !repo.is_dir() {
        bail!("Repository directory not found: {}", repo.display());
    }
    let report = detector().detect(&repo);
    let json = serde_json::to_string_pretty(&report).context("Failed to serialize drift report")?;
    println!("{}", json);
    Ok(())
}

pub async fn patch(
    repo: PathBuf,
    service: Option<String>,
    settings: &Settings,
    config: &Config,
) -> Result<()> {
    if !repo.is_dir() {
        bail!("Repository directory not found: {}", repo.display());
    }
    let service = service.unwrap_or_else(|| service_from_dir(&repo));

    if config.dry_run {
        let report = detector().detect(&repo);
        if !report.applicable {
            println!("[DRY RUN] {} is not a recognized FastAPI service", service);
        } else if !report.has_drift() {
            println!("[DRY RUN] {} is already compliant", service);
        } else {
            println!("[DRY RUN] Would patch {} for:", service);
            for feature in report.missing_features() {
                println!("  - {}", feature.describe());
            }
        }
        return Ok(());
    }

    let applier = build_applier(settings)?;
    let outcome = applier.apply(&repo, &service).await?;

    if !outcome.drift.applicable {
        println!("{} is not a recognized FastAPI service; nothing to do", service);
    } else if outcome.touched.is_empty() {
        println!("{} is already compliant", service);
    } else {
        println!(
            "Patched {} ({:?}), {} file(s):",
            service,
            outcome.origin,
            outcome.touched.len()
        );
        for path in &outcome.touched {
            println!("  {}", path);
        }
    }
    if config.verbose {
        println!("Stages: {:?}", outcome.trail);
    }
    Ok(())
}

pub async fn evidence(query: String, limit: usize, settings: &Settings) -> Result<()> {
    let kb = FileKnowledgeBase::new(settings.knowledge_dir.clone());
    let hits = kb
        .search(&query, limit)
        .with_context(|| format!("Failed to search {}", kb.root().display()))?;

    if hits.is_empty() {
        println!("{}", NO_EVIDENCE);
        return Ok(());
    }
    println!("{}", format_evidence(&hits));
    Ok(())
}

/// Processes every repository in turn and records how each one ended.
pub async fn run(repos: Vec<String>, settings: &Settings, config: &Config) -> Result<()> {
    let repos = if repos.is_empty() {
        settings.repos.clone()
    } else {
        repos
    };
    if repos.is_empty() {
        println!("No repositories to process (pass URLs or set `repos` in the config file)");
        return Ok(());
    }

    if !config.dry_run {
        vcs::gh_auth_status()?;
    }
    fs::create_dir_all(&settings.workspace_root).with_context(|| {
        format!(
            "Failed to create workspace {}",
            settings.workspace_root.display()
        )
    })?;

    let applier = build_applier(settings)?;
    let policy_services = build_policy_services(settings)?;
    let evidence = fleet_evidence(settings);

    println!("Running fleet compliance over {} repo(s)", repos.len());
    let mut tracker = RunTracker::new(config.dry_run);
    let mut progress = ProgressIndicator::new(repos.len());

    for url in &repos {
        let service = vcs::repo_name(url);
        progress.start_item(&service);

        let record = RepoRecord::new(url, &service);
        let result = process_repo(
            url,
            &service,
            record.clone(),
            &applier,
            &policy_services,
            &evidence,
            settings,
            config,
        )
        .await;
        let record = match result {
            Ok(done) => done,
            Err(e) => {
                warn!(repo = %url, error = %e, "repository failed");
                if config.verbose {
                    eprintln!("  Error: {:#}", e);
                }
                record.fail(format!("{:#}", e))
            }
        };
        progress.complete_item(&service, record.status);
        tracker.record(record);
    }

    progress.finish();
    let saved = tracker.save(Path::new("."))?;
    println!("{}", tracker.summary());
    println!("Run record: {}", saved.display());

    if progress.failed() > 0 {
        bail!("{} repository(ies) failed", progress.failed());
    }
    Ok(())
}

async fn process_repo(
    url: &str,
    service: &str,
    mut record: RepoRecord,
    applier: &Applier,
    policy_services: &PolicyServices,
    evidence: &str,
    settings: &Settings,
    config: &Config,
) -> Result<RepoRecord> {
    let workspace = settings
        .workspace_root
        .join(format!("{}-{}", service, short_id(url)));
    record.workspace = Some(workspace.clone());

    println!("Cloning {}", url);
    vcs::clone_repo(url, &workspace)?;

    let report = detector().detect(&workspace);
    if !report.applicable {
        println!("  Not a FastAPI service, skipping");
        return Ok(record.finish(RepoStatus::Skipped));
    }
    record.missing = report.missing_features();
    if !report.has_drift() {
        println!("  Already compliant");
        return Ok(record.finish(RepoStatus::NoDrift));
    }
    for feature in &record.missing {
        println!("  Missing: {}", feature.describe());
    }
    if config.dry_run {
        println!("  [DRY RUN] Would patch, commit and open a pull request");
        return Ok(record.finish(RepoStatus::Skipped));
    }

    let branch = format!("chore/fleet-compliance-{}", unix_nanos());
    vcs::checkout_branch(&workspace, &branch)?;

    let outcome = applier.apply(&workspace, service).await?;
    record.touched = outcome.touched.clone();
    record.origin = outcome.origin;
    println!("  Touched {} file(s)", outcome.touched.len());

    let scan = scan_dependencies(policy_services.scanner.as_ref(), &workspace).await;
    if let Some(report) = &scan {
        record.vulnerabilities = report.findings.len();
        if !report.findings.is_empty() {
            println!("  Vulnerable dependencies: {}", report.findings.len());
        }
    }
    let verdict =
        evaluate_approval(policy_services.approvals.as_ref(), service, &record.touched).await;
    if let Some(v) = &verdict {
        record.required_approvals = v.required_approvals.clone();
        record.risk_level = Some(v.risk_level);
        println!(
            "  Risk: {}, approvals: {}",
            v.risk_level.title(),
            v.required_approvals.join(", ")
        );
    }

    let tests_passed = if settings.run_tests && workspace.join("tests").is_dir() {
        Some(run_tests(&workspace))
    } else {
        None
    };

    if !vcs::commit_all(&workspace, COMMIT_MESSAGE)? {
        println!("  Nothing to commit");
        return Ok(record.finish(RepoStatus::Patched));
    }
    vcs::push_branch(&workspace, &branch)?;

    let body = pr_body::draft(&PrContext {
        service,
        missing: &record.missing,
        touched: &record.touched,
        origin: record.origin,
        evidence,
        tests_passed,
        approval: verdict.as_ref(),
        scan: scan.as_ref(),
    });
    let title = format!("chore({}): enforce logging/tracing/health gates", service);
    let pr_url = vcs::open_pr(
        &workspace,
        &settings.base_branch,
        &branch,
        &title,
        &body,
        &pr_labels(&settings.labels, verdict.as_ref()),
    )?;
    println!("  Pull request: {}", pr_url);
    record.pr_url = Some(pr_url);
    Ok(record.finish(RepoStatus::PrOpened))
}

fn detector() -> DriftDetector {
    DriftDetector::default()
}

fn build_generator(settings: &Settings) -> Result<Generator> {
    let Some(endpoint) = settings.generation.endpoint.as_deref() else {
        info!("no generation endpoint configured; using templates only");
        return Ok(Generator::Offline);
    };
    let client = ChatCompletionsClient::new(
        endpoint,
        settings.generation.model.as_str(),
        settings.api_key(),
        settings.generation_timeout(),
    )
    .context("Failed to build chat completions client")?;
    info!(endpoint, model = client.model(), "using remote generation");
    Ok(Generator::Remote(client))
}

fn build_applier(settings: &Settings) -> Result<Applier> {
    Ok(PatchApplier::new(
        build_generator(settings)?,
        FileKnowledgeBase::new(settings.knowledge_dir.clone()),
        settings.workspace_root.clone(),
    )
    .with_generation_timeout(settings.generation_timeout())
    .with_evidence_limit(settings.evidence_limit)
    .with_lint(settings.lint))
}

fn build_policy_services(settings: &Settings) -> Result<PolicyServices> {
    let timeout = settings.policy_timeout();
    let approvals = settings
        .policy
        .approval_endpoint
        .as_deref()
        .filter(|e| !e.trim().is_empty())
        .map(|e| ApprovalClient::new(e, timeout))
        .transpose()
        .context("Failed to build approval client")?;
    let scanner = settings
        .policy
        .security_endpoint
        .as_deref()
        .filter(|e| !e.trim().is_empty())
        .map(|e| SecurityScanClient::new(e, timeout))
        .transpose()
        .context("Failed to build security scan client")?;
    if approvals.is_none() {
        info!("no approval endpoint configured; approval labels will not be added");
    }
    if scanner.is_none() {
        info!("no security endpoint configured; dependency scan skipped");
    }
    Ok(PolicyServices { approvals, scanner })
}

/// Asks the approval service about a change. Failures are logged and dropped.
async fn evaluate_approval<A: ApprovalService>(
    service: Option<&A>,
    name: &str,
    touched: &[String],
) -> Option<ApprovalVerdict> {
    match service?.evaluate(name, touched).await {
        Ok(verdict) => Some(verdict),
        Err(e) => {
            warn!(service = name, error = %e, "approval evaluation unavailable");
            None
        }
    }
}

/// Scans the repository's `requirements.txt`; a missing file scans as empty.
async fn scan_dependencies<S: VulnerabilityScanner>(
    scanner: Option<&S>,
    repo: &Path,
) -> Option<ScanReport> {
    let scanner = scanner?;
    let requirements = fs::read_to_string(repo.join("requirements.txt")).unwrap_or_default();
    match scanner.scan(&requirements).await {
        Ok(report) => Some(report),
        Err(e) => {
            warn!(error = %e, "dependency scan unavailable");
            None
        }
    }
}

/// Configured labels plus the approval labels, without duplicates.
fn pr_labels(configured: &[String], verdict: Option<&ApprovalVerdict>) -> Vec<String> {
    let mut labels = configured.to_vec();
    for label in verdict.map(ApprovalVerdict::labels).unwrap_or_default() {
        if !labels.contains(&label) {
            labels.push(label);
        }
    }
    labels
}

fn fleet_evidence(settings: &Settings) -> String {
    let kb = FileKnowledgeBase::new(settings.knowledge_dir.clone());
    match kb.search(FLEET_EVIDENCE_QUERY, FLEET_EVIDENCE_LIMIT) {
        Ok(hits) if !hits.is_empty() => format_evidence(&hits),
        Ok(_) => NO_EVIDENCE.to_string(),
        Err(e) => {
            warn!(error = %e, "policy evidence unavailable");
            NO_EVIDENCE.to_string()
        }
    }
}

/// Installs requirements and runs pytest. The result is advisory only.
fn run_tests(repo: &Path) -> bool {
    println!("  Running tests...");
    if repo.join("requirements.txt").exists() {
        let install = Command::new("python")
            .args(["-m", "pip", "install", "-q", "-r", "requirements.txt"])
            .current_dir(repo)
            .output();
        if let Err(e) = install {
            warn!(error = %e, "failed to install requirements");
        }
    }

    match Command::new("python")
        .args(["-m", "pytest", "-q"])
        .current_dir(repo)
        .output()
    {
        Ok(output) if output.status.success() => {
            println!("  ✓ Tests passed");
            true
        }
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let tail: Vec<&str> = stdout.lines().rev().take(5).collect();
            warn!(summary = %tail.into_iter().rev().collect::<Vec<_>>().join(" | "), "tests failed");
            println!("  ✗ Tests failed (continuing)");
            false
        }
        Err(e) => {
            warn!(error = %e, "failed to execute pytest");
            false
        }
    }
}

fn service_from_dir(repo: &Path) -> String {
    repo.canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| "service".to_string())
}

fn unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}

//! Fleet configuration.
//!
//! Settings come from an optional `fleet.yml`, then `FLEETFIX_*`
//! environment variables override individual fields.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "fleet.yml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// Base URL of an OpenAI-compatible API. Unset means templates only.
    pub endpoint: Option<String>,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: "gpt-4o".to_string(),
            api_key_env: "FLEETFIX_API_KEY".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Endpoints of the approval-matrix and vulnerability-scan services.
///
/// Either may be left unset, in which case that step is skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyServiceSettings {
    pub approval_endpoint: Option<String>,
    pub security_endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl Default for PolicyServiceSettings {
    fn default() -> Self {
        Self {
            approval_endpoint: None,
            security_endpoint: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Only repositories below this directory may be patched.
    pub workspace_root: PathBuf,
    pub knowledge_dir: PathBuf,
    pub repos: Vec<String>,
    pub base_branch: String,
    pub labels: Vec<String>,
    pub run_tests: bool,
    pub lint: bool,
    pub evidence_limit: usize,
    pub generation: GenerationSettings,
    pub policy: PolicyServiceSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("workspaces"),
            knowledge_dir: PathBuf::from("knowledge"),
            repos: Vec::new(),
            base_branch: "main".to_string(),
            labels: Vec::new(),
            run_tests: true,
            lint: false,
            evidence_limit: 2,
            generation: GenerationSettings::default(),
            policy: PolicyServiceSettings::default(),
        }
    }
}

impl Settings {
    /// Loads settings from `path`, or from `fleet.yml` if present.
    ///
    /// An explicitly named file must exist; the default one is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies `FLEETFIX_*` overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("FLEETFIX_WORKSPACE") {
            self.workspace_root = PathBuf::from(v);
        }
        if let Some(v) = get("FLEETFIX_KNOWLEDGE_DIR") {
            self.knowledge_dir = PathBuf::from(v);
        }
        if let Some(v) = get("FLEETFIX_ENDPOINT") {
            self.generation.endpoint = Some(v);
        }
        if let Some(v) = get("FLEETFIX_MODEL") {
            self.generation.model = v;
        }
        if let Some(v) = get("FLEETFIX_GENERATION_TIMEOUT_SECS") {
            self.generation.timeout_secs = v
                .trim()
                .parse()
                .with_context(|| format!("FLEETFIX_GENERATION_TIMEOUT_SECS is not a number: {}", v))?;
        }
        if let Some(v) = get("FLEETFIX_APPROVAL_URL") {
            self.policy.approval_endpoint = Some(v);
        }
        if let Some(v) = get("FLEETFIX_SECURITY_URL") {
            self.policy.security_endpoint = Some(v);
        }
        if let Some(v) = get("FLEETFIX_RUN_TESTS") {
            self.run_tests = parse_bool("FLEETFIX_RUN_TESTS", &v)?;
        }
        if let Some(v) = get("FLEETFIX_LINT") {
            self.lint = parse_bool("FLEETFIX_LINT", &v)?;
        }
        Ok(())
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation.timeout_secs)
    }

    pub fn policy_timeout(&self) -> Duration {
        Duration::from_secs(self.policy.timeout_secs)
    }

    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.generation.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{} must be a boolean, got '{}'", key, other),
    }
}

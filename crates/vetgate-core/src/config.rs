use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// User-facing scan configuration, loadable from a TOML file merged with
/// `VETGATE_*` environment overrides. Owned by the orchestrator and passed
/// by shared reference everywhere else.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Expected scanner release; a mismatching preinstalled binary is
    /// logged, not rejected.
    pub version: Option<String>,
    /// Explicit scanner binary path; otherwise `PATH` is searched.
    pub scanner_path: Option<PathBuf>,
    /// Policy filter suite; the embedded default is used when unset.
    pub policy: Option<PathBuf>,
    /// Remote mode: sync scan results to the control plane.
    pub cloud: bool,
    pub api_key: Option<String>,
    pub tenant: Option<String>,
    pub trusted_registries: Vec<String>,
    pub exclude_patterns: Vec<String>,
    /// Additional caller-maintained exceptions file.
    pub exceptions_extra: Option<PathBuf>,
    pub pull_request_comment: bool,
    pub step_summary: bool,
    /// Fall back to the comment relay when the primary comment post fails
    /// (read-only tokens on fork-originated pull requests).
    pub comment_proxy: bool,
    pub relay_url: Option<String>,
    /// Directory the SARIF report is copied into for artifact collection.
    pub artifact_dir: Option<PathBuf>,
    /// Paranoid mode: active malware analysis of changed packages.
    pub malware: bool,
    pub malware_analysis_timeout_secs: u64,
    pub malware_min_confidence: String,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            version: None,
            scanner_path: None,
            policy: None,
            cloud: false,
            api_key: None,
            tenant: None,
            trusted_registries: Vec::new(),
            exclude_patterns: Vec::new(),
            exceptions_extra: None,
            pull_request_comment: true,
            step_summary: true,
            comment_proxy: false,
            relay_url: None,
            artifact_dir: None,
            malware: false,
            malware_analysis_timeout_secs: 300,
            malware_min_confidence: "high".to_string(),
        }
    }
}

/// CI-injected identity and filesystem anchors, read once at startup and
/// validated before the pipeline runs. Replaces ambient environment lookups
/// scattered across components.
#[derive(Debug, Clone)]
pub struct GithubContext {
    pub owner: String,
    pub repo: String,
    pub token: String,
    pub event_name: String,
    pub base_ref: Option<String>,
    pub head_ref: Option<String>,
    pub ref_name: String,
    /// Pull request number, from the event payload.
    pub pr_number: Option<u64>,
    /// Set when the pull request head lives in a fork; compare calls then
    /// use `owner:branch` notation.
    pub head_owner: Option<String>,
    pub run_id: String,
    /// Checkout root of the head working tree.
    pub repo_root: PathBuf,
    pub temp_root: PathBuf,
    pub step_summary: Option<PathBuf>,
    pub api_base: String,
}

impl GithubContext {
    /// Load the context from the process environment, folding in the
    /// webhook event payload when `GITHUB_EVENT_PATH` is present, and
    /// validate required fields for the triggering event.
    pub fn from_env() -> Result<Self> {
        let mut context = Self::from_map(std::env::vars().collect())?;
        if let Some(path) = std::env::var_os("GITHUB_EVENT_PATH").filter(|v| !v.is_empty()) {
            let raw = fs::read_to_string(&path).with_context(|| {
                format!("failed to read event payload at {}", path.to_string_lossy())
            })?;
            let payload: EventPayload = serde_json::from_str(&raw).with_context(|| {
                format!("invalid event payload at {}", path.to_string_lossy())
            })?;
            context.apply_event_payload(&payload);
        }
        context.validate()?;
        Ok(context)
    }

    pub fn from_map(vars: HashMap<String, String>) -> Result<Self> {
        let non_empty =
            |key: &str| vars.get(key).cloned().filter(|value| !value.trim().is_empty());

        let repository = non_empty("GITHUB_REPOSITORY")
            .context("environment variable GITHUB_REPOSITORY must be set (owner/repo)")?;
        let (owner, repo) = repository.split_once('/').with_context(|| {
            format!("GITHUB_REPOSITORY must look like owner/repo (got `{repository}`)")
        })?;
        let event_name = non_empty("GITHUB_EVENT_NAME")
            .context("environment variable GITHUB_EVENT_NAME must be set")?;

        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            token: vars.get("GITHUB_TOKEN").cloned().unwrap_or_default(),
            event_name,
            base_ref: non_empty("GITHUB_BASE_REF"),
            head_ref: non_empty("GITHUB_HEAD_REF"),
            ref_name: non_empty("GITHUB_REF_NAME").unwrap_or_default(),
            pr_number: None,
            head_owner: None,
            run_id: non_empty("GITHUB_RUN_ID").unwrap_or_else(|| "local".to_string()),
            repo_root: non_empty("GITHUB_WORKSPACE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            temp_root: non_empty("RUNNER_TEMP")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            step_summary: non_empty("GITHUB_STEP_SUMMARY").map(PathBuf::from),
            api_base: non_empty("GITHUB_API_URL")
                .unwrap_or_else(|| "https://api.github.com".to_string()),
        })
    }

    /// Fold pull-request identity out of the webhook event payload.
    pub fn apply_event_payload(&mut self, payload: &EventPayload) {
        let Some(pr) = &payload.pull_request else {
            return;
        };
        self.pr_number = Some(pr.number);
        if let Some(head) = &pr.head {
            if self.head_ref.is_none() {
                self.head_ref.clone_from(&head.ref_name);
            }
            if let Some(full_name) = head.repo.as_ref().map(|repo| repo.full_name.as_str()) {
                let fork_owner = full_name.split('/').next().unwrap_or_default();
                if !fork_owner.is_empty() && fork_owner != self.owner {
                    self.head_owner = Some(fork_owner.to_string());
                }
            }
        }
    }

    /// Required fields are checked once here rather than lazily at each
    /// use site.
    pub fn validate(&self) -> Result<()> {
        if self.event_name == "pull_request" {
            if self.pr_number.is_none() {
                anyhow::bail!("pull_request event payload did not carry a pull request number");
            }
            if self.base_ref.is_none() {
                anyhow::bail!("GITHUB_BASE_REF must be set for pull_request events");
            }
        }
        Ok(())
    }

    /// Head side of a compare call; fork-originated pull requests use the
    /// `owner:branch` notation.
    pub fn compare_head(&self) -> String {
        let branch = self.head_ref.as_deref().unwrap_or(&self.ref_name);
        match &self.head_owner {
            Some(owner) => format!("{owner}:{branch}"),
            None => branch.to_string(),
        }
    }

    /// Ref identity reported to the control plane in remote mode.
    pub fn sync_ref(&self) -> &str {
        self.head_ref.as_deref().unwrap_or(&self.ref_name)
    }

    pub fn full_repo(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Minimal slice of the webhook event payload the gate cares about.
#[derive(Debug, Default, Deserialize)]
pub struct EventPayload {
    #[serde(default)]
    pub pull_request: Option<PullRequestPayload>,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestPayload {
    pub number: u64,
    #[serde(default)]
    pub head: Option<HeadPayload>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HeadPayload {
    #[serde(default, rename = "ref")]
    pub ref_name: Option<String>,
    #[serde(default)]
    pub repo: Option<RepoPayload>,
}

#[derive(Debug, Deserialize)]
pub struct RepoPayload {
    pub full_name: String,
}

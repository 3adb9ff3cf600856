//! Engine configuration

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::types::*;

/// How a resume treats a start step that does not directly follow the
/// checkpoint's saved step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumePolicy {
    /// Log a warning and run anyway
    #[default]
    Lenient,
    /// Refuse to re-run steps already reflected in the checkpoint
    Strict,
}

impl FromStr for ResumePolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(ResumePolicy::Lenient),
            "strict" => Ok(ResumePolicy::Strict),
            other => Err(PipelineError::Configuration(format!(
                "unknown resume policy '{}', expected lenient or strict",
                other
            ))),
        }
    }
}

impl fmt::Display for ResumePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResumePolicy::Lenient => "lenient",
            ResumePolicy::Strict => "strict",
        })
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Base directory; checkpoints live in `<checkpoint_root>/checkpoints`
    pub checkpoint_root: PathBuf,

    /// How many checkpoints `cleanup` keeps by default
    pub keep_checkpoints: usize,

    /// Save a checkpoint after each successful step
    pub save_checkpoints: bool,

    pub resume_policy: ResumePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checkpoint_root: PathBuf::from("."),
            keep_checkpoints: 5,
            save_checkpoints: true,
            resume_policy: ResumePolicy::Lenient,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> PipelineResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(PipelineError::Configuration(format!(
            "{} must be a boolean, got '{}'",
            key, other
        ))),
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    ///
    /// `RECON_CHECKPOINT_ROOT`, `RECON_KEEP_CHECKPOINTS`,
    /// `RECON_SAVE_CHECKPOINTS` and `RECON_RESUME_POLICY`; unset variables
    /// keep their defaults.
    pub fn from_env() -> PipelineResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> PipelineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(root) = lookup("RECON_CHECKPOINT_ROOT") {
            config.checkpoint_root = PathBuf::from(root);
        }

        if let Some(keep) = lookup("RECON_KEEP_CHECKPOINTS") {
            config.keep_checkpoints = keep.trim().parse().map_err(|_| {
                PipelineError::Configuration(format!(
                    "RECON_KEEP_CHECKPOINTS must be a non-negative integer, got '{}'",
                    keep
                ))
            })?;
        }

        if let Some(save) = lookup("RECON_SAVE_CHECKPOINTS") {
            config.save_checkpoints = parse_bool("RECON_SAVE_CHECKPOINTS", &save)?;
        }

        if let Some(policy) = lookup("RECON_RESUME_POLICY") {
            config.resume_policy = policy.parse()?;
        }

        Ok(config)
    }

    pub fn with_checkpoint_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.checkpoint_root = root.into();
        self
    }

    pub fn with_resume_policy(mut self, policy: ResumePolicy) -> Self {
        self.resume_policy = policy;
        self
    }
}

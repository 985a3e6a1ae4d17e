//! Engine configuration stored in `interview.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::catalog::TaskCatalog;
use crate::core::selector::SelectionPolicy;
use crate::core::task_board::{DEFAULT_COMPLETION_THRESHOLD, DEFAULT_FIRST_PHASE_TURN_BUDGET};
use crate::io::capability::Role;
use crate::race::{DEFAULT_MAX_ATTEMPTS, DEFAULT_REDUNDANCY, RaceSettings};

pub const DEFAULT_CONFIG_FILE: &str = "interview.toml";

/// Engine configuration (TOML).
///
/// Missing fields take defaults, so an empty file is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub max_turns: u32,

    /// Score at or above which a task counts as done.
    pub completion_threshold: f64,

    /// Turns the triage phase may take before it is passed over.
    pub first_phase_turn_budget: u32,

    pub selection_policy: SelectionPolicy,

    /// Guidance text before any classification exists.
    pub initial_guidance: String,

    /// Optional TOML task catalog replacing the built-in one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<PathBuf>,

    pub race: RaceConfig,
    pub capability: CapabilityConfig,

    /// Per-role overrides keyed by role name (e.g. `[roles.task_scoring]`).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub roles: BTreeMap<String, RoleOverride>,

    pub guidance: GuidanceConfig,
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RaceConfig {
    /// Concurrent requests per race.
    pub redundancy: usize,
    /// Races per structured call before giving up.
    pub max_attempts: u32,
    pub use_cache: bool,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            redundancy: DEFAULT_REDUNDANCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            use_cache: false,
        }
    }
}

impl RaceConfig {
    pub fn settings(&self) -> RaceSettings {
        RaceSettings {
            redundancy: self.redundancy,
            max_attempts: self.max_attempts,
            use_cache: self.use_cache,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CapabilityConfig {
    /// Program plus arguments; receives the prompt on stdin.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Truncate capability stdout beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            command: vec!["llm".to_string()],
            timeout_secs: 300,
            output_limit_bytes: 100_000,
        }
    }
}

/// Role-specific replacements for `[capability]` and `[race]` values.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RoleOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redundancy: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GuidanceConfig {
    /// TOML guidance library; without one every lookup yields no guidance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EventsConfig {
    pub dir: PathBuf,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".interview/events"),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_turns: 30,
            completion_threshold: DEFAULT_COMPLETION_THRESHOLD,
            first_phase_turn_budget: DEFAULT_FIRST_PHASE_TURN_BUDGET,
            selection_policy: SelectionPolicy::default(),
            initial_guidance: String::new(),
            catalog: None,
            race: RaceConfig::default(),
            capability: CapabilityConfig::default(),
            roles: BTreeMap::new(),
            guidance: GuidanceConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

/// Resolved capability settings for one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSettings {
    pub command: Vec<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    pub race: RaceSettings,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_turns == 0 {
            return Err(anyhow!("max_turns must be > 0"));
        }
        if !(self.completion_threshold > 0.0 && self.completion_threshold <= 1.0) {
            return Err(anyhow!("completion_threshold must be in (0, 1]"));
        }
        if self.race.redundancy == 0 {
            return Err(anyhow!("race.redundancy must be > 0"));
        }
        if self.race.max_attempts == 0 {
            return Err(anyhow!("race.max_attempts must be > 0"));
        }
        if self.capability.timeout_secs == 0 {
            return Err(anyhow!("capability.timeout_secs must be > 0"));
        }
        if self.capability.output_limit_bytes == 0 {
            return Err(anyhow!("capability.output_limit_bytes must be > 0"));
        }
        validate_command("capability.command", &self.capability.command)?;
        for (name, role) in &self.roles {
            Role::from_str(name).with_context(|| format!("roles.{name}"))?;
            if let Some(command) = &role.command {
                validate_command(&format!("roles.{name}.command"), command)?;
            }
            if role.timeout_secs == Some(0) {
                return Err(anyhow!("roles.{name}.timeout_secs must be > 0"));
            }
            if role.redundancy == Some(0) {
                return Err(anyhow!("roles.{name}.redundancy must be > 0"));
            }
        }
        Ok(())
    }

    /// Capability and race settings for `role`, with overrides applied.
    pub fn role_settings(&self, role: Role) -> RoleSettings {
        let role_override = self.roles.get(role.as_str());
        let command = role_override
            .and_then(|o| o.command.clone())
            .unwrap_or_else(|| self.capability.command.clone());
        let timeout_secs = role_override
            .and_then(|o| o.timeout_secs)
            .unwrap_or(self.capability.timeout_secs);
        let mut race = self.race.settings();
        if let Some(redundancy) = role_override.and_then(|o| o.redundancy) {
            race.redundancy = redundancy;
        }
        RoleSettings {
            command,
            timeout: Duration::from_secs(timeout_secs),
            output_limit_bytes: self.capability.output_limit_bytes,
            race,
        }
    }

    /// Load the task catalog, resolving a relative path against `base_dir`.
    pub fn load_catalog(&self, base_dir: &Path) -> Result<TaskCatalog> {
        let catalog = match &self.catalog {
            None => TaskCatalog::default(),
            Some(path) => {
                let path = base_dir.join(path);
                let contents = fs::read_to_string(&path)
                    .with_context(|| format!("read catalog {}", path.display()))?;
                toml::from_str(&contents)
                    .with_context(|| format!("parse catalog {}", path.display()))?
            }
        };
        let errors = catalog.validate();
        if !errors.is_empty() {
            return Err(anyhow!("invalid task catalog: {}", errors.join("; ")));
        }
        Ok(catalog)
    }
}

fn validate_command(field: &str, command: &[String]) -> Result<()> {
    match command.first() {
        Some(program) if !program.trim().is_empty() => Ok(()),
        _ => Err(anyhow!("{field} must be a non-empty array")),
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

//! Everything needed to run cases, loaded once from a config file.
//!
//! The CLI and the batch runner share this setup. Each call to
//! [`Engine::run_case`] builds fresh agents, races and workflow state, so
//! concurrent cases never share caches or historical scores.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::agents::Agents;
use crate::core::catalog::TaskCatalog;
use crate::core::selector::SelectionPolicy;
use crate::core::task_board::TaskBoard;
use crate::core::types::{CaseContext, WorkflowState};
use crate::io::capability::Capability;
use crate::io::config::{EngineConfig, load_config};
use crate::io::event_log::{EventRecorder, EventSink, JsonlEventLog};
use crate::io::guidance::{GuidanceLibrary, GuidanceSource, NoGuidance};
use crate::io::prompt::PromptLibrary;
use crate::looping::{FinalReport, RunLoop};
use crate::step::StepPipeline;

/// Command-line overrides applied on top of the config file.
#[derive(Debug, Clone, Copy, Default)]
pub struct Overrides {
    pub max_turns: Option<u32>,
    pub policy: Option<SelectionPolicy>,
}

pub struct Engine {
    cfg: EngineConfig,
    catalog: TaskCatalog,
    guidance: Arc<dyn GuidanceSource>,
    prompts: Arc<PromptLibrary>,
    capability: Option<Arc<dyn Capability>>,
}

impl Engine {
    /// Load config, catalog and guidance. Relative paths in the config are
    /// resolved against the config file's directory.
    pub fn load(config_path: &Path, overrides: Overrides) -> Result<Self> {
        let mut cfg = load_config(config_path)?;
        if let Some(max_turns) = overrides.max_turns {
            if max_turns == 0 {
                bail!("--max-turns must be > 0");
            }
            cfg.max_turns = max_turns;
        }
        if let Some(policy) = overrides.policy {
            cfg.selection_policy = policy;
        }
        let base_dir = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Self::from_config(cfg, base_dir)
    }

    pub fn from_config(cfg: EngineConfig, base_dir: &Path) -> Result<Self> {
        cfg.validate()?;
        let catalog = cfg.load_catalog(base_dir)?;
        let guidance: Arc<dyn GuidanceSource> = match &cfg.guidance.path {
            Some(path) => Arc::new(GuidanceLibrary::load(&base_dir.join(path))?),
            None => Arc::new(NoGuidance),
        };
        let prompts = Arc::new(PromptLibrary::new().context("load prompt templates")?);
        Ok(Self {
            cfg,
            catalog,
            guidance,
            prompts,
            capability: None,
        })
    }

    /// Serve every role from `capability` instead of the configured commands.
    pub fn with_capability(mut self, capability: Arc<dyn Capability>) -> Self {
        self.capability = Some(capability);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn catalog(&self) -> &TaskCatalog {
        &self.catalog
    }

    /// Check that every role can be set up, without running anything.
    pub fn check_roles(&self) -> Result<()> {
        self.agents(EventRecorder::new(Arc::new(
            crate::io::event_log::MemoryEventLog::new(),
        )))?;
        Ok(())
    }

    /// Default event log path for a case run started now.
    pub fn default_events_path(&self, case: &CaseContext) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        self.cfg
            .events
            .dir
            .join(format!("{}-{stamp}.jsonl", sanitize_label(&case.label())))
    }

    /// Run one case to completion, writing its events to `events_path`.
    #[instrument(skip_all, fields(case = %case.label(), events = %events_path.display()))]
    pub async fn run_case(
        &self,
        case: CaseContext,
        events_path: &Path,
        cancel: CancellationToken,
    ) -> Result<FinalReport> {
        let log: Arc<dyn EventSink> = Arc::new(JsonlEventLog::create(events_path)?);
        self.run_case_with_sink(case, log, cancel).await
    }

    pub async fn run_case_with_sink(
        &self,
        case: CaseContext,
        sink: Arc<dyn EventSink>,
        cancel: CancellationToken,
    ) -> Result<FinalReport> {
        let events = EventRecorder::new(sink);
        let agents = self.agents(events.clone())?;
        let pipeline = StepPipeline::new(
            agents,
            self.guidance.clone(),
            events,
            case,
            self.cfg.selection_policy,
        );
        let board = TaskBoard::new(
            &self.catalog,
            self.cfg.completion_threshold,
            self.cfg.first_phase_turn_budget,
        );
        let state = WorkflowState::with_guidance(self.cfg.initial_guidance.clone());
        let report = RunLoop::new(&pipeline, self.cfg.max_turns)
            .with_cancellation(cancel)
            .run(board, state)
            .await;
        info!(
            success = report.success,
            total_turns = report.total_turns,
            "case finished"
        );
        Ok(report)
    }

    fn agents(&self, events: EventRecorder) -> Result<Agents> {
        let agents = match &self.capability {
            Some(capability) => Agents::shared(
                capability.clone(),
                self.cfg.race.settings(),
                self.prompts.clone(),
                events,
            )?,
            None => Agents::from_config(&self.cfg, self.prompts.clone(), events)?,
        };
        Ok(agents)
    }
}

/// File-name-safe form of a case label.
pub fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect();
    if cleaned.is_empty() {
        "case".to_string()
    } else {
        cleaned
    }
}

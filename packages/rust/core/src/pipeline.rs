//! Staged run: `Init → Collect → Convert → Format → Split → Deduplicate → Report → Done`.
//!
//! Every stage receives the same output root, computed once in `Init`.
//! Collectors run one after another, each in its own task so that an error
//! or a panic abandons only that collector. The optional stages are skipped
//! when their flag is off, and a failing external step leaves the pipeline
//! working from the previous content directory.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDate};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use digest_collectors::CollectorRegistry;
use digest_shared::{AppConfig, DigestError, ExternalStepConfig, OutputConfig, Result};

use crate::dedup::dedupe_documents;
use crate::external::{StepOutcome, run_step};
use crate::report::write_report;
use crate::scan::markdown_files;

/// Collector output lands under `<root>/raw/<collector>/`.
const RAW_DIR: &str = "raw";

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Init,
    Collect,
    Convert,
    Format,
    Split,
    Deduplicate,
    Report,
    Done,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Collect => "collect",
            Self::Convert => "convert",
            Self::Format => "format",
            Self::Split => "split",
            Self::Deduplicate => "deduplicate",
            Self::Report => "report",
            Self::Done => "done",
        }
    }

    /// Output directory name for external stages.
    fn output_dir_name(self) -> Option<&'static str> {
        match self {
            Self::Convert => Some("converted"),
            Self::Format => Some("formatted"),
            Self::Split => Some("split"),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Run record
// ---------------------------------------------------------------------------

/// Everything one invocation produced. Dropped after the report is written.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub output_root: PathBuf,
    /// Directory the later stages read; advances after successful steps.
    pub content_dir: PathBuf,
    /// Documents emitted per collector that completed.
    pub counts: BTreeMap<String, usize>,
    /// `(collector, error)` for each collector that errored or panicked.
    pub failures: Vec<(String, String)>,
    pub duplicates_removed: usize,
    /// Outcome of each external step that ran.
    pub steps: Vec<(Stage, StepOutcome)>,
    /// Stages entered, in order. Skipped stages are absent.
    pub stages: Vec<Stage>,
    pub report_path: Option<PathBuf>,
    pub elapsed: Duration,
    /// Documents under the output root before this run started. Dedup and
    /// the report's file counts never touch them.
    pub preexisting: BTreeSet<PathBuf>,
}

impl PipelineRun {
    pub fn new(run_id: Uuid, output_root: PathBuf) -> Self {
        Self {
            run_id,
            content_dir: output_root.join(RAW_DIR),
            output_root,
            counts: BTreeMap::new(),
            failures: Vec::new(),
            duplicates_removed: 0,
            steps: Vec::new(),
            stages: Vec::new(),
            report_path: None,
            elapsed: Duration::ZERO,
            preexisting: BTreeSet::new(),
        }
    }

    pub fn total_emitted(&self) -> usize {
        self.counts.values().sum()
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a stage.
    fn stage(&self, stage: Stage);
    /// Called before a collector runs.
    fn collector_started(&self, name: &str, current: usize, total: usize);
    /// Called after a collector returns; `None` when it failed.
    fn collector_finished(&self, name: &str, emitted: Option<usize>);
    /// Called when the pipeline completes.
    fn done(&self, run: &PipelineRun);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage(&self, _stage: Stage) {}
    fn collector_started(&self, _name: &str, _current: usize, _total: usize) {}
    fn collector_finished(&self, _name: &str, _emitted: Option<usize>) {}
    fn done(&self, _run: &PipelineRun) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// `<base_dir>/<YYYY-MM-DD>` with date folders on, else `<base_dir>`.
pub fn resolve_output_root(output: &OutputConfig, date: NaiveDate) -> PathBuf {
    let base = PathBuf::from(&output.base_dir);
    if output.use_date_folders {
        base.join(date.format("%Y-%m-%d").to_string())
    } else {
        base
    }
}

/// The orchestrator: a config plus the collectors available to it.
pub struct Pipeline {
    config: AppConfig,
    registry: CollectorRegistry,
}

impl Pipeline {
    pub fn new(config: AppConfig, registry: CollectorRegistry) -> Self {
        Self { config, registry }
    }

    pub fn registry(&self) -> &CollectorRegistry {
        &self.registry
    }

    /// Run every stage, dating the output folder with today's local date.
    pub async fn run(&self, progress: &dyn ProgressReporter) -> Result<PipelineRun> {
        self.run_for_date(Local::now().date_naive(), progress).await
    }

    /// Run every stage with an explicit date for the output folder.
    ///
    /// Only a failure to create the output root is returned as an error;
    /// everything later is logged and recorded in the [`PipelineRun`].
    #[instrument(skip_all, fields(%date))]
    pub async fn run_for_date(
        &self,
        date: NaiveDate,
        progress: &dyn ProgressReporter,
    ) -> Result<PipelineRun> {
        let start = Instant::now();

        // --- Init ---
        progress.stage(Stage::Init);
        let output_root = resolve_output_root(&self.config.output, date);
        std::fs::create_dir_all(&output_root).map_err(|e| DigestError::io(&output_root, e))?;
        let mut run = PipelineRun::new(Uuid::now_v7(), output_root);
        run.preexisting = markdown_files(&run.output_root).into_iter().collect();
        run.stages.push(Stage::Init);
        info!(
            run_id = %run.run_id,
            output = %run.output_root.display(),
            earlier_documents = run.preexisting.len(),
            "starting digest run"
        );

        // --- Collect ---
        progress.stage(Stage::Collect);
        run.stages.push(Stage::Collect);
        self.collect(&mut run, progress).await;

        // --- External steps ---
        let processing = &self.config.processing;
        let step_timeout = Duration::from_secs(processing.step_timeout_secs);
        for (stage, step) in [
            (Stage::Convert, &processing.convert),
            (Stage::Format, &processing.format),
            (Stage::Split, &processing.split),
        ] {
            if !step.enabled {
                debug!(stage = %stage, "stage disabled, skipping");
                continue;
            }
            progress.stage(stage);
            run.stages.push(stage);
            self.external_stage(&mut run, stage, step, step_timeout).await;
        }

        // --- Deduplicate ---
        if processing.deduplicate {
            progress.stage(Stage::Deduplicate);
            run.stages.push(Stage::Deduplicate);
            let outcome = dedupe_documents(&run.content_dir, &run.preexisting);
            run.duplicates_removed = outcome.removed.len();
        }

        // --- Report ---
        progress.stage(Stage::Report);
        run.stages.push(Stage::Report);
        let source_keys: Vec<String> = self
            .registry
            .iter()
            .map(|(_, c)| c.source_key().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        match write_report(&run, &source_keys) {
            Ok(path) => run.report_path = Some(path),
            Err(e) => error!(error = %e, "failed to write report"),
        }

        // --- Done ---
        progress.stage(Stage::Done);
        run.stages.push(Stage::Done);
        run.elapsed = start.elapsed();
        progress.done(&run);

        info!(
            run_id = %run.run_id,
            emitted = run.total_emitted(),
            failed_collectors = run.failures.len(),
            duplicates_removed = run.duplicates_removed,
            elapsed_ms = run.elapsed.as_millis(),
            "digest run complete"
        );
        Ok(run)
    }

    /// Run each enabled collector in isolation.
    async fn collect(&self, run: &mut PipelineRun, progress: &dyn ProgressReporter) {
        for name in self.config.collectors.keys() {
            if self.registry.get(name).is_none() {
                warn!(collector = %name, "config section has no matching collector");
            }
        }

        let enabled: Vec<_> = self
            .registry
            .iter()
            .filter_map(|(name, collector)| match self.config.collector_config(name) {
                Some(cfg) if cfg.enabled => Some((name.to_string(), Arc::clone(collector), cfg)),
                _ => {
                    debug!(collector = name, "collector disabled, skipping");
                    None
                }
            })
            .collect();

        let raw_dir = run.output_root.join(RAW_DIR);
        let total = enabled.len();

        for (index, (name, collector, cfg)) in enabled.into_iter().enumerate() {
            progress.collector_started(&name, index + 1, total);
            info!(collector = %name, "running collector");

            let dir = raw_dir.clone();
            let handle = tokio::spawn(async move { collector.run(&cfg, &dir).await });

            match handle.await {
                Ok(Ok(outcome)) => {
                    info!(
                        collector = %name,
                        emitted = outcome.emitted,
                        skipped = outcome.skipped,
                        failed = outcome.failed,
                        "collector finished"
                    );
                    progress.collector_finished(&name, Some(outcome.emitted));
                    run.counts.insert(name, outcome.emitted);
                }
                Ok(Err(e)) => {
                    error!(collector = %name, error = %e, "collector failed");
                    progress.collector_finished(&name, None);
                    run.failures.push((name, e.to_string()));
                }
                Err(join) => {
                    let message = if join.is_panic() {
                        DigestError::collector(&name, "task panicked").to_string()
                    } else {
                        DigestError::collector(&name, format!("task aborted: {join}")).to_string()
                    };
                    error!(collector = %name, error = %message, "collector failed");
                    progress.collector_finished(&name, None);
                    run.failures.push((name, message));
                }
            }
        }
    }

    /// Run one external step and advance the content directory on success.
    async fn external_stage(
        &self,
        run: &mut PipelineRun,
        stage: Stage,
        step: &ExternalStepConfig,
        timeout: Duration,
    ) {
        let Some(dir_name) = stage.output_dir_name() else {
            return;
        };
        let output = run.output_root.join(dir_name);
        let outcome = run_step(step, &run.content_dir, &output, timeout).await;

        if outcome.success && output.is_dir() {
            debug!(stage = %stage, dir = %output.display(), "content directory advanced");
            run.content_dir = output;
        } else if outcome.success {
            warn!(stage = %stage, "step produced no output directory, keeping previous content");
        } else {
            warn!(stage = %stage, "step failed, continuing with previous content");
        }
        run.steps.push((stage, outcome));
    }
}

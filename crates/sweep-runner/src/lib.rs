//! Two-phase generate/submit orchestration over the `sweep-core` engine:
//! pulls config layers, composes each job's effective config, renders
//! scheduler scripts into a run directory, and later dispatches them
//! through the scheduler boundary while recording per-job outcomes.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use sweep_core::{
    compose, expand, grid_fingerprint, job_name, layers_fingerprint, run_name, ConfigValue,
    EffectiveConfig, GridSpec, LayerKind, LayerStore, PARAMS_SECTION,
};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod dispatch;
pub mod remote;

pub use dispatch::{DispatchError, Sbatch, SchedulerDispatch};
pub use remote::RemoteHost;

pub const MANIFEST_FILE: &str = "run_manifest.json";
pub const SCRIPT_EXTENSION: &str = "slurm";
const DEFAULT_TEMPLATE: &str = "slurm.template";

#[derive(Debug, Error)]
pub enum RunError {
    #[error("partial_generation_failure: run '{run_name}' wrote {written} of {expected} scripts before job '{job}' failed to render")]
    PartialGeneration {
        run_name: String,
        written: usize,
        expected: usize,
        job: String,
        #[source]
        source: sweep_core::Error,
    },

    #[error("cardinality_mismatch: grid '{grid}' expands to {current} jobs but the run was generated with {recorded}")]
    CardinalityMismatch {
        grid: String,
        recorded: usize,
        current: usize,
    },

    #[error("grid_drift: grid '{grid}' changed since generation; regenerate before submitting")]
    GridDrift { grid: String },

    #[error("run_not_generated: '{run_name}' has no manifest at {path}")]
    NotGenerated { run_name: String, path: PathBuf },

    #[error("operation_in_progress: run '{run_name}' is already being generated or submitted")]
    OperationInProgress { run_name: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct RunManifest {
    schema_version: String,
    run_name: String,
    cluster: String,
    project: String,
    experiment: String,
    grid: String,
    job_count: usize,
    grid_fingerprint: String,
    layers_fingerprint: String,
    generated_at: String,
}

#[derive(Debug)]
pub struct GenerateResult {
    pub run_name: String,
    pub run_dir: PathBuf,
    pub jobs: Vec<(String, PathBuf)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    Pending,
    Submitted,
    Failed,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::Failed => "failed",
        }
    }
}

#[derive(Debug)]
pub struct SubmissionRecord {
    pub job: String,
    pub status: SubmissionStatus,
    pub job_id: Option<String>,
    pub diagnostic: Option<String>,
}

#[derive(Debug)]
pub struct SubmitResult {
    pub run_name: String,
    pub records: Vec<SubmissionRecord>,
}

impl SubmitResult {
    pub fn fully_submitted(&self) -> bool {
        self.records
            .iter()
            .all(|r| r.status == SubmissionStatus::Submitted)
    }

    pub fn failed_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == SubmissionStatus::Failed)
            .count()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RunState {
    Undefined,
    Generated { job_count: usize },
}

/// Expansion summary for a run that has not necessarily been generated.
#[derive(Debug)]
pub struct RunPlan {
    pub run_name: String,
    pub axes: Vec<(String, usize)>,
    pub job_count: usize,
}

/// Orchestrates composer, grid expander, identity and renderer over
/// explicit roots. Nothing here consults the environment; the caller
/// decides where configs, templates and runs live.
pub struct RunManager {
    store: LayerStore,
    template_root: PathBuf,
    runs_root: PathBuf,
}

// Held for the duration of a generate or submit; a second operation on the
// same run name fails instead of interleaving.
struct RunLock {
    path: PathBuf,
}

impl RunLock {
    fn acquire(runs_root: &Path, run_name: &str) -> Result<Self> {
        fs::create_dir_all(runs_root)?;
        let path = runs_root.join(format!(".{}.lock", run_name));
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "{{\"pid\":{}}}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(RunError::OperationInProgress {
                    run_name: run_name.to_string(),
                }
                .into())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

impl RunManager {
    pub fn new(
        config_root: impl Into<PathBuf>,
        template_root: impl Into<PathBuf>,
        runs_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store: LayerStore::new(config_root),
            template_root: template_root.into(),
            runs_root: runs_root.into(),
        }
    }

    pub fn run_dir(&self, experiment: &str, grid: &str) -> PathBuf {
        self.runs_root.join(run_name(experiment, grid))
    }

    /// Expands the grid without touching the filesystem beyond config
    /// reads.
    pub fn plan(&self, experiment: &str, grid: &str) -> Result<RunPlan> {
        let grid_spec = self.store.load_grid(grid)?;
        let job_count = grid_spec.cardinality()?;
        Ok(RunPlan {
            run_name: run_name(experiment, grid),
            axes: grid_spec
                .axes
                .iter()
                .map(|a| (a.name.clone(), a.values.len()))
                .collect(),
            job_count,
        })
    }

    pub fn run_state(&self, experiment: &str, grid: &str) -> Result<RunState> {
        let manifest_path = self.run_dir(experiment, grid).join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Ok(RunState::Undefined);
        }
        let manifest = read_manifest(&manifest_path)?;
        Ok(RunState::Generated {
            job_count: manifest.job_count,
        })
    }

    pub fn remote_host(&self, cluster: &str) -> Result<Option<RemoteHost>> {
        let layer = self.store.load(LayerKind::Cluster, cluster)?;
        RemoteHost::from_layer(&layer)
    }

    /// Writes one rendered script per grid point into a fresh run
    /// directory. Input errors abort before anything is written; a render
    /// failure surfaces exactly how far generation got and leaves no
    /// manifest, so a truncated directory never looks complete.
    pub fn generate(
        &self,
        cluster: &str,
        project: &str,
        experiment: &str,
        grid: &str,
    ) -> Result<GenerateResult> {
        let run_name = run_name(experiment, grid);
        let _lock = RunLock::acquire(&self.runs_root, &run_name)?;

        let layers = [
            self.store.load(LayerKind::Cluster, cluster)?,
            self.store.load(LayerKind::Project, project)?,
            self.store.load(LayerKind::Experiment, experiment)?,
        ];
        let grid_spec = self.store.load_grid(grid)?;
        let base = compose(&layers)?;
        let points = expand(&grid_spec)?;
        let template = self.load_template(&base)?;

        // Every effective config is built up front so merge conflicts
        // abort with nothing on disk.
        let mut jobs_to_render = Vec::with_capacity(points.len());
        for (index, point) in points.iter().enumerate() {
            let mut cfg = base.clone();
            cfg.apply_overrides(point)?;
            let command = build_command(&cfg)?;
            cfg.set("run", "command", ConfigValue::String(command));
            cfg.set(
                "run",
                "job_name",
                ConfigValue::String(format!("{}-{}", run_name, index)),
            );
            jobs_to_render.push((job_name(index), cfg));
        }

        let run_dir = self.runs_root.join(&run_name);
        if run_dir.exists() {
            fs::remove_dir_all(&run_dir)
                .with_context(|| format!("failed to clear previous run at {}", run_dir.display()))?;
        }
        fs::create_dir_all(&run_dir)?;

        let expected = jobs_to_render.len();
        let mut jobs = Vec::with_capacity(expected);
        for (written, (job, cfg)) in jobs_to_render.iter().enumerate() {
            let text = match sweep_core::render(cfg, &template) {
                Ok(text) => text,
                Err(source) => {
                    return Err(RunError::PartialGeneration {
                        run_name,
                        written,
                        expected,
                        job: job.clone(),
                        source,
                    }
                    .into())
                }
            };
            let path = run_dir.join(format!("{}.{}", job, SCRIPT_EXTENSION));
            atomic_write_bytes(&path, text.as_bytes())?;
            debug!(job = %job, path = %path.display(), "wrote script");
            jobs.push((job.clone(), path));
        }

        // The manifest lands last; its presence marks a complete run.
        let manifest = RunManifest {
            schema_version: "run_manifest_v1".to_string(),
            run_name: run_name.clone(),
            cluster: cluster.to_string(),
            project: project.to_string(),
            experiment: experiment.to_string(),
            grid: grid.to_string(),
            job_count: expected,
            grid_fingerprint: grid_fingerprint(&grid_spec),
            layers_fingerprint: layers_fingerprint(&layers),
            generated_at: Utc::now().to_rfc3339(),
        };
        atomic_write_bytes(
            &run_dir.join(MANIFEST_FILE),
            &serde_json::to_vec_pretty(&manifest)?,
        )?;

        info!(run = %run_name, jobs = expected, "generated run");
        Ok(GenerateResult {
            run_name,
            run_dir,
            jobs,
        })
    }

    /// Dispatches every script of a generated run in job order. Each job is
    /// attempted independently; failures are collected, never retried, and
    /// never abort the rest of the batch.
    pub fn submit(
        &self,
        experiment: &str,
        grid: &str,
        dispatcher: &dyn SchedulerDispatch,
    ) -> Result<SubmitResult> {
        let run_name = run_name(experiment, grid);
        let _lock = RunLock::acquire(&self.runs_root, &run_name)?;

        let run_dir = self.runs_root.join(&run_name);
        let manifest_path = run_dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(RunError::NotGenerated {
                run_name,
                path: manifest_path,
            }
            .into());
        }
        let manifest = read_manifest(&manifest_path)?;

        // Refuse to submit scripts whose grid has drifted: job indices
        // would silently refer to different override sets.
        let grid_spec = self.store.load_grid(grid)?;
        self.check_grid_unchanged(&manifest, &grid_spec, grid)?;

        // Every job starts as a pending record; each is resolved to
        // submitted or failed independently, in job order.
        let mut records: Vec<SubmissionRecord> = (0..manifest.job_count)
            .map(|index| SubmissionRecord {
                job: job_name(index),
                status: SubmissionStatus::Pending,
                job_id: None,
                diagnostic: None,
            })
            .collect();
        for record in &mut records {
            let script = run_dir.join(format!("{}.{}", record.job, SCRIPT_EXTENSION));
            if !script.exists() {
                warn!(job = %record.job, "script missing from run directory");
                record.status = SubmissionStatus::Failed;
                record.diagnostic = Some(format!("script missing: {}", script.display()));
                continue;
            }
            match dispatcher.dispatch(&script) {
                Ok(id) => {
                    debug!(job = %record.job, id = %id, "submitted");
                    record.status = SubmissionStatus::Submitted;
                    record.job_id = Some(id);
                }
                Err(err) => {
                    warn!(job = %record.job, "dispatch failed: {}", err.diagnostic);
                    record.status = SubmissionStatus::Failed;
                    record.diagnostic = Some(err.diagnostic);
                }
            }
        }

        let result = SubmitResult { run_name, records };
        info!(
            run = %result.run_name,
            submitted = result.records.len() - result.failed_count(),
            failed = result.failed_count(),
            "submit complete"
        );
        Ok(result)
    }

    /// Generate immediately followed by submit, for quick iteration; the
    /// run directory is not treated as an inspection artifact.
    pub fn generate_and_submit(
        &self,
        cluster: &str,
        project: &str,
        experiment: &str,
        grid: &str,
        dispatcher: &dyn SchedulerDispatch,
    ) -> Result<(GenerateResult, SubmitResult)> {
        let generated = self.generate(cluster, project, experiment, grid)?;
        let submitted = self.submit(experiment, grid, dispatcher)?;
        Ok((generated, submitted))
    }

    fn check_grid_unchanged(
        &self,
        manifest: &RunManifest,
        grid_spec: &GridSpec,
        grid: &str,
    ) -> Result<()> {
        let current = grid_spec.cardinality()?;
        if current != manifest.job_count {
            return Err(RunError::CardinalityMismatch {
                grid: grid.to_string(),
                recorded: manifest.job_count,
                current,
            }
            .into());
        }
        if grid_fingerprint(grid_spec) != manifest.grid_fingerprint {
            return Err(RunError::GridDrift {
                grid: grid.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn load_template(&self, base: &EffectiveConfig) -> Result<String> {
        let name = match base.get("slurm", "template") {
            Some(ConfigValue::String(s)) => s.clone(),
            Some(other) => bail!(
                "slurm.template must name a template file, found {}",
                other.kind_name()
            ),
            None => DEFAULT_TEMPLATE.to_string(),
        };
        let path = self.template_root.join(&name);
        fs::read_to_string(&path)
            .with_context(|| format!("template_not_found: {}", path.display()))
    }
}

/// Assembles the training command: `run.script` plus one CLI flag per key
/// in the `params` section. Booleans become bare flags when true and are
/// dropped when false; lists join with commas.
fn build_command(cfg: &EffectiveConfig) -> Result<String> {
    let script = match cfg.get("run", "script") {
        Some(ConfigValue::String(s)) => s.clone(),
        Some(other) => bail!("run.script must be a string, found {}", other.kind_name()),
        None => bail!("run.script is missing from the effective config"),
    };
    let mut parts = vec![script];
    if let Some(params) = cfg.section(PARAMS_SECTION) {
        for (key, value) in params {
            match value {
                ConfigValue::Bool(true) => parts.push(format!("--{}", key)),
                ConfigValue::Bool(false) => {}
                ConfigValue::List(items) => {
                    let joined: Vec<String> =
                        items.iter().filter_map(|i| i.as_text()).collect();
                    parts.push(format!("--{} {}", key, joined.join(",")));
                }
                scalar => parts.push(format!(
                    "--{} {}",
                    key,
                    scalar.as_text().expect("scalar has text form")
                )),
            }
        }
    }
    Ok(parts.join(" "))
}

fn read_manifest(path: &Path) -> Result<RunManifest> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("unreadable run manifest at {}", path.display()))
}

fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(
        ".{}.tmp.{}.{}",
        name,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use sweep_runner::{GenerateResult, RunManager, Sbatch, SubmitResult, MANIFEST_FILE};

#[derive(Parser)]
#[command(name = "sweep", version, about = "Layered-config SLURM batch job generator")]
struct Cli {
    /// Root of the slurm_runs tree (configs, templates and run directories).
    #[arg(long, global = true, default_value = "slurm_runs")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render one script per grid point into the run directory.
    Generate {
        #[arg(long)]
        cluster: String,
        #[arg(long)]
        project: String,
        #[arg(long)]
        experiment: String,
        #[arg(long)]
        grid: String,
        /// Mirror the generated run directory to the cluster's remote
        /// workspace afterwards.
        #[arg(long)]
        mirror: bool,
        #[arg(long)]
        json: bool,
    },
    /// Dispatch a previously generated run through sbatch.
    Submit {
        #[arg(long)]
        experiment: String,
        #[arg(long)]
        grid: String,
        #[arg(long)]
        json: bool,
    },
    /// Generate then submit in one step; for quick iteration.
    GenerateSubmit {
        #[arg(long)]
        cluster: String,
        #[arg(long)]
        project: String,
        #[arg(long)]
        experiment: String,
        #[arg(long)]
        grid: String,
        #[arg(long)]
        json: bool,
    },
    /// Show the expansion a grid would produce, without writing anything.
    Describe {
        #[arg(long)]
        experiment: String,
        #[arg(long)]
        grid: String,
        #[arg(long)]
        json: bool,
    },
    /// Scaffold the config tree with commented sample documents.
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Remove generated run directories.
    Clean {
        #[arg(long)]
        runs: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    match run_command(&cli.root, cli.command) {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", format!("{:#}", err)));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn manager(root: &Path) -> RunManager {
    // Run directories are siblings of the config kind directories, per the
    // slurm_runs/<run-name>/job_<index>.slurm layout.
    RunManager::new(root, root.join("templates"), root)
}

fn run_command(root: &Path, command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Generate {
            cluster,
            project,
            experiment,
            grid,
            mirror,
            json,
        } => {
            let manager = manager(root);
            let result = manager.generate(&cluster, &project, &experiment, &grid)?;
            let mut mirrored = false;
            if mirror {
                match manager.remote_host(&cluster)? {
                    Some(host) => {
                        host.mirror(&result.run_dir)?;
                        mirrored = true;
                    }
                    None => {
                        tracing::warn!(
                            cluster = %cluster,
                            "no remote section declared; skipping mirror"
                        );
                    }
                }
            }
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "generate",
                    "run": generate_result_to_json(&result),
                    "mirrored": mirrored,
                })));
            }
            print_generate(&result);
        }
        Commands::Submit {
            experiment,
            grid,
            json,
        } => {
            let result = manager(root).submit(&experiment, &grid, &Sbatch::new())?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "submit",
                    "submit": submit_result_to_json(&result),
                })));
            }
            print_submit(&result);
        }
        Commands::GenerateSubmit {
            cluster,
            project,
            experiment,
            grid,
            json,
        } => {
            let (generated, submitted) = manager(root).generate_and_submit(
                &cluster,
                &project,
                &experiment,
                &grid,
                &Sbatch::new(),
            )?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "generate-submit",
                    "run": generate_result_to_json(&generated),
                    "submit": submit_result_to_json(&submitted),
                })));
            }
            print_generate(&generated);
            print_submit(&submitted);
        }
        Commands::Describe {
            experiment,
            grid,
            json,
        } => {
            let plan = manager(root).plan(&experiment, &grid)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "run_name": plan.run_name,
                    "axes": plan.axes.iter().map(|(name, n)| json!({
                        "axis": name,
                        "candidates": n,
                    })).collect::<Vec<_>>(),
                    "job_count": plan.job_count,
                })));
            }
            println!("run_name: {}", plan.run_name);
            for (axis, candidates) in &plan.axes {
                println!("axis {}: {} candidates", axis, candidates);
            }
            println!("job_count: {}", plan.job_count);
        }
        Commands::Init { force } => init_tree(root, force)?,
        Commands::Clean { runs } => {
            if runs {
                clean_runs(root)?;
            }
        }
    }
    Ok(None)
}

fn print_generate(result: &GenerateResult) {
    println!("run_name: {}", result.run_name);
    println!("run_dir: {}", result.run_dir.display());
    for (job, path) in &result.jobs {
        println!("{}: {}", job, path.display());
    }
}

fn print_submit(result: &SubmitResult) {
    println!("run_name: {}", result.run_name);
    for record in &result.records {
        match (&record.job_id, &record.diagnostic) {
            (Some(id), _) => println!("{}: {} ({})", record.job, record.status.as_str(), id),
            (None, Some(diag)) => {
                println!("{}: {} ({})", record.job, record.status.as_str(), diag)
            }
            (None, None) => println!("{}: {}", record.job, record.status.as_str()),
        }
    }
    println!(
        "submitted: {} failed: {}",
        result.records.len() - result.failed_count(),
        result.failed_count()
    );
}

fn generate_result_to_json(result: &GenerateResult) -> Value {
    json!({
        "run_name": result.run_name,
        "run_dir": result.run_dir.display().to_string(),
        "jobs": result.jobs.iter().map(|(job, path)| json!({
            "job": job,
            "script": path.display().to_string(),
        })).collect::<Vec<_>>(),
    })
}

fn submit_result_to_json(result: &SubmitResult) -> Value {
    json!({
        "run_name": result.run_name,
        "records": result.records.iter().map(|r| json!({
            "job": r.job,
            "status": r.status.as_str(),
            "job_id": r.job_id,
            "diagnostic": r.diagnostic,
        })).collect::<Vec<_>>(),
    })
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\"}}}}"
        ),
    }
}

fn json_error(code: &str, message: String) -> Value {
    json!({
        "ok": false,
        "error": { "code": code, "message": message }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Generate { json, .. }
        | Commands::Submit { json, .. }
        | Commands::GenerateSubmit { json, .. }
        | Commands::Describe { json, .. } => *json,
        _ => false,
    }
}

const SAMPLE_CLUSTER: &str = "\
slurm:
  account: change-me
  partition: debug
  time: \"00:10:00\"
  cpus: 1
  memory: 4G
# Uncomment to mirror runs to a login node:
# remote:
#   host: login.hpc.example.edu
#   user: you
#   port: 22
";

const SAMPLE_PROJECT: &str = "\
run:
  modules: [cuda/12.2]
";

const SAMPLE_EXPERIMENT: &str = "\
run:
  script: python main.py
";

const SAMPLE_GRID: &str = "\
lr: [0.1, 0.01]
seed: [1, 2]
";

const SAMPLE_TEMPLATE: &str = "\
#!/bin/bash
#SBATCH --job-name={{ run.job_name }}
#SBATCH --account={{ slurm.account }}
#SBATCH --partition={{ slurm.partition }}
#SBATCH --time={{ slurm.time }}
#SBATCH --cpus-per-task={{ slurm.cpus }}
#SBATCH --mem={{ slurm.memory }}
#SBATCH --output=slurm_logs/%x.out
#SBATCH --error=slurm_logs/%x.err

set -euo pipefail

module purge
module load {{ run.modules | csv }}

echo \"Running: {{ run.command }}\"
{{ run.command }}
";

fn init_tree(root: &Path, force: bool) -> Result<()> {
    let files: [(&str, &str); 5] = [
        ("clusters/my-cluster.yaml", SAMPLE_CLUSTER),
        ("projects/default.yaml", SAMPLE_PROJECT),
        ("experiments/example.yaml", SAMPLE_EXPERIMENT),
        ("grids/lr_sweep.yaml", SAMPLE_GRID),
        ("templates/slurm.template", SAMPLE_TEMPLATE),
    ];
    for (rel, _) in &files {
        let path = root.join(rel);
        if !force && path.exists() {
            anyhow::bail!("init file already exists (use --force): {}", path.display());
        }
    }
    for (rel, body) in &files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, body)?;
        println!("wrote: {}", path.display());
    }
    println!("next: edit {}/clusters/my-cluster.yaml", root.display());
    println!(
        "next: sweep describe --experiment example --grid lr_sweep --root {}",
        root.display()
    );
    Ok(())
}

// Run directories are the entries under the root that carry a manifest;
// config kind directories never do.
fn clean_runs(root: &Path) -> Result<()> {
    if !root.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() && path.join(MANIFEST_FILE).exists() {
            fs::remove_dir_all(&path)?;
            println!("removed: {}", path.display());
        }
    }
    Ok(())
}

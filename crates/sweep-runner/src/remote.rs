use anyhow::{anyhow, bail, Result};
use std::path::Path;
use std::process::Command;
use sweep_core::{ConfigLayer, ConfigValue};
use tracing::info;

const DEFAULT_WORKSPACE: &str = "~/sweep-workspace";

/// Remote endpoint a cluster layer may declare in its `remote` section.
/// The engine itself has no remote-awareness; this only mirrors a local
/// directory and runs commands there, so the same generate/submit can be
/// invoked on the far side.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteHost {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub workspace_dir: String,
}

impl RemoteHost {
    /// `None` when the layer declares no `remote` section.
    pub fn from_layer(layer: &ConfigLayer) -> Result<Option<Self>> {
        let Some(section) = layer.sections.get("remote") else {
            return Ok(None);
        };
        let string_key = |key: &str| -> Result<String> {
            match section.get(key) {
                Some(ConfigValue::String(s)) => Ok(s.clone()),
                Some(other) => bail!(
                    "remote.{} in cluster '{}' must be a string, found {}",
                    key,
                    layer.name,
                    other.kind_name()
                ),
                None => bail!("remote section in cluster '{}' is missing '{}'", layer.name, key),
            }
        };
        let port = match section.get("port") {
            Some(ConfigValue::Int(p)) if (1..=65535).contains(p) => *p as u16,
            Some(other) => bail!(
                "remote.port in cluster '{}' must be a port number, found {:?}",
                layer.name,
                other
            ),
            None => 22,
        };
        let workspace_dir = match section.get("workspace_dir") {
            Some(ConfigValue::String(s)) => s.clone(),
            Some(other) => bail!(
                "remote.workspace_dir in cluster '{}' must be a string, found {}",
                layer.name,
                other.kind_name()
            ),
            None => DEFAULT_WORKSPACE.to_string(),
        };
        Ok(Some(Self {
            host: string_key("host")?,
            user: string_key("user")?,
            port,
            workspace_dir,
        }))
    }

    pub fn ssh_args(&self, command: &str) -> Vec<String> {
        vec![
            "-A".to_string(),
            format!("{}@{}", self.user, self.host),
            "-p".to_string(),
            self.port.to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            command.to_string(),
        ]
    }

    pub fn rsync_args(&self, local_dir: &Path) -> Result<Vec<String>> {
        let Some(dir_name) = local_dir.file_name().map(|n| n.to_string_lossy().into_owned())
        else {
            bail!(
                "cannot mirror {}: path has no directory name",
                local_dir.display()
            );
        };
        Ok(vec![
            "-az".to_string(),
            "-e".to_string(),
            format!("ssh -p {} -o StrictHostKeyChecking=no", self.port),
            format!("{}/", local_dir.display()),
            format!(
                "{}@{}:{}/{}/",
                self.user, self.host, self.workspace_dir, dir_name
            ),
        ])
    }

    /// Makes the local directory's contents available under the remote
    /// workspace, creating the destination first.
    pub fn mirror(&self, local_dir: &Path) -> Result<()> {
        if !local_dir.is_dir() {
            bail!("nothing to mirror: {} is not a directory", local_dir.display());
        }
        let args = self.rsync_args(local_dir)?;
        self.run_remote(&format!("mkdir -p {}", self.workspace_dir))?;
        info!(host = %self.host, dir = %local_dir.display(), "mirroring to remote");
        run_checked("rsync", &args)
    }

    pub fn run_remote(&self, command: &str) -> Result<()> {
        run_checked("ssh", &self.ssh_args(command))
    }
}

fn run_checked(program: &str, args: &[String]) -> Result<()> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| anyhow!("failed to spawn {}: {}", program, e))?;
    if !output.status.success() {
        bail!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

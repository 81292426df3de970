use std::path::Path;
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("dispatch_failure: {diagnostic}")]
pub struct DispatchError {
    pub diagnostic: String,
}

/// Boundary to the actual scheduler. Given a script path, returns the
/// scheduler's opaque submission identifier or a diagnostic. The engine
/// never interprets scheduler output beyond this.
pub trait SchedulerDispatch {
    fn dispatch(&self, script: &Path) -> Result<String, DispatchError>;
}

/// Shells out to `sbatch <script>` and captures the submission id from
/// stdout.
pub struct Sbatch {
    binary: String,
}

impl Sbatch {
    pub fn new() -> Self {
        Self {
            binary: "sbatch".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for Sbatch {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerDispatch for Sbatch {
    fn dispatch(&self, script: &Path) -> Result<String, DispatchError> {
        let output = Command::new(&self.binary)
            .arg(script)
            .output()
            .map_err(|e| DispatchError {
                diagnostic: format!("failed to spawn {}: {}", self.binary, e),
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DispatchError {
                diagnostic: format!(
                    "{} exited with {}: {}",
                    self.binary,
                    output.status,
                    stderr.trim()
                ),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_submission_id(&stdout).ok_or_else(|| DispatchError {
            diagnostic: format!("{} produced no submission id", self.binary),
        })
    }
}

/// `sbatch` prints `Submitted batch job <id>`; take the trailing token of
/// the first non-empty line, or the whole trimmed line for other dialects.
pub(crate) fn parse_submission_id(stdout: &str) -> Option<String> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    if let Some(rest) = line.strip_prefix("Submitted batch job ") {
        let id = rest.split_whitespace().next()?;
        return Some(id.to_string());
    }
    Some(line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sbatch_banner() {
        assert_eq!(
            parse_submission_id("Submitted batch job 42137\n").as_deref(),
            Some("42137")
        );
    }

    #[test]
    fn skips_leading_blank_lines() {
        assert_eq!(
            parse_submission_id("\n\nSubmitted batch job 7 on cluster alpine\n").as_deref(),
            Some("7")
        );
    }

    #[test]
    fn unknown_dialect_falls_back_to_trimmed_line() {
        assert_eq!(parse_submission_id("  9981  \n").as_deref(), Some("9981"));
    }

    #[test]
    fn empty_output_yields_none() {
        assert_eq!(parse_submission_id("  \n \n"), None);
    }
}

//! External processing steps (format conversion, note formatting, splitting).
//!
//! A step is an opaque command taking an input and an output directory. The
//! runner never returns an error: spawn failures, non-zero exits, and
//! timeouts all come back as a failed [`StepOutcome`].

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use digest_shared::{DigestError, ExternalStepConfig};

/// What one external step did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
}

impl StepOutcome {
    fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            ..Self::default()
        }
    }
}

/// Replace `{input}` and `{output}` in every argument.
pub fn substitute_args(args: &[String], input: &Path, output: &Path) -> Vec<String> {
    let input = input.display().to_string();
    let output = output.display().to_string();
    args.iter()
        .map(|arg| arg.replace("{input}", &input).replace("{output}", &output))
        .collect()
}

/// Run `step` over `input`, writing to `output`, killed after `timeout`.
#[instrument(skip_all, fields(command = %step.command))]
pub async fn run_step(
    step: &ExternalStepConfig,
    input: &Path,
    output: &Path,
    timeout: Duration,
) -> StepOutcome {
    if step.command.trim().is_empty() {
        warn!("step enabled without a command");
        return StepOutcome::failed("no command configured");
    }

    let args = substitute_args(&step.args, input, output);
    debug!(?args, "spawning external step");

    let child = Command::new(&step.command)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, child).await {
        Ok(Ok(out)) => {
            let outcome = StepOutcome {
                success: out.status.success(),
                exit_code: out.status.code(),
                timed_out: false,
                stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            };
            if outcome.success {
                info!("external step finished");
            } else {
                warn!(
                    exit_code = ?outcome.exit_code,
                    stderr = %outcome.stderr.trim(),
                    "external step failed"
                );
            }
            outcome
        }
        Ok(Err(e)) => {
            let err = DigestError::External(format!("failed to start {}: {e}", step.command));
            warn!(error = %err, "external step did not run");
            StepOutcome::failed(err.to_string())
        }
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs(), "external step timed out, killed");
            StepOutcome {
                timed_out: true,
                ..StepOutcome::failed(format!("timed out after {}s", timeout.as_secs()))
            }
        }
    }
}

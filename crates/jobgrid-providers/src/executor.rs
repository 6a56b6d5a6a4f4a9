//! Job executors.
//!
//! An executor runs one execution to completion and reports its exit code
//! and captured output. A non-zero exit is still `Ok`; judging the result
//! is the verifier's job. `Err` means the run itself could not happen or
//! was cancelled.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use jobgrid_core::{JobSpec, RunOutput};

use crate::error::{ProviderError, ProviderResult};
use crate::storage::PreparedStorage;

/// Largest stdout/stderr kept in [`RunOutput`]; the full streams go to files.
const MAX_CAPTURE_BYTES: usize = 64 * 1024;

#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `job`, writing results into `output_dir`.
    ///
    /// `cancel` flips to `true` when the execution should stop.
    async fn run(
        &self,
        job: &JobSpec,
        execution_id: &str,
        inputs: &[PreparedStorage],
        output_dir: &Path,
        cancel: watch::Receiver<bool>,
    ) -> ProviderResult<RunOutput>;
}

/// Resolves once `cancel` reads `true`. Never resolves if the sender is gone.
async fn cancelled(mut cancel: watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

// ── Noop executor ──────────────────────────────────────────────────

/// Decides the outcome of a [`NoopExecutor`] run.
pub type RunHook = Arc<dyn Fn(&JobSpec) -> ProviderResult<RunOutput> + Send + Sync>;

/// Test double: optionally waits, then returns what the hook says
/// (exit code 0 by default).
#[derive(Clone, Default)]
pub struct NoopExecutor {
    delay: Duration,
    hook: Option<RunHook>,
}

impl NoopExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_hook(mut self, hook: RunHook) -> Self {
        self.hook = Some(hook);
        self
    }
}

#[async_trait]
impl Executor for NoopExecutor {
    async fn run(
        &self,
        job: &JobSpec,
        execution_id: &str,
        _inputs: &[PreparedStorage],
        output_dir: &Path,
        cancel: watch::Receiver<bool>,
    ) -> ProviderResult<RunOutput> {
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => {}
            _ = cancelled(cancel) => {
                debug!(%execution_id, "noop run cancelled");
                return Err(ProviderError::Cancelled);
            }
        }

        match &self.hook {
            Some(hook) => hook(job),
            None => Ok(RunOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                output_dir: output_dir.display().to_string(),
                usage: None,
            }),
        }
    }
}

// ── Process executor ───────────────────────────────────────────────

/// Runs the job entrypoint as a child process.
///
/// Inputs are exposed through environment variables: `JOBGRID_INPUT_<n>`
/// holds the local path of the n-th input and `JOBGRID_INPUT_<n>_TARGET`
/// the path the job declared for it. `JOBGRID_OUTPUT_DIR` points at the
/// output directory, which is also the working directory. stdout, stderr
/// and the exit code are written there as files.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

fn truncate_utf8(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= MAX_CAPTURE_BYTES {
        return text.into_owned();
    }
    let mut end = MAX_CAPTURE_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn run(
        &self,
        job: &JobSpec,
        execution_id: &str,
        inputs: &[PreparedStorage],
        output_dir: &Path,
        cancel: watch::Receiver<bool>,
    ) -> ProviderResult<RunOutput> {
        let (program, args) = job
            .entrypoint
            .split_first()
            .ok_or_else(|| ProviderError::Execution("job has an empty entrypoint".to_string()))?;

        tokio::fs::create_dir_all(output_dir).await?;

        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .envs(&job.env)
            .env("JOBGRID_JOB_ID", &job.id)
            .env("JOBGRID_EXECUTION_ID", execution_id)
            .env("JOBGRID_OUTPUT_DIR", output_dir)
            .current_dir(output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (i, input) in inputs.iter().enumerate() {
            command.env(format!("JOBGRID_INPUT_{i}"), &input.local_path);
            command.env(format!("JOBGRID_INPUT_{i}_TARGET"), &input.spec.path);
        }

        let child = command
            .spawn()
            .map_err(|e| ProviderError::Execution(format!("failed to start {program}: {e}")))?;
        info!(%execution_id, %program, "process started");

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            out = child.wait_with_output() => out?,
            _ = cancelled(cancel) => {
                warn!(%execution_id, "process killed on cancel");
                return Err(ProviderError::Cancelled);
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        tokio::fs::write(output_dir.join("stdout"), &output.stdout).await?;
        tokio::fs::write(output_dir.join("stderr"), &output.stderr).await?;
        tokio::fs::write(output_dir.join("exitCode"), exit_code.to_string()).await?;
        debug!(%execution_id, exit_code, "process exited");

        Ok(RunOutput {
            exit_code,
            stdout: truncate_utf8(&output.stdout),
            stderr: truncate_utf8(&output.stderr),
            output_dir: output_dir.display().to_string(),
            usage: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobgrid_core::{PublisherType, StorageSpec};
    use std::path::PathBuf;

    fn shell_job(script: &str) -> JobSpec {
        let mut job = JobSpec::new(&["sh", "-c", script], PublisherType::Noop);
        job.id = "job-1".to_string();
        job
    }

    #[tokio::test]
    async fn noop_defaults_to_success() {
        let (_tx, rx) = watch::channel(false);
        let out = NoopExecutor::new()
            .run(&shell_job("true"), "exec-1", &[], Path::new("/tmp/out"), rx)
            .await
            .unwrap();
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.output_dir, "/tmp/out");
    }

    #[tokio::test]
    async fn noop_hook_decides_outcome() {
        let hook: RunHook = Arc::new(|_job| Err(ProviderError::Execution("boom".to_string())));
        let (_tx, rx) = watch::channel(false);
        let err = NoopExecutor::new()
            .with_hook(hook)
            .run(&shell_job("true"), "exec-1", &[], Path::new("/tmp"), rx)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Execution(m) if m == "boom"));
    }

    #[tokio::test]
    async fn noop_honours_cancel() {
        let (tx, rx) = watch::channel(false);
        let executor = NoopExecutor::new().with_delay(Duration::from_secs(30));
        let job = shell_job("true");
        let run = tokio::spawn(async move {
            executor
                .run(&job, "exec-1", &[], Path::new("/tmp"), rx)
                .await
        });
        tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ProviderError::Cancelled)));
    }

    #[tokio::test]
    async fn process_captures_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let input = PreparedStorage {
            spec: StorageSpec::inline("x", "/inputs/data"),
            local_path: PathBuf::from("/var/tmp/data"),
        };
        let mut job = shell_job("echo \"$GREETING $JOBGRID_INPUT_0 $JOBGRID_INPUT_0_TARGET\"; echo err >&2; exit 3");
        job.env.insert("GREETING".to_string(), "hi".to_string());

        let (_tx, rx) = watch::channel(false);
        let out = ProcessExecutor::new()
            .run(&job, "exec-1", &[input], dir.path(), rx)
            .await
            .unwrap();

        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout, "hi /var/tmp/data /inputs/data\n");
        assert_eq!(out.stderr, "err\n");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("exitCode")).unwrap(),
            "3"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("stdout")).unwrap(),
            out.stdout
        );
    }

    #[tokio::test]
    async fn process_killed_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = watch::channel(false);
        let job = shell_job("sleep 30");
        let out_dir = dir.path().to_path_buf();
        let run = tokio::spawn(async move {
            ProcessExecutor::new()
                .run(&job, "exec-1", &[], &out_dir, rx)
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ProviderError::Cancelled)));
    }

    #[tokio::test]
    async fn empty_entrypoint_is_an_error() {
        let mut job = shell_job("true");
        job.entrypoint.clear();
        let (_tx, rx) = watch::channel(false);
        let err = ProcessExecutor::new()
            .run(&job, "exec-1", &[], Path::new("/tmp"), rx)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Execution(_)));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = "é".repeat(MAX_CAPTURE_BYTES);
        let cut = truncate_utf8(long.as_bytes());
        assert!(cut.len() <= MAX_CAPTURE_BYTES);
        assert!(cut.chars().all(|c| c == 'é'));
    }
}

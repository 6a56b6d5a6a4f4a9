//! Result verification on the requester side.

use async_trait::async_trait;

use jobgrid_core::{JobSpec, RunOutput};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Failed(String),
}

#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, job: &JobSpec, execution_id: &str, output: &RunOutput) -> Verdict;
}

/// Accepts every result.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopVerifier;

#[async_trait]
impl Verifier for NoopVerifier {
    async fn verify(&self, _job: &JobSpec, _execution_id: &str, _output: &RunOutput) -> Verdict {
        Verdict::Passed
    }
}

/// Rejects results with a non-zero exit code.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitCodeVerifier;

#[async_trait]
impl Verifier for ExitCodeVerifier {
    async fn verify(&self, _job: &JobSpec, _execution_id: &str, output: &RunOutput) -> Verdict {
        if output.exit_code == 0 {
            Verdict::Passed
        } else {
            Verdict::Failed(format!("exit code {}", output.exit_code))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobgrid_core::PublisherType;

    fn output(exit_code: i32) -> RunOutput {
        RunOutput {
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
            output_dir: "/tmp".to_string(),
            usage: None,
        }
    }

    #[tokio::test]
    async fn exit_code_verifier() {
        let job = JobSpec::new(&["true"], PublisherType::Noop);
        assert_eq!(
            ExitCodeVerifier.verify(&job, "e", &output(0)).await,
            Verdict::Passed
        );
        assert_eq!(
            ExitCodeVerifier.verify(&job, "e", &output(2)).await,
            Verdict::Failed("exit code 2".to_string())
        );
        assert_eq!(NoopVerifier.verify(&job, "e", &output(2)).await, Verdict::Passed);
    }
}

//! Running scripts inside containers.

use std::time::Duration;

use kiln_core::{ExecRequest, ExecResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::ClusterClientFactory;
use crate::error::{Stage, StageError};
use crate::gateway::{ClusterGateway, ExecStream};
use crate::types::OrchestratorConfig;
use crate::{OrchestratorError, Result};

enum Outcome {
    Completed(Result<bool>),
    TimedOut,
    Cancelled,
}

async fn drive(
    stream: &mut dyn ExecStream,
    script: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Outcome {
    let run = async {
        stream.submit(script).await?;
        stream.wait_for_completion().await
    };

    tokio::select! {
        () = cancel.cancelled() => Outcome::Cancelled,
        result = tokio::time::timeout(timeout, run) => match result {
            Ok(completed) => Outcome::Completed(completed),
            Err(_) => Outcome::TimedOut,
        },
    }
}

/// Run `lines` in a shell inside a container, bounded by `timeout`.
///
/// The exec stream is closed before returning on every path.
///
/// # Errors
///
/// Returns `Interrupted` if `cancel` fires. Failing to open the stream is
/// reported as an [`ExecResult`] failure, not an error.
pub async fn execute_command(
    gateway: &dyn ClusterGateway,
    pod_name: &str,
    container_name: &str,
    namespace: &str,
    lines: &[String],
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ExecResult> {
    let mut stream = match gateway.open_exec(pod_name, container_name, namespace).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(pod_name, container_name, error = %e, "Failed to open exec stream");
            return Ok(ExecResult::failure(format!("[exec] {}: {e}", e.category())));
        }
    };

    let mut script = lines.join("\n");
    script.push('\n');

    let outcome = drive(stream.as_mut(), &script, timeout, cancel).await;
    stream.close().await;

    match outcome {
        Outcome::Completed(Ok(true)) => {
            info!(pod_name, container_name, "Command completed");
            Ok(ExecResult::success())
        }
        Outcome::Completed(Ok(false)) => {
            info!(pod_name, container_name, "Command exited with failure");
            Ok(ExecResult::failure(format!(
                "command in {pod_name}/{container_name} exited unsuccessfully"
            )))
        }
        Outcome::Completed(Err(e)) => {
            warn!(pod_name, container_name, error = %e, "Exec stream failed");
            Ok(ExecResult::failure(format!("[exec] {}: {e}", e.category())))
        }
        Outcome::TimedOut => {
            warn!(pod_name, container_name, ?timeout, "Command timed out");
            Ok(ExecResult::timeout(format!(
                "command in {pod_name}/{container_name} did not finish within {}s",
                timeout.as_secs()
            )))
        }
        Outcome::Cancelled => Err(OrchestratorError::Interrupted(format!(
            "exec in {pod_name}/{container_name} cancelled"
        ))),
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Wrap script lines in strict mode with output captured to files.
#[must_use]
pub fn wrap_script(lines: &[String], stdout_path: &str, stderr_path: &str) -> Vec<String> {
    let mut wrapped = Vec::with_capacity(lines.len() + 4);
    wrapped.push("set -e".to_string());
    wrapped.push("(".to_string());
    wrapped.extend(lines.iter().cloned());
    wrapped.push(format!(
        ") > {} 2> {}",
        shell_quote(stdout_path),
        shell_quote(stderr_path)
    ));
    wrapped
}

/// Runs exec requests against a gateway.
pub struct CommandExecutor {
    config: OrchestratorConfig,
    cancel: CancellationToken,
}

impl CommandExecutor {
    /// Create an executor.
    #[must_use]
    pub fn new(config: OrchestratorConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    fn output_paths(&self, request: &ExecRequest) -> (String, String) {
        let dir = self.config.output_dir.trim_end_matches('/');
        let stdout = request
            .stdout_path
            .clone()
            .unwrap_or_else(|| format!("{dir}/{}-{}.out", request.pod_name, request.container_name));
        let stderr = request
            .stderr_path
            .clone()
            .unwrap_or_else(|| format!("{dir}/{}-{}.err", request.pod_name, request.container_name));
        (stdout, stderr)
    }

    /// Resolve the request's cluster and run its script there.
    ///
    /// A resolution failure is an [`ExecResult`] failure tagged `[client-resolution]`.
    ///
    /// # Errors
    ///
    /// Returns `Interrupted` if the executor was cancelled.
    pub async fn resolve_and_run(
        &self,
        factory: &dyn ClusterClientFactory,
        request: &ExecRequest,
    ) -> Result<ExecResult> {
        match factory.resolve(&request.connector, &request.auth).await {
            Ok(gateway) => self.run(gateway.as_ref(), request).await,
            Err(e) => {
                warn!(pod_name = %request.pod_name, error = %e, "Failed to resolve cluster client");
                Ok(ExecResult::failure(
                    StageError::new(Stage::ClientResolution, e).to_string(),
                ))
            }
        }
    }

    /// Run a request's script.
    ///
    /// # Errors
    ///
    /// Returns `Interrupted` if the executor was cancelled.
    pub async fn run(&self, gateway: &dyn ClusterGateway, request: &ExecRequest) -> Result<ExecResult> {
        let (stdout, stderr) = self.output_paths(request);
        let mut lines = vec![format!(
            "mkdir -p \"$(dirname {})\" \"$(dirname {})\"",
            shell_quote(&stdout),
            shell_quote(&stderr)
        )];
        lines.extend(wrap_script(&request.script, &stdout, &stderr));

        debug!(
            pod_name = %request.pod_name,
            container_name = %request.container_name,
            stdout = %stdout,
            stderr = %stderr,
            "Running script"
        );

        execute_command(
            gateway,
            &request.pod_name,
            &request.container_name,
            &request.namespace,
            &lines,
            self.config.exec_timeout(request.timeout_secs),
            &self.cancel,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ExecBehavior, MockFactory, MockGateway};
    use kiln_core::{ClusterConnector, ExecStatus};

    fn lines(script: &[&str]) -> Vec<String> {
        script.iter().map(ToString::to_string).collect()
    }

    async fn run_with(behavior: ExecBehavior) -> (MockGateway, ExecResult) {
        let gateway = MockGateway::new();
        gateway.set_exec_behavior(behavior);
        let result = execute_command(
            &gateway,
            "build-1",
            "step-1",
            "ci",
            &lines(&["echo hi"]),
            Duration::from_secs(10),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        (gateway, result)
    }

    #[tokio::test(start_paused = true)]
    async fn three_distinct_outcomes_and_stream_always_closed() {
        let (gateway, result) = run_with(ExecBehavior::Success).await;
        assert_eq!(result.status, ExecStatus::Success);
        assert_eq!(gateway.exec_closes(), 1);

        let (gateway, result) = run_with(ExecBehavior::Failure).await;
        assert_eq!(result.status, ExecStatus::Failure);
        assert_eq!(gateway.exec_closes(), 1);

        let (gateway, result) = run_with(ExecBehavior::Hang).await;
        assert_eq!(result.status, ExecStatus::Timeout);
        assert_eq!(gateway.exec_closes(), 1);
    }

    #[tokio::test]
    async fn stream_error_is_failure() {
        let (gateway, result) = run_with(ExecBehavior::StreamError).await;
        assert_eq!(result.status, ExecStatus::Failure);
        assert!(result.message.unwrap().contains("ExecError"));
        assert_eq!(gateway.exec_closes(), 1);
    }

    #[tokio::test]
    async fn open_failure_is_reported_without_a_session() {
        let (gateway, result) = run_with(ExecBehavior::OpenError).await;
        assert_eq!(result.status, ExecStatus::Failure);
        let message = result.message.unwrap();
        assert!(message.starts_with("[exec] ExecError"), "{message}");
        assert!(message.contains("step-1"));
        assert_eq!(gateway.exec_closes(), 0);
        assert!(gateway.submitted_scripts().is_empty());
    }

    #[tokio::test]
    async fn submitted_script_is_joined() {
        let (gateway, _) = run_with(ExecBehavior::Success).await;
        assert_eq!(gateway.submitted_scripts(), vec!["echo hi\n".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_closes_stream_and_interrupts() {
        let gateway = MockGateway::new();
        gateway.set_exec_behavior(ExecBehavior::Hang);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = execute_command(
            &gateway,
            "build-1",
            "step-1",
            "ci",
            &lines(&["sleep 100"]),
            Duration::from_secs(60),
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, OrchestratorError::Interrupted(_)));
        assert_eq!(gateway.exec_closes(), 1);
    }

    #[test]
    fn wrapping_quotes_paths() {
        let wrapped = wrap_script(&lines(&["make test"]), "/tmp/it's.out", "/tmp/err");
        assert_eq!(wrapped[0], "set -e");
        assert_eq!(wrapped[1], "(");
        assert_eq!(wrapped[2], "make test");
        assert_eq!(wrapped[3], r") > '/tmp/it'\''s.out' 2> '/tmp/err'");
    }

    #[tokio::test]
    async fn executor_uses_default_output_paths() {
        let gateway = MockGateway::new();
        gateway.set_exec_behavior(ExecBehavior::Success);
        let executor = CommandExecutor::new(OrchestratorConfig::default(), CancellationToken::new());

        let request = ExecRequest {
            connector: ClusterConnector::in_cluster(),
            auth: kiln_core::AuthContext::default(),
            pod_name: "build-1".into(),
            container_name: "step-1".into(),
            namespace: "ci".into(),
            script: lines(&["go test ./..."]),
            timeout_secs: 0,
            stdout_path: None,
            stderr_path: None,
        };
        let result = executor.run(&gateway, &request).await.unwrap();
        assert_eq!(result.status, ExecStatus::Success);

        let script = &gateway.submitted_scripts()[0];
        assert!(script.contains("set -e\n(\ngo test ./...\n)"));
        assert!(script.contains("> '/tmp/kiln/build-1-step-1.out' 2> '/tmp/kiln/build-1-step-1.err'"));
    }

    #[tokio::test]
    async fn resolution_failure_is_an_exec_failure() {
        let executor = CommandExecutor::new(OrchestratorConfig::default(), CancellationToken::new());
        let factory = MockFactory::failing("no route to host");
        let request = ExecRequest {
            connector: ClusterConnector::in_cluster(),
            auth: kiln_core::AuthContext::default(),
            pod_name: "build-1".into(),
            container_name: "step-1".into(),
            namespace: "ci".into(),
            script: lines(&["true"]),
            timeout_secs: 0,
            stdout_path: None,
            stderr_path: None,
        };

        let result = executor.resolve_and_run(&factory, &request).await.unwrap();

        assert_eq!(result.status, ExecStatus::Failure);
        let message = result.message.unwrap();
        assert!(message.starts_with("[client-resolution] ResolutionError"), "{message}");
        assert_eq!(factory.resolves(), 1);
    }
}

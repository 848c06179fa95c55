//! [`ModelToolkit`] backed by the embedded Python helper.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::environment::ConverterEnvironment;
use super::protocol::{request_line, HelperResponse};
use super::{
    DeviceCapabilities, LoadModelRequest, ModelToolkit, SavedArtifacts, ToolkitError,
    ToolkitErrorKind, ToolkitFactory, ToolkitResult,
};
use crate::job::{DeviceMap, Reporter};
use crate::{ConverterError, Result};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
/// How long shutdown waits for the rest of the helper's stderr.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// A running helper process.
///
/// The child is spawned with `kill_on_drop`, so dropping the toolkit (for
/// example when the job's task is aborted) kills the helper. Its stderr
/// carries the model library's own output and is relayed line by line.
pub struct PythonToolkit {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr_task: Option<JoinHandle<()>>,
    next_id: u64,
}

impl PythonToolkit {
    /// Start `script` under `python`, forwarding its stderr to `output`.
    pub fn spawn(python: &Path, script: &Path, output: Option<Reporter>) -> Result<Self> {
        let mut child = Command::new(python)
            .arg(script)
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ConverterError::WorkerSpawn {
                message: format!("Failed to start {}: {e}", python.display()),
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(ConverterError::WorkerSpawn {
                message: "Helper process has no stdio pipes".to_string(),
            });
        };

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "bnb4::helper", "{}", line);
                    if let (Some(reporter), Some(text)) = (&output, library_output(&line)) {
                        reporter.relay(text);
                    }
                }
            })
        });

        info!(
            "Started model helper (pid {:?}) with {}",
            child.id(),
            python.display()
        );

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            stderr_task,
            next_id: 0,
        })
    }

    /// Send one request and wait for its response.
    async fn call(&mut self, op: &str, args: Value) -> ToolkitResult<Value> {
        self.next_id += 1;
        let id = self.next_id;
        let line = request_line(id, op, args)?;

        let unavailable =
            |e: std::io::Error| ToolkitError::new(op, ToolkitErrorKind::Unavailable, e.to_string());
        self.stdin.write_all(line.as_bytes()).await.map_err(unavailable)?;
        self.stdin.flush().await.map_err(unavailable)?;

        loop {
            match self.stdout.next_line().await {
                Ok(Some(line)) => match HelperResponse::parse(&line) {
                    Some(response) if response.id == Some(id) => return response.into_result(op),
                    Some(response) => {
                        debug!("Ignoring stale helper response {:?}", response.id)
                    }
                    None => debug!(target: "bnb4::helper", "{}", line),
                },
                Ok(None) => {
                    return Err(ToolkitError::new(
                        op,
                        ToolkitErrorKind::Unavailable,
                        "Helper process exited unexpectedly",
                    ))
                }
                Err(e) => return Err(unavailable(e)),
            }
        }
    }
}

impl Drop for PythonToolkit {
    fn drop(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

/// Visible text of a stderr line. Progress bars redraw with `\r`, so only
/// the last non-empty segment is kept.
fn library_output(line: &str) -> Option<&str> {
    line.rsplit('\r')
        .map(str::trim)
        .find(|segment| !segment.is_empty())
}

fn decode<T: serde::de::DeserializeOwned>(op: &str, value: Value) -> ToolkitResult<T> {
    serde_json::from_value(value).map_err(|e| {
        ToolkitError::new(
            op,
            ToolkitErrorKind::Failed,
            format!("unexpected helper response: {e}"),
        )
    })
}

#[async_trait]
impl ModelToolkit for PythonToolkit {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn capabilities(&mut self) -> ToolkitResult<DeviceCapabilities> {
        let value = self.call("capabilities", Value::Null).await?;
        decode("capabilities", value)
    }

    async fn load_model(&mut self, request: &LoadModelRequest) -> ToolkitResult<()> {
        let args = serde_json::to_value(request).map_err(|e| {
            ToolkitError::new("load_model", ToolkitErrorKind::Failed, e.to_string())
        })?;
        let value = self.call("load_model", args).await?;
        if let Some(class) = value.get("class").and_then(Value::as_str) {
            debug!("Loaded {} as {}", request.source, class);
        }
        Ok(())
    }

    async fn load_tokenizer(&mut self, source: &str, max_length: u32) -> ToolkitResult<()> {
        self.call(
            "load_tokenizer",
            json!({ "source": source, "max_length": max_length }),
        )
        .await
        .map(|_| ())
    }

    async fn load_image_processor(&mut self, source: &str) -> ToolkitResult<()> {
        self.call("load_image_processor", json!({ "source": source }))
            .await
            .map(|_| ())
    }

    async fn release_memory(&mut self, device_map: DeviceMap) -> ToolkitResult<()> {
        self.call("release_memory", json!({ "device_map": device_map }))
            .await
            .map(|_| ())
    }

    async fn save(&mut self, dir: &Path, safe_serialization: bool) -> ToolkitResult<SavedArtifacts> {
        let value = self
            .call(
                "save",
                json!({
                    "dir": dir.to_string_lossy(),
                    "safe_serialization": safe_serialization,
                }),
            )
            .await?;
        decode("save", value)
    }

    async fn shutdown(&mut self) {
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.call("shutdown", Value::Null)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!("Helper shutdown request failed: {}", e),
            Err(_) => warn!("Helper did not acknowledge shutdown"),
        }

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => debug!("Helper exited with {}", status),
            Ok(Err(e)) => warn!("Failed to wait for helper: {}", e),
            Err(_) => {
                warn!("Helper still running after shutdown, killing it");
                if let Err(e) = self.child.kill().await {
                    warn!("Failed to kill helper: {}", e);
                }
            }
        }

        if let Some(mut task) = self.stderr_task.take() {
            if tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut task).await.is_err() {
                task.abort();
            }
        }
    }
}

/// Spawns a [`PythonToolkit`] per job from a [`ConverterEnvironment`].
#[derive(Debug, Clone)]
pub struct PythonToolkitFactory {
    environment: ConverterEnvironment,
}

impl PythonToolkitFactory {
    pub fn new(environment: ConverterEnvironment) -> Self {
        Self { environment }
    }

    pub fn environment(&self) -> &ConverterEnvironment {
        &self.environment
    }
}

#[async_trait]
impl ToolkitFactory for PythonToolkitFactory {
    async fn spawn(&self, reporter: &Reporter) -> Result<Box<dyn ModelToolkit>> {
        if !self.environment.is_ready() {
            return Err(ConverterError::EnvironmentNotReady {
                message: format!(
                    "no interpreter at {}. Run setup first",
                    self.environment.venv_python().display()
                ),
            });
        }

        // Redeploy in case the embedded script changed since setup.
        self.environment.deploy_scripts()?;

        let toolkit = PythonToolkit::spawn(
            &self.environment.interpreter(),
            &self.environment.helper_script(),
            Some(reporter.clone()),
        )?;
        Ok(Box::new(toolkit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_output_keeps_last_redraw() {
        assert_eq!(library_output("Fetching 4 files"), Some("Fetching 4 files"));
        assert_eq!(
            library_output("shards:  50%|#####     |\rshards: 100%|##########|\r"),
            Some("shards: 100%|##########|")
        );
        assert_eq!(library_output("  \r "), None);
        assert_eq!(library_output(""), None);
    }

    #[cfg(unix)]
    mod helper_process {
        use super::*;
        use crate::cancel::CancellationToken;
        use crate::job::WorkerMessage;
        use tempfile::TempDir;

        const TIMEOUT: Duration = Duration::from_secs(10);

        /// Start a shell script standing in for the Python helper.
        fn start(body: &str, output: Option<Reporter>) -> (TempDir, PythonToolkit) {
            let dir = TempDir::new().unwrap();
            let script = dir.path().join("helper.sh");
            std::fs::write(&script, body).unwrap();
            let toolkit = PythonToolkit::spawn(Path::new("sh"), &script, output).unwrap();
            (dir, toolkit)
        }

        #[tokio::test]
        async fn test_responses_are_matched_by_id() {
            let (_dir, mut toolkit) = start(
                r#"read line
echo 'Python banner'
echo '{"id": 99, "ok": true, "result": null}'
echo '{"id": 1, "ok": true, "result": {"cuda_available": false, "bf16_supported": false}}'
read line
echo '{"id": 2, "ok": false, "error": {"kind": "not_found", "message": "no preprocessor_config.json"}}'
read line
echo '{"id": 3, "ok": true, "result": null}'
"#,
                None,
            );
            assert!(toolkit.pid().is_some());

            let capabilities = tokio::time::timeout(TIMEOUT, toolkit.capabilities())
                .await
                .unwrap()
                .unwrap();
            assert!(!capabilities.cuda_available);
            assert_eq!(capabilities.gpu_name, None);

            let err = tokio::time::timeout(TIMEOUT, toolkit.load_image_processor("org/text-only"))
                .await
                .unwrap()
                .unwrap_err();
            assert!(err.is_not_found());
            assert_eq!(err.operation, "load_image_processor");

            tokio::time::timeout(TIMEOUT, toolkit.shutdown()).await.unwrap();
            assert!(toolkit.child.try_wait().unwrap().is_some());
        }

        #[tokio::test]
        async fn test_exited_helper_is_unavailable() {
            let (_dir, mut toolkit) = start("read line\nexit 0\n", None);

            let err = tokio::time::timeout(TIMEOUT, toolkit.capabilities())
                .await
                .unwrap()
                .unwrap_err();
            assert_eq!(err.kind, ToolkitErrorKind::Unavailable);
            assert_eq!(err.operation, "capabilities");
        }

        #[tokio::test]
        async fn test_terminated_helper_fails_pending_call() {
            let (_dir, mut toolkit) = start("read line\nexec sleep 30\n", None);
            let pid = toolkit.pid().unwrap();

            let terminate = async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                crate::platform::request_termination(pid).unwrap();
            };
            let (result, ()) = tokio::time::timeout(
                TIMEOUT,
                async { tokio::join!(toolkit.capabilities(), terminate) },
            )
            .await
            .unwrap();

            assert_eq!(result.unwrap_err().kind, ToolkitErrorKind::Unavailable);
        }

        #[tokio::test]
        async fn test_stderr_is_relayed_as_log_lines() {
            let (reporter, mut rx) = Reporter::channel(CancellationToken::new());
            let (_dir, mut toolkit) = start(
                r#"echo 'Downloading config.json' >&2
printf 'shards 1/2\rshards 2/2\n' >&2
read line
echo '{"id": 1, "ok": true, "result": null}'
"#,
                Some(reporter),
            );

            tokio::time::timeout(TIMEOUT, toolkit.shutdown()).await.unwrap();

            let mut relayed = Vec::new();
            while let Ok(message) = rx.try_recv() {
                relayed.push(message);
            }
            assert_eq!(
                relayed,
                vec![
                    WorkerMessage::Log {
                        text: "Downloading config.json".into()
                    },
                    WorkerMessage::Log {
                        text: "shards 2/2".into()
                    },
                ]
            );
        }
    }
}

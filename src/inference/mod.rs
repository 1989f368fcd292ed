use crate::config::InferenceConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

const PARSE_FAILURE_MESSAGE: &str = "Failed to parse inference result";

/// Payload the interpreter prints on standard output.
///
/// Any valid JSON is accepted and handed back unchanged; the accessors read the
/// conventional fields without imposing a schema on the interpreter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InferenceResult(Value);

impl InferenceResult {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field).filter(|value| !value.is_null())
    }

    pub fn predictions(&self) -> Option<&Value> {
        self.get("predictions")
    }

    /// Class index or label, whichever the interpreter reports.
    pub fn predicted_class(&self) -> Option<&Value> {
        self.get("predicted_class")
    }

    pub fn confidence(&self) -> Option<f64> {
        self.get("confidence").and_then(Value::as_f64)
    }

    pub fn error(&self) -> Option<&str> {
        self.get("error").and_then(Value::as_str)
    }

    pub fn is_success(&self) -> bool {
        if !self.0.is_object() {
            return !self.0.is_null();
        }
        match self.get("success").and_then(Value::as_bool) {
            Some(flag) => flag,
            None => {
                self.get("error").is_none()
                    && (self.predicted_class().is_some() || self.predictions().is_some())
            }
        }
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

/// Runs one inference per call in a fresh interpreter process.
///
/// The interpreter is invoked as `<program> <args..> <artifact> <input>` and must
/// print JSON on stdout, which comes back as an [`InferenceResult`]. Its exit status is ignored.
#[derive(Debug, Clone)]
pub struct InferenceDispatcher {
    program: OsString,
    args: Vec<OsString>,
    timeout: Duration,
}

impl InferenceDispatcher {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_config(config: &InferenceConfig) -> Self {
        let mut dispatcher = Self::new(&config.interpreter).with_timeout(config.timeout());
        if let Some(script) = &config.script {
            dispatcher = dispatcher.with_arg(script);
        }
        dispatcher
    }

    pub fn with_arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn run(&self, artifact: &Path, input: &Path) -> Result<InferenceResult> {
        self.run_with_timeout(artifact, input, self.timeout).await
    }

    pub async fn run_with_timeout(
        &self,
        artifact: &Path,
        input: &Path,
        timeout: Duration,
    ) -> Result<InferenceResult> {
        tracing::debug!(
            "Launching {:?} for artifact {:?} with input {:?}",
            self.program,
            artifact,
            input
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(artifact)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Internal(format!("Failed to launch {:?}: {}", self.program, e))
            })?;

        let outcome = tokio::time::timeout(timeout, collect_output(&mut child)).await;

        let (stdout, stderr) = match outcome {
            Ok(output) => output?,
            Err(_) => {
                // Reap the child before reporting so no interpreter outlives the call.
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill timed out interpreter: {}", e);
                }
                tracing::warn!(
                    "Inference on {:?} exceeded {}ms",
                    artifact,
                    timeout.as_millis()
                );
                return Err(Error::Timeout(timeout));
            }
        };

        parse_output(&stdout, &stderr)
    }
}

async fn collect_output(child: &mut Child) -> Result<(Vec<u8>, Vec<u8>)> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Internal("Interpreter stdout was not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Internal("Interpreter stderr was not captured".to_string()))?;

    let (status, stdout, stderr) =
        tokio::join!(child.wait(), read_stream(stdout), read_stream(stderr));

    let status = status?;
    tracing::debug!("Interpreter exited with {}", status);

    Ok((stdout?, stderr?))
}

async fn read_stream<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

fn parse_output(stdout: &[u8], stderr: &[u8]) -> Result<InferenceResult> {
    serde_json::from_slice::<Value>(stdout)
        .map(InferenceResult)
        .map_err(|_| {
            let stderr = String::from_utf8_lossy(stderr);
            let stderr = stderr.trim();
            if stderr.is_empty() {
                Error::ParseFailure(PARSE_FAILURE_MESSAGE.to_string())
            } else {
                Error::ParseFailure(stderr.to_string())
            }
        })
}

//! Compute function backed by an external program

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::Result;
use async_trait::async_trait;
use genorch_cache::EntryMetadata;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ComputeFunction, ProgressReporter};

/// Errors that can occur while running the generator program.
#[derive(Error, Debug)]
pub enum CommandComputeError {
    #[error("Failed to run generator process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Generator binary not found at: {0}")]
    BinaryNotFound(PathBuf),

    #[error("Generator exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("Generator produced no output")]
    EmptyOutput,

    #[error("Failed to parse generator output: {0}")]
    Parse(String),
}

/// Runs a program per generation
///
/// The program receives `{"subject": .., "config": ..}` as JSON on stdin and
/// must print the artifact as JSON on stdout. The child is killed if the
/// orchestrator abandons the computation (generation timeout).
#[derive(Debug, Clone)]
pub struct CommandCompute {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandCompute {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    async fn run(&self, payload: &[u8]) -> Result<Value, CommandComputeError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        debug!("Spawning generator process: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CommandComputeError::BinaryNotFound(self.program.clone())
            } else {
                CommandComputeError::Spawn(e)
            }
        })?;

        // Feed stdin while draining stdout, or a chatty generator fills its
        // pipe before reading the payload and both sides stall.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // A generator may exit without reading its input.
                match stdin.write_all(payload).await {
                    Ok(()) => stdin.flush().await?,
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                        debug!("Generator closed stdin early");
                    }
                    Err(e) => return Err(CommandComputeError::Spawn(e)),
                }
            }
            Ok::<(), CommandComputeError>(())
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        fed?;
        let output = output?;
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(CommandComputeError::NonZeroExit {
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        if !stderr.trim().is_empty() {
            warn!("Generator stderr: {}", stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Err(CommandComputeError::EmptyOutput);
        }

        serde_json::from_str(stdout.trim()).map_err(|e| {
            CommandComputeError::Parse(format!(
                "{} - Content: {}",
                e,
                stdout.chars().take(200).collect::<String>()
            ))
        })
    }
}

#[async_trait]
impl<C> ComputeFunction<C, Value> for CommandCompute
where
    C: Serialize + Send + Sync + 'static,
{
    async fn compute(&self, subject_id: &str, config: &C, progress: ProgressReporter) -> Result<Value> {
        let config = serde_json::to_value(config)?;
        let payload = serde_json::to_vec(&json!({
            "subject": subject_id,
            "config": config,
        }))?;

        progress.report(10.0, Some("running generator"));
        let artifact = self.run(&payload).await?;
        progress.report(95.0, Some("parsing output"));

        Ok(artifact)
    }

    fn metadata(&self, artifact: &Value) -> EntryMetadata {
        let mut metadata = EntryMetadata::new();
        let size = serde_json::to_vec(artifact).map_or(0, |bytes| bytes.len());
        metadata.insert("size_bytes".to_string(), json!(size));

        let items = match artifact {
            Value::Array(items) => Some(items.len()),
            Value::Object(map) => Some(map.len()),
            _ => None,
        };
        if let Some(items) = items {
            metadata.insert("items".to_string(), json!(items));
        }
        metadata
    }
}

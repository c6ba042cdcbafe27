//! Transform pipelines backed by external programs.
//!
//! Each derived cache names a program; the master document is written to its
//! stdin and whatever it prints on stdout becomes the derived document.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use doccache_core::{DocId, EngineConfig, Error, Transform, TransformConfig, TransformRegistry};

/// Longest stderr excerpt carried in an error.
const MAX_STDERR: usize = 2_048;

/// Runs a program per document.
#[derive(Debug, Clone)]
pub struct CommandTransform {
    name: String,
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandTransform {
    pub fn new(name: impl Into<String>, config: &TransformConfig, timeout: Duration) -> Self {
        Self { name: name.into(), command: config.command.clone(), args: config.args.clone(), timeout }
    }

    async fn run(&self, doc_id: &DocId, content: Bytes) -> Result<Bytes, Error> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .env("DOCCACHE_DOC_ID", doc_id.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::TransformFailed(format!("{}: cannot start '{}': {e}", self.name, self.command)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::TransformFailed(format!("{}: stdin unavailable", self.name)))?;
        let feeder = tokio::spawn(async move {
            stdin.write_all(&content).await?;
            stdin.shutdown().await
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::TransformFailed(format!("{}: {doc_id}: {e}", self.name)))?;

        match feeder.await? {
            Ok(()) => {}
            // Programs may exit without reading all of their input.
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
            Err(e) => return Err(Error::TransformFailed(format!("{}: {doc_id}: writing input: {e}", self.name))),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr: String = stderr.trim().chars().take(MAX_STDERR).collect();
            return Err(Error::TransformFailed(format!(
                "{}: {doc_id}: {}: {stderr}",
                self.name, output.status
            )));
        }

        Ok(Bytes::from(output.stdout))
    }
}

#[async_trait]
impl Transform for CommandTransform {
    fn name(&self) -> &str {
        &self.command
    }

    async fn apply(&self, doc_id: &DocId, content: Bytes) -> Result<Bytes, Error> {
        tokio::time::timeout(self.timeout, self.run(doc_id, content))
            .await
            .map_err(|_| {
                Error::TransformFailed(format!("{}: {doc_id}: timed out after {:?}", self.name, self.timeout))
            })?
    }
}

/// One [`CommandTransform`] per configured derived cache.
pub fn transform_registry(config: &EngineConfig) -> TransformRegistry {
    config
        .caches
        .iter()
        .fold(TransformRegistry::new(), |registry, (name, transform)| {
            registry.with(name.clone(), Arc::new(CommandTransform::new(name.clone(), transform, config.timeout())))
        })
}

//! Encoder process handling.
//!
//! Wraps `tokio::process` behind two small traits so the supervisor can be
//! exercised in tests without spawning real encoders. The real launcher
//! pipes stderr into the log and keeps stdin open for graceful shutdown.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};

use crate::capture::command_builder::EncoderInvocation;
use crate::error_handling::types::ProcessError;

/// A spawned encoder under supervision.
#[async_trait]
pub trait ManagedProcess: Send {
    /// Non-blocking liveness check. Once a process has been observed dead
    /// it stays dead.
    fn is_alive(&mut self) -> bool;

    /// Human-readable exit summary, available after the process died.
    fn exit_description(&self) -> Option<String>;

    /// Asks the encoder to finish writing and exit, waiting up to `grace`
    /// before killing it outright.
    async fn terminate(&mut self, grace: Duration) -> Result<(), ProcessError>;
}

/// Spawns encoder processes. The supervisor only ever talks to this trait.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(
        &self,
        invocation: &EncoderInvocation,
    ) -> Result<Box<dyn ManagedProcess>, ProcessError>;
}

/// Real ffmpeg launcher.
pub struct EncoderLauncher;

#[async_trait]
impl ProcessLauncher for EncoderLauncher {
    async fn launch(
        &self,
        invocation: &EncoderInvocation,
    ) -> Result<Box<dyn ManagedProcess>, ProcessError> {
        tokio::fs::create_dir_all(&invocation.output_dir).await?;

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ProcessError::SpawnFailed(format!("{}: {}", invocation.program, e))
            })?;

        let stdin = child.stdin.take();
        if let Some(stderr) = child.stderr.take() {
            let stream_name = invocation.stream_name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("[encoder {}] {}", stream_name, line);
                }
            });
        }

        debug!(
            "Spawned encoder for stream {} (pid {:?})",
            invocation.stream_name,
            child.id()
        );
        Ok(Box::new(EncoderProcess {
            child,
            stdin,
            exit: None,
        }))
    }
}

pub struct EncoderProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    exit: Option<ExitStatus>,
}

#[async_trait]
impl ManagedProcess for EncoderProcess {
    fn is_alive(&mut self) -> bool {
        if self.exit.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                self.exit = Some(status);
                false
            }
            Err(e) => {
                warn!("Failed to poll encoder process: {}", e);
                false
            }
        }
    }

    fn exit_description(&self) -> Option<String> {
        self.exit.map(|status| match status.code() {
            Some(code) => format!("encoder exited with status {}", code),
            None => "encoder terminated by signal".to_string(),
        })
    }

    async fn terminate(&mut self, grace: Duration) -> Result<(), ProcessError> {
        if self.exit.is_some() {
            return Ok(());
        }
        // ffmpeg treats "q" on stdin as a request to finalize and quit,
        // which closes the current segment cleanly.
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(e) = stdin.write_all(b"q").await {
                debug!("Could not signal encoder stdin: {}", e);
            }
            drop(stdin);
        }
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.exit = Some(status);
                Ok(())
            }
            Ok(Err(e)) => Err(ProcessError::TerminateFailed(e.to_string())),
            Err(_) => {
                warn!("Encoder ignored quit request, killing it");
                self.child
                    .start_kill()
                    .map_err(|e| ProcessError::TerminateFailed(e.to_string()))?;
                let status = self
                    .child
                    .wait()
                    .await
                    .map_err(|e| ProcessError::TerminateFailed(e.to_string()))?;
                self.exit = Some(status);
                Ok(())
            }
        }
    }
}

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, watch};

use super::Verdict;

#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error("validator I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("validator protocol: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("validator exited")]
    Exited,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    jobspec: &'a str,
}

#[derive(Deserialize)]
struct WireResponse {
    errnum: i32,
    #[serde(default)]
    errstr: Option<String>,
}

impl WireResponse {
    fn into_verdict(self) -> Verdict {
        if self.errnum == 0 {
            return Ok(());
        }
        Err(self
            .errstr
            .unwrap_or_else(|| format!("validation failed (errnum {})", self.errnum)))
    }
}

pub(super) struct WorkItem {
    pub jobspec: Bytes,
    pub reply: oneshot::Sender<Verdict>,
}

/// Pool-side handle to one validator process. Dropping it closes the
/// worker's queue; the process exits after finishing what it holds.
pub(super) struct WorkerHandle {
    pub id: usize,
    pub tx: mpsc::UnboundedSender<WorkItem>,
    pub pending: Arc<AtomicUsize>,
}

impl WorkerHandle {
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// One validator process and the line protocol spoken over its stdio.
struct Worker {
    id: usize,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl Worker {
    fn spawn(id: usize, program: &Path, args: &[String]) -> Result<Self, ValidatorError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or(ValidatorError::Exited)?;
        let stdout = child.stdout.take().ok_or(ValidatorError::Exited)?;

        Ok(Self {
            id,
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout).lines(),
        })
    }

    async fn exchange(&mut self, jobspec: &[u8]) -> Result<Verdict, ValidatorError> {
        let jobspec = String::from_utf8_lossy(jobspec);
        let mut line = serde_json::to_vec(&WireRequest { jobspec: &jobspec })?;
        line.push(b'\n');

        let stdin = self.stdin.as_mut().ok_or(ValidatorError::Exited)?;
        stdin.write_all(&line).await?;
        stdin.flush().await?;

        let response = self
            .stdout
            .next_line()
            .await?
            .ok_or(ValidatorError::Exited)?;
        let response: WireResponse = serde_json::from_str(&response)?;
        Ok(response.into_verdict())
    }

    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<WorkItem>,
        pending: Arc<AtomicUsize>,
        active: Arc<watch::Sender<usize>>,
    ) {
        tracing::debug!(worker = self.id, "Validator started");

        while let Some(item) = rx.recv().await {
            let result = self.exchange(&item.jobspec).await;
            pending.fetch_sub(1, Ordering::SeqCst);
            match result {
                Ok(verdict) => {
                    let _ = item.reply.send(verdict);
                }
                Err(e) => {
                    tracing::warn!(worker = self.id, error = %e, "Validator failed");
                    let _ = item.reply.send(Err(format!("validator failed: {e}")));
                    break;
                }
            }
        }
        // Items still queued are answered through their dropped senders.
        rx.close();
        drop(rx);

        // EOF on stdin tells the validator to exit.
        self.stdin.take();
        match self.child.wait().await {
            Ok(status) => tracing::debug!(worker = self.id, %status, "Validator exited"),
            Err(e) => tracing::warn!(worker = self.id, error = %e, "Validator wait failed"),
        }
        active.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Start a validator process and its driver task.
pub(super) fn start(
    id: usize,
    program: &Path,
    args: &[String],
    active: Arc<watch::Sender<usize>>,
) -> Result<WorkerHandle, ValidatorError> {
    let worker = Worker::spawn(id, program, args)?;
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));

    active.send_modify(|n| *n += 1);
    tokio::spawn(worker.run(rx, pending.clone(), active));

    Ok(WorkerHandle { id, tx, pending })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_response_verdicts() {
        let ok: WireResponse = serde_json::from_str(r#"{"errnum":0}"#).unwrap();
        assert_eq!(ok.into_verdict(), Ok(()));

        let bad: WireResponse =
            serde_json::from_str(r#"{"errnum":22,"errstr":"missing tasks"}"#).unwrap();
        assert_eq!(bad.into_verdict(), Err("missing tasks".to_string()));

        let bare: WireResponse = serde_json::from_str(r#"{"errnum":5}"#).unwrap();
        assert_eq!(
            bare.into_verdict(),
            Err("validation failed (errnum 5)".to_string())
        );
    }

    #[test]
    fn wire_request_encodes_jobspec_as_string() {
        let line = serde_json::to_string(&WireRequest { jobspec: "{\"a\":1}" }).unwrap();
        assert_eq!(line, r#"{"jobspec":"{\"a\":1}"}"#);
    }
}

//! The privilege boundary.
//!
//! The elevated side is `slimmac helper`, started through a configurable
//! command (by default `sudo -n <this executable> helper`). Requests and
//! responses are single JSON objects, one per line, on the child's stdin
//! and stdout. The helper trusts nothing it is sent: every request goes
//! through the same validation as a local action before it is carried out.

use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tracing::{debug, info, warn};

use super::worker::{LocalWorker, Worker, WorkerError, WorkerErrorCode, WorkerOp};
use crate::common::errors::{FatalSetupError, SlimError};

/// Bumped whenever the request or response shape changes
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub id: u64,
    #[serde(flatten)]
    pub op: WorkerOp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub id: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<WorkerErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default)]
    pub bytes_reclaimed: u64,
}

impl WorkerResponse {
    pub fn success(id: u64, bytes_reclaimed: u64) -> Self {
        Self {
            id,
            ok: true,
            error_code: None,
            detail: None,
            bytes_reclaimed,
        }
    }

    pub fn failure(id: u64, error: &WorkerError) -> Self {
        Self {
            id,
            ok: false,
            error_code: Some(error.code),
            detail: Some(error.detail.clone()),
            bytes_reclaimed: 0,
        }
    }

    pub fn into_result(self) -> Result<u64, WorkerError> {
        if self.ok {
            Ok(self.bytes_reclaimed)
        } else {
            Err(WorkerError::new(
                self.error_code.unwrap_or(WorkerErrorCode::Io),
                self.detail.unwrap_or_default(),
            ))
        }
    }
}

/// `sudo -n <current executable> helper`
pub fn default_command() -> Vec<String> {
    let exe = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "slimmac".to_string());
    vec![
        "sudo".to_string(),
        "-n".to_string(),
        exe,
        "helper".to_string(),
    ]
}

/// Client side: a running helper child process
pub struct HelperProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
}

impl HelperProcess {
    /// Start the helper and complete the `hello` handshake
    pub fn spawn(command: &[String]) -> Result<Self, FatalSetupError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| unavailable("helper command is empty"))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| unavailable(format!("failed to start '{}': {}", program, e)))?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| unavailable("helper stdout is not piped"))?;

        let mut helper = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            next_id: 1,
        };

        let hello = WorkerOp::Hello {
            protocol: PROTOCOL_VERSION,
        };
        match helper.request(&hello) {
            Ok(response) if response.ok => {
                debug!("helper handshake complete");
                Ok(helper)
            }
            Ok(response) => Err(unavailable(
                response
                    .detail
                    .unwrap_or_else(|| "handshake rejected".to_string()),
            )),
            Err(e) => Err(unavailable(e.to_string())),
        }
    }

    fn request(&mut self, op: &WorkerOp) -> Result<WorkerResponse, SlimError> {
        let id = self.next_id;
        self.next_id += 1;

        let stdin = self.stdin.as_mut().ok_or_else(|| protocol("helper input is closed"))?;
        let mut line = serde_json::to_string(&WorkerRequest { id, op: op.clone() })
            .map_err(|e| protocol(format!("failed to encode request: {}", e)))?;
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .and_then(|_| stdin.flush())
            .map_err(|e| protocol(format!("failed to write to helper: {}", e)))?;

        let mut reply = String::new();
        let read = self
            .stdout
            .read_line(&mut reply)
            .map_err(|e| protocol(format!("failed to read from helper: {}", e)))?;
        if read == 0 {
            return Err(protocol("helper closed its output"));
        }

        let response: WorkerResponse = serde_json::from_str(reply.trim_end())
            .map_err(|e| protocol(format!("malformed response: {}", e)))?;
        if response.id != id {
            return Err(protocol(format!(
                "response id {} does not match request {}",
                response.id, id
            )));
        }
        Ok(response)
    }
}

impl Worker for HelperProcess {
    fn perform(&mut self, op: &WorkerOp) -> Result<u64, WorkerError> {
        match self.request(op) {
            Ok(response) => response.into_result(),
            Err(e) => {
                // The stream is out of step; nothing further can be trusted
                self.stdin = None;
                Err(WorkerError::new(WorkerErrorCode::Unreachable, e.to_string()))
            }
        }
    }
}

impl Drop for HelperProcess {
    fn drop(&mut self) {
        // Closing stdin ends the helper's loop
        self.stdin.take();
        match self.child.wait() {
            Ok(status) => debug!(%status, "helper exited"),
            Err(e) => warn!(error = %e, "failed to reap helper"),
        }
    }
}

fn unavailable(reason: impl Into<String>) -> FatalSetupError {
    FatalSetupError::HelperUnavailable {
        reason: reason.into(),
    }
}

fn protocol(message: impl Into<String>) -> SlimError {
    SlimError::Protocol {
        message: message.into(),
    }
}

/// Helper side: answer requests from `input` on `output` until EOF
pub fn serve<R: BufRead, W: Write>(input: R, mut output: W) -> Result<(), SlimError> {
    let mut worker = LocalWorker::default();
    info!(protocol = PROTOCOL_VERSION, "helper ready");

    for line in input.lines() {
        let line = line.map_err(|e| SlimError::io("<stdin>", e))?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<WorkerRequest>(&line) {
            Ok(request) => handle(&mut worker, &request),
            Err(e) => {
                warn!(error = %e, "malformed request");
                let error =
                    WorkerError::new(WorkerErrorCode::Refused, format!("malformed request: {}", e));
                WorkerResponse::failure(0, &error)
            }
        };

        let mut reply = serde_json::to_string(&response)
            .map_err(|e| protocol(format!("failed to encode response: {}", e)))?;
        reply.push('\n');
        output
            .write_all(reply.as_bytes())
            .and_then(|_| output.flush())
            .map_err(|e| SlimError::io("<stdout>", e))?;
    }

    info!("helper input closed");
    Ok(())
}

fn handle(worker: &mut impl Worker, request: &WorkerRequest) -> WorkerResponse {
    if let WorkerOp::Hello { protocol } = request.op {
        if protocol != PROTOCOL_VERSION {
            let error = WorkerError::new(
                WorkerErrorCode::Refused,
                format!(
                    "protocol mismatch: client speaks {}, helper speaks {}",
                    protocol, PROTOCOL_VERSION
                ),
            );
            return WorkerResponse::failure(request.id, &error);
        }
    }

    info!(id = request.id, op = ?request.op, "request");
    match worker.perform(&request.op) {
        Ok(bytes) => WorkerResponse::success(request.id, bytes),
        Err(e) => {
            warn!(id = request.id, error = %e, "request failed");
            WorkerResponse::failure(request.id, &e)
        }
    }
}

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use zem_core::{SessionId, SessionView};
use zem_sync::{FinishedSession, TickReport};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// Response `code` asking the client to prompt the user and resend.
pub const CONFIRMATION_REQUIRED: &str = "confirmation_required";

/// JSON newline-delimited request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
    /// `.zem` file for `open`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Sessions for `finish`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<u64>,
    /// Session for `goto`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Answer to a lock-borrow question, if already given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub borrow: Option<bool>,
    /// The user already confirmed `finish`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub confirmed: bool,
}

impl DaemonRequest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            ..Self::default()
        }
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
            code: None,
        }
    }

    pub fn confirmation(kind: &str, message: &str) -> Self {
        Self {
            ok: false,
            data: Some(serde_json::json!({ "kind": kind, "message": message })),
            error: Some(message.to_owned()),
            code: Some(CONFIRMATION_REQUIRED.to_owned()),
        }
    }
}

// ---------------------------------------------------------------------------
// Typed reply payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenReply {
    pub id: SessionId,
    pub url: String,
    pub content_file: PathBuf,
    /// The document was already open and the existing session was reused.
    pub existing: bool,
    pub editor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GotoReply {
    pub id: SessionId,
    pub content_file: PathBuf,
    pub editor: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishedReply {
    pub id: SessionId,
    pub url: String,
    pub pushed_final_changes: bool,
    pub lock_released: bool,
    pub mirror_removed: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl From<&FinishedSession> for FinishedReply {
    fn from(f: &FinishedSession) -> Self {
        Self {
            id: f.id,
            url: f.url.clone(),
            pushed_final_changes: f.pushed_final_changes,
            lock_released: f.lock_released,
            mirror_removed: f.mirror_removed,
            errors: f.errors.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPush {
    pub id: SessionId,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReply {
    pub pushed: Vec<SessionId>,
    pub unchanged: usize,
    #[serde(default)]
    pub failed: Vec<FailedPush>,
}

impl From<&TickReport> for SyncReply {
    fn from(report: &TickReport) -> Self {
        Self {
            pushed: report.pushed.clone(),
            unchanged: report.unchanged,
            failed: report
                .failed
                .iter()
                .map(|(id, error)| FailedPush {
                    id: *id,
                    error: error.clone(),
                })
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    let response: DaemonResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

/// Daemon status. Retries briefly so a freshly started daemon has time to
/// bind its socket.
pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let request = DaemonRequest::new("status");

    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(home, &request) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    let response = send_request(home, &DaemonRequest::new("stop"))?;
    response_into_data(response).map(|_| ())
}

pub fn request_list(home: &Path) -> Result<Vec<SessionView>, DaemonError> {
    let response = send_request(home, &DaemonRequest::new("list"))?;
    typed(response_into_data(response)?)
}

pub fn request_open(
    home: &Path,
    path: &Path,
    borrow: Option<bool>,
) -> Result<OpenReply, DaemonError> {
    let request = DaemonRequest {
        path: Some(path.to_path_buf()),
        borrow,
        ..DaemonRequest::new("open")
    };
    typed(response_into_data(send_request(home, &request)?)?)
}

pub fn request_goto(home: &Path, id: u64) -> Result<GotoReply, DaemonError> {
    let request = DaemonRequest {
        id: Some(id),
        ..DaemonRequest::new("goto")
    };
    typed(response_into_data(send_request(home, &request)?)?)
}

pub fn request_finish(
    home: &Path,
    ids: &[u64],
    confirmed: bool,
) -> Result<Vec<FinishedReply>, DaemonError> {
    let request = DaemonRequest {
        ids: ids.to_vec(),
        confirmed,
        ..DaemonRequest::new("finish")
    };
    typed(response_into_data(send_request(home, &request)?)?)
}

pub fn request_sync(home: &Path) -> Result<SyncReply, DaemonError> {
    let response = send_request(home, &DaemonRequest::new("sync"))?;
    typed(response_into_data(response)?)
}

pub fn request_reload(home: &Path) -> Result<Value, DaemonError> {
    let response = send_request(home, &DaemonRequest::new("reload"))?;
    response_into_data(response)
}

fn typed<T: DeserializeOwned>(data: Value) -> Result<T, DaemonError> {
    Ok(serde_json::from_value(data)?)
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        return Ok(response.data.unwrap_or(Value::Null));
    }
    if response.code.as_deref() == Some(CONFIRMATION_REQUIRED) {
        let data = response.data.unwrap_or(Value::Null);
        let field = |key: &str| data[key].as_str().unwrap_or_default().to_owned();
        return Err(DaemonError::ConfirmationRequired {
            kind: field("kind"),
            message: field("message"),
        });
    }
    Err(DaemonError::Protocol(
        response
            .error
            .unwrap_or_else(|| "unknown daemon error".to_string()),
    ))
}

//! zem daemon: owns the edit sessions, polls their mirrors and serves the
//! `zem` CLI over a Unix socket.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_finish, request_goto, request_list, request_open, request_reload, request_status,
    request_stop, request_sync, send_request, DaemonRequest, DaemonResponse, FailedPush,
    FinishedReply, GotoReply, OpenReply, SyncReply,
};
pub use runtime::{run, start_blocking, Processor};

use std::path::{Path, PathBuf};

pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn zem_root(home: &Path) -> PathBuf {
    zem_core::prefs::zem_root(home)
}

pub fn socket_path(home: &Path) -> PathBuf {
    zem_root(home).join(DAEMON_SOCKET)
}

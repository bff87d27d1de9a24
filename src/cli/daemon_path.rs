use std::path::PathBuf;

pub const DAEMON_NAME: &str = "prodtime-daemon";

/// Daemon binary is expected to be next to the cli binary.
pub fn to_daemon_path(mut path: PathBuf) -> PathBuf {
    path.set_file_name(DAEMON_NAME);
    #[cfg(windows)]
    {
        path.set_extension("exe");
    }
    path
}

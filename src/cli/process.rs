use std::{
    env,
    path::{Path, PathBuf},
    process::Stdio,
};

use anyhow::{anyhow, bail, Result};
use sysinfo::{get_current_pid, Signal, System};
use tracing::info;

use super::daemon_path::to_daemon_path;

/// Terminates every process started from `name`, except this one and its children. Returns how
/// many were stopped.
pub fn kill_previous_servers(name: &Path) -> Result<usize> {
    let system = System::new_all();
    let current_id = get_current_pid().map_err(|e| anyhow!("Can't get current pid: {e}"))?;
    let mut stopped = 0;
    for (pid, process) in system.processes().iter() {
        if *pid == current_id {
            continue;
        }
        if matches!(process.parent(), Some(p) if p == current_id) {
            continue;
        }

        if process
            .exe()
            .filter(|v| v.exists())
            .filter(|v| name == *v)
            .is_some()
        {
            info!("Stopping {pid}");
            // On unix the daemon gets a chance to record the last interval. Windows falls back
            // to a forceful kill.
            if process.kill_with(Signal::Term).is_none() {
                process.kill();
            }
            process.wait();
            stopped += 1;
        }
    }
    Ok(stopped)
}

pub fn daemon_executable() -> Result<PathBuf> {
    Ok(to_daemon_path(env::current_exe()?))
}

/// Stops running daemons and starts a new one. The daemon detaches itself, so this only waits
/// for the launcher to exit.
pub fn restart_server(dir: Option<&Path>, port: u16) -> Result<()> {
    let daemon = daemon_executable()?;
    let stopped = kill_previous_servers(&daemon)?;
    if stopped > 0 {
        println!("Stopped {stopped} running daemon(s)");
    }

    let mut command = std::process::Command::new(&daemon);
    command.args(["--port", &port.to_string()]);
    if let Some(dir) = dir {
        command.arg("--dir").arg(std::path::absolute(dir)?);
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());

    #[cfg(feature = "win")]
    {
        use std::os::windows::process::CommandExt;
        use windows::Win32::System::Threading::DETACHED_PROCESS;
        command.creation_flags(DETACHED_PROCESS.0);
    }

    info!("Spawning {:?}", daemon);
    let status = command.status()?;
    if !status.success() {
        bail!("Daemon launcher exited with {status}");
    }
    println!("Daemon started on port {port}");
    Ok(())
}

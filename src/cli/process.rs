use std::{
    env::{self, consts::EXE_SUFFIX},
    path::{Path, PathBuf},
    process::Stdio,
};

use anyhow::{Context, Result, ensure};
use sysinfo::{Pid, Signal, System, get_current_pid};
use tracing::{debug, info};

pub const DAEMON_BINARY_NAME: &str = "focuslog-daemon";

/// The daemon binary is expected to sit next to the CLI executable.
pub fn daemon_path() -> Result<PathBuf> {
    let current = env::current_exe().context("Can't operate without an executable")?;
    Ok(current.with_file_name(format!("{DAEMON_BINARY_NAME}{EXE_SUFFIX}")))
}

fn daemon_processes(system: &System, daemon: &Path) -> Vec<Pid> {
    let current_id = get_current_pid().ok();
    system
        .processes()
        .iter()
        .filter(|(pid, _)| Some(**pid) != current_id)
        .filter(|(_, process)| process.exe().is_some_and(|exe| exe == daemon))
        .map(|(pid, _)| *pid)
        .collect()
}

pub fn is_daemon_running() -> Result<bool> {
    let daemon = daemon_path()?;
    Ok(!daemon_processes(&System::new_all(), &daemon).is_empty())
}

/// Terminates every running daemon. Returns how many were stopped.
pub fn kill_daemons() -> Result<usize> {
    let daemon = daemon_path()?;
    let system = System::new_all();

    let pids = daemon_processes(&system, &daemon);
    for pid in &pids {
        let Some(process) = system.process(*pid) else {
            continue;
        };
        debug!("Stopping daemon {pid}");
        // This will forcefully terminate the process on Windows.
        if process.kill_with(Signal::Term).is_none() {
            process.kill();
        }
        process.wait();
    }
    Ok(pids.len())
}

/// Launches the daemon binary. It detaches on its own, so this only waits for the short lived
/// parent to exit.
pub fn start_daemon_process(dir: Option<&Path>) -> Result<()> {
    let daemon = daemon_path()?;
    ensure!(daemon.exists(), "Daemon binary {daemon:?} is missing");

    let mut command = std::process::Command::new(&daemon);
    if let Some(dir) = dir {
        // The detached daemon runs from the filesystem root.
        command.arg("--dir").arg(std::path::absolute(dir)?);
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());

    info!("Spawning {daemon:?}");
    let status = command
        .status()
        .with_context(|| format!("Failed to launch {daemon:?}"))?;
    ensure!(status.success(), "Daemon exited during startup with {status}");
    Ok(())
}

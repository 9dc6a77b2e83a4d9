//! Termination signals for encoder processes.

#[cfg(unix)]
fn send(pid: u32, sig: nix::sys::signal::Signal) -> Result<(), String> {
    use nix::sys::signal::kill as send_signal;
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| format!("pid {} out of range", pid))?;
    send_signal(Pid::from_raw(raw), sig).map_err(|e| format!("{:?} to pid {}: {}", sig, pid, e))
}

/// Ask the process to exit (SIGTERM)
#[cfg(unix)]
pub fn terminate(pid: u32) -> Result<(), String> {
    send(pid, nix::sys::signal::Signal::SIGTERM)
}

/// Force the process to exit (SIGKILL)
#[cfg(unix)]
pub fn kill(pid: u32) -> Result<(), String> {
    send(pid, nix::sys::signal::Signal::SIGKILL)
}

#[cfg(windows)]
fn taskkill(pid: u32, force: bool) -> Result<(), String> {
    let mut cmd = std::process::Command::new("taskkill");
    if force {
        cmd.arg("/F");
    }
    let status = cmd
        .args(["/PID", &pid.to_string()])
        .status()
        .map_err(|e| format!("taskkill for pid {}: {}", pid, e))?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("taskkill for pid {} exited with {}", pid, status))
    }
}

#[cfg(windows)]
pub fn terminate(pid: u32) -> Result<(), String> {
    taskkill(pid, false)
}

#[cfg(windows)]
pub fn kill(pid: u32) -> Result<(), String> {
    taskkill(pid, true)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_terminate_running_process() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        terminate(child.id()).unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
    }

    #[test]
    fn test_out_of_range_pid_rejected() {
        let err = kill(u32::MAX).unwrap_err();
        assert!(err.contains("out of range"));
    }
}

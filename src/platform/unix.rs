use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;

const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// No-op handle on Unix; process group cleanup uses killpg with the child PID.
pub struct ProcessGroupHandle;

pub fn configure_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

pub fn post_spawn_setup(_child_pid: Option<u32>) -> Option<ProcessGroupHandle> {
    // On Unix, process group is configured before spawn via process_group(0).
    None
}

pub fn executable_names(program: &str) -> Vec<String> {
    vec![program.to_string()]
}

pub async fn terminate_child(
    child: &mut tokio::process::Child,
    child_pid: Option<u32>,
    _group_handle: Option<&ProcessGroupHandle>,
) -> std::io::Result<()> {
    let Some(pid) = child_pid else {
        return child.kill().await;
    };

    let pgid = Pid::from_raw(pid as i32);
    match killpg(pgid, Signal::SIGTERM) {
        Ok(()) => {
            debug!(pid, "sent SIGTERM to process group");
        }
        Err(Errno::ESRCH) => {
            debug!(pid, "process group already exited");
            let _ = child.wait().await;
            return Ok(());
        }
        Err(e) => {
            warn!(pid, error = %e, "killpg(SIGTERM) failed, falling back to kill");
            return child.kill().await;
        }
    }

    match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        Ok(Ok(_status)) => {
            debug!(pid, "child exited after SIGTERM");
            Ok(())
        }
        _ => {
            warn!(pid, "child did not exit within 5s, sending SIGKILL");
            let _ = killpg(pgid, Signal::SIGKILL);
            child.kill().await.or_else(|e| {
                // kill() on an already-reaped child reports InvalidInput.
                if e.kind() == std::io::ErrorKind::InvalidInput {
                    Ok(())
                } else {
                    Err(e)
                }
            })?;
            let _ = child.wait().await;
            Ok(())
        }
    }
}

pub async fn terminate_pid(pid: u32) -> std::io::Result<()> {
    let pgid = Pid::from_raw(pid as i32);
    match killpg(pgid, Signal::SIGTERM) {
        Ok(()) => debug!(pid, "sent SIGTERM to process group"),
        Err(Errno::ESRCH) => {
            debug!(pid, "process group already exited");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }

    let deadline = Instant::now() + TERMINATE_GRACE;
    while Instant::now() < deadline {
        if !is_process_alive(pid) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    warn!(pid, "process did not exit within 5s, sending SIGKILL");
    match killpg(pgid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub fn is_process_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(target_os = "linux")]
pub fn identify_port_owner(port: u16) -> Option<String> {
    let port_hex = format!("{:04X}", port);

    let tcp = std::fs::read_to_string("/proc/net/tcp").ok()?;
    let inode = tcp.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            return None;
        }
        let local_port = fields[1].split(':').nth(1)?;
        (local_port == port_hex).then(|| fields[9].to_string())
    })?;
    if inode == "0" {
        return None;
    }

    let socket_link = format!("socket:[{}]", inode);
    for entry in std::fs::read_dir("/proc").ok()?.flatten() {
        let pid = entry.file_name().to_string_lossy().to_string();
        if !pid.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let Ok(fds) = std::fs::read_dir(format!("/proc/{}/fd", pid)) else {
            continue;
        };
        let owns_socket = fds.flatten().any(|fd| {
            std::fs::read_link(fd.path())
                .map(|link| link.to_string_lossy() == socket_link)
                .unwrap_or(false)
        });
        if !owns_socket {
            continue;
        }
        let cmdline = std::fs::read_to_string(format!("/proc/{}/cmdline", pid))
            .map(|c| c.replace('\0', " ").trim().to_string())
            .unwrap_or_default();
        return Some(describe_owner(&pid, &cmdline));
    }

    None
}

/// `cmdline (PID n)`, with long command lines cut to 57 characters.
#[cfg(target_os = "linux")]
fn describe_owner(pid: &str, cmdline: &str) -> String {
    match cmdline.chars().count() {
        0 => format!("PID {}", pid),
        n if n > 60 => {
            let head: String = cmdline.chars().take(57).collect();
            format!("{}... (PID {})", head, pid)
        }
        _ => format!("{} (PID {})", cmdline, pid),
    }
}

#[cfg(not(target_os = "linux"))]
pub fn identify_port_owner(_port: u16) -> Option<String> {
    None
}

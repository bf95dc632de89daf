//! Subprocess helpers shared by the transcoder and detector wrappers.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;
#[cfg(target_os = "windows")]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// Keep at most this much of a child's stderr for error reports.
const STDERR_TAIL_BYTES: usize = 16 * 1024;

/// Apply the flags every spawned tool gets: no console window on Windows and
/// termination when the handle is dropped.
pub fn configure_command(cmd: &mut tokio::process::Command) {
    cmd.kill_on_drop(true);
    #[cfg(target_os = "windows")]
    cmd.creation_flags(CREATE_NO_WINDOW);
}

/// Start the child in its own process group so the whole tree can be
/// terminated with [`kill_process_tree`].
pub fn isolate_process_group(cmd: &mut tokio::process::Command) {
    #[cfg(unix)]
    cmd.process_group(0);
    #[cfg(target_os = "windows")]
    cmd.creation_flags(CREATE_NO_WINDOW | CREATE_NEW_PROCESS_GROUP);
}

/// Forcefully terminate a process and every descendant in its group.
pub fn kill_process_tree(pid: u32) {
    if pid == 0 {
        return;
    }

    #[cfg(unix)]
    {
        // Negative pid addresses the process group created by `isolate_process_group`.
        let rc = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            tracing::debug!(pid, error = %err, "Process group kill failed");
        }
    }

    #[cfg(target_os = "windows")]
    {
        let _ = std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/F", "/T"])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status();
    }
}

/// Drain a child's stderr concurrently so it never blocks on a full pipe.
/// Resolves to the trailing part of the output.
pub fn drain_stderr<R>(stderr: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = stderr;
        let mut tail: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    tail.extend_from_slice(&chunk[..n]);
                    if tail.len() > STDERR_TAIL_BYTES {
                        let excess = tail.len() - STDERR_TAIL_BYTES;
                        tail.drain(..excess);
                    }
                }
                Err(err) => {
                    tail.extend_from_slice(format!("<failed to read stderr: {err}>").as_bytes());
                    break;
                }
            }
        }
        String::from_utf8_lossy(&tail).into_owned()
    })
}

/// Resolve a binary: paths with a directory component are used as-is,
/// bare names are searched on `PATH`.
pub fn resolve_binary(binary: &Path) -> Option<PathBuf> {
    if binary.components().count() > 1 {
        return binary.is_file().then(|| binary.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        let candidate = dir.join(binary);
        if candidate.is_file() {
            return Some(candidate);
        }
        #[cfg(target_os = "windows")]
        {
            let exe = candidate.with_extension("exe");
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}

/// Whether a binary can be located.
pub fn command_exists(binary: &Path) -> bool {
    resolve_binary(binary).is_some()
}

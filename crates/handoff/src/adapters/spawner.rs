//! Worker spawner backed by `tokio::process`.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::adapters::channel::{CHANNEL_DIR_ENV, CHANNEL_ENV};
use crate::domain::WorkerProcess;
use crate::error::HandoffError;
use crate::ports::{SpawnRequest, WorkerSpawner};

/// Launches workers as child processes of the listener.
///
/// The worker learns its channel from the environment; stdout and stderr are
/// shared with the listener, stdin is closed.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    channel_dir: PathBuf,
}

impl ProcessSpawner {
    pub fn new(channel_dir: impl Into<PathBuf>) -> Self {
        Self {
            channel_dir: channel_dir.into(),
        }
    }
}

impl WorkerSpawner for ProcessSpawner {
    fn spawn(&self, request: SpawnRequest) -> Result<WorkerProcess, HandoffError> {
        let program = request.command.program.clone();
        let mut cmd = Command::new(&request.command.program);
        cmd.args(&request.command.args)
            .env(CHANNEL_ENV, request.channel.as_str())
            .env(CHANNEL_DIR_ENV, &self.channel_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        #[cfg(unix)]
        if !request.inherit.is_empty() {
            let fds = inheritable_fds(&request.inherit).map_err(|reason| HandoffError::Spawn {
                program: program.clone(),
                reason,
            })?;
            // SAFETY: the hook only calls fcntl, which is async-signal-safe.
            unsafe {
                cmd.pre_exec(move || clear_cloexec(&fds));
            }
        }

        let child = cmd.spawn().map_err(|e| HandoffError::Spawn {
            program: program.clone(),
            reason: e.to_string(),
        })?;
        let worker = WorkerProcess::from_child(child).ok_or_else(|| HandoffError::Spawn {
            program: program.clone(),
            reason: "worker exited before its pid was known".into(),
        })?;

        debug!(
            worker_pid = worker.pid(),
            channel = %request.channel,
            command = %request.command,
            "worker spawned"
        );
        Ok(worker)
    }
}

#[cfg(unix)]
fn inheritable_fds(values: &[u64]) -> Result<Vec<libc::c_int>, String> {
    values
        .iter()
        .map(|&v| libc::c_int::try_from(v).map_err(|_| format!("{v} is not a file descriptor")))
        .collect()
}

/// Runs in the forked child: let the listed descriptors survive exec.
#[cfg(unix)]
fn clear_cloexec(fds: &[libc::c_int]) -> std::io::Result<()> {
    for &fd in fds {
        // SAFETY: plain fcntl calls on descriptors owned by this process.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if flags < 0 {
            return Err(std::io::Error::last_os_error());
        }
        if unsafe { libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::{ChannelName, WorkerCommand, WorkerState};

    fn sh(script: &str) -> WorkerCommand {
        WorkerCommand::new("/bin/sh", vec!["-c".into(), script.into()])
    }

    #[tokio::test]
    async fn test_spawn_passes_channel_through_environment() {
        let spawner = ProcessSpawner::new("/tmp");
        let request = SpawnRequest::new(
            sh(r#"[ "$HANDOFF_CHANNEL" = "h-1" ] && [ "$HANDOFF_CHANNEL_DIR" = "/tmp" ]"#),
            ChannelName::new("h-1").unwrap(),
        );

        let mut worker = spawner.spawn(request).unwrap();
        assert!(worker.pid() > 0);
        assert_eq!(worker.state(), WorkerState::Spawning);

        let code = loop {
            if let Some(code) = worker.try_exit().unwrap() {
                break code;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        };
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn test_spawn_missing_program_is_spawn_error() {
        let spawner = ProcessSpawner::new("/tmp");
        let request = SpawnRequest::new(
            WorkerCommand::new("/nonexistent/handoff-worker", Vec::new()),
            ChannelName::new("h-2").unwrap(),
        );
        let err = spawner.spawn(request).unwrap_err();
        assert_eq!(err.kind(), "spawn");
    }

    #[tokio::test]
    async fn test_inherited_descriptor_survives_exec() {
        use std::os::fd::AsRawFd;

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let fd = listener.as_raw_fd();

        let spawner = ProcessSpawner::new("/tmp");
        let mut request = SpawnRequest::new(
            sh(&format!("[ -e /dev/fd/{fd} ]")),
            ChannelName::new("h-3").unwrap(),
        );
        request.inherit.push(fd as u64);

        let mut worker = spawner.spawn(request).unwrap();
        let code = loop {
            if let Some(code) = worker.try_exit().unwrap() {
                break code;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        };
        assert_eq!(code, 0);
    }
}

//! # Worker Processes
//!
//! A worker is a child process launched to serve exactly one handed-off
//! connection. The domain type owns the OS child handle; the registry is the
//! only place that polls or reaps it once the handoff has completed.

use std::fmt;
use std::io;
use std::process::ExitStatus;

use serde::{Deserialize, Serialize};
use tokio::process::Child;

/// Exit code reported when the exit status could not be collected.
pub const UNKNOWN_EXIT_CODE: i32 = -1;

/// Program and arguments used to launch a worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from an argv vector; `None` when it is empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }
}

impl fmt::Display for WorkerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Lifecycle of a worker.
///
/// A worker is `Spawning` from process creation until it connects to its
/// handoff channel, which is its only readiness signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Spawning,
    Running,
    Exited(i32),
}

/// A reaped worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerExit {
    pub pid: u32,
    pub exit_code: i32,
}

/// Map an exit status to a single code; signal deaths become `128 + signal`.
pub fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    UNKNOWN_EXIT_CODE
}

/// A launched worker process.
#[derive(Debug)]
pub struct WorkerProcess {
    pid: u32,
    state: WorkerState,
    child: Child,
}

impl WorkerProcess {
    /// Wrap a freshly spawned child; `None` if it already exited and was
    /// reaped, since its pid is then unknown.
    pub fn from_child(child: Child) -> Option<Self> {
        let pid = child.id()?;
        Some(Self {
            pid,
            state: WorkerState::Spawning,
            child,
        })
    }

    /// The worker reached its channel. Only moves `Spawning` to `Running`.
    pub fn mark_running(&mut self) {
        if self.state == WorkerState::Spawning {
            self.state = WorkerState::Running;
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Poll for exit without blocking.
    pub fn try_exit(&mut self) -> io::Result<Option<i32>> {
        if let WorkerState::Exited(code) = self.state {
            return Ok(Some(code));
        }
        let code = match self.child.try_wait() {
            Ok(Some(status)) => exit_code_of(status),
            Ok(None) => return Ok(None),
            #[cfg(unix)]
            Err(e) if e.raw_os_error() == Some(libc::ECHILD) => UNKNOWN_EXIT_CODE,
            Err(e) => return Err(e),
        };
        self.state = WorkerState::Exited(code);
        Ok(Some(code))
    }

    /// Request forced termination without waiting for it.
    pub fn start_kill(&mut self) -> io::Result<()> {
        if matches!(self.state, WorkerState::Exited(_)) {
            return Ok(());
        }
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            // Already exited but not yet reaped.
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Force termination and reap the child.
    pub async fn kill_and_reap(&mut self) -> io::Result<i32> {
        if let WorkerState::Exited(code) = self.state {
            return Ok(code);
        }
        self.start_kill()?;
        let status = self.child.wait().await?;
        let code = exit_code_of(status);
        self.state = WorkerState::Exited(code);
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_from_argv() {
        let argv = vec!["/bin/worker".to_string(), "--serve".to_string()];
        let cmd = WorkerCommand::from_argv(&argv).unwrap();
        assert_eq!(cmd.program, "/bin/worker");
        assert_eq!(cmd.args, vec!["--serve".to_string()]);
        assert_eq!(cmd.to_string(), "/bin/worker --serve");
        assert!(WorkerCommand::from_argv(&[]).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_exit_maps_to_128_plus_signal() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(exit_code_of(ExitStatus::from_raw(libc::SIGKILL)), 128 + 9);
        assert_eq!(exit_code_of(ExitStatus::from_raw(3 << 8)), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_and_reap_running_worker() {
        let child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let mut worker = WorkerProcess::from_child(child).unwrap();
        assert_eq!(worker.state(), WorkerState::Spawning);
        worker.mark_running();
        assert_eq!(worker.state(), WorkerState::Running);
        assert_eq!(worker.try_exit().unwrap(), None);

        let code = worker.kill_and_reap().await.unwrap();
        assert_eq!(code, 128 + libc::SIGKILL);
        assert_eq!(worker.state(), WorkerState::Exited(code));
        worker.mark_running();
        assert_eq!(worker.state(), WorkerState::Exited(code));
        // Killing an exited worker is a no-op.
        assert!(worker.start_kill().is_ok());
    }
}

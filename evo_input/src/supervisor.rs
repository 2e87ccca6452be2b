//! Worker process supervision: spawn, readiness, stop, bounded join.
//!
//! The worker is spawned fresh (never forked) so it inherits nothing from the
//! consumer beyond its arguments and stderr.

use crate::error::InputError;
use crate::worker::WorkerArgs;
use evo_common::consts::SUPERVISOR_POLL_INTERVAL;
use evo_shared_memory::SessionHeader;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A spawned worker process.
#[derive(Debug)]
pub struct WorkerProcess {
    child: Child,
    program: PathBuf,
    status: Option<ExitStatus>,
}

impl WorkerProcess {
    /// Spawn `program` with the worker command line for `args`.
    pub fn spawn(program: &Path, args: &WorkerArgs) -> Result<Self, InputError> {
        let worker = Self::spawn_command(program, args.to_args())?;
        info!(
            pid = worker.pid(),
            program = %program.display(),
            device = %args.device,
            "worker spawned"
        );
        Ok(worker)
    }

    pub(crate) fn spawn_command<I>(program: &Path, args: I) -> Result<Self, InputError>
    where
        I: IntoIterator<Item = OsString>,
    {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| InputError::Spawn {
                program: program.to_path_buf(),
                source,
            })?;
        Ok(Self {
            child,
            program: program.to_path_buf(),
            status: None,
        })
    }

    /// OS process ID.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Program that was spawned.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Exit status, if the process has exited. Reaps it when it has.
    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status)
    }

    /// True until the process has exited.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }

    /// Block until the worker signals readiness or exits.
    ///
    /// A worker that fails during setup records its fault and signals
    /// readiness before exiting, so `Ok` does not imply success; the caller
    /// checks the fault slot next. With a timeout, a worker that is still
    /// not ready is killed.
    pub fn wait_ready(
        &mut self,
        header: &SessionHeader,
        timeout: Option<Duration>,
    ) -> Result<(), InputError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if header.is_ready() {
                return Ok(());
            }
            if let Some(status) = self.try_wait()? {
                // Readiness may have been signaled right before the exit.
                if header.is_ready() {
                    return Ok(());
                }
                return Err(InputError::WorkerExited {
                    status: status.to_string(),
                });
            }
            if let (Some(deadline), Some(timeout)) = (deadline, timeout) {
                if Instant::now() >= deadline {
                    warn!(pid = self.pid(), "worker not ready after {timeout:?}, killing it");
                    self.kill()?;
                    return Err(InputError::ReadyTimeout(timeout));
                }
            }
            std::thread::sleep(SUPERVISOR_POLL_INTERVAL);
        }
    }

    /// Ask the worker to leave its sampling loop.
    pub fn request_stop(&self, header: &SessionHeader) {
        debug!(pid = self.pid(), "stop requested");
        header.request_stop();
    }

    /// Wait up to `timeout` for the worker to exit.
    ///
    /// On timeout the worker is killed and reaped, and `JoinTimeout` is
    /// returned.
    pub fn join(&mut self, timeout: Duration) -> Result<ExitStatus, InputError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.try_wait()? {
                debug!(pid = self.pid(), %status, "worker exited");
                return Ok(status);
            }
            if Instant::now() >= deadline {
                warn!(pid = self.pid(), "worker did not exit within {timeout:?}, killing it");
                self.kill()?;
                return Err(InputError::JoinTimeout(timeout));
            }
            std::thread::sleep(SUPERVISOR_POLL_INTERVAL);
        }
    }

    /// Kill and reap the worker.
    pub fn kill(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        if let Err(e) = self.child.kill() {
            debug!(pid = self.pid(), "kill failed: {e}");
        }
        let status = self.child.wait()?;
        self.status = Some(status);
        Ok(status)
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if self.status.is_none() {
            match self.kill() {
                Ok(status) => debug!(pid = self.pid(), %status, "worker killed on drop"),
                Err(e) => warn!(pid = self.pid(), "failed to reap worker: {e}"),
            }
        }
    }
}

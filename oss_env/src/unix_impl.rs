//! Production implementation of ProcessHost using fork/exec and waitpid.

use crate::context::ProcessHost;
use crate::error::EnvError;
use crate::types::{ChildExit, ClockState, ExitKind, ProcessHandle, WorkerSpec};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::debug;

const EXEC_FAILED: &[u8] = b"oss: exec of worker program failed\n";

/// Real child processes running the worker program.
///
/// Each worker is started as `worker <seconds> <nanoseconds> --key <key>`.
pub struct UnixHost {
    /// Path to the worker executable
    worker_path: PathBuf,

    /// Same path, ready for `execv`
    program: CString,

    /// Shared memory key passed through to workers
    key: i32,
}

impl UnixHost {
    /// Creates a host that launches `worker_path`.
    pub fn new(worker_path: impl Into<PathBuf>, key: i32) -> Result<Self, EnvError> {
        let worker_path = worker_path.into();
        let program = CString::new(worker_path.as_os_str().as_bytes())
            .map_err(|_| EnvError::InvalidCommand(worker_path.display().to_string()))?;
        Ok(Self {
            worker_path,
            program,
            key,
        })
    }

    /// Path of the worker executable.
    pub fn worker_path(&self) -> &Path {
        &self.worker_path
    }

    fn argv(&self, lifetime: ClockState) -> Result<Vec<CString>, EnvError> {
        [
            self.worker_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "worker".to_string()),
            lifetime.seconds.to_string(),
            lifetime.nanoseconds.to_string(),
            "--key".to_string(),
            self.key.to_string(),
        ]
        .into_iter()
        .map(|arg| CString::new(arg).map_err(|e| EnvError::InvalidCommand(e.to_string())))
        .collect()
    }

    fn send(&self, child: ProcessHandle, signal: Signal) -> Result<(), EnvError> {
        match kill(Pid::from_raw(child.as_raw()), signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(EnvError::Signal {
                pid: child.as_raw(),
                source,
            }),
        }
    }
}

impl ProcessHost for UnixHost {
    fn spawn_worker(&mut self, spec: &WorkerSpec) -> Result<ProcessHandle, EnvError> {
        // Everything the child needs is built before forking.
        let argv = self.argv(spec.lifetime)?;
        let mut argv_ptrs: Vec<*const libc::c_char> = argv.iter().map(|arg| arg.as_ptr()).collect();
        argv_ptrs.push(std::ptr::null());

        match unsafe { fork() } {
            // Only async-signal-safe calls between fork and exec/_exit.
            Ok(ForkResult::Child) => unsafe {
                libc::execv(self.program.as_ptr(), argv_ptrs.as_ptr());
                libc::write(2, EXEC_FAILED.as_ptr() as *const libc::c_void, EXEC_FAILED.len());
                libc::_exit(127)
            },
            Ok(ForkResult::Parent { child }) => {
                debug!("Forked worker pid={} lifetime={}", child, spec.lifetime);
                Ok(child.into())
            }
            Err(e) => Err(EnvError::Fork(e)),
        }
    }

    fn try_reap(&mut self, _now: ClockState) -> Result<Option<ChildExit>, EnvError> {
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => return Ok(None),
                Ok(WaitStatus::Exited(pid, code)) => {
                    return Ok(Some(ChildExit {
                        child: pid.into(),
                        kind: ExitKind::Exited(code),
                    }))
                }
                Ok(WaitStatus::Signaled(pid, signal, _)) => {
                    return Ok(Some(ChildExit {
                        child: pid.into(),
                        kind: ExitKind::Signaled(signal as i32),
                    }))
                }
                // Stop/continue notifications are not terminations.
                Ok(_) | Err(Errno::EINTR) => continue,
                Err(e) => return Err(EnvError::Wait(e)),
            }
        }
    }

    fn terminate(&mut self, child: ProcessHandle) -> Result<(), EnvError> {
        self.send(child, Signal::SIGTERM)
    }

    fn kill(&mut self, child: ProcessHandle) -> Result<(), EnvError> {
        self.send(child, Signal::SIGKILL)
    }
}

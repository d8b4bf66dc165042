//! Named cross-process lock guarding shared memory attach and detach.
//!
//! Backed by a POSIX named semaphore with an initial count of one. Only the
//! attach/detach syscall sequences run under it; clock field access does not.
//!
//! A process killed while holding the semaphore never posts it, so every wait
//! is bounded by the lock's timeout and fails with `ETIMEDOUT` instead of
//! hanging.

use crate::error::EnvError;
use nix::errno::Errno;
use std::ffi::CString;
use std::time::Duration;
use tracing::{debug, warn};

/// How long [`NamedLock::acquire`] waits before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Handle to a named binary semaphore shared by every process using the clock.
pub struct NamedLock {
    /// Semaphore name (leading `/`)
    name: String,

    /// Open semaphore, null once closed
    sem: *mut libc::sem_t,

    /// Upper bound on a single acquire
    timeout: Duration,
}

fn sem_name(name: &str, op: &'static str) -> Result<CString, EnvError> {
    CString::new(name).map_err(|_| EnvError::Lock {
        op,
        name: name.to_string(),
        source: Errno::EINVAL,
    })
}

/// Absolute `CLOCK_REALTIME` time `timeout` from now, as `sem_timedwait` wants.
fn deadline_after(timeout: Duration) -> libc::timespec {
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    unsafe {
        libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts);
    }
    let nanos = ts.tv_nsec as u64 + u64::from(timeout.subsec_nanos());
    ts.tv_sec += (timeout.as_secs() + nanos / 1_000_000_000) as libc::time_t;
    ts.tv_nsec = (nanos % 1_000_000_000) as libc::c_long;
    ts
}

impl NamedLock {
    /// Opens the semaphore `name`, creating it unlocked if it does not exist.
    pub fn open(name: &str) -> Result<Self, EnvError> {
        let c_name = sem_name(name, "sem_open")?;
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT,
                0o666 as libc::c_uint,
                1 as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(EnvError::lock("sem_open", name));
        }

        debug!("Opened named lock {}", name);
        Ok(Self {
            name: name.to_string(),
            sem,
            timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    /// Unlinks whatever is left under `name` and opens a new, unlocked
    /// semaphore. Used by the owner so a count stuck at zero by a crashed run
    /// cannot block it.
    pub fn open_fresh(name: &str) -> Result<Self, EnvError> {
        let c_name = sem_name(name, "sem_unlink")?;
        if unsafe { libc::sem_unlink(c_name.as_ptr()) } == 0 {
            debug!("Unlinked stale named lock {}", name);
        }
        Self::open(name)
    }

    /// Sets the acquire timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The acquire timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Name of the underlying semaphore.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits up to the timeout for the lock. Interrupted waits are retried
    /// against the same deadline.
    pub fn acquire(&self) -> Result<LockGuard<'_>, EnvError> {
        if self.sem.is_null() {
            return Err(EnvError::Lock {
                op: "sem_timedwait",
                name: self.name.clone(),
                source: Errno::EBADF,
            });
        }
        let deadline = deadline_after(self.timeout);
        loop {
            if unsafe { libc::sem_timedwait(self.sem, &deadline) } == 0 {
                return Ok(LockGuard { lock: self });
            }
            match Errno::last() {
                Errno::EINTR => continue,
                Errno::ETIMEDOUT => {
                    warn!("Named lock {} still held after {:?}", self.name, self.timeout);
                    return Err(EnvError::Lock {
                        op: "sem_timedwait",
                        name: self.name.clone(),
                        source: Errno::ETIMEDOUT,
                    });
                }
                source => {
                    return Err(EnvError::Lock {
                        op: "sem_timedwait",
                        name: self.name.clone(),
                        source,
                    })
                }
            }
        }
    }

    /// Closes this process's handle. Idempotent.
    pub fn close(&mut self) -> Result<(), EnvError> {
        if self.sem.is_null() {
            return Ok(());
        }
        let rc = unsafe { libc::sem_close(self.sem) };
        self.sem = std::ptr::null_mut();
        if rc == -1 {
            return Err(EnvError::lock("sem_close", &self.name));
        }
        debug!("Closed named lock {}", self.name);
        Ok(())
    }

    /// Closes the handle and removes the name from the system.
    ///
    /// Only the orchestrator does this. A missing name is not an error.
    pub fn release(&mut self) -> Result<(), EnvError> {
        self.close()?;
        let c_name = sem_name(&self.name, "sem_unlink")?;
        if unsafe { libc::sem_unlink(c_name.as_ptr()) } == -1 && Errno::last() != Errno::ENOENT {
            return Err(EnvError::lock("sem_unlink", &self.name));
        }
        debug!("Unlinked named lock {}", self.name);
        Ok(())
    }
}

impl Drop for NamedLock {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Holds the named lock until dropped.
pub struct LockGuard<'a> {
    lock: &'a NamedLock,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        unsafe {
            libc::sem_post(self.lock.sem);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("/oss_test_lock_{}_{}", tag, std::process::id())
    }

    #[test]
    fn test_lock_acquire_and_release() {
        let mut lock = NamedLock::open(&unique_name("basic")).unwrap();
        {
            let _guard = lock.acquire().unwrap();
        }
        // Released by the guard, so it can be taken again.
        let _guard = lock.acquire().unwrap();
        drop(_guard);
        lock.release().unwrap();
    }

    #[test]
    fn test_lock_release_is_idempotent() {
        let mut lock = NamedLock::open(&unique_name("idem")).unwrap();
        lock.release().unwrap();
        lock.release().unwrap();
        assert!(lock.acquire().is_err());
    }

    #[test]
    fn test_acquire_times_out_when_never_posted() {
        let mut lock = NamedLock::open(&unique_name("stuck"))
            .unwrap()
            .with_timeout(Duration::from_millis(50));
        // A holder that dies without posting.
        std::mem::forget(lock.acquire().unwrap());

        let started = std::time::Instant::now();
        match lock.acquire() {
            Err(EnvError::Lock { source, .. }) => assert_eq!(source, Errno::ETIMEDOUT),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("acquired a semaphore that was never posted"),
        }
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(5));
        lock.release().unwrap();
    }

    #[test]
    fn test_open_fresh_replaces_stuck_semaphore() {
        let name = unique_name("fresh");
        let stale = NamedLock::open(&name).unwrap();
        std::mem::forget(stale.acquire().unwrap());

        let mut fresh = NamedLock::open_fresh(&name).unwrap().with_timeout(Duration::from_millis(200));
        drop(fresh.acquire().unwrap());
        fresh.release().unwrap();
        drop(stale);
    }

    #[test]
    fn test_lock_open_twice_shares_semaphore() {
        let name = unique_name("shared");
        let mut a = NamedLock::open(&name).unwrap();
        let mut b = NamedLock::open(&name).unwrap();
        drop(a.acquire().unwrap());
        drop(b.acquire().unwrap());
        b.close().unwrap();
        a.release().unwrap();
    }
}

//! SysV shared memory region holding the simulated clock.
//!
//! ```text
//! orchestrator                         worker (many)
//!   OwnedClockRegion::create(key)        ClockSubscription::open(key)
//!     shmget(IPC_CREAT)                    shmget(0)
//!     [lock] shmat(rw) [unlock]            [lock] shmat(SHM_RDONLY) [unlock]
//!     write() ... write()                  read() ... read()
//!     [lock] shmdt [unlock]                [lock] shmdt [unlock]
//!     shmctl(IPC_RMID), sem_unlink         sem_close
//! ```
//!
//! The lock covers the attach/detach syscalls only. Field access is
//! unsynchronised: each field is its own `AtomicU32`, so a reader can observe
//! seconds and nanoseconds from two different writes. Readers tolerate that.

use crate::context::ClockStore;
use crate::error::EnvError;
use crate::lock::NamedLock;
use crate::types::ClockState;
use nix::errno::Errno;
use std::marker::PhantomData;
use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

/// Well-known key of the clock segment.
pub const DEFAULT_CLOCK_KEY: i32 = 0x1234;

/// Name of the named lock paired with a region key.
pub fn lock_name_for(key: i32) -> String {
    format!("/oss_clock_{:x}", key)
}

/// In-memory layout of the clock: two 32-bit integers.
#[repr(C)]
#[derive(Debug, Default)]
pub struct SharedClock {
    seconds: AtomicU32,
    nanoseconds: AtomicU32,
}

impl SharedClock {
    /// Size of the shared segment in bytes.
    pub const SIZE: usize = size_of::<SharedClock>();

    /// Reads both fields. Not atomic as a pair.
    pub fn load(&self) -> ClockState {
        let seconds = self.seconds.load(Ordering::Acquire);
        let nanoseconds = self.nanoseconds.load(Ordering::Relaxed);
        ClockState {
            seconds,
            nanoseconds,
        }
    }

    /// Writes both fields, nanoseconds first.
    pub fn store(&self, state: ClockState) {
        self.nanoseconds.store(state.nanoseconds, Ordering::Relaxed);
        self.seconds.store(state.seconds, Ordering::Release);
    }
}

/// A created or opened shared memory segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedRegion {
    key: i32,
    id: i32,
    size: usize,
}

impl SharedRegion {
    /// Creates the segment for `key`, or returns the existing one.
    pub fn create(key: i32, size: usize) -> Result<Self, EnvError> {
        let id = unsafe { libc::shmget(key, size, libc::IPC_CREAT | 0o666) };
        if id == -1 {
            return Err(EnvError::shm("shmget", key));
        }
        debug!("Shared memory created/accessed. key={:#x} id={} size={}", key, id, size);
        Ok(Self { key, id, size })
    }

    /// Opens an existing segment for `key`. Fails if nobody created it.
    pub fn open(key: i32, size: usize) -> Result<Self, EnvError> {
        let id = unsafe { libc::shmget(key, size, 0) };
        if id == -1 {
            return Err(EnvError::shm("shmget", key));
        }
        Ok(Self { key, id, size })
    }

    /// Returns true if a segment is currently registered under `key`.
    pub fn exists(key: i32) -> bool {
        unsafe { libc::shmget(key, 0, 0) != -1 }
    }

    /// The key this segment was created under.
    pub fn key(&self) -> i32 {
        self.key
    }

    /// The kernel's segment id.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Attaches with read/write access.
    pub fn attach_read_write(&self, lock: &NamedLock) -> Result<Attachment<ReadWrite>, EnvError> {
        self.attach(lock, 0)
    }

    /// Attaches with read-only access.
    pub fn attach_read_only(&self, lock: &NamedLock) -> Result<Attachment<ReadOnly>, EnvError> {
        self.attach(lock, libc::SHM_RDONLY)
    }

    fn attach<M>(&self, lock: &NamedLock, flags: libc::c_int) -> Result<Attachment<M>, EnvError> {
        if self.size < SharedClock::SIZE {
            return Err(EnvError::SharedMemory {
                op: "shmat",
                key: self.key,
                source: Errno::EINVAL,
            });
        }

        let _guard = lock.acquire()?;
        let addr = unsafe { libc::shmat(self.id, std::ptr::null(), flags) };
        if addr as isize == -1 {
            return Err(EnvError::shm("shmat", self.key));
        }
        let clock = NonNull::new(addr as *mut SharedClock)
            .ok_or(EnvError::SharedMemory {
                op: "shmat",
                key: self.key,
                source: Errno::EFAULT,
            })?;

        debug!(
            "Attached shared memory ({}). id={} addr={:p}",
            if flags & libc::SHM_RDONLY != 0 { "read-only" } else { "read/write" },
            self.id,
            addr
        );
        Ok(Attachment {
            key: self.key,
            clock: Some(clock),
            _mode: PhantomData,
        })
    }

    /// Marks the segment for removal. Already-removed segments are fine.
    pub fn remove(&self) -> Result<(), EnvError> {
        let rc = unsafe { libc::shmctl(self.id, libc::IPC_RMID, std::ptr::null_mut()) };
        if rc == -1 {
            let errno = Errno::last();
            if errno != Errno::EINVAL && errno != Errno::EIDRM {
                return Err(EnvError::SharedMemory {
                    op: "shmctl(IPC_RMID)",
                    key: self.key,
                    source: errno,
                });
            }
        }
        debug!("Shared memory segment removed. key={:#x}", self.key);
        Ok(())
    }
}

/// Typestate marker: attached with write access.
pub struct ReadWrite;

/// Typestate marker: attached read-only.
pub struct ReadOnly;

/// A mapping of the clock into this process.
///
/// Detach explicitly (under the lock) with [`Attachment::detach`]; dropping an
/// attached mapping detaches without the lock.
pub struct Attachment<M> {
    key: i32,
    clock: Option<NonNull<SharedClock>>,
    _mode: PhantomData<M>,
}

/// The orchestrator's writable view.
pub type ClockWriter = Attachment<ReadWrite>;

/// A worker's read-only view.
pub type ClockReader = Attachment<ReadOnly>;

impl<M> Attachment<M> {
    /// Reads the current clock. Returns zero once detached.
    pub fn load(&self) -> ClockState {
        match self.clock {
            Some(ptr) => unsafe { ptr.as_ref() }.load(),
            None => ClockState::ZERO,
        }
    }

    /// Returns true while the mapping is live.
    pub fn is_attached(&self) -> bool {
        self.clock.is_some()
    }

    /// Detaches the mapping under `lock`. Idempotent.
    pub fn detach(&mut self, lock: &NamedLock) -> Result<(), EnvError> {
        let Some(ptr) = self.clock else {
            return Ok(());
        };
        let _guard = lock.acquire()?;
        if unsafe { libc::shmdt(ptr.as_ptr() as *const libc::c_void) } == -1 {
            return Err(EnvError::shm("shmdt", self.key));
        }
        self.clock = None;
        debug!("Detached shared memory. key={:#x}", self.key);
        Ok(())
    }

    /// Detaches without taking the lock. For when the lock cannot be had.
    pub fn detach_unlocked(&mut self) {
        if let Some(ptr) = self.clock.take() {
            unsafe {
                libc::shmdt(ptr.as_ptr() as *const libc::c_void);
            }
        }
    }
}

impl Attachment<ReadWrite> {
    /// Overwrites the clock. Ignored once detached.
    pub fn store(&self, state: ClockState) {
        if let Some(ptr) = self.clock {
            unsafe { ptr.as_ref() }.store(state);
        }
    }
}

impl<M> Drop for Attachment<M> {
    fn drop(&mut self) {
        self.detach_unlocked();
    }
}

/// The orchestrator's clock: region, write mapping and named lock together.
///
/// Released in order on [`ClockStore::release`] or on drop: detach, remove
/// the segment, close and unlink the lock.
pub struct OwnedClockRegion {
    region: SharedRegion,
    writer: ClockWriter,
    lock: NamedLock,
    released: bool,
}

impl OwnedClockRegion {
    /// Creates (or reuses) the segment for `key`, attaches read/write and
    /// zeroes the clock.
    pub fn create(key: i32) -> Result<Self, EnvError> {
        let mut lock = NamedLock::open_fresh(&lock_name_for(key))?;
        let region = match SharedRegion::create(key, SharedClock::SIZE) {
            Ok(region) => region,
            Err(e) => {
                let _ = lock.release();
                return Err(e);
            }
        };
        let writer = match region.attach_read_write(&lock) {
            Ok(writer) => writer,
            Err(e) => {
                let _ = region.remove();
                let _ = lock.release();
                return Err(e);
            }
        };
        writer.store(ClockState::ZERO);

        Ok(Self {
            region,
            writer,
            lock,
            released: false,
        })
    }

    /// The underlying segment.
    pub fn region(&self) -> SharedRegion {
        self.region
    }

    /// Returns true once released.
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl ClockStore for OwnedClockRegion {
    fn read(&self) -> ClockState {
        self.writer.load()
    }

    fn write(&mut self, state: ClockState) {
        self.writer.store(state);
    }

    fn release(&mut self) -> Result<(), EnvError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        // Every step runs; the first failure is reported.
        let detached = self.writer.detach(&self.lock);
        if let Err(e) = &detached {
            warn!("Locked detach failed ({}); detaching without the lock", e);
            self.writer.detach_unlocked();
        }
        let removed = self.region.remove();
        let unlinked = self.lock.release();
        detached.and(removed).and(unlinked)
    }
}

impl Drop for OwnedClockRegion {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Shared clock release on drop failed: {}", e);
        }
    }
}

/// A worker's read-only subscription to the clock.
pub struct ClockSubscription {
    reader: ClockReader,
    lock: NamedLock,
}

impl ClockSubscription {
    /// Opens the segment for `key` and attaches read-only.
    pub fn open(key: i32) -> Result<Self, EnvError> {
        let lock = NamedLock::open(&lock_name_for(key))?;
        let region = SharedRegion::open(key, SharedClock::SIZE)?;
        let reader = region.attach_read_only(&lock)?;
        Ok(Self { reader, lock })
    }

    /// Reads the current clock.
    pub fn read(&self) -> ClockState {
        self.reader.load()
    }

    /// Detaches under the lock and closes the lock handle.
    pub fn close(mut self) -> Result<(), EnvError> {
        self.reader.detach(&self.lock)?;
        self.lock.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::DEFAULT_LOCK_TIMEOUT;
    use std::time::Instant;

    fn unique_key(offset: i32) -> i32 {
        // Keep test keys away from the well-known one and from each other.
        0x0055_0000 | ((std::process::id() as i32 & 0x0fff) << 4) | offset
    }

    #[test]
    fn test_shared_clock_layout() {
        assert_eq!(SharedClock::SIZE, 8);
    }

    #[test]
    fn test_owned_region_roundtrip_and_release() {
        let key = unique_key(1);
        let mut owned = OwnedClockRegion::create(key).unwrap();
        assert_eq!(owned.read(), ClockState::ZERO);

        owned.write(ClockState::new(6, 100));
        assert!(SharedRegion::exists(key));

        let sub = ClockSubscription::open(key).unwrap();
        assert_eq!(sub.read(), ClockState::new(6, 100));

        owned.write(ClockState::new(7, 0));
        assert_eq!(sub.read(), ClockState::new(7, 0));
        sub.close().unwrap();

        owned.release().unwrap();
        assert!(owned.is_released());
        assert!(!SharedRegion::exists(key));
    }

    #[test]
    fn test_release_is_idempotent() {
        let key = unique_key(2);
        let mut owned = OwnedClockRegion::create(key).unwrap();
        owned.release().unwrap();
        owned.release().unwrap();
        assert!(!SharedRegion::exists(key));
    }

    #[test]
    fn test_create_is_idempotent() {
        let key = unique_key(3);
        let a = SharedRegion::create(key, SharedClock::SIZE).unwrap();
        let b = SharedRegion::create(key, SharedClock::SIZE).unwrap();
        assert_eq!(a.id(), b.id());
        a.remove().unwrap();
        b.remove().unwrap();
    }

    #[test]
    fn test_open_missing_region_fails() {
        let key = unique_key(4);
        assert!(SharedRegion::open(key, SharedClock::SIZE).is_err());
    }

    #[test]
    fn test_release_completes_when_lock_is_abandoned() {
        let key = unique_key(6);
        let mut owned = OwnedClockRegion::create(key).unwrap();

        // A worker killed between sem_wait and sem_post.
        let abandoned = NamedLock::open(&lock_name_for(key)).unwrap();
        std::mem::forget(abandoned.acquire().unwrap());

        let started = Instant::now();
        match owned.release() {
            Err(EnvError::Lock { source, .. }) => assert_eq!(source, Errno::ETIMEDOUT),
            other => panic!("expected a lock timeout, got {:?}", other),
        }
        assert!(started.elapsed() < DEFAULT_LOCK_TIMEOUT * 3);
        assert!(owned.is_released());
        assert!(!SharedRegion::exists(key));

        // The name was unlinked, so a new lock starts unlocked.
        let mut fresh = NamedLock::open(&lock_name_for(key)).unwrap();
        drop(fresh.acquire().unwrap());
        fresh.release().unwrap();
        drop(abandoned);
    }

    #[test]
    fn test_create_recovers_from_abandoned_lock() {
        let key = unique_key(7);
        let abandoned = NamedLock::open(&lock_name_for(key)).unwrap();
        std::mem::forget(abandoned.acquire().unwrap());

        let mut owned = OwnedClockRegion::create(key).unwrap();
        let sub = ClockSubscription::open(key).unwrap();
        sub.close().unwrap();
        owned.release().unwrap();
        drop(abandoned);
    }

    #[test]
    fn test_drop_releases_region() {
        let key = unique_key(5);
        {
            let _owned = OwnedClockRegion::create(key).unwrap();
            assert!(SharedRegion::exists(key));
        }
        assert!(!SharedRegion::exists(key));
    }
}

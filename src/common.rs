//! Shared helpers for hardware supervision: bounded polling waits, the
//! per-object instance guard and the logged-call wrapper used by every
//! lifecycle operation.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, warn};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{sleep, Duration, Instant};

use crate::error::{GatewayError, Result};

/// Time the embedded side needs to enumerate its tty (measured at ~1.33 s, doubled).
pub const TTY_DETECT_TIME: Duration = Duration::from_secs(3);

/// Sampling granularity of [`wait_until`] callers.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Deadline and granularity of device presence waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waits {
    pub tty_detect_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for Waits {
    fn default() -> Self {
        Self {
            tty_detect_timeout: TTY_DETECT_TIME,
            poll_interval: POLL_INTERVAL,
        }
    }
}

/// Poll `predicate` until it returns `expected` or `timeout` elapses.
///
/// The first sample is taken immediately, so an already-satisfied condition
/// returns without sleeping. Sleeps are clamped to the deadline.
pub async fn wait_until<T, F>(
    timeout: Duration,
    interval: Duration,
    expected: T,
    mut predicate: F,
) -> bool
where
    T: PartialEq,
    F: FnMut() -> T,
{
    let deadline = Instant::now() + timeout;
    loop {
        if predicate() == expected {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        sleep(interval.min(deadline - now)).await;
    }
}

/// Answers whether a device path is currently enumerated.
pub trait PresenceProbe: Send + Sync {
    fn is_present(&self, path: &Path) -> bool;
}

/// Presence by filesystem existence, as udev exposes `/dev/...` links.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsPresence;

impl PresenceProbe for FsPresence {
    fn is_present(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Wait for `path` to appear. Logs an error naming the path on timeout.
pub async fn wait_device_present(probe: &dyn PresenceProbe, path: &Path, waits: Waits) -> bool {
    let found = wait_until(waits.tty_detect_timeout, waits.poll_interval, true, || {
        probe.is_present(path)
    })
    .await;
    if !found {
        error!("Error Open Node tty not visible: {}", path.display());
    }
    found
}

/// Wait for `path` to disappear.
pub async fn wait_device_absent(probe: &dyn PresenceProbe, path: &Path, waits: Waits) -> bool {
    let gone = wait_until(waits.tty_detect_timeout, waits.poll_interval, false, || {
        probe.is_present(path)
    })
    .await;
    if !gone {
        debug!("{} still present after {:?}", path.display(), waits.tty_detect_timeout);
    }
    gone
}

/// Non-blocking, non-reentrant mutual exclusion for one stateful object.
///
/// Unlike the dispatcher's send lock, a contended guard never queues the
/// caller: [`InstanceGuard::try_enter`] fails at once with [`GatewayError::Busy`].
#[derive(Debug)]
pub struct InstanceGuard {
    resource: String,
    lock: Mutex<()>,
    // Mirrors the lock so observers never have to touch it.
    held: AtomicBool,
}

/// Proof of exclusive access; the guard is released when this is dropped.
#[derive(Debug)]
pub struct InstanceLease<'a> {
    held: &'a AtomicBool,
    _lock: MutexGuard<'a, ()>,
}

impl Drop for InstanceLease<'_> {
    fn drop(&mut self) {
        // Cleared before the lock field is released.
        self.held.store(false, Ordering::Release);
    }
}

impl InstanceGuard {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            lock: Mutex::new(()),
            held: AtomicBool::new(false),
        }
    }

    pub fn try_enter(&self) -> Result<InstanceLease<'_>> {
        match self.lock.try_lock() {
            Ok(lock) => {
                self.held.store(true, Ordering::Release);
                Ok(InstanceLease {
                    held: &self.held,
                    _lock: lock,
                })
            }
            Err(_) => Err(GatewayError::Busy {
                resource: self.resource.clone(),
            }),
        }
    }

    /// True while a lease is alive. Never contends with [`InstanceGuard::try_enter`].
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }
}

/// Log `msg` at info, run `op`, and log a warning if it reports failures.
pub async fn logged_call<F>(target: &str, msg: &str, op: F) -> u32
where
    F: Future<Output = u32>,
{
    info!(target: target, "{}", msg);
    let ret = op.await;
    if ret != 0 {
        warn!(target: target, "{} FAILED: ret = {}", msg, ret);
    }
    ret
}

/// Absolute form of `path`, checked to be readable by this user.
pub fn abspath(path: impl AsRef<Path>) -> io::Result<PathBuf> {
    let path = path.as_ref();
    let abs = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    std::fs::File::open(&abs)?;
    Ok(abs)
}

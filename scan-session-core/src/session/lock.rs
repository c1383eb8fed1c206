use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::models::error::ScanError;

/// Holder table shared by a lock and its outstanding tokens.
#[derive(Default)]
struct LockTable {
    holders: Mutex<HashMap<String, u64>>,
    released: Notify,
    next_serial: AtomicU64,
}

impl LockTable {
    fn try_claim(self: &Arc<Self>, device_id: &str) -> Option<LockToken> {
        let mut holders = self.holders.lock();
        if holders.contains_key(device_id) {
            return None;
        }
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        holders.insert(device_id.to_string(), serial);
        Some(LockToken {
            device_id: device_id.to_string(),
            serial,
            table: Some(Arc::clone(self)),
        })
    }

    fn release(&self, device_id: &str, serial: u64) {
        let previous = self.holders.lock().remove(device_id);
        assert_eq!(
            previous,
            Some(serial),
            "scan lock for {device_id} released by a token that does not hold it"
        );
        self.released.notify_waiters();
    }
}

/// Per-device mutual exclusion for scan sessions.
///
/// At most one [`LockToken`] exists per device id. Cloning the lock shares
/// the same holder table.
#[derive(Clone, Default)]
pub struct ScanLock {
    table: Arc<LockTable>,
}

impl ScanLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait up to `timeout` for exclusive access to `device_id`.
    ///
    /// Returns `Busy` once the timeout elapses; waiters are not queued.
    pub async fn acquire(&self, device_id: &str, timeout: Duration) -> Result<LockToken, ScanError> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register for wakeups before checking, so a release between the
            // check and the wait is not missed.
            let released = self.table.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if let Some(token) = self.table.try_claim(device_id) {
                return Ok(token);
            }

            if tokio::time::timeout_at(deadline, released).await.is_err() {
                return Err(ScanError::Busy(format!(
                    "{device_id} is in use by another scan (waited {} ms)",
                    timeout.as_millis()
                )));
            }
        }
    }

    /// Claim `device_id` only if it is free right now.
    pub fn try_acquire(&self, device_id: &str) -> Option<LockToken> {
        self.table.try_claim(device_id)
    }

    /// Give up exclusive access. Consumes the token.
    pub fn release(&self, token: LockToken) {
        token.release();
    }

    pub fn is_held(&self, device_id: &str) -> bool {
        self.table.holders.lock().contains_key(device_id)
    }

    /// Devices currently held, for diagnostics.
    pub fn held_devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self.table.holders.lock().keys().cloned().collect();
        devices.sort();
        devices
    }
}

impl fmt::Debug for ScanLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanLock")
            .field("held", &self.held_devices())
            .finish()
    }
}

/// Proof of exclusive access to one device.
///
/// Released explicitly with [`LockToken::release`] or implicitly on drop, so
/// every exit path of a session gives the device back.
#[must_use = "dropping a lock token releases the device immediately"]
pub struct LockToken {
    device_id: String,
    serial: u64,
    table: Option<Arc<LockTable>>,
}

impl LockToken {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(table) = self.table.take() {
            table.release(&self.device_id, self.serial);
        }
    }
}

impl Drop for LockToken {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockToken")
            .field("device_id", &self.device_id)
            .field("serial", &self.serial)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn acquire_then_release() {
        let lock = ScanLock::new();
        let token = lock.acquire("flatbed-0", SHORT).await.unwrap();
        assert!(lock.is_held("flatbed-0"));
        assert_eq!(token.device_id(), "flatbed-0");

        lock.release(token);
        assert!(!lock.is_held("flatbed-0"));
    }

    #[tokio::test]
    async fn second_acquire_times_out_busy() {
        let lock = ScanLock::new();
        let _held = lock.acquire("flatbed-0", SHORT).await.unwrap();

        let started = Instant::now();
        let err = lock.acquire("flatbed-0", SHORT).await.unwrap_err();
        assert!(matches!(err, ScanError::Busy(_)));
        assert!(started.elapsed() >= SHORT);
    }

    #[tokio::test]
    async fn different_devices_do_not_contend() {
        let lock = ScanLock::new();
        let _a = lock.acquire("flatbed-0", SHORT).await.unwrap();
        let _b = lock.acquire("feeder-0", SHORT).await.unwrap();
        assert_eq!(lock.held_devices(), vec!["feeder-0", "flatbed-0"]);
    }

    #[tokio::test]
    async fn waiter_wakes_on_release() {
        let lock = ScanLock::new();
        let token = lock.acquire("flatbed-0", SHORT).await.unwrap();

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire("flatbed-0", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.release();

        let second = waiter.await.unwrap().unwrap();
        assert_eq!(second.device_id(), "flatbed-0");
    }

    #[tokio::test]
    async fn dropping_token_releases() {
        let lock = ScanLock::new();
        {
            let _token = lock.acquire("flatbed-0", SHORT).await.unwrap();
        }
        assert!(lock.try_acquire("flatbed-0").is_some());
    }

    #[test]
    fn try_acquire_is_exclusive() {
        let lock = ScanLock::new();
        let first = lock.try_acquire("flatbed-0");
        assert!(first.is_some());
        assert!(lock.try_acquire("flatbed-0").is_none());
        drop(first);
        assert!(lock.try_acquire("flatbed-0").is_some());
    }

    #[test]
    #[should_panic(expected = "does not hold it")]
    fn release_by_stale_token_is_fatal() {
        let lock = ScanLock::new();
        let token = lock.try_acquire("flatbed-0").unwrap();
        // Corrupt the table the way a double release would.
        lock.table.holders.lock().insert("flatbed-0".into(), u64::MAX);
        token.release();
    }
}

//! Per-device execution gate.
//!
//! Every worker owns one [`DeviceLock`]. Pausing a run holds the locks; test
//! code observes the hold at the next device access and parks there. A stop
//! request wins over a hold so paused runs still shut down promptly.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use dtx_runtime::Device;

use crate::error::TestError;

pub struct DeviceLock {
    device: Arc<dyn Device>,
    held: Mutex<bool>,
    stop: AtomicBool,
    changed: Notify,
}

impl DeviceLock {
    pub fn new(device: Arc<dyn Device>) -> Self {
        DeviceLock {
            device,
            held: Mutex::new(false),
            stop: AtomicBool::new(false),
            changed: Notify::new(),
        }
    }

    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    pub fn device_arc(&self) -> Arc<dyn Device> {
        Arc::clone(&self.device)
    }

    pub fn hold(&self) {
        *self.held.lock() = true;
        self.changed.notify_waiters();
    }

    pub fn release(&self) {
        *self.held.lock() = false;
        self.changed.notify_waiters();
    }

    pub fn is_held(&self) -> bool {
        *self.held.lock()
    }

    pub fn signal_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    /// Blocks while the lock is held; errors out on stop or a dead device.
    /// Stop is checked before the hold so a paused worker can still be
    /// stopped.
    pub async fn gate(&self) -> Result<(), TestError> {
        loop {
            // Register before checking so a notify between the check and the
            // await is not lost.
            let notified = self.changed.notified();
            if self.stop.swap(false, Ordering::SeqCst) {
                return Err(TestError::abort("stop requested"));
            }
            if !*self.held.lock() {
                break;
            }
            notified.await;
        }
        if !self.device.connected() {
            return Err(TestError::abort(format!(
                "device {} is not connected",
                self.device.name()
            )));
        }
        Ok(())
    }
}

/// Handle passed into step and hook bodies. Cloning is cheap; the session
/// stays tied to one worker's lock.
#[derive(Clone)]
pub struct Session {
    lock: Arc<DeviceLock>,
}

impl Session {
    pub fn new(lock: Arc<DeviceLock>) -> Self {
        Session { lock }
    }

    pub fn device_name(&self) -> &str {
        self.lock.device_name()
    }

    /// The device, once the gate clears. Call this at every device access so
    /// a pause takes effect between operations, not only between steps.
    pub async fn device(&self) -> Result<Arc<dyn Device>, TestError> {
        self.lock.gate().await?;
        Ok(self.lock.device_arc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use dtx_runtime::OfflineDevice;

    fn lock() -> Arc<DeviceLock> {
        let device = OfflineDevice::from_xml("dev", "<accessible><path>/</path><name>root</name></accessible>").unwrap();
        Arc::new(DeviceLock::new(Arc::new(device)))
    }

    #[tokio::test]
    async fn gate_is_open_by_default() {
        assert!(lock().gate().await.is_ok());
    }

    #[tokio::test]
    async fn held_gate_parks_until_release() {
        let lock = lock();
        lock.hold();
        let waiter = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move { lock.gate().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        lock.release();
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn stop_wins_over_hold() {
        let lock = lock();
        lock.hold();
        let waiter = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move { lock.gate().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        lock.signal_stop();
        let out = waiter.await.unwrap();
        assert!(matches!(out, Err(TestError::Abort(_))));
    }

    #[tokio::test]
    async fn disconnected_device_aborts() {
        let device = OfflineDevice::from_xml("dev", "<accessible><path>/</path><name>root</name></accessible>").unwrap();
        let device: Arc<dyn Device> = Arc::new(device);
        device.disconnect().await;
        let lock = DeviceLock::new(device);
        assert!(matches!(lock.gate().await, Err(TestError::Abort(_))));
    }
}

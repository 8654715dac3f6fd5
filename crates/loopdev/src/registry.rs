//! Registry of real devices bound to a loopback slot
//!
//! A real device may feed at most one loopback slot at a time. Connections
//! claim the device name here before starting workers; the claim is rolled
//! back automatically if the connection fails to come up.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Set of real device names currently bound to some loopback slot
#[derive(Debug, Default)]
pub struct RealDeviceRegistry {
    bound: Mutex<HashSet<String>>,
}

impl RealDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `device` is bound (or being connected) anywhere
    pub fn contains(&self, device: &str) -> bool {
        self.lock().contains(device)
    }

    /// Number of bound devices
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of bound device names, sorted
    pub fn devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self.lock().iter().cloned().collect();
        devices.sort();
        devices
    }

    /// Reserve `device` for a pending connection
    ///
    /// Returns `None` if the device is already bound. The reservation is
    /// removed when the claim is dropped unless [`DeviceClaim::commit`] is called.
    pub fn claim(self: &Arc<Self>, device: &str) -> Option<DeviceClaim> {
        if !self.lock().insert(device.to_string()) {
            return None;
        }
        Some(DeviceClaim {
            registry: Arc::clone(self),
            device: device.to_string(),
            committed: false,
        })
    }

    /// Remove a committed binding
    ///
    /// Returns `false` if the device was not bound.
    pub fn release(&self, device: &str) -> bool {
        self.lock().remove(device)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.bound.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Pending reservation of a real device name
#[derive(Debug)]
pub struct DeviceClaim {
    registry: Arc<RealDeviceRegistry>,
    device: String,
    committed: bool,
}

impl DeviceClaim {
    /// Keep the binding; it now lives until [`RealDeviceRegistry::release`]
    pub fn commit(mut self) -> String {
        self.committed = true;
        std::mem::take(&mut self.device)
    }
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        if !self.committed {
            self.registry.release(&self.device);
        }
    }
}

//! Shared device state: slot pool + real-device registry
//!
//! Every [`ConnectionManager`](crate::ConnectionManager) draws from a
//! [`DeviceContext`]. Managers created with [`DeviceContext::global`] share the
//! process-wide instance; tests and embedders can build isolated contexts.

use std::sync::{Arc, OnceLock};

use crate::config::LoopbackConfig;
use crate::pool::{DevicePool, SlotSpec};
use crate::registry::RealDeviceRegistry;

static GLOBAL_CONTEXT: OnceLock<DeviceContext> = OnceLock::new();

/// Handle to a slot pool and the registry guarding its real devices
#[derive(Debug, Clone)]
pub struct DeviceContext {
    pool: Arc<DevicePool>,
    registry: Arc<RealDeviceRegistry>,
}

impl DeviceContext {
    /// Fresh context over the given slot table
    pub fn new(slots: Vec<SlotSpec>) -> Self {
        Self {
            pool: Arc::new(DevicePool::new(slots)),
            registry: Arc::new(RealDeviceRegistry::new()),
        }
    }

    /// Fresh context using the slot table of a config
    pub fn from_config(config: &LoopbackConfig) -> Self {
        Self::new(config.slots.clone())
    }

    /// The process-wide context
    ///
    /// Initialized on first use with the default loopback table unless
    /// [`DeviceContext::install_global`] ran earlier.
    pub fn global() -> Self {
        GLOBAL_CONTEXT
            .get_or_init(|| {
                log::info!("[context] initializing process-wide loopback pool");
                Self::new(crate::pool::default_slots())
            })
            .clone()
    }

    /// Set the process-wide context
    ///
    /// Fails (returning the context back) once the global context exists.
    pub fn install_global(context: DeviceContext) -> Result<(), DeviceContext> {
        GLOBAL_CONTEXT.set(context)
    }

    pub fn pool(&self) -> &Arc<DevicePool> {
        &self.pool
    }

    pub fn registry(&self) -> &Arc<RealDeviceRegistry> {
        &self.registry
    }
}

impl Default for DeviceContext {
    fn default() -> Self {
        Self::new(crate::pool::default_slots())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_is_shared() {
        let a = DeviceContext::global();
        let b = DeviceContext::global();
        assert!(Arc::ptr_eq(a.pool(), b.pool()));
        assert!(Arc::ptr_eq(a.registry(), b.registry()));
        assert!(DeviceContext::install_global(DeviceContext::default()).is_err());
    }

    #[test]
    fn test_isolated_contexts_do_not_share() {
        let a = DeviceContext::default();
        let b = DeviceContext::default();
        let _lease = a.pool().acquire().unwrap();
        assert_eq!(a.pool().available(), 7);
        assert_eq!(b.pool().available(), 8);
    }

    #[test]
    fn test_from_config_uses_slot_table() {
        let config = LoopbackConfig {
            slots: vec![SlotSpec::new("loop-cap", "loop-play")],
            ..LoopbackConfig::default()
        };
        let context = DeviceContext::from_config(&config);
        assert_eq!(context.pool().capacity(), 1);
        assert_eq!(context.pool().slot(0).unwrap().capture, "loop-cap");
    }
}

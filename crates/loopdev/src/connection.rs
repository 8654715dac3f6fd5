//! Connection lifecycle
//!
//! A [`ConnectionManager`] holds one loopback slot for its whole lifetime and
//! binds at most one real device to it at a time:
//!
//! ```text
//!            connect(d) ok
//!   Idle ─────────────────────▶ Connected { d }
//!    ▲                              │
//!    └────────── disconnect ────────┘
//! ```
//!
//! Failed connects leave the instance `Idle` with the registry untouched.
//! Calls on one instance must not race each other; different instances may be
//! used from different threads freely.

use std::sync::Arc;

use crate::config::{LoopbackConfig, WorkerConfig};
use crate::context::DeviceContext;
use crate::engine::TransferEngine;
use crate::error::{ConnectError, DisconnectError, SlotError};
use crate::job::{JobDescriptor, JobParams};
use crate::orchestrator::{Orchestrator, WorkerExit};
use crate::pool::SlotLease;

/// Connection state of a [`ConnectionManager`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connected { real_device: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// Binds real devices to one loopback slot and runs the transfer for them
pub struct ConnectionManager<E: TransferEngine> {
    context: DeviceContext,
    slot: SlotLease,
    engine: Arc<E>,
    params: JobParams,
    orchestrator: Orchestrator<E>,
    state: ConnectionState,
    /// Reports of the last disconnected run, until taken
    exits: Vec<WorkerExit>,
}

impl<E: TransferEngine> ConnectionManager<E> {
    /// Take a slot from the process-wide pool with default settings
    pub fn new(engine: Arc<E>) -> Result<Self, SlotError> {
        Self::with_context(engine, DeviceContext::global(), &LoopbackConfig::default())
    }

    /// Take a slot from `context`, using the audio and worker settings of `config`
    ///
    /// The slot table of `config` is ignored here; it only matters when the
    /// context is built with [`DeviceContext::from_config`].
    pub fn with_context(
        engine: Arc<E>,
        context: DeviceContext,
        config: &LoopbackConfig,
    ) -> Result<Self, SlotError> {
        Self::with_settings(engine, context, config.params.clone(), config.worker.clone())
    }

    pub fn with_settings(
        engine: Arc<E>,
        context: DeviceContext,
        params: JobParams,
        worker: WorkerConfig,
    ) -> Result<Self, SlotError> {
        let pool = context.pool();
        let slot = pool.acquire().ok_or_else(|| {
            log::warn!(
                "[loopdev] no loopback slot available ({} in use)",
                pool.capacity()
            );
            SlotError::NoSlotAvailable {
                capacity: pool.capacity(),
            }
        })?;

        log::info!(
            "[loopdev slot {}] acquired {} / {}",
            slot.index(),
            slot.capture_device(),
            slot.playback_device()
        );

        let orchestrator = Orchestrator::new(Arc::clone(&engine), worker);
        Ok(Self {
            context,
            slot,
            engine,
            params,
            orchestrator,
            state: ConnectionState::Idle,
            exits: Vec::new(),
        })
    }

    /// Bind `real_device` to this slot and start transferring
    ///
    /// Returns once the transfer job is initialized and started on its worker.
    pub fn connect(&mut self, real_device: &str) -> Result<(), ConnectError> {
        if let ConnectionState::Connected { real_device: bound } = &self.state {
            log::warn!(
                "[loopdev slot {}] connect {}: already connected to {}",
                self.slot.index(),
                real_device,
                bound
            );
            return Err(ConnectError::AlreadyConnected {
                bound: bound.clone(),
            });
        }

        // Held until commit; dropping it on any failure below undoes the claim
        let claim = self.context.registry().claim(real_device).ok_or_else(|| {
            log::warn!(
                "[loopdev slot {}] {} is already bound to another loopback device",
                self.slot.index(),
                real_device
            );
            ConnectError::RealDeviceBusy {
                device: real_device.to_string(),
            }
        })?;

        self.engine
            .attach_output()
            .map_err(ConnectError::OutputAttachFailed)?;

        let job = JobDescriptor::new(real_device, self.slot.capture_device(), self.params.clone());
        self.orchestrator.add_job(job);
        if let Err(e) = self.orchestrator.spawn() {
            log::error!(
                "[loopdev slot {}] failed to start transfer for {}: {}",
                self.slot.index(),
                real_device,
                e
            );
            self.orchestrator.release_all();
            return Err(ConnectError::EngineInitFailed(e));
        }

        let real_device = claim.commit();
        log::info!(
            "[loopdev slot {}] connected {} -> {}",
            self.slot.index(),
            real_device,
            self.slot.capture_device()
        );
        self.state = ConnectionState::Connected { real_device };
        Ok(())
    }

    /// Stop the transfer and unbind the real device
    ///
    /// Blocks until the workers of this connection have exited.
    pub fn disconnect(&mut self) -> Result<(), DisconnectError> {
        let ConnectionState::Connected { real_device } = std::mem::take(&mut self.state) else {
            return Err(DisconnectError::NotConnected);
        };

        self.orchestrator.request_stop();
        // Only the latest run's reports are kept
        self.exits.clear();
        for exit in self.orchestrator.join_all() {
            if let Err(e) = &exit.result {
                log::warn!(
                    "[loopdev slot {}] worker {} had failed: {}",
                    self.slot.index(),
                    exit.group,
                    e
                );
            }
            self.exits.push(exit);
        }
        self.orchestrator.release_all();

        if !self.context.registry().release(&real_device) {
            log::error!(
                "[loopdev slot {}] {} was missing from the device registry",
                self.slot.index(),
                real_device
            );
        }

        log::info!(
            "[loopdev slot {}] disconnected {}",
            self.slot.index(),
            real_device
        );
        Ok(())
    }

    /// Capture endpoint of this instance's loopback slot
    pub fn capture_device_name(&self) -> &str {
        self.slot.capture_device()
    }

    /// Playback endpoint of this instance's loopback slot
    pub fn playback_device_name(&self) -> &str {
        self.slot.playback_device()
    }

    /// The real device bound to this slot, if connected
    pub fn bound_real_device(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Connected { real_device } => Some(real_device.as_str()),
            ConnectionState::Idle => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Whether `name` is bound by any instance sharing this context
    ///
    /// A device is reserved as soon as a `connect` passes its busy check, so
    /// this also reports `true` for a connect still in flight on another
    /// instance. If that connect fails the reservation is dropped again.
    pub fn is_real_device_bound(&self, name: &str) -> bool {
        self.context.registry().contains(name)
    }

    pub fn slot_index(&self) -> usize {
        self.slot.index()
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    /// Worker exit reports received since the last call
    ///
    /// Reports of a run that were not taken before the next disconnect are
    /// replaced by that run's reports.
    ///
    /// A failure reported while still connected means the transfer stopped on
    /// its own; the connection stays bound until [`disconnect`](Self::disconnect).
    pub fn worker_exits(&mut self) -> Vec<WorkerExit> {
        let mut exits = std::mem::take(&mut self.exits);
        exits.extend(self.orchestrator.take_exits());
        exits
    }

    /// Number of this connection's workers still running
    pub fn workers_alive(&self) -> usize {
        self.orchestrator.alive_workers()
    }
}

impl<E: TransferEngine> Drop for ConnectionManager<E> {
    fn drop(&mut self) {
        if self.is_connected() {
            log::debug!(
                "[loopdev slot {}] dropped while connected, disconnecting",
                self.slot.index()
            );
            let _ = self.disconnect();
        }
        log::debug!("[loopdev slot {}] released", self.slot.index());
    }
}

//! Loopback connection lifecycle for audio devices
//!
//! This crate provides:
//! - A fixed pool of loopback slots (capture/playback endpoint pairs)
//! - A registry that keeps a real device bound to at most one slot
//! - A connection state machine driving the transfer for one slot
//! - A thread orchestrator running poll-driven transfer workers
//! - YAML configuration for the slot table, audio parameters and workers
//!
//! # Architecture
//!
//! ```text
//! ConnectionManager ──connect──▶ Orchestrator ──spawn──▶ worker thread
//!   │ SlotLease (pool)               │ stop flag + pipe        │ poll(2)
//!   │ DeviceClaim (registry)         │ WorkerExit (flume)      ▼
//!   └────────────────────────────────┴──────────────────▶ TransferEngine
//! ```
//!
//! The sample transfer itself is delegated to a [`TransferEngine`]
//! implementation; this crate only decides when jobs run and who owns what.

mod config;
mod connection;
mod context;
mod engine;
mod error;
mod job;
mod orchestrator;
mod pool;
mod registry;
mod sys;

#[cfg(test)]
mod testing;

pub use config::{
    default_config_path, load_config, save_config, LoopbackConfig, WorkerConfig,
    CONFIG_FILE_NAME,
};
pub use connection::{ConnectionManager, ConnectionState};
pub use context::DeviceContext;
pub use engine::{PollEntry, TransferEngine, WaitHint};
pub use error::{
    ConnectError, DisconnectError, EngineError, OrchestratorError, SlotError, WorkerError,
};
pub use job::{
    JobDescriptor, JobParams, SampleFormat, SyncMode, DEFAULT_CHANNELS, DEFAULT_LATENCY_US,
    DEFAULT_SAMPLE_RATE,
};
pub use orchestrator::{partition, Orchestrator, StopHandle, WorkerExit, WorkerGroup};
pub use pool::{default_slots, DevicePool, SlotLease, SlotSpec, DEFAULT_SLOT_COUNT};
pub use registry::{DeviceClaim, RealDeviceRegistry};

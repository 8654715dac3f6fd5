//! Error types for loopback connections
//!
//! Errors are split by where they surface:
//! - **Synchronous** ([`ConnectError`], [`DisconnectError`], [`SlotError`]):
//!   returned from the [`ConnectionManager`](crate::ConnectionManager) call that caused them
//! - **Asynchronous** ([`WorkerError`]): fatal failures inside a running worker,
//!   recorded in a [`WorkerExit`](crate::WorkerExit) report

use thiserror::Error;

/// Errors reported by a [`TransferEngine`](crate::TransferEngine) implementation
#[derive(Error, Debug)]
pub enum EngineError {
    /// A device could not be opened or configured
    #[error("Failed to open device '{device}': {reason}")]
    DeviceOpen { device: String, reason: String },

    /// The diagnostic output could not be attached
    #[error("Failed to attach diagnostic output: {0}")]
    OutputAttach(String),

    /// The transfer could not be started
    #[error("Failed to start transfer: {0}")]
    Start(String),

    /// The wait set could not be described
    #[error("Failed to describe wait set: {0}")]
    WaitSet(String),

    /// Moving samples between the endpoints failed
    #[error("Transfer failed: {0}")]
    Transfer(String),

    /// OS-level I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Creates a device open error for the given device
    pub fn device_open(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DeviceOpen {
            device: device.into(),
            reason: reason.into(),
        }
    }

    /// Creates a transfer error with the given reason
    pub fn transfer(reason: impl Into<String>) -> Self {
        Self::Transfer(reason.into())
    }
}

/// Fatal failure of a running worker
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The engine failed while the worker was running
    #[error("Engine failure in job {job}: {source}")]
    Engine {
        job: usize,
        #[source]
        source: EngineError,
    },

    /// The multiplexed wait failed for a reason other than interruption
    #[error("Poll failed: {0}")]
    Poll(#[source] std::io::Error),

    /// A job reported more wait entries than the group reserved at start
    #[error("Job {job} described more wait entries than the {capacity} reserved")]
    WaitSetOverflow { job: usize, capacity: usize },

    /// The jobs of the group requested no descriptors at all
    #[error("Jobs requested no poll descriptors")]
    EmptyWaitSet,

    /// The worker thread panicked
    #[error("Worker thread panicked")]
    Panicked,
}

/// Errors from the thread orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Nothing was registered before spawning
    #[error("No jobs registered")]
    NoJobs,

    /// Workers are already running for this orchestrator
    #[error("Workers are already running")]
    AlreadyRunning,

    /// The OS refused to create a worker thread
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The wake pipe used to interrupt waiting workers could not be created
    #[error("Failed to create wake pipe: {0}")]
    WakeSetup(#[source] std::io::Error),

    /// A worker failed while initializing or starting its jobs
    #[error("Worker group {group} failed to start: {source}")]
    Startup {
        group: usize,
        #[source]
        source: WorkerError,
    },

    /// A worker went away before reporting readiness
    #[error("Worker group {group} exited before reporting readiness")]
    WorkerLost { group: usize },

    /// A worker running on the calling thread failed
    #[error("Worker group {group} failed: {source}")]
    Worker {
        group: usize,
        #[source]
        source: WorkerError,
    },

    /// Blocking execution needs exactly one group
    #[error("Blocking run needs exactly one worker group, found {count}")]
    NotSingleGroup { count: usize },
}

/// Errors returned when constructing a [`ConnectionManager`](crate::ConnectionManager)
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SlotError {
    /// Every loopback slot of the pool is held by another connection
    #[error("No loopback device available (all {capacity} slots in use)")]
    NoSlotAvailable { capacity: usize },
}

/// Errors returned by [`ConnectionManager::connect`](crate::ConnectionManager::connect)
#[derive(Error, Debug)]
pub enum ConnectError {
    /// This instance is already connected; its slot stays committed to `bound`,
    /// whether the request named the same device or a different one
    #[error("Loopback device is already connected to '{bound}'")]
    AlreadyConnected { bound: String },

    /// The real device is bound to another loopback slot
    #[error("Real device '{device}' is already connected to a loopback device")]
    RealDeviceBusy { device: String },

    /// The transfer engine could not initialize or start the job
    #[error("Transfer engine initialization failed: {0}")]
    EngineInitFailed(#[source] OrchestratorError),

    /// The engine's diagnostic output could not be attached
    #[error("Output attach failed: {0}")]
    OutputAttachFailed(#[source] EngineError),
}

/// Errors returned by [`ConnectionManager::disconnect`](crate::ConnectionManager::disconnect)
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DisconnectError {
    /// The instance has no active connection
    #[error("Loopback device is not connected to any device")]
    NotConnected,
}

//! Transfer engine boundary
//!
//! The engine moves samples between the real device and the loopback endpoint.
//! This crate never does audio I/O itself: workers only call the engine through
//! [`TransferEngine`] and wait on the descriptors it hands out.
//!
//! # Call sequence per job
//!
//! ```text
//! init ──▶ start ──▶ ┌─ describe_wait_set ─▶ poll ─▶ handle_ready ─┐ ──▶ release
//!                    └──────────────────── (until stop) ───────────┘
//! ```
//!
//! `release` is called exactly once for every job `init` returned, on clean
//! shutdown and on fatal errors alike. Ownership enforces this: it consumes the job.

use std::os::fd::RawFd;
use std::time::Duration;

use crate::error::EngineError;
use crate::job::JobDescriptor;

/// One entry of a worker's wait set
///
/// Layout-compatible with `struct pollfd` so a slice of entries can be passed
/// straight to poll(2).
#[repr(transparent)]
#[derive(Clone, Copy)]
pub struct PollEntry(libc::pollfd);

impl PollEntry {
    /// Entry waiting for `events` (`libc::POLLIN`, `libc::POLLOUT`, ...) on `fd`
    pub fn new(fd: RawFd, events: i16) -> Self {
        Self(libc::pollfd {
            fd,
            events,
            revents: 0,
        })
    }

    /// Entry waiting for `fd` to become readable
    pub fn readable(fd: RawFd) -> Self {
        Self::new(fd, libc::POLLIN)
    }

    /// Entry waiting for `fd` to become writable
    pub fn writable(fd: RawFd) -> Self {
        Self::new(fd, libc::POLLOUT)
    }

    /// Placeholder entry; poll(2) ignores negative descriptors
    pub fn unused() -> Self {
        Self::new(-1, 0)
    }

    pub fn fd(&self) -> RawFd {
        self.0.fd
    }

    /// Requested events
    pub fn events(&self) -> i16 {
        self.0.events
    }

    /// Events reported by the last wait
    pub fn revents(&self) -> i16 {
        self.0.revents
    }

    /// Whether the last wait reported anything for this entry (including errors/hangup)
    pub fn is_ready(&self) -> bool {
        self.0.revents != 0
    }

    pub fn is_readable(&self) -> bool {
        self.0.revents & libc::POLLIN != 0
    }

    pub fn is_writable(&self) -> bool {
        self.0.revents & libc::POLLOUT != 0
    }

    /// Whether the descriptor reported an error or hangup
    pub fn has_error(&self) -> bool {
        self.0.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0
    }
}

impl Default for PollEntry {
    fn default() -> Self {
        Self::unused()
    }
}

impl std::fmt::Debug for PollEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollEntry")
            .field("fd", &self.0.fd)
            .field("events", &format_args!("{:#06x}", self.0.events))
            .field("revents", &format_args!("{:#06x}", self.0.revents))
            .finish()
    }
}

/// What a started job needs from the worker's wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WaitHint {
    /// Maximum number of wait entries the job will describe
    pub descriptors: usize,
    /// Wake the worker at least this often, even without ready descriptors
    pub wake: Option<Duration>,
}

impl WaitHint {
    pub fn new(descriptors: usize) -> Self {
        Self {
            descriptors,
            wake: None,
        }
    }

    pub fn with_wake(mut self, wake: Duration) -> Self {
        self.wake = Some(wake);
        self
    }
}

/// External engine that performs the sample transfer for a job
///
/// Implementations are shared between worker threads, so per-job state lives in
/// [`TransferEngine::Job`], which each worker owns exclusively. All calls except
/// the worker's poll wait are expected not to block.
pub trait TransferEngine: Send + Sync + 'static {
    /// Per-job state (open handles, buffers)
    type Job: Send + 'static;

    /// Attach the engine's diagnostic output before a connection is set up
    fn attach_output(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Prepare a job for transfer (open both endpoints)
    fn init(&self, descriptor: &JobDescriptor) -> Result<Self::Job, EngineError>;

    /// Begin the transfer
    fn start(&self, job: &mut Self::Job) -> Result<WaitHint, EngineError>;

    /// Fill `entries` with the job's current wait set, returning the count written
    fn describe_wait_set(
        &self,
        job: &mut Self::Job,
        entries: &mut [PollEntry],
    ) -> Result<usize, EngineError>;

    /// Process the ready entries of a job
    fn handle_ready(&self, job: &mut Self::Job, ready: &[PollEntry]) -> Result<(), EngineError>;

    /// Release every resource held by the job
    fn release(&self, job: Self::Job);
}

//! Cooperative stop signal shared by the workers of one run
//!
//! The flag is what workers check between waits. The pipe makes a blocked
//! poll(2) return: once a byte is written the read end stays readable, so every
//! worker polling it wakes, including ones that enter their wait after the stop.
//! The pipe is never drained; a new run gets a new signal.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::engine::PollEntry;
use crate::sys;

#[derive(Debug)]
pub(crate) struct StopSignal {
    requested: AtomicBool,
    read: OwnedFd,
    write: OwnedFd,
}

impl StopSignal {
    pub(crate) fn new() -> io::Result<Self> {
        let (read, write) = sys::pipe()?;
        Ok(Self {
            requested: AtomicBool::new(false),
            read,
            write,
        })
    }

    /// Set the flag, then wake every waiting worker
    pub(crate) fn request(&self) {
        if self.requested.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = sys::write_byte(self.write.as_raw_fd()) {
            // Workers still see the flag after their current wait times out
            log::warn!("[stop] failed to wake workers: {}", e);
        }
    }

    pub(crate) fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Wait entry that becomes readable once a stop was requested
    pub(crate) fn poll_entry(&self) -> PollEntry {
        PollEntry::readable(self.read.as_raw_fd())
    }
}

/// Cloneable handle that stops the workers of an orchestrator run
///
/// Useful with [`Orchestrator::run_blocking`](super::Orchestrator::run_blocking),
/// where the run occupies the thread that owns the orchestrator.
#[derive(Debug, Clone)]
pub struct StopHandle(pub(crate) Arc<StopSignal>);

impl StopHandle {
    /// Ask the workers to stop; returns immediately
    pub fn stop(&self) {
        self.0.request();
    }

    pub fn is_stopped(&self) -> bool {
        self.0.is_requested()
    }
}

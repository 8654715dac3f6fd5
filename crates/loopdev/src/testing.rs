//! Test support: a transfer engine backed by real pipes
//!
//! Each job owns a pipe. The read end is the job's only wait entry, so the
//! worker's poll loop runs for real; tests make a job ready with [`PipeEngine::feed`].

use std::collections::{HashMap, HashSet};
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::WorkerConfig;
use crate::engine::{PollEntry, TransferEngine, WaitHint};
use crate::error::EngineError;
use crate::job::JobDescriptor;
use crate::sys;

/// Install env_logger once for the test binary
pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Worker settings for tests (no SCHED_RR attempts)
pub(crate) fn test_worker_config() -> WorkerConfig {
    WorkerConfig {
        realtime_priority: false,
        thread_name_prefix: "test-worker".to_string(),
    }
}

/// Poll `condition` until it holds or 5 seconds pass
pub(crate) fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Snapshot of engine call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Counts {
    pub attached: usize,
    pub initialized: usize,
    pub started: usize,
    pub described: usize,
    pub handled: usize,
    pub released: usize,
}

pub(crate) struct PipeJob {
    device: String,
    read: OwnedFd,
}

#[derive(Default)]
pub(crate) struct PipeEngine {
    attached: AtomicUsize,
    initialized: AtomicUsize,
    started: AtomicUsize,
    described: AtomicUsize,
    handled: AtomicUsize,
    released: AtomicUsize,

    /// Write ends keyed by real device name
    feeds: Mutex<HashMap<String, OwnedFd>>,
    handled_per_device: Mutex<HashMap<String, usize>>,

    fail_attach: AtomicBool,
    fail_init: Mutex<HashSet<String>>,
    fail_start: Mutex<HashSet<String>>,
    fail_ready: AtomicBool,
    overreport: AtomicBool,
    /// Descriptors reported by start (1 unless overridden)
    descriptors: Mutex<Option<usize>>,
    wake: Mutex<Option<Duration>>,
}

impl PipeEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn counts(&self) -> Counts {
        Counts {
            attached: self.attached.load(Ordering::SeqCst),
            initialized: self.initialized.load(Ordering::SeqCst),
            started: self.started.load(Ordering::SeqCst),
            described: self.described.load(Ordering::SeqCst),
            handled: self.handled.load(Ordering::SeqCst),
            released: self.released.load(Ordering::SeqCst),
        }
    }

    /// Make the job of `device` ready
    pub(crate) fn feed(&self, device: &str) {
        let feeds = self.feeds.lock().unwrap();
        let fd = feeds.get(device).expect("no live job for device");
        sys::write_byte(fd.as_raw_fd()).unwrap();
    }

    pub(crate) fn handled_for(&self, device: &str) -> usize {
        self.handled_per_device
            .lock()
            .unwrap()
            .get(device)
            .copied()
            .unwrap_or(0)
    }

    /// Whether a job for `device` is currently initialized and not released
    pub(crate) fn is_live(&self, device: &str) -> bool {
        self.feeds.lock().unwrap().contains_key(device)
    }

    pub(crate) fn fail_attach(&self, fail: bool) {
        self.fail_attach.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_init_for(&self, device: &str) {
        self.fail_init.lock().unwrap().insert(device.to_string());
    }

    pub(crate) fn fail_start_for(&self, device: &str) {
        self.fail_start.lock().unwrap().insert(device.to_string());
    }

    pub(crate) fn fail_ready(&self, fail: bool) {
        self.fail_ready.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_overreport(&self, overreport: bool) {
        self.overreport.store(overreport, Ordering::SeqCst);
    }

    pub(crate) fn set_descriptors_per_job(&self, count: usize) {
        *self.descriptors.lock().unwrap() = Some(count);
    }

    pub(crate) fn set_wake(&self, wake: Option<Duration>) {
        *self.wake.lock().unwrap() = wake;
    }
}

impl TransferEngine for PipeEngine {
    type Job = PipeJob;

    fn attach_output(&self) -> Result<(), EngineError> {
        self.attached.fetch_add(1, Ordering::SeqCst);
        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(EngineError::OutputAttach("stdout closed".to_string()));
        }
        Ok(())
    }

    fn init(&self, descriptor: &JobDescriptor) -> Result<PipeJob, EngineError> {
        if self.fail_init.lock().unwrap().contains(&descriptor.real_device) {
            return Err(EngineError::device_open(
                &descriptor.real_device,
                "No such device",
            ));
        }
        let (read, write) = sys::pipe()?;
        self.feeds
            .lock()
            .unwrap()
            .insert(descriptor.real_device.clone(), write);
        self.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(PipeJob {
            device: descriptor.real_device.clone(),
            read,
        })
    }

    fn start(&self, job: &mut PipeJob) -> Result<WaitHint, EngineError> {
        if self.fail_start.lock().unwrap().contains(&job.device) {
            return Err(EngineError::Start(format!("{} refused to start", job.device)));
        }
        self.started.fetch_add(1, Ordering::SeqCst);
        let descriptors = self.descriptors.lock().unwrap().unwrap_or(1);
        let mut hint = WaitHint::new(descriptors);
        if let Some(wake) = *self.wake.lock().unwrap() {
            hint = hint.with_wake(wake);
        }
        Ok(hint)
    }

    fn describe_wait_set(
        &self,
        job: &mut PipeJob,
        entries: &mut [PollEntry],
    ) -> Result<usize, EngineError> {
        self.described.fetch_add(1, Ordering::SeqCst);
        if entries.is_empty() {
            return Ok(0);
        }
        entries[0] = PollEntry::readable(job.read.as_raw_fd());
        if self.overreport.load(Ordering::SeqCst) {
            return Ok(entries.len() + 1);
        }
        Ok(1)
    }

    fn handle_ready(&self, job: &mut PipeJob, ready: &[PollEntry]) -> Result<(), EngineError> {
        if self.fail_ready.load(Ordering::SeqCst) {
            return Err(EngineError::transfer(format!("{}: xrun recovery failed", job.device)));
        }
        if ready.iter().any(PollEntry::is_readable) {
            sys::drain(job.read.as_raw_fd())?;
        }
        self.handled.fetch_add(1, Ordering::SeqCst);
        *self
            .handled_per_device
            .lock()
            .unwrap()
            .entry(job.device.clone())
            .or_default() += 1;
        Ok(())
    }

    fn release(&self, job: PipeJob) {
        self.feeds.lock().unwrap().remove(&job.device);
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

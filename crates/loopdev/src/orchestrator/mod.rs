//! Thread orchestrator
//!
//! Turns registered [`JobDescriptor`]s into running workers and coordinates
//! their shutdown.
//!
//! # Architecture
//!
//! ```text
//! Owner thread                         Worker thread (one per group)
//!     │ add_job / spawn                      │
//!     ├────────────── spawn ───────────────▶ init + start jobs
//!     │ ◀──────── Readiness (flume) ──────── │
//!     │                                      ├─ poll loop ◀── stop pipe
//!     │ request_stop ── flag + pipe byte ──▶ │
//!     │ join_all ◀──── WorkerExit (flume) ── release jobs, exit
//!     │ release_all
//! ```
//!
//! `spawn` returns only after every worker reported readiness, so engine
//! initialization failures surface synchronously. Failures after that are
//! published as [`WorkerExit`] reports.

mod group;
mod stop;
mod worker;

pub use group::{partition, WorkerGroup};
pub use stop::StopHandle;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use flume::{Receiver, Sender};

use crate::config::WorkerConfig;
use crate::engine::TransferEngine;
use crate::error::{OrchestratorError, WorkerError};
use crate::job::JobDescriptor;
use stop::StopSignal;
use worker::Readiness;

/// Final report of a worker
#[derive(Debug)]
pub struct WorkerExit {
    /// Dense group index of the worker
    pub group: usize,
    /// `Ok` if the worker stopped on request
    pub result: Result<(), WorkerError>,
}

impl WorkerExit {
    pub fn is_failure(&self) -> bool {
        self.result.is_err()
    }
}

/// Clears the alive flag when the worker thread ends, even by panic
struct AliveGuard(Arc<AtomicBool>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct WorkerHandle {
    group: usize,
    handle: JoinHandle<()>,
    alive: Arc<AtomicBool>,
}

/// Owns the workers of one set of jobs
pub struct Orchestrator<E: TransferEngine> {
    engine: Arc<E>,
    settings: WorkerConfig,
    jobs: Vec<JobDescriptor>,
    workers: Vec<WorkerHandle>,
    stop: Option<Arc<StopSignal>>,
    exit_tx: Sender<WorkerExit>,
    exit_rx: Receiver<WorkerExit>,
    exits: Vec<WorkerExit>,
}

impl<E: TransferEngine> Orchestrator<E> {
    pub fn new(engine: Arc<E>, settings: WorkerConfig) -> Self {
        let (exit_tx, exit_rx) = flume::unbounded();
        Self {
            engine,
            settings,
            jobs: Vec::new(),
            workers: Vec::new(),
            stop: None,
            exit_tx,
            exit_rx,
            exits: Vec::new(),
        }
    }

    /// Register a job for the next run
    pub fn add_job(&mut self, job: JobDescriptor) {
        log::debug!(
            "[orchestrator] job {} registered (key {})",
            job.label(),
            job.group_key
        );
        self.jobs.push(job);
    }

    /// Registered jobs, in registration order
    pub fn jobs(&self) -> &[JobDescriptor] {
        &self.jobs
    }

    /// Worker groups the registered jobs map to
    pub fn groups(&self) -> Vec<WorkerGroup> {
        partition(&self.jobs)
    }

    /// Number of spawned workers not yet joined
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Number of spawned workers whose thread is still running
    pub fn alive_workers(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| w.alive.load(Ordering::Acquire))
            .count()
    }

    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Handle that stops the current (or next) run from any thread
    pub fn stop_handle(&mut self) -> Result<StopHandle, OrchestratorError> {
        Ok(StopHandle(self.stop_signal()?))
    }

    /// Spawn one worker per group
    ///
    /// Blocks until every worker has initialized and started its jobs. If any
    /// worker fails to, all workers of the run are stopped and joined and the
    /// failure is returned. Returns the number of workers.
    pub fn spawn(&mut self) -> Result<usize, OrchestratorError> {
        if self.is_running() {
            return Err(OrchestratorError::AlreadyRunning);
        }
        if self.jobs.is_empty() {
            return Err(OrchestratorError::NoJobs);
        }

        let stop = self.stop_signal()?;
        let groups = partition(&self.jobs);
        let count = groups.len();
        let (ready_tx, ready_rx) = flume::bounded::<Readiness>(count);

        for group in groups {
            let index = group.index;
            let alive = Arc::new(AtomicBool::new(true));
            let alive_guard = AliveGuard(Arc::clone(&alive));
            let engine = Arc::clone(&self.engine);
            let worker_stop = Arc::clone(&stop);
            let exit_tx = self.exit_tx.clone();
            let ready = ready_tx.clone();
            let realtime = self.settings.realtime_priority;

            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.settings.thread_name_prefix, index))
                .spawn(move || {
                    let _alive = alive_guard;
                    let result =
                        worker::run(&*engine, &group, &worker_stop, realtime, Some(ready));
                    let _ = exit_tx.send(WorkerExit {
                        group: group.index,
                        result,
                    });
                });

            match spawned {
                Ok(handle) => self.workers.push(WorkerHandle {
                    group: index,
                    handle,
                    alive,
                }),
                Err(e) => {
                    log::error!("[orchestrator] failed to spawn worker {}: {}", index, e);
                    stop.request();
                    self.join_all();
                    return Err(OrchestratorError::Spawn(e));
                }
            }
        }
        drop(ready_tx);

        let mut started = HashSet::new();
        let mut failure = None;
        while started.len() < count {
            match ready_rx.recv() {
                Ok(Readiness::Started { group }) => {
                    started.insert(group);
                }
                Ok(Readiness::Failed { group }) => {
                    failure = Some(group);
                    break;
                }
                Err(_) => {
                    // Every sender is gone but someone never reported: it panicked
                    failure = (0..count).find(|g| !started.contains(g));
                    break;
                }
            }
        }

        let Some(failed_group) = failure else {
            log::info!("[orchestrator] {} worker(s) running", count);
            return Ok(count);
        };

        stop.request();
        let exits = self.join_all();
        let cause = exits
            .into_iter()
            .find(|exit| exit.group == failed_group && exit.is_failure())
            .and_then(|exit| exit.result.err());

        Err(match cause {
            Some(source) => OrchestratorError::Startup {
                group: failed_group,
                source,
            },
            None => OrchestratorError::WorkerLost {
                group: failed_group,
            },
        })
    }

    /// Run the single worker group on the calling thread
    ///
    /// Returns once the group stops, via a [`StopHandle`] taken beforehand or
    /// a fatal failure.
    pub fn run_blocking(&mut self) -> Result<(), OrchestratorError> {
        if self.is_running() {
            return Err(OrchestratorError::AlreadyRunning);
        }
        let mut groups = partition(&self.jobs);
        if groups.is_empty() {
            return Err(OrchestratorError::NoJobs);
        }
        if groups.len() != 1 {
            return Err(OrchestratorError::NotSingleGroup {
                count: groups.len(),
            });
        }

        let stop = self.stop_signal()?;
        let group = groups.remove(0);
        worker::run(
            &*self.engine,
            &group,
            &stop,
            self.settings.realtime_priority,
            None,
        )
        .map_err(|source| OrchestratorError::Worker {
            group: group.index,
            source,
        })
    }

    /// Ask every worker to stop and wake any blocked wait
    pub fn request_stop(&self) {
        if let Some(stop) = &self.stop {
            log::debug!("[orchestrator] stop requested");
            stop.request();
        }
    }

    /// Exit reports received so far, without blocking
    pub fn take_exits(&mut self) -> Vec<WorkerExit> {
        self.collect_exits();
        std::mem::take(&mut self.exits)
    }

    /// Wait for every worker to exit
    ///
    /// Returns the exit reports not already taken, ordered by group.
    pub fn join_all(&mut self) -> Vec<WorkerExit> {
        for worker in self.workers.drain(..) {
            if worker.handle.join().is_err() {
                log::error!("[orchestrator] worker {} panicked", worker.group);
                self.exits.push(WorkerExit {
                    group: worker.group,
                    result: Err(WorkerError::Panicked),
                });
            }
        }
        self.collect_exits();

        let mut exits = std::mem::take(&mut self.exits);
        exits.sort_by_key(|exit| exit.group);
        exits
    }

    /// Forget the jobs and the stop signal of the last run
    ///
    /// Joins any worker still running first.
    pub fn release_all(&mut self) {
        if self.is_running() {
            log::warn!("[orchestrator] release_all with running workers, stopping them");
            self.request_stop();
            self.join_all();
        }
        self.jobs.clear();
        self.exits.clear();
        while self.exit_rx.try_recv().is_ok() {}
        self.stop = None;
    }

    fn collect_exits(&mut self) {
        while let Ok(exit) = self.exit_rx.try_recv() {
            self.exits.push(exit);
        }
    }

    fn stop_signal(&mut self) -> Result<Arc<StopSignal>, OrchestratorError> {
        // A signal that already fired would stop the next run at once
        if let Some(stop) = self.stop.as_ref().filter(|s| !s.is_requested()) {
            return Ok(Arc::clone(stop));
        }
        let stop = Arc::new(StopSignal::new().map_err(OrchestratorError::WakeSetup)?);
        self.stop = Some(Arc::clone(&stop));
        Ok(stop)
    }
}

impl<E: TransferEngine> Drop for Orchestrator<E> {
    fn drop(&mut self) {
        if self.is_running() {
            self.request_stop();
            self.join_all();
        }
    }
}

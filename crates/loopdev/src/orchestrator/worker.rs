//! Worker poll loop
//!
//! One worker drives every job of its group:
//!
//! ```text
//! init all ─▶ start all ─▶ report ready ─▶ ┌─ describe wait sets ─┐
//!                                          │  poll (+ stop pipe)  │ until stop
//!                                          └─ handle ready jobs ──┘
//!                                                     │
//!                                              release all jobs
//! ```
//!
//! Jobs are always released by the worker that initialized them, whether the
//! loop ends cleanly or on a fatal error.

use std::io;
use std::ops::Range;
use std::time::{Duration, Instant};

use flume::Sender;

use super::group::WorkerGroup;
use super::stop::StopSignal;
use crate::engine::{PollEntry, TransferEngine};
use crate::error::WorkerError;
use crate::sys;

/// Startup handshake sent once per worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Readiness {
    Started { group: usize },
    Failed { group: usize },
}

/// Multiplexed wait over a wait set; `sys::poll` outside tests
type WaitFn = fn(&mut [PollEntry], Option<Duration>) -> io::Result<usize>;

/// Wait parameters collected from the started jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WaitPlan {
    /// Wait entries reserved for jobs (the stop entry comes on top)
    capacity: usize,
    /// Shortest wake interval any job asked for
    wake: Option<Duration>,
}

/// Run a group to completion on the current thread
///
/// `ready` receives exactly one [`Readiness`] message and is dropped right
/// after, so the owner can tell a lost worker from a slow one.
pub(crate) fn run<E: TransferEngine>(
    engine: &E,
    group: &WorkerGroup,
    stop: &StopSignal,
    realtime_priority: bool,
    ready: Option<Sender<Readiness>>,
) -> Result<(), WorkerError> {
    run_with(engine, group, stop, realtime_priority, ready, sys::poll)
}

fn run_with<E: TransferEngine>(
    engine: &E,
    group: &WorkerGroup,
    stop: &StopSignal,
    realtime_priority: bool,
    ready: Option<Sender<Readiness>>,
    wait: WaitFn,
) -> Result<(), WorkerError> {
    let index = group.index;
    log::info!(
        "[worker {}] started with {} job(s)",
        index,
        group.jobs.len()
    );

    if realtime_priority {
        match sys::set_realtime_priority() {
            Ok(priority) => log::debug!("[worker {}] SCHED_RR priority {}", index, priority),
            Err(e) => log::warn!("[worker {}] could not set SCHED_RR: {}", index, e),
        }
    }

    let mut jobs: Vec<E::Job> = Vec::with_capacity(group.jobs.len());
    let result = match start_jobs(engine, group, &mut jobs) {
        Ok(plan) => {
            report(ready, Readiness::Started { group: index });
            event_loop(engine, index, &mut jobs, plan, stop, wait)
        }
        Err(e) => {
            report(ready, Readiness::Failed { group: index });
            Err(e)
        }
    };

    for job in jobs {
        engine.release(job);
    }

    match &result {
        Ok(()) => log::info!("[worker {}] stopped", index),
        Err(e) => log::error!("[worker {}] exited with failure: {}", index, e),
    }
    result
}

fn report(ready: Option<Sender<Readiness>>, readiness: Readiness) {
    if let Some(tx) = ready {
        let _ = tx.send(readiness);
    }
}

/// Initialize then start every job; `jobs` holds whatever was initialized
fn start_jobs<E: TransferEngine>(
    engine: &E,
    group: &WorkerGroup,
    jobs: &mut Vec<E::Job>,
) -> Result<WaitPlan, WorkerError> {
    for (i, descriptor) in group.jobs.iter().enumerate() {
        let job = engine.init(descriptor).map_err(|source| {
            log::error!(
                "[worker {}] initialization failed for {}: {}",
                group.index,
                descriptor.label(),
                source
            );
            WorkerError::Engine { job: i, source }
        })?;
        jobs.push(job);
    }

    let mut plan = WaitPlan {
        capacity: 0,
        wake: None,
    };
    for (i, job) in jobs.iter_mut().enumerate() {
        let hint = engine
            .start(job)
            .map_err(|source| WorkerError::Engine { job: i, source })?;
        plan.capacity += hint.descriptors;
        if let Some(wake) = hint.wake.filter(|w| !w.is_zero()) {
            plan.wake = Some(plan.wake.map_or(wake, |current| current.min(wake)));
        }
    }

    if plan.capacity == 0 {
        return Err(WorkerError::EmptyWaitSet);
    }
    Ok(plan)
}

fn event_loop<E: TransferEngine>(
    engine: &E,
    index: usize,
    jobs: &mut [E::Job],
    plan: WaitPlan,
    stop: &StopSignal,
    wait: WaitFn,
) -> Result<(), WorkerError> {
    let mut entries = vec![PollEntry::unused(); plan.capacity + 1];
    let mut ranges: Vec<Range<usize>> = vec![0..0; jobs.len()];

    while !stop.is_requested() {
        let mut filled = 0;
        for (i, job) in jobs.iter_mut().enumerate() {
            let free = &mut entries[filled..plan.capacity];
            let available = free.len();
            let count = engine
                .describe_wait_set(job, free)
                .map_err(|source| WorkerError::Engine { job: i, source })?;
            if count > available {
                return Err(WorkerError::WaitSetOverflow {
                    job: i,
                    capacity: plan.capacity,
                });
            }
            ranges[i] = filled..filled + count;
            filled += count;
        }
        entries[filled] = stop.poll_entry();

        let started = Instant::now();
        let ready = match wait(&mut entries[..=filled], plan.wake) {
            Ok(ready) => ready,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(WorkerError::Poll(e)),
        };
        log::trace!(
            "[worker {}] poll took {}us ({} ready)",
            index,
            started.elapsed().as_micros(),
            ready
        );

        if ready == 0 {
            continue;
        }

        for (i, job) in jobs.iter_mut().enumerate() {
            let wait_set = &entries[ranges[i].clone()];
            if wait_set.iter().any(PollEntry::is_ready) {
                engine
                    .handle_ready(job, wait_set)
                    .map_err(|source| WorkerError::Engine { job: i, source })?;
            }
        }
    }

    Ok(())
}

//! Partitioning of jobs into worker groups

use std::collections::BTreeMap;

use crate::job::JobDescriptor;

/// Jobs that share one worker, in registration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerGroup {
    /// Dense group number, starting at 0
    pub index: usize,
    /// Assignment key shared by the jobs
    pub key: i32,
    pub jobs: Vec<JobDescriptor>,
}

/// Group jobs by assignment key
///
/// Groups are numbered densely from 0 in ascending key order; jobs with equal
/// keys land in the same group and keep their relative order.
pub fn partition(jobs: &[JobDescriptor]) -> Vec<WorkerGroup> {
    let mut by_key: BTreeMap<i32, Vec<JobDescriptor>> = BTreeMap::new();
    for job in jobs {
        by_key.entry(job.group_key).or_default().push(job.clone());
    }

    by_key
        .into_iter()
        .enumerate()
        .map(|(index, (key, jobs))| WorkerGroup { index, key, jobs })
        .collect()
}

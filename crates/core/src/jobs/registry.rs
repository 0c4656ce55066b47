// crates/core/src/jobs/registry.rs
//! Single-flight job registry keyed by (operation, cache key).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use metrics::counter;

use super::handle::{JobHandle, JobId, JobSnapshot};
use crate::error::JobError;

/// The jobs currently active for one operation name.
#[derive(Debug)]
pub struct Group {
    op: String,
    jobs: RwLock<HashMap<String, JobHandle>>,
}

impl Group {
    fn new(op: &str) -> Self {
        Self {
            op: op.to_string(),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn op(&self) -> &str {
        &self.op
    }

    /// Install `handle` under `key`, cancelling and evicting any handle
    /// already there. Returns the superseded handle.
    pub fn add(&self, key: &str, mut handle: JobHandle) -> Option<JobHandle> {
        handle.bind(&self.op, key);
        let old = self.write().insert(key.to_string(), handle);
        if let Some(old) = &old {
            old.cancel();
            tracing::info!(op = %self.op, key, job_id = %old.id(), "Superseded running job");
        }
        old
    }

    /// Install `handle` only if `key` is free. Check and insert happen under
    /// one write lock so two racing registrations cannot both win.
    fn try_add(&self, key: &str, mut handle: JobHandle) -> Result<(), JobError> {
        let mut jobs = self.write();
        if jobs.contains_key(key) {
            return Err(JobError::busy(&self.op, key));
        }
        handle.bind(&self.op, key);
        jobs.insert(key.to_string(), handle);
        Ok(())
    }

    pub fn exists(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<JobHandle> {
        self.read().get(key).cloned()
    }

    /// Cancel and remove the given keys. Missing keys are skipped.
    /// Returns how many handles were cancelled.
    pub fn cancel<I, S>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut jobs = self.write();
        let mut cancelled = 0;
        for key in keys {
            if let Some(handle) = jobs.remove(key.as_ref()) {
                handle.cancel();
                cancelled += 1;
                tracing::info!(op = %self.op, key = key.as_ref(), job_id = %handle.id(), "Cancelled job");
            }
        }
        if cancelled > 0 {
            counter!("toolbox_jobs_cancelled_total", "op" => self.op.clone())
                .increment(cancelled as u64);
        }
        cancelled
    }

    /// Cancel and remove every handle in the group.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<JobHandle> = self.write().drain().map(|(_, h)| h).collect();
        for handle in &drained {
            handle.cancel();
        }
        if !drained.is_empty() {
            tracing::info!(op = %self.op, count = drained.len(), "Cancelled all jobs");
            counter!("toolbox_jobs_cancelled_total", "op" => self.op.clone())
                .increment(drained.len() as u64);
        }
        drained.len()
    }

    /// Remove the handle under `key` if it is still the job `id`.
    ///
    /// A job finishing after it was superseded must not evict its successor.
    pub fn remove(&self, key: &str, id: JobId) -> bool {
        let mut jobs = self.write();
        match jobs.get(key) {
            Some(handle) if handle.id() == id => {
                jobs.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Snapshot of the group, oldest job first.
    pub fn list(&self) -> Vec<JobSnapshot> {
        let mut list: Vec<JobSnapshot> = self.read().values().map(JobHandle::snapshot).collect();
        list.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.cache_key.cmp(&b.cache_key)));
        list
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, JobHandle>> {
        self.jobs.read().unwrap_or_else(|e| {
            tracing::error!(op = %self.op, "RwLock poisoned reading job group: {e}");
            e.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, JobHandle>> {
        self.jobs.write().unwrap_or_else(|e| {
            tracing::error!(op = %self.op, "RwLock poisoned writing job group: {e}");
            e.into_inner()
        })
    }
}

/// Process-wide map from operation name to [`Group`].
///
/// Groups are created lazily on first registration and live as long as the
/// registry; only their keys are pruned.
#[derive(Debug, Default)]
pub struct Registry {
    groups: RwLock<HashMap<String, Arc<Group>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(&self, op: &str) -> Option<Arc<Group>> {
        self.read().get(op).cloned()
    }

    fn group_or_insert(&self, op: &str) -> Arc<Group> {
        if let Some(group) = self.group(op) {
            return group;
        }
        let mut groups = self.write();
        Arc::clone(
            groups
                .entry(op.to_string())
                .or_insert_with(|| Arc::new(Group::new(op))),
        )
    }

    /// Register `handle` as the job for `(op, key)`.
    ///
    /// Fails with [`JobError::Busy`] when a job is already registered under
    /// the key; the new handle is dropped and the running one is untouched.
    /// The group stays reachable through [`Registry::group`].
    pub fn register(&self, op: &str, key: &str, handle: JobHandle) -> Result<Arc<Group>, JobError> {
        let group = self.group_or_insert(op);
        let job_id = handle.id();
        match group.try_add(key, handle) {
            Ok(()) => {
                counter!("toolbox_jobs_registered_total", "op" => op.to_string()).increment(1);
                tracing::debug!(op, key, %job_id, "Registered job");
                Ok(group)
            }
            Err(err) => {
                counter!("toolbox_jobs_busy_total", "op" => op.to_string()).increment(1);
                tracing::info!(op, key, "Rejected duplicate job");
                Err(err)
            }
        }
    }

    /// Register `handle`, cancelling whatever currently runs under the key.
    pub fn replace(&self, op: &str, key: &str, handle: JobHandle) -> Arc<Group> {
        let group = self.group_or_insert(op);
        group.add(key, handle);
        counter!("toolbox_jobs_registered_total", "op" => op.to_string()).increment(1);
        group
    }

    /// Cancel and remove the given keys of `op`. Unknown ops and keys are
    /// no-ops. Returns how many jobs were cancelled.
    pub fn cancel<I, S>(&self, op: &str, keys: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.group(op).map_or(0, |group| group.cancel(keys))
    }

    /// Remove a job that completed normally.
    pub fn finish(&self, op: &str, key: &str, id: JobId) -> bool {
        self.group(op).is_some_and(|group| group.remove(key, id))
    }

    pub fn exists(&self, op: &str, key: &str) -> bool {
        self.group(op).is_some_and(|group| group.exists(key))
    }

    pub fn list_by(&self, op: &str) -> Vec<JobSnapshot> {
        self.group(op).map(|group| group.list()).unwrap_or_default()
    }

    /// Snapshots for every operation that currently has jobs.
    pub fn list_all(&self) -> BTreeMap<String, Vec<JobSnapshot>> {
        let groups: Vec<Arc<Group>> = self.read().values().cloned().collect();
        groups
            .into_iter()
            .filter_map(|group| {
                let list = group.list();
                (!list.is_empty()).then(|| (group.op().to_string(), list))
            })
            .collect()
    }

    /// Running job count per operation, including operations that have
    /// drained to zero.
    pub fn counts(&self) -> BTreeMap<String, usize> {
        let groups: Vec<Arc<Group>> = self.read().values().cloned().collect();
        groups
            .iter()
            .map(|group| (group.op().to_string(), group.len()))
            .collect()
    }

    /// Cancel every job in every group.
    pub fn cancel_all(&self) -> usize {
        let groups: Vec<Arc<Group>> = self.read().values().cloned().collect();
        groups.iter().map(|group| group.cancel_all()).sum()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Group>>> {
        self.groups.read().unwrap_or_else(|e| {
            tracing::error!("RwLock poisoned reading job registry: {e}");
            e.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Group>>> {
        self.groups.write().unwrap_or_else(|e| {
            tracing::error!("RwLock poisoned writing job registry: {e}");
            e.into_inner()
        })
    }
}

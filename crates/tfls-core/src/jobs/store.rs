// Dweve TFLS - Terraform Language Server
//
// Copyright (c) 2025 Dweve IP B.V. and individual contributors.
//
// SPDX-License-Identifier: Apache-2.0
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE file at the
// root of this repository or at: http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The job store: a dependency-aware, priority-ordered queue.
//!
//! # Design
//!
//! All state lives in one [`JobTable`] behind a mutex. Every transition
//! (enqueue, dequeue, finish, cancel) happens in a single critical section
//! and then wakes every waiter through a [`Notify`]; waiters re-check the
//! table after each wake-up.
//!
//! A job enters a ready queue only once all of its dependencies are done.
//! There is one ready queue per priority, ordered by
//! `(closed directory, enqueue sequence)`, so jobs for directories with open
//! documents run first within a priority and FIFO otherwise.
//!
//! Finishing a job marks it done, releases its dependents and enqueues the
//! batch returned by its defer continuation in the same critical section,
//! so a waiter can never observe a done job whose follow-ups are missing.

use super::job::{
    BatchEntry, BatchRef, DeferFn, Job, JobBatch, JobContext, JobFn, JobId, JobPriority, JobState,
    JobType,
};
use crate::constants::FINISHED_JOB_RETENTION;
use crate::context::RequestContext;
use crate::error::{JobError, JobResult, MultiError, StoreError, StoreResult};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Which priorities a dequeuer takes jobs from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// High first, then Low.
    All,
    /// A single priority.
    Only(JobPriority),
}

impl Lane {
    fn priorities(self) -> &'static [JobPriority] {
        match self {
            Self::All => &[JobPriority::High, JobPriority::Low],
            Self::Only(JobPriority::High) => &[JobPriority::High],
            Self::Only(JobPriority::Low) => &[JobPriority::Low],
        }
    }
}

/// Whether [`JobStore::wait_for_jobs`] reports job errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitPolicy {
    /// Return `Ok` once everything is done, regardless of errors.
    #[default]
    Ignore,
    /// Return the first job error found. State-skips are not errors.
    FirstError,
}

/// Point-in-time view of a job.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub id: JobId,
    pub dir: PathBuf,
    pub job_type: JobType,
    pub priority: JobPriority,
    pub state: JobState,
    pub depends_on: Vec<JobId>,
    pub ignore_state: bool,
    pub is_dir_open: bool,
    pub error: Option<JobError>,
    pub deferred: Vec<JobId>,
}

/// Job store counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStatistics {
    /// Jobs waiting for dependencies or a worker.
    pub queued: usize,
    /// Jobs currently executing.
    pub running: usize,
    /// Finished jobs still retained.
    pub done: usize,
    pub total_enqueued: u64,
    pub total_finished: u64,
    /// Finished with an error other than a state-skip or cancellation.
    pub total_failed: u64,
    /// Finished with `StateNotChanged`.
    pub total_skipped: u64,
    pub total_cancelled: u64,
}

/// Result of enqueueing a [`JobBatch`].
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// One slot per batch entry; `None` where the entry failed.
    pub ids: Vec<Option<JobId>>,
    /// Why entries failed.
    pub errors: MultiError,
}

impl BatchOutcome {
    /// ID assigned to a batch entry, if it was enqueued.
    pub fn id(&self, entry: BatchRef) -> Option<JobId> {
        self.ids.get(entry.index()).copied().flatten()
    }

    /// IDs of every enqueued entry.
    pub fn enqueued(&self) -> Vec<JobId> {
        self.ids.iter().flatten().copied().collect()
    }
}

/// A job handed to one worker.
pub struct ClaimedJob {
    pub context: JobContext,
    pub func: JobFn,
    pub defer: Option<DeferFn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    closed: bool,
    seq: u64,
    id: JobId,
}

struct JobEntry {
    id: JobId,
    dir: PathBuf,
    job_type: JobType,
    priority: JobPriority,
    state: JobState,
    depends_on: Vec<JobId>,
    pending_deps: usize,
    ignore_state: bool,
    dir_open: bool,
    seq: u64,
    func: Option<JobFn>,
    defer: Option<DeferFn>,
    context: RequestContext,
    error: Option<JobError>,
    deferred: Vec<JobId>,
}

impl JobEntry {
    fn queue_key(&self) -> QueueKey {
        QueueKey {
            closed: !self.dir_open,
            seq: self.seq,
            id: self.id,
        }
    }

    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            dir: self.dir.clone(),
            job_type: self.job_type,
            priority: self.priority,
            state: self.state,
            depends_on: self.depends_on.clone(),
            ignore_state: self.ignore_state,
            is_dir_open: self.dir_open,
            error: self.error.clone(),
            deferred: self.deferred.clone(),
        }
    }
}

struct JobTable {
    jobs: HashMap<JobId, JobEntry>,
    ready: [BTreeSet<QueueKey>; 2],
    /// dependency -> jobs waiting on it
    dependents: HashMap<JobId, Vec<JobId>>,
    open_dirs: HashSet<PathBuf>,
    finished: VecDeque<JobId>,
    next_id: u64,
    next_seq: u64,
    retention: usize,
    stats: JobStatistics,
}

impl JobTable {
    fn new(retention: usize) -> Self {
        Self {
            jobs: HashMap::new(),
            ready: [BTreeSet::new(), BTreeSet::new()],
            dependents: HashMap::new(),
            open_dirs: HashSet::new(),
            finished: VecDeque::new(),
            next_id: 1,
            next_seq: 0,
            retention,
            stats: JobStatistics::default(),
        }
    }

    fn was_issued(&self, id: JobId) -> bool {
        id.as_u64() != 0 && id.as_u64() < self.next_id
    }

    fn insert(&mut self, job: Job) -> StoreResult<JobId> {
        let Job {
            dir,
            job_type,
            func,
            priority,
            mut depends_on,
            ignore_state,
            defer,
            context,
        } = job;

        depends_on.sort();
        depends_on.dedup();
        if let Some(unknown) = depends_on.iter().find(|d| !self.was_issued(**d)) {
            return Err(StoreError::JobNotFound(*unknown));
        }

        let id = JobId::from(self.next_id);
        self.next_id += 1;
        let seq = self.next_seq;
        self.next_seq += 1;

        let mut pending_deps = 0;
        for dep in &depends_on {
            // evicted dependencies are done
            if let Some(entry) = self.jobs.get(dep) {
                if entry.state != JobState::Done {
                    pending_deps += 1;
                    self.dependents.entry(*dep).or_default().push(id);
                }
            }
        }

        let entry = JobEntry {
            id,
            dir_open: self.open_dirs.contains(&dir),
            dir,
            job_type,
            priority,
            state: JobState::Queued,
            depends_on,
            pending_deps,
            ignore_state,
            seq,
            func: Some(func),
            defer,
            context,
            error: None,
            deferred: Vec::new(),
        };
        debug!(
            "jobs: enqueued {} {} for {:?} (deps: {:?})",
            id, entry.job_type, entry.dir, entry.depends_on
        );
        if pending_deps == 0 {
            self.ready[priority.lane_index()].insert(entry.queue_key());
        }
        self.jobs.insert(id, entry);
        self.stats.total_enqueued += 1;
        Ok(id)
    }

    fn insert_batch(&mut self, batch: JobBatch) -> BatchOutcome {
        let mut outcome = BatchOutcome {
            ids: Vec::with_capacity(batch.entries.len()),
            errors: MultiError::new(),
        };
        for (index, entry) in batch.entries.into_iter().enumerate() {
            let BatchEntry { mut job, after } = entry;
            let mut failed_dep = None;
            for earlier in &after {
                // only earlier entries can be referenced
                match outcome.ids.get(earlier.index()) {
                    Some(Some(id)) => job.depends_on.push(*id),
                    _ => {
                        failed_dep = Some(earlier.index());
                        break;
                    }
                }
            }
            if let Some(dependency) = failed_dep {
                outcome
                    .errors
                    .push(StoreError::BatchDependency { index, dependency });
                outcome.ids.push(None);
                continue;
            }
            match self.insert(job) {
                Ok(id) => outcome.ids.push(Some(id)),
                Err(err) => {
                    outcome.errors.push(err);
                    outcome.ids.push(None);
                }
            }
        }
        outcome
    }

    /// Mark a job done with the given outcome and release its dependents.
    fn complete(&mut self, id: JobId, outcome: JobResult) {
        let Some(entry) = self.jobs.get_mut(&id) else {
            return;
        };
        if entry.state == JobState::Done {
            return;
        }
        if entry.state == JobState::Queued {
            let key = entry.queue_key();
            self.ready[entry.priority.lane_index()].remove(&key);
        }
        entry.state = JobState::Done;
        entry.func = None;
        entry.defer = None;
        if let Err(err) = outcome {
            if err.is_state_not_changed() {
                self.stats.total_skipped += 1;
            } else if err.is_cancelled() {
                self.stats.total_cancelled += 1;
            } else {
                self.stats.total_failed += 1;
            }
            entry.error = Some(err);
        }
        self.stats.total_finished += 1;
        self.finished.push_back(id);

        for dependent in self.dependents.remove(&id).unwrap_or_default() {
            if let Some(entry) = self.jobs.get_mut(&dependent) {
                entry.pending_deps = entry.pending_deps.saturating_sub(1);
                if entry.pending_deps == 0 && entry.state == JobState::Queued {
                    self.ready[entry.priority.lane_index()].insert(entry.queue_key());
                }
            }
        }
    }

    fn try_dequeue(&mut self, lane: Lane) -> (Option<ClaimedJob>, bool) {
        let mut changed = false;
        loop {
            let next = lane.priorities().iter().find_map(|p| {
                let idx = p.lane_index();
                self.ready[idx].iter().next().copied().map(|key| (idx, key))
            });
            let Some((idx, key)) = next else {
                return (None, changed);
            };
            self.ready[idx].remove(&key);

            let Some(entry) = self.jobs.get_mut(&key.id) else {
                continue;
            };
            if entry.context.is_cancelled() {
                debug!("jobs: {} {} cancelled before start", entry.id, entry.job_type);
                self.complete(key.id, Err(JobError::Cancelled));
                changed = true;
                continue;
            }
            let Some(func) = entry.func.take() else {
                self.complete(key.id, Err(JobError::failed("job function already taken")));
                changed = true;
                continue;
            };
            entry.state = JobState::Running;
            let context = JobContext {
                id: entry.id,
                dir: entry.dir.clone(),
                job_type: entry.job_type,
                ignore_state: entry.ignore_state,
                request: entry.context.clone(),
            };
            let claimed = ClaimedJob {
                context,
                func,
                defer: entry.defer.take(),
            };
            return (Some(claimed), true);
        }
    }

    fn descendants_done(&self, id: JobId) -> bool {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            if let Some(entry) = self.jobs.get(&id) {
                if entry.state != JobState::Done {
                    return false;
                }
                stack.extend(entry.deferred.iter().copied());
            }
        }
        true
    }

    fn evict(&mut self) {
        let mut attempts = self.finished.len();
        while self.finished.len() > self.retention && attempts > 0 {
            attempts -= 1;
            let Some(id) = self.finished.pop_front() else {
                break;
            };
            if self.descendants_done(id) {
                self.jobs.remove(&id);
                self.dependents.remove(&id);
            } else {
                self.finished.push_back(id);
            }
        }
    }

    /// `Ok(true)` once every job in `ids` and everything deferred from them
    /// is done.
    fn all_done(&self, ids: &[JobId], policy: WaitPolicy) -> Result<bool, JobError> {
        let mut stack: Vec<JobId> = ids.to_vec();
        let mut seen = HashSet::new();
        let mut done = true;
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if !self.was_issued(id) {
                return Err(StoreError::JobNotFound(id).into());
            }
            let Some(entry) = self.jobs.get(&id) else {
                continue;
            };
            if entry.state != JobState::Done {
                done = false;
                continue;
            }
            if policy == WaitPolicy::FirstError {
                if let Some(err) = &entry.error {
                    if !err.is_state_not_changed() {
                        return Err(err.clone());
                    }
                }
            }
            stack.extend(entry.deferred.iter().copied());
        }
        Ok(done)
    }

    fn statistics(&self) -> JobStatistics {
        let mut stats = self.stats.clone();
        for entry in self.jobs.values() {
            match entry.state {
                JobState::Queued => stats.queued += 1,
                JobState::Running => stats.running += 1,
                JobState::Done => stats.done += 1,
            }
        }
        stats
    }
}

/// Dependency-aware job queue shared by features and schedulers.
///
/// # Thread Safety
///
/// All methods take `&self`; share the store with `Arc<JobStore>`.
pub struct JobStore {
    table: Mutex<JobTable>,
    notify: Notify,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    /// Create a store with the default finished-job retention.
    pub fn new() -> Self {
        Self::with_retention(FINISHED_JOB_RETENTION)
    }

    /// Create a store keeping at most `retention` finished jobs whose
    /// deferred jobs are also finished.
    pub fn with_retention(retention: usize) -> Self {
        Self {
            table: Mutex::new(JobTable::new(retention)),
            notify: Notify::new(),
        }
    }

    /// Enqueue one job.
    ///
    /// Fails with `JobNotFound` if a dependency was never issued by this
    /// store. Dependencies that were evicted count as done.
    pub fn enqueue(&self, job: Job) -> StoreResult<JobId> {
        let id = self.table.lock().insert(job)?;
        self.notify.notify_waiters();
        Ok(id)
    }

    /// Enqueue a batch. Entries that cannot be enqueued are reported in the
    /// outcome's errors; the remaining entries are still enqueued.
    pub fn enqueue_batch(&self, batch: JobBatch) -> BatchOutcome {
        if batch.is_empty() {
            return BatchOutcome::default();
        }
        let outcome = self.table.lock().insert_batch(batch);
        self.notify.notify_waiters();
        outcome
    }

    /// Claim the next eligible job without waiting.
    pub fn try_next_job(&self, lane: Lane) -> Option<ClaimedJob> {
        let (claimed, changed) = self.table.lock().try_dequeue(lane);
        if changed {
            self.notify.notify_waiters();
        }
        claimed
    }

    /// Wait for and claim the next eligible job on `lane`.
    ///
    /// Returns `Err(StoreError::Cancelled)` once `cancel` fires.
    pub async fn next_job(&self, lane: Lane, cancel: &CancellationToken) -> StoreResult<ClaimedJob> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            if let Some(claimed) = self.try_next_job(lane) {
                return Ok(claimed);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                _ = &mut notified => {}
            }
        }
    }

    /// Record the outcome of a claimed job and enqueue its deferred batch.
    ///
    /// Returns the outcome of enqueueing the batch.
    pub fn finish_job(&self, id: JobId, outcome: JobResult, batch: JobBatch) -> StoreResult<BatchOutcome> {
        let deferred = {
            let mut table = self.table.lock();
            match table.jobs.get(&id) {
                None => return Err(StoreError::JobNotFound(id)),
                Some(entry) if entry.state == JobState::Done => {
                    warn!("jobs: {} {} finished twice, ignoring", id, entry.job_type);
                    return Ok(BatchOutcome::default());
                }
                Some(_) => {}
            }
            table.complete(id, outcome);
            let deferred = table.insert_batch(batch);
            if let Some(entry) = table.jobs.get_mut(&id) {
                entry.deferred = deferred.enqueued();
            }
            table.evict();
            deferred
        };
        self.notify.notify_waiters();
        if !deferred.errors.is_empty() {
            warn!("jobs: deferred jobs of {} not enqueued: {}", id, deferred.errors);
        }
        Ok(deferred)
    }

    /// Wait until every listed job and every job deferred from them,
    /// recursively, is done.
    pub async fn wait_for_jobs(
        &self,
        cancel: &CancellationToken,
        ids: &[JobId],
        policy: WaitPolicy,
    ) -> JobResult {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let done = self.table.lock().all_done(ids, policy)?;
            if done {
                return Ok(());
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(StoreError::Cancelled.into()),
                _ = &mut notified => {}
            }
        }
    }

    /// Mark whether `dir` has open documents; reorders its queued jobs.
    pub fn set_dir_open(&self, dir: &Path, open: bool) {
        let mut table = self.table.lock();
        let changed = if open {
            table.open_dirs.insert(dir.to_path_buf())
        } else {
            table.open_dirs.remove(dir)
        };
        if !changed {
            return;
        }
        let table = &mut *table;
        for entry in table.jobs.values_mut() {
            if entry.dir != dir || entry.state != JobState::Queued {
                continue;
            }
            let old = entry.queue_key();
            entry.dir_open = open;
            let lane = &mut table.ready[entry.priority.lane_index()];
            if lane.remove(&old) {
                lane.insert(entry.queue_key());
            }
        }
        debug!("jobs: {:?} marked {}", dir, if open { "open" } else { "closed" });
    }

    pub fn is_dir_open(&self, dir: &Path) -> bool {
        self.table.lock().open_dirs.contains(dir)
    }

    /// Cancel every queued job of `dir`. Returns how many were cancelled.
    pub fn dequeue_jobs_for_dir(&self, dir: &Path) -> usize {
        let count = {
            let mut table = self.table.lock();
            let ids: Vec<JobId> = table
                .jobs
                .values()
                .filter(|e| e.dir == dir && e.state == JobState::Queued)
                .map(|e| e.id)
                .collect();
            for id in &ids {
                table.complete(*id, Err(JobError::Cancelled));
            }
            table.evict();
            ids.len()
        };
        if count > 0 {
            debug!("jobs: dequeued {} jobs for {:?}", count, dir);
            self.notify.notify_waiters();
        }
        count
    }

    /// Snapshot of one job, if it is still retained.
    pub fn job(&self, id: JobId) -> Option<JobSnapshot> {
        self.table.lock().jobs.get(&id).map(JobEntry::snapshot)
    }

    /// All queued jobs, in enqueue order.
    pub fn list_queued_jobs(&self) -> Vec<JobSnapshot> {
        let table = self.table.lock();
        let mut jobs: Vec<&JobEntry> = table
            .jobs
            .values()
            .filter(|e| e.state == JobState::Queued)
            .collect();
        jobs.sort_by_key(|e| e.seq);
        jobs.into_iter().map(JobEntry::snapshot).collect()
    }

    /// Queued and running jobs of one directory, in enqueue order.
    pub fn list_incomplete_jobs_for_dir(&self, dir: &Path) -> Vec<JobSnapshot> {
        let table = self.table.lock();
        let mut jobs: Vec<&JobEntry> = table
            .jobs
            .values()
            .filter(|e| e.dir == dir && e.state != JobState::Done)
            .collect();
        jobs.sort_by_key(|e| e.seq);
        jobs.into_iter().map(JobEntry::snapshot).collect()
    }

    pub fn statistics(&self) -> JobStatistics {
        self.table.lock().statistics()
    }
}

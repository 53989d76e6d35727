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

//! Job descriptors.
//!
//! A [`Job`] is a unit of indexing work on one directory: an async function
//! plus scheduling metadata. Jobs are built with a small builder and handed
//! to [`JobStore::enqueue`](super::JobStore::enqueue), or grouped in a
//! [`JobBatch`] when entries depend on each other.

use crate::context::RequestContext;
use crate::error::{JobError, JobResult};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};

/// Opaque job identifier, unique within a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for JobId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operation tag of a job, e.g. `ParseModuleConfiguration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobType(pub &'static str);

impl JobType {
    pub fn as_str(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Scheduling priority. Network-bound work is `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JobPriority {
    #[default]
    High,
    Low,
}

impl JobPriority {
    pub(crate) fn lane_index(self) -> usize {
        match self {
            Self::High => 0,
            Self::Low => 1,
        }
    }
}

/// Lifecycle of a job in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Queued,
    Running,
    Done,
}

/// What a running job sees.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub id: JobId,
    pub dir: PathBuf,
    pub job_type: JobType,
    /// When `false`, the job should return [`JobError::StateNotChanged`] if
    /// its target field is no longer `Unknown`.
    pub ignore_state: bool,
    pub request: RequestContext,
}

impl JobContext {
    pub fn is_cancelled(&self) -> bool {
        self.request.is_cancelled()
    }

    /// Returns `Err(JobError::Cancelled)` once the request was cancelled.
    pub fn check_cancelled(&self) -> JobResult {
        if self.request.is_cancelled() {
            Err(JobError::Cancelled)
        } else {
            Ok(())
        }
    }
}

pub type JobFuture = BoxFuture<'static, JobResult>;

/// The work of a job.
pub type JobFn = Box<dyn FnOnce(JobContext) -> JobFuture + Send>;

/// Continuation evaluated after the job finished. Returns follow-up jobs,
/// which the store enqueues in the same step that marks the job done.
pub type DeferFn = Box<dyn FnOnce(&JobContext, Option<&JobError>) -> JobBatch + Send>;

/// A job waiting to be enqueued.
pub struct Job {
    pub(crate) dir: PathBuf,
    pub(crate) job_type: JobType,
    pub(crate) func: JobFn,
    pub(crate) priority: JobPriority,
    pub(crate) depends_on: Vec<JobId>,
    pub(crate) ignore_state: bool,
    pub(crate) defer: Option<DeferFn>,
    pub(crate) context: RequestContext,
}

impl Job {
    /// Create a high priority job with no dependencies.
    pub fn new<F, Fut>(dir: impl Into<PathBuf>, job_type: JobType, func: F) -> Self
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        Self {
            dir: dir.into(),
            job_type,
            func: Box::new(move |ctx| func(ctx).boxed()),
            priority: JobPriority::High,
            depends_on: Vec::new(),
            ignore_state: false,
            defer: None,
            context: RequestContext::background(),
        }
    }

    pub fn priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Add dependencies on already enqueued jobs.
    pub fn depends_on(mut self, ids: impl IntoIterator<Item = JobId>) -> Self {
        self.depends_on.extend(ids);
        self
    }

    pub fn ignore_state(mut self, ignore: bool) -> Self {
        self.ignore_state = ignore;
        self
    }

    pub fn defer<F>(mut self, defer: F) -> Self
    where
        F: FnOnce(&JobContext, Option<&JobError>) -> JobBatch + Send + 'static,
    {
        self.defer = Some(Box::new(defer));
        self
    }

    pub fn context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("dir", &self.dir)
            .field("job_type", &self.job_type)
            .field("priority", &self.priority)
            .field("depends_on", &self.depends_on)
            .field("ignore_state", &self.ignore_state)
            .field("defer", &self.defer.is_some())
            .finish()
    }
}

/// Position of an entry within a [`JobBatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchRef(pub(crate) usize);

impl BatchRef {
    pub fn index(self) -> usize {
        self.0
    }
}

pub(crate) struct BatchEntry {
    pub(crate) job: Job,
    pub(crate) after: Vec<BatchRef>,
}

/// Jobs enqueued together, where entries may depend on earlier entries.
///
/// ```
/// use tfls_core::jobs::{Job, JobBatch, JobType};
///
/// const PARSE: JobType = JobType("Parse");
/// const DECODE: JobType = JobType("Decode");
///
/// let mut batch = JobBatch::new();
/// let parse = batch.push(Job::new("/w/app", PARSE, |_| async { Ok(()) }));
/// batch.push_after(Job::new("/w/app", DECODE, |_| async { Ok(()) }), &[parse]);
/// assert_eq!(batch.len(), 2);
/// ```
#[derive(Default)]
pub struct JobBatch {
    pub(crate) entries: Vec<BatchEntry>,
}

impl JobBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job without batch-local dependencies.
    pub fn push(&mut self, job: Job) -> BatchRef {
        self.push_after(job, &[])
    }

    /// Add a job that runs after the given earlier entries.
    pub fn push_after(&mut self, job: Job, after: &[BatchRef]) -> BatchRef {
        let index = self.entries.len();
        self.entries.push(BatchEntry {
            job,
            after: after.to_vec(),
        });
        BatchRef(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Job types in insertion order.
    pub fn job_types(&self) -> Vec<JobType> {
        self.entries.iter().map(|e| e.job.job_type).collect()
    }
}

impl fmt::Debug for JobBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| (&e.job, &e.after)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARSE: JobType = JobType("Parse");

    #[test]
    fn test_builder_defaults() {
        let job = Job::new("/w", PARSE, |_| async { Ok(()) });
        assert_eq!(job.priority, JobPriority::High);
        assert!(!job.ignore_state);
        assert!(job.depends_on.is_empty());
        assert!(job.defer.is_none());
        assert_eq!(job.dir(), Path::new("/w"));
    }

    #[test]
    fn test_builder_chain() {
        let job = Job::new("/w", PARSE, |_| async { Ok(()) })
            .priority(JobPriority::Low)
            .ignore_state(true)
            .depends_on([JobId::from(3), JobId::from(4)])
            .defer(|_, _| JobBatch::new());
        assert_eq!(job.priority, JobPriority::Low);
        assert!(job.ignore_state);
        assert_eq!(job.depends_on, vec![JobId::from(3), JobId::from(4)]);
        assert!(job.defer.is_some());
    }

    #[test]
    fn test_batch_refs_are_positions() {
        let mut batch = JobBatch::new();
        let a = batch.push(Job::new("/w", PARSE, |_| async { Ok(()) }));
        let b = batch.push_after(Job::new("/w", PARSE, |_| async { Ok(()) }), &[a]);
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(batch.entries[1].after, vec![a]);
    }

    #[test]
    fn test_job_id_display() {
        assert_eq!(JobId::from(42).to_string(), "42");
        assert_eq!(JobType("Parse").to_string(), "Parse");
    }
}

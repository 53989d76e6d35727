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

//! Error types for the indexing core.
//!
//! - [`StoreError`]: record table and job store failures. Callers branch on
//!   the variant, e.g. `AlreadyExists` is expected when re-adding a module.
//! - [`JobError`]: outcome of a job function. `StateNotChanged` is a control
//!   signal, not a failure.
//! - [`MultiError`]: aggregate of independent failures, e.g. one per module
//!   call that could not be scheduled.
//! - [`BusError`]: event bus backpressure.
//! - [`DocumentError`]: rejected document operations.

use crate::jobs::JobId;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Record table and job store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// No record exists for the path.
    #[error("record not found: {}", .0.display())]
    RecordNotFound(PathBuf),

    /// A record for the path already exists.
    #[error("record already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// The job ID was never issued by this store.
    #[error("job {0} not found")]
    JobNotFound(JobId),

    /// A batch entry depends on an earlier entry that was not enqueued.
    #[error("batch entry {index} depends on entry {dependency}, which was not enqueued")]
    BatchDependency { index: usize, dependency: usize },

    /// The wait or dequeue was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a failed or skipped job.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// The target field was already loading or loaded and the job was not
    /// asked to ignore state.
    #[error("{}: state not changed", .dir.display())]
    StateNotChanged { dir: PathBuf },

    /// The job's request context was cancelled.
    #[error("job cancelled")]
    Cancelled,

    /// The job function panicked.
    #[error("job panicked: {0}")]
    Panicked(String),

    /// Filesystem access failed.
    #[error("{}: {message}", .path.display())]
    Io { path: PathBuf, message: String },

    /// Any other failure reported by a job function.
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Multi(#[from] MultiError),
}

impl JobError {
    /// Create a `StateNotChanged` signal for a directory.
    pub fn state_not_changed(dir: impl Into<PathBuf>) -> Self {
        Self::StateNotChanged { dir: dir.into() }
    }

    /// Create a generic failure.
    pub fn failed(message: impl fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }

    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Returns `true` for the state-skip control signal.
    pub fn is_state_not_changed(&self) -> bool {
        matches!(self, Self::StateNotChanged { .. })
    }

    /// Returns `true` if the job did not run because it was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Store(StoreError::Cancelled))
    }
}

/// Result alias for job functions.
pub type JobResult = Result<(), JobError>;

/// A list of independent errors reported together.
///
/// Renders as:
///
/// ```text
/// 2 errors occurred:
///     * first
///     * second
/// ```
#[derive(Debug, Clone, Default)]
pub struct MultiError {
    errors: Vec<JobError>,
}

impl MultiError {
    /// Create an empty aggregate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an error.
    pub fn push(&mut self, err: impl Into<JobError>) {
        self.errors.push(err.into());
    }

    /// Append all errors of another aggregate.
    pub fn extend(&mut self, other: MultiError) {
        self.errors.extend(other.errors);
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// The collected errors in insertion order.
    pub fn errors(&self) -> &[JobError] {
        &self.errors
    }

    /// `Ok(())` when empty, otherwise `Err(self)`.
    pub fn into_result(self) -> Result<(), MultiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.len() == 1 {
            writeln!(f, "1 error occurred:")?;
        } else {
            writeln!(f, "{} errors occurred:", self.errors.len())?;
        }
        for err in &self.errors {
            writeln!(f, "\t* {}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

impl FromIterator<JobError> for MultiError {
    fn from_iter<I: IntoIterator<Item = JobError>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

/// Event bus errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    /// One or more subscribers did not accept the event in time.
    #[error("bus: publish to {topic} timed out for {}", .subscribers.join(", "))]
    Timeout {
        topic: &'static str,
        subscribers: Vec<String>,
    },
}

/// Document store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("document {} is {size} bytes, limit is {max}", .path.display())]
    TooLarge { path: PathBuf, size: usize, max: usize },

    #[error("document not open: {}", .0.display())]
    NotOpen(PathBuf),

    #[error("invalid position {line}:{character} in {}", .path.display())]
    InvalidPosition {
        path: PathBuf,
        line: u32,
        character: u32,
    },

    #[error("path has no parent directory: {}", .0.display())]
    NoDirectory(PathBuf),
}

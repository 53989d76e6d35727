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

//! Incremental indexing core for the tfls Terraform language server.
//!
//! This crate holds the machinery that keeps the index of a workspace up to
//! date while the user edits: a dependency-aware job store, the workers
//! that drain it, copy-on-write record tables for per-directory results and
//! the event bus that connects editor notifications to feature modules.
//!
//! # Architecture
//!
//! - [`jobs`]: job descriptors, batches and the [`JobStore`]
//! - [`scheduler`]: worker pools bound to a priority lane
//! - [`state`]: [`Loadable`] fields and [`RecordTable`]s
//! - [`eventbus`]: typed topics with bounded per-subscriber queues
//! - [`documents`]: open document text, mirrored into the job store's
//!   open-directory marks
//! - [`fs`]: read-only filesystem views used by jobs
//! - [`context`]: cancellation and tracing carried from events to jobs
//!
//! # Data Flow
//!
//! ```text
//! editor / walker -> EventBus -> feature -> RecordTable (ensure record)
//!                                        -> JobStore (enqueue DAG)
//! Scheduler workers -> job function -> RecordTable (store results)
//!                   -> Defer -> JobStore (follow-up jobs)
//! ```

pub mod constants;
pub mod context;
pub mod documents;
pub mod error;
pub mod eventbus;
pub mod fs;
pub mod jobs;
pub mod language;
pub mod scheduler;
pub mod state;

pub use context::RequestContext;
pub use documents::{DocumentHandle, DocumentStatistics, DocumentStore, Position, TextChange};
pub use error::{BusError, DocumentError, JobError, JobResult, MultiError, StoreError, StoreResult};
pub use eventbus::{
    ChangeType, DidChangeEvent, DidChangeWatchedEvent, DidOpenEvent, DiscoverEvent,
    DocumentChangedEvent, EventBus, Subscription, Topic,
};
pub use fs::{DirEntry, OsFs, OverlayFs, ReadOnlyFs};
pub use jobs::{
    BatchRef, Job, JobBatch, JobContext, JobId, JobPriority, JobState, JobStore, JobType, Lane,
    WaitPolicy,
};
pub use language::LanguageId;
pub use scheduler::Scheduler;
pub use state::{Loadable, OpState, Record, RecordChange, RecordChangeKind, RecordTable};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

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

//! Indexing core constants.
//!
//! This module centralizes the tuning values of the job store, the event bus
//! and the document store with the rationale for each value.
//!
//! # Organization
//!
//! - **Event Bus**: Subscriber buffering
//! - **Scheduling**: Worker counts and job retention
//! - **Module Graph**: Recursion bounds for module calls
//! - **Documents**: Open document limits

// ============================================================================
// Event Bus
// ============================================================================

/// Capacity of each subscriber's event buffer.
///
/// **Rationale**: A small buffer keeps a slow feature from accumulating an
/// unbounded backlog of stale events. Once a subscriber has 10 undelivered
/// events, `publish` waits, which slows the producer (the walker or the LSP
/// notification handler) to the speed of the slowest consumer.
///
/// **Trade-offs**:
/// - Larger buffers absorb bursts (e.g. the initial walk of a big monorepo)
///   but delay backpressure
/// - Smaller buffers make publishers block more often
pub const EVENT_CHANNEL_CAPACITY: usize = 10;

/// Default time `publish_timeout` waits on a full subscriber buffer.
///
/// **Rationale**: Used by producers that must not stall indefinitely, such
/// as the file watcher handler. Two seconds is long enough for a feature to
/// drain a full buffer under normal load.
pub const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 2_000;

/// Buffer of the broadcast channel carrying record table changes.
///
/// **Rationale**: Change notifications are advisory (a lagging receiver is
/// told how many it missed and can re-list the table), so the buffer only
/// needs to cover one burst of commits from a directory walk.
pub const RECORD_CHANGE_CAPACITY: usize = 256;

// ============================================================================
// Scheduling
// ============================================================================

/// Default number of workers draining the high priority lane.
///
/// **Rationale**: High priority jobs are CPU-bound (parsing, decoding). Two
/// workers keep the editor responsive on small machines while still letting
/// the open directory and its module calls index in parallel.
pub const DEFAULT_PARALLELISM: usize = 2;

/// Default number of workers draining the low priority lane.
///
/// **Rationale**: Low priority jobs wait on the network or on the Terraform
/// binary. A single worker bounds concurrent registry requests and child
/// processes.
pub const DEFAULT_LOW_PRIORITY_PARALLELISM: usize = 1;

/// Number of finished jobs kept for inspection and completion barriers.
///
/// **Rationale**: Callers wait on job IDs after enqueueing them; keeping
/// recent finished jobs lets a late waiter still read their outcome. Jobs
/// beyond this bound are evicted oldest first once they and every job
/// deferred from them are done. Evicted IDs still count as finished.
///
/// **Trade-offs**:
/// - Larger values keep more errors inspectable but grow memory linearly
/// - Smaller values lose error detail sooner for slow waiters
pub const FINISHED_JOB_RETENTION: usize = 1_024;

// ============================================================================
// Module Graph
// ============================================================================

/// Maximum depth when following local module calls recursively.
///
/// **Rationale**: Real configurations rarely nest local modules more than a
/// handful of levels. The bound stops runaway recursion on pathological
/// layouts that the visited set does not catch, such as symlinked trees that
/// produce distinct paths for the same directory.
pub const MAX_MODULE_NESTING: usize = 50;

// ============================================================================
// Documents
// ============================================================================

/// Bytes per megabyte (1024 * 1024).
pub const BYTES_PER_MEGABYTE: usize = 1024 * 1024;

/// Default maximum size of an open document (16 MB).
///
/// **Rationale**: Terraform files are small; anything larger is almost
/// certainly generated. Matches the parser's default file size limit so a
/// document accepted here is never rejected during parsing.
pub const DEFAULT_MAX_DOCUMENT_SIZE: usize = 16 * BYTES_PER_MEGABYTE;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_channel_capacity() {
        assert_eq!(EVENT_CHANNEL_CAPACITY, 10);
    }

    #[test]
    fn test_worker_defaults_are_non_zero() {
        assert!(DEFAULT_PARALLELISM > 0);
        assert!(DEFAULT_LOW_PRIORITY_PARALLELISM > 0);
    }

    #[test]
    fn test_document_limit() {
        assert_eq!(DEFAULT_MAX_DOCUMENT_SIZE, 16 * 1024 * 1024);
    }
}

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

//! Scheduling behaviour of the job store and worker pools.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tfls_core::{
    Job, JobBatch, JobError, JobPriority, JobState, JobStore, JobType, Lane, Loadable, OpState,
    Record, RecordTable, RequestContext, Scheduler, StoreError, WaitPolicy,
};
use tokio_util::sync::CancellationToken;

const PARSE: JobType = JobType("ParseModuleConfiguration");
const META: JobType = JobType("LoadModuleMetadata");
const TARGETS: JobType = JobType("DecodeReferenceTargets");
const REGISTRY: JobType = JobType("GetModuleDataFromRegistry");

#[derive(Debug, Clone)]
struct ModuleRecord {
    path: PathBuf,
    parsed: Loadable<String>,
}

impl Record for ModuleRecord {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            parsed: Loadable::default(),
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_job(table: Arc<RecordTable<ModuleRecord>>, dir: &str, text: &'static str) -> Job {
    Job::new(dir, PARSE, move |ctx| async move {
        let record = table.get(&ctx.dir)?;
        if !ctx.ignore_state && record.parsed.state() != OpState::Unknown {
            return Err(JobError::state_not_changed(&ctx.dir));
        }
        table.update(&ctx.dir, |r| r.parsed.set_loading())?;
        table.update(&ctx.dir, |r| r.parsed.set(Some(text.to_string()), None))?;
        Ok(())
    })
}

fn recording_job(order: Arc<Mutex<Vec<String>>>, dir: &str, label: &'static str) -> Job {
    Job::new(dir, PARSE, move |_| async move {
        order.lock().unwrap().push(label.to_string());
        Ok(())
    })
}

// ============================================================================
// Priority ordering
// ============================================================================

#[test]
fn test_high_before_low_then_fifo() {
    let store = JobStore::new();
    let low = store
        .enqueue(Job::new("/a", REGISTRY, |_| async { Ok(()) }).priority(JobPriority::Low))
        .unwrap();
    let first = store.enqueue(Job::new("/a", PARSE, |_| async { Ok(()) })).unwrap();
    let second = store.enqueue(Job::new("/b", PARSE, |_| async { Ok(()) })).unwrap();

    let order: Vec<_> = std::iter::from_fn(|| store.try_next_job(Lane::All))
        .map(|c| c.context.id)
        .collect();
    assert_eq!(order, vec![first, second, low]);
}

#[test]
fn test_open_dir_first_within_priority() {
    let store = JobStore::new();
    let closed = store.enqueue(Job::new("/closed", PARSE, |_| async { Ok(()) })).unwrap();
    let open = store.enqueue(Job::new("/open", PARSE, |_| async { Ok(()) })).unwrap();
    store.set_dir_open(Path::new("/open"), true);

    assert_eq!(store.try_next_job(Lane::All).unwrap().context.id, open);
    assert_eq!(store.try_next_job(Lane::All).unwrap().context.id, closed);
}

#[test]
fn test_open_dir_does_not_beat_priority() {
    let store = JobStore::new();
    store.set_dir_open(Path::new("/open"), true);
    let low_open = store
        .enqueue(Job::new("/open", REGISTRY, |_| async { Ok(()) }).priority(JobPriority::Low))
        .unwrap();
    let high_closed = store.enqueue(Job::new("/closed", PARSE, |_| async { Ok(()) })).unwrap();

    assert_eq!(store.try_next_job(Lane::All).unwrap().context.id, high_closed);
    assert_eq!(store.try_next_job(Lane::All).unwrap().context.id, low_open);
}

#[test]
fn test_lane_binding() {
    let store = JobStore::new();
    store
        .enqueue(Job::new("/a", REGISTRY, |_| async { Ok(()) }).priority(JobPriority::Low))
        .unwrap();
    assert!(store.try_next_job(Lane::Only(JobPriority::High)).is_none());
    assert!(store.try_next_job(Lane::Only(JobPriority::Low)).is_some());
}

#[tokio::test]
async fn test_single_worker_executes_in_priority_order() {
    let store = Arc::new(JobStore::new());
    let order = Arc::new(Mutex::new(Vec::new()));

    let ids = vec![
        store
            .enqueue(recording_job(Arc::clone(&order), "/c", "low").priority(JobPriority::Low))
            .unwrap(),
        store.enqueue(recording_job(Arc::clone(&order), "/c", "closed")).unwrap(),
        store.enqueue(recording_job(Arc::clone(&order), "/o", "open")).unwrap(),
    ];
    store.set_dir_open(Path::new("/o"), true);

    let scheduler = Scheduler::new(Arc::clone(&store), 1, Lane::All);
    scheduler.start();
    store
        .wait_for_jobs(&CancellationToken::new(), &ids, WaitPolicy::FirstError)
        .await
        .unwrap();
    scheduler.stop().await;

    assert_eq!(*order.lock().unwrap(), vec!["open", "closed", "low"]);
}

// ============================================================================
// State-skip idempotence
// ============================================================================

#[tokio::test]
async fn test_second_parse_is_skipped() {
    let store = Arc::new(JobStore::new());
    let table: Arc<RecordTable<ModuleRecord>> = Arc::new(RecordTable::new("modules"));
    table.add(Path::new("/m")).unwrap();

    let scheduler = Scheduler::new(Arc::clone(&store), 2, Lane::All);
    scheduler.start();

    let first = store
        .enqueue(parse_job(Arc::clone(&table), "/m", "first").ignore_state(true))
        .unwrap();
    store
        .wait_for_jobs(&CancellationToken::new(), &[first], WaitPolicy::FirstError)
        .await
        .unwrap();
    let after_first = table.get(Path::new("/m")).unwrap();
    assert_eq!(after_first.parsed.data().map(String::as_str), Some("first"));

    let second = store.enqueue(parse_job(Arc::clone(&table), "/m", "second")).unwrap();
    store
        .wait_for_jobs(&CancellationToken::new(), &[second], WaitPolicy::FirstError)
        .await
        .unwrap();
    scheduler.stop().await;

    let snapshot = store.job(second).unwrap();
    assert!(snapshot.error.as_ref().map_or(false, JobError::is_state_not_changed));
    let after_second = table.get(Path::new("/m")).unwrap();
    assert!(Arc::ptr_eq(&after_first, &after_second));
    assert_eq!(store.statistics().total_skipped, 1);
    assert_eq!(store.statistics().total_failed, 0);
}

// ============================================================================
// Defer and barriers
// ============================================================================

#[tokio::test]
async fn test_wait_covers_deferred_jobs() {
    let store = Arc::new(JobStore::new());
    let order = Arc::new(Mutex::new(Vec::new()));

    let deferred_order = Arc::clone(&order);
    let meta = Job::new("/m", META, |_| async { Ok(()) }).defer(move |ctx, err| {
        assert!(err.is_none());
        assert_eq!(ctx.job_type, META);
        let mut batch = JobBatch::new();
        let targets = batch.push(recording_job(Arc::clone(&deferred_order), "/m", "targets"));
        batch.push_after(recording_job(deferred_order, "/m", "origins"), &[targets]);
        batch
    });
    let meta_id = store.enqueue(meta).unwrap();

    let scheduler = Scheduler::new(Arc::clone(&store), 2, Lane::All);
    scheduler.start();
    store
        .wait_for_jobs(&CancellationToken::new(), &[meta_id], WaitPolicy::FirstError)
        .await
        .unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["targets", "origins"]);
    assert_eq!(store.job(meta_id).unwrap().deferred.len(), 2);
    scheduler.stop().await;
}

#[tokio::test]
async fn test_defer_sees_job_error() {
    let store = Arc::new(JobStore::new());
    let seen = Arc::new(Mutex::new(None));
    let seen_in_defer = Arc::clone(&seen);
    let id = store
        .enqueue(
            Job::new("/m", META, |_| async { Err(JobError::failed("bad metadata")) }).defer(
                move |_, err| {
                    *seen_in_defer.lock().unwrap() = err.map(ToString::to_string);
                    JobBatch::new()
                },
            ),
        )
        .unwrap();

    let scheduler = Scheduler::new(Arc::clone(&store), 1, Lane::All);
    scheduler.start();
    let result = store
        .wait_for_jobs(&CancellationToken::new(), &[id], WaitPolicy::FirstError)
        .await;
    scheduler.stop().await;

    assert!(result.is_err());
    assert!(seen.lock().unwrap().as_deref().unwrap().contains("bad metadata"));
}

#[tokio::test]
async fn test_failed_dependency_does_not_block() {
    let store = Arc::new(JobStore::new());
    let parse = store
        .enqueue(Job::new("/m", PARSE, |_| async { Err(JobError::failed("syntax")) }))
        .unwrap();
    let meta = store
        .enqueue(Job::new("/m", META, |_| async { Ok(()) }).depends_on([parse]))
        .unwrap();

    let scheduler = Scheduler::new(Arc::clone(&store), 1, Lane::All);
    scheduler.start();
    store
        .wait_for_jobs(&CancellationToken::new(), &[meta], WaitPolicy::Ignore)
        .await
        .unwrap();
    scheduler.stop().await;

    assert_eq!(store.job(meta).unwrap().state, JobState::Done);
    assert!(store.job(meta).unwrap().error.is_none());
}

#[tokio::test]
async fn test_wait_for_unknown_job() {
    let store = JobStore::new();
    let err = store
        .wait_for_jobs(&CancellationToken::new(), &[99u64.into()], WaitPolicy::Ignore)
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Store(StoreError::JobNotFound(_))));
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_wait_is_cancellable() {
    let store = Arc::new(JobStore::new());
    let id = store.enqueue(Job::new("/m", PARSE, |_| async { Ok(()) })).unwrap();

    let cancel = CancellationToken::new();
    let waiter = {
        let store = Arc::clone(&store);
        let cancel = cancel.clone();
        tokio::spawn(async move { store.wait_for_jobs(&cancel, &[id], WaitPolicy::Ignore).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel.cancel();

    let err = waiter.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(store.job(id).unwrap().state, JobState::Queued);
}

#[tokio::test]
async fn test_cancelled_request_is_not_dispatched() {
    let store = Arc::new(JobStore::new());
    let request = RequestContext::background();
    let ran = Arc::new(Mutex::new(false));
    let ran_in_job = Arc::clone(&ran);
    let id = store
        .enqueue(
            Job::new("/m", PARSE, move |_| async move {
                *ran_in_job.lock().unwrap() = true;
                Ok(())
            })
            .context(request.clone()),
        )
        .unwrap();
    request.cancel();

    let scheduler = Scheduler::new(Arc::clone(&store), 1, Lane::All);
    scheduler.start();
    store
        .wait_for_jobs(&CancellationToken::new(), &[id], WaitPolicy::Ignore)
        .await
        .unwrap();
    scheduler.stop().await;

    assert!(!*ran.lock().unwrap());
    assert!(store.job(id).unwrap().error.unwrap().is_cancelled());
}

#[test]
fn test_dequeue_jobs_for_removed_dir() {
    let store = JobStore::new();
    let gone = store.enqueue(Job::new("/gone", PARSE, |_| async { Ok(()) })).unwrap();
    store
        .enqueue(Job::new("/gone", META, |_| async { Ok(()) }).depends_on([gone]))
        .unwrap();
    let kept = store.enqueue(Job::new("/kept", PARSE, |_| async { Ok(()) })).unwrap();

    assert_eq!(store.dequeue_jobs_for_dir(Path::new("/gone")), 2);
    assert!(store.list_incomplete_jobs_for_dir(Path::new("/gone")).is_empty());
    assert_eq!(store.try_next_job(Lane::All).unwrap().context.id, kept);
    assert!(store.try_next_job(Lane::All).is_none());
}

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

//! Worker pool draining a [`JobStore`].
//!
//! Each worker loops: claim the next job on its lane, run it inside a
//! `job` span, evaluate the defer continuation, then report the outcome back
//! to the store. Panics in job functions or continuations are caught and
//! recorded as job errors so one bad directory never takes a worker down.

use crate::error::JobError;
use crate::jobs::{ClaimedJob, JobBatch, JobStore, Lane};
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

/// A fixed-size pool of workers bound to one lane of a job store.
pub struct Scheduler {
    store: Arc<JobStore>,
    parallelism: usize,
    lane: Lane,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(store: Arc<JobStore>, parallelism: usize, lane: Lane) -> Self {
        Self {
            store,
            parallelism: parallelism.max(1),
            lane,
            cancel: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the workers on the current tokio runtime.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return;
        }
        debug!("scheduler: starting {} workers on {:?}", self.parallelism, self.lane);
        for worker in 0..self.parallelism {
            let store = Arc::clone(&self.store);
            let cancel = self.cancel.clone();
            let lane = self.lane;
            workers.push(tokio::spawn(run_worker(store, lane, cancel, worker)));
        }
    }

    /// Stop claiming new jobs and wait for running jobs to finish.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if let Err(err) = handle.await {
                warn!("scheduler: worker ended abnormally: {}", err);
            }
        }
        debug!("scheduler: stopped {:?}", self.lane);
    }

    pub fn lane(&self) -> Lane {
        self.lane
    }
}

async fn run_worker(store: Arc<JobStore>, lane: Lane, cancel: CancellationToken, worker: usize) {
    loop {
        let claimed = match store.next_job(lane, &cancel).await {
            Ok(claimed) => claimed,
            Err(_) => break,
        };
        execute(&store, claimed, worker).await;
    }
}

async fn execute(store: &JobStore, claimed: ClaimedJob, worker: usize) {
    let ClaimedJob {
        context,
        func,
        defer,
    } = claimed;
    let span = info_span!(
        parent: context.request.span(),
        "job",
        id = %context.id,
        r#type = %context.job_type,
        dir = %context.dir.display(),
        worker,
    );

    let outcome = match AssertUnwindSafe(func(context.clone()))
        .catch_unwind()
        .instrument(span.clone())
        .await
    {
        Ok(outcome) => outcome,
        Err(panic) => Err(JobError::Panicked(panic_message(panic.as_ref()))),
    };

    let _entered = span.enter();
    match &outcome {
        Ok(()) => debug!("finished {} for {:?}", context.job_type, context.dir),
        Err(err) if err.is_state_not_changed() => {
            debug!("{} skipped for {:?}: state not changed", context.job_type, context.dir)
        }
        Err(err) if err.is_cancelled() => {
            debug!("{} cancelled for {:?}", context.job_type, context.dir)
        }
        Err(err) => warn!("{} failed for {:?}: {}", context.job_type, context.dir, err),
    }

    let batch = match defer {
        Some(defer) => {
            let err = outcome.as_ref().err();
            match std::panic::catch_unwind(AssertUnwindSafe(|| defer(&context, err))) {
                Ok(batch) => batch,
                Err(panic) => {
                    warn!(
                        "defer of {} panicked: {}",
                        context.job_type,
                        panic_message(panic.as_ref())
                    );
                    JobBatch::new()
                }
            }
        }
        None => JobBatch::new(),
    };

    if let Err(err) = store.finish_job(context.id, outcome, batch) {
        warn!("could not finish {}: {}", context.id, err);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

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

//! Property-based tests for the job store.
//!
//! Random DAGs are enqueued and drained in random interleavings of claims
//! and completions. Whatever the order, a job is only handed out once all
//! of its dependencies are done, and every job finishes exactly once.

use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tfls_core::{
    Job, JobBatch, JobError, JobId, JobPriority, JobState, JobStore, JobType, Lane, Loadable,
    Record, RecordTable,
};

const NODE: JobType = JobType("Node");

/// A DAG as a list of nodes, each with priority, failure flag and the
/// indices of earlier nodes it depends on.
fn dag_strategy() -> impl Strategy<Value = Vec<(bool, bool, Vec<usize>)>> {
    (1usize..30).prop_flat_map(|n| {
        let nodes: Vec<_> = (0..n)
            .map(|i| {
                let deps = if i == 0 {
                    Just(Vec::new()).boxed()
                } else {
                    prop::collection::vec(0..i, 0..4).boxed()
                };
                (any::<bool>(), any::<bool>(), deps)
            })
            .collect();
        nodes
    })
}

// ============================================================================
// Dependency safety
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_dependencies_done_before_claim(
        dag in dag_strategy(),
        choices in prop::collection::vec(any::<u8>(), 0..200),
    ) {
        let store = JobStore::new();
        let mut ids: Vec<JobId> = Vec::new();
        let mut deps_of: HashMap<JobId, Vec<JobId>> = HashMap::new();
        let mut fails: HashSet<JobId> = HashSet::new();

        for (i, (low, fail, deps)) in dag.iter().enumerate() {
            let deps: Vec<JobId> = deps.iter().map(|d| ids[*d]).collect();
            let priority = if *low { JobPriority::Low } else { JobPriority::High };
            let job = Job::new(format!("/n{}", i % 5), NODE, |_| async { Ok(()) })
                .priority(priority)
                .depends_on(deps.clone());
            let id = store.enqueue(job).unwrap();
            if *fail {
                fails.insert(id);
            }
            deps_of.insert(id, deps);
            ids.push(id);
        }

        let mut running: Vec<JobId> = Vec::new();
        let mut choices = choices.into_iter();
        let mut finished = 0usize;
        while finished < ids.len() {
            let claim = match choices.next() {
                Some(c) => c % 2 == 0,
                None => running.is_empty(),
            };
            if claim || running.is_empty() {
                if let Some(claimed) = store.try_next_job(Lane::All) {
                    let id = claimed.context.id;
                    for dep in &deps_of[&id] {
                        let state = store.job(*dep).map(|s| s.state);
                        prop_assert!(
                            state.is_none() || state == Some(JobState::Done),
                            "job {} claimed before dependency {}", id, dep
                        );
                    }
                    running.push(id);
                    continue;
                }
                prop_assert!(!running.is_empty(), "no job ready but none running");
            }
            let pick = running.len() / 2;
            let id = running.remove(pick);
            let outcome = if fails.contains(&id) {
                Err(JobError::failed("boom"))
            } else {
                Ok(())
            };
            store.finish_job(id, outcome, JobBatch::new()).unwrap();
            finished += 1;
        }

        let stats = store.statistics();
        prop_assert_eq!(stats.total_finished, ids.len() as u64);
        prop_assert_eq!(stats.total_failed, fails.len() as u64);
        prop_assert_eq!(stats.queued, 0);
        prop_assert!(store.try_next_job(Lane::All).is_none());
    }

    #[test]
    fn prop_high_lane_drained_before_low(
        priorities in prop::collection::vec(any::<bool>(), 1..40),
    ) {
        let store = JobStore::new();
        for (i, low) in priorities.iter().enumerate() {
            let priority = if *low { JobPriority::Low } else { JobPriority::High };
            store
                .enqueue(Job::new(format!("/p{}", i), NODE, |_| async { Ok(()) }).priority(priority))
                .unwrap();
        }

        let mut seen_low = false;
        while let Some(claimed) = store.try_next_job(Lane::All) {
            let priority = store.job(claimed.context.id).unwrap().priority;
            if priority == JobPriority::Low {
                seen_low = true;
            } else {
                prop_assert!(!seen_low, "high job claimed after a low one");
            }
        }
    }
}

// ============================================================================
// Copy-on-write isolation
// ============================================================================

#[derive(Debug, Clone)]
struct ListRecord {
    path: std::path::PathBuf,
    items: Loadable<Vec<u32>>,
}

impl Record for ListRecord {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            items: Loadable::default(),
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

proptest! {
    #[test]
    fn prop_snapshots_never_change(updates in prop::collection::vec(any::<u32>(), 1..20)) {
        let table: RecordTable<ListRecord> = RecordTable::new("lists");
        table.add(Path::new("/r")).unwrap();

        let mut snapshots = Vec::new();
        for value in &updates {
            let snapshot = table.get(Path::new("/r")).unwrap();
            let before = snapshot.items.data().cloned();
            snapshots.push((snapshot, before));
            table
                .update(Path::new("/r"), |r| {
                    let mut items = r.items.data().cloned().unwrap_or_default();
                    items.push(*value);
                    r.items.set(Some(items), None);
                })
                .unwrap();
        }

        for (snapshot, before) in snapshots {
            prop_assert_eq!(snapshot.items.data().cloned(), before);
        }
        let last = table.get(Path::new("/r")).unwrap();
        prop_assert_eq!(last.items.data().cloned(), Some(updates));
    }
}

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

use super::ModulesFeature;
use crate::constants::FEATURE_MODULES;
use crate::features::remove_records_under;
use crate::filenames::{is_data_dir_path, is_module_file_path, is_module_filename};
use std::path::Path;
use std::sync::Arc;
use tfls_core::{
    ChangeType, DidChangeEvent, DidChangeWatchedEvent, DidOpenEvent, DiscoverEvent,
    DocumentChangedEvent, EventBus, JobId, LanguageId, RequestContext, Subscription,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct Subscriptions {
    discover: Subscription<DiscoverEvent>,
    did_open: Subscription<DidOpenEvent>,
    did_change: Subscription<DidChangeEvent>,
    did_change_watched: Subscription<DidChangeWatchedEvent>,
    document_changed: Subscription<DocumentChangedEvent>,
}

impl Subscriptions {
    fn new(bus: &EventBus) -> Self {
        Self {
            discover: bus.on_discover(FEATURE_MODULES),
            did_open: bus.on_did_open(FEATURE_MODULES),
            did_change: bus.on_did_change(FEATURE_MODULES),
            did_change_watched: bus.on_did_change_watched(FEATURE_MODULES),
            document_changed: bus.on_document_changed(FEATURE_MODULES),
        }
    }

    fn unsubscribe(self, bus: &EventBus) {
        bus.discover().unsubscribe(self.discover);
        bus.did_open().unsubscribe(self.did_open);
        bus.did_change().unsubscribe(self.did_change);
        bus.did_change_watched().unsubscribe(self.did_change_watched);
        bus.document_changed().unsubscribe(self.document_changed);
    }
}

impl ModulesFeature {
    /// Subscribe to the bus and spawn the event task.
    ///
    /// Returns `false` if the feature is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let feature = Arc::clone(self);
        self.task.start(move |cancel| {
            let subs = Subscriptions::new(&feature.ctx.bus);
            async move { feature.run(subs, cancel).await }
        })
    }

    /// Stop the event task and unsubscribe.
    pub async fn stop(&self) {
        self.task.stop().await;
    }

    async fn run(&self, mut subs: Subscriptions, cancel: CancellationToken) {
        info!("{}: started", FEATURE_MODULES);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(event) = subs.discover.recv() => {
                    self.discover(&event);
                }
                Some(event) = subs.did_open.recv() => {
                    self.did_open(&event);
                }
                Some(event) = subs.did_change.recv() => {
                    self.did_change(&event);
                }
                Some(event) = subs.did_change_watched.recv() => {
                    self.did_change_watched(&event);
                }
                Some(event) = subs.document_changed.recv() => {
                    self.document_changed(&event);
                }
                else => break,
            }
        }
        subs.unsubscribe(&self.ctx.bus);
        info!("{}: stopped", FEATURE_MODULES);
    }

    // ------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------

    /// Record a discovered directory containing module files.
    ///
    /// Returns `true` if a new record was added.
    pub fn discover(&self, event: &DiscoverEvent) -> bool {
        if !event.files.iter().any(|f| is_module_filename(f)) {
            return false;
        }
        let added = self.store().add_if_not_exists(&event.dir);
        if added {
            debug!("{}: discovered {}", FEATURE_MODULES, event.dir.display());
        }
        added
    }

    pub fn did_open(&self, event: &DidOpenEvent) -> Vec<JobId> {
        if event.language != LanguageId::Terraform {
            return Vec::new();
        }
        self.store().add_if_not_exists(&event.dir);
        self.index(&event.dir, &event.context)
    }

    pub fn did_change(&self, event: &DidChangeEvent) -> Vec<JobId> {
        if event.language != LanguageId::Terraform {
            return Vec::new();
        }
        self.store().add_if_not_exists(&event.dir);
        self.index(&event.dir, &event.context)
    }

    /// Re-index a known directory whose documents changed outside a
    /// `didChange`.
    pub fn document_changed(&self, event: &DocumentChangedEvent) -> Vec<JobId> {
        if !self.store().exists(&event.dir) {
            return Vec::new();
        }
        self.index(&event.dir, &event.context)
    }

    pub fn did_change_watched(&self, event: &DidChangeWatchedEvent) -> Vec<JobId> {
        let path = event.path.as_path();
        if is_data_dir_path(path) {
            return Vec::new();
        }

        match event.change {
            ChangeType::Deleted => {
                let removed = if self.ctx.fs.exists(path) {
                    0
                } else {
                    remove_records_under(self.store(), &self.ctx.jobs, path)
                };
                if removed > 0 {
                    info!("{}: removed {} modules under {}", FEATURE_MODULES, removed, path.display());
                    return Vec::new();
                }
                self.reindex_parent(path, &event.context)
            }
            ChangeType::Changed => {
                if self.ctx.documents.is_document_open(path) {
                    return Vec::new();
                }
                self.reindex_parent(path, &event.context)
            }
            ChangeType::Created => {
                let is_dir = event.is_dir.unwrap_or_else(|| self.ctx.fs.is_dir(path));
                if is_dir {
                    self.walker.enqueue_dir(path);
                    return Vec::new();
                }
                if let Some(parent) = path.parent().filter(|_| is_module_file_path(path)) {
                    self.store().add_if_not_exists(parent);
                }
                self.reindex_parent(path, &event.context)
            }
        }
    }

    fn reindex_parent(&self, path: &Path, request: &RequestContext) -> Vec<JobId> {
        if !is_module_file_path(path) {
            return Vec::new();
        }
        match path.parent() {
            Some(dir) if self.store().exists(dir) => self.index(dir, request),
            _ => Vec::new(),
        }
    }

    fn index(&self, dir: &Path, request: &RequestContext) -> Vec<JobId> {
        let batch = self.indexer.index_dag(dir, request);
        self.ctx.enqueue(FEATURE_MODULES, dir, batch)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::feature;
    use super::*;
    use std::path::PathBuf;
    use tfls_core::DocumentHandle;

    fn open_event(dir: &Path, language: LanguageId) -> DidOpenEvent {
        DidOpenEvent {
            context: RequestContext::background(),
            dir: dir.to_path_buf(),
            language,
            document: DocumentHandle::new(dir, "main.tf"),
        }
    }

    fn watched(path: PathBuf, change: ChangeType, is_dir: Option<bool>) -> DidChangeWatchedEvent {
        DidChangeWatchedEvent {
            context: RequestContext::background(),
            path,
            change,
            is_dir,
        }
    }

    #[test]
    fn test_discover_module_dir() {
        let feature = feature();
        let event = DiscoverEvent {
            context: RequestContext::background(),
            dir: PathBuf::from("/work"),
            files: vec!["main.tf".into(), "README.md".into()],
        };
        assert!(feature.discover(&event));
        assert!(!feature.discover(&event));

        let other = DiscoverEvent {
            dir: PathBuf::from("/docs"),
            files: vec!["README.md".into(), ".hidden.tf".into()],
            ..event
        };
        assert!(!feature.discover(&other));
        assert_eq!(feature.module_paths(), vec![PathBuf::from("/work")]);
    }

    #[tokio::test]
    async fn test_did_open_enqueues_dag() {
        let feature = feature();
        let ids = feature.did_open(&open_event(Path::new("/work"), LanguageId::Terraform));
        assert_eq!(ids.len(), 3);
        assert!(feature.store().exists(Path::new("/work")));

        let ignored = feature.did_open(&open_event(Path::new("/vars"), LanguageId::TerraformVars));
        assert!(ignored.is_empty());
        assert!(!feature.store().exists(Path::new("/vars")));
    }

    #[tokio::test]
    async fn test_watched_delete_removes_records() {
        let feature = feature();
        let root = tempfile::tempdir().unwrap();
        let gone = root.path().join("gone");
        feature.store().add(&gone).unwrap();
        feature.store().add(&gone.join("nested")).unwrap();
        feature.store().add(root.path()).unwrap();

        let ids = feature.did_change_watched(&watched(gone.clone(), ChangeType::Deleted, None));
        assert!(ids.is_empty());
        assert_eq!(feature.module_paths(), vec![root.path().to_path_buf()]);
    }

    #[tokio::test]
    async fn test_watched_file_changes() {
        let feature = feature();
        let root = tempfile::tempdir().unwrap();
        feature.store().add(root.path()).unwrap();

        let deleted = feature.did_change_watched(&watched(root.path().join("old.tf"), ChangeType::Deleted, Some(false)));
        assert_eq!(deleted.len(), 3);
        let changed = feature.did_change_watched(&watched(root.path().join("main.tf"), ChangeType::Changed, None));
        assert_eq!(changed.len(), 3);
        let readme = feature.did_change_watched(&watched(root.path().join("README.md"), ChangeType::Changed, None));
        assert!(readme.is_empty());
        let lock = feature.did_change_watched(&watched(root.path().join(".terraform.lock.hcl"), ChangeType::Created, None));
        assert!(lock.is_empty());
    }

    #[tokio::test]
    async fn test_watched_created_dir_goes_to_walker() {
        let feature = feature();
        let root = tempfile::tempdir().unwrap();
        let ids = feature.did_change_watched(&watched(root.path().join("new"), ChangeType::Created, Some(true)));
        assert!(ids.is_empty());
        assert_eq!(feature.walker.dequeue_dir(), Some(root.path().join("new")));
    }

    #[tokio::test]
    async fn test_start_stop() {
        let feature = feature();
        assert!(feature.start());
        assert!(!feature.start());
        assert_eq!(feature.ctx.bus.discover().subscriber_count(), 1);
        feature.stop().await;
        assert_eq!(feature.ctx.bus.discover().subscriber_count(), 0);
    }
}

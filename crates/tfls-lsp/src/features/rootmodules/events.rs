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

use super::RootModulesFeature;
use crate::constants::{FEATURE_ROOT_MODULES, MODULE_MANIFEST_PATH};
use crate::features::remove_records_under;
use crate::filenames::{
    is_root_module_filename, module_dir_from_data_dir, module_dir_from_manifest,
    module_dir_from_plugin_lock,
};
use std::path::Path;
use std::sync::Arc;
use tfls_core::{
    ChangeType, DidChangeWatchedEvent, DidOpenEvent, DiscoverEvent, DocumentChangedEvent,
    EventBus, JobId, Subscription,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct Subscriptions {
    discover: Subscription<DiscoverEvent>,
    did_open: Subscription<DidOpenEvent>,
    did_change_watched: Subscription<DidChangeWatchedEvent>,
}

impl Subscriptions {
    fn new(bus: &EventBus) -> Self {
        Self {
            discover: bus.on_discover(FEATURE_ROOT_MODULES),
            did_open: bus.on_did_open(FEATURE_ROOT_MODULES),
            did_change_watched: bus.on_did_change_watched(FEATURE_ROOT_MODULES),
        }
    }

    fn unsubscribe(self, bus: &EventBus) {
        bus.discover().unsubscribe(self.discover);
        bus.did_open().unsubscribe(self.did_open);
        bus.did_change_watched().unsubscribe(self.did_change_watched);
    }
}

impl RootModulesFeature {
    pub fn start(self: &Arc<Self>) -> bool {
        let feature = Arc::clone(self);
        self.task.start(move |cancel| {
            let subs = Subscriptions::new(&feature.ctx.bus);
            async move { feature.run(subs, cancel).await }
        })
    }

    pub async fn stop(&self) {
        self.task.stop().await;
    }

    async fn run(&self, mut subs: Subscriptions, cancel: CancellationToken) {
        info!("{}: started", FEATURE_ROOT_MODULES);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(event) = subs.discover.recv() => {
                    self.discover(&event);
                }
                Some(event) = subs.did_open.recv() => {
                    self.did_open(&event);
                }
                Some(event) = subs.did_change_watched.recv() => {
                    self.did_change_watched(&event).await;
                }
                else => break,
            }
        }
        subs.unsubscribe(&self.ctx.bus);
        info!("{}: stopped", FEATURE_ROOT_MODULES);
    }

    /// Record directories with a dependency lock file or an installed
    /// module manifest.
    pub fn discover(&self, event: &DiscoverEvent) -> bool {
        let has_lock = event.files.iter().any(|f| is_root_module_filename(f));
        if !has_lock && !self.ctx.fs.exists(&event.dir.join(MODULE_MANIFEST_PATH)) {
            return false;
        }
        let added = self.store().add_if_not_exists(&event.dir);
        if added {
            debug!("{}: discovered {}", FEATURE_ROOT_MODULES, event.dir.display());
        }
        added
    }

    /// Load CLI data for a known root module. Any language counts: a
    /// `*.tfvars` file belongs to the same root module as its `*.tf` files.
    pub fn did_open(&self, event: &DidOpenEvent) -> Vec<JobId> {
        if !self.store().exists(&event.dir) {
            return Vec::new();
        }
        let batch = self.indexer.open_dag(&event.dir, &event.context);
        self.ctx.enqueue(FEATURE_ROOT_MODULES, &event.dir, batch)
    }

    pub async fn did_change_watched(&self, event: &DidChangeWatchedEvent) -> Vec<JobId> {
        let path = event.path.as_path();
        if self.ctx.documents.is_document_open(path) {
            debug!("{}: {} is open, ignoring change", FEATURE_ROOT_MODULES, path.display());
            return Vec::new();
        }

        if let Some(root) = module_dir_from_manifest(path) {
            return self.manifest_changed(&root, event).await;
        }

        if let Some(root) = module_dir_from_plugin_lock(path) {
            // Schemas stay cached: other root modules may still use them.
            if event.change == ChangeType::Deleted {
                return Vec::new();
            }
            self.store().add_if_not_exists(&root);
            let batch = self.indexer.plugin_lock_dag(&root, &event.context);
            return self.ctx.enqueue(FEATURE_ROOT_MODULES, &root, batch);
        }

        if let Some(root) = module_dir_from_data_dir(path) {
            // Clients may not report nested deletions when `.terraform`
            // itself goes away.
            if event.change == ChangeType::Deleted {
                self.clear_manifest(&root);
            }
            return Vec::new();
        }

        if event.change == ChangeType::Deleted && !self.ctx.fs.exists(path) {
            let removed = remove_records_under(self.store(), &self.ctx.jobs, path);
            if removed > 0 {
                info!("{}: removed {} root modules under {}", FEATURE_ROOT_MODULES, removed, path.display());
            }
        }
        Vec::new()
    }

    async fn manifest_changed(&self, root: &Path, event: &DidChangeWatchedEvent) -> Vec<JobId> {
        if event.change == ChangeType::Deleted {
            self.clear_manifest(root);
            return Vec::new();
        }

        self.store().add_if_not_exists(root);
        let batch = self.indexer.manifest_dag(root, &event.context);
        let ids = self.ctx.enqueue(FEATURE_ROOT_MODULES, root, batch);

        // Installed modules may change what the open configuration resolves to.
        if self.ctx.documents.is_dir_open(root) {
            self.ctx
                .bus
                .publish_document_changed(DocumentChangedEvent {
                    context: event.context.clone(),
                    dir: root.to_path_buf(),
                })
                .await;
        }
        ids
    }

    fn clear_manifest(&self, root: &Path) {
        if let Err(err) = self.store().update(root, |r| r.module_manifest.set(None, None)) {
            warn!("{}: failed to clear module manifest: {}", FEATURE_ROOT_MODULES, err);
        }
    }
}

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

//! Workspace walker.
//!
//! Directories to walk are queued in a [`WalkerPathStore`]; a background
//! task takes them one at a time, walks them with `walkdir` on the blocking
//! pool and publishes one [`DiscoverEvent`] per directory found. Queued
//! directories containing open documents are walked first.

use crate::config::IndexingSettings;
use crate::constants::{DATA_DIR, DEFAULT_IGNORED_DIRECTORY_NAMES};
use crate::features::TaskSlot;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tfls_core::{DiscoverEvent, DocumentStore, EventBus, RequestContext};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Queue of directories waiting to be walked.
#[derive(Default)]
pub struct WalkerPathStore {
    queue: Mutex<VecDeque<PathBuf>>,
    notify: Notify,
    documents: Option<Arc<DocumentStore>>,
}

impl WalkerPathStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that prefers directories with open documents.
    pub fn with_documents(documents: Arc<DocumentStore>) -> Self {
        Self {
            documents: Some(documents),
            ..Self::default()
        }
    }

    /// Queue `dir` unless it is already queued.
    pub fn enqueue_dir(&self, dir: &Path) -> bool {
        let mut queue = self.queue.lock();
        if queue.iter().any(|d| d == dir) {
            return false;
        }
        queue.push_back(dir.to_path_buf());
        drop(queue);
        self.notify.notify_one();
        true
    }

    /// Next directory to walk, open directories first.
    pub fn dequeue_dir(&self) -> Option<PathBuf> {
        let open_documents = self
            .documents
            .as_ref()
            .map(|docs| docs.all_paths())
            .unwrap_or_default();
        let mut queue = self.queue.lock();
        let open = queue
            .iter()
            .position(|dir| open_documents.iter().any(|doc| doc.starts_with(dir)));
        match open {
            Some(index) => queue.remove(index),
            None => queue.pop_front(),
        }
    }

    pub fn remove_dir(&self, dir: &Path) -> bool {
        let mut queue = self.queue.lock();
        let before = queue.len();
        queue.retain(|d| d != dir);
        queue.len() != before
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Wait for the next directory. `None` once `cancel` fires.
    pub async fn next_dir(&self, cancel: &CancellationToken) -> Option<PathBuf> {
        loop {
            let notified = self.notify.notified();
            if let Some(dir) = self.dequeue_dir() {
                return Some(dir);
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = notified => {}
            }
        }
    }
}

/// Directory names and absolute paths the walker does not descend into.
#[derive(Debug, Clone, PartialEq)]
pub struct IgnoreRules {
    directory_names: HashSet<String>,
    paths: Vec<PathBuf>,
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self::from_settings(&IndexingSettings::default())
    }
}

impl IgnoreRules {
    pub fn from_settings(settings: &IndexingSettings) -> Self {
        let mut directory_names: HashSet<String> = DEFAULT_IGNORED_DIRECTORY_NAMES
            .iter()
            .map(|s| s.to_string())
            .collect();
        directory_names.insert(DATA_DIR.to_string());
        directory_names.extend(settings.ignore_directory_names.iter().cloned());
        Self {
            directory_names,
            paths: settings.ignore_paths.clone(),
        }
    }

    pub fn is_ignored(&self, dir: &Path) -> bool {
        let by_name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| self.directory_names.contains(n))
            .unwrap_or(false);
        by_name || self.paths.iter().any(|p| dir.starts_with(p))
    }
}

/// Every directory below `root` (inclusive) that is not ignored, with the
/// names of its regular files.
pub fn collect_dirs(root: &Path, rules: &IgnoreRules) -> BTreeMap<PathBuf, Vec<String>> {
    let mut dirs: BTreeMap<PathBuf, Vec<String>> = BTreeMap::new();
    if rules.paths.iter().any(|p| root.starts_with(p)) {
        return dirs;
    }

    let entries = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_type().is_dir() || !rules.is_ignored(e.path()));
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("walker: {}", err);
                continue;
            }
        };
        if entry.file_type().is_dir() {
            dirs.entry(entry.path().to_path_buf()).or_default();
        } else if entry.file_type().is_file() {
            let (Some(parent), Some(name)) = (entry.path().parent(), entry.file_name().to_str()) else {
                continue;
            };
            dirs.entry(parent.to_path_buf()).or_default().push(name.to_string());
        }
    }
    dirs
}

/// Background task turning queued directories into Discover events.
pub struct Walker {
    paths: Arc<WalkerPathStore>,
    bus: Arc<EventBus>,
    rules: RwLock<IgnoreRules>,
    task: TaskSlot,
}

impl Walker {
    pub fn new(paths: Arc<WalkerPathStore>, bus: Arc<EventBus>) -> Self {
        Self {
            paths,
            bus,
            rules: RwLock::new(IgnoreRules::default()),
            task: TaskSlot::default(),
        }
    }

    pub fn paths(&self) -> &Arc<WalkerPathStore> {
        &self.paths
    }

    /// Applies to walks started afterwards.
    pub fn set_ignore_rules(&self, rules: IgnoreRules) {
        *self.rules.write() = rules;
    }

    pub fn ignore_rules(&self) -> IgnoreRules {
        self.rules.read().clone()
    }

    pub fn start(self: &Arc<Self>) -> bool {
        let walker = Arc::clone(self);
        self.task.start(move |cancel| async move { walker.run(cancel).await })
    }

    pub async fn stop(&self) {
        self.task.stop().await;
    }

    async fn run(&self, cancel: CancellationToken) {
        info!("walker: started");
        while let Some(root) = self.paths.next_dir(&cancel).await {
            match self.walk(&root, &cancel).await {
                Ok(count) => info!("walker: {} directories in {}", count, root.display()),
                Err(err) => warn!("walker: walking {} failed: {}", root.display(), err),
            }
        }
        info!("walker: stopped");
    }

    /// Walk `root` and publish its directories. Returns how many were
    /// published.
    pub async fn walk(&self, root: &Path, cancel: &CancellationToken) -> Result<usize, tokio::task::JoinError> {
        let rules = self.ignore_rules();
        let walk_root = root.to_path_buf();
        let dirs = tokio::task::spawn_blocking(move || collect_dirs(&walk_root, &rules)).await?;

        let mut published = 0;
        for (dir, files) in dirs {
            if cancel.is_cancelled() {
                debug!("walker: walk of {} cancelled", root.display());
                break;
            }
            let event = DiscoverEvent {
                context: RequestContext::background(),
                dir,
                files,
            };
            self.bus.publish_discover(event).await;
            published += 1;
        }
        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tfls_core::{JobStore, LanguageId};

    #[test]
    fn test_path_store_dedup_and_order() {
        let store = WalkerPathStore::new();
        assert!(store.enqueue_dir(Path::new("/a")));
        assert!(store.enqueue_dir(Path::new("/b")));
        assert!(!store.enqueue_dir(Path::new("/a")));
        assert_eq!(store.len(), 2);
        assert!(store.remove_dir(Path::new("/b")));
        assert_eq!(store.dequeue_dir(), Some(PathBuf::from("/a")));
        assert_eq!(store.dequeue_dir(), None);
    }

    #[test]
    fn test_open_dirs_first() {
        let docs = Arc::new(DocumentStore::new(Arc::new(JobStore::new())));
        docs.open(Path::new("/b/main.tf"), LanguageId::Terraform, 1, "").unwrap();
        let store = WalkerPathStore::with_documents(docs);
        store.enqueue_dir(Path::new("/a"));
        store.enqueue_dir(Path::new("/b"));
        assert_eq!(store.dequeue_dir(), Some(PathBuf::from("/b")));
        assert_eq!(store.dequeue_dir(), Some(PathBuf::from("/a")));
    }

    #[test]
    fn test_collect_dirs_skips_ignored() {
        let root = tempfile::tempdir().unwrap();
        let r = root.path();
        for dir in ["app", ".terraform/modules", ".git", "vendor", "app/nested"] {
            std::fs::create_dir_all(r.join(dir)).unwrap();
        }
        std::fs::write(r.join("main.tf"), "").unwrap();
        std::fs::write(r.join("app/main.tf"), "").unwrap();
        std::fs::write(r.join(".terraform/modules/modules.json"), "{}").unwrap();

        let rules = IgnoreRules::from_settings(&IndexingSettings {
            ignore_directory_names: vec!["vendor".into()],
            ignore_paths: vec![r.join("app/nested")],
        });
        let dirs = collect_dirs(r, &rules);
        let found: Vec<&PathBuf> = dirs.keys().collect();
        assert_eq!(found, vec![&r.to_path_buf(), &r.join("app")]);
        assert_eq!(dirs[r], vec!["main.tf"]);
    }

    #[tokio::test]
    async fn test_walker_publishes_discover() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("net")).unwrap();
        std::fs::write(root.path().join("net/main.tf"), "").unwrap();

        let bus = Arc::new(EventBus::new());
        let mut sub = bus.on_discover("test");
        let paths = Arc::new(WalkerPathStore::new());
        let walker = Arc::new(Walker::new(Arc::clone(&paths), Arc::clone(&bus)));
        assert!(walker.start());
        paths.enqueue_dir(root.path());

        let first = sub.recv().await.unwrap();
        assert_eq!(first.dir, root.path());
        let second = sub.recv().await.unwrap();
        assert_eq!(second.dir, root.path().join("net"));
        assert_eq!(second.files, vec!["main.tf"]);
        walker.stop().await;
    }
}

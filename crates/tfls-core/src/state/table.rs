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

//! Copy-on-write record tables.
//!
//! A [`RecordTable`] maps a directory path to an immutable `Arc<R>`.
//! Updates clone the record, mutate the clone and swap it in, so a reader
//! holding an `Arc` from before the update keeps seeing the old version.
//!
//! Writes go through a [`WriteTxn`]: one writer at a time stages inserts and
//! deletes, and [`WriteTxn::commit`] applies them under the table's write
//! lock. A transaction dropped without commit discards its staged changes.

use crate::constants::RECORD_CHANGE_CAPACITY;
use crate::error::{StoreError, StoreResult};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// A per-directory record stored in a [`RecordTable`].
pub trait Record: Clone + Send + Sync + 'static {
    /// An empty record for `path`, with every field `Unknown`.
    fn new(path: &Path) -> Self;

    fn path(&self) -> &Path;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordChangeKind {
    Added,
    Updated,
    Removed,
}

/// Emitted for every committed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordChange {
    /// Name of the table, e.g. `modules`.
    pub table: &'static str,
    pub path: PathBuf,
    pub kind: RecordChangeKind,
}

/// Transactional copy-on-write table of records keyed by path.
pub struct RecordTable<R: Record> {
    name: &'static str,
    records: RwLock<HashMap<PathBuf, Arc<R>>>,
    writer: Mutex<()>,
    changes: broadcast::Sender<RecordChange>,
}

impl<R: Record> RecordTable<R> {
    pub fn new(name: &'static str) -> Self {
        let (changes, _) = broadcast::channel(RECORD_CHANGE_CAPACITY);
        Self {
            name,
            records: RwLock::new(HashMap::new()),
            writer: Mutex::new(()),
            changes,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Start a write transaction. Blocks while another one is open.
    pub fn begin(&self) -> WriteTxn<'_, R> {
        WriteTxn {
            _writer: self.writer.lock(),
            table: self,
            staged: Vec::new(),
            committed: false,
        }
    }

    /// Receive every committed change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RecordChange> {
        self.changes.subscribe()
    }

    /// Insert an empty record. Fails with `AlreadyExists` if present.
    pub fn add(&self, path: &Path) -> StoreResult<()> {
        let mut txn = self.begin();
        if txn.get(path).is_some() {
            return Err(StoreError::AlreadyExists(path.to_path_buf()));
        }
        txn.insert(R::new(path));
        txn.commit();
        Ok(())
    }

    /// Insert an empty record unless one exists. Returns `true` if added.
    pub fn add_if_not_exists(&self, path: &Path) -> bool {
        match self.add(path) {
            Ok(()) => true,
            Err(_) => false,
        }
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.records.read().contains_key(path)
    }

    /// The current version of a record.
    pub fn get(&self, path: &Path) -> StoreResult<Arc<R>> {
        self.records
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::RecordNotFound(path.to_path_buf()))
    }

    /// Snapshot of every record, in no particular order.
    pub fn list(&self) -> Vec<Arc<R>> {
        self.records.read().values().cloned().collect()
    }

    /// Paths of all records, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.records.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Delete a record. Returns `false` if it did not exist.
    pub fn remove(&self, path: &Path) -> bool {
        let mut txn = self.begin();
        if txn.get(path).is_none() {
            return false;
        }
        txn.delete(path);
        txn.commit();
        true
    }

    /// Copy the record, apply `f` to the copy and commit it.
    pub fn update<F>(&self, path: &Path, f: F) -> StoreResult<Arc<R>>
    where
        F: FnOnce(&mut R),
    {
        let mut txn = self.begin();
        let current = txn
            .get(path)
            .ok_or_else(|| StoreError::RecordNotFound(path.to_path_buf()))?;
        let mut copy = R::clone(&current);
        f(&mut copy);
        let updated = Arc::new(copy);
        txn.insert_arc(Arc::clone(&updated));
        txn.commit();
        Ok(updated)
    }
}

/// A staged set of changes to a [`RecordTable`].
pub struct WriteTxn<'a, R: Record> {
    _writer: MutexGuard<'a, ()>,
    table: &'a RecordTable<R>,
    staged: Vec<(PathBuf, Option<Arc<R>>)>,
    committed: bool,
}

impl<'a, R: Record> WriteTxn<'a, R> {
    /// Read through the staged changes.
    pub fn get(&self, path: &Path) -> Option<Arc<R>> {
        if let Some((_, staged)) = self.staged.iter().rev().find(|(p, _)| p == path) {
            return staged.clone();
        }
        self.table.records.read().get(path).cloned()
    }

    pub fn insert(&mut self, record: R) {
        self.insert_arc(Arc::new(record));
    }

    fn insert_arc(&mut self, record: Arc<R>) {
        self.staged.push((record.path().to_path_buf(), Some(record)));
    }

    pub fn delete(&mut self, path: &Path) {
        self.staged.push((path.to_path_buf(), None));
    }

    /// Apply the staged changes atomically and notify subscribers.
    pub fn commit(mut self) -> Vec<RecordChange> {
        let staged = std::mem::take(&mut self.staged);
        let mut changes = Vec::with_capacity(staged.len());
        {
            let mut records = self.table.records.write();
            for (path, record) in staged {
                let kind = match record {
                    Some(record) => match records.insert(path.clone(), record) {
                        Some(_) => RecordChangeKind::Updated,
                        None => RecordChangeKind::Added,
                    },
                    None => match records.remove(&path) {
                        Some(_) => RecordChangeKind::Removed,
                        None => continue,
                    },
                };
                changes.push(RecordChange {
                    table: self.table.name,
                    path,
                    kind,
                });
            }
        }
        self.committed = true;
        for change in &changes {
            debug!("state: {} {:?} {:?}", change.table, change.kind, change.path);
            // no receivers is fine
            let _ = self.table.changes.send(change.clone());
        }
        changes
    }
}

impl<R: Record> Drop for WriteTxn<'_, R> {
    fn drop(&mut self) {
        if !self.committed && !self.staged.is_empty() {
            debug!(
                "state: {} transaction aborted, {} staged changes dropped",
                self.table.name,
                self.staged.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Loadable;

    #[derive(Debug, Clone)]
    struct DirRecord {
        path: PathBuf,
        files: Loadable<Vec<String>>,
    }

    impl Record for DirRecord {
        fn new(path: &Path) -> Self {
            Self {
                path: path.to_path_buf(),
                files: Loadable::default(),
            }
        }

        fn path(&self) -> &Path {
            &self.path
        }
    }

    #[test]
    fn test_add_twice_fails() {
        let table: RecordTable<DirRecord> = RecordTable::new("dirs");
        table.add(Path::new("/a")).unwrap();
        assert_eq!(
            table.add(Path::new("/a")).unwrap_err(),
            StoreError::AlreadyExists(PathBuf::from("/a"))
        );
        assert!(!table.add_if_not_exists(Path::new("/a")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_get_missing() {
        let table: RecordTable<DirRecord> = RecordTable::new("dirs");
        assert!(matches!(
            table.get(Path::new("/missing")),
            Err(StoreError::RecordNotFound(_))
        ));
    }

    #[test]
    fn test_update_is_copy_on_write() {
        let table: RecordTable<DirRecord> = RecordTable::new("dirs");
        table.add(Path::new("/a")).unwrap();
        let before = table.get(Path::new("/a")).unwrap();

        table
            .update(Path::new("/a"), |r| r.files.set(Some(vec!["main.tf".into()]), None))
            .unwrap();

        assert!(before.files.is_unknown());
        assert!(table.get(Path::new("/a")).unwrap().files.is_loaded());
    }

    #[test]
    fn test_uncommitted_transaction_aborts() {
        let table: RecordTable<DirRecord> = RecordTable::new("dirs");
        {
            let mut txn = table.begin();
            txn.insert(DirRecord::new(Path::new("/a")));
            assert!(txn.get(Path::new("/a")).is_some());
        }
        assert!(!table.exists(Path::new("/a")));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let table: RecordTable<DirRecord> = RecordTable::new("dirs");
        table.add(Path::new("/a")).unwrap();
        assert!(table.remove(Path::new("/a")));
        assert!(!table.remove(Path::new("/a")));
    }

    #[test]
    fn test_changes_are_broadcast() {
        let table: RecordTable<DirRecord> = RecordTable::new("dirs");
        let mut rx = table.subscribe();
        table.add(Path::new("/a")).unwrap();
        table.update(Path::new("/a"), |_| {}).unwrap();
        table.remove(Path::new("/a"));

        let kinds: Vec<RecordChangeKind> = (0..3).map(|_| rx.try_recv().unwrap().kind).collect();
        assert_eq!(
            kinds,
            vec![
                RecordChangeKind::Added,
                RecordChangeKind::Updated,
                RecordChangeKind::Removed
            ]
        );
    }
}

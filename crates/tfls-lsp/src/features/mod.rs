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

//! Feature modules.
//!
//! A feature owns one record table and reacts to bus events by enqueueing
//! job DAGs that fill the fields of its records. Every feature follows the
//! same shape:
//!
//! - `start()` spawns a task consuming the feature's subscriptions until
//!   `stop()` is called, then unsubscribes
//! - one public handler per topic, returning the IDs of the jobs it
//!   enqueued so callers can wait for them
//! - read accessors over the record table
//!
//! Handlers never run jobs themselves and never block on job completion.

pub mod modules;
pub mod rootmodules;
pub mod stacks;
pub mod variables;

use crate::config::ValidationOptions;
use crate::decoder::ParsedFiles;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tfls_core::jobs::BatchOutcome;
use tfls_core::{
    DocumentStore, EventBus, JobBatch, JobError, JobId, JobResult, JobStore, Loadable, OpState,
    ReadOnlyFs, Record, RecordTable,
};
use tfls_hcl::{Diagnostics, File};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Collaborators shared by every feature.
#[derive(Clone)]
pub struct FeatureContext {
    pub bus: Arc<EventBus>,
    pub jobs: Arc<JobStore>,
    pub documents: Arc<DocumentStore>,
    pub fs: Arc<dyn ReadOnlyFs>,
    pub validation: ValidationOptions,
}

impl FeatureContext {
    /// Enqueue a batch and log the entries the store rejected.
    pub(crate) fn enqueue(&self, feature: &str, dir: &Path, batch: JobBatch) -> Vec<JobId> {
        let BatchOutcome { ids, errors } = self.jobs.enqueue_batch(batch);
        if !errors.is_empty() {
            warn!("{}: jobs for {} not enqueued: {}", feature, dir.display(), errors);
        }
        ids.into_iter().flatten().collect()
    }
}

struct FeatureTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// The event task of a feature.
#[derive(Default)]
pub(crate) struct TaskSlot {
    task: Mutex<Option<FeatureTask>>,
}

impl TaskSlot {
    /// Spawn `run` unless a task is already running.
    pub(crate) fn start<F, Fut>(&self, run: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.task.lock();
        if slot.is_some() {
            return false;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(cancel.clone()));
        *slot = Some(FeatureTask { cancel, handle });
        true
    }

    pub(crate) fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Cancel the task and wait for it to unsubscribe.
    pub(crate) async fn stop(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(err) = task.handle.await {
                if err.is_panic() {
                    error!("feature task panicked: {}", err);
                }
            }
        }
    }
}

/// Parsed files of a directory plus per-file diagnostics.
#[derive(Debug, Default)]
pub(crate) struct ParsedDir {
    pub files: BTreeMap<String, File>,
    pub diagnostics: BTreeMap<String, Diagnostics>,
}

/// Parse one file of `dir`.
pub(crate) fn parse_file(fs: &dyn ReadOnlyFs, dir: &Path, filename: &str) -> Result<(File, Diagnostics), JobError> {
    let path = dir.join(filename);
    let src = fs.read_file(&path).map_err(|err| JobError::io(&path, &err))?;
    Ok(tfls_hcl::parse_file(&src, filename))
}

/// Parse every file of `dir` accepted by `accept`.
///
/// An unreadable directory fails the whole parse; an unreadable file is
/// logged and skipped.
pub(crate) fn parse_dir(fs: &dyn ReadOnlyFs, dir: &Path, accept: fn(&str) -> bool) -> Result<ParsedDir, JobError> {
    let entries = fs.read_dir(dir).map_err(|err| JobError::io(dir, &err))?;
    let mut parsed = ParsedDir::default();
    for entry in entries {
        if entry.is_dir || !accept(&entry.name) {
            continue;
        }
        match parse_file(fs, dir, &entry.name) {
            Ok((file, diags)) => {
                parsed.diagnostics.insert(entry.name.clone(), diags);
                parsed.files.insert(entry.name, file);
            }
            Err(err) => warn!("parse: skipping {}: {}", dir.join(&entry.name).display(), err),
        }
    }
    Ok(parsed)
}

/// Remove every record at or below `path` and drop their queued jobs.
///
/// Returns the number of records removed.
pub(crate) fn remove_records_under<R: Record>(table: &RecordTable<R>, jobs: &JobStore, path: &Path) -> usize {
    let mut removed = 0;
    for dir in table.paths().into_iter().filter(|p| p.starts_with(path)) {
        if table.remove(&dir) {
            removed += 1;
        }
        jobs.dequeue_jobs_for_dir(&dir);
    }
    removed
}

/// File name of `changed` if it is a file directly inside `dir` accepted
/// by `accept`.
pub(crate) fn changed_file_in<'a>(dir: &Path, changed: Option<&'a Path>, accept: fn(&str) -> bool) -> Option<&'a str> {
    let changed = changed?;
    if changed.parent() != Some(dir) {
        return None;
    }
    let name = changed.file_name()?.to_str()?;
    accept(name).then_some(name)
}

/// A record field marked `Loading` while a job computes it.
///
/// Dropping the guard without finishing it, on an early return or a panic
/// in the job, puts the field back to `Unknown` so later runs do not skip it.
pub(crate) struct FieldLoad<'a, R: Record, T> {
    table: &'a RecordTable<R>,
    dir: &'a Path,
    field: fn(&mut R) -> &mut Loadable<T>,
    done: bool,
}

impl<'a, R: Record, T> FieldLoad<'a, R, T> {
    pub(crate) fn start(
        table: &'a RecordTable<R>,
        dir: &'a Path,
        field: fn(&mut R) -> &mut Loadable<T>,
    ) -> Result<Self, JobError> {
        table.update(dir, |r| field(r).set_loading())?;
        Ok(Self {
            table,
            dir,
            field,
            done: false,
        })
    }

    /// Store `result` in the field and return the job outcome.
    pub(crate) fn finish(self, result: Result<T, JobError>) -> JobResult {
        let outcome = result.as_ref().map(|_| ()).map_err(JobError::clone);
        let field = self.field;
        self.commit(move |r| field(r).load(result))?;
        outcome
    }

    /// Apply `f`, which must load the field.
    pub(crate) fn commit(mut self, f: impl FnOnce(&mut R)) -> Result<(), JobError> {
        self.done = true;
        self.table.update(self.dir, f)?;
        Ok(())
    }
}

impl<R: Record, T> Drop for FieldLoad<'_, R, T> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let field = self.field;
        let reset = self.table.update(self.dir, |r| {
            let loadable = field(r);
            if loadable.state() == OpState::Loading {
                loadable.reset();
            }
        });
        if reset.is_ok() {
            debug!("{}: {} left unfinished", self.table.name(), self.dir.display());
        }
    }
}

/// Records holding the parsed files of a directory.
pub(crate) trait ParsedRecord: Record {
    fn parsed_files_mut(&mut self) -> &mut Loadable<ParsedFiles>;

    fn parse_diagnostics_mut(&mut self) -> &mut Arc<BTreeMap<String, Diagnostics>>;
}

/// Parse the files of `dir` into its record.
///
/// With a `changed` file and files already loaded, only that file is parsed
/// and merged into the stored map inside the record update, so reparses of
/// other files of the directory are kept. Everything else, including a
/// failed read of the changed file, parses the whole directory.
pub(crate) fn parse_into_record<R: ParsedRecord>(
    table: &RecordTable<R>,
    fs: &dyn ReadOnlyFs,
    dir: &Path,
    changed: Option<&str>,
    accept: fn(&str) -> bool,
) -> JobResult {
    if let Some(filename) = changed {
        match merge_parsed_file(table, fs, dir, filename) {
            Ok(true) => return Ok(()),
            Ok(false) => debug!("{}: {} not parsed yet, parsing in full", table.name(), dir.display()),
            Err(err) => debug!("{}: reparsing {} in full: {}", table.name(), dir.display(), err),
        }
    }

    let loading = FieldLoad::start(table, dir, R::parsed_files_mut)?;
    let result = parse_dir(fs, dir, accept);
    let outcome = result.as_ref().map(|_| ()).map_err(JobError::clone);
    loading.commit(move |r| match result {
        Ok(parsed) => {
            r.parsed_files_mut().set(Some(Arc::new(parsed.files)), None);
            *r.parse_diagnostics_mut() = Arc::new(parsed.diagnostics);
        }
        Err(err) => {
            r.parsed_files_mut().set(None, Some(err));
            *r.parse_diagnostics_mut() = Arc::default();
        }
    })?;
    outcome
}

/// Parse one file and merge it into the loaded files of `dir`. Returns
/// `false` if there was nothing to merge into.
fn merge_parsed_file<R: ParsedRecord>(
    table: &RecordTable<R>,
    fs: &dyn ReadOnlyFs,
    dir: &Path,
    filename: &str,
) -> Result<bool, JobError> {
    let (file, diags) = parse_file(fs, dir, filename)?;
    let mut merged = false;
    table.update(dir, |r| {
        let parsed = r.parsed_files_mut();
        if !parsed.is_loaded() {
            return;
        }
        let Some(files) = parsed.data() else {
            return;
        };
        let mut files = BTreeMap::clone(files);
        files.insert(filename.to_string(), file);
        parsed.set(Some(Arc::new(files)), None);
        Arc::make_mut(r.parse_diagnostics_mut()).insert(filename.to_string(), diags);
        merged = true;
    })?;
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filenames::is_module_filename;
    use std::path::PathBuf;
    use tfls_core::OsFs;

    #[test]
    fn test_parse_dir_filters_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.tf"), "variable \"a\" {}\n").unwrap();
        std::fs::write(dir.path().join("prod.tfvars"), "a = 1\n").unwrap();
        std::fs::write(dir.path().join("broken.tf"), "resource {\n").unwrap();
        std::fs::create_dir(dir.path().join("sub.tf")).unwrap();

        let parsed = parse_dir(&OsFs, dir.path(), is_module_filename).unwrap();
        let names: Vec<&String> = parsed.files.keys().collect();
        assert_eq!(names, vec!["broken.tf", "main.tf"]);
        assert!(parsed.diagnostics["broken.tf"].has_errors());
        assert!(parsed.diagnostics["main.tf"].is_empty());
    }

    #[test]
    fn test_parse_dir_missing() {
        let err = parse_dir(&OsFs, Path::new("/nonexistent/tfls"), is_module_filename).unwrap_err();
        assert!(matches!(err, JobError::Io { .. }));
    }

    #[test]
    fn test_changed_file_in() {
        let dir = PathBuf::from("/work");
        let main = PathBuf::from("/work/main.tf");
        let nested = PathBuf::from("/work/mod/main.tf");
        assert_eq!(changed_file_in(&dir, Some(&main), is_module_filename), Some("main.tf"));
        assert_eq!(changed_file_in(&dir, Some(&nested), is_module_filename), None);
        assert_eq!(changed_file_in(&dir, None, is_module_filename), None);
    }

    #[derive(Debug, Clone)]
    struct Dir(PathBuf);

    impl Record for Dir {
        fn new(path: &Path) -> Self {
            Dir(path.to_path_buf())
        }

        fn path(&self) -> &Path {
            &self.0
        }
    }

    #[test]
    fn test_remove_records_under() {
        let table: RecordTable<Dir> = RecordTable::new("dirs");
        for dir in ["/work", "/work/a", "/work/a/b", "/work/ab"] {
            table.add(Path::new(dir)).unwrap();
        }
        let removed = remove_records_under(&table, &JobStore::new(), Path::new("/work/a"));
        assert_eq!(removed, 2);
        assert_eq!(table.paths(), vec![PathBuf::from("/work"), PathBuf::from("/work/ab")]);
    }

    #[derive(Debug, Clone)]
    struct Counted {
        path: PathBuf,
        value: Loadable<u32>,
    }

    impl Record for Counted {
        fn new(path: &Path) -> Self {
            Counted {
                path: path.to_path_buf(),
                value: Loadable::default(),
            }
        }

        fn path(&self) -> &Path {
            &self.path
        }
    }

    fn counted(dir: &Path) -> RecordTable<Counted> {
        let table = RecordTable::new("counted");
        table.add(dir).unwrap();
        table
    }

    #[test]
    fn test_field_load_finish() {
        let dir = Path::new("/work");
        let table = counted(dir);
        let loading = FieldLoad::start(&table, dir, |r| &mut r.value).unwrap();
        assert_eq!(table.get(dir).unwrap().value.state(), OpState::Loading);
        loading.finish(Ok(3)).unwrap();
        assert_eq!(table.get(dir).unwrap().value.data(), Some(&3));

        let loading = FieldLoad::start(&table, dir, |r| &mut r.value).unwrap();
        assert!(loading.finish(Err(JobError::failed("boom"))).is_err());
        let record = table.get(dir).unwrap();
        assert!(record.value.is_loaded());
        assert!(matches!(record.value.error(), Some(JobError::Failed(m)) if m == "boom"));
    }

    #[test]
    fn test_field_load_reset_on_early_return() {
        let dir = Path::new("/work");
        let table = counted(dir);
        let job = || -> JobResult {
            let _loading = FieldLoad::start(&table, dir, |r| &mut r.value)?;
            Err(JobError::Cancelled)
        };
        assert!(job().is_err());
        assert!(table.get(dir).unwrap().value.is_unknown());
    }

    #[test]
    fn test_field_load_reset_on_panic() {
        let dir = Path::new("/work");
        let table = counted(dir);
        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _loading = FieldLoad::start(&table, dir, |r| &mut r.value).unwrap();
            panic!("job panicked");
        }));
        assert!(panicked.is_err());
        assert!(table.get(dir).unwrap().value.is_unknown());
    }

    #[test]
    fn test_field_load_on_removed_record() {
        let dir = Path::new("/work");
        let table = counted(dir);
        let loading = FieldLoad::start(&table, dir, |r| &mut r.value).unwrap();
        assert!(table.remove(dir));
        drop(loading);
        assert!(!table.exists(dir));
    }

    #[tokio::test]
    async fn test_task_slot_start_once() {
        let slot = TaskSlot::default();
        assert!(slot.start(|cancel| async move { cancel.cancelled().await }));
        assert!(!slot.start(|cancel| async move { cancel.cancelled().await }));
        assert!(slot.is_running());
        slot.stop().await;
        assert!(!slot.is_running());
    }
}

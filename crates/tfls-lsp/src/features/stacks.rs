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

//! Stacks feature: indexes `*.tfstack.hcl` and `*.tfdeploy.hcl` files.

use super::{changed_file_in, parse_into_record, remove_records_under, FeatureContext, ParsedRecord, TaskSlot};
use crate::config::ValidationOptions;
use crate::constants::FEATURE_STACKS;
use crate::decoder::stacks::{load_stack_metadata, validate_stack, StackMetadata};
use crate::decoder::ParsedFiles;
use crate::filenames::is_stacks_related_filename;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tfls_core::{
    ChangeType, DidChangeEvent, DidChangeWatchedEvent, DidOpenEvent, DiscoverEvent, EventBus, Job,
    JobBatch, JobContext, JobError, JobId, JobResult, JobType, LanguageId, Loadable, ReadOnlyFs,
    Record, RecordTable, RequestContext, StoreResult, Subscription,
};
use tfls_hcl::Diagnostics;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const PARSE_STACKS: JobType = JobType("ParseStacks");
pub const LOAD_STACK_METADATA: JobType = JobType("LoadStackMetadata");
pub const STACKS_VALIDATION: JobType = JobType("StacksValidation");

pub type StackStore = RecordTable<StackRecord>;

#[derive(Debug, Clone)]
pub struct StackRecord {
    path: PathBuf,
    pub parsed_files: Loadable<ParsedFiles>,
    pub parse_diagnostics: Arc<BTreeMap<String, Diagnostics>>,
    pub meta: Loadable<Arc<StackMetadata>>,
    pub validation_diagnostics: Loadable<Diagnostics>,
}

impl Record for StackRecord {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            parsed_files: Loadable::default(),
            parse_diagnostics: Arc::default(),
            meta: Loadable::default(),
            validation_diagnostics: Loadable::default(),
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl ParsedRecord for StackRecord {
    fn parsed_files_mut(&mut self) -> &mut Loadable<ParsedFiles> {
        &mut self.parsed_files
    }

    fn parse_diagnostics_mut(&mut self) -> &mut Arc<BTreeMap<String, Diagnostics>> {
        &mut self.parse_diagnostics
    }
}

fn is_stack_language(language: LanguageId) -> bool {
    matches!(language, LanguageId::TerraformStacks | LanguageId::TerraformDeploy)
}

fn is_stacks_file_path(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(is_stacks_related_filename)
        .unwrap_or(false)
}

#[derive(Clone)]
struct StacksIndexer {
    store: Arc<StackStore>,
    fs: Arc<dyn ReadOnlyFs>,
    validation: ValidationOptions,
}

impl StacksIndexer {
    fn dag(&self, dir: &Path, request: &RequestContext) -> JobBatch {
        let mut batch = JobBatch::new();
        let parse = batch.push(self.job(dir, PARSE_STACKS, request, Self::parse_stacks));
        let meta = batch.push_after(
            self.job(dir, LOAD_STACK_METADATA, request, Self::load_stack_metadata),
            &[parse],
        );
        if self.validation.enhanced_validation() {
            batch.push_after(
                self.job(dir, STACKS_VALIDATION, request, Self::stacks_validation),
                &[parse, meta],
            );
        }
        batch
    }

    fn job<F, Fut>(&self, dir: &Path, job_type: JobType, request: &RequestContext, func: F) -> Job
    where
        F: FnOnce(StacksIndexer, JobContext) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = JobResult> + Send + 'static,
    {
        let indexer = self.clone();
        Job::new(dir, job_type, move |ctx| func(indexer, ctx))
            .ignore_state(true)
            .context(request.clone())
    }

    async fn parse_stacks(self, ctx: JobContext) -> JobResult {
        let dir = ctx.dir.as_path();
        let record = self.store.get(dir)?;
        if !ctx.ignore_state && !record.parsed_files.is_unknown() {
            return Err(JobError::state_not_changed(dir));
        }

        let changed = changed_file_in(dir, ctx.request.changed_document(), is_stacks_related_filename);
        parse_into_record(&self.store, self.fs.as_ref(), dir, changed, is_stacks_related_filename)
    }

    async fn load_stack_metadata(self, ctx: JobContext) -> JobResult {
        let dir = ctx.dir.as_path();
        let record = self.store.get(dir)?;
        if !ctx.ignore_state && !record.meta.is_unknown() {
            return Err(JobError::state_not_changed(dir));
        }
        let result = record
            .parsed_files
            .data()
            .map(|files| Arc::new(load_stack_metadata(files)))
            .ok_or_else(|| JobError::failed(format!("{}: stack not parsed", dir.display())));
        let outcome = result.as_ref().map(|_| ()).map_err(JobError::clone);
        self.store.update(dir, move |r| r.meta.load(result))?;
        outcome
    }

    async fn stacks_validation(self, ctx: JobContext) -> JobResult {
        let dir = ctx.dir.as_path();
        let record = self.store.get(dir)?;
        if !ctx.ignore_state && !record.validation_diagnostics.is_unknown() {
            return Err(JobError::state_not_changed(dir));
        }
        let result = record
            .parsed_files
            .data()
            .map(|files| validate_stack(files))
            .ok_or_else(|| JobError::failed(format!("{}: stack not parsed", dir.display())));
        let outcome = result.as_ref().map(|_| ()).map_err(JobError::clone);
        self.store.update(dir, move |r| r.validation_diagnostics.load(result))?;
        outcome
    }
}

pub struct StacksFeature {
    ctx: FeatureContext,
    indexer: StacksIndexer,
    task: TaskSlot,
}

struct Subscriptions {
    discover: Subscription<DiscoverEvent>,
    did_open: Subscription<DidOpenEvent>,
    did_change: Subscription<DidChangeEvent>,
    did_change_watched: Subscription<DidChangeWatchedEvent>,
}

impl Subscriptions {
    fn new(bus: &EventBus) -> Self {
        Self {
            discover: bus.on_discover(FEATURE_STACKS),
            did_open: bus.on_did_open(FEATURE_STACKS),
            did_change: bus.on_did_change(FEATURE_STACKS),
            did_change_watched: bus.on_did_change_watched(FEATURE_STACKS),
        }
    }

    fn unsubscribe(self, bus: &EventBus) {
        bus.discover().unsubscribe(self.discover);
        bus.did_open().unsubscribe(self.did_open);
        bus.did_change().unsubscribe(self.did_change);
        bus.did_change_watched().unsubscribe(self.did_change_watched);
    }
}

impl StacksFeature {
    pub fn new(ctx: FeatureContext) -> Self {
        let indexer = StacksIndexer {
            store: Arc::new(RecordTable::new("stacks")),
            fs: Arc::clone(&ctx.fs),
            validation: ctx.validation.clone(),
        };
        Self {
            ctx,
            indexer,
            task: TaskSlot::default(),
        }
    }

    pub fn store(&self) -> &Arc<StackStore> {
        &self.indexer.store
    }

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
        info!("{}: started", FEATURE_STACKS);
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
                else => break,
            }
        }
        subs.unsubscribe(&self.ctx.bus);
        info!("{}: stopped", FEATURE_STACKS);
    }

    pub fn discover(&self, event: &DiscoverEvent) -> bool {
        if !event.files.iter().any(|f| is_stacks_related_filename(f)) {
            return false;
        }
        self.store().add_if_not_exists(&event.dir)
    }

    pub fn did_open(&self, event: &DidOpenEvent) -> Vec<JobId> {
        if !is_stack_language(event.language) {
            return Vec::new();
        }
        self.store().add_if_not_exists(&event.dir);
        self.index(&event.dir, &event.context)
    }

    pub fn did_change(&self, event: &DidChangeEvent) -> Vec<JobId> {
        if !is_stack_language(event.language) {
            return Vec::new();
        }
        self.store().add_if_not_exists(&event.dir);
        self.index(&event.dir, &event.context)
    }

    pub fn did_change_watched(&self, event: &DidChangeWatchedEvent) -> Vec<JobId> {
        let path = event.path.as_path();
        if event.change == ChangeType::Deleted && !self.ctx.fs.exists(path) {
            let removed = remove_records_under(self.store(), &self.ctx.jobs, path);
            if removed > 0 {
                debug!("{}: removed {} records under {}", FEATURE_STACKS, removed, path.display());
                return Vec::new();
            }
        }
        if !is_stacks_file_path(path) || self.ctx.documents.is_document_open(path) {
            return Vec::new();
        }
        match path.parent() {
            Some(dir) if self.store().exists(dir) => self.index(dir, &event.context),
            _ => Vec::new(),
        }
    }

    fn index(&self, dir: &Path, request: &RequestContext) -> Vec<JobId> {
        let batch = self.indexer.dag(dir, request);
        self.ctx.enqueue(FEATURE_STACKS, dir, batch)
    }

    pub fn stack_record(&self, path: &Path) -> StoreResult<Arc<StackRecord>> {
        self.store().get(path)
    }

    pub fn stack_meta(&self, path: &Path) -> StoreResult<Option<Arc<StackMetadata>>> {
        Ok(self.store().get(path)?.meta.data().cloned())
    }

    /// Parser and validation diagnostics by file name.
    pub fn diagnostics(&self, path: &Path) -> StoreResult<BTreeMap<String, Diagnostics>> {
        let record = self.store().get(path)?;
        let mut by_file: BTreeMap<String, Diagnostics> = record
            .parse_diagnostics
            .iter()
            .map(|(name, diags)| (name.clone(), diags.clone()))
            .collect();
        if let Some(diags) = record.validation_diagnostics.data() {
            for diag in diags.iter() {
                by_file
                    .entry(diag.range.filename.clone())
                    .or_default()
                    .push(diag.clone());
            }
        }
        Ok(by_file)
    }
}

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

//! Variables feature: indexes `*.tfvars` / `*.tfvars.json` files.
//!
//! Assignments refer to the variables of the module in the same directory,
//! so validation reads that module's metadata. The DAG makes sure the
//! module is at least parsed and its metadata loaded before validating.

use super::modules::jobs::{LOAD_MODULE_METADATA, PARSE_MODULE_CONFIGURATION};
use super::modules::{ModuleIndexer, ModuleStore};
use super::{changed_file_in, parse_into_record, remove_records_under, FeatureContext, ParsedRecord, TaskSlot};
use crate::constants::FEATURE_VARIABLES;
use crate::decoder::variables::{collect_vars_origins, validate_vars};
use crate::decoder::{ParsedFiles, ReferenceOrigin};
use crate::filenames::{is_vars_file_path, is_vars_filename};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tfls_core::{
    ChangeType, DidChangeEvent, DidChangeWatchedEvent, DidOpenEvent, DiscoverEvent, EventBus, Job,
    JobBatch, JobContext, JobError, JobId, JobResult, JobType, LanguageId, Loadable, Record,
    RecordTable, RequestContext, StoreResult, Subscription,
};
use tfls_hcl::Diagnostics;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const PARSE_VARIABLES: JobType = JobType("ParseVariables");
pub const DECODE_VARS_REFERENCES: JobType = JobType("DecodeVarsReferences");
pub const SCHEMA_VARIABLES_VALIDATION: JobType = JobType("SchemaVariablesValidation");

pub type VariableStore = RecordTable<VariableRecord>;

#[derive(Debug, Clone)]
pub struct VariableRecord {
    path: PathBuf,
    pub parsed_files: Loadable<ParsedFiles>,
    pub parse_diagnostics: Arc<BTreeMap<String, Diagnostics>>,
    pub origins: Loadable<Arc<Vec<ReferenceOrigin>>>,
    pub validation_diagnostics: Loadable<Diagnostics>,
}

impl Record for VariableRecord {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            parsed_files: Loadable::default(),
            parse_diagnostics: Arc::default(),
            origins: Loadable::default(),
            validation_diagnostics: Loadable::default(),
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl ParsedRecord for VariableRecord {
    fn parsed_files_mut(&mut self) -> &mut Loadable<ParsedFiles> {
        &mut self.parsed_files
    }

    fn parse_diagnostics_mut(&mut self) -> &mut Arc<BTreeMap<String, Diagnostics>> {
        &mut self.parse_diagnostics
    }
}

// ----------------------------------------------------------------------
// Jobs
// ----------------------------------------------------------------------

#[derive(Clone)]
struct VarsIndexer {
    store: Arc<VariableStore>,
    modules: ModuleIndexer,
}

impl VarsIndexer {
    fn dag(&self, dir: &Path, request: &RequestContext) -> JobBatch {
        let mut batch = JobBatch::new();
        let parse = batch.push(self.job(dir, PARSE_VARIABLES, request, Self::parse_variables));
        let refs = batch.push_after(
            self.job(dir, DECODE_VARS_REFERENCES, request, Self::decode_vars_references),
            &[parse],
        );

        if self.modules.validation.enhanced_validation() {
            // Skipped quickly when the module is already indexed.
            self.modules.store.add_if_not_exists(dir);
            let module_parse = batch.push(self.modules.job(
                dir,
                PARSE_MODULE_CONFIGURATION,
                false,
                request,
                ModuleIndexer::parse_module_configuration,
            ));
            let module_meta = batch.push_after(
                self.modules
                    .job(dir, LOAD_MODULE_METADATA, false, request, ModuleIndexer::load_module_metadata),
                &[module_parse],
            );
            batch.push_after(
                self.job(dir, SCHEMA_VARIABLES_VALIDATION, request, Self::schema_variables_validation),
                &[parse, refs, module_meta],
            );
        }
        batch
    }

    fn job<F, Fut>(&self, dir: &Path, job_type: JobType, request: &RequestContext, func: F) -> Job
    where
        F: FnOnce(VarsIndexer, JobContext) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = JobResult> + Send + 'static,
    {
        let indexer = self.clone();
        Job::new(dir, job_type, move |ctx| func(indexer, ctx))
            .ignore_state(true)
            .context(request.clone())
    }

    async fn parse_variables(self, ctx: JobContext) -> JobResult {
        let dir = ctx.dir.as_path();
        let record = self.store.get(dir)?;
        if !ctx.ignore_state && !record.parsed_files.is_unknown() {
            return Err(JobError::state_not_changed(dir));
        }

        let changed = changed_file_in(dir, ctx.request.changed_document(), is_vars_filename);
        parse_into_record(&self.store, self.modules.fs.as_ref(), dir, changed, is_vars_filename)
    }

    async fn decode_vars_references(self, ctx: JobContext) -> JobResult {
        let dir = ctx.dir.as_path();
        let record = self.store.get(dir)?;
        if !ctx.ignore_state && !record.origins.is_unknown() {
            return Err(JobError::state_not_changed(dir));
        }
        let result = record
            .parsed_files
            .data()
            .map(|files| Arc::new(collect_vars_origins(dir, files)))
            .ok_or_else(|| JobError::failed(format!("{}: variables not parsed", dir.display())));
        let outcome = result.as_ref().map(|_| ()).map_err(JobError::clone);
        self.store.update(dir, move |r| r.origins.load(result))?;
        outcome
    }

    async fn schema_variables_validation(self, ctx: JobContext) -> JobResult {
        let dir = ctx.dir.as_path();
        let record = self.store.get(dir)?;
        if !ctx.ignore_state && !record.validation_diagnostics.is_unknown() {
            return Err(JobError::state_not_changed(dir));
        }
        let module_meta = self
            .modules
            .store
            .get(dir)
            .ok()
            .and_then(|module| module.meta.data().cloned());
        let result = record
            .parsed_files
            .data()
            .map(|files| validate_vars(files, module_meta.as_deref()))
            .ok_or_else(|| JobError::failed(format!("{}: variables not parsed", dir.display())));
        let outcome = result.as_ref().map(|_| ()).map_err(JobError::clone);
        self.store.update(dir, move |r| r.validation_diagnostics.load(result))?;
        outcome
    }
}

// ----------------------------------------------------------------------
// Feature
// ----------------------------------------------------------------------

pub struct VariablesFeature {
    ctx: FeatureContext,
    indexer: VarsIndexer,
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
            discover: bus.on_discover(FEATURE_VARIABLES),
            did_open: bus.on_did_open(FEATURE_VARIABLES),
            did_change: bus.on_did_change(FEATURE_VARIABLES),
            did_change_watched: bus.on_did_change_watched(FEATURE_VARIABLES),
        }
    }

    fn unsubscribe(self, bus: &EventBus) {
        bus.discover().unsubscribe(self.discover);
        bus.did_open().unsubscribe(self.did_open);
        bus.did_change().unsubscribe(self.did_change);
        bus.did_change_watched().unsubscribe(self.did_change_watched);
    }
}

impl VariablesFeature {
    /// `modules` gives validation access to the module declarations of the
    /// same directory.
    pub fn new(ctx: FeatureContext, modules: ModuleIndexer) -> Self {
        Self {
            ctx,
            indexer: VarsIndexer {
                store: Arc::new(RecordTable::new("variables")),
                modules,
            },
            task: TaskSlot::default(),
        }
    }

    pub fn store(&self) -> &Arc<VariableStore> {
        &self.indexer.store
    }

    fn module_store(&self) -> &Arc<ModuleStore> {
        &self.indexer.modules.store
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
        info!("{}: started", FEATURE_VARIABLES);
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
        info!("{}: stopped", FEATURE_VARIABLES);
    }

    pub fn discover(&self, event: &DiscoverEvent) -> bool {
        if !event.files.iter().any(|f| is_vars_filename(f)) {
            return false;
        }
        self.store().add_if_not_exists(&event.dir)
    }

    pub fn did_open(&self, event: &DidOpenEvent) -> Vec<JobId> {
        if event.language != LanguageId::TerraformVars {
            return Vec::new();
        }
        self.store().add_if_not_exists(&event.dir);
        self.index(&event.dir, &event.context)
    }

    pub fn did_change(&self, event: &DidChangeEvent) -> Vec<JobId> {
        if event.language != LanguageId::TerraformVars {
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
                debug!("{}: removed {} records under {}", FEATURE_VARIABLES, removed, path.display());
                return Vec::new();
            }
        }
        if !is_vars_file_path(path) || self.ctx.documents.is_document_open(path) {
            return Vec::new();
        }
        let Some(dir) = path.parent() else {
            return Vec::new();
        };
        if event.change == ChangeType::Created {
            self.store().add_if_not_exists(dir);
        }
        if !self.store().exists(dir) {
            return Vec::new();
        }
        self.index(dir, &event.context)
    }

    fn index(&self, dir: &Path, request: &RequestContext) -> Vec<JobId> {
        let batch = self.indexer.dag(dir, request);
        self.ctx.enqueue(FEATURE_VARIABLES, dir, batch)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn variable_record(&self, path: &Path) -> StoreResult<Arc<VariableRecord>> {
        self.store().get(path)
    }

    /// The `var.<name>` origin of the assignment at a position of `file`.
    pub fn origin_at(&self, file: &Path, line: usize, column: usize) -> Option<ReferenceOrigin> {
        let record = self.store().get(file.parent()?).ok()?;
        record
            .origins
            .data()?
            .iter()
            .find(|o| o.file_path() == file && o.range.contains_pos(line, column))
            .cloned()
    }

    /// Parser and validation diagnostics by file name, with an entry for
    /// every parsed file.
    pub fn diagnostics(&self, path: &Path) -> StoreResult<BTreeMap<String, Diagnostics>> {
        let record = self.store().get(path)?;
        let mut by_file: BTreeMap<String, Diagnostics> = record
            .parse_diagnostics
            .iter()
            .map(|(name, diags)| (name.clone(), diags.clone()))
            .collect();
        if let Some(files) = record.parsed_files.data() {
            for name in files.keys() {
                by_file.entry(name.clone()).or_default();
            }
        }
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

    /// Whether a module record exists for `path`.
    pub fn has_module(&self, path: &Path) -> bool {
        self.module_store().exists(path)
    }
}

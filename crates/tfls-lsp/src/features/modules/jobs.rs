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

//! Jobs that index a module directory and the DAGs that chain them.
//!
//! ```text
//! ParseModuleConfiguration -> LoadModuleMetadata -+-> GetModuleDataFromRegistry (low)
//!                                                 |
//!                                           (defer)
//!                                                 v
//!     local module calls: child Parse -> Meta -> PreloadEmbeddedSchema -> Targets, Origins
//!     PreloadEmbeddedSchema -> DecodeReferenceTargets
//!                           -> DecodeReferenceOrigins (after the children)
//!                           -> SchemaModuleValidation, ReferenceValidation
//! ```

use super::ModuleStore;
use crate::config::ValidationOptions;
use crate::decoder::{
    collect_reference_origins, collect_reference_targets, load_module_metadata, validate_references,
    validate_schema, ChildModule, ModuleSource, PathContext, ReferenceTarget, TargetKind,
};
use crate::features::{changed_file_in, parse_into_record, FieldLoad};
use crate::filenames::is_module_filename;
use crate::registry::{RegistryClient, RegistryModuleStore};
use crate::schema::ProviderSchemaStore;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tfls_core::{
    BatchRef, Job, JobBatch, JobContext, JobError, JobPriority, JobResult, JobType, Loadable,
    MultiError, ReadOnlyFs, RequestContext, StoreError,
};
use tracing::{debug, warn};

pub const PARSE_MODULE_CONFIGURATION: JobType = JobType("ParseModuleConfiguration");
pub const LOAD_MODULE_METADATA: JobType = JobType("LoadModuleMetadata");
pub const PRELOAD_EMBEDDED_SCHEMA: JobType = JobType("PreloadEmbeddedSchema");
pub const DECODE_REFERENCE_TARGETS: JobType = JobType("DecodeReferenceTargets");
pub const DECODE_REFERENCE_ORIGINS: JobType = JobType("DecodeReferenceOrigins");
pub const SCHEMA_MODULE_VALIDATION: JobType = JobType("SchemaModuleValidation");
pub const REFERENCE_VALIDATION: JobType = JobType("ReferenceValidation");
pub const GET_MODULE_DATA_FROM_REGISTRY: JobType = JobType("GetModuleDataFromRegistry");

/// Job functions of the modules feature and the collaborators they need.
#[derive(Clone)]
pub struct ModuleIndexer {
    pub store: Arc<ModuleStore>,
    pub fs: Arc<dyn ReadOnlyFs>,
    pub schemas: Arc<ProviderSchemaStore>,
    pub registry: Arc<dyn RegistryClient>,
    pub registry_modules: Arc<RegistryModuleStore>,
    pub validation: ValidationOptions,
}

impl ModuleIndexer {
    // ------------------------------------------------------------------
    // DAGs
    // ------------------------------------------------------------------

    /// Full re-index of an open or changed directory.
    pub fn index_dag(&self, dir: &Path, request: &RequestContext) -> JobBatch {
        let mut batch = JobBatch::new();
        let parse = batch.push(self.job(dir, PARSE_MODULE_CONFIGURATION, true, request, Self::parse_module_configuration));

        let indexer = self.clone();
        let meta = self
            .job(dir, LOAD_MODULE_METADATA, true, request, Self::load_module_metadata)
            .defer(move |jctx, err| indexer.after_metadata(jctx, err));
        let meta = batch.push_after(meta, &[parse]);

        let registry = self
            .job(dir, GET_MODULE_DATA_FROM_REGISTRY, true, request, Self::get_module_data_from_registry)
            .priority(JobPriority::Low);
        batch.push_after(registry, &[meta]);
        batch
    }

    /// Follow-up of `LoadModuleMetadata` in [`Self::index_dag`].
    fn after_metadata(&self, jctx: &JobContext, err: Option<&JobError>) -> JobBatch {
        let dir = jctx.dir.as_path();
        if let Some(err) = err {
            warn!("modules: loading metadata of {} failed: {}", dir.display(), err);
        }

        let mut batch = JobBatch::new();
        let (children, errors) = self.decode_declared_module_calls(dir, true, &mut batch, &jctx.request);
        if !errors.is_empty() {
            warn!("modules: module calls of {}: {}", dir.display(), errors);
        }

        let request = &jctx.request;
        let schema = self
            .job(dir, PRELOAD_EMBEDDED_SCHEMA, true, request, Self::preload_embedded_schema)
            .depends_on([jctx.id]);
        let schema = batch.push(schema);
        let targets = batch.push_after(
            self.job(dir, DECODE_REFERENCE_TARGETS, true, request, Self::decode_reference_targets),
            &[schema],
        );
        let mut origin_deps = vec![schema];
        origin_deps.extend(children);
        let origins = batch.push_after(
            self.job(dir, DECODE_REFERENCE_ORIGINS, true, request, Self::decode_reference_origins),
            &origin_deps,
        );

        if self.validation.enhanced_validation() {
            let after = [schema, targets, origins];
            batch.push_after(
                self.job(dir, SCHEMA_MODULE_VALIDATION, true, request, Self::schema_module_validation),
                &after,
            );
            batch.push_after(
                self.job(dir, REFERENCE_VALIDATION, true, request, Self::reference_validation),
                &after,
            );
        }
        batch
    }

    /// Add records for the local modules called from `dir` and push their
    /// indexing jobs into `batch`.
    ///
    /// Returns the refs of every pushed job together with the calls that
    /// could not be scheduled. A failing call never stops the others.
    pub fn decode_declared_module_calls(
        &self,
        dir: &Path,
        ignore_state: bool,
        batch: &mut JobBatch,
        request: &RequestContext,
    ) -> (Vec<BatchRef>, MultiError) {
        let mut refs = Vec::new();
        let mut errors = MultiError::new();

        let meta = match self.store.get(dir) {
            Ok(record) => record.meta.data().cloned(),
            Err(err) => {
                errors.push(err);
                return (refs, errors);
            }
        };
        let Some(meta) = meta else {
            return (refs, errors);
        };

        for (call, child) in meta.local_module_calls(dir) {
            if !self.fs.is_dir(&child) {
                errors.push(JobError::Io {
                    path: child,
                    message: format!("source of module {:?} is not a directory", call.name),
                });
                continue;
            }
            let child_ignore_state = match self.store.add(&child) {
                Ok(()) => ignore_state,
                Err(StoreError::AlreadyExists(_)) => false,
                Err(err) => {
                    errors.push(err);
                    continue;
                }
            };
            debug!("modules: {} calls {}", dir.display(), child.display());
            refs.extend(self.decode_module_at_path(&child, child_ignore_state, batch, request));
        }

        (refs, errors)
    }

    /// Parse -> Meta -> PreloadEmbeddedSchema -> Targets + Origins for a
    /// called module.
    fn decode_module_at_path(
        &self,
        dir: &Path,
        ignore_state: bool,
        batch: &mut JobBatch,
        request: &RequestContext,
    ) -> Vec<BatchRef> {
        let parse = batch.push(self.job(dir, PARSE_MODULE_CONFIGURATION, ignore_state, request, Self::parse_module_configuration));
        let meta = batch.push_after(
            self.job(dir, LOAD_MODULE_METADATA, ignore_state, request, Self::load_module_metadata),
            &[parse],
        );
        let schema = batch.push_after(
            self.job(dir, PRELOAD_EMBEDDED_SCHEMA, ignore_state, request, Self::preload_embedded_schema),
            &[meta],
        );
        let decoded = [parse, meta, schema];
        let targets = batch.push_after(
            self.job(dir, DECODE_REFERENCE_TARGETS, ignore_state, request, Self::decode_reference_targets),
            &decoded,
        );
        let origins = batch.push_after(
            self.job(dir, DECODE_REFERENCE_ORIGINS, ignore_state, request, Self::decode_reference_origins),
            &decoded,
        );
        vec![parse, meta, schema, targets, origins]
    }

    /// A job running `func` with a clone of this indexer.
    pub(crate) fn job<F, Fut>(
        &self,
        dir: &Path,
        job_type: JobType,
        ignore_state: bool,
        request: &RequestContext,
        func: F,
    ) -> Job
    where
        F: FnOnce(ModuleIndexer, JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        let indexer = self.clone();
        Job::new(dir, job_type, move |ctx| func(indexer, ctx))
            .ignore_state(ignore_state)
            .context(request.clone())
    }

    // ------------------------------------------------------------------
    // Job functions
    // ------------------------------------------------------------------

    /// Parses the whole directory, or only the changed document when the
    /// directory was parsed before.
    pub async fn parse_module_configuration(self, ctx: JobContext) -> JobResult {
        let dir = ctx.dir.as_path();
        let record = self.store.get(dir)?;
        skip_unless_unknown(&ctx, &record.parsed_files)?;

        let changed = changed_file_in(dir, ctx.request.changed_document(), is_module_filename);
        parse_into_record(&self.store, self.fs.as_ref(), dir, changed, is_module_filename)
    }

    pub async fn load_module_metadata(self, ctx: JobContext) -> JobResult {
        let dir = ctx.dir.as_path();
        let record = self.store.get(dir)?;
        skip_unless_unknown(&ctx, &record.meta)?;
        let loading = FieldLoad::start(&self.store, dir, |r| &mut r.meta)?;

        let result = record
            .parsed_files
            .data()
            .map(|files| Arc::new(load_module_metadata(files)))
            .ok_or_else(|| not_loaded(dir, "configuration"));
        loading.finish(result)
    }

    /// Makes the bundled schemas of the providers used by the module
    /// available. Stores the number of providers with a known schema.
    pub async fn preload_embedded_schema(self, ctx: JobContext) -> JobResult {
        let dir = ctx.dir.as_path();
        let record = self.store.get(dir)?;
        skip_unless_unknown(&ctx, &record.preloaded_schema)?;
        let loading = FieldLoad::start(&self.store, dir, |r| &mut r.preloaded_schema)?;

        let result = record
            .meta
            .data()
            .map(|meta| {
                meta.provider_sources()
                    .iter()
                    .filter(|source| {
                        self.schemas.preload_embedded(source);
                        self.schemas.contains(source)
                    })
                    .count()
            })
            .ok_or_else(|| not_loaded(dir, "metadata"));
        loading.finish(result)
    }

    pub async fn decode_reference_targets(self, ctx: JobContext) -> JobResult {
        let dir = ctx.dir.as_path();
        let record = self.store.get(dir)?;
        skip_unless_unknown(&ctx, &record.reference_targets)?;
        let loading = FieldLoad::start(&self.store, dir, |r| &mut r.reference_targets)?;

        let result = build_path_context(&self.store, &self.schemas, dir)
            .map(|pctx| Arc::new(collect_reference_targets(&pctx)));
        loading.finish(result)
    }

    pub async fn decode_reference_origins(self, ctx: JobContext) -> JobResult {
        let dir = ctx.dir.as_path();
        let record = self.store.get(dir)?;
        skip_unless_unknown(&ctx, &record.reference_origins)?;
        let loading = FieldLoad::start(&self.store, dir, |r| &mut r.reference_origins)?;

        let result = build_path_context(&self.store, &self.schemas, dir)
            .map(|pctx| Arc::new(collect_reference_origins(&pctx)));
        loading.finish(result)
    }

    pub async fn schema_module_validation(self, ctx: JobContext) -> JobResult {
        let dir = ctx.dir.as_path();
        let record = self.store.get(dir)?;
        skip_unless_unknown(&ctx, &record.schema_diagnostics)?;
        let loading = FieldLoad::start(&self.store, dir, |r| &mut r.schema_diagnostics)?;

        let result = build_path_context(&self.store, &self.schemas, dir).map(|pctx| validate_schema(&pctx));
        loading.finish(result)
    }

    pub async fn reference_validation(self, ctx: JobContext) -> JobResult {
        let dir = ctx.dir.as_path();
        let record = self.store.get(dir)?;
        skip_unless_unknown(&ctx, &record.reference_diagnostics)?;
        let loading = FieldLoad::start(&self.store, dir, |r| &mut r.reference_diagnostics)?;

        let result = build_path_context(&self.store, &self.schemas, dir).map(|pctx| {
            let targets = complete_targets(&record.reference_targets, &pctx);
            let origins = record.reference_origins.data().cloned().unwrap_or_default();
            validate_references(&pctx.with_references(Arc::new(targets), origins))
        });
        loading.finish(result)
    }

    /// Fetches registry data for every public registry module call not
    /// already cached.
    pub async fn get_module_data_from_registry(self, ctx: JobContext) -> JobResult {
        let dir = ctx.dir.as_path();
        let record = self.store.get(dir)?;
        skip_unless_unknown(&ctx, &record.registry_data)?;
        let Some(meta) = record.meta.data().cloned() else {
            return Err(not_loaded(dir, "metadata"));
        };
        let loading = FieldLoad::start(&self.store, dir, |r| &mut r.registry_data)?;

        let mut fetched = 0;
        let mut errors = MultiError::new();
        for call in meta.module_calls.values() {
            let Some(ModuleSource::Registry(source)) = &call.source else {
                continue;
            };
            let version = call.version.as_deref();
            if !source.is_public() || self.registry_modules.contains(source, version) {
                continue;
            }
            if ctx.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            match self.registry.module_data(source, version).await {
                Ok(module) => {
                    self.registry_modules
                        .insert(source.clone(), call.version.clone(), module);
                    fetched += 1;
                }
                Err(err) => errors.push(JobError::failed(format!("module {:?}: {}", call.name, err))),
            }
        }

        let result = errors.into_result().map(|()| fetched).map_err(JobError::from);
        loading.finish(result)
    }
}

fn skip_unless_unknown<T>(ctx: &JobContext, field: &Loadable<T, JobError>) -> JobResult {
    if !ctx.ignore_state && !field.is_unknown() {
        return Err(JobError::state_not_changed(&ctx.dir));
    }
    Ok(())
}

fn not_loaded(dir: &Path, what: &str) -> JobError {
    JobError::failed(format!("{}: {} not loaded", dir.display(), what))
}

/// Decoder input for `dir`: its parsed files and metadata, the metadata of
/// its local children as far as loaded, and the known provider schemas.
pub(crate) fn build_path_context(
    store: &ModuleStore,
    schemas: &ProviderSchemaStore,
    dir: &Path,
) -> Result<PathContext, JobError> {
    let record = store.get(dir)?;
    let files = record
        .parsed_files
        .data()
        .cloned()
        .ok_or_else(|| not_loaded(dir, "configuration"))?;
    let meta = record.meta.data().cloned().ok_or_else(|| not_loaded(dir, "metadata"))?;

    let mut pctx = PathContext::new(dir, files, Arc::clone(&meta));
    for (call, path) in meta.local_module_calls(dir) {
        let child_meta = store.get(&path).ok().and_then(|child| child.meta.data().cloned());
        pctx = pctx.with_child(call.name.clone(), ChildModule { path, meta: child_meta });
    }
    for source in meta.provider_sources() {
        if let Some(schema) = schemas.get(&source) {
            pctx = pctx.with_provider_schema(source, schema);
        }
    }
    Ok(pctx)
}

/// Stored targets plus outputs of children whose metadata was loaded after
/// the targets were decoded.
pub(crate) fn complete_targets(
    stored: &Loadable<Arc<Vec<ReferenceTarget>>, JobError>,
    pctx: &PathContext,
) -> Vec<ReferenceTarget> {
    let mut targets = stored.data().map(|t| t.as_ref().clone()).unwrap_or_default();
    for target in collect_reference_targets(pctx) {
        let missing = !targets.iter().any(|t| t.address == target.address);
        if missing && (target.kind == TargetKind::ModuleOutput || stored.data().is_none()) {
            targets.push(target);
        }
    }
    targets
}

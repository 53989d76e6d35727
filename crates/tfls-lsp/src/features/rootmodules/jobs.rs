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

//! Root module jobs: Terraform CLI queries and data directory parsing.

use super::record::{parse_plugin_lock, ModuleManifest};
use super::RootStore;
use crate::constants::{MODULE_MANIFEST_PATH, PLUGIN_LOCK_FILE};
use crate::exec::ExecutorFactory;
use crate::features::FieldLoad;
use crate::schema::ProviderSchemaStore;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tfls_core::{
    Job, JobBatch, JobContext, JobError, JobPriority, JobResult, JobType, Loadable, MultiError,
    ReadOnlyFs, RequestContext,
};
use tracing::{debug, warn};

pub const GET_TERRAFORM_VERSION: JobType = JobType("GetTerraformVersion");
pub const PARSE_MODULE_MANIFEST: JobType = JobType("ParseModuleManifest");
pub const PARSE_PROVIDER_VERSIONS: JobType = JobType("ParseProviderVersions");
pub const OBTAIN_SCHEMA: JobType = JobType("ObtainSchema");

#[derive(Clone)]
pub struct RootIndexer {
    pub store: Arc<RootStore>,
    pub fs: Arc<dyn ReadOnlyFs>,
    pub executors: Arc<dyn ExecutorFactory>,
    pub schemas: Arc<ProviderSchemaStore>,
}

impl RootIndexer {
    /// Jobs for a root module with an open document. Each job is skipped
    /// once its field is loaded.
    pub fn open_dag(&self, dir: &Path, request: &RequestContext) -> JobBatch {
        let mut batch = JobBatch::new();
        batch.push(
            self.job(dir, GET_TERRAFORM_VERSION, false, request, Self::get_terraform_version)
                .priority(JobPriority::Low),
        );
        batch.push(self.job(dir, PARSE_MODULE_MANIFEST, false, request, Self::parse_module_manifest));
        if self.fs.exists(&dir.join(PLUGIN_LOCK_FILE)) {
            self.push_plugin_lock_jobs(&mut batch, dir, false, request);
        }
        batch
    }

    /// ParseProviderVersions -> ObtainSchema.
    pub fn plugin_lock_dag(&self, dir: &Path, request: &RequestContext) -> JobBatch {
        let mut batch = JobBatch::new();
        self.push_plugin_lock_jobs(&mut batch, dir, true, request);
        batch
    }

    pub fn manifest_dag(&self, dir: &Path, request: &RequestContext) -> JobBatch {
        let mut batch = JobBatch::new();
        batch.push(self.job(dir, PARSE_MODULE_MANIFEST, true, request, Self::parse_module_manifest));
        batch
    }

    fn push_plugin_lock_jobs(&self, batch: &mut JobBatch, dir: &Path, ignore_state: bool, request: &RequestContext) {
        let versions = batch.push(self.job(dir, PARSE_PROVIDER_VERSIONS, ignore_state, request, Self::parse_provider_versions));
        batch.push_after(
            self.job(dir, OBTAIN_SCHEMA, ignore_state, request, Self::obtain_schema)
                .priority(JobPriority::Low),
            &[versions],
        );
    }

    fn job<F, Fut>(&self, dir: &Path, job_type: JobType, ignore_state: bool, request: &RequestContext, func: F) -> Job
    where
        F: FnOnce(RootIndexer, JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        let indexer = self.clone();
        Job::new(dir, job_type, move |ctx| func(indexer, ctx))
            .ignore_state(ignore_state)
            .context(request.clone())
    }

    pub async fn get_terraform_version(self, ctx: JobContext) -> JobResult {
        let dir = ctx.dir.as_path();
        let record = self.store.get(dir)?;
        skip_unless_unknown(&ctx, &record.terraform_version)?;
        let loading = FieldLoad::start(&self.store, dir, |r| &mut r.terraform_version)?;

        let result = match self.executors.executor(dir) {
            Ok(executor) => executor.version().await.map_err(JobError::from),
            Err(err) => Err(JobError::from(err)),
        };
        if let Ok(version) = &result {
            debug!("rootmodules: terraform {} in {}", version.version, dir.display());
        }
        loading.finish(result)
    }

    pub async fn parse_module_manifest(self, ctx: JobContext) -> JobResult {
        let dir = ctx.dir.as_path();
        let record = self.store.get(dir)?;
        skip_unless_unknown(&ctx, &record.module_manifest)?;
        let loading = FieldLoad::start(&self.store, dir, |r| &mut r.module_manifest)?;

        let path = dir.join(MODULE_MANIFEST_PATH);
        let result = self
            .fs
            .read_file(&path)
            .map_err(|err| JobError::io(&path, &err))
            .and_then(|json| {
                ModuleManifest::parse(&json).map_err(|err| JobError::Io {
                    path: path.clone(),
                    message: err.to_string(),
                })
            })
            .map(Arc::new);
        loading.finish(result)
    }

    pub async fn parse_provider_versions(self, ctx: JobContext) -> JobResult {
        let dir = ctx.dir.as_path();
        let record = self.store.get(dir)?;
        skip_unless_unknown(&ctx, &record.installed_providers)?;
        let loading = FieldLoad::start(&self.store, dir, |r| &mut r.installed_providers)?;

        let path = dir.join(PLUGIN_LOCK_FILE);
        let result = self.fs.read_file(&path).map_err(|err| JobError::io(&path, &err)).map(|src| {
            let (providers, diags) = parse_plugin_lock(&src, PLUGIN_LOCK_FILE);
            for diag in diags.iter() {
                warn!("rootmodules: {}: {}", path.display(), diag);
            }
            Arc::new(providers)
        });
        loading.finish(result)
    }

    /// Loads provider schemas from the CLI. Without a working CLI the
    /// bundled schemas of the locked providers are used instead; every
    /// provider left without a schema is reported.
    pub async fn obtain_schema(self, ctx: JobContext) -> JobResult {
        let dir = ctx.dir.as_path();
        let record = self.store.get(dir)?;
        skip_unless_unknown(&ctx, &record.provider_schemas)?;
        let installed = record.installed_providers.data().cloned().unwrap_or_default();
        let loading = FieldLoad::start(&self.store, dir, |r| &mut r.provider_schemas)?;

        let mut errors = MultiError::new();
        let cli = match self.executors.executor(dir) {
            Ok(executor) => executor.provider_schemas().await,
            Err(err) => Err(err),
        };
        match cli {
            Ok(json) => {
                let loaded = self.schemas.load_cli_schemas(&json);
                debug!("rootmodules: {} provider schemas from CLI for {}", loaded, dir.display());
            }
            Err(err) => {
                errors.push(err);
                for source in installed.keys() {
                    self.schemas.preload_embedded(source);
                }
            }
        }

        let mut available = 0;
        for source in installed.keys() {
            if self.schemas.contains(source) {
                available += 1;
            } else {
                errors.push(JobError::failed(format!("no schema available for provider {}", source)));
            }
        }

        let error = errors.into_result().err().map(JobError::from);
        let outcome = error.clone().map_or(Ok(()), Err);
        loading.commit(move |r| r.provider_schemas.set(Some(available), error))?;
        outcome
    }
}

fn skip_unless_unknown<T>(ctx: &JobContext, field: &Loadable<T, JobError>) -> JobResult {
    if !ctx.ignore_state && !field.is_unknown() {
        return Err(JobError::state_not_changed(&ctx.dir));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::tests::FakeFactory;
    use super::*;
    use crate::schema::{ProviderSchemaJson, ProvidersSchemaJson};
    use std::collections::BTreeMap;
    use tfls_core::{JobId, OsFs, RecordTable};

    fn indexer(schemas: Option<ProvidersSchemaJson>) -> RootIndexer {
        RootIndexer {
            store: Arc::new(RecordTable::new("roots")),
            fs: Arc::new(OsFs),
            executors: Arc::new(FakeFactory(schemas)),
            schemas: Arc::new(ProviderSchemaStore::new()),
        }
    }

    fn job_ctx(dir: &Path, job_type: JobType) -> JobContext {
        JobContext {
            id: JobId::from(1),
            dir: dir.to_path_buf(),
            job_type,
            ignore_state: true,
            request: RequestContext::background(),
        }
    }

    fn lock_dir(providers: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let lock: String = providers
            .iter()
            .map(|p| format!("provider \"registry.terraform.io/{}\" {{\n  version = \"1.0.0\"\n}}\n\n", p))
            .collect();
        std::fs::write(dir.path().join(PLUGIN_LOCK_FILE), lock).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_terraform_version() {
        let dir = tempfile::tempdir().unwrap();
        let ix = indexer(None);
        ix.store.add(dir.path()).unwrap();
        ix.clone()
            .get_terraform_version(job_ctx(dir.path(), GET_TERRAFORM_VERSION))
            .await
            .unwrap();
        let record = ix.store.get(dir.path()).unwrap();
        assert_eq!(record.terraform_version.data().unwrap().version, "1.7.0");
    }

    #[tokio::test]
    async fn test_missing_manifest_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let ix = indexer(None);
        ix.store.add(dir.path()).unwrap();
        let err = ix
            .clone()
            .parse_module_manifest(job_ctx(dir.path(), PARSE_MODULE_MANIFEST))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Io { .. }));
        assert!(ix.store.get(dir.path()).unwrap().module_manifest.is_loaded());
    }

    #[tokio::test]
    async fn test_obtain_schema_from_cli() {
        let dir = lock_dir(&["hashicorp/aws"]);
        let mut provider_schemas = BTreeMap::new();
        provider_schemas.insert("registry.terraform.io/hashicorp/aws".to_string(), ProviderSchemaJson::default());
        let ix = indexer(Some(ProvidersSchemaJson {
            format_version: "1.0".into(),
            provider_schemas,
        }));
        ix.store.add(dir.path()).unwrap();

        ix.clone()
            .parse_provider_versions(job_ctx(dir.path(), PARSE_PROVIDER_VERSIONS))
            .await
            .unwrap();
        ix.clone()
            .obtain_schema(job_ctx(dir.path(), OBTAIN_SCHEMA))
            .await
            .unwrap();
        assert!(ix.schemas.contains("hashicorp/aws"));
        assert_eq!(ix.store.get(dir.path()).unwrap().provider_schemas.data(), Some(&1));
    }

    #[tokio::test]
    async fn test_obtain_schema_falls_back_to_embedded() {
        let dir = lock_dir(&["hashicorp/random", "acme/unknown"]);
        let ix = indexer(None);
        ix.store.add(dir.path()).unwrap();

        ix.clone()
            .parse_provider_versions(job_ctx(dir.path(), PARSE_PROVIDER_VERSIONS))
            .await
            .unwrap();
        let err = ix
            .clone()
            .obtain_schema(job_ctx(dir.path(), OBTAIN_SCHEMA))
            .await
            .unwrap_err();
        // The CLI failure and the provider without any schema.
        assert!(matches!(err, JobError::Multi(ref m) if m.len() == 2));
        assert!(ix.schemas.contains("hashicorp/random"));

        let record = ix.store.get(dir.path()).unwrap();
        assert_eq!(record.provider_schemas.data(), Some(&1));
        assert!(record.provider_schemas.error().is_some());
    }
}

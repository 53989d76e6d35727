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

//! Root modules feature: directories where `terraform init` ran.
//!
//! Tracks the Terraform version, the installed module manifest and the
//! locked providers of each root module, and loads provider schemas for
//! the modules feature to validate against.

pub mod events;
pub mod jobs;
pub mod record;

pub use jobs::RootIndexer;
pub use record::{InstalledModuleCall, ModuleManifest, RootRecord};

use crate::exec::{ExecutorFactory, TerraformVersion};
use crate::features::{FeatureContext, TaskSlot};
use crate::schema::ProviderSchemaStore;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tfls_core::{Record, RecordTable, StoreResult};

pub type RootStore = RecordTable<RootRecord>;

pub struct RootModulesFeature {
    ctx: FeatureContext,
    indexer: RootIndexer,
    task: TaskSlot,
}

impl RootModulesFeature {
    pub fn new(
        ctx: FeatureContext,
        executors: Arc<dyn ExecutorFactory>,
        schemas: Arc<ProviderSchemaStore>,
    ) -> Self {
        let indexer = RootIndexer {
            store: Arc::new(RecordTable::new("rootmodules")),
            fs: Arc::clone(&ctx.fs),
            executors,
            schemas,
        };
        Self {
            ctx,
            indexer,
            task: TaskSlot::default(),
        }
    }

    pub fn store(&self) -> &Arc<RootStore> {
        &self.indexer.store
    }

    pub fn root_record(&self, path: &Path) -> StoreResult<Arc<RootRecord>> {
        self.store().get(path)
    }

    pub fn terraform_version(&self, path: &Path) -> StoreResult<Option<TerraformVersion>> {
        Ok(self.store().get(path)?.terraform_version.data().cloned())
    }

    /// Locked provider versions by source address.
    pub fn installed_providers(&self, path: &Path) -> StoreResult<BTreeMap<String, String>> {
        Ok(self
            .store()
            .get(path)?
            .installed_providers
            .data()
            .map(|p| p.as_ref().clone())
            .unwrap_or_default())
    }

    /// Module calls installed by `terraform init`, keyed by call path.
    pub fn installed_module_calls(&self, path: &Path) -> StoreResult<BTreeMap<String, InstalledModuleCall>> {
        Ok(self
            .store()
            .get(path)?
            .module_manifest
            .data()
            .map(|m| m.calls())
            .unwrap_or_default())
    }

    /// Root modules whose manifest lists `module_path` as an installed
    /// module, sorted.
    pub fn callers_of_module(&self, module_path: &Path) -> Vec<PathBuf> {
        let mut callers: Vec<PathBuf> = self
            .store()
            .list()
            .into_iter()
            .filter(|record| {
                record
                    .module_manifest
                    .data()
                    .is_some_and(|m| m.contains_path(record.path(), module_path))
            })
            .map(|record| record.path().to_path_buf())
            .collect();
        callers.sort();
        callers
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::ValidationOptions;
    use crate::exec::{ExecError, TerraformExecutor};
    use crate::schema::ProvidersSchemaJson;
    use async_trait::async_trait;
    use tfls_core::{DocumentStore, EventBus, JobStore, OsFs};

    pub(crate) struct FakeExecutor {
        schemas: Option<ProvidersSchemaJson>,
    }

    #[async_trait]
    impl TerraformExecutor for FakeExecutor {
        async fn version(&self) -> Result<TerraformVersion, ExecError> {
            Ok(TerraformVersion {
                version: "1.7.0".into(),
                ..TerraformVersion::default()
            })
        }

        async fn provider_schemas(&self) -> Result<ProvidersSchemaJson, ExecError> {
            self.schemas.clone().ok_or(ExecError::Failed {
                command: "providers schema -json".into(),
                code: Some(1),
                stderr: "not initialized".into(),
            })
        }
    }

    /// Executors reporting Terraform 1.7.0 and, if given, these schemas.
    pub(crate) struct FakeFactory(pub Option<ProvidersSchemaJson>);

    impl ExecutorFactory for FakeFactory {
        fn executor(&self, _: &Path) -> Result<Arc<dyn TerraformExecutor>, ExecError> {
            Ok(Arc::new(FakeExecutor {
                schemas: self.0.clone(),
            }))
        }
    }

    pub(super) fn feature() -> Arc<RootModulesFeature> {
        let jobs = Arc::new(JobStore::new());
        let ctx = FeatureContext {
            bus: Arc::new(EventBus::new()),
            documents: Arc::new(DocumentStore::new(Arc::clone(&jobs))),
            jobs,
            fs: Arc::new(OsFs),
            validation: ValidationOptions::default(),
        };
        Arc::new(RootModulesFeature::new(
            ctx,
            Arc::new(FakeFactory(None)),
            Arc::new(ProviderSchemaStore::new()),
        ))
    }

    const MANIFEST: &str = r#"{"Modules": [
        { "Key": "", "Source": "", "Dir": "." },
        { "Key": "net", "Source": "./modules/net", "Dir": "modules/net" }
    ]}"#;

    #[test]
    fn test_callers_of_module() {
        let feature = feature();
        let root = Path::new("/work/prod");
        feature.store().add(root).unwrap();
        feature.store().add(Path::new("/work/staging")).unwrap();
        feature
            .store()
            .update(root, |r| {
                r.module_manifest.load(Ok(Arc::new(ModuleManifest::parse(MANIFEST).unwrap())))
            })
            .unwrap();

        assert_eq!(
            feature.callers_of_module(Path::new("/work/prod/modules/net")),
            vec![PathBuf::from("/work/prod")]
        );
        assert!(feature.callers_of_module(Path::new("/work/staging/modules/net")).is_empty());

        let calls = feature.installed_module_calls(root).unwrap();
        assert_eq!(calls.keys().collect::<Vec<_>>(), vec!["net"]);
        assert!(feature.installed_module_calls(Path::new("/work/staging")).unwrap().is_empty());
    }

    #[test]
    fn test_accessors_require_record() {
        let feature = feature();
        assert!(feature.terraform_version(Path::new("/missing")).is_err());
        assert!(feature.installed_providers(Path::new("/missing")).is_err());

        feature.store().add(Path::new("/work")).unwrap();
        assert_eq!(feature.terraform_version(Path::new("/work")).unwrap(), None);
        let record = feature.root_record(Path::new("/work")).unwrap();
        assert_eq!(record.path(), Path::new("/work"));
    }
}

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

//! Modules feature: indexes directories containing `*.tf` / `*.tf.json`
//! files.
//!
//! Opening a document runs the full DAG for its directory (see [`jobs`]);
//! local modules it calls are recorded and indexed as part of the same DAG
//! so references into them resolve. Discovery only records directories;
//! they are indexed once a document in them (or a caller) is opened.

pub mod events;
pub mod jobs;
pub mod record;

pub use jobs::ModuleIndexer;
pub use record::ModuleRecord;

use crate::decoder::{
    resolve_origin, ModuleCall, ModuleMetadata, ProviderRequirement, ReferenceOrigin,
    ReferenceTarget, RegistrySource,
};
use crate::features::{FeatureContext, TaskSlot};
use crate::registry::{RegistryClient, RegistryModule, RegistryModuleStore};
use crate::schema::ProviderSchemaStore;
use crate::walker::WalkerPathStore;
use jobs::{build_path_context, complete_targets};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tfls_core::{RecordTable, StoreError, StoreResult};
use tfls_hcl::Diagnostics;

/// Record table of the modules feature.
pub type ModuleStore = RecordTable<ModuleRecord>;

/// Maximum depth of local module calls followed when walking the module
/// graph.
pub const MAX_MODULE_NESTING: usize = 50;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModuleGraphError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A module (transitively) calls itself.
    #[error("module cycle: {} calls itself", .path.display())]
    ModuleCycle { path: PathBuf },

    #[error("module calls nested deeper than {max} levels at {}", .path.display())]
    NestingTooDeep { path: PathBuf, max: usize },
}

pub struct ModulesFeature {
    ctx: FeatureContext,
    indexer: ModuleIndexer,
    walker: Arc<WalkerPathStore>,
    task: TaskSlot,
}

impl ModulesFeature {
    pub fn new(
        ctx: FeatureContext,
        schemas: Arc<ProviderSchemaStore>,
        registry: Arc<dyn RegistryClient>,
        registry_modules: Arc<RegistryModuleStore>,
        walker: Arc<WalkerPathStore>,
    ) -> Self {
        let indexer = ModuleIndexer {
            store: Arc::new(RecordTable::new("modules")),
            fs: Arc::clone(&ctx.fs),
            schemas,
            registry,
            registry_modules,
            validation: ctx.validation.clone(),
        };
        Self {
            ctx,
            indexer,
            walker,
            task: TaskSlot::default(),
        }
    }

    pub fn store(&self) -> &Arc<ModuleStore> {
        &self.indexer.store
    }

    pub fn indexer(&self) -> &ModuleIndexer {
        &self.indexer
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn module_record(&self, path: &Path) -> StoreResult<Arc<ModuleRecord>> {
        self.store().get(path)
    }

    pub fn module_paths(&self) -> Vec<PathBuf> {
        self.store().paths()
    }

    pub fn local_module_meta(&self, path: &Path) -> StoreResult<Option<Arc<ModuleMetadata>>> {
        Ok(self.store().get(path)?.meta.data().cloned())
    }

    /// Module calls declared in `path`, empty until its metadata is loaded.
    pub fn declared_module_calls(&self, path: &Path) -> StoreResult<Vec<ModuleCall>> {
        Ok(self
            .local_module_meta(path)?
            .map(|meta| meta.module_calls.values().cloned().collect())
            .unwrap_or_default())
    }

    /// Provider requirements of `path` and every local module it calls,
    /// merged by provider source.
    pub fn provider_requirements_for_module(
        &self,
        path: &Path,
    ) -> Result<BTreeMap<String, ProviderRequirement>, ModuleGraphError> {
        self.store().get(path)?;
        let mut requirements = BTreeMap::new();
        let mut ancestors = Vec::new();
        let mut visited = HashSet::new();
        self.collect_requirements(path, 0, &mut ancestors, &mut visited, &mut requirements)?;
        Ok(requirements)
    }

    fn collect_requirements(
        &self,
        path: &Path,
        depth: usize,
        ancestors: &mut Vec<PathBuf>,
        visited: &mut HashSet<PathBuf>,
        requirements: &mut BTreeMap<String, ProviderRequirement>,
    ) -> Result<(), ModuleGraphError> {
        if ancestors.iter().any(|a| a == path) {
            return Err(ModuleGraphError::ModuleCycle {
                path: path.to_path_buf(),
            });
        }
        if depth > MAX_MODULE_NESTING {
            return Err(ModuleGraphError::NestingTooDeep {
                path: path.to_path_buf(),
                max: MAX_MODULE_NESTING,
            });
        }
        // Diamonds: a module reached through two callers is merged once.
        if !visited.insert(path.to_path_buf()) {
            return Ok(());
        }
        let Ok(record) = self.store().get(path) else {
            return Ok(());
        };
        let Some(meta) = record.meta.data() else {
            return Ok(());
        };

        for local_name in meta.provider_local_names() {
            let source = meta.provider_source(&local_name);
            let entry = requirements
                .entry(source.clone())
                .or_insert_with(|| ProviderRequirement {
                    source,
                    version_constraints: Vec::new(),
                });
            if let Some(declared) = meta.provider_requirements.get(&local_name) {
                for constraint in &declared.version_constraints {
                    if !entry.version_constraints.contains(constraint) {
                        entry.version_constraints.push(constraint.clone());
                    }
                }
            }
        }

        ancestors.push(path.to_path_buf());
        for (_, child) in meta.local_module_calls(path) {
            self.collect_requirements(&child, depth + 1, ancestors, visited, requirements)?;
        }
        ancestors.pop();
        Ok(())
    }

    /// Reference targets of `path`, including outputs of local children
    /// loaded after the targets were decoded.
    pub fn reference_targets(&self, path: &Path) -> StoreResult<Vec<ReferenceTarget>> {
        let record = self.store().get(path)?;
        Ok(
            match build_path_context(self.store(), &self.indexer.schemas, path) {
                Ok(pctx) => complete_targets(&record.reference_targets, &pctx),
                Err(_) => record
                    .reference_targets
                    .data()
                    .map(|t| t.as_ref().clone())
                    .unwrap_or_default(),
            },
        )
    }

    pub fn reference_origins(&self, path: &Path) -> StoreResult<Arc<Vec<ReferenceOrigin>>> {
        Ok(self
            .store()
            .get(path)?
            .reference_origins
            .data()
            .cloned()
            .unwrap_or_default())
    }

    /// The origin at a position of `file` (1-based line, column in
    /// characters) and the target it resolves to.
    pub fn resolve_reference(
        &self,
        file: &Path,
        line: usize,
        column: usize,
    ) -> Option<(ReferenceOrigin, ReferenceTarget)> {
        let dir = file.parent()?;
        let origin = self
            .reference_origins(dir)
            .ok()?
            .iter()
            .find(|o| o.file_path() == file && o.range.contains_pos(line, column))
            .cloned()?;
        let targets = self.reference_targets(dir).ok()?;
        let target = resolve_origin(&origin, &targets)?.clone();
        Some((origin, target))
    }

    /// The target referred to or declared at a position of `file`.
    pub fn target_at(&self, file: &Path, line: usize, column: usize) -> Option<ReferenceTarget> {
        if let Some((_, target)) = self.resolve_reference(file, line, column) {
            return Some(target);
        }
        let dir = file.parent()?;
        self.reference_targets(dir)
            .ok()?
            .into_iter()
            .filter(|t| t.path == dir && t.file_path() == file && t.range.contains_pos(line, column))
            .min_by_key(|t| (t.range.end.byte - t.range.start.byte, t.name_range.start.byte))
    }

    /// Every indexed origin that resolves to `target`.
    pub fn references_to(&self, target: &ReferenceTarget) -> Vec<ReferenceOrigin> {
        let mut found = Vec::new();
        for path in self.module_paths() {
            let Ok(origins) = self.reference_origins(&path) else {
                continue;
            };
            if !origins.iter().any(|o| o.matches(target)) {
                continue;
            }
            let Ok(targets) = self.reference_targets(&path) else {
                continue;
            };
            found.extend(
                origins
                    .iter()
                    .filter(|o| resolve_origin(o, &targets) == Some(target))
                    .cloned(),
            );
        }
        found
    }

    /// Parser, schema and reference diagnostics of `path` by file name.
    ///
    /// Every parsed file has an entry, possibly empty, so clients can clear
    /// diagnostics of files that became valid.
    pub fn diagnostics(&self, path: &Path) -> StoreResult<BTreeMap<String, Diagnostics>> {
        let record = self.store().get(path)?;
        let mut by_file: BTreeMap<String, Diagnostics> = record
            .filenames()
            .into_iter()
            .map(|name| (name, Diagnostics::new()))
            .collect();
        for (filename, diags) in record.parse_diagnostics.iter() {
            by_file.entry(filename.clone()).or_default().extend(diags.clone());
        }
        for diags in [record.schema_diagnostics.data(), record.reference_diagnostics.data()]
            .into_iter()
            .flatten()
        {
            for diag in diags.iter() {
                by_file
                    .entry(diag.range.filename.clone())
                    .or_default()
                    .push(diag.clone());
            }
        }
        Ok(by_file)
    }

    /// Cached registry data for a module source.
    pub fn registry_module(&self, source: &RegistrySource, version: Option<&str>) -> Option<Arc<RegistryModule>> {
        self.indexer.registry_modules.get(source, version)
    }
}

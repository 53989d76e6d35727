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

//! Decoding of parsed configuration into metadata, references and
//! diagnostics.
//!
//! Everything here is synchronous and pure: jobs build a [`PathContext`]
//! from the records they read, call into this module, and write the result
//! back to their record.

pub mod meta;
pub mod references;
pub mod stacks;
pub mod validation;
pub mod variables;

pub use meta::{
    load_module_metadata, ModuleCall, ModuleMetadata, ModuleSource, Output, ProviderRequirement,
    RegistrySource, Resource, Variable,
};
pub use references::{
    collect_reference_origins, collect_reference_targets, resolve_origin, ReferenceOrigin,
    ReferenceTarget, TargetKind,
};
pub use validation::{validate_references, validate_schema};

use crate::schema::ProviderSchema;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tfls_hcl::File;

/// Parsed files of one directory, keyed by file name.
pub type ParsedFiles = Arc<BTreeMap<String, File>>;

/// A local module called from the directory being decoded.
#[derive(Debug, Clone)]
pub struct ChildModule {
    pub path: PathBuf,
    /// `None` until the child's metadata is loaded.
    pub meta: Option<Arc<ModuleMetadata>>,
}

/// Everything the decoder knows about one module directory.
#[derive(Debug, Clone)]
pub struct PathContext {
    pub path: PathBuf,
    pub files: ParsedFiles,
    pub meta: Arc<ModuleMetadata>,
    /// Local module calls by call name.
    pub child_modules: BTreeMap<String, ChildModule>,
    /// Provider schemas by normalized source, for the providers the module uses.
    pub provider_schemas: BTreeMap<String, Arc<ProviderSchema>>,
    pub reference_targets: Arc<Vec<ReferenceTarget>>,
    pub reference_origins: Arc<Vec<ReferenceOrigin>>,
}

impl PathContext {
    pub fn new(path: impl Into<PathBuf>, files: ParsedFiles, meta: Arc<ModuleMetadata>) -> Self {
        Self {
            path: path.into(),
            files,
            meta,
            child_modules: BTreeMap::new(),
            provider_schemas: BTreeMap::new(),
            reference_targets: Arc::new(Vec::new()),
            reference_origins: Arc::new(Vec::new()),
        }
    }

    pub fn with_child(mut self, name: impl Into<String>, child: ChildModule) -> Self {
        self.child_modules.insert(name.into(), child);
        self
    }

    pub fn with_provider_schema(mut self, source: impl Into<String>, schema: Arc<ProviderSchema>) -> Self {
        self.provider_schemas.insert(source.into(), schema);
        self
    }

    pub fn with_references(
        mut self,
        targets: Arc<Vec<ReferenceTarget>>,
        origins: Arc<Vec<ReferenceOrigin>>,
    ) -> Self {
        self.reference_targets = targets;
        self.reference_origins = origins;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Absolute path of a file in this directory.
    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.path.join(filename)
    }
}

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

use crate::decoder::{ModuleMetadata, ParsedFiles, ReferenceOrigin, ReferenceTarget};
use crate::features::ParsedRecord;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tfls_core::{Loadable, Record};
use tfls_hcl::Diagnostics;

/// Index of one module directory.
///
/// Every field is owned by one job type; large values sit behind `Arc` so
/// copy-on-write updates stay cheap.
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    path: PathBuf,
    pub parsed_files: Loadable<ParsedFiles>,
    /// Parser diagnostics by file name; written together with `parsed_files`.
    pub parse_diagnostics: Arc<BTreeMap<String, Diagnostics>>,
    pub meta: Loadable<Arc<ModuleMetadata>>,
    pub preloaded_schema: Loadable<usize>,
    pub reference_targets: Loadable<Arc<Vec<ReferenceTarget>>>,
    pub reference_origins: Loadable<Arc<Vec<ReferenceOrigin>>>,
    pub schema_diagnostics: Loadable<Diagnostics>,
    pub reference_diagnostics: Loadable<Diagnostics>,
    /// Number of registry modules fetched for this module's calls.
    pub registry_data: Loadable<usize>,
}

impl Record for ModuleRecord {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            parsed_files: Loadable::default(),
            parse_diagnostics: Arc::default(),
            meta: Loadable::default(),
            preloaded_schema: Loadable::default(),
            reference_targets: Loadable::default(),
            reference_origins: Loadable::default(),
            schema_diagnostics: Loadable::default(),
            reference_diagnostics: Loadable::default(),
            registry_data: Loadable::default(),
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl ParsedRecord for ModuleRecord {
    fn parsed_files_mut(&mut self) -> &mut Loadable<ParsedFiles> {
        &mut self.parsed_files
    }

    fn parse_diagnostics_mut(&mut self) -> &mut Arc<BTreeMap<String, Diagnostics>> {
        &mut self.parse_diagnostics
    }
}

impl ModuleRecord {
    pub fn filenames(&self) -> Vec<String> {
        self.parsed_files
            .data()
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default()
    }
}

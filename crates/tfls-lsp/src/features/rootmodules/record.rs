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

//! Root module record and the data directory files it is built from.

use crate::decoder::meta::normalize_path;
use crate::exec::TerraformVersion;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tfls_core::{Loadable, Record};
use tfls_hcl::{Diagnostic, Diagnostics};

/// A directory where `terraform init` ran.
#[derive(Debug, Clone)]
pub struct RootRecord {
    path: PathBuf,
    pub terraform_version: Loadable<TerraformVersion>,
    pub module_manifest: Loadable<Arc<ModuleManifest>>,
    /// Provider source to locked version.
    pub installed_providers: Loadable<Arc<BTreeMap<String, String>>>,
    /// Number of provider schemas available after `ObtainSchema`.
    pub provider_schemas: Loadable<usize>,
}

impl Record for RootRecord {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            terraform_version: Loadable::default(),
            module_manifest: Loadable::default(),
            installed_providers: Loadable::default(),
            provider_schemas: Loadable::default(),
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// `.terraform/modules/modules.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ModuleManifest {
    #[serde(rename = "Modules", default)]
    pub modules: Vec<InstalledModuleCall>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstalledModuleCall {
    /// Dotted call path, e.g. `vpc.subnets`; empty for the root module.
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Source", default)]
    pub source: String,
    #[serde(rename = "Version", default)]
    pub version: Option<String>,
    /// Install directory relative to the root module.
    #[serde(rename = "Dir")]
    pub dir: String,
}

impl InstalledModuleCall {
    pub fn is_root(&self) -> bool {
        self.key.is_empty()
    }

    pub fn installed_path(&self, root: &Path) -> PathBuf {
        normalize_path(&root.join(&self.dir))
    }
}

impl ModuleManifest {
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Installed calls keyed by call path, without the root entry.
    pub fn calls(&self) -> BTreeMap<String, InstalledModuleCall> {
        self.modules
            .iter()
            .filter(|m| !m.is_root())
            .map(|m| (m.key.clone(), m.clone()))
            .collect()
    }

    /// Whether a call of this manifest is installed at `module_path`.
    pub fn contains_path(&self, root: &Path, module_path: &Path) -> bool {
        self.modules
            .iter()
            .filter(|m| !m.is_root())
            .any(|m| m.installed_path(root) == module_path)
    }
}

/// Provider versions from a `.terraform.lock.hcl` file.
///
/// Each `provider "<source>" { version = "..." }` block becomes an entry;
/// blocks without a static version are reported.
pub fn parse_plugin_lock(src: &str, filename: &str) -> (BTreeMap<String, String>, Diagnostics) {
    let (file, mut diags) = tfls_hcl::parse_config(src, filename);
    let mut providers = BTreeMap::new();
    for block in file.body.blocks_of_type("provider") {
        let Some(source) = block.label(0) else {
            diags.push(Diagnostic::error("Missing provider source", block.type_range.clone()));
            continue;
        };
        match block.body.attribute("version").and_then(|a| a.expr.as_static_string()) {
            Some(version) => {
                providers.insert(source.to_string(), version);
            }
            None => diags.push(
                Diagnostic::error("Missing provider version", block.range.clone())
                    .with_detail(format!("The lock entry for {} has no version.", source)),
            ),
        }
    }
    (providers, diags)
}

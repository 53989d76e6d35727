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

//! Configuration schemas.
//!
//! Two layers:
//!
//! - **Core schema**: the block types Terraform, stack and deployment files
//!   allow at the top level, with their label counts
//! - **Provider schemas**: resource and data source types per provider,
//!   preloaded from a bundled snapshot and replaced by the output of
//!   `terraform providers schema -json` once a root module is initialized

use crate::constants::DEFAULT_REGISTRY_HOST;
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error};

/// A top-level block type and the number of labels it takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpec {
    pub block_type: &'static str,
    pub labels: usize,
}

const fn block(block_type: &'static str, labels: usize) -> BlockSpec {
    BlockSpec { block_type, labels }
}

/// Top-level blocks of `*.tf` files.
pub const MODULE_BLOCKS: &[BlockSpec] = &[
    block("terraform", 0),
    block("provider", 1),
    block("variable", 1),
    block("output", 1),
    block("locals", 0),
    block("module", 1),
    block("resource", 2),
    block("data", 2),
    block("ephemeral", 2),
    block("check", 1),
    block("import", 0),
    block("moved", 0),
    block("removed", 0),
];

/// Top-level blocks of `*.tfstack.hcl` files.
pub const STACK_BLOCKS: &[BlockSpec] = &[
    block("component", 1),
    block("variable", 1),
    block("output", 1),
    block("provider", 2),
    block("required_providers", 0),
    block("locals", 0),
    block("removed", 0),
];

/// Top-level blocks of `*.tfdeploy.hcl` files.
pub const DEPLOY_BLOCKS: &[BlockSpec] = &[
    block("deployment", 1),
    block("deployment_group", 1),
    block("deployment_auto_approve", 1),
    block("identity_token", 1),
    block("store", 2),
    block("orchestrate", 2),
    block("publish_output", 1),
    block("upstream_input", 1),
    block("locals", 0),
];

pub fn lookup_block(blocks: &[BlockSpec], block_type: &str) -> Option<BlockSpec> {
    blocks.iter().copied().find(|b| b.block_type == block_type)
}

/// Canonical `namespace/type` form of a provider source address.
///
/// The default registry host is dropped and the address lowercased, so
/// `registry.terraform.io/HashiCorp/AWS` and `hashicorp/aws` compare equal.
/// A bare type name gets the `hashicorp` namespace.
pub fn normalize_provider_source(source: &str) -> String {
    let source = source.trim().to_ascii_lowercase();
    let prefix = format!("{}/", DEFAULT_REGISTRY_HOST);
    let source = source.strip_prefix(&prefix).unwrap_or(&source);
    if source.contains('/') {
        source.to_string()
    } else {
        format!("hashicorp/{}", source)
    }
}

/// Where a provider schema came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaSource {
    Embedded,
    Cli,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSchema {
    pub source: SchemaSource,
    pub resources: BTreeSet<String>,
    pub data_sources: BTreeSet<String>,
    pub ephemeral_resources: BTreeSet<String>,
}

impl ProviderSchema {
    pub fn has_resource(&self, type_name: &str) -> bool {
        self.resources.contains(type_name)
    }

    pub fn has_data_source(&self, type_name: &str) -> bool {
        self.data_sources.contains(type_name)
    }

    pub fn has_ephemeral_resource(&self, type_name: &str) -> bool {
        self.ephemeral_resources.contains(type_name)
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddedSchema {
    #[serde(default)]
    resources: BTreeSet<String>,
    #[serde(default)]
    data_sources: BTreeSet<String>,
}

fn embedded_schemas() -> &'static BTreeMap<String, Arc<ProviderSchema>> {
    static EMBEDDED: OnceLock<BTreeMap<String, Arc<ProviderSchema>>> = OnceLock::new();
    EMBEDDED.get_or_init(|| {
        let raw = include_str!("../schemas/providers.json");
        match serde_json::from_str::<BTreeMap<String, EmbeddedSchema>>(raw) {
            Ok(schemas) => schemas
                .into_iter()
                .map(|(source, schema)| {
                    let schema = ProviderSchema {
                        source: SchemaSource::Embedded,
                        resources: schema.resources,
                        data_sources: schema.data_sources,
                        ephemeral_resources: BTreeSet::new(),
                    };
                    (normalize_provider_source(&source), Arc::new(schema))
                })
                .collect(),
            Err(err) => {
                error!("schema: bundled provider schemas are invalid: {}", err);
                BTreeMap::new()
            }
        }
    })
}

/// Output of `terraform providers schema -json`, reduced to type names.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersSchemaJson {
    #[serde(default)]
    pub format_version: String,
    #[serde(default)]
    pub provider_schemas: BTreeMap<String, ProviderSchemaJson>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderSchemaJson {
    #[serde(default)]
    pub resource_schemas: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub data_source_schemas: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub ephemeral_resource_schemas: BTreeMap<String, serde_json::Value>,
}

/// Provider schemas keyed by normalized source address.
#[derive(Debug, Default)]
pub struct ProviderSchemaStore {
    schemas: DashMap<String, Arc<ProviderSchema>>,
}

impl ProviderSchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source: &str) -> Option<Arc<ProviderSchema>> {
        self.schemas
            .get(&normalize_provider_source(source))
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, source: &str) -> bool {
        self.schemas.contains_key(&normalize_provider_source(source))
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Load the bundled schema for `source` unless one is already present.
    ///
    /// Returns `true` if a schema was inserted.
    pub fn preload_embedded(&self, source: &str) -> bool {
        let key = normalize_provider_source(source);
        let Some(schema) = embedded_schemas().get(&key) else {
            return false;
        };
        let mut inserted = false;
        self.schemas.entry(key.clone()).or_insert_with(|| {
            inserted = true;
            Arc::clone(schema)
        });
        if inserted {
            debug!("schema: preloaded bundled schema for {}", key);
        }
        inserted
    }

    /// Replace schemas with the ones reported by the CLI.
    ///
    /// Returns the number of providers loaded.
    pub fn load_cli_schemas(&self, json: &ProvidersSchemaJson) -> usize {
        for (source, provider) in &json.provider_schemas {
            let schema = ProviderSchema {
                source: SchemaSource::Cli,
                resources: provider.resource_schemas.keys().cloned().collect(),
                data_sources: provider.data_source_schemas.keys().cloned().collect(),
                ephemeral_resources: provider.ephemeral_resource_schemas.keys().cloned().collect(),
            };
            self.schemas
                .insert(normalize_provider_source(source), Arc::new(schema));
        }
        json.provider_schemas.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_provider_source() {
        assert_eq!(normalize_provider_source("aws"), "hashicorp/aws");
        assert_eq!(normalize_provider_source("HashiCorp/AWS"), "hashicorp/aws");
        assert_eq!(
            normalize_provider_source("registry.terraform.io/hashicorp/random"),
            "hashicorp/random"
        );
        assert_eq!(
            normalize_provider_source("example.com/acme/widget"),
            "example.com/acme/widget"
        );
    }

    #[test]
    fn test_lookup_block() {
        assert_eq!(lookup_block(MODULE_BLOCKS, "resource").map(|b| b.labels), Some(2));
        assert_eq!(lookup_block(STACK_BLOCKS, "component").map(|b| b.labels), Some(1));
        assert!(lookup_block(MODULE_BLOCKS, "component").is_none());
    }

    #[test]
    fn test_preload_embedded_once() {
        let store = ProviderSchemaStore::new();
        assert!(store.preload_embedded("hashicorp/random"));
        assert!(!store.preload_embedded("random"));
        let schema = store.get("random").unwrap();
        assert_eq!(schema.source, SchemaSource::Embedded);
        assert!(schema.has_resource("random_pet"));
        assert!(!store.preload_embedded("hashicorp/doesnotexist"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_cli_schema_replaces_embedded() {
        let store = ProviderSchemaStore::new();
        store.preload_embedded("hashicorp/null");

        let json: ProvidersSchemaJson = serde_json::from_value(serde_json::json!({
            "format_version": "1.0",
            "provider_schemas": {
                "registry.terraform.io/hashicorp/null": {
                    "resource_schemas": { "null_resource": {} },
                    "data_source_schemas": {}
                }
            }
        }))
        .unwrap();
        assert_eq!(store.load_cli_schemas(&json), 1);

        let schema = store.get("hashicorp/null").unwrap();
        assert_eq!(schema.source, SchemaSource::Cli);
        assert!(schema.has_resource("null_resource"));
        assert!(!schema.has_data_source("null_data_source"));

        // Bundled data never overrides CLI data.
        assert!(!store.preload_embedded("hashicorp/null"));
    }
}

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

//! Stack (`*.tfstack.hcl`) and deployment (`*.tfdeploy.hcl`) files.

use super::meta::ProviderRequirement;
use super::validation::{check_labels, DeclarationTracker};
use crate::filenames::is_deploy_filename;
use crate::schema::{lookup_block, normalize_provider_source, DEPLOY_BLOCKS, STACK_BLOCKS};
use std::collections::BTreeMap;
use tfls_hcl::{Diagnostic, Diagnostics, ExprKind, File, Range};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackMetadata {
    pub filenames: Vec<String>,
    pub components: BTreeMap<String, Component>,
    pub variables: BTreeMap<String, Range>,
    pub outputs: BTreeMap<String, Range>,
    /// Keyed by `<type>.<name>`.
    pub providers: BTreeMap<String, Range>,
    pub required_providers: BTreeMap<String, ProviderRequirement>,
    pub deployments: BTreeMap<String, Range>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub name: String,
    pub source: Option<String>,
    /// Keys of the `inputs` object.
    pub input_names: Vec<String>,
    pub range: Range,
}

pub fn load_stack_metadata(files: &BTreeMap<String, File>) -> StackMetadata {
    let mut meta = StackMetadata {
        filenames: files.keys().cloned().collect(),
        ..StackMetadata::default()
    };

    for file in files.values() {
        for block in &file.body.blocks {
            let first = block.label(0).map(str::to_string);
            match (block.block_type.as_str(), first) {
                ("component", Some(name)) => {
                    let input_names = block
                        .body
                        .attribute("inputs")
                        .map(|a| object_keys(&a.expr.kind))
                        .unwrap_or_default();
                    meta.components.entry(name.clone()).or_insert_with(|| Component {
                        name,
                        source: block.body.attribute("source").and_then(|a| a.expr.as_static_string()),
                        input_names,
                        range: block.range.clone(),
                    });
                }
                ("variable", Some(name)) => {
                    meta.variables.entry(name).or_insert_with(|| block.range.clone());
                }
                ("output", Some(name)) => {
                    meta.outputs.entry(name).or_insert_with(|| block.range.clone());
                }
                ("provider", Some(provider_type)) => {
                    if let Some(name) = block.label(1) {
                        meta.providers
                            .entry(format!("{}.{}", provider_type, name))
                            .or_insert_with(|| block.range.clone());
                    }
                }
                ("deployment", Some(name)) => {
                    meta.deployments.entry(name).or_insert_with(|| block.range.clone());
                }
                ("required_providers", _) => {
                    for attr in &block.body.attributes {
                        let source = match &attr.expr.kind {
                            ExprKind::Object(items) => items.iter().find_map(|item| {
                                (item.key.as_keyword() == Some("source"))
                                    .then(|| item.value.as_static_string())
                                    .flatten()
                            }),
                            _ => None,
                        };
                        let version_constraints = match &attr.expr.kind {
                            ExprKind::Object(items) => items
                                .iter()
                                .filter(|item| item.key.as_keyword() == Some("version"))
                                .filter_map(|item| item.value.as_static_string())
                                .collect(),
                            _ => Vec::new(),
                        };
                        meta.required_providers.insert(
                            attr.name.clone(),
                            ProviderRequirement {
                                source: normalize_provider_source(source.as_deref().unwrap_or(&attr.name)),
                                version_constraints,
                            },
                        );
                    }
                }
                _ => {}
            }
        }
    }

    meta
}

fn object_keys(kind: &ExprKind) -> Vec<String> {
    match kind {
        ExprKind::Object(items) => items
            .iter()
            .filter_map(|item| {
                item.key
                    .as_keyword()
                    .map(str::to_string)
                    .or_else(|| item.key.as_static_string())
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Unknown blocks for the file kind, label counts, components without a
/// source and duplicate declarations.
pub fn validate_stack(files: &BTreeMap<String, File>) -> Diagnostics {
    let mut diags = Diagnostics::new();
    let mut seen = DeclarationTracker::default();

    for (filename, file) in files {
        let (schema, kind) = if is_deploy_filename(filename) {
            (DEPLOY_BLOCKS, "deployment configuration")
        } else {
            (STACK_BLOCKS, "stack configuration")
        };

        for block in &file.body.blocks {
            let Some(spec) = lookup_block(schema, &block.block_type) else {
                diags.push(
                    Diagnostic::error("Unsupported block type", block.type_range.clone()).with_detail(format!(
                        "Blocks of type \"{}\" are not expected in a {}.",
                        block.block_type, kind
                    )),
                );
                continue;
            };
            if let Some(diag) = check_labels(block, spec) {
                diags.push(diag);
                continue;
            }
            if spec.labels > 0 {
                let name = block
                    .labels
                    .iter()
                    .map(|l| l.value.as_str())
                    .collect::<Vec<_>>()
                    .join(".");
                let last = &block.labels[spec.labels - 1].range;
                seen.declare(&mut diags, &block.block_type, name, last);
            }
            if block.block_type == "component" && block.body.attribute("source").is_none() {
                diags.push(
                    Diagnostic::error("Missing required argument", block.range.clone())
                        .with_detail("The argument \"source\" is required, but no definition was found."),
                );
            }
        }
    }

    diags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::test_support::parse;

    const STACK: &str = r#"
required_providers {
  aws = {
    source  = "hashicorp/aws"
    version = "~> 5.7"
  }
}

provider "aws" "this" {
}

variable "regions" {
  type = set(string)
}

component "s3" {
  source = "./s3"
  inputs = {
    region = var.regions
    name   = "bucket"
  }
}

output "bucket" {
  type  = string
  value = component.s3.bucket
}
"#;

    const DEPLOY: &str = r#"
deployment "prod" {
  inputs = {
    regions = ["eu-west-1"]
  }
}
"#;

    #[test]
    fn test_stack_metadata() {
        let files = parse(&[("main.tfstack.hcl", STACK), ("prod.tfdeploy.hcl", DEPLOY)]);
        let meta = load_stack_metadata(&files);
        assert_eq!(meta.components["s3"].source.as_deref(), Some("./s3"));
        assert_eq!(meta.components["s3"].input_names, vec!["region", "name"]);
        assert!(meta.variables.contains_key("regions"));
        assert!(meta.outputs.contains_key("bucket"));
        assert!(meta.providers.contains_key("aws.this"));
        assert_eq!(meta.required_providers["aws"].source, "hashicorp/aws");
        assert_eq!(meta.required_providers["aws"].version_constraints, vec!["~> 5.7"]);
        assert!(meta.deployments.contains_key("prod"));
    }

    #[test]
    fn test_valid_stack() {
        let files = parse(&[("main.tfstack.hcl", STACK), ("prod.tfdeploy.hcl", DEPLOY)]);
        assert!(validate_stack(&files).is_empty());
    }

    #[test]
    fn test_unknown_blocks_per_file_kind() {
        let files = parse(&[
            ("main.tfstack.hcl", "deployment \"x\" {}\n\ncomponent \"c\" {}\n"),
            ("prod.tfdeploy.hcl", "component \"y\" {\n  source = \"./y\"\n}\n"),
        ]);
        let diags = validate_stack(&files);
        let summaries: Vec<&str> = diags.iter().map(|d| d.summary.as_str()).collect();
        assert_eq!(
            summaries,
            vec!["Unsupported block type", "Missing required argument", "Unsupported block type"]
        );
    }
}

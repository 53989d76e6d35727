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

//! Enhanced validation of module configuration.
//!
//! Both validators report problems as diagnostics; neither fails.

use super::references::resolve_origin;
use super::PathContext;
use crate::schema::{lookup_block, BlockSpec, MODULE_BLOCKS};
use std::collections::HashMap;
use tfls_hcl::{Block, Diagnostic, Diagnostics, Range};

/// Check the configuration against the core schema and known provider
/// schemas.
///
/// Reports unknown top-level blocks and arguments, wrong label counts,
/// module calls without `source`, duplicate declarations and resource
/// types a loaded provider schema does not know.
pub fn validate_schema(ctx: &PathContext) -> Diagnostics {
    let mut diags = Diagnostics::new();
    let mut seen = DeclarationTracker::default();

    for file in ctx.files.values() {
        for attr in &file.body.attributes {
            diags.push(
                Diagnostic::error("Unsupported argument", attr.name_range.clone())
                    .with_detail(format!("An argument named \"{}\" is not expected here.", attr.name)),
            );
        }

        for block in &file.body.blocks {
            let Some(spec) = lookup_block(MODULE_BLOCKS, &block.block_type) else {
                diags.push(
                    Diagnostic::error("Unsupported block type", block.type_range.clone()).with_detail(
                        format!("Blocks of type \"{}\" are not expected here.", block.block_type),
                    ),
                );
                continue;
            };
            if let Some(diag) = check_labels(block, spec) {
                diags.push(diag);
                continue;
            }

            match block.block_type.as_str() {
                "variable" | "output" | "module" | "check" => {
                    let name = block.labels[0].value.clone();
                    seen.declare(&mut diags, &block.block_type, name, &block.labels[0].range);
                }
                "resource" | "data" | "ephemeral" => {
                    let name = format!("{}.{}", block.labels[0].value, block.labels[1].value);
                    seen.declare(&mut diags, &block.block_type, name, &block.labels[1].range);
                    check_resource_type(ctx, block, &mut diags);
                }
                "locals" => {
                    for attr in &block.body.attributes {
                        seen.declare(&mut diags, "local value", attr.name.clone(), &attr.name_range);
                    }
                }
                _ => {}
            }

            if block.block_type == "module" && block.body.attribute("source").is_none() {
                diags.push(
                    Diagnostic::error("Missing required argument", block.range.clone()).with_detail(
                        "The argument \"source\" is required, but no definition was found.",
                    ),
                );
            }
        }
    }

    diags
}

pub(crate) fn check_labels(block: &Block, spec: BlockSpec) -> Option<Diagnostic> {
    let found = block.labels.len();
    if found < spec.labels {
        Some(
            Diagnostic::error(format!("Missing name for {}", block.block_type), block.type_range.clone())
                .with_detail(format!(
                    "All {} blocks must have {} labels.",
                    block.block_type, spec.labels
                )),
        )
    } else if found > spec.labels {
        Some(
            Diagnostic::error(
                format!("Extraneous label for {}", block.block_type),
                block.labels[spec.labels].range.clone(),
            )
            .with_detail(format!(
                "Only {} labels are expected for {} blocks.",
                spec.labels, block.block_type
            )),
        )
    } else {
        None
    }
}

fn check_resource_type(ctx: &PathContext, block: &Block, diags: &mut Diagnostics) {
    let type_name = &block.labels[0].value;
    let address = format!("{}.{}", type_name, block.labels[1].value);
    let resource = match block.block_type.as_str() {
        "resource" => ctx.meta.resources.get(&address),
        "data" => ctx.meta.data_sources.get(&address),
        _ => ctx.meta.ephemeral_resources.get(&address),
    };
    let Some(resource) = resource else { return };
    let source = ctx.meta.provider_source(&resource.provider);
    let Some(schema) = ctx.provider_schemas.get(&source) else {
        return;
    };

    let known = match block.block_type.as_str() {
        "resource" => schema.has_resource(type_name),
        "data" => schema.has_data_source(type_name),
        _ => schema.has_ephemeral_resource(type_name),
    };
    if !known {
        let kind = if block.block_type == "data" { "data source" } else { "resource" };
        diags.push(
            Diagnostic::warning(format!("Unknown {} type", kind), block.labels[0].range.clone())
                .with_detail(format!(
                    "The provider {} does not support {} type \"{}\".",
                    source, kind, type_name
                )),
        );
    }
}

/// First declaration of each name per kind.
#[derive(Default)]
pub(crate) struct DeclarationTracker {
    seen: HashMap<(String, String), Range>,
}

impl DeclarationTracker {
    pub(crate) fn declare(&mut self, diags: &mut Diagnostics, kind: &str, name: String, range: &Range) {
        match self.seen.get(&(kind.to_string(), name.clone())) {
            Some(first) => diags.push(
                Diagnostic::error(format!("Duplicate {} \"{}\" configuration", kind, name), range.clone())
                    .with_detail(format!(
                        "A {} named \"{}\" was already declared at {}:{}.",
                        kind, name, first.filename, first.start.line
                    )),
            ),
            None => {
                self.seen.insert((kind.to_string(), name), range.clone());
            }
        }
    }
}

/// Check that references point at declarations.
///
/// `var`, `local`, `module`, `data` and `ephemeral` references must resolve;
/// other roots are only checked when they look like a resource address
/// (`<type>.<name>` with an underscore in the type). Outputs of loaded
/// local children are checked too.
pub fn validate_references(ctx: &PathContext) -> Diagnostics {
    let mut diags = Diagnostics::new();
    let targets = ctx.reference_targets.as_slice();

    for origin in ctx.reference_origins.iter() {
        let root = origin.root();
        let checked = matches!(root, "var" | "local" | "module" | "data" | "ephemeral")
            || (origin.segments.len() >= 2 && root.contains('_'));
        if !checked {
            continue;
        }

        match resolve_origin(origin, targets) {
            None => diags.push(
                Diagnostic::error("No declaration found", origin.range.clone())
                    .with_detail(format!("No declaration found for \"{}\"", origin.address)),
            ),
            Some(target) if root == "module" && target.address.split('.').count() == 2 => {
                // The call resolved but the output did not; only an error
                // when the child is loaded and really lacks it.
                let (Some(call), Some(output)) = (origin.segments.get(1), origin.segments.get(2)) else {
                    continue;
                };
                let Some(child_meta) = ctx.child_modules.get(call).and_then(|c| c.meta.as_ref()) else {
                    continue;
                };
                if !child_meta.outputs.contains_key(output) {
                    diags.push(
                        Diagnostic::error("Unsupported attribute", origin.range.clone()).with_detail(
                            format!("Module \"{}\" does not have an output named \"{}\".", call, output),
                        ),
                    );
                }
            }
            Some(_) => {}
        }
    }

    diags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::test_support::{context, parse};
    use crate::decoder::{collect_reference_origins, collect_reference_targets, load_module_metadata, ChildModule};
    use crate::schema::ProviderSchemaStore;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn summaries(diags: &Diagnostics) -> Vec<String> {
        diags.iter().map(|d| d.summary.clone()).collect()
    }

    #[test]
    fn test_valid_module_has_no_schema_diagnostics() {
        let ctx = context(
            "/work",
            &[(
                "main.tf",
                "variable \"a\" {}\n\nmodule \"m\" {\n  source = \"./m\"\n}\n\nresource \"aws_vpc\" \"main\" {}\n",
            )],
        );
        assert!(validate_schema(&ctx).is_empty());
    }

    #[test]
    fn test_unknown_block_and_labels() {
        let ctx = context(
            "/work",
            &[(
                "main.tf",
                "resorce \"aws_vpc\" \"main\" {}\n\nvariable {}\n\noutput \"a\" \"b\" {}\n\nfoo = 1\n",
            )],
        );
        let diags = validate_schema(&ctx);
        let summaries = summaries(&diags);
        assert!(summaries.contains(&"Unsupported block type".to_string()));
        assert!(summaries.contains(&"Missing name for variable".to_string()));
        assert!(summaries.contains(&"Extraneous label for output".to_string()));
        assert!(summaries.contains(&"Unsupported argument".to_string()));
    }

    #[test]
    fn test_duplicates_across_files() {
        let ctx = context(
            "/work",
            &[
                ("a.tf", "variable \"region\" {}\n"),
                ("b.tf", "variable \"region\" {}\n\nmodule \"m\" {}\n"),
            ],
        );
        let diags = validate_schema(&ctx);
        let summaries = summaries(&diags);
        assert!(summaries.contains(&"Duplicate variable \"region\" configuration".to_string()));
        assert!(summaries.contains(&"Missing required argument".to_string()));
        let dup = diags.iter().find(|d| d.summary.starts_with("Duplicate")).unwrap();
        assert_eq!(dup.range.filename, "b.tf");
    }

    #[test]
    fn test_unknown_resource_type_with_schema() {
        let store = ProviderSchemaStore::new();
        store.preload_embedded("hashicorp/random");
        let ctx = context(
            "/work",
            &[("main.tf", "resource \"random_pet\" \"a\" {}\n\nresource \"random_kitten\" \"b\" {}\n")],
        )
        .with_provider_schema("hashicorp/random", store.get("hashicorp/random").unwrap());

        let diags = validate_schema(&ctx);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags.iter().next().unwrap().summary, "Unknown resource type");
    }

    #[test]
    fn test_undeclared_references() {
        let ctx = context(
            "/work",
            &[(
                "main.tf",
                "variable \"a\" {}\n\noutput \"x\" {\n  value = [var.a, var.b, local.c, aws_vpc.main.id, upper(\"x\")]\n}\n",
            )],
        );
        let targets = Arc::new(collect_reference_targets(&ctx));
        let origins = Arc::new(collect_reference_origins(&ctx));
        let ctx = ctx.with_references(targets, origins);

        let diags = validate_references(&ctx);
        let details: Vec<String> = diags.iter().filter_map(|d| d.detail.clone()).collect();
        assert_eq!(diags.len(), 3, "{:?}", details);
        assert!(details.iter().any(|d| d.contains("var.b")));
        assert!(details.iter().any(|d| d.contains("local.c")));
        assert!(details.iter().any(|d| d.contains("aws_vpc.main.id")));
    }

    #[test]
    fn test_missing_child_output() {
        let child = parse(&[("outputs.tf", "output \"id\" {\n  value = 1\n}\n")]);
        let ctx = context(
            "/work",
            &[(
                "main.tf",
                "module \"c\" {\n  source = \"./c\"\n}\n\noutput \"a\" {\n  value = [module.c.id, module.c.nope]\n}\n",
            )],
        )
        .with_child(
            "c",
            ChildModule {
                path: PathBuf::from("/work/c"),
                meta: Some(Arc::new(load_module_metadata(&child))),
            },
        );
        let targets = Arc::new(collect_reference_targets(&ctx));
        let origins = Arc::new(collect_reference_origins(&ctx));
        let diags = validate_references(&ctx.with_references(targets, origins));
        assert_eq!(summaries(&diags), vec!["Unsupported attribute".to_string()]);
    }
}

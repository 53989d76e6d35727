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

//! Variable definition files (`*.tfvars`).

use super::meta::ModuleMetadata;
use super::references::ReferenceOrigin;
use std::collections::BTreeMap;
use std::path::Path;
use tfls_hcl::{Diagnostic, Diagnostics, File};

/// Each assignment `name = value` refers to `var.<name>` of the module in
/// the same directory.
pub fn collect_vars_origins(dir: &Path, files: &BTreeMap<String, File>) -> Vec<ReferenceOrigin> {
    files
        .values()
        .flat_map(|file| file.body.attributes.iter())
        .map(|attr| {
            ReferenceOrigin::new(
                dir,
                vec!["var".to_string(), attr.name.clone()],
                attr.name_range.clone(),
            )
        })
        .collect()
}

/// Flag blocks and, when the module is known, assignments to variables it
/// does not declare.
pub fn validate_vars(files: &BTreeMap<String, File>, module: Option<&ModuleMetadata>) -> Diagnostics {
    let mut diags = Diagnostics::new();
    for file in files.values() {
        for block in &file.body.blocks {
            diags.push(
                Diagnostic::error("Unexpected block", block.type_range.clone())
                    .with_detail("Blocks are not allowed in variable definitions files."),
            );
        }
        let Some(module) = module else { continue };
        for attr in &file.body.attributes {
            if !module.variables.contains_key(&attr.name) {
                diags.push(
                    Diagnostic::warning("Undeclared variable", attr.name_range.clone()).with_detail(format!(
                        "A variable named \"{}\" was assigned, but the module does not declare it.",
                        attr.name
                    )),
                );
            }
        }
    }
    diags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::load_module_metadata;
    use crate::decoder::test_support::parse;

    #[test]
    fn test_vars_origins() {
        let files = parse(&[("prod.tfvars", "region = \"eu-west-1\"\ncount_x = 3\n")]);
        let origins = collect_vars_origins(Path::new("/work"), &files);
        let addrs: Vec<&str> = origins.iter().map(|o| o.address.as_str()).collect();
        assert_eq!(addrs, vec!["var.region", "var.count_x"]);
        assert_eq!(origins[0].range.filename, "prod.tfvars");
    }

    #[test]
    fn test_undeclared_variable() {
        let module = load_module_metadata(&parse(&[("variables.tf", "variable \"region\" {}\n")]));
        let files = parse(&[(
            "prod.tfvars",
            "region = \"eu-west-1\"\nzone = \"a\"\n\nblock {\n}\n",
        )]);
        let diags = validate_vars(&files, Some(&module));
        let summaries: Vec<&str> = diags.iter().map(|d| d.summary.as_str()).collect();
        assert_eq!(summaries, vec!["Unexpected block", "Undeclared variable"]);
    }

    #[test]
    fn test_unknown_module_only_checks_blocks() {
        let files = parse(&[("prod.tfvars", "zone = \"a\"\n\nblock {\n}\n")]);
        let diags = validate_vars(&files, None);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags.as_slice()[0].summary, "Unexpected block");
    }
}

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

//! Sample Terraform configurations.
//!
//! Every fixture parses without errors unless its name says otherwise.

/// Root module calling `./modules/network` and using one of its outputs.
pub const PARENT_MAIN_TF: &str = r#"variable "region" {
  type    = string
  default = "eu-west-1"
}

module "network" {
  source = "./modules/network"
  cidr   = "10.0.0.0/16"
}

output "vpc_id" {
  value = module.network.vpc_id
}
"#;

/// Child module with one input and one output.
pub const CHILD_MAIN_TF: &str = r#"variable "cidr" {
  type = string
}

resource "random_id" "vpc" {
  byte_length = 8
}

output "vpc_id" {
  value = random_id.vpc.hex
}
"#;

/// Root module calling two local modules, `./modules/app` and
/// `./modules/missing`.
pub const TWO_CALLS_MAIN_TF: &str = r#"module "app" {
  source = "./modules/app"
}

module "db" {
  source = "./modules/missing"
}
"#;

pub const APP_MAIN_TF: &str = r#"output "name" {
  value = "app"
}
"#;

/// Values for [`PARENT_MAIN_TF`].
pub const TERRAFORM_TFVARS: &str = "region = \"us-east-1\"\n";

/// Assigns a variable no module declares.
pub const UNDECLARED_TFVARS: &str = "region = \"us-east-1\"\nzone = \"a\"\n";

/// Unterminated block; yields a parse error.
pub const BROKEN_TF: &str = "resource \"random_id\" \"x\" {\n  byte_length = 8\n";

pub const STACK_COMPONENTS_TFSTACK: &str = r#"component "network" {
  source = "./network"
}
"#;

pub const STACK_DEPLOYMENTS_TFDEPLOY: &str = r#"deployment "production" {
  inputs = {
    region = "eu-west-1"
  }
}
"#;

/// `.terraform/modules/modules.json` listing the root module and one entry
/// per `(key, source, dir)`.
pub fn module_manifest(calls: &[(&str, &str, &str)]) -> String {
    let mut entries = vec![r#"    { "Key": "", "Source": "", "Dir": "." }"#.to_string()];
    for (key, source, dir) in calls {
        entries.push(format!(
            r#"    {{ "Key": "{}", "Source": "{}", "Dir": "{}" }}"#,
            key, source, dir
        ));
    }
    format!("{{\n  \"Modules\": [\n{}\n  ]\n}}\n", entries.join(",\n"))
}

/// `.terraform.lock.hcl` pinning each `(source, version)`.
pub fn lock_file(providers: &[(&str, &str)]) -> String {
    let mut out = String::from("# This file is maintained automatically by \"terraform init\".\n");
    for (source, version) in providers {
        out.push_str(&format!(
            "\nprovider \"{}\" {{\n  version     = \"{}\"\n  constraints = \"~> {}\"\n}}\n",
            source, version, version
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_manifest_shape() {
        let json = module_manifest(&[("net", "./net", "net")]);
        assert!(json.contains(r#""Key": "net""#));
        assert!(json.starts_with("{\n  \"Modules\""));
    }

    #[test]
    fn test_lock_file_entries() {
        let lock = lock_file(&[("registry.terraform.io/hashicorp/random", "3.6.0")]);
        assert!(lock.contains("provider \"registry.terraform.io/hashicorp/random\""));
        assert!(lock.contains("version     = \"3.6.0\""));
    }
}

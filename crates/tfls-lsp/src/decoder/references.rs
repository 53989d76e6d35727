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

//! Reference targets (things that can be referred to) and reference
//! origins (the places that refer to them).
//!
//! An origin resolves to the target with the longest address that is a
//! segment prefix of the origin's address: `aws_instance.web.id` resolves
//! to the `aws_instance.web` resource, `module.net.vpc_id` to the child
//! output `module.net.vpc_id` when the child is known, or to the call
//! `module.net` otherwise.

use super::PathContext;
use std::path::{Path, PathBuf};
use tfls_hcl::{Block, Body, Expr, Range};

/// Traversal roots that never refer to a declaration.
const BUILTIN_ROOTS: &[&str] = &["count", "each", "path", "terraform", "self"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Variable,
    Local,
    ModuleCall,
    ModuleOutput,
    Resource,
    DataSource,
    EphemeralResource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceTarget {
    /// Dotted address, e.g. `var.region` or `data.aws_ami.ubuntu`.
    pub address: String,
    pub kind: TargetKind,
    /// Directory of the file declaring the target.
    pub path: PathBuf,
    /// Whole declaration.
    pub range: Range,
    /// Name label of the declaration.
    pub name_range: Range,
}

impl ReferenceTarget {
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.address.split('.')
    }

    /// Absolute path of the declaring file.
    pub fn file_path(&self) -> PathBuf {
        self.path.join(&self.range.filename)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceOrigin {
    pub address: String,
    pub segments: Vec<String>,
    /// Directory of the file containing the reference.
    pub path: PathBuf,
    pub range: Range,
}

impl ReferenceOrigin {
    pub fn new(path: &Path, segments: Vec<String>, range: Range) -> Self {
        Self {
            address: segments.join("."),
            segments,
            path: path.to_path_buf(),
            range,
        }
    }

    pub fn root(&self) -> &str {
        self.segments.first().map(String::as_str).unwrap_or("")
    }

    pub fn file_path(&self) -> PathBuf {
        self.path.join(&self.range.filename)
    }

    /// Whether `target`'s address is a segment prefix of this origin.
    pub fn matches(&self, target: &ReferenceTarget) -> bool {
        let mut count = 0;
        for (i, segment) in target.segments().enumerate() {
            if self.segments.get(i).map(String::as_str) != Some(segment) {
                return false;
            }
            count += 1;
        }
        count > 0
    }
}

/// The most specific target `origin` refers to.
pub fn resolve_origin<'a>(origin: &ReferenceOrigin, targets: &'a [ReferenceTarget]) -> Option<&'a ReferenceTarget> {
    targets
        .iter()
        .filter(|t| origin.matches(t))
        .max_by_key(|t| t.segments().count())
}

/// Every declaration in the module, plus outputs of loaded local children.
pub fn collect_reference_targets(ctx: &PathContext) -> Vec<ReferenceTarget> {
    let meta = &ctx.meta;
    let mut targets = Vec::new();
    let own = |address: String, kind: TargetKind, range: &Range, name_range: &Range| ReferenceTarget {
        address,
        kind,
        path: ctx.path.clone(),
        range: range.clone(),
        name_range: name_range.clone(),
    };

    for (name, variable) in &meta.variables {
        targets.push(own(format!("var.{}", name), TargetKind::Variable, &variable.range, &variable.name_range));
    }
    for (name, range) in &meta.locals {
        targets.push(own(format!("local.{}", name), TargetKind::Local, range, range));
    }
    for (name, call) in &meta.module_calls {
        targets.push(own(format!("module.{}", name), TargetKind::ModuleCall, &call.range, &call.name_range));
    }
    for (address, resource) in &meta.resources {
        targets.push(own(address.clone(), TargetKind::Resource, &resource.range, &resource.name_range));
    }
    for (address, resource) in &meta.data_sources {
        targets.push(own(
            format!("data.{}", address),
            TargetKind::DataSource,
            &resource.range,
            &resource.name_range,
        ));
    }
    for (address, resource) in &meta.ephemeral_resources {
        targets.push(own(
            format!("ephemeral.{}", address),
            TargetKind::EphemeralResource,
            &resource.range,
            &resource.name_range,
        ));
    }

    for (call, child) in &ctx.child_modules {
        let Some(child_meta) = &child.meta else { continue };
        for (name, output) in &child_meta.outputs {
            targets.push(ReferenceTarget {
                address: format!("module.{}.{}", call, name),
                kind: TargetKind::ModuleOutput,
                path: child.path.clone(),
                range: output.range.clone(),
                name_range: output.name_range.clone(),
            });
        }
    }

    targets
}

/// Every reference in the module's expressions.
pub fn collect_reference_origins(ctx: &PathContext) -> Vec<ReferenceOrigin> {
    let mut collector = OriginCollector {
        path: &ctx.path,
        scope: Vec::new(),
        out: Vec::new(),
    };
    for file in ctx.files.values() {
        for block in &file.body.blocks {
            collector.block(block);
        }
        collector.attributes(&file.body, &[]);
    }
    collector.out
}

struct OriginCollector<'a> {
    path: &'a Path,
    /// Names bound by enclosing `dynamic` blocks.
    scope: Vec<String>,
    out: Vec<ReferenceOrigin>,
}

impl OriginCollector<'_> {
    fn block(&mut self, block: &Block) {
        let skip: &[&str] = match block.block_type.as_str() {
            // Settings and address-only blocks hold no references to decode.
            "terraform" | "moved" | "removed" => return,
            "variable" => &["type"],
            "module" => &["source", "version", "providers"],
            "resource" | "data" | "ephemeral" => &["provider"],
            "lifecycle" => &["ignore_changes"],
            "import" => &["to", "provider"],
            "dynamic" => &["iterator"],
            _ => &[],
        };

        if block.block_type == "dynamic" {
            self.dynamic_block(block, skip);
            return;
        }

        self.attributes(&block.body, skip);
        for nested in &block.body.blocks {
            self.block(nested);
        }
    }

    fn dynamic_block(&mut self, block: &Block, skip: &[&str]) {
        let iterator = block
            .body
            .attribute("iterator")
            .and_then(|a| a.expr.as_keyword().map(str::to_string))
            .or_else(|| block.label(0).map(str::to_string));

        if let Some(for_each) = block.body.attribute("for_each") {
            self.expression(&for_each.expr);
        }

        let pushed = iterator.is_some();
        if let Some(name) = iterator {
            self.scope.push(name);
        }
        for attr in &block.body.attributes {
            if attr.name != "for_each" && !skip.contains(&attr.name.as_str()) {
                self.expression(&attr.expr);
            }
        }
        for nested in &block.body.blocks {
            self.block(nested);
        }
        if pushed {
            self.scope.pop();
        }
    }

    fn attributes(&mut self, body: &Body, skip: &[&str]) {
        for attr in &body.attributes {
            if !skip.contains(&attr.name.as_str()) {
                self.expression(&attr.expr);
            }
        }
    }

    fn expression(&mut self, expr: &Expr) {
        for traversal in expr.traversals() {
            let root = traversal.root.as_str();
            if BUILTIN_ROOTS.contains(&root) || self.scope.iter().any(|s| s == root) {
                continue;
            }
            let segments = traversal.segments().into_iter().map(str::to_string).collect();
            self.out
                .push(ReferenceOrigin::new(self.path, segments, traversal.range.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::test_support::context;
    use crate::decoder::{load_module_metadata, ChildModule};
    use std::sync::Arc;

    const MAIN: &str = r#"
variable "region" {
  type = string
}

locals {
  name = "web-${var.region}"
}

resource "aws_instance" "web" {
  provider = aws.west
  ami      = data.aws_ami.ubuntu.id
  tags     = { Name = local.name }
  count    = 2

  lifecycle {
    ignore_changes = [tags]
  }

  dynamic "ebs_block_device" {
    for_each = var.volumes
    content {
      device_name = ebs_block_device.value.name
    }
  }
}

data "aws_ami" "ubuntu" {}

module "net" {
  source = "./net"
  cidr   = [for c in var.cidrs : c if c != self.x]
}

output "ip" {
  value = aws_instance.web[0].private_ip
}
"#;

    fn addresses(origins: &[ReferenceOrigin]) -> Vec<&str> {
        origins.iter().map(|o| o.address.as_str()).collect()
    }

    #[test]
    fn test_collect_targets() {
        let ctx = context("/work", &[("main.tf", MAIN)]);
        let targets = collect_reference_targets(&ctx);
        let mut addrs: Vec<&str> = targets.iter().map(|t| t.address.as_str()).collect();
        addrs.sort();
        assert_eq!(
            addrs,
            vec![
                "aws_instance.web",
                "data.aws_ami.ubuntu",
                "local.name",
                "module.net",
                "var.region"
            ]
        );
        assert!(targets.iter().all(|t| t.path == Path::new("/work")));
    }

    #[test]
    fn test_collect_origins_skips_bindings_and_builtins() {
        let ctx = context("/work", &[("main.tf", MAIN)]);
        let origins = collect_reference_origins(&ctx);
        let addrs = addresses(&origins);

        assert!(addrs.contains(&"var.region"));
        assert!(addrs.contains(&"data.aws_ami.ubuntu.id"));
        assert!(addrs.contains(&"local.name"));
        assert!(addrs.contains(&"var.volumes"));
        assert!(addrs.contains(&"var.cidrs"));
        assert!(addrs.contains(&"aws_instance.web.private_ip"));

        assert!(!addrs.iter().any(|a| a.starts_with("aws.west")));
        assert!(!addrs.contains(&"tags"));
        assert!(!addrs.contains(&"string"));
        assert!(!addrs.iter().any(|a| a.starts_with("ebs_block_device")));
        assert!(!addrs.iter().any(|a| a.starts_with("self")));
        assert!(!addrs.iter().any(|a| *a == "c"));
    }

    #[test]
    fn test_resolve_longest_prefix() {
        let ctx = context("/work", &[("main.tf", MAIN)]);
        let targets = collect_reference_targets(&ctx);
        let origins = collect_reference_origins(&ctx);

        let ip = origins
            .iter()
            .find(|o| o.address == "aws_instance.web.private_ip")
            .unwrap();
        assert_eq!(resolve_origin(ip, &targets).unwrap().address, "aws_instance.web");

        let unknown = ReferenceOrigin::new(
            Path::new("/work"),
            vec!["var".into(), "missing".into()],
            ip.range.clone(),
        );
        assert!(resolve_origin(&unknown, &targets).is_none());
    }

    #[test]
    fn test_child_outputs_are_targets() {
        let child_files = crate::decoder::test_support::parse(&[(
            "outputs.tf",
            "output \"vpc_id\" {\n  value = \"x\"\n}\n",
        )]);
        let child_meta = Arc::new(load_module_metadata(&child_files));

        let ctx = context("/work", &[("main.tf", "module \"net\" {\n  source = \"./net\"\n}\n\noutput \"vpc\" {\n  value = module.net.vpc_id\n}\n")])
            .with_child(
                "net",
                ChildModule {
                    path: PathBuf::from("/work/net"),
                    meta: Some(child_meta),
                },
            );
        let targets = collect_reference_targets(&ctx);
        let origins = collect_reference_origins(&ctx);

        let origin = origins.iter().find(|o| o.root() == "module").unwrap();
        let target = resolve_origin(origin, &targets).unwrap();
        assert_eq!(target.kind, TargetKind::ModuleOutput);
        assert_eq!(target.path, PathBuf::from("/work/net"));
        assert_eq!(target.file_path(), PathBuf::from("/work/net/outputs.tf"));
    }
}

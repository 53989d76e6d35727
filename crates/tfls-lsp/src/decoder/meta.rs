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

//! Module metadata: the declarations of a module, without evaluating any
//! expression.

use crate::constants::DEFAULT_REGISTRY_HOST;
use crate::schema::normalize_provider_source;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tfls_hcl::ast::Literal;
use tfls_hcl::{Block, Expr, ExprKind, File, Range};

/// Declarations of one module directory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleMetadata {
    pub filenames: Vec<String>,
    /// `terraform { required_version = ... }` constraints.
    pub core_requirements: Vec<String>,
    pub backend: Option<String>,
    pub cloud: bool,
    /// Keyed by provider local name.
    pub provider_requirements: BTreeMap<String, ProviderRequirement>,
    pub variables: BTreeMap<String, Variable>,
    pub outputs: BTreeMap<String, Output>,
    pub locals: BTreeMap<String, Range>,
    pub module_calls: BTreeMap<String, ModuleCall>,
    /// Keyed by `<type>.<name>`.
    pub resources: BTreeMap<String, Resource>,
    /// Keyed by `<type>.<name>`.
    pub data_sources: BTreeMap<String, Resource>,
    /// Keyed by `<type>.<name>`.
    pub ephemeral_resources: BTreeMap<String, Resource>,
    /// Local names of `provider` blocks.
    pub provider_configs: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRequirement {
    /// Normalized source address, e.g. `hashicorp/aws`.
    pub source: String,
    pub version_constraints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    /// Type constraint as written, e.g. `list(string)`.
    pub type_constraint: Option<String>,
    pub description: Option<String>,
    pub has_default: bool,
    pub sensitive: bool,
    pub range: Range,
    pub name_range: Range,
}

impl Variable {
    pub fn is_required(&self) -> bool {
        !self.has_default
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub name: String,
    pub description: Option<String>,
    pub sensitive: bool,
    pub range: Range,
    pub name_range: Range,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleCall {
    pub name: String,
    pub source: Option<ModuleSource>,
    pub version: Option<String>,
    /// Argument names other than meta-arguments.
    pub input_names: Vec<String>,
    pub range: Range,
    pub name_range: Range,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub type_name: String,
    pub name: String,
    /// Provider local name, explicit or implied by the type prefix.
    pub provider: String,
    pub range: Range,
    pub name_range: Range,
}

impl Resource {
    pub fn address(&self) -> String {
        format!("{}.{}", self.type_name, self.name)
    }
}

/// Registry module address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrySource {
    pub host: String,
    pub namespace: String,
    pub name: String,
    pub provider: String,
}

impl RegistrySource {
    pub fn is_public(&self) -> bool {
        self.host == DEFAULT_REGISTRY_HOST
    }
}

impl std::fmt::Display for RegistrySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}/{}", self.host, self.namespace, self.name, self.provider)
    }
}

/// Where a module call gets its code from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    /// `./` or `../` path, relative to the calling module.
    Local(String),
    Registry(RegistrySource),
    /// Git, HTTP, S3 and every other remote form.
    Remote(String),
}

impl ModuleSource {
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("./") || raw.starts_with("../") || raw == "." || raw == ".." {
            return ModuleSource::Local(raw.to_string());
        }
        match parse_registry_source(raw) {
            Some(source) => ModuleSource::Registry(source),
            None => ModuleSource::Remote(raw.to_string()),
        }
    }

    /// Directory of a local source, relative to `module_dir`.
    pub fn local_path(&self, module_dir: &Path) -> Option<PathBuf> {
        match self {
            ModuleSource::Local(rel) => Some(normalize_path(&module_dir.join(rel))),
            _ => None,
        }
    }
}

fn is_registry_segment(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn parse_registry_source(raw: &str) -> Option<RegistrySource> {
    if raw.contains("::") || raw.contains("//") || raw.contains('?') || raw.contains('@') {
        return None;
    }
    let parts: Vec<&str> = raw.split('/').collect();
    let (host, rest) = match parts.len() {
        3 => (DEFAULT_REGISTRY_HOST, &parts[..]),
        4 if parts[0].contains('.') => (parts[0], &parts[1..]),
        _ => return None,
    };
    if !rest.iter().all(|s| is_registry_segment(s)) {
        return None;
    }
    Some(RegistrySource {
        host: host.to_ascii_lowercase(),
        namespace: rest[0].to_string(),
        name: rest[1].to_string(),
        provider: rest[2].to_string(),
    })
}

/// Resolve `.` and `..` components without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Type constraint source form: `string`, `list(string)`, `object({...})`.
fn render_type(expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::Traversal(t) => t.address(),
        ExprKind::Call { name, args, .. } => {
            let args: Vec<String> = args.iter().map(render_type).collect();
            format!("{}({})", name, args.join(", "))
        }
        ExprKind::Object(items) => {
            let fields: Vec<String> = items
                .iter()
                .map(|item| {
                    let key = item
                        .key
                        .as_keyword()
                        .map(str::to_string)
                        .or_else(|| item.key.as_static_string())
                        .unwrap_or_default();
                    format!("{} = {}", key, render_type(&item.value))
                })
                .collect();
            format!("{{{}}}", fields.join(", "))
        }
        ExprKind::Tuple(items) => {
            let items: Vec<String> = items.iter().map(render_type).collect();
            format!("[{}]", items.join(", "))
        }
        ExprKind::Parens(inner) => render_type(inner),
        _ => "any".to_string(),
    }
}

fn bool_attr(block: &Block, name: &str) -> bool {
    matches!(
        block.body.attribute(name).map(|a| &a.expr.kind),
        Some(ExprKind::Literal(Literal::Bool(true)))
    )
}

fn string_attr(block: &Block, name: &str) -> Option<String> {
    block.body.attribute(name).and_then(|a| a.expr.as_static_string())
}

fn label_range(block: &Block, index: usize) -> Range {
    block
        .labels
        .get(index)
        .map(|l| l.range.clone())
        .unwrap_or_else(|| block.type_range.clone())
}

/// Provider local name for a resource block.
///
/// An explicit `provider = aws.west` wins; otherwise the type prefix up to
/// the first underscore.
fn resource_provider(block: &Block, type_name: &str) -> String {
    if let Some(attr) = block.body.attribute("provider") {
        if let Some(t) = attr.expr.traversals().first() {
            return t.root.clone();
        }
    }
    type_name.split('_').next().unwrap_or(type_name).to_string()
}

const MODULE_META_ARGUMENTS: &[&str] = &["source", "version", "count", "for_each", "providers", "depends_on"];

/// Collect the declarations of every file in `files`.
///
/// Files are visited in name order; for duplicate names the first
/// declaration wins. Duplicates are reported by schema validation.
pub fn load_module_metadata(files: &BTreeMap<String, File>) -> ModuleMetadata {
    let mut meta = ModuleMetadata {
        filenames: files.keys().cloned().collect(),
        ..ModuleMetadata::default()
    };

    for file in files.values() {
        for block in &file.body.blocks {
            match block.block_type.as_str() {
                "terraform" => load_terraform_block(block, &mut meta),
                "provider" => {
                    if let Some(name) = block.label(0) {
                        meta.provider_configs.insert(name.to_string());
                    }
                }
                "variable" => {
                    let Some(name) = block.label(0) else { continue };
                    meta.variables.entry(name.to_string()).or_insert_with(|| Variable {
                        name: name.to_string(),
                        type_constraint: block.body.attribute("type").map(|a| render_type(&a.expr)),
                        description: string_attr(block, "description"),
                        has_default: block.body.attribute("default").is_some(),
                        sensitive: bool_attr(block, "sensitive"),
                        range: block.range.clone(),
                        name_range: label_range(block, 0),
                    });
                }
                "output" => {
                    let Some(name) = block.label(0) else { continue };
                    meta.outputs.entry(name.to_string()).or_insert_with(|| Output {
                        name: name.to_string(),
                        description: string_attr(block, "description"),
                        sensitive: bool_attr(block, "sensitive"),
                        range: block.range.clone(),
                        name_range: label_range(block, 0),
                    });
                }
                "locals" => {
                    for attr in &block.body.attributes {
                        meta.locals
                            .entry(attr.name.clone())
                            .or_insert_with(|| attr.name_range.clone());
                    }
                }
                "module" => {
                    let Some(name) = block.label(0) else { continue };
                    let input_names = block
                        .body
                        .attributes
                        .iter()
                        .map(|a| a.name.clone())
                        .filter(|n| !MODULE_META_ARGUMENTS.contains(&n.as_str()))
                        .collect();
                    meta.module_calls.entry(name.to_string()).or_insert_with(|| ModuleCall {
                        name: name.to_string(),
                        source: string_attr(block, "source").map(|s| ModuleSource::parse(&s)),
                        version: string_attr(block, "version"),
                        input_names,
                        range: block.range.clone(),
                        name_range: label_range(block, 0),
                    });
                }
                kind @ ("resource" | "data" | "ephemeral") => {
                    let (Some(type_name), Some(name)) = (block.label(0), block.label(1)) else {
                        continue;
                    };
                    let resource = Resource {
                        type_name: type_name.to_string(),
                        name: name.to_string(),
                        provider: resource_provider(block, type_name),
                        range: block.range.clone(),
                        name_range: label_range(block, 1),
                    };
                    let table = match kind {
                        "resource" => &mut meta.resources,
                        "data" => &mut meta.data_sources,
                        _ => &mut meta.ephemeral_resources,
                    };
                    table.entry(resource.address()).or_insert(resource);
                }
                _ => {}
            }
        }
    }

    meta
}

fn load_terraform_block(block: &Block, meta: &mut ModuleMetadata) {
    if let Some(version) = string_attr(block, "required_version") {
        meta.core_requirements.push(version);
    }
    for nested in &block.body.blocks {
        match nested.block_type.as_str() {
            "backend" => meta.backend = nested.label(0).map(str::to_string),
            "cloud" => meta.cloud = true,
            "required_providers" => {
                for attr in &nested.body.attributes {
                    let requirement = provider_requirement(&attr.name, &attr.expr);
                    meta.provider_requirements
                        .entry(attr.name.clone())
                        .and_modify(|existing| {
                            existing
                                .version_constraints
                                .extend(requirement.version_constraints.iter().cloned())
                        })
                        .or_insert(requirement);
                }
            }
            _ => {}
        }
    }
}

/// `aws = { source = "hashicorp/aws", version = "~> 5.0" }` or the legacy
/// `aws = "~> 5.0"` form.
fn provider_requirement(local_name: &str, expr: &Expr) -> ProviderRequirement {
    let mut source = None;
    let mut version_constraints = Vec::new();
    match &expr.kind {
        ExprKind::Object(items) => {
            for item in items {
                let key = item
                    .key
                    .as_keyword()
                    .map(str::to_string)
                    .or_else(|| item.key.as_static_string());
                match key.as_deref() {
                    Some("source") => source = item.value.as_static_string(),
                    Some("version") => version_constraints.extend(item.value.as_static_string()),
                    _ => {}
                }
            }
        }
        _ => version_constraints.extend(expr.as_static_string()),
    }
    ProviderRequirement {
        source: normalize_provider_source(source.as_deref().unwrap_or(local_name)),
        version_constraints,
    }
}

impl ModuleMetadata {
    /// Normalized source address for a provider local name.
    pub fn provider_source(&self, local_name: &str) -> String {
        self.provider_requirements
            .get(local_name)
            .map(|r| r.source.clone())
            .unwrap_or_else(|| normalize_provider_source(local_name))
    }

    /// Declared and implied provider local names.
    pub fn provider_local_names(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self.provider_requirements.keys().cloned().collect();
        names.extend(self.provider_configs.iter().cloned());
        for resource in self
            .resources
            .values()
            .chain(self.data_sources.values())
            .chain(self.ephemeral_resources.values())
        {
            names.insert(resource.provider.clone());
        }
        names
    }

    /// Normalized sources of every provider this module uses.
    pub fn provider_sources(&self) -> BTreeSet<String> {
        self.provider_local_names()
            .iter()
            .map(|name| self.provider_source(name))
            .collect()
    }

    /// Module calls with a local source, with the resolved child directory.
    pub fn local_module_calls(&self, module_dir: &Path) -> Vec<(&ModuleCall, PathBuf)> {
        self.module_calls
            .values()
            .filter_map(|call| {
                let path = call.source.as_ref()?.local_path(module_dir)?;
                Some((call, path))
            })
            .collect()
    }
}

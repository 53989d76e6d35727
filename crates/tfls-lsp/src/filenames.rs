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

//! File name classification.

use crate::constants::{DATA_DIR, MODULE_MANIFEST_PATH, PLUGIN_LOCK_FILE};
use std::path::{Component, Path, PathBuf};

/// Editor backups, lock files and hidden files.
pub fn is_ignored_file(name: &str) -> bool {
    name.starts_with('.')
        || name.ends_with('~')
        || (name.starts_with('#') && name.ends_with('#'))
}

pub fn is_module_filename(name: &str) -> bool {
    !is_ignored_file(name) && (name.ends_with(".tf") || name.ends_with(".tf.json"))
}

pub fn is_vars_filename(name: &str) -> bool {
    !is_ignored_file(name) && (name.ends_with(".tfvars") || name.ends_with(".tfvars.json"))
}

pub fn is_stack_filename(name: &str) -> bool {
    !is_ignored_file(name) && (name.ends_with(".tfstack.hcl") || name.ends_with(".tfstack.json"))
}

pub fn is_deploy_filename(name: &str) -> bool {
    !is_ignored_file(name) && (name.ends_with(".tfdeploy.hcl") || name.ends_with(".tfdeploy.json"))
}

/// Any file the stacks feature indexes.
pub fn is_stacks_related_filename(name: &str) -> bool {
    is_stack_filename(name) || is_deploy_filename(name)
}

/// Root module marker files as seen in a directory listing.
pub fn is_root_module_filename(name: &str) -> bool {
    name == PLUGIN_LOCK_FILE
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

/// Path of a `.tf` / `.tf.json` file.
pub fn is_module_file_path(path: &Path) -> bool {
    file_name(path).map(is_module_filename).unwrap_or(false)
}

pub fn is_vars_file_path(path: &Path) -> bool {
    file_name(path).map(is_vars_filename).unwrap_or(false)
}

/// Root module directory owning a module manifest path.
///
/// `/work/.terraform/modules/modules.json` yields `/work`.
pub fn module_dir_from_manifest(path: &Path) -> Option<PathBuf> {
    let suffix = Path::new(MODULE_MANIFEST_PATH);
    if !path.ends_with(suffix) {
        return None;
    }
    let mut dir = path;
    for _ in suffix.components() {
        dir = dir.parent()?;
    }
    Some(dir.to_path_buf())
}

/// Root module directory owning a dependency lock file path.
pub fn module_dir_from_plugin_lock(path: &Path) -> Option<PathBuf> {
    if file_name(path) == Some(PLUGIN_LOCK_FILE) {
        path.parent().map(Path::to_path_buf)
    } else {
        None
    }
}

/// Directory containing the `.terraform` data directory `path` lives in.
pub fn module_dir_from_data_dir(path: &Path) -> Option<PathBuf> {
    let mut dir = PathBuf::new();
    for component in path.components() {
        if let Component::Normal(name) = component {
            if name == DATA_DIR {
                return Some(dir);
            }
        }
        dir.push(component);
    }
    None
}

/// Paths that belong to the root modules feature rather than to the
/// configuration itself.
pub fn is_data_dir_path(path: &Path) -> bool {
    module_dir_from_plugin_lock(path).is_some() || module_dir_from_data_dir(path).is_some()
}

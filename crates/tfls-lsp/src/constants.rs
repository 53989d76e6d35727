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

//! Language server constants.
//!
//! # Organization
//!
//! - **Feature Identifiers**: Event bus subscriber names
//! - **Terraform Layout**: Well-known files inside a working directory
//! - **External Collaborators**: Terraform CLI and registry tuning
//! - **Walker**: Directory names never indexed

// ============================================================================
// Feature Identifiers
// ============================================================================

/// Subscriber identifier of the modules feature.
pub const FEATURE_MODULES: &str = "feature.modules";

/// Subscriber identifier of the variables feature.
pub const FEATURE_VARIABLES: &str = "feature.variables";

/// Subscriber identifier of the root modules feature.
pub const FEATURE_ROOT_MODULES: &str = "feature.rootmodules";

/// Subscriber identifier of the stacks feature.
pub const FEATURE_STACKS: &str = "feature.stacks";

// ============================================================================
// Terraform Layout
// ============================================================================

/// Name of the data directory `terraform init` creates.
pub const DATA_DIR: &str = ".terraform";

/// Module manifest path relative to a root module.
pub const MODULE_MANIFEST_PATH: &str = ".terraform/modules/modules.json";

/// Dependency lock file written next to the root module.
pub const PLUGIN_LOCK_FILE: &str = ".terraform.lock.hcl";

/// Hostname of the public registry. Module sources without a hostname
/// belong to it.
pub const DEFAULT_REGISTRY_HOST: &str = "registry.terraform.io";

// ============================================================================
// External Collaborators
// ============================================================================

/// Default timeout for a single Terraform CLI invocation (in seconds).
///
/// **Rationale**: `terraform providers schema -json` loads every provider
/// plugin; on a cold cache with large providers this takes tens of seconds.
///
/// **Trade-offs**:
/// - Shorter timeouts fail schema loading on slow machines
/// - Longer timeouts keep the single low priority worker busy
pub const DEFAULT_TERRAFORM_TIMEOUT_SECS: u64 = 30;

/// Base URL of the public module registry API.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.terraform.io";

/// Timeout for a single registry request (in seconds).
///
/// **Rationale**: Registry data only enriches completion of module inputs.
/// A short timeout keeps an unreachable registry from holding the low
/// priority lane.
pub const REGISTRY_REQUEST_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Walker
// ============================================================================

/// Directory names skipped by the walker unless overridden by
/// `indexing.ignoreDirectoryNames`.
///
/// **Rationale**: VCS metadata, editor state and tool caches never hold
/// configuration worth indexing, and some of them (`.terragrunt-cache`)
/// contain thousands of copies of the same modules.
pub const DEFAULT_IGNORED_DIRECTORY_NAMES: &[&str] = &[
    ".git",
    ".idea",
    ".vscode",
    "terraform.tfstate.d",
    ".terragrunt-cache",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_identifiers_are_distinct() {
        let ids = [FEATURE_MODULES, FEATURE_VARIABLES, FEATURE_ROOT_MODULES, FEATURE_STACKS];
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_manifest_lives_in_data_dir() {
        assert!(MODULE_MANIFEST_PATH.starts_with(DATA_DIR));
    }

    #[test]
    fn test_data_dir_not_in_configurable_ignores() {
        // The data directory is always skipped, independent of settings.
        assert!(!DEFAULT_IGNORED_DIRECTORY_NAMES.contains(&DATA_DIR));
    }
}

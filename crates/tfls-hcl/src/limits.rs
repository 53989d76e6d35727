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

//! Resource limits for parsing.

/// Configurable limits for the parser.
///
/// These bound the resources consumed by a single file so that a
/// pathological input in the workspace cannot stall indexing.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Maximum file size in bytes (default: 16MB).
    pub max_file_size: usize,
    /// Maximum nesting of blocks and expressions (default: 128).
    pub max_nesting_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_file_size: 16 * 1024 * 1024, // 16MB
            max_nesting_depth: 128,
        }
    }
}

impl Limits {
    /// Create limits with no restrictions (for testing).
    pub fn unlimited() -> Self {
        Self {
            max_file_size: usize::MAX,
            max_nesting_depth: usize::MAX,
        }
    }
}

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

//! Editor language identifiers.

use std::fmt;

/// Closed set of languages the indexer understands.
///
/// Resolved once from the LSP `languageId` string; everything behind the
/// protocol boundary matches on this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LanguageId {
    Terraform,
    TerraformVars,
    TerraformStacks,
    TerraformDeploy,
}

impl LanguageId {
    /// Parse an LSP language identifier. Unknown identifiers yield `None`.
    pub fn from_lsp(id: &str) -> Option<Self> {
        match id {
            "terraform" => Some(LanguageId::Terraform),
            "terraform-vars" => Some(LanguageId::TerraformVars),
            "terraform-stack" => Some(LanguageId::TerraformStacks),
            "terraform-deploy" => Some(LanguageId::TerraformDeploy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LanguageId::Terraform => "terraform",
            LanguageId::TerraformVars => "terraform-vars",
            LanguageId::TerraformStacks => "terraform-stack",
            LanguageId::TerraformDeploy => "terraform-deploy",
        }
    }

    /// Guess the language from a file name, for files opened by clients
    /// that send an unrecognized identifier.
    pub fn from_filename(name: &str) -> Option<Self> {
        if name.ends_with(".tfstack.hcl") {
            Some(LanguageId::TerraformStacks)
        } else if name.ends_with(".tfdeploy.hcl") {
            Some(LanguageId::TerraformDeploy)
        } else if name.ends_with(".tfvars") || name.ends_with(".tfvars.json") {
            Some(LanguageId::TerraformVars)
        } else if name.ends_with(".tf") || name.ends_with(".tf.json") {
            Some(LanguageId::Terraform)
        } else {
            None
        }
    }
}

impl fmt::Display for LanguageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

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

//! Parser for Terraform configuration files.
//!
//! Both syntaxes produce the same tree:
//!
//! - [`parse_config`] handles the native syntax (`*.tf`, `*.tfvars`,
//!   `*.tfstack.hcl`, `*.tfdeploy.hcl`)
//! - [`parse_json_config`] handles the JSON syntax (`*.tf.json`)
//!
//! Parsing never fails outright. Problems are returned as [`Diagnostics`]
//! alongside a best-effort [`File`], so callers can index what is valid and
//! surface the rest to the user.
//!
//! # Example
//!
//! ```
//! use tfls_hcl::parse_config;
//!
//! let (file, diags) = parse_config("variable \"region\" {}\n", "variables.tf");
//! assert!(!diags.has_errors());
//! assert_eq!(file.body.blocks[0].label(0), Some("region"));
//! ```

pub mod ast;
mod diagnostics;
mod error;
mod json;
mod lexer;
mod limits;
mod parser;
mod span;

pub use ast::{Attribute, Block, Body, Expr, ExprKind, File, Label, Traversal, TraverseStep};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{HclError, HclResult};
pub use json::{parse_json_config, parse_json_config_with_limits};
pub use limits::Limits;
pub use parser::{parse_config, parse_config_with_limits, parse_expression, parse_expression_at};
pub use span::{Pos, Range};

/// Parse `src` with the syntax implied by `filename`.
pub fn parse_file(src: &str, filename: &str) -> (File, Diagnostics) {
    if filename.ends_with(".json") {
        parse_json_config(src, filename)
    } else {
        parse_config(src, filename)
    }
}

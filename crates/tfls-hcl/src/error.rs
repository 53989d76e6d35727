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

//! Error types for whole-file failures.
//!
//! Syntax problems inside a file are reported as [`crate::Diagnostic`]s and
//! never abort parsing. `HclError` covers the cases where a file cannot be
//! parsed at all.

use crate::diagnostics::Diagnostic;
use crate::span::{Pos, Range};
use thiserror::Error;

/// A failure that prevented a file from being parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HclError {
    /// File exceeds the configured size limit.
    #[error("{filename}: file size {size} exceeds maximum {max}")]
    FileTooLarge {
        filename: String,
        size: usize,
        max: usize,
    },

    /// JSON configuration is not valid JSON.
    #[error("{filename}:{line}:{column}: invalid JSON: {message}")]
    InvalidJson {
        filename: String,
        line: usize,
        column: usize,
        message: String,
    },

    /// JSON configuration root is not an object.
    #[error("{filename}: root of a JSON configuration must be an object")]
    JsonRootNotObject { filename: String },
}

impl HclError {
    /// Convert into a diagnostic placed at the start of the file (or at the
    /// reported JSON position).
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            Self::FileTooLarge { filename, .. } | Self::JsonRootNotObject { filename } => {
                Diagnostic::error(self.to_string(), Range::point(filename.clone(), Pos::start()))
            }
            Self::InvalidJson {
                filename,
                line,
                column,
                message,
            } => {
                let pos = Pos::new(*line, *column, 0);
                Diagnostic::error("Invalid JSON", Range::point(filename.clone(), pos))
                    .with_detail(message.clone())
            }
        }
    }
}

/// Result type for whole-file parse operations.
pub type HclResult<T> = Result<T, HclError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_too_large_display() {
        let err = HclError::FileTooLarge {
            filename: "big.tf".to_string(),
            size: 20,
            max: 10,
        };
        assert_eq!(err.to_string(), "big.tf: file size 20 exceeds maximum 10");
    }

    #[test]
    fn test_invalid_json_to_diagnostic() {
        let err = HclError::InvalidJson {
            filename: "main.tf.json".to_string(),
            line: 3,
            column: 7,
            message: "expected value".to_string(),
        };
        let diag = err.to_diagnostic();
        assert_eq!(diag.summary, "Invalid JSON");
        assert_eq!(diag.range.start.line, 3);
        assert_eq!(diag.detail.as_deref(), Some("expected value"));
    }
}

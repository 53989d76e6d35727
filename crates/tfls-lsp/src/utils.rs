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

//! Conversions between HCL source positions and LSP positions.
//!
//! HCL positions are 1-based with columns counted in characters; LSP
//! positions are 0-based with columns counted in UTF-16 code units.

use tfls_hcl::{Diagnostic, Pos, Range, Severity};
use tower_lsp::lsp_types;

/// Text of a 0-based line without its terminator.
fn line_of(text: &str, line: usize) -> Option<&str> {
    text.split('\n').nth(line).map(|l| l.strip_suffix('\r').unwrap_or(l))
}

/// 1-based character column for a UTF-16 offset into `line`. Offsets past
/// the end or inside a surrogate pair round down.
pub fn utf16_to_column(line: &str, utf16: u32) -> usize {
    let mut units = 0u32;
    let mut column = 1;
    for c in line.chars() {
        let width = c.len_utf16() as u32;
        if units + width > utf16 {
            break;
        }
        units += width;
        column += 1;
    }
    column
}

/// UTF-16 offset of a 1-based character column of `line`.
pub fn column_to_utf16(line: &str, column: usize) -> u32 {
    line.chars()
        .take(column.saturating_sub(1))
        .map(|c| c.len_utf16() as u32)
        .sum()
}

/// HCL `(line, column)` of an LSP position in `text`.
pub fn from_lsp_position(text: &str, position: lsp_types::Position) -> (usize, usize) {
    let line = position.line as usize;
    let column = line_of(text, line)
        .map(|l| utf16_to_column(l, position.character))
        .unwrap_or(position.character as usize + 1);
    (line + 1, column)
}

/// LSP position of an HCL position. Without the source text columns are
/// assumed to be ASCII.
pub fn to_lsp_position(text: Option<&str>, pos: &Pos) -> lsp_types::Position {
    let line = pos.line.saturating_sub(1);
    let character = text
        .and_then(|t| line_of(t, line))
        .map(|l| column_to_utf16(l, pos.column))
        .unwrap_or(pos.column.saturating_sub(1) as u32);
    lsp_types::Position::new(line as u32, character)
}

pub fn to_lsp_range(text: Option<&str>, range: &Range) -> lsp_types::Range {
    lsp_types::Range::new(to_lsp_position(text, &range.start), to_lsp_position(text, &range.end))
}

pub fn to_lsp_diagnostic(text: Option<&str>, diag: &Diagnostic) -> lsp_types::Diagnostic {
    let severity = match diag.severity {
        Severity::Error => lsp_types::DiagnosticSeverity::ERROR,
        Severity::Warning => lsp_types::DiagnosticSeverity::WARNING,
    };
    let message = match &diag.detail {
        Some(detail) => format!("{}: {}", diag.summary, detail),
        None => diag.summary.clone(),
    };
    lsp_types::Diagnostic {
        range: to_lsp_range(text, &diag.range),
        severity: Some(severity),
        source: Some("tfls".to_string()),
        message,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf16_columns() {
        // "é" is one UTF-16 unit, the emoji two.
        let line = "a = \"é😀x\"";
        assert_eq!(utf16_to_column(line, 0), 1);
        assert_eq!(utf16_to_column(line, 6), 7);
        assert_eq!(utf16_to_column(line, 7), 7);
        assert_eq!(utf16_to_column(line, 8), 8);
        assert_eq!(column_to_utf16(line, 8), 8);
        assert_eq!(column_to_utf16(line, 7), 6);
        assert_eq!(column_to_utf16(line, 1), 0);
    }

    #[test]
    fn test_lsp_position_round_trip() {
        let text = "locals {\r\n  name = \"ü\"\r\n  id = local.name\r\n}\n";
        let (line, column) = from_lsp_position(text, lsp_types::Position::new(2, 7));
        assert_eq!((line, column), (3, 8));

        let pos = Pos { line, column, byte: 0 };
        assert_eq!(to_lsp_position(Some(text), &pos), lsp_types::Position::new(2, 7));
        assert_eq!(to_lsp_position(None, &pos), lsp_types::Position::new(2, 7));
    }

    #[test]
    fn test_diagnostic_conversion() {
        let range = Range {
            filename: "main.tf".into(),
            start: Pos { line: 1, column: 1, byte: 0 },
            end: Pos { line: 1, column: 9, byte: 8 },
        };
        let diag = Diagnostic::warning("Deprecated", range).with_detail("Use something else.");
        let lsp = to_lsp_diagnostic(None, &diag);
        assert_eq!(lsp.severity, Some(lsp_types::DiagnosticSeverity::WARNING));
        assert_eq!(lsp.message, "Deprecated: Use something else.");
        assert_eq!(lsp.range.end, lsp_types::Position::new(0, 8));
    }
}

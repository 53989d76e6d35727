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

//! Source positions and ranges.
//!
//! Every AST node and diagnostic carries a [`Range`] so that the language
//! server can map results back onto editor positions.
//!
//! # Examples
//!
//! ```
//! use tfls_hcl::{Pos, Range};
//!
//! let start = Pos::new(1, 1, 0);
//! let end = Pos::new(1, 9, 8);
//! let range = Range::new("main.tf", start, end);
//! assert!(range.is_single_line());
//! assert!(range.contains_pos(1, 3));
//! assert!(!range.contains_pos(2, 1));
//! ```

use std::fmt;

/// A position in a source file.
///
/// Lines and columns are 1-based, columns count Unicode scalar values.
/// `byte` is the 0-based byte offset into the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Pos {
    /// Line number (1-based).
    pub line: usize,
    /// Column number (1-based, in characters).
    pub column: usize,
    /// Byte offset (0-based).
    pub byte: usize,
}

impl Pos {
    /// Creates a new position.
    #[inline]
    pub const fn new(line: usize, column: usize, byte: usize) -> Self {
        Self { line, column, byte }
    }

    /// Position of the first character of a file.
    #[inline]
    pub const fn start() -> Self {
        Self {
            line: 1,
            column: 1,
            byte: 0,
        }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A half-open range `[start, end)` inside a named file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Range {
    /// File name the range belongs to (base name, not a full path).
    pub filename: String,
    /// Start position (inclusive).
    pub start: Pos,
    /// End position (exclusive).
    pub end: Pos,
}

impl Range {
    /// Creates a new range.
    pub fn new(filename: impl Into<String>, start: Pos, end: Pos) -> Self {
        Self {
            filename: filename.into(),
            start,
            end,
        }
    }

    /// A zero-width range at `pos`.
    pub fn point(filename: impl Into<String>, pos: Pos) -> Self {
        Self::new(filename, pos, pos)
    }

    /// Returns `true` if the range starts and ends on the same line.
    #[inline]
    pub fn is_single_line(&self) -> bool {
        self.start.line == self.end.line
    }

    /// Returns `true` if the given 1-based line/column lies inside the range.
    ///
    /// The end position is treated as inclusive so that a cursor placed
    /// directly after the last character still matches.
    pub fn contains_pos(&self, line: usize, column: usize) -> bool {
        let after_start = (line, column) >= (self.start.line, self.start.column);
        let before_end = (line, column) <= (self.end.line, self.end.column);
        after_start && before_end
    }

    /// Smallest range covering both `self` and `other`.
    ///
    /// Both ranges are expected to belong to the same file; the file name of
    /// `self` is kept.
    pub fn merge(&self, other: &Range) -> Range {
        Range {
            filename: self.filename.clone(),
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single_line() {
            write!(
                f,
                "{}:{},{}-{}",
                self.filename, self.start.line, self.start.column, self.end.column
            )
        } else {
            write!(f, "{}:{}-{}", self.filename, self.start, self.end)
        }
    }
}

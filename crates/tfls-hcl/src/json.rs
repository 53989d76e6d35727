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

//! JSON configuration syntax (`*.tf.json`).
//!
//! JSON carries no schema of its own, so the number of labels for each
//! block type comes from a fixed table. String values may contain `${...}`
//! interpolations, which are parsed with the native expression parser.
//! `serde_json` does not expose value positions; ranges are recovered by
//! locating keys in the source text.

use crate::ast::*;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::HclError;
use crate::limits::Limits;
use crate::parser::parse_expression_at;
use crate::span::{Pos, Range};
use serde_json::{Map, Value};

/// Label count of top-level block types.
fn top_level_labels(block_type: &str) -> usize {
    match block_type {
        "resource" | "data" | "ephemeral" => 2,
        "variable" | "output" | "module" | "provider" | "check" => 1,
        _ => 0,
    }
}

/// Label count of nested block types that are blocks rather than
/// attributes, or `None` for attributes.
fn nested_block_labels(name: &str) -> Option<usize> {
    match name {
        "required_providers" | "lifecycle" | "validation" | "connection" | "cloud"
        | "precondition" | "postcondition" => Some(0),
        "backend" | "provisioner" | "dynamic" => Some(1),
        _ => None,
    }
}

/// Parse a JSON configuration file with default limits.
pub fn parse_json_config(src: &str, filename: &str) -> (File, Diagnostics) {
    parse_json_config_with_limits(src, filename, &Limits::default())
}

/// Parse a JSON configuration file into the same tree as the native syntax.
pub fn parse_json_config_with_limits(
    src: &str,
    filename: &str,
    limits: &Limits,
) -> (File, Diagnostics) {
    let mut file = File {
        filename: filename.to_string(),
        body: Body::default(),
    };
    if src.len() > limits.max_file_size {
        let err = HclError::FileTooLarge {
            filename: filename.to_string(),
            size: src.len(),
            max: limits.max_file_size,
        };
        return (file, Diagnostics::from(vec![err.to_diagnostic()]));
    }

    let value: Value = match serde_json::from_str(src) {
        Ok(v) => v,
        Err(e) => {
            let err = HclError::InvalidJson {
                filename: filename.to_string(),
                line: e.line(),
                column: e.column(),
                message: e.to_string(),
            };
            return (file, Diagnostics::from(vec![err.to_diagnostic()]));
        }
    };
    let root = match value {
        Value::Object(map) => map,
        _ => {
            let err = HclError::JsonRootNotObject {
                filename: filename.to_string(),
            };
            return (file, Diagnostics::from(vec![err.to_diagnostic()]));
        }
    };

    let mut converter = Converter::new(src, filename);
    let mut body = Body::default();
    for (key, value) in &root {
        if key == "//" {
            continue;
        }
        let key_at = converter.find_key(key, 0);
        let type_range = converter.key_range(key, key_at);
        converter.convert_blocks(
            key,
            &type_range,
            value,
            top_level_labels(key),
            Vec::new(),
            key_at,
            &mut body.blocks,
        );
    }
    body.range = Range::new(filename, Pos::start(), converter.pos_at(src.len()));
    file.body = body;
    (file, converter.diags)
}

struct Converter<'a> {
    src: &'a str,
    filename: &'a str,
    line_starts: Vec<usize>,
    diags: Diagnostics,
}

impl<'a> Converter<'a> {
    fn new(src: &'a str, filename: &'a str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(src.match_indices('\n').map(|(i, _)| i + 1));
        Self {
            src,
            filename,
            line_starts,
            diags: Diagnostics::new(),
        }
    }

    fn pos_at(&self, byte: usize) -> Pos {
        let byte = byte.min(self.src.len());
        let line_idx = self.line_starts.partition_point(|&start| start <= byte) - 1;
        let line_start = self.line_starts[line_idx];
        let column = self
            .src
            .get(line_start..byte)
            .map(|s| s.chars().count())
            .unwrap_or(0)
            + 1;
        Pos::new(line_idx + 1, column, byte)
    }

    /// Byte offset of the quoted `key` at or after `from`.
    fn find_key(&self, key: &str, from: usize) -> usize {
        let needle = format!("\"{}\"", key);
        self.src
            .get(from..)
            .and_then(|rest| rest.find(&needle))
            .map(|i| from + i)
            .unwrap_or(from)
    }

    fn key_range(&self, key: &str, at: usize) -> Range {
        let end = (at + key.len() + 2).min(self.src.len());
        Range::new(self.filename, self.pos_at(at), self.pos_at(end))
    }

    #[allow(clippy::too_many_arguments)]
    fn convert_blocks(
        &mut self,
        block_type: &str,
        type_range: &Range,
        value: &Value,
        labels_left: usize,
        labels: Vec<Label>,
        from: usize,
        out: &mut Vec<Block>,
    ) {
        match value {
            Value::Object(map) if labels_left == 0 => {
                let body = self.convert_body(map, from);
                out.push(Block {
                    block_type: block_type.to_string(),
                    type_range: type_range.clone(),
                    range: Range::new(self.filename, type_range.start, body.range.end),
                    labels,
                    body,
                });
            }
            Value::Object(map) => {
                for (label, inner) in map {
                    if label == "//" {
                        continue;
                    }
                    let at = self.find_key(label, from);
                    let mut labels = labels.clone();
                    labels.push(Label {
                        value: label.clone(),
                        range: self.key_range(label, at),
                    });
                    self.convert_blocks(
                        block_type,
                        type_range,
                        inner,
                        labels_left - 1,
                        labels,
                        at,
                        out,
                    );
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.convert_blocks(
                        block_type,
                        type_range,
                        item,
                        labels_left,
                        labels.clone(),
                        from,
                        out,
                    );
                }
            }
            _ => {
                self.diags.push(
                    Diagnostic::error("Incorrect JSON value type", type_range.clone()).with_detail(
                        format!("A JSON object is required for the {:?} block.", block_type),
                    ),
                );
            }
        }
    }

    fn convert_body(&mut self, map: &Map<String, Value>, from: usize) -> Body {
        let mut body = Body::default();
        let mut end = from;
        for (key, value) in map {
            if key == "//" {
                continue;
            }
            let at = self.find_key(key, from);
            let name_range = self.key_range(key, at);
            end = end.max(at);
            match nested_block_labels(key) {
                Some(labels) if matches!(value, Value::Object(_) | Value::Array(_)) => {
                    self.convert_blocks(key, &name_range, value, labels, Vec::new(), at, &mut body.blocks);
                }
                _ => {
                    let expr = self.convert_value(value, at + key.len() + 2);
                    body.attributes.push(Attribute {
                        name: key.clone(),
                        range: Range::new(self.filename, name_range.start, expr.range.end),
                        name_range,
                        expr,
                    });
                }
            }
        }
        let start = self.pos_at(from);
        body.range = Range::new(self.filename, start, self.pos_at(end));
        body
    }

    fn convert_value(&mut self, value: &Value, from: usize) -> Expr {
        let point = Range::point(self.filename, self.pos_at(from));
        match value {
            Value::Null => Expr::new(ExprKind::Literal(Literal::Null), point),
            Value::Bool(b) => Expr::new(ExprKind::Literal(Literal::Bool(*b)), point),
            Value::Number(n) => Expr::new(ExprKind::Literal(Literal::Number(n.to_string())), point),
            Value::String(s) => self.convert_string(s, from),
            Value::Array(items) => {
                let items = items.iter().map(|v| self.convert_value(v, from)).collect();
                Expr::new(ExprKind::Tuple(items), point)
            }
            Value::Object(map) => {
                let items = map
                    .iter()
                    .map(|(k, v)| {
                        let at = self.find_key(k, from);
                        let key = Expr::new(
                            ExprKind::Literal(Literal::String(k.clone())),
                            self.key_range(k, at),
                        );
                        let value = self.convert_value(v, at + k.len() + 2);
                        ObjectItem { key, value }
                    })
                    .collect();
                Expr::new(ExprKind::Object(items), point)
            }
        }
    }

    /// Convert a string value, parsing any `${...}` sequences it contains.
    fn convert_string(&mut self, s: &str, from: usize) -> Expr {
        // position of the opening quote of the value
        let open = self
            .src
            .get(from..)
            .and_then(|rest| rest.find('"'))
            .map(|i| from + i)
            .unwrap_or(from);
        let content_start = open + 1;
        let range = Range::new(
            self.filename,
            self.pos_at(open),
            self.pos_at(content_start + s.len() + 1),
        );
        if !s.contains("${") {
            return Expr::new(ExprKind::Literal(Literal::String(s.to_string())), range);
        }

        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut i = 0;
        while i < s.len() {
            if s[i..].starts_with("$${") {
                literal.push_str("${");
                i += 3;
                continue;
            }
            if s[i..].starts_with("${") {
                if !literal.is_empty() {
                    parts.push(Expr::new(
                        ExprKind::Literal(Literal::String(std::mem::take(&mut literal))),
                        range.clone(),
                    ));
                }
                let inner_start = i + 2;
                let Some(inner_end) = matching_brace(s, inner_start) else {
                    self.diags.push(
                        Diagnostic::error("Unterminated template sequence", range.clone())
                            .with_detail("There is no closing brace for this interpolation."),
                    );
                    return Expr::new(ExprKind::Template(parts), range);
                };
                let inner = s[inner_start..inner_end].trim_matches('~');
                let start = self.pos_at(content_start + inner_start);
                let (expr, diags) = parse_expression_at(inner, self.filename, start);
                self.diags.extend(diags);
                parts.push(expr);
                i = inner_end + 1;
                continue;
            }
            let ch_len = s[i..].chars().next().map(char::len_utf8).unwrap_or(1);
            literal.push_str(&s[i..i + ch_len]);
            i += ch_len;
        }
        if !literal.is_empty() {
            parts.push(Expr::new(ExprKind::Literal(Literal::String(literal)), range.clone()));
        }
        Expr::new(ExprKind::Template(parts), range)
    }
}

/// Byte index of the `}` closing an interpolation whose contents start at
/// `start`, skipping braces inside nested quoted strings.
fn matching_brace(s: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in s[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' if depth == 0 => return Some(start + i),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

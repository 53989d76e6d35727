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

//! Syntax tree for HCL configuration files.
//!
//! The tree keeps exactly what the indexer needs: block structure,
//! attribute expressions and the ranges of every node. Values are never
//! evaluated; expressions are kept so that references (traversals) can be
//! collected from them.

use crate::span::Range;

/// A parsed configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct File {
    /// Base name of the file, e.g. `main.tf`.
    pub filename: String,
    /// Top-level body.
    pub body: Body,
}

/// A sequence of attributes and blocks.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Body {
    pub attributes: Vec<Attribute>,
    pub blocks: Vec<Block>,
    pub range: Range,
}

impl Body {
    /// Look up an attribute by name (first match).
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// All blocks of the given type, in source order.
    pub fn blocks_of_type<'a>(&'a self, block_type: &'a str) -> impl Iterator<Item = &'a Block> + 'a {
        self.blocks.iter().filter(move |b| b.block_type == block_type)
    }

    /// Visit every expression in this body and all nested blocks.
    pub fn walk_expressions<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        for attr in &self.attributes {
            f(&attr.expr);
        }
        for block in &self.blocks {
            block.body.walk_expressions(f);
        }
    }
}

/// `name = expression`
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub name_range: Range,
    pub expr: Expr,
    pub range: Range,
}

/// `type "label" "label" { ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub block_type: String,
    pub type_range: Range,
    pub labels: Vec<Label>,
    pub body: Body,
    pub range: Range,
}

impl Block {
    /// Value of the label at `index`, if present.
    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(|l| l.value.as_str())
    }
}

/// A block label, either quoted or a bare identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub value: String,
    pub range: Range,
}

/// An expression with its source range.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub range: Range,
}

/// Expression variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    /// Quoted string or heredoc; literal parts are `Literal::String`.
    Template(Vec<Expr>),
    /// A reference rooted at a variable name, e.g. `var.region`.
    Traversal(Traversal),
    /// Steps applied to an arbitrary expression, e.g. `f(x)[0].id`.
    RelativeTraversal {
        source: Box<Expr>,
        steps: Vec<TraverseStep>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
        expand_final: bool,
    },
    Tuple(Vec<Expr>),
    Object(Vec<ObjectItem>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Conditional {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    For(Box<ForExpr>),
    Parens(Box<Expr>),
    /// Placeholder for an expression that failed to parse.
    Invalid,
}

/// A literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    /// Numbers are kept in their source form.
    Number(String),
    String(String),
}

/// One `key = value` item of an object constructor.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectItem {
    pub key: Expr,
    pub value: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl BinaryOp {
    /// Binding strength; higher binds tighter.
    pub(crate) fn precedence(self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::Equal | Self::NotEqual => 3,
            Self::Less | Self::Greater | Self::LessOrEqual | Self::GreaterOrEqual => 4,
            Self::Add | Self::Subtract => 5,
            Self::Multiply | Self::Divide | Self::Modulo => 6,
        }
    }
}

/// `[for k, v in coll : expr if cond]` and the object form.
#[derive(Debug, Clone, PartialEq)]
pub struct ForExpr {
    pub key_var: Option<String>,
    pub value_var: String,
    pub collection: Expr,
    /// Present for object `for` expressions (`key => value`).
    pub key: Option<Expr>,
    pub value: Expr,
    pub condition: Option<Expr>,
    /// `...` grouping marker after the value of an object `for`.
    pub grouped: bool,
}

/// A root name followed by attribute, index and splat steps.
#[derive(Debug, Clone, PartialEq)]
pub struct Traversal {
    pub root: String,
    pub root_range: Range,
    pub steps: Vec<TraverseStep>,
    pub range: Range,
}

impl Traversal {
    /// Root name followed by attribute names, skipping index steps and
    /// stopping at the first splat.
    ///
    /// `aws_instance.web[0].id` yields `["aws_instance", "web", "id"]`.
    pub fn segments(&self) -> Vec<&str> {
        let mut out = vec![self.root.as_str()];
        for step in &self.steps {
            match step {
                TraverseStep::Attr { name, .. } => out.push(name.as_str()),
                TraverseStep::Index { .. } => {}
                TraverseStep::Splat { .. } => break,
            }
        }
        out
    }

    /// Dotted form of [`Traversal::segments`].
    pub fn address(&self) -> String {
        self.segments().join(".")
    }

    /// Range covering the root and the first `count` segments after it.
    pub fn range_of_segments(&self, count: usize) -> Range {
        let mut range = self.root_range.clone();
        let mut seen = 0;
        for step in &self.steps {
            if seen >= count {
                break;
            }
            match step {
                TraverseStep::Attr { range: r, .. } => {
                    range = range.merge(r);
                    seen += 1;
                }
                TraverseStep::Index { range: r, .. } => range = range.merge(r),
                TraverseStep::Splat { .. } => break,
            }
        }
        range
    }
}

/// A single traversal step.
#[derive(Debug, Clone, PartialEq)]
pub enum TraverseStep {
    Attr { name: String, range: Range },
    Index { key: Box<Expr>, range: Range },
    Splat { range: Range },
}

impl Expr {
    pub(crate) fn new(kind: ExprKind, range: Range) -> Self {
        Self { kind, range }
    }

    /// Static string value of a literal or an interpolation-free template.
    pub fn as_static_string(&self) -> Option<String> {
        match &self.kind {
            ExprKind::Literal(Literal::String(s)) => Some(s.clone()),
            ExprKind::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match &part.kind {
                        ExprKind::Literal(Literal::String(s)) => out.push_str(s),
                        _ => return None,
                    }
                }
                Some(out)
            }
            _ => None,
        }
    }

    /// Bare identifier such as `string` in `type = string`.
    pub fn as_keyword(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Traversal(t) if t.steps.is_empty() => Some(t.root.as_str()),
            _ => None,
        }
    }

    /// All references in this expression.
    ///
    /// Names bound by enclosing `for` expressions are excluded, as are
    /// bare identifiers used as object keys.
    pub fn traversals(&self) -> Vec<&Traversal> {
        let mut out = Vec::new();
        let mut scope: Vec<&str> = Vec::new();
        collect_traversals(self, &mut scope, &mut out);
        out
    }
}

fn collect_traversals<'a>(expr: &'a Expr, scope: &mut Vec<&'a str>, out: &mut Vec<&'a Traversal>) {
    match &expr.kind {
        ExprKind::Literal(_) | ExprKind::Invalid => {}
        ExprKind::Template(parts) | ExprKind::Tuple(parts) => {
            for part in parts {
                collect_traversals(part, scope, out);
            }
        }
        ExprKind::Traversal(t) => {
            if !scope.contains(&t.root.as_str()) {
                out.push(t);
            }
            collect_step_keys(&t.steps, scope, out);
        }
        ExprKind::RelativeTraversal { source, steps } => {
            collect_traversals(source, scope, out);
            collect_step_keys(steps, scope, out);
        }
        ExprKind::Call { args, .. } => {
            for arg in args {
                collect_traversals(arg, scope, out);
            }
        }
        ExprKind::Object(items) => {
            for item in items {
                if item.key.as_keyword().is_none() {
                    collect_traversals(&item.key, scope, out);
                }
                collect_traversals(&item.value, scope, out);
            }
        }
        ExprKind::Unary { operand, .. } => collect_traversals(operand, scope, out),
        ExprKind::Binary { lhs, rhs, .. } => {
            collect_traversals(lhs, scope, out);
            collect_traversals(rhs, scope, out);
        }
        ExprKind::Conditional {
            condition,
            then_expr,
            else_expr,
        } => {
            collect_traversals(condition, scope, out);
            collect_traversals(then_expr, scope, out);
            collect_traversals(else_expr, scope, out);
        }
        ExprKind::For(for_expr) => {
            collect_traversals(&for_expr.collection, scope, out);
            let before = scope.len();
            if let Some(k) = &for_expr.key_var {
                scope.push(k.as_str());
            }
            scope.push(for_expr.value_var.as_str());
            if let Some(key) = &for_expr.key {
                collect_traversals(key, scope, out);
            }
            collect_traversals(&for_expr.value, scope, out);
            if let Some(cond) = &for_expr.condition {
                collect_traversals(cond, scope, out);
            }
            scope.truncate(before);
        }
        ExprKind::Parens(inner) => collect_traversals(inner, scope, out),
    }
}

fn collect_step_keys<'a>(steps: &'a [TraverseStep], scope: &mut Vec<&'a str>, out: &mut Vec<&'a Traversal>) {
    for step in steps {
        if let TraverseStep::Index { key, .. } = step {
            collect_traversals(key, scope, out);
        }
    }
}

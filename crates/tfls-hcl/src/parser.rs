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

//! Recursive descent parser for the HCL native syntax.
//!
//! The parser never fails: syntax errors become diagnostics and the parser
//! resynchronizes at the next line so the rest of the file is still indexed.

use crate::ast::*;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::HclError;
use crate::lexer::{Lexer, Token, TokenKind};
use crate::limits::Limits;
use crate::span::{Pos, Range};
use std::mem::discriminant;

/// Parse a native syntax configuration file with default limits.
pub fn parse_config(src: &str, filename: &str) -> (File, Diagnostics) {
    parse_config_with_limits(src, filename, &Limits::default())
}

/// Parse a native syntax configuration file.
///
/// The returned file is always usable; it may be partial when diagnostics
/// contain errors.
pub fn parse_config_with_limits(src: &str, filename: &str, limits: &Limits) -> (File, Diagnostics) {
    if src.len() > limits.max_file_size {
        let err = HclError::FileTooLarge {
            filename: filename.to_string(),
            size: src.len(),
            max: limits.max_file_size,
        };
        let file = File {
            filename: filename.to_string(),
            body: Body::default(),
        };
        return (file, Diagnostics::from(vec![err.to_diagnostic()]));
    }

    let (tokens, mut diags) = Lexer::new(src, filename).tokenize();
    let mut parser = Parser::new(tokens, filename, limits.max_nesting_depth);
    let body = parser.parse_body(None);
    diags.extend(parser.diags);
    let file = File {
        filename: filename.to_string(),
        body,
    };
    (file, diags)
}

/// Parse a standalone expression, e.g. the contents of an interpolation in a
/// JSON configuration string.
pub fn parse_expression(src: &str, filename: &str) -> (Expr, Diagnostics) {
    parse_expression_at(src, filename, Pos::start())
}

/// Like [`parse_expression`], for a fragment located at `start` in `filename`.
pub fn parse_expression_at(src: &str, filename: &str, start: Pos) -> (Expr, Diagnostics) {
    let (tokens, mut diags) = Lexer::new_at(src, filename, start).tokenize();
    let mut parser = Parser::new(tokens, filename, Limits::default().max_nesting_depth);
    parser.newline_skip = 1;
    let expr = parser.parse_expression();
    if !parser.at(&TokenKind::Eof) {
        let range = parser.peek().range.clone();
        parser.diags.push(
            Diagnostic::error("Extra characters after expression", range)
                .with_detail("An expression was successfully parsed, but extra characters were found after it."),
        );
    }
    diags.extend(parser.diags);
    (expr, diags)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    filename: &'a str,
    diags: Diagnostics,
    depth: usize,
    max_depth: usize,
    /// Greater than zero while inside brackets, where newlines are not
    /// significant.
    newline_skip: usize,
    last_end: Pos,
}

impl<'a> Parser<'a> {
    fn new(tokens: Vec<Token>, filename: &'a str, max_depth: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            filename,
            diags: Diagnostics::new(),
            depth: 0,
            max_depth,
            newline_skip: 0,
            last_end: Pos::start(),
        }
    }

    fn peek(&mut self) -> &Token {
        if self.newline_skip > 0 {
            while self.pos + 1 < self.tokens.len() && self.tokens[self.pos].kind == TokenKind::Newline {
                self.pos += 1;
            }
        }
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek_kind(&mut self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_nth_kind(&self, n: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + n).map(|t| &t.kind)
    }

    fn next(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        self.last_end = token.range.end;
        token
    }

    fn at(&mut self, kind: &TokenKind) -> bool {
        discriminant(self.peek_kind()) == discriminant(kind)
    }

    fn at_keyword(&mut self, word: &str) -> bool {
        matches!(self.peek_kind(), TokenKind::Ident(s) if s == word)
    }

    fn range_from(&self, start: Pos) -> Range {
        Range::new(self.filename, start, self.last_end)
    }

    fn error(&mut self, summary: &str, range: Range, detail: impl Into<String>) {
        self.diags.push(Diagnostic::error(summary, range).with_detail(detail));
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> bool {
        if self.at(&kind) {
            self.next();
            return true;
        }
        let range = self.peek().range.clone();
        self.error(
            &format!("Missing {}", what),
            range,
            format!("Expected {} here.", what),
        );
        false
    }

    /// Skip to the end of the current line, stepping over nested braces.
    fn recover_line(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.tokens.get(self.pos).map(|t| &t.kind) {
                None | Some(TokenKind::Eof) => return,
                Some(TokenKind::Newline) if depth == 0 => return,
                Some(TokenKind::LBrace) => depth += 1,
                Some(TokenKind::RBrace) => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                }
                _ => {}
            }
            self.pos += 1;
        }
    }

    /// Skip past the bracket that closes the current construct.
    fn recover_to_closing(&mut self, close: &TokenKind) {
        let mut depth = 0usize;
        loop {
            let kind = match self.tokens.get(self.pos) {
                Some(t) => t.kind.clone(),
                None => return,
            };
            match kind {
                TokenKind::Eof => return,
                TokenKind::LBrace | TokenKind::LBrack | TokenKind::LParen => depth += 1,
                TokenKind::RBrace | TokenKind::RBrack | TokenKind::RParen => {
                    if depth == 0 {
                        if discriminant(&kind) == discriminant(close) {
                            self.next();
                        }
                        return;
                    }
                    depth -= 1;
                }
                _ => {}
            }
            self.pos += 1;
        }
    }

    fn enter(&mut self, range: &Range) -> bool {
        if self.depth >= self.max_depth {
            self.error(
                "Nesting too deep",
                range.clone(),
                format!("Nesting exceeds the maximum depth of {}.", self.max_depth),
            );
            return false;
        }
        self.depth += 1;
        true
    }

    // ==================== Bodies ====================

    /// Parse attributes and blocks until EOF, or until the closing brace
    /// when `open` holds the range of the opening brace.
    fn parse_body(&mut self, open: Option<Range>) -> Body {
        let start = self.peek().range.start;
        let mut body = Body::default();
        loop {
            while self.at(&TokenKind::Newline) {
                self.next();
            }
            match self.peek_kind().clone() {
                TokenKind::Eof => {
                    if let Some(open) = &open {
                        self.error(
                            "Unclosed configuration block",
                            open.clone(),
                            "There is no closing brace for this block before the end of the file.",
                        );
                    }
                    break;
                }
                TokenKind::RBrace => {
                    if open.is_some() {
                        break;
                    }
                    let range = self.next().range;
                    self.error(
                        "Argument or block definition required",
                        range,
                        "An unexpected closing brace was found.",
                    );
                }
                TokenKind::Ident(_) => self.parse_body_item(&mut body),
                _ => {
                    let range = self.peek().range.clone();
                    self.error(
                        "Argument or block definition required",
                        range,
                        "An argument or block definition is required here.",
                    );
                    self.recover_line();
                }
            }
        }
        body.range = self.range_from(start);
        body
    }

    fn parse_body_item(&mut self, body: &mut Body) {
        let name_tok = self.next();
        let name = match &name_tok.kind {
            TokenKind::Ident(name) => name.clone(),
            _ => return,
        };

        match self.peek_kind().clone() {
            TokenKind::Equal => {
                self.next();
                let expr = self.parse_expression();
                let range = Range::new(self.filename, name_tok.range.start, expr.range.end);
                body.attributes.push(Attribute {
                    name,
                    name_range: name_tok.range,
                    expr,
                    range,
                });
                self.expect_item_end("argument");
            }
            TokenKind::Ident(_) | TokenKind::OQuote | TokenKind::LBrace => {
                if let Some(block) = self.parse_block(name, name_tok.range) {
                    body.blocks.push(block);
                    self.expect_item_end("block definition");
                }
            }
            _ => {
                let range = self.peek().range.clone();
                self.error(
                    "Argument or block definition required",
                    range,
                    format!("An equals sign or a block body is required after {:?}.", name),
                );
                self.recover_line();
            }
        }
    }

    fn parse_block(&mut self, block_type: String, type_range: Range) -> Option<Block> {
        let mut labels = Vec::new();
        loop {
            match self.peek_kind().clone() {
                TokenKind::Ident(value) => {
                    let range = self.next().range;
                    labels.push(Label { value, range });
                }
                TokenKind::OQuote => {
                    let open = self.next();
                    labels.push(self.parse_quoted_label(open.range.start)?);
                }
                TokenKind::LBrace => break,
                _ => {
                    let range = self.peek().range.clone();
                    self.error(
                        "Invalid block definition",
                        range,
                        "Either a quoted string block label or an opening brace is expected here.",
                    );
                    self.recover_line();
                    return None;
                }
            }
        }

        let open = self.next().range;
        if !self.enter(&open) {
            self.recover_to_closing(&TokenKind::RBrace);
            return None;
        }
        let saved_skip = std::mem::replace(&mut self.newline_skip, 0);
        let body = self.parse_body(Some(open));
        self.newline_skip = saved_skip;
        self.depth -= 1;
        if self.at(&TokenKind::RBrace) {
            self.next();
        }
        Some(Block {
            block_type,
            range: self.range_from(type_range.start),
            type_range,
            labels,
            body,
        })
    }

    fn parse_quoted_label(&mut self, start: Pos) -> Option<Label> {
        let mut value = String::new();
        loop {
            match self.peek_kind().clone() {
                TokenKind::TemplateLiteral(text) => {
                    self.next();
                    value.push_str(&text);
                }
                TokenKind::CQuote => {
                    self.next();
                    return Some(Label {
                        value,
                        range: self.range_from(start),
                    });
                }
                TokenKind::TemplateInterp | TokenKind::TemplateControl => {
                    let range = self.peek().range.clone();
                    self.error(
                        "Invalid block label",
                        range,
                        "Template sequences are not allowed in block labels.",
                    );
                    self.recover_line();
                    return None;
                }
                _ => {
                    // unterminated, already reported by the lexer
                    self.recover_line();
                    return None;
                }
            }
        }
    }

    fn expect_item_end(&mut self, what: &str) {
        match self.tokens.get(self.pos).map(|t| &t.kind) {
            None | Some(TokenKind::Newline) | Some(TokenKind::Eof) | Some(TokenKind::RBrace) => {}
            Some(_) => {
                let range = self.tokens[self.pos].range.clone();
                self.error(
                    &format!("Missing newline after {}", what),
                    range,
                    format!("A {} must be followed by a newline.", what),
                );
                self.recover_line();
            }
        }
    }

    // ==================== Expressions ====================

    fn parse_expression(&mut self) -> Expr {
        let range = self.peek().range.clone();
        if !self.enter(&range) {
            self.recover_line();
            return Expr::new(ExprKind::Invalid, range);
        }
        let expr = self.parse_conditional();
        self.depth -= 1;
        expr
    }

    fn parse_conditional(&mut self) -> Expr {
        let condition = self.parse_binary(0);
        if !self.at(&TokenKind::Question) {
            return condition;
        }
        self.next();
        let then_expr = self.parse_expression();
        self.expect(TokenKind::Colon, "colon");
        let else_expr = self.parse_expression();
        let range = Range::new(self.filename, condition.range.start, else_expr.range.end);
        Expr::new(
            ExprKind::Conditional {
                condition: Box::new(condition),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            },
            range,
        )
    }

    fn binary_op(kind: &TokenKind) -> Option<BinaryOp> {
        Some(match kind {
            TokenKind::Or => BinaryOp::Or,
            TokenKind::And => BinaryOp::And,
            TokenKind::EqualEqual => BinaryOp::Equal,
            TokenKind::NotEqual => BinaryOp::NotEqual,
            TokenKind::Less => BinaryOp::Less,
            TokenKind::Greater => BinaryOp::Greater,
            TokenKind::LessEqual => BinaryOp::LessOrEqual,
            TokenKind::GreaterEqual => BinaryOp::GreaterOrEqual,
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Minus => BinaryOp::Subtract,
            TokenKind::Star => BinaryOp::Multiply,
            TokenKind::Slash => BinaryOp::Divide,
            TokenKind::Percent => BinaryOp::Modulo,
            _ => return None,
        })
    }

    /// Precedence climbing; all binary operators are left associative.
    fn parse_binary(&mut self, min_prec: u8) -> Expr {
        let mut lhs = self.parse_unary();
        loop {
            let op = match Self::binary_op(self.peek_kind()) {
                Some(op) if op.precedence() > min_prec => op,
                _ => break,
            };
            self.next();
            let rhs = self.parse_binary(op.precedence());
            let range = Range::new(self.filename, lhs.range.start, rhs.range.end);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                range,
            );
        }
        lhs
    }

    fn parse_unary(&mut self) -> Expr {
        let op = match self.peek_kind() {
            TokenKind::Minus => UnaryOp::Negate,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.parse_postfix(),
        };
        let op_range = self.next().range;
        if !self.enter(&op_range) {
            return Expr::new(ExprKind::Invalid, op_range);
        }
        let start = op_range.start;
        let operand = self.parse_unary();
        self.depth -= 1;
        Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            self.range_from(start),
        )
    }

    fn parse_postfix(&mut self) -> Expr {
        let mut expr = self.parse_primary();
        // postfix steps never continue onto the next line outside brackets
        loop {
            let step = match self.tokens.get(self.pos).map(|t| t.kind.clone()) {
                Some(TokenKind::Dot) => {
                    let dot = self.next();
                    match self.peek_kind().clone() {
                        TokenKind::Ident(name) => {
                            let range = self.next().range;
                            TraverseStep::Attr { name, range }
                        }
                        TokenKind::Number(n) => {
                            let range = self.next().range;
                            let key = Expr::new(ExprKind::Literal(Literal::Number(n)), range.clone());
                            TraverseStep::Index {
                                key: Box::new(key),
                                range: Range::new(self.filename, dot.range.start, range.end),
                            }
                        }
                        TokenKind::Star => {
                            self.next();
                            TraverseStep::Splat {
                                range: self.range_from(dot.range.start),
                            }
                        }
                        _ => {
                            let range = self.peek().range.clone();
                            self.error(
                                "Invalid attribute name",
                                range,
                                "An attribute name is required after a dot.",
                            );
                            break;
                        }
                    }
                }
                Some(TokenKind::LBrack) => {
                    let open = self.next();
                    if self.peek_nth_kind(0) == Some(&TokenKind::Star)
                        && self.peek_nth_kind(1) == Some(&TokenKind::RBrack)
                    {
                        self.next();
                        self.next();
                        TraverseStep::Splat {
                            range: self.range_from(open.range.start),
                        }
                    } else {
                        self.newline_skip += 1;
                        let key = self.parse_expression();
                        if !self.expect(TokenKind::RBrack, "closing bracket") {
                            self.recover_to_closing(&TokenKind::RBrack);
                        }
                        self.newline_skip -= 1;
                        TraverseStep::Index {
                            key: Box::new(key),
                            range: self.range_from(open.range.start),
                        }
                    }
                }
                _ => break,
            };
            expr = Self::push_step(expr, step, self.last_end);
        }
        expr
    }

    fn push_step(expr: Expr, step: TraverseStep, end: Pos) -> Expr {
        let mut range = expr.range.clone();
        range.end = end;
        match expr.kind {
            ExprKind::Traversal(mut traversal) => {
                traversal.steps.push(step);
                traversal.range.end = end;
                Expr::new(ExprKind::Traversal(traversal), range)
            }
            ExprKind::RelativeTraversal { source, mut steps } => {
                steps.push(step);
                Expr::new(ExprKind::RelativeTraversal { source, steps }, range)
            }
            kind => {
                let source = Expr::new(kind, expr.range);
                Expr::new(
                    ExprKind::RelativeTraversal {
                        source: Box::new(source),
                        steps: vec![step],
                    },
                    range,
                )
            }
        }
    }

    fn parse_primary(&mut self) -> Expr {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number(n) => {
                self.next();
                Expr::new(ExprKind::Literal(Literal::Number(n)), token.range)
            }
            TokenKind::Ident(name) => {
                self.next();
                match name.as_str() {
                    "true" => return Expr::new(ExprKind::Literal(Literal::Bool(true)), token.range),
                    "false" => return Expr::new(ExprKind::Literal(Literal::Bool(false)), token.range),
                    "null" => return Expr::new(ExprKind::Literal(Literal::Null), token.range),
                    _ => {}
                }
                if self.tokens.get(self.pos).map(|t| &t.kind) == Some(&TokenKind::LParen) {
                    return self.parse_call(name, token.range);
                }
                Expr::new(
                    ExprKind::Traversal(Traversal {
                        root: name,
                        root_range: token.range.clone(),
                        steps: Vec::new(),
                        range: token.range.clone(),
                    }),
                    token.range,
                )
            }
            TokenKind::OQuote => {
                self.next();
                self.parse_template(TokenKind::CQuote, token.range.start)
            }
            TokenKind::OHeredoc => {
                self.next();
                self.parse_template(TokenKind::CHeredoc, token.range.start)
            }
            TokenKind::LParen => {
                self.next();
                self.newline_skip += 1;
                let inner = self.parse_expression();
                if !self.expect(TokenKind::RParen, "closing parenthesis") {
                    self.recover_to_closing(&TokenKind::RParen);
                }
                self.newline_skip -= 1;
                Expr::new(ExprKind::Parens(Box::new(inner)), self.range_from(token.range.start))
            }
            TokenKind::LBrack => {
                self.next();
                self.parse_tuple(token.range.start)
            }
            TokenKind::LBrace => {
                self.next();
                self.parse_object(token.range.start)
            }
            TokenKind::Newline
            | TokenKind::Eof
            | TokenKind::RBrace
            | TokenKind::RBrack
            | TokenKind::RParen
            | TokenKind::Comma
            | TokenKind::TemplateSeqEnd => {
                self.error(
                    "Invalid expression",
                    token.range.clone(),
                    "Expected the start of an expression, but found the end of the construct.",
                );
                Expr::new(ExprKind::Invalid, token.range)
            }
            _ => {
                self.next();
                self.error(
                    "Invalid expression",
                    token.range.clone(),
                    "Expected the start of an expression.",
                );
                Expr::new(ExprKind::Invalid, token.range)
            }
        }
    }

    fn parse_call(&mut self, name: String, name_range: Range) -> Expr {
        self.next();
        self.newline_skip += 1;
        let mut args = Vec::new();
        let mut expand_final = false;
        loop {
            if self.at(&TokenKind::RParen) {
                break;
            }
            args.push(self.parse_expression());
            if self.at(&TokenKind::Ellipsis) {
                self.next();
                expand_final = true;
                break;
            }
            if self.at(&TokenKind::Comma) {
                self.next();
                continue;
            }
            break;
        }
        if !self.expect(TokenKind::RParen, "closing parenthesis") {
            self.recover_to_closing(&TokenKind::RParen);
        }
        self.newline_skip -= 1;
        Expr::new(
            ExprKind::Call {
                name,
                args,
                expand_final,
            },
            self.range_from(name_range.start),
        )
    }

    fn parse_template(&mut self, end: TokenKind, start: Pos) -> Expr {
        let saved_skip = std::mem::replace(&mut self.newline_skip, 0);
        let mut parts = Vec::new();
        loop {
            let token = self.peek().clone();
            match token.kind {
                TokenKind::TemplateLiteral(text) => {
                    self.next();
                    parts.push(Expr::new(ExprKind::Literal(Literal::String(text)), token.range));
                }
                TokenKind::TemplateInterp => {
                    self.next();
                    self.newline_skip += 1;
                    parts.push(self.parse_expression());
                    self.newline_skip -= 1;
                    self.expect_sequence_end();
                }
                TokenKind::TemplateControl => {
                    self.next();
                    self.newline_skip += 1;
                    self.parse_directive(&mut parts);
                    self.newline_skip -= 1;
                    self.expect_sequence_end();
                }
                ref kind if discriminant(kind) == discriminant(&end) => {
                    self.next();
                    break;
                }
                _ => break,
            }
        }
        self.newline_skip = saved_skip;
        Expr::new(ExprKind::Template(parts), self.range_from(start))
    }

    /// `%{ if cond }`, `%{ for x in coll }` and the closing keywords. Only
    /// the expressions are kept; they are what reference collection needs.
    fn parse_directive(&mut self, parts: &mut Vec<Expr>) {
        let keyword = match self.peek_kind() {
            TokenKind::Ident(word) => word.clone(),
            _ => String::new(),
        };
        match keyword.as_str() {
            "if" => {
                self.next();
                parts.push(self.parse_expression());
            }
            "for" => {
                self.next();
                while !self.at_keyword("in") && !self.at(&TokenKind::TemplateSeqEnd) && !self.at(&TokenKind::Eof) {
                    self.next();
                }
                if self.at_keyword("in") {
                    self.next();
                    parts.push(self.parse_expression());
                }
            }
            "else" | "endif" | "endfor" => {
                self.next();
            }
            _ => {
                let range = self.peek().range.clone();
                self.error(
                    "Invalid template directive",
                    range,
                    "A template directive keyword (if, for, else, endif, endfor) is expected.",
                );
            }
        }
    }

    fn expect_sequence_end(&mut self) {
        if self.at(&TokenKind::TemplateSeqEnd) {
            self.next();
            return;
        }
        let range = self.peek().range.clone();
        self.error(
            "Extra characters after interpolation expression",
            range,
            "Expected a closing brace to end the interpolation expression.",
        );
        while !self.at(&TokenKind::TemplateSeqEnd) && !self.at(&TokenKind::Eof) {
            self.next();
        }
        if self.at(&TokenKind::TemplateSeqEnd) {
            self.next();
        }
    }

    fn parse_tuple(&mut self, start: Pos) -> Expr {
        self.newline_skip += 1;
        if self.at_keyword("for") {
            let expr = self.parse_for(TokenKind::RBrack, start, false);
            self.newline_skip -= 1;
            return expr;
        }
        let mut items = Vec::new();
        loop {
            if self.at(&TokenKind::RBrack) || self.at(&TokenKind::Eof) {
                break;
            }
            items.push(self.parse_expression());
            if self.at(&TokenKind::Comma) {
                self.next();
                continue;
            }
            if !self.at(&TokenKind::RBrack) {
                let range = self.peek().range.clone();
                self.error(
                    "Missing item separator",
                    range,
                    "Expected a comma to mark the beginning of the next item.",
                );
                self.recover_to_closing(&TokenKind::RBrack);
                self.newline_skip -= 1;
                return Expr::new(ExprKind::Tuple(items), self.range_from(start));
            }
        }
        self.expect(TokenKind::RBrack, "closing bracket");
        self.newline_skip -= 1;
        Expr::new(ExprKind::Tuple(items), self.range_from(start))
    }

    fn parse_object(&mut self, start: Pos) -> Expr {
        self.newline_skip += 1;
        if self.at_keyword("for") {
            let expr = self.parse_for(TokenKind::RBrace, start, true);
            self.newline_skip -= 1;
            return expr;
        }
        let mut items = Vec::new();
        loop {
            if self.at(&TokenKind::RBrace) || self.at(&TokenKind::Eof) {
                break;
            }
            let key = self.parse_expression();
            if self.at(&TokenKind::Equal) || self.at(&TokenKind::Colon) {
                self.next();
            } else {
                let range = self.peek().range.clone();
                self.error(
                    "Missing key/value separator",
                    range,
                    "Expected an equals sign to mark the beginning of the attribute value.",
                );
                self.recover_to_closing(&TokenKind::RBrace);
                self.newline_skip -= 1;
                return Expr::new(ExprKind::Object(items), self.range_from(start));
            }
            let value = self.parse_expression();
            items.push(ObjectItem { key, value });
            if self.at(&TokenKind::Comma) {
                self.next();
            }
        }
        self.expect(TokenKind::RBrace, "closing brace");
        self.newline_skip -= 1;
        Expr::new(ExprKind::Object(items), self.range_from(start))
    }

    fn parse_for(&mut self, close: TokenKind, start: Pos, object: bool) -> Expr {
        self.next();
        let first = self.expect_ident("iterator variable name");
        let (key_var, value_var) = if self.at(&TokenKind::Comma) {
            self.next();
            (first, self.expect_ident("value variable name").unwrap_or_default())
        } else {
            (None, first.unwrap_or_default())
        };
        if self.at_keyword("in") {
            self.next();
        } else {
            let range = self.peek().range.clone();
            self.error("Invalid 'for' expression", range, "The 'in' keyword is required.");
        }
        let collection = self.parse_expression();
        self.expect(TokenKind::Colon, "colon");

        let (key, value, grouped) = if object {
            let key = self.parse_expression();
            self.expect(TokenKind::FatArrow, "'=>'");
            let value = self.parse_expression();
            let grouped = self.at(&TokenKind::Ellipsis);
            if grouped {
                self.next();
            }
            (Some(key), value, grouped)
        } else {
            (None, self.parse_expression(), false)
        };

        let condition = if self.at_keyword("if") {
            self.next();
            Some(self.parse_expression())
        } else {
            None
        };

        if !self.expect(close.clone(), "closing bracket") {
            self.recover_to_closing(&close);
        }
        Expr::new(
            ExprKind::For(Box::new(ForExpr {
                key_var,
                value_var,
                collection,
                key,
                value,
                condition,
                grouped,
            })),
            self.range_from(start),
        )
    }

    fn expect_ident(&mut self, what: &str) -> Option<String> {
        if let TokenKind::Ident(name) = self.peek_kind().clone() {
            self.next();
            return Some(name);
        }
        let range = self.peek().range.clone();
        self.error("Invalid 'for' expression", range, format!("A {} is required.", what));
        None
    }
}

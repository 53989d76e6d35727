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

//! Tokenizer for the HCL native syntax.
//!
//! The lexer is modal: outside of strings it produces ordinary tokens, inside
//! quoted strings and heredocs it produces template literal chunks and the
//! `${` / `%{` markers that switch back into ordinary mode until the matching
//! closing brace.

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::span::{Pos, Range};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Ident(String),
    Number(String),
    OQuote,
    CQuote,
    OHeredoc,
    CHeredoc,
    TemplateLiteral(String),
    /// `${`
    TemplateInterp,
    /// `%{`
    TemplateControl,
    /// `}` closing an interpolation or directive.
    TemplateSeqEnd,
    LBrace,
    RBrace,
    LBrack,
    RBrack,
    LParen,
    RParen,
    Equal,
    Comma,
    Dot,
    Colon,
    Question,
    Ellipsis,
    FatArrow,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqualEqual,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    And,
    Or,
    Newline,
    Invalid(char),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub range: Range,
}

#[derive(Debug, Clone)]
enum Mode {
    Normal { braces: usize },
    Quoted,
    Heredoc { anchor: String },
}

pub(crate) struct Lexer<'a> {
    src: &'a str,
    filename: &'a str,
    pos: usize,
    /// Byte offset of `src` within the enclosing file.
    base: usize,
    line: usize,
    column: usize,
    modes: Vec<Mode>,
    tokens: Vec<Token>,
    diags: Diagnostics,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, filename: &'a str) -> Self {
        Self::new_at(src, filename, Pos::start())
    }

    /// Lexer for a fragment that starts at `start` in the enclosing file.
    pub fn new_at(src: &'a str, filename: &'a str, start: Pos) -> Self {
        Self {
            src,
            filename,
            pos: 0,
            base: start.byte,
            line: start.line,
            column: start.column,
            modes: vec![Mode::Normal { braces: 0 }],
            tokens: Vec::new(),
            diags: Diagnostics::new(),
        }
    }

    /// Tokenize the whole input. The last token is always `Eof`.
    pub fn tokenize(mut self) -> (Vec<Token>, Diagnostics) {
        loop {
            let done = match self.modes.last() {
                Some(Mode::Quoted) => {
                    self.lex_quoted();
                    false
                }
                Some(Mode::Heredoc { .. }) => {
                    self.lex_heredoc();
                    false
                }
                _ => !self.lex_normal(),
            };
            if done {
                break;
            }
        }
        (self.tokens, self.diags)
    }

    fn here(&self) -> Pos {
        Pos::new(self.line, self.column, self.base + self.pos)
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn push(&mut self, kind: TokenKind, start: Pos) {
        let range = Range::new(self.filename, start, self.here());
        self.tokens.push(Token { kind, range });
    }

    fn error(&mut self, summary: &str, start: Pos, detail: &str) {
        let range = Range::new(self.filename, start, self.here());
        self.diags
            .push(Diagnostic::error(summary, range).with_detail(detail));
    }

    fn at_line_start(&self) -> bool {
        self.pos == 0 || self.src.as_bytes().get(self.pos - 1) == Some(&b'\n')
    }

    /// Lex one token in normal mode. Returns `false` once `Eof` was emitted.
    fn lex_normal(&mut self) -> bool {
        self.skip_trivia();
        let start = self.here();
        let c = match self.peek() {
            Some(c) => c,
            None => {
                if self.modes.len() > 1 {
                    self.error(
                        "Unterminated template sequence",
                        start,
                        "The file ends inside an interpolation sequence.",
                    );
                    self.modes.truncate(1);
                }
                self.push(TokenKind::Eof, start);
                return false;
            }
        };

        if c.is_ascii_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(c) = self.peek() {
                if c.is_alphanumeric() || c == '_' || c == '-' {
                    ident.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            self.push(TokenKind::Ident(ident), start);
            return true;
        }

        if c.is_ascii_digit() {
            self.lex_number(start);
            return true;
        }

        self.bump();
        let kind = match c {
            '\n' => TokenKind::Newline,
            '"' => {
                self.modes.push(Mode::Quoted);
                TokenKind::OQuote
            }
            '{' => {
                if let Some(Mode::Normal { braces }) = self.modes.last_mut() {
                    *braces += 1;
                }
                TokenKind::LBrace
            }
            '}' => {
                let closes_template = matches!(self.modes.last(), Some(Mode::Normal { braces: 0 }))
                    && self.modes.len() > 1;
                if closes_template {
                    self.modes.pop();
                    TokenKind::TemplateSeqEnd
                } else {
                    if let Some(Mode::Normal { braces }) = self.modes.last_mut() {
                        *braces = braces.saturating_sub(1);
                    }
                    TokenKind::RBrace
                }
            }
            '[' => TokenKind::LBrack,
            ']' => TokenKind::RBrack,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            '?' => TokenKind::Question,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '.' => {
                if self.peek() == Some('.') && self.peek_at(1) == Some('.') {
                    self.bump();
                    self.bump();
                    TokenKind::Ellipsis
                } else {
                    TokenKind::Dot
                }
            }
            '=' => match self.peek() {
                Some('=') => {
                    self.bump();
                    TokenKind::EqualEqual
                }
                Some('>') => {
                    self.bump();
                    TokenKind::FatArrow
                }
                _ => TokenKind::Equal,
            },
            '!' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::NotEqual
                } else {
                    TokenKind::Bang
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                }
            }
            '<' => {
                if self.peek() == Some('<') {
                    if let Some(kind) = self.lex_heredoc_open(start) {
                        kind
                    } else {
                        TokenKind::Invalid('<')
                    }
                } else if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                }
            }
            '&' if self.peek() == Some('&') => {
                self.bump();
                TokenKind::And
            }
            '|' if self.peek() == Some('|') => {
                self.bump();
                TokenKind::Or
            }
            other => {
                self.error(
                    "Invalid character",
                    start,
                    &format!("The character {:?} is not valid here.", other),
                );
                TokenKind::Invalid(other)
            }
        };
        self.push(kind, start);
        true
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\r') => {
                    self.bump();
                }
                Some('~') if self.peek_at(1) == Some('}') => {
                    // strip marker before a closing interpolation brace
                    self.bump();
                }
                Some('#') => self.skip_line_comment(),
                Some('/') if self.peek_at(1) == Some('/') => self.skip_line_comment(),
                Some('/') if self.peek_at(1) == Some('*') => {
                    let start = self.here();
                    self.bump();
                    self.bump();
                    let mut closed = false;
                    while let Some(c) = self.bump() {
                        if c == '*' && self.peek() == Some('/') {
                            self.bump();
                            closed = true;
                            break;
                        }
                    }
                    if !closed {
                        self.error(
                            "Unterminated comment",
                            start,
                            "There is no closing */ for this comment.",
                        );
                    }
                }
                _ => return,
            }
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                return;
            }
            self.bump();
        }
    }

    fn lex_number(&mut self, start: Pos) {
        let after_dot = matches!(self.tokens.last(), Some(Token { kind: TokenKind::Dot, .. }));
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if !after_dot
            && self.peek() == Some('.')
            && self.peek_at(1).map_or(false, |c| c.is_ascii_digit())
        {
            text.push('.');
            self.bump();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let sign = matches!(self.peek_at(1), Some('+') | Some('-'));
            let digit_at = if sign { 2 } else { 1 };
            if self.peek_at(digit_at).map_or(false, |c| c.is_ascii_digit()) {
                for _ in 0..digit_at {
                    if let Some(c) = self.bump() {
                        text.push(c);
                    }
                }
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        text.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
            }
        }
        self.push(TokenKind::Number(text), start);
    }

    /// Called after the first `<`; consumes `<[-]ANCHOR\n` when present.
    fn lex_heredoc_open(&mut self, start: Pos) -> Option<TokenKind> {
        let rest = &self.src[self.pos..];
        let after = rest.strip_prefix('<')?;
        let after = after.strip_prefix('-').unwrap_or(after);
        let anchor: String = after
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if anchor.is_empty() {
            return None;
        }
        let tail = &after[anchor.len()..];
        let tail = tail.strip_prefix('\r').unwrap_or(tail);
        if !tail.starts_with('\n') {
            self.error(
                "Invalid heredoc introducer",
                start,
                "A heredoc anchor must be followed by a newline.",
            );
            return None;
        }
        let consumed = rest.len() - tail.len() + 1;
        let target = self.pos + consumed;
        while self.pos < target {
            self.bump();
        }
        self.modes.push(Mode::Heredoc { anchor });
        Some(TokenKind::OHeredoc)
    }

    fn flush_literal(&mut self, literal: &mut String, start: Pos) {
        if !literal.is_empty() {
            let text = std::mem::take(literal);
            self.push(TokenKind::TemplateLiteral(text), start);
        }
    }

    /// Handles `${`, `%{` and their escaped forms. Returns `true` when a
    /// sequence was opened and the lexer switched to normal mode.
    fn try_template_sequence(&mut self, literal: &mut String, lit_start: Pos) -> bool {
        let c = self.peek();
        let next = self.peek_at(1);
        let third = self.peek_at(2);
        match (c, next, third) {
            (Some('$'), Some('$'), Some('{')) | (Some('%'), Some('%'), Some('{')) => {
                let marker = self.bump().unwrap_or('$');
                self.bump();
                self.bump();
                literal.push(marker);
                literal.push('{');
                false
            }
            (Some('$'), Some('{'), _) | (Some('%'), Some('{'), _) => {
                self.flush_literal(literal, lit_start);
                let start = self.here();
                let interp = c == Some('$');
                self.bump();
                self.bump();
                if self.peek() == Some('~') {
                    self.bump();
                }
                let kind = if interp {
                    TokenKind::TemplateInterp
                } else {
                    TokenKind::TemplateControl
                };
                self.push(kind, start);
                self.modes.push(Mode::Normal { braces: 0 });
                true
            }
            _ => false,
        }
    }

    fn lex_quoted(&mut self) {
        let mut literal = String::new();
        let mut lit_start = self.here();
        loop {
            if literal.is_empty() {
                lit_start = self.here();
            }
            match self.peek() {
                None => {
                    self.flush_literal(&mut literal, lit_start);
                    self.error(
                        "Unterminated template string",
                        lit_start,
                        "No closing marker was found for the string.",
                    );
                    self.modes.pop();
                    return;
                }
                Some('\n') => {
                    self.flush_literal(&mut literal, lit_start);
                    self.error(
                        "Invalid multi-line string",
                        lit_start,
                        "Quoted strings may not be split over multiple lines.",
                    );
                    self.modes.pop();
                    return;
                }
                Some('"') => {
                    self.flush_literal(&mut literal, lit_start);
                    let start = self.here();
                    self.bump();
                    self.push(TokenKind::CQuote, start);
                    self.modes.pop();
                    return;
                }
                Some('\\') => {
                    let esc_start = self.here();
                    self.bump();
                    match self.bump() {
                        Some('n') => literal.push('\n'),
                        Some('t') => literal.push('\t'),
                        Some('r') => literal.push('\r'),
                        Some('"') => literal.push('"'),
                        Some('\\') => literal.push('\\'),
                        Some('u') => self.lex_unicode_escape(4, &mut literal, esc_start),
                        Some('U') => self.lex_unicode_escape(8, &mut literal, esc_start),
                        Some(other) => {
                            self.error(
                                "Invalid escape sequence",
                                esc_start,
                                &format!("The sequence \\{} is not a valid escape.", other),
                            );
                            literal.push(other);
                        }
                        None => {}
                    }
                }
                Some(_) => {
                    if self.try_template_sequence(&mut literal, lit_start) {
                        return;
                    }
                    if let Some(c) = self.peek() {
                        // escaped markers were already consumed above
                        if (c == '$' || c == '%') && self.peek_at(1) == Some('{') {
                            continue;
                        }
                        literal.push(c);
                        self.bump();
                    }
                }
            }
        }
    }

    fn lex_unicode_escape(&mut self, digits: usize, literal: &mut String, start: Pos) {
        let mut hex = String::new();
        for _ in 0..digits {
            match self.peek() {
                Some(c) if c.is_ascii_hexdigit() => {
                    hex.push(c);
                    self.bump();
                }
                _ => break,
            }
        }
        match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
            Some(c) if hex.len() == digits => literal.push(c),
            _ => self.error(
                "Invalid escape sequence",
                start,
                "A unicode escape must be followed by a valid code point.",
            ),
        }
    }

    fn lex_heredoc(&mut self) {
        let anchor = match self.modes.last() {
            Some(Mode::Heredoc { anchor }) => anchor.clone(),
            _ => return,
        };
        let mut literal = String::new();
        let mut lit_start = self.here();
        loop {
            if literal.is_empty() {
                lit_start = self.here();
            }
            if self.at_line_start() {
                let line_end = self.src[self.pos..]
                    .find('\n')
                    .map(|i| self.pos + i)
                    .unwrap_or(self.src.len());
                let line = self.src[self.pos..line_end].trim_end_matches('\r');
                if line.trim_start() == anchor {
                    self.flush_literal(&mut literal, lit_start);
                    let start = self.here();
                    while self.pos < line_end {
                        self.bump();
                    }
                    self.push(TokenKind::CHeredoc, start);
                    self.modes.pop();
                    return;
                }
            }
            match self.peek() {
                None => {
                    self.flush_literal(&mut literal, lit_start);
                    self.error(
                        "Unterminated template string",
                        lit_start,
                        &format!("No closing marker {:?} was found for the heredoc.", anchor),
                    );
                    self.modes.pop();
                    return;
                }
                Some(c) => {
                    if (c == '$' || c == '%') && self.peek_at(1) == Some('{') {
                        if self.try_template_sequence(&mut literal, lit_start) {
                            return;
                        }
                        continue;
                    }
                    if (c == '$' || c == '%') && self.peek_at(1) == Some(c) && self.peek_at(2) == Some('{') {
                        self.try_template_sequence(&mut literal, lit_start);
                        continue;
                    }
                    literal.push(c);
                    self.bump();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let (tokens, diags) = Lexer::new(src, "t.tf").tokenize();
        assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_attribute_tokens() {
        assert_eq!(
            kinds("a = var.b\n"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Equal,
                TokenKind::Ident("var".into()),
                TokenKind::Dot,
                TokenKind::Ident("b".into()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            kinds("# one\n// two\n/* three */ x"),
            vec![
                TokenKind::Newline,
                TokenKind::Newline,
                TokenKind::Ident("x".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_template_with_interpolation() {
        assert_eq!(
            kinds("\"a-${var.x}-b\""),
            vec![
                TokenKind::OQuote,
                TokenKind::TemplateLiteral("a-".into()),
                TokenKind::TemplateInterp,
                TokenKind::Ident("var".into()),
                TokenKind::Dot,
                TokenKind::Ident("x".into()),
                TokenKind::TemplateSeqEnd,
                TokenKind::TemplateLiteral("-b".into()),
                TokenKind::CQuote,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_escaped_interpolation_is_literal() {
        assert_eq!(
            kinds("\"$${x}\""),
            vec![
                TokenKind::OQuote,
                TokenKind::TemplateLiteral("${x}".into()),
                TokenKind::CQuote,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_object_braces_inside_interpolation() {
        let k = kinds("\"${ {a = 1}.a }\"");
        assert!(k.contains(&TokenKind::LBrace));
        assert!(k.contains(&TokenKind::RBrace));
        assert_eq!(k.iter().filter(|t| **t == TokenKind::TemplateSeqEnd).count(), 1);
    }

    #[test]
    fn test_heredoc() {
        let k = kinds("x = <<EOT\nhello ${name}\nEOT\n");
        assert_eq!(k[2], TokenKind::OHeredoc);
        assert!(k.contains(&TokenKind::CHeredoc));
        assert!(k.contains(&TokenKind::Ident("name".into())));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("1.5e3 a.0"),
            vec![
                TokenKind::Number("1.5e3".into()),
                TokenKind::Ident("a".into()),
                TokenKind::Dot,
                TokenKind::Number("0".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_string_reports_diagnostic() {
        let (_, diags) = Lexer::new("a = \"oops\nb = 1", "t.tf").tokenize();
        assert!(diags.has_errors());
    }

    #[test]
    fn test_positions() {
        let (tokens, _) = Lexer::new("a\n  bb", "t.tf").tokenize();
        let bb = &tokens[2];
        assert_eq!(bb.range.start.line, 2);
        assert_eq!(bb.range.start.column, 3);
        assert_eq!(bb.range.end.column, 5);
    }
}

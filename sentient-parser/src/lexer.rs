/// Single-pass O(n) lexer for Sentient source code.
use crate::ast::Span;
use crate::error::ParseError;
use crate::token::{Token, TokenKind};

pub struct Lexer<'a> {
    source: &'a [u8],
    pos: usize,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
        let mut lexer = Lexer {
            source: source.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
        };
        let mut tokens = Vec::new();
        loop {
            let tok = lexer.next_token()?;
            let is_eof = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn advance(&mut self) -> u8 {
        let ch = self.source[self.pos];
        self.pos += 1;
        if ch == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        ch
    }

    fn span(&self) -> Span {
        Span {
            line: self.line,
            col: self.col,
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n') => {
                    self.advance();
                }
                Some(b'#') => {
                    while let Some(ch) = self.peek() {
                        if ch == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn token(&self, kind: TokenKind, span: Span, lexeme: impl Into<String>) -> Token {
        Token {
            kind,
            span,
            lexeme: lexeme.into(),
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_whitespace_and_comments();

        let sp = self.span();
        let Some(ch) = self.peek() else {
            return Ok(self.token(TokenKind::Eof, sp, ""));
        };

        if ch.is_ascii_digit() {
            return self.lex_number(sp);
        }

        if ch.is_ascii_alphabetic() || ch == b'_' {
            return Ok(self.lex_ident(sp));
        }

        // One- and two-character operators. A trailing `=` turns the
        // arithmetic operators into compound assignments.
        let tok = match ch {
            b'+' => self.with_eq(sp, TokenKind::Plus, TokenKind::PlusAssign, "+"),
            b'-' => self.with_eq(sp, TokenKind::Minus, TokenKind::MinusAssign, "-"),
            b'*' => self.with_eq(sp, TokenKind::Star, TokenKind::StarAssign, "*"),
            b'/' => self.with_eq(sp, TokenKind::Slash, TokenKind::SlashAssign, "/"),
            b'%' => self.with_eq(sp, TokenKind::Percent, TokenKind::PercentAssign, "%"),
            b'=' => self.with_eq(sp, TokenKind::Assign, TokenKind::Eq, "="),
            b'!' => self.with_eq(sp, TokenKind::Not, TokenKind::Neq, "!"),
            b'<' => self.with_eq(sp, TokenKind::Lt, TokenKind::Le, "<"),
            b'>' => self.with_eq(sp, TokenKind::Gt, TokenKind::Ge, ">"),
            b'&' => {
                self.advance();
                if self.peek() == Some(b'&') {
                    self.advance();
                    self.token(TokenKind::And, sp, "&&")
                } else {
                    return Err(ParseError::new(
                        "unexpected token `&`",
                        sp.line,
                        sp.col,
                    ));
                }
            }
            b'|' => {
                self.advance();
                if self.peek() == Some(b'|') {
                    self.advance();
                    self.token(TokenKind::Or, sp, "||")
                } else {
                    return Err(ParseError::new(
                        "unexpected token `|`",
                        sp.line,
                        sp.col,
                    ));
                }
            }
            b'?' => self.single(sp, TokenKind::Question, "?"),
            b'^' => self.single(sp, TokenKind::Caret, "^"),
            b'(' => self.single(sp, TokenKind::LParen, "("),
            b')' => self.single(sp, TokenKind::RParen, ")"),
            b'[' => self.single(sp, TokenKind::LBracket, "["),
            b']' => self.single(sp, TokenKind::RBracket, "]"),
            b'{' => self.single(sp, TokenKind::LBrace, "{"),
            b'}' => self.single(sp, TokenKind::RBrace, "}"),
            b',' => self.single(sp, TokenKind::Comma, ","),
            b':' => self.single(sp, TokenKind::Colon, ":"),
            b';' => self.single(sp, TokenKind::Semicolon, ";"),
            b'.' => self.single(sp, TokenKind::Dot, "."),
            other => {
                return Err(ParseError::new(
                    format!("unexpected token `{}`", other as char),
                    sp.line,
                    sp.col,
                ));
            }
        };
        Ok(tok)
    }

    fn single(&mut self, sp: Span, kind: TokenKind, lexeme: &str) -> Token {
        self.advance();
        self.token(kind, sp, lexeme)
    }

    fn with_eq(&mut self, sp: Span, bare: TokenKind, with: TokenKind, lexeme: &str) -> Token {
        self.advance();
        if self.peek() == Some(b'=') {
            self.advance();
            self.token(with, sp, format!("{lexeme}="))
        } else {
            self.token(bare, sp, lexeme)
        }
    }

    fn lex_number(&mut self, sp: Span) -> Result<Token, ParseError> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if !ch.is_ascii_digit() {
                break;
            }
            self.advance();
        }
        let text = std::str::from_utf8(&self.source[start..self.pos])
            .map_err(|_| ParseError::new("invalid number", sp.line, sp.col))?;
        // range-checked later; the token keeps the raw digits
        Ok(self.token(TokenKind::Integer, sp, text))
    }

    /// Identifiers may end in a single `?`, Sentient's predicate
    /// convention (`uniq?`).
    fn lex_ident(&mut self, sp: Span) -> Token {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if !(ch.is_ascii_alphanumeric() || ch == b'_') {
                break;
            }
            self.advance();
        }
        if self.peek() == Some(b'?') {
            self.advance();
        }
        let text = String::from_utf8_lossy(&self.source[start..self.pos]).into_owned();
        let kind = match text.as_str() {
            "invariant" => TokenKind::Invariant,
            "vary" => TokenKind::Vary,
            "function" => TokenKind::Function,
            "return" => TokenKind::Return,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            _ => TokenKind::Ident,
        };
        self.token(kind, sp, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_a_declaration() {
        assert_eq!(
            kinds("int6 a, b;"),
            vec![
                TokenKind::Ident,
                TokenKind::Ident,
                TokenKind::Comma,
                TokenKind::Ident,
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn compound_operators_are_single_tokens() {
        assert_eq!(
            kinds("a += 1 <= 2 == 3 != 4"),
            vec![
                TokenKind::Ident,
                TokenKind::PlusAssign,
                TokenKind::Integer,
                TokenKind::Le,
                TokenKind::Integer,
                TokenKind::Eq,
                TokenKind::Integer,
                TokenKind::Neq,
                TokenKind::Integer,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn predicate_idents_keep_their_question_mark() {
        let tokens = Lexer::tokenize("xs.uniq?").unwrap();
        assert_eq!(tokens[2].kind, TokenKind::Ident);
        assert_eq!(tokens[2].lexeme, "uniq?");
    }

    #[test]
    fn detached_question_mark_is_ternary() {
        assert_eq!(
            kinds("c ? 1 : 2"),
            vec![
                TokenKind::Ident,
                TokenKind::Question,
                TokenKind::Integer,
                TokenKind::Colon,
                TokenKind::Integer,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_run_to_end_of_line() {
        assert_eq!(
            kinds("a # the rest is ignored = + -\nb"),
            vec![TokenKind::Ident, TokenKind::Ident, TokenKind::Eof]
        );
    }

    #[test]
    fn unexpected_character_reports_its_location() {
        let err = Lexer::tokenize("a = 123 @").unwrap_err();
        assert_eq!(err.line, 1);
        assert_eq!(err.col, 9);
        assert!(err.to_string().contains("unexpected token `@`"));
    }
}

/// Recursive descent parser with Pratt expression parsing for Sentient.
use crate::ast::*;
use crate::error::ParseError;
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};

/// Parse a complete source string into an AST Program.
pub fn parse_program(source: &str) -> Result<Program, ParseError> {
    let tokens = Lexer::tokenize(source)?;
    let mut parser = Parser::new(tokens);
    parser.do_parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    // ========================================================================
    // Token helpers
    // ========================================================================

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn advance(&mut self) -> &Token {
        let tok = &self.tokens[self.pos];
        if tok.kind != TokenKind::Eof {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<&Token, ParseError> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            let tok = self.peek();
            Err(ParseError::new(
                format!("expected `{}`, found `{}`", kind_name(kind), tok_display(tok)),
                tok.span.line,
                tok.span.col,
            ))
        }
    }

    fn span(&self) -> Span {
        self.peek().span
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Peek at the token N positions ahead (0 = current).
    fn lookahead(&self, n: usize) -> &TokenKind {
        let idx = self.pos + n;
        if idx < self.tokens.len() {
            &self.tokens[idx].kind
        } else {
            &TokenKind::Eof
        }
    }

    // ========================================================================
    // Program
    // ========================================================================

    fn do_parse_program(&mut self) -> Result<Program, ParseError> {
        let mut stmts = Vec::new();
        while !self.at(&TokenKind::Eof) {
            stmts.push(self.parse_stmt()?);
        }
        Ok(Program { stmts })
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        match self.peek_kind() {
            TokenKind::Invariant => self.parse_invariant(),
            TokenKind::Vary => self.parse_vary(),
            TokenKind::Function => {
                let decl = self.parse_function()?;
                if decl.name.is_some() {
                    self.eat(&TokenKind::Semicolon);
                    Ok(Stmt::Function(decl))
                } else {
                    // An anonymous literal in statement position is just
                    // an expression.
                    let expr = self.continue_expr(Expr::Function(Box::new(decl)))?;
                    self.expect(&TokenKind::Semicolon)?;
                    Ok(Stmt::Expr(expr))
                }
            }
            TokenKind::Ident if self.starts_declaration() => self.parse_declaration(),
            TokenKind::Ident if self.starts_assignment() => self.parse_assignment(),
            _ => {
                let expr = self.parse_expr()?;
                self.expect(&TokenKind::Semicolon)?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    /// `int6 a, b;` style declarations begin with a type-shaped
    /// identifier followed by a name (or `<` for arrays).
    fn starts_declaration(&self) -> bool {
        let lexeme = self.peek().lexeme.as_str();
        match type_prefix(lexeme) {
            Some(TypePrefix::Array(_)) => self.lookahead(1) == &TokenKind::Lt,
            Some(_) => self.lookahead(1) == &TokenKind::Ident,
            None => false,
        }
    }

    /// `a, b = ...` begins with a comma-separated identifier list
    /// followed by an assignment operator.
    fn starts_assignment(&self) -> bool {
        let mut i = 0;
        loop {
            if self.lookahead(i) != &TokenKind::Ident {
                return false;
            }
            match self.lookahead(i + 1) {
                TokenKind::Comma => i += 2,
                TokenKind::Assign
                | TokenKind::PlusAssign
                | TokenKind::MinusAssign
                | TokenKind::StarAssign
                | TokenKind::SlashAssign
                | TokenKind::PercentAssign => return true,
                _ => return false,
            }
        }
    }

    fn parse_invariant(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        self.expect(&TokenKind::Invariant)?;
        let mut exprs = vec![self.parse_expr()?];
        while self.eat(&TokenKind::Comma) {
            exprs.push(self.parse_expr()?);
        }
        self.expect(&TokenKind::Semicolon)?;
        Ok(Stmt::Invariant { exprs, span })
    }

    fn parse_vary(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        self.expect(&TokenKind::Vary)?;
        let mut names = vec![self.parse_ident()?];
        while self.eat(&TokenKind::Comma) {
            names.push(self.parse_ident()?);
        }
        self.expect(&TokenKind::Semicolon)?;
        Ok(Stmt::Vary { names, span })
    }

    fn parse_declaration(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        let spec = self.parse_type_spec()?;
        let mut names = vec![self.parse_ident()?];
        while self.eat(&TokenKind::Comma) {
            names.push(self.parse_ident()?);
        }
        self.expect(&TokenKind::Semicolon)?;
        Ok(Stmt::Declaration { spec, names, span })
    }

    fn parse_type_spec(&mut self) -> Result<TypeSpec, ParseError> {
        let tok = self.peek().clone();
        let Some(prefix) = type_prefix(&tok.lexeme) else {
            return Err(ParseError::new(
                format!("expected type, found `{}`", tok_display(&tok)),
                tok.span.line,
                tok.span.col,
            ));
        };
        self.advance();
        match prefix {
            TypePrefix::Bool => Ok(TypeSpec::Bool),
            TypePrefix::Int(width) => {
                if width == 0 {
                    return Err(ParseError::new(
                        "integer width must be at least one bit",
                        tok.span.line,
                        tok.span.col,
                    ));
                }
                Ok(TypeSpec::Int { width })
            }
            TypePrefix::Array(length) => {
                self.expect(&TokenKind::Lt)?;
                let element = self.parse_type_spec()?;
                self.expect(&TokenKind::Gt)?;
                Ok(TypeSpec::Array {
                    length,
                    element: Box::new(element),
                })
            }
        }
    }

    fn parse_assignment(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        let mut targets = vec![self.parse_ident()?];
        while self.eat(&TokenKind::Comma) {
            targets.push(self.parse_ident()?);
        }
        let op_tok = self.advance().clone();
        let op = match op_tok.kind {
            TokenKind::Assign => AssignOp::Assign,
            TokenKind::PlusAssign => AssignOp::Add,
            TokenKind::MinusAssign => AssignOp::Sub,
            TokenKind::StarAssign => AssignOp::Mul,
            TokenKind::SlashAssign => AssignOp::Div,
            TokenKind::PercentAssign => AssignOp::Mod,
            _ => {
                return Err(ParseError::new(
                    format!("expected assignment operator, found `{}`", tok_display(&op_tok)),
                    op_tok.span.line,
                    op_tok.span.col,
                ));
            }
        };
        if op != AssignOp::Assign && targets.len() != 1 {
            return Err(ParseError::new(
                "compound assignment takes a single target",
                op_tok.span.line,
                op_tok.span.col,
            ));
        }
        let mut values = vec![self.parse_expr()?];
        while self.eat(&TokenKind::Comma) {
            values.push(self.parse_expr()?);
        }
        self.expect(&TokenKind::Semicolon)?;
        Ok(Stmt::Assignment {
            targets,
            op,
            values,
            span,
        })
    }

    fn parse_ident(&mut self) -> Result<String, ParseError> {
        let tok = self.peek().clone();
        if tok.kind == TokenKind::Ident {
            self.advance();
            Ok(tok.lexeme)
        } else {
            Err(ParseError::new(
                format!("expected identifier, found `{}`", tok_display(&tok)),
                tok.span.line,
                tok.span.col,
            ))
        }
    }

    // ========================================================================
    // Functions
    // ========================================================================

    fn parse_function(&mut self) -> Result<FunctionDecl, ParseError> {
        let span = self.span();
        self.expect(&TokenKind::Function)?;
        let dynamic = self.eat(&TokenKind::Caret);
        let name = if self.at(&TokenKind::Ident) {
            Some(self.parse_ident()?)
        } else {
            None
        };
        self.expect(&TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.at(&TokenKind::RParen) {
            args.push(self.parse_ident()?);
            while self.eat(&TokenKind::Comma) {
                args.push(self.parse_ident()?);
            }
        }
        self.expect(&TokenKind::RParen)?;
        self.expect(&TokenKind::LBrace)?;
        let mut body = Vec::new();
        let mut returns = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            if self.at(&TokenKind::Return) {
                self.advance();
                if !self.at(&TokenKind::Semicolon) {
                    returns.push(self.parse_expr()?);
                    while self.eat(&TokenKind::Comma) {
                        returns.push(self.parse_expr()?);
                    }
                }
                self.expect(&TokenKind::Semicolon)?;
                break;
            }
            body.push(self.parse_stmt()?);
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(FunctionDecl {
            name,
            args,
            dynamic,
            body,
            returns,
            span,
        })
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let cond = self.parse_expr_bp(0)?;
        self.parse_ternary_tail(cond)
    }

    /// Resume expression parsing with an already-built prefix, used
    /// when statement dispatch has consumed a function literal.
    fn continue_expr(&mut self, lhs: Expr) -> Result<Expr, ParseError> {
        let lhs = self.parse_postfix_and_infix(lhs, 0)?;
        self.parse_ternary_tail(lhs)
    }

    fn parse_ternary_tail(&mut self, cond: Expr) -> Result<Expr, ParseError> {
        if self.eat(&TokenKind::Question) {
            let then = self.parse_expr()?;
            self.expect(&TokenKind::Colon)?;
            let els = self.parse_expr()?;
            let span = cond.span();
            Ok(Expr::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                els: Box::new(els),
                span,
            })
        } else {
            Ok(cond)
        }
    }

    fn parse_expr_bp(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let lhs = self.parse_prefix()?;
        self.parse_postfix_and_infix(lhs, min_bp)
    }

    fn parse_postfix_and_infix(&mut self, mut lhs: Expr, min_bp: u8) -> Result<Expr, ParseError> {
        loop {
            // Postfix: call, index, dot
            match self.peek_kind() {
                TokenKind::LParen => {
                    lhs = self.parse_call(lhs)?;
                    continue;
                }
                TokenKind::LBracket => {
                    lhs = self.parse_index(lhs)?;
                    continue;
                }
                TokenKind::Dot => {
                    lhs = self.parse_dot(lhs)?;
                    continue;
                }
                _ => {}
            }

            // Infix binary operators
            if let Some((l_bp, r_bp)) = infix_bp(self.peek_kind()) {
                if l_bp < min_bp {
                    break;
                }
                let op_tok = self.advance().clone();
                let was_cmp = is_comparison(&op_tok.kind);
                let op = token_to_binop(&op_tok.kind);
                let rhs = self.parse_expr_bp(r_bp)?;
                let span = lhs.span();
                lhs = Expr::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                    span,
                };
                // Reject chained comparisons: `a < b < c` is a silent bug
                if was_cmp && is_comparison(self.peek_kind()) {
                    let next = self.peek();
                    return Err(ParseError::new(
                        "comparison operators cannot be chained; use `&&` to combine: `a < b && b < c`",
                        next.span.line,
                        next.span.col,
                    ));
                }
                continue;
            }

            break;
        }

        Ok(lhs)
    }

    fn parse_prefix(&mut self) -> Result<Expr, ParseError> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Integer => {
                self.advance();
                let value: i64 = tok.lexeme.parse().map_err(|_| {
                    ParseError::new(
                        format!("integer literal `{}` is out of range", tok.lexeme),
                        tok.span.line,
                        tok.span.col,
                    )
                })?;
                Ok(Expr::Integer {
                    value,
                    span: tok.span,
                })
            }
            TokenKind::True | TokenKind::False => {
                self.advance();
                Ok(Expr::Boolean {
                    value: tok.kind == TokenKind::True,
                    span: tok.span,
                })
            }
            TokenKind::Ident => {
                self.advance();
                Ok(Expr::Ident {
                    name: tok.lexeme,
                    span: tok.span,
                })
            }
            TokenKind::Minus => {
                self.advance();
                let operand = self.parse_expr_bp(13)?; // prefix BP
                Ok(Expr::Unary {
                    op: UnOp::Neg,
                    operand: Box::new(operand),
                    span: tok.span,
                })
            }
            TokenKind::Not => {
                self.advance();
                let operand = self.parse_expr_bp(13)?;
                Ok(Expr::Unary {
                    op: UnOp::Not,
                    operand: Box::new(operand),
                    span: tok.span,
                })
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                if !self.at(&TokenKind::RBracket) {
                    elements.push(self.parse_expr()?);
                    while self.eat(&TokenKind::Comma) {
                        elements.push(self.parse_expr()?);
                    }
                }
                self.expect(&TokenKind::RBracket)?;
                Ok(Expr::Array {
                    elements,
                    span: tok.span,
                })
            }
            TokenKind::Function => {
                let decl = self.parse_function()?;
                Ok(Expr::Function(Box::new(decl)))
            }
            _ => Err(ParseError::new(
                format!("expected expression, found `{}`", tok_display(&tok)),
                tok.span.line,
                tok.span.col,
            )),
        }
    }

    fn parse_call(&mut self, callee: Expr) -> Result<Expr, ParseError> {
        let Expr::Ident { name, span } = callee else {
            let sp = callee.span();
            return Err(ParseError::new(
                "only named functions can be called directly",
                sp.line,
                sp.col,
            ));
        };
        self.expect(&TokenKind::LParen)?;
        let args = self.parse_args()?;
        Ok(Expr::Call { name, args, span })
    }

    fn parse_index(&mut self, object: Expr) -> Result<Expr, ParseError> {
        let span = object.span();
        self.expect(&TokenKind::LBracket)?;
        let index = self.parse_expr()?;
        self.expect(&TokenKind::RBracket)?;
        Ok(Expr::Index {
            object: Box::new(object),
            index: Box::new(index),
            span,
        })
    }

    /// `receiver.name(args)`; parentheses are optional when there are
    /// no arguments, so `xs.uniq?` works.
    fn parse_dot(&mut self, receiver: Expr) -> Result<Expr, ParseError> {
        let span = receiver.span();
        self.expect(&TokenKind::Dot)?;
        let name = self.parse_ident()?;
        let args = if self.at(&TokenKind::LParen) {
            self.advance();
            self.parse_args()?
        } else {
            Vec::new()
        };
        Ok(Expr::Method {
            receiver: Box::new(receiver),
            name,
            args,
            span,
        })
    }

    /// Comma-separated arguments up to the closing paren. The opening
    /// paren has already been consumed.
    fn parse_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if !self.at(&TokenKind::RParen) {
            args.push(self.parse_expr()?);
            while self.eat(&TokenKind::Comma) {
                args.push(self.parse_expr()?);
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(args)
    }
}

// ============================================================================
// Tables
// ============================================================================

enum TypePrefix {
    Bool,
    Int(u32),
    Array(usize),
}

/// Recognize the type-shaped identifiers: `bool`, `int`, `int6`,
/// `array4`. A bare `int` defaults to eight bits.
fn type_prefix(lexeme: &str) -> Option<TypePrefix> {
    if lexeme == "bool" {
        return Some(TypePrefix::Bool);
    }
    if let Some(rest) = lexeme.strip_prefix("int") {
        if rest.is_empty() {
            return Some(TypePrefix::Int(8));
        }
        if let Ok(width) = rest.parse::<u32>() {
            return Some(TypePrefix::Int(width));
        }
    }
    if let Some(rest) = lexeme.strip_prefix("array") {
        if !rest.is_empty() {
            if let Ok(length) = rest.parse::<usize>() {
                return Some(TypePrefix::Array(length));
            }
        }
    }
    None
}

fn is_comparison(kind: &TokenKind) -> bool {
    matches!(kind, TokenKind::Lt | TokenKind::Le | TokenKind::Gt | TokenKind::Ge)
}

fn infix_bp(kind: &TokenKind) -> Option<(u8, u8)> {
    match kind {
        TokenKind::Or => Some((1, 2)),
        TokenKind::And => Some((3, 4)),
        TokenKind::Eq | TokenKind::Neq => Some((5, 6)),
        TokenKind::Lt | TokenKind::Le | TokenKind::Gt | TokenKind::Ge => Some((7, 8)),
        TokenKind::Plus | TokenKind::Minus => Some((9, 10)),
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Some((11, 12)),
        _ => None,
    }
}

fn token_to_binop(kind: &TokenKind) -> BinOp {
    match kind {
        TokenKind::Plus => BinOp::Add,
        TokenKind::Minus => BinOp::Sub,
        TokenKind::Star => BinOp::Mul,
        TokenKind::Slash => BinOp::Div,
        TokenKind::Percent => BinOp::Mod,
        TokenKind::Lt => BinOp::Lt,
        TokenKind::Le => BinOp::Le,
        TokenKind::Gt => BinOp::Gt,
        TokenKind::Ge => BinOp::Ge,
        TokenKind::Eq => BinOp::Eq,
        TokenKind::Neq => BinOp::Neq,
        TokenKind::And => BinOp::And,
        TokenKind::Or => BinOp::Or,
        _ => unreachable!("not an infix operator"),
    }
}

fn kind_name(kind: &TokenKind) -> &'static str {
    match kind {
        TokenKind::Integer => "integer",
        TokenKind::Invariant => "invariant",
        TokenKind::Vary => "vary",
        TokenKind::Function => "function",
        TokenKind::Return => "return",
        TokenKind::True => "true",
        TokenKind::False => "false",
        TokenKind::Ident => "identifier",
        TokenKind::Plus => "+",
        TokenKind::PlusAssign => "+=",
        TokenKind::Minus => "-",
        TokenKind::MinusAssign => "-=",
        TokenKind::Star => "*",
        TokenKind::StarAssign => "*=",
        TokenKind::Slash => "/",
        TokenKind::SlashAssign => "/=",
        TokenKind::Percent => "%",
        TokenKind::PercentAssign => "%=",
        TokenKind::Eq => "==",
        TokenKind::Neq => "!=",
        TokenKind::Lt => "<",
        TokenKind::Le => "<=",
        TokenKind::Gt => ">",
        TokenKind::Ge => ">=",
        TokenKind::And => "&&",
        TokenKind::Or => "||",
        TokenKind::Not => "!",
        TokenKind::Assign => "=",
        TokenKind::Question => "?",
        TokenKind::Caret => "^",
        TokenKind::LParen => "(",
        TokenKind::RParen => ")",
        TokenKind::LBracket => "[",
        TokenKind::RBracket => "]",
        TokenKind::LBrace => "{",
        TokenKind::RBrace => "}",
        TokenKind::Comma => ",",
        TokenKind::Colon => ":",
        TokenKind::Semicolon => ";",
        TokenKind::Dot => ".",
        TokenKind::Eof => "end of input",
    }
}

fn tok_display(tok: &Token) -> String {
    if tok.lexeme.is_empty() {
        kind_name(&tok.kind).to_string()
    } else {
        tok.lexeme.clone()
    }
}

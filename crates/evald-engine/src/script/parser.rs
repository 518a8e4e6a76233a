//! Recursive-descent parser for the script language.

use std::sync::Arc;

use super::ast::{BinOp, Expr, FnDef, Stmt, StmtKind, UnaryOp};
use super::lexer::{Spanned, Token, tokenize};
use crate::EvalFault;

/// Deepest nesting of parentheses, unary operators, and blocks in one snippet.
pub const MAX_NESTING: usize = 128;

/// Parse a whole snippet into statements.
pub fn parse(input: &str) -> Result<Vec<Stmt>, EvalFault> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let program = parser.block_body(false)?;
    Ok(program)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|s| &s.token)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|s| s.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> EvalFault {
        EvalFault::Parse {
            line: self.line(),
            message: message.into(),
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), EvalFault> {
        match self.peek() {
            Some(t) if *t == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(t) => Err(self.error(format!("expected {what}, found {}", describe(t)))),
            None => Err(self.error(format!("expected {what}, found end of input"))),
        }
    }

    fn deeper(&mut self) -> Result<(), EvalFault> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(format!("nesting deeper than {MAX_NESTING} levels")));
        }
        self.depth += 1;
        Ok(())
    }

    /// Run `f` one nesting level deeper, failing past [`MAX_NESTING`].
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, EvalFault>) -> Result<T, EvalFault> {
        let base = self.depth;
        self.deeper()?;
        let result = f(self);
        self.depth = base;
        result
    }

    fn skip_separators(&mut self) {
        while self.peek() == Some(&Token::Sep) {
            self.pos += 1;
        }
    }

    fn ident(&mut self, what: &str) -> Result<String, EvalFault> {
        match self.advance() {
            Some(Token::Ident(name)) => Ok(name),
            Some(other) => {
                self.pos -= 1;
                Err(self.error(format!("expected {what}, found {}", describe(&other))))
            }
            None => Err(self.error(format!("expected {what}, found end of input"))),
        }
    }

    /// Statements up to end of input, or up to the closing `}` when `braced`.
    fn block_body(&mut self, braced: bool) -> Result<Vec<Stmt>, EvalFault> {
        let mut stmts = Vec::new();
        loop {
            self.skip_separators();
            match self.peek() {
                None if braced => return Err(self.error("expected `}`, found end of input")),
                None => return Ok(stmts),
                Some(Token::RBrace) if braced => {
                    self.pos += 1;
                    return Ok(stmts);
                }
                _ => {}
            }
            stmts.push(self.statement()?);
            match self.peek() {
                None | Some(Token::Sep) => {}
                Some(Token::RBrace) if braced => {}
                Some(t) => {
                    return Err(self.error(format!("expected end of statement, found {}", describe(t))));
                }
            }
        }
    }

    fn block(&mut self) -> Result<Vec<Stmt>, EvalFault> {
        self.expect(Token::LBrace, "`{`")?;
        self.nested(|p| p.block_body(true))
    }

    fn statement(&mut self) -> Result<Stmt, EvalFault> {
        let line = self.line();
        let kind = match self.peek() {
            Some(Token::Let) => {
                self.pos += 1;
                let name = self.ident("variable name")?;
                self.expect(Token::Assign, "`=`")?;
                StmtKind::Let(name, self.expression()?)
            }
            Some(Token::Fn) => {
                self.pos += 1;
                let name = self.ident("function name")?;
                self.expect(Token::LParen, "`(`")?;
                let mut params = Vec::new();
                if self.peek() != Some(&Token::RParen) {
                    loop {
                        params.push(self.ident("parameter name")?);
                        if self.peek() == Some(&Token::Comma) {
                            self.pos += 1;
                        } else {
                            break;
                        }
                    }
                }
                self.expect(Token::RParen, "`)`")?;
                let body = self.block()?;
                StmtKind::Fn(Arc::new(FnDef { name, params, body }))
            }
            Some(Token::If) => self.if_statement()?,
            Some(Token::While) => {
                self.pos += 1;
                let cond = self.expression()?;
                let body = self.block()?;
                StmtKind::While { cond, body }
            }
            Some(Token::Return) => {
                self.pos += 1;
                match self.peek() {
                    None | Some(Token::Sep) | Some(Token::RBrace) => StmtKind::Return(None),
                    _ => StmtKind::Return(Some(self.expression()?)),
                }
            }
            Some(Token::Ident(_)) if self.peek_at(1) == Some(&Token::Assign) => {
                let name = self.ident("variable name")?;
                self.pos += 1;
                StmtKind::Assign(name, self.expression()?)
            }
            _ => StmtKind::Expr(self.expression()?),
        };
        Ok(Stmt { kind, line })
    }

    fn if_statement(&mut self) -> Result<StmtKind, EvalFault> {
        self.expect(Token::If, "`if`")?;
        let cond = self.expression()?;
        let then = self.block()?;
        let otherwise = if self.peek() == Some(&Token::Else) {
            self.pos += 1;
            if self.peek() == Some(&Token::If) {
                let line = self.line();
                let nested = self.nested(|p| p.if_statement())?;
                Some(vec![Stmt { kind: nested, line }])
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };
        Ok(StmtKind::If { cond, then, otherwise })
    }

    fn expression(&mut self) -> Result<Expr, EvalFault> {
        self.nested(|p| p.binary(0))
    }

    /// Precedence climbing over the binary operator table.
    ///
    /// Each folded operator nests the tree one level, so long chains count
    /// against [`MAX_NESTING`] too.
    fn binary(&mut self, min_prec: u8) -> Result<Expr, EvalFault> {
        let base = self.depth;
        let result = self.binary_chain(min_prec);
        self.depth = base;
        result
    }

    fn binary_chain(&mut self, min_prec: u8) -> Result<Expr, EvalFault> {
        let mut lhs = self.unary()?;
        while let Some((op, prec)) = self.peek().and_then(binary_op) {
            if prec < min_prec {
                break;
            }
            self.deeper()?;
            self.pos += 1;
            let rhs = self.binary(prec + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, EvalFault> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.nested(|p| p.unary())?)))
            }
            Some(Token::Bang) => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.nested(|p| p.unary())?)))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, EvalFault> {
        let Some(token) = self.advance() else {
            return Err(self.error("expected expression, found end of input"));
        };
        match token {
            Token::Int(n) => Ok(Expr::Int(n)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),
            Token::Nil => Ok(Expr::Nil),
            Token::LParen => {
                let inner = self.expression()?;
                self.expect(Token::RParen, "`)`")?;
                Ok(inner)
            }
            Token::Ident(name) => {
                if self.peek() != Some(&Token::LParen) {
                    return Ok(Expr::Var(name));
                }
                self.pos += 1;
                let mut args = Vec::new();
                if self.peek() != Some(&Token::RParen) {
                    loop {
                        args.push(self.expression()?);
                        if self.peek() == Some(&Token::Comma) {
                            self.pos += 1;
                        } else {
                            break;
                        }
                    }
                }
                self.expect(Token::RParen, "`)`")?;
                Ok(Expr::Call(name, args))
            }
            other => {
                self.pos -= 1;
                Err(self.error(format!("expected expression, found {}", describe(&other))))
            }
        }
    }
}

fn binary_op(token: &Token) -> Option<(BinOp, u8)> {
    let op = match token {
        Token::Or => (BinOp::Or, 1),
        Token::And => (BinOp::And, 2),
        Token::Eq => (BinOp::Eq, 3),
        Token::Ne => (BinOp::Ne, 3),
        Token::Lt => (BinOp::Lt, 4),
        Token::Le => (BinOp::Le, 4),
        Token::Gt => (BinOp::Gt, 4),
        Token::Ge => (BinOp::Ge, 4),
        Token::Plus => (BinOp::Add, 5),
        Token::Minus => (BinOp::Sub, 5),
        Token::Star => (BinOp::Mul, 6),
        Token::Slash => (BinOp::Div, 6),
        Token::Percent => (BinOp::Rem, 6),
        _ => return None,
    };
    Some(op)
}

fn describe(token: &Token) -> String {
    match token {
        Token::Int(n) => format!("`{n}`"),
        Token::Str(_) => "string literal".into(),
        Token::Ident(name) => format!("`{name}`"),
        Token::Sep => "end of line".into(),
        other => format!("{other:?}").to_lowercase(),
    }
}

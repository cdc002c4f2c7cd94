//! Recursive-descent parser: token stream to syntax tree.
//!
//! Blocks open with `:` and contain either a single statement on the same
//! line or an indented statement list; an optional `end` keyword may close
//! any compound statement. Expression parsing is precedence-layered,
//! loosest to tightest: `or`, `and`, `not`, comparisons, additive,
//! multiplicative, unary `minus`, postfix `at`, primaries.

use crate::ast::{BinOp, CatchClause, Expr, Stmt, UnOp};
use crate::error::{Error, Result};
use crate::lexer::{Token, TokenKind};

/// Parse a token stream into a statement list.
pub fn parse(tokens: Vec<Token>) -> Result<Vec<Stmt>> {
    Parser::new(tokens).parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Nesting depth of function bodies, for rejecting top-level `return`.
    fn_depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            fn_depth: 0,
        }
    }

    fn parse_program(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::Eof) {
            stmts.push(self.parse_statement()?);
        }
        Ok(stmts)
    }

    // -----------------------------------------------------------------------
    // Token cursor
    // -----------------------------------------------------------------------

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn line(&self) -> u32 {
        self.tokens[self.pos].line
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.tokens[self.pos].kind.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<()> {
        if self.check(&kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&kind.describe()))
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("a name")),
        }
    }

    fn unexpected(&self, wanted: &str) -> Error {
        Error::parse(format!(
            "line {}: expected {}, found {}",
            self.line(),
            wanted,
            self.peek().describe()
        ))
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn parse_statement(&mut self) -> Result<Stmt> {
        match self.peek() {
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Function => self.parse_function(),
            TokenKind::Try => self.parse_try(),
            _ => {
                let stmt = self.parse_simple_statement()?;
                self.expect(TokenKind::Newline)?;
                Ok(stmt)
            }
        }
    }

    /// A statement that fits on one line (no block of its own).
    fn parse_simple_statement(&mut self) -> Result<Stmt> {
        match self.peek() {
            TokenKind::Set => self.parse_bind(true),
            TokenKind::Let => self.parse_bind(false),
            TokenKind::Print => {
                self.advance();
                Ok(Stmt::Print(self.parse_expr()?))
            }
            TokenKind::Return => {
                if self.fn_depth == 0 {
                    return Err(Error::parse(format!(
                        "line {}: 'return' outside of a function",
                        self.line()
                    )));
                }
                self.advance();
                if self.check(&TokenKind::Newline) {
                    Ok(Stmt::Return(None))
                } else {
                    Ok(Stmt::Return(Some(self.parse_expr()?)))
                }
            }
            TokenKind::Throw => {
                self.advance();
                let message = self.parse_expr()?;
                let type_name = if self.eat(&TokenKind::As) {
                    Some(self.expect_ident()?)
                } else {
                    None
                };
                Ok(Stmt::Throw { message, type_name })
            }
            TokenKind::Import => {
                self.advance();
                let path = match self.peek().clone() {
                    TokenKind::Str(path) => {
                        self.advance();
                        path
                    }
                    _ => return Err(self.unexpected("a quoted module path")),
                };
                self.expect(TokenKind::As)?;
                let alias = self.expect_ident()?;
                Ok(Stmt::Import { path, alias })
            }
            TokenKind::Delete => {
                self.advance();
                match self.parse_postfix()? {
                    Expr::Index { target, index } => Ok(Stmt::Delete {
                        target: *target,
                        index: *index,
                    }),
                    _ => Err(Error::parse(format!(
                        "line {}: 'delete' expects 'target at key'",
                        self.line()
                    ))),
                }
            }
            _ => Ok(Stmt::Expr(self.parse_expr()?)),
        }
    }

    /// `set`/`let` handle both plain bindings and element assignment.
    fn parse_bind(&mut self, mutable: bool) -> Result<Stmt> {
        let line = self.line();
        self.advance();
        let target = self.parse_postfix()?;
        self.expect(TokenKind::To)?;
        let value = self.parse_expr()?;
        match target {
            Expr::Var(name) => {
                let type_tag = if self.eat(&TokenKind::As) {
                    Some(self.parse_type_name()?)
                } else {
                    None
                };
                Ok(Stmt::Bind {
                    name,
                    value,
                    mutable,
                    type_tag,
                })
            }
            Expr::Index { target, index } if mutable => Ok(Stmt::SetIndex {
                target: *target,
                index: *index,
                value,
            }),
            _ => Err(Error::parse(format!(
                "line {}: invalid assignment target",
                line
            ))),
        }
    }

    /// Type tags reuse the container keywords, so `as list` works alongside
    /// `as number` and `as "number"`.
    fn parse_type_name(&mut self) -> Result<String> {
        let name = match self.peek().clone() {
            TokenKind::Ident(name) => name,
            TokenKind::Str(name) => name,
            TokenKind::List => "list".to_string(),
            TokenKind::Map => "map".to_string(),
            TokenKind::Range => "range".to_string(),
            TokenKind::Nil => "null".to_string(),
            _ => return Err(self.unexpected("a type name")),
        };
        self.advance();
        Ok(name)
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        self.advance();
        let cond = self.parse_expr()?;
        let then_body = self.parse_block()?;
        let else_body = if self.eat(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                // `else if …` chains as a nested if in the else body.
                Some(vec![self.parse_if()?])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        self.eat_end();
        Ok(Stmt::If {
            cond,
            then_body,
            else_body,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt> {
        self.advance();
        let cond = self.parse_expr()?;
        let body = self.parse_block()?;
        self.eat_end();
        Ok(Stmt::While { cond, body })
    }

    fn parse_for(&mut self) -> Result<Stmt> {
        self.advance();
        let var = self.expect_ident()?;
        self.expect(TokenKind::In)?;
        let iterable = self.parse_expr()?;
        let body = self.parse_block()?;
        self.eat_end();
        Ok(Stmt::For {
            var,
            iterable,
            body,
        })
    }

    fn parse_function(&mut self) -> Result<Stmt> {
        self.advance();
        let name = self.expect_ident()?;
        let mut params = Vec::new();
        if self.eat(&TokenKind::With) {
            params.push(self.expect_ident()?);
            while self.eat(&TokenKind::Comma) {
                params.push(self.expect_ident()?);
            }
        }
        self.fn_depth += 1;
        let body = self.parse_block();
        self.fn_depth -= 1;
        self.eat_end();
        Ok(Stmt::Function {
            name,
            params,
            body: body?,
        })
    }

    fn parse_try(&mut self) -> Result<Stmt> {
        self.advance();
        let body = self.parse_block()?;

        let mut catches = Vec::new();
        while self.eat(&TokenKind::Catch) {
            let type_name = match self.peek().clone() {
                TokenKind::Ident(name) => {
                    self.advance();
                    Some(name)
                }
                _ => None,
            };
            let var = if self.eat(&TokenKind::As) {
                Some(self.expect_ident()?)
            } else {
                None
            };
            let body = self.parse_block()?;
            catches.push(CatchClause {
                type_name,
                var,
                body,
            });
        }

        let finally = if self.eat(&TokenKind::Finally) {
            Some(self.parse_block()?)
        } else {
            None
        };

        if catches.is_empty() && finally.is_none() {
            return Err(Error::parse(format!(
                "line {}: 'try' needs at least one 'catch' or a 'finally'",
                self.line()
            )));
        }

        self.eat_end();
        Ok(Stmt::Try {
            body,
            catches,
            finally,
        })
    }

    /// `: <stmt>` on one line, or `:` newline indent … dedent.
    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(TokenKind::Colon)?;
        if self.eat(&TokenKind::Newline) {
            self.expect(TokenKind::Indent)?;
            let mut stmts = Vec::new();
            while !self.check(&TokenKind::Dedent) {
                stmts.push(self.parse_statement()?);
            }
            self.advance(); // Dedent
            Ok(stmts)
        } else {
            let stmt = self.parse_simple_statement()?;
            self.expect(TokenKind::Newline)?;
            Ok(vec![stmt])
        }
    }

    /// Consume an optional `end` terminator after a compound statement.
    fn eat_end(&mut self) {
        if self.eat(&TokenKind::End) {
            self.eat(&TokenKind::Newline);
        }
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat(&TokenKind::Or) {
            let right = self.parse_and()?;
            left = Expr::Binary {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while self.eat(&TokenKind::And) {
            let right = self.parse_not()?;
            left = Expr::Binary {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.eat(&TokenKind::Not) {
            let operand = self.parse_not()?;
            Ok(Expr::Unary {
                op: UnOp::Not,
                operand: Box::new(operand),
            })
        } else {
            self.parse_comparison()
        }
    }

    /// Comparisons are the verbose `is …` forms and do not chain.
    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_additive()?;
        if !self.check(&TokenKind::Is) {
            return Ok(left);
        }
        self.advance();

        // `is of type "name"`
        if self.eat(&TokenKind::Of) {
            self.expect(TokenKind::Type)?;
            let type_name = match self.peek().clone() {
                TokenKind::Str(name) => {
                    self.advance();
                    name
                }
                _ => self.parse_type_name()?,
            };
            return Ok(Expr::IsType {
                value: Box::new(left),
                type_name,
            });
        }

        let op = match self.advance() {
            TokenKind::Greater => {
                if self.eat(&TokenKind::Or) {
                    self.expect(TokenKind::Equal)?;
                    self.expect(TokenKind::To)?;
                    BinOp::Gte
                } else {
                    self.expect(TokenKind::Than)?;
                    BinOp::Gt
                }
            }
            TokenKind::Less => {
                if self.eat(&TokenKind::Or) {
                    self.expect(TokenKind::Equal)?;
                    self.expect(TokenKind::To)?;
                    BinOp::Lte
                } else {
                    self.expect(TokenKind::Than)?;
                    BinOp::Lt
                }
            }
            TokenKind::Equal => {
                self.expect(TokenKind::To)?;
                BinOp::Eq
            }
            TokenKind::Not => {
                self.expect(TokenKind::Equal)?;
                self.expect(TokenKind::To)?;
                BinOp::Neq
            }
            _ => return Err(self.unexpected("a comparison after 'is'")),
        };
        let right = self.parse_additive()?;
        Ok(Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.eat(&TokenKind::Plus) {
                BinOp::Add
            } else if self.eat(&TokenKind::Minus) {
                BinOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.parse_multiplicative()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat(&TokenKind::Times) {
                BinOp::Mul
            } else if self.eat(&TokenKind::Divided) {
                self.expect(TokenKind::By)?;
                BinOp::Div
            } else if self.eat(&TokenKind::Modulo) {
                BinOp::Mod
            } else {
                return Ok(left);
            };
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat(&TokenKind::Minus) {
            let operand = self.parse_unary()?;
            Ok(Expr::Unary {
                op: UnOp::Neg,
                operand: Box::new(operand),
            })
        } else {
            self.parse_postfix()
        }
    }

    /// Postfix `at` indexing; the index itself parses at unary level, so
    /// `xs at i plus 1` is `(xs at i) plus 1`.
    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        while self.eat(&TokenKind::At) {
            let index = self.parse_unary()?;
            expr = Expr::Index {
                target: Box::new(expr),
                index: Box::new(index),
            };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.peek().clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            TokenKind::Nil => {
                self.advance();
                Ok(Expr::Nil)
            }
            TokenKind::List => {
                self.advance();
                let mut items = Vec::new();
                if self.starts_expr() {
                    items.push(self.parse_expr()?);
                    while self.eat(&TokenKind::Comma) {
                        items.push(self.parse_expr()?);
                    }
                }
                Ok(Expr::ListLit(items))
            }
            TokenKind::Map => {
                self.advance();
                Ok(Expr::MapLit)
            }
            TokenKind::Range => {
                self.advance();
                let start = self.parse_additive()?;
                self.expect(TokenKind::To)?;
                let end = self.parse_additive()?;
                let step = if self.eat(&TokenKind::By) {
                    Some(Box::new(self.parse_additive()?))
                } else {
                    None
                };
                Ok(Expr::RangeLit {
                    start: Box::new(start),
                    end: Box::new(end),
                    step,
                })
            }
            TokenKind::Call => {
                self.advance();
                let name = self.expect_ident()?;
                let mut args = Vec::new();
                if self.eat(&TokenKind::With) {
                    args.push(self.parse_expr()?);
                    while self.eat(&TokenKind::Comma) {
                        args.push(self.parse_expr()?);
                    }
                }
                Ok(Expr::Call { name, args })
            }
            TokenKind::Ident(name) => {
                self.advance();
                if self.eat(&TokenKind::LParen) {
                    let mut args = Vec::new();
                    if !self.check(&TokenKind::RParen) {
                        args.push(self.parse_expr()?);
                        while self.eat(&TokenKind::Comma) {
                            args.push(self.parse_expr()?);
                        }
                    }
                    self.expect(TokenKind::RParen)?;
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Var(name))
                }
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    /// Whether the current token can begin an expression (used to detect the
    /// bare `list` literal).
    fn starts_expr(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Number(_)
                | TokenKind::Str(_)
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Nil
                | TokenKind::Ident(_)
                | TokenKind::LParen
                | TokenKind::Call
                | TokenKind::List
                | TokenKind::Map
                | TokenKind::Range
                | TokenKind::Minus
                | TokenKind::Not
        )
    }
}

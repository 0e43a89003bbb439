use std::rc::Rc;

use rand::distributions::Alphanumeric;
use rand::Rng;
use thiserror::Error;

use crate::ast::{BinaryOp, Expr, ExprKind, FunctionDecl, Ident, Program, Stmt, StmtKind, UnaryOp};
use crate::tokenizer::{Position, Span, Token, TokenKind};

/// Raised on the first grammar violation; the parser does not recover.
#[derive(Debug, Clone, Error)]
#[error("{message}: {token}")]
pub struct SyntaxError {
    pub message: String,
    pub token: Token,
}

impl SyntaxError {
    fn new(message: impl Into<String>, token: Token) -> Self {
        Self {
            message: message.into(),
            token,
        }
    }

    pub fn span(&self) -> Span {
        self.token.span
    }
}

/// Recursive-descent parser over an `Eof`-terminated token stream.
///
/// `curr` is the most recently consumed token, `next` the lookahead. A
/// `consume` that matches advances the cursor so the matched token becomes
/// `curr`; node spans run from the first token of a production to the last
/// consumed one.
pub struct Parser {
    tokens: Vec<Token>,
    index: usize,
    curr: Token,
    next: Token,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        let placeholder = Token::new(
            TokenKind::Illegal,
            "0",
            Span::new(Position::default(), Position::default()),
        );
        let mut parser = Self {
            tokens,
            index: 0,
            curr: placeholder.clone(),
            next: placeholder,
        };
        parser.advance();
        parser
    }

    /// program -> declaration* EOF
    pub fn parse(&mut self) -> Result<Program, SyntaxError> {
        let begin = self.next.span.begin;
        let mut declarations = Vec::new();
        while !self.consume(TokenKind::Eof) {
            declarations.push(self.declaration()?);
        }
        let end = self.curr.span.end;
        Ok(Program {
            declarations,
            span: Span::new(begin, end),
        })
    }

    /// Parses a single expression and requires the stream to end there.
    pub fn parse_expression_only(&mut self) -> Result<Expr, SyntaxError> {
        let expr = self.expression()?;
        if !self.consume(TokenKind::Eof) {
            return Err(self.unexpected("expected end of expression"));
        }
        Ok(expr)
    }

    /// declaration -> funDecl | varDecl | statement
    fn declaration(&mut self) -> Result<Stmt, SyntaxError> {
        let begin = self.next.span.begin;
        if self.consume(TokenKind::Function) {
            self.fun_declaration(begin)
        } else if self.consume(TokenKind::Var) {
            self.var_declaration(begin)
        } else {
            self.statement()
        }
    }

    /// funDecl -> "fun" function ( call )?
    ///
    /// In declaration position an immediately-invoked function literal
    /// collapses into an expression statement whose expression is the call.
    fn fun_declaration(&mut self, begin: Position) -> Result<Stmt, SyntaxError> {
        let decl = self.function_decl(begin)?;
        let span = decl.span;
        if self.check(TokenKind::LParen) {
            let mut expr = Expr::new(ExprKind::Function(decl), span);
            expr = self.finish_calls(expr)?;
            let span = expr.span;
            Ok(Stmt::new(StmtKind::Expr(expr), span))
        } else {
            Ok(Stmt::new(StmtKind::Function(decl), span))
        }
    }

    /// function -> IDENTIFIER? "(" parameters? ")" block
    fn function_decl(&mut self, begin: Position) -> Result<Rc<FunctionDecl>, SyntaxError> {
        let name = if self.check(TokenKind::LParen) {
            // Anonymous function: synthesize a unique identifier.
            Ident {
                name: format!("anon-{}", random_suffix()),
                span: self.curr.span,
            }
        } else if self.consume(TokenKind::Identifier) {
            Ident {
                name: self.curr.literal.clone(),
                span: self.curr.span,
            }
        } else {
            return Err(self.unexpected("function name should be an identifier"));
        };

        let params = self.parameters()?;

        if !self.consume(TokenKind::LBrace) {
            return Err(self.unexpected("expected opening '{' for function body"));
        }
        let body = self.block_body()?;

        let end = self.curr.span.end;
        Ok(Rc::new(FunctionDecl {
            name,
            params,
            body,
            span: Span::new(begin, end),
        }))
    }

    /// parameters -> IDENTIFIER ("," IDENTIFIER)*
    fn parameters(&mut self) -> Result<Vec<Ident>, SyntaxError> {
        if !self.consume(TokenKind::LParen) {
            return Err(self.unexpected("expected opening '(' for parameters"));
        }
        let mut params = Vec::new();
        if self.consume(TokenKind::RParen) {
            return Ok(params);
        }
        params.push(self.parameter()?);
        while self.consume(TokenKind::Comma) {
            params.push(self.parameter()?);
        }
        if !self.consume(TokenKind::RParen) {
            return Err(self.unexpected("expected closing ')' for parameters"));
        }
        Ok(params)
    }

    fn parameter(&mut self) -> Result<Ident, SyntaxError> {
        if !self.consume(TokenKind::Identifier) {
            return Err(self.unexpected("param should be an identifier"));
        }
        Ok(Ident {
            name: self.curr.literal.clone(),
            span: self.curr.span,
        })
    }

    /// varDecl -> "var" IDENTIFIER ( "=" expression )?
    fn var_declaration(&mut self, begin: Position) -> Result<Stmt, SyntaxError> {
        if !self.consume(TokenKind::Identifier) {
            return Err(self.unexpected("expected identifier after var"));
        }
        let name = Ident {
            name: self.curr.literal.clone(),
            span: self.curr.span,
        };

        let value = if self.consume(TokenKind::Assign) {
            self.expression()?
        } else {
            // Missing initializer declares nil.
            Expr::new(ExprKind::Nil, name.span)
        };

        let end = self.curr.span.end;
        Ok(Stmt::new(
            StmtKind::Var { name, value },
            Span::new(begin, end),
        ))
    }

    /// statement -> ifStmt | whileStmt | break | continue | returnStmt
    ///            | deferStmt | assertStmt | block | exprStmt
    fn statement(&mut self) -> Result<Stmt, SyntaxError> {
        let begin = self.next.span.begin;
        if self.consume(TokenKind::If) {
            self.if_statement(begin)
        } else if self.consume(TokenKind::While) {
            self.while_statement(begin)
        } else if self.consume(TokenKind::Break) {
            Ok(Stmt::new(StmtKind::Break, self.curr.span))
        } else if self.consume(TokenKind::Continue) {
            Ok(Stmt::new(StmtKind::Continue, self.curr.span))
        } else if self.consume(TokenKind::Return) {
            let expr = self.expression()?;
            let end = self.curr.span.end;
            Ok(Stmt::new(StmtKind::Return(expr), Span::new(begin, end)))
        } else if self.consume(TokenKind::Defer) {
            self.defer_statement(begin)
        } else if self.consume(TokenKind::Assert) {
            let expr = self.expression()?;
            let end = self.curr.span.end;
            Ok(Stmt::new(StmtKind::Assert(expr), Span::new(begin, end)))
        } else if self.consume(TokenKind::LBrace) {
            let declarations = self.block_body()?;
            let end = self.curr.span.end;
            Ok(Stmt::new(StmtKind::Block(declarations), Span::new(begin, end)))
        } else {
            let expr = self.expression()?;
            let span = expr.span;
            Ok(Stmt::new(StmtKind::Expr(expr), span))
        }
    }

    /// ifStmt -> "if" "(" expression ")" statement ( "else" statement )?
    fn if_statement(&mut self, begin: Position) -> Result<Stmt, SyntaxError> {
        if !self.consume(TokenKind::LParen) {
            return Err(self.unexpected("expected opening '(' for if condition"));
        }
        let cond = self.expression()?;
        if !self.consume(TokenKind::RParen) {
            return Err(self.unexpected("expected closing ')' for if condition"));
        }
        let then_stmt = Box::new(self.statement()?);
        let else_stmt = if self.consume(TokenKind::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        let end = self.curr.span.end;
        Ok(Stmt::new(
            StmtKind::If {
                cond,
                then_stmt,
                else_stmt,
            },
            Span::new(begin, end),
        ))
    }

    /// whileStmt -> "while" "(" expression ")" statement
    fn while_statement(&mut self, begin: Position) -> Result<Stmt, SyntaxError> {
        if !self.consume(TokenKind::LParen) {
            return Err(self.unexpected("expected opening '(' for 'while' condition"));
        }
        let cond = self.expression()?;
        if !self.consume(TokenKind::RParen) {
            return Err(self.unexpected("expected closing ')' for 'while' condition"));
        }
        let body = Box::new(self.statement()?);
        let end = self.curr.span.end;
        Ok(Stmt::new(
            StmtKind::While { cond, body },
            Span::new(begin, end),
        ))
    }

    /// deferStmt -> "defer" call
    fn defer_statement(&mut self, begin: Position) -> Result<Stmt, SyntaxError> {
        let atom = self.atom()?;
        let call = self.finish_calls(atom)?;
        if !call.is_call() {
            return Err(self.unexpected("defer requires a function call"));
        }
        let end = self.curr.span.end;
        Ok(Stmt::new(StmtKind::Defer(call), Span::new(begin, end)))
    }

    /// block -> "{" declaration* "}"
    ///
    /// Called with the opening brace already consumed; consumes the closing
    /// brace.
    fn block_body(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        let mut declarations = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            declarations.push(self.declaration()?);
        }
        if !self.consume(TokenKind::RBrace) {
            return Err(self.unexpected("expected closing '}'"));
        }
        Ok(declarations)
    }

    /// expression -> assignment ( "?" assignment ":" assignment )?
    fn expression(&mut self) -> Result<Expr, SyntaxError> {
        let begin = self.next.span.begin;
        let expr = self.assignment()?;

        if self.consume(TokenKind::Question) {
            let then_expr = self.assignment()?;
            if !self.consume(TokenKind::Colon) {
                return Err(self.unexpected("expected ':'"));
            }
            let else_expr = self.assignment()?;
            let end = self.curr.span.end;
            return Ok(Expr::new(
                ExprKind::Ternary {
                    cond: Box::new(expr),
                    then_expr: Box::new(then_expr),
                    else_expr: Box::new(else_expr),
                },
                Span::new(begin, end),
            ));
        }
        Ok(expr)
    }

    /// assignment -> IDENTIFIER "=" assignment | logicalOr
    fn assignment(&mut self) -> Result<Expr, SyntaxError> {
        let begin = self.next.span.begin;
        let expr = self.logical_or()?;

        if self.consume(TokenKind::Assign) {
            let name = match &expr.kind {
                ExprKind::Identifier(name) => Ident {
                    name: name.clone(),
                    span: expr.span,
                },
                // The error points at the `=` itself.
                _ => {
                    return Err(SyntaxError::new(
                        "expected an identifier for assignment",
                        self.curr.clone(),
                    ))
                }
            };
            let value = self.assignment()?;
            let end = self.curr.span.end;
            return Ok(Expr::new(
                ExprKind::Assign {
                    name,
                    value: Box::new(value),
                },
                Span::new(begin, end),
            ));
        }
        Ok(expr)
    }

    /// logicalOr -> logicalAnd ( "||" logicalAnd )*
    fn logical_or(&mut self) -> Result<Expr, SyntaxError> {
        let begin = self.next.span.begin;
        let mut left = self.logical_and()?;
        while self.consume(TokenKind::LogicalOr) {
            let right = self.logical_and()?;
            let end = self.curr.span.end;
            left = Expr::new(
                ExprKind::LogicalOr {
                    lhs: Box::new(left),
                    rhs: Box::new(right),
                },
                Span::new(begin, end),
            );
        }
        Ok(left)
    }

    /// logicalAnd -> equality ( "&&" equality )*
    fn logical_and(&mut self) -> Result<Expr, SyntaxError> {
        let begin = self.next.span.begin;
        let mut left = self.equality()?;
        while self.consume(TokenKind::LogicalAnd) {
            let right = self.equality()?;
            let end = self.curr.span.end;
            left = Expr::new(
                ExprKind::LogicalAnd {
                    lhs: Box::new(left),
                    rhs: Box::new(right),
                },
                Span::new(begin, end),
            );
        }
        Ok(left)
    }

    /// equality -> comparison ( ( "==" | "!=" ) comparison )*
    fn equality(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_op(
            &[(TokenKind::Eq, BinaryOp::Eq), (TokenKind::Neq, BinaryOp::Neq)],
            Self::comparison,
        )
    }

    /// comparison -> term ( ( "<" | "<=" | ">" | ">=" ) term )*
    fn comparison(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_op(
            &[
                (TokenKind::Lt, BinaryOp::Lt),
                (TokenKind::Lte, BinaryOp::Lte),
                (TokenKind::Gt, BinaryOp::Gt),
                (TokenKind::Gte, BinaryOp::Gte),
            ],
            Self::term,
        )
    }

    /// term -> factor ( ( "+" | "-" ) factor )*
    fn term(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_op(
            &[
                (TokenKind::Plus, BinaryOp::Add),
                (TokenKind::Minus, BinaryOp::Subtract),
            ],
            Self::factor,
        )
    }

    /// factor -> unary ( ( "*" | "/" | "%" ) unary )*
    fn factor(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_op(
            &[
                (TokenKind::Multiply, BinaryOp::Multiply),
                (TokenKind::Divide, BinaryOp::Divide),
                (TokenKind::Modulo, BinaryOp::Modulo),
            ],
            Self::unary,
        )
    }

    fn binary_op(
        &mut self,
        ops: &[(TokenKind, BinaryOp)],
        next_rule: fn(&mut Self) -> Result<Expr, SyntaxError>,
    ) -> Result<Expr, SyntaxError> {
        let begin = self.next.span.begin;
        let mut left = next_rule(self)?;
        'outer: loop {
            for (kind, op) in ops {
                if self.consume(*kind) {
                    let right = next_rule(self)?;
                    let end = self.curr.span.end;
                    left = Expr::new(
                        ExprKind::Binary {
                            lhs: Box::new(left),
                            op: *op,
                            rhs: Box::new(right),
                        },
                        Span::new(begin, end),
                    );
                    continue 'outer;
                }
            }
            break;
        }
        Ok(left)
    }

    /// unary -> ( "!" | "-" ) unary | call
    fn unary(&mut self) -> Result<Expr, SyntaxError> {
        let begin = self.next.span.begin;
        let op = if self.consume(TokenKind::Not) {
            Some(UnaryOp::Not)
        } else if self.consume(TokenKind::Minus) {
            Some(UnaryOp::Negate)
        } else {
            None
        };
        if let Some(op) = op {
            let operand = self.unary()?;
            let end = self.curr.span.end;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                Span::new(begin, end),
            ));
        }
        self.call()
    }

    /// call -> atom ( "(" arguments? ")" )* | atom ( "[" expression "]" )*
    fn call(&mut self) -> Result<Expr, SyntaxError> {
        let expr = self.atom()?;
        if self.check(TokenKind::LParen) {
            self.finish_calls(expr)
        } else if self.check(TokenKind::LBracket) {
            self.index_chain(expr)
        } else {
            Ok(expr)
        }
    }

    fn finish_calls(&mut self, mut expr: Expr) -> Result<Expr, SyntaxError> {
        while self.consume(TokenKind::LParen) {
            expr = self.finish_call(expr)?;
        }
        Ok(expr)
    }

    fn finish_call(&mut self, callee: Expr) -> Result<Expr, SyntaxError> {
        let begin = callee.span.begin;
        let args = if self.check(TokenKind::RParen) {
            Vec::new()
        } else {
            self.arguments()?
        };
        if !self.consume(TokenKind::RParen) {
            return Err(self.unexpected("expected closing ')' for function call"));
        }
        let end = self.curr.span.end;
        Ok(Expr::new(
            ExprKind::Call {
                callee: Box::new(callee),
                args,
            },
            Span::new(begin, end),
        ))
    }

    fn index_chain(&mut self, mut expr: Expr) -> Result<Expr, SyntaxError> {
        while self.consume(TokenKind::LBracket) {
            let index = self.expression()?;
            if !self.consume(TokenKind::RBracket) {
                return Err(self.unexpected("expected closing ']' for index operation"));
            }
            let begin = expr.span.begin;
            let end = self.curr.span.end;
            expr = Expr::new(
                ExprKind::Index {
                    sequence: Box::new(expr),
                    index: Box::new(index),
                },
                Span::new(begin, end),
            );
        }
        Ok(expr)
    }

    /// arguments -> expression ( "," expression )*
    fn arguments(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        let mut args = vec![self.expression()?];
        while self.consume(TokenKind::Comma) {
            args.push(self.expression()?);
        }
        Ok(args)
    }

    /// atom -> NUMBER | STRING | "true" | "false" | "nil" | IDENTIFIER
    ///       | "(" expression ")" | list | map | funDecl | COMMENT
    fn atom(&mut self) -> Result<Expr, SyntaxError> {
        let begin = self.next.span.begin;
        if self.consume(TokenKind::Number) {
            Ok(Expr::new(
                ExprKind::Number(self.curr.literal.clone()),
                self.curr.span,
            ))
        } else if self.consume(TokenKind::Str) {
            Ok(Expr::new(
                ExprKind::Str(self.curr.literal.clone()),
                self.curr.span,
            ))
        } else if self.consume(TokenKind::True) || self.consume(TokenKind::False) {
            Ok(Expr::new(
                ExprKind::Boolean(self.curr.literal.clone()),
                self.curr.span,
            ))
        } else if self.consume(TokenKind::Identifier) {
            Ok(Expr::new(
                ExprKind::Identifier(self.curr.literal.clone()),
                self.curr.span,
            ))
        } else if self.consume(TokenKind::Nil) {
            Ok(Expr::new(ExprKind::Nil, self.curr.span))
        } else if self.consume(TokenKind::LParen) {
            let inner = self.expression()?;
            if !self.consume(TokenKind::RParen) {
                return Err(self.unexpected("expected closing ')' after expression"));
            }
            let end = self.curr.span.end;
            Ok(Expr::new(
                ExprKind::Paren(Box::new(inner)),
                Span::new(begin, end),
            ))
        } else if self.consume(TokenKind::LBrace) {
            self.map_literal(begin)
        } else if self.consume(TokenKind::LBracket) {
            self.list_literal(begin)
        } else if self.consume(TokenKind::Function) {
            let decl = self.function_decl(begin)?;
            let span = decl.span;
            Ok(Expr::new(ExprKind::Function(decl), span))
        } else if self.consume(TokenKind::Comment) {
            Ok(Expr::new(
                ExprKind::Comment(self.curr.literal.clone()),
                self.curr.span,
            ))
        } else {
            Err(self.unexpected("expected a literal or an expression"))
        }
    }

    /// map -> "{" ( expression ":" expression ( "," ... )* )? "}"
    fn map_literal(&mut self, begin: Position) -> Result<Expr, SyntaxError> {
        let mut entries = Vec::new();
        if !self.consume(TokenKind::RBrace) {
            entries.push(self.key_value_pair()?);
            while self.consume(TokenKind::Comma) {
                entries.push(self.key_value_pair()?);
            }
            if !self.consume(TokenKind::RBrace) {
                return Err(self.unexpected("expected closing '}' for map"));
            }
        }
        let end = self.curr.span.end;
        Ok(Expr::new(ExprKind::Map(entries), Span::new(begin, end)))
    }

    fn key_value_pair(&mut self) -> Result<(Expr, Expr), SyntaxError> {
        let key = self.expression()?;
        if !self.consume(TokenKind::Colon) {
            return Err(self.unexpected("expected ':' for map key-value pair"));
        }
        let value = self.expression()?;
        Ok((key, value))
    }

    /// list -> "[" arguments? "]"
    fn list_literal(&mut self, begin: Position) -> Result<Expr, SyntaxError> {
        let mut elements = Vec::new();
        if !self.consume(TokenKind::RBracket) {
            elements = self.arguments()?;
            if !self.consume(TokenKind::RBracket) {
                return Err(self.unexpected("expected closing ']' for list"));
            }
        }
        let end = self.curr.span.end;
        Ok(Expr::new(ExprKind::List(elements), Span::new(begin, end)))
    }

    // ------------------------------------
    // Cursor helpers
    // ------------------------------------

    fn check(&self, kind: TokenKind) -> bool {
        self.next.kind == kind
    }

    fn consume(&mut self, kind: TokenKind) -> bool {
        if self.next.kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn advance(&mut self) {
        if self.curr.kind == TokenKind::Eof {
            return;
        }
        let fetched = if self.index < self.tokens.len() {
            let token = self.tokens[self.index].clone();
            self.index += 1;
            token
        } else {
            // A truncated stream behaves as if terminated by Eof.
            Token::new(TokenKind::Eof, "0", self.next.span)
        };
        self.curr = std::mem::replace(&mut self.next, fetched);
    }

    fn unexpected(&self, message: &str) -> SyntaxError {
        SyntaxError::new(message, self.next.clone())
    }
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

use std::rc::Rc;

use crate::ast::{
    BinaryOp, Binding, DeclKind, Element, Expr, ExprKind, FunctionBody, FunctionDef, LogicalOp,
    Pattern, Program, Property, PropertyKey, Stmt, StmtKind, SwitchCase, TemplatePart, UnaryOp,
};
use crate::error::ExecutionError;
use crate::lexer::{Lexer, TemplateChunk, Token, TokenKind};

const RESERVED: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete", "do",
    "else", "export", "extends", "finally", "for", "function", "if", "import", "in", "instanceof",
    "new", "return", "super", "switch", "this", "throw", "try", "typeof", "var", "void", "while",
    "with", "yield", "true", "false", "null",
];

pub(crate) fn parse_program(source: &str, max_depth: usize) -> Result<Program, ExecutionError> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens, max_depth).parse_program()
}

#[derive(Clone, Copy)]
enum Infix {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

#[derive(Debug)]
struct Parser {
    tokens: Vec<Token>,
    index: usize,
    depth: usize,
    max_depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>, max_depth: usize) -> Self {
        Self {
            tokens,
            index: 0,
            depth: 0,
            max_depth,
        }
    }

    fn parse_program(&mut self) -> Result<Program, ExecutionError> {
        let mut body = Vec::new();
        while !self.check_kind(&TokenKind::Eof) {
            body.push(self.parse_statement()?);
        }
        Ok(Program { body })
    }

    fn enter(&mut self) -> Result<(), ExecutionError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(ExecutionError::at(
                format!("RangeError: code is nested more than {} levels deep", self.max_depth),
                self.peek().line,
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_statement(&mut self) -> Result<Stmt, ExecutionError> {
        self.enter()?;
        let result = self.parse_statement_inner();
        self.leave();
        result
    }

    fn parse_statement_inner(&mut self) -> Result<Stmt, ExecutionError> {
        let line = self.peek().line;
        let kind = match self.peek_kind().clone() {
            TokenKind::LBrace => StmtKind::Block(self.parse_block()?),
            TokenKind::Semicolon => {
                self.advance();
                StmtKind::Empty
            }
            TokenKind::Ident(word) => match word.as_str() {
                "var" | "let" | "const" if !self.peek_n_is(1, &TokenKind::Assign) => {
                    let kind = decl_kind(&word);
                    self.advance();
                    let decls = self.parse_declarations(kind)?;
                    self.consume_terminator()?;
                    StmtKind::Var { kind, decls }
                }
                "function" => {
                    let def = self.parse_function()?;
                    if def.name.is_none() {
                        return Err(self.error_at_line("function statement requires a name", line));
                    }
                    StmtKind::Function(def)
                }
                "if" => self.parse_if()?,
                "for" => self.parse_for()?,
                "while" => {
                    self.advance();
                    let test = self.parse_parenthesized()?;
                    let body = Box::new(self.parse_statement()?);
                    StmtKind::While { test, body }
                }
                "do" => {
                    self.advance();
                    let body = Box::new(self.parse_statement()?);
                    if !self.check_ident("while") {
                        return Err(self.error("expected 'while' after do block"));
                    }
                    self.advance();
                    let test = self.parse_parenthesized()?;
                    self.match_kind(&TokenKind::Semicolon);
                    StmtKind::DoWhile { body, test }
                }
                "return" => {
                    self.advance();
                    let value = if self.at_statement_end() {
                        None
                    } else {
                        Some(self.parse_expression()?)
                    };
                    self.consume_terminator()?;
                    StmtKind::Return(value)
                }
                "break" | "continue" => {
                    self.advance();
                    if matches!(self.peek_kind(), TokenKind::Ident(_)) && !self.peek().newline_before
                    {
                        return Err(self.error("labelled statements are not supported"));
                    }
                    self.consume_terminator()?;
                    if word == "break" {
                        StmtKind::Break
                    } else {
                        StmtKind::Continue
                    }
                }
                "throw" => {
                    self.advance();
                    if self.peek().newline_before {
                        return Err(self.error("illegal newline after throw"));
                    }
                    let value = self.parse_expression()?;
                    self.consume_terminator()?;
                    StmtKind::Throw(value)
                }
                "try" => self.parse_try()?,
                "switch" => self.parse_switch()?,
                "import" | "export" => {
                    return Err(self.error(
                        "modules are not available here; every capability is already in scope",
                    ));
                }
                "class" => return Err(self.error("class declarations are not supported")),
                "async" | "await" => {
                    return Err(self.error("asynchronous code is not supported"));
                }
                _ => self.parse_expression_statement()?,
            },
            _ => self.parse_expression_statement()?,
        };
        Ok(Stmt { kind, line })
    }

    fn parse_expression_statement(&mut self) -> Result<StmtKind, ExecutionError> {
        let expr = self.parse_expression()?;
        self.consume_terminator()?;
        Ok(StmtKind::Expr(expr))
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ExecutionError> {
        self.expect_kind(TokenKind::LBrace, "expected '{'")?;
        let mut body = Vec::new();
        while !self.check_kind(&TokenKind::RBrace) {
            if self.check_kind(&TokenKind::Eof) {
                return Err(self.error("expected '}' before end of input"));
            }
            body.push(self.parse_statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn parse_declarations(
        &mut self,
        kind: DeclKind,
    ) -> Result<Vec<(Pattern, Option<Expr>)>, ExecutionError> {
        let mut decls = Vec::new();
        loop {
            let pattern = self.parse_binding_pattern()?;
            let init = if self.match_kind(&TokenKind::Assign) {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            if init.is_none() && (kind == DeclKind::Const || !matches!(pattern, Pattern::Ident(_)))
            {
                return Err(self.error("missing initializer in declaration"));
            }
            decls.push((pattern, init));
            if !self.match_kind(&TokenKind::Comma) {
                break;
            }
        }
        Ok(decls)
    }

    fn parse_binding_pattern(&mut self) -> Result<Pattern, ExecutionError> {
        self.enter()?;
        let result = self.parse_binding_pattern_inner();
        self.leave();
        result
    }

    fn parse_binding_pattern_inner(&mut self) -> Result<Pattern, ExecutionError> {
        match self.peek_kind().clone() {
            TokenKind::Ident(_) => Ok(Pattern::Ident(self.consume_binding_ident()?)),
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                let mut rest = None;
                while !self.check_kind(&TokenKind::RBracket) {
                    if self.match_kind(&TokenKind::Comma) {
                        items.push(None);
                        continue;
                    }
                    if self.match_kind(&TokenKind::Ellipsis) {
                        rest = Some(Box::new(self.parse_binding_pattern()?));
                        break;
                    }
                    items.push(Some(self.parse_binding_element()?));
                    if !self.match_kind(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect_kind(TokenKind::RBracket, "expected ']' to close array pattern")?;
                Ok(Pattern::Array { items, rest })
            }
            TokenKind::LBrace => {
                self.advance();
                let mut props = Vec::new();
                while !self.check_kind(&TokenKind::RBrace) {
                    let key: Rc<str> = match self.peek_kind().clone() {
                        TokenKind::Ident(name) | TokenKind::Str(name) => {
                            self.advance();
                            name.into()
                        }
                        TokenKind::Ellipsis => {
                            return Err(self.error("rest properties are not supported"));
                        }
                        _ => return Err(self.error("expected property name in object pattern")),
                    };
                    let binding = if self.match_kind(&TokenKind::Colon) {
                        self.parse_binding_element()?
                    } else {
                        if RESERVED.contains(&key.as_ref()) {
                            return Err(self.error(format!("unexpected reserved word '{key}'")));
                        }
                        let default = if self.match_kind(&TokenKind::Assign) {
                            Some(self.parse_assignment()?)
                        } else {
                            None
                        };
                        Binding {
                            pattern: Pattern::Ident(key.clone()),
                            default,
                        }
                    };
                    props.push((key, binding));
                    if !self.match_kind(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect_kind(TokenKind::RBrace, "expected '}' to close object pattern")?;
                Ok(Pattern::Object { props })
            }
            _ => Err(self.error("expected a binding name")),
        }
    }

    fn parse_binding_element(&mut self) -> Result<Binding, ExecutionError> {
        let pattern = self.parse_binding_pattern()?;
        let default = if self.match_kind(&TokenKind::Assign) {
            Some(self.parse_assignment()?)
        } else {
            None
        };
        Ok(Binding { pattern, default })
    }

    fn parse_if(&mut self) -> Result<StmtKind, ExecutionError> {
        self.advance();
        let test = self.parse_parenthesized()?;
        let consequent = Box::new(self.parse_statement()?);
        let alternate = if self.check_ident("else") {
            self.advance();
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(StmtKind::If {
            test,
            consequent,
            alternate,
        })
    }

    fn parse_for(&mut self) -> Result<StmtKind, ExecutionError> {
        self.advance();
        if self.check_ident("await") {
            return Err(self.error("asynchronous code is not supported"));
        }
        self.expect_kind(TokenKind::LParen, "expected '(' after for")?;

        let mut init = None;
        if !self.check_kind(&TokenKind::Semicolon) {
            let line = self.peek().line;
            let declared = match self.peek_kind() {
                TokenKind::Ident(word) if matches!(word.as_str(), "var" | "let" | "const") => {
                    Some(decl_kind(word))
                }
                _ => None,
            };

            if let Some(kind) = declared {
                self.advance();
                let pattern = self.parse_binding_pattern()?;
                if self.check_ident("of") || self.check_ident("in") {
                    return self.parse_for_each(Some(kind), pattern);
                }
                let first = if self.match_kind(&TokenKind::Assign) {
                    Some(self.parse_assignment()?)
                } else {
                    None
                };
                if first.is_none() && kind == DeclKind::Const {
                    return Err(self.error("missing initializer in const declaration"));
                }
                let mut decls = vec![(pattern, first)];
                if self.match_kind(&TokenKind::Comma) {
                    decls.extend(self.parse_declarations(kind)?);
                }
                init = Some(Box::new(Stmt {
                    kind: StmtKind::Var { kind, decls },
                    line,
                }));
            } else if let TokenKind::Ident(name) = self.peek_kind().clone()
                && (self.peek_n_is_ident(1, "of") || self.peek_n_is_ident(1, "in"))
            {
                self.advance();
                return self.parse_for_each(None, Pattern::Ident(name.into()));
            } else {
                let expr = self.parse_expression()?;
                init = Some(Box::new(Stmt {
                    kind: StmtKind::Expr(expr),
                    line,
                }));
            }
        }

        self.expect_kind(TokenKind::Semicolon, "expected ';' after for initializer")?;
        let test = if self.check_kind(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_kind(TokenKind::Semicolon, "expected ';' after for condition")?;
        let update = if self.check_kind(&TokenKind::RParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_kind(TokenKind::RParen, "expected ')' after for clauses")?;
        let body = Box::new(self.parse_statement()?);

        Ok(StmtKind::For {
            init,
            test,
            update,
            body,
        })
    }

    fn parse_for_each(
        &mut self,
        decl: Option<DeclKind>,
        pattern: Pattern,
    ) -> Result<StmtKind, ExecutionError> {
        let keys = self.check_ident("in");
        self.advance();
        let iterable = if keys {
            self.parse_expression()?
        } else {
            self.parse_assignment()?
        };
        self.expect_kind(TokenKind::RParen, "expected ')' after for-of head")?;
        let body = Box::new(self.parse_statement()?);
        Ok(StmtKind::ForEach {
            decl,
            pattern,
            iterable,
            keys,
            body,
        })
    }

    fn parse_try(&mut self) -> Result<StmtKind, ExecutionError> {
        self.advance();
        let block = self.parse_block()?;
        let mut param = None;
        let mut handler = None;
        let mut finalizer = None;

        if self.check_ident("catch") {
            self.advance();
            if self.match_kind(&TokenKind::LParen) {
                param = Some(self.parse_binding_pattern()?);
                self.expect_kind(TokenKind::RParen, "expected ')' after catch binding")?;
            }
            handler = Some(self.parse_block()?);
        }
        if self.check_ident("finally") {
            self.advance();
            finalizer = Some(self.parse_block()?);
        }
        if handler.is_none() && finalizer.is_none() {
            return Err(self.error("missing catch or finally after try"));
        }

        Ok(StmtKind::Try {
            block,
            param,
            handler,
            finalizer,
        })
    }

    fn parse_switch(&mut self) -> Result<StmtKind, ExecutionError> {
        self.advance();
        let discriminant = self.parse_parenthesized()?;
        self.expect_kind(TokenKind::LBrace, "expected '{' after switch")?;
        let mut cases = Vec::new();

        while !self.match_kind(&TokenKind::RBrace) {
            let test = if self.check_ident("case") {
                self.advance();
                Some(self.parse_expression()?)
            } else if self.check_ident("default") {
                self.advance();
                None
            } else {
                return Err(self.error("expected 'case' or 'default'"));
            };
            self.expect_kind(TokenKind::Colon, "expected ':' after case")?;

            let mut body = Vec::new();
            while !self.check_ident("case")
                && !self.check_ident("default")
                && !self.check_kind(&TokenKind::RBrace)
            {
                if self.check_kind(&TokenKind::Eof) {
                    return Err(self.error("expected '}' to close switch"));
                }
                body.push(self.parse_statement()?);
            }
            cases.push(SwitchCase { test, body });
        }

        Ok(StmtKind::Switch {
            discriminant,
            cases,
        })
    }

    fn parse_parenthesized(&mut self) -> Result<Expr, ExecutionError> {
        self.expect_kind(TokenKind::LParen, "expected '('")?;
        let expr = self.parse_expression()?;
        self.expect_kind(TokenKind::RParen, "expected ')'")?;
        Ok(expr)
    }

    fn parse_expression(&mut self) -> Result<Expr, ExecutionError> {
        let first = self.parse_assignment()?;
        if !self.check_kind(&TokenKind::Comma) {
            return Ok(first);
        }
        let line = first.line;
        let mut items = vec![first];
        while self.match_kind(&TokenKind::Comma) {
            items.push(self.parse_assignment()?);
        }
        Ok(Expr {
            kind: ExprKind::Sequence(items),
            line,
        })
    }

    fn parse_assignment(&mut self) -> Result<Expr, ExecutionError> {
        self.enter()?;
        let result = self.parse_assignment_inner();
        self.leave();
        result
    }

    fn parse_assignment_inner(&mut self) -> Result<Expr, ExecutionError> {
        if self.is_arrow_start() {
            return self.parse_arrow();
        }

        let target = self.parse_conditional()?;
        let op = match self.peek_kind() {
            TokenKind::Assign => None,
            TokenKind::PlusAssign => Some(BinaryOp::Add),
            TokenKind::MinusAssign => Some(BinaryOp::Sub),
            TokenKind::StarAssign => Some(BinaryOp::Mul),
            TokenKind::SlashAssign => Some(BinaryOp::Div),
            TokenKind::PercentAssign => Some(BinaryOp::Rem),
            TokenKind::ShlAssign => Some(BinaryOp::Shl),
            TokenKind::ShrAssign => Some(BinaryOp::Shr),
            TokenKind::UShrAssign => Some(BinaryOp::UShr),
            _ => return Ok(target),
        };
        if !is_assignable(&target) {
            return Err(self.error("invalid assignment target"));
        }
        self.advance();
        let value = self.parse_assignment()?;
        let line = target.line;
        Ok(Expr {
            kind: ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            line,
        })
    }

    fn is_arrow_start(&self) -> bool {
        match self.peek_kind() {
            TokenKind::Ident(name) => {
                !RESERVED.contains(&name.as_str()) && self.peek_n_is(1, &TokenKind::Arrow)
            }
            TokenKind::LParen => {
                let mut depth = 0usize;
                for (offset, token) in self.tokens[self.index..].iter().enumerate() {
                    match token.kind {
                        TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => depth += 1,
                        TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                            depth = depth.saturating_sub(1);
                            if depth == 0 {
                                return self.peek_n_is(offset + 1, &TokenKind::Arrow);
                            }
                        }
                        TokenKind::Eof => return false,
                        _ => {}
                    }
                }
                false
            }
            _ => false,
        }
    }

    fn parse_arrow(&mut self) -> Result<Expr, ExecutionError> {
        let line = self.peek().line;
        let (params, rest) = if let TokenKind::Ident(_) = self.peek_kind() {
            let name = self.consume_binding_ident()?;
            (
                vec![Binding {
                    pattern: Pattern::Ident(name),
                    default: None,
                }],
                None,
            )
        } else {
            self.parse_params()?
        };
        self.expect_kind(TokenKind::Arrow, "expected '=>'")?;
        let body = if self.check_kind(&TokenKind::LBrace) {
            FunctionBody::Block(self.parse_block()?)
        } else {
            FunctionBody::Expr(Box::new(self.parse_assignment()?))
        };
        Ok(Expr {
            kind: ExprKind::Function(Rc::new(FunctionDef {
                name: None,
                params,
                rest,
                body,
                arrow: true,
                line,
            })),
            line,
        })
    }

    fn parse_params(&mut self) -> Result<(Vec<Binding>, Option<Pattern>), ExecutionError> {
        self.expect_kind(TokenKind::LParen, "expected '(' before parameters")?;
        let mut params = Vec::new();
        let mut rest = None;
        while !self.check_kind(&TokenKind::RParen) {
            if self.match_kind(&TokenKind::Ellipsis) {
                rest = Some(self.parse_binding_pattern()?);
                break;
            }
            params.push(self.parse_binding_element()?);
            if !self.match_kind(&TokenKind::Comma) {
                break;
            }
        }
        self.expect_kind(TokenKind::RParen, "expected ')' after parameters")?;
        Ok((params, rest))
    }

    fn parse_function(&mut self) -> Result<Rc<FunctionDef>, ExecutionError> {
        let line = self.peek().line;
        self.advance();
        if self.check_kind(&TokenKind::Star) {
            return Err(self.error("generator functions are not supported"));
        }
        let name = if matches!(self.peek_kind(), TokenKind::Ident(_)) {
            Some(self.consume_binding_ident()?)
        } else {
            None
        };
        let (params, rest) = self.parse_params()?;
        let body = FunctionBody::Block(self.parse_block()?);
        Ok(Rc::new(FunctionDef {
            name,
            params,
            rest,
            body,
            arrow: false,
            line,
        }))
    }

    fn parse_conditional(&mut self) -> Result<Expr, ExecutionError> {
        let test = self.parse_binary(1)?;
        if !self.match_kind(&TokenKind::Question) {
            return Ok(test);
        }
        let consequent = self.parse_assignment()?;
        self.expect_kind(TokenKind::Colon, "expected ':' in conditional expression")?;
        let alternate = self.parse_assignment()?;
        let line = test.line;
        Ok(Expr {
            kind: ExprKind::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            },
            line,
        })
    }

    fn peek_infix(&self) -> Option<(Infix, u8, bool)> {
        let infix = match self.peek_kind() {
            TokenKind::Nullish => (Infix::Logical(LogicalOp::Nullish), 1, false),
            TokenKind::OrOr => (Infix::Logical(LogicalOp::Or), 2, false),
            TokenKind::AndAnd => (Infix::Logical(LogicalOp::And), 3, false),
            TokenKind::Pipe => (Infix::Binary(BinaryOp::BitOr), 4, false),
            TokenKind::Caret => (Infix::Binary(BinaryOp::BitXor), 5, false),
            TokenKind::Amp => (Infix::Binary(BinaryOp::BitAnd), 6, false),
            TokenKind::EqEq => (Infix::Binary(BinaryOp::Eq), 7, false),
            TokenKind::NotEq => (Infix::Binary(BinaryOp::NotEq), 7, false),
            TokenKind::EqEqEq => (Infix::Binary(BinaryOp::StrictEq), 7, false),
            TokenKind::NotEqEq => (Infix::Binary(BinaryOp::StrictNotEq), 7, false),
            TokenKind::Lt => (Infix::Binary(BinaryOp::Lt), 8, false),
            TokenKind::Le => (Infix::Binary(BinaryOp::Le), 8, false),
            TokenKind::Gt => (Infix::Binary(BinaryOp::Gt), 8, false),
            TokenKind::Ge => (Infix::Binary(BinaryOp::Ge), 8, false),
            TokenKind::Ident(word) if word == "instanceof" => {
                (Infix::Binary(BinaryOp::InstanceOf), 8, false)
            }
            TokenKind::Ident(word) if word == "in" => (Infix::Binary(BinaryOp::In), 8, false),
            TokenKind::Shl => (Infix::Binary(BinaryOp::Shl), 9, false),
            TokenKind::Shr => (Infix::Binary(BinaryOp::Shr), 9, false),
            TokenKind::UShr => (Infix::Binary(BinaryOp::UShr), 9, false),
            TokenKind::Plus => (Infix::Binary(BinaryOp::Add), 10, false),
            TokenKind::Minus => (Infix::Binary(BinaryOp::Sub), 10, false),
            TokenKind::Star => (Infix::Binary(BinaryOp::Mul), 11, false),
            TokenKind::Slash => (Infix::Binary(BinaryOp::Div), 11, false),
            TokenKind::Percent => (Infix::Binary(BinaryOp::Rem), 11, false),
            TokenKind::StarStar => (Infix::Binary(BinaryOp::Pow), 12, true),
            _ => return None,
        };
        Some(infix)
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr, ExecutionError> {
        let mut lhs = self.parse_unary()?;
        while let Some((infix, precedence, right_assoc)) = self.peek_infix() {
            if precedence < min_precedence {
                break;
            }
            self.advance();
            self.enter()?;
            let rhs = self.parse_binary(if right_assoc {
                precedence
            } else {
                precedence + 1
            });
            self.leave();
            let rhs = Box::new(rhs?);
            let line = lhs.line;
            let kind = match infix {
                Infix::Binary(op) => ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs,
                },
                Infix::Logical(op) => ExprKind::Logical {
                    op,
                    lhs: Box::new(lhs),
                    rhs,
                },
            };
            lhs = Expr { kind, line };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExecutionError> {
        self.enter()?;
        let result = self.parse_unary_inner();
        self.leave();
        result
    }

    fn parse_unary_inner(&mut self) -> Result<Expr, ExecutionError> {
        let line = self.peek().line;
        let op = match self.peek_kind() {
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Plus => Some(UnaryOp::Plus),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::Ident(word) if word == "typeof" => Some(UnaryOp::TypeOf),
            TokenKind::Ident(word) if word == "void" => Some(UnaryOp::Void),
            TokenKind::Ident(word) if word == "delete" => Some(UnaryOp::Delete),
            TokenKind::Increment | TokenKind::Decrement => {
                let increment = self.check_kind(&TokenKind::Increment);
                self.advance();
                let target = self.parse_unary()?;
                if !is_simple_target(&target) {
                    return Err(self.error("invalid increment/decrement operand"));
                }
                return Ok(Expr {
                    kind: ExprKind::Update {
                        increment,
                        prefix: true,
                        target: Box::new(target),
                    },
                    line,
                });
            }
            _ => None,
        };

        if let Some(op) = op {
            self.advance();
            let expr = self.parse_unary()?;
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op,
                    expr: Box::new(expr),
                },
                line,
            });
        }

        let expr = self.parse_call_member()?;
        if (self.check_kind(&TokenKind::Increment) || self.check_kind(&TokenKind::Decrement))
            && !self.peek().newline_before
        {
            if !is_simple_target(&expr) {
                return Err(self.error("invalid increment/decrement operand"));
            }
            let increment = self.check_kind(&TokenKind::Increment);
            self.advance();
            return Ok(Expr {
                kind: ExprKind::Update {
                    increment,
                    prefix: false,
                    target: Box::new(expr),
                },
                line,
            });
        }
        Ok(expr)
    }

    fn parse_call_member(&mut self) -> Result<Expr, ExecutionError> {
        let mut expr = if self.check_ident("new") {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };

        loop {
            let line = self.peek().line;
            let kind = match self.peek_kind() {
                TokenKind::Dot => {
                    self.advance();
                    let property = self.consume_property_name()?;
                    ExprKind::Member {
                        object: Box::new(expr),
                        property,
                        optional: false,
                    }
                }
                TokenKind::QuestionDot => {
                    self.advance();
                    match self.peek_kind() {
                        TokenKind::LParen => ExprKind::Call {
                            callee: Box::new(expr),
                            args: self.parse_arguments()?,
                            optional: true,
                        },
                        TokenKind::LBracket => {
                            self.advance();
                            let index = self.parse_expression()?;
                            self.expect_kind(TokenKind::RBracket, "expected ']'")?;
                            ExprKind::Index {
                                object: Box::new(expr),
                                index: Box::new(index),
                                optional: true,
                            }
                        }
                        _ => ExprKind::Member {
                            object: Box::new(expr),
                            property: self.consume_property_name()?,
                            optional: true,
                        },
                    }
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect_kind(TokenKind::RBracket, "expected ']' after index")?;
                    ExprKind::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        optional: false,
                    }
                }
                TokenKind::LParen => ExprKind::Call {
                    callee: Box::new(expr),
                    args: self.parse_arguments()?,
                    optional: false,
                },
                TokenKind::Template(_) => {
                    return Err(self.error("tagged templates are not supported"));
                }
                _ => break,
            };
            expr = Expr { kind, line };
        }

        Ok(expr)
    }

    fn parse_new(&mut self) -> Result<Expr, ExecutionError> {
        let line = self.peek().line;
        self.advance();
        self.enter()?;
        let callee = if self.check_ident("new") {
            self.parse_new()
        } else {
            self.parse_primary()
        };
        self.leave();
        let mut callee = callee?;

        loop {
            let kind = match self.peek_kind() {
                TokenKind::Dot => {
                    self.advance();
                    ExprKind::Member {
                        object: Box::new(callee),
                        property: self.consume_property_name()?,
                        optional: false,
                    }
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect_kind(TokenKind::RBracket, "expected ']' after index")?;
                    ExprKind::Index {
                        object: Box::new(callee),
                        index: Box::new(index),
                        optional: false,
                    }
                }
                _ => break,
            };
            callee = Expr { kind, line };
        }

        let args = if self.check_kind(&TokenKind::LParen) {
            self.parse_arguments()?
        } else {
            Vec::new()
        };
        Ok(Expr {
            kind: ExprKind::New {
                callee: Box::new(callee),
                args,
            },
            line,
        })
    }

    fn parse_arguments(&mut self) -> Result<Vec<Element>, ExecutionError> {
        self.expect_kind(TokenKind::LParen, "expected '('")?;
        let mut args = Vec::new();
        while !self.check_kind(&TokenKind::RParen) {
            if self.match_kind(&TokenKind::Ellipsis) {
                args.push(Element::Spread(self.parse_assignment()?));
            } else {
                args.push(Element::Value(self.parse_assignment()?));
            }
            if !self.match_kind(&TokenKind::Comma) {
                break;
            }
        }
        self.expect_kind(TokenKind::RParen, "expected ')' after arguments")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExecutionError> {
        let token = self.peek().clone();
        let line = token.line;
        let kind = match token.kind {
            TokenKind::Number(value) => {
                self.advance();
                ExprKind::Number(value)
            }
            TokenKind::Str(text) => {
                self.advance();
                ExprKind::Str(text.into())
            }
            TokenKind::Template(chunks) => {
                self.advance();
                ExprKind::Template(self.parse_template(chunks)?)
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect_kind(TokenKind::RParen, "expected ')'")?;
                return Ok(expr);
            }
            TokenKind::LBracket => ExprKind::Array(self.parse_array_literal()?),
            TokenKind::LBrace => ExprKind::Object(self.parse_object_literal()?),
            TokenKind::Ident(word) => match word.as_str() {
                "true" => {
                    self.advance();
                    ExprKind::Bool(true)
                }
                "false" => {
                    self.advance();
                    ExprKind::Bool(false)
                }
                "null" => {
                    self.advance();
                    ExprKind::Null
                }
                "undefined" => {
                    self.advance();
                    ExprKind::Undefined
                }
                "this" => {
                    self.advance();
                    ExprKind::This
                }
                "function" => ExprKind::Function(self.parse_function()?),
                "class" => return Err(self.error("class expressions are not supported")),
                "async" | "await" => {
                    return Err(self.error("asynchronous code is not supported"));
                }
                "import" => {
                    return Err(self.error(
                        "modules are not available here; every capability is already in scope",
                    ));
                }
                _ if RESERVED.contains(&word.as_str()) => {
                    return Err(self.error(format!("unexpected token '{word}'")));
                }
                _ => {
                    self.advance();
                    ExprKind::Ident(word.into())
                }
            },
            other => {
                return Err(self.error(format!("unexpected {}", describe(&other))));
            }
        };
        Ok(Expr { kind, line })
    }

    fn parse_template(
        &mut self,
        chunks: Vec<TemplateChunk>,
    ) -> Result<Vec<TemplatePart>, ExecutionError> {
        chunks
            .into_iter()
            .map(|chunk| match chunk {
                TemplateChunk::Text(text) => Ok(TemplatePart::Text(text.into())),
                TemplateChunk::Code(code, line) => {
                    let tokens = Lexer::starting_at(&code, line).tokenize()?;
                    let mut parser = Parser::new(tokens, self.max_depth.saturating_sub(self.depth));
                    let expr = parser.parse_expression()?;
                    if !parser.check_kind(&TokenKind::Eof) {
                        return Err(parser.error("unexpected token in template substitution"));
                    }
                    Ok(TemplatePart::Expr(expr))
                }
            })
            .collect()
    }

    fn parse_array_literal(&mut self) -> Result<Vec<Element>, ExecutionError> {
        self.advance();
        let mut items = Vec::new();
        while !self.check_kind(&TokenKind::RBracket) {
            if self.match_kind(&TokenKind::Comma) {
                items.push(Element::Hole);
                continue;
            }
            if self.match_kind(&TokenKind::Ellipsis) {
                items.push(Element::Spread(self.parse_assignment()?));
            } else {
                items.push(Element::Value(self.parse_assignment()?));
            }
            if !self.match_kind(&TokenKind::Comma) {
                break;
            }
        }
        self.expect_kind(TokenKind::RBracket, "expected ']' to close array literal")?;
        Ok(items)
    }

    fn parse_object_literal(&mut self) -> Result<Vec<Property>, ExecutionError> {
        self.advance();
        let mut props = Vec::new();
        while !self.check_kind(&TokenKind::RBrace) {
            if self.match_kind(&TokenKind::Ellipsis) {
                props.push(Property::Spread(self.parse_assignment()?));
            } else {
                let line = self.peek().line;
                let (key, shorthand) = match self.peek_kind().clone() {
                    TokenKind::Ident(name) => {
                        self.advance();
                        (PropertyKey::Static(name.clone().into()), Some(name))
                    }
                    TokenKind::Str(name) => {
                        self.advance();
                        (PropertyKey::Static(name.into()), None)
                    }
                    TokenKind::Number(value) => {
                        self.advance();
                        (PropertyKey::Static(number_key(value).into()), None)
                    }
                    TokenKind::LBracket => {
                        self.advance();
                        let key = self.parse_assignment()?;
                        self.expect_kind(TokenKind::RBracket, "expected ']' after computed key")?;
                        (PropertyKey::Computed(key), None)
                    }
                    _ => return Err(self.error("expected property name")),
                };

                let value = if self.match_kind(&TokenKind::Colon) {
                    self.parse_assignment()?
                } else if self.check_kind(&TokenKind::LParen) {
                    let (params, rest) = self.parse_params()?;
                    let body = FunctionBody::Block(self.parse_block()?);
                    let name = match &key {
                        PropertyKey::Static(name) => Some(name.clone()),
                        PropertyKey::Computed(_) => None,
                    };
                    Expr {
                        kind: ExprKind::Function(Rc::new(FunctionDef {
                            name,
                            params,
                            rest,
                            body,
                            arrow: false,
                            line,
                        })),
                        line,
                    }
                } else if let Some(name) = shorthand {
                    if RESERVED.contains(&name.as_str()) {
                        return Err(self.error(format!("unexpected reserved word '{name}'")));
                    }
                    Expr {
                        kind: ExprKind::Ident(name.into()),
                        line,
                    }
                } else {
                    return Err(self.error("expected ':' after property name"));
                };
                props.push(Property::Value(key, value));
            }
            if !self.match_kind(&TokenKind::Comma) {
                break;
            }
        }
        self.expect_kind(TokenKind::RBrace, "expected '}' to close object literal")?;
        Ok(props)
    }

    fn consume_property_name(&mut self) -> Result<Rc<str>, ExecutionError> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name.into())
            }
            _ => Err(self.error("expected property name after '.'")),
        }
    }

    fn consume_binding_ident(&mut self) -> Result<Rc<str>, ExecutionError> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                self.advance();
                Ok(name.into())
            }
            TokenKind::Ident(name) => Err(self.error(format!("unexpected reserved word '{name}'"))),
            _ => Err(self.error("expected identifier")),
        }
    }

    fn at_statement_end(&self) -> bool {
        self.check_kind(&TokenKind::Semicolon)
            || self.check_kind(&TokenKind::RBrace)
            || self.check_kind(&TokenKind::Eof)
            || self.peek().newline_before
    }

    /// Accepts an explicit `;` or an automatically inserted one.
    fn consume_terminator(&mut self) -> Result<(), ExecutionError> {
        if self.match_kind(&TokenKind::Semicolon) || self.at_statement_end() {
            Ok(())
        } else {
            Err(self.error(format!("unexpected {}", describe(self.peek_kind()))))
        }
    }

    fn error(&self, message: impl AsRef<str>) -> ExecutionError {
        let token = self.peek();
        ExecutionError::at(
            format!("SyntaxError: {} (column {})", message.as_ref(), token.column),
            token.line,
        )
    }

    fn error_at_line(&self, message: &str, line: usize) -> ExecutionError {
        ExecutionError::at(format!("SyntaxError: {message}"), line)
    }

    fn expect_kind(&mut self, expected: TokenKind, message: &str) -> Result<(), ExecutionError> {
        if self.match_kind(&expected) {
            Ok(())
        } else {
            Err(self.error(format!("{message}, found {}", describe(self.peek_kind()))))
        }
    }

    fn check_ident(&self, text: &str) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Ident(name) if name == text
        )
    }

    fn peek_n_is_ident(&self, n: usize, text: &str) -> bool {
        self.tokens
            .get(self.index + n)
            .is_some_and(|token| matches!(&token.kind, TokenKind::Ident(name) if name == text))
    }

    fn match_kind(&mut self, expected: &TokenKind) -> bool {
        if self.check_kind(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check_kind(&self, expected: &TokenKind) -> bool {
        same_variant(self.peek_kind(), expected)
    }

    fn peek_n_is(&self, n: usize, expected: &TokenKind) -> bool {
        self.tokens
            .get(self.index + n)
            .map(|token| same_variant(&token.kind, expected))
            .unwrap_or(false)
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) {
        if self.index + 1 < self.tokens.len() {
            self.index += 1;
        }
    }
}

fn decl_kind(word: &str) -> DeclKind {
    match word {
        "let" => DeclKind::Let,
        "const" => DeclKind::Const,
        _ => DeclKind::Var,
    }
}

fn is_simple_target(expr: &Expr) -> bool {
    matches!(
        expr.kind,
        ExprKind::Ident(_) | ExprKind::Member { .. } | ExprKind::Index { .. }
    )
}

fn is_assignable(expr: &Expr) -> bool {
    is_simple_target(expr)
}

fn number_key(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

fn same_variant(a: &TokenKind, b: &TokenKind) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Ident(name) => format!("identifier '{name}'"),
        TokenKind::Number(value) => format!("number {value}"),
        TokenKind::Str(_) => "string".to_string(),
        TokenKind::Template(_) => "template literal".to_string(),
        TokenKind::Eof => "end of input".to_string(),
        other => format!("token {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::parse_program;
    use crate::ast::{BinaryOp, DeclKind, ExprKind, FunctionBody, Pattern, StmtKind};

    const DEPTH: usize = 256;

    #[test]
    fn parses_declarations_without_semicolons() {
        let program = parse_program("const a = 1\nlet b = a + 2\nvar c", DEPTH).expect("parse");
        assert_eq!(program.body.len(), 3);
        assert!(matches!(
            &program.body[0].kind,
            StmtKind::Var {
                kind: DeclKind::Const,
                ..
            }
        ));
        assert_eq!(program.body[2].line, 3);
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let program = parse_program("x = 1 + 2 * 3;", DEPTH).expect("parse");
        let StmtKind::Expr(expr) = &program.body[0].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::Assign { value, .. } = &expr.kind else {
            panic!("expected assignment");
        };
        let ExprKind::Binary { op, rhs, .. } = &value.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            rhs.kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn arrow_functions_with_expression_and_block_bodies() {
        let program =
            parse_program("const f = (a, b = 2) => a * b; const g = x => { return x; };", DEPTH)
                .expect("parse");
        let StmtKind::Var { decls, .. } = &program.body[0].kind else {
            panic!("expected declaration");
        };
        let Some(init) = &decls[0].1 else {
            panic!("expected initializer");
        };
        let ExprKind::Function(def) = &init.kind else {
            panic!("expected function");
        };
        assert!(def.arrow);
        assert_eq!(def.params.len(), 2);
        assert!(def.params[1].default.is_some());
        assert!(matches!(def.body, FunctionBody::Expr(_)));
    }

    #[test]
    fn for_of_with_destructuring() {
        let program =
            parse_program("for (const [x, y] of points) { total += x * y }", DEPTH).expect("parse");
        let StmtKind::ForEach {
            pattern, keys, ..
        } = &program.body[0].kind
        else {
            panic!("expected for-of");
        };
        assert!(!keys);
        assert!(matches!(pattern, Pattern::Array { items, .. } if items.len() == 2));
    }

    #[test]
    fn classic_for_loop_and_new_chains() {
        let source = "for (let i = 0, n = 4; i < n; i++) { group.add(new Mesh(new BoxGeometry(1, 1, 1), mat)); }";
        let program = parse_program(source, DEPTH).expect("parse");
        assert!(matches!(&program.body[0].kind, StmtKind::For { update: Some(_), .. }));
    }

    #[test]
    fn object_literal_shorthand_and_methods() {
        let source = "const o = { depth, bevelEnabled: false, 'steps': 2, build() { return 1 } };";
        parse_program(source, DEPTH).expect("parse");
    }

    #[test]
    fn return_on_its_own_line_returns_undefined() {
        let program = parse_program("function f() { return\n42 }", DEPTH).expect("parse");
        let StmtKind::Function(def) = &program.body[0].kind else {
            panic!("expected function");
        };
        let FunctionBody::Block(body) = &def.body else {
            panic!("expected block body");
        };
        assert!(matches!(body[0].kind, StmtKind::Return(None)));
    }

    #[test]
    fn imports_are_rejected() {
        let err = parse_program("import * as THREE from 'three';", DEPTH).expect_err("must fail");
        assert!(err.message.contains("modules are not available"));
        assert_eq!(err.line, Some(1));
    }

    #[test]
    fn reports_line_of_malformed_input() {
        let err = parse_program("const a = 1;\nconst b = (2 + ;", DEPTH).expect_err("must fail");
        assert_eq!(err.line, Some(2));
        assert!(err.message.starts_with("SyntaxError"));
    }

    #[test]
    fn excessive_nesting_is_rejected() {
        let source = format!("x = {}1{};", "(".repeat(400), ")".repeat(400));
        let err = parse_program(&source, DEPTH).expect_err("must fail");
        assert!(err.message.contains("nested"));
    }

    #[test]
    fn template_literal_substitutions_parse() {
        let program = parse_program("const s = `a${1 + 2}b`;", DEPTH).expect("parse");
        let StmtKind::Var { decls, .. } = &program.body[0].kind else {
            panic!("expected declaration");
        };
        assert!(matches!(
            decls[0].1.as_ref().map(|e| &e.kind),
            Some(ExprKind::Template(parts)) if parts.len() == 3
        ));
    }
}

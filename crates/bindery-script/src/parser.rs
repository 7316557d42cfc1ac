use crate::ast::*;
use crate::error::ParseError;
use crate::lexer::{tokenize, Token, TokenKind};
use smallvec::SmallVec;
use std::rc::Rc;

const RESERVED: &[&str] = &[
    "let", "const", "var", "if", "else", "while", "do", "for", "return", "break", "continue",
    "throw", "try", "catch", "finally", "typeof", "delete", "await", "in", "new", "function",
    "class", "true", "false", "null", "undefined",
];

pub(crate) struct Parser<'s> {
    source: &'s str,
    base: usize,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'s> Parser<'s> {
    /// `base` is the offset of `source` inside the text the caller started
    /// from, so nested parses (template holes, property segments) report
    /// offsets relative to the outermost input.
    pub(crate) fn new(source: &'s str, base: usize) -> Result<Self, ParseError> {
        Ok(Self {
            source,
            base,
            tokens: tokenize(source, base)?,
            pos: 0,
        })
    }

    pub(crate) fn parse_program(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut body = Vec::new();
        while !self.at_eof() {
            body.push(self.statement()?);
        }
        Ok(body)
    }

    pub(crate) fn parse_complete_expression(&mut self) -> Result<Expr, ParseError> {
        let expr = self.expression()?;
        // A trailing semicolon is tolerated so `{ count + 1; }` reads as an expression.
        self.eat_punct(";");
        if !self.at_eof() {
            return Err(self.unexpected());
        }
        Ok(expr)
    }

    // ---------------------------------------------------------------------
    // Token helpers
    // ---------------------------------------------------------------------

    fn peek(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek_nth(&self, ahead: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + ahead).min(last)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn previous_end(&self) -> usize {
        if self.pos == 0 {
            self.base
        } else {
            self.tokens[self.pos - 1].end
        }
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn is_punct(&self, punct: &str) -> bool {
        matches!(self.peek().kind, TokenKind::Punct(p) if p == punct)
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.is_punct(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<(), ParseError> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.error_here(format!("expected '{punct}'")))
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(name) if name == keyword)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn binding_name(&mut self) -> Result<String, ParseError> {
        match &self.peek().kind {
            TokenKind::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error_here("expected identifier")),
        }
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.peek().offset)
    }

    fn unexpected(&self) -> ParseError {
        let token = self.peek();
        let text = match &token.kind {
            TokenKind::Eof => return ParseError::new("unexpected end of input", token.offset),
            TokenKind::Number(value) => value.to_string(),
            TokenKind::Str(value) => format!("\"{value}\""),
            TokenKind::Template { .. } => "template literal".to_string(),
            TokenKind::Ident(name) => name.clone(),
            TokenKind::Punct(punct) => punct.to_string(),
        };
        ParseError::new(format!("unexpected token '{text}'"), token.offset)
    }

    /// Automatic semicolon insertion: an explicit `;`, a line break, a
    /// closing brace or the end of input all terminate a statement.
    fn consume_semicolon(&mut self) -> Result<(), ParseError> {
        if self.eat_punct(";") {
            return Ok(());
        }
        let token = self.peek();
        if token.newline_before || self.is_punct("}") || self.at_eof() {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    // ---------------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------------

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        if self.is_punct("{") {
            return Ok(Stmt::Block(self.block()?));
        }
        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }
        let keyword = match &self.peek().kind {
            TokenKind::Ident(name) => name.clone(),
            _ => String::new(),
        };
        match keyword.as_str() {
            "let" | "const" | "var" => {
                let declaration = self.declaration()?;
                self.consume_semicolon()?;
                Ok(declaration)
            }
            "if" => self.if_statement(),
            "while" => {
                self.advance();
                let test = self.parenthesized()?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::While { test, body })
            }
            "do" => {
                self.advance();
                let body = Box::new(self.statement()?);
                if !self.eat_keyword("while") {
                    return Err(self.error_here("expected 'while'"));
                }
                let test = self.parenthesized()?;
                self.eat_punct(";");
                Ok(Stmt::DoWhile { body, test })
            }
            "for" => self.for_statement(),
            "return" => {
                self.advance();
                let token = self.peek();
                let argument = if token.newline_before
                    || self.is_punct(";")
                    || self.is_punct("}")
                    || self.at_eof()
                {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.consume_semicolon()?;
                Ok(Stmt::Return(argument))
            }
            "break" => {
                self.advance();
                self.consume_semicolon()?;
                Ok(Stmt::Break)
            }
            "continue" => {
                self.advance();
                self.consume_semicolon()?;
                Ok(Stmt::Continue)
            }
            "throw" => {
                self.advance();
                if self.peek().newline_before {
                    return Err(self.error_here("line break after 'throw'"));
                }
                let argument = self.expression()?;
                self.consume_semicolon()?;
                Ok(Stmt::Throw(argument))
            }
            "try" => self.try_statement(),
            _ => {
                let expr = self.expression()?;
                self.consume_semicolon()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.is_punct("}") {
            if self.at_eof() {
                return Err(self.error_here("expected '}'"));
            }
            body.push(self.statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn parenthesized(&mut self) -> Result<Expr, ParseError> {
        self.expect_punct("(")?;
        let expr = self.expression()?;
        self.expect_punct(")")?;
        Ok(expr)
    }

    fn decl_kind(&mut self) -> Option<DeclKind> {
        let kind = match &self.peek().kind {
            TokenKind::Ident(name) if name == "let" => DeclKind::Let,
            TokenKind::Ident(name) if name == "const" => DeclKind::Const,
            TokenKind::Ident(name) if name == "var" => DeclKind::Var,
            _ => return None,
        };
        self.advance();
        Some(kind)
    }

    fn declaration(&mut self) -> Result<Stmt, ParseError> {
        let Some(kind) = self.decl_kind() else {
            return Err(self.error_here("expected declaration"));
        };
        let mut declarations = Vec::new();
        loop {
            let offset = self.peek().offset;
            let name = self.binding_name()?;
            let init = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            if kind == DeclKind::Const && init.is_none() {
                return Err(ParseError::new(
                    format!("missing initializer in const declaration of '{name}'"),
                    offset,
                ));
            }
            declarations.push(Declarator { name, init });
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(Stmt::Declare { kind, declarations })
    }

    fn if_statement(&mut self) -> Result<Stmt, ParseError> {
        self.advance();
        let test = self.parenthesized()?;
        let consequent = Box::new(self.statement()?);
        let alternate = if self.eat_keyword("else") {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            test,
            consequent,
            alternate,
        })
    }

    fn for_statement(&mut self) -> Result<Stmt, ParseError> {
        self.advance();
        self.expect_punct("(")?;

        // `for (const x of xs)`, `for (const k in obj)` and the bare `for (x of xs)`.
        let declared = matches!(&self.peek().kind, TokenKind::Ident(name) if name == "let" || name == "const" || name == "var");
        let head = if declared { 1 } else { 0 };
        if let (TokenKind::Ident(_), TokenKind::Ident(word)) =
            (&self.peek_nth(head).kind, &self.peek_nth(head + 1).kind)
        {
            if word == "of" || word == "in" {
                let iterates_values = word == "of";
                let kind = self.decl_kind().unwrap_or(DeclKind::Var);
                let binding = self.binding_name()?;
                self.advance();
                let subject = self.expression()?;
                self.expect_punct(")")?;
                let body = Box::new(self.statement()?);
                return Ok(if iterates_values {
                    Stmt::ForOf {
                        kind,
                        binding,
                        iterable: subject,
                        body,
                    }
                } else {
                    Stmt::ForIn {
                        kind,
                        binding,
                        object: subject,
                        body,
                    }
                });
            }
        }

        let init = if self.is_punct(";") {
            None
        } else if declared {
            Some(Box::new(self.declaration()?))
        } else {
            Some(Box::new(Stmt::Expr(self.expression()?)))
        };
        self.expect_punct(";")?;
        let test = if self.is_punct(";") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(";")?;
        let update = if self.is_punct(")") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(")")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    fn try_statement(&mut self) -> Result<Stmt, ParseError> {
        let offset = self.peek().offset;
        self.advance();
        let block = self.block()?;
        let mut param = None;
        let mut handler = None;
        if self.eat_keyword("catch") {
            if self.eat_punct("(") {
                param = Some(self.binding_name()?);
                self.expect_punct(")")?;
            }
            handler = Some(self.block()?);
        }
        let finalizer = if self.eat_keyword("finally") {
            Some(self.block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(ParseError::new(
                "'try' without 'catch' or 'finally'",
                offset,
            ));
        }
        Ok(Stmt::Try(Box::new(TryStmt {
            block,
            param,
            handler,
            finalizer,
        })))
    }

    // ---------------------------------------------------------------------
    // Expressions, lowest precedence first
    // ---------------------------------------------------------------------

    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expr, ParseError> {
        if self.is_keyword("async") && self.arrow_ahead(1) {
            self.advance();
        }
        if self.arrow_ahead(0) {
            return self.arrow();
        }
        let start = self.peek().offset;
        let target = self.conditional()?;
        let op = match &self.peek().kind {
            TokenKind::Punct("=") => AssignOp::Assign,
            TokenKind::Punct("+=") => AssignOp::Add,
            TokenKind::Punct("-=") => AssignOp::Sub,
            TokenKind::Punct("*=") => AssignOp::Mul,
            TokenKind::Punct("/=") => AssignOp::Div,
            TokenKind::Punct("%=") => AssignOp::Rem,
            TokenKind::Punct("??=") => AssignOp::Nullish,
            _ => return Ok(target),
        };
        if !target.is_assignable() {
            return Err(ParseError::new("invalid assignment target", start));
        }
        self.advance();
        let value = self.assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    /// Whether the tokens starting `ahead` positions from the cursor open an
    /// arrow function: `x =>` or a balanced `( ... ) =>`.
    fn arrow_ahead(&self, ahead: usize) -> bool {
        match &self.peek_nth(ahead).kind {
            TokenKind::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                matches!(self.peek_nth(ahead + 1).kind, TokenKind::Punct("=>"))
            }
            TokenKind::Punct("(") => {
                let mut depth = 0usize;
                let mut index = self.pos + ahead;
                while index < self.tokens.len() {
                    match self.tokens[index].kind {
                        TokenKind::Punct("(") => depth += 1,
                        TokenKind::Punct(")") => {
                            depth -= 1;
                            if depth == 0 {
                                return matches!(
                                    self.tokens.get(index + 1).map(|t| &t.kind),
                                    Some(TokenKind::Punct("=>"))
                                );
                            }
                        }
                        TokenKind::Eof => return false,
                        _ => {}
                    }
                    index += 1;
                }
                false
            }
            _ => false,
        }
    }

    fn arrow(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek().offset;
        let mut params: SmallVec<[String; 2]> = SmallVec::new();
        if self.eat_punct("(") {
            while !self.eat_punct(")") {
                params.push(self.binding_name()?);
                if !self.eat_punct(",") {
                    self.expect_punct(")")?;
                    break;
                }
            }
        } else {
            params.push(self.binding_name()?);
        }
        self.expect_punct("=>")?;
        let body = if self.is_punct("{") {
            ArrowBody::Block(self.block()?)
        } else {
            ArrowBody::Expr(Box::new(self.assignment()?))
        };
        let end = self.previous_end();
        let source = self
            .source
            .get(start - self.base..end - self.base)
            .unwrap_or_default()
            .to_string();
        Ok(Expr::Arrow(Rc::new(ArrowFunction {
            params,
            body,
            source,
        })))
    }

    fn conditional(&mut self) -> Result<Expr, ParseError> {
        let test = self.logical_or()?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let consequent = self.assignment()?;
        self.expect_punct(":")?;
        let alternate = self.assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn logical_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.logical_and()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Punct("||") => LogicalOp::Or,
                TokenKind::Punct("??") => LogicalOp::Nullish,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.logical_and()?;
            left = Expr::Logical {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn logical_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.equality()?;
        while self.eat_punct("&&") {
            let right = self.equality()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, ParseError>,
        pick: fn(&TokenKind) -> Option<BinaryOp>,
    ) -> Result<Expr, ParseError> {
        let mut left = next(self)?;
        while let Some(op) = pick(&self.peek().kind) {
            self.advance();
            let right = next(self)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(Self::relational, |kind| match kind {
            TokenKind::Punct("==") => Some(BinaryOp::Eq),
            TokenKind::Punct("!=") => Some(BinaryOp::NotEq),
            TokenKind::Punct("===") => Some(BinaryOp::StrictEq),
            TokenKind::Punct("!==") => Some(BinaryOp::StrictNotEq),
            _ => None,
        })
    }

    fn relational(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(Self::additive, |kind| match kind {
            TokenKind::Punct("<") => Some(BinaryOp::Lt),
            TokenKind::Punct("<=") => Some(BinaryOp::LtEq),
            TokenKind::Punct(">") => Some(BinaryOp::Gt),
            TokenKind::Punct(">=") => Some(BinaryOp::GtEq),
            TokenKind::Ident(name) if name == "in" => Some(BinaryOp::In),
            _ => None,
        })
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(Self::multiplicative, |kind| match kind {
            TokenKind::Punct("+") => Some(BinaryOp::Add),
            TokenKind::Punct("-") => Some(BinaryOp::Sub),
            _ => None,
        })
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(Self::unary, |kind| match kind {
            TokenKind::Punct("*") => Some(BinaryOp::Mul),
            TokenKind::Punct("/") => Some(BinaryOp::Div),
            TokenKind::Punct("%") => Some(BinaryOp::Rem),
            _ => None,
        })
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        let op = match &self.peek().kind {
            TokenKind::Punct("!") => Some(UnaryOp::Not),
            TokenKind::Punct("-") => Some(UnaryOp::Neg),
            TokenKind::Punct("+") => Some(UnaryOp::Plus),
            TokenKind::Ident(name) if name == "typeof" => Some(UnaryOp::TypeOf),
            TokenKind::Ident(name) if name == "delete" => Some(UnaryOp::Delete),
            TokenKind::Ident(name) if name == "await" => {
                self.advance();
                let argument = self.unary()?;
                return Ok(Expr::Await(Box::new(argument)));
            }
            TokenKind::Punct(p @ ("++" | "--")) => {
                let op = if *p == "++" {
                    UpdateOp::Increment
                } else {
                    UpdateOp::Decrement
                };
                let offset = self.peek().offset;
                self.advance();
                let target = self.unary()?;
                if !target.is_assignable() {
                    return Err(ParseError::new("invalid update target", offset));
                }
                return Ok(Expr::Update {
                    op,
                    prefix: true,
                    target: Box::new(target),
                });
            }
            _ => None,
        };
        let Some(op) = op else {
            return self.postfix();
        };
        let offset = self.peek().offset;
        self.advance();
        let argument = self.unary()?;
        if op == UnaryOp::Delete && !matches!(argument, Expr::Member { .. }) {
            return Err(ParseError::new("'delete' needs a member expression", offset));
        }
        Ok(Expr::Unary {
            op,
            argument: Box::new(argument),
        })
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let expr = self.call_member()?;
        let token = self.peek();
        if token.newline_before {
            return Ok(expr);
        }
        let op = match token.kind {
            TokenKind::Punct("++") => UpdateOp::Increment,
            TokenKind::Punct("--") => UpdateOp::Decrement,
            _ => return Ok(expr),
        };
        if !expr.is_assignable() {
            return Err(self.error_here("invalid update target"));
        }
        self.advance();
        Ok(Expr::Update {
            op,
            prefix: false,
            target: Box::new(expr),
        })
    }

    fn call_member(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_punct(".") {
                let name = self.property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: MemberKey::Static(name),
                    optional: false,
                };
            } else if self.eat_punct("?.") {
                if self.eat_punct("(") {
                    let arguments = self.arguments()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        arguments,
                        optional: true,
                    };
                } else if self.eat_punct("[") {
                    let key = self.expression()?;
                    self.expect_punct("]")?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: MemberKey::Computed(Box::new(key)),
                        optional: true,
                    };
                } else {
                    let name = self.property_name()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: MemberKey::Static(name),
                        optional: true,
                    };
                }
            } else if self.eat_punct("[") {
                let key = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: MemberKey::Computed(Box::new(key)),
                    optional: false,
                };
            } else if self.eat_punct("(") {
                let arguments = self.arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    arguments,
                    optional: false,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn property_name(&mut self) -> Result<String, ParseError> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error_here("expected property name")),
        }
    }

    /// Called after the opening parenthesis.
    fn arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut arguments = Vec::new();
        while !self.eat_punct(")") {
            arguments.push(self.assignment()?);
            if !self.eat_punct(",") {
                self.expect_punct(")")?;
                break;
            }
        }
        Ok(arguments)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        if self.at_eof() {
            return Err(self.unexpected());
        }
        let token = self.advance();
        match token.kind {
            TokenKind::Number(value) => Ok(Expr::Literal(Literal::Number(value))),
            TokenKind::Str(value) => Ok(Expr::Literal(Literal::String(value))),
            TokenKind::Template { chunks, holes } => {
                let mut parts = Vec::new();
                for (index, chunk) in chunks.into_iter().enumerate() {
                    if !chunk.is_empty() {
                        parts.push(TemplatePart::Text(chunk));
                    }
                    if let Some((source, offset)) = holes.get(index) {
                        let mut nested = Parser::new(source, *offset)?;
                        parts.push(TemplatePart::Expr(nested.parse_complete_expression()?));
                    }
                }
                Ok(Expr::Template(parts))
            }
            TokenKind::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Literal::Bool(true))),
                "false" => Ok(Expr::Literal(Literal::Bool(false))),
                "null" => Ok(Expr::Literal(Literal::Null)),
                "undefined" => Ok(Expr::Literal(Literal::Undefined)),
                _ if RESERVED.contains(&name.as_str()) => Err(ParseError::new(
                    format!("unexpected keyword '{name}'"),
                    token.offset,
                )),
                _ => Ok(Expr::Identifier(name)),
            },
            TokenKind::Punct("(") => {
                let expr = self.expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            TokenKind::Punct("[") => {
                let mut elements = Vec::new();
                while !self.eat_punct("]") {
                    elements.push(self.assignment()?);
                    if !self.eat_punct(",") {
                        self.expect_punct("]")?;
                        break;
                    }
                }
                Ok(Expr::Array(elements))
            }
            TokenKind::Punct("{") => self.object_literal(),
            _ => {
                self.pos -= 1;
                Err(self.unexpected())
            }
        }
    }

    /// Called after the opening brace.
    fn object_literal(&mut self) -> Result<Expr, ParseError> {
        let mut properties = Vec::new();
        while !self.eat_punct("}") {
            if self.at_eof() {
                return Err(self.error_here("expected '}'"));
            }
            let token = self.advance();
            let (key, shorthand) = match token.kind {
                TokenKind::Ident(name) => (PropertyKey::Static(name.clone()), Some(name)),
                TokenKind::Str(text) => (PropertyKey::Static(text), None),
                TokenKind::Number(value) => (PropertyKey::Static(format_key(value)), None),
                TokenKind::Punct("[") => {
                    let key = self.expression()?;
                    self.expect_punct("]")?;
                    (PropertyKey::Computed(key), None)
                }
                _ => {
                    self.pos -= 1;
                    return Err(self.error_here("expected property key"));
                }
            };
            let value = if self.eat_punct(":") {
                self.assignment()?
            } else if let Some(name) = shorthand {
                if RESERVED.contains(&name.as_str()) {
                    return Err(ParseError::new(
                        format!("unexpected keyword '{name}'"),
                        token.offset,
                    ));
                }
                Expr::Identifier(name)
            } else {
                return Err(self.error_here("expected ':'"));
            };
            properties.push(ObjectProperty { key, value });
            if !self.eat_punct(",") {
                self.expect_punct("}")?;
                break;
            }
        }
        Ok(Expr::Object(properties))
    }
}

fn format_key(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

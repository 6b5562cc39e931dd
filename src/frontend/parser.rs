use crate::{
    diagnostics::{Diagnostic, DiagnosticSource, Diagnostics, Severity},
    frontend::{
        SourceFile,
        ast::{
            Alias, Attribute, AttributeKind, BinaryOperatorKind, Block, CaseSelector, Continuing,
            Declaration, DeclarationKind, ExpressionId, ExpressionKind, Function, Identifier,
            Literal, Module, Parameter, PipelineStage, StatementId, StatementKind, Struct,
            StructMember, SwitchClause, TemplateArgument, TypeExpression, TypeExpressionId,
            UnaryOperatorKind, Variable, VariableKind,
        },
        lexer::{Keyword, Span, Token, TokenKind, TokenStream},
    },
    index::Index,
    report_error,
};

/// Guards against stack exhaustion on pathologically nested input
const MAX_PARSE_DEPTH: usize = 128;

/// Deepest expression tree accepted. Later stages walk expressions
/// recursively, and operator chains are parsed without recursion.
pub const MAX_EXPRESSION_DEPTH: usize = 64;

/// How far ahead the parser looks for a synchronization token after an error
const MAX_RESYNC_LOOKAHEAD: usize = 32;

/// The outcome of a grammar rule that may legitimately not apply.
#[must_use]
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed<T> {
    /// The rule matched and produced a value
    Matched(T),
    /// The rule did not apply. No tokens were consumed.
    NoMatch,
    /// The rule started matching but the input was malformed. A diagnostic
    /// has already been recorded.
    Errored,
}

/// Marker for a rule that failed after recording a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Errored;

/// The outcome of a grammar rule that must match
pub type Expect<T> = Result<T, Errored>;

impl<T> Parsed<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Parsed<U> {
        match self {
            Self::Matched(value) => Parsed::Matched(f(value)),
            Self::NoMatch => Parsed::NoMatch,
            Self::Errored => Parsed::Errored,
        }
    }

    pub fn is_errored(&self) -> bool {
        matches!(self, Self::Errored)
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched(_))
    }
}

impl<T> From<Expect<T>> for Parsed<T> {
    fn from(value: Expect<T>) -> Self {
        match value {
            Ok(value) => Self::Matched(value),
            Err(Errored) => Self::Errored,
        }
    }
}

/// Propagates `NoMatch` and `Errored` out of a rule returning [`Parsed`]
macro_rules! matched {
    ($parsed:expr) => {
        match $parsed {
            Parsed::Matched(value) => value,
            Parsed::NoMatch => return Parsed::NoMatch,
            Parsed::Errored => return Parsed::Errored,
        }
    };
}

/// Propagates an [`Expect`] failure out of a rule returning [`Parsed`]
macro_rules! expect {
    ($expect:expr) => {
        match $expect {
            Ok(value) => value,
            Err(Errored) => return Parsed::Errored,
        }
    };
}

#[derive(Debug)]
pub struct ParseOutput {
    pub module: Module,
    pub diagnostics: Diagnostics,
}

#[derive(Debug)]
pub struct Parser<'source> {
    tokens: TokenStream<'source>,
    position: usize,
    last_end: usize,
    module: Module,
    diagnostics: Diagnostics,
    sync_tokens: Vec<TokenKind>,
    synchronized: bool,
    silence_errors: usize,
    parse_depth: usize,
    /// Height of every expression tree parsed so far, by expression index
    expression_depths: Vec<usize>,
}

impl<'source> Parser<'source> {
    pub fn parse_module(source_file: &'source SourceFile, max_errors: usize) -> ParseOutput {
        let mut parser = Self {
            tokens: TokenStream::new(source_file),
            position: 0,
            last_end: 0,
            module: Module::new(),
            diagnostics: Diagnostics::new(max_errors),
            sync_tokens: Vec::new(),
            synchronized: true,
            silence_errors: 0,
            parse_depth: 0,
            expression_depths: Vec::new(),
        };

        parser.translation_unit();

        log::debug!(
            "parsed {} declarations with {} errors",
            parser.module.declarations.len(),
            parser.diagnostics.error_count()
        );

        ParseOutput {
            module: parser.module,
            diagnostics: parser.diagnostics,
        }
    }

    fn source(&self) -> &'source SourceFile {
        self.tokens.source()
    }

    /* Token access */

    fn peek(&mut self) -> Token {
        self.tokens.get(self.position)
    }

    fn peek_nth(&mut self, n: usize) -> Token {
        self.tokens.get(self.position + n)
    }

    fn peek_is(&mut self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn peek_is_keyword(&mut self, keyword: Keyword) -> bool {
        self.peek_is(TokenKind::Keyword(keyword))
    }

    fn next(&mut self) -> Token {
        let token = self.peek();

        if !token.is_eof() {
            self.position += 1;
            self.last_end = token.span.end;
        }

        token
    }

    fn match_token(&mut self, kind: TokenKind) -> Option<Token> {
        if self.peek_is(kind) {
            Some(self.next())
        } else {
            None
        }
    }

    fn match_keyword(&mut self, keyword: Keyword) -> Option<Token> {
        self.match_token(TokenKind::Keyword(keyword))
    }

    fn span_from(&self, start: Span) -> Span {
        Span::new(start.start, self.last_end.max(start.start))
    }

    /* Error handling */

    fn add_error(&mut self, span: Span, message: impl Into<String>) -> Errored {
        if self.silence_errors == 0 {
            let message = message.into();
            report_error!(self.diagnostics, DiagnosticSource::Parser, span, "{message}");
        }

        Errored
    }

    /// Records lexer errors. Returns true if `token` was an error token.
    fn handle_error(&mut self, token: Token) -> bool {
        if let TokenKind::Error(error) = token.kind {
            self.synchronized = false;

            if self.silence_errors == 0 {
                self.diagnostics.add(
                    Diagnostic::error(DiagnosticSource::Lexer, token.span, error.to_string())
                        .with_origin(crate::diagnostic_origin!()),
                );
            }

            return true;
        }

        false
    }

    fn continue_parsing(&self) -> bool {
        self.synchronized && !self.diagnostics.limit_reached()
    }

    fn is_sync_token(&self, kind: TokenKind) -> bool {
        self.sync_tokens.contains(&kind)
    }

    /// Runs `body` with `token` registered as a synchronization point. If the
    /// body errors, tokens are skipped up to and including `token`.
    fn sync<T>(&mut self, token: TokenKind, body: impl FnOnce(&mut Self) -> Parsed<T>) -> Parsed<T> {
        if self.parse_depth >= MAX_PARSE_DEPTH {
            let span = self.peek().span;
            self.add_error(span, "maximum parser recursive depth reached");
            return Parsed::Errored;
        }

        self.parse_depth += 1;
        self.sync_tokens.push(token);

        let result = body(self);

        self.sync_tokens.pop();
        self.parse_depth -= 1;

        if result.is_errored() {
            self.sync_to(token, true);
        }

        result
    }

    fn sync_expect<T>(&mut self, token: TokenKind, body: impl FnOnce(&mut Self) -> Expect<T>) -> Expect<T> {
        match self.sync(token, |p| body(p).into()) {
            Parsed::Matched(value) => Ok(value),
            _ => Err(Errored),
        }
    }

    /// Skips tokens until `token` or any registered synchronization token,
    /// ignoring tokens nested inside balanced delimiters. Returns true if the
    /// parser resynchronized on `token`.
    fn sync_to(&mut self, token: TokenKind, consume: bool) -> bool {
        self.synchronized = false;

        let mut depth = 0usize;

        for i in 0..MAX_RESYNC_LOOKAHEAD {
            let t = self.peek_nth(i);

            if t.is_eof() {
                break;
            }

            let change = t.kind.delimiter_depth_change();

            if t.kind != token && change > 0 {
                depth += 1;
                continue;
            }

            if depth > 0 {
                if change < 0 {
                    depth -= 1;
                }
                continue;
            }

            if t.kind != token && !self.is_sync_token(t.kind) {
                continue;
            }

            for _ in 0..i {
                self.next();
            }

            if t.kind == token {
                if consume {
                    self.next();
                }

                self.synchronized = true;
            }

            return self.synchronized;
        }

        false
    }

    /// Skips to the start of the next module scope declaration
    fn sync_to_declaration(&mut self) {
        let mut depth = 0usize;

        loop {
            let t = self.peek();

            if t.is_eof() {
                break;
            }

            let starts_declaration = matches!(
                t.kind,
                TokenKind::Attr
                    | TokenKind::Keyword(
                        Keyword::Fn
                            | Keyword::Var
                            | Keyword::Const
                            | Keyword::Override
                            | Keyword::Struct
                            | Keyword::Alias
                            | Keyword::ConstAssert
                    )
            );

            if depth == 0 && starts_declaration {
                break;
            }

            match t.kind.delimiter_depth_change() {
                1 => depth += 1,
                -1 => depth = depth.saturating_sub(1),
                _ => {}
            }

            self.next();
        }

        self.synchronized = true;
    }

    /// Consumes `kind` or records an "expected" error
    fn expect(&mut self, usage: &str, kind: TokenKind) -> Expect<Token> {
        let token = self.peek();

        if self.handle_error(token) {
            return Err(Errored);
        }

        if token.kind == kind {
            self.next();
            self.synchronized = true;
            return Ok(token);
        }

        // Template lists may close on the first half of `>>`, `>=` or `>>=`
        if kind == TokenKind::GreaterThan {
            let rest = match token.kind {
                TokenKind::ShiftRight => Some(TokenKind::GreaterThan),
                TokenKind::GreaterThanOrEqualTo => Some(TokenKind::Equals),
                TokenKind::ShiftRightEquals => Some(TokenKind::GreaterThanOrEqualTo),
                _ => None,
            };

            if let Some(rest) = rest {
                self.tokens.split(self.position, TokenKind::GreaterThan, rest);
                let token = self.next();
                self.synchronized = true;
                return Ok(token);
            }
        }

        self.synchronized = false;

        let message = if usage.is_empty() {
            format!("expected {kind}")
        } else {
            format!("expected {kind} for {usage}")
        };

        Err(self.add_error(token.span, message))
    }

    fn expect_identifier(&mut self, usage: &str) -> Expect<Identifier> {
        let token = self.peek();

        if self.handle_error(token) {
            return Err(Errored);
        }

        if token.is_identifier() {
            self.next();
            self.synchronized = true;
            return Ok(self.identifier(token));
        }

        self.synchronized = false;
        Err(self.add_error(token.span, format!("expected identifier for {usage}")))
    }

    fn identifier(&mut self, token: Token) -> Identifier {
        let text = self.source().value_of_span(token.span);
        self.module.identifier(text, token.span)
    }

    /// Parses `open body close`, resynchronizing on `close` if the body fails
    fn expect_block<T>(
        &mut self,
        open: TokenKind,
        close: TokenKind,
        usage: &str,
        body: impl FnOnce(&mut Self) -> Expect<T>,
    ) -> Expect<T> {
        self.expect(usage, open)?;

        self.sync_expect(close, |p| {
            let result = body(p)?;
            p.expect(usage, close)?;
            Ok(result)
        })
    }

    fn expect_paren_block<T>(&mut self, usage: &str, body: impl FnOnce(&mut Self) -> Expect<T>) -> Expect<T> {
        self.expect_block(TokenKind::OpenParen, TokenKind::CloseParen, usage, body)
    }

    fn expect_brace_block<T>(&mut self, usage: &str, body: impl FnOnce(&mut Self) -> Expect<T>) -> Expect<T> {
        self.expect_block(TokenKind::OpenBrace, TokenKind::CloseBrace, usage, body)
    }

    /// Parses `<` ... `>`, splitting `>>`-like tokens as needed
    fn expect_template_block<T>(&mut self, usage: &str, body: impl FnOnce(&mut Self) -> Expect<T>) -> Expect<T> {
        self.expect(usage, TokenKind::LessThan)?;

        self.sync_expect(TokenKind::GreaterThan, |p| {
            let result = body(p)?;
            p.expect(usage, TokenKind::GreaterThan)?;
            Ok(result)
        })
    }

    fn expect_expression(&mut self, usage: &str) -> Expect<ExpressionId> {
        match self.expression() {
            Parsed::Matched(expression) => Ok(expression),
            Parsed::Errored => Err(Errored),
            Parsed::NoMatch => {
                let span = self.peek().span;
                Err(self.add_error(span, format!("expected expression for {usage}")))
            }
        }
    }

    /// A comma separated list with an optional trailing comma, ending before
    /// `end`
    fn expect_list<T>(
        &mut self,
        end: TokenKind,
        mut element: impl FnMut(&mut Self) -> Expect<T>,
    ) -> Expect<Vec<T>> {
        let mut elements = Vec::new();

        while !self.peek_is(end) {
            elements.push(element(self)?);

            if self.match_token(TokenKind::Comma).is_none() {
                break;
            }
        }

        Ok(elements)
    }

    /* Declarations */

    fn translation_unit(&mut self) {
        let mut seen_declaration = false;

        loop {
            if !self.continue_parsing() {
                if self.diagnostics.limit_reached() {
                    break;
                }

                self.sync_to_declaration();
            }

            let token = self.peek();
            if token.is_eof() {
                break;
            }

            match self.enable_directive() {
                Parsed::Matched(()) if seen_declaration => {
                    self.add_error(
                        token.span,
                        "enable directives must come before all global declarations",
                    );
                }
                Parsed::Matched(()) | Parsed::Errored => {}
                Parsed::NoMatch => match self.global_declaration() {
                    Parsed::Matched(()) => seen_declaration = true,
                    Parsed::Errored => seen_declaration = true,
                    Parsed::NoMatch => {
                        if !self.handle_error(token) {
                            self.add_error(token.span, "unexpected token");
                        }

                        self.next();
                    }
                },
            }

            if self.diagnostics.limit_reached() {
                let max_errors = self.diagnostics.max_errors();

                self.diagnostics.add(Diagnostic::new(
                    Severity::Note,
                    DiagnosticSource::Parser,
                    Span::new(token.span.start, token.span.start),
                    format!("stopping after {max_errors} errors"),
                ));
                break;
            }
        }
    }

    /// `enable f16;`
    fn enable_directive(&mut self) -> Parsed<()> {
        if self.match_keyword(Keyword::Enable).is_none() {
            return Parsed::NoMatch;
        }

        self.sync(TokenKind::Semicolon, |p| {
            let extensions = expect!(p.expect_list(TokenKind::Semicolon, |p| p.expect_identifier("enable directive")));

            if extensions.is_empty() {
                let span = p.peek().span;
                return p.add_error(span, "expected identifier for enable directive").into_parsed();
            }

            p.module.enables.extend(extensions);
            expect!(p.expect("enable directive", TokenKind::Semicolon));

            Parsed::Matched(())
        })
    }

    fn global_declaration(&mut self) -> Parsed<()> {
        if self.match_token(TokenKind::Semicolon).is_some() {
            return Parsed::Matched(());
        }

        let start = self.peek().span;
        let (attributes, attributes_errored) = match self.attribute_list() {
            Parsed::Matched(attributes) => (attributes, false),
            Parsed::NoMatch => (Vec::new(), false),
            Parsed::Errored => (Vec::new(), true),
        };

        if !self.continue_parsing() {
            return Parsed::Errored;
        }

        let token = self.peek();

        let declaration = match token.kind {
            TokenKind::Keyword(Keyword::Var | Keyword::Let | Keyword::Const | Keyword::Override) => {
                self.sync(TokenKind::Semicolon, |p| {
                    let variable = matched!(p.variable_declaration(attributes, true));
                    expect!(p.expect("variable declaration", TokenKind::Semicolon));

                    Parsed::Matched(DeclarationKind::Variable(variable))
                })
            }
            TokenKind::Keyword(Keyword::Alias) => self.sync(TokenKind::Semicolon, |p| {
                let alias = matched!(p.type_alias());
                expect!(p.expect("type alias", TokenKind::Semicolon));

                Parsed::Matched(DeclarationKind::Alias(alias))
            }),
            TokenKind::Keyword(Keyword::ConstAssert) => self.sync(TokenKind::Semicolon, |p| {
                p.next();
                let expression = expect!(p.expect_expression("const assertion"));
                expect!(p.expect("const assertion", TokenKind::Semicolon));

                Parsed::Matched(DeclarationKind::ConstAssert(expression))
            }),
            TokenKind::Keyword(Keyword::Struct) => self.struct_declaration().map(DeclarationKind::Struct),
            TokenKind::Keyword(Keyword::Fn) => self.function_declaration(attributes).map(DeclarationKind::Function),
            _ if attributes_errored => Parsed::Errored,
            _ if !attributes.is_empty() => {
                self.add_error(token.span, "expected declaration after attributes");
                Parsed::Errored
            }
            _ => Parsed::NoMatch,
        };

        let kind = matched!(declaration);
        let span = self.span_from(start);

        self.module.declarations.push(Declaration { span, kind });

        if attributes_errored {
            Parsed::Errored
        } else {
            Parsed::Matched(())
        }
    }

    /// `var<space, access> name : type = init`, `let`, `const` and `override`
    fn variable_declaration(&mut self, attributes: Vec<Attribute>, module_scope: bool) -> Parsed<Variable> {
        let start = attributes.first().map(|a| a.span).unwrap_or(self.peek().span);
        let token = self.peek();

        let kind = match token.kind {
            TokenKind::Keyword(Keyword::Var) => {
                self.next();

                let mut address_space = None;
                let mut access = None;

                if self.peek_is(TokenKind::LessThan) {
                    expect!(self.expect_template_block("variable declaration", |p| {
                        address_space = Some(p.expect_identifier("address space")?);

                        if p.match_token(TokenKind::Comma).is_some() && !p.peek_is(TokenKind::GreaterThan) {
                            access = Some(p.expect_identifier("access mode")?);
                        }

                        p.match_token(TokenKind::Comma);
                        Ok(())
                    }));
                }

                VariableKind::Var {
                    address_space,
                    access,
                }
            }
            TokenKind::Keyword(Keyword::Let) => {
                self.next();

                if module_scope {
                    self.add_error(token.span, "module-scope 'let' is invalid, use 'const'");
                }

                VariableKind::Let
            }
            TokenKind::Keyword(Keyword::Const) => {
                self.next();
                VariableKind::Const
            }
            TokenKind::Keyword(Keyword::Override) => {
                self.next();

                if !module_scope {
                    self.add_error(token.span, "'override' declarations are only valid at module scope");
                }

                VariableKind::Override
            }
            _ => return Parsed::NoMatch,
        };

        let usage = match kind {
            VariableKind::Var { .. } => "variable declaration",
            VariableKind::Let => "let declaration",
            VariableKind::Const => "const declaration",
            VariableKind::Override => "override declaration",
        };

        let name = expect!(self.expect_identifier(usage));

        let ty = if self.match_token(TokenKind::Colon).is_some() {
            Some(expect!(self.expect_type(usage)))
        } else {
            None
        };

        let initializer = if self.match_token(TokenKind::Equals).is_some() {
            Some(expect!(self.expect_expression(usage)))
        } else {
            if matches!(kind, VariableKind::Let | VariableKind::Const) {
                let span = self.peek().span;
                return self.add_error(span, format!("expected '=' for {usage}")).into_parsed();
            }

            None
        };

        Parsed::Matched(Variable {
            span: self.span_from(start),
            attributes,
            kind,
            name,
            ty,
            initializer,
        })
    }

    /// `alias name = type`
    fn type_alias(&mut self) -> Parsed<Alias> {
        let Some(token) = self.match_keyword(Keyword::Alias) else {
            return Parsed::NoMatch;
        };

        let name = expect!(self.expect_identifier("type alias"));
        expect!(self.expect("type alias", TokenKind::Equals));
        let ty = expect!(self.expect_type("type alias"));

        Parsed::Matched(Alias {
            span: self.span_from(token.span),
            name,
            ty,
        })
    }

    fn struct_declaration(&mut self) -> Parsed<Struct> {
        let Some(token) = self.match_keyword(Keyword::Struct) else {
            return Parsed::NoMatch;
        };

        let name = expect!(self.expect_identifier("struct declaration"));

        let members = expect!(self.expect_brace_block("struct declaration", |p| {
            p.expect_list(TokenKind::CloseBrace, |p| {
                let start = p.peek().span;
                let attributes = match p.attribute_list() {
                    Parsed::Matched(attributes) => attributes,
                    Parsed::NoMatch => Vec::new(),
                    Parsed::Errored => return Err(Errored),
                };

                let name = p.expect_identifier("struct member")?;
                p.expect("struct member", TokenKind::Colon)?;
                let ty = p.expect_type("struct member")?;

                Ok(StructMember {
                    span: p.span_from(start),
                    attributes,
                    name,
                    ty,
                })
            })
        }));

        Parsed::Matched(Struct {
            span: self.span_from(token.span),
            name,
            members,
        })
    }

    fn function_declaration(&mut self, attributes: Vec<Attribute>) -> Parsed<Function> {
        let start = attributes.first().map(|a| a.span).unwrap_or(self.peek().span);

        if self.match_keyword(Keyword::Fn).is_none() {
            return Parsed::NoMatch;
        }

        let mut errored = false;

        let name = expect!(self.expect_identifier("function declaration"));

        let parameters = match self.expect_paren_block("function declaration", |p| {
            p.expect_list(TokenKind::CloseParen, |p| p.expect_parameter())
        }) {
            Ok(parameters) => parameters,
            Err(Errored) => {
                errored = true;
                Vec::new()
            }
        };

        let mut return_attributes = Vec::new();
        let mut return_type = None;

        if self.match_token(TokenKind::Arrow).is_some() {
            match self.attribute_list() {
                Parsed::Matched(attributes) => return_attributes = attributes,
                Parsed::NoMatch => {}
                Parsed::Errored => errored = true,
            }

            match self.expect_type("function return type") {
                Ok(ty) => return_type = Some(ty),
                Err(Errored) => {
                    errored = true;
                    // Skip to the body so it can still be parsed
                    self.sync_to(TokenKind::OpenBrace, false);
                }
            }
        }

        let body = expect!(self.expect_compound_statement("function body"));

        if errored {
            return Parsed::Errored;
        }

        Parsed::Matched(Function {
            span: self.span_from(start),
            attributes,
            name,
            parameters,
            return_attributes,
            return_type,
            body,
        })
    }

    fn expect_parameter(&mut self) -> Expect<Parameter> {
        let start = self.peek().span;

        let attributes = match self.attribute_list() {
            Parsed::Matched(attributes) => attributes,
            Parsed::NoMatch => Vec::new(),
            Parsed::Errored => return Err(Errored),
        };

        let name = self.expect_identifier("parameter")?;
        self.expect("parameter", TokenKind::Colon)?;
        let ty = self.expect_type("parameter")?;

        Ok(Parameter {
            span: self.span_from(start),
            attributes,
            name,
            ty,
        })
    }

    /* Attributes */

    fn attribute_list(&mut self) -> Parsed<Vec<Attribute>> {
        let mut attributes = Vec::new();

        loop {
            match self.attribute() {
                Parsed::Matched(attribute) => attributes.push(attribute),
                Parsed::NoMatch => break,
                Parsed::Errored => return Parsed::Errored,
            }
        }

        if attributes.is_empty() {
            Parsed::NoMatch
        } else {
            Parsed::Matched(attributes)
        }
    }

    fn attribute(&mut self) -> Parsed<Attribute> {
        let Some(at) = self.match_token(TokenKind::Attr) else {
            return Parsed::NoMatch;
        };

        let name = expect!(self.expect_identifier("attribute"));
        let text = self.module.name(name).to_string();

        let kind = match text.as_str() {
            "vertex" => AttributeKind::Stage(PipelineStage::Vertex),
            "fragment" => AttributeKind::Stage(PipelineStage::Fragment),
            "compute" => AttributeKind::Stage(PipelineStage::Compute),
            "invariant" => AttributeKind::Invariant,
            "group" | "binding" | "id" | "location" | "align" | "size" => {
                let usage = format!("{text} attribute");
                let value = expect!(self.expect_paren_block(&usage, |p| {
                    let value = p.expect_expression(&usage)?;
                    p.match_token(TokenKind::Comma);
                    Ok(value)
                }));

                match text.as_str() {
                    "group" => AttributeKind::Group(value),
                    "binding" => AttributeKind::Binding(value),
                    "id" => AttributeKind::Id(value),
                    "location" => AttributeKind::Location(value),
                    "align" => AttributeKind::Align(value),
                    _ => AttributeKind::Size(value),
                }
            }
            "workgroup_size" => {
                let dimensions = expect!(self.expect_paren_block("workgroup_size attribute", |p| {
                    let dimensions = p.expect_list(TokenKind::CloseParen, |p| {
                        p.expect_expression("workgroup_size attribute")
                    })?;

                    if dimensions.is_empty() || dimensions.len() > 3 {
                        let span = p.peek().span;
                        return Err(p.add_error(span, "expected 1 to 3 values for workgroup_size attribute"));
                    }

                    Ok(dimensions)
                }));

                AttributeKind::WorkgroupSize {
                    x: dimensions[0],
                    y: dimensions.get(1).copied(),
                    z: dimensions.get(2).copied(),
                }
            }
            "builtin" => {
                let builtin = expect!(self.expect_paren_block("builtin attribute", |p| {
                    let builtin = p.expect_identifier("builtin attribute")?;
                    p.match_token(TokenKind::Comma);
                    Ok(builtin)
                }));

                AttributeKind::Builtin(builtin)
            }
            "interpolate" => {
                let (kind, sampling) = expect!(self.expect_paren_block("interpolate attribute", |p| {
                    let kind = p.expect_identifier("interpolation type")?;
                    let mut sampling = None;

                    if p.match_token(TokenKind::Comma).is_some() && !p.peek_is(TokenKind::CloseParen) {
                        sampling = Some(p.expect_identifier("interpolation sampling")?);
                        p.match_token(TokenKind::Comma);
                    }

                    Ok((kind, sampling))
                }));

                AttributeKind::Interpolate { kind, sampling }
            }
            _ => {
                return self.add_error(name.span, format!("unknown attribute '{text}'")).into_parsed();
            }
        };

        Parsed::Matched(Attribute {
            span: self.span_from(at.span),
            kind,
        })
    }

    /* Types */

    fn expect_type(&mut self, usage: &str) -> Expect<TypeExpressionId> {
        let name = self.expect_identifier(usage)?;
        self.expect_type_after_name(name)
    }

    fn expect_type_after_name(&mut self, name: Identifier) -> Expect<TypeExpressionId> {
        let mut template = Vec::new();

        if self.peek_is(TokenKind::LessThan) {
            template = self.expect_template_block("template argument list", |p| {
                p.expect_list(TokenKind::GreaterThan, |p| p.expect_template_argument())
            })?;
        }

        Ok(self.module.add_type(TypeExpression {
            span: self.span_from(name.span),
            name,
            template,
        }))
    }

    fn expect_template_argument(&mut self) -> Expect<TemplateArgument> {
        let token = self.peek();

        if token.is_identifier() {
            self.next();
            let name = self.identifier(token);
            return Ok(TemplateArgument::Type(self.expect_type_after_name(name)?));
        }

        match self.element_count_expression() {
            Parsed::Matched(expression) => Ok(TemplateArgument::Expression(expression)),
            Parsed::Errored => Err(Errored),
            Parsed::NoMatch => {
                if self.handle_error(token) {
                    return Err(Errored);
                }

                Err(self.add_error(token.span, "expected type or expression for template argument"))
            }
        }
    }

    /* Statements */

    fn expect_compound_statement(&mut self, usage: &str) -> Expect<Block> {
        let start = self.peek().span;
        let statements = self.expect_brace_block(usage, |p| p.expect_statements())?;

        Ok(Block {
            span: self.span_from(start),
            statements,
        })
    }

    fn expect_statements(&mut self) -> Expect<Vec<StatementId>> {
        let mut errored = false;
        let mut statements = Vec::new();

        while self.continue_parsing() {
            match self.statement() {
                Parsed::Matched(statement) => statements.push(statement),
                Parsed::Errored => errored = true,
                Parsed::NoMatch => break,
            }
        }

        if errored { Err(Errored) } else { Ok(statements) }
    }

    fn statement(&mut self) -> Parsed<StatementId> {
        // Skip empty statements
        while self.match_token(TokenKind::Semicolon).is_some() {}

        let start = self.peek().span;

        let kind = match self.peek().kind {
            TokenKind::Keyword(Keyword::If) => self.if_statement(),
            TokenKind::Keyword(Keyword::Switch) => self.switch_statement(),
            TokenKind::Keyword(Keyword::Loop) => self.loop_statement(),
            TokenKind::Keyword(Keyword::For) => self.for_statement(),
            TokenKind::Keyword(Keyword::While) => self.while_statement(),
            TokenKind::OpenBrace => {
                self.expect_compound_statement("block statement").map(StatementKind::Block).into()
            }
            _ => {
                return self.sync(TokenKind::Semicolon, |p| p.non_block_statement());
            }
        };

        let kind = matched!(kind);
        Parsed::Matched(self.module.add_statement(kind, self.span_from(start)))
    }

    /// Statements terminated by a semicolon
    fn non_block_statement(&mut self) -> Parsed<StatementId> {
        let start = self.peek().span;
        let token = self.peek();

        let (kind, usage) = match token.kind {
            TokenKind::Keyword(Keyword::Return) => {
                self.next();

                let value = if self.peek_is(TokenKind::Semicolon) {
                    None
                } else {
                    Some(expect!(self.expect_expression("return statement")))
                };

                (StatementKind::Return(value), "return statement")
            }
            TokenKind::Keyword(Keyword::Var | Keyword::Let | Keyword::Const | Keyword::Override) => {
                let variable = matched!(self.variable_declaration(Vec::new(), false));
                (StatementKind::Variable(variable), "variable declaration")
            }
            TokenKind::Keyword(Keyword::Break) => {
                // `break if` belongs to the enclosing continuing block
                if self.peek_nth(1).kind == TokenKind::Keyword(Keyword::If) {
                    return Parsed::NoMatch;
                }

                self.next();
                (StatementKind::Break, "break statement")
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.next();
                (StatementKind::Continue, "continue statement")
            }
            TokenKind::Keyword(Keyword::Discard) => {
                self.next();
                (StatementKind::Discard, "discard statement")
            }
            TokenKind::Keyword(Keyword::ConstAssert) => {
                self.next();
                let expression = expect!(self.expect_expression("const assertion"));
                (StatementKind::ConstAssert(expression), "const assertion")
            }
            TokenKind::Identifier if self.peek_nth(1).kind == TokenKind::OpenParen => {
                let call = expect!(self.expect_call_statement());
                (call, "function call")
            }
            _ => (matched!(self.variable_updating_statement()), "assignment statement"),
        };

        expect!(self.expect(usage, TokenKind::Semicolon));

        Parsed::Matched(self.module.add_statement(kind, self.span_from(start)))
    }

    fn expect_call_statement(&mut self) -> Expect<StatementKind> {
        let token = self.next();
        let name = self.identifier(token);
        let callee = self.expect_type_after_name(name)?;
        let call = self.expect_call_arguments(callee, name.span)?;

        Ok(StatementKind::Call(call))
    }

    /// Assignment, compound assignment, increment, decrement and phony
    /// assignment
    fn variable_updating_statement(&mut self) -> Parsed<StatementKind> {
        if self.match_token(TokenKind::Underscore).is_some() {
            expect!(self.expect("phony assignment", TokenKind::Equals));
            let value = expect!(self.expect_expression("phony assignment"));
            return Parsed::Matched(StatementKind::Phony(value));
        }

        let lhs = matched!(self.unary_expression());
        let token = self.peek();

        let kind = match token.kind {
            TokenKind::Equals => {
                self.next();
                let rhs = expect!(self.expect_expression("assignment"));
                StatementKind::Assignment { lhs, rhs }
            }
            TokenKind::PlusPlus => {
                self.next();
                StatementKind::Increment(lhs)
            }
            TokenKind::MinusMinus => {
                self.next();
                StatementKind::Decrement(lhs)
            }
            kind if kind.is_compound_assignment_operator() => {
                self.next();
                let operator = compound_assignment_operator(kind);
                let rhs = expect!(self.expect_expression("compound assignment"));
                StatementKind::CompoundAssignment { lhs, operator, rhs }
            }
            _ => {
                if self.handle_error(token) {
                    return Parsed::Errored;
                }

                return self.add_error(token.span, "expected '=' for assignment").into_parsed();
            }
        };

        Parsed::Matched(kind)
    }

    fn if_statement(&mut self) -> Parsed<StatementKind> {
        if self.match_keyword(Keyword::If).is_none() {
            return Parsed::NoMatch;
        }

        let condition = expect!(self.expect_expression("if statement"));
        let accept = expect!(self.expect_compound_statement("if statement"));

        let mut reject = None;

        if let Some(else_token) = self.match_keyword(Keyword::Else) {
            let kind = if self.peek_is_keyword(Keyword::If) {
                matched!(self.if_statement())
            } else {
                StatementKind::Block(expect!(self.expect_compound_statement("else statement")))
            };

            reject = Some(self.module.add_statement(kind, self.span_from(else_token.span)));
        }

        Parsed::Matched(StatementKind::If {
            condition,
            accept,
            reject,
        })
    }

    fn switch_statement(&mut self) -> Parsed<StatementKind> {
        if self.match_keyword(Keyword::Switch).is_none() {
            return Parsed::NoMatch;
        }

        let selector = expect!(self.expect_expression("switch statement"));

        let clauses = expect!(self.expect_brace_block("switch statement", |p| {
            let mut clauses = Vec::new();
            let mut errored = false;

            while p.continue_parsing() {
                match p.switch_clause() {
                    Parsed::Matched(clause) => clauses.push(clause),
                    Parsed::Errored => errored = true,
                    Parsed::NoMatch => break,
                }
            }

            if errored { Err(Errored) } else { Ok(clauses) }
        }));

        Parsed::Matched(StatementKind::Switch { selector, clauses })
    }

    fn switch_clause(&mut self) -> Parsed<SwitchClause> {
        let start = self.peek().span;

        let selectors = if self.match_keyword(Keyword::Default).is_some() {
            vec![CaseSelector::Default]
        } else if self.match_keyword(Keyword::Case).is_some() {
            expect!(self.expect_list(TokenKind::Colon, |p| {
                if p.match_keyword(Keyword::Default).is_some() {
                    return Ok(CaseSelector::Default);
                }

                Ok(CaseSelector::Expression(p.expect_expression("case selector")?))
            }))
        } else {
            return Parsed::NoMatch;
        };

        if selectors.is_empty() {
            let span = self.peek().span;
            return self.add_error(span, "expected case selector expression or 'default'").into_parsed();
        }

        self.match_token(TokenKind::Colon);
        let body = expect!(self.expect_compound_statement("case statement"));

        Parsed::Matched(SwitchClause {
            span: self.span_from(start),
            selectors,
            body,
        })
    }

    fn loop_statement(&mut self) -> Parsed<StatementKind> {
        if self.match_keyword(Keyword::Loop).is_none() {
            return Parsed::NoMatch;
        }

        let start = self.peek().span;

        let (statements, continuing) = expect!(self.expect_brace_block("loop", |p| {
            let statements = p.expect_statements()?;
            let continuing = p.continuing_statement()?;
            Ok((statements, continuing))
        }));

        Parsed::Matched(StatementKind::Loop {
            body: Block {
                span: self.span_from(start),
                statements,
            },
            continuing,
        })
    }

    fn continuing_statement(&mut self) -> Expect<Option<Continuing>> {
        let Some(token) = self.match_keyword(Keyword::Continuing) else {
            return Ok(None);
        };

        let start = self.peek().span;

        let (statements, break_if) = self.expect_brace_block("continuing", |p| {
            let statements = p.expect_statements()?;

            let mut break_if = None;
            if p.peek_is_keyword(Keyword::Break) && p.peek_nth(1).kind == TokenKind::Keyword(Keyword::If) {
                p.next();
                p.next();
                break_if = Some(p.expect_expression("break if statement")?);
                p.expect("break if statement", TokenKind::Semicolon)?;
            }

            Ok((statements, break_if))
        })?;

        Ok(Some(Continuing {
            span: self.span_from(token.span),
            body: Block {
                span: self.span_from(start),
                statements,
            },
            break_if,
        }))
    }

    fn for_statement(&mut self) -> Parsed<StatementKind> {
        if self.match_keyword(Keyword::For).is_none() {
            return Parsed::NoMatch;
        }

        let (initializer, condition, update) = expect!(self.expect_paren_block("for loop", |p| {
            let initializer = p.for_header_statement(true)?;
            p.expect("initializer in for loop", TokenKind::Semicolon)?;

            let condition = match p.expression() {
                Parsed::Matched(condition) => Some(condition),
                Parsed::NoMatch => None,
                Parsed::Errored => return Err(Errored),
            };
            p.expect("condition in for loop", TokenKind::Semicolon)?;

            let update = p.for_header_statement(false)?;

            Ok((initializer, condition, update))
        }));

        let body = expect!(self.expect_compound_statement("for loop"));

        Parsed::Matched(StatementKind::For {
            initializer,
            condition,
            update,
            body,
        })
    }

    fn for_header_statement(&mut self, allow_declaration: bool) -> Expect<Option<StatementId>> {
        let start = self.peek().span;
        let token = self.peek();

        let kind = match token.kind {
            TokenKind::Keyword(Keyword::Var | Keyword::Let | Keyword::Const) if allow_declaration => {
                match self.variable_declaration(Vec::new(), false) {
                    Parsed::Matched(variable) => StatementKind::Variable(variable),
                    Parsed::NoMatch => return Ok(None),
                    Parsed::Errored => return Err(Errored),
                }
            }
            TokenKind::Identifier if self.peek_nth(1).kind == TokenKind::OpenParen => {
                self.expect_call_statement()?
            }
            TokenKind::Semicolon | TokenKind::CloseParen => return Ok(None),
            _ => match self.variable_updating_statement() {
                Parsed::Matched(kind) => kind,
                Parsed::NoMatch => return Ok(None),
                Parsed::Errored => return Err(Errored),
            },
        };

        Ok(Some(self.module.add_statement(kind, self.span_from(start))))
    }

    fn while_statement(&mut self) -> Parsed<StatementKind> {
        if self.match_keyword(Keyword::While).is_none() {
            return Parsed::NoMatch;
        }

        let condition = expect!(self.expect_expression("while loop"));
        let body = expect!(self.expect_compound_statement("while loop"));

        Parsed::Matched(StatementKind::While { condition, body })
    }

    /* Expressions */

    fn add_expression(&mut self, kind: ExpressionKind, start: Span) -> ExpressionId {
        let span = self.span_from(start);

        let depth_of = |id: &ExpressionId| self.expression_depths.get(id.index()).copied().unwrap_or(0);
        let depth = 1 + match &kind {
            ExpressionKind::Literal(_) | ExpressionKind::Identifier(_) => 0,
            ExpressionKind::Call { arguments, .. } => arguments.iter().map(depth_of).max().unwrap_or(0),
            ExpressionKind::Index { base, index } => depth_of(base).max(depth_of(index)),
            ExpressionKind::Member { base: inner, .. }
            | ExpressionKind::Unary { operand: inner, .. }
            | ExpressionKind::Grouping(inner) => depth_of(inner),
            ExpressionKind::Binary { lhs, rhs, .. } => depth_of(lhs).max(depth_of(rhs)),
        };

        // Reported once, where the limit is first crossed
        if depth == MAX_EXPRESSION_DEPTH + 1 {
            self.add_error(span, format!("expression is nested more than {MAX_EXPRESSION_DEPTH} levels deep"));
        }

        let id = self.module.add_expression(kind, span);

        if self.expression_depths.len() <= id.index() {
            self.expression_depths.resize(id.index() + 1, 0);
        }
        self.expression_depths[id.index()] = depth;

        id
    }

    fn binary(&mut self, lhs: ExpressionId, operator: BinaryOperatorKind, rhs: ExpressionId) -> ExpressionId {
        let start = self.module.expression(lhs).span;
        self.add_expression(ExpressionKind::Binary { lhs, operator, rhs }, start)
    }

    fn expect_unary_operand(&mut self, operator: TokenKind) -> Expect<ExpressionId> {
        match self.unary_expression() {
            Parsed::Matched(expression) => Ok(expression),
            Parsed::Errored => Err(Errored),
            Parsed::NoMatch => {
                let span = self.peek().span;
                Err(self.add_error(span, format!("unable to parse right side of {operator} expression")))
            }
        }
    }

    pub(crate) fn expression(&mut self) -> Parsed<ExpressionId> {
        let lhs = matched!(self.unary_expression());

        match self.bitwise_expression_post_unary(lhs) {
            Parsed::Matched(expression) => return Parsed::Matched(expression),
            Parsed::Errored => return Parsed::Errored,
            Parsed::NoMatch => {}
        }

        let mut expression = expect!(self.expect_relational_expression_post_unary(lhs));

        let logical = self.peek().kind;
        let operator = match logical {
            TokenKind::LogicalAnd => BinaryOperatorKind::LogicalAnd,
            TokenKind::LogicalOr => BinaryOperatorKind::LogicalOr,
            _ => return Parsed::Matched(expression),
        };

        while self.match_token(logical).is_some() {
            let rhs = expect!(self.expect_unary_operand(logical));
            let rhs = expect!(self.expect_relational_expression_post_unary(rhs));

            expression = self.binary(expression, operator, rhs);

            let next = self.peek();
            if matches!(next.kind, TokenKind::LogicalAnd | TokenKind::LogicalOr) && next.kind != logical {
                return self.add_error(next.span, "mixing '&&' and '||' requires parenthesis").into_parsed();
            }
        }

        Parsed::Matched(expression)
    }

    fn bitwise_expression_post_unary(&mut self, lhs: ExpressionId) -> Parsed<ExpressionId> {
        let token = self.peek().kind;

        let operator = match token {
            TokenKind::BitwiseAnd => BinaryOperatorKind::BitwiseAnd,
            TokenKind::BitwiseOr => BinaryOperatorKind::BitwiseOr,
            TokenKind::BitwiseXor => BinaryOperatorKind::BitwiseXor,
            _ => return Parsed::NoMatch,
        };

        let mut expression = lhs;

        while self.match_token(token).is_some() {
            let rhs = expect!(self.expect_unary_operand(token));
            expression = self.binary(expression, operator, rhs);
        }

        let next = self.peek();
        if matches!(
            next.kind,
            TokenKind::BitwiseAnd | TokenKind::BitwiseOr | TokenKind::BitwiseXor
        ) {
            return self
                .add_error(next.span, format!("mixing {token} and {} requires parenthesis", next.kind))
                .into_parsed();
        }

        Parsed::Matched(expression)
    }

    fn expect_relational_expression_post_unary(&mut self, lhs: ExpressionId) -> Expect<ExpressionId> {
        let lhs = self.expect_shift_expression_post_unary(lhs)?;

        let token = self.peek().kind;
        let operator = match token {
            TokenKind::LessThan => BinaryOperatorKind::LessThan,
            TokenKind::GreaterThan => BinaryOperatorKind::GreaterThan,
            TokenKind::LessThanOrEqualTo => BinaryOperatorKind::LessThanOrEqualTo,
            TokenKind::GreaterThanOrEqualTo => BinaryOperatorKind::GreaterThanOrEqualTo,
            TokenKind::DoubleEquals => BinaryOperatorKind::Equals,
            TokenKind::NotEquals => BinaryOperatorKind::NotEquals,
            _ => return Ok(lhs),
        };

        self.next();

        let rhs = self.expect_unary_operand(token)?;
        let rhs = self.expect_shift_expression_post_unary(rhs)?;

        Ok(self.binary(lhs, operator, rhs))
    }

    fn expect_shift_expression_post_unary(&mut self, lhs: ExpressionId) -> Expect<ExpressionId> {
        let token = self.peek().kind;

        let operator = match token {
            TokenKind::ShiftLeft => BinaryOperatorKind::ShiftLeft,
            TokenKind::ShiftRight => BinaryOperatorKind::ShiftRight,
            _ => return self.expect_math_expression_post_unary(lhs),
        };

        self.next();
        let rhs = self.expect_unary_operand(token)?;

        Ok(self.binary(lhs, operator, rhs))
    }

    fn expect_math_expression_post_unary(&mut self, lhs: ExpressionId) -> Expect<ExpressionId> {
        let lhs = self.expect_multiplicative_expression_post_unary(lhs)?;
        self.expect_additive_expression_post_multiplicative(lhs)
    }

    fn expect_multiplicative_expression_post_unary(&mut self, mut lhs: ExpressionId) -> Expect<ExpressionId> {
        loop {
            let token = self.peek().kind;

            let operator = match token {
                TokenKind::Asterisk => BinaryOperatorKind::Multiply,
                TokenKind::Divide => BinaryOperatorKind::Divide,
                TokenKind::Modulus => BinaryOperatorKind::Modulus,
                _ => return Ok(lhs),
            };

            self.next();
            let rhs = self.expect_unary_operand(token)?;
            lhs = self.binary(lhs, operator, rhs);
        }
    }

    fn expect_additive_expression_post_multiplicative(&mut self, mut lhs: ExpressionId) -> Expect<ExpressionId> {
        loop {
            let token = self.peek().kind;

            let operator = match token {
                TokenKind::Plus => BinaryOperatorKind::Add,
                TokenKind::Minus => BinaryOperatorKind::Subtract,
                _ => return Ok(lhs),
            };

            self.next();
            let rhs = self.expect_unary_operand(token)?;
            let rhs = self.expect_multiplicative_expression_post_unary(rhs)?;
            lhs = self.binary(lhs, operator, rhs);
        }
    }

    /// Array counts and other template values: no relational or shift
    /// operators, since `>` closes the template list
    fn element_count_expression(&mut self) -> Parsed<ExpressionId> {
        let lhs = matched!(self.unary_expression());

        match self.bitwise_expression_post_unary(lhs) {
            Parsed::NoMatch => self.expect_math_expression_post_unary(lhs).into(),
            other => other,
        }
    }

    fn unary_expression(&mut self) -> Parsed<ExpressionId> {
        let token = self.peek();

        let operator = match token.kind {
            TokenKind::Minus => UnaryOperatorKind::Negate,
            TokenKind::Bang => UnaryOperatorKind::LogicalNot,
            TokenKind::Tilde => UnaryOperatorKind::BitwiseNot,
            TokenKind::Asterisk => UnaryOperatorKind::Deref,
            TokenKind::BitwiseAnd => UnaryOperatorKind::AddressOf,
            TokenKind::LogicalAnd => {
                // `&&x` is `&(&x)`
                self.tokens
                    .split(self.position, TokenKind::BitwiseAnd, TokenKind::BitwiseAnd);
                UnaryOperatorKind::AddressOf
            }
            _ => return self.singular_expression(),
        };

        if self.parse_depth >= MAX_PARSE_DEPTH {
            return self.add_error(token.span, "maximum parser recursive depth reached").into_parsed();
        }

        self.next();

        self.parse_depth += 1;
        let operand = self.expect_unary_operand(token.kind);
        self.parse_depth -= 1;

        let operand = expect!(operand);

        Parsed::Matched(self.add_expression(ExpressionKind::Unary { operator, operand }, token.span))
    }

    fn singular_expression(&mut self) -> Parsed<ExpressionId> {
        let start = self.peek().span;
        let mut expression = matched!(self.primary_expression());

        loop {
            if self.match_token(TokenKind::OpenBracket).is_some() {
                let index = expect!(self.sync_expect(TokenKind::CloseBracket, |p| {
                    let index = p.expect_expression("index accessor")?;
                    p.expect("index accessor", TokenKind::CloseBracket)?;
                    Ok(index)
                }));

                expression = self.add_expression(
                    ExpressionKind::Index {
                        base: expression,
                        index,
                    },
                    start,
                );
            } else if self.match_token(TokenKind::Period).is_some() {
                let member = expect!(self.expect_identifier("member accessor"));

                expression = self.add_expression(
                    ExpressionKind::Member {
                        base: expression,
                        member,
                    },
                    start,
                );
            } else {
                return Parsed::Matched(expression);
            }
        }
    }

    fn primary_expression(&mut self) -> Parsed<ExpressionId> {
        let token = self.peek();

        if self.handle_error(token) {
            return Parsed::Errored;
        }

        match token.kind {
            TokenKind::BoolLiteral(value) => {
                self.next();
                Parsed::Matched(self.add_expression(ExpressionKind::Literal(Literal::Bool(value)), token.span))
            }
            TokenKind::IntLiteral(value, suffix) => {
                self.next();
                Parsed::Matched(self.add_expression(
                    ExpressionKind::Literal(Literal::Int(value, suffix)),
                    token.span,
                ))
            }
            TokenKind::FloatLiteral(value, suffix) => {
                self.next();
                Parsed::Matched(self.add_expression(
                    ExpressionKind::Literal(Literal::Float(value, suffix)),
                    token.span,
                ))
            }
            TokenKind::OpenParen => {
                let inner = expect!(self.expect_paren_block("", |p| p.expect_expression("parenthesized expression")));
                Parsed::Matched(self.add_expression(ExpressionKind::Grouping(inner), token.span))
            }
            TokenKind::Identifier => {
                self.next();
                let name = self.identifier(token);

                let has_template =
                    is_templated_type_name(self.module.name(name)) && self.peek_is(TokenKind::LessThan);

                if has_template || self.peek_is(TokenKind::OpenParen) {
                    let callee = expect!(self.expect_type_after_name(name));

                    if !self.peek_is(TokenKind::OpenParen) {
                        let span = self.peek().span;
                        return self.add_error(span, "expected '(' for type initializer").into_parsed();
                    }

                    return self.expect_call_arguments(callee, token.span).into();
                }

                Parsed::Matched(self.add_expression(ExpressionKind::Identifier(name), token.span))
            }
            _ => Parsed::NoMatch,
        }
    }

    fn expect_call_arguments(&mut self, callee: TypeExpressionId, start: Span) -> Expect<ExpressionId> {
        let arguments = self.expect_paren_block("function call", |p| {
            p.expect_list(TokenKind::CloseParen, |p| p.expect_expression("argument list"))
        })?;

        Ok(self.add_expression(ExpressionKind::Call { callee, arguments }, start))
    }
}

impl Errored {
    fn into_parsed<T>(self) -> Parsed<T> {
        Parsed::Errored
    }
}

fn compound_assignment_operator(kind: TokenKind) -> BinaryOperatorKind {
    match kind {
        TokenKind::PlusEquals => BinaryOperatorKind::Add,
        TokenKind::MinusEquals => BinaryOperatorKind::Subtract,
        TokenKind::MultiplyEquals => BinaryOperatorKind::Multiply,
        TokenKind::DivideEquals => BinaryOperatorKind::Divide,
        TokenKind::ModulusEquals => BinaryOperatorKind::Modulus,
        TokenKind::BitwiseAndEquals => BinaryOperatorKind::BitwiseAnd,
        TokenKind::BitwiseOrEquals => BinaryOperatorKind::BitwiseOr,
        TokenKind::BitwiseXorEquals => BinaryOperatorKind::BitwiseXor,
        TokenKind::ShiftLeftEquals => BinaryOperatorKind::ShiftLeft,
        _ => BinaryOperatorKind::ShiftRight,
    }
}

/// Builtin type names which take a template list in expression position,
/// e.g. `vec3<f32>(...)`
fn is_templated_type_name(name: &str) -> bool {
    matches!(
        name,
        "vec2" | "vec3" | "vec4" | "array" | "ptr" | "atomic" | "bitcast"
    ) || (name.starts_with("mat") && name.len() == 6)
        || name.starts_with("texture_")
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::{diagnostics::DEFAULT_MAX_ERRORS, frontend::ast::printer::print_module};

    fn parse(source: &str) -> (ParseOutput, SourceFile) {
        let source = SourceFile::from_memory(source);
        (Parser::parse_module(&source, DEFAULT_MAX_ERRORS), source)
    }

    fn messages(output: &ParseOutput) -> Vec<String> {
        output.diagnostics.iter().map(|d| d.message.clone()).collect()
    }

    #[test]
    fn parses_vertex_entry_point() {
        let (output, _) = parse(
            "@vertex fn main() -> @builtin(position) vec4<f32> { return vec4<f32>(0.0,0.0,0.0,1.0); }",
        );

        assert!(output.diagnostics.is_empty(), "{:?}", messages(&output));
        assert_eq!(
            print_module(&output.module),
            indoc! {"
                @vertex
                fn main() -> @builtin(position) vec4<f32> {
                  return vec4<f32>(0.0, 0.0, 0.0, 1.0);
                }
            "}
        );
    }

    #[test]
    fn parses_module_scope_declarations() {
        let (output, _) = parse(indoc! {"
            enable f16;
            struct S { a : f32, b : array<vec4<u32>, 4>, }
            alias Float = f32;
            const N = 4u;
            @id(3) override scale : f32 = 1.5;
            @group(0) @binding(1) var<storage, read_write> buffer : S;
            const_assert N > 2u;
        "});

        assert!(output.diagnostics.is_empty(), "{:?}", messages(&output));
        assert_eq!(
            print_module(&output.module),
            indoc! {"
                enable f16;

                struct S {
                  a : f32,
                  b : array<vec4<u32>, 4>,
                }

                alias Float = f32;

                const N = 4u;

                @id(3) override scale : f32 = 1.5;

                @group(0) @binding(1) var<storage, read_write> buffer : S;

                const_assert (N > 2u);
            "}
        );
    }

    #[test]
    fn parses_control_flow() {
        let (output, _) = parse(indoc! {"
            fn f(n : i32) -> i32 {
              var total = 0;
              for (var i = 0; i < n; i++) {
                if i % 2 == 0 { continue; } else if i > 10 { break; } else { total += i; }
              }
              loop {
                total -= 1;
                continuing {
                  break if total < 0;
                }
              }
              switch n {
                case 1, 2: { total = 1; }
                default { }
              }
              while total > 0 { total--; }
              _ = n;
              return total;
            }
        "});

        assert!(output.diagnostics.is_empty(), "{:?}", messages(&output));

        let printed = print_module(&output.module);
        assert!(printed.contains("for(var i = 0; (i < n); i++) {"), "{printed}");
        assert!(printed.contains("} else if (i > 10) {"), "{printed}");
        assert!(printed.contains("break if (total < 0);"), "{printed}");
        assert!(printed.contains("case 1, 2 {"), "{printed}");
        assert!(printed.contains("_ = n;"), "{printed}");
    }

    #[test]
    fn operator_precedence() {
        let (output, _) = parse("const x = (1 + 2 * 3) << 1u;\nconst y = -a.b[2] & c & d;\n");

        assert!(output.diagnostics.is_empty(), "{:?}", messages(&output));
        assert_eq!(
            print_module(&output.module),
            "const x = ((1 + (2 * 3)) << 1u);\n\nconst y = ((-a.b[2] & c) & d);\n"
        );
    }

    #[test]
    fn nested_template_lists_split_shift_tokens() {
        let (output, _) = parse("var<private> a : array<vec4<f32>>;\n");

        assert!(output.diagnostics.is_empty(), "{:?}", messages(&output));
        assert_eq!(
            print_module(&output.module),
            "var<private> a : array<vec4<f32>>;\n"
        );
    }

    #[test]
    fn mixing_logical_operators_is_an_error() {
        let (output, _) = parse("const x = a && b || c;\n");

        assert_eq!(
            messages(&output),
            vec!["mixing '&&' and '||' requires parenthesis".to_string()]
        );
    }

    #[test]
    fn recovers_after_unbalanced_parenthesis() {
        let (output, source) = parse(indoc! {"
            fn a() {
              let x = (1 + 2;
            }
            fn b() -> i32 {
              return 1;
            }
        "});

        assert_eq!(messages(&output), vec!["expected ')'".to_string()]);

        let range = output.diagnostics.iter().next().map(|d| d.range(&source));
        assert_eq!(range.map(|r| r.start.line), Some(2));

        let names = output
            .module
            .functions()
            .map(|(_, f)| output.module.name(f.name).to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["b".to_string()]);
    }

    #[test]
    fn reports_independent_errors_in_one_pass() {
        let (output, _) = parse(indoc! {"
            fn a() { let = 1; }
            fn b() { }
            fn c() { var y : i32 = ; }
        "});

        assert_eq!(
            messages(&output),
            vec![
                "expected identifier for let declaration".to_string(),
                "expected expression for variable declaration".to_string(),
            ]
        );
        assert_eq!(output.module.functions().count(), 1);
    }

    #[test]
    fn lexer_errors_become_diagnostics() {
        let (output, _) = parse("fn a() { let x = 4294967296u; }\nfn b() {}\n");

        assert_eq!(
            messages(&output),
            vec!["value cannot be represented as 'u32'".to_string()]
        );
        assert_eq!(output.module.functions().count(), 1);
    }

    #[test]
    fn stops_after_max_errors() {
        let source = SourceFile::from_memory("fn a() { let = 1; }\n".repeat(40));
        let output = Parser::parse_module(&source, 5);

        assert_eq!(output.diagnostics.error_count(), 5);
        assert_eq!(
            output.diagnostics.iter().last().map(|d| d.message.as_str()),
            Some("stopping after 5 errors")
        );
    }

    #[test]
    fn long_operator_chains_are_limited() {
        let chain = |terms: usize| format!("fn a() {{ let x = {}; }}\n", vec!["1"; terms].join(" + "));

        let (output, _) = parse(&chain(MAX_EXPRESSION_DEPTH));
        assert!(output.diagnostics.is_empty(), "{:?}", messages(&output));

        let (output, _) = parse(&chain(600));
        assert_eq!(
            messages(&output),
            vec![format!("expression is nested more than {MAX_EXPRESSION_DEPTH} levels deep")]
        );
    }

    #[test]
    fn unknown_attribute_is_an_error() {
        let (output, _) = parse("@bogus fn a() {}\n");

        assert_eq!(messages(&output), vec!["unknown attribute 'bogus'".to_string()]);
    }
}

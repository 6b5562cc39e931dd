//! Prints a module back to WGSL source text. Used to inspect the output of
//! AST transforms.

use std::fmt::Write;

use itertools::Itertools;

use super::{
    Attribute, AttributeKind, Block, CaseSelector, Declaration, DeclarationKind, ExpressionId,
    ExpressionKind, Function, Module, StatementId, StatementKind, TemplateArgument,
    TypeExpressionId, Variable, VariableKind,
};

pub fn print_module(module: &Module) -> String {
    let mut printer = Printer {
        module,
        out: String::new(),
        indent: 0,
    };

    for enable in &module.enables {
        printer.line(&format!("enable {};", module.name(*enable)));
    }

    for declaration in module.declarations.iter() {
        if !printer.out.is_empty() {
            printer.out.push('\n');
        }

        printer.print_declaration(declaration);
    }

    printer.out
}

pub fn print_expression(module: &Module, expression: ExpressionId) -> String {
    Printer {
        module,
        out: String::new(),
        indent: 0,
    }
    .expression(expression)
}

pub fn print_type_expression(module: &Module, ty: TypeExpressionId) -> String {
    Printer {
        module,
        out: String::new(),
        indent: 0,
    }
    .type_expression(ty)
}

struct Printer<'a> {
    module: &'a Module,
    out: String,
    indent: usize,
}

impl Printer<'_> {
    fn line(&mut self, text: &str) {
        let _ = writeln!(self.out, "{}{}", "  ".repeat(self.indent), text);
    }

    fn print_declaration(&mut self, declaration: &Declaration) {
        match &declaration.kind {
            DeclarationKind::Function(function) => self.print_function(function),
            DeclarationKind::Variable(variable) => {
                let text = self.variable(variable);
                self.line(&format!("{text};"));
            }
            DeclarationKind::Struct(structure) => {
                self.line(&format!("struct {} {{", self.module.name(structure.name)));
                self.indent += 1;

                for member in &structure.members {
                    let text = format!(
                        "{}{} : {},",
                        self.attributes(&member.attributes),
                        self.module.name(member.name),
                        self.type_expression(member.ty)
                    );
                    self.line(&text);
                }

                self.indent -= 1;
                self.line("}");
            }
            DeclarationKind::Alias(alias) => {
                let text = format!(
                    "alias {} = {};",
                    self.module.name(alias.name),
                    self.type_expression(alias.ty)
                );
                self.line(&text);
            }
            DeclarationKind::ConstAssert(expression) => {
                let text = format!("const_assert {};", self.expression(*expression));
                self.line(&text);
            }
        }
    }

    fn print_function(&mut self, function: &Function) {
        let mut attributes = self.attributes(&function.attributes);
        if !attributes.is_empty() {
            attributes.pop();
            self.line(&attributes);
        }

        let parameters = function
            .parameters
            .iter()
            .map(|parameter| {
                format!(
                    "{}{} : {}",
                    self.attributes(&parameter.attributes),
                    self.module.name(parameter.name),
                    self.type_expression(parameter.ty)
                )
            })
            .join(", ");

        let return_type = match function.return_type {
            Some(ty) => format!(
                " -> {}{}",
                self.attributes(&function.return_attributes),
                self.type_expression(ty)
            ),
            None => String::new(),
        };

        self.line(&format!(
            "fn {}({}){} {{",
            self.module.name(function.name),
            parameters,
            return_type
        ));
        self.print_block_contents(&function.body);
        self.line("}");
    }

    fn print_block_contents(&mut self, block: &Block) {
        self.indent += 1;

        for statement in &block.statements {
            self.print_statement(*statement);
        }

        self.indent -= 1;
    }

    fn print_statement(&mut self, statement: StatementId) {
        let module = self.module;

        match &module.statement(statement).kind {
            StatementKind::Block(block) => {
                self.line("{");
                self.print_block_contents(block);
                self.line("}");
            }
            StatementKind::If { .. } => {
                let head = self.if_head(statement);
                self.line(&head);
                self.print_if_tail(statement);
            }
            StatementKind::Switch { selector, clauses } => {
                let text = format!("switch {} {{", self.expression(*selector));
                self.line(&text);
                self.indent += 1;

                for clause in clauses {
                    let selectors = clause
                        .selectors
                        .iter()
                        .map(|selector| match selector {
                            CaseSelector::Default => "default".to_string(),
                            CaseSelector::Expression(e) => self.expression(*e),
                        })
                        .collect::<Vec<_>>();

                    let head = if selectors.len() == 1 && selectors[0] == "default" {
                        "default {".to_string()
                    } else {
                        format!("case {} {{", selectors.join(", "))
                    };

                    self.line(&head);
                    self.print_block_contents(&clause.body);
                    self.line("}");
                }

                self.indent -= 1;
                self.line("}");
            }
            StatementKind::Loop { body, continuing } => {
                self.line("loop {");
                self.print_block_contents(body);

                if let Some(continuing) = continuing {
                    self.indent += 1;
                    self.line("continuing {");
                    self.print_block_contents(&continuing.body);

                    if let Some(break_if) = continuing.break_if {
                        self.indent += 1;
                        let text = format!("break if {};", self.expression(break_if));
                        self.line(&text);
                        self.indent -= 1;
                    }

                    self.line("}");
                    self.indent -= 1;
                }

                self.line("}");
            }
            StatementKind::For {
                initializer,
                condition,
                update,
                body,
            } => {
                let initializer = initializer
                    .map(|s| self.simple_statement(s))
                    .unwrap_or_default();
                let condition = condition.map(|e| self.expression(e)).unwrap_or_default();
                let update = update.map(|s| self.simple_statement(s)).unwrap_or_default();

                self.line(&format!("for({initializer}; {condition}; {update}) {{"));
                self.print_block_contents(body);
                self.line("}");
            }
            StatementKind::While { condition, body } => {
                let text = format!("while {} {{", self.expression(*condition));
                self.line(&text);
                self.print_block_contents(body);
                self.line("}");
            }
            _ => {
                let text = format!("{};", self.simple_statement(statement));
                self.line(&text);
            }
        }
    }

    fn if_head(&self, statement: StatementId) -> String {
        match &self.module.statement(statement).kind {
            StatementKind::If { condition, .. } => format!("if {} {{", self.expression(*condition)),
            _ => String::new(),
        }
    }

    fn print_if_tail(&mut self, statement: StatementId) {
        let module = self.module;
        let StatementKind::If { accept, reject, .. } = &module.statement(statement).kind else {
            return;
        };

        self.print_block_contents(accept);

        match reject.map(|r| &module.statement(r).kind) {
            Some(StatementKind::If { .. }) => {
                let Some(reject) = *reject else { return };
                let head = self.if_head(reject);
                self.line(&format!("}} else {head}"));
                self.print_if_tail(reject);
            }
            Some(StatementKind::Block(block)) => {
                self.line("} else {");
                self.print_block_contents(block);
                self.line("}");
            }
            _ => self.line("}"),
        }
    }

    /// Statements that fit on one line without a terminating semicolon
    fn simple_statement(&self, statement: StatementId) -> String {
        match &self.module.statement(statement).kind {
            StatementKind::Variable(variable) => self.variable(variable),
            StatementKind::Assignment { lhs, rhs } => {
                format!("{} = {}", self.expression(*lhs), self.expression(*rhs))
            }
            StatementKind::CompoundAssignment { lhs, operator, rhs } => format!(
                "{} {}= {}",
                self.expression(*lhs),
                operator,
                self.expression(*rhs)
            ),
            StatementKind::Increment(e) => format!("{}++", self.expression(*e)),
            StatementKind::Decrement(e) => format!("{}--", self.expression(*e)),
            StatementKind::Phony(e) => format!("_ = {}", self.expression(*e)),
            StatementKind::Call(e) => self.expression(*e),
            StatementKind::Break => "break".to_string(),
            StatementKind::Continue => "continue".to_string(),
            StatementKind::Discard => "discard".to_string(),
            StatementKind::Return(None) => "return".to_string(),
            StatementKind::Return(Some(e)) => format!("return {}", self.expression(*e)),
            StatementKind::ConstAssert(e) => format!("const_assert {}", self.expression(*e)),
            _ => String::new(),
        }
    }

    fn variable(&self, variable: &Variable) -> String {
        let mut text = self.attributes(&variable.attributes);

        match variable.kind {
            VariableKind::Var {
                address_space,
                access,
            } => {
                text.push_str("var");

                if let Some(address_space) = address_space {
                    text.push('<');
                    text.push_str(self.module.name(address_space));

                    if let Some(access) = access {
                        text.push_str(", ");
                        text.push_str(self.module.name(access));
                    }

                    text.push('>');
                }
            }
            kind => text.push_str(kind.keyword()),
        }

        text.push(' ');
        text.push_str(self.module.name(variable.name));

        if let Some(ty) = variable.ty {
            text.push_str(" : ");
            text.push_str(&self.type_expression(ty));
        }

        if let Some(initializer) = variable.initializer {
            text.push_str(" = ");
            text.push_str(&self.expression(initializer));
        }

        text
    }

    /// Attributes each followed by a space
    fn attributes(&self, attributes: &[Attribute]) -> String {
        attributes
            .iter()
            .map(|attribute| format!("{} ", self.attribute(attribute)))
            .collect()
    }

    fn attribute(&self, attribute: &Attribute) -> String {
        let name = attribute.kind.name();

        match &attribute.kind {
            AttributeKind::Group(e)
            | AttributeKind::Binding(e)
            | AttributeKind::Id(e)
            | AttributeKind::Location(e)
            | AttributeKind::Align(e)
            | AttributeKind::Size(e) => format!("@{name}({})", self.expression(*e)),
            AttributeKind::Stage(_) | AttributeKind::Invariant => format!("@{name}"),
            AttributeKind::WorkgroupSize { x, y, z } => {
                let dimensions = std::iter::once(*x)
                    .chain(*y)
                    .chain(*z)
                    .map(|e| self.expression(e))
                    .join(", ");

                format!("@{name}({dimensions})")
            }
            AttributeKind::Builtin(builtin) => format!("@{name}({})", self.module.name(*builtin)),
            AttributeKind::Interpolate { kind, sampling } => match sampling {
                Some(sampling) => format!(
                    "@{name}({}, {})",
                    self.module.name(*kind),
                    self.module.name(*sampling)
                ),
                None => format!("@{name}({})", self.module.name(*kind)),
            },
        }
    }

    fn type_expression(&self, ty: TypeExpressionId) -> String {
        let ty = self.module.type_expression(ty);
        let name = self.module.name(ty.name);

        if ty.template.is_empty() {
            return name.to_string();
        }

        let arguments = ty
            .template
            .iter()
            .map(|argument| match *argument {
                TemplateArgument::Type(ty) => self.type_expression(ty),
                TemplateArgument::Expression(e) => self.expression(e),
            })
            .join(", ");

        format!("{name}<{arguments}>")
    }

    fn expression(&self, expression: ExpressionId) -> String {
        match &self.module.expression(expression).kind {
            ExpressionKind::Literal(literal) => literal.to_string(),
            ExpressionKind::Identifier(identifier) => self.module.name(*identifier).to_string(),
            ExpressionKind::Call { callee, arguments } => format!(
                "{}({})",
                self.type_expression(*callee),
                arguments.iter().map(|a| self.expression(*a)).join(", ")
            ),
            ExpressionKind::Index { base, index } => {
                format!("{}[{}]", self.postfix_base(*base), self.expression(*index))
            }
            ExpressionKind::Member { base, member } => {
                format!("{}.{}", self.postfix_base(*base), self.module.name(*member))
            }
            ExpressionKind::Unary { operator, operand } => {
                if self.is_unary(*operand) {
                    format!("{}({})", operator, self.expression(*operand))
                } else {
                    format!("{}{}", operator, self.expression(*operand))
                }
            }
            ExpressionKind::Binary { lhs, operator, rhs } => format!(
                "({} {} {})",
                self.expression(*lhs),
                operator,
                self.expression(*rhs)
            ),
            ExpressionKind::Grouping(inner) => self.expression(*inner),
        }
    }

    fn is_unary(&self, expression: ExpressionId) -> bool {
        match &self.module.expression(expression).kind {
            ExpressionKind::Unary { .. } => true,
            ExpressionKind::Grouping(inner) => self.is_unary(*inner),
            _ => false,
        }
    }

    /// Unary operators bind looser than postfix operators
    fn postfix_base(&self, base: ExpressionId) -> String {
        if self.is_unary(base) {
            format!("({})", self.expression(base))
        } else {
            self.expression(base)
        }
    }
}

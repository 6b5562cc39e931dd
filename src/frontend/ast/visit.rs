//! Trait definition for an AST visitor which walks the tree in DFS order

use super::{
    AttributeKind, Block, CaseSelector, Declaration, DeclarationKind, ExpressionId, ExpressionKind,
    Function, Module, StatementId, StatementKind, TemplateArgument, TypeExpressionId, Variable,
};

pub trait Visitor<'ast>: Sized {
    /// The module whose arenas the visited ids index into
    fn module(&self) -> &'ast Module;

    fn visit_declaration(&mut self, declaration: &'ast Declaration) {
        walk_declaration(self, declaration)
    }

    fn visit_function(&mut self, function: &'ast Function) {
        walk_function(self, function)
    }

    fn visit_variable(&mut self, variable: &'ast Variable) {
        walk_variable(self, variable)
    }

    fn visit_block(&mut self, block: &'ast Block) {
        walk_block(self, block)
    }

    fn visit_statement(&mut self, statement: StatementId) {
        walk_statement(self, statement)
    }

    fn visit_expression(&mut self, expression: ExpressionId) {
        walk_expression(self, expression)
    }

    fn visit_type_expression(&mut self, ty: TypeExpressionId) {
        walk_type_expression(self, ty)
    }
}

pub fn walk_module<'a>(visitor: &mut impl Visitor<'a>) {
    let module = visitor.module();

    for declaration in module.declarations.iter() {
        visitor.visit_declaration(declaration);
    }
}

pub fn walk_declaration<'a>(visitor: &mut impl Visitor<'a>, declaration: &'a Declaration) {
    match &declaration.kind {
        DeclarationKind::Function(function) => visitor.visit_function(function),
        DeclarationKind::Variable(variable) => visitor.visit_variable(variable),
        DeclarationKind::Struct(structure) => {
            for member in &structure.members {
                visitor.visit_type_expression(member.ty);
            }
        }
        DeclarationKind::Alias(alias) => visitor.visit_type_expression(alias.ty),
        DeclarationKind::ConstAssert(expression) => visitor.visit_expression(*expression),
    }
}

pub fn walk_function<'a>(visitor: &mut impl Visitor<'a>, function: &'a Function) {
    for attribute in &function.attributes {
        if let AttributeKind::WorkgroupSize { x, y, z } = attribute.kind {
            visitor.visit_expression(x);
            y.into_iter().chain(z).for_each(|e| visitor.visit_expression(e));
        }
    }

    for parameter in &function.parameters {
        visitor.visit_type_expression(parameter.ty);
    }

    if let Some(return_type) = function.return_type {
        visitor.visit_type_expression(return_type);
    }

    visitor.visit_block(&function.body);
}

pub fn walk_variable<'a>(visitor: &mut impl Visitor<'a>, variable: &'a Variable) {
    if let Some(ty) = variable.ty {
        visitor.visit_type_expression(ty);
    }

    if let Some(initializer) = variable.initializer {
        visitor.visit_expression(initializer);
    }
}

pub fn walk_block<'a>(visitor: &mut impl Visitor<'a>, block: &'a Block) {
    for statement in &block.statements {
        visitor.visit_statement(*statement);
    }
}

pub fn walk_statement<'a>(visitor: &mut impl Visitor<'a>, statement: StatementId) {
    let module = visitor.module();

    match &module.statement(statement).kind {
        StatementKind::Block(block) => visitor.visit_block(block),
        StatementKind::Variable(variable) => visitor.visit_variable(variable),
        StatementKind::Assignment { lhs, rhs }
        | StatementKind::CompoundAssignment { lhs, rhs, .. } => {
            visitor.visit_expression(*lhs);
            visitor.visit_expression(*rhs);
        }
        StatementKind::Increment(expression)
        | StatementKind::Decrement(expression)
        | StatementKind::Phony(expression)
        | StatementKind::Call(expression)
        | StatementKind::ConstAssert(expression) => visitor.visit_expression(*expression),
        StatementKind::If {
            condition,
            accept,
            reject,
        } => {
            visitor.visit_expression(*condition);
            visitor.visit_block(accept);

            if let Some(reject) = reject {
                visitor.visit_statement(*reject);
            }
        }
        StatementKind::Switch { selector, clauses } => {
            visitor.visit_expression(*selector);

            for clause in clauses {
                for selector in &clause.selectors {
                    if let CaseSelector::Expression(expression) = selector {
                        visitor.visit_expression(*expression);
                    }
                }

                visitor.visit_block(&clause.body);
            }
        }
        StatementKind::Loop { body, continuing } => {
            visitor.visit_block(body);

            if let Some(continuing) = continuing {
                visitor.visit_block(&continuing.body);

                if let Some(break_if) = continuing.break_if {
                    visitor.visit_expression(break_if);
                }
            }
        }
        StatementKind::For {
            initializer,
            condition,
            update,
            body,
        } => {
            if let Some(initializer) = initializer {
                visitor.visit_statement(*initializer);
            }

            if let Some(condition) = condition {
                visitor.visit_expression(*condition);
            }

            if let Some(update) = update {
                visitor.visit_statement(*update);
            }

            visitor.visit_block(body);
        }
        StatementKind::While { condition, body } => {
            visitor.visit_expression(*condition);
            visitor.visit_block(body);
        }
        StatementKind::Return(value) => {
            if let Some(value) = value {
                visitor.visit_expression(*value);
            }
        }
        StatementKind::Break | StatementKind::Continue | StatementKind::Discard => {}
    }
}

pub fn walk_expression<'a>(visitor: &mut impl Visitor<'a>, expression: ExpressionId) {
    let module = visitor.module();

    match &module.expression(expression).kind {
        ExpressionKind::Literal(_) | ExpressionKind::Identifier(_) => {}
        ExpressionKind::Call { callee, arguments } => {
            visitor.visit_type_expression(*callee);

            for argument in arguments {
                visitor.visit_expression(*argument);
            }
        }
        ExpressionKind::Index { base, index } => {
            visitor.visit_expression(*base);
            visitor.visit_expression(*index);
        }
        ExpressionKind::Member { base, .. } => visitor.visit_expression(*base),
        ExpressionKind::Unary { operand, .. } => visitor.visit_expression(*operand),
        ExpressionKind::Binary { lhs, rhs, .. } => {
            visitor.visit_expression(*lhs);
            visitor.visit_expression(*rhs);
        }
        ExpressionKind::Grouping(inner) => visitor.visit_expression(*inner),
    }
}

pub fn walk_type_expression<'a>(visitor: &mut impl Visitor<'a>, ty: TypeExpressionId) {
    let module = visitor.module();

    for argument in &module.type_expression(ty).template {
        match *argument {
            TemplateArgument::Type(ty) => visitor.visit_type_expression(ty),
            TemplateArgument::Expression(expression) => visitor.visit_expression(expression),
        }
    }
}

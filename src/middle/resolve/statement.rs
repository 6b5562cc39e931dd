//! Function bodies: local declarations, assignments and control flow.

use std::collections::BTreeMap;

use crate::{
    frontend::{
        ast::{
            self, BinaryOperatorKind, Block, CaseSelector, DeclarationId, ExpressionId, ExpressionKind, StatementId,
            StatementKind, SwitchClause, Variable, VariableKind,
        },
        lexer::Span,
    },
    middle::{
        constant::ConstValue,
        program::{CallTarget, EvaluationStage, ExpressionInfo, LocalInfo, LocalKind},
        ty::{AddressSpace, ScalarKind, TypeId, TypeKind},
    },
};

use super::{Binding, ControlFlow, FunctionContext, Resolver};

impl<'a> Resolver<'a> {
    /// Resolves the body of a function whose header resolved successfully
    pub(super) fn resolve_function_body(&mut self, id: DeclarationId, function: &'a ast::Function) {
        // The header stays visible so that calls from the body, including
        // recursive ones, see the signature
        let Some(info) = self.info.functions.get(&id).cloned() else {
            return;
        };

        let returns_value = info.return_type.is_some();

        self.function = Some(FunctionContext {
            id,
            info,
            control: Vec::new(),
        });
        self.referenced.clear();

        self.scopes.push_shallow_scope();

        for (index, parameter) in function.parameters.iter().enumerate() {
            self.scopes.add_shallow_binding(parameter.name.symbol, Binding::Parameter(index));
        }

        // Parameters and the outermost body statements share a scope
        self.resolve_statements(&function.body.statements);
        self.scopes.pop_shallow_scope();

        if returns_value && !self.block_returns(&function.body.statements) {
            let end = function.body.span.end;
            resolve_error!(
                self,
                Span::new(end.saturating_sub(1), end),
                "missing return at end of function"
            );
        }

        let referenced = std::mem::take(&mut self.referenced);

        if let Some(mut context) = self.function.take() {
            context.info.direct_globals.extend(referenced);
            self.info.functions.insert(id, context.info);
        }
    }

    fn resolve_block(&mut self, block: &'a Block) {
        self.scopes.push_shallow_scope();
        self.resolve_statements(&block.statements);
        self.scopes.pop_shallow_scope();
    }

    fn resolve_statements(&mut self, statements: &'a [StatementId]) {
        for &statement in statements {
            if self.diagnostics.limit_reached() {
                return;
            }

            self.resolve_statement(statement);
        }
    }

    fn resolve_statement(&mut self, id: StatementId) {
        let module = self.module;
        let statement = module.statement(id);
        let span = statement.span;

        match &statement.kind {
            StatementKind::Block(block) => self.resolve_block(block),
            StatementKind::Variable(variable) => self.resolve_local(id, variable),
            StatementKind::Assignment { lhs, rhs } => self.resolve_assignment(*lhs, *rhs),
            StatementKind::CompoundAssignment { lhs, operator, rhs } => {
                self.resolve_compound_assignment(*lhs, *operator, *rhs, span)
            }
            StatementKind::Increment(target) | StatementKind::Decrement(target) => {
                self.resolve_increment(*target, span)
            }
            StatementKind::Phony(expression) => {
                self.resolve_value(*expression);
            }
            StatementKind::Call(expression) => self.resolve_call_statement(*expression),
            StatementKind::If {
                condition,
                accept,
                reject,
            } => {
                self.resolve_condition(*condition, "if");
                self.resolve_block(accept);

                if let Some(reject) = reject {
                    self.resolve_statement(*reject);
                }
            }
            StatementKind::Switch { selector, clauses } => self.resolve_switch(*selector, clauses, span),
            StatementKind::Loop { body, continuing } => {
                // The continuing block sees the body's declarations
                self.scopes.push_shallow_scope();

                self.with_control(ControlFlow::Loop, |resolver| {
                    resolver.resolve_statements(&body.statements)
                });

                if let Some(continuing) = continuing {
                    self.with_control(ControlFlow::Continuing, |resolver| {
                        resolver.resolve_block(&continuing.body);

                        if let Some(condition) = continuing.break_if {
                            resolver.resolve_condition(condition, "break if");
                        }
                    });
                }

                self.scopes.pop_shallow_scope();
            }
            StatementKind::For {
                initializer,
                condition,
                update,
                body,
            } => {
                self.scopes.push_shallow_scope();

                if let Some(initializer) = initializer {
                    self.resolve_statement(*initializer);
                }

                if let Some(condition) = condition {
                    self.resolve_condition(*condition, "for");
                }

                if let Some(update) = update {
                    self.resolve_statement(*update);
                }

                self.with_control(ControlFlow::Loop, |resolver| resolver.resolve_block(body));
                self.scopes.pop_shallow_scope();
            }
            StatementKind::While { condition, body } => {
                self.resolve_condition(*condition, "while");
                self.with_control(ControlFlow::Loop, |resolver| resolver.resolve_block(body));
            }
            StatementKind::Break => match self.control().last().copied() {
                Some(ControlFlow::Loop | ControlFlow::Switch) => {}
                Some(ControlFlow::Continuing) => resolve_error!(
                    self,
                    span,
                    "'break' must not be used directly in a continuing block, use 'break if'"
                ),
                None => resolve_error!(self, span, "break statement must be in a loop or switch case"),
            },
            StatementKind::Continue => {
                let target = self
                    .control()
                    .iter()
                    .rev()
                    .find(|control| **control != ControlFlow::Switch)
                    .copied();

                match target {
                    Some(ControlFlow::Loop) => {}
                    Some(_) => resolve_error!(self, span, "'continue' must not be used in a continuing block"),
                    None => resolve_error!(self, span, "continue statement must be in a loop"),
                }
            }
            StatementKind::Return(value) => self.resolve_return(*value, span),
            StatementKind::Discard => {
                if let Some(context) = self.function.as_mut() {
                    context.info.discards.push(span);
                }
            }
            StatementKind::ConstAssert(expression) => {
                self.resolve_const_assert(*expression);
            }
        }
    }

    fn control(&self) -> &[ControlFlow] {
        self.function.as_ref().map(|context| context.control.as_slice()).unwrap_or_default()
    }

    fn with_control(&mut self, control: ControlFlow, f: impl FnOnce(&mut Self)) {
        if let Some(context) = self.function.as_mut() {
            context.control.push(control);
        }

        f(self);

        if let Some(context) = self.function.as_mut() {
            context.control.pop();
        }
    }

    fn resolve_local(&mut self, id: StatementId, variable: &'a Variable) {
        let module = self.module;
        let name = module.name(variable.name);

        if let Some(attribute) = variable.attributes.first() {
            resolve_error!(
                self,
                attribute.span,
                "@{} is not valid on function-scope declarations",
                attribute.kind.name()
            );
        }

        if let Some(previous) = self.scopes.get_shallow_binding(variable.name.symbol).copied() {
            let previous_span = self.binding_span(previous);
            self.error_with_note(
                variable.name.span,
                format!("redeclaration of '{name}'"),
                previous_span,
                "previously declared here",
            );
        }

        if let Some(local) = self.resolve_local_info(variable) {
            self.info.locals.insert(id, local);
        }

        // Bound after the initializer, which sees any shadowed declaration
        self.scopes.add_shallow_binding(variable.name.symbol, Binding::Local(id));
    }

    fn resolve_local_info(&mut self, variable: &'a Variable) -> Option<LocalInfo> {
        let module = self.module;
        let name = module.name(variable.name);

        let declared = match variable.ty {
            Some(ty) => Some(self.resolve_type(ty)?),
            None => None,
        };

        let initializer = |resolver: &mut Self, concretize: bool| match variable.initializer {
            Some(initializer) => resolver.resolve_initializer(initializer, declared, concretize).map(Some),
            None => Some(None),
        };

        match variable.kind {
            VariableKind::Var { address_space, access } => {
                if let Some(space) = address_space {
                    if module.name(space) != "function" {
                        resolve_error!(
                            self,
                            space.span,
                            "function-scope 'var' must be in the 'function' address space"
                        );
                        return None;
                    }
                }

                if let Some(access) = access {
                    resolve_error!(
                        self,
                        access.span,
                        "only variables in the 'storage' address space may specify an access mode"
                    );
                    return None;
                }

                let ty = match (declared, initializer(self, true)?) {
                    (_, Some(info)) => info.ty,
                    (Some(ty), None) => ty,
                    (None, None) => {
                        resolve_error!(
                            self,
                            variable.name.span,
                            "'var' declaration '{name}' requires a type or an initializer"
                        );
                        return None;
                    }
                };

                if !self.types.is_constructible(ty) {
                    resolve_error!(
                        self,
                        variable.span,
                        "type '{}' cannot be used in address space '{}'",
                        self.types.name(ty),
                        AddressSpace::Function
                    );
                    return None;
                }

                Some(LocalInfo {
                    kind: LocalKind::Var,
                    ty,
                    value: None,
                })
            }
            VariableKind::Let => {
                let Some(info) = initializer(self, true)? else {
                    resolve_error!(self, variable.name.span, "'let' declaration '{name}' requires an initializer");
                    return None;
                };

                let pointer = matches!(self.types.get(info.ty), TypeKind::Pointer { .. });
                if !self.types.is_constructible(info.ty) && !pointer {
                    resolve_error!(
                        self,
                        variable.span,
                        "type '{}' cannot be used in a 'let' declaration",
                        self.types.name(info.ty)
                    );
                    return None;
                }

                Some(LocalInfo {
                    kind: LocalKind::Let,
                    ty: info.ty,
                    value: None,
                })
            }
            VariableKind::Const => {
                let Some(info) = initializer(self, false)? else {
                    resolve_error!(
                        self,
                        variable.name.span,
                        "'const' declaration '{name}' requires an initializer"
                    );
                    return None;
                };

                if info.stage != EvaluationStage::Constant {
                    resolve_error!(
                        self,
                        self.module.expression(variable.initializer?).span,
                        "'const' initializer must be a const-expression"
                    );
                    return None;
                }

                Some(LocalInfo {
                    kind: LocalKind::Const,
                    ty: info.ty,
                    value: info.value,
                })
            }
            VariableKind::Override => {
                resolve_error!(
                    self,
                    variable.span,
                    "'override' declarations are only valid at module scope"
                );
                None
            }
        }
    }

    /// Span of the name a binding was introduced with
    fn binding_span(&self, binding: Binding) -> Span {
        let module = self.module;

        match binding {
            Binding::Declaration(declaration) => {
                let declaration = module.declaration(declaration);
                declaration.name().map(|name| name.span).unwrap_or(declaration.span)
            }
            Binding::Parameter(index) => self
                .function
                .as_ref()
                .and_then(|context| module.declaration(context.id).as_function())
                .and_then(|function| function.parameters.get(index))
                .map(|parameter| parameter.name.span)
                .unwrap_or_default(),
            Binding::Local(statement) => module
                .statement(statement)
                .kind
                .as_variable()
                .map(|variable| variable.name.span)
                .unwrap_or_default(),
        }
    }

    /// Resolves the left-hand side of an assignment, returning the store
    /// type of the writable reference it denotes
    fn resolve_assignment_target(&mut self, target: ExpressionId) -> Option<TypeId> {
        let info = self.resolve_expression(target)?;
        let span = self.module.expression(target).span;

        match *self.types.get(info.ty) {
            TypeKind::Reference { access, store, .. } => {
                if !access.can_write() {
                    resolve_error!(self, span, "cannot assign to a read-only reference");
                    return None;
                }

                if !self.types.is_constructible(store) {
                    resolve_error!(
                        self,
                        span,
                        "cannot assign to a value of type '{}'",
                        self.types.name(store)
                    );
                    return None;
                }

                Some(store)
            }
            _ => {
                let what = match self.module.expression(target).kind {
                    ExpressionKind::Identifier(identifier) => format!("'{}'", self.module.name(identifier)),
                    _ => "this expression".to_string(),
                };

                resolve_error!(
                    self,
                    span,
                    "cannot assign to {what}: the left-hand side of an assignment must be a reference"
                );
                None
            }
        }
    }

    fn resolve_assignment(&mut self, lhs: ExpressionId, rhs: ExpressionId) {
        let store = self.resolve_assignment_target(lhs);
        let value = self.resolve_value(rhs);

        if let (Some(store), Some(value)) = (store, value) {
            self.materialize(rhs, value, store);
        }
    }

    fn resolve_compound_assignment(
        &mut self,
        lhs: ExpressionId,
        operator: BinaryOperatorKind,
        rhs: ExpressionId,
        span: Span,
    ) {
        let store = self.resolve_assignment_target(lhs);
        let value = self.resolve_value(rhs);

        let (Some(store), Some(value)) = (store, value) else {
            return;
        };

        match self.binary_signature(operator, store, value.ty) {
            Some(signature) if signature.lhs == store && signature.result == store => {
                self.materialize(rhs, value, signature.rhs);
            }
            _ => resolve_error!(
                self,
                span,
                "no matching overload for operator '{operator}=' with operands '{}' and '{}'",
                self.types.name(store),
                self.types.name(value.ty)
            ),
        }
    }

    fn resolve_increment(&mut self, target: ExpressionId, span: Span) {
        let Some(store) = self.resolve_assignment_target(target) else {
            return;
        };

        if !matches!(self.types.as_scalar(store), Some(ScalarKind::I32 | ScalarKind::U32)) {
            resolve_error!(
                self,
                span,
                "increment and decrement require an 'i32' or 'u32' reference, found '{}'",
                self.types.name(store)
            );
        }
    }

    fn resolve_call_statement(&mut self, expression: ExpressionId) {
        let module = self.module;

        let ExpressionKind::Call { callee, arguments } = &module.expression(expression).kind else {
            self.resolve_value(expression);
            return;
        };

        let Some(result) = self.resolve_call(expression, *callee, arguments) else {
            return;
        };

        if result.is_none() {
            return;
        }

        let span = module.expression(expression).span;

        match self.info.calls.get(&expression) {
            Some(CallTarget::Construct(_) | CallTarget::Convert(_) | CallTarget::Bitcast(_)) => {
                resolve_error!(self, span, "value constructor evaluated but not used")
            }
            Some(CallTarget::Builtin { function, .. }) if function.is_pure() => {
                resolve_error!(self, span, "result of '{}' must be used", function.name())
            }
            _ => {}
        }
    }

    fn resolve_condition(&mut self, condition: ExpressionId, statement: &str) {
        let Some(info) = self.resolve_value(condition) else {
            return;
        };

        if self.types.as_scalar(info.ty) != Some(ScalarKind::Bool) {
            resolve_error!(
                self,
                self.module.expression(condition).span,
                "'{statement}' condition must be of type 'bool', found '{}'",
                self.types.name(info.ty)
            );
        }
    }

    fn resolve_switch(&mut self, selector: ExpressionId, clauses: &'a [SwitchClause], span: Span) {
        let selector_info = self.resolve_value(selector);

        let cases = clauses
            .iter()
            .flat_map(|clause| &clause.selectors)
            .filter_map(|selector| match selector {
                CaseSelector::Expression(expression) => Some(*expression),
                CaseSelector::Default => None,
            })
            .collect::<Vec<_>>();

        let case_infos = cases
            .iter()
            .map(|&case| self.resolve_value(case).map(|info| (case, info)))
            .collect::<Vec<_>>();

        let mut default: Option<Span> = None;
        for clause in clauses {
            for case in &clause.selectors {
                if *case != CaseSelector::Default {
                    continue;
                }

                match default {
                    Some(previous) => self.error_with_note(
                        clause.span,
                        "switch statement must have exactly one default clause".to_string(),
                        previous,
                        "previous default clause here",
                    ),
                    None => default = Some(clause.span),
                }
            }
        }

        if default.is_none() {
            resolve_error!(self, span, "switch statement must have exactly one default clause");
        }

        if let Some(selector_info) = selector_info {
            self.check_case_selectors(selector, selector_info, case_infos.into_iter().flatten().collect());
        }

        for clause in clauses {
            self.with_control(ControlFlow::Switch, |resolver| resolver.resolve_block(&clause.body));
        }
    }

    /// Gives the selector and every case the common integer type and rejects
    /// duplicate case values
    fn check_case_selectors(
        &mut self,
        selector: ExpressionId,
        selector_info: ExpressionInfo,
        cases: Vec<(ExpressionId, ExpressionInfo)>,
    ) {
        let mut common = Some(selector_info.ty);
        for (_, info) in &cases {
            common = common.and_then(|ty| self.types.common_type(ty, info.ty));
        }

        let common = common.map(|ty| self.types.concretize(ty));
        let selector_span = self.module.expression(selector).span;

        let Some(common) = common.filter(|ty| matches!(self.types.as_scalar(*ty), Some(ScalarKind::I32 | ScalarKind::U32)))
        else {
            resolve_error!(
                self,
                selector_span,
                "switch selector and case selectors must all be 'i32' or 'u32' of the same type"
            );
            return;
        };

        self.materialize(selector, selector_info, common);

        let mut seen = BTreeMap::<i64, Span>::new();

        for (case, info) in cases {
            let span = self.module.expression(case).span;

            let Some(info) = self.materialize(case, info, common) else {
                continue;
            };

            let Some(value) = info.value.as_ref().and_then(ConstValue::as_i64) else {
                resolve_error!(self, span, "case selector must be a const-expression");
                continue;
            };

            if let Some(previous) = seen.insert(value, span) {
                self.error_with_note(
                    span,
                    format!("duplicate switch case '{value}'"),
                    previous,
                    "previous case here",
                );
            }
        }
    }

    fn resolve_return(&mut self, value: Option<ExpressionId>, span: Span) {
        let Some(context) = self.function.as_ref() else {
            return;
        };

        let return_type = context.info.return_type;

        if context.control.contains(&ControlFlow::Continuing) {
            resolve_error!(self, span, "return statement must not be used in a continuing block");
        }

        match (value, return_type) {
            (Some(expression), Some(ty)) => {
                if let Some(info) = self.resolve_value(expression) {
                    self.materialize(expression, info, ty);
                }
            }
            (Some(expression), None) => {
                self.resolve_value(expression);
                resolve_error!(
                    self,
                    span,
                    "return statement with a value in a function without a return type"
                );
            }
            (None, Some(ty)) => {
                resolve_error!(self, span, "missing return value of type '{}'", self.types.name(ty));
            }
            (None, None) => {}
        }
    }

    /// Returns true if every path through `statements` ends in a return
    fn block_returns(&self, statements: &[StatementId]) -> bool {
        statements.iter().any(|statement| self.statement_returns(*statement))
    }

    fn statement_returns(&self, statement: StatementId) -> bool {
        match &self.module.statement(statement).kind {
            StatementKind::Return(_) => true,
            StatementKind::Block(block) => self.block_returns(&block.statements),
            StatementKind::If {
                accept,
                reject: Some(reject),
                ..
            } => self.block_returns(&accept.statements) && self.statement_returns(*reject),
            StatementKind::Switch { clauses, .. } => clauses
                .iter()
                .all(|clause| self.block_returns(&clause.body.statements)),
            // A loop without a way out never falls through
            StatementKind::Loop { body, continuing } => {
                !self.contains_break(&body.statements)
                    && continuing.as_ref().is_none_or(|continuing| {
                        continuing.break_if.is_none() && !self.contains_break(&continuing.body.statements)
                    })
            }
            _ => false,
        }
    }

    /// Returns true if a `break` in `statements` exits the enclosing loop
    fn contains_break(&self, statements: &[StatementId]) -> bool {
        statements.iter().any(|statement| match &self.module.statement(*statement).kind {
            StatementKind::Break => true,
            StatementKind::Block(block) => self.contains_break(&block.statements),
            StatementKind::If { accept, reject, .. } => {
                self.contains_break(&accept.statements)
                    || reject.is_some_and(|reject| self.contains_break(&[reject]))
            }
            _ => false,
        })
    }
}

//! Lowers a resolved [`Program`] into an IR [`Module`].
//!
//! Every function scope `var` becomes a [`InstructionKind::Variable`] hoisted
//! to the entry block, so mutable state lives in memory and no phis are needed
//! except for short-circuiting `&&` and `||`. Constant expressions are emitted
//! directly as constants from the values the resolver computed.

use std::collections::BTreeMap;

use log::debug;

use crate::{
    diagnostics::{DiagnosticSource, Diagnostics},
    frontend::{
        ast::{
            self, BinaryOperatorKind, CaseSelector, DeclarationId, ExpressionId, ExpressionKind, StatementId,
            StatementKind, UnaryOperatorKind,
        },
        lexer::Span,
    },
    middle::{
        constant::{ConstValue, Scalar},
        interface::EntryPointInterface,
        ir::{
            BlockId, Function, FunctionId, GlobalVariable, InstructionKind, Merge, Module, Parameter, ValueId,
            ValueKind,
        },
        program::{CallTarget, EvaluationStage, GlobalKind, LocalKind, Program, Resolution},
        resolve::{swizzle, zero_value},
        ty::{AccessMode, AddressSpace, ScalarKind, TypeId, TypeKind},
    },
};

/// Lowers a valid program. Returns `None` if the program is invalid or an
/// internal error was reported while lowering it.
pub fn build_module(program: &Program, diagnostics: &mut Diagnostics) -> Option<Module> {
    if !program.is_valid() {
        return None;
    }

    let errors = diagnostics.error_count();

    let mut builder = IrBuilder {
        program,
        module: Module::new(program.types.clone()),
        diagnostics,
        functions: BTreeMap::new(),
        globals: BTreeMap::new(),
        state: None,
    };

    builder.build_globals();
    builder.declare_functions();

    for (id, function) in program.module.functions() {
        if builder.functions.contains_key(&id) {
            builder.build_function(id, function);
        }
    }

    let module = builder.module;

    debug!(
        "built IR with {} functions and {} instructions",
        module.functions.len(),
        module.instruction_count()
    );

    (diagnostics.error_count() == errors).then_some(module)
}

/// What `break` and `continue` jump to
#[derive(Debug, Clone, Copy)]
enum Target {
    Loop { merge: BlockId, continuing: BlockId },
    Switch { merge: BlockId },
}

struct FunctionState {
    id: FunctionId,
    entry: BlockId,
    /// Insertion point of the next hoisted variable in the entry block
    variables: usize,
    /// `None` after a terminator, until a new block is started
    current: Option<BlockId>,
    return_type: Option<TypeId>,
    parameters: Vec<ValueId>,
    locals: BTreeMap<StatementId, ValueId>,
    targets: Vec<Target>,
}

struct IrBuilder<'a> {
    program: &'a Program,
    module: Module,
    diagnostics: &'a mut Diagnostics,
    functions: BTreeMap<DeclarationId, FunctionId>,
    globals: BTreeMap<DeclarationId, ValueId>,
    state: Option<FunctionState>,
}

impl<'a> IrBuilder<'a> {
    fn internal_error<T>(&mut self, span: Span, message: impl Into<String>) -> Option<T> {
        self.diagnostics
            .add_internal_error(DiagnosticSource::IrBuilder, span, message);
        None
    }

    fn build_globals(&mut self) {
        let program = self.program;

        for (id, variable) in program.module.variables() {
            let Some(info) = program.global(id) else {
                continue;
            };

            let GlobalKind::Var { space, access } = info.kind else {
                continue;
            };

            let initializer = match variable.initializer {
                Some(initializer) => {
                    let Some(value) = program.expression(initializer).and_then(|info| info.value.clone()) else {
                        self.internal_error::<()>(variable.span, "module-scope initializer was not folded");
                        continue;
                    };

                    match self.concrete_value(info.ty, value, variable.span) {
                        Some(value) => Some(value),
                        None => continue,
                    }
                }
                None => None,
            };

            let pointer = self.module.types.pointer(space, access, info.ty);
            let global = self.module.globals.next_index();
            let value = self.module.add_value(pointer, ValueKind::Global(global));

            self.module.globals.push(GlobalVariable {
                name: program.name(variable.name).to_string(),
                space,
                access,
                store: info.ty,
                binding: info.binding,
                initializer,
                value,
            });
            self.globals.insert(id, value);
        }
    }

    fn declare_functions(&mut self) {
        let program = self.program;

        for (id, function) in program.module.functions() {
            let Some(info) = program.function(id) else {
                continue;
            };

            let function_id = self.module.functions.next_index();

            let parameters = function
                .parameters
                .iter()
                .zip(&info.parameters)
                .enumerate()
                .map(|(index, (parameter, ty))| Parameter {
                    name: program.name(parameter.name).to_string(),
                    ty: *ty,
                    value: self.module.add_value(
                        *ty,
                        ValueKind::Parameter {
                            function: function_id,
                            index,
                        },
                    ),
                })
                .collect();

            self.module.functions.push(Function {
                name: program.name(function.name).to_string(),
                stage: info.stage,
                workgroup_size: info.stage.and_then(|_| program.resolved_workgroup_size(id)),
                interface: EntryPointInterface::of(program, id),
                parameters,
                return_type: info.return_type,
                blocks: Vec::new(),
            });
            self.functions.insert(id, function_id);
        }
    }

    fn build_function(&mut self, declaration: DeclarationId, function: &'a ast::Function) {
        let Some(&id) = self.functions.get(&declaration) else {
            return;
        };

        let entry = self.module.add_block(id);
        let parameters = self.module.functions[id]
            .parameters
            .iter()
            .map(|parameter| parameter.value)
            .collect();

        self.state = Some(FunctionState {
            id,
            entry,
            variables: 0,
            current: Some(entry),
            return_type: self.module.functions[id].return_type,
            parameters,
            locals: BTreeMap::new(),
            targets: Vec::new(),
        });

        self.lower_block(&function.body);

        let open = self
            .state
            .as_ref()
            .filter(|state| state.current.is_some())
            .map(|state| state.return_type);

        if let Some(return_type) = open {
            let kind = match return_type {
                None => InstructionKind::Return { value: None },
                Some(_) => InstructionKind::Unreachable,
            };
            let end = Span::new(function.body.span.end, function.body.span.end);
            self.terminate(kind, end);
        }

        self.state = None;
    }

    /* Blocks and emission */

    fn state(&mut self) -> Option<&mut FunctionState> {
        self.state.as_mut()
    }

    fn current_block(&mut self, span: Span) -> Option<BlockId> {
        match self.state.as_ref().and_then(|state| state.current) {
            Some(block) => Some(block),
            None => self.internal_error(span, "instruction emitted outside of a block"),
        }
    }

    fn new_block(&mut self, span: Span) -> Option<BlockId> {
        let Some(function) = self.state.as_ref().map(|state| state.id) else {
            return self.internal_error(span, "block created outside of a function");
        };

        Some(self.module.add_block(function))
    }

    fn switch_to(&mut self, block: Option<BlockId>) {
        if let Some(state) = self.state() {
            state.current = block;
        }
    }

    fn is_open(&self) -> bool {
        self.state.as_ref().is_some_and(|state| state.current.is_some())
    }

    fn emit(&mut self, kind: InstructionKind, ty: TypeId, span: Span) -> Option<ValueId> {
        let block = self.current_block(span)?;
        self.module.append(block, kind, Some(ty), span).1
    }

    fn emit_void(&mut self, kind: InstructionKind, span: Span) -> Option<()> {
        let block = self.current_block(span)?;
        self.module.append(block, kind, None, span);
        Some(())
    }

    fn terminate(&mut self, kind: InstructionKind, span: Span) -> Option<()> {
        self.emit_void(kind, span)?;
        self.switch_to(None);
        Some(())
    }

    /// Continues in `merge`, or closes it when no branch reaches it
    fn continue_at(&mut self, merge: BlockId, span: Span) {
        let Some(function) = self.state.as_ref().map(|state| state.id) else {
            return;
        };

        let reached = self.module.functions[function]
            .blocks
            .iter()
            .any(|block| self.module.successors(*block).contains(&merge));

        if reached {
            self.switch_to(Some(merge));
        } else {
            self.module.append(merge, InstructionKind::Unreachable, None, span);
            self.switch_to(None);
        }
    }

    /// Declares a function scope variable in the entry block
    fn hoist_variable(&mut self, store: TypeId, span: Span) -> Option<ValueId> {
        let pointer = self
            .module
            .types
            .pointer(AddressSpace::Function, AccessMode::ReadWrite, store);

        let Some(state) = self.state.as_mut() else {
            return self.internal_error(span, "variable declared outside of a function");
        };

        let (entry, position) = (state.entry, state.variables);
        state.variables += 1;

        self.module
            .insert(entry, position, InstructionKind::Variable { store }, Some(pointer), span)
            .1
    }

    /* Types and constants */

    /// The IR type of an expression type: references become pointers and
    /// abstract types their concrete counterparts
    fn ir_type(&mut self, ty: TypeId) -> TypeId {
        match self.module.types.get(ty).clone() {
            TypeKind::Reference { space, access, store } => self.module.types.pointer(space, access, store),
            _ => self.module.types.concretize(ty),
        }
    }

    fn concrete_value(&mut self, ty: TypeId, value: ConstValue, span: Span) -> Option<ConstValue> {
        if !self.module.types.is_abstract(ty) {
            return Some(value);
        }

        let concrete = self.module.types.concretize(ty);
        let Some(scalar) = self.module.types.element_scalar(concrete) else {
            return Some(value);
        };

        match value.convert(scalar) {
            Ok(value) => Some(value),
            Err(error) => self.internal_error(span, format!("constant could not be materialized: {error}")),
        }
    }

    fn constant(&mut self, ty: TypeId, value: ConstValue, span: Span) -> Option<ValueId> {
        let value = self.concrete_value(ty, value, span)?;
        let ty = self.module.types.concretize(ty);

        Some(self.module.constant(ty, value))
    }

    fn u32_constant(&mut self, value: u32) -> ValueId {
        let ty = self.module.types.u32();
        self.module.constant(ty, Scalar::U32(value).into())
    }

    /* Statements */

    fn lower_block(&mut self, block: &'a ast::Block) {
        for statement in &block.statements {
            if !self.is_open() {
                break;
            }

            self.lower_statement(*statement);
        }
    }

    fn lower_statement(&mut self, id: StatementId) -> Option<()> {
        let program = self.program;
        let module = &program.module;
        let statement = module.statement(id);
        let span = statement.span;

        match &statement.kind {
            StatementKind::Block(block) => self.lower_block(block),
            StatementKind::Variable(variable) => self.lower_local(id, variable)?,
            StatementKind::Assignment { lhs, rhs } => {
                let pointer = self.lower_expression(*lhs)?;
                let value = self.lower_value(*rhs)?;
                self.emit_void(InstructionKind::Store { pointer, value }, span)?;
            }
            StatementKind::CompoundAssignment { lhs, operator, rhs } => {
                let pointer = self.lower_expression(*lhs)?;
                let rhs = self.lower_value(*rhs)?;
                self.update_in_place(pointer, *operator, rhs, span)?;
            }
            StatementKind::Increment(target) | StatementKind::Decrement(target) => {
                let pointer = self.lower_expression(*target)?;
                let Some(ty) = self.module.pointee(pointer) else {
                    return self.internal_error(span, "increment of a non-pointer");
                };

                let one = match self.module.types.as_scalar(ty) {
                    Some(ScalarKind::U32) => Scalar::U32(1),
                    _ => Scalar::I32(1),
                };
                let one = self.module.constant(ty, one.into());

                let operator = match statement.kind {
                    StatementKind::Increment(_) => BinaryOperatorKind::Add,
                    _ => BinaryOperatorKind::Subtract,
                };
                self.update_in_place(pointer, operator, one, span)?;
            }
            StatementKind::Phony(expression) => {
                let constant = program
                    .expression(*expression)
                    .is_some_and(|info| info.stage == EvaluationStage::Constant);

                if !constant {
                    self.lower_value(*expression)?;
                }
            }
            StatementKind::Call(expression) => {
                let ExpressionKind::Call { arguments, .. } = &module.expression(*expression).kind else {
                    return self.internal_error(span, "call statement without a call");
                };
                self.lower_call(*expression, arguments)?;
            }
            StatementKind::If {
                condition,
                accept,
                reject,
            } => self.lower_if(*condition, accept, *reject, span)?,
            StatementKind::Switch { selector, clauses } => self.lower_switch(*selector, clauses, span)?,
            StatementKind::Loop { body, continuing } => {
                self.lower_loop(None, body, continuing.as_ref().map(|c| (&c.body, c.break_if)), None, span)?
            }
            StatementKind::For {
                initializer,
                condition,
                update,
                body,
            } => {
                if let Some(initializer) = initializer {
                    self.lower_statement(*initializer)?;
                }

                self.lower_loop(*condition, body, None, *update, span)?
            }
            StatementKind::While { condition, body } => self.lower_loop(Some(*condition), body, None, None, span)?,
            StatementKind::Break => {
                let target = match self.state.as_ref().and_then(|state| state.targets.last().copied()) {
                    Some(Target::Loop { merge, .. } | Target::Switch { merge }) => merge,
                    None => return self.internal_error(span, "break outside of a loop or switch"),
                };
                self.terminate(InstructionKind::Branch { target }, span)?;
            }
            StatementKind::Continue => {
                let target = self.state.as_ref().and_then(|state| {
                    state.targets.iter().rev().find_map(|target| match target {
                        Target::Loop { continuing, .. } => Some(*continuing),
                        Target::Switch { .. } => None,
                    })
                });

                let Some(target) = target else {
                    return self.internal_error(span, "continue outside of a loop");
                };
                self.terminate(InstructionKind::Branch { target }, span)?;
            }
            StatementKind::Return(value) => {
                let value = match value {
                    Some(value) => Some(self.lower_value(*value)?),
                    None => None,
                };
                self.terminate(InstructionKind::Return { value }, span)?;
            }
            StatementKind::Discard => self.terminate(InstructionKind::Discard, span)?,
            StatementKind::ConstAssert(_) => {}
        }

        Some(())
    }

    fn lower_local(&mut self, id: StatementId, variable: &'a ast::Variable) -> Option<()> {
        let program = self.program;

        let Some(info) = program.info.locals.get(&id) else {
            return self.internal_error(variable.span, "local declaration was not resolved");
        };

        match info.kind {
            LocalKind::Const => {}
            LocalKind::Let => {
                let Some(initializer) = variable.initializer else {
                    return self.internal_error(variable.span, "'let' without an initializer");
                };

                let value = self.lower_value(initializer)?;
                self.state()?.locals.insert(id, value);
            }
            LocalKind::Var => {
                let store = info.ty;
                let pointer = self.hoist_variable(store, variable.span)?;

                // Declarations execute once per iteration inside loops, so
                // the zero value is stored here rather than as an initializer
                let value = match variable.initializer {
                    Some(initializer) => self.lower_value(initializer)?,
                    None => {
                        let Some(zero) = zero_value(&self.module.types, store) else {
                            return self.internal_error(variable.span, "variable type has no zero value");
                        };
                        self.module.constant(store, zero)
                    }
                };

                self.emit_void(InstructionKind::Store { pointer, value }, variable.span)?;
                self.state()?.locals.insert(id, pointer);
            }
        }

        Some(())
    }

    fn update_in_place(
        &mut self,
        pointer: ValueId,
        operator: BinaryOperatorKind,
        rhs: ValueId,
        span: Span,
    ) -> Option<()> {
        let Some(ty) = self.module.pointee(pointer) else {
            return self.internal_error(span, "compound assignment to a non-pointer");
        };

        let current = self.emit(InstructionKind::Load { pointer }, ty, span)?;
        let value = self.binary(operator, current, rhs, ty, span)?;

        self.emit_void(InstructionKind::Store { pointer, value }, span)
    }

    fn lower_if(
        &mut self,
        condition: ExpressionId,
        accept: &'a ast::Block,
        reject: Option<StatementId>,
        span: Span,
    ) -> Option<()> {
        let condition = self.lower_value(condition)?;
        let header = self.current_block(span)?;

        let accept_block = self.new_block(span)?;
        let reject_block = match reject {
            Some(_) => Some(self.new_block(span)?),
            None => None,
        };
        let merge = self.new_block(span)?;

        self.module.blocks[header].merge = Some(Merge::Selection(merge));
        self.terminate(
            InstructionKind::ConditionalBranch {
                condition,
                accept: accept_block,
                reject: reject_block.unwrap_or(merge),
            },
            span,
        )?;

        self.switch_to(Some(accept_block));
        self.lower_block(accept);
        if self.is_open() {
            self.terminate(InstructionKind::Branch { target: merge }, accept.span)?;
        }

        if let (Some(reject), Some(block)) = (reject, reject_block) {
            self.switch_to(Some(block));
            self.lower_statement(reject)?;
            if self.is_open() {
                self.terminate(InstructionKind::Branch { target: merge }, span)?;
            }
        }

        self.continue_at(merge, span);
        Some(())
    }

    fn lower_switch(&mut self, selector: ExpressionId, clauses: &'a [ast::SwitchClause], span: Span) -> Option<()> {
        let selector = self.lower_value(selector)?;
        let header = self.current_block(span)?;

        let merge = self.new_block(span)?;
        let mut cases = Vec::new();
        let mut default = None;
        let mut bodies = Vec::with_capacity(clauses.len());

        for clause in clauses {
            let block = self.new_block(clause.span)?;

            for selector in &clause.selectors {
                match selector {
                    CaseSelector::Default => default = Some(block),
                    CaseSelector::Expression(expression) => {
                        let value = self
                            .program
                            .expression(*expression)
                            .and_then(|info| info.value.as_ref())
                            .and_then(ConstValue::as_i64);

                        let Some(value) = value else {
                            return self.internal_error(clause.span, "case selector was not folded");
                        };
                        cases.push((value, block));
                    }
                }
            }

            bodies.push((block, &clause.body));
        }

        let Some(default) = default else {
            return self.internal_error(span, "switch without a default clause");
        };

        self.module.blocks[header].merge = Some(Merge::Selection(merge));
        self.terminate(
            InstructionKind::Switch {
                selector,
                cases,
                default,
            },
            span,
        )?;

        self.state()?.targets.push(Target::Switch { merge });

        for (block, body) in bodies {
            self.switch_to(Some(block));
            self.lower_block(body);
            if self.is_open() {
                self.terminate(InstructionKind::Branch { target: merge }, body.span)?;
            }
        }

        self.state()?.targets.pop();
        self.continue_at(merge, span);
        Some(())
    }

    /// Lowers `loop`, `for` and `while`. `condition` is checked at the top of
    /// every iteration; `update` runs in the continuing block.
    fn lower_loop(
        &mut self,
        condition: Option<ExpressionId>,
        body: &'a ast::Block,
        continuing: Option<(&'a ast::Block, Option<ExpressionId>)>,
        update: Option<StatementId>,
        span: Span,
    ) -> Option<()> {
        let header = self.new_block(span)?;
        let body_block = self.new_block(body.span)?;
        let continuing_block = self.new_block(span)?;
        let merge = self.new_block(span)?;

        self.terminate(InstructionKind::Branch { target: header }, span)?;

        self.module.blocks[header].merge = Some(Merge::Loop {
            merge,
            continuing: continuing_block,
        });
        self.switch_to(Some(header));
        self.terminate(InstructionKind::Branch { target: body_block }, span)?;

        self.state()?.targets.push(Target::Loop {
            merge,
            continuing: continuing_block,
        });
        self.switch_to(Some(body_block));

        if let Some(condition) = condition {
            let value = self.lower_value(condition)?;
            let check = self.current_block(span)?;
            let exit = self.new_block(span)?;
            let rest = self.new_block(body.span)?;

            self.module.blocks[check].merge = Some(Merge::Selection(rest));
            self.terminate(
                InstructionKind::ConditionalBranch {
                    condition: value,
                    accept: rest,
                    reject: exit,
                },
                span,
            )?;

            self.switch_to(Some(exit));
            self.terminate(InstructionKind::Branch { target: merge }, span)?;
            self.switch_to(Some(rest));
        }

        self.lower_block(body);
        if self.is_open() {
            self.terminate(InstructionKind::Branch { target: continuing_block }, body.span)?;
        }

        self.switch_to(Some(continuing_block));

        if let Some(update) = update {
            self.lower_statement(update)?;
        }

        let mut break_if = None;
        if let Some((block, condition)) = continuing {
            self.lower_block(block);
            break_if = condition;
        }

        match break_if {
            Some(condition) => {
                let condition = self.lower_value(condition)?;
                self.terminate(
                    InstructionKind::ConditionalBranch {
                        condition,
                        accept: merge,
                        reject: header,
                    },
                    span,
                )?;
            }
            None => self.terminate(InstructionKind::Branch { target: header }, span)?,
        }

        self.state()?.targets.pop();
        self.continue_at(merge, span);
        Some(())
    }

    /* Expressions */

    /// Lowers an expression used as a value, loading through references
    fn lower_value(&mut self, id: ExpressionId) -> Option<ValueId> {
        let program = self.program;
        let value = self.lower_expression(id)?;
        let span = program.module.expression(id).span;

        let store = program
            .expression(id)
            .filter(|info| info.stage != EvaluationStage::Constant)
            .and_then(|info| match self.module.types.get(info.ty) {
                TypeKind::Reference { store, .. } => Some(*store),
                _ => None,
            });

        match store {
            Some(store) => self.emit(InstructionKind::Load { pointer: value }, store, span),
            None => Some(value),
        }
    }

    /// Lowers an expression. Expressions with a reference type produce a
    /// pointer.
    fn lower_expression(&mut self, id: ExpressionId) -> Option<ValueId> {
        let program = self.program;
        let expression = program.module.expression(id);
        let span = expression.span;

        let Some(info) = program.expression(id) else {
            return self.internal_error(span, "expression was not resolved");
        };

        match info.stage {
            EvaluationStage::Constant => {
                let Some(value) = info.value.clone() else {
                    return self.internal_error(span, "constant expression without a value");
                };
                return self.constant(info.ty, value, span);
            }
            EvaluationStage::Override => {
                return self.internal_error(span, "override expressions must be substituted before lowering");
            }
            EvaluationStage::Runtime => {}
        }

        let ty = self.ir_type(info.ty);

        match &expression.kind {
            ExpressionKind::Literal(_) => self.internal_error(span, "literal was not folded"),
            ExpressionKind::Grouping(inner) => self.lower_expression(*inner),
            ExpressionKind::Identifier(_) => self.lower_identifier(id, span),
            ExpressionKind::Call { arguments, .. } => match self.lower_call(id, arguments)? {
                Some(value) => Some(value),
                None => self.internal_error(span, "call without a value used as an expression"),
            },
            ExpressionKind::Index { base, index } => self.lower_index(*base, *index, ty, span),
            ExpressionKind::Member { base, member } => {
                let name = program.name(*member);
                self.lower_member(*base, name, ty, span)
            }
            ExpressionKind::Unary { operator, operand } => match operator {
                UnaryOperatorKind::Deref | UnaryOperatorKind::AddressOf => self.lower_expression(*operand),
                _ => {
                    let operand = self.lower_value(*operand)?;
                    self.emit(
                        InstructionKind::Unary {
                            operator: *operator,
                            operand,
                        },
                        ty,
                        span,
                    )
                }
            },
            ExpressionKind::Binary { lhs, operator, rhs } => match operator {
                BinaryOperatorKind::LogicalAnd | BinaryOperatorKind::LogicalOr => {
                    self.short_circuit(*operator, *lhs, *rhs, ty, span)
                }
                _ => {
                    let lhs = self.lower_value(*lhs)?;
                    let rhs = self.lower_value(*rhs)?;
                    self.binary(*operator, lhs, rhs, ty, span)
                }
            },
        }
    }

    fn lower_identifier(&mut self, id: ExpressionId, span: Span) -> Option<ValueId> {
        let value = match self.program.info.resolutions.get(&id) {
            Some(Resolution::Global(declaration)) => self.globals.get(declaration).copied(),
            Some(Resolution::Parameter { index, .. }) => self
                .state
                .as_ref()
                .and_then(|state| state.parameters.get(*index).copied()),
            Some(Resolution::Local(statement)) => self
                .state
                .as_ref()
                .and_then(|state| state.locals.get(statement).copied()),
            None => None,
        };

        match value {
            Some(value) => Some(value),
            None => self.internal_error(span, "identifier does not name a lowered value"),
        }
    }

    /// Lowers a call. Returns `Some(None)` for calls without a result.
    fn lower_call(&mut self, id: ExpressionId, arguments: &'a [ExpressionId]) -> Option<Option<ValueId>> {
        let program = self.program;
        let span = program.module.expression(id).span;

        let Some(target) = program.info.calls.get(&id) else {
            return self.internal_error(span, "call target was not resolved");
        };

        let ty = match program.expression(id) {
            Some(info) => Some(self.ir_type(info.ty)),
            None => None,
        };

        let mut values = Vec::with_capacity(arguments.len());
        for argument in arguments {
            values.push(self.lower_value(*argument)?);
        }

        let kind = match target {
            CallTarget::Function(declaration) => {
                let Some(&function) = self.functions.get(declaration) else {
                    return self.internal_error(span, "call to a function that was not lowered");
                };

                InstructionKind::Call {
                    function,
                    arguments: values,
                }
            }
            CallTarget::Builtin { function, .. } => InstructionKind::CallBuiltin {
                function: *function,
                arguments: values,
            },
            CallTarget::Construct(target) => {
                let target = self.ir_type(*target);
                return self.construct(target, values, span).map(Some);
            }
            CallTarget::Convert(target) => {
                let Some(&value) = values.first() else {
                    return self.internal_error(span, "conversion without an argument");
                };

                if self.module.values[value].ty == self.module.types.concretize(*target) {
                    return Some(Some(value));
                }

                InstructionKind::Convert { value }
            }
            CallTarget::Bitcast(_) => {
                let Some(&value) = values.first() else {
                    return self.internal_error(span, "bitcast without an argument");
                };

                InstructionKind::Bitcast { value }
            }
        };

        match ty {
            Some(ty) => self.emit(kind, ty, span).map(Some),
            None => self.emit_void(kind, span).map(|_| None),
        }
    }

    /// Normalizes constructor arguments to one component per element: scalars
    /// are splatted into vectors and matrices built from scalars get their
    /// columns constructed first
    fn construct(&mut self, ty: TypeId, mut components: Vec<ValueId>, span: Span) -> Option<ValueId> {
        if let &[single] = components.as_slice() {
            if self.module.values[single].ty == ty {
                return Some(single);
            }
        }

        let scalar_arguments = components
            .iter()
            .all(|component| matches!(self.module.types.get(self.module.values[*component].ty), TypeKind::Scalar(_)));

        match self.module.types.get(ty).clone() {
            TypeKind::Vector { size, .. } if components.len() == 1 && scalar_arguments => {
                components = vec![components[0]; usize::from(size)];
            }
            TypeKind::Matrix { columns, rows, scalar } if scalar_arguments && components.len() > usize::from(columns) => {
                let column = self.module.types.vector(rows, scalar);

                let mut columns_values = Vec::with_capacity(usize::from(columns));
                for chunk in components.chunks(usize::from(rows)) {
                    columns_values.push(self.emit(
                        InstructionKind::Construct {
                            components: chunk.to_vec(),
                        },
                        column,
                        span,
                    )?);
                }

                components = columns_values;
            }
            _ => {}
        }

        self.emit(InstructionKind::Construct { components }, ty, span)
    }

    fn splat(&mut self, scalar: ValueId, vector: TypeId, span: Span) -> Option<ValueId> {
        let TypeKind::Vector { size, .. } = *self.module.types.get(vector) else {
            return Some(scalar);
        };

        self.emit(
            InstructionKind::Construct {
                components: vec![scalar; usize::from(size)],
            },
            vector,
            span,
        )
    }

    /// Emits a binary operation, splatting a scalar operand against a vector
    fn binary(
        &mut self,
        operator: BinaryOperatorKind,
        mut lhs: ValueId,
        mut rhs: ValueId,
        ty: TypeId,
        span: Span,
    ) -> Option<ValueId> {
        let lhs_ty = self.module.values[lhs].ty;
        let rhs_ty = self.module.values[rhs].ty;

        let is_vector = |ty| matches!(self.module.types.get(ty), TypeKind::Vector { .. });
        let is_scalar = |ty| matches!(self.module.types.get(ty), TypeKind::Scalar(_));
        let (splat_lhs, splat_rhs) = (
            is_scalar(lhs_ty) && is_vector(rhs_ty),
            is_vector(lhs_ty) && is_scalar(rhs_ty),
        );

        if splat_lhs {
            lhs = self.splat(lhs, rhs_ty, span)?;
        }
        if splat_rhs {
            rhs = self.splat(rhs, lhs_ty, span)?;
        }

        self.emit(InstructionKind::Binary { operator, lhs, rhs }, ty, span)
    }

    fn short_circuit(
        &mut self,
        operator: BinaryOperatorKind,
        lhs: ExpressionId,
        rhs: ExpressionId,
        ty: TypeId,
        span: Span,
    ) -> Option<ValueId> {
        let lhs = self.lower_value(lhs)?;
        let start = self.current_block(span)?;

        let evaluate_rhs = self.new_block(span)?;
        let merge = self.new_block(span)?;

        let (accept, reject) = match operator {
            BinaryOperatorKind::LogicalAnd => (evaluate_rhs, merge),
            _ => (merge, evaluate_rhs),
        };

        self.module.blocks[start].merge = Some(Merge::Selection(merge));
        self.terminate(
            InstructionKind::ConditionalBranch {
                condition: lhs,
                accept,
                reject,
            },
            span,
        )?;

        self.switch_to(Some(evaluate_rhs));
        let rhs = self.lower_value(rhs)?;
        let rhs_end = self.current_block(span)?;
        self.terminate(InstructionKind::Branch { target: merge }, span)?;

        self.switch_to(Some(merge));
        let skipped = self
            .module
            .constant(ty, Scalar::Bool(operator == BinaryOperatorKind::LogicalOr).into());

        self.emit(
            InstructionKind::Phi {
                incoming: vec![(start, skipped), (rhs_end, rhs)],
            },
            ty,
            span,
        )
    }

    fn lower_index(&mut self, base: ExpressionId, index: ExpressionId, ty: TypeId, span: Span) -> Option<ValueId> {
        let base_is_reference = self
            .program
            .expression(base)
            .is_some_and(|info| self.module.types.is_reference(info.ty) && info.stage != EvaluationStage::Constant);

        if base_is_reference {
            let pointer = self.lower_expression(base)?;
            let index = self.lower_value(index)?;

            return self.emit(
                InstructionKind::Access {
                    base: pointer,
                    indices: vec![index],
                },
                ty,
                span,
            );
        }

        let composite = self.lower_value(base)?;
        let index = self.lower_value(index)?;
        let composite_ty = self.module.values[composite].ty;

        let dynamic = self.module.as_constant(index).is_none();
        let is_vector = matches!(self.module.types.get(composite_ty), TypeKind::Vector { .. });

        if dynamic && !is_vector {
            // Arrays and matrices can only be indexed dynamically in memory
            let pointer = self.hoist_variable(composite_ty, span)?;
            self.emit_void(
                InstructionKind::Store {
                    pointer,
                    value: composite,
                },
                span,
            )?;

            let element_pointer = self
                .module
                .types
                .pointer(AddressSpace::Function, AccessMode::ReadWrite, ty);
            let element = self.emit(
                InstructionKind::Access {
                    base: pointer,
                    indices: vec![index],
                },
                element_pointer,
                span,
            )?;

            return self.emit(InstructionKind::Load { pointer: element }, ty, span);
        }

        self.emit(InstructionKind::Extract { composite, index }, ty, span)
    }

    fn lower_member(&mut self, base: ExpressionId, name: &str, ty: TypeId, span: Span) -> Option<ValueId> {
        let Some(base_info) = self.program.expression(base) else {
            return self.internal_error(span, "member base was not resolved");
        };

        let is_reference = self.module.types.is_reference(base_info.ty) && base_info.stage != EvaluationStage::Constant;
        let base_ty = self.module.types.value_type(base_info.ty);
        let base_ty = self.module.types.concretize(base_ty);

        let components = match self.module.types.get(base_ty) {
            TypeKind::Struct(structure) => structure.member(name).map(|(index, _)| vec![index]),
            TypeKind::Vector { size, .. } => swizzle(name, *size),
            _ => None,
        };

        let Some(components) = components else {
            return self.internal_error(span, format!("invalid member access '.{name}'"));
        };

        let components = components.into_iter().map(|c| c as u32).collect::<Vec<_>>();

        if let &[component] = components.as_slice() {
            let index = self.u32_constant(component);

            if is_reference {
                let pointer = self.lower_expression(base)?;
                return self.emit(
                    InstructionKind::Access {
                        base: pointer,
                        indices: vec![index],
                    },
                    ty,
                    span,
                );
            }

            let composite = self.lower_value(base)?;
            return self.emit(InstructionKind::Extract { composite, index }, ty, span);
        }

        let vector = self.lower_value(base)?;
        self.emit(InstructionKind::Swizzle { vector, components }, ty, span)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::{
        diagnostics::DEFAULT_MAX_ERRORS,
        frontend::SourceFile,
        middle::ir::{InstructionKind, validate::validate},
    };

    fn build(source: &str) -> Module {
        let program = Program::from_source(&SourceFile::from_memory(source), DEFAULT_MAX_ERRORS);
        assert!(program.is_valid(), "{:#?}", program.diagnostics);

        let mut diagnostics = Diagnostics::default();
        let module = build_module(&program, &mut diagnostics);
        assert!(diagnostics.is_empty(), "{diagnostics:#?}");

        module.unwrap()
    }

    fn instructions(module: &Module, name: &str) -> Vec<InstructionKind> {
        let function = module.function_by_name(name).unwrap();

        module.functions[function]
            .blocks
            .iter()
            .flat_map(|block| &module.blocks[*block].instructions)
            .map(|instruction| module.instructions[*instruction].kind.clone())
            .collect()
    }

    #[test]
    fn constant_expressions_become_constants() {
        let module = build(indoc! {"
            const scale = 2.0 * 3.0;

            fn f() -> f32 {
                return scale + 1.0;
            }
        "});

        let body = instructions(&module, "f");
        assert_eq!(body.len(), 1);

        let InstructionKind::Return { value: Some(value) } = body[0] else {
            panic!("expected a return, found {body:?}");
        };
        assert_eq!(module.as_constant(value), Some(&ConstValue::Scalar(Scalar::F32(7.0))));
    }

    #[test]
    fn variables_are_hoisted_to_the_entry_block() {
        let module = build(indoc! {"
            fn f(n: i32) -> i32 {
                var total = 0;
                for (var i = 0; i < n; i++) {
                    var square = i * i;
                    total += square;
                }
                return total;
            }
        "});

        let function = module.function_by_name("f").unwrap();
        let entry = module.functions[function].entry_block().unwrap();

        let leading_variables = module.blocks[entry]
            .instructions
            .iter()
            .take_while(|id| matches!(module.instructions[**id].kind, InstructionKind::Variable { .. }))
            .count();
        assert_eq!(leading_variables, 3);

        assert_eq!(validate(&module), []);
    }

    #[test]
    fn short_circuits_produce_phis() {
        let module = build(indoc! {"
            fn f(a: bool, b: bool) -> bool {
                return a && b;
            }
        "});

        let body = instructions(&module, "f");
        assert!(body.iter().any(|kind| matches!(kind, InstructionKind::Phi { incoming } if incoming.len() == 2)));
        assert_eq!(validate(&module), []);
    }

    #[test]
    fn loops_declare_merge_and_continuing_blocks() {
        let module = build(indoc! {"
            fn f() -> i32 {
                var i = 0;
                loop {
                    if i > 4 {
                        break;
                    }
                    continuing {
                        i++;
                        break if i == 10;
                    }
                }
                return i;
            }
        "});

        let function = module.function_by_name("f").unwrap();
        let loops = module.functions[function]
            .blocks
            .iter()
            .filter(|block| matches!(module.blocks[**block].merge, Some(Merge::Loop { .. })))
            .count();

        assert_eq!(loops, 1);
        assert_eq!(validate(&module), []);
    }

    #[test]
    fn dynamic_indexing_of_array_values_spills_to_memory() {
        let module = build(indoc! {"
            fn f(i: i32) -> f32 {
                let values = array<f32, 3>(1.0, 2.0, 3.0);
                return values[i];
            }
        "});

        let body = instructions(&module, "f");
        assert!(body.iter().any(|kind| matches!(kind, InstructionKind::Variable { .. })));
        assert!(body.iter().any(|kind| matches!(kind, InstructionKind::Access { .. })));
        assert_eq!(validate(&module), []);
    }

    #[test]
    fn switch_cases_share_blocks() {
        let module = build(indoc! {"
            fn f(x: u32) -> u32 {
                var result = 0u;
                switch x {
                    case 1u, 2u: {
                        result = 10u;
                    }
                    case 3u, default: {
                        result = 20u;
                    }
                }
                return result;
            }
        "});

        let body = instructions(&module, "f");
        let Some(InstructionKind::Switch { cases, default, .. }) =
            body.iter().find(|kind| matches!(kind, InstructionKind::Switch { .. }))
        else {
            panic!("no switch in {body:?}");
        };

        assert_eq!(cases.len(), 3);
        assert_eq!(cases[0].1, cases[1].1);
        assert_eq!(cases[2].1, *default);
        assert_eq!(validate(&module), []);
    }
}

//! Semantic resolution. Binds identifiers to declarations, assigns a type to
//! every expression, folds const-expressions and computes the per-function
//! facts later stages rely on.
//!
//! Module scope is order independent: declarations are resolved on demand the
//! first time they are referenced, with cycles reported as errors. Function
//! bodies are resolved once every module-scope declaration is known.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use log::debug;

use crate::{
    diagnostics::{Diagnostic, DiagnosticSource, Diagnostics},
    frontend::{
        ast::{
            self, AttributeKind, DeclarationId, DeclarationKind, ExpressionId, StatementId, Variable, VariableKind,
        },
        lexer::Span,
    },
    middle::{
        constant::ConstValue,
        program::{
            BindingPoint, EvaluationStage, FunctionInfo, GlobalInfo, GlobalKind, SemanticInfo, WorkgroupDimension,
        },
        ty::{AccessMode, AddressSpace, ScalarKind, StructMember, StructType, TypeId, TypeKind, TypeTable, round_up},
    },
};

use self::scope::ScopeStack;

/// Reports a resolver error through [`crate::report_error`]
macro_rules! resolve_error {
    ($resolver:expr, $span:expr, $($message:tt)+) => {
        $crate::report_error!(
            $resolver.diagnostics,
            $crate::diagnostics::DiagnosticSource::Resolver,
            $span,
            $($message)+
        )
    };
}

mod entry_point;
mod expression;
mod scope;
mod statement;
mod types;

pub(crate) use self::expression::{swizzle, zero_value};

/// What a name is bound to in a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Declaration(DeclarationId),
    Parameter(usize),
    Local(StatementId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeclarationState {
    InProgress,
    /// Resolved, successfully or not
    Done(bool),
}

/// Statements `break` and `continue` may target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlFlow {
    Loop,
    Switch,
    Continuing,
}

/// State of the function whose body is being resolved
#[derive(Debug)]
struct FunctionContext {
    id: DeclarationId,
    info: FunctionInfo,
    control: Vec<ControlFlow>,
}

pub struct Resolver<'a> {
    module: &'a ast::Module,
    diagnostics: &'a mut Diagnostics,
    types: TypeTable,
    info: SemanticInfo,
    scopes: ScopeStack<Binding>,
    states: BTreeMap<DeclarationId, DeclarationState>,
    /// Declarations currently being resolved, outermost first
    dependency_stack: Vec<DeclarationId>,
    function: Option<FunctionContext>,
    /// Module-scope `var`s and overrides referenced since the enclosing
    /// declaration started resolving
    referenced: BTreeSet<DeclarationId>,
    f16_enabled: bool,
}

impl<'a> Resolver<'a> {
    /// Resolves `module`, appending any errors to `diagnostics`
    pub fn resolve(module: &'a ast::Module, diagnostics: &'a mut Diagnostics) -> (TypeTable, SemanticInfo) {
        let mut resolver = Self {
            module,
            diagnostics,
            types: TypeTable::new(),
            info: SemanticInfo::default(),
            scopes: ScopeStack::new(),
            states: BTreeMap::new(),
            dependency_stack: Vec::new(),
            function: None,
            referenced: BTreeSet::new(),
            f16_enabled: false,
        };

        resolver.check_enables();
        resolver.bind_declarations();

        for (id, declaration) in module.declarations.enumerate() {
            let span = declaration.name().map(|name| name.span).unwrap_or(declaration.span);
            resolver.resolve_declaration(id, span);
        }

        for (id, function) in module.functions() {
            if resolver.diagnostics.limit_reached() {
                break;
            }

            resolver.resolve_function_body(id, function);
        }

        resolver.analyze_call_graph();
        resolver.assign_override_ids();
        resolver.check_duplicate_bindings();
        resolver.validate_entry_points();

        debug!(
            "resolved {} declarations, {} types interned",
            module.declarations.len(),
            resolver.types.len()
        );

        (resolver.types, resolver.info)
    }

    fn check_enables(&mut self) {
        for enable in &self.module.enables {
            match self.module.name(*enable) {
                "f16" => self.f16_enabled = true,
                name => resolve_error!(self, enable.span, "unknown extension '{name}'"),
            }
        }
    }

    /// Binds every named module-scope declaration into the global scope
    fn bind_declarations(&mut self) {
        for (id, declaration) in self.module.declarations.enumerate() {
            let Some(name) = declaration.name() else {
                continue;
            };

            if let Some(Binding::Declaration(previous)) = self.scopes.get_global_binding(name.symbol).copied() {
                let previous_span = self.module.declaration(previous).name().map(|n| n.span).unwrap_or_default();
                self.error_with_note(
                    name.span,
                    format!("redeclaration of '{}'", self.module.name(name)),
                    previous_span,
                    "previously declared here",
                );
                continue;
            }

            self.scopes.add_global_binding(name.symbol, Binding::Declaration(id));
        }
    }

    /// Resolves a module-scope declaration if it was not resolved yet.
    /// `usage` is the span that required the declaration. Returns false if the
    /// declaration is invalid.
    fn resolve_declaration(&mut self, id: DeclarationId, usage: Span) -> bool {
        match self.states.get(&id) {
            Some(DeclarationState::Done(ok)) => return *ok,
            Some(DeclarationState::InProgress) => {
                self.report_cycle(id, usage);
                return false;
            }
            None => {}
        }

        self.states.insert(id, DeclarationState::InProgress);
        self.dependency_stack.push(id);

        // Module-scope declarations never see function locals
        let scopes = self.scopes.take_shallow_scopes();
        let function = self.function.take();
        let referenced = std::mem::take(&mut self.referenced);

        let declaration = self.module.declaration(id);
        let ok = match &declaration.kind {
            DeclarationKind::Function(function) => self.resolve_function_header(id, function),
            DeclarationKind::Variable(variable) => self.resolve_global_variable(id, variable),
            DeclarationKind::Struct(structure) => self.resolve_struct(id, structure),
            DeclarationKind::Alias(alias) => match self.resolve_type(alias.ty) {
                Some(ty) => {
                    self.info.type_declarations.insert(id, ty);
                    true
                }
                None => false,
            },
            DeclarationKind::ConstAssert(expression) => self.resolve_const_assert(*expression),
        };

        let dependencies = std::mem::replace(&mut self.referenced, referenced);
        if let Some(global) = self.info.globals.get_mut(&id) {
            global.dependencies = dependencies;
        }

        self.scopes.restore_shallow_scopes(scopes);
        self.function = function;

        self.dependency_stack.pop();
        self.states.insert(id, DeclarationState::Done(ok));

        ok
    }

    fn error_with_note(&mut self, span: Span, message: String, note_span: Span, note: impl Into<String>) {
        let diagnostic = Diagnostic::error(DiagnosticSource::Resolver, span, message)
            .with_note(note_span, note)
            .with_origin(crate::diagnostic_origin!());

        self.diagnostics.add(diagnostic);
    }

    fn report_cycle(&mut self, id: DeclarationId, usage: Span) {
        let start = self.dependency_stack.iter().position(|d| *d == id).unwrap_or(0);

        let chain = self.dependency_stack[start..]
            .iter()
            .chain(std::iter::once(&id))
            .map(|d| self.declaration_name(*d))
            .map(|name| format!("'{name}'"))
            .join(" -> ");

        resolve_error!(self, usage, "cyclic dependency found: {chain}");
    }

    fn declaration_name(&self, id: DeclarationId) -> &'a str {
        let module = self.module;

        module.declaration(id).name().map(|name| module.name(name)).unwrap_or("<anonymous>")
    }

    fn resolve_struct(&mut self, id: DeclarationId, structure: &ast::Struct) -> bool {
        let mut members = Vec::<StructMember>::new();
        let mut names = BTreeMap::new();
        let mut ok = true;
        let mut offset = 0;
        let mut struct_align = 1;

        for (index, member) in structure.members.iter().enumerate() {
            let name = self.module.name(member.name);

            if let Some(previous) = names.insert(name, member.name.span) {
                self.error_with_note(
                    member.name.span,
                    format!("redefinition of struct member '{name}'"),
                    previous,
                    "previously declared here",
                );
                ok = false;
            }

            let Some(ty) = self.resolve_type(member.ty) else {
                ok = false;
                continue;
            };

            let is_last = index + 1 == structure.members.len();
            if self.types.has_runtime_size(ty) && !is_last {
                resolve_error!(
                    self,
                    member.span,
                    "runtime-sized arrays can only be the last member of a struct"
                );
                ok = false;
            }

            if !self.types.is_constructible(ty)
                && !self.types.has_runtime_size(ty)
                && !matches!(self.types.get(ty), TypeKind::Atomic(_) | TypeKind::Array { .. })
            {
                resolve_error!(
                    self,
                    member.span,
                    "type '{}' cannot be used as a struct member",
                    self.types.name(ty)
                );
                ok = false;
            }

            let mut align = self.types.align_of(ty);
            let mut size = self.types.size_of(ty);

            for attribute in &member.attributes {
                match attribute.kind {
                    AttributeKind::Align(expression) => {
                        if let Some(value) = self.const_u32(expression, "align") {
                            if value.is_power_of_two() {
                                align = value;
                            } else {
                                resolve_error!(self, attribute.span, "@align value must be a positive power of two");
                                ok = false;
                            }
                        }
                    }
                    AttributeKind::Size(expression) => {
                        if let Some(value) = self.const_u32(expression, "size") {
                            if value >= size {
                                size = value;
                            } else {
                                resolve_error!(
                                    self,
                                    attribute.span,
                                    "@size must be at least the byte size of '{}'",
                                    self.types.name(ty)
                                );
                                ok = false;
                            }
                        }
                    }
                    AttributeKind::Builtin(_)
                    | AttributeKind::Location(_)
                    | AttributeKind::Interpolate { .. }
                    | AttributeKind::Invariant => {}
                    ref other => {
                        resolve_error!(self, attribute.span, "@{} is not valid on struct members", other.name());
                        ok = false;
                    }
                }
            }

            offset = round_up(align, offset);
            struct_align = struct_align.max(align);

            members.push(StructMember {
                name: name.to_string(),
                ty,
                offset,
                align,
                size,
            });

            offset += size;
        }

        if structure.members.is_empty() {
            resolve_error!(self, structure.name.span, "structures must have at least one member");
            ok = false;
        }

        if !ok {
            return false;
        }

        let ty = self.types.intern(TypeKind::Struct(StructType {
            name: self.module.name(structure.name).to_string(),
            declaration: id,
            members,
            align: struct_align,
            size: round_up(struct_align, offset),
        }));

        self.info.type_declarations.insert(id, ty);
        true
    }

    fn resolve_const_assert(&mut self, expression: ExpressionId) -> bool {
        let Some(info) = self.resolve_value(expression) else {
            return false;
        };

        let span = self.module.expression(expression).span;

        if self.types.as_scalar(info.ty) != Some(ScalarKind::Bool) {
            resolve_error!(
                self,
                span,
                "const assertion condition must be a bool, found '{}'",
                self.types.name(info.ty)
            );
            return false;
        }

        match info.value.as_ref().and_then(ConstValue::as_bool) {
            Some(true) => true,
            Some(false) => {
                resolve_error!(self, span, "const assertion failed");
                false
            }
            None => {
                resolve_error!(self, span, "const assertion condition must be a const-expression");
                false
            }
        }
    }

    fn resolve_global_variable(&mut self, id: DeclarationId, variable: &Variable) -> bool {
        let name = self.module.name(variable.name);

        let declared = match variable.ty {
            Some(ty) => match self.resolve_type(ty) {
                Some(ty) => Some(ty),
                None => return false,
            },
            None => None,
        };

        let mut ok = true;
        for attribute in &variable.attributes {
            let valid = match (&attribute.kind, variable.kind) {
                (AttributeKind::Group(_) | AttributeKind::Binding(_), VariableKind::Var { .. }) => true,
                (AttributeKind::Id(_), VariableKind::Override) => true,
                _ => false,
            };

            if !valid {
                resolve_error!(
                    self,
                    attribute.span,
                    "@{} is not valid on '{}' declarations",
                    attribute.kind.name(),
                    variable.kind.keyword()
                );
                ok = false;
            }
        }

        match variable.kind {
            VariableKind::Var { address_space, access } => {
                self.resolve_global_var(id, variable, declared, address_space, access) && ok
            }
            VariableKind::Const => {
                let Some(initializer) = variable.initializer else {
                    resolve_error!(self, variable.name.span, "'const' declaration '{name}' requires an initializer");
                    return false;
                };

                let Some(info) = self.resolve_initializer(initializer, declared, false) else {
                    return false;
                };

                if info.stage != EvaluationStage::Constant {
                    resolve_error!(
                        self,
                        self.module.expression(initializer).span,
                        "'const' initializer must be a const-expression"
                    );
                    return false;
                }

                self.info.globals.insert(
                    id,
                    GlobalInfo {
                        kind: GlobalKind::Const,
                        ty: info.ty,
                        binding: None,
                        override_id: None,
                        value: info.value,
                        dependencies: BTreeSet::new(),
                    },
                );

                ok
            }
            VariableKind::Override => {
                let mut value = None;
                let mut ty = declared;

                if let Some(initializer) = variable.initializer {
                    let Some(info) = self.resolve_initializer(initializer, declared, true) else {
                        return false;
                    };

                    if info.stage == EvaluationStage::Runtime {
                        resolve_error!(
                            self,
                            self.module.expression(initializer).span,
                            "'override' initializer must be an override-expression"
                        );
                        return false;
                    }

                    ty = Some(info.ty);
                    value = info.value;
                }

                let Some(ty) = ty else {
                    resolve_error!(
                        self,
                        variable.name.span,
                        "'override' declaration '{name}' requires a type or an initializer"
                    );
                    return false;
                };

                if !matches!(
                    self.types.as_scalar(ty),
                    Some(ScalarKind::Bool | ScalarKind::I32 | ScalarKind::U32 | ScalarKind::F32 | ScalarKind::F16)
                ) {
                    resolve_error!(
                        self,
                        variable.name.span,
                        "'override' type must be a concrete scalar, found '{}'",
                        self.types.name(ty)
                    );
                    return false;
                }

                let mut override_id = None;
                for attribute in &variable.attributes {
                    if let AttributeKind::Id(expression) = attribute.kind {
                        match self.const_u32(expression, "id") {
                            Some(id) => match u16::try_from(id) {
                                Ok(id) => override_id = Some(id),
                                Err(_) => {
                                    resolve_error!(self, attribute.span, "@id value must be less than 65536");
                                    ok = false;
                                }
                            },
                            None => ok = false,
                        }
                    }
                }

                self.info.globals.insert(
                    id,
                    GlobalInfo {
                        kind: GlobalKind::Override,
                        ty,
                        binding: None,
                        override_id,
                        value,
                        dependencies: BTreeSet::new(),
                    },
                );

                ok
            }
            VariableKind::Let => {
                resolve_error!(self, variable.name.span, "module-scope 'let' is invalid, use 'const'");
                false
            }
        }
    }

    fn resolve_global_var(
        &mut self,
        id: DeclarationId,
        variable: &Variable,
        declared: Option<TypeId>,
        address_space: Option<ast::Identifier>,
        access: Option<ast::Identifier>,
    ) -> bool {
        let name = self.module.name(variable.name);

        let space = match address_space {
            Some(identifier) => match self.module.name(identifier).parse::<AddressSpace>() {
                Ok(AddressSpace::Function | AddressSpace::Handle) | Err(_) => {
                    resolve_error!(
                        self,
                        identifier.span,
                        "invalid address space '{}' for a module-scope 'var'",
                        self.module.name(identifier)
                    );
                    return false;
                }
                Ok(space) => space,
            },
            None if declared.is_some_and(|ty| self.types.is_handle(ty)) => AddressSpace::Handle,
            None => {
                resolve_error!(self, variable.name.span, "module-scope 'var' '{name}' must specify an address space");
                return false;
            }
        };

        if space != AddressSpace::Handle && declared.is_some_and(|ty| self.types.is_handle(ty)) {
            resolve_error!(
                self,
                variable.span,
                "textures and samplers cannot be declared in the '{space}' address space"
            );
            return false;
        }

        let access = match access {
            Some(identifier) => {
                let parsed = self.module.name(identifier).parse::<AccessMode>();

                match parsed {
                    Ok(mode) if space == AddressSpace::Storage && mode != AccessMode::Write => mode,
                    Ok(_) if space != AddressSpace::Storage => {
                        resolve_error!(
                            self,
                            identifier.span,
                            "only variables in the 'storage' address space may specify an access mode"
                        );
                        return false;
                    }
                    _ => {
                        resolve_error!(
                            self,
                            identifier.span,
                            "invalid access mode '{}'",
                            self.module.name(identifier)
                        );
                        return false;
                    }
                }
            }
            None => space.default_access(),
        };

        let ty = match (declared, variable.initializer) {
            (_, Some(initializer)) if space != AddressSpace::Private => {
                resolve_error!(
                    self,
                    self.module.expression(initializer).span,
                    "variables in the '{space}' address space cannot have an initializer"
                );
                return false;
            }
            (declared, Some(initializer)) => {
                let Some(info) = self.resolve_initializer(initializer, declared, true) else {
                    return false;
                };

                if info.stage == EvaluationStage::Runtime {
                    resolve_error!(
                        self,
                        self.module.expression(initializer).span,
                        "module-scope 'var' initializer must be a const-expression or override-expression"
                    );
                    return false;
                }

                info.ty
            }
            (Some(ty), None) => ty,
            (None, None) => {
                resolve_error!(
                    self,
                    variable.name.span,
                    "'var' declaration '{name}' requires a type or an initializer"
                );
                return false;
            }
        };

        if !self.check_store_type(ty, space, variable.span) {
            return false;
        }

        let binding = self.resolve_binding_attributes(variable, space);

        self.info.globals.insert(
            id,
            GlobalInfo {
                kind: GlobalKind::Var { space, access },
                ty,
                binding: binding.flatten(),
                override_id: None,
                value: None,
                dependencies: BTreeSet::new(),
            },
        );

        binding.is_some()
    }

    /// Checks that `ty` may be stored in `space`
    fn check_store_type(&mut self, ty: TypeId, space: AddressSpace, span: Span) -> bool {
        let valid = match space {
            AddressSpace::Uniform => self.types.is_host_shareable(ty) && !self.types.has_runtime_size(ty),
            AddressSpace::Storage => self.types.is_host_shareable(ty),
            AddressSpace::Handle => self.types.is_handle(ty),
            AddressSpace::Function | AddressSpace::Private | AddressSpace::Workgroup => {
                !self.types.has_runtime_size(ty) && !self.types.is_handle(ty)
            }
        };

        let atomic_outside_shared_memory = contains_atomic(&self.types, ty)
            && !matches!(space, AddressSpace::Storage | AddressSpace::Workgroup);

        if !valid || atomic_outside_shared_memory {
            resolve_error!(
                self,
                span,
                "type '{}' cannot be used in address space '{space}'",
                self.types.name(ty)
            );
            return false;
        }

        true
    }

    /// Validates `@group` and `@binding`. Returns `None` on error and
    /// `Some(None)` for variables without a binding.
    fn resolve_binding_attributes(&mut self, variable: &Variable, space: AddressSpace) -> Option<Option<BindingPoint>> {
        let mut group = None;
        let mut binding = None;
        let mut ok = true;

        for attribute in &variable.attributes {
            match attribute.kind {
                AttributeKind::Group(expression) => match self.const_u32(expression, "group") {
                    Some(value) => group = Some(value),
                    None => ok = false,
                },
                AttributeKind::Binding(expression) => match self.const_u32(expression, "binding") {
                    Some(value) => binding = Some(value),
                    None => ok = false,
                },
                _ => {}
            }
        }

        if !ok {
            return None;
        }

        match (group, binding) {
            (Some(group), Some(binding)) if space.is_resource() => Some(Some(BindingPoint::new(group, binding))),
            (None, None) if !space.is_resource() => Some(None),
            (None, None) => {
                resolve_error!(
                    self,
                    variable.name.span,
                    "resource variable '{}' requires @group and @binding attributes",
                    self.module.name(variable.name)
                );
                None
            }
            _ if !space.is_resource() => {
                resolve_error!(
                    self,
                    variable.name.span,
                    "@group and @binding are only valid on resource variables"
                );
                None
            }
            _ => {
                resolve_error!(
                    self,
                    variable.name.span,
                    "resource variable '{}' must have both @group and @binding attributes",
                    self.module.name(variable.name)
                );
                None
            }
        }
    }

    fn resolve_function_header(&mut self, id: DeclarationId, function: &ast::Function) -> bool {
        let mut ok = true;

        let stages = function
            .attributes
            .iter()
            .filter(|attribute| matches!(attribute.kind, AttributeKind::Stage(_)))
            .collect::<Vec<_>>();

        if let [_, extra, ..] = stages.as_slice() {
            resolve_error!(self, extra.span, "functions can only have one pipeline stage attribute");
            ok = false;
        }

        let mut info = FunctionInfo::new(function.stage());
        let mut names = BTreeMap::new();

        for parameter in &function.parameters {
            if let Some(previous) = names.insert(parameter.name.symbol, parameter.name.span) {
                self.error_with_note(
                    parameter.name.span,
                    format!("redeclaration of parameter '{}'", self.module.name(parameter.name)),
                    previous,
                    "previously declared here",
                );
                ok = false;
            }

            match self.resolve_type(parameter.ty) {
                Some(ty) if self.types.is_constructible(ty) || self.is_valid_parameter_type(ty) => {
                    info.parameters.push(ty)
                }
                Some(ty) => {
                    resolve_error!(
                        self,
                        parameter.span,
                        "type '{}' cannot be used as a function parameter",
                        self.types.name(ty)
                    );
                    ok = false;
                }
                None => ok = false,
            }
        }

        if let Some(return_type) = function.return_type {
            match self.resolve_type(return_type) {
                Some(ty) if self.types.is_constructible(ty) => info.return_type = Some(ty),
                Some(ty) => {
                    resolve_error!(
                        self,
                        self.module.type_expression(return_type).span,
                        "type '{}' cannot be returned from a function",
                        self.types.name(ty)
                    );
                    ok = false;
                }
                None => ok = false,
            }
        }

        let mut has_workgroup_size = false;

        for attribute in &function.attributes {
            match attribute.kind {
                AttributeKind::Stage(_) => {}
                AttributeKind::WorkgroupSize { x, y, z } => {
                    has_workgroup_size = true;

                    if info.stage != Some(ast::PipelineStage::Compute) {
                        resolve_error!(
                            self,
                            attribute.span,
                            "@workgroup_size is only valid on compute entry points"
                        );
                        ok = false;
                        continue;
                    }

                    for (i, dimension) in [Some(x), y, z].into_iter().enumerate() {
                        if let Some(dimension) = dimension {
                            match self.resolve_workgroup_dimension(dimension) {
                                Some(dimension) => info.workgroup_size[i] = dimension,
                                None => ok = false,
                            }
                        }
                    }
                }
                ref other => {
                    resolve_error!(self, attribute.span, "@{} is not valid on functions", other.name());
                    ok = false;
                }
            }
        }

        if info.stage == Some(ast::PipelineStage::Compute) && !has_workgroup_size {
            resolve_error!(
                self,
                function.name.span,
                "compute entry point '{}' requires a @workgroup_size attribute",
                self.module.name(function.name)
            );
            ok = false;
        }

        info.direct_globals = std::mem::take(&mut self.referenced);

        if ok {
            self.info.functions.insert(id, info);
        }

        ok
    }

    fn is_valid_parameter_type(&self, ty: TypeId) -> bool {
        match self.types.get(ty) {
            TypeKind::Pointer { space, .. } => {
                matches!(space, AddressSpace::Function | AddressSpace::Private | AddressSpace::Workgroup)
            }
            TypeKind::Texture { .. } | TypeKind::Sampler(_) => true,
            _ => false,
        }
    }

    fn resolve_workgroup_dimension(&mut self, expression: ExpressionId) -> Option<WorkgroupDimension> {
        let span = self.module.expression(expression).span;
        let info = self.resolve_value(expression)?;

        let info = match self.types.as_scalar(info.ty) {
            Some(ScalarKind::AbstractInt) => {
                let i32 = self.types.i32();
                self.materialize(expression, info, i32)?
            }
            Some(ScalarKind::I32 | ScalarKind::U32) => info,
            _ => {
                resolve_error!(
                    self,
                    span,
                    "workgroup_size argument must be 'i32' or 'u32', found '{}'",
                    self.types.name(info.ty)
                );
                return None;
            }
        };

        match info.stage {
            EvaluationStage::Constant => {
                let value = info.value.as_ref().and_then(ConstValue::as_i64).unwrap_or(0);

                match u32::try_from(value) {
                    Ok(value) if value >= 1 => Some(WorkgroupDimension::Constant(value)),
                    _ => {
                        resolve_error!(self, span, "workgroup_size argument must be at least 1");
                        None
                    }
                }
            }
            EvaluationStage::Override => Some(WorkgroupDimension::Override(expression)),
            EvaluationStage::Runtime => {
                resolve_error!(
                    self,
                    span,
                    "workgroup_size argument must be a const-expression or override-expression"
                );
                None
            }
        }
    }

    /// Evaluates a const-expression attribute argument as a non-negative
    /// integer
    fn const_u32(&mut self, expression: ExpressionId, attribute: &str) -> Option<u32> {
        let span = self.module.expression(expression).span;
        let info = self.resolve_value(expression)?;

        if !self.types.as_scalar(info.ty).is_some_and(ScalarKind::is_integer) {
            resolve_error!(
                self,
                span,
                "@{attribute} value must be an integer, found '{}'",
                self.types.name(info.ty)
            );
            return None;
        }

        let Some(value) = info.value.as_ref().and_then(ConstValue::as_i64) else {
            resolve_error!(self, span, "@{attribute} value must be a const-expression");
            return None;
        };

        match u32::try_from(value) {
            Ok(value) => Some(value),
            Err(_) => {
                resolve_error!(self, span, "@{attribute} value must be a non-negative 32-bit integer");
                None
            }
        }
    }

    /// Computes the transitive sets of every function and rejects recursion
    fn analyze_call_graph(&mut self) {
        let functions = self.info.functions.keys().copied().collect::<Vec<_>>();

        let mut reported = BTreeSet::new();

        for &function in &functions {
            let mut transitive_calls = BTreeSet::new();
            let mut stack = vec![function];

            while let Some(current) = stack.pop() {
                let Some(info) = self.info.functions.get(&current) else {
                    continue;
                };

                for &callee in &info.direct_calls {
                    if callee == function && reported.insert(function) {
                        let span = self.module.declaration(function).name().map(|n| n.span).unwrap_or_default();
                        resolve_error!(
                            self,
                            span,
                            "recursion is not permitted: '{}' calls itself",
                            self.declaration_name(function)
                        );
                    }

                    if transitive_calls.insert(callee) {
                        stack.push(callee);
                    }
                }
            }

            let mut transitive_globals = self.info.functions[&function].direct_globals.clone();
            for callee in &transitive_calls {
                if let Some(info) = self.info.functions.get(callee) {
                    transitive_globals.extend(info.direct_globals.iter().copied());
                }
            }

            // Overrides referenced by an override's initializer are needed too
            let mut pending = transitive_globals.iter().copied().collect::<Vec<_>>();
            while let Some(global) = pending.pop() {
                if let Some(info) = self.info.globals.get(&global) {
                    for dependency in &info.dependencies {
                        if transitive_globals.insert(*dependency) {
                            pending.push(*dependency);
                        }
                    }
                }
            }

            let bindings = transitive_globals
                .iter()
                .filter_map(|global| Some((self.info.globals.get(global)?.binding?, *global)))
                .collect();

            if let Some(info) = self.info.functions.get_mut(&function) {
                info.transitive_calls = transitive_calls;
                info.transitive_globals = transitive_globals;
                info.bindings = bindings;
            }
        }

        for &function in &functions {
            if !self.info.functions[&function].is_entry_point() {
                continue;
            }

            let callees = self.info.functions[&function].transitive_calls.clone();
            for callee in std::iter::once(function).chain(callees) {
                if let Some(info) = self.info.functions.get_mut(&callee) {
                    info.ancestor_entry_points.insert(function);
                }
            }
        }
    }

    /// Checks `@id` uniqueness and gives every other override the lowest id
    /// not in use, in declaration order
    fn assign_override_ids(&mut self) {
        let mut used = BTreeMap::<u16, DeclarationId>::new();

        let explicit = self
            .info
            .globals
            .iter()
            .filter_map(|(&id, global)| Some((id, global.override_id?)))
            .collect::<Vec<_>>();

        for (id, override_id) in explicit {
            if let Some(previous) = used.insert(override_id, id) {
                let span = self.module.declaration(id).name().map(|n| n.span).unwrap_or_default();
                let previous_span = self.module.declaration(previous).name().map(|n| n.span).unwrap_or_default();
                self.error_with_note(
                    span,
                    format!("@id({override_id}) is used by more than one override"),
                    previous_span,
                    format!("@id({override_id}) previously used here"),
                );
            }
        }

        let mut next = 0u16;
        for (&id, global) in self.info.globals.iter_mut() {
            if !global.is_override() || global.override_id.is_some() {
                continue;
            }

            while used.contains_key(&next) {
                next = next.wrapping_add(1);
            }

            global.override_id = Some(next);
            used.insert(next, id);
        }
    }

    /// Reports every `(group, binding)` pair used by more than one module-scope
    /// variable, once per pair
    fn check_duplicate_bindings(&mut self) {
        let mut users = BTreeMap::<BindingPoint, Vec<DeclarationId>>::new();

        for (&id, global) in &self.info.globals {
            if let Some(binding) = global.binding {
                users.entry(binding).or_default().push(id);
            }
        }

        for (binding, declarations) in users {
            let [first, second, ..] = declarations.as_slice() else {
                continue;
            };

            let span = self.module.declaration(*second).name().map(|n| n.span).unwrap_or_default();
            let first_span = self.module.declaration(*first).name().map(|n| n.span).unwrap_or_default();

            self.error_with_note(
                span,
                format!("binding {binding} is used by {} variables", declarations.len()),
                first_span,
                format!("'{}' is bound to {binding} here", self.declaration_name(*first)),
            );
        }
    }
}

fn contains_atomic(types: &TypeTable, ty: TypeId) -> bool {
    match types.get(ty) {
        TypeKind::Atomic(_) => true,
        TypeKind::Array { element, .. } => contains_atomic(types, *element),
        TypeKind::Struct(structure) => structure.members.iter().any(|m| contains_atomic(types, m.ty)),
        _ => false,
    }
}

#[cfg(test)]
mod tests;

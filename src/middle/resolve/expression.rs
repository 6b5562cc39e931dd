//! Expression typing, materialization of abstract values and constant
//! folding.

use crate::{
    frontend::{
        ast::{
            BinaryOperatorClass, BinaryOperatorKind, DeclarationId, DeclarationKind, ExpressionId, ExpressionKind,
            Identifier, Literal, TypeExpressionId, UnaryOperatorKind,
        },
        lexer::{FloatSuffix, IntSuffix, Span},
    },
    middle::{
        builtin::BuiltinFunction,
        constant::{ConstEvalError, ConstValue, Scalar},
        program::{CallTarget, EvaluationStage, ExpressionInfo, GlobalKind, LocalKind, Resolution},
        ty::{AccessMode, AddressSpace, ArraySize, ScalarKind, TypeId, TypeKind, TypeTable},
    },
};

use super::{
    Binding, Resolver,
    types::{Shape, shape_from_name},
};

/// A resolved call argument
type Argument = (ExpressionId, ExpressionInfo);

/// Operand and result types of a binary operator application
pub(super) struct BinarySignature {
    pub lhs: TypeId,
    pub rhs: TypeId,
    pub result: TypeId,
    /// Matrix products are left to the backends
    foldable: bool,
}

impl<'a> Resolver<'a> {
    /// Resolves an expression. Expressions denoting memory keep their
    /// reference type; see [`Resolver::resolve_value`].
    pub(super) fn resolve_expression(&mut self, id: ExpressionId) -> Option<ExpressionInfo> {
        let module = self.module;
        let expression = module.expression(id);

        match &expression.kind {
            ExpressionKind::Literal(literal) => self.resolve_literal(id, *literal, expression.span),
            ExpressionKind::Identifier(identifier) => self.resolve_identifier(id, *identifier),
            ExpressionKind::Call { callee, arguments } => match self.resolve_call(id, *callee, arguments)? {
                Some(info) => Some(info),
                None => {
                    resolve_error!(
                        self,
                        expression.span,
                        "function '{}' does not return a value",
                        module.name(module.type_expression(*callee).name)
                    );
                    None
                }
            },
            ExpressionKind::Index { base, index } => self.resolve_index(id, *base, *index),
            ExpressionKind::Member { base, member } => self.resolve_member(id, *base, *member),
            ExpressionKind::Unary { operator, operand } => self.resolve_unary(id, *operator, *operand),
            ExpressionKind::Binary { lhs, operator, rhs } => self.resolve_binary(id, *lhs, *operator, *rhs),
            ExpressionKind::Grouping(inner) => {
                let info = self.resolve_expression(*inner)?;
                self.record(id, info.ty, info.stage, info.value)
            }
        }
    }

    /// Resolves an expression used as a value, loading references
    pub(super) fn resolve_value(&mut self, id: ExpressionId) -> Option<ExpressionInfo> {
        let info = self.resolve_expression(id)?;

        match *self.types.get(info.ty) {
            TypeKind::Reference { access, store, .. } => {
                if !access.can_read() {
                    resolve_error!(
                        self,
                        self.module.expression(id).span,
                        "cannot read from a write-only reference"
                    );
                    return None;
                }

                Some(ExpressionInfo {
                    ty: store,
                    stage: EvaluationStage::Runtime,
                    value: None,
                })
            }
            _ => Some(info),
        }
    }

    /// Converts a value to `target`, which must be its own type or a type its
    /// abstract type converts to
    pub(super) fn materialize(
        &mut self,
        id: ExpressionId,
        info: ExpressionInfo,
        target: TypeId,
    ) -> Option<ExpressionInfo> {
        if info.ty == target {
            return Some(info);
        }

        let span = self.module.expression(id).span;

        if !self.types.converts_to(info.ty, target) {
            resolve_error!(
                self,
                span,
                "type mismatch: expected '{}', found '{}'",
                self.types.name(target),
                self.types.name(info.ty)
            );
            return None;
        }

        let value = match (info.value, self.types.element_scalar(target)) {
            (Some(value), Some(scalar)) => Some(self.const_eval(span, value.convert(scalar))?),
            (value, _) => value,
        };

        self.record(id, target, info.stage, value)
    }

    /// Materializes a value to the concrete counterpart of its type
    pub(super) fn concretize(&mut self, id: ExpressionId, info: ExpressionInfo) -> Option<ExpressionInfo> {
        let concrete = self.types.concretize(info.ty);
        self.materialize(id, info, concrete)
    }

    /// Resolves the initializer of a `var`, `let`, `const` or `override`.
    /// Without a declared type, the value keeps its abstract type unless
    /// `concretize` is set.
    pub(super) fn resolve_initializer(
        &mut self,
        initializer: ExpressionId,
        declared: Option<TypeId>,
        concretize: bool,
    ) -> Option<ExpressionInfo> {
        let info = self.resolve_value(initializer)?;

        match declared {
            Some(ty) => self.materialize(initializer, info, ty),
            None if concretize => self.concretize(initializer, info),
            None => Some(info),
        }
    }

    fn record(
        &mut self,
        id: ExpressionId,
        ty: TypeId,
        stage: EvaluationStage,
        value: Option<ConstValue>,
    ) -> Option<ExpressionInfo> {
        let stage = match (stage, &value) {
            (EvaluationStage::Constant, None) => EvaluationStage::Runtime,
            (stage, _) => stage,
        };

        let info = ExpressionInfo {
            ty,
            stage,
            value: value.filter(|_| stage == EvaluationStage::Constant),
        };

        self.info.expressions.insert(id, info.clone());
        Some(info)
    }

    fn const_eval<T>(&mut self, span: Span, result: Result<T, ConstEvalError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                resolve_error!(self, span, "{error}");
                None
            }
        }
    }

    fn resolve_literal(&mut self, id: ExpressionId, literal: Literal, span: Span) -> Option<ExpressionInfo> {
        let (value, kind) = match literal {
            Literal::Bool(value) => (Scalar::Bool(value), ScalarKind::Bool),
            Literal::Int(value, suffix) => (
                Scalar::AbstractInt(value),
                match suffix {
                    IntSuffix::None => ScalarKind::AbstractInt,
                    IntSuffix::I => ScalarKind::I32,
                    IntSuffix::U => ScalarKind::U32,
                },
            ),
            Literal::Float(value, suffix) => (
                Scalar::AbstractFloat(value),
                match suffix {
                    FloatSuffix::None => ScalarKind::AbstractFloat,
                    FloatSuffix::F => ScalarKind::F32,
                    FloatSuffix::H => ScalarKind::F16,
                },
            ),
        };

        self.check_scalar_enabled(kind, span)?;

        let value = self.const_eval(span, value.convert(kind))?;
        let ty = self.types.scalar(kind);

        self.record(id, ty, EvaluationStage::Constant, Some(value.into()))
    }

    fn resolve_identifier(&mut self, id: ExpressionId, identifier: Identifier) -> Option<ExpressionInfo> {
        let module = self.module;
        let name = module.name(identifier);

        let Some(binding) = self.scopes.get_binding(identifier.symbol).copied() else {
            resolve_error!(self, identifier.span, "unresolved identifier '{name}'");
            return None;
        };

        let (resolution, ty, stage, value) = match binding {
            Binding::Declaration(declaration) => {
                match module.declaration(declaration).kind {
                    DeclarationKind::Variable(_) => {}
                    DeclarationKind::Function(_) => {
                        resolve_error!(self, identifier.span, "cannot use function '{name}' as a value");
                        return None;
                    }
                    _ => {
                        resolve_error!(self, identifier.span, "cannot use type '{name}' as a value");
                        return None;
                    }
                }

                if !self.resolve_declaration(declaration, identifier.span) {
                    return None;
                }

                let global = self.info.globals.get(&declaration)?;
                let (kind, store, value) = (global.kind, global.ty, global.value.clone());

                let (ty, stage) = match kind {
                    GlobalKind::Var { space, access } => {
                        self.referenced.insert(declaration);
                        (self.types.reference(space, access, store), EvaluationStage::Runtime)
                    }
                    GlobalKind::Const => (store, EvaluationStage::Constant),
                    GlobalKind::Override => {
                        self.referenced.insert(declaration);
                        (store, EvaluationStage::Override)
                    }
                };

                (Resolution::Global(declaration), ty, stage, value)
            }
            Binding::Parameter(index) => {
                let context = self.function.as_ref()?;
                let ty = *context.info.parameters.get(index)?;

                (
                    Resolution::Parameter {
                        function: context.id,
                        index,
                    },
                    ty,
                    EvaluationStage::Runtime,
                    None,
                )
            }
            Binding::Local(statement) => {
                let local = self.info.locals.get(&statement)?;
                let (kind, store, value) = (local.kind, local.ty, local.value.clone());

                let (ty, stage) = match kind {
                    LocalKind::Var => (
                        self.types.reference(AddressSpace::Function, AccessMode::ReadWrite, store),
                        EvaluationStage::Runtime,
                    ),
                    LocalKind::Let => (store, EvaluationStage::Runtime),
                    LocalKind::Const => (store, EvaluationStage::Constant),
                };

                (Resolution::Local(statement), ty, stage, value)
            }
        };

        self.info.resolutions.insert(id, resolution);
        self.record(id, ty, stage, value)
    }

    /// Resolves a call expression. Returns `Some(None)` for calls that produce
    /// no value, which are only valid as call statements.
    pub(super) fn resolve_call(
        &mut self,
        id: ExpressionId,
        callee: TypeExpressionId,
        arguments: &'a [ExpressionId],
    ) -> Option<Option<ExpressionInfo>> {
        let module = self.module;
        let callee_expression = module.type_expression(callee);
        let name = module.name(callee_expression.name);
        let span = module.expression(id).span;

        let binding = self.scopes.get_binding(callee_expression.name.symbol).copied();

        match binding {
            Some(Binding::Declaration(declaration)) => match module.declaration(declaration).kind {
                DeclarationKind::Function(_) => {
                    if !callee_expression.template.is_empty() {
                        resolve_error!(
                            self,
                            callee_expression.span,
                            "function '{name}' does not take template arguments"
                        );
                        return None;
                    }

                    return self.call_function(id, declaration, arguments, span);
                }
                DeclarationKind::Struct(_) | DeclarationKind::Alias(_) => {}
                _ => {
                    resolve_error!(self, callee_expression.name.span, "'{name}' is not callable");
                    return None;
                }
            },
            Some(_) => {
                resolve_error!(self, callee_expression.name.span, "'{name}' is not callable");
                return None;
            }
            None => {}
        }

        let arguments = self.resolve_arguments(arguments)?;

        if binding.is_none() {
            if name == "bitcast" {
                return self.bitcast(id, callee, &arguments, span).map(Some);
            }

            if let Some(builtin) = BuiltinFunction::from_name(name) {
                if !callee_expression.template.is_empty() {
                    resolve_error!(
                        self,
                        callee_expression.span,
                        "builtin '{name}' does not take template arguments"
                    );
                    return None;
                }

                return self.call_builtin(id, builtin, arguments, span);
            }

            let inferred = name == "array" || shape_from_name(name).is_some();
            if inferred && callee_expression.template.is_empty() {
                let ty = self.infer_constructor_type(name, &arguments, span)?;
                return self.construct(id, ty, arguments, span).map(Some);
            }
        }

        let ty = self.resolve_type(callee)?;
        self.construct(id, ty, arguments, span).map(Some)
    }

    /// Resolves every argument, reporting errors in all of them
    fn resolve_arguments(&mut self, arguments: &[ExpressionId]) -> Option<Vec<Argument>> {
        let resolved = arguments
            .iter()
            .map(|&argument| Some((argument, self.resolve_value(argument)?)))
            .collect::<Vec<_>>();

        resolved.into_iter().collect()
    }

    fn call_function(
        &mut self,
        id: ExpressionId,
        declaration: DeclarationId,
        arguments: &'a [ExpressionId],
        span: Span,
    ) -> Option<Option<ExpressionInfo>> {
        let name = self.declaration_name(declaration);

        if self.function.is_none() {
            resolve_error!(
                self,
                span,
                "user-defined function '{name}' cannot be called outside of a function body"
            );
            return None;
        }

        let arguments = self.resolve_arguments(arguments);

        if !self.resolve_declaration(declaration, span) {
            return None;
        }

        let arguments = arguments?;
        let callee = self.info.functions.get(&declaration)?;
        let (parameters, return_type) = (callee.parameters.clone(), callee.return_type);

        if callee.is_entry_point() {
            resolve_error!(self, span, "entry point '{name}' cannot be called");
            return None;
        }

        if arguments.len() != parameters.len() {
            resolve_error!(
                self,
                span,
                "'{name}' expects {} argument{}, found {}",
                parameters.len(),
                if parameters.len() == 1 { "" } else { "s" },
                arguments.len()
            );
            return None;
        }

        let mut ok = true;
        for ((argument, info), parameter) in arguments.into_iter().zip(parameters) {
            ok &= self.materialize(argument, info, parameter).is_some();
        }

        if !ok {
            return None;
        }

        if let Some(context) = self.function.as_mut() {
            context.info.direct_calls.insert(declaration);
        }

        self.info.calls.insert(id, CallTarget::Function(declaration));

        match return_type {
            Some(ty) => self.record(id, ty, EvaluationStage::Runtime, None).map(Some),
            None => Some(None),
        }
    }

    fn call_builtin(
        &mut self,
        id: ExpressionId,
        builtin: BuiltinFunction,
        arguments: Vec<Argument>,
        span: Span,
    ) -> Option<Option<ExpressionInfo>> {
        let argument_types = arguments.iter().map(|(_, info)| info.ty).collect::<Vec<_>>();

        let signature = match builtin.check(&mut self.types, &argument_types) {
            Ok(signature) => signature,
            Err(message) => {
                resolve_error!(self, span, "{message}");
                return None;
            }
        };

        let ids = arguments.iter().map(|(argument, _)| *argument).collect::<Vec<_>>();

        let mut materialized = Vec::with_capacity(arguments.len());
        for ((argument, info), parameter) in arguments.into_iter().zip(&signature.parameters) {
            materialized.push(self.materialize(argument, info, *parameter)?);
        }

        if let Some(context) = self.function.as_mut() {
            context.info.builtin_calls.push((builtin, span));
        }

        let mut parameters = signature.parameters;

        let Some(mut return_type) = signature.return_type else {
            self.info.calls.insert(
                id,
                CallTarget::Builtin {
                    function: builtin,
                    parameters,
                },
            );
            return Some(None);
        };

        let mut stage = if builtin.is_pure() {
            materialized
                .iter()
                .map(|info| info.stage)
                .max()
                .unwrap_or(EvaluationStage::Constant)
        } else {
            EvaluationStage::Runtime
        };

        let mut value = None;
        if stage == EvaluationStage::Constant {
            let values = materialized.iter().filter_map(|info| info.value.clone()).collect::<Vec<_>>();

            match builtin.evaluate(&values) {
                Some(result) => value = Some(self.const_eval(span, result)?),
                None => stage = EvaluationStage::Runtime,
            }
        }

        // Evaluated by the shader, so abstract arguments take concrete types
        if stage == EvaluationStage::Runtime {
            for (index, info) in materialized.into_iter().enumerate() {
                let concrete = self.types.concretize(parameters[index]);
                parameters[index] = concrete;
                self.materialize(ids[index], info, concrete)?;
            }

            return_type = self.types.concretize(return_type);
        }

        self.info.calls.insert(
            id,
            CallTarget::Builtin {
                function: builtin,
                parameters,
            },
        );

        self.record(id, return_type, stage, value).map(Some)
    }

    fn bitcast(
        &mut self,
        id: ExpressionId,
        callee: TypeExpressionId,
        arguments: &[Argument],
        span: Span,
    ) -> Option<ExpressionInfo> {
        let module = self.module;

        let [template] = module.type_expression(callee).template.as_slice() else {
            resolve_error!(self, span, "'bitcast' expects 1 template argument");
            return None;
        };

        let target = self.template_type(*template)?;

        let [(argument, info)] = arguments else {
            resolve_error!(self, span, "'bitcast' expects 1 argument, found {}", arguments.len());
            return None;
        };

        let info = self.concretize(*argument, info.clone())?;

        let width = |parts: Option<(Option<u8>, ScalarKind)>| match parts {
            Some((_, ScalarKind::Bool)) | None => None,
            Some((size, scalar)) => Some(u32::from(size.unwrap_or(1)) * scalar.size()),
        };

        let from = width(self.types.scalar_or_vector_parts(info.ty));
        let to = width(self.types.scalar_or_vector_parts(target));

        if from.is_none() || from != to {
            resolve_error!(
                self,
                span,
                "cannot bitcast from '{}' to '{}'",
                self.types.name(info.ty),
                self.types.name(target)
            );
            return None;
        }

        let value = match (&info.value, self.types.element_scalar(target)) {
            (Some(value), Some(scalar)) => bitcast_value(value, scalar),
            _ => None,
        };

        self.info.calls.insert(id, CallTarget::Bitcast(target));
        self.record(id, target, info.stage, value)
    }

    /// The type of `vecN(...)`, `matCxR(...)` or `array(...)` without template
    /// arguments
    fn infer_constructor_type(&mut self, name: &str, arguments: &[Argument], span: Span) -> Option<TypeId> {
        if name == "array" {
            let Some(((_, first), rest)) = arguments.split_first() else {
                resolve_error!(self, span, "cannot infer the element type of an empty array");
                return None;
            };

            let mut element = first.ty;
            for (_, info) in rest {
                match self.types.common_type(element, info.ty) {
                    Some(common) => element = common,
                    None => {
                        resolve_error!(
                            self,
                            span,
                            "array elements must have the same type, found '{}' and '{}'",
                            self.types.name(element),
                            self.types.name(info.ty)
                        );
                        return None;
                    }
                }
            }

            let count = u32::try_from(arguments.len()).ok()?;
            return Some(self.types.intern(TypeKind::Array {
                element,
                size: ArraySize::Constant(count),
            }));
        }

        let shape = shape_from_name(name)?;

        let mut common: Option<ScalarKind> = None;
        for (_, info) in arguments {
            let Some(scalar) = self.types.element_scalar(info.ty).filter(|_| {
                matches!(
                    self.types.get(info.ty),
                    TypeKind::Scalar(_) | TypeKind::Vector { .. } | TypeKind::Matrix { .. }
                )
            }) else {
                resolve_error!(
                    self,
                    span,
                    "cannot infer the type of '{name}' from an argument of type '{}'",
                    self.types.name(info.ty)
                );
                return None;
            };

            common = match common {
                None => Some(scalar),
                Some(current) => match common_scalar(current, scalar) {
                    Some(scalar) => Some(scalar),
                    None => {
                        resolve_error!(
                            self,
                            span,
                            "arguments of '{name}' have no common type: '{current}' and '{scalar}'"
                        );
                        return None;
                    }
                },
            };
        }

        let scalar = common.unwrap_or(ScalarKind::F32);

        match shape {
            Shape::Vector(size) => Some(self.types.vector(size, scalar)),
            Shape::Matrix(columns, rows) => {
                let scalar = match scalar {
                    ScalarKind::AbstractInt => ScalarKind::AbstractFloat,
                    scalar if scalar.is_float() => scalar,
                    scalar => {
                        resolve_error!(self, span, "matrix elements must be floating point, found '{scalar}'");
                        return None;
                    }
                };

                Some(self.types.intern(TypeKind::Matrix { columns, rows, scalar }))
            }
        }
    }

    /// Value constructors `T(...)`, including zero values and conversions
    fn construct(
        &mut self,
        id: ExpressionId,
        ty: TypeId,
        arguments: Vec<Argument>,
        span: Span,
    ) -> Option<ExpressionInfo> {
        if !self.types.is_constructible(ty) {
            resolve_error!(self, span, "type '{}' is not constructible", self.types.name(ty));
            return None;
        }

        if arguments.is_empty() {
            self.info.calls.insert(id, CallTarget::Construct(ty));
            let value = zero_value(&self.types, ty);
            return self.record(id, ty, EvaluationStage::Constant, value);
        }

        let kind = self.types.get(ty).clone();

        // Same-shape single argument: identity, materialization or conversion
        if let [(argument, info)] = arguments.as_slice() {
            let same_shape = match (&kind, self.types.get(info.ty)) {
                (TypeKind::Scalar(_), TypeKind::Scalar(_)) => true,
                (TypeKind::Vector { size: n, .. }, TypeKind::Vector { size: m, .. }) => n == m,
                (
                    TypeKind::Matrix { columns, rows, .. },
                    TypeKind::Matrix {
                        columns: c,
                        rows: r,
                        ..
                    },
                ) => columns == c && rows == r,
                _ => false,
            };

            if same_shape {
                return self.convert(id, ty, *argument, info.clone(), span);
            }
        }

        let elements = match kind {
            TypeKind::Scalar(_) => {
                return self.constructor_mismatch(ty, &arguments, span);
            }
            TypeKind::Vector { size, scalar } => {
                let mut components = 0;
                let mut elements = Vec::with_capacity(arguments.len());

                for (argument, info) in arguments {
                    let Some((count, _)) = self.types.scalar_or_vector_parts(info.ty) else {
                        resolve_error!(
                            self,
                            self.module.expression(argument).span,
                            "'{}' is not a valid vector component",
                            self.types.name(info.ty)
                        );
                        return None;
                    };

                    let target = self.types.scalar_or_vector(count, scalar);
                    elements.push(self.materialize(argument, info, target)?);
                    components += count.unwrap_or(1);
                }

                // Splat
                if components == 1 {
                    if let [single] = elements.as_slice() {
                        elements = vec![single.clone(); usize::from(size)];
                        components = size;
                    }
                }

                if components != size {
                    resolve_error!(
                        self,
                        span,
                        "'{}' constructor expects {size} components, found {components}",
                        self.types.name(ty)
                    );
                    return None;
                }

                return self.record_composite(id, ty, elements, true);
            }
            TypeKind::Matrix { columns, rows, scalar } => {
                let column = self.types.vector(rows, scalar);
                let element = self.types.scalar(scalar);

                let all = |resolver: &Self, count: usize, target: TypeId| {
                    arguments.len() == count && arguments.iter().all(|(_, info)| resolver.types.converts_to(info.ty, target))
                };

                let columns = usize::from(columns);
                let rows = usize::from(rows);

                if all(self, columns, column) {
                    self.materialize_all(arguments, |_| column)?
                } else if all(self, columns * rows, element) {
                    let scalars = self.materialize_all(arguments, |_| element)?;

                    if scalars.iter().all(|info| info.stage == EvaluationStage::Constant) {
                        let values = scalars
                            .chunks(rows)
                            .map(|chunk| ConstValue::Composite(chunk.iter().filter_map(|i| i.value.clone()).collect()))
                            .collect();
                        self.info.calls.insert(id, CallTarget::Construct(ty));
                        return self.record(id, ty, EvaluationStage::Constant, Some(ConstValue::Composite(values)));
                    }

                    let stage = scalars.iter().map(|i| i.stage).max().unwrap_or(EvaluationStage::Constant);
                    self.info.calls.insert(id, CallTarget::Construct(ty));
                    return self.record(id, ty, stage, None);
                } else {
                    return self.constructor_mismatch(ty, &arguments, span);
                }
            }
            TypeKind::Array {
                element,
                size: ArraySize::Constant(count),
            } => {
                if arguments.len() != count as usize {
                    resolve_error!(
                        self,
                        span,
                        "'{}' constructor expects {count} elements, found {}",
                        self.types.name(ty),
                        arguments.len()
                    );
                    return None;
                }

                self.materialize_all(arguments, |_| element)?
            }
            TypeKind::Struct(structure) => {
                if arguments.len() != structure.members.len() {
                    resolve_error!(
                        self,
                        span,
                        "'{}' constructor expects {} members, found {}",
                        structure.name,
                        structure.members.len(),
                        arguments.len()
                    );
                    return None;
                }

                self.materialize_all(arguments, |index| structure.members[index].ty)?
            }
            _ => return self.constructor_mismatch(ty, &arguments, span),
        };

        self.record_composite(id, ty, elements, false)
    }

    /// Materializes argument `i` to `target(i)`, reporting every mismatch
    fn materialize_all(
        &mut self,
        arguments: Vec<Argument>,
        target: impl Fn(usize) -> TypeId,
    ) -> Option<Vec<ExpressionInfo>> {
        let materialized = arguments
            .into_iter()
            .enumerate()
            .map(|(index, (argument, info))| self.materialize(argument, info, target(index)))
            .collect::<Vec<_>>();

        materialized.into_iter().collect()
    }

    /// Records a constructor whose arguments are its elements. With
    /// `flatten`, vector arguments contribute their components.
    fn record_composite(
        &mut self,
        id: ExpressionId,
        ty: TypeId,
        elements: Vec<ExpressionInfo>,
        flatten: bool,
    ) -> Option<ExpressionInfo> {
        let stage = elements
            .iter()
            .map(|info| info.stage)
            .max()
            .unwrap_or(EvaluationStage::Constant);

        let value = (stage == EvaluationStage::Constant).then(|| {
            let mut values = Vec::new();

            for value in elements.into_iter().filter_map(|info| info.value) {
                match value {
                    ConstValue::Composite(components) if flatten => values.extend(components),
                    value => values.push(value),
                }
            }

            ConstValue::Composite(values)
        });

        self.info.calls.insert(id, CallTarget::Construct(ty));
        self.record(id, ty, stage, value)
    }

    /// `T(e)` where `e` has the shape of `T`
    fn convert(
        &mut self,
        id: ExpressionId,
        ty: TypeId,
        argument: ExpressionId,
        info: ExpressionInfo,
        span: Span,
    ) -> Option<ExpressionInfo> {
        if self.types.converts_to(info.ty, ty) {
            let info = self.materialize(argument, info, ty)?;
            self.info.calls.insert(id, CallTarget::Construct(ty));
            return self.record(id, ty, info.stage, info.value);
        }

        let scalar = self.types.element_scalar(ty)?;

        let value = match &info.value {
            Some(value) => Some(self.const_eval(span, value.convert(scalar))?),
            None => None,
        };

        // A runtime conversion starts from a concrete value
        if info.stage != EvaluationStage::Constant && self.types.is_abstract(info.ty) {
            self.concretize(argument, info.clone())?;
        }

        self.info.calls.insert(id, CallTarget::Convert(ty));
        self.record(id, ty, info.stage, value)
    }

    fn constructor_mismatch(&mut self, ty: TypeId, arguments: &[Argument], span: Span) -> Option<ExpressionInfo> {
        let found = arguments
            .iter()
            .map(|(_, info)| self.types.name(info.ty))
            .collect::<Vec<_>>()
            .join(", ");

        resolve_error!(self, span, "no matching constructor for '{}({found})'", self.types.name(ty));
        None
    }

    fn resolve_index(&mut self, id: ExpressionId, base: ExpressionId, index: ExpressionId) -> Option<ExpressionInfo> {
        let base_info = self.resolve_expression(base)?;
        let index_info = self.resolve_value(index)?;
        let index_span = self.module.expression(index).span;

        let index_info = match self.types.as_scalar(index_info.ty) {
            Some(ScalarKind::AbstractInt) => {
                let i32 = self.types.i32();
                self.materialize(index, index_info, i32)?
            }
            Some(ScalarKind::I32 | ScalarKind::U32) => index_info,
            _ => {
                resolve_error!(
                    self,
                    index_span,
                    "index must be of type 'i32' or 'u32', found '{}'",
                    self.types.name(index_info.ty)
                );
                return None;
            }
        };

        let (reference, container) = match *self.types.get(base_info.ty) {
            TypeKind::Reference { space, access, store } => (Some((space, access)), store),
            _ => (None, base_info.ty),
        };

        let (element, count) = match self.types.get(container).clone() {
            TypeKind::Vector { size, scalar } => (self.types.scalar(scalar), Some(u32::from(size))),
            TypeKind::Matrix { columns, rows, scalar } => (self.types.vector(rows, scalar), Some(u32::from(columns))),
            TypeKind::Array { element, size } => (
                element,
                match size {
                    ArraySize::Constant(count) => Some(count),
                    ArraySize::Override(_) | ArraySize::Runtime => None,
                },
            ),
            _ => {
                resolve_error!(
                    self,
                    self.module.expression(id).span,
                    "cannot index a value of type '{}'",
                    self.types.name(container)
                );
                return None;
            }
        };

        let constant_index = index_info.value.as_ref().and_then(ConstValue::as_i64);

        let out_of_bounds = match (constant_index, count) {
            (Some(position), Some(count)) => position < 0 || position >= i64::from(count),
            _ => false,
        };

        if out_of_bounds {
            let position = constant_index.unwrap_or_default();
            resolve_error!(
                self,
                index_span,
                "index {position} is out of bounds for '{}'",
                self.types.name(container)
            );
            return None;
        }

        if let Some((space, access)) = reference {
            let ty = self.types.reference(space, access, element);
            return self.record(id, ty, EvaluationStage::Runtime, None);
        }

        let stage = base_info.stage.max(index_info.stage);

        if stage == EvaluationStage::Constant {
            let value = match (&base_info.value, constant_index) {
                (Some(value), Some(position)) => usize::try_from(position)
                    .ok()
                    .and_then(|position| value.elements().get(position).cloned()),
                _ => None,
            };

            return self.record(id, element, stage, value);
        }

        // A constant indexed at runtime becomes a concrete value
        let element = if self.types.is_abstract(container) {
            self.concretize(base, base_info)?;
            self.types.concretize(element)
        } else {
            element
        };

        self.record(id, element, stage, None)
    }

    fn resolve_member(&mut self, id: ExpressionId, base: ExpressionId, member: Identifier) -> Option<ExpressionInfo> {
        let base_info = self.resolve_expression(base)?;
        let name = self.module.name(member);

        let (reference, container) = match *self.types.get(base_info.ty) {
            TypeKind::Reference { space, access, store } => (Some((space, access)), store),
            _ => (None, base_info.ty),
        };

        match self.types.get(container).clone() {
            TypeKind::Struct(structure) => {
                let Some((index, field)) = structure.member(name) else {
                    resolve_error!(
                        self,
                        member.span,
                        "struct '{}' has no member named '{name}'",
                        structure.name
                    );
                    return None;
                };

                match reference {
                    Some((space, access)) => {
                        let ty = self.types.reference(space, access, field.ty);
                        self.record(id, ty, EvaluationStage::Runtime, None)
                    }
                    None => {
                        let value = base_info.value.and_then(|value| value.elements().get(index).cloned());
                        self.record(id, field.ty, base_info.stage, value)
                    }
                }
            }
            TypeKind::Vector { size, scalar } => {
                let Some(indices) = swizzle(name, size) else {
                    resolve_error!(self, member.span, "invalid vector swizzle '{name}'");
                    return None;
                };

                if let [component] = indices.as_slice() {
                    let element = self.types.scalar(scalar);

                    return match reference {
                        Some((space, access)) => {
                            let ty = self.types.reference(space, access, element);
                            self.record(id, ty, EvaluationStage::Runtime, None)
                        }
                        None => {
                            let value = base_info.value.and_then(|value| value.elements().get(*component).cloned());
                            self.record(id, element, base_info.stage, value)
                        }
                    };
                }

                let size = u8::try_from(indices.len()).ok()?;
                let ty = self.types.vector(size, scalar);

                if reference.is_some() {
                    return self.record(id, ty, EvaluationStage::Runtime, None);
                }

                let value = base_info.value.map(|value| {
                    ConstValue::Composite(
                        indices
                            .iter()
                            .filter_map(|index| value.elements().get(*index).cloned())
                            .collect(),
                    )
                });

                self.record(id, ty, base_info.stage, value)
            }
            _ => {
                resolve_error!(
                    self,
                    member.span,
                    "type '{}' has no member named '{name}'",
                    self.types.name(container)
                );
                None
            }
        }
    }

    fn resolve_unary(
        &mut self,
        id: ExpressionId,
        operator: UnaryOperatorKind,
        operand: ExpressionId,
    ) -> Option<ExpressionInfo> {
        let span = self.module.expression(id).span;

        match operator {
            UnaryOperatorKind::AddressOf => {
                let info = self.resolve_expression(operand)?;

                let TypeKind::Reference { space, access, store } = *self.types.get(info.ty) else {
                    resolve_error!(
                        self,
                        span,
                        "cannot take the address of a value of type '{}'",
                        self.types.name(info.ty)
                    );
                    return None;
                };

                if space == AddressSpace::Handle {
                    resolve_error!(self, span, "cannot take the address of a texture or sampler");
                    return None;
                }

                if self.is_vector_component(operand) {
                    resolve_error!(self, span, "cannot take the address of a vector component");
                    return None;
                }

                let ty = self.types.pointer(space, access, store);
                self.record(id, ty, EvaluationStage::Runtime, None)
            }
            UnaryOperatorKind::Deref => {
                let info = self.resolve_value(operand)?;

                let TypeKind::Pointer { space, access, pointee } = *self.types.get(info.ty) else {
                    resolve_error!(
                        self,
                        span,
                        "cannot dereference a value of type '{}'",
                        self.types.name(info.ty)
                    );
                    return None;
                };

                let ty = self.types.reference(space, access, pointee);
                self.record(id, ty, EvaluationStage::Runtime, None)
            }
            UnaryOperatorKind::Negate | UnaryOperatorKind::LogicalNot | UnaryOperatorKind::BitwiseNot => {
                let info = self.resolve_value(operand)?;

                let valid = self.types.scalar_or_vector_parts(info.ty).is_some_and(|(_, scalar)| match operator {
                    UnaryOperatorKind::Negate => scalar.is_numeric() && scalar.is_signed(),
                    UnaryOperatorKind::LogicalNot => scalar == ScalarKind::Bool,
                    _ => scalar.is_integer(),
                });

                if !valid {
                    resolve_error!(
                        self,
                        span,
                        "no matching overload for operator '{operator}' with operand '{}'",
                        self.types.name(info.ty)
                    );
                    return None;
                }

                let value = match &info.value {
                    Some(value) => Some(self.const_eval(span, value.unary(operator))?),
                    None => None,
                };

                self.record(id, info.ty, info.stage, value)
            }
        }
    }

    fn is_vector_component(&self, expression: ExpressionId) -> bool {
        let (ExpressionKind::Index { base, .. } | ExpressionKind::Member { base, .. }) =
            &self.module.expression(expression).kind
        else {
            return false;
        };

        self.info
            .expressions
            .get(base)
            .is_some_and(|info| matches!(self.types.get(self.types.value_type(info.ty)), TypeKind::Vector { .. }))
    }

    fn resolve_binary(
        &mut self,
        id: ExpressionId,
        lhs: ExpressionId,
        operator: BinaryOperatorKind,
        rhs: ExpressionId,
    ) -> Option<ExpressionInfo> {
        let span = self.module.expression(id).span;

        let lhs_info = self.resolve_value(lhs);
        let rhs_info = self.resolve_value(rhs);
        let (lhs_info, rhs_info) = (lhs_info?, rhs_info?);

        let Some(signature) = self.binary_signature(operator, lhs_info.ty, rhs_info.ty) else {
            resolve_error!(
                self,
                span,
                "no matching overload for operator '{operator}' with operands '{}' and '{}'",
                self.types.name(lhs_info.ty),
                self.types.name(rhs_info.ty)
            );
            return None;
        };

        let lhs_info = self.materialize(lhs, lhs_info, signature.lhs)?;
        let rhs_info = self.materialize(rhs, rhs_info, signature.rhs)?;
        let stage = lhs_info.stage.max(rhs_info.stage);

        if stage != EvaluationStage::Constant {
            return self.record(id, signature.result, stage, None);
        }

        if signature.foldable {
            if let (Some(a), Some(b)) = (&lhs_info.value, &rhs_info.value) {
                let value = self.const_eval(span, a.binary(operator, b))?;
                return self.record(id, signature.result, stage, Some(value));
            }
        }

        // Computed by the shader on concrete operands
        self.concretize(lhs, lhs_info)?;
        self.concretize(rhs, rhs_info)?;
        let result = self.types.concretize(signature.result);

        self.record(id, result, EvaluationStage::Runtime, None)
    }

    pub(super) fn binary_signature(&mut self, operator: BinaryOperatorKind, lhs: TypeId, rhs: TypeId) -> Option<BinarySignature> {
        let same = |ty: TypeId| BinarySignature {
            lhs: ty,
            rhs: ty,
            result: ty,
            foldable: true,
        };

        let lhs_parts = self.types.scalar_or_vector_parts(lhs);
        let rhs_parts = self.types.scalar_or_vector_parts(rhs);

        match operator.class() {
            BinaryOperatorClass::Logical => {
                let bool = self.types.bool();
                (lhs == bool && rhs == bool).then(|| same(bool))
            }
            BinaryOperatorClass::Shift => {
                let (size, scalar) = lhs_parts?;
                let (rhs_size, rhs_scalar) = rhs_parts?;

                if !scalar.is_integer() || size != rhs_size || !rhs_scalar.converts_to(ScalarKind::U32) {
                    return None;
                }

                let amount = self.types.scalar_or_vector(size, ScalarKind::U32);
                Some(BinarySignature {
                    lhs,
                    rhs: amount,
                    result: lhs,
                    foldable: true,
                })
            }
            BinaryOperatorClass::Comparison => {
                let common = self.types.common_type(lhs, rhs)?;
                let (size, scalar) = self.types.scalar_or_vector_parts(common)?;

                let ordering = !matches!(operator, BinaryOperatorKind::Equals | BinaryOperatorKind::NotEquals);
                if ordering && scalar == ScalarKind::Bool {
                    return None;
                }

                let result = self.types.scalar_or_vector(size, ScalarKind::Bool);
                Some(BinarySignature {
                    lhs: common,
                    rhs: common,
                    result,
                    foldable: true,
                })
            }
            BinaryOperatorClass::Bitwise => {
                let common = self.types.common_type(lhs, rhs)?;
                let (_, scalar) = self.types.scalar_or_vector_parts(common)?;

                let valid =
                    scalar.is_integer() || (scalar == ScalarKind::Bool && operator != BinaryOperatorKind::BitwiseXor);
                valid.then(|| same(common))
            }
            BinaryOperatorClass::Arithmetic => self.arithmetic_signature(operator, lhs, rhs),
        }
    }

    fn arithmetic_signature(&mut self, operator: BinaryOperatorKind, lhs: TypeId, rhs: TypeId) -> Option<BinarySignature> {
        let is_numeric = |scalar: ScalarKind| scalar.is_numeric();

        if let Some(common) = self.types.common_type(lhs, rhs) {
            match *self.types.get(common) {
                TypeKind::Scalar(scalar) | TypeKind::Vector { scalar, .. } if is_numeric(scalar) => {
                    return Some(BinarySignature {
                        lhs: common,
                        rhs: common,
                        result: common,
                        foldable: true,
                    });
                }
                TypeKind::Matrix { .. }
                    if matches!(operator, BinaryOperatorKind::Add | BinaryOperatorKind::Subtract) =>
                {
                    return Some(BinarySignature {
                        lhs: common,
                        rhs: common,
                        result: common,
                        foldable: true,
                    });
                }
                _ => {}
            }
        }

        let lhs_kind = self.types.get(lhs).clone();
        let rhs_kind = self.types.get(rhs).clone();

        match (lhs_kind, rhs_kind) {
            // Vector and scalar mixing splats the scalar
            (TypeKind::Vector { size, scalar: a }, TypeKind::Scalar(b)) => {
                let scalar = common_scalar(a, b).filter(|s| is_numeric(*s))?;
                let vector = self.types.vector(size, scalar);
                let scalar = self.types.scalar(scalar);

                Some(BinarySignature {
                    lhs: vector,
                    rhs: scalar,
                    result: vector,
                    foldable: true,
                })
            }
            (TypeKind::Scalar(a), TypeKind::Vector { size, scalar: b }) => {
                let scalar = common_scalar(a, b).filter(|s| is_numeric(*s))?;
                let vector = self.types.vector(size, scalar);
                let scalar = self.types.scalar(scalar);

                Some(BinarySignature {
                    lhs: scalar,
                    rhs: vector,
                    result: vector,
                    foldable: true,
                })
            }
            _ if operator != BinaryOperatorKind::Multiply => None,
            (TypeKind::Matrix { columns, rows, scalar: a }, TypeKind::Scalar(b)) => {
                let scalar = common_scalar(a, b).filter(|s| s.is_float())?;
                let matrix = self.types.intern(TypeKind::Matrix { columns, rows, scalar });
                let scalar = self.types.scalar(scalar);

                Some(BinarySignature {
                    lhs: matrix,
                    rhs: scalar,
                    result: matrix,
                    foldable: true,
                })
            }
            (TypeKind::Scalar(a), TypeKind::Matrix { columns, rows, scalar: b }) => {
                let scalar = common_scalar(a, b).filter(|s| s.is_float())?;
                let matrix = self.types.intern(TypeKind::Matrix { columns, rows, scalar });
                let scalar = self.types.scalar(scalar);

                Some(BinarySignature {
                    lhs: scalar,
                    rhs: matrix,
                    result: matrix,
                    foldable: true,
                })
            }
            (TypeKind::Matrix { columns, rows, scalar: a }, TypeKind::Vector { size, scalar: b }) if size == columns => {
                let scalar = common_scalar(a, b)?;
                let matrix = self.types.intern(TypeKind::Matrix { columns, rows, scalar });
                let vector = self.types.vector(columns, scalar);
                let result = self.types.vector(rows, scalar);

                Some(BinarySignature {
                    lhs: matrix,
                    rhs: vector,
                    result,
                    foldable: false,
                })
            }
            (TypeKind::Vector { size, scalar: a }, TypeKind::Matrix { columns, rows, scalar: b }) if size == rows => {
                let scalar = common_scalar(a, b)?;
                let vector = self.types.vector(rows, scalar);
                let matrix = self.types.intern(TypeKind::Matrix { columns, rows, scalar });
                let result = self.types.vector(columns, scalar);

                Some(BinarySignature {
                    lhs: vector,
                    rhs: matrix,
                    result,
                    foldable: false,
                })
            }
            (
                TypeKind::Matrix { columns, rows, scalar: a },
                TypeKind::Matrix {
                    columns: k,
                    rows: inner,
                    scalar: b,
                },
            ) if inner == columns => {
                let scalar = common_scalar(a, b)?;
                let lhs = self.types.intern(TypeKind::Matrix { columns, rows, scalar });
                let rhs = self.types.intern(TypeKind::Matrix {
                    columns: k,
                    rows: inner,
                    scalar,
                });
                let result = self.types.intern(TypeKind::Matrix {
                    columns: k,
                    rows,
                    scalar,
                });

                Some(BinarySignature {
                    lhs,
                    rhs,
                    result,
                    foldable: false,
                })
            }
            _ => None,
        }
    }
}

/// The scalar both `a` and `b` convert to
pub(super) fn common_scalar(a: ScalarKind, b: ScalarKind) -> Option<ScalarKind> {
    if a == b || (b.is_abstract() && b.converts_to(a)) {
        Some(a)
    } else if a.is_abstract() && a.converts_to(b) {
        Some(b)
    } else {
        None
    }
}

/// Component indices of a swizzle like `xzy` or `rgba`, without mixing the
/// two sets
pub(crate) fn swizzle(name: &str, size: u8) -> Option<Vec<usize>> {
    if name.is_empty() || name.len() > 4 {
        return None;
    }

    let set = if name.starts_with(['x', 'y', 'z', 'w']) { "xyzw" } else { "rgba" };

    name.chars()
        .map(|c| set.find(c).filter(|index| *index < usize::from(size)))
        .collect()
}

/// The value of `T()`
pub(crate) fn zero_value(types: &TypeTable, ty: TypeId) -> Option<ConstValue> {
    Some(match types.get(ty) {
        TypeKind::Scalar(scalar) => Scalar::zero(*scalar).into(),
        TypeKind::Vector { size, scalar } => {
            ConstValue::Composite(vec![Scalar::zero(*scalar).into(); usize::from(*size)])
        }
        TypeKind::Matrix { columns, rows, scalar } => ConstValue::Composite(vec![
            ConstValue::Composite(vec![Scalar::zero(*scalar).into(); usize::from(*rows)]);
            usize::from(*columns)
        ]),
        TypeKind::Array {
            element,
            size: ArraySize::Constant(count),
        } => ConstValue::Composite(vec![zero_value(types, *element)?; *count as usize]),
        TypeKind::Struct(structure) => ConstValue::Composite(
            structure
                .members
                .iter()
                .map(|member| zero_value(types, member.ty))
                .collect::<Option<_>>()?,
        ),
        _ => return None,
    })
}

/// Reinterprets the bits of 32-bit scalars. Returns `None` for values that
/// cannot be folded, like NaN results.
fn bitcast_value(value: &ConstValue, to: ScalarKind) -> Option<ConstValue> {
    match value {
        ConstValue::Scalar(scalar) => {
            let bits = match *scalar {
                Scalar::I32(value) => value as u32,
                Scalar::U32(value) => value,
                Scalar::F32(value) => value.to_bits(),
                _ => return None,
            };

            let scalar = match to {
                ScalarKind::I32 => Scalar::I32(bits as i32),
                ScalarKind::U32 => Scalar::U32(bits),
                ScalarKind::F32 => Some(f32::from_bits(bits)).filter(|f| f.is_finite()).map(Scalar::F32)?,
                _ => return None,
            };

            Some(scalar.into())
        }
        ConstValue::Composite(elements) => Some(ConstValue::Composite(
            elements
                .iter()
                .map(|element| bitcast_value(element, to))
                .collect::<Option<_>>()?,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swizzles_do_not_mix_sets() {
        assert_eq!(swizzle("xy", 2), Some(vec![0, 1]));
        assert_eq!(swizzle("bgra", 4), Some(vec![2, 1, 0, 3]));
        assert_eq!(swizzle("xz", 2), None);
        assert_eq!(swizzle("xg", 4), None);
        assert_eq!(swizzle("xyzwx", 4), None);
    }

    #[test]
    fn common_scalars_prefer_concrete_types() {
        assert_eq!(common_scalar(ScalarKind::AbstractInt, ScalarKind::F32), Some(ScalarKind::F32));
        assert_eq!(
            common_scalar(ScalarKind::AbstractFloat, ScalarKind::AbstractInt),
            Some(ScalarKind::AbstractFloat)
        );
        assert_eq!(common_scalar(ScalarKind::I32, ScalarKind::U32), None);
        assert_eq!(common_scalar(ScalarKind::AbstractFloat, ScalarKind::I32), None);
    }

    #[test]
    fn bitcasts_reinterpret_bits() {
        assert_eq!(
            bitcast_value(&Scalar::F32(1.0).into(), ScalarKind::U32),
            Some(Scalar::U32(0x3f80_0000).into())
        );
        assert_eq!(
            bitcast_value(&Scalar::I32(-1).into(), ScalarKind::U32),
            Some(Scalar::U32(u32::MAX).into())
        );
        assert_eq!(bitcast_value(&Scalar::U32(0x7fc0_0000).into(), ScalarKind::F32), None);
    }
}

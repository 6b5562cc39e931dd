//! The writer shared by the HLSL, MSL and GLSL generators. It walks the
//! resolved AST of a legalized program and asks a [`Dialect`] for everything
//! the three languages spell differently.
//!
//! Expressions are written fully parenthesized. Some dialects cannot express
//! an operation inline and hoist it into statements written before the
//! statement being generated (see [`Writer::hoist`]).

use std::fmt::Write;

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use log::debug;

use crate::{
    backend::{BackendError, Target, check_capabilities},
    frontend::{
        ast::{
            self, BinaryOperatorKind, CaseSelector, DeclarationId, ExpressionId, ExpressionKind, PipelineStage,
            StatementId, StatementKind, UnaryOperatorKind,
        },
        lexer::Span,
    },
    middle::{
        builtin::{BuiltinFunction, BuiltinValue},
        constant::{ConstValue, Scalar},
        interface::{EntryPointInterface, IoBinding, IoKind, IoValue},
        program::{CallTarget, EvaluationStage, GlobalInfo, GlobalKind, LocalKind, Program, Resolution},
        resolve::zero_value,
        ty::{
            AddressSpace, ArraySize, SamplerKind, ScalarKind, StructType, TextureDimension, TextureKind, TypeId, TypeKind,
            TypeTable,
        },
    },
};

pub(crate) type Result<T> = std::result::Result<T, BackendError>;

/// A call to a builtin function, with its arguments already written
#[derive(Debug, Clone)]
pub(crate) struct BuiltinCall {
    pub function: BuiltinFunction,
    pub arguments: Vec<String>,
    /// Value types of the arguments
    pub types: Vec<TypeId>,
    pub result: Option<TypeId>,
    pub span: Span,
}

/// An entry point, as seen by the wrapper function a dialect writes around
/// the user's function
#[derive(Debug, Clone)]
pub(crate) struct EntryPoint {
    /// The name of the exported wrapper
    pub name: String,
    /// The name of the function holding the user's body
    pub inner: String,
    pub stage: PipelineStage,
    pub workgroup_size: [u32; 3],
    pub interface: EntryPointInterface,
    pub return_type: Option<TypeId>,
    /// Module-scope variables the entry point uses, in declaration order
    pub globals: Vec<DeclarationId>,
}

/// One scalar or vector crossing the pipeline interface, flattened out of
/// parameter and return structs
#[derive(Debug, Clone)]
pub(crate) struct IoField {
    pub name: String,
    pub binding: IoBinding,
    /// How the value is read from the inner function's result
    pub source: String,
}

pub(crate) trait Dialect {
    fn target(&self) -> Target;

    /// Lines written before anything else
    fn header(&self) -> &'static str;

    fn is_reserved(&self, name: &str) -> bool;

    fn scalar(&self, scalar: ScalarKind) -> Result<&'static str>;

    fn vector(&self, size: u8, scalar: ScalarKind) -> Result<String>;

    fn matrix(&self, columns: u8, rows: u8, scalar: ScalarKind) -> Result<String>;

    fn array(&self, w: &mut Writer, ty: TypeId, element: &str, count: u32) -> Result<String>;

    fn atomic(&self, scalar: ScalarKind) -> Result<String> {
        self.scalar(scalar).map(str::to_string)
    }

    fn texture(&self, dimension: TextureDimension, kind: TextureKind) -> Result<String>;

    fn sampler(&self, kind: SamplerKind) -> &'static str;

    /// A declaration of `name` with type `ty`, e.g. `float4 color`
    fn declare(&self, w: &mut Writer, ty: TypeId, name: &str) -> Result<String> {
        Ok(format!("{} {name}", w.type_name(ty)?))
    }

    /// Whether `structure` is written as a type definition
    fn defines_struct(&self, _: &Writer, _: TypeId) -> bool {
        true
    }

    /// Qualifiers of module-scope constants
    fn constant_qualifier(&self) -> &'static str;

    /// Writes the declaration of a module-scope `var`
    fn module_variable(&self, w: &mut Writer, id: DeclarationId, global: &GlobalInfo) -> Result<()>;

    /// How function bodies refer to a module-scope `var`
    fn global_reference(&self, w: &Writer, id: DeclarationId, global: &GlobalInfo) -> String {
        let _ = global;
        w.global_name(id)
    }

    /// Replaces `base.member` where `base` is rooted at a module-scope `var`
    fn member_access(&self, w: &Writer, base: ExpressionId, base_text: &str, member: &str) -> Option<String> {
        let _ = (w, base, base_text, member);
        None
    }

    /// Module-scope variables are passed down the call graph as extra
    /// parameters instead of being declared at module scope
    fn globals_as_parameters(&self) -> bool {
        false
    }

    fn global_parameter(&self, w: &mut Writer, id: DeclarationId, global: &GlobalInfo) -> Result<String> {
        let _ = (w, id, global);
        Err(BackendError::internal(self.target(), "module-scope variables cannot be parameters"))
    }

    /// Textures and samplers are combined, so samplers are not passed around
    fn combined_samplers(&self) -> bool {
        false
    }

    /// A parameter of pointer type, passed by reference
    fn pointer_parameter(&self, space: AddressSpace, pointee: &str, name: &str) -> String;

    /// `text` is the shortest decimal spelling of the value
    fn float_literal(&self, text: String, scalar: ScalarKind) -> String {
        match scalar {
            ScalarKind::F16 => format!("{text}h"),
            _ => format!("{text}f"),
        }
    }

    /// Constructs a vector, matrix, array or struct from written components
    fn construct(&self, w: &mut Writer, ty: TypeId, arguments: Vec<String>) -> Result<String> {
        Ok(format!("{}({})", w.type_name(ty)?, arguments.join(", ")))
    }

    /// A vector with all components set to one scalar
    fn splat(&self, w: &mut Writer, ty: TypeId, scalar: String) -> Result<String> {
        Ok(format!("{}({scalar})", w.type_name(ty)?))
    }

    fn zero_value(&self, w: &mut Writer, ty: TypeId) -> Result<String> {
        let Some(value) = zero_value(&w.types, ty) else {
            return Err(BackendError::internal(self.target(), format!("{} has no zero value", w.types.name(ty))));
        };

        w.constant(ty, &value)
    }

    /// Resets an atomic in workgroup memory
    fn atomic_zero(&self, w: &mut Writer, lvalue: &str, scalar: ScalarKind) -> Result<String> {
        Ok(format!("{lvalue} = {};", w.scalar_literal(Scalar::zero(scalar))?))
    }

    fn convert(&self, w: &mut Writer, ty: TypeId, value: String) -> Result<String> {
        Ok(format!("{}({value})", w.type_name(ty)?))
    }

    fn bitcast(&self, w: &mut Writer, from: TypeId, to: TypeId, value: String) -> Result<String>;

    /// Replaces the plain `(lhs op rhs)` form of a binary operation
    fn binary(
        &self,
        w: &mut Writer,
        operator: BinaryOperatorKind,
        types: [TypeId; 2],
        operands: [&str; 2],
    ) -> Result<Option<String>> {
        let _ = (w, operator, types, operands);
        Ok(None)
    }

    fn logical_not(&self, w: &Writer, ty: TypeId, operand: &str) -> String {
        let _ = (w, ty);
        format!("(!{operand})")
    }

    fn builtin(&self, w: &mut Writer, call: &BuiltinCall) -> Result<String>;

    fn discard(&self) -> &'static str {
        "discard"
    }

    /// Writes the exported function that wraps the body of an entry point
    fn entry_point(&self, w: &mut Writer, entry: &EntryPoint) -> Result<()>;
}

/// Generates the code for every entry point left in `program`
pub(crate) fn generate(program: &Program, dialect: &dyn Dialect) -> Result<String> {
    check_capabilities(program, dialect.target())?;

    let mut writer = Writer::new(program, dialect);
    writer.write_module()?;

    debug!(
        "generated {} lines of {} code",
        writer.output.lines().count(),
        dialect.target()
    );

    Ok(writer.finish())
}

/// Appends `_` to names the target reserves
pub(crate) fn escape(dialect: &dyn Dialect, name: &str) -> String {
    if dialect.is_reserved(name) {
        format!("{name}_")
    } else {
        name.to_string()
    }
}

#[derive(Debug, Clone, Copy)]
enum LoopExit<'a> {
    /// `continue` needs no extra code
    Native,
    Continuing(&'a ast::Continuing),
    /// A `for` loop update written at the end of the body
    Update(StatementId),
}

pub(crate) struct Writer<'a> {
    pub program: &'a Program,
    /// A copy of the program's types, so that abstract types can be
    /// concretized
    pub types: TypeTable,
    dialect: &'a dyn Dialect,
    /// Type definitions, in dependency order
    definitions: Vec<String>,
    defined: HashSet<TypeId>,
    output: String,
    indent: usize,
    /// Statements to write before the current one
    pre: Vec<String>,
    temporaries: usize,
    /// Let-bound pointers and handles, replaced by the expression they alias
    aliases: HashMap<StatementId, String>,
    loops: Vec<LoopExit<'a>>,
    function: Option<DeclarationId>,
}

impl<'a> Writer<'a> {
    fn new(program: &'a Program, dialect: &'a dyn Dialect) -> Self {
        Self {
            program,
            types: program.types.clone(),
            dialect,
            definitions: Vec::new(),
            defined: HashSet::new(),
            output: String::new(),
            indent: 0,
            pre: Vec::new(),
            temporaries: 0,
            aliases: HashMap::new(),
            loops: Vec::new(),
            function: None,
        }
    }

    fn finish(self) -> String {
        let mut code = String::from(self.dialect.header());

        for definition in &self.definitions {
            code.push_str(definition);
            code.push('\n');
        }

        if !self.definitions.is_empty() {
            code.push('\n');
        }

        code.push_str(self.output.trim_end());
        code.push('\n');
        code
    }

    pub fn target(&self) -> Target {
        self.dialect.target()
    }

    pub fn line(&mut self, text: impl AsRef<str>) {
        let _ = writeln!(self.output, "{}{}", "  ".repeat(self.indent), text.as_ref());
    }

    pub fn blank_line(&mut self) {
        self.output.push('\n');
    }

    pub fn indent(&mut self) {
        self.indent += 1;
    }

    pub fn dedent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    /// Writes the hoisted statements, then `text`
    pub fn flush_line(&mut self, text: impl AsRef<str>) {
        self.flush();
        self.line(text);
    }

    pub fn flush(&mut self) {
        for statement in std::mem::take(&mut self.pre) {
            self.line(statement);
        }
    }

    /// Queues a statement to be written before the current one
    pub fn hoist(&mut self, statement: impl Into<String>) {
        self.pre.push(statement.into());
    }

    /// Declares a hoisted temporary holding `value` and returns its name
    pub fn temporary(&mut self, declaration: impl FnOnce(&str) -> String) -> String {
        let name = loop {
            let name = format!("tmp_{}", self.temporaries);
            self.temporaries += 1;

            if self.program.module.symbols.lookup(&name).is_none() {
                break name;
            }
        };

        let statement = declaration(&name);
        self.hoist(statement);
        name
    }

    pub fn at_module_scope(&self) -> bool {
        self.function.is_none()
    }

    /// Adds a type definition unless `ty` already has one
    pub fn define(&mut self, ty: TypeId, definition: impl FnOnce() -> String) {
        if self.defined.insert(ty) {
            self.definitions.push(definition());
        }
    }

    pub fn escape(&self, name: &str) -> String {
        escape(self.dialect, name)
    }

    pub fn global_name(&self, id: DeclarationId) -> String {
        match self.program.module.declaration(id).name() {
            Some(name) => self.escape(self.program.name(name)),
            None => String::new(),
        }
    }

    /* Types */

    pub fn type_name(&mut self, ty: TypeId) -> Result<String> {
        let dialect = self.dialect;
        let target = dialect.target();

        match self.types.get(ty).clone() {
            TypeKind::Scalar(scalar) => dialect.scalar(scalar.concretize()).map(str::to_string),
            TypeKind::Vector { size, scalar } => dialect.vector(size, scalar.concretize()),
            TypeKind::Matrix { columns, rows, scalar } => dialect.matrix(columns, rows, scalar.concretize()),
            TypeKind::Array { element, size } => {
                let element_name = self.type_name(element)?;

                match size {
                    ArraySize::Constant(count) => dialect.array(self, ty, &element_name, count),
                    ArraySize::Override(_) => Err(BackendError::internal(target, "array sized by an override")),
                    ArraySize::Runtime => Err(BackendError::unsupported(
                        target,
                        "runtime-sized arrays outside of storage buffers",
                        Span::default(),
                    )),
                }
            }
            TypeKind::Struct(structure) => Ok(self.escape(&structure.name)),
            TypeKind::Atomic(scalar) => dialect.atomic(scalar),
            TypeKind::Texture { dimension, kind } => dialect.texture(dimension, kind),
            TypeKind::Sampler(kind) => Ok(dialect.sampler(kind).to_string()),
            TypeKind::Reference { store, .. } => self.type_name(store),
            TypeKind::Pointer { .. } => Err(BackendError::unsupported(
                target,
                "pointers outside of function parameters",
                Span::default(),
            )),
        }
    }

    pub fn declare(&mut self, ty: TypeId, name: &str) -> Result<String> {
        let dialect = self.dialect;
        dialect.declare(self, ty, name)
    }

    /// The value type of an expression, with abstract types concretized
    pub fn expression_type(&mut self, id: ExpressionId) -> Result<TypeId> {
        let Some(info) = self.program.expression(id) else {
            return Err(BackendError::internal(self.target(), "expression was not resolved"));
        };

        let ty = self.types.value_type(info.ty);
        Ok(self.types.concretize(ty))
    }

    fn contains_atomic(&self, ty: TypeId) -> bool {
        match self.types.get(ty) {
            TypeKind::Atomic(_) => true,
            TypeKind::Array { element, .. } => self.contains_atomic(*element),
            TypeKind::Struct(structure) => structure.members.iter().any(|member| self.contains_atomic(member.ty)),
            _ => false,
        }
    }

    /* Constants */

    pub fn scalar_literal(&self, scalar: Scalar) -> Result<String> {
        Ok(match scalar {
            Scalar::Bool(value) => value.to_string(),
            Scalar::AbstractInt(value) => match i32::try_from(value) {
                Ok(value) => return self.scalar_literal(Scalar::I32(value)),
                Err(_) => {
                    return Err(BackendError::internal(
                        self.target(),
                        format!("{value} does not fit in i32"),
                    ));
                }
            },
            Scalar::I32(i32::MIN) => "(-2147483647 - 1)".to_string(),
            Scalar::I32(value) => value.to_string(),
            Scalar::U32(value) => format!("{value}u"),
            Scalar::AbstractFloat(value) => return self.float(value, ScalarKind::F32),
            Scalar::F32(value) => return self.float(f64::from(value), ScalarKind::F32),
            Scalar::F16(value) => return self.float(value.to_f64(), ScalarKind::F16),
        })
    }

    fn float(&self, value: f64, scalar: ScalarKind) -> Result<String> {
        if !value.is_finite() {
            return Err(BackendError::internal(self.target(), format!("{value} is not a finite constant")));
        }

        let text = match scalar {
            ScalarKind::F16 => format!("{:?}", half::f16::from_f64(value).to_f32()),
            _ => format!("{:?}", value as f32),
        };

        Ok(self.dialect.float_literal(text, scalar))
    }

    /// Writes a constant of the concrete type `ty`
    pub fn constant(&mut self, ty: TypeId, value: &ConstValue) -> Result<String> {
        let dialect = self.dialect;

        match (self.types.get(ty).clone(), value) {
            (_, ConstValue::Scalar(scalar)) => {
                let scalar = match self.types.element_scalar(ty) {
                    Some(kind) if kind != scalar.kind() => scalar
                        .convert(kind.concretize())
                        .map_err(|error| BackendError::internal(self.target(), error.to_string()))?,
                    _ => *scalar,
                };

                self.scalar_literal(scalar)
            }
            (TypeKind::Vector { scalar, .. }, ConstValue::Composite(elements)) => {
                let scalar = self.types.scalar(scalar.concretize());
                let components = elements
                    .iter()
                    .map(|element| self.constant(scalar, element))
                    .collect::<Result<Vec<_>>>()?;

                dialect.construct(self, ty, components)
            }
            (TypeKind::Matrix { rows, scalar, .. }, ConstValue::Composite(elements)) => {
                let column = self.types.vector(rows, scalar.concretize());
                let columns = elements
                    .iter()
                    .map(|element| self.constant(column, element))
                    .collect::<Result<Vec<_>>>()?;

                dialect.construct(self, ty, columns)
            }
            (TypeKind::Array { element, .. }, ConstValue::Composite(elements)) => {
                let element = self.types.concretize(element);
                let elements = elements
                    .iter()
                    .map(|value| self.constant(element, value))
                    .collect::<Result<Vec<_>>>()?;

                dialect.construct(self, ty, elements)
            }
            (TypeKind::Struct(structure), ConstValue::Composite(elements)) => {
                let members = structure
                    .members
                    .iter()
                    .zip(elements)
                    .map(|(member, value)| self.constant(member.ty, value))
                    .collect::<Result<Vec<_>>>()?;

                dialect.construct(self, ty, members)
            }
            _ => Err(BackendError::internal(
                self.target(),
                format!("constant does not match its type {}", self.types.name(ty)),
            )),
        }
    }

    /// Statements setting `lvalue` to the zero value of `ty`, reaching into
    /// composites holding atomics
    pub fn zero_statements(&mut self, lvalue: &str, ty: TypeId, depth: usize) -> Result<Vec<String>> {
        let dialect = self.dialect;

        if !self.contains_atomic(ty) {
            let zero = dialect.zero_value(self, ty)?;
            return Ok(vec![format!("{lvalue} = {zero};")]);
        }

        match self.types.get(ty).clone() {
            TypeKind::Atomic(scalar) => Ok(vec![dialect.atomic_zero(self, lvalue, scalar)?]),
            TypeKind::Array {
                element,
                size: ArraySize::Constant(count),
            } => {
                let index = format!("i_{depth}");
                let mut lines = vec![format!("for (uint {index} = 0u; {index} < {count}u; {index}++) {{")];

                for line in self.zero_statements(&format!("{lvalue}[{index}]"), element, depth + 1)? {
                    lines.push(format!("  {line}"));
                }

                lines.push("}".to_string());
                Ok(lines)
            }
            TypeKind::Struct(structure) => {
                let mut lines = Vec::new();

                for member in &structure.members {
                    let lvalue = format!("{lvalue}.{}", self.escape(&member.name));
                    lines.extend(self.zero_statements(&lvalue, member.ty, depth)?);
                }

                Ok(lines)
            }
            _ => Err(BackendError::internal(self.target(), "atomic outside of a composite")),
        }
    }

    /* Module */

    fn write_module(&mut self) -> Result<()> {
        let program = self.program;

        for (id, kind) in program.types.iter() {
            if let TypeKind::Struct(structure) = kind {
                if self.dialect.defines_struct(self, id) {
                    self.define_struct(id, structure)?;
                }
            }
        }

        let mut wrote_globals = false;

        for (id, declaration) in program.module.declarations.enumerate() {
            let ast::DeclarationKind::Variable(variable) = &declaration.kind else {
                continue;
            };

            let Some(global) = program.global(id) else {
                return Err(BackendError::internal(self.target(), "module-scope variable was not resolved"));
            };

            match global.kind {
                GlobalKind::Const => {
                    let Some(value) = &global.value else {
                        return Err(BackendError::internal(self.target(), "constant without a value"));
                    };

                    let ty = self.types.concretize(global.ty);
                    let name = self.escape(program.name(variable.name));
                    let declaration = self.declare(ty, &name)?;
                    let value = self.constant(ty, value)?;

                    let qualifier = self.dialect.constant_qualifier();
                    self.line(format!("{qualifier} {declaration} = {value};"));
                }
                GlobalKind::Var { .. } => {
                    let dialect = self.dialect;
                    dialect.module_variable(self, id, global)?;
                }
                GlobalKind::Override => {
                    return Err(BackendError::Override {
                        target: self.target(),
                        name: program.name(variable.name).to_string(),
                        span: variable.span,
                    });
                }
            }

            wrote_globals = true;
        }

        if wrote_globals {
            self.blank_line();
        }

        for id in self.function_order() {
            self.write_function(id)?;
        }

        Ok(())
    }

    fn define_struct(&mut self, id: TypeId, structure: &StructType) -> Result<()> {
        let mut text = format!("struct {} {{\n", self.escape(&structure.name));

        for member in &structure.members {
            let name = self.escape(&member.name);
            let declaration = match self.types.get(member.ty).clone() {
                TypeKind::Array {
                    element,
                    size: ArraySize::Runtime,
                } => {
                    let element = self.type_name(element)?;
                    self.runtime_array_member(&element, &name)
                }
                _ => self.declare(member.ty, &name)?,
            };

            let _ = writeln!(text, "  {declaration};");
        }

        text.push_str("};");
        self.define(id, || text);
        Ok(())
    }

    /// The last member of a storage buffer struct holding a runtime-sized
    /// array
    pub fn runtime_array_member(&self, element: &str, name: &str) -> String {
        match self.target() {
            Target::Metal => format!("{element} {name}[1]"),
            _ => format!("{element} {name}[]"),
        }
    }

    /// Functions ordered so that every callee comes before its callers
    fn function_order(&self) -> Vec<DeclarationId> {
        fn visit(program: &Program, id: DeclarationId, visited: &mut HashSet<DeclarationId>, order: &mut Vec<DeclarationId>) {
            if !visited.insert(id) {
                return;
            }

            if let Some(info) = program.function(id) {
                for callee in &info.direct_calls {
                    visit(program, *callee, visited, order);
                }
            }

            order.push(id);
        }

        let mut visited = HashSet::new();
        let mut order = Vec::new();

        for (id, _) in self.program.module.functions() {
            visit(self.program, id, &mut visited, &mut order);
        }

        order
    }

    /// Module-scope `var`s a function uses, directly or through calls
    pub fn used_variables(&self, function: DeclarationId) -> Vec<DeclarationId> {
        self.program
            .function(function)
            .map(|info| {
                info.transitive_globals
                    .iter()
                    .copied()
                    .filter(|id| {
                        self.program
                            .global(*id)
                            .is_some_and(|global| matches!(global.kind, GlobalKind::Var { .. }))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn write_function(&mut self, id: DeclarationId) -> Result<()> {
        let program = self.program;
        let dialect = self.dialect;

        let Some(function) = program.module.declaration(id).as_function() else {
            return Ok(());
        };
        let Some(info) = program.function(id) else {
            return Err(BackendError::internal(self.target(), "function was not resolved"));
        };

        let wgsl_name = program.name(function.name);
        let name = match info.stage {
            Some(_) => self.escape(&format!("{wgsl_name}_inner")),
            None => self.escape(wgsl_name),
        };

        let return_type = match info.return_type {
            Some(ty) => self.type_name(ty)?,
            None => "void".to_string(),
        };

        let mut parameters = Vec::new();

        for (parameter, ty) in function.parameters.iter().zip(&info.parameters) {
            let parameter_name = self.escape(program.name(parameter.name));

            match self.types.get(*ty).clone() {
                TypeKind::Sampler(_) if dialect.combined_samplers() => {}
                TypeKind::Pointer { space, pointee, .. } => {
                    let pointee = self.type_name(pointee)?;
                    parameters.push(dialect.pointer_parameter(space, &pointee, &parameter_name));
                }
                _ => parameters.push(self.declare(*ty, &parameter_name)?),
            }
        }

        if dialect.globals_as_parameters() {
            for global in self.used_variables(id) {
                let Some(info) = program.global(global) else {
                    continue;
                };

                parameters.push(dialect.global_parameter(self, global, info)?);
            }
        }

        self.function = Some(id);
        self.temporaries = 0;
        self.aliases.clear();

        self.line(format!("{return_type} {name}({}) {{", parameters.join(", ")));
        self.write_block(&function.body)?;
        self.line("}");
        self.blank_line();

        if let Some(stage) = info.stage {
            let entry = EntryPoint {
                name: self.escape(wgsl_name),
                inner: name,
                stage,
                workgroup_size: program.resolved_workgroup_size(id).unwrap_or([1, 1, 1]),
                interface: EntryPointInterface::of(program, id).ok_or_else(|| {
                    BackendError::internal(self.target(), format!("entry point '{wgsl_name}' has no interface"))
                })?,
                return_type: info.return_type,
                globals: self.used_variables(id),
            };

            dialect.entry_point(self, &entry)?;
            self.flush();
            self.blank_line();
        }

        self.function = None;
        Ok(())
    }

    /* Entry point helpers */

    /// The flattened inputs of an entry point
    pub fn input_fields(&self, entry: &EntryPoint) -> Vec<IoField> {
        entry
            .interface
            .inputs
            .iter()
            .flat_map(|value| self.io_fields(value, ""))
            .collect()
    }

    /// The flattened outputs of an entry point, read from `result`
    pub fn output_fields(&self, entry: &EntryPoint, result: &str) -> Vec<IoField> {
        entry
            .interface
            .output
            .iter()
            .flat_map(|value| self.io_fields(value, result))
            .collect()
    }

    fn io_fields(&self, value: &IoValue, result: &str) -> Vec<IoField> {
        match value {
            IoValue::Single(binding) => vec![IoField {
                name: self.escape(&binding.name),
                binding: binding.clone(),
                source: result.to_string(),
            }],
            IoValue::Struct { name, members, .. } => members
                .iter()
                .map(|member| IoField {
                    name: self.escape(&format!("{name}_{}", member.name)),
                    binding: member.clone(),
                    source: format!("{result}.{}", self.escape(&member.name)),
                })
                .collect(),
        }
    }

    /// Calls the inner function of an entry point, reading each input field
    /// with `read`
    pub fn call_inner(&mut self, entry: &EntryPoint, read: &dyn Fn(&mut Self, &IoField) -> String) -> Result<String> {
        let dialect = self.dialect;
        let mut arguments = Vec::new();

        for value in &entry.interface.inputs {
            let fields = self.io_fields(value, "");
            let mut values = Vec::with_capacity(fields.len());

            for field in &fields {
                values.push(read(self, field));
            }

            match value {
                IoValue::Single(_) => arguments.extend(values),
                IoValue::Struct { ty, .. } => arguments.push(dialect.construct(self, *ty, values)?),
            }
        }

        if dialect.globals_as_parameters() {
            arguments.extend(entry.globals.iter().map(|global| self.global_name(*global)));
        }

        Ok(format!("{}({})", entry.inner, arguments.join(", ")))
    }

    /// Zero-initializes the workgroup variables of a compute entry point
    /// from its first invocation, then waits for the whole workgroup
    pub fn write_workgroup_init(&mut self, entry: &EntryPoint, local_index: &str, barrier: &str) -> Result<()> {
        let variables = entry
            .globals
            .iter()
            .copied()
            .filter_map(|id| {
                let global = self.program.global(id)?;
                (global.address_space() == Some(AddressSpace::Workgroup)).then_some((id, global.ty))
            })
            .collect::<Vec<_>>();

        if variables.is_empty() {
            return Ok(());
        }

        self.line(format!("if ({local_index} == 0u) {{"));
        self.indent();

        for (id, ty) in variables {
            let name = self.global_name(id);

            for line in self.zero_statements(&name, ty, 0)? {
                self.line(line);
            }
        }

        self.dedent();
        self.line("}");
        self.line(format!("{barrier};"));
        Ok(())
    }

    /// Whether the entry point reads `builtin` as an input
    pub fn input_builtin(&self, entry: &EntryPoint, builtin: BuiltinValue) -> Option<IoField> {
        self.input_fields(entry)
            .into_iter()
            .find(|field| field.binding.kind == IoKind::Builtin(builtin))
    }

    pub fn has_workgroup_variables(&self, entry: &EntryPoint) -> bool {
        entry.globals.iter().any(|id| {
            self.program
                .global(*id)
                .is_some_and(|global| global.address_space() == Some(AddressSpace::Workgroup))
        })
    }

    /* Statements */

    fn write_block(&mut self, block: &'a ast::Block) -> Result<()> {
        self.indent();

        for statement in &block.statements {
            self.write_statement(*statement)?;
        }

        self.dedent();
        Ok(())
    }

    fn write_statement(&mut self, id: StatementId) -> Result<()> {
        let program = self.program;
        let statement = program.module.statement(id);

        match &statement.kind {
            StatementKind::Block(block) => {
                self.line("{");
                self.write_block(block)?;
                self.line("}");
            }
            StatementKind::If { .. } => self.write_if(id)?,
            StatementKind::Switch { selector, clauses } => self.write_switch(*selector, clauses)?,
            StatementKind::Loop { body, continuing } => {
                self.line("while (true) {");
                self.loops.push(match continuing {
                    Some(continuing) => LoopExit::Continuing(continuing),
                    None => LoopExit::Native,
                });

                self.write_block(body)?;

                if let Some(continuing) = continuing {
                    self.indent();
                    self.write_continuing(continuing)?;
                    self.dedent();
                }

                self.loops.pop();
                self.line("}");
            }
            StatementKind::For {
                initializer,
                condition,
                update,
                body,
            } => self.write_for(*initializer, *condition, *update, body)?,
            StatementKind::While { condition, body } => {
                let (condition, pre) = self.capture(|w| w.expression(*condition))?;

                if pre.is_empty() {
                    self.line(format!("while ({}) {{", unwrap_parens(&condition)));
                    self.loops.push(LoopExit::Native);
                    self.write_block(body)?;
                } else {
                    self.line("while (true) {");
                    self.indent();
                    for line in pre {
                        self.line(line);
                    }
                    self.line(format!("if (!{condition}) {{ break; }}"));
                    self.dedent();

                    self.loops.push(LoopExit::Native);
                    self.write_block(body)?;
                }

                self.loops.pop();
                self.line("}");
            }
            StatementKind::Continue => {
                match self.loops.last().copied() {
                    Some(LoopExit::Continuing(continuing)) => self.write_continuing(continuing)?,
                    Some(LoopExit::Update(update)) => self.write_statement(update)?,
                    _ => {}
                }

                self.line("continue;");
            }
            StatementKind::Variable(variable) => self.write_local(id, variable)?,
            StatementKind::ConstAssert(_) => {}
            _ => {
                let text = self.simple_statement(id)?;

                if text.is_empty() {
                    self.flush();
                } else {
                    self.flush_line(format!("{text};"));
                }
            }
        }

        Ok(())
    }

    /// A statement written on one line without its semicolon. Hoisted
    /// statements are left in the queue.
    fn simple_statement(&mut self, id: StatementId) -> Result<String> {
        let program = self.program;
        let statement = program.module.statement(id);

        Ok(match &statement.kind {
            StatementKind::Assignment { lhs, rhs } => {
                let lhs = self.expression(*lhs)?;
                let rhs = self.expression(*rhs)?;
                format!("{lhs} = {}", unwrap_parens(&rhs))
            }
            StatementKind::CompoundAssignment { lhs, operator, rhs } => {
                let types = [self.expression_type(*lhs)?, self.expression_type(*rhs)?];
                let lhs_text = self.expression(*lhs)?;
                let rhs_text = self.expression(*rhs)?;

                let dialect = self.dialect;
                match dialect.binary(self, *operator, types, [&lhs_text, &rhs_text])? {
                    Some(value) => format!("{lhs_text} = {}", unwrap_parens(&value)),
                    None => format!("{lhs_text} {operator}= {rhs_text}"),
                }
            }
            StatementKind::Increment(expression) => format!("{}++", self.expression(*expression)?),
            StatementKind::Decrement(expression) => format!("{}--", self.expression(*expression)?),
            StatementKind::Call(expression) => {
                let call = program.module.expression(*expression);
                match &call.kind {
                    ExpressionKind::Call { arguments, .. } => self.call(*expression, arguments, call.span)?,
                    _ => self.expression(*expression)?,
                }
            }
            StatementKind::Break => "break".to_string(),
            StatementKind::Return(None) => "return".to_string(),
            StatementKind::Return(Some(expression)) => {
                format!("return {}", unwrap_parens(&self.expression(*expression)?))
            }
            StatementKind::Discard => self.dialect.discard().to_string(),
            StatementKind::Phony(_) => {
                return Err(BackendError::unsupported(
                    self.target(),
                    "phony assignments",
                    statement.span,
                ));
            }
            StatementKind::Variable(variable) => {
                let Some(local) = program.info.locals.get(&id) else {
                    return Err(BackendError::internal(self.target(), "local was not resolved"));
                };
                let name = self.escape(program.name(variable.name));

                let ty = self.types.value_type(local.ty);
                let ty = self.types.concretize(ty);
                let declaration = self.declare(ty, &name)?;

                let initializer = match (local.kind, &local.value, variable.initializer) {
                    (LocalKind::Const, Some(value), _) => self.constant(ty, value)?,
                    (_, _, Some(initializer)) => self.expression(initializer)?,
                    (_, _, None) => {
                        let dialect = self.dialect;
                        dialect.zero_value(self, ty)?
                    }
                };

                let qualifier = match local.kind {
                    LocalKind::Var => "",
                    LocalKind::Let | LocalKind::Const => "const ",
                };

                format!("{qualifier}{declaration} = {}", unwrap_parens(&initializer))
            }
            _ => {
                return Err(BackendError::internal(
                    self.target(),
                    "statement cannot be written on one line",
                ));
            }
        })
    }

    fn write_local(&mut self, id: StatementId, variable: &'a ast::Variable) -> Result<()> {
        let program = self.program;
        let Some(local) = program.info.locals.get(&id) else {
            return Err(BackendError::internal(self.target(), "local was not resolved"));
        };

        let aliased = local.kind == LocalKind::Let
            && (matches!(self.types.get(local.ty), TypeKind::Pointer { .. }) || self.types.is_handle(local.ty));

        if aliased {
            let Some(initializer) = variable.initializer else {
                return Err(BackendError::internal(self.target(), "'let' without an initializer"));
            };

            let text = self.expression(initializer)?;
            self.flush();
            self.aliases.insert(id, text);
            return Ok(());
        }

        let text = self.simple_statement(id)?;
        self.flush_line(format!("{text};"));
        Ok(())
    }

    /// Runs `f`, returning what it hoisted instead of queueing it
    fn capture<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<(T, Vec<String>)> {
        let outer = std::mem::take(&mut self.pre);
        let result = f(self);
        let hoisted = std::mem::replace(&mut self.pre, outer);

        Ok((result?, hoisted))
    }

    fn write_if(&mut self, id: StatementId) -> Result<()> {
        let StatementKind::If { condition, .. } = &self.program.module.statement(id).kind else {
            return Ok(());
        };

        let condition = self.expression(*condition)?;
        self.flush_line(format!("if ({}) {{", unwrap_parens(&condition)));
        self.write_if_tail(id)
    }

    fn write_if_tail(&mut self, id: StatementId) -> Result<()> {
        let program = self.program;
        let StatementKind::If { accept, reject, .. } = &program.module.statement(id).kind else {
            return Ok(());
        };

        self.write_block(accept)?;

        let Some(reject) = *reject else {
            self.line("}");
            return Ok(());
        };

        match &program.module.statement(reject).kind {
            StatementKind::If { condition, .. } => {
                let (condition, pre) = self.capture(|w| w.expression(*condition))?;

                if pre.is_empty() {
                    self.line(format!("}} else if ({}) {{", unwrap_parens(&condition)));
                    self.write_if_tail(reject)
                } else {
                    self.line("} else {");
                    self.indent();
                    for line in pre {
                        self.line(line);
                    }
                    self.line(format!("if ({}) {{", unwrap_parens(&condition)));
                    self.write_if_tail(reject)?;
                    self.dedent();
                    self.line("}");
                    Ok(())
                }
            }
            StatementKind::Block(block) => {
                self.line("} else {");
                self.write_block(block)?;
                self.line("}");
                Ok(())
            }
            _ => Err(BackendError::internal(self.target(), "malformed else branch")),
        }
    }

    fn write_switch(&mut self, selector: ExpressionId, clauses: &'a [ast::SwitchClause]) -> Result<()> {
        let selector_type = self.expression_type(selector)?;
        let selector = self.expression(selector)?;
        self.flush_line(format!("switch ({}) {{", unwrap_parens(&selector)));
        self.indent();

        for clause in clauses {
            for case in &clause.selectors {
                match case {
                    CaseSelector::Default => self.line("default:"),
                    CaseSelector::Expression(expression) => {
                        let Some(value) = self.program.expression(*expression).and_then(|info| info.value.as_ref())
                        else {
                            return Err(BackendError::internal(self.target(), "case selector was not evaluated"));
                        };

                        let value = self.constant(selector_type, value)?;
                        self.line(format!("case {value}:"));
                    }
                }
            }

            self.line("{");
            self.write_block(&clause.body)?;

            let terminated = clause.body.statements.last().is_some_and(|last| {
                matches!(
                    self.program.module.statement(*last).kind,
                    StatementKind::Return(_) | StatementKind::Break | StatementKind::Continue
                )
            });

            if !terminated {
                self.indent();
                self.line("break;");
                self.dedent();
            }

            self.line("}");
        }

        self.dedent();
        self.line("}");
        Ok(())
    }

    fn write_continuing(&mut self, continuing: &'a ast::Continuing) -> Result<()> {
        self.line("{");
        self.indent();

        for statement in &continuing.body.statements {
            self.write_statement(*statement)?;
        }

        if let Some(break_if) = continuing.break_if {
            let condition = self.expression(break_if)?;
            self.flush_line(format!("if ({}) {{ break; }}", unwrap_parens(&condition)));
        }

        self.dedent();
        self.line("}");
        Ok(())
    }

    fn write_for(
        &mut self,
        initializer: Option<StatementId>,
        condition: Option<ExpressionId>,
        update: Option<StatementId>,
        body: &'a ast::Block,
    ) -> Result<()> {
        let aliased_initializer = initializer.is_some_and(|id| {
            self.program.info.locals.get(&id).is_some_and(|local| {
                matches!(self.types.get(local.ty), TypeKind::Pointer { .. }) || self.types.is_handle(local.ty)
            })
        });

        let header = self.capture(|w| {
            let initializer = match initializer {
                Some(id) if !aliased_initializer => w.simple_statement(id)?,
                _ => String::new(),
            };
            let condition = match condition {
                Some(condition) => unwrap_parens(&w.expression(condition)?).to_string(),
                None => String::new(),
            };
            let update = match update {
                Some(id) => w.simple_statement(id)?,
                None => String::new(),
            };

            Ok((initializer, condition, update))
        });

        if let Ok(((initializer, condition, update), pre)) = header {
            if pre.is_empty() && !aliased_initializer {
                self.line(format!("for ({initializer}; {condition}; {update}) {{"));
                self.loops.push(LoopExit::Native);
                self.write_block(body)?;
                self.loops.pop();
                self.line("}");
                return Ok(());
            }
        }

        // The header needs statements of its own, so the loop is spelled out
        self.line("{");
        self.indent();

        if let Some(initializer) = initializer {
            self.write_statement(initializer)?;
        }

        self.line("while (true) {");
        self.indent();

        if let Some(condition) = condition {
            let condition = self.expression(condition)?;
            self.flush_line(format!("if (!{condition}) {{ break; }}"));
        }

        self.dedent();
        self.loops.push(match update {
            Some(update) => LoopExit::Update(update),
            None => LoopExit::Native,
        });
        self.write_block(body)?;
        self.loops.pop();

        if let Some(update) = update {
            self.indent();
            self.write_statement(update)?;
            self.dedent();
        }

        self.line("}");
        self.dedent();
        self.line("}");
        Ok(())
    }

    /* Expressions */

    pub fn expression(&mut self, id: ExpressionId) -> Result<String> {
        let program = self.program;
        let expression = program.module.expression(id);

        let Some(info) = program.expression(id) else {
            return Err(BackendError::internal(self.target(), "expression was not resolved"));
        };

        if info.stage == EvaluationStage::Constant {
            if let Some(name) = self.named_constant(id) {
                return Ok(name);
            }

            let Some(value) = &info.value else {
                return Err(BackendError::internal(self.target(), "constant expression without a value"));
            };

            let ty = self.expression_type(id)?;
            return self.constant(ty, value);
        }

        match &expression.kind {
            ExpressionKind::Literal(_) => Err(BackendError::internal(self.target(), "literal was not folded")),
            ExpressionKind::Grouping(inner) => self.expression(*inner),
            ExpressionKind::Identifier(identifier) => match program.info.resolutions.get(&id) {
                Some(Resolution::Global(global)) => {
                    let Some(info) = program.global(*global) else {
                        return Err(BackendError::internal(self.target(), "global was not resolved"));
                    };

                    Ok(self.dialect.global_reference(self, *global, info))
                }
                Some(Resolution::Local(statement)) => match self.aliases.get(statement) {
                    Some(alias) => Ok(alias.clone()),
                    None => Ok(self.escape(program.name(*identifier))),
                },
                Some(Resolution::Parameter { .. }) => Ok(self.escape(program.name(*identifier))),
                None => Err(BackendError::internal(self.target(), "identifier was not resolved")),
            },
            ExpressionKind::Call { arguments, .. } => self.call(id, arguments, expression.span),
            ExpressionKind::Index { base, index } => {
                let base = self.expression(*base)?;
                let index = self.expression(*index)?;
                Ok(format!("{base}[{}]", unwrap_parens(&index)))
            }
            ExpressionKind::Member { base, member } => {
                let base_text = self.expression(*base)?;
                let base_type = self.expression_type(*base)?;
                let member = program.name(*member);

                if let Some(text) = self.dialect.member_access(self, *base, &base_text, member) {
                    return Ok(text);
                }

                let base_type = match self.types.get(base_type) {
                    TypeKind::Pointer { pointee, .. } => *pointee,
                    _ => base_type,
                };

                match self.types.get(base_type) {
                    TypeKind::Struct(_) => Ok(format!("{base_text}.{}", self.escape(member))),
                    _ => Ok(format!("{base_text}.{member}")),
                }
            }
            ExpressionKind::Unary { operator, operand } => {
                let text = self.expression(*operand)?;

                Ok(match operator {
                    UnaryOperatorKind::Deref | UnaryOperatorKind::AddressOf => text,
                    UnaryOperatorKind::LogicalNot => {
                        let ty = self.expression_type(*operand)?;
                        self.dialect.logical_not(self, ty, &text)
                    }
                    UnaryOperatorKind::BitwiseNot => format!("(~{text})"),
                    UnaryOperatorKind::Negate => format!("(-{text})"),
                })
            }
            ExpressionKind::Binary { lhs, operator, rhs } => {
                let types = [self.expression_type(*lhs)?, self.expression_type(*rhs)?];
                let lhs = self.expression(*lhs)?;
                let rhs = self.expression(*rhs)?;

                let dialect = self.dialect;
                match dialect.binary(self, *operator, types, [&lhs, &rhs])? {
                    Some(text) => Ok(text),
                    None => Ok(format!("({lhs} {operator} {rhs})")),
                }
            }
        }
    }

    /// Writes an expression, materializing constants to `ty`
    pub fn expression_as(&mut self, id: ExpressionId, ty: TypeId) -> Result<String> {
        let constant = self
            .program
            .expression(id)
            .filter(|info| info.stage == EvaluationStage::Constant)
            .and_then(|info| info.value.as_ref());

        match constant {
            Some(value) if self.shape(ty).is_some() => self.constant(ty, value),
            _ => self.expression(id),
        }
    }

    /// Composite constants are referenced by name rather than repeated
    fn named_constant(&mut self, id: ExpressionId) -> Option<String> {
        let program = self.program;
        let identifier = program.module.expression(id).kind.as_identifier()?;

        let constant = match program.info.resolutions.get(&id)? {
            Resolution::Global(global) => program.global(*global)?.kind == GlobalKind::Const,
            Resolution::Local(statement) => program.info.locals.get(statement)?.kind == LocalKind::Const,
            Resolution::Parameter { .. } => false,
        };

        let ty = self.expression_type(id).ok()?;
        let composite = matches!(self.types.get(ty), TypeKind::Array { .. } | TypeKind::Struct(_));

        (constant && composite).then(|| self.escape(program.name(identifier)))
    }

    fn call(&mut self, id: ExpressionId, arguments: &'a [ExpressionId], span: Span) -> Result<String> {
        let program = self.program;
        let dialect = self.dialect;

        let Some(target) = program.info.calls.get(&id) else {
            return Err(BackendError::internal(self.target(), "call target was not resolved"));
        };

        match target {
            CallTarget::Function(function) => {
                let mut texts = Vec::with_capacity(arguments.len());

                for argument in arguments {
                    let ty = self.expression_type(*argument)?;
                    if dialect.combined_samplers() && matches!(self.types.get(ty), TypeKind::Sampler(_)) {
                        continue;
                    }

                    texts.push(unwrap_parens(&self.expression(*argument)?).to_string());
                }

                if dialect.globals_as_parameters() {
                    texts.extend(self.used_variables(*function).into_iter().map(|global| self.global_name(global)));
                }

                Ok(format!("{}({})", self.global_name(*function), texts.join(", ")))
            }
            CallTarget::Builtin { function, parameters } => {
                let mut texts = Vec::with_capacity(arguments.len());
                let mut types = Vec::with_capacity(arguments.len());

                for (index, argument) in arguments.iter().enumerate() {
                    let ty = match parameters.get(index) {
                        Some(parameter) => {
                            let ty = self.types.value_type(*parameter);
                            self.types.concretize(ty)
                        }
                        None => self.expression_type(*argument)?,
                    };

                    texts.push(self.expression_as(*argument, ty)?);
                    types.push(ty);
                }

                let result = match program.expression(id) {
                    Some(info) => {
                        let ty = self.types.value_type(info.ty);
                        Some(self.types.concretize(ty))
                    }
                    None => None,
                };

                let call = BuiltinCall {
                    function: *function,
                    arguments: texts,
                    types,
                    result,
                    span,
                };

                dialect.builtin(self, &call)
            }
            CallTarget::Construct(ty) => {
                let ty = self.types.concretize(*ty);

                if arguments.is_empty() {
                    return dialect.zero_value(self, ty);
                }

                let mut texts = Vec::with_capacity(arguments.len());
                let mut scalars = true;

                for argument in arguments {
                    let argument_type = self.expression_type(*argument)?;
                    scalars &= matches!(self.types.get(argument_type), TypeKind::Scalar(_));
                    texts.push(unwrap_parens(&self.expression(*argument)?).to_string());
                }

                match self.types.get(ty).clone() {
                    TypeKind::Vector { .. } if scalars && texts.len() == 1 => {
                        let scalar = texts.remove(0);
                        dialect.splat(self, ty, scalar)
                    }
                    TypeKind::Matrix { columns, rows, scalar } if scalars && texts.len() > usize::from(columns) => {
                        let column = self.types.vector(rows, scalar);
                        let columns = texts
                            .chunks(usize::from(rows))
                            .map(|chunk| dialect.construct(self, column, chunk.to_vec()))
                            .collect::<Result<Vec<_>>>()?;

                        dialect.construct(self, ty, columns)
                    }
                    _ => dialect.construct(self, ty, texts),
                }
            }
            CallTarget::Convert(ty) => {
                let ty = self.types.concretize(*ty);
                let Some(argument) = arguments.first() else {
                    return Err(BackendError::internal(self.target(), "conversion without an argument"));
                };

                let value = unwrap_parens(&self.expression(*argument)?).to_string();
                dialect.convert(self, ty, value)
            }
            CallTarget::Bitcast(ty) => {
                let ty = self.types.concretize(*ty);
                let Some(argument) = arguments.first() else {
                    return Err(BackendError::internal(self.target(), "bitcast without an argument"));
                };

                let from = self.expression_type(*argument)?;
                let value = unwrap_parens(&self.expression(*argument)?).to_string();
                dialect.bitcast(self, from, ty, value)
            }
        }
    }

    /// The module-scope variable an expression names, looking through
    /// parentheses, `&` and `*`
    pub fn root_global(&self, id: ExpressionId) -> Option<(DeclarationId, &'a GlobalInfo)> {
        let program = self.program;

        match &program.module.expression(id).kind {
            ExpressionKind::Grouping(inner)
            | ExpressionKind::Unary {
                operator: UnaryOperatorKind::Deref | UnaryOperatorKind::AddressOf,
                operand: inner,
            } => self.root_global(*inner),
            ExpressionKind::Identifier(_) => match program.info.resolutions.get(&id)? {
                Resolution::Global(global) => Some((*global, program.global(*global)?)),
                _ => None,
            },
            _ => None,
        }
    }

    /// The dimensions of the texture argument of a texture builtin
    pub fn texture_of(&self, call: &BuiltinCall) -> Result<(TextureDimension, TextureKind)> {
        match call.types.first().map(|ty| self.types.get(*ty)) {
            Some(TypeKind::Texture { dimension, kind }) => Ok((*dimension, *kind)),
            _ => Err(BackendError::internal(
                self.target(),
                format!("'{}' without a texture argument", call.function.name()),
            )),
        }
    }

    /// Shape of a scalar or vector type: `(size, scalar)`, size 1 for scalars
    pub fn shape(&self, ty: TypeId) -> Option<(u8, ScalarKind)> {
        match self.types.get(ty) {
            TypeKind::Scalar(scalar) => Some((1, *scalar)),
            TypeKind::Vector { size, scalar } => Some((*size, *scalar)),
            TypeKind::Atomic(scalar) => Some((1, *scalar)),
            _ => None,
        }
    }

    /// `dot` of two integer vectors, summed component by component
    pub fn integer_dot(&mut self, call: &BuiltinCall) -> Result<String> {
        let [a, b] = call.arguments.as_slice() else {
            return Err(BackendError::internal(self.target(), "'dot' expects two arguments"));
        };
        let Some(&ty) = call.types.first() else {
            return Err(BackendError::internal(self.target(), "'dot' without argument types"));
        };

        let size = self.shape(ty).map_or(1, |(size, _)| size);
        let ty = self.type_name(ty)?;

        let a = self.temporary(|name| format!("{ty} {name} = {};", unwrap_parens(a)));
        let b = self.temporary(|name| format!("{ty} {name} = {};", unwrap_parens(b)));

        let terms = ["x", "y", "z", "w"]
            .into_iter()
            .take(usize::from(size))
            .map(|component| format!("{a}.{component} * {b}.{component}"))
            .join(" + ");

        Ok(format!("({terms})"))
    }

    /// `name(arguments...)`
    pub fn call_text(name: &str, arguments: &[String]) -> String {
        format!("{name}({})", arguments.iter().map(|argument| unwrap_parens(argument)).join(", "))
    }
}

/// Strips one pair of parentheses enclosing the whole of `text`
pub(crate) fn unwrap_parens(text: &str) -> &str {
    let Some(inner) = text.strip_prefix('(').and_then(|text| text.strip_suffix(')')) else {
        return text;
    };

    let mut depth = 0usize;

    for character in inner.chars() {
        match character {
            '(' => depth += 1,
            ')' => match depth.checked_sub(1) {
                Some(next) => depth = next,
                None => return text,
            },
            _ => {}
        }
    }

    if depth == 0 { inner } else { text }
}

/// A readable identifier derived from a type name, e.g.
/// `array<vec4<f32>, 4>` becomes `array_vec4_f32_4`
pub(crate) fn type_identifier(name: &str) -> String {
    name.split(|character: char| !character.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .join("_")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        frontend::SourceFile,
        middle::{
            program::BindingPoint,
            transform::{
                ArrayLengthFromUniform, ArrayLengthFromUniformOptions, BindingRemapper, DataMap, Manager,
                RemovePhonies, SubstituteOverride,
            },
        },
    };

    /// Legalizes `source` the way the driver does for `target`
    pub(crate) fn legalized(source: &str, target: Target) -> Program {
        let program = Program::from_source(&SourceFile::from_memory(source), 10);
        assert!(program.is_valid(), "{:#?}", program.diagnostics);

        let capabilities = target.capabilities();
        let mut manager = Manager::new();
        manager.add(SubstituteOverride);

        if !capabilities.phony {
            manager.add(RemovePhonies);
        }
        if !capabilities.bind_groups || !capabilities.array_length {
            manager.add(BindingRemapper);
        }

        let mut inputs = DataMap::new();

        if !capabilities.array_length {
            manager.add(ArrayLengthFromUniform);

            let sizes = program
                .info
                .globals
                .values()
                .filter(|global| global.binding.is_some() && program.types.has_runtime_size(global.ty))
                .filter_map(|global| global.binding)
                .zip(0..)
                .collect();

            inputs.put(ArrayLengthFromUniformOptions {
                uniform_binding: BindingPoint::new(0, 30),
                size_indices: sizes,
            });
        }

        let output = manager.run(&program, inputs).program;
        assert!(output.is_valid(), "{:#?}", output.diagnostics);
        output
    }

    #[test]
    fn enclosing_parentheses_are_unwrapped() {
        assert_eq!(unwrap_parens("(a + b)"), "a + b");
        assert_eq!(unwrap_parens("(a) + (b)"), "(a) + (b)");
        assert_eq!(unwrap_parens("f(x)"), "f(x)");
        assert_eq!(unwrap_parens("((a))"), "(a)");
    }

    #[test]
    fn type_names_become_identifiers() {
        assert_eq!(type_identifier("array<vec4<f32>, 4>"), "array_vec4_f32_4");
        assert_eq!(type_identifier("array<array<u32, 2>, 3>"), "array_array_u32_2_3");
    }
}

//! A resolved module: the AST together with everything the resolver learned
//! about it.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::{
    diagnostics::{DEFAULT_MAX_ERRORS, Diagnostics},
    frontend::{
        SourceFile,
        ast::{self, DeclarationId, ExpressionId, PipelineStage, StatementId, TypeExpressionId},
        lexer::Span,
        parser::Parser,
    },
    middle::{
        builtin::BuiltinFunction,
        constant::ConstValue,
        resolve::Resolver,
        ty::{AccessMode, AddressSpace, TypeId, TypeTable},
    },
};

/// A module after semantic resolution. Valid iff no error was reported by any
/// stage that produced it.
#[derive(Debug, Clone)]
pub struct Program {
    pub module: ast::Module,
    pub types: TypeTable,
    pub info: SemanticInfo,
    pub diagnostics: Diagnostics,
}

impl Program {
    /// Parses and resolves a source file
    pub fn from_source(source: &SourceFile, max_errors: usize) -> Self {
        let output = Parser::parse_module(source, max_errors);

        Self::new(output.module, output.diagnostics)
    }

    /// Resolves `module`. Resolution is skipped when `diagnostics` already
    /// contains errors, since the AST may be incomplete.
    pub fn new(module: ast::Module, mut diagnostics: Diagnostics) -> Self {
        if diagnostics.contains_errors() {
            debug!("skipping resolution of a module with syntax errors");

            return Self {
                module,
                types: TypeTable::new(),
                info: SemanticInfo::default(),
                diagnostics,
            };
        }

        let (types, info) = Resolver::resolve(&module, &mut diagnostics);

        Self {
            module,
            types,
            info,
            diagnostics,
        }
    }

    /// Resolves a module that was rewritten by a transform
    pub fn rebuild(module: ast::Module, max_errors: usize) -> Self {
        Self::new(module, Diagnostics::new(max_errors))
    }

    pub fn is_valid(&self) -> bool {
        !self.diagnostics.contains_errors()
    }

    pub fn max_errors(&self) -> usize {
        self.diagnostics.max_errors()
    }

    pub fn entry_points(&self) -> impl Iterator<Item = (DeclarationId, &ast::Function, &FunctionInfo)> {
        self.module.functions().filter_map(|(id, function)| {
            let info = self.info.functions.get(&id)?;
            info.stage.map(|_| (id, function, info))
        })
    }

    pub fn expression(&self, id: ExpressionId) -> Option<&ExpressionInfo> {
        self.info.expressions.get(&id)
    }

    pub fn expression_type(&self, id: ExpressionId) -> Option<TypeId> {
        self.expression(id).map(|info| info.ty)
    }

    pub fn function(&self, id: DeclarationId) -> Option<&FunctionInfo> {
        self.info.functions.get(&id)
    }

    pub fn global(&self, id: DeclarationId) -> Option<&GlobalInfo> {
        self.info.globals.get(&id)
    }

    /// The workgroup size of a function. Functions that are not compute entry
    /// points have a size of `(1, 1, 1)`.
    pub fn workgroup_size(&self, function: DeclarationId) -> [WorkgroupDimension; 3] {
        self.function(function)
            .map(|info| info.workgroup_size)
            .unwrap_or(DEFAULT_WORKGROUP_SIZE)
    }

    /// The workgroup size as numbers, if no dimension depends on an override
    pub fn resolved_workgroup_size(&self, function: DeclarationId) -> Option<[u32; 3]> {
        let [x, y, z] = self.workgroup_size(function);

        Some([x.as_constant()?, y.as_constant()?, z.as_constant()?])
    }

    pub fn name(&self, identifier: ast::Identifier) -> &str {
        self.module.name(identifier)
    }

    /// Span of a declaration's name, or of the whole declaration if unnamed
    pub fn declaration_span(&self, id: DeclarationId) -> Span {
        let declaration = self.module.declaration(id);

        declaration.name().map(|name| name.span).unwrap_or(declaration.span)
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::rebuild(ast::Module::new(), DEFAULT_MAX_ERRORS)
    }
}

/// Where an expression may be evaluated. Ordered from earliest to latest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EvaluationStage {
    /// Known while compiling the shader
    Constant,
    /// Known when the pipeline is created
    Override,
    Runtime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionInfo {
    /// The type after materialization. Expressions denoting memory have a
    /// reference type.
    pub ty: TypeId,
    pub stage: EvaluationStage,
    /// Present iff `stage` is [`EvaluationStage::Constant`]
    pub value: Option<ConstValue>,
}

/// The declaration an identifier expression refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Global(DeclarationId),
    Parameter { function: DeclarationId, index: usize },
    /// A function scope `var`, `let` or `const` declared by a statement
    Local(StatementId),
}

/// What a call expression invokes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    Function(DeclarationId),
    Builtin {
        function: BuiltinFunction,
        /// The types each argument was materialized to
        parameters: Vec<TypeId>,
    },
    /// A value constructor, including the zero value constructor `T()`
    Construct(TypeId),
    /// A value conversion of a single scalar, vector or matrix argument
    Convert(TypeId),
    Bitcast(TypeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalKind {
    Var,
    Let,
    Const,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalInfo {
    pub kind: LocalKind,
    /// The store type of a `var`, the value type otherwise
    pub ty: TypeId,
    pub value: Option<ConstValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalKind {
    Var { space: AddressSpace, access: AccessMode },
    Const,
    Override,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalInfo {
    pub kind: GlobalKind,
    /// The store type of a `var`, the value type otherwise
    pub ty: TypeId,
    pub binding: Option<BindingPoint>,
    /// Explicit `@id` or the implicitly assigned id of an override
    pub override_id: Option<u16>,
    pub value: Option<ConstValue>,
    /// Module-scope `var`s and overrides referenced by the initializer
    pub dependencies: BTreeSet<DeclarationId>,
}

impl GlobalInfo {
    pub fn is_override(&self) -> bool {
        self.kind == GlobalKind::Override
    }

    pub fn address_space(&self) -> Option<AddressSpace> {
        match self.kind {
            GlobalKind::Var { space, .. } => Some(space),
            _ => None,
        }
    }

    pub fn is_resource(&self) -> bool {
        self.address_space().is_some_and(AddressSpace::is_resource)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BindingPoint {
    pub group: u32,
    pub binding: u32,
}

impl BindingPoint {
    pub fn new(group: u32, binding: u32) -> Self {
        Self { group, binding }
    }
}

impl core::fmt::Display for BindingPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@group({}) @binding({})", self.group, self.binding)
    }
}

/// One dimension of a `@workgroup_size`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkgroupDimension {
    Constant(u32),
    /// Depends on an override; the expression is evaluated at pipeline
    /// creation
    Override(ExpressionId),
}

impl WorkgroupDimension {
    pub fn as_constant(self) -> Option<u32> {
        match self {
            Self::Constant(value) => Some(value),
            Self::Override(_) => None,
        }
    }
}

pub const DEFAULT_WORKGROUP_SIZE: [WorkgroupDimension; 3] = [WorkgroupDimension::Constant(1); 3];

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionInfo {
    pub stage: Option<PipelineStage>,
    pub parameters: Vec<TypeId>,
    pub return_type: Option<TypeId>,
    pub workgroup_size: [WorkgroupDimension; 3],
    /// Module-scope `var`s and overrides referenced in the body
    pub direct_globals: BTreeSet<DeclarationId>,
    /// [`FunctionInfo::direct_globals`] of this function and every function
    /// it transitively calls
    pub transitive_globals: BTreeSet<DeclarationId>,
    pub direct_calls: BTreeSet<DeclarationId>,
    pub transitive_calls: BTreeSet<DeclarationId>,
    /// Entry points from which this function is reachable
    pub ancestor_entry_points: BTreeSet<DeclarationId>,
    /// Resource bindings of every transitively referenced resource variable
    pub bindings: BTreeMap<BindingPoint, DeclarationId>,
    pub builtin_calls: Vec<(BuiltinFunction, Span)>,
    pub discards: Vec<Span>,
}

impl FunctionInfo {
    pub fn new(stage: Option<PipelineStage>) -> Self {
        Self {
            stage,
            parameters: Vec::new(),
            return_type: None,
            workgroup_size: DEFAULT_WORKGROUP_SIZE,
            direct_globals: BTreeSet::new(),
            transitive_globals: BTreeSet::new(),
            direct_calls: BTreeSet::new(),
            transitive_calls: BTreeSet::new(),
            ancestor_entry_points: BTreeSet::new(),
            bindings: BTreeMap::new(),
            builtin_calls: Vec::new(),
            discards: Vec::new(),
        }
    }

    pub fn is_entry_point(&self) -> bool {
        self.stage.is_some()
    }
}

/// Semantic annotations of a module, keyed by AST node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SemanticInfo {
    pub expressions: BTreeMap<ExpressionId, ExpressionInfo>,
    pub resolutions: BTreeMap<ExpressionId, Resolution>,
    pub calls: BTreeMap<ExpressionId, CallTarget>,
    pub type_expressions: BTreeMap<TypeExpressionId, TypeId>,
    pub locals: BTreeMap<StatementId, LocalInfo>,
    pub globals: BTreeMap<DeclarationId, GlobalInfo>,
    pub functions: BTreeMap<DeclarationId, FunctionInfo>,
    /// The types declared by structs and aliases
    pub type_declarations: BTreeMap<DeclarationId, TypeId>,
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn program(source: &str) -> Program {
        Program::from_source(&SourceFile::from_memory(source), DEFAULT_MAX_ERRORS)
    }

    #[test]
    fn syntax_errors_skip_resolution() {
        let program = program("fn main( {}");

        assert!(!program.is_valid());
        assert!(program.info.functions.is_empty());
        assert!(program.types.is_empty());
    }

    #[test]
    fn workgroup_size_defaults_to_one() {
        let program = program(indoc! {"
            fn helper() {}

            @compute @workgroup_size(8, 4)
            fn main() {
                helper();
            }
        "});

        assert!(program.is_valid(), "{:?}", program.diagnostics);

        let helper = program.module.find_declaration("helper").map(|id| program.resolved_workgroup_size(id));
        let main = program.module.find_declaration("main").map(|id| program.resolved_workgroup_size(id));

        assert_eq!(helper, Some(Some([1, 1, 1])));
        assert_eq!(main, Some(Some([8, 4, 1])));
    }
}

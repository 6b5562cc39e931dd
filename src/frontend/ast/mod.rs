use strum::{Display, EnumString};

use super::{
    intern::{Interner, Symbol},
    lexer::{FloatSuffix, IntSuffix, Span},
};
use crate::index::{IndexVec, simple_index};

pub mod printer;
pub mod visit;

simple_index! {
    /// A top level declaration in a [`Module`]
    pub struct DeclarationId;
}

simple_index! {
    pub struct ExpressionId;
}

simple_index! {
    pub struct StatementId;
}

simple_index! {
    pub struct TypeExpressionId;
}

/// A parsed translation unit. Every node lives in one of the arenas below and
/// refers to other nodes by index.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub symbols: Interner,
    pub enables: Vec<Identifier>,
    pub declarations: IndexVec<DeclarationId, Declaration>,
    pub expressions: IndexVec<ExpressionId, Expression>,
    pub statements: IndexVec<StatementId, Statement>,
    pub types: IndexVec<TypeExpressionId, TypeExpression>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> Symbol {
        self.symbols.intern(name)
    }

    pub fn identifier(&mut self, name: &str, span: Span) -> Identifier {
        Identifier {
            symbol: self.intern(name),
            span,
        }
    }

    pub fn name(&self, identifier: Identifier) -> &str {
        self.symbols.resolve(identifier.symbol)
    }

    pub fn add_expression(&mut self, kind: ExpressionKind, span: Span) -> ExpressionId {
        self.expressions.push(Expression { span, kind })
    }

    pub fn add_statement(&mut self, kind: StatementKind, span: Span) -> StatementId {
        self.statements.push(Statement { span, kind })
    }

    pub fn add_type(&mut self, type_expression: TypeExpression) -> TypeExpressionId {
        self.types.push(type_expression)
    }

    /// A type expression naming a type without template arguments
    pub fn add_named_type(&mut self, name: &str, span: Span) -> TypeExpressionId {
        let name = self.identifier(name, span);

        self.add_type(TypeExpression {
            span,
            name,
            template: Vec::new(),
        })
    }

    pub fn expression(&self, id: ExpressionId) -> &Expression {
        &self.expressions[id]
    }

    pub fn statement(&self, id: StatementId) -> &Statement {
        &self.statements[id]
    }

    pub fn type_expression(&self, id: TypeExpressionId) -> &TypeExpression {
        &self.types[id]
    }

    pub fn declaration(&self, id: DeclarationId) -> &Declaration {
        &self.declarations[id]
    }

    pub fn functions(&self) -> impl Iterator<Item = (DeclarationId, &Function)> {
        self.declarations
            .enumerate()
            .filter_map(|(id, declaration)| declaration.as_function().map(|f| (id, f)))
    }

    pub fn variables(&self) -> impl Iterator<Item = (DeclarationId, &Variable)> {
        self.declarations
            .enumerate()
            .filter_map(|(id, declaration)| declaration.as_variable().map(|v| (id, v)))
    }

    pub fn find_declaration(&self, name: &str) -> Option<DeclarationId> {
        let symbol = self.symbols.lookup(name)?;

        self.declarations
            .enumerate()
            .find(|(_, declaration)| declaration.name().is_some_and(|n| n.symbol == symbol))
            .map(|(id, _)| id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identifier {
    pub symbol: Symbol,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub span: Span,
    pub kind: DeclarationKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeclarationKind {
    Function(Function),
    Variable(Variable),
    Struct(Struct),
    Alias(Alias),
    ConstAssert(ExpressionId),
}

impl Declaration {
    pub fn name(&self) -> Option<Identifier> {
        match &self.kind {
            DeclarationKind::Function(function) => Some(function.name),
            DeclarationKind::Variable(variable) => Some(variable.name),
            DeclarationKind::Struct(structure) => Some(structure.name),
            DeclarationKind::Alias(alias) => Some(alias.name),
            DeclarationKind::ConstAssert(_) => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match &self.kind {
            DeclarationKind::Function(function) => Some(function),
            _ => None,
        }
    }

    pub fn as_variable(&self) -> Option<&Variable> {
        match &self.kind {
            DeclarationKind::Variable(variable) => Some(variable),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&Struct> {
        match &self.kind {
            DeclarationKind::Struct(structure) => Some(structure),
            _ => None,
        }
    }

    pub fn as_alias(&self) -> Option<&Alias> {
        match &self.kind {
            DeclarationKind::Alias(alias) => Some(alias),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub span: Span,
    pub attributes: Vec<Attribute>,
    pub name: Identifier,
    pub parameters: Vec<Parameter>,
    pub return_attributes: Vec<Attribute>,
    pub return_type: Option<TypeExpressionId>,
    pub body: Block,
}

impl Function {
    pub fn stage(&self) -> Option<PipelineStage> {
        self.attributes.iter().find_map(|attribute| match attribute.kind {
            AttributeKind::Stage(stage) => Some(stage),
            _ => None,
        })
    }

    pub fn is_entry_point(&self) -> bool {
        self.stage().is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub span: Span,
    pub attributes: Vec<Attribute>,
    pub name: Identifier,
    pub ty: TypeExpressionId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Struct {
    pub span: Span,
    pub name: Identifier,
    pub members: Vec<StructMember>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructMember {
    pub span: Span,
    pub attributes: Vec<Attribute>,
    pub name: Identifier,
    pub ty: TypeExpressionId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    pub span: Span,
    pub name: Identifier,
    pub ty: TypeExpressionId,
}

/// `var`, `let`, `const` and `override` declarations, at module or function
/// scope
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub span: Span,
    pub attributes: Vec<Attribute>,
    pub kind: VariableKind,
    pub name: Identifier,
    pub ty: Option<TypeExpressionId>,
    pub initializer: Option<ExpressionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Var {
        address_space: Option<Identifier>,
        access: Option<Identifier>,
    },
    Let,
    Const,
    Override,
}

impl VariableKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Var { .. } => "var",
            Self::Let => "let",
            Self::Const => "const",
            Self::Override => "override",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum PipelineStage {
    Vertex,
    Fragment,
    Compute,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub span: Span,
    pub kind: AttributeKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeKind {
    Group(ExpressionId),
    Binding(ExpressionId),
    Id(ExpressionId),
    Location(ExpressionId),
    Stage(PipelineStage),
    WorkgroupSize {
        x: ExpressionId,
        y: Option<ExpressionId>,
        z: Option<ExpressionId>,
    },
    Builtin(Identifier),
    Interpolate {
        kind: Identifier,
        sampling: Option<Identifier>,
    },
    Invariant,
    Align(ExpressionId),
    Size(ExpressionId),
}

impl AttributeKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Group(_) => "group",
            Self::Binding(_) => "binding",
            Self::Id(_) => "id",
            Self::Location(_) => "location",
            Self::Stage(PipelineStage::Vertex) => "vertex",
            Self::Stage(PipelineStage::Fragment) => "fragment",
            Self::Stage(PipelineStage::Compute) => "compute",
            Self::WorkgroupSize { .. } => "workgroup_size",
            Self::Builtin(_) => "builtin",
            Self::Interpolate { .. } => "interpolate",
            Self::Invariant => "invariant",
            Self::Align(_) => "align",
            Self::Size(_) => "size",
        }
    }
}

/// Unresolved type syntax: a name with optional template arguments, e.g.
/// `array<vec4<f32>, 4>`
#[derive(Debug, Clone, PartialEq)]
pub struct TypeExpression {
    pub span: Span,
    pub name: Identifier,
    pub template: Vec<TemplateArgument>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateArgument {
    Type(TypeExpressionId),
    Expression(ExpressionId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub span: Span,
    pub statements: Vec<StatementId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub span: Span,
    pub kind: StatementKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    Block(Block),
    /// Function scope `var`, `let` or `const`
    Variable(Variable),
    Assignment {
        lhs: ExpressionId,
        rhs: ExpressionId,
    },
    CompoundAssignment {
        lhs: ExpressionId,
        operator: BinaryOperatorKind,
        rhs: ExpressionId,
    },
    Increment(ExpressionId),
    Decrement(ExpressionId),
    /// `_ = expression;`
    Phony(ExpressionId),
    Call(ExpressionId),
    If {
        condition: ExpressionId,
        accept: Block,
        /// Either an `If` statement (`else if`) or a `Block` statement
        reject: Option<StatementId>,
    },
    Switch {
        selector: ExpressionId,
        clauses: Vec<SwitchClause>,
    },
    Loop {
        body: Block,
        continuing: Option<Continuing>,
    },
    For {
        initializer: Option<StatementId>,
        condition: Option<ExpressionId>,
        update: Option<StatementId>,
        body: Block,
    },
    While {
        condition: ExpressionId,
        body: Block,
    },
    Break,
    Continue,
    Return(Option<ExpressionId>),
    Discard,
    ConstAssert(ExpressionId),
}

impl StatementKind {
    pub fn as_variable(&self) -> Option<&Variable> {
        match self {
            Self::Variable(variable) => Some(variable),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<&Block> {
        match self {
            Self::Block(block) => Some(block),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchClause {
    pub span: Span,
    pub selectors: Vec<CaseSelector>,
    pub body: Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseSelector {
    Default,
    Expression(ExpressionId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Continuing {
    pub span: Span,
    pub body: Block,
    pub break_if: Option<ExpressionId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub span: Span,
    pub kind: ExpressionKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionKind {
    Literal(Literal),
    Identifier(Identifier),
    /// Function calls, value constructors and conversions. The callee is type
    /// syntax so that `vec4<f32>(...)` and `bitcast<u32>(...)` fit.
    Call {
        callee: TypeExpressionId,
        arguments: Vec<ExpressionId>,
    },
    Index {
        base: ExpressionId,
        index: ExpressionId,
    },
    Member {
        base: ExpressionId,
        member: Identifier,
    },
    Unary {
        operator: UnaryOperatorKind,
        operand: ExpressionId,
    },
    Binary {
        lhs: ExpressionId,
        operator: BinaryOperatorKind,
        rhs: ExpressionId,
    },
    Grouping(ExpressionId),
}

impl ExpressionKind {
    pub fn as_identifier(&self) -> Option<Identifier> {
        match self {
            Self::Identifier(identifier) => Some(*identifier),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<Literal> {
        match self {
            Self::Literal(literal) => Some(*literal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Bool(bool),
    Int(i64, IntSuffix),
    Float(f64, FloatSuffix),
}

impl core::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value, IntSuffix::None) => write!(f, "{value}"),
            Self::Int(value, IntSuffix::I) => write!(f, "{value}i"),
            Self::Int(value, IntSuffix::U) => write!(f, "{value}u"),
            Self::Float(value, suffix) => {
                write!(f, "{value:?}")?;

                match suffix {
                    FloatSuffix::None => Ok(()),
                    FloatSuffix::F => f.write_str("f"),
                    FloatSuffix::H => f.write_str("h"),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperatorKind {
    Add,                  // +
    Subtract,             // -
    Multiply,             // *
    Divide,               // /
    Modulus,              // %
    Equals,               // ==
    NotEquals,            // !=
    LessThan,             // <
    LessThanOrEqualTo,    // <=
    GreaterThan,          // >
    GreaterThanOrEqualTo, // >=
    LogicalAnd,           // &&
    LogicalOr,            // ||
    BitwiseAnd,           // &
    BitwiseOr,            // |
    BitwiseXor,           // ^
    ShiftLeft,            // <<
    ShiftRight,           // >>
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperatorClass {
    Arithmetic,
    Comparison,
    Logical,
    Bitwise,
    Shift,
}

impl BinaryOperatorKind {
    pub fn class(self) -> BinaryOperatorClass {
        match self {
            Self::Add | Self::Subtract | Self::Multiply | Self::Divide | Self::Modulus => {
                BinaryOperatorClass::Arithmetic
            }
            Self::Equals
            | Self::NotEquals
            | Self::LessThan
            | Self::LessThanOrEqualTo
            | Self::GreaterThan
            | Self::GreaterThanOrEqualTo => BinaryOperatorClass::Comparison,
            Self::LogicalAnd | Self::LogicalOr => BinaryOperatorClass::Logical,
            Self::BitwiseAnd | Self::BitwiseOr | Self::BitwiseXor => BinaryOperatorClass::Bitwise,
            Self::ShiftLeft | Self::ShiftRight => BinaryOperatorClass::Shift,
        }
    }
}

impl core::fmt::Display for BinaryOperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulus => "%",
            Self::Equals => "==",
            Self::NotEquals => "!=",
            Self::LessThan => "<",
            Self::LessThanOrEqualTo => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqualTo => ">=",
            Self::LogicalAnd => "&&",
            Self::LogicalOr => "||",
            Self::BitwiseAnd => "&",
            Self::BitwiseOr => "|",
            Self::BitwiseXor => "^",
            Self::ShiftLeft => "<<",
            Self::ShiftRight => ">>",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperatorKind {
    Deref,      // *
    AddressOf,  // &
    LogicalNot, // !
    BitwiseNot, // ~
    Negate,     // -
}

impl core::fmt::Display for UnaryOperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deref => write!(f, "*"),
            Self::AddressOf => write!(f, "&"),
            Self::LogicalNot => write!(f, "!"),
            Self::BitwiseNot => write!(f, "~"),
            Self::Negate => write!(f, "-"),
        }
    }
}

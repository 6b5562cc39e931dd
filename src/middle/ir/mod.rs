//! IR (Intermediate Representation). Function bodies are lowered to basic
//! blocks of instructions operating on values. Structured control flow is
//! kept as merge metadata on header blocks so backends that need structured
//! control flow can rebuild it.
//!
//! Every value keeps the list of instructions using it. Mutations go through
//! [`Module`] methods, which keep those lists consistent.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::{
    frontend::{
        ast::{BinaryOperatorKind, PipelineStage, UnaryOperatorKind},
        lexer::Span,
    },
    index::{IndexVec, simple_index},
    middle::{
        builtin::BuiltinFunction,
        constant::ConstValue,
        interface::EntryPointInterface,
        program::BindingPoint,
        ty::{AccessMode, AddressSpace, TypeId, TypeKind, TypeTable},
    },
};

pub mod builder;
pub mod pretty_print;
pub mod validate;

simple_index! {
    /// Identifies an IR function
    pub struct FunctionId;
}

simple_index! {
    /// Identifies a module-scope variable
    pub struct GlobalId;
}

simple_index! {
    /// Identifies a basic block
    pub struct BlockId;
}

simple_index! {
    /// Identifies an instruction
    pub struct InstructionId;
}

simple_index! {
    /// Identifies a value: a constant, parameter, global or instruction
    /// result
    pub struct ValueId;
}

/// An inconsistency in an IR module. Always a compiler bug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    #[error("block {0:?} in function '{1}' has no terminator")]
    MissingTerminator(BlockId, String),
    #[error("terminator {0:?} is not the last instruction of its block")]
    MisplacedTerminator(InstructionId),
    #[error("instruction {0:?} uses value {1:?} but is missing from its use list")]
    MissingUse(InstructionId, ValueId),
    #[error("value {0:?} lists instruction {1:?} as a use, but it does not use the value")]
    StaleUse(ValueId, InstructionId),
    #[error("value {0:?} does not dominate its use in instruction {1:?}")]
    NotDominated(ValueId, InstructionId),
    #[error("instruction {0:?} branches to block {1:?} of another function")]
    ForeignBlock(InstructionId, BlockId),
    #[error("instruction {0:?} belongs to block {1:?} but is listed elsewhere")]
    MisplacedInstruction(InstructionId, BlockId),
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub types: TypeTable,
    pub globals: IndexVec<GlobalId, GlobalVariable>,
    pub functions: IndexVec<FunctionId, Function>,
    pub blocks: IndexVec<BlockId, Block>,
    pub instructions: IndexVec<InstructionId, Instruction>,
    pub values: IndexVec<ValueId, Value>,
}

#[derive(Debug, Clone)]
pub struct GlobalVariable {
    pub name: String,
    pub space: AddressSpace,
    pub access: AccessMode,
    /// The type of the stored value
    pub store: TypeId,
    pub binding: Option<BindingPoint>,
    pub initializer: Option<ConstValue>,
    /// The pointer value naming this variable
    pub value: ValueId,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub stage: Option<PipelineStage>,
    pub workgroup_size: Option<[u32; 3]>,
    pub interface: Option<EntryPointInterface>,
    pub parameters: Vec<Parameter>,
    pub return_type: Option<TypeId>,
    /// Blocks in creation order. The first one is the entry block.
    pub blocks: Vec<BlockId>,
}

impl Function {
    pub fn entry_block(&self) -> Option<BlockId> {
        self.blocks.first().copied()
    }

    pub fn is_entry_point(&self) -> bool {
        self.stage.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub ty: TypeId,
    pub value: ValueId,
}

/// Structured control flow metadata of a header block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    /// An `if` or `switch` reconverging at `merge`
    Selection(BlockId),
    Loop { merge: BlockId, continuing: BlockId },
}

impl Merge {
    pub fn targets(self) -> impl Iterator<Item = BlockId> {
        let (merge, continuing) = match self {
            Self::Selection(merge) => (merge, None),
            Self::Loop { merge, continuing } => (merge, Some(continuing)),
        };

        std::iter::once(merge).chain(continuing)
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub function: FunctionId,
    pub instructions: Vec<InstructionId>,
    pub merge: Option<Merge>,
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub block: BlockId,
    pub kind: InstructionKind,
    pub result: Option<ValueId>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstructionKind {
    /// A function scope variable. The result is a pointer to it.
    Variable {
        store: TypeId,
    },
    Load {
        pointer: ValueId,
    },
    Store {
        pointer: ValueId,
        value: ValueId,
    },
    /// A pointer into a composite behind `base`
    Access {
        base: ValueId,
        indices: Vec<ValueId>,
    },
    /// A component of a composite value
    Extract {
        composite: ValueId,
        index: ValueId,
    },
    Swizzle {
        vector: ValueId,
        components: Vec<u32>,
    },
    Construct {
        components: Vec<ValueId>,
    },
    Convert {
        value: ValueId,
    },
    Bitcast {
        value: ValueId,
    },
    Unary {
        operator: UnaryOperatorKind,
        operand: ValueId,
    },
    Binary {
        operator: BinaryOperatorKind,
        lhs: ValueId,
        rhs: ValueId,
    },
    Call {
        function: FunctionId,
        arguments: Vec<ValueId>,
    },
    CallBuiltin {
        function: BuiltinFunction,
        arguments: Vec<ValueId>,
    },
    Phi {
        incoming: Vec<(BlockId, ValueId)>,
    },
    Branch {
        target: BlockId,
    },
    ConditionalBranch {
        condition: ValueId,
        accept: BlockId,
        reject: BlockId,
    },
    Switch {
        selector: ValueId,
        cases: Vec<(i64, BlockId)>,
        default: BlockId,
    },
    Return {
        value: Option<ValueId>,
    },
    Unreachable,
    Discard,
}

impl InstructionKind {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Branch { .. }
                | Self::ConditionalBranch { .. }
                | Self::Switch { .. }
                | Self::Return { .. }
                | Self::Unreachable
                | Self::Discard
        )
    }

    /// Whether removing the instruction could change the behavior of the
    /// program, ignoring its result
    pub fn has_side_effects(&self, module: &Module) -> bool {
        match self {
            Self::Store { .. } | Self::Call { .. } => true,
            Self::CallBuiltin { function, .. } => !function.is_pure(),
            Self::Load { pointer } => module.is_atomic_pointer(*pointer),
            _ => self.is_terminator(),
        }
    }

    /// Values read by this instruction, in operand order
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Self::Variable { .. } | Self::Branch { .. } | Self::Unreachable | Self::Discard => Vec::new(),
            Self::Load { pointer } => vec![*pointer],
            Self::Store { pointer, value } => vec![*pointer, *value],
            Self::Access { base, indices } => std::iter::once(*base).chain(indices.iter().copied()).collect(),
            Self::Extract { composite, index } => vec![*composite, *index],
            Self::Swizzle { vector, .. } => vec![*vector],
            Self::Construct { components } => components.clone(),
            Self::Convert { value } | Self::Bitcast { value } => vec![*value],
            Self::Unary { operand, .. } => vec![*operand],
            Self::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            Self::Call { arguments, .. } | Self::CallBuiltin { arguments, .. } => arguments.clone(),
            Self::Phi { incoming } => incoming.iter().map(|(_, value)| *value).collect(),
            Self::ConditionalBranch { condition, .. } => vec![*condition],
            Self::Switch { selector, .. } => vec![*selector],
            Self::Return { value } => value.iter().copied().collect(),
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut ValueId> {
        match self {
            Self::Variable { .. } | Self::Branch { .. } | Self::Unreachable | Self::Discard => Vec::new(),
            Self::Load { pointer } => vec![pointer],
            Self::Store { pointer, value } => vec![pointer, value],
            Self::Access { base, indices } => std::iter::once(base).chain(indices.iter_mut()).collect(),
            Self::Extract { composite, index } => vec![composite, index],
            Self::Swizzle { vector, .. } => vec![vector],
            Self::Construct { components } => components.iter_mut().collect(),
            Self::Convert { value } | Self::Bitcast { value } => vec![value],
            Self::Unary { operand, .. } => vec![operand],
            Self::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            Self::Call { arguments, .. } | Self::CallBuiltin { arguments, .. } => arguments.iter_mut().collect(),
            Self::Phi { incoming } => incoming.iter_mut().map(|(_, value)| value).collect(),
            Self::ConditionalBranch { condition, .. } => vec![condition],
            Self::Switch { selector, .. } => vec![selector],
            Self::Return { value } => value.iter_mut().collect(),
        }
    }

    /// Blocks this terminator may transfer control to
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Self::Branch { target } => vec![*target],
            Self::ConditionalBranch { accept, reject, .. } => vec![*accept, *reject],
            Self::Switch { cases, default, .. } => {
                let mut successors = vec![*default];
                for (_, block) in cases {
                    if !successors.contains(block) {
                        successors.push(*block);
                    }
                }
                successors
            }
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Value {
    pub ty: TypeId,
    pub kind: ValueKind,
    /// Instructions reading this value, once per operand
    pub uses: Vec<InstructionId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    Constant(ConstValue),
    Parameter { function: FunctionId, index: usize },
    Global(GlobalId),
    Instruction(InstructionId),
}

impl Module {
    pub fn new(types: TypeTable) -> Self {
        Self {
            types,
            ..Self::default()
        }
    }

    pub fn add_value(&mut self, ty: TypeId, kind: ValueKind) -> ValueId {
        self.values.push(Value {
            ty,
            kind,
            uses: Vec::new(),
        })
    }

    pub fn constant(&mut self, ty: TypeId, value: ConstValue) -> ValueId {
        self.add_value(ty, ValueKind::Constant(value))
    }

    pub fn as_constant(&self, value: ValueId) -> Option<&ConstValue> {
        match &self.values[value].kind {
            ValueKind::Constant(constant) => Some(constant),
            _ => None,
        }
    }

    pub fn add_block(&mut self, function: FunctionId) -> BlockId {
        let id = self.blocks.push(Block {
            function,
            instructions: Vec::new(),
            merge: None,
        });
        self.functions[function].blocks.push(id);

        id
    }

    /// Appends an instruction to `block`. A result value of type `ty` is
    /// created when `ty` is given.
    pub fn append(
        &mut self,
        block: BlockId,
        kind: InstructionKind,
        ty: Option<TypeId>,
        span: Span,
    ) -> (InstructionId, Option<ValueId>) {
        let position = self.blocks[block].instructions.len();
        self.insert(block, position, kind, ty, span)
    }

    pub fn insert(
        &mut self,
        block: BlockId,
        position: usize,
        kind: InstructionKind,
        ty: Option<TypeId>,
        span: Span,
    ) -> (InstructionId, Option<ValueId>) {
        let operands = kind.operands();

        let id = self.instructions.push(Instruction {
            block,
            kind,
            result: None,
            span,
        });

        for operand in operands {
            self.values[operand].uses.push(id);
        }

        let result = ty.map(|ty| self.add_value(ty, ValueKind::Instruction(id)));
        self.instructions[id].result = result;
        self.blocks[block].instructions.insert(position, id);

        (id, result)
    }

    /// Detaches an instruction from its block and drops its uses. Its result
    /// must be unused.
    pub fn remove_instruction(&mut self, id: InstructionId) {
        let block = self.instructions[id].block;
        self.blocks[block].instructions.retain(|instruction| *instruction != id);

        for operand in self.instructions[id].kind.operands() {
            let uses = &mut self.values[operand].uses;
            if let Some(position) = uses.iter().position(|user| *user == id) {
                uses.swap_remove(position);
            }
        }
    }

    /// Replaces the instruction's kind, updating use lists
    pub fn replace_kind(&mut self, id: InstructionId, kind: InstructionKind) {
        for operand in self.instructions[id].kind.operands() {
            let uses = &mut self.values[operand].uses;
            if let Some(position) = uses.iter().position(|user| *user == id) {
                uses.swap_remove(position);
            }
        }

        for operand in kind.operands() {
            self.values[operand].uses.push(id);
        }

        self.instructions[id].kind = kind;
    }

    /// Rewrites every use of `old` to read `new` instead
    pub fn replace_all_uses(&mut self, old: ValueId, new: ValueId) {
        if old == new {
            return;
        }

        let users = std::mem::take(&mut self.values[old].uses);

        for user in &users {
            for operand in self.instructions[*user].kind.operands_mut() {
                if *operand == old {
                    *operand = new;
                }
            }
        }

        self.values[new].uses.extend(users);
    }

    pub fn terminator(&self, block: BlockId) -> Option<&Instruction> {
        let last = self.blocks[block].instructions.last()?;
        let instruction = &self.instructions[*last];

        instruction.kind.is_terminator().then_some(instruction)
    }

    pub fn is_terminated(&self, block: BlockId) -> bool {
        self.terminator(block).is_some()
    }

    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.terminator(block)
            .map(|terminator| terminator.kind.successors())
            .unwrap_or_default()
    }

    pub fn predecessors(&self, function: FunctionId) -> BTreeMap<BlockId, BTreeSet<BlockId>> {
        let mut predecessors = BTreeMap::<BlockId, BTreeSet<BlockId>>::new();

        for block in &self.functions[function].blocks {
            predecessors.entry(*block).or_default();

            for successor in self.successors(*block) {
                predecessors.entry(successor).or_default().insert(*block);
            }
        }

        predecessors
    }

    /// Blocks reachable from the entry block through branches
    pub fn reachable_blocks(&self, function: FunctionId) -> BTreeSet<BlockId> {
        self.walk_blocks(function, false)
    }

    /// Reachable blocks plus the merge and continuing blocks they declare,
    /// which structured backends have to emit even when unreachable
    pub fn live_blocks(&self, function: FunctionId) -> BTreeSet<BlockId> {
        self.walk_blocks(function, true)
    }

    fn walk_blocks(&self, function: FunctionId, include_merges: bool) -> BTreeSet<BlockId> {
        let mut visited = BTreeSet::new();
        let mut stack = self.functions[function].entry_block().into_iter().collect::<Vec<_>>();

        while let Some(block) = stack.pop() {
            if !visited.insert(block) {
                continue;
            }

            stack.extend(self.successors(block));

            if include_merges {
                stack.extend(self.blocks[block].merge.into_iter().flat_map(Merge::targets));
            }
        }

        visited
    }

    /// The store type of a pointer-typed value
    pub fn pointee(&self, pointer: ValueId) -> Option<TypeId> {
        match self.types.get(self.values[pointer].ty) {
            TypeKind::Pointer { pointee, .. } => Some(*pointee),
            _ => None,
        }
    }

    pub fn is_atomic_pointer(&self, pointer: ValueId) -> bool {
        self.pointee(pointer)
            .is_some_and(|pointee| matches!(self.types.get(pointee), TypeKind::Atomic(_)))
    }

    pub fn function_by_name(&self, name: &str) -> Option<FunctionId> {
        self.functions
            .enumerate()
            .find(|(_, function)| function.name == name)
            .map(|(id, _)| id)
    }

    /// Number of instructions attached to a block of some function
    pub fn instruction_count(&self) -> usize {
        self.functions
            .iter()
            .flat_map(|function| &function.blocks)
            .map(|block| self.blocks[*block].instructions.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::constant::Scalar;

    fn module_with_function() -> (Module, FunctionId, BlockId) {
        let mut module = Module::new(TypeTable::new());
        let function = module.functions.push(Function {
            name: "f".to_string(),
            stage: None,
            workgroup_size: None,
            interface: None,
            parameters: Vec::new(),
            return_type: None,
            blocks: Vec::new(),
        });
        let block = module.add_block(function);

        (module, function, block)
    }

    #[test]
    fn uses_follow_replacements() {
        let (mut module, _, block) = module_with_function();
        let i32 = module.types.i32();

        let a = module.constant(i32, ConstValue::Scalar(Scalar::I32(1)));
        let b = module.constant(i32, ConstValue::Scalar(Scalar::I32(2)));

        let (add, _) = module.append(
            block,
            InstructionKind::Binary {
                operator: BinaryOperatorKind::Add,
                lhs: a,
                rhs: a,
            },
            Some(i32),
            Span::default(),
        );

        assert_eq!(module.values[a].uses, [add, add]);

        module.replace_all_uses(a, b);

        assert!(module.values[a].uses.is_empty());
        assert_eq!(module.values[b].uses, [add, add]);
        assert_eq!(module.instructions[add].kind.operands(), [b, b]);

        module.remove_instruction(add);
        assert!(module.values[b].uses.is_empty());
        assert!(module.blocks[block].instructions.is_empty());
    }

    #[test]
    fn live_blocks_include_unreachable_merges() {
        let (mut module, function, entry) = module_with_function();
        let merge = module.add_block(function);

        module.blocks[entry].merge = Some(Merge::Selection(merge));
        module.append(entry, InstructionKind::Return { value: None }, None, Span::default());
        module.append(merge, InstructionKind::Unreachable, None, Span::default());

        assert_eq!(module.reachable_blocks(function), BTreeSet::from([entry]));
        assert_eq!(module.live_blocks(function), BTreeSet::from([entry, merge]));
    }
}

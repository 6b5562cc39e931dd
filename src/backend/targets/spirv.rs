//! SPIR-V for Vulkan, generated from the IR.
//!
//! IR functions map one to one onto SPIR-V functions and IR blocks onto
//! SPIR-V blocks, emitted in reverse post-order so that every block comes
//! after its dominators. Merge metadata becomes `OpSelectionMerge` and
//! `OpLoopMerge`. Each entry point gets a wrapper function that reads the
//! pipeline inputs from `Input` variables, calls the lowered entry point and
//! writes its result to `Output` variables.

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use log::debug;

use crate::{
    backend::{
        BackendError, CodeGenerator, Target,
        assemblers::spirv::{Assembler, Id},
        check_capabilities,
    },
    frontend::{
        ast::{BinaryOperatorKind, PipelineStage, UnaryOperatorKind},
        lexer::Span,
    },
    middle::{
        builtin::{BuiltinFunction, BuiltinValue},
        constant::{ConstValue, Scalar},
        interface::{InterpolationKind, InterpolationSampling, IoBinding, IoKind, IoValue},
        ir::{self, BlockId, FunctionId, GlobalId, InstructionId, InstructionKind, Merge, ValueId, ValueKind},
        program::Program,
        ty::{
            AccessMode, AddressSpace, ArraySize, ScalarKind, TexelFormat, TextureDimension, TextureKind, TypeId,
            TypeKind, TypeTable,
        },
    },
};

type Result<T> = std::result::Result<T, BackendError>;

/// `Workgroup` memory scope
const SCOPE_WORKGROUP: u32 = 2;
/// `Device` memory scope
const SCOPE_DEVICE: u32 = 1;
/// `AcquireRelease | WorkgroupMemory`
const SEMANTICS_WORKGROUP: u32 = 0x108;
/// `AcquireRelease | UniformMemory`
const SEMANTICS_STORAGE: u32 = 0x48;

#[derive(Debug, Default)]
pub struct SpirvGenerator;

impl CodeGenerator for SpirvGenerator {
    fn generate(&self, program: &Program, module: &ir::Module) -> Result<String> {
        check_capabilities(program, Target::Vulkan)?;

        let mut writer = Writer::new(module);
        writer.write_module()?;

        Ok(writer.asm.into_output())
    }
}

fn internal(message: impl Into<String>) -> BackendError {
    BackendError::internal(Target::Vulkan, message)
}

fn storage_class(space: AddressSpace) -> &'static str {
    match space {
        AddressSpace::Function => "Function",
        AddressSpace::Private => "Private",
        AddressSpace::Workgroup => "Workgroup",
        AddressSpace::Uniform => "Uniform",
        AddressSpace::Storage => "StorageBuffer",
        AddressSpace::Handle => "UniformConstant",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumberKind {
    Float,
    Signed,
    Unsigned,
    Bool,
}

impl NumberKind {
    fn of(scalar: ScalarKind) -> Self {
        match scalar {
            ScalarKind::Bool => Self::Bool,
            ScalarKind::I32 | ScalarKind::AbstractInt => Self::Signed,
            ScalarKind::U32 => Self::Unsigned,
            ScalarKind::F32 | ScalarKind::F16 | ScalarKind::AbstractFloat => Self::Float,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Global {
    id: Id,
    /// Buffers of non-struct type are wrapped in a `Block` struct and
    /// reached through member 0
    wrapped: bool,
}

struct Writer<'a> {
    module: &'a ir::Module,
    types: TypeTable,
    asm: Assembler,
    glsl: Id,
    type_ids: HashMap<TypeId, Id>,
    /// Types already carrying layout or `Block` decorations
    decorated: HashSet<Id>,
    values: HashMap<ValueId, Id>,
    globals: HashMap<GlobalId, Global>,
    functions: HashMap<FunctionId, Id>,
    blocks: HashMap<BlockId, Id>,
}

impl<'a> Writer<'a> {
    fn new(module: &'a ir::Module) -> Self {
        let mut asm = Assembler::new();
        asm.capability("Shader");
        let glsl = asm.import("GLSL.std.450");

        Self {
            module,
            types: module.types.clone(),
            asm,
            glsl,
            type_ids: HashMap::new(),
            decorated: HashSet::new(),
            values: HashMap::new(),
            globals: HashMap::new(),
            functions: HashMap::new(),
            blocks: HashMap::new(),
        }
    }

    fn write_module(&mut self) -> Result<()> {
        let module = self.module;

        for id in module.functions.indices() {
            let function = self.asm.id();
            self.functions.insert(id, function);
        }

        self.write_globals()?;

        for id in module.functions.indices() {
            self.write_function(id)?;
        }

        for (id, function) in module.functions.enumerate() {
            if function.is_entry_point() {
                self.write_entry_point(id)?;
            }
        }

        debug!(
            "generated SPIR-V for {} functions and {} globals",
            module.functions.len(),
            module.globals.len()
        );

        Ok(())
    }

    /* Types */

    fn void(&mut self) -> Id {
        self.asm.declare("OpTypeVoid")
    }

    fn scalar_type(&mut self, scalar: ScalarKind) -> Result<Id> {
        Ok(match scalar.concretize() {
            ScalarKind::Bool => self.asm.declare("OpTypeBool"),
            ScalarKind::I32 => self.asm.declare("OpTypeInt 32 1"),
            ScalarKind::U32 => self.asm.declare("OpTypeInt 32 0"),
            ScalarKind::F32 => self.asm.declare("OpTypeFloat 32"),
            ScalarKind::F16 => {
                self.asm.capability("Float16");
                self.asm.declare("OpTypeFloat 16")
            }
            scalar => return Err(internal(format!("abstract type {scalar}"))),
        })
    }

    fn type_id(&mut self, ty: TypeId) -> Result<Id> {
        if let Some(id) = self.type_ids.get(&ty) {
            return Ok(*id);
        }

        let id = match self.types.get(ty).clone() {
            TypeKind::Scalar(scalar) | TypeKind::Atomic(scalar) => self.scalar_type(scalar)?,
            TypeKind::Vector { size, scalar } => {
                let scalar = self.scalar_type(scalar)?;
                self.asm.declare(format!("OpTypeVector {scalar} {size}"))
            }
            TypeKind::Matrix { columns, rows, scalar } => {
                let column = self.types.vector(rows, scalar);
                let column = self.type_id(column)?;
                self.asm.declare(format!("OpTypeMatrix {column} {columns}"))
            }
            TypeKind::Array { element, size } => {
                let element_id = self.type_id(element)?;

                let id = match size {
                    ArraySize::Constant(count) => {
                        let count = self.u32_constant(count)?;
                        self.asm.declare(format!("OpTypeArray {element_id} {count}"))
                    }
                    ArraySize::Runtime => self.asm.declare(format!("OpTypeRuntimeArray {element_id}")),
                    ArraySize::Override(_) => return Err(internal("override-sized array left in the IR")),
                };

                if self.types.is_host_shareable(element) && self.decorated.insert(id) {
                    self.asm.decorate(id, format!("ArrayStride {}", self.types.stride_of(element)));
                }

                id
            }
            TypeKind::Struct(structure) => {
                let members = structure
                    .members
                    .iter()
                    .map(|member| self.type_id(member.ty))
                    .collect::<Result<Vec<_>>>()?;

                let id = self.asm.declare_unique(format!("OpTypeStruct {}", members.iter().join(" ")));
                self.asm.name(id, &structure.name);

                let shareable = self.types.is_host_shareable(ty);

                for (index, member) in structure.members.iter().enumerate() {
                    self.asm.member_name(id, index, &member.name);

                    if shareable {
                        self.asm.member_decorate(id, index, format!("Offset {}", member.offset));
                        self.decorate_matrix_member(id, index, member.ty);
                    }
                }

                id
            }
            TypeKind::Pointer { space, pointee, .. } => {
                let pointee = self.type_id(pointee)?;
                self.asm.declare(format!("OpTypePointer {} {pointee}", storage_class(space)))
            }
            TypeKind::Reference { .. } => return Err(internal("reference type left in the IR")),
            TypeKind::Texture { dimension, kind } => self.image_type(dimension, kind)?,
            TypeKind::Sampler(_) => self.asm.declare("OpTypeSampler"),
        };

        self.type_ids.insert(ty, id);
        Ok(id)
    }

    /// Matrices in buffers, directly or inside arrays, need their layout on
    /// the struct member
    fn decorate_matrix_member(&mut self, structure: Id, index: usize, ty: TypeId) {
        let mut inner = ty;
        while let TypeKind::Array { element, .. } = self.types.get(inner) {
            inner = *element;
        }

        if let TypeKind::Matrix { columns, .. } = *self.types.get(inner) {
            let stride = self.types.size_of(inner) / u32::from(columns);
            self.asm.member_decorate(structure, index, "ColMajor");
            self.asm.member_decorate(structure, index, format!("MatrixStride {stride}"));
        }
    }

    fn image_type(&mut self, dimension: TextureDimension, kind: TextureKind) -> Result<Id> {
        let storage = matches!(kind, TextureKind::Storage { .. });

        let (dim, arrayed) = match dimension {
            TextureDimension::D1 => {
                self.asm.capability(if storage { "Image1D" } else { "Sampled1D" });
                ("1D", 0)
            }
            TextureDimension::D2 => ("2D", 0),
            TextureDimension::D2Array => ("2D", 1),
            TextureDimension::D3 => ("3D", 0),
            TextureDimension::Cube => ("Cube", 0),
            TextureDimension::CubeArray => {
                self.asm
                    .capability(if storage { "ImageCubeArray" } else { "SampledCubeArray" });
                ("Cube", 1)
            }
        };

        let instruction = match kind {
            TextureKind::Sampled { sampled, multisampled } => {
                let sampled = self.scalar_type(sampled)?;
                format!("OpTypeImage {sampled} {dim} 0 {arrayed} {} 1 Unknown", u8::from(multisampled))
            }
            TextureKind::Depth { multisampled } => {
                let float = self.scalar_type(ScalarKind::F32)?;
                format!("OpTypeImage {float} {dim} 1 {arrayed} {} 1 Unknown", u8::from(multisampled))
            }
            TextureKind::Storage { format, .. } => {
                let channel = self.scalar_type(format.channel_type())?;
                let format = self.image_format(format)?;
                format!("OpTypeImage {channel} {dim} 0 {arrayed} 0 2 {format}")
            }
        };

        Ok(self.asm.declare(instruction))
    }

    fn image_format(&mut self, format: TexelFormat) -> Result<&'static str> {
        Ok(match format {
            TexelFormat::Rgba8Unorm => "Rgba8",
            TexelFormat::Rgba8Snorm => "Rgba8Snorm",
            TexelFormat::Rgba8Uint => "Rgba8ui",
            TexelFormat::Rgba8Sint => "Rgba8i",
            TexelFormat::Rgba16Uint => "Rgba16ui",
            TexelFormat::Rgba16Sint => "Rgba16i",
            TexelFormat::Rgba16Float => "Rgba16f",
            TexelFormat::R32Uint => "R32ui",
            TexelFormat::R32Sint => "R32i",
            TexelFormat::R32Float => "R32f",
            TexelFormat::Rg32Uint | TexelFormat::Rg32Sint | TexelFormat::Rg32Float => {
                self.asm.capability("StorageImageExtendedFormats");
                match format {
                    TexelFormat::Rg32Uint => "Rg32ui",
                    TexelFormat::Rg32Sint => "Rg32i",
                    _ => "Rg32f",
                }
            }
            TexelFormat::Rgba32Uint => "Rgba32ui",
            TexelFormat::Rgba32Sint => "Rgba32i",
            TexelFormat::Rgba32Float => "Rgba32f",
            TexelFormat::Bgra8Unorm => {
                return Err(BackendError::unsupported(
                    Target::Vulkan,
                    "the bgra8unorm storage texture format",
                    Span::default(),
                ));
            }
        })
    }

    fn contains_scalar(&self, ty: TypeId, scalar: ScalarKind) -> bool {
        match self.types.get(ty) {
            TypeKind::Array { element, .. } => self.contains_scalar(*element, scalar),
            TypeKind::Struct(structure) => structure
                .members
                .iter()
                .any(|member| self.contains_scalar(member.ty, scalar)),
            _ => self.types.element_scalar(ty) == Some(scalar),
        }
    }

    /* Constants */

    fn constant(&mut self, ty: TypeId, value: &ConstValue) -> Result<Id> {
        let type_id = self.type_id(ty)?;

        match value {
            ConstValue::Scalar(scalar) => {
                let scalar = match self.types.element_scalar(ty) {
                    Some(kind) if kind != scalar.kind() => scalar
                        .convert(kind.concretize())
                        .map_err(|error| internal(error.to_string()))?,
                    _ => *scalar,
                };

                let instruction = match scalar {
                    Scalar::Bool(true) => format!("OpConstantTrue {type_id}"),
                    Scalar::Bool(false) => format!("OpConstantFalse {type_id}"),
                    Scalar::I32(value) => format!("OpConstant {type_id} {value}"),
                    Scalar::U32(value) => format!("OpConstant {type_id} {value}"),
                    Scalar::F32(value) => format!("OpConstant {type_id} {value:?}"),
                    Scalar::F16(value) => format!("OpConstant {type_id} {:?}", value.to_f32()),
                    Scalar::AbstractInt(_) | Scalar::AbstractFloat(_) => {
                        return Err(internal("abstract constant left in the IR"));
                    }
                };

                Ok(self.asm.declare(instruction))
            }
            ConstValue::Composite(elements) => {
                let element_types = match self.types.get(ty).clone() {
                    TypeKind::Vector { size, scalar } => vec![self.types.scalar(scalar); usize::from(size)],
                    TypeKind::Matrix { columns, rows, scalar } => {
                        vec![self.types.vector(rows, scalar); usize::from(columns)]
                    }
                    TypeKind::Array { element, .. } => vec![element; elements.len()],
                    TypeKind::Struct(structure) => structure.members.iter().map(|member| member.ty).collect(),
                    _ => return Err(internal("composite constant of a non-composite type")),
                };

                if element_types.len() != elements.len() {
                    return Err(internal("composite constant does not match its type"));
                }

                let ids = element_types
                    .into_iter()
                    .zip(elements)
                    .map(|(ty, element)| self.constant(ty, element))
                    .collect::<Result<Vec<_>>>()?;

                Ok(self
                    .asm
                    .declare(format!("OpConstantComposite {type_id} {}", ids.iter().join(" "))))
            }
        }
    }

    fn u32_constant(&mut self, value: u32) -> Result<Id> {
        let ty = self.types.u32();
        self.constant(ty, &Scalar::U32(value).into())
    }

    fn null(&mut self, ty: TypeId) -> Result<Id> {
        let ty = self.type_id(ty)?;
        Ok(self.asm.declare(format!("OpConstantNull {ty}")))
    }

    /// `scalar` for scalar types, or a vector with every component set to it
    fn splat_constant(&mut self, ty: TypeId, scalar: Scalar) -> Result<Id> {
        let value = match *self.types.get(ty) {
            TypeKind::Vector { size, .. } => ConstValue::Composite(vec![scalar.into(); usize::from(size)]),
            _ => scalar.into(),
        };

        self.constant(ty, &value)
    }

    /* Globals */

    fn write_globals(&mut self) -> Result<()> {
        let module = self.module;

        for (id, global) in module.globals.enumerate() {
            let class = storage_class(global.space);
            let buffer = matches!(global.space, AddressSpace::Uniform | AddressSpace::Storage);
            let wrapped = buffer && !matches!(self.types.get(global.store), TypeKind::Struct(_));

            if buffer && self.contains_scalar(global.store, ScalarKind::F16) {
                self.asm.extension("SPV_KHR_16bit_storage");
                self.asm.capability("StorageBuffer16BitAccess");
                if global.space == AddressSpace::Uniform {
                    self.asm.capability("UniformAndStorageBuffer16BitAccess");
                }
            }

            let store = self.type_id(global.store)?;

            let variable_type = if wrapped {
                let block = self.asm.declare_unique(format!("OpTypeStruct {store}"));
                self.asm.name(block, &format!("{}_block", global.name));
                self.asm.member_name(block, 0, "inner");
                self.asm.decorate(block, "Block");
                self.asm.member_decorate(block, 0, "Offset 0");
                self.decorate_matrix_member(block, 0, global.store);
                block
            } else {
                if buffer && self.decorated.insert(store) {
                    self.asm.decorate(store, "Block");
                }
                store
            };

            let pointer = self.asm.declare(format!("OpTypePointer {class} {variable_type}"));

            let initializer = match (&global.initializer, global.space) {
                (Some(value), _) => format!(" {}", self.constant(global.store, value)?),
                (None, AddressSpace::Private) => format!(" {}", self.null(global.store)?),
                (None, _) => String::new(),
            };

            let variable = self
                .asm
                .declare_unique(format!("OpVariable {pointer} {class}{initializer}"));
            self.asm.name(variable, &global.name);

            if let Some(binding) = global.binding {
                self.asm.decorate(variable, format!("DescriptorSet {}", binding.group));
                self.asm.decorate(variable, format!("Binding {}", binding.binding));
            }

            match (global.space, self.types.get(global.store)) {
                (AddressSpace::Storage, _) if global.access == AccessMode::Read => {
                    self.asm.decorate(variable, "NonWritable");
                }
                (
                    AddressSpace::Handle,
                    TypeKind::Texture {
                        kind: TextureKind::Storage { access, .. },
                        ..
                    },
                ) => match access {
                    AccessMode::Read => self.asm.decorate(variable, "NonWritable"),
                    AccessMode::Write => self.asm.decorate(variable, "NonReadable"),
                    AccessMode::ReadWrite => {}
                },
                _ => {}
            }

            self.globals.insert(id, Global { id: variable, wrapped });
        }

        Ok(())
    }

    /// Globals referenced by `function` and everything it calls
    fn used_globals(&self, function: FunctionId) -> Vec<GlobalId> {
        let module = self.module;
        let mut visited = HashSet::new();
        let mut stack = vec![function];
        let mut globals = std::collections::BTreeSet::new();

        while let Some(function) = stack.pop() {
            if !visited.insert(function) {
                continue;
            }

            for block in &module.functions[function].blocks {
                for instruction in &module.blocks[*block].instructions {
                    let kind = &module.instructions[*instruction].kind;

                    if let InstructionKind::Call { function, .. } = kind {
                        stack.push(*function);
                    }

                    for operand in kind.operands() {
                        if let ValueKind::Global(global) = module.values[operand].kind {
                            globals.insert(global);
                        }
                    }
                }
            }
        }

        globals.into_iter().collect()
    }

    /* Functions */

    /// Live blocks in reverse post-order. Merge and continuing targets are
    /// visited before branch targets so they come after the construct.
    fn block_order(&self, function: FunctionId) -> Vec<BlockId> {
        let Some(entry) = self.module.functions[function].entry_block() else {
            return Vec::new();
        };

        let mut visited: HashSet<BlockId> = [entry].into_iter().collect();
        let mut post_order = Vec::new();
        let mut stack = vec![(entry, self.children(entry), 0)];

        while let Some((block, children, next)) = stack.last_mut() {
            match children.get(*next).copied() {
                Some(child) => {
                    *next += 1;
                    if visited.insert(child) {
                        let grandchildren = self.children(child);
                        stack.push((child, grandchildren, 0));
                    }
                }
                None => {
                    post_order.push(*block);
                    stack.pop();
                }
            }
        }

        post_order.reverse();
        post_order
    }

    fn children(&self, block: BlockId) -> Vec<BlockId> {
        let mut children = match self.module.blocks[block].merge {
            Some(Merge::Loop { merge, continuing }) => vec![merge, continuing],
            Some(Merge::Selection(merge)) => vec![merge],
            None => Vec::new(),
        };

        children.extend(self.module.successors(block));
        children
    }

    fn function_type(&mut self, return_type: Id, parameters: &[Id]) -> Id {
        let parameters = parameters.iter().map(|parameter| format!(" {parameter}")).join("");
        self.asm.declare(format!("OpTypeFunction {return_type}{parameters}"))
    }

    fn write_function(&mut self, id: FunctionId) -> Result<()> {
        let module = self.module;
        let function = &module.functions[id];
        let function_id = self.functions[&id];

        let return_type = match function.return_type {
            Some(ty) => self.type_id(ty)?,
            None => self.void(),
        };
        let parameter_types = function
            .parameters
            .iter()
            .map(|parameter| self.type_id(parameter.ty))
            .collect::<Result<Vec<_>>>()?;
        let signature = self.function_type(return_type, &parameter_types);

        let name = match function.stage {
            Some(_) => format!("{}_inner", function.name),
            None => function.name.clone(),
        };
        self.asm.name(function_id, &name);
        self.asm
            .function_line(format!("{function_id} = OpFunction {return_type} None {signature}"));

        for (parameter, ty) in function.parameters.iter().zip(parameter_types) {
            let parameter_id = self.asm.id();
            self.asm.name(parameter_id, &parameter.name);
            self.asm
                .function_line(format!("{parameter_id} = OpFunctionParameter {ty}"));
            self.values.insert(parameter.value, parameter_id);
        }

        let order = self.block_order(id);

        // Results are numbered up front since phis may refer to values of
        // blocks emitted later
        for block in &order {
            let label = self.asm.id();
            self.blocks.insert(*block, label);

            for instruction in &module.blocks[*block].instructions {
                if let Some(result) = module.instructions[*instruction].result {
                    let result_id = self.asm.id();
                    self.values.insert(result, result_id);
                }
            }
        }

        for block in order {
            self.write_block(block)?;
        }

        self.asm.function_line("OpFunctionEnd");
        Ok(())
    }

    fn write_block(&mut self, block: BlockId) -> Result<()> {
        let module = self.module;
        let label = self.block(block)?;
        self.asm.label(label);

        for instruction in &module.blocks[block].instructions {
            let kind = &module.instructions[*instruction].kind;

            if kind.is_terminator() {
                self.write_merge(block, kind)?;
            }

            self.write_instruction(*instruction)?;
        }

        if !module.is_terminated(block) {
            return Err(internal(format!("block {block:?} has no terminator")));
        }

        Ok(())
    }

    /// Structured control flow declarations preceding a terminator
    fn write_merge(&mut self, block: BlockId, terminator: &InstructionKind) -> Result<()> {
        match (self.module.blocks[block].merge, terminator) {
            (Some(Merge::Loop { merge, continuing }), _) => {
                let merge = self.block(merge)?;
                let continuing = self.block(continuing)?;
                self.asm.emit(format!("OpLoopMerge {merge} {continuing} None"));
            }
            (Some(Merge::Selection(merge)), InstructionKind::ConditionalBranch { .. } | InstructionKind::Switch { .. }) => {
                let merge = self.block(merge)?;
                self.asm.emit(format!("OpSelectionMerge {merge} None"));
            }
            _ => {}
        }

        Ok(())
    }

    fn block(&self, block: BlockId) -> Result<Id> {
        self.blocks
            .get(&block)
            .copied()
            .ok_or_else(|| internal(format!("branch to block {block:?}, which is not live")))
    }

    /* Values */

    /// The id of a value defined outside of the current instruction
    fn value(&mut self, value: ValueId) -> Result<Id> {
        if let Some(id) = self.values.get(&value) {
            return Ok(*id);
        }

        let module = self.module;

        match &module.values[value].kind {
            ValueKind::Constant(constant) => self.constant(module.values[value].ty, constant),
            ValueKind::Global(global) => self
                .globals
                .get(global)
                .map(|global| global.id)
                .ok_or_else(|| internal(format!("global {global:?} was not declared"))),
            _ => Err(internal(format!("value {value:?} is used before it is defined"))),
        }
    }

    /// The id of an operand, reaching into wrapped buffers
    fn operand(&mut self, value: ValueId) -> Result<Id> {
        let (base, prefix) = self.access_base(value)?;

        match prefix {
            Some(zero) => {
                let pointer = self.type_id(self.module.values[value].ty)?;
                Ok(self.asm.emit_result(format!("OpAccessChain {pointer} {base} {zero}")))
            }
            None => Ok(base),
        }
    }

    /// The base of an access chain, with the leading index of a wrapped
    /// buffer
    fn access_base(&mut self, value: ValueId) -> Result<(Id, Option<Id>)> {
        if let ValueKind::Global(global) = self.module.values[value].kind {
            if let Some(global) = self.globals.get(&global).copied() {
                if global.wrapped {
                    return Ok((global.id, Some(self.u32_constant(0)?)));
                }
            }
        }

        Ok((self.value(value)?, None))
    }

    fn operands(&mut self, values: &[ValueId]) -> Result<Vec<Id>> {
        values.iter().map(|value| self.operand(*value)).collect()
    }

    fn value_type(&self, value: ValueId) -> TypeId {
        self.module.values[value].ty
    }

    fn number_kind(&self, value: ValueId) -> NumberKind {
        NumberKind::of(self.types.element_scalar(self.value_type(value)).unwrap_or(ScalarKind::F32))
    }

    /// The memory scope of an atomic operation on `pointer`
    fn scope(&mut self, pointer: ValueId) -> Result<Id> {
        let scope = match self.types.get(self.value_type(pointer)) {
            TypeKind::Pointer {
                space: AddressSpace::Workgroup,
                ..
            } => SCOPE_WORKGROUP,
            _ => SCOPE_DEVICE,
        };

        self.u32_constant(scope)
    }

    /* Instructions */

    fn write_instruction(&mut self, id: InstructionId) -> Result<()> {
        let module = self.module;
        let instruction = &module.instructions[id];
        let span = instruction.span;

        let result = match instruction.result {
            Some(value) => {
                let ty = module.values[value].ty;
                Some((self.values[&value], self.type_id(ty)?, ty))
            }
            None => None,
        };
        let expect_result = || result.ok_or_else(|| internal(format!("instruction {id:?} has no result")));

        match &instruction.kind {
            InstructionKind::Variable { .. } => {
                let (result, ty, _) = expect_result()?;
                self.asm.emit_with(result, format!("OpVariable {ty} Function"));
            }
            InstructionKind::Load { pointer } => {
                let (result, ty, _) = expect_result()?;
                let pointer_id = self.operand(*pointer)?;

                if module.is_atomic_pointer(*pointer) {
                    let scope = self.scope(*pointer)?;
                    let relaxed = self.u32_constant(0)?;
                    self.asm
                        .emit_with(result, format!("OpAtomicLoad {ty} {pointer_id} {scope} {relaxed}"));
                } else {
                    self.asm.emit_with(result, format!("OpLoad {ty} {pointer_id}"));
                }
            }
            InstructionKind::Store { pointer, value } => {
                let pointer_id = self.operand(*pointer)?;
                let value = self.operand(*value)?;

                if module.is_atomic_pointer(*pointer) {
                    let scope = self.scope(*pointer)?;
                    let relaxed = self.u32_constant(0)?;
                    self.asm
                        .emit(format!("OpAtomicStore {pointer_id} {scope} {relaxed} {value}"));
                } else {
                    self.asm.emit(format!("OpStore {pointer_id} {value}"));
                }
            }
            InstructionKind::Access { base, indices } => {
                let (result, ty, _) = expect_result()?;
                let (base, prefix) = self.access_base(*base)?;
                let indices = prefix.into_iter().chain(self.operands(indices)?).join(" ");
                self.asm
                    .emit_with(result, format!("OpAccessChain {ty} {base} {indices}"));
            }
            InstructionKind::Extract { composite, index } => {
                let (result, ty, _) = expect_result()?;
                let composite = self.operand(*composite)?;

                match module.as_constant(*index).and_then(ConstValue::as_i64) {
                    Some(index) => self
                        .asm
                        .emit_with(result, format!("OpCompositeExtract {ty} {composite} {index}")),
                    None => {
                        let index = self.operand(*index)?;
                        self.asm
                            .emit_with(result, format!("OpVectorExtractDynamic {ty} {composite} {index}"));
                    }
                }
            }
            InstructionKind::Swizzle { vector, components } => {
                let (result, ty, _) = expect_result()?;
                let vector = self.operand(*vector)?;
                self.asm.emit_with(
                    result,
                    format!("OpVectorShuffle {ty} {vector} {vector} {}", components.iter().join(" ")),
                );
            }
            InstructionKind::Construct { components } => {
                let (result, ty, _) = expect_result()?;
                let components = self.operands(components)?.into_iter().join(" ");
                self.asm
                    .emit_with(result, format!("OpCompositeConstruct {ty} {components}"));
            }
            InstructionKind::Convert { value } => {
                let result = expect_result()?;
                self.write_convert(result, *value)?;
            }
            InstructionKind::Bitcast { value } => {
                let (result, ty, result_type) = expect_result()?;
                let opcode = if self.value_type(*value) == result_type {
                    "OpCopyObject"
                } else {
                    "OpBitcast"
                };
                let value = self.operand(*value)?;
                self.asm.emit_with(result, format!("{opcode} {ty} {value}"));
            }
            InstructionKind::Unary { operator, operand } => {
                let (result, ty, _) = expect_result()?;
                let opcode = match (operator, self.number_kind(*operand)) {
                    (UnaryOperatorKind::Negate, NumberKind::Float) => "OpFNegate",
                    (UnaryOperatorKind::Negate, _) => "OpSNegate",
                    (UnaryOperatorKind::LogicalNot, _) => "OpLogicalNot",
                    (UnaryOperatorKind::BitwiseNot, _) => "OpNot",
                    (UnaryOperatorKind::Deref | UnaryOperatorKind::AddressOf, _) => "OpCopyObject",
                };
                let operand = self.operand(*operand)?;
                self.asm.emit_with(result, format!("{opcode} {ty} {operand}"));
            }
            InstructionKind::Binary { operator, lhs, rhs } => {
                let result = expect_result()?;
                self.write_binary(result, *operator, *lhs, *rhs)?;
            }
            InstructionKind::Call { function, arguments } => {
                let Some(&callee) = self.functions.get(function) else {
                    return Err(internal(format!("call to undeclared function {function:?}")));
                };
                let arguments = self.operands(arguments)?.into_iter().map(|id| format!(" {id}")).join("");

                match result {
                    Some((result, ty, _)) => self
                        .asm
                        .emit_with(result, format!("OpFunctionCall {ty} {callee}{arguments}")),
                    None => {
                        let void = self.void();
                        self.asm
                            .emit_result(format!("OpFunctionCall {void} {callee}{arguments}"));
                    }
                }
            }
            InstructionKind::CallBuiltin { function, arguments } => {
                self.write_builtin(*function, arguments, result, span)?;
            }
            InstructionKind::Phi { incoming } => {
                let (result, ty, _) = expect_result()?;
                let mut pairs = Vec::with_capacity(incoming.len());

                for (block, value) in incoming {
                    pairs.push(format!("{} {}", self.value(*value)?, self.block(*block)?));
                }

                self.asm
                    .emit_with(result, format!("OpPhi {ty} {}", pairs.join(" ")));
            }
            InstructionKind::Branch { target } => {
                let target = self.block(*target)?;
                self.asm.emit(format!("OpBranch {target}"));
            }
            InstructionKind::ConditionalBranch {
                condition,
                accept,
                reject,
            } => {
                let condition = self.operand(*condition)?;
                let accept = self.block(*accept)?;
                let reject = self.block(*reject)?;
                self.asm
                    .emit(format!("OpBranchConditional {condition} {accept} {reject}"));
            }
            InstructionKind::Switch {
                selector,
                cases,
                default,
            } => {
                let selector = self.operand(*selector)?;
                let default = self.block(*default)?;
                let mut targets = String::new();

                for (value, block) in cases {
                    // Case literals are the 32-bit pattern of the selector
                    targets += &format!(" {} {}", *value as u32, self.block(*block)?);
                }

                self.asm.emit(format!("OpSwitch {selector} {default}{targets}"));
            }
            InstructionKind::Return { value: None } => self.asm.emit("OpReturn"),
            InstructionKind::Return { value: Some(value) } => {
                let value = self.operand(*value)?;
                self.asm.emit(format!("OpReturnValue {value}"));
            }
            InstructionKind::Unreachable => self.asm.emit("OpUnreachable"),
            InstructionKind::Discard => self.asm.emit("OpKill"),
        }

        Ok(())
    }

    fn write_convert(&mut self, (result, ty, result_type): (Id, Id, TypeId), value: ValueId) -> Result<()> {
        let from_type = self.value_type(value);
        let from = self.types.element_scalar(from_type);
        let to = self.types.element_scalar(result_type);
        let value = self.operand(value)?;

        let (Some(from), Some(to)) = (from, to) else {
            return Err(internal("conversion between non-numeric types"));
        };

        let instruction = match (NumberKind::of(from), NumberKind::of(to)) {
            _ if from.concretize() == to.concretize() => format!("OpCopyObject {ty} {value}"),
            (NumberKind::Bool, _) => {
                let one = match to {
                    ScalarKind::I32 => Scalar::I32(1),
                    ScalarKind::U32 => Scalar::U32(1),
                    ScalarKind::F16 => Scalar::F16(half::f16::ONE),
                    _ => Scalar::F32(1.0),
                };
                let one = self.splat_constant(result_type, one)?;
                let zero = self.null(result_type)?;
                format!("OpSelect {ty} {value} {one} {zero}")
            }
            (kind, NumberKind::Bool) => {
                let zero = self.null(from_type)?;
                let opcode = if kind == NumberKind::Float {
                    "OpFUnordNotEqual"
                } else {
                    "OpINotEqual"
                };
                format!("{opcode} {ty} {value} {zero}")
            }
            (NumberKind::Float, NumberKind::Float) => format!("OpFConvert {ty} {value}"),
            (NumberKind::Float, NumberKind::Signed) => format!("OpConvertFToS {ty} {value}"),
            (NumberKind::Float, NumberKind::Unsigned) => format!("OpConvertFToU {ty} {value}"),
            (NumberKind::Signed, NumberKind::Float) => format!("OpConvertSToF {ty} {value}"),
            (NumberKind::Unsigned, NumberKind::Float) => format!("OpConvertUToF {ty} {value}"),
            _ => format!("OpBitcast {ty} {value}"),
        };

        self.asm.emit_with(result, instruction);
        Ok(())
    }

    fn write_binary(
        &mut self,
        (result, ty, _): (Id, Id, TypeId),
        operator: BinaryOperatorKind,
        lhs: ValueId,
        rhs: ValueId,
    ) -> Result<()> {
        use BinaryOperatorKind::*;

        let lhs_type = self.value_type(lhs);
        let rhs_type = self.value_type(rhs);
        let lhs_matrix = matches!(self.types.get(lhs_type), TypeKind::Matrix { .. });
        let rhs_matrix = matches!(self.types.get(rhs_type), TypeKind::Matrix { .. });
        let lhs_vector = matches!(self.types.get(lhs_type), TypeKind::Vector { .. });
        let kind = self.number_kind(lhs);

        if lhs_matrix && rhs_matrix && matches!(operator, Add | Subtract) {
            return self.write_matrix_columns(result, ty, lhs_type, operator, lhs, rhs);
        }

        let mut lhs_id = self.operand(lhs)?;
        let mut rhs_id = self.operand(rhs)?;

        let opcode = match (operator, kind) {
            (Multiply, _) if lhs_matrix && rhs_matrix => "OpMatrixTimesMatrix",
            (Multiply, _) if lhs_matrix && !rhs_matrix && matches!(self.types.get(rhs_type), TypeKind::Vector { .. }) => {
                "OpMatrixTimesVector"
            }
            (Multiply, _) if lhs_vector && rhs_matrix => "OpVectorTimesMatrix",
            (Multiply, _) if lhs_matrix => "OpMatrixTimesScalar",
            (Multiply, _) if rhs_matrix => {
                std::mem::swap(&mut lhs_id, &mut rhs_id);
                "OpMatrixTimesScalar"
            }
            (Add, NumberKind::Float) => "OpFAdd",
            (Add, _) => "OpIAdd",
            (Subtract, NumberKind::Float) => "OpFSub",
            (Subtract, _) => "OpISub",
            (Multiply, NumberKind::Float) => "OpFMul",
            (Multiply, _) => "OpIMul",
            (Divide, NumberKind::Float) => "OpFDiv",
            (Divide, NumberKind::Unsigned) => "OpUDiv",
            (Divide, _) => "OpSDiv",
            (Modulus, NumberKind::Float) => "OpFRem",
            (Modulus, NumberKind::Unsigned) => "OpUMod",
            (Modulus, _) => "OpSRem",
            (Equals, NumberKind::Bool) => "OpLogicalEqual",
            (Equals, NumberKind::Float) => "OpFOrdEqual",
            (Equals, _) => "OpIEqual",
            (NotEquals, NumberKind::Bool) => "OpLogicalNotEqual",
            (NotEquals, NumberKind::Float) => "OpFUnordNotEqual",
            (NotEquals, _) => "OpINotEqual",
            (LessThan, NumberKind::Float) => "OpFOrdLessThan",
            (LessThan, NumberKind::Unsigned) => "OpULessThan",
            (LessThan, _) => "OpSLessThan",
            (LessThanOrEqualTo, NumberKind::Float) => "OpFOrdLessThanEqual",
            (LessThanOrEqualTo, NumberKind::Unsigned) => "OpULessThanEqual",
            (LessThanOrEqualTo, _) => "OpSLessThanEqual",
            (GreaterThan, NumberKind::Float) => "OpFOrdGreaterThan",
            (GreaterThan, NumberKind::Unsigned) => "OpUGreaterThan",
            (GreaterThan, _) => "OpSGreaterThan",
            (GreaterThanOrEqualTo, NumberKind::Float) => "OpFOrdGreaterThanEqual",
            (GreaterThanOrEqualTo, NumberKind::Unsigned) => "OpUGreaterThanEqual",
            (GreaterThanOrEqualTo, _) => "OpSGreaterThanEqual",
            (LogicalAnd | BitwiseAnd, NumberKind::Bool) => "OpLogicalAnd",
            (LogicalOr | BitwiseOr, NumberKind::Bool) => "OpLogicalOr",
            (BitwiseXor, NumberKind::Bool) => "OpLogicalNotEqual",
            (BitwiseAnd, _) => "OpBitwiseAnd",
            (BitwiseOr, _) => "OpBitwiseOr",
            (BitwiseXor, _) => "OpBitwiseXor",
            (ShiftLeft | ShiftRight, _) => {
                // Shift amounts are taken modulo the bit width
                let rhs_type_id = self.type_id(rhs_type)?;
                let mask = self.splat_constant(rhs_type, Scalar::U32(31))?;
                rhs_id = self
                    .asm
                    .emit_result(format!("OpBitwiseAnd {rhs_type_id} {rhs_id} {mask}"));

                match (operator, kind) {
                    (ShiftLeft, _) => "OpShiftLeftLogical",
                    (_, NumberKind::Signed) => "OpShiftRightArithmetic",
                    _ => "OpShiftRightLogical",
                }
            }
            (LogicalAnd | LogicalOr, _) => return Err(internal("logical operator on non-boolean operands")),
        };

        self.asm.emit_with(result, format!("{opcode} {ty} {lhs_id} {rhs_id}"));
        Ok(())
    }

    /// Matrix addition and subtraction, column by column
    fn write_matrix_columns(
        &mut self,
        result: Id,
        ty: Id,
        matrix: TypeId,
        operator: BinaryOperatorKind,
        lhs: ValueId,
        rhs: ValueId,
    ) -> Result<()> {
        let TypeKind::Matrix { columns, rows, scalar } = *self.types.get(matrix) else {
            return Err(internal("column-wise operation on a non-matrix"));
        };

        let column = self.types.vector(rows, scalar);
        let column = self.type_id(column)?;
        let opcode = match operator {
            BinaryOperatorKind::Add => "OpFAdd",
            _ => "OpFSub",
        };

        let lhs = self.operand(lhs)?;
        let rhs = self.operand(rhs)?;
        let mut parts = Vec::with_capacity(usize::from(columns));

        for index in 0..columns {
            let a = self
                .asm
                .emit_result(format!("OpCompositeExtract {column} {lhs} {index}"));
            let b = self
                .asm
                .emit_result(format!("OpCompositeExtract {column} {rhs} {index}"));
            parts.push(self.asm.emit_result(format!("{opcode} {column} {a} {b}")));
        }

        self.asm
            .emit_with(result, format!("OpCompositeConstruct {ty} {}", parts.iter().join(" ")));
        Ok(())
    }

    /* Builtins */

    fn write_builtin(
        &mut self,
        function: BuiltinFunction,
        arguments: &[ValueId],
        result: Option<(Id, Id, TypeId)>,
        span: Span,
    ) -> Result<()> {
        use BuiltinFunction::*;

        match function {
            WorkgroupBarrier | StorageBarrier => {
                let (memory, semantics) = match function {
                    WorkgroupBarrier => (SCOPE_WORKGROUP, SEMANTICS_WORKGROUP),
                    _ => (SCOPE_DEVICE, SEMANTICS_STORAGE),
                };
                let execution = self.u32_constant(SCOPE_WORKGROUP)?;
                let memory = self.u32_constant(memory)?;
                let semantics = self.u32_constant(semantics)?;
                self.asm
                    .emit(format!("OpControlBarrier {execution} {memory} {semantics}"));
                return Ok(());
            }
            TextureStore => {
                let [texture, coordinates, texel] = arguments else {
                    return Err(internal("'textureStore' expects three arguments"));
                };
                let (dimension, _) = self.texture_of(*texture)?;
                let image = self.operand(*texture)?;
                let coordinates = self.texture_coordinates(*coordinates, dimension)?;
                let texel = self.operand(*texel)?;
                self.asm.emit(format!("OpImageWrite {image} {coordinates} {texel}"));
                return Ok(());
            }
            AtomicStore => {
                let [pointer, value] = arguments else {
                    return Err(internal("'atomicStore' expects two arguments"));
                };
                let scope = self.scope(*pointer)?;
                let relaxed = self.u32_constant(0)?;
                let pointer = self.operand(*pointer)?;
                let value = self.operand(*value)?;
                self.asm
                    .emit(format!("OpAtomicStore {pointer} {scope} {relaxed} {value}"));
                return Ok(());
            }
            _ => {}
        }

        let Some(result) = result else {
            return Err(internal(format!("'{}' without a result", function.name())));
        };

        match function {
            ArrayLength => self.write_array_length(result, arguments, span),
            TextureSample | TextureSampleLevel | TextureLoad | TextureDimensions => {
                self.write_texture_query(result, function, arguments)
            }
            function if function.is_atomic() => self.write_atomic(result, function, arguments),
            _ => self.write_math(result, function, arguments),
        }
    }

    fn write_array_length(&mut self, (result, ty, _): (Id, Id, TypeId), arguments: &[ValueId], span: Span) -> Result<()> {
        let module = self.module;
        let Some(&pointer) = arguments.first() else {
            return Err(internal("'arrayLength' expects one argument"));
        };

        // A runtime-sized array is either a whole wrapped buffer or the last
        // member of a buffer struct
        let (structure, member) = match module.values[pointer].kind {
            ValueKind::Global(global) => (global, 0),
            ValueKind::Instruction(instruction) => match &module.instructions[instruction].kind {
                InstructionKind::Access { base, indices } => {
                    let member = match indices.as_slice() {
                        [index] => module.as_constant(*index).and_then(ConstValue::as_i64),
                        _ => None,
                    };

                    match (&module.values[*base].kind, member) {
                        (ValueKind::Global(global), Some(member)) => (*global, member),
                        _ => {
                            return Err(BackendError::unsupported(
                                Target::Vulkan,
                                "'arrayLength' of a nested array",
                                span,
                            ));
                        }
                    }
                }
                _ => return Err(BackendError::unsupported(Target::Vulkan, "'arrayLength' through a pointer", span)),
            },
            _ => return Err(BackendError::unsupported(Target::Vulkan, "'arrayLength' through a pointer", span)),
        };

        let Some(global) = self.globals.get(&structure).copied() else {
            return Err(internal(format!("global {structure:?} was not declared")));
        };

        self.asm
            .emit_with(result, format!("OpArrayLength {ty} {} {member}", global.id));
        Ok(())
    }

    fn write_atomic(
        &mut self,
        (result, ty, _): (Id, Id, TypeId),
        function: BuiltinFunction,
        arguments: &[ValueId],
    ) -> Result<()> {
        let Some(&pointer) = arguments.first() else {
            return Err(internal("atomic without a pointer"));
        };

        let scope = self.scope(pointer)?;
        let relaxed = self.u32_constant(0)?;
        let signed = self
            .module
            .pointee(pointer)
            .and_then(|ty| self.types.element_scalar(ty))
            == Some(ScalarKind::I32);
        let pointer = self.operand(pointer)?;

        let opcode = match function {
            BuiltinFunction::AtomicLoad => {
                self.asm
                    .emit_with(result, format!("OpAtomicLoad {ty} {pointer} {scope} {relaxed}"));
                return Ok(());
            }
            BuiltinFunction::AtomicAdd => "OpAtomicIAdd",
            BuiltinFunction::AtomicSub => "OpAtomicISub",
            BuiltinFunction::AtomicAnd => "OpAtomicAnd",
            BuiltinFunction::AtomicOr => "OpAtomicOr",
            BuiltinFunction::AtomicXor => "OpAtomicXor",
            BuiltinFunction::AtomicMax if signed => "OpAtomicSMax",
            BuiltinFunction::AtomicMax => "OpAtomicUMax",
            BuiltinFunction::AtomicMin if signed => "OpAtomicSMin",
            BuiltinFunction::AtomicMin => "OpAtomicUMin",
            BuiltinFunction::AtomicExchange => "OpAtomicExchange",
            _ => return Err(internal(format!("'{}' is not an atomic", function.name()))),
        };

        let Some(&value) = arguments.get(1) else {
            return Err(internal(format!("'{}' expects a value", function.name())));
        };
        let value = self.operand(value)?;

        self.asm
            .emit_with(result, format!("{opcode} {ty} {pointer} {scope} {relaxed} {value}"));
        Ok(())
    }

    fn texture_of(&self, texture: ValueId) -> Result<(TextureDimension, TextureKind)> {
        match *self.types.get(self.value_type(texture)) {
            TypeKind::Texture { dimension, kind } => Ok((dimension, kind)),
            _ => Err(internal("texture builtin on a non-texture")),
        }
    }

    /// Texel coordinates, extended with layer 0 for arrayed textures
    fn texture_coordinates(&mut self, coordinates: ValueId, dimension: TextureDimension) -> Result<Id> {
        let id = self.operand(coordinates)?;

        if !dimension.is_arrayed() {
            return Ok(id);
        }

        let Some((size, scalar)) = self.types.scalar_or_vector_parts(self.value_type(coordinates)) else {
            return Err(internal("texture coordinates are not a vector"));
        };

        let layer = self.types.scalar(scalar);
        let layer = self.constant(layer, &Scalar::zero(scalar).into())?;
        let extended = self.types.vector(size.unwrap_or(1) + 1, scalar);
        let extended = self.type_id(extended)?;

        Ok(self
            .asm
            .emit_result(format!("OpCompositeConstruct {extended} {id} {layer}")))
    }

    fn write_texture_query(
        &mut self,
        (result, ty, result_type): (Id, Id, TypeId),
        function: BuiltinFunction,
        arguments: &[ValueId],
    ) -> Result<()> {
        let Some(&texture) = arguments.first() else {
            return Err(internal("texture builtin without a texture"));
        };

        let (dimension, kind) = self.texture_of(texture)?;
        let image = self.operand(texture)?;
        let depth = matches!(kind, TextureKind::Depth { .. });

        let vec4 = match kind {
            TextureKind::Sampled { sampled, .. } => self.types.vector(4, sampled.concretize()),
            TextureKind::Storage { format, .. } => self.types.vector(4, format.channel_type()),
            TextureKind::Depth { .. } => self.types.vector(4, ScalarKind::F32),
        };
        let vec4 = self.type_id(vec4)?;

        match function {
            BuiltinFunction::TextureSample | BuiltinFunction::TextureSampleLevel => {
                let [_, sampler, coordinates, rest @ ..] = arguments else {
                    return Err(internal("texture sampling expects a sampler and coordinates"));
                };

                let image_type = self.type_id(self.value_type(texture))?;
                let sampled_image_type = self.asm.declare(format!("OpTypeSampledImage {image_type}"));
                let sampler = self.operand(*sampler)?;
                let sampled = self
                    .asm
                    .emit_result(format!("OpSampledImage {sampled_image_type} {image} {sampler}"));
                let coordinates = self.texture_coordinates(*coordinates, dimension)?;

                let (opcode, operands) = match rest {
                    [level] => {
                        let level = self.float_level(*level)?;
                        ("OpImageSampleExplicitLod", format!(" Lod {level}"))
                    }
                    _ => ("OpImageSampleImplicitLod", String::new()),
                };

                emit_read(self, depth, result, ty, vec4, opcode, format!("{sampled} {coordinates}{operands}"));
            }
            BuiltinFunction::TextureLoad => {
                let [_, coordinates, rest @ ..] = arguments else {
                    return Err(internal("'textureLoad' expects coordinates"));
                };
                let coordinates = self.texture_coordinates(*coordinates, dimension)?;

                match (kind, rest) {
                    (TextureKind::Storage { .. }, _) => {
                        self.asm
                            .emit_with(result, format!("OpImageRead {ty} {image} {coordinates}"));
                    }
                    (
                        TextureKind::Sampled { multisampled, .. } | TextureKind::Depth { multisampled },
                        [level],
                    ) => {
                        let operand = if multisampled { "Sample" } else { "Lod" };
                        let level = self.operand(*level)?;
                        emit_read(
                            self,
                            depth,
                            result,
                            ty,
                            vec4,
                            "OpImageFetch",
                            format!("{image} {coordinates} {operand} {level}"),
                        );
                    }
                    _ => return Err(internal("'textureLoad' expects a level or sample index")),
                }
            }
            _ => {
                self.asm.capability("ImageQuery");

                let components = match dimension {
                    TextureDimension::D1 => 1,
                    TextureDimension::D2 | TextureDimension::Cube => 2,
                    TextureDimension::D2Array | TextureDimension::D3 | TextureDimension::CubeArray => 3,
                };
                let size = self
                    .types
                    .scalar_or_vector_parts(result_type)
                    .and_then(|(size, _)| size)
                    .unwrap_or(1);

                let query_type = self.types.scalar_or_vector(
                    (components > 1).then_some(components),
                    ScalarKind::U32,
                );
                let query_type = self.type_id(query_type)?;

                let query = match kind {
                    TextureKind::Storage { .. }
                    | TextureKind::Sampled { multisampled: true, .. }
                    | TextureKind::Depth { multisampled: true } => format!("OpImageQuerySize {query_type} {image}"),
                    _ => {
                        let level = match arguments.get(1) {
                            Some(level) => self.operand(*level)?,
                            None => self.u32_constant(0)?,
                        };
                        format!("OpImageQuerySizeLod {query_type} {image} {level}")
                    }
                };

                if components == size {
                    self.asm.emit_with(result, query);
                } else {
                    let query = self.asm.emit_result(query);
                    let indices = (0..size).join(" ");
                    self.asm
                        .emit_with(result, format!("OpVectorShuffle {ty} {query} {query} {indices}"));
                }
            }
        }

        Ok(())
    }

    /// A sampling level as a float
    fn float_level(&mut self, level: ValueId) -> Result<Id> {
        let id = self.operand(level)?;
        let kind = self.number_kind(level);

        let opcode = match kind {
            NumberKind::Float => return Ok(id),
            NumberKind::Unsigned => "OpConvertUToF",
            _ => "OpConvertSToF",
        };

        let float = self.types.f32();
        let float = self.type_id(float)?;
        Ok(self.asm.emit_result(format!("{opcode} {float} {id}")))
    }

    fn write_math(
        &mut self,
        (result, ty, result_type): (Id, Id, TypeId),
        function: BuiltinFunction,
        arguments: &[ValueId],
    ) -> Result<()> {
        use BuiltinFunction::*;

        let Some(&first) = arguments.first() else {
            return Err(internal(format!("'{}' without arguments", function.name())));
        };
        let kind = self.number_kind(first);
        let first_is_vector = matches!(self.types.get(self.value_type(first)), TypeKind::Vector { .. });

        let opcode = match (function, kind) {
            (Abs, NumberKind::Unsigned) => Some("OpCopyObject"),
            (All | Any, _) if !first_is_vector => Some("OpCopyObject"),
            (All, _) => Some("OpAll"),
            (Any, _) => Some("OpAny"),
            (Transpose, _) => Some("OpTranspose"),
            (CountOneBits, _) => Some("OpBitCount"),
            (ReverseBits, _) => Some("OpBitReverse"),
            (Dpdx, _) => Some("OpDPdx"),
            (Dpdy, _) => Some("OpDPdy"),
            (Fwidth, _) => Some("OpFwidth"),
            (Dot, NumberKind::Float) => Some("OpDot"),
            (Dot, _) => return self.write_integer_dot(result, ty, arguments),
            (Select, _) => return self.write_select(result, ty, result_type, arguments),
            _ => None,
        };

        if let Some(opcode) = opcode {
            let operands = self.operands(arguments)?.into_iter().join(" ");
            self.asm.emit_with(result, format!("{opcode} {ty} {operands}"));
            return Ok(());
        }

        let instruction = match (function, kind) {
            (Abs, NumberKind::Float) => "FAbs",
            (Abs, _) => "SAbs",
            (Min, NumberKind::Float) => "FMin",
            (Min, NumberKind::Unsigned) => "UMin",
            (Min, _) => "SMin",
            (Max, NumberKind::Float) => "FMax",
            (Max, NumberKind::Unsigned) => "UMax",
            (Max, _) => "SMax",
            (Clamp, NumberKind::Float) => "FClamp",
            (Clamp, NumberKind::Unsigned) => "UClamp",
            (Clamp, _) => "SClamp",
            (Sign, NumberKind::Float) => "FSign",
            (Sign, _) => "SSign",
            (Acos, _) => "Acos",
            (Asin, _) => "Asin",
            (Atan, _) => "Atan",
            (Atan2, _) => "Atan2",
            (Ceil, _) => "Ceil",
            (Cos, _) => "Cos",
            (Cosh, _) => "Cosh",
            (Cross, _) => "Cross",
            (Degrees, _) => "Degrees",
            (Determinant, _) => "Determinant",
            (Distance, _) => "Distance",
            (Exp, _) => "Exp",
            (Exp2, _) => "Exp2",
            (Floor, _) => "Floor",
            (Fma, _) => "Fma",
            (Fract, _) => "Fract",
            (InverseSqrt, _) => "InverseSqrt",
            (Length, _) => "Length",
            (Log, _) => "Log",
            (Log2, _) => "Log2",
            (Mix, _) => "FMix",
            (Normalize, _) => "Normalize",
            (Pow, _) => "Pow",
            (Radians, _) => "Radians",
            (Reflect, _) => "Reflect",
            (Round, _) => "RoundEven",
            (Sin, _) => "Sin",
            (Sinh, _) => "Sinh",
            (Smoothstep, _) => "SmoothStep",
            (Sqrt, _) => "Sqrt",
            (Step, _) => "Step",
            (Tan, _) => "Tan",
            (Tanh, _) => "Tanh",
            (Trunc, _) => "Trunc",
            _ => return Err(internal(format!("'{}' has no SPIR-V counterpart", function.name()))),
        };

        // Scalar operands of vector functions, like the weight of `mix`,
        // are splatted
        let vector_size = match *self.types.get(result_type) {
            TypeKind::Vector { size, .. } => Some(size),
            _ => None,
        };

        let mut operands = Vec::with_capacity(arguments.len());
        for argument in arguments {
            let id = self.operand(*argument)?;

            let scalar = match self.types.get(self.value_type(*argument)) {
                TypeKind::Scalar(scalar) => Some(*scalar),
                _ => None,
            };

            match (vector_size, scalar) {
                (Some(size), Some(scalar)) => operands.push(self.splat(id, size, scalar)?),
                _ => operands.push(id),
            }
        }

        self.asm.emit_with(
            result,
            format!("OpExtInst {ty} {} {instruction} {}", self.glsl, operands.iter().join(" ")),
        );
        Ok(())
    }

    fn splat(&mut self, scalar_id: Id, size: u8, scalar: ScalarKind) -> Result<Id> {
        let vector = self.types.vector(size, scalar);
        let vector = self.type_id(vector)?;
        let components = std::iter::repeat_n(scalar_id, usize::from(size)).join(" ");

        Ok(self
            .asm
            .emit_result(format!("OpCompositeConstruct {vector} {components}")))
    }

    /// `select(f, t, condition)`
    fn write_select(&mut self, result: Id, ty: Id, result_type: TypeId, arguments: &[ValueId]) -> Result<()> {
        let [reject, accept, condition] = arguments else {
            return Err(internal("'select' expects three arguments"));
        };

        let reject = self.operand(*reject)?;
        let accept = self.operand(*accept)?;
        let mut condition_id = self.operand(*condition)?;

        // SPIR-V 1.3 needs a condition per component
        let scalar_condition = matches!(self.types.get(self.value_type(*condition)), TypeKind::Scalar(_));
        let result_size = match self.types.get(result_type) {
            TypeKind::Vector { size, .. } => Some(*size),
            _ => None,
        };

        if let (true, Some(size)) = (scalar_condition, result_size) {
            condition_id = self.splat(condition_id, size, ScalarKind::Bool)?;
        }

        self.asm
            .emit_with(result, format!("OpSelect {ty} {condition_id} {accept} {reject}"));
        Ok(())
    }

    /// Integer dot products, which SPIR-V only has behind an extension
    fn write_integer_dot(&mut self, result: Id, ty: Id, arguments: &[ValueId]) -> Result<()> {
        let [a, b] = arguments else {
            return Err(internal("'dot' expects two arguments"));
        };

        let size = match *self.types.get(self.value_type(*a)) {
            TypeKind::Vector { size, .. } => size,
            _ => return Err(internal("'dot' of non-vectors")),
        };

        let a = self.operand(*a)?;
        let b = self.operand(*b)?;
        let mut sum = None;

        for index in 0..size {
            let x = self.asm.emit_result(format!("OpCompositeExtract {ty} {a} {index}"));
            let y = self.asm.emit_result(format!("OpCompositeExtract {ty} {b} {index}"));
            let product = self.asm.emit_result(format!("OpIMul {ty} {x} {y}"));

            sum = Some(match sum {
                None => product,
                Some(sum) if index + 1 == size => {
                    self.asm.emit_with(result, format!("OpIAdd {ty} {sum} {product}"));
                    return Ok(());
                }
                Some(sum) => self.asm.emit_result(format!("OpIAdd {ty} {sum} {product}")),
            });
        }

        Err(internal("'dot' of vectors with a single component"))
    }

    /* Entry points */

    fn write_entry_point(&mut self, id: FunctionId) -> Result<()> {
        let module = self.module;
        let function = &module.functions[id];

        let (Some(stage), Some(interface)) = (function.stage, function.interface.as_ref()) else {
            return Ok(());
        };

        let mut variables = Vec::new();

        let mut inputs = Vec::with_capacity(interface.inputs.len());
        for value in &interface.inputs {
            let mut bindings = Vec::new();
            for binding in value.bindings() {
                let variable = self.io_variable(binding, stage, true)?;
                variables.push(variable);
                bindings.push((binding, variable));
            }
            inputs.push((value, bindings));
        }

        let mut outputs = Vec::new();
        if let Some(value) = &interface.output {
            for binding in value.bindings() {
                let variable = self.io_variable(binding, stage, false)?;
                variables.push(variable);
                outputs.push((binding, variable));
            }
        }

        let workgroup = match stage {
            PipelineStage::Compute => self
                .used_globals(id)
                .into_iter()
                .filter(|global| module.globals[*global].space == AddressSpace::Workgroup)
                .collect(),
            _ => Vec::new(),
        };

        // Workgroup memory is cleared by the first invocation, which needs
        // the local invocation index
        let local_index = if workgroup.is_empty() {
            None
        } else {
            let existing = inputs.iter().flat_map(|(_, bindings)| bindings).find(|(binding, _)| {
                binding.kind == IoKind::Builtin(BuiltinValue::LocalInvocationIndex)
            });

            Some(match existing {
                Some((_, variable)) => *variable,
                None => {
                    let u32 = self.types.u32();
                    let binding = IoBinding {
                        name: "local_invocation_index".to_string(),
                        ty: u32,
                        kind: IoKind::Builtin(BuiltinValue::LocalInvocationIndex),
                        interpolation: None,
                        invariant: false,
                    };
                    let variable = self.io_variable(&binding, stage, true)?;
                    variables.push(variable);
                    variable
                }
            })
        };

        let void = self.void();
        let signature = self.function_type(void, &[]);
        let wrapper = self.asm.id();
        self.asm.name(wrapper, &function.name);
        self.asm
            .function_line(format!("{wrapper} = OpFunction {void} None {signature}"));
        let label = self.asm.id();
        self.asm.label(label);

        if let Some(local_index) = local_index {
            self.write_workgroup_init(local_index, &workgroup)?;
        }

        let mut arguments = Vec::with_capacity(inputs.len());
        for (value, bindings) in &inputs {
            let mut loaded = Vec::with_capacity(bindings.len());
            for (binding, variable) in bindings {
                loaded.push(self.load_input(binding, *variable)?);
            }

            arguments.push(match value {
                IoValue::Single(_) => loaded.into_iter().next().ok_or_else(|| internal("empty input"))?,
                IoValue::Struct { ty, .. } => {
                    let ty = self.type_id(*ty)?;
                    self.asm
                        .emit_result(format!("OpCompositeConstruct {ty} {}", loaded.iter().join(" ")))
                }
            });
        }

        let callee = self.functions[&id];
        let return_type = match function.return_type {
            Some(ty) => self.type_id(ty)?,
            None => void,
        };
        let arguments = arguments.iter().map(|argument| format!(" {argument}")).join("");
        let returned = self
            .asm
            .emit_result(format!("OpFunctionCall {return_type} {callee}{arguments}"));

        match &interface.output {
            Some(IoValue::Single(_)) => {
                for (binding, variable) in &outputs {
                    self.store_output(binding, *variable, returned)?;
                }
            }
            Some(IoValue::Struct { .. }) => {
                for (index, (binding, variable)) in outputs.iter().enumerate() {
                    let ty = self.type_id(binding.ty)?;
                    let member = self
                        .asm
                        .emit_result(format!("OpCompositeExtract {ty} {returned} {index}"));
                    self.store_output(binding, *variable, member)?;
                }
            }
            None => {}
        }

        self.asm.emit("OpReturn");
        self.asm.function_line("OpFunctionEnd");

        let model = match stage {
            PipelineStage::Vertex => "Vertex",
            PipelineStage::Fragment => "Fragment",
            PipelineStage::Compute => "GLCompute",
        };
        self.asm.entry_point(model, wrapper, &function.name, &variables);

        match stage {
            PipelineStage::Fragment => {
                self.asm.execution_mode(wrapper, "OriginUpperLeft");

                if outputs
                    .iter()
                    .any(|(binding, _)| binding.kind == IoKind::Builtin(BuiltinValue::FragDepth))
                {
                    self.asm.execution_mode(wrapper, "DepthReplacing");
                }
            }
            PipelineStage::Compute => {
                let [x, y, z] = function.workgroup_size.unwrap_or([1, 1, 1]);
                self.asm.execution_mode(wrapper, format!("LocalSize {x} {y} {z}"));
            }
            PipelineStage::Vertex => {}
        }

        Ok(())
    }

    fn write_workgroup_init(&mut self, local_index: Id, globals: &[GlobalId]) -> Result<()> {
        let u32 = self.types.u32();
        let u32 = self.type_id(u32)?;
        let bool = self.types.bool();
        let bool = self.type_id(bool)?;
        let zero = self.u32_constant(0)?;

        let index = self.asm.emit_result(format!("OpLoad {u32} {local_index}"));
        let first = self.asm.emit_result(format!("OpIEqual {bool} {index} {zero}"));
        let clear = self.asm.id();
        let merge = self.asm.id();

        self.asm.emit(format!("OpSelectionMerge {merge} None"));
        self.asm.emit(format!("OpBranchConditional {first} {clear} {merge}"));
        self.asm.label(clear);
        self.asm.comment("zero-initialize workgroup memory");

        for global in globals {
            let store = self.module.globals[*global].store;
            let null = self.null(store)?;
            let variable = self.value(self.module.globals[*global].value)?;
            self.asm.emit(format!("OpStore {variable} {null}"));
        }

        self.asm.emit(format!("OpBranch {merge}"));
        self.asm.label(merge);

        let scope = self.u32_constant(SCOPE_WORKGROUP)?;
        let semantics = self.u32_constant(SEMANTICS_WORKGROUP)?;
        self.asm
            .emit(format!("OpControlBarrier {scope} {scope} {semantics}"));
        Ok(())
    }

    /// The storage type of an IO variable. `sample_mask` is an array of one
    /// element in SPIR-V.
    fn io_store_type(&mut self, binding: &IoBinding) -> TypeId {
        match binding.kind {
            IoKind::Builtin(BuiltinValue::SampleMask) => self.types.intern(TypeKind::Array {
                element: binding.ty,
                size: ArraySize::Constant(1),
            }),
            _ => binding.ty,
        }
    }

    fn io_variable(&mut self, binding: &IoBinding, stage: PipelineStage, input: bool) -> Result<Id> {
        let class = if input { "Input" } else { "Output" };
        let store = self.io_store_type(binding);
        let store = self.type_id(store)?;
        let pointer = self.asm.declare(format!("OpTypePointer {class} {store}"));
        let variable = self.asm.declare_unique(format!("OpVariable {pointer} {class}"));
        self.asm.name(variable, &binding.name);

        match binding.kind {
            IoKind::Builtin(builtin) => {
                let name = match builtin {
                    BuiltinValue::Position if stage == PipelineStage::Fragment && input => "FragCoord",
                    BuiltinValue::Position => "Position",
                    BuiltinValue::VertexIndex => "VertexIndex",
                    BuiltinValue::InstanceIndex => "InstanceIndex",
                    BuiltinValue::FrontFacing => "FrontFacing",
                    BuiltinValue::FragDepth => "FragDepth",
                    BuiltinValue::SampleIndex => {
                        self.asm.capability("SampleRateShading");
                        "SampleId"
                    }
                    BuiltinValue::SampleMask => "SampleMask",
                    BuiltinValue::LocalInvocationId => "LocalInvocationId",
                    BuiltinValue::LocalInvocationIndex => "LocalInvocationIndex",
                    BuiltinValue::GlobalInvocationId => "GlobalInvocationId",
                    BuiltinValue::WorkgroupId => "WorkgroupId",
                    BuiltinValue::NumWorkgroups => "NumWorkgroups",
                };
                self.asm.decorate(variable, format!("BuiltIn {name}"));

                if builtin == BuiltinValue::SampleIndex && stage == PipelineStage::Fragment {
                    self.asm.decorate(variable, "Flat");
                }
            }
            IoKind::Location(location) => {
                self.asm.decorate(variable, format!("Location {location}"));

                let interpolated = match stage {
                    PipelineStage::Fragment => input,
                    PipelineStage::Vertex => !input,
                    PipelineStage::Compute => false,
                };

                if interpolated {
                    let integer = self
                        .types
                        .element_scalar(binding.ty)
                        .is_some_and(|scalar| !scalar.is_float());

                    match binding.interpolation {
                        Some(interpolation) => {
                            match interpolation.kind {
                                InterpolationKind::Flat => self.asm.decorate(variable, "Flat"),
                                InterpolationKind::Linear => self.asm.decorate(variable, "NoPerspective"),
                                InterpolationKind::Perspective => {}
                            }

                            match interpolation.sampling {
                                Some(InterpolationSampling::Centroid) => self.asm.decorate(variable, "Centroid"),
                                Some(InterpolationSampling::Sample) => {
                                    self.asm.capability("SampleRateShading");
                                    self.asm.decorate(variable, "Sample");
                                }
                                Some(InterpolationSampling::Center) | None => {}
                            }
                        }
                        None if integer && input => self.asm.decorate(variable, "Flat"),
                        None => {}
                    }
                }
            }
        }

        if binding.invariant {
            self.asm.decorate(variable, "Invariant");
        }

        Ok(variable)
    }

    fn load_input(&mut self, binding: &IoBinding, variable: Id) -> Result<Id> {
        let ty = self.type_id(binding.ty)?;

        let pointer = match binding.kind {
            IoKind::Builtin(BuiltinValue::SampleMask) => {
                let element = self.asm.declare(format!("OpTypePointer Input {ty}"));
                let zero = self.u32_constant(0)?;
                self.asm
                    .emit_result(format!("OpAccessChain {element} {variable} {zero}"))
            }
            _ => variable,
        };

        Ok(self.asm.emit_result(format!("OpLoad {ty} {pointer}")))
    }

    fn store_output(&mut self, binding: &IoBinding, variable: Id, value: Id) -> Result<()> {
        let pointer = match binding.kind {
            IoKind::Builtin(BuiltinValue::SampleMask) => {
                let ty = self.type_id(binding.ty)?;
                let element = self.asm.declare(format!("OpTypePointer Output {ty}"));
                let zero = self.u32_constant(0)?;
                self.asm
                    .emit_result(format!("OpAccessChain {element} {variable} {zero}"))
            }
            _ => variable,
        };

        self.asm.emit(format!("OpStore {pointer} {value}"));
        Ok(())
    }
}

/// Emits a texel read, extracting the depth from depth texture reads
fn emit_read(writer: &mut Writer, depth: bool, result: Id, ty: Id, vec4: Id, opcode: &str, operands: String) {
    if depth {
        let texel = writer.asm.emit_result(format!("{opcode} {vec4} {operands}"));
        writer
            .asm
            .emit_with(result, format!("OpCompositeExtract {ty} {texel} 0"));
    } else {
        writer.asm.emit_with(result, format!("{opcode} {ty} {operands}"));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use indoc::indoc;

    use super::*;
    use crate::{backend::c_like::tests::legalized, diagnostics::Diagnostics, middle::ir::builder::build_module};

    fn spirv(source: &str) -> String {
        let program = legalized(source, Target::Vulkan);

        let mut diagnostics = Diagnostics::default();
        let module = build_module(&program, &mut diagnostics).unwrap();

        SpirvGenerator.generate(&program, &module).unwrap()
    }

    /// Every id used is defined, and below the bound
    fn assert_ids_are_defined(code: &str) {
        let defined = code
            .lines()
            .filter_map(|line| line.trim().split_once(" = ").map(|(id, _)| id.to_string()))
            .collect::<BTreeSet<_>>();

        let bound = code
            .lines()
            .find_map(|line| line.strip_prefix("; Bound: "))
            .and_then(|bound| bound.parse::<u32>().ok())
            .unwrap();

        for line in code.lines().filter(|line| !line.trim_start().starts_with(';')) {
            for word in line.split_whitespace().filter(|word| word.starts_with('%')) {
                assert!(defined.contains(word), "{word} is not defined in\n{code}");
                assert!(word[1..].parse::<u32>().unwrap() < bound, "{word} exceeds the bound");
            }
        }
    }

    #[test]
    fn compute_shaders_declare_buffers_and_workgroup_size() {
        let code = spirv(indoc! {"
            struct Particles {
                count: u32,
                positions: array<vec4<f32>>,
            }

            @group(0) @binding(0) var<storage, read_write> particles: Particles;
            @group(1) @binding(2) var<uniform> gravity: vec4<f32>;

            @compute @workgroup_size(64)
            fn main(@builtin(global_invocation_id) id: vec3<u32>) {
                if id.x < arrayLength(&particles.positions) {
                    particles.positions[id.x] += gravity;
                }
            }
        "});

        assert!(code.starts_with("; SPIR-V\n"), "{code}");
        assert!(code.contains("OpCapability Shader\n"), "{code}");
        assert!(code.contains("OpEntryPoint GLCompute"), "{code}");
        assert!(code.contains("LocalSize 64 1 1"), "{code}");
        assert!(code.contains("DescriptorSet 1"), "{code}");
        assert!(code.contains("Binding 2"), "{code}");
        assert!(code.contains("OpTypeRuntimeArray"), "{code}");
        assert!(code.contains("ArrayStride 16"), "{code}");
        assert!(code.contains(" Block\n"), "{code}");
        assert!(code.contains("OpArrayLength"), "{code}");
        assert!(code.contains("BuiltIn GlobalInvocationId"), "{code}");
        assert!(code.contains("OpSelectionMerge"), "{code}");
        assert_ids_are_defined(&code);
    }

    #[test]
    fn vertex_outputs_become_output_variables() {
        let code = spirv(indoc! {"
            struct VertexOutput {
                @builtin(position) position: vec4<f32>,
                @location(0) color: vec3<f32>,
            }

            @vertex
            fn main(@location(0) position: vec3<f32>, @builtin(vertex_index) index: u32) -> VertexOutput {
                var out: VertexOutput;
                out.position = vec4<f32>(position, f32(index));
                out.color = position * 0.5;
                return out;
            }
        "});

        assert!(code.contains("OpEntryPoint Vertex"), "{code}");
        assert!(code.contains("BuiltIn Position"), "{code}");
        assert!(code.contains("BuiltIn VertexIndex"), "{code}");
        assert!(code.contains("Location 0"), "{code}");
        assert!(code.contains("OpConvertUToF"), "{code}");
        assert!(code.contains("OpFunctionCall"), "{code}");
        assert!(code.contains("OpName"), "{code}");
        assert!(code.contains("\"main_inner\""), "{code}");
        assert_ids_are_defined(&code);
    }

    #[test]
    fn fragment_shaders_sample_and_discard() {
        let code = spirv(indoc! {"
            @group(0) @binding(0) var image: texture_2d<f32>;
            @group(0) @binding(1) var smp: sampler;

            @fragment
            fn main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
                let color = textureSample(image, smp, uv);
                if color.a < 0.5 {
                    discard;
                }
                return color;
            }
        "});

        assert!(code.contains("OpExecutionMode"), "{code}");
        assert!(code.contains("OriginUpperLeft"), "{code}");
        assert!(code.contains("OpTypeImage"), "{code}");
        assert!(code.contains("OpSampledImage"), "{code}");
        assert!(code.contains("OpImageSampleImplicitLod"), "{code}");
        assert!(code.contains("OpKill"), "{code}");
        assert_ids_are_defined(&code);
    }

    #[test]
    fn loops_are_structured() {
        let code = spirv(indoc! {"
            @group(0) @binding(0) var<storage, read_write> total: i32;

            @compute @workgroup_size(1)
            fn main() {
                var sum = 0;
                for (var i = 0; i < 10; i++) {
                    if i % 2 == 0 && i != 4 {
                        continue;
                    }
                    sum += i << 1u;
                }
                total = sum;
            }
        "});

        assert!(code.contains("OpLoopMerge"), "{code}");
        assert!(code.contains("OpPhi"), "{code}");
        assert!(code.contains("OpShiftLeftLogical"), "{code}");
        assert!(code.contains("OpSRem"), "{code}");
        assert_ids_are_defined(&code);
    }

    #[test]
    fn workgroup_memory_is_cleared_before_use() {
        let code = spirv(indoc! {"
            var<workgroup> counter: atomic<u32>;
            @group(0) @binding(0) var<storage, read_write> winner: u32;

            @compute @workgroup_size(8, 8)
            fn main() {
                let previous = atomicAdd(&counter, 1u);
                workgroupBarrier();
                if previous == 0u {
                    winner = atomicLoad(&counter);
                }
            }
        "});

        assert!(code.contains("BuiltIn LocalInvocationIndex"), "{code}");
        assert!(code.contains("OpConstantNull"), "{code}");
        assert!(code.contains("OpControlBarrier"), "{code}");
        assert!(code.contains("OpAtomicIAdd"), "{code}");
        assert!(code.contains("OpAtomicLoad"), "{code}");
        assert!(code.contains("LocalSize 8 8 1"), "{code}");
        assert_ids_are_defined(&code);
    }

    #[test]
    fn generation_is_deterministic() {
        let source = indoc! {"
            struct Light {
                position: vec3<f32>,
                color: vec3<f32>,
            }

            @group(0) @binding(0) var<uniform> light: Light;

            @fragment
            fn main(@location(0) normal: vec3<f32>) -> @location(0) vec4<f32> {
                let intensity = max(dot(normalize(normal), light.position), 0.0);
                return vec4<f32>(light.color * intensity, 1.0);
            }
        "};

        let code = spirv(source);
        assert_eq!(code, spirv(source));
        assert!(code.contains("OpExtInst"), "{code}");
        assert!(code.contains("Normalize"), "{code}");
        assert!(code.contains("OpDot"), "{code}");
        assert!(code.contains("OpMemberDecorate"), "{code}");
        assert_ids_are_defined(&code);
    }
}

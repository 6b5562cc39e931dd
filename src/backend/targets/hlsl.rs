//! HLSL for Direct3D 12, shader model 6.2 with 16-bit types.

use hashbrown::HashSet;
use once_cell::sync::Lazy;

use crate::{
    backend::{
        BackendError, CodeGenerator, Target,
        c_like::{self, BuiltinCall, Dialect, EntryPoint, IoField, Result, Writer, type_identifier},
    },
    frontend::ast::{BinaryOperatorKind, DeclarationId, ExpressionId, PipelineStage},
    middle::{
        builtin::{BuiltinFunction, BuiltinValue},
        constant::Scalar,
        interface::{InterpolationKind, InterpolationSampling, IoBinding, IoKind},
        ir,
        program::{GlobalInfo, GlobalKind, Program},
        ty::{
            AddressSpace, ArraySize, SamplerKind, ScalarKind, TextureDimension, TextureKind, TypeId, TypeKind,
        },
    },
};

static RESERVED: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "AppendStructuredBuffer", "BlendState", "Buffer", "ByteAddressBuffer", "ComputeShader",
        "ConsumeStructuredBuffer", "DepthStencilState", "DomainShader", "GeometryShader", "GetDimensions",
        "GroupMemoryBarrierWithGroupSync", "DeviceMemoryBarrierWithGroupSync", "HullShader", "InputPatch",
        "InterlockedAdd", "InterlockedAnd", "InterlockedExchange", "InterlockedMax", "InterlockedMin", "InterlockedOr",
        "InterlockedXor", "LineStream", "NULL", "OutputPatch", "PixelShader", "PointStream", "RWBuffer",
        "RWByteAddressBuffer", "RWStructuredBuffer", "RWTexture1D", "RWTexture2D", "RWTexture2DArray", "RWTexture3D",
        "SamplerComparisonState", "SamplerState", "StructuredBuffer", "Texture1D", "Texture2D", "Texture2DArray",
        "Texture2DMS", "Texture3D", "TextureCube", "TextureCubeArray", "TriangleStream", "VertexShader", "asfloat",
        "asint", "asuint", "asm", "bool", "break", "case", "cbuffer", "centroid", "class", "column_major", "compile",
        "const", "continue", "countbits", "ddx", "ddy", "default", "discard", "do", "double", "dword", "else", "export",
        "extern", "false", "float", "for", "frac", "groupshared", "half", "if", "in", "inline", "inout", "int",
        "interface", "lerp", "line", "linear", "mad", "matrix", "min16float", "min16int", "min16uint", "mul",
        "namespace", "nointerpolation", "noperspective", "out", "packoffset", "point", "precise", "register",
        "return", "reversebits", "row_major", "rsqrt", "sample", "sampler", "saturate", "shared", "snorm",
        "static", "string", "struct", "switch", "tbuffer", "texture", "triangle", "true", "typedef", "uint", "uniform",
        "unorm", "unsigned", "vector", "void", "volatile", "while",
    ]
    .into_iter()
    .collect()
});

/// Vector and matrix type names such as `float4` and `int2x3`
fn is_numeric_type_name(name: &str) -> bool {
    let Some(rest) = ["float16_t", "float", "half", "int", "uint", "bool"]
        .into_iter()
        .find_map(|scalar| name.strip_prefix(scalar))
    else {
        return false;
    };

    let dimension = |text: &str| matches!(text, "1" | "2" | "3" | "4");

    match rest.split_once('x') {
        Some((columns, rows)) => dimension(columns) && dimension(rows),
        None => dimension(rest),
    }
}

struct Hlsl;

impl Hlsl {
    fn register(global: &GlobalInfo, class: char) -> String {
        let binding = global.binding.unwrap_or_default();
        format!("register({class}{}, space{})", binding.binding, binding.group)
    }

    /// Storage buffers holding a struct that ends in a runtime-sized array
    /// are declared as a buffer of the array elements
    fn flattened_buffer(w: &Writer, global: &GlobalInfo) -> bool {
        global.address_space() == Some(AddressSpace::Storage)
            && matches!(w.types.get(global.ty), TypeKind::Struct(_))
            && w.types.has_runtime_size(global.ty)
    }

    fn semantic(field: &IoField, stage: PipelineStage, input: bool) -> Result<String> {
        let target = Target::D3d12;

        Ok(match field.binding.kind {
            IoKind::Location(location) if stage == PipelineStage::Fragment && !input => format!("SV_Target{location}"),
            IoKind::Location(location) => format!("TEXCOORD{location}"),
            IoKind::Builtin(builtin) => match builtin {
                BuiltinValue::Position => "SV_Position",
                BuiltinValue::VertexIndex => "SV_VertexID",
                BuiltinValue::InstanceIndex => "SV_InstanceID",
                BuiltinValue::FrontFacing => "SV_IsFrontFace",
                BuiltinValue::FragDepth => "SV_Depth",
                BuiltinValue::SampleIndex => "SV_SampleIndex",
                BuiltinValue::SampleMask => "SV_Coverage",
                BuiltinValue::LocalInvocationId => "SV_GroupThreadID",
                BuiltinValue::LocalInvocationIndex => "SV_GroupIndex",
                BuiltinValue::GlobalInvocationId => "SV_DispatchThreadID",
                BuiltinValue::WorkgroupId => "SV_GroupID",
                BuiltinValue::NumWorkgroups => {
                    return Err(BackendError::unsupported(
                        target,
                        "the num_workgroups builtin",
                        Default::default(),
                    ));
                }
            }
            .to_string(),
        })
    }

    fn field_declaration(w: &mut Writer, field: &IoField, stage: PipelineStage, input: bool) -> Result<String> {
        let mut qualifiers = String::new();

        if field.binding.invariant {
            qualifiers.push_str("precise ");
        }

        if let Some(interpolation) = field.binding.interpolation {
            match interpolation.kind {
                InterpolationKind::Flat => qualifiers.push_str("nointerpolation "),
                InterpolationKind::Linear => qualifiers.push_str("noperspective "),
                InterpolationKind::Perspective => {}
            }

            match interpolation.sampling {
                Some(InterpolationSampling::Centroid) => qualifiers.push_str("centroid "),
                Some(InterpolationSampling::Sample) => qualifiers.push_str("sample "),
                Some(InterpolationSampling::Center) | None => {}
            }
        }

        let declaration = w.declare(field.binding.ty, &field.name)?;
        let semantic = Self::semantic(field, stage, input)?;

        Ok(format!("{qualifiers}{declaration} : {semantic};"))
    }

    fn texture_dimensions(&self, w: &mut Writer, call: &BuiltinCall) -> Result<String> {
        let (dimension, kind) = w.texture_of(call)?;
        let texture = &call.arguments[0];

        let size = match call.result.and_then(|ty| w.shape(ty)) {
            Some((size, _)) => size,
            None => 1,
        };

        let mut outputs = (0..size)
            .map(|_| w.temporary(|name| format!("uint {name};")))
            .collect::<Vec<_>>();

        let mut extra = Vec::new();

        if dimension.is_arrayed() {
            extra.push(w.temporary(|name| format!("uint {name};")));
        }

        let multisampled = matches!(
            kind,
            TextureKind::Sampled { multisampled: true, .. } | TextureKind::Depth { multisampled: true }
        );
        let mipmapped = !multisampled && !matches!(kind, TextureKind::Storage { .. });

        if multisampled || mipmapped {
            extra.push(w.temporary(|name| format!("uint {name};")));
        }

        let mut arguments = Vec::new();

        if mipmapped {
            arguments.push(match call.arguments.get(1) {
                Some(level) => format!("uint({})", c_like::unwrap_parens(level)),
                None => "0u".to_string(),
            });
        }

        arguments.extend(outputs.iter().cloned());
        arguments.extend(extra);
        w.hoist(format!("{texture}.GetDimensions({});", arguments.join(", ")));

        Ok(match size {
            1 => outputs.remove(0),
            _ => format!("uint{size}({})", outputs.join(", ")),
        })
    }

    fn texture_load(&self, w: &mut Writer, call: &BuiltinCall) -> Result<String> {
        let (dimension, kind) = w.texture_of(call)?;
        let texture = &call.arguments[0];
        let coordinates = c_like::unwrap_parens(&call.arguments[1]);

        let size = dimension.coordinates() as usize;
        let vector = |size: usize| if size == 1 { "int".to_string() } else { format!("int{size}") };

        let layer = if dimension.is_arrayed() { ", 0" } else { "" };
        let layers = usize::from(dimension.is_arrayed());

        let texel = match kind {
            TextureKind::Storage { .. } => format!(
                "{texture}.Load({}({}({coordinates}){layer}))",
                vector(size + layers),
                vector(size)
            ),
            TextureKind::Sampled { multisampled: true, .. } | TextureKind::Depth { multisampled: true } => {
                format!(
                    "{texture}.Load({}({coordinates}), int({}))",
                    vector(size),
                    c_like::unwrap_parens(&call.arguments[2])
                )
            }
            _ => format!(
                "{texture}.Load({}({}({coordinates}){layer}, int({})))",
                vector(size + layers + 1),
                vector(size),
                c_like::unwrap_parens(&call.arguments[2])
            ),
        };

        Ok(match kind {
            TextureKind::Depth { .. } => format!("{texel}.x"),
            _ => texel,
        })
    }

    fn atomic(&self, w: &mut Writer, call: &BuiltinCall) -> Result<String> {
        let pointer = &call.arguments[0];
        let value = call.arguments.get(1).map(|value| c_like::unwrap_parens(value).to_string());

        let intrinsic = match call.function {
            BuiltinFunction::AtomicAdd | BuiltinFunction::AtomicSub => "InterlockedAdd",
            BuiltinFunction::AtomicAnd => "InterlockedAnd",
            BuiltinFunction::AtomicOr | BuiltinFunction::AtomicLoad => "InterlockedOr",
            BuiltinFunction::AtomicXor => "InterlockedXor",
            BuiltinFunction::AtomicMax => "InterlockedMax",
            BuiltinFunction::AtomicMin => "InterlockedMin",
            _ => "InterlockedExchange",
        };

        let value = match (call.function, value) {
            (BuiltinFunction::AtomicLoad, _) => "0".to_string(),
            (BuiltinFunction::AtomicSub, Some(value)) => format!("-({value})"),
            (_, Some(value)) => value,
            (_, None) => return Err(BackendError::internal(Target::D3d12, "atomic without an operand")),
        };

        let scalar = match call.result {
            Some(ty) => w.type_name(ty)?,
            None => {
                let pointee = match call.types.first().map(|ty| w.types.get(*ty).clone()) {
                    Some(TypeKind::Pointer { pointee, .. }) => pointee,
                    _ => return Err(BackendError::internal(Target::D3d12, "atomic without a pointer")),
                };
                w.type_name(pointee)?
            }
        };

        let original = w.temporary(|name| format!("{scalar} {name};"));
        w.hoist(format!("{intrinsic}({pointer}, {value}, {original});"));
        Ok(original)
    }
}

impl Dialect for Hlsl {
    fn target(&self) -> Target {
        Target::D3d12
    }

    fn header(&self) -> &'static str {
        ""
    }

    fn is_reserved(&self, name: &str) -> bool {
        RESERVED.contains(name) || is_numeric_type_name(name) || BuiltinFunction::from_name(name).is_some()
    }

    fn scalar(&self, scalar: ScalarKind) -> Result<&'static str> {
        match scalar {
            ScalarKind::Bool => Ok("bool"),
            ScalarKind::I32 => Ok("int"),
            ScalarKind::U32 => Ok("uint"),
            ScalarKind::F32 => Ok("float"),
            ScalarKind::F16 => Ok("float16_t"),
            _ => Err(BackendError::internal(self.target(), format!("abstract type {scalar}"))),
        }
    }

    fn vector(&self, size: u8, scalar: ScalarKind) -> Result<String> {
        Ok(format!("{}{size}", self.scalar(scalar)?))
    }

    fn matrix(&self, columns: u8, rows: u8, scalar: ScalarKind) -> Result<String> {
        Ok(format!("{}{columns}x{rows}", self.scalar(scalar)?))
    }

    fn array(&self, w: &mut Writer, ty: TypeId, element: &str, count: u32) -> Result<String> {
        let name = type_identifier(&w.types.name(ty));
        let definition = format!("typedef {element} {name}[{count}];");
        w.define(ty, || definition);
        Ok(name)
    }

    fn texture(&self, dimension: TextureDimension, kind: TextureKind) -> Result<String> {
        let base = match dimension {
            TextureDimension::D1 => "Texture1D",
            TextureDimension::D2 => "Texture2D",
            TextureDimension::D2Array => "Texture2DArray",
            TextureDimension::D3 => "Texture3D",
            TextureDimension::Cube => "TextureCube",
            TextureDimension::CubeArray => "TextureCubeArray",
        };

        Ok(match kind {
            TextureKind::Sampled { sampled, multisampled } => {
                let texel = self.vector(4, sampled.concretize())?;
                let base = if multisampled { "Texture2DMS" } else { base };
                format!("{base}<{texel}>")
            }
            TextureKind::Depth { multisampled } => {
                let base = if multisampled { "Texture2DMS" } else { base };
                format!("{base}<float4>")
            }
            TextureKind::Storage { format, .. } => {
                format!("RW{base}<{}>", self.vector(4, format.channel_type())?)
            }
        })
    }

    fn sampler(&self, kind: SamplerKind) -> &'static str {
        match kind {
            SamplerKind::Filtering => "SamplerState",
            SamplerKind::Comparison => "SamplerComparisonState",
        }
    }

    fn constant_qualifier(&self) -> &'static str {
        "static const"
    }

    fn module_variable(&self, w: &mut Writer, id: DeclarationId, global: &GlobalInfo) -> Result<()> {
        let GlobalKind::Var { space, access } = global.kind else {
            return Ok(());
        };

        let name = w.global_name(id);
        let span = w.program.declaration_span(id);

        match space {
            AddressSpace::Uniform => {
                let declaration = w.declare(global.ty, &name)?;
                let register = Self::register(global, 'b');
                w.line(format!("cbuffer {name}_block : {register} {{"));
                w.line(format!("  {declaration};"));
                w.line("};");
            }
            AddressSpace::Storage => {
                let prefix = if access.can_write() { "RW" } else { "" };
                let register = Self::register(global, if access.can_write() { 'u' } else { 't' });

                let element = match w.types.get(global.ty).clone() {
                    TypeKind::Array {
                        element,
                        size: ArraySize::Runtime,
                    } => element,
                    TypeKind::Struct(structure) if w.types.has_runtime_size(global.ty) => {
                        let [member] = structure.members.as_slice() else {
                            return Err(BackendError::unsupported(
                                self.target(),
                                "storage buffers mixing fixed members with a runtime-sized array",
                                span,
                            ));
                        };

                        match w.types.get(member.ty) {
                            TypeKind::Array { element, .. } => *element,
                            _ => return Err(BackendError::internal(self.target(), "runtime-sized struct")),
                        }
                    }
                    _ => global.ty,
                };

                let element = w.type_name(element)?;
                w.line(format!("{prefix}StructuredBuffer<{element}> {name} : {register};"));
            }
            AddressSpace::Handle => {
                let ty = w.type_name(global.ty)?;
                let class = match w.types.get(global.ty) {
                    TypeKind::Sampler(_) => 's',
                    TypeKind::Texture {
                        kind: TextureKind::Storage { .. },
                        ..
                    } => 'u',
                    _ => 't',
                };

                w.line(format!("{ty} {name} : {};", Self::register(global, class)));
            }
            AddressSpace::Private => {
                let declaration = w.declare(global.ty, &name)?;
                let initializer = match w.program.module.declaration(id).as_variable().and_then(|v| v.initializer) {
                    Some(initializer) => w.expression(initializer)?,
                    None => self.zero_value(w, global.ty)?,
                };

                w.line(format!("static {declaration} = {};", c_like::unwrap_parens(&initializer)));
            }
            AddressSpace::Workgroup => {
                let declaration = w.declare(global.ty, &name)?;
                w.line(format!("groupshared {declaration};"));
            }
            AddressSpace::Function => {
                return Err(BackendError::internal(self.target(), "function address space at module scope"));
            }
        }

        Ok(())
    }

    fn global_reference(&self, w: &Writer, id: DeclarationId, global: &GlobalInfo) -> String {
        let name = w.global_name(id);

        match global.address_space() {
            Some(AddressSpace::Storage)
                if !matches!(
                    w.types.get(global.ty),
                    TypeKind::Array {
                        size: ArraySize::Runtime,
                        ..
                    }
                ) && !Self::flattened_buffer(w, global) =>
            {
                format!("{name}[0]")
            }
            _ => name,
        }
    }

    fn member_access(&self, w: &Writer, base: ExpressionId, base_text: &str, _: &str) -> Option<String> {
        let (_, global) = w.root_global(base)?;
        Self::flattened_buffer(w, global).then(|| base_text.to_string())
    }

    fn pointer_parameter(&self, _: AddressSpace, pointee: &str, name: &str) -> String {
        format!("inout {pointee} {name}")
    }

    fn construct(&self, w: &mut Writer, ty: TypeId, arguments: Vec<String>) -> Result<String> {
        let arguments = arguments
            .iter()
            .map(|argument| c_like::unwrap_parens(argument).to_string())
            .collect::<Vec<_>>();

        match w.types.get(ty) {
            TypeKind::Array { .. } | TypeKind::Struct(_) => {
                let list = format!("{{{}}}", arguments.join(", "));

                if w.at_module_scope() {
                    return Ok(list);
                }

                let declaration_type = w.type_name(ty)?;
                Ok(w.temporary(|name| format!("{declaration_type} {name} = {list};")))
            }
            _ => Ok(format!("{}({})", w.type_name(ty)?, arguments.join(", "))),
        }
    }

    fn splat(&self, w: &mut Writer, ty: TypeId, scalar: String) -> Result<String> {
        Ok(format!("(({})({}))", w.type_name(ty)?, c_like::unwrap_parens(&scalar)))
    }

    fn zero_value(&self, w: &mut Writer, ty: TypeId) -> Result<String> {
        match w.types.get(ty) {
            TypeKind::Scalar(scalar) => {
                let zero = Scalar::zero(scalar.concretize());
                w.scalar_literal(zero)
            }
            _ => Ok(format!("(({})0)", w.type_name(ty)?)),
        }
    }

    fn bitcast(&self, w: &mut Writer, from: TypeId, to: TypeId, value: String) -> Result<String> {
        if from == to {
            return Ok(value);
        }

        let function = match w.types.element_scalar(to) {
            Some(ScalarKind::F32) => "asfloat",
            Some(ScalarKind::I32) => "asint",
            Some(ScalarKind::U32) => "asuint",
            Some(ScalarKind::F16) => "asfloat16",
            _ => return Err(BackendError::internal(self.target(), "bitcast to a non-numeric type")),
        };

        Ok(format!("{function}({value})"))
    }

    fn binary(
        &self,
        w: &mut Writer,
        operator: BinaryOperatorKind,
        types: [TypeId; 2],
        [lhs, rhs]: [&str; 2],
    ) -> Result<Option<String>> {
        let matrix = types.iter().any(|ty| matches!(w.types.get(*ty), TypeKind::Matrix { .. }));

        // Matrices are declared transposed, so the operands swap
        if operator == BinaryOperatorKind::Multiply && matrix {
            return Ok(Some(format!("mul({}, {})", c_like::unwrap_parens(rhs), c_like::unwrap_parens(lhs))));
        }

        Ok(None)
    }

    fn builtin(&self, w: &mut Writer, call: &BuiltinCall) -> Result<String> {
        use BuiltinFunction::*;

        let arguments = &call.arguments;
        let rename = |name: &str| Writer::call_text(name, arguments);

        Ok(match call.function {
            Dpdx => rename("ddx"),
            Dpdy => rename("ddy"),
            CountOneBits => rename("countbits"),
            ReverseBits => rename("reversebits"),
            Fma => rename("mad"),
            Fract => rename("frac"),
            InverseSqrt => rename("rsqrt"),
            Mix => rename("lerp"),
            Sign => {
                let sign = rename("sign");
                match call.result {
                    Some(ty) if w.types.element_scalar(ty).is_some_and(ScalarKind::is_float) => {
                        format!("{}({sign})", w.type_name(ty)?)
                    }
                    _ => sign,
                }
            }
            Select => {
                let [f, t, condition] = arguments.as_slice() else {
                    return Err(BackendError::internal(self.target(), "'select' expects three arguments"));
                };

                match call.types.get(2).map(|ty| w.types.get(*ty)) {
                    Some(TypeKind::Vector { .. }) => Writer::call_text("select", &[condition.clone(), t.clone(), f.clone()]),
                    _ => format!("({condition} ? {t} : {f})"),
                }
            }
            ArrayLength => {
                let buffer = &arguments[0];
                let count = w.temporary(|name| format!("uint {name};"));
                let stride = w.temporary(|name| format!("uint {name};"));
                w.hoist(format!("{buffer}.GetDimensions({count}, {stride});"));
                count
            }
            WorkgroupBarrier => "GroupMemoryBarrierWithGroupSync()".to_string(),
            StorageBarrier => "DeviceMemoryBarrierWithGroupSync()".to_string(),
            TextureSample | TextureSampleLevel => {
                let (dimension, kind) = w.texture_of(call)?;
                let texture = &arguments[0];
                let sampler = c_like::unwrap_parens(&arguments[1]);
                let mut coordinates = c_like::unwrap_parens(&arguments[2]).to_string();

                if dimension.is_arrayed() {
                    coordinates = format!("float{}({coordinates}, 0.0f)", dimension.coordinates() + 1);
                }

                let sample = match arguments.get(3) {
                    Some(level) => format!(
                        "{texture}.SampleLevel({sampler}, {coordinates}, {})",
                        c_like::unwrap_parens(level)
                    ),
                    None => format!("{texture}.Sample({sampler}, {coordinates})"),
                };

                match kind {
                    TextureKind::Depth { .. } => format!("{sample}.x"),
                    _ => sample,
                }
            }
            TextureLoad => self.texture_load(w, call)?,
            TextureStore => {
                let (dimension, _) = w.texture_of(call)?;
                let coordinates = match dimension.coordinates() {
                    1 => "uint".to_string(),
                    size => format!("uint{size}"),
                };

                format!(
                    "{}[{coordinates}({})] = {}",
                    arguments[0],
                    c_like::unwrap_parens(&arguments[1]),
                    c_like::unwrap_parens(&arguments[2])
                )
            }
            TextureDimensions => self.texture_dimensions(w, call)?,
            function if function.is_atomic() => {
                let original = self.atomic(w, call)?;

                // The hoisted call is the whole store
                if function == AtomicStore { String::new() } else { original }
            }
            function => rename(function.name()),
        })
    }

    fn entry_point(&self, w: &mut Writer, entry: &EntryPoint) -> Result<()> {
        let stage = entry.stage;
        let mut inputs = w.input_fields(entry);

        let needs_local_index = stage == PipelineStage::Compute && w.has_workgroup_variables(entry);
        let local_index = match w.input_builtin(entry, BuiltinValue::LocalInvocationIndex) {
            Some(field) => format!("input.{}", field.name),
            None if needs_local_index => {
                inputs.push(IoField {
                    name: "local_index".to_string(),
                    binding: IoBinding {
                        name: "local_index".to_string(),
                        ty: w.types.u32(),
                        kind: IoKind::Builtin(BuiltinValue::LocalInvocationIndex),
                        interpolation: None,
                        invariant: false,
                    },
                    source: String::new(),
                });
                "input.local_index".to_string()
            }
            None => String::new(),
        };

        let input_struct = format!("{}_in", entry.name);
        let output_struct = format!("{}_out", entry.name);

        if !inputs.is_empty() {
            w.line(format!("struct {input_struct} {{"));
            for field in &inputs {
                let declaration = Self::field_declaration(w, field, stage, true)?;
                w.line(format!("  {declaration}"));
            }
            w.line("};");
            w.blank_line();
        }

        let outputs = w.output_fields(entry, "result");

        if !outputs.is_empty() {
            w.line(format!("struct {output_struct} {{"));
            for field in &outputs {
                let declaration = Self::field_declaration(w, field, stage, false)?;
                w.line(format!("  {declaration}"));
            }
            w.line("};");
            w.blank_line();
        }

        if stage == PipelineStage::Compute {
            let [x, y, z] = entry.workgroup_size;
            w.line(format!("[numthreads({x}, {y}, {z})]"));
        }

        let return_type = if outputs.is_empty() { "void" } else { output_struct.as_str() };
        let parameter = if inputs.is_empty() {
            String::new()
        } else {
            format!("{input_struct} input")
        };

        w.line(format!("{return_type} {}({parameter}) {{", entry.name));
        w.indent();

        if needs_local_index {
            w.write_workgroup_init(entry, &local_index, "GroupMemoryBarrierWithGroupSync()")?;
        }

        let call = w.call_inner(entry, &|_, field| format!("input.{}", field.name))?;

        match entry.return_type {
            Some(ty) if !outputs.is_empty() => {
                let declaration = w.declare(ty, "result")?;
                w.flush_line(format!("{declaration} = {call};"));
                w.line(format!("{output_struct} output = ({output_struct})0;"));

                for field in &outputs {
                    w.line(format!("output.{} = {};", field.name, field.source));
                }

                w.line("return output;");
            }
            _ => w.flush_line(format!("{call};")),
        }

        w.dedent();
        w.line("}");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct HlslGenerator;

impl CodeGenerator for HlslGenerator {
    fn generate(&self, program: &Program, _: &ir::Module) -> std::result::Result<String, BackendError> {
        c_like::generate(program, &Hlsl)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::backend::c_like::tests::legalized;

    fn hlsl(source: &str) -> String {
        let program = legalized(source, Target::D3d12);
        c_like::generate(&program, &Hlsl).unwrap()
    }

    #[test]
    fn vertex_entry_points_get_semantics() {
        let code = hlsl(indoc! {"
            struct VertexOutput {
                @builtin(position) position: vec4<f32>,
                @location(0) @interpolate(flat) index: u32,
            }

            @vertex
            fn main(@builtin(vertex_index) index: u32) -> VertexOutput {
                var output: VertexOutput;
                output.position = vec4<f32>(f32(index), 0.0, 0.0, 1.0);
                output.index = index;
                return output;
            }
        "});

        assert!(code.contains("struct VertexOutput {\n  float4 position;\n  uint index;\n};"), "{code}");
        assert!(code.contains("VertexOutput main_inner(uint index) {"), "{code}");
        assert!(code.contains("  uint index : SV_VertexID;"), "{code}");
        assert!(code.contains("  float4 result_position : SV_Position;"), "{code}");
        assert!(code.contains("  nointerpolation uint result_index : TEXCOORD0;"), "{code}");
        assert!(code.contains("main_out main(main_in input) {"), "{code}");
        assert!(code.contains("  VertexOutput result = main_inner(input.index);"), "{code}");
        assert!(code.contains("  output.result_index = result.index;"), "{code}");
    }

    #[test]
    fn resources_use_registers_and_spaces() {
        let code = hlsl(indoc! {"
            struct Params { scale: f32 }

            @group(0) @binding(0) var<uniform> params: Params;
            @group(1) @binding(2) var<storage, read_write> data: array<f32>;
            @group(0) @binding(1) var<storage> counts: vec4<u32>;

            @compute @workgroup_size(64)
            fn main(@builtin(global_invocation_id) id: vec3<u32>) {
                data[id.x] = data[id.x] * params.scale + f32(counts.x) + f32(arrayLength(&data));
            }
        "});

        assert!(code.contains("cbuffer params_block : register(b0, space0) {\n  Params params;\n};"), "{code}");
        assert!(code.contains("RWStructuredBuffer<float> data : register(u2, space1);"), "{code}");
        assert!(code.contains("StructuredBuffer<uint4> counts : register(t1, space0);"), "{code}");
        assert!(code.contains("counts[0].x"), "{code}");
        assert!(code.contains("data.GetDimensions(tmp_0, tmp_1);"), "{code}");
        assert!(code.contains("[numthreads(64, 1, 1)]"), "{code}");
        assert!(code.contains("uint3 id : SV_DispatchThreadID;"), "{code}");
    }

    #[test]
    fn matrix_products_swap_operands() {
        let code = hlsl(indoc! {"
            @group(0) @binding(0) var<uniform> transform: mat4x4<f32>;

            @vertex
            fn main(@location(0) position: vec4<f32>) -> @builtin(position) vec4<f32> {
                return transform * position;
            }
        "});

        assert!(code.contains("return mul(position, transform);"), "{code}");
        assert!(code.contains("float4 position : TEXCOORD0;"), "{code}");
    }

    #[test]
    fn workgroup_memory_is_cleared_by_the_first_invocation() {
        let code = hlsl(indoc! {"
            var<workgroup> tile: array<f32, 64>;
            var<workgroup> hits: atomic<u32>;

            @compute @workgroup_size(64)
            fn main(@builtin(local_invocation_id) local: vec3<u32>) {
                tile[local.x] = 1.0;
                atomicAdd(&hits, 1u);
                workgroupBarrier();
            }
        "});

        assert!(code.contains("groupshared array_f32_64 tile;"), "{code}");
        assert!(code.contains("typedef float array_f32_64[64];"), "{code}");
        assert!(code.contains("uint local_index : SV_GroupIndex;"), "{code}");
        assert!(code.contains("if (input.local_index == 0u) {"), "{code}");
        assert!(code.contains("InterlockedAdd(hits, 1u, tmp_0);"), "{code}");
        assert!(code.contains("GroupMemoryBarrierWithGroupSync();"), "{code}");
    }

    #[test]
    fn textures_use_methods() {
        let code = hlsl(indoc! {"
            @group(0) @binding(0) var image: texture_2d<f32>;
            @group(0) @binding(1) var smp: sampler;

            @fragment
            fn main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
                let size = textureDimensions(image);
                return textureSample(image, smp, uv) + textureLoad(image, vec2<i32>(0, 0), 0) * f32(size.x);
            }
        "});

        assert!(code.contains("Texture2D<float4> image : register(t0, space0);"), "{code}");
        assert!(code.contains("SamplerState smp : register(s1, space0);"), "{code}");
        assert!(code.contains("image.Sample(smp, uv)"), "{code}");
        assert!(code.contains("image.GetDimensions(0u, tmp_0, tmp_1, tmp_2);"), "{code}");
        assert!(code.contains("float4 result : SV_Target0;"), "{code}");
    }

    #[test]
    fn reserved_names_are_escaped() {
        let code = hlsl("@compute @workgroup_size(1) fn main() { var float4 = 1.0; let linear = float4 * 2.0; }\n");

        assert!(code.contains("float float4_ = 1.0f;"), "{code}");
        assert!(code.contains("const float linear_ = float4_ * 2.0f;"), "{code}");
    }
}

//! GLSL 4.50 for OpenGL.
//!
//! A GLSL program holds a single entry point, written as `void main()` with
//! its interface in `in`/`out` globals. Textures and samplers are combined:
//! sampler variables disappear and textures become `sampler2D` and friends.

use hashbrown::HashSet;
use once_cell::sync::Lazy;

use crate::{
    backend::{
        BackendError, CodeGenerator, Target,
        c_like::{self, BuiltinCall, Dialect, EntryPoint, IoField, Result, Writer},
    },
    frontend::{
        ast::{BinaryOperatorClass, BinaryOperatorKind, DeclarationId, PipelineStage},
        lexer::Span,
    },
    middle::{
        builtin::{BuiltinFunction, BuiltinValue},
        interface::{InterpolationKind, InterpolationSampling, IoKind},
        ir,
        program::{GlobalInfo, GlobalKind, Program},
        ty::{
            AccessMode, AddressSpace, ArraySize, SamplerKind, ScalarKind, TexelFormat, TextureDimension, TextureKind,
            TypeId, TypeKind,
        },
    },
};

static RESERVED: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "active", "asm", "atomic_uint", "attribute", "barrier", "bitCount", "bitfieldReverse", "bool", "break",
        "buffer", "bvec2", "bvec3", "bvec4", "case", "cast", "centroid", "class", "coherent", "common", "const",
        "continue", "dFdx", "dFdy", "default", "discard", "dmat2", "dmat3", "dmat4", "do", "double", "dvec2", "dvec3",
        "dvec4", "else", "enum", "equal", "extern", "external", "false", "filter", "fixed", "flat", "float",
        "floatBitsToInt", "floatBitsToUint", "for", "fvec2", "fvec3", "fvec4", "goto", "greaterThan",
        "greaterThanEqual", "half", "highp", "hvec2", "hvec3", "hvec4", "if", "iimage2D", "image1D", "image2D",
        "image2DArray", "image3D", "imageLoad", "imageSize", "imageStore", "in", "inline", "inout", "input", "int",
        "intBitsToFloat", "interface", "invariant", "inversesqrt", "isampler2D", "ivec2", "ivec3", "ivec4", "layout",
        "lessThan", "lessThanEqual", "long", "lowp", "main", "mat2", "mat2x2", "mat2x3", "mat2x4", "mat3", "mat3x2",
        "mat3x3", "mat3x4", "mat4", "mat4x2", "mat4x3", "mat4x4", "mediump", "memoryBarrierBuffer", "namespace",
        "noinline", "noperspective", "not", "notEqual", "out", "output", "packed", "partition", "patch", "precise",
        "precision", "public", "readonly", "resource", "restrict", "return", "roundEven", "sample", "sampler",
        "sampler1D", "sampler2D", "sampler2DArray", "sampler2DMS", "sampler3D", "samplerCube", "samplerCubeArray",
        "shared", "short", "sizeof", "smooth", "static", "struct", "subroutine", "superp", "switch", "template",
        "texelFetch", "texture", "textureLod", "textureSize", "this", "true", "typedef", "uimage2D", "uint",
        "uintBitsToFloat", "uniform", "union", "unsigned", "usampler2D", "using", "uvec2", "uvec3", "uvec4", "varying",
        "vec2", "vec3", "vec4", "void", "volatile", "while", "writeonly",
    ]
    .into_iter()
    .collect()
});

struct Glsl;

impl Glsl {
    fn binding(global: &GlobalInfo) -> u32 {
        global.binding.unwrap_or_default().binding
    }

    /// Storage buffers holding a struct that ends in a runtime-sized array
    /// declare the struct's members directly in the block
    fn flattened_block(w: &Writer, global: &GlobalInfo) -> bool {
        matches!(w.types.get(global.ty), TypeKind::Struct(_)) && w.types.has_runtime_size(global.ty)
    }

    fn texel_format(format: TexelFormat, span: Span) -> Result<&'static str> {
        Ok(match format {
            TexelFormat::Rgba8Unorm => "rgba8",
            TexelFormat::Rgba8Snorm => "rgba8_snorm",
            TexelFormat::Rgba8Uint => "rgba8ui",
            TexelFormat::Rgba8Sint => "rgba8i",
            TexelFormat::Rgba16Uint => "rgba16ui",
            TexelFormat::Rgba16Sint => "rgba16i",
            TexelFormat::Rgba16Float => "rgba16f",
            TexelFormat::R32Uint => "r32ui",
            TexelFormat::R32Sint => "r32i",
            TexelFormat::R32Float => "r32f",
            TexelFormat::Rg32Uint => "rg32ui",
            TexelFormat::Rg32Sint => "rg32i",
            TexelFormat::Rg32Float => "rg32f",
            TexelFormat::Rgba32Uint => "rgba32ui",
            TexelFormat::Rgba32Sint => "rgba32i",
            TexelFormat::Rgba32Float => "rgba32f",
            TexelFormat::Bgra8Unorm => {
                return Err(BackendError::unsupported(Target::Opengl, "the bgra8unorm texel format", span));
            }
        })
    }

    fn prefix(scalar: ScalarKind) -> &'static str {
        match scalar {
            ScalarKind::I32 => "i",
            ScalarKind::U32 => "u",
            _ => "",
        }
    }

    fn interpolation(field: &IoField) -> String {
        let Some(interpolation) = field.binding.interpolation else {
            return String::new();
        };

        let kind = match interpolation.kind {
            InterpolationKind::Flat => "flat ",
            InterpolationKind::Linear => "noperspective ",
            InterpolationKind::Perspective => "",
        };
        let sampling = match interpolation.sampling {
            Some(InterpolationSampling::Centroid) => "centroid ",
            Some(InterpolationSampling::Sample) => "sample ",
            Some(InterpolationSampling::Center) | None => "",
        };

        format!("{kind}{sampling}")
    }

    /// Reads a builtin input, converted to its WGSL type
    fn builtin_input(builtin: BuiltinValue) -> Result<&'static str> {
        Ok(match builtin {
            BuiltinValue::Position => "gl_FragCoord",
            BuiltinValue::VertexIndex => "uint(gl_VertexID)",
            BuiltinValue::InstanceIndex => "uint(gl_InstanceID)",
            BuiltinValue::FrontFacing => "gl_FrontFacing",
            BuiltinValue::SampleIndex => "uint(gl_SampleID)",
            BuiltinValue::SampleMask => "uint(gl_SampleMaskIn[0])",
            BuiltinValue::LocalInvocationId => "gl_LocalInvocationID",
            BuiltinValue::LocalInvocationIndex => "gl_LocalInvocationIndex",
            BuiltinValue::GlobalInvocationId => "gl_GlobalInvocationID",
            BuiltinValue::WorkgroupId => "gl_WorkGroupID",
            BuiltinValue::NumWorkgroups => "gl_NumWorkGroups",
            BuiltinValue::FragDepth => {
                return Err(BackendError::internal(Target::Opengl, "frag_depth is an output"));
            }
        })
    }

    fn texture_call(&self, w: &mut Writer, call: &BuiltinCall) -> Result<String> {
        let (dimension, kind) = w.texture_of(call)?;
        let arguments = call
            .arguments
            .iter()
            .map(|argument| c_like::unwrap_parens(argument).to_string())
            .collect::<Vec<_>>();
        let texture = &call.arguments[0];

        let size = usize::from(dimension.coordinates());
        let layers = usize::from(dimension.is_arrayed());
        let integer_vector = |size: usize| if size == 1 { "int".to_string() } else { format!("ivec{size}") };
        let float_vector = |size: usize| if size == 1 { "float".to_string() } else { format!("vec{size}") };

        let coordinates = |text: &str, kind: &dyn Fn(usize) -> String, zero: &str| {
            if layers == 1 {
                format!("{}({}({text}), {zero})", kind(size + 1), kind(size))
            } else if zero == "0" {
                format!("{}({text})", kind(size))
            } else {
                text.to_string()
            }
        };

        let depth = matches!(kind, TextureKind::Depth { .. });
        let component = |text: String| if depth { format!("{text}.x") } else { text };

        Ok(match call.function {
            BuiltinFunction::TextureSample => {
                component(format!("texture({texture}, {})", coordinates(&arguments[2], &float_vector, "0.0")))
            }
            BuiltinFunction::TextureSampleLevel => component(format!(
                "textureLod({texture}, {}, {})",
                coordinates(&arguments[2], &float_vector, "0.0"),
                arguments[3]
            )),
            BuiltinFunction::TextureLoad => match kind {
                TextureKind::Storage { .. } => {
                    format!("imageLoad({texture}, {})", coordinates(&arguments[1], &integer_vector, "0"))
                }
                _ => component(format!(
                    "texelFetch({texture}, {}, int({}))",
                    coordinates(&arguments[1], &integer_vector, "0"),
                    arguments[2]
                )),
            },
            BuiltinFunction::TextureStore => format!(
                "imageStore({texture}, {}, {})",
                coordinates(&arguments[1], &integer_vector, "0"),
                arguments[2]
            ),
            BuiltinFunction::TextureDimensions => {
                let query = match kind {
                    TextureKind::Storage { .. } => format!("imageSize({texture})"),
                    TextureKind::Sampled { multisampled: true, .. } | TextureKind::Depth { multisampled: true } => {
                        format!("textureSize({texture})")
                    }
                    _ => {
                        let level = arguments.get(1).map_or("0".to_string(), |level| format!("int({level})"));
                        format!("textureSize({texture}, {level})")
                    }
                };

                let result = call.result.and_then(|ty| w.shape(ty)).map_or(1, |(size, _)| size);
                let swizzle = if layers == 1 { ".xy" } else { "" };

                match result {
                    1 => format!("uint({query})"),
                    result => format!("uvec{result}({query}{swizzle})"),
                }
            }
            _ => return Err(BackendError::internal(self.target(), "not a texture builtin")),
        })
    }

    fn atomic(&self, w: &mut Writer, call: &BuiltinCall) -> Result<String> {
        let pointer = c_like::unwrap_parens(&call.arguments[0]).to_string();
        let value = call.arguments.get(1).map(|value| c_like::unwrap_parens(value).to_string());

        let zero = || match call.result.and_then(|ty| w.types.element_scalar(ty)) {
            Some(ScalarKind::I32) => "0",
            _ => "0u",
        };

        let (function, value) = match (call.function, value) {
            (BuiltinFunction::AtomicLoad, _) => ("atomicOr", zero().to_string()),
            (BuiltinFunction::AtomicStore, Some(value)) => ("atomicExchange", value),
            (BuiltinFunction::AtomicExchange, Some(value)) => ("atomicExchange", value),
            (BuiltinFunction::AtomicAdd, Some(value)) => ("atomicAdd", value),
            (BuiltinFunction::AtomicSub, Some(value)) => ("atomicAdd", format!("-({value})")),
            (BuiltinFunction::AtomicAnd, Some(value)) => ("atomicAnd", value),
            (BuiltinFunction::AtomicOr, Some(value)) => ("atomicOr", value),
            (BuiltinFunction::AtomicXor, Some(value)) => ("atomicXor", value),
            (BuiltinFunction::AtomicMax, Some(value)) => ("atomicMax", value),
            (BuiltinFunction::AtomicMin, Some(value)) => ("atomicMin", value),
            _ => return Err(BackendError::internal(self.target(), "malformed atomic call")),
        };

        Ok(format!("{function}({pointer}, {value})"))
    }
}

impl Dialect for Glsl {
    fn target(&self) -> Target {
        Target::Opengl
    }

    fn header(&self) -> &'static str {
        "#version 450\n\n"
    }

    fn is_reserved(&self, name: &str) -> bool {
        name.starts_with("gl_")
            || name.contains("__")
            || RESERVED.contains(name)
            || BuiltinFunction::from_name(name).is_some()
    }

    fn scalar(&self, scalar: ScalarKind) -> Result<&'static str> {
        match scalar {
            ScalarKind::Bool => Ok("bool"),
            ScalarKind::I32 => Ok("int"),
            ScalarKind::U32 => Ok("uint"),
            ScalarKind::F32 => Ok("float"),
            ScalarKind::F16 => Err(BackendError::F16 {
                target: self.target(),
                span: Span::default(),
            }),
            _ => Err(BackendError::internal(self.target(), format!("abstract type {scalar}"))),
        }
    }

    fn vector(&self, size: u8, scalar: ScalarKind) -> Result<String> {
        let prefix = match scalar {
            ScalarKind::Bool => "b",
            ScalarKind::I32 => "i",
            ScalarKind::U32 => "u",
            ScalarKind::F32 => "",
            _ => {
                self.scalar(scalar)?;
                ""
            }
        };

        Ok(format!("{prefix}vec{size}"))
    }

    fn matrix(&self, columns: u8, rows: u8, scalar: ScalarKind) -> Result<String> {
        self.scalar(scalar)?;
        Ok(format!("mat{columns}x{rows}"))
    }

    fn array(&self, _: &mut Writer, _: TypeId, element: &str, count: u32) -> Result<String> {
        // The outermost dimension comes first: float[3][2] is 3 arrays of 2
        Ok(match element.find('[') {
            Some(index) => format!("{}[{count}]{}", &element[..index], &element[index..]),
            None => format!("{element}[{count}]"),
        })
    }

    fn texture(&self, dimension: TextureDimension, kind: TextureKind) -> Result<String> {
        let suffix = match dimension {
            TextureDimension::D1 => "1D",
            TextureDimension::D2 => "2D",
            TextureDimension::D2Array => "2DArray",
            TextureDimension::D3 => "3D",
            TextureDimension::Cube => "Cube",
            TextureDimension::CubeArray => "CubeArray",
        };

        Ok(match kind {
            TextureKind::Sampled { sampled, multisampled } => {
                let suffix = if multisampled { "2DMS" } else { suffix };
                format!("{}sampler{suffix}", Self::prefix(sampled.concretize()))
            }
            TextureKind::Depth { multisampled } => {
                let suffix = if multisampled { "2DMS" } else { suffix };
                format!("sampler{suffix}")
            }
            TextureKind::Storage { format, .. } => format!("{}image{suffix}", Self::prefix(format.channel_type())),
        })
    }

    fn sampler(&self, _: SamplerKind) -> &'static str {
        "sampler"
    }

    fn defines_struct(&self, w: &Writer, ty: TypeId) -> bool {
        !w.types.has_runtime_size(ty)
    }

    fn constant_qualifier(&self) -> &'static str {
        "const"
    }

    fn module_variable(&self, w: &mut Writer, id: DeclarationId, global: &GlobalInfo) -> Result<()> {
        let GlobalKind::Var { space, access } = global.kind else {
            return Ok(());
        };

        let name = w.global_name(id);
        let span = w.program.declaration_span(id);
        let binding = Self::binding(global);

        match space {
            AddressSpace::Uniform | AddressSpace::Storage => {
                let (layout, kind) = match space {
                    AddressSpace::Uniform => ("std140", "uniform"),
                    _ if access == AccessMode::Read => ("std430", "readonly buffer"),
                    _ => ("std430", "buffer"),
                };

                let mut members = Vec::new();

                match w.types.get(global.ty).clone() {
                    TypeKind::Struct(structure) if Self::flattened_block(w, global) => {
                        for member in &structure.members {
                            let member_name = w.escape(&member.name);
                            members.push(match w.types.get(member.ty).clone() {
                                TypeKind::Array {
                                    element,
                                    size: ArraySize::Runtime,
                                } => {
                                    let element = w.type_name(element)?;
                                    w.runtime_array_member(&element, &member_name)
                                }
                                _ => w.declare(member.ty, &member_name)?,
                            });
                        }
                    }
                    TypeKind::Array {
                        element,
                        size: ArraySize::Runtime,
                    } => {
                        let element = w.type_name(element)?;
                        members.push(w.runtime_array_member(&element, "inner"));
                    }
                    _ => members.push(w.declare(global.ty, "inner")?),
                }

                w.line(format!("layout(binding = {binding}, {layout}) {kind} {name}_block {{"));
                for member in members {
                    w.line(format!("  {member};"));
                }
                w.line(format!("}} {name};"));
            }
            AddressSpace::Handle => match *w.types.get(global.ty) {
                TypeKind::Sampler(_) => {}
                TypeKind::Texture {
                    kind: TextureKind::Storage { format, access },
                    ..
                } => {
                    let format = Self::texel_format(format, span)?;
                    let qualifier = match access {
                        AccessMode::Read => "readonly ",
                        AccessMode::Write => "writeonly ",
                        AccessMode::ReadWrite => "",
                    };
                    let ty = w.type_name(global.ty)?;
                    w.line(format!("layout(binding = {binding}, {format}) uniform {qualifier}{ty} {name};"));
                }
                _ => {
                    let ty = w.type_name(global.ty)?;
                    w.line(format!("layout(binding = {binding}) uniform {ty} {name};"));
                }
            },
            AddressSpace::Private => {
                let declaration = w.declare(global.ty, &name)?;
                let initializer = match w.program.module.declaration(id).as_variable().and_then(|v| v.initializer) {
                    Some(initializer) => w.expression(initializer)?,
                    None => self.zero_value(w, global.ty)?,
                };

                w.line(format!("{declaration} = {};", c_like::unwrap_parens(&initializer)));
            }
            AddressSpace::Workgroup => {
                let declaration = w.declare(global.ty, &name)?;
                w.line(format!("shared {declaration};"));
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
            Some(AddressSpace::Uniform | AddressSpace::Storage) if !Self::flattened_block(w, global) => {
                format!("{name}.inner")
            }
            _ => name,
        }
    }

    fn combined_samplers(&self) -> bool {
        true
    }

    fn pointer_parameter(&self, _: AddressSpace, pointee: &str, name: &str) -> String {
        format!("inout {pointee} {name}")
    }

    fn bitcast(&self, w: &mut Writer, from: TypeId, to: TypeId, value: String) -> Result<String> {
        if from == to {
            return Ok(value);
        }

        let (Some((size, from_scalar)), Some((_, to_scalar))) = (w.shape(from), w.shape(to)) else {
            return Err(BackendError::internal(self.target(), "bitcast of a non-numeric type"));
        };

        let function = match (from_scalar, to_scalar) {
            (ScalarKind::F32, ScalarKind::I32) => "floatBitsToInt".to_string(),
            (ScalarKind::F32, ScalarKind::U32) => "floatBitsToUint".to_string(),
            (ScalarKind::I32, ScalarKind::F32) => "intBitsToFloat".to_string(),
            (ScalarKind::U32, ScalarKind::F32) => "uintBitsToFloat".to_string(),
            _ if size == 1 => w.type_name(to)?,
            _ => self.vector(size, to_scalar)?,
        };

        Ok(format!("{function}({value})"))
    }

    fn binary(
        &self,
        w: &mut Writer,
        operator: BinaryOperatorKind,
        [lhs_type, rhs_type]: [TypeId; 2],
        [lhs, rhs]: [&str; 2],
    ) -> Result<Option<String>> {
        let float = w.types.element_scalar(lhs_type).is_some_and(ScalarKind::is_float);
        let vector = matches!(w.types.get(lhs_type), TypeKind::Vector { .. })
            && matches!(w.types.get(rhs_type), TypeKind::Vector { .. });

        if operator.class() == BinaryOperatorClass::Comparison && vector {
            let function = match operator {
                BinaryOperatorKind::Equals => "equal",
                BinaryOperatorKind::NotEquals => "notEqual",
                BinaryOperatorKind::LessThan => "lessThan",
                BinaryOperatorKind::LessThanOrEqualTo => "lessThanEqual",
                BinaryOperatorKind::GreaterThan => "greaterThan",
                _ => "greaterThanEqual",
            };

            return Ok(Some(Writer::call_text(function, &[lhs.to_string(), rhs.to_string()])));
        }

        Ok(match operator {
            BinaryOperatorKind::Modulus if float => Some(format!("({lhs} - {rhs} * trunc({lhs} / {rhs}))")),
            BinaryOperatorKind::ShiftLeft | BinaryOperatorKind::ShiftRight => {
                Some(format!("({lhs} {operator} ({rhs} & 31u))"))
            }
            _ => None,
        })
    }

    fn logical_not(&self, w: &Writer, ty: TypeId, operand: &str) -> String {
        match w.types.get(ty) {
            TypeKind::Vector { .. } => format!("not({})", c_like::unwrap_parens(operand)),
            _ => format!("(!{operand})"),
        }
    }

    fn builtin(&self, w: &mut Writer, call: &BuiltinCall) -> Result<String> {
        use BuiltinFunction::*;

        let arguments = &call.arguments;
        let rename = |name: &str| Writer::call_text(name, arguments);
        let unsigned = call.result.and_then(|ty| w.types.element_scalar(ty)) == Some(ScalarKind::U32);

        Ok(match call.function {
            Dpdx => rename("dFdx"),
            Dpdy => rename("dFdy"),
            InverseSqrt => rename("inversesqrt"),
            Round => rename("roundEven"),
            Atan2 => rename("atan"),
            ReverseBits => rename("bitfieldReverse"),
            CountOneBits if unsigned => {
                let ty = call.result.map(|ty| w.type_name(ty)).transpose()?.unwrap_or_default();
                format!("{ty}({})", rename("bitCount"))
            }
            CountOneBits => rename("bitCount"),
            Select => {
                let [f, t, condition] = arguments.as_slice() else {
                    return Err(BackendError::internal(self.target(), "'select' expects three arguments"));
                };

                match call.types.get(2).map(|ty| w.types.get(*ty)) {
                    Some(TypeKind::Vector { .. }) => Writer::call_text("mix", &[f.clone(), t.clone(), condition.clone()]),
                    _ => format!("({condition} ? {t} : {f})"),
                }
            }
            Dot if call.types.first().and_then(|ty| w.types.element_scalar(*ty)).is_some_and(ScalarKind::is_integer) => {
                w.integer_dot(call)?
            }
            ArrayLength => format!("uint({}.length())", arguments[0]),
            WorkgroupBarrier => "barrier()".to_string(),
            StorageBarrier => {
                w.hoist("memoryBarrierBuffer();");
                "barrier()".to_string()
            }
            TextureSample | TextureSampleLevel | TextureLoad | TextureStore | TextureDimensions => {
                self.texture_call(w, call)?
            }
            function if function.is_atomic() => self.atomic(w, call)?,
            function => rename(function.name()),
        })
    }

    fn entry_point(&self, w: &mut Writer, entry: &EntryPoint) -> Result<()> {
        let stage = entry.stage;
        let inputs = w.input_fields(entry);
        let outputs = w.output_fields(entry, "result");

        for field in &inputs {
            let IoKind::Location(location) = field.binding.kind else {
                continue;
            };

            let interpolation = if stage == PipelineStage::Fragment {
                Self::interpolation(field)
            } else {
                String::new()
            };
            let declaration = w.declare(field.binding.ty, &format!("in_{}", field.name))?;
            w.line(format!("layout(location = {location}) {interpolation}in {declaration};"));
        }

        for field in &outputs {
            match field.binding.kind {
                IoKind::Location(location) => {
                    let interpolation = if stage == PipelineStage::Vertex {
                        Self::interpolation(field)
                    } else {
                        String::new()
                    };
                    let declaration = w.declare(field.binding.ty, &format!("out_{}", field.name))?;
                    w.line(format!("layout(location = {location}) {interpolation}out {declaration};"));
                }
                IoKind::Builtin(BuiltinValue::Position) if field.binding.invariant => w.line("invariant gl_Position;"),
                IoKind::Builtin(_) => {}
            }
        }

        if stage == PipelineStage::Compute {
            let [x, y, z] = entry.workgroup_size;
            w.line(format!("layout(local_size_x = {x}, local_size_y = {y}, local_size_z = {z}) in;"));
        }

        w.blank_line();
        w.line("void main() {");
        w.indent();

        if stage == PipelineStage::Compute {
            w.write_workgroup_init(entry, "gl_LocalInvocationIndex", "barrier()")?;
        }

        for field in &inputs {
            if let IoKind::Builtin(builtin) = field.binding.kind {
                Self::builtin_input(builtin)?;
            }
        }

        let call = w.call_inner(entry, &|_, field| match field.binding.kind {
            IoKind::Location(_) => format!("in_{}", field.name),
            IoKind::Builtin(builtin) => Self::builtin_input(builtin).map(str::to_string).unwrap_or_default(),
        })?;

        match entry.return_type {
            Some(ty) if !outputs.is_empty() => {
                let declaration = w.declare(ty, "result")?;
                w.flush_line(format!("{declaration} = {call};"));

                for field in &outputs {
                    let source = &field.source;

                    match field.binding.kind {
                        IoKind::Location(_) => w.line(format!("out_{} = {source};", field.name)),
                        IoKind::Builtin(BuiltinValue::Position) => {
                            w.line(format!("gl_Position = {source};"));
                            // Clip space depth is [0, 1] in WGSL and [-1, 1] in OpenGL
                            w.line("gl_Position.z = 2.0 * gl_Position.z - gl_Position.w;");
                        }
                        IoKind::Builtin(BuiltinValue::FragDepth) => w.line(format!("gl_FragDepth = {source};")),
                        IoKind::Builtin(BuiltinValue::SampleMask) => {
                            w.line(format!("gl_SampleMask[0] = int({source});"));
                        }
                        IoKind::Builtin(builtin) => {
                            return Err(BackendError::internal(
                                self.target(),
                                format!("{builtin} is not an output"),
                            ));
                        }
                    }
                }
            }
            _ => w.flush_line(format!("{call};")),
        }

        w.dedent();
        w.line("}");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct GlslGenerator;

impl CodeGenerator for GlslGenerator {
    fn generate(&self, program: &Program, _: &ir::Module) -> std::result::Result<String, BackendError> {
        let mut entry_points = program.entry_points();

        if let (Some(_), Some((second, _, _))) = (entry_points.next(), entry_points.next()) {
            return Err(BackendError::unsupported(
                Target::Opengl,
                "more than one entry point per program",
                program.declaration_span(second),
            ));
        }

        c_like::generate(program, &Glsl)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::backend::c_like::tests::legalized;

    fn glsl(source: &str) -> String {
        let program = legalized(source, Target::Opengl);
        GlslGenerator.generate(&program, &ir::Module::default()).unwrap()
    }

    #[test]
    fn nested_arrays_keep_their_order() {
        let code = glsl(indoc! {"
            var<private> grid: array<array<f32, 2>, 3>;

            @compute @workgroup_size(1)
            fn main() {
                grid[2][1] = 1.0;
            }
        "});

        assert!(code.contains("float[3][2] grid = float[3][2]("), "{code}");
        assert!(code.contains("grid[2][1] = 1.0f;"), "{code}");
    }

    #[test]
    fn vertex_shaders_write_gl_position() {
        let code = glsl(indoc! {"
            struct VertexOutput {
                @builtin(position) position: vec4<f32>,
                @location(0) color: vec3<f32>,
            }

            @vertex
            fn main(@location(0) position: vec3<f32>, @builtin(vertex_index) index: u32) -> VertexOutput {
                var output: VertexOutput;
                output.position = vec4<f32>(position, f32(index));
                output.color = position * 0.5;
                return output;
            }
        "});

        assert!(code.starts_with("#version 450\n"), "{code}");
        assert!(code.contains("struct VertexOutput {\n  vec4 position;\n  vec3 color;\n};"), "{code}");
        assert!(code.contains("layout(location = 0) in vec3 in_position;"), "{code}");
        assert!(code.contains("layout(location = 0) out vec3 out_result_color;"), "{code}");
        assert!(code.contains("VertexOutput result = main_inner(in_position, uint(gl_VertexID));"), "{code}");
        assert!(code.contains("gl_Position = result.position;"), "{code}");
        assert!(code.contains("gl_Position.z = 2.0 * gl_Position.z - gl_Position.w;"), "{code}");
        assert!(code.contains("out_result_color = result.color;"), "{code}");
    }

    #[test]
    fn buffers_become_blocks() {
        let code = glsl(indoc! {"
            struct Particles {
                count: u32,
                positions: array<vec4<f32>>,
            }

            @group(0) @binding(0) var<storage, read_write> particles: Particles;
            @group(1) @binding(0) var<uniform> gravity: vec4<f32>;

            @compute @workgroup_size(64)
            fn main(@builtin(global_invocation_id) id: vec3<u32>) {
                if id.x < arrayLength(&particles.positions) {
                    particles.positions[id.x] += gravity;
                }
            }
        "});

        assert!(
            code.contains("layout(binding = 0, std430) buffer particles_block {\n  uint count;\n  vec4 positions[];\n} particles;"),
            "{code}"
        );
        assert!(
            code.contains("layout(binding = 1, std140) uniform gravity_block {\n  vec4 inner;\n} gravity;"),
            "{code}"
        );
        assert!(!code.contains("struct Particles"), "{code}");
        assert!(code.contains("if (id.x < uint(particles.positions.length())) {"), "{code}");
        assert!(code.contains("particles.positions[id.x] += gravity.inner;"), "{code}");
        assert!(code.contains("layout(local_size_x = 64, local_size_y = 1, local_size_z = 1) in;"), "{code}");
        assert!(code.contains("main_inner(gl_GlobalInvocationID);"), "{code}");
    }

    #[test]
    fn textures_and_samplers_are_combined() {
        let code = glsl(indoc! {"
            @group(0) @binding(0) var image: texture_2d<f32>;
            @group(0) @binding(1) var smp: sampler;

            fn fetch(t: texture_2d<f32>, s: sampler, uv: vec2<f32>) -> vec4<f32> {
                return textureSample(t, s, uv);
            }

            @fragment
            fn main(@location(0) @interpolate(flat) uv: vec2<f32>) -> @location(0) vec4<f32> {
                return fetch(image, smp, uv);
            }
        "});

        assert!(code.contains("layout(binding = 0) uniform sampler2D image;"), "{code}");
        assert!(!code.contains("smp"), "{code}");
        assert!(code.contains("vec4 fetch(sampler2D t, vec2 uv) {"), "{code}");
        assert!(code.contains("return texture(t, uv);"), "{code}");
        assert!(code.contains("return fetch(image, uv);"), "{code}");
        assert!(code.contains("layout(location = 0) flat in vec2 in_uv;"), "{code}");
        assert!(code.contains("layout(location = 0) out vec4 out_result;"), "{code}");
    }

    #[test]
    fn vector_comparisons_use_functions() {
        let code = glsl(indoc! {"
            @fragment
            fn main(@location(0) a: vec2<f32>) -> @location(0) vec4<f32> {
                let mask = a < vec2<f32>(0.5);
                return select(vec4<f32>(0.0), vec4<f32>(1.0), all(mask));
            }
        "});

        assert!(code.contains("const bvec2 mask = lessThan(a, vec2(0.5f, 0.5f));"), "{code}");
        assert!(code.contains("all(mask) ?"), "{code}");
    }

    #[test]
    fn only_one_entry_point_is_allowed() {
        let program = legalized(
            "@compute @workgroup_size(1) fn a() {}\n@compute @workgroup_size(1) fn b() {}\n",
            Target::Opengl,
        );

        let error = GlslGenerator.generate(&program, &ir::Module::default()).unwrap_err();
        assert_eq!(error.to_string(), "opengl cannot express more than one entry point per program");
    }
}

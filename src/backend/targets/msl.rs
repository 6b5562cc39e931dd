//! Metal Shading Language 2.1.
//!
//! Metal has no module-scope variables besides constants. Resources and
//! private or workgroup variables are declared by the entry point wrappers
//! and passed by reference to every function that uses them.

use hashbrown::HashSet;
use once_cell::sync::Lazy;

use crate::{
    backend::{
        BackendError, CodeGenerator, Target,
        c_like::{self, BuiltinCall, Dialect, EntryPoint, IoField, Result, Writer, escape},
    },
    frontend::ast::{BinaryOperatorKind, DeclarationId, PipelineStage},
    middle::{
        builtin::{BuiltinFunction, BuiltinValue},
        constant::Scalar,
        interface::{InterpolationKind, InterpolationSampling, IoKind},
        ir,
        program::{GlobalInfo, GlobalKind, Program},
        ty::{
            AccessMode, AddressSpace, ArraySize, SamplerKind, ScalarKind, TextureDimension, TextureKind, TypeId,
            TypeKind,
        },
    },
};

static RESERVED: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "access", "alignas", "alignof", "and", "array", "as_type", "asm", "atomic_int", "atomic_uint", "auto", "bool",
        "break", "case", "catch", "char", "class", "const", "const_cast", "constant", "constexpr", "continue",
        "decltype", "default", "delete", "device", "dfdx", "dfdy", "discard_fragment", "do", "double", "dynamic_cast",
        "else", "enum", "explicit", "export", "extern", "false", "float", "fmod", "for", "fragment", "friend", "goto",
        "half", "if", "inline", "int", "kernel", "long", "main", "mem_flags", "metal", "mutable", "namespace", "new",
        "noexcept", "not", "nullptr", "operator", "or", "popcount", "private", "protected", "public", "register",
        "reverse_bits", "rint", "rsqrt", "sampler", "short", "signed", "sizeof", "static", "static_assert",
        "static_cast", "struct", "switch", "template", "texture", "this", "thread", "thread_local", "threadgroup",
        "threadgroup_barrier", "throw", "true", "try", "typedef", "typeid", "typename", "uint", "union", "unsigned",
        "using", "vertex", "virtual", "void", "volatile", "wchar_t", "while", "xor",
    ]
    .into_iter()
    .collect()
});

/// The name of the function Metal exports for an entry point
pub(crate) fn entry_point_function(name: &str) -> String {
    escape(&Msl, name)
}

struct Msl;

impl Msl {
    fn buffer_parameter(&self, w: &mut Writer, name: &str, global: &GlobalInfo) -> Result<String> {
        let GlobalKind::Var { space, access } = global.kind else {
            return Err(BackendError::internal(self.target(), "buffer parameter for a constant"));
        };

        let qualifier = match space {
            AddressSpace::Uniform => "constant",
            AddressSpace::Storage if access.can_write() => "device",
            AddressSpace::Storage => "const device",
            AddressSpace::Private => "thread",
            AddressSpace::Workgroup => "threadgroup",
            AddressSpace::Handle | AddressSpace::Function => {
                let ty = w.type_name(global.ty)?;
                return Ok(format!("{ty} {name}"));
            }
        };

        match w.types.get(global.ty).clone() {
            TypeKind::Array {
                element,
                size: ArraySize::Runtime,
            } => Ok(format!("{qualifier} {}* {name}", w.type_name(element)?)),
            _ => Ok(format!("{qualifier} {}& {name}", w.type_name(global.ty)?)),
        }
    }

    fn input_attribute(field: &IoField, stage: PipelineStage) -> Option<String> {
        let IoKind::Location(location) = field.binding.kind else {
            return match field.binding.kind {
                IoKind::Builtin(BuiltinValue::Position) => Some("position".to_string()),
                _ => None,
            };
        };

        if stage == PipelineStage::Vertex {
            return Some(format!("attribute({location})"));
        }

        let mut attribute = format!("user(locn{location})");

        if let Some(interpolation) = field.binding.interpolation {
            let sampling = match interpolation.sampling {
                Some(InterpolationSampling::Center) | None => "center",
                Some(InterpolationSampling::Centroid) => "centroid",
                Some(InterpolationSampling::Sample) => "sample",
            };

            match interpolation.kind {
                InterpolationKind::Flat => attribute.push_str(", flat"),
                InterpolationKind::Linear => attribute.push_str(&format!(", {sampling}_no_perspective")),
                InterpolationKind::Perspective => attribute.push_str(&format!(", {sampling}_perspective")),
            }
        }

        Some(attribute)
    }

    fn builtin_attribute(builtin: BuiltinValue) -> &'static str {
        match builtin {
            BuiltinValue::Position => "position",
            BuiltinValue::VertexIndex => "vertex_id",
            BuiltinValue::InstanceIndex => "instance_id",
            BuiltinValue::FrontFacing => "front_facing",
            BuiltinValue::FragDepth => "depth(any)",
            BuiltinValue::SampleIndex => "sample_id",
            BuiltinValue::SampleMask => "sample_mask",
            BuiltinValue::LocalInvocationId => "thread_position_in_threadgroup",
            BuiltinValue::LocalInvocationIndex => "thread_index_in_threadgroup",
            BuiltinValue::GlobalInvocationId => "thread_position_in_grid",
            BuiltinValue::WorkgroupId => "threadgroup_position_in_grid",
            BuiltinValue::NumWorkgroups => "threadgroups_per_grid",
        }
    }

    fn output_attribute(field: &IoField, stage: PipelineStage) -> String {
        let attribute = match field.binding.kind {
            IoKind::Location(location) if stage == PipelineStage::Fragment => format!("color({location})"),
            IoKind::Location(location) => format!("user(locn{location})"),
            IoKind::Builtin(builtin) => Self::builtin_attribute(builtin).to_string(),
        };

        if field.binding.invariant {
            format!("{attribute}, invariant")
        } else {
            attribute
        }
    }

    fn texture_call(&self, w: &mut Writer, call: &BuiltinCall) -> Result<String> {
        let (dimension, kind) = w.texture_of(call)?;
        let arguments = call
            .arguments
            .iter()
            .map(|argument| c_like::unwrap_parens(argument).to_string())
            .collect::<Vec<_>>();
        let texture = &call.arguments[0];

        let coordinates = |text: &str| match dimension.coordinates() {
            1 => format!("uint({text})"),
            size => format!("uint{size}({text})"),
        };
        let layer = if dimension.is_arrayed() { ", 0" } else { "" };

        Ok(match call.function {
            BuiltinFunction::TextureSample => {
                format!("{texture}.sample({}, {}{layer})", arguments[1], arguments[2])
            }
            BuiltinFunction::TextureSampleLevel => {
                format!(
                    "{texture}.sample({}, {}{layer}, level({}))",
                    arguments[1], arguments[2], arguments[3]
                )
            }
            BuiltinFunction::TextureLoad => match kind {
                TextureKind::Storage { .. } => format!("{texture}.read({}{layer})", coordinates(&arguments[1])),
                _ if dimension == TextureDimension::D1 => format!("{texture}.read({})", coordinates(&arguments[1])),
                _ => format!(
                    "{texture}.read({}{layer}, uint({}))",
                    coordinates(&arguments[1]),
                    arguments[2]
                ),
            },
            BuiltinFunction::TextureStore => {
                format!("{texture}.write({}, {}{layer})", arguments[2], coordinates(&arguments[1]))
            }
            BuiltinFunction::TextureDimensions => {
                let level = match (kind, arguments.get(1)) {
                    (TextureKind::Storage { .. }, _)
                    | (TextureKind::Sampled { multisampled: true, .. }, _)
                    | (TextureKind::Depth { multisampled: true }, _) => String::new(),
                    _ if dimension == TextureDimension::D1 => String::new(),
                    (_, Some(level)) => format!("uint({level})"),
                    (_, None) => String::new(),
                };

                let size = call.result.and_then(|ty| w.shape(ty)).map_or(1, |(size, _)| size);
                let components = ["get_width", "get_height", "get_depth"]
                    .into_iter()
                    .take(usize::from(size))
                    .map(|query| format!("{texture}.{query}({level})"))
                    .collect::<Vec<_>>();

                match size {
                    1 => components.join(""),
                    _ => format!("uint{size}({})", components.join(", ")),
                }
            }
            _ => return Err(BackendError::internal(self.target(), "not a texture builtin")),
        })
    }

    fn atomic(&self, call: &BuiltinCall) -> Result<String> {
        let pointer = format!("&{}", call.arguments[0]);
        let value = call.arguments.get(1).map(|value| c_like::unwrap_parens(value));

        let operation = match call.function {
            BuiltinFunction::AtomicLoad => return Ok(format!("atomic_load_explicit({pointer}, memory_order_relaxed)")),
            BuiltinFunction::AtomicStore => "atomic_store_explicit",
            BuiltinFunction::AtomicExchange => "atomic_exchange_explicit",
            BuiltinFunction::AtomicAdd => "atomic_fetch_add_explicit",
            BuiltinFunction::AtomicSub => "atomic_fetch_sub_explicit",
            BuiltinFunction::AtomicAnd => "atomic_fetch_and_explicit",
            BuiltinFunction::AtomicOr => "atomic_fetch_or_explicit",
            BuiltinFunction::AtomicXor => "atomic_fetch_xor_explicit",
            BuiltinFunction::AtomicMax => "atomic_fetch_max_explicit",
            BuiltinFunction::AtomicMin => "atomic_fetch_min_explicit",
            _ => return Err(BackendError::internal(self.target(), "not an atomic builtin")),
        };

        let Some(value) = value else {
            return Err(BackendError::internal(self.target(), "atomic without an operand"));
        };

        Ok(format!("{operation}({pointer}, {value}, memory_order_relaxed)"))
    }
}

impl Dialect for Msl {
    fn target(&self) -> Target {
        Target::Metal
    }

    fn header(&self) -> &'static str {
        "#include <metal_stdlib>\n\nusing namespace metal;\n\n"
    }

    fn is_reserved(&self, name: &str) -> bool {
        let numeric = ["float", "half", "int", "uint", "bool"].into_iter().any(|scalar| {
            name.strip_prefix(scalar)
                .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|byte| matches!(byte, b'1'..=b'4' | b'x')))
        });

        numeric || RESERVED.contains(name) || BuiltinFunction::from_name(name).is_some()
    }

    fn scalar(&self, scalar: ScalarKind) -> Result<&'static str> {
        match scalar {
            ScalarKind::Bool => Ok("bool"),
            ScalarKind::I32 => Ok("int"),
            ScalarKind::U32 => Ok("uint"),
            ScalarKind::F32 => Ok("float"),
            ScalarKind::F16 => Ok("half"),
            _ => Err(BackendError::internal(self.target(), format!("abstract type {scalar}"))),
        }
    }

    fn vector(&self, size: u8, scalar: ScalarKind) -> Result<String> {
        Ok(format!("{}{size}", self.scalar(scalar)?))
    }

    fn matrix(&self, columns: u8, rows: u8, scalar: ScalarKind) -> Result<String> {
        Ok(format!("{}{columns}x{rows}", self.scalar(scalar)?))
    }

    fn array(&self, _: &mut Writer, _: TypeId, element: &str, count: u32) -> Result<String> {
        Ok(format!("array<{element}, {count}>"))
    }

    fn atomic(&self, scalar: ScalarKind) -> Result<String> {
        Ok(format!("atomic_{}", self.scalar(scalar)?))
    }

    fn texture(&self, dimension: TextureDimension, kind: TextureKind) -> Result<String> {
        let dimension = match dimension {
            TextureDimension::D1 => "1d",
            TextureDimension::D2 => "2d",
            TextureDimension::D2Array => "2d_array",
            TextureDimension::D3 => "3d",
            TextureDimension::Cube => "cube",
            TextureDimension::CubeArray => "cube_array",
        };

        Ok(match kind {
            TextureKind::Sampled {
                sampled,
                multisampled: false,
            } => format!("texture{dimension}<{}, access::sample>", self.scalar(sampled.concretize())?),
            TextureKind::Sampled {
                sampled,
                multisampled: true,
            } => format!("texture{dimension}_ms<{}, access::read>", self.scalar(sampled.concretize())?),
            TextureKind::Depth { multisampled: false } => format!("depth{dimension}<float, access::sample>"),
            TextureKind::Depth { multisampled: true } => format!("depth{dimension}_ms<float, access::read>"),
            TextureKind::Storage { format, access } => {
                let access = match access {
                    AccessMode::Read => "read",
                    AccessMode::Write => "write",
                    AccessMode::ReadWrite => "read_write",
                };

                format!("texture{dimension}<{}, access::{access}>", self.scalar(format.channel_type())?)
            }
        })
    }

    fn sampler(&self, _: SamplerKind) -> &'static str {
        "sampler"
    }

    fn constant_qualifier(&self) -> &'static str {
        "constant"
    }

    fn module_variable(&self, _: &mut Writer, _: DeclarationId, _: &GlobalInfo) -> Result<()> {
        Ok(())
    }

    fn globals_as_parameters(&self) -> bool {
        true
    }

    fn global_parameter(&self, w: &mut Writer, id: DeclarationId, global: &GlobalInfo) -> Result<String> {
        let name = w.global_name(id);
        self.buffer_parameter(w, &name, global)
    }

    fn pointer_parameter(&self, space: AddressSpace, pointee: &str, name: &str) -> String {
        let qualifier = match space {
            AddressSpace::Workgroup => "threadgroup",
            AddressSpace::Storage => "device",
            AddressSpace::Uniform => "constant",
            _ => "thread",
        };

        format!("{qualifier} {pointee}& {name}")
    }

    fn construct(&self, w: &mut Writer, ty: TypeId, arguments: Vec<String>) -> Result<String> {
        let arguments = arguments
            .iter()
            .map(|argument| c_like::unwrap_parens(argument).to_string())
            .collect::<Vec<_>>()
            .join(", ");

        Ok(match w.types.get(ty) {
            TypeKind::Array { .. } | TypeKind::Struct(_) => format!("{}{{{arguments}}}", w.type_name(ty)?),
            _ => format!("{}({arguments})", w.type_name(ty)?),
        })
    }

    fn zero_value(&self, w: &mut Writer, ty: TypeId) -> Result<String> {
        match w.types.get(ty) {
            TypeKind::Scalar(scalar) => w.scalar_literal(Scalar::zero(scalar.concretize())),
            _ => Ok(format!("{}{{}}", w.type_name(ty)?)),
        }
    }

    fn atomic_zero(&self, w: &mut Writer, lvalue: &str, scalar: ScalarKind) -> Result<String> {
        let zero = w.scalar_literal(Scalar::zero(scalar))?;
        Ok(format!("atomic_store_explicit(&{lvalue}, {zero}, memory_order_relaxed);"))
    }

    fn bitcast(&self, w: &mut Writer, from: TypeId, to: TypeId, value: String) -> Result<String> {
        if from == to {
            return Ok(value);
        }

        Ok(format!("as_type<{}>({value})", w.type_name(to)?))
    }

    fn binary(
        &self,
        w: &mut Writer,
        operator: BinaryOperatorKind,
        [lhs_type, _]: [TypeId; 2],
        [lhs, rhs]: [&str; 2],
    ) -> Result<Option<String>> {
        let float = w.types.element_scalar(lhs_type).is_some_and(ScalarKind::is_float);

        Ok(match operator {
            BinaryOperatorKind::Modulus if float => Some(format!(
                "fmod({}, {})",
                c_like::unwrap_parens(lhs),
                c_like::unwrap_parens(rhs)
            )),
            BinaryOperatorKind::ShiftLeft | BinaryOperatorKind::ShiftRight => {
                let bits = lhs_type_bits(w, lhs_type);
                Some(format!("({lhs} {operator} ({rhs} & {}u))", bits - 1))
            }
            _ => None,
        })
    }

    fn builtin(&self, w: &mut Writer, call: &BuiltinCall) -> Result<String> {
        use BuiltinFunction::*;

        let arguments = &call.arguments;
        let rename = |name: &str| Writer::call_text(name, arguments);

        Ok(match call.function {
            Dpdx => rename("dfdx"),
            Dpdy => rename("dfdy"),
            CountOneBits => rename("popcount"),
            ReverseBits => rename("reverse_bits"),
            Round => rename("rint"),
            InverseSqrt => rename("rsqrt"),
            Degrees => format!("({} * 57.29577951308232f)", arguments[0]),
            Radians => format!("({} * 0.017453292519943295f)", arguments[0]),
            Sign if call.result.and_then(|ty| w.types.element_scalar(ty)).is_some_and(ScalarKind::is_integer) => {
                let ty = call.result.map(|ty| w.type_name(ty)).transpose()?.unwrap_or_default();
                let value = &arguments[0];
                format!("(select({ty}(0), {ty}(1), {value} > 0) - select({ty}(0), {ty}(1), {value} < 0))")
            }
            Mix if call.types.len() == 3 && w.shape(call.types[2]).is_some_and(|(size, _)| size == 1) => {
                let vector = call.types[0];

                if matches!(w.types.get(vector), TypeKind::Vector { .. }) {
                    let weight = self.splat(w, vector, arguments[2].clone())?;
                    Writer::call_text("mix", &[arguments[0].clone(), arguments[1].clone(), weight])
                } else {
                    rename("mix")
                }
            }
            Dot if call.types.first().and_then(|ty| w.types.element_scalar(*ty)).is_some_and(ScalarKind::is_integer) => {
                w.integer_dot(call)?
            }
            WorkgroupBarrier => "threadgroup_barrier(mem_flags::mem_threadgroup)".to_string(),
            StorageBarrier => "threadgroup_barrier(mem_flags::mem_device)".to_string(),
            TextureSample | TextureSampleLevel | TextureLoad | TextureStore | TextureDimensions => {
                self.texture_call(w, call)?
            }
            ArrayLength => return Err(BackendError::ArrayLength {
                target: self.target(),
                span: call.span,
            }),
            function if function.is_atomic() => self.atomic(call)?,
            function => rename(function.name()),
        })
    }

    fn discard(&self) -> &'static str {
        "discard_fragment()"
    }

    fn entry_point(&self, w: &mut Writer, entry: &EntryPoint) -> Result<()> {
        let stage = entry.stage;
        let inputs = w.input_fields(entry);
        let outputs = w.output_fields(entry, "result");

        let input_struct = format!("{}_in", entry.name);
        let output_struct = format!("{}_out", entry.name);

        let (staged, builtins): (Vec<_>, Vec<_>) = inputs.iter().partition(|field| {
            matches!(field.binding.kind, IoKind::Location(_))
                || (stage == PipelineStage::Fragment && field.binding.kind == IoKind::Builtin(BuiltinValue::Position))
        });

        if !staged.is_empty() {
            w.line(format!("struct {input_struct} {{"));
            for field in &staged {
                let declaration = w.declare(field.binding.ty, &field.name)?;
                let attribute = Self::input_attribute(field, stage).unwrap_or_default();
                w.line(format!("  {declaration} [[{attribute}]];"));
            }
            w.line("};");
            w.blank_line();
        }

        if !outputs.is_empty() {
            w.line(format!("struct {output_struct} {{"));
            for field in &outputs {
                let declaration = w.declare(field.binding.ty, &field.name)?;
                w.line(format!("  {declaration} [[{}]];", Self::output_attribute(field, stage)));
            }
            w.line("};");
            w.blank_line();
        }

        let mut parameters = Vec::new();

        if !staged.is_empty() {
            parameters.push(format!("{input_struct} inputs [[stage_in]]"));
        }

        for field in &builtins {
            let IoKind::Builtin(builtin) = field.binding.kind else {
                continue;
            };

            let declaration = w.declare(field.binding.ty, &field.name)?;
            parameters.push(format!("{declaration} [[{}]]", Self::builtin_attribute(builtin)));
        }

        let needs_local_index = stage == PipelineStage::Compute && w.has_workgroup_variables(entry);
        let local_index = match w.input_builtin(entry, BuiltinValue::LocalInvocationIndex) {
            Some(field) => field.name,
            None => {
                if needs_local_index {
                    parameters.push("uint local_index [[thread_index_in_threadgroup]]".to_string());
                }
                "local_index".to_string()
            }
        };

        let mut locals = Vec::new();

        for id in &entry.globals {
            let Some(global) = w.program.global(*id) else {
                continue;
            };
            let name = w.global_name(*id);
            let binding = global.binding.unwrap_or_default().binding;

            match global.address_space() {
                Some(AddressSpace::Uniform | AddressSpace::Storage) => {
                    let parameter = self.buffer_parameter(w, &name, global)?;
                    parameters.push(format!("{parameter} [[buffer({binding})]]"));
                }
                Some(AddressSpace::Handle) => {
                    let parameter = self.buffer_parameter(w, &name, global)?;
                    let class = match w.types.get(global.ty) {
                        TypeKind::Sampler(_) => "sampler",
                        _ => "texture",
                    };
                    parameters.push(format!("{parameter} [[{class}({binding})]]"));
                }
                Some(AddressSpace::Private) => {
                    let declaration = w.declare(global.ty, &name)?;
                    let initializer = match w.program.module.declaration(*id).as_variable().and_then(|v| v.initializer) {
                        Some(initializer) => w.expression(initializer)?,
                        None => self.zero_value(w, global.ty)?,
                    };
                    locals.push(format!("{declaration} = {};", c_like::unwrap_parens(&initializer)));
                }
                Some(AddressSpace::Workgroup) => {
                    let declaration = w.declare(global.ty, &name)?;
                    locals.push(format!("threadgroup {declaration};"));
                }
                _ => {}
            }
        }

        let qualifier = match stage {
            PipelineStage::Vertex => "vertex",
            PipelineStage::Fragment => "fragment",
            PipelineStage::Compute => "kernel",
        };
        let return_type = if outputs.is_empty() { "void" } else { output_struct.as_str() };

        w.line(format!(
            "{qualifier} {return_type} {}({}) {{",
            entry.name,
            parameters.join(", ")
        ));
        w.indent();

        for local in locals {
            w.line(local);
        }

        if needs_local_index {
            w.write_workgroup_init(entry, &local_index, "threadgroup_barrier(mem_flags::mem_threadgroup)")?;
        }

        let call = w.call_inner(entry, &|_, field| {
            let staged = matches!(field.binding.kind, IoKind::Location(_))
                || (stage == PipelineStage::Fragment && field.binding.kind == IoKind::Builtin(BuiltinValue::Position));

            if staged {
                format!("inputs.{}", field.name)
            } else {
                field.name.clone()
            }
        })?;

        match entry.return_type {
            Some(ty) if !outputs.is_empty() => {
                let declaration = w.declare(ty, "result")?;
                w.flush_line(format!("{declaration} = {call};"));
                w.line(format!("{output_struct} outputs = {{}};"));

                for field in &outputs {
                    w.line(format!("outputs.{} = {};", field.name, field.source));
                }

                w.line("return outputs;");
            }
            _ => w.flush_line(format!("{call};")),
        }

        w.dedent();
        w.line("}");
        Ok(())
    }
}

fn lhs_type_bits(w: &Writer, ty: TypeId) -> u32 {
    w.types.element_scalar(ty).map_or(32, |scalar| scalar.concretize().size() * 8)
}

#[derive(Debug, Default)]
pub struct MslGenerator;

impl CodeGenerator for MslGenerator {
    fn generate(&self, program: &Program, _: &ir::Module) -> std::result::Result<String, BackendError> {
        c_like::generate(program, &Msl)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::backend::c_like::tests::legalized;

    fn msl(source: &str) -> String {
        let program = legalized(source, Target::Metal);
        c_like::generate(&program, &Msl).unwrap()
    }

    #[test]
    fn main_is_escaped() {
        assert_eq!(entry_point_function("main"), "main_");
        assert_eq!(entry_point_function("shade"), "shade");
    }

    #[test]
    fn globals_are_passed_as_parameters() {
        let code = msl(indoc! {"
            struct Params { scale: f32 }

            @group(0) @binding(0) var<uniform> params: Params;
            @group(1) @binding(0) var<storage, read_write> data: array<f32>;
            var<private> calls: u32;

            fn scaled(value: f32) -> f32 {
                calls += 1u;
                return value * params.scale;
            }

            @compute @workgroup_size(32)
            fn main(@builtin(global_invocation_id) id: vec3<u32>) {
                data[id.x] = scaled(data[id.x]);
            }
        "});

        assert!(code.starts_with("#include <metal_stdlib>\n\nusing namespace metal;\n"), "{code}");
        assert!(
            code.contains("float scaled(float value, constant Params& params, thread uint& calls) {"),
            "{code}"
        );
        assert!(
            code.contains("void main_inner(uint3 id, constant Params& params, device float* data, thread uint& calls) {"),
            "{code}"
        );
        assert!(code.contains("data[id.x] = scaled(data[id.x], params, calls);"), "{code}");
        assert!(
            code.contains(
                "kernel void main_(uint3 id [[thread_position_in_grid]], constant Params& params [[buffer(0)]], \
                 device float* data [[buffer(1)]]) {"
            ),
            "{code}"
        );
        assert!(code.contains("  uint calls = 0u;\n"), "{code}");
        assert!(code.contains("  main_inner(id, params, data, calls);\n"), "{code}");
    }

    #[test]
    fn fragment_inputs_are_staged() {
        let code = msl(indoc! {"
            @group(0) @binding(0) var image: texture_2d<f32>;
            @group(0) @binding(1) var smp: sampler;

            @fragment
            fn shade(@builtin(position) coord: vec4<f32>, @location(0) @interpolate(linear) uv: vec2<f32>) -> @location(0) vec4<f32> {
                return textureSample(image, smp, uv) * coord.w;
            }
        "});

        assert!(code.contains("  float4 coord [[position]];"), "{code}");
        assert!(code.contains("  float2 uv [[user(locn0), center_no_perspective]];"), "{code}");
        assert!(code.contains("  float4 result [[color(0)]];"), "{code}");
        assert!(code.contains("fragment shade_out shade(shade_in inputs [[stage_in]], texture2d<float, access::sample> image [[texture(0)]], sampler smp [[sampler(1)]]) {"), "{code}");
        assert!(code.contains("image.sample(smp, uv)"), "{code}");
    }

    #[test]
    fn atomics_and_barriers_are_explicit() {
        let code = msl(indoc! {"
            var<workgroup> hits: atomic<u32>;

            @compute @workgroup_size(64)
            fn main() {
                atomicAdd(&hits, 1u);
                workgroupBarrier();
            }
        "});

        assert!(code.contains("atomic_fetch_add_explicit(&hits, 1u, memory_order_relaxed);"), "{code}");
        assert!(code.contains("threadgroup_barrier(mem_flags::mem_threadgroup);"), "{code}");
        assert!(code.contains("uint local_index [[thread_index_in_threadgroup]]"), "{code}");
        assert!(code.contains("  threadgroup atomic_uint hits;\n"), "{code}");
        assert!(code.contains("atomic_store_explicit(&hits, 0u, memory_order_relaxed);"), "{code}");
    }

    #[test]
    fn float_remainders_use_fmod() {
        let code = msl("@fragment fn main(@location(0) x: f32) -> @location(0) f32 { return x % 2.0; }\n");

        assert!(code.contains("return fmod(x, 2.0f);"), "{code}");
    }
}

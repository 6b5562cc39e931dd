//! Builtin functions and builtin IO values, with their type rules.

use strum::{EnumString, IntoStaticStr};

use crate::{
    frontend::ast::PipelineStage,
    middle::{
        constant::{ConstEvalError, ConstValue, Scalar, float_like},
        ty::{AddressSpace, ArraySize, ScalarKind, TextureDimension, TextureKind, TypeId, TypeKind, TypeTable},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, IntoStaticStr)]
#[strum(serialize_all = "camelCase")]
pub enum BuiltinFunction {
    Abs,
    Acos,
    All,
    Any,
    ArrayLength,
    Asin,
    Atan,
    Atan2,
    AtomicAdd,
    AtomicAnd,
    AtomicExchange,
    AtomicLoad,
    AtomicMax,
    AtomicMin,
    AtomicOr,
    AtomicStore,
    AtomicSub,
    AtomicXor,
    Ceil,
    Clamp,
    Cos,
    Cosh,
    CountOneBits,
    Cross,
    Degrees,
    Determinant,
    Distance,
    Dot,
    Dpdx,
    Dpdy,
    Exp,
    Exp2,
    Floor,
    Fma,
    Fract,
    Fwidth,
    InverseSqrt,
    Length,
    Log,
    Log2,
    Max,
    Min,
    Mix,
    Normalize,
    Pow,
    Radians,
    Reflect,
    ReverseBits,
    Round,
    Select,
    Sign,
    Sin,
    Sinh,
    Smoothstep,
    Sqrt,
    Step,
    StorageBarrier,
    Tan,
    Tanh,
    TextureDimensions,
    TextureLoad,
    TextureSample,
    TextureSampleLevel,
    TextureStore,
    Transpose,
    Trunc,
    WorkgroupBarrier,
}

/// The checked parameter and return types of one builtin call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinSignature {
    /// The type each argument materializes to
    pub parameters: Vec<TypeId>,
    pub return_type: Option<TypeId>,
}

impl BuiltinFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    pub fn name(self) -> &'static str {
        self.into()
    }

    /// The only stage this builtin may be used from, if restricted
    pub fn stage_restriction(self) -> Option<PipelineStage> {
        match self {
            Self::TextureSample | Self::Dpdx | Self::Dpdy | Self::Fwidth => Some(PipelineStage::Fragment),
            Self::WorkgroupBarrier | Self::StorageBarrier => Some(PipelineStage::Compute),
            _ => None,
        }
    }

    pub fn is_atomic(self) -> bool {
        matches!(
            self,
            Self::AtomicAdd
                | Self::AtomicAnd
                | Self::AtomicExchange
                | Self::AtomicLoad
                | Self::AtomicMax
                | Self::AtomicMin
                | Self::AtomicOr
                | Self::AtomicStore
                | Self::AtomicSub
                | Self::AtomicXor
        )
    }

    /// Builtins with no side effects whose result only depends on their
    /// arguments
    pub fn is_pure(self) -> bool {
        !self.is_atomic()
            && !matches!(
                self,
                Self::TextureStore | Self::WorkgroupBarrier | Self::StorageBarrier
            )
    }

    /// Checks a call with argument value types `arguments`, returning the
    /// materialized signature or an error message
    pub fn check(self, types: &mut TypeTable, arguments: &[TypeId]) -> Result<BuiltinSignature, String> {
        let name = self.name();

        let arity = |count: usize| -> Result<(), String> {
            if arguments.len() == count {
                Ok(())
            } else {
                Err(format!(
                    "'{name}' expects {count} argument{}, found {}",
                    if count == 1 { "" } else { "s" },
                    arguments.len()
                ))
            }
        };

        let mismatch = |types: &TypeTable| {
            let found = arguments.iter().map(|ty| types.name(*ty)).collect::<Vec<_>>().join(", ");
            format!("no matching call to '{name}({found})'")
        };

        match self {
            Self::Abs | Self::Sign => {
                arity(1)?;
                let ty = numeric(types, arguments[0], |s| s.is_numeric() && (self == Self::Abs || s.is_signed()))
                    .ok_or_else(|| mismatch(&*types))?;
                Ok(same(ty, 1))
            }
            Self::Acos
            | Self::Asin
            | Self::Atan
            | Self::Ceil
            | Self::Cos
            | Self::Cosh
            | Self::Degrees
            | Self::Exp
            | Self::Exp2
            | Self::Floor
            | Self::Fract
            | Self::InverseSqrt
            | Self::Log
            | Self::Log2
            | Self::Radians
            | Self::Round
            | Self::Sin
            | Self::Sinh
            | Self::Sqrt
            | Self::Tan
            | Self::Tanh
            | Self::Trunc
            | Self::Dpdx
            | Self::Dpdy
            | Self::Fwidth => {
                arity(1)?;
                let derivative = matches!(self, Self::Dpdx | Self::Dpdy | Self::Fwidth);
                let ty = numeric(types, arguments[0], |s| {
                    if derivative { s == ScalarKind::F32 || s == ScalarKind::AbstractFloat } else { s.is_float() }
                })
                .ok_or_else(|| mismatch(&*types))?;
                Ok(same(ty, 1))
            }
            Self::CountOneBits | Self::ReverseBits => {
                arity(1)?;
                let ty = numeric(types, arguments[0], |s| s.is_integer()).ok_or_else(|| mismatch(&*types))?;
                Ok(same(ty, 1))
            }
            Self::Atan2 | Self::Pow | Self::Step | Self::Min | Self::Max => {
                arity(2)?;
                let ty = common(types, arguments).ok_or_else(|| mismatch(&*types))?;
                let accepts = |s: ScalarKind| if matches!(self, Self::Min | Self::Max) { s.is_numeric() } else { s.is_float() };
                let ty = numeric(types, ty, accepts).ok_or_else(|| mismatch(&*types))?;
                Ok(same(ty, 2))
            }
            Self::Clamp | Self::Fma | Self::Smoothstep => {
                arity(3)?;
                let ty = common(types, arguments).ok_or_else(|| mismatch(&*types))?;
                let accepts = |s: ScalarKind| if self == Self::Clamp { s.is_numeric() } else { s.is_float() };
                let ty = numeric(types, ty, accepts).ok_or_else(|| mismatch(&*types))?;
                Ok(same(ty, 3))
            }
            Self::Mix => {
                arity(3)?;
                let ty = common(types, &arguments[..2]).ok_or_else(|| mismatch(&*types))?;
                let ty = numeric(types, ty, ScalarKind::is_float).ok_or_else(|| mismatch(&*types))?;
                let ty = concrete(types, ty);

                // The blend factor may be a scalar
                let factor = if types.scalar_or_vector_parts(arguments[2]).is_some_and(|(size, _)| size.is_none()) {
                    let scalar = types.element_scalar(ty).ok_or_else(|| mismatch(&*types))?;
                    types.scalar(scalar)
                } else {
                    ty
                };

                if !types.converts_to(arguments[2], factor) {
                    return Err(mismatch(&*types));
                }

                Ok(BuiltinSignature {
                    parameters: vec![ty, ty, factor],
                    return_type: Some(ty),
                })
            }
            Self::Length | Self::Distance | Self::Dot | Self::Normalize | Self::Cross | Self::Reflect => {
                let count = if matches!(self, Self::Length | Self::Normalize) { 1 } else { 2 };
                arity(count)?;

                let ty = common(types, arguments).ok_or_else(|| mismatch(&*types))?;
                let (size, scalar) = types.scalar_or_vector_parts(ty).ok_or_else(|| mismatch(&*types))?;

                let float_only = self != Self::Dot;
                let valid = scalar.is_numeric()
                    && (!float_only || scalar.is_float())
                    && match self {
                        Self::Cross => size == Some(3),
                        Self::Dot | Self::Normalize | Self::Reflect => size.is_some(),
                        _ => true,
                    };

                if !valid {
                    return Err(mismatch(&*types));
                }

                let ty = concrete(types, ty);
                let scalar = scalar.concretize();
                let return_type = match self {
                    Self::Length | Self::Distance | Self::Dot => types.scalar(scalar),
                    _ => ty,
                };

                Ok(BuiltinSignature {
                    parameters: vec![ty; count],
                    return_type: Some(return_type),
                })
            }
            Self::All | Self::Any => {
                arity(1)?;
                let ty = numeric(types, arguments[0], |s| s == ScalarKind::Bool).ok_or_else(|| mismatch(&*types))?;
                let bool = types.bool();
                Ok(BuiltinSignature {
                    parameters: vec![ty],
                    return_type: Some(bool),
                })
            }
            Self::Select => {
                arity(3)?;
                let ty = common(types, &arguments[..2]).ok_or_else(|| mismatch(&*types))?;
                let ty = concrete(types, ty);

                let size = types.scalar_or_vector_parts(ty).map(|(size, _)| size);
                let condition = match size {
                    Some(Some(size)) if types.scalar_or_vector_parts(arguments[2]) != Some((None, ScalarKind::Bool)) => {
                        types.vector(size, ScalarKind::Bool)
                    }
                    _ => types.bool(),
                };

                if arguments[2] != condition {
                    return Err(mismatch(&*types));
                }

                Ok(BuiltinSignature {
                    parameters: vec![ty, ty, condition],
                    return_type: Some(ty),
                })
            }
            Self::Determinant | Self::Transpose => {
                arity(1)?;
                let ty = concrete(types, arguments[0]);

                let TypeKind::Matrix { columns, rows, scalar } = *types.get(ty) else {
                    return Err(mismatch(&*types));
                };

                let return_type = if self == Self::Determinant {
                    if columns != rows {
                        return Err(mismatch(&*types));
                    }

                    types.scalar(scalar)
                } else {
                    types.intern(TypeKind::Matrix {
                        columns: rows,
                        rows: columns,
                        scalar,
                    })
                };

                Ok(BuiltinSignature {
                    parameters: vec![ty],
                    return_type: Some(return_type),
                })
            }
            Self::ArrayLength => {
                arity(1)?;

                let is_runtime_array = match types.get(arguments[0]) {
                    TypeKind::Pointer { pointee, .. } => matches!(
                        types.get(*pointee),
                        TypeKind::Array {
                            size: ArraySize::Runtime,
                            ..
                        }
                    ),
                    _ => false,
                };

                if !is_runtime_array {
                    return Err(mismatch(&*types));
                }

                let u32 = types.u32();
                Ok(BuiltinSignature {
                    parameters: arguments.to_vec(),
                    return_type: Some(u32),
                })
            }
            Self::AtomicLoad | Self::AtomicStore => {
                arity(if self == Self::AtomicLoad { 1 } else { 2 })?;
                let scalar = atomic_pointer(types, arguments[0]).ok_or_else(|| mismatch(&*types))?;
                let value = types.scalar(scalar);

                if self == Self::AtomicLoad {
                    return Ok(BuiltinSignature {
                        parameters: arguments.to_vec(),
                        return_type: Some(value),
                    });
                }

                if !types.converts_to(arguments[1], value) {
                    return Err(mismatch(&*types));
                }

                Ok(BuiltinSignature {
                    parameters: vec![arguments[0], value],
                    return_type: None,
                })
            }
            Self::AtomicAdd
            | Self::AtomicSub
            | Self::AtomicMax
            | Self::AtomicMin
            | Self::AtomicAnd
            | Self::AtomicOr
            | Self::AtomicXor
            | Self::AtomicExchange => {
                arity(2)?;
                let scalar = atomic_pointer(types, arguments[0]).ok_or_else(|| mismatch(&*types))?;
                let value = types.scalar(scalar);

                if !types.converts_to(arguments[1], value) {
                    return Err(mismatch(&*types));
                }

                Ok(BuiltinSignature {
                    parameters: vec![arguments[0], value],
                    return_type: Some(value),
                })
            }
            Self::WorkgroupBarrier | Self::StorageBarrier => {
                arity(0)?;
                Ok(BuiltinSignature {
                    parameters: Vec::new(),
                    return_type: None,
                })
            }
            Self::TextureSample | Self::TextureSampleLevel => {
                arity(if self == Self::TextureSample { 3 } else { 4 })?;

                let TypeKind::Texture { dimension, kind } = *types.get(arguments[0]) else {
                    return Err(mismatch(&*types));
                };

                let sampled = matches!(kind, TextureKind::Sampled { multisampled: false, .. })
                    || matches!(kind, TextureKind::Depth { multisampled: false });

                if !sampled || !matches!(types.get(arguments[1]), TypeKind::Sampler(_)) {
                    return Err(mismatch(&*types));
                }

                let coordinates = types.vector(dimension.coordinates(), ScalarKind::F32);
                let coordinates = if dimension.coordinates() == 1 { types.f32() } else { coordinates };

                if !types.converts_to(arguments[2], coordinates) {
                    return Err(mismatch(&*types));
                }

                let mut parameters = vec![arguments[0], arguments[1], coordinates];

                if self == Self::TextureSampleLevel {
                    let level = types.f32();
                    if !types.converts_to(arguments[3], level) {
                        return Err(mismatch(&*types));
                    }
                    parameters.push(level);
                }

                let return_type = match kind {
                    TextureKind::Depth { .. } => types.f32(),
                    _ => types.vector(4, ScalarKind::F32),
                };

                Ok(BuiltinSignature {
                    parameters,
                    return_type: Some(return_type),
                })
            }
            Self::TextureLoad | Self::TextureStore => {
                let TypeKind::Texture { dimension, kind } = *types.get(*arguments.first().ok_or_else(|| mismatch(&*types))?)
                else {
                    return Err(mismatch(&*types));
                };

                let coordinate_scalar = arguments
                    .get(1)
                    .and_then(|ty| types.element_scalar(*ty))
                    .map(ScalarKind::concretize)
                    .filter(|s| matches!(s, ScalarKind::I32 | ScalarKind::U32))
                    .ok_or_else(|| mismatch(&*types))?;

                let coordinates = if dimension.coordinates() == 1 {
                    types.scalar(coordinate_scalar)
                } else {
                    types.vector(dimension.coordinates(), coordinate_scalar)
                };

                if !types.converts_to(arguments[1], coordinates) {
                    return Err(mismatch(&*types));
                }

                let texel_scalar = match kind {
                    TextureKind::Sampled { sampled, .. } => sampled,
                    TextureKind::Depth { .. } => ScalarKind::F32,
                    TextureKind::Storage { format, .. } => format.channel_type(),
                };
                let texel = types.vector(4, texel_scalar);

                if self == Self::TextureStore {
                    arity(3)?;

                    let writable = matches!(kind, TextureKind::Storage { access, .. } if access.can_write());
                    if !writable || !types.converts_to(arguments[2], texel) {
                        return Err(mismatch(&*types));
                    }

                    return Ok(BuiltinSignature {
                        parameters: vec![arguments[0], coordinates, texel],
                        return_type: None,
                    });
                }

                let storage = matches!(kind, TextureKind::Storage { .. });
                arity(if storage { 2 } else { 3 })?;

                let mut parameters = vec![arguments[0], coordinates];

                if !storage {
                    let level = concrete(types, arguments[2]);
                    if !matches!(types.as_scalar(level), Some(ScalarKind::I32 | ScalarKind::U32)) {
                        return Err(mismatch(&*types));
                    }
                    parameters.push(level);
                }

                let return_type = match kind {
                    TextureKind::Depth { .. } => types.f32(),
                    _ => texel,
                };

                Ok(BuiltinSignature {
                    parameters,
                    return_type: Some(return_type),
                })
            }
            Self::TextureDimensions => {
                if arguments.is_empty() || arguments.len() > 2 {
                    return Err(mismatch(&*types));
                }

                let TypeKind::Texture { dimension, .. } = *types.get(arguments[0]) else {
                    return Err(mismatch(&*types));
                };

                let mut parameters = vec![arguments[0]];
                if let Some(level) = arguments.get(1) {
                    let level = concrete(types, *level);
                    parameters.push(level);
                }

                let size = match dimension.coordinates() {
                    1 => None,
                    _ if dimension.is_arrayed() || dimension == TextureDimension::Cube => Some(2),
                    n => Some(n),
                };

                Ok(BuiltinSignature {
                    parameters,
                    return_type: Some(types.scalar_or_vector(size, ScalarKind::U32)),
                })
            }
        }
    }

    /// Evaluates the builtin at compile time, if it supports constant
    /// evaluation. `arguments` are already converted to the signature's
    /// parameter types.
    pub fn evaluate(self, arguments: &[ConstValue]) -> Option<Result<ConstValue, ConstEvalError>> {
        let float = |f: fn(f64) -> f64| {
            let value = arguments.first()?;
            Some(value.map(|s| float_like(s, f(s.as_f64()))))
        };

        match self {
            Self::Abs => Some(arguments.first()?.map(|s| {
                Ok(match s {
                    Scalar::AbstractInt(v) => Scalar::AbstractInt(v.wrapping_abs()),
                    Scalar::I32(v) => Scalar::I32(v.wrapping_abs()),
                    Scalar::U32(_) => s,
                    _ => float_like(s, s.as_f64().abs())?,
                })
            })),
            Self::Sign => Some(arguments.first()?.map(|s| {
                Ok(match s {
                    Scalar::AbstractInt(v) => Scalar::AbstractInt(v.signum()),
                    Scalar::I32(v) => Scalar::I32(v.signum()),
                    _ => {
                        let v = s.as_f64();
                        float_like(s, if v == 0.0 { 0.0 } else { v.signum() })?
                    }
                })
            })),
            Self::Floor => float(f64::floor),
            Self::Ceil => float(f64::ceil),
            Self::Trunc => float(f64::trunc),
            Self::Round => float(f64::round_ties_even),
            Self::Fract => float(|v| v - v.floor()),
            Self::Sqrt => float(f64::sqrt),
            Self::InverseSqrt => float(|v| 1.0 / v.sqrt()),
            Self::Acos => float(f64::acos),
            Self::Asin => float(f64::asin),
            Self::Atan => float(f64::atan),
            Self::Cos => float(f64::cos),
            Self::Cosh => float(f64::cosh),
            Self::Sin => float(f64::sin),
            Self::Sinh => float(f64::sinh),
            Self::Tan => float(f64::tan),
            Self::Tanh => float(f64::tanh),
            Self::Exp => float(f64::exp),
            Self::Exp2 => float(f64::exp2),
            Self::Log => float(f64::ln),
            Self::Log2 => float(f64::log2),
            Self::Degrees => float(f64::to_degrees),
            Self::Radians => float(f64::to_radians),
            Self::Min | Self::Max => {
                let [a, b] = arguments else { return None };
                let pick_lhs = self == Self::Min;

                Some(a.zip(b, |a, b| {
                    let a_less = a.as_f64() < b.as_f64();
                    Ok(if a_less == pick_lhs { a } else { b })
                }))
            }
            Self::Clamp => {
                let [value, low, high] = arguments else { return None };

                Some(value.zip(low, |v, l| Ok(if v.as_f64() < l.as_f64() { l } else { v })).and_then(|v| {
                    v.zip(high, |v, h| Ok(if v.as_f64() > h.as_f64() { h } else { v }))
                }))
            }
            Self::Select => {
                let [f, t, condition] = arguments else { return None };

                Some(match condition {
                    ConstValue::Scalar(Scalar::Bool(true)) => Ok(t.clone()),
                    ConstValue::Scalar(_) => Ok(f.clone()),
                    ConstValue::Composite(conditions) => Ok(ConstValue::Composite(
                        conditions
                            .iter()
                            .enumerate()
                            .map(|(i, c)| {
                                let source = if c.as_bool() == Some(true) { t } else { f };
                                source.elements().get(i).cloned().unwrap_or_else(|| source.clone())
                            })
                            .collect(),
                    )),
                })
            }
            _ => None,
        }
    }
}

/// Returns `ty` if it is a scalar or vector whose scalar satisfies `accepts`
fn numeric(types: &TypeTable, ty: TypeId, accepts: impl Fn(ScalarKind) -> bool) -> Option<TypeId> {
    let (_, scalar) = types.scalar_or_vector_parts(ty)?;
    accepts(scalar).then_some(ty)
}

/// The common type of `arguments` after abstract conversions
fn common(types: &TypeTable, arguments: &[TypeId]) -> Option<TypeId> {
    let (first, rest) = arguments.split_first()?;

    rest.iter().try_fold(*first, |acc, ty| types.common_type(acc, *ty))
}

fn concrete(types: &mut TypeTable, ty: TypeId) -> TypeId {
    types.concretize(ty)
}

/// A signature where every parameter and the result share one type. Abstract
/// arguments stay abstract so the call can be constant evaluated.
fn same(ty: TypeId, count: usize) -> BuiltinSignature {
    BuiltinSignature {
        parameters: vec![ty; count],
        return_type: Some(ty),
    }
}

fn atomic_pointer(types: &TypeTable, ty: TypeId) -> Option<ScalarKind> {
    let TypeKind::Pointer {
        space: AddressSpace::Storage | AddressSpace::Workgroup,
        pointee,
        ..
    } = *types.get(ty)
    else {
        return None;
    };

    match types.get(pointee) {
        TypeKind::Atomic(scalar) => Some(*scalar),
        _ => None,
    }
}

/// Values passed in and out of entry points through `@builtin(...)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, IntoStaticStr, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum BuiltinValue {
    Position,
    VertexIndex,
    InstanceIndex,
    FrontFacing,
    FragDepth,
    SampleIndex,
    SampleMask,
    LocalInvocationId,
    LocalInvocationIndex,
    GlobalInvocationId,
    WorkgroupId,
    NumWorkgroups,
}

impl BuiltinValue {
    pub fn ty(self, types: &mut TypeTable) -> TypeId {
        match self {
            Self::Position => types.vector(4, ScalarKind::F32),
            Self::FrontFacing => types.bool(),
            Self::FragDepth => types.f32(),
            Self::LocalInvocationId | Self::GlobalInvocationId | Self::WorkgroupId | Self::NumWorkgroups => {
                types.vector(3, ScalarKind::U32)
            }
            Self::VertexIndex
            | Self::InstanceIndex
            | Self::SampleIndex
            | Self::SampleMask
            | Self::LocalInvocationIndex => types.u32(),
        }
    }

    /// Returns true if the builtin may appear on an entry point input (or
    /// output when `input` is false) of the given stage
    pub fn is_valid_for(self, stage: PipelineStage, input: bool) -> bool {
        use PipelineStage::*;

        match self {
            Self::Position => (stage == Vertex && !input) || (stage == Fragment && input),
            Self::VertexIndex | Self::InstanceIndex => stage == Vertex && input,
            Self::FrontFacing | Self::SampleIndex => stage == Fragment && input,
            Self::FragDepth => stage == Fragment && !input,
            Self::SampleMask => stage == Fragment,
            Self::LocalInvocationId
            | Self::LocalInvocationIndex
            | Self::GlobalInvocationId
            | Self::WorkgroupId
            | Self::NumWorkgroups => stage == Compute && input,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_names_are_camel_case() {
        assert_eq!(BuiltinFunction::from_name("inverseSqrt"), Some(BuiltinFunction::InverseSqrt));
        assert_eq!(BuiltinFunction::from_name("textureSampleLevel"), Some(BuiltinFunction::TextureSampleLevel));
        assert_eq!(BuiltinFunction::from_name("inverse_sqrt"), None);
        assert_eq!(BuiltinFunction::ArrayLength.name(), "arrayLength");
    }

    #[test]
    fn abstract_arguments_unify_with_concrete_ones() {
        let mut types = TypeTable::new();

        let f32 = types.f32();
        let abstract_int = types.scalar(ScalarKind::AbstractInt);
        let vec3 = types.vector(3, ScalarKind::F32);

        let signature = BuiltinFunction::Max.check(&mut types, &[f32, abstract_int]);
        assert_eq!(
            signature,
            Ok(BuiltinSignature {
                parameters: vec![f32, f32],
                return_type: Some(f32),
            })
        );

        let dot = BuiltinFunction::Dot.check(&mut types, &[vec3, vec3]);
        assert_eq!(dot.map(|s| s.return_type), Ok(Some(f32)));

        let u32 = types.u32();
        assert_eq!(
            BuiltinFunction::Sqrt.check(&mut types, &[u32]),
            Err("no matching call to 'sqrt(u32)'".to_string())
        );
    }

    #[test]
    fn constant_evaluation() {
        let args = [Scalar::I32(-3).into(), Scalar::I32(0).into(), Scalar::I32(5).into()];

        assert_eq!(
            BuiltinFunction::Clamp.evaluate(&args),
            Some(Ok(ConstValue::Scalar(Scalar::I32(0))))
        );
        assert_eq!(
            BuiltinFunction::Floor.evaluate(&[Scalar::F32(2.5).into()]),
            Some(Ok(ConstValue::Scalar(Scalar::F32(2.0))))
        );
        assert_eq!(BuiltinFunction::TextureSample.evaluate(&[]), None);
    }

    #[test]
    fn builtin_values_are_stage_restricted() {
        assert!(BuiltinValue::Position.is_valid_for(PipelineStage::Vertex, false));
        assert!(!BuiltinValue::Position.is_valid_for(PipelineStage::Vertex, true));
        assert!(BuiltinValue::GlobalInvocationId.is_valid_for(PipelineStage::Compute, true));
        assert_eq!("frag_depth".parse(), Ok(BuiltinValue::FragDepth));
    }
}

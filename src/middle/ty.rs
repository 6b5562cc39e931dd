use colored::Colorize;
use hashbrown::HashMap;
use strum::{Display, EnumString};

use crate::{
    frontend::ast::DeclarationId,
    index::{IndexVec, simple_index},
};

simple_index! {
    /// Handle to an interned [`TypeKind`]. Two handles from the same
    /// [`TypeTable`] are equal iff their types are structurally equal.
    pub struct TypeId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarKind {
    Bool,
    /// The type of unsuffixed integer literals. Materializes to `i32` by
    /// default.
    AbstractInt,
    /// The type of unsuffixed float literals. Materializes to `f32` by
    /// default.
    AbstractFloat,
    I32,
    U32,
    F32,
    F16,
}

impl ScalarKind {
    pub fn is_abstract(self) -> bool {
        matches!(self, Self::AbstractInt | Self::AbstractFloat)
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Self::AbstractInt | Self::I32 | Self::U32)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::AbstractFloat | Self::F32 | Self::F16)
    }

    pub fn is_numeric(self) -> bool {
        self != Self::Bool
    }

    pub fn is_signed(self) -> bool {
        !matches!(self, Self::Bool | Self::U32)
    }

    /// The concrete scalar an abstract scalar materializes to
    pub fn concretize(self) -> Self {
        match self {
            Self::AbstractInt => Self::I32,
            Self::AbstractFloat => Self::F32,
            other => other,
        }
    }

    /// Size in bytes when stored in memory
    pub fn size(self) -> u32 {
        match self {
            Self::F16 => 2,
            Self::AbstractInt | Self::AbstractFloat => 8,
            _ => 4,
        }
    }

    /// Returns true if an abstract value of this kind converts automatically to
    /// `target`
    pub fn converts_to(self, target: ScalarKind) -> bool {
        match self {
            _ if self == target => true,
            Self::AbstractInt => matches!(
                target,
                Self::AbstractFloat | Self::I32 | Self::U32 | Self::F32 | Self::F16
            ),
            Self::AbstractFloat => matches!(target, Self::F32 | Self::F16),
            _ => false,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::AbstractInt => "abstract-int",
            Self::AbstractFloat => "abstract-float",
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::F32 => "f32",
            Self::F16 => "f16",
        }
    }
}

impl core::fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum AddressSpace {
    Function,
    Private,
    Workgroup,
    Uniform,
    Storage,
    /// Textures and samplers. Never written in source.
    Handle,
}

impl AddressSpace {
    pub fn default_access(self) -> AccessMode {
        match self {
            Self::Function | Self::Private | Self::Workgroup => AccessMode::ReadWrite,
            Self::Uniform | Self::Storage | Self::Handle => AccessMode::Read,
        }
    }

    pub fn is_resource(self) -> bool {
        matches!(self, Self::Uniform | Self::Storage | Self::Handle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

impl AccessMode {
    pub fn can_read(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub fn can_write(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArraySize {
    Constant(u32),
    /// Sized by an override expression. Only valid in the workgroup address
    /// space.
    Override(DeclarationId),
    Runtime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub enum TextureDimension {
    #[strum(serialize = "1d")]
    D1,
    #[strum(serialize = "2d")]
    D2,
    #[strum(serialize = "2d_array")]
    D2Array,
    #[strum(serialize = "3d")]
    D3,
    #[strum(serialize = "cube")]
    Cube,
    #[strum(serialize = "cube_array")]
    CubeArray,
}

impl TextureDimension {
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Some(match suffix {
            "1d" => Self::D1,
            "2d" => Self::D2,
            "2d_array" => Self::D2Array,
            "3d" => Self::D3,
            "cube" => Self::Cube,
            "cube_array" => Self::CubeArray,
            _ => return None,
        })
    }

    /// Number of components in a texel coordinate
    pub fn coordinates(self) -> u8 {
        match self {
            Self::D1 => 1,
            Self::D2 | Self::D2Array => 2,
            Self::D3 | Self::Cube | Self::CubeArray => 3,
        }
    }

    pub fn is_arrayed(self) -> bool {
        matches!(self, Self::D2Array | Self::CubeArray)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum TexelFormat {
    Rgba8Unorm,
    Rgba8Snorm,
    Rgba8Uint,
    Rgba8Sint,
    Rgba16Uint,
    Rgba16Sint,
    Rgba16Float,
    R32Uint,
    R32Sint,
    R32Float,
    Rg32Uint,
    Rg32Sint,
    Rg32Float,
    Rgba32Uint,
    Rgba32Sint,
    Rgba32Float,
    Bgra8Unorm,
}

impl TexelFormat {
    /// The scalar type of a texel channel as seen by the shader
    pub fn channel_type(self) -> ScalarKind {
        match self {
            Self::Rgba8Uint | Self::Rgba16Uint | Self::R32Uint | Self::Rg32Uint | Self::Rgba32Uint => {
                ScalarKind::U32
            }
            Self::Rgba8Sint | Self::Rgba16Sint | Self::R32Sint | Self::Rg32Sint | Self::Rgba32Sint => {
                ScalarKind::I32
            }
            _ => ScalarKind::F32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextureKind {
    Sampled {
        sampled: ScalarKind,
        multisampled: bool,
    },
    Depth {
        multisampled: bool,
    },
    Storage {
        format: TexelFormat,
        access: AccessMode,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SamplerKind {
    Filtering,
    Comparison,
}

/// A struct member with its computed memory layout
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructMember {
    pub name: String,
    pub ty: TypeId,
    pub offset: u32,
    pub align: u32,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructType {
    pub name: String,
    /// Structs are nominal, so the declaration is part of the identity
    pub declaration: DeclarationId,
    pub members: Vec<StructMember>,
    pub align: u32,
    /// Byte size, rounded up to the alignment. For structs ending in a
    /// runtime-sized array this is the size of the fixed prefix.
    pub size: u32,
}

impl StructType {
    pub fn member(&self, name: &str) -> Option<(usize, &StructMember)> {
        self.members.iter().enumerate().find(|(_, member)| member.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Scalar(ScalarKind),
    Vector {
        size: u8,
        scalar: ScalarKind,
    },
    /// `matCxR<T>`: `columns` column vectors of `rows` elements
    Matrix {
        columns: u8,
        rows: u8,
        scalar: ScalarKind,
    },
    Array {
        element: TypeId,
        size: ArraySize,
    },
    Struct(StructType),
    Pointer {
        space: AddressSpace,
        access: AccessMode,
        pointee: TypeId,
    },
    /// The type of an expression denoting a memory location, e.g. a variable
    /// name. Loaded implicitly when used as a value.
    Reference {
        space: AddressSpace,
        access: AccessMode,
        store: TypeId,
    },
    Texture {
        dimension: TextureDimension,
        kind: TextureKind,
    },
    Sampler(SamplerKind),
    Atomic(ScalarKind),
}

/// Interning table for all the types of a compilation
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    kinds: IndexVec<TypeId, TypeKind>,
    lookup: HashMap<TypeKind, TypeId>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, kind: TypeKind) -> TypeId {
        if let Some(id) = self.lookup.get(&kind) {
            return *id;
        }

        let id = self.kinds.push(kind.clone());
        self.lookup.insert(kind, id);

        id
    }

    pub fn get(&self, id: TypeId) -> &TypeKind {
        &self.kinds[id]
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &TypeKind)> {
        self.kinds.enumerate()
    }

    pub fn scalar(&mut self, scalar: ScalarKind) -> TypeId {
        self.intern(TypeKind::Scalar(scalar))
    }

    pub fn bool(&mut self) -> TypeId {
        self.scalar(ScalarKind::Bool)
    }

    pub fn i32(&mut self) -> TypeId {
        self.scalar(ScalarKind::I32)
    }

    pub fn u32(&mut self) -> TypeId {
        self.scalar(ScalarKind::U32)
    }

    pub fn f32(&mut self) -> TypeId {
        self.scalar(ScalarKind::F32)
    }

    pub fn vector(&mut self, size: u8, scalar: ScalarKind) -> TypeId {
        self.intern(TypeKind::Vector { size, scalar })
    }

    /// A scalar when `size` is `None`, otherwise a vector
    pub fn scalar_or_vector(&mut self, size: Option<u8>, scalar: ScalarKind) -> TypeId {
        match size {
            Some(size) => self.vector(size, scalar),
            None => self.scalar(scalar),
        }
    }

    pub fn reference(&mut self, space: AddressSpace, access: AccessMode, store: TypeId) -> TypeId {
        self.intern(TypeKind::Reference { space, access, store })
    }

    pub fn pointer(&mut self, space: AddressSpace, access: AccessMode, pointee: TypeId) -> TypeId {
        self.intern(TypeKind::Pointer { space, access, pointee })
    }

    pub fn as_scalar(&self, id: TypeId) -> Option<ScalarKind> {
        match self.get(id) {
            TypeKind::Scalar(scalar) => Some(*scalar),
            _ => None,
        }
    }

    /// The scalar of a scalar, vector or matrix type
    pub fn element_scalar(&self, id: TypeId) -> Option<ScalarKind> {
        match self.get(id) {
            TypeKind::Scalar(scalar)
            | TypeKind::Vector { scalar, .. }
            | TypeKind::Matrix { scalar, .. }
            | TypeKind::Atomic(scalar) => Some(*scalar),
            TypeKind::Array { element, .. } => self.element_scalar(*element),
            _ => None,
        }
    }

    /// `(vector size, scalar)` of a scalar or vector type
    pub fn scalar_or_vector_parts(&self, id: TypeId) -> Option<(Option<u8>, ScalarKind)> {
        match self.get(id) {
            TypeKind::Scalar(scalar) => Some((None, *scalar)),
            TypeKind::Vector { size, scalar } => Some((Some(*size), *scalar)),
            _ => None,
        }
    }

    /// Strips a reference, yielding the type produced by loading it
    pub fn value_type(&self, id: TypeId) -> TypeId {
        match self.get(id) {
            TypeKind::Reference { store, .. } => *store,
            _ => id,
        }
    }

    pub fn is_reference(&self, id: TypeId) -> bool {
        matches!(self.get(id), TypeKind::Reference { .. })
    }

    pub fn is_handle(&self, id: TypeId) -> bool {
        matches!(self.get(id), TypeKind::Texture { .. } | TypeKind::Sampler(_))
    }

    /// Returns true if the type or any type it contains is abstract
    pub fn is_abstract(&self, id: TypeId) -> bool {
        match self.get(id) {
            TypeKind::Scalar(scalar) | TypeKind::Vector { scalar, .. } | TypeKind::Matrix { scalar, .. } => {
                scalar.is_abstract()
            }
            TypeKind::Array { element, .. } => self.is_abstract(*element),
            _ => false,
        }
    }

    /// Types whose values can be created by constructor expressions
    pub fn is_constructible(&self, id: TypeId) -> bool {
        match self.get(id) {
            TypeKind::Scalar(_) | TypeKind::Vector { .. } | TypeKind::Matrix { .. } => true,
            TypeKind::Array { element, size } => {
                matches!(size, ArraySize::Constant(_)) && self.is_constructible(*element)
            }
            TypeKind::Struct(structure) => structure.members.iter().all(|m| self.is_constructible(m.ty)),
            _ => false,
        }
    }

    /// Types that may be stored in the uniform and storage address spaces
    pub fn is_host_shareable(&self, id: TypeId) -> bool {
        match self.get(id) {
            TypeKind::Scalar(scalar) | TypeKind::Vector { scalar, .. } | TypeKind::Matrix { scalar, .. } => {
                !matches!(scalar, ScalarKind::Bool) && !scalar.is_abstract()
            }
            TypeKind::Atomic(_) => true,
            TypeKind::Array { element, .. } => self.is_host_shareable(*element),
            TypeKind::Struct(structure) => structure.members.iter().all(|m| self.is_host_shareable(m.ty)),
            _ => false,
        }
    }

    /// Returns true if the type is a runtime-sized array or a struct ending in
    /// one
    pub fn has_runtime_size(&self, id: TypeId) -> bool {
        match self.get(id) {
            TypeKind::Array {
                size: ArraySize::Runtime,
                ..
            } => true,
            TypeKind::Struct(structure) => structure
                .members
                .last()
                .is_some_and(|member| self.has_runtime_size(member.ty)),
            _ => false,
        }
    }

    /// Replaces abstract scalars with their default concrete scalars
    pub fn concretize(&mut self, id: TypeId) -> TypeId {
        match self.get(id).clone() {
            TypeKind::Scalar(scalar) => self.scalar(scalar.concretize()),
            TypeKind::Vector { size, scalar } => self.vector(size, scalar.concretize()),
            TypeKind::Matrix { columns, rows, scalar } => self.intern(TypeKind::Matrix {
                columns,
                rows,
                scalar: scalar.concretize(),
            }),
            TypeKind::Array { element, size } => {
                let element = self.concretize(element);
                self.intern(TypeKind::Array { element, size })
            }
            _ => id,
        }
    }

    /// Returns the same shape as `id` with its scalar replaced by `scalar`
    pub fn with_scalar(&mut self, id: TypeId, scalar: ScalarKind) -> TypeId {
        match self.get(id).clone() {
            TypeKind::Scalar(_) => self.scalar(scalar),
            TypeKind::Vector { size, .. } => self.vector(size, scalar),
            TypeKind::Matrix { columns, rows, .. } => self.intern(TypeKind::Matrix { columns, rows, scalar }),
            TypeKind::Array { element, size } => {
                let element = self.with_scalar(element, scalar);
                self.intern(TypeKind::Array { element, size })
            }
            _ => id,
        }
    }

    /// Returns true if a value of type `from` is accepted where `to` is
    /// expected, either because the types are identical or by abstract
    /// conversion
    pub fn converts_to(&self, from: TypeId, to: TypeId) -> bool {
        if from == to {
            return true;
        }

        match (self.get(from), self.get(to)) {
            (TypeKind::Scalar(a), TypeKind::Scalar(b)) => a.is_abstract() && a.converts_to(*b),
            (TypeKind::Vector { size: n, scalar: a }, TypeKind::Vector { size: m, scalar: b }) => {
                n == m && a.is_abstract() && a.converts_to(*b)
            }
            (
                TypeKind::Matrix {
                    columns: c1,
                    rows: r1,
                    scalar: a,
                },
                TypeKind::Matrix {
                    columns: c2,
                    rows: r2,
                    scalar: b,
                },
            ) => c1 == c2 && r1 == r2 && a.is_abstract() && a.converts_to(*b),
            (
                TypeKind::Array {
                    element: e1,
                    size: s1,
                },
                TypeKind::Array {
                    element: e2,
                    size: s2,
                },
            ) => s1 == s2 && self.converts_to(*e1, *e2),
            _ => false,
        }
    }

    /// The type both `a` and `b` convert to, if any
    pub fn common_type(&self, a: TypeId, b: TypeId) -> Option<TypeId> {
        if self.converts_to(a, b) {
            Some(b)
        } else if self.converts_to(b, a) {
            Some(a)
        } else {
            None
        }
    }

    /// Alignment in bytes per the WGSL memory layout rules
    pub fn align_of(&self, id: TypeId) -> u32 {
        match self.get(id) {
            TypeKind::Scalar(scalar) | TypeKind::Atomic(scalar) => scalar.size(),
            TypeKind::Vector { size, scalar } => vector_align(*size, *scalar),
            TypeKind::Matrix { rows, scalar, .. } => vector_align(*rows, *scalar),
            TypeKind::Array { element, .. } => self.align_of(*element),
            TypeKind::Struct(structure) => structure.align,
            _ => 4,
        }
    }

    /// Size in bytes. Runtime-sized arrays count as one element.
    pub fn size_of(&self, id: TypeId) -> u32 {
        match self.get(id) {
            TypeKind::Scalar(scalar) | TypeKind::Atomic(scalar) => scalar.size(),
            TypeKind::Vector { size, scalar } => u32::from(*size) * scalar.size(),
            TypeKind::Matrix { columns, rows, scalar } => {
                u32::from(*columns) * round_up(vector_align(*rows, *scalar), u32::from(*rows) * scalar.size())
            }
            TypeKind::Array { element, size } => {
                let count = match size {
                    ArraySize::Constant(count) => *count,
                    ArraySize::Override(_) | ArraySize::Runtime => 1,
                };

                count * self.stride_of(*element)
            }
            TypeKind::Struct(structure) => structure.size,
            _ => 0,
        }
    }

    /// Distance in bytes between consecutive array elements of type `element`
    pub fn stride_of(&self, element: TypeId) -> u32 {
        round_up(self.align_of(element), self.size_of(element))
    }

    /// WGSL spelling of a type
    pub fn name(&self, id: TypeId) -> String {
        match self.get(id) {
            TypeKind::Scalar(scalar) => scalar.to_string(),
            TypeKind::Vector { size, scalar } => format!("vec{size}<{scalar}>"),
            TypeKind::Matrix { columns, rows, scalar } => format!("mat{columns}x{rows}<{scalar}>"),
            TypeKind::Array { element, size } => match size {
                ArraySize::Constant(count) => format!("array<{}, {count}>", self.name(*element)),
                ArraySize::Override(_) => format!("array<{}, override>", self.name(*element)),
                ArraySize::Runtime => format!("array<{}>", self.name(*element)),
            },
            TypeKind::Struct(structure) => structure.name.clone(),
            TypeKind::Pointer { space, access, pointee } => {
                format!("ptr<{space}, {}, {access}>", self.name(*pointee))
            }
            TypeKind::Reference { space, access, store } => {
                format!("ref<{space}, {}, {access}>", self.name(*store))
            }
            TypeKind::Texture { dimension, kind } => match kind {
                TextureKind::Sampled {
                    sampled,
                    multisampled: false,
                } => format!("texture_{dimension}<{sampled}>"),
                TextureKind::Sampled {
                    sampled,
                    multisampled: true,
                } => format!("texture_multisampled_{dimension}<{sampled}>"),
                TextureKind::Depth { multisampled: false } => format!("texture_depth_{dimension}"),
                TextureKind::Depth { multisampled: true } => format!("texture_depth_multisampled_{dimension}"),
                TextureKind::Storage { format, access } => {
                    format!("texture_storage_{dimension}<{format}, {access}>")
                }
            },
            TypeKind::Sampler(SamplerKind::Filtering) => "sampler".to_string(),
            TypeKind::Sampler(SamplerKind::Comparison) => "sampler_comparison".to_string(),
            TypeKind::Atomic(scalar) => format!("atomic<{scalar}>"),
        }
    }

    /// [`TypeTable::name`] highlighted for diagnostics
    pub fn colored_name(&self, id: TypeId) -> colored::ColoredString {
        self.name(id).as_str().yellow()
    }
}

fn vector_align(size: u8, scalar: ScalarKind) -> u32 {
    match size {
        2 => 2 * scalar.size(),
        _ => 4 * scalar.size(),
    }
}

pub fn round_up(align: u32, value: u32) -> u32 {
    if align == 0 {
        return value;
    }

    value.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_structural() {
        let mut types = TypeTable::new();

        let a = types.vector(4, ScalarKind::F32);
        let f32 = types.f32();
        let b = types.intern(TypeKind::Vector {
            size: 4,
            scalar: ScalarKind::F32,
        });
        let array = types.intern(TypeKind::Array {
            element: a,
            size: ArraySize::Constant(4),
        });
        let array_again = types.intern(TypeKind::Array {
            element: b,
            size: ArraySize::Constant(4),
        });

        assert_eq!(a, b);
        assert_eq!(array, array_again);
        assert_ne!(a, f32);
        assert_eq!(types.len(), 3);
    }

    #[test]
    fn layout_follows_wgsl_rules() {
        let mut types = TypeTable::new();

        let vec3 = types.vector(3, ScalarKind::F32);
        let mat = types.intern(TypeKind::Matrix {
            columns: 4,
            rows: 3,
            scalar: ScalarKind::F32,
        });
        let array = types.intern(TypeKind::Array {
            element: vec3,
            size: ArraySize::Constant(2),
        });
        let half2 = types.vector(2, ScalarKind::F16);

        assert_eq!((types.align_of(vec3), types.size_of(vec3)), (16, 12));
        assert_eq!((types.align_of(mat), types.size_of(mat)), (16, 64));
        assert_eq!(types.stride_of(vec3), 16);
        assert_eq!(types.size_of(array), 32);
        assert_eq!((types.align_of(half2), types.size_of(half2)), (4, 4));
    }

    #[test]
    fn abstract_types_convert_to_concrete() {
        let mut types = TypeTable::new();

        let abstract_int = types.scalar(ScalarKind::AbstractInt);
        let abstract_vec = types.vector(3, ScalarKind::AbstractFloat);
        let u32 = types.u32();
        let f32 = types.f32();
        let vec3f = types.vector(3, ScalarKind::F32);
        let vec3u = types.vector(3, ScalarKind::U32);

        assert!(types.converts_to(abstract_int, u32));
        assert!(types.converts_to(abstract_int, f32));
        assert!(types.converts_to(abstract_vec, vec3f));
        assert!(!types.converts_to(abstract_vec, vec3u));
        assert!(!types.converts_to(u32, f32));
        assert_eq!(types.concretize(abstract_vec), vec3f);
        assert_eq!(types.name(abstract_vec), "vec3<abstract-float>");
    }
}

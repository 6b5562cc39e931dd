//! The pipeline interface of an entry point: which values flow in and out
//! through `@builtin` and `@location`.

use strum::{Display, EnumString};

use crate::{
    frontend::ast::{Attribute, AttributeKind, DeclarationId},
    middle::{
        builtin::BuiltinValue,
        constant::ConstValue,
        program::Program,
        ty::{TypeId, TypeKind},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum InterpolationKind {
    Perspective,
    Linear,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum InterpolationSampling {
    Center,
    Centroid,
    Sample,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interpolation {
    pub kind: InterpolationKind,
    pub sampling: Option<InterpolationSampling>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoKind {
    Builtin(BuiltinValue),
    Location(u32),
}

/// One scalar or vector crossing the pipeline interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoBinding {
    /// The parameter or struct member name
    pub name: String,
    pub ty: TypeId,
    pub kind: IoKind,
    pub interpolation: Option<Interpolation>,
    pub invariant: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoValue {
    Single(IoBinding),
    /// A struct whose members each carry their own IO attributes
    Struct {
        ty: TypeId,
        /// The parameter name, or `result` for the return value
        name: String,
        members: Vec<IoBinding>,
    },
}

impl IoValue {
    pub fn bindings(&self) -> &[IoBinding] {
        match self {
            Self::Single(binding) => std::slice::from_ref(binding),
            Self::Struct { members, .. } => members,
        }
    }

    pub fn ty(&self) -> TypeId {
        match self {
            Self::Single(binding) => binding.ty,
            Self::Struct { ty, .. } => *ty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntryPointInterface {
    /// One value per parameter, in order
    pub inputs: Vec<IoValue>,
    pub output: Option<IoValue>,
}

impl EntryPointInterface {
    /// The interface of an entry point of a valid program. Returns `None` for
    /// functions that are not entry points.
    pub fn of(program: &Program, function: DeclarationId) -> Option<Self> {
        let declaration = program.module.declaration(function).as_function()?;
        let info = program.function(function)?;
        info.stage?;

        let inputs = declaration
            .parameters
            .iter()
            .zip(&info.parameters)
            .map(|(parameter, ty)| io_value(program, &parameter.attributes, program.name(parameter.name), *ty))
            .collect::<Option<Vec<_>>>()?;

        let output = match info.return_type {
            Some(ty) => Some(io_value(program, &declaration.return_attributes, "result", ty)?),
            None => None,
        };

        Some(Self { inputs, output })
    }

    pub fn input_bindings(&self) -> impl Iterator<Item = &IoBinding> {
        self.inputs.iter().flat_map(IoValue::bindings)
    }

    pub fn output_bindings(&self) -> impl Iterator<Item = &IoBinding> {
        self.output.iter().flat_map(IoValue::bindings)
    }
}

fn io_value(program: &Program, attributes: &[Attribute], name: &str, ty: TypeId) -> Option<IoValue> {
    let TypeKind::Struct(structure) = program.types.get(ty) else {
        return io_binding(program, attributes, name, ty).map(IoValue::Single);
    };

    let declaration = program.module.declaration(structure.declaration).as_struct()?;

    let members = declaration
        .members
        .iter()
        .zip(&structure.members)
        .map(|(member, resolved)| io_binding(program, &member.attributes, &resolved.name, resolved.ty))
        .collect::<Option<Vec<_>>>()?;

    Some(IoValue::Struct {
        ty,
        name: name.to_string(),
        members,
    })
}

fn io_binding(program: &Program, attributes: &[Attribute], name: &str, ty: TypeId) -> Option<IoBinding> {
    let mut kind = None;
    let mut interpolation = None;
    let mut invariant = false;

    for attribute in attributes {
        match attribute.kind {
            AttributeKind::Builtin(builtin) => kind = Some(IoKind::Builtin(program.name(builtin).parse().ok()?)),
            AttributeKind::Location(expression) => {
                let value = program.expression(expression)?.value.as_ref().and_then(ConstValue::as_i64)?;
                kind = Some(IoKind::Location(u32::try_from(value).ok()?));
            }
            AttributeKind::Interpolate { kind, sampling } => {
                interpolation = Some(Interpolation {
                    kind: program.name(kind).parse().ok()?,
                    sampling: match sampling {
                        Some(sampling) => Some(program.name(sampling).parse().ok()?),
                        None => None,
                    },
                });
            }
            AttributeKind::Invariant => invariant = true,
            _ => {}
        }
    }

    Some(IoBinding {
        name: name.to_string(),
        ty,
        kind: kind?,
        interpolation,
        invariant,
    })
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::{diagnostics::DEFAULT_MAX_ERRORS, frontend::SourceFile};

    #[test]
    fn struct_members_carry_their_attributes() {
        let program = Program::from_source(
            &SourceFile::from_memory(indoc! {"
                struct VertexOutput {
                    @builtin(position) position: vec4<f32>,
                    @location(2) @interpolate(flat) index: u32,
                }

                @vertex
                fn main(@builtin(vertex_index) index: u32) -> VertexOutput {
                    return VertexOutput(vec4<f32>(0.0), index);
                }
            "}),
            DEFAULT_MAX_ERRORS,
        );
        assert!(program.is_valid(), "{:#?}", program.diagnostics);

        let main = program.module.find_declaration("main").unwrap();
        let interface = EntryPointInterface::of(&program, main).unwrap();

        let inputs = interface.input_bindings().map(|binding| binding.kind).collect::<Vec<_>>();
        assert_eq!(inputs, [IoKind::Builtin(BuiltinValue::VertexIndex)]);

        let outputs = interface.output_bindings().collect::<Vec<_>>();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].kind, IoKind::Builtin(BuiltinValue::Position));
        assert_eq!(outputs[1].kind, IoKind::Location(2));
        assert_eq!(outputs[1].name, "index");
        assert_eq!(
            outputs[1].interpolation.map(|interpolation| interpolation.kind),
            Some(InterpolationKind::Flat)
        );
    }
}

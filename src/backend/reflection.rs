//! The reflection manifest: what a pipeline layout has to provide for each
//! entry point of the generated code.

use std::{collections::BTreeMap, fmt};

use crate::{
    backend::Target,
    frontend::ast::PipelineStage,
    middle::{
        program::{BindingPoint, GlobalKind, Program},
        ty::{AccessMode, AddressSpace, SamplerKind, TextureDimension, TextureKind, TypeId, TypeKind},
    },
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reflection {
    pub entry_points: Vec<EntryPointReflection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPointReflection {
    pub name: String,
    /// The name of the function exported by the generated code
    pub function: String,
    pub stage: PipelineStage,
    /// Only set for compute entry points
    pub workgroup_size: Option<[u32; 3]>,
    /// Ordered by binding point
    pub resources: Vec<ResourceBinding>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBinding {
    pub binding: BindingPoint,
    pub name: String,
    pub kind: ResourceKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    UniformBuffer,
    StorageBuffer { access: AccessMode },
    Texture { dimension: TextureDimension, kind: TextureKind },
    Sampler(SamplerKind),
}

impl Reflection {
    /// Reflects every entry point of a valid program, in declaration order
    pub fn of(program: &Program, target: Target) -> Self {
        let entry_points = program
            .entry_points()
            .filter_map(|(id, function, info)| {
                let stage = info.stage?;
                let name = program.name(function.name).to_string();

                let resources = info
                    .transitive_globals
                    .iter()
                    .filter_map(|global| {
                        let info = program.global(*global)?;
                        let binding = info.binding?;
                        let name = program.module.declaration(*global).name()?;

                        Some((
                            binding,
                            ResourceBinding {
                                binding,
                                name: program.name(name).to_string(),
                                kind: resource_kind(program, &info.kind, info.ty)?,
                            },
                        ))
                    })
                    .collect::<BTreeMap<_, _>>()
                    .into_values()
                    .collect();

                Some(EntryPointReflection {
                    function: target.entry_point_function(&name),
                    name,
                    stage,
                    workgroup_size: match stage {
                        PipelineStage::Compute => program.resolved_workgroup_size(id),
                        _ => None,
                    },
                    resources,
                })
            })
            .collect();

        Self { entry_points }
    }

    pub fn entry_point(&self, name: &str) -> Option<&EntryPointReflection> {
        self.entry_points.iter().find(|entry_point| entry_point.name == name)
    }
}

fn resource_kind(program: &Program, kind: &GlobalKind, ty: TypeId) -> Option<ResourceKind> {
    let GlobalKind::Var { space, access } = *kind else {
        return None;
    };

    match space {
        AddressSpace::Uniform => Some(ResourceKind::UniformBuffer),
        AddressSpace::Storage => Some(ResourceKind::StorageBuffer { access }),
        AddressSpace::Handle => match *program.types.get(ty) {
            TypeKind::Texture { dimension, kind } => Some(ResourceKind::Texture { dimension, kind }),
            TypeKind::Sampler(kind) => Some(ResourceKind::Sampler(kind)),
            _ => None,
        },
        _ => None,
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UniformBuffer => write!(f, "uniform buffer"),
            Self::StorageBuffer { access } => write!(f, "storage buffer ({access})"),
            Self::Texture { dimension, kind } => match kind {
                TextureKind::Sampled { sampled, multisampled } => {
                    let multisampled = if *multisampled { " multisampled" } else { "" };
                    write!(f, "texture {dimension}<{sampled}>{multisampled}")
                }
                TextureKind::Depth { multisampled } => {
                    let multisampled = if *multisampled { " multisampled" } else { "" };
                    write!(f, "depth texture {dimension}{multisampled}")
                }
                TextureKind::Storage { format, access } => write!(f, "storage texture {dimension}<{format}, {access}>"),
            },
            Self::Sampler(kind) => write!(f, "sampler ({kind})"),
        }
    }
}

impl fmt::Display for Reflection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry_point in &self.entry_points {
            write!(f, "{} {}", entry_point.stage, entry_point.name)?;

            if entry_point.function != entry_point.name {
                write!(f, " as {}", entry_point.function)?;
            }

            if let Some([x, y, z]) = entry_point.workgroup_size {
                write!(f, " @workgroup_size({x}, {y}, {z})")?;
            }

            writeln!(f)?;

            for resource in &entry_point.resources {
                writeln!(f, "  {} {}: {}", resource.binding, resource.name, resource.kind)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::{frontend::SourceFile, middle::ty::ScalarKind};

    #[test]
    fn resources_are_listed_in_binding_order() {
        let program = Program::from_source(
            &SourceFile::from_memory(indoc! {"
                @group(1) @binding(0) var<storage, read_write> output: array<f32>;
                @group(0) @binding(3) var<uniform> scale: f32;
                @group(0) @binding(1) var image: texture_2d<f32>;
                @group(0) @binding(2) var smp: sampler;
                @group(0) @binding(7) var<storage> unused: array<f32>;

                @compute @workgroup_size(8, 8)
                fn main(@builtin(global_invocation_id) id: vec3<u32>) {
                    let texel = textureLoad(image, vec2<i32>(id.xy), 0);
                    output[id.x] = texel.x * scale;
                }

                @fragment
                fn shade(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
                    return textureSample(image, smp, uv);
                }
            "}),
            10,
        );
        assert!(program.is_valid(), "{:#?}", program.diagnostics);

        let reflection = Reflection::of(&program, Target::Vulkan);
        let main = reflection.entry_point("main").unwrap();

        assert_eq!(main.stage, PipelineStage::Compute);
        assert_eq!(main.workgroup_size, Some([8, 8, 1]));
        assert_eq!(
            main.resources
                .iter()
                .map(|resource| (resource.binding, resource.kind))
                .collect::<Vec<_>>(),
            [
                (
                    BindingPoint::new(0, 1),
                    ResourceKind::Texture {
                        dimension: TextureDimension::D2,
                        kind: TextureKind::Sampled {
                            sampled: ScalarKind::F32,
                            multisampled: false
                        }
                    }
                ),
                (BindingPoint::new(0, 3), ResourceKind::UniformBuffer),
                (
                    BindingPoint::new(1, 0),
                    ResourceKind::StorageBuffer {
                        access: AccessMode::ReadWrite
                    }
                ),
            ]
        );

        let shade = reflection.entry_point("shade").unwrap();
        assert_eq!(shade.workgroup_size, None);
        assert_eq!(shade.resources[1].kind, ResourceKind::Sampler(SamplerKind::Filtering));
    }

    #[test]
    fn manifests_print_one_line_per_resource() {
        let program = Program::from_source(
            &SourceFile::from_memory(
                "@group(0) @binding(0) var<storage, read_write> data: array<u32>;\n\
                 @compute @workgroup_size(64) fn main() { data[0] = 1u; }\n",
            ),
            10,
        );

        assert_eq!(
            Reflection::of(&program, Target::Metal).to_string(),
            "compute main as main_ @workgroup_size(64, 1, 1)\n  @group(0) @binding(0) data: storage buffer (read_write)\n"
        );
    }
}

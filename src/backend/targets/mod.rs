use strum::{Display, EnumIter, EnumString};

use crate::{
    backend::{BackendError, Capabilities},
    middle::{ir, program::Program},
};

mod glsl;
mod hlsl;
mod msl;
mod spirv;

pub trait CodeGenerator {
    /// Generates code for every entry point left in `program`. `module` is
    /// the IR lowered from the same program.
    fn generate(&self, program: &Program, module: &ir::Module) -> Result<String, BackendError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Target {
    /// SPIR-V assembly
    #[default]
    Vulkan,
    /// HLSL shader model 6
    D3d12,
    /// Metal Shading Language 2
    Metal,
    /// GLSL 4.50
    Opengl,
}

impl Target {
    pub fn capabilities(self) -> Capabilities {
        match self {
            Target::Vulkan => Capabilities {
                bind_groups: true,
                overrides: false,
                array_length: true,
                f16: true,
                phony: true,
            },
            Target::D3d12 => Capabilities {
                bind_groups: true,
                overrides: false,
                array_length: true,
                f16: true,
                phony: false,
            },
            Target::Metal => Capabilities {
                bind_groups: false,
                overrides: false,
                array_length: false,
                f16: true,
                phony: false,
            },
            Target::Opengl => Capabilities {
                bind_groups: false,
                overrides: false,
                array_length: true,
                f16: false,
                phony: false,
            },
        }
    }

    pub fn get_code_generator(self) -> Box<dyn CodeGenerator> {
        match self {
            Target::Vulkan => Box::new(spirv::SpirvGenerator),
            Target::D3d12 => Box::new(hlsl::HlslGenerator),
            Target::Metal => Box::new(msl::MslGenerator),
            Target::Opengl => Box::new(glsl::GlslGenerator),
        }
    }

    /// Whether the generated code can hold more than one entry point
    pub fn supports_multiple_entry_points(self) -> bool {
        self != Target::Opengl
    }

    /// The name of the function the generated code exports for the entry
    /// point `name`
    pub fn entry_point_function(self, name: &str) -> String {
        match self {
            Target::Vulkan | Target::D3d12 => name.to_string(),
            Target::Metal => msl::entry_point_function(name),
            Target::Opengl => "main".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn targets_parse_from_their_names() {
        for target in Target::iter() {
            assert_eq!(Target::from_str(&target.to_string()), Ok(target));
        }

        assert_eq!(Target::from_str("d3d12"), Ok(Target::D3d12));
        assert!(Target::from_str("webgl").is_err());
    }

    #[test]
    fn only_grouped_targets_keep_bind_groups() {
        let grouped = Target::iter().filter(|target| target.capabilities().bind_groups).collect::<Vec<_>>();

        assert_eq!(grouped, [Target::Vulkan, Target::D3d12]);
    }
}

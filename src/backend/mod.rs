//! The backend turns a legalized [`Program`] into the shader representation a
//! graphics driver consumes. SPIR-V is generated from the IR; HLSL, MSL and
//! GLSL share one structured writer over the resolved AST.
//!
//! Every target publishes its [`Capabilities`]. The driver picks the
//! legalization transforms a target needs from them, and [`check_capabilities`]
//! rejects whatever is still left that the target cannot express.

use thiserror::Error;

use crate::{
    frontend::lexer::Span,
    middle::{builtin::BuiltinFunction, program::Program},
};

mod assemblers;
mod c_like;
pub mod reflection;
pub mod targets;

pub use reflection::{EntryPointReflection, Reflection, ResourceBinding, ResourceKind};
pub use targets::{CodeGenerator, Target};

/// What a target can express natively
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Capabilities {
    /// Resources are addressed by `(group, binding)`. Without bind groups all
    /// bindings are flattened into group 0.
    pub bind_groups: bool,
    /// Pipeline-overridable constants survive into the generated code
    pub overrides: bool,
    /// `arrayLength` maps onto a native query
    pub array_length: bool,
    pub f16: bool,
    /// Phony assignments `_ = e;` can be emitted as is
    pub phony: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("override '{name}' must be substituted before generating {target} code")]
    Override { target: Target, name: String, span: Span },
    #[error("'arrayLength' has no native support on {target}")]
    ArrayLength { target: Target, span: Span },
    #[error("'f16' is not supported on {target}")]
    F16 { target: Target, span: Span },
    #[error("{target} cannot express {feature}")]
    Unsupported { target: Target, feature: String, span: Span },
    #[error("{target} code generation failed: {message}")]
    Internal { target: Target, message: String },
}

impl BackendError {
    pub fn span(&self) -> Span {
        match self {
            Self::Override { span, .. }
            | Self::ArrayLength { span, .. }
            | Self::F16 { span, .. }
            | Self::Unsupported { span, .. } => *span,
            Self::Internal { .. } => Span::default(),
        }
    }

    pub fn unsupported(target: Target, feature: impl Into<String>, span: Span) -> Self {
        Self::Unsupported {
            target,
            feature: feature.into(),
            span,
        }
    }

    pub fn internal(target: Target, message: impl Into<String>) -> Self {
        Self::Internal {
            target,
            message: message.into(),
        }
    }
}

/// Rejects constructs a target cannot express and no transform removed
pub fn check_capabilities(program: &Program, target: Target) -> Result<(), BackendError> {
    let capabilities = target.capabilities();

    if !capabilities.overrides {
        if let Some((id, _)) = program.info.globals.iter().find(|(_, global)| global.is_override()) {
            let name = program
                .module
                .declaration(*id)
                .name()
                .map(|name| program.name(name).to_string())
                .unwrap_or_default();

            return Err(BackendError::Override {
                target,
                name,
                span: program.declaration_span(*id),
            });
        }
    }

    if !capabilities.f16 {
        if let Some(enable) = program.module.enables.iter().find(|enable| program.name(**enable) == "f16") {
            return Err(BackendError::F16 {
                target,
                span: enable.span,
            });
        }
    }

    if !capabilities.array_length {
        let query = program
            .info
            .functions
            .values()
            .flat_map(|function| &function.builtin_calls)
            .find(|(function, _)| *function == BuiltinFunction::ArrayLength);

        if let Some((_, span)) = query {
            return Err(BackendError::ArrayLength { target, span: *span });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::SourceFile;

    fn program(source: &str) -> Program {
        let program = Program::from_source(&SourceFile::from_memory(source), 10);
        assert!(program.is_valid(), "{:#?}", program.diagnostics);
        program
    }

    #[test]
    fn overrides_are_rejected_everywhere() {
        let program = program("override scale = 1.0;\n@fragment fn main() -> @location(0) f32 { return scale; }\n");

        for target in [Target::Vulkan, Target::D3d12, Target::Metal, Target::Opengl] {
            let error = check_capabilities(&program, target).unwrap_err();
            assert!(matches!(error, BackendError::Override { ref name, .. } if name == "scale"));
        }
    }

    #[test]
    fn f16_is_rejected_on_opengl() {
        let program = program("enable f16;\n@fragment fn main() -> @location(0) vec4<f32> { let x = 1.0h; return vec4(f32(x)); }\n");

        assert!(check_capabilities(&program, Target::Vulkan).is_ok());
        assert!(check_capabilities(&program, Target::Metal).is_ok());

        let error = check_capabilities(&program, Target::Opengl).unwrap_err();
        assert_eq!(error.to_string(), "'f16' is not supported on opengl");
    }

    #[test]
    fn array_length_needs_native_support() {
        let program = program(
            "@group(0) @binding(0) var<storage, read_write> data: array<u32>;\n\
             @compute @workgroup_size(1) fn main() { data[0] = arrayLength(&data); }\n",
        );

        assert!(check_capabilities(&program, Target::D3d12).is_ok());
        assert!(matches!(
            check_capabilities(&program, Target::Metal),
            Err(BackendError::ArrayLength { target: Target::Metal, .. })
        ));
    }
}

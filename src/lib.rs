//! `wgslc` compiles WGSL shaders into the shader representation of a graphics
//! backend: SPIR-V assembly for Vulkan, HLSL for Direct3D 12, MSL for Metal
//! and GLSL for OpenGL.
//!
//! ```no_run
//! use wgslc::{CompileOptions, SourceFile, Target, compile};
//!
//! let source = SourceFile::from_memory("@vertex fn main() -> @builtin(position) vec4<f32> { return vec4<f32>(); }");
//! let shader = compile(&source, &CompileOptions::new(Target::Metal)).unwrap();
//! println!("{}", shader.code);
//! ```
//!
//! A compilation owns all of its state, so independent compilations can run
//! on different threads.

use std::time::Instant;

use log::debug;
use thiserror::Error;

pub mod backend;
pub mod diagnostics;
pub mod frontend;
pub mod index;
pub mod middle;
pub mod options;

pub use backend::{Reflection, Target};
pub use diagnostics::{Diagnostic, DiagnosticSource, Diagnostics, Severity};
pub use frontend::{SourceFile, SourceFileOrigin};
pub use middle::{optimization::OptLevel, program::Program};
pub use options::CompileOptions;

use crate::middle::{
    ir::{self, builder::build_module, validate::validate},
    optimization::optimize,
    program::BindingPoint,
    transform::{
        ArrayLengthFromUniform, ArrayLengthFromUniformOptions, BindingRemapper, DataMap, EntryPointSelection,
        Manager, OverrideValues, RemovePhonies, SingleEntryPoint, SubstituteOverride,
    },
};

/// The output of a successful compilation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledShader {
    pub target: Target,
    pub code: String,
    pub reflection: Reflection,
}

/// A compilation that failed. `report` is the rendered diagnostics without
/// terminal colors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("compilation failed with {} error(s)\n{report}", count_errors(.diagnostics))]
pub struct CompileError {
    pub diagnostics: Vec<Diagnostic>,
    pub report: String,
}

fn count_errors(diagnostics: &[Diagnostic]) -> usize {
    diagnostics
        .iter()
        .filter(|diagnostic| diagnostic.severity.is_error())
        .count()
}

impl CompileError {
    fn new(source: &SourceFile, diagnostics: Diagnostics) -> Self {
        Self {
            report: diagnostics.render_plain(source),
            diagnostics: diagnostics.into_vec(),
        }
    }

    /// The diagnostics rendered with colors, for terminals
    pub fn render(&self, source: &SourceFile) -> String {
        self.diagnostics
            .iter()
            .map(|diagnostic| diagnostic.render(source))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Compiles `source` for `options.target`
pub fn compile(source: &SourceFile, options: &CompileOptions) -> Result<CompiledShader, CompileError> {
    let program = analyze(source, options)?;
    let program = legalize(source, &program, options)?;
    let module = lower(source, &program, options)?;

    let start = Instant::now();
    let generator = options.target.get_code_generator();

    let code = generator.generate(&program, &module).map_err(|error| {
        let mut diagnostics = program.diagnostics.clone();
        let span = error.span();
        report_error!(diagnostics, DiagnosticSource::Backend, span, "{error}");
        CompileError::new(source, diagnostics)
    })?;

    debug!("generated {} code in {:?}", options.target, start.elapsed());

    Ok(CompiledShader {
        target: options.target,
        code,
        reflection: Reflection::of(&program, options.target),
    })
}

/// Parses and resolves `source`
pub fn analyze(source: &SourceFile, options: &CompileOptions) -> Result<Program, CompileError> {
    let start = Instant::now();
    let program = Program::from_source(source, options.max_errors);
    debug!("analyzed {} in {:?}", source.origin, start.elapsed());

    if !program.is_valid() {
        return Err(CompileError::new(source, program.diagnostics));
    }

    Ok(program)
}

/// Runs the transforms `options.target` needs on a valid program
pub fn legalize(source: &SourceFile, program: &Program, options: &CompileOptions) -> Result<Program, CompileError> {
    let capabilities = options.target.capabilities();
    let mut manager = Manager::new();
    let mut inputs = DataMap::new();

    let entry_point = match &options.entry_point {
        Some(name) => Some(name.clone()),
        // A single entry point target still compiles a lone entry point
        // without being told its name
        None if !options.target.supports_multiple_entry_points() => {
            let mut entry_points = program.entry_points();

            match (entry_points.next(), entry_points.next()) {
                (Some((_, function, _)), None) => Some(program.name(function.name).to_string()),
                _ => None,
            }
        }
        None => None,
    };

    if let Some(name) = entry_point {
        manager.add(SingleEntryPoint);
        inputs.put(EntryPointSelection::new(name));
    }

    manager.add(SubstituteOverride);
    inputs.put(OverrideValues {
        entries: options.overrides.clone(),
    });

    if !capabilities.phony {
        manager.add(RemovePhonies);
    }

    if !capabilities.bind_groups || !capabilities.array_length {
        manager.add(BindingRemapper);
    }

    if !capabilities.array_length {
        manager.add(ArrayLengthFromUniform);

        let buffers = program
            .info
            .globals
            .values()
            .filter(|global| program.types.has_runtime_size(global.ty))
            .filter_map(|global| global.binding)
            .collect::<std::collections::BTreeSet<_>>();

        let bound = program
            .info
            .globals
            .values()
            .filter(|global| global.binding.is_some())
            .count();

        inputs.put(ArrayLengthFromUniformOptions {
            uniform_binding: options
                .array_length_binding
                .unwrap_or(BindingPoint::new(0, bound as u32)),
            size_indices: buffers.into_iter().zip(0..).collect(),
        });
    }

    let start = Instant::now();
    let output = manager.run(program, inputs);
    debug!("ran {} transforms in {:?}", manager.len(), start.elapsed());

    if !output.program.is_valid() {
        return Err(CompileError::new(source, output.program.diagnostics));
    }

    Ok(output.program)
}

/// Lowers a legalized program into optimized IR
pub fn lower(source: &SourceFile, program: &Program, options: &CompileOptions) -> Result<ir::Module, CompileError> {
    let start = Instant::now();
    let mut diagnostics = program.diagnostics.clone();

    let Some(mut module) = build_module(program, &mut diagnostics) else {
        return Err(CompileError::new(source, diagnostics));
    };

    for error in validate(&module) {
        diagnostics.add_internal_error(DiagnosticSource::IrBuilder, Default::default(), error.to_string());
    }

    if diagnostics.contains_errors() {
        return Err(CompileError::new(source, diagnostics));
    }

    optimize(&mut module, options.opt_level);
    debug!(
        "lowered to {} instructions in {:?}",
        module.instruction_count(),
        start.elapsed()
    );

    Ok(module)
}

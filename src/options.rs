use crate::{
    backend::Target,
    diagnostics::DEFAULT_MAX_ERRORS,
    middle::{optimization::OptLevel, program::BindingPoint},
};

/// Everything that controls one compilation
#[derive(Debug, Clone, PartialEq)]
pub struct CompileOptions {
    pub target: Target,
    /// Compile only this entry point. Targets holding a single entry point
    /// require it when the source declares several.
    pub entry_point: Option<String>,
    /// Pipeline constants, keyed by override name or decimal `@id`
    pub overrides: Vec<(String, f64)>,
    pub max_errors: usize,
    pub opt_level: OptLevel,
    /// Where buffer sizes are read from on targets without a native
    /// `arrayLength`. Defaults to group 0, after every other binding.
    pub array_length_binding: Option<BindingPoint>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            target: Target::default(),
            entry_point: None,
            overrides: Vec::new(),
            max_errors: DEFAULT_MAX_ERRORS,
            opt_level: OptLevel::default(),
            array_length_binding: None,
        }
    }
}

impl CompileOptions {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            ..Self::default()
        }
    }

    pub fn with_entry_point(mut self, name: impl Into<String>) -> Self {
        self.entry_point = Some(name.into());
        self
    }

    pub fn with_override(mut self, key: impl Into<String>, value: f64) -> Self {
        self.overrides.push((key.into(), value));
        self
    }

    pub fn with_opt_level(mut self, level: OptLevel) -> Self {
        self.opt_level = level;
        self
    }
}

//! Program to program rewrites run before code generation.
//!
//! A transform reads a [`Program`] plus typed input data and either returns
//! a rewritten program or `None` when it has nothing to do. Data produced by
//! one transform is visible to every transform that runs after it.

use std::{
    any::{Any, TypeId},
    collections::BTreeMap,
    fmt::Debug,
    sync::Arc,
};

use log::{debug, trace};

use crate::{
    diagnostics::DiagnosticSource,
    frontend::{
        ast::{self, ExpressionId, ExpressionKind},
        lexer::Span,
    },
    middle::program::Program,
    report_error,
};

mod array_length_from_uniform;
mod binding_remapper;
mod remove_phonies;
mod single_entry_point;
mod substitute_override;

pub use array_length_from_uniform::{
    ArrayLengthFromUniform, ArrayLengthFromUniformOptions, ArrayLengthFromUniformResult,
};
pub use binding_remapper::{BindingRemapOptions, BindingRemapper, RemappedBindings};
pub use remove_phonies::RemovePhonies;
pub use single_entry_point::{EntryPointSelection, PinnedOverrideIds, SingleEntryPoint};
pub use substitute_override::{OverrideValueError, OverrideValues, SubstituteOverride, SubstitutedOverrides};

/// Identifies one kind of transform data by its Rust type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DataKind {
    id: TypeId,
    name: &'static str,
}

impl DataKind {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>().rsplit("::").next().unwrap_or_default(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl core::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// Typed values keyed by their type. Holds at most one value per type.
#[derive(Clone, Default)]
pub struct DataMap {
    entries: BTreeMap<DataKind, Arc<dyn Any + Send + Sync>>,
}

impl DataMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, replacing any previous value of the same type
    pub fn put<T: Any + Send + Sync>(&mut self, value: T) {
        self.entries.insert(DataKind::of::<T>(), Arc::new(value));
    }

    pub fn with<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.put(value);
        self
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.entries.get(&DataKind::of::<T>())?.downcast_ref()
    }

    pub fn contains(&self, kind: DataKind) -> bool {
        self.entries.contains_key(&kind)
    }

    /// Moves every entry of `other` into `self`, overwriting duplicates
    pub fn extend(&mut self, other: DataMap) {
        self.entries.extend(other.entries);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Debug for DataMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.entries.keys().map(DataKind::name)).finish()
    }
}

pub trait Transform: Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Data that must be present in the inputs before the transform runs
    fn requires(&self) -> Vec<DataKind> {
        Vec::new()
    }

    /// Rewrites `program`. Returns `None` when the program needs no changes;
    /// errors are reported through an invalid returned program.
    fn apply(&self, program: &Program, inputs: &DataMap, outputs: &mut DataMap) -> Option<Program>;
}

#[derive(Debug)]
pub struct Output {
    pub program: Program,
    /// Everything produced by the transforms that ran
    pub data: DataMap,
}

/// Runs a sequence of transforms, feeding each one the inputs plus the data
/// produced by the transforms before it
#[derive(Debug, Default)]
pub struct Manager {
    transforms: Vec<Box<dyn Transform>>,
}

impl Manager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, transform: impl Transform + 'static) -> &mut Self {
        self.transforms.push(Box::new(transform));
        self
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Stops at the first transform that returns an invalid program
    pub fn run(&self, program: &Program, inputs: DataMap) -> Output {
        let mut current = None::<Program>;
        let mut available = inputs;
        let mut data = DataMap::new();

        for transform in &self.transforms {
            let input = current.as_ref().unwrap_or(program);

            if let Some(missing) = transform.requires().into_iter().find(|kind| !available.contains(*kind)) {
                current = Some(error_program(
                    input,
                    Span::default(),
                    format!("missing transform data for {}: {missing}", transform.name()),
                ));
                break;
            }

            debug!("running transform {}", transform.name());

            let mut produced = DataMap::new();
            let output = transform.apply(input, &available, &mut produced);

            available.extend(produced.clone());
            data.extend(produced);

            match output {
                Some(output) => {
                    let valid = output.is_valid();
                    current = Some(output);

                    if !valid {
                        debug!("transform {} produced an invalid program", transform.name());
                        break;
                    }
                }
                None => trace!("transform {} skipped", transform.name()),
            }
        }

        Output {
            program: current.unwrap_or_else(|| program.clone()),
            data,
        }
    }
}

/// A copy of `program` carrying one more error
pub(crate) fn error_program(program: &Program, span: Span, message: String) -> Program {
    let mut program = program.clone();
    report_error!(program.diagnostics, DiagnosticSource::Transform, span, "{message}");
    program
}

/// A name starting with `base` that no identifier of `module` uses
pub(crate) fn unique_name(module: &ast::Module, base: &str) -> String {
    if module.symbols.lookup(base).is_none() {
        return base.to_string();
    }

    (1..)
        .map(|n| format!("{base}_{n}"))
        .find(|name| module.symbols.lookup(name).is_none())
        .unwrap_or_else(|| base.to_string())
}

/// The expression inside any number of parentheses
pub(crate) fn strip_groupings(module: &ast::Module, mut expression: ExpressionId) -> ExpressionId {
    while let ExpressionKind::Grouping(inner) = module.expression(expression).kind {
        expression = inner;
    }

    expression
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{diagnostics::DEFAULT_MAX_ERRORS, frontend::SourceFile, frontend::ast::printer::print_module};

    pub fn program(source: &str) -> Program {
        let program = Program::from_source(&SourceFile::from_memory(source), DEFAULT_MAX_ERRORS);
        assert!(program.is_valid(), "{:#?}", program.diagnostics);
        program
    }

    pub fn printed(program: &Program) -> String {
        print_module(&program.module)
    }

    pub fn errors(program: &Program) -> Vec<String> {
        program
            .diagnostics
            .iter()
            .filter(|diagnostic| diagnostic.severity.is_error())
            .map(|diagnostic| diagnostic.message.clone())
            .collect()
    }

    #[derive(Debug)]
    struct Counter;

    #[derive(Debug, PartialEq)]
    struct Count(usize);

    impl Transform for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn apply(&self, program: &Program, inputs: &DataMap, outputs: &mut DataMap) -> Option<Program> {
            let count = inputs.get::<Count>().map_or(0, |count| count.0);
            outputs.put(Count(count + program.module.declarations.len()));
            None
        }
    }

    #[derive(Debug)]
    struct NeedsSelection;

    impl Transform for NeedsSelection {
        fn name(&self) -> &str {
            "needs-selection"
        }

        fn requires(&self) -> Vec<DataKind> {
            vec![DataKind::of::<EntryPointSelection>()]
        }

        fn apply(&self, _: &Program, _: &DataMap, _: &mut DataMap) -> Option<Program> {
            unreachable!("requirements are checked first")
        }
    }

    #[test]
    fn later_transforms_see_earlier_outputs() {
        let program = program("fn a() {}\nfn b() {}\n");

        let mut manager = Manager::new();
        manager.add(Counter).add(Counter);

        let output = manager.run(&program, DataMap::new());

        assert!(output.program.is_valid());
        assert_eq!(output.data.get::<Count>(), Some(&Count(4)));
    }

    #[test]
    fn missing_inputs_are_reported() {
        let program = program("fn a() {}\n");

        let mut manager = Manager::new();
        manager.add(NeedsSelection);

        let output = manager.run(&program, DataMap::new());

        assert_eq!(
            errors(&output.program),
            ["missing transform data for needs-selection: EntryPointSelection"]
        );
    }

    #[test]
    fn data_is_keyed_by_type() {
        let mut data = DataMap::new().with(Count(1)).with(Count(2));
        data.put(EntryPointSelection::new("main"));

        assert_eq!(data.len(), 2);
        assert_eq!(data.get::<Count>(), Some(&Count(2)));
        assert!(data.contains(DataKind::of::<EntryPointSelection>()));
        assert!(format!("{data:?}").contains("\"Count\""));
    }

    #[test]
    fn unique_names_avoid_existing_identifiers() {
        let program = program("var<private> sizes: u32;\nfn f() { let sizes_1 = 1; }\n");

        assert_eq!(unique_name(&program.module, "buffers"), "buffers");
        assert_eq!(unique_name(&program.module, "sizes"), "sizes_2");
    }
}

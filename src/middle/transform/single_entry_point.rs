//! Strips a module down to one entry point and what it uses.

use std::collections::BTreeSet;

use log::debug;

use crate::{
    frontend::{
        ast::{Attribute, AttributeKind, Declaration, DeclarationId, DeclarationKind, ExpressionKind, Literal},
        lexer::{IntSuffix, Span},
    },
    index::IndexVec,
    middle::{
        program::{GlobalKind, Program},
        transform::{DataKind, DataMap, Transform, error_program},
        ty::{ArraySize, TypeId, TypeKind, TypeTable},
    },
};

/// The entry point [`SingleEntryPoint`] keeps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPointSelection {
    pub name: String,
}

impl EntryPointSelection {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Overrides whose `@id` attribute was written by [`SingleEntryPoint`]. They
/// are still set by name, not by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinnedOverrideIds {
    pub names: BTreeSet<String>,
}

/// Removes every function, module-scope variable and override the selected
/// entry point does not use. Overrides that survive get their resolved id
/// written as an explicit `@id`, so removal never renumbers them.
#[derive(Debug, Default)]
pub struct SingleEntryPoint;

impl Transform for SingleEntryPoint {
    fn name(&self) -> &str {
        "single-entry-point"
    }

    fn requires(&self) -> Vec<DataKind> {
        vec![DataKind::of::<EntryPointSelection>()]
    }

    fn apply(&self, program: &Program, inputs: &DataMap, outputs: &mut DataMap) -> Option<Program> {
        let selection = inputs.get::<EntryPointSelection>()?;

        let Some((entry_point, _, info)) = program
            .entry_points()
            .find(|(_, function, _)| program.name(function.name) == selection.name)
        else {
            return Some(error_program(
                program,
                Span::default(),
                format!("entry point '{}' not found", selection.name),
            ));
        };

        let functions = info
            .transitive_calls
            .iter()
            .copied()
            .chain([entry_point])
            .collect::<BTreeSet<_>>();

        let removed_globals = program
            .info
            .globals
            .iter()
            .filter(|(id, global)| global.kind != GlobalKind::Const && !info.transitive_globals.contains(id))
            .map(|(id, _)| *id)
            .collect::<BTreeSet<_>>();

        let keep = |id: DeclarationId, declaration: &Declaration| match &declaration.kind {
            DeclarationKind::Function(_) => functions.contains(&id),
            DeclarationKind::Variable(_) => !removed_globals.contains(&id),
            DeclarationKind::Struct(_) | DeclarationKind::Alias(_) => program
                .info
                .type_declarations
                .get(&id)
                .is_none_or(|ty| !sized_by_any(&program.types, *ty, &removed_globals)),
            DeclarationKind::ConstAssert(_) => true,
        };

        let kept = program
            .module
            .declarations
            .enumerate()
            .filter(|(id, declaration)| keep(*id, declaration))
            .map(|(id, _)| id)
            .collect::<Vec<_>>();

        let implicit_ids = kept
            .iter()
            .copied()
            .filter(|id| program.global(*id).is_some_and(|global| global.is_override()))
            .filter(|id| {
                program.module.declaration(*id).as_variable().is_some_and(|variable| {
                    !variable
                        .attributes
                        .iter()
                        .any(|attribute| matches!(attribute.kind, AttributeKind::Id(_)))
                })
            })
            .collect::<BTreeSet<_>>();

        if kept.len() == program.module.declarations.len() && implicit_ids.is_empty() {
            return None;
        }

        debug!(
            "keeping {} of {} declarations for entry point '{}'",
            kept.len(),
            program.module.declarations.len(),
            selection.name
        );

        let mut module = program.module.clone();
        let mut declarations = Vec::with_capacity(kept.len());

        for id in kept {
            let mut declaration = program.module.declaration(id).clone();

            let override_id = program.global(id).and_then(|global| global.override_id);

            if let (true, Some(override_id), DeclarationKind::Variable(variable)) =
                (implicit_ids.contains(&id), override_id, &mut declaration.kind)
            {
                let expression = module.add_expression(
                    ExpressionKind::Literal(Literal::Int(i64::from(override_id), IntSuffix::None)),
                    Span::default(),
                );

                variable.attributes.push(Attribute {
                    span: Span::default(),
                    kind: AttributeKind::Id(expression),
                });
            }

            declarations.push(declaration);
        }

        module.declarations = IndexVec::from_raw(declarations);

        if !implicit_ids.is_empty() {
            let names = implicit_ids
                .iter()
                .filter_map(|id| program.module.declaration(*id).name())
                .map(|name| program.name(name).to_string())
                .collect();

            outputs.put(PinnedOverrideIds { names });
        }

        Some(Program::rebuild(module, program.max_errors()))
    }
}

/// Whether `ty` is, or contains, an array sized by one of `overrides`
fn sized_by_any(types: &TypeTable, ty: TypeId, overrides: &BTreeSet<DeclarationId>) -> bool {
    match types.get(ty) {
        TypeKind::Array { element, size } => {
            matches!(size, ArraySize::Override(id) if overrides.contains(id)) || sized_by_any(types, *element, overrides)
        }
        TypeKind::Struct(structure) => structure
            .members
            .iter()
            .any(|member| sized_by_any(types, member.ty, overrides)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::middle::transform::tests::{errors, printed, program};

    fn run_with_outputs(source: &str, entry_point: &str) -> (Option<Program>, DataMap) {
        let inputs = DataMap::new().with(EntryPointSelection::new(entry_point));
        let mut outputs = DataMap::new();

        let output = SingleEntryPoint.apply(&program(source), &inputs, &mut outputs);
        (output, outputs)
    }

    fn run(source: &str, entry_point: &str) -> Option<Program> {
        run_with_outputs(source, entry_point).0
    }

    #[test]
    fn unknown_entry_points_are_errors() {
        let output = run("@compute @workgroup_size(1) fn main() {}\nfn helper() {}\n", "helper").unwrap();

        assert_eq!(errors(&output), ["entry point 'helper' not found"]);
    }

    #[test]
    fn unused_declarations_are_removed() {
        let output = run(
            indoc! {"
                @group(0) @binding(0) var<storage, read_write> a: array<u32>;
                @group(0) @binding(1) var<storage, read_write> b: array<u32>;
                const scale = 2u;

                fn write_a() {
                    a[0] = scale;
                }

                @compute @workgroup_size(1)
                fn first() {
                    write_a();
                }

                @compute @workgroup_size(1)
                fn second() {
                    b[0] = 1u;
                }
            "},
            "first",
        )
        .unwrap();

        assert!(output.is_valid(), "{:#?}", output.diagnostics);

        let text = printed(&output);
        assert!(text.contains("fn first()"), "{text}");
        assert!(text.contains("fn write_a()"), "{text}");
        assert!(text.contains("const scale"), "{text}");
        assert!(!text.contains("fn second()"), "{text}");
        assert!(!text.contains("var<storage, read_write> b"), "{text}");
        assert_eq!(output.entry_points().count(), 1);
    }

    #[test]
    fn kept_overrides_keep_their_ids() {
        let (output, data) = run_with_outputs(
            indoc! {"
                override unused: f32;
                override width: u32 = 4u;
                @id(7) override height: u32 = 2u;

                @compute @workgroup_size(width, height)
                fn main() {}
            "},
            "main",
        );
        let output = output.unwrap();

        assert!(output.is_valid(), "{:#?}", output.diagnostics);

        let width = output.module.find_declaration("width").unwrap();
        let height = output.module.find_declaration("height").unwrap();

        assert!(output.module.find_declaration("unused").is_none());
        assert_eq!(output.global(width).and_then(|global| global.override_id), Some(1));
        assert_eq!(output.global(height).and_then(|global| global.override_id), Some(7));

        let pinned = data.get::<PinnedOverrideIds>().unwrap();
        assert_eq!(pinned.names.iter().collect::<Vec<_>>(), ["width"]);
    }

    #[test]
    fn nothing_to_remove_is_a_skip() {
        assert!(run("@fragment fn main() -> @location(0) vec4<f32> { return vec4(1.0); }\n", "main").is_none());
    }
}

//! Moves resource variables to new binding points.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::{
    frontend::{
        ast::{AttributeKind, ExpressionKind, Literal},
        lexer::IntSuffix,
    },
    middle::{
        program::{BindingPoint, Program},
        transform::{DataMap, Transform},
    },
};

/// Explicit destinations for some binding points. Every other binding point
/// is moved into group 0, taking the lowest free bindings in binding order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingRemapOptions {
    pub remapped: BTreeMap<BindingPoint, BindingPoint>,
}

/// Where every resource binding of the input program ended up
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemappedBindings {
    pub bindings: BTreeMap<BindingPoint, BindingPoint>,
}

impl RemappedBindings {
    /// The original binding point that was moved to `remapped`
    pub fn original(&self, remapped: BindingPoint) -> Option<BindingPoint> {
        self.bindings
            .iter()
            .find(|(_, to)| **to == remapped)
            .map(|(from, _)| *from)
    }
}

/// Flattens bind groups for backends with a single binding namespace
#[derive(Debug, Default)]
pub struct BindingRemapper;

impl Transform for BindingRemapper {
    fn name(&self) -> &str {
        "binding-remapper"
    }

    fn apply(&self, program: &Program, inputs: &DataMap, outputs: &mut DataMap) -> Option<Program> {
        let empty = BindingRemapOptions::default();
        let options = inputs.get::<BindingRemapOptions>().unwrap_or(&empty);

        let bound = program
            .info
            .globals
            .iter()
            .filter_map(|(id, global)| Some((global.binding?, *id)))
            .collect::<BTreeMap<_, _>>();

        let bindings = remap(bound.keys().copied(), options);

        outputs.put(RemappedBindings {
            bindings: bindings.clone(),
        });

        if bindings.iter().all(|(from, to)| from == to) {
            return None;
        }

        let mut module = program.module.clone();

        for (from, to) in &bindings {
            let Some(variable) = bound.get(from).and_then(|id| program.module.declaration(*id).as_variable()) else {
                continue;
            };

            for attribute in &variable.attributes {
                let (expression, value) = match attribute.kind {
                    AttributeKind::Group(expression) => (expression, to.group),
                    AttributeKind::Binding(expression) => (expression, to.binding),
                    _ => continue,
                };

                // Attribute expressions are not shared between declarations
                module.expressions[expression].kind =
                    ExpressionKind::Literal(Literal::Int(i64::from(value), IntSuffix::None));
            }

            debug!("{from} -> {to}");
        }

        Some(Program::rebuild(module, program.max_errors()))
    }
}

fn remap(points: impl Iterator<Item = BindingPoint>, options: &BindingRemapOptions) -> BTreeMap<BindingPoint, BindingPoint> {
    let points = points.collect::<Vec<_>>();

    let taken = points
        .iter()
        .filter_map(|point| options.remapped.get(point))
        .filter(|to| to.group == 0)
        .map(|to| to.binding)
        .collect::<BTreeSet<_>>();

    let mut free = (0..).filter(move |binding| !taken.contains(binding));

    points
        .into_iter()
        .filter_map(|point| {
            let to = match options.remapped.get(&point) {
                Some(to) => *to,
                None => BindingPoint::new(0, free.next()?),
            };

            Some((point, to))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::middle::transform::tests::{printed, program};

    const SOURCE: &str = indoc! {"
        @group(1) @binding(0) var<storage, read> input: array<f32>;
        @group(1) @binding(1) var<storage, read_write> output: array<f32>;
        @group(0) @binding(4) var<uniform> scale: f32;

        @compute @workgroup_size(1)
        fn main() {
            output[0] = input[0] * scale;
        }
    "};

    fn run(source: &str, options: BindingRemapOptions) -> (Option<Program>, RemappedBindings) {
        let mut outputs = DataMap::new();
        let output = BindingRemapper.apply(&program(source), &DataMap::new().with(options), &mut outputs);

        (output, outputs.get::<RemappedBindings>().cloned().unwrap_or_default())
    }

    #[test]
    fn groups_are_flattened_in_binding_order() {
        let (output, remapped) = run(SOURCE, BindingRemapOptions::default());
        let output = output.unwrap();

        assert!(output.is_valid(), "{:#?}", output.diagnostics);
        assert_eq!(
            remapped.bindings,
            BTreeMap::from([
                (BindingPoint::new(0, 4), BindingPoint::new(0, 0)),
                (BindingPoint::new(1, 0), BindingPoint::new(0, 1)),
                (BindingPoint::new(1, 1), BindingPoint::new(0, 2)),
            ])
        );

        let text = printed(&output);
        assert!(text.contains("@group(0) @binding(2) var<storage, read_write> output"), "{text}");
        assert_eq!(remapped.original(BindingPoint::new(0, 1)), Some(BindingPoint::new(1, 0)));
    }

    #[test]
    fn explicit_destinations_are_reserved() {
        let options = BindingRemapOptions {
            remapped: BTreeMap::from([(BindingPoint::new(1, 1), BindingPoint::new(0, 0))]),
        };

        let (_, remapped) = run(SOURCE, options);

        assert_eq!(remapped.bindings[&BindingPoint::new(1, 1)], BindingPoint::new(0, 0));
        assert_eq!(remapped.bindings[&BindingPoint::new(0, 4)], BindingPoint::new(0, 1));
        assert_eq!(remapped.bindings[&BindingPoint::new(1, 0)], BindingPoint::new(0, 2));
    }

    #[test]
    fn identity_mappings_are_a_skip() {
        let (output, remapped) = run(
            "@group(0) @binding(0) var<uniform> x: f32;\n@fragment fn main() -> @location(0) f32 { return x; }\n",
            BindingRemapOptions::default(),
        );

        assert!(output.is_none());
        assert_eq!(remapped.bindings.len(), 1);
    }
}

//! Replaces `override` declarations by `const` declarations holding the
//! values supplied for the pipeline.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::{
    frontend::{
        ast::{AttributeKind, DeclarationId, DeclarationKind, ExpressionKind, Literal, VariableKind},
        lexer::{FloatSuffix, IntSuffix, Span},
    },
    middle::{
        constant::ConstValue,
        program::Program,
        transform::{DataMap, PinnedOverrideIds, Transform, error_program},
        ty::ScalarKind,
    },
};

/// Pipeline constants, keyed by override name or by decimal `@id`. Keys may
/// repeat here so that duplicates can be reported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverrideValues {
    pub entries: Vec<(String, f64)>,
}

impl OverrideValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: f64) -> Self {
        self.entries.push((key.into(), value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OverrideValueError {
    #[error("pipeline constant '{0}' is specified more than once")]
    Duplicate(String),
    #[error("pipeline constant '{0}' does not match any override")]
    Unknown(String),
    #[error("pipeline constant '{0}' names an override that already has a value")]
    Conflict(String),
    #[error("pipeline constant '{name}': {value} is not a finite number")]
    NotFinite { name: String, value: f64 },
    #[error("pipeline constant '{name}': {value} is not representable as {ty}")]
    OutOfRange { name: String, value: f64, ty: &'static str },
    #[error("override '{0}' has no initializer and no pipeline constant was supplied")]
    Missing(String),
}

/// The final value of every override, by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubstitutedOverrides {
    pub values: BTreeMap<String, ConstValue>,
}

#[derive(Debug, Default)]
pub struct SubstituteOverride;

impl Transform for SubstituteOverride {
    fn name(&self) -> &str {
        "substitute-override"
    }

    fn apply(&self, program: &Program, inputs: &DataMap, outputs: &mut DataMap) -> Option<Program> {
        let empty = OverrideValues::new();
        let values = inputs.get::<OverrideValues>().unwrap_or(&empty);

        let overrides = program
            .module
            .variables()
            .filter(|(_, variable)| variable.kind == VariableKind::Override)
            .map(|(id, _)| id)
            .collect::<Vec<_>>();

        if overrides.is_empty() && values.is_empty() {
            return None;
        }

        let pinned = inputs.get::<PinnedOverrideIds>().map(|pinned| &pinned.names);

        let supplied = match match_keys(program, &overrides, values, pinned) {
            Ok(supplied) => supplied,
            Err(error) => return Some(error_program(program, Span::default(), error.to_string())),
        };

        let mut module = program.module.clone();

        for id in overrides {
            let (Some(global), Some(variable)) = (program.global(id), program.module.declaration(id).as_variable())
            else {
                continue;
            };

            let name = program.name(variable.name);
            let span = variable.name.span;

            let initializer = match supplied.get(&id) {
                Some(&value) => {
                    let Some(scalar) = program.types.as_scalar(global.ty) else {
                        continue;
                    };

                    match literal(name, scalar, value) {
                        Ok(literal) => Some(module.add_expression(ExpressionKind::Literal(literal), span)),
                        Err(error) => return Some(error_program(program, span, error.to_string())),
                    }
                }
                None if variable.initializer.is_none() => {
                    let error = OverrideValueError::Missing(name.to_string());
                    return Some(error_program(program, span, error.to_string()));
                }
                None => variable.initializer,
            };

            let DeclarationKind::Variable(variable) = &mut module.declarations[id].kind else {
                continue;
            };

            variable.kind = VariableKind::Const;
            variable.initializer = initializer;
            variable
                .attributes
                .retain(|attribute| !matches!(attribute.kind, AttributeKind::Id(_)));
        }

        let output = Program::rebuild(module, program.max_errors());

        if output.is_valid() {
            let values = output
                .info
                .globals
                .keys()
                .filter(|id| program.global(**id).is_some_and(|global| global.is_override()))
                .filter_map(|id| {
                    let name = output.module.declaration(*id).name()?;
                    let value = output.global(*id)?.value.clone()?;

                    Some((output.name(name).to_string(), value))
                })
                .collect::<BTreeMap<_, _>>();

            debug!("substituted {} overrides", values.len());
            outputs.put(SubstitutedOverrides { values });
        }

        Some(output)
    }
}

/// Maps every supplied value to the override it names
fn match_keys(
    program: &Program,
    overrides: &[DeclarationId],
    values: &OverrideValues,
    pinned: Option<&BTreeSet<String>>,
) -> Result<BTreeMap<DeclarationId, f64>, OverrideValueError> {
    let mut supplied = BTreeMap::new();
    let mut seen = BTreeSet::new();

    for (key, value) in &values.entries {
        if !seen.insert(key.as_str()) {
            return Err(OverrideValueError::Duplicate(key.clone()));
        }

        let target = overrides.iter().copied().find(|id| {
            let explicit_id = explicit_id(program, *id, pinned);

            match key.parse::<u16>() {
                Ok(number) if key.bytes().all(|byte| byte.is_ascii_digit()) => explicit_id == Some(number),
                _ => {
                    explicit_id.is_none()
                        && program
                            .module
                            .declaration(*id)
                            .name()
                            .is_some_and(|name| program.name(name) == key)
                }
            }
        });

        let Some(target) = target else {
            return Err(OverrideValueError::Unknown(key.clone()));
        };

        if supplied.insert(target, *value).is_some() {
            return Err(OverrideValueError::Conflict(key.clone()));
        }
    }

    Ok(supplied)
}

/// The value of the override's `@id` attribute, if it has one that came
/// from the source
fn explicit_id(program: &Program, id: DeclarationId, pinned: Option<&BTreeSet<String>>) -> Option<u16> {
    let variable = program.module.declaration(id).as_variable()?;

    if pinned.is_some_and(|pinned| pinned.contains(program.name(variable.name))) {
        return None;
    }

    variable
        .attributes
        .iter()
        .any(|attribute| matches!(attribute.kind, AttributeKind::Id(_)))
        .then(|| program.global(id)?.override_id)
        .flatten()
}

/// A typed literal for a pipeline constant, if the value is representable
fn literal(name: &str, scalar: ScalarKind, value: f64) -> Result<Literal, OverrideValueError> {
    if !value.is_finite() {
        return Err(OverrideValueError::NotFinite {
            name: name.to_string(),
            value,
        });
    }

    let out_of_range = || OverrideValueError::OutOfRange {
        name: name.to_string(),
        value,
        ty: scalar.name(),
    };

    match scalar {
        ScalarKind::Bool => Ok(Literal::Bool(value != 0.0)),
        ScalarKind::I32 => {
            let truncated = value.trunc();

            (f64::from(i32::MIN)..=f64::from(i32::MAX))
                .contains(&truncated)
                .then_some(Literal::Int(truncated as i64, IntSuffix::I))
                .ok_or_else(out_of_range)
        }
        ScalarKind::U32 => {
            let truncated = value.trunc();

            (0.0..=f64::from(u32::MAX))
                .contains(&truncated)
                .then_some(Literal::Int(truncated as i64, IntSuffix::U))
                .ok_or_else(out_of_range)
        }
        ScalarKind::F32 => (value.abs() <= f64::from(f32::MAX))
            .then_some(Literal::Float(f64::from(value as f32), FloatSuffix::F))
            .ok_or_else(out_of_range),
        ScalarKind::F16 => (value.abs() <= f64::from(half::f16::MAX))
            .then_some(Literal::Float(half::f16::from_f64(value).to_f64(), FloatSuffix::H))
            .ok_or_else(out_of_range),
        _ => Err(out_of_range()),
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::middle::{
        constant::Scalar,
        transform::tests::{errors, printed, program},
    };

    const SOURCE: &str = indoc! {"
        override scale: f32 = 1.0;
        @id(3) override count: u32;
        override enabled: bool = true;
        override doubled = scale * 2.0;

        @compute @workgroup_size(count)
        fn main() {
            _ = doubled;
            _ = enabled;
        }
    "};

    fn run(source: &str, values: OverrideValues) -> (Option<Program>, DataMap) {
        let mut outputs = DataMap::new();
        let output = SubstituteOverride.apply(&program(source), &DataMap::new().with(values), &mut outputs);

        (output, outputs)
    }

    #[test]
    fn overrides_become_constants() {
        let (output, data) = run(SOURCE, OverrideValues::new().set("3", 64.0).set("scale", 0.5));
        let output = output.unwrap();

        assert!(output.is_valid(), "{:#?}", output.diagnostics);

        let text = printed(&output);
        assert!(text.contains("const scale : f32 = 0.5f;"), "{text}");
        assert!(text.contains("const count : u32 = 64u;"), "{text}");
        assert!(!text.contains("override"), "{text}");

        let main = output.module.find_declaration("main").unwrap();
        assert_eq!(output.resolved_workgroup_size(main), Some([64, 1, 1]));

        let substituted = data.get::<SubstitutedOverrides>().unwrap();
        assert_eq!(substituted.values["doubled"], ConstValue::Scalar(Scalar::F32(1.0)));
        assert_eq!(substituted.values["enabled"], ConstValue::Scalar(Scalar::Bool(true)));
    }

    #[test]
    fn missing_values_are_errors() {
        let (output, _) = run(SOURCE, OverrideValues::new());

        assert_eq!(
            errors(&output.unwrap()),
            ["override 'count' has no initializer and no pipeline constant was supplied"]
        );
    }

    #[test]
    fn ids_only_match_explicit_ids() {
        // `scale` has the implicit id 0
        let (output, _) = run(SOURCE, OverrideValues::new().set("3", 1.0).set("0", 2.0));
        assert_eq!(errors(&output.unwrap()), ["pipeline constant '0' does not match any override"]);

        let (output, _) = run(SOURCE, OverrideValues::new().set("count", 1.0));
        assert_eq!(
            errors(&output.unwrap()),
            ["pipeline constant 'count' does not match any override"]
        );
    }

    #[test]
    fn pinned_ids_are_still_set_by_name() {
        let source = "@id(0) override width: u32 = 4u;\n@compute @workgroup_size(width) fn main() {}\n";
        let pinned = PinnedOverrideIds {
            names: BTreeSet::from(["width".to_string()]),
        };

        let inputs = DataMap::new()
            .with(OverrideValues::new().set("width", 8.0))
            .with(pinned.clone());
        let output = SubstituteOverride
            .apply(&program(source), &inputs, &mut DataMap::new())
            .unwrap();

        assert!(output.is_valid(), "{:#?}", output.diagnostics);
        let main = output.module.find_declaration("main").unwrap();
        assert_eq!(output.resolved_workgroup_size(main), Some([8, 1, 1]));

        let inputs = DataMap::new().with(OverrideValues::new().set("0", 8.0)).with(pinned);
        let output = SubstituteOverride
            .apply(&program(source), &inputs, &mut DataMap::new())
            .unwrap();
        assert_eq!(errors(&output), ["pipeline constant '0' does not match any override"]);
    }

    #[test]
    fn duplicate_keys_are_errors() {
        let (output, _) = run(SOURCE, OverrideValues::new().set("3", 1.0).set("3", 2.0));

        assert_eq!(
            errors(&output.unwrap()),
            ["pipeline constant '3' is specified more than once"]
        );
    }

    #[test]
    fn values_must_be_representable() {
        for (scalar, value, representable) in [
            (ScalarKind::U32, -1.0, false),
            (ScalarKind::U32, 4294967295.0, true),
            (ScalarKind::I32, 2147483648.0, false),
            (ScalarKind::I32, -2147483648.0, true),
            (ScalarKind::F32, f64::from(f32::MAX), true),
            (ScalarKind::F32, f64::from(f32::MAX) * 1.001, false),
            (ScalarKind::F16, 65504.0, true),
            (ScalarKind::F16, 65520.0, false),
            (ScalarKind::F32, f64::NAN, false),
            (ScalarKind::Bool, f64::INFINITY, false),
            (ScalarKind::Bool, 0.25, true),
        ] {
            assert_eq!(literal("x", scalar, value).is_ok(), representable, "{value} as {scalar:?}");
        }

        assert_eq!(literal("x", ScalarKind::Bool, 0.25), Ok(Literal::Bool(true)));
        assert_eq!(literal("x", ScalarKind::I32, -3.75), Ok(Literal::Int(-3, IntSuffix::I)));
        assert_eq!(
            literal("x", ScalarKind::U32, -1.0).map_err(|error| error.to_string()),
            Err("pipeline constant 'x': -1 is not representable as u32".to_string())
        );
    }

    #[test]
    fn programs_without_overrides_are_skipped() {
        let (output, _) = run("@compute @workgroup_size(1) fn main() {}\n", OverrideValues::new());

        assert!(output.is_none());
    }
}

//! Constant folding. Instructions whose operands are all constants are
//! evaluated and their results replaced by constants. Branches on constant
//! conditions become unconditional.

use crate::{
    frontend::ast::BinaryOperatorKind,
    middle::{
        constant::ConstValue,
        ir::{BlockId, FunctionId, InstructionId, InstructionKind, Merge, Module, ValueId},
        optimization::Pass,
        ty::TypeKind,
    },
};

#[derive(Debug)]
pub struct ConstantFolding;

impl Pass for ConstantFolding {
    fn name(&self) -> &str {
        "const-fold"
    }

    fn run(&self, module: &mut Module) -> bool {
        let mut changed = false;

        for function in module.functions.indices() {
            changed |= run_on_function(module, function);
        }

        changed
    }
}

fn run_on_function(module: &mut Module, function: FunctionId) -> bool {
    let mut changed = false;

    for block in module.functions[function].blocks.clone() {
        for id in module.blocks[block].instructions.clone() {
            if let Some(value) = fold(module, id) {
                let Some(result) = module.instructions[id].result else {
                    continue;
                };

                let ty = module.values[result].ty;
                let constant = module.constant(ty, value);

                module.replace_all_uses(result, constant);
                module.remove_instruction(id);
                changed = true;
            } else if let Some(target) = fold_terminator(module, id) {
                module.replace_kind(id, InstructionKind::Branch { target });

                if matches!(module.blocks[block].merge, Some(Merge::Selection(_))) {
                    module.blocks[block].merge = None;
                }

                changed = true;
            } else if let Some(single) = trivial_phi(module, id) {
                if let Some(result) = module.instructions[id].result {
                    module.replace_all_uses(result, single);
                }

                module.remove_instruction(id);
                changed = true;
            }
        }
    }

    changed
}

/// The constant result of an instruction whose operands are constants
fn fold(module: &Module, id: InstructionId) -> Option<ConstValue> {
    let instruction = &module.instructions[id];
    let result = instruction.result?;
    let types = &module.types;

    let constant = move |value: ValueId| module.as_constant(value);
    let is_matrix = move |value: ValueId| matches!(types.get(module.values[value].ty), TypeKind::Matrix { .. });

    match &instruction.kind {
        InstructionKind::Unary { operator, operand } => constant(*operand)?.unary(*operator).ok(),
        InstructionKind::Binary { operator, lhs, rhs } => {
            // Matrix products are not componentwise
            if *operator == BinaryOperatorKind::Multiply && (is_matrix(*lhs) || is_matrix(*rhs)) {
                return None;
            }

            constant(*lhs)?.binary(*operator, constant(*rhs)?).ok()
        }
        InstructionKind::Convert { value } => {
            let scalar = types.element_scalar(module.values[result].ty)?;
            constant(*value)?.convert(scalar).ok()
        }
        InstructionKind::Construct { components } => {
            let values = components
                .iter()
                .map(|component| constant(*component).cloned())
                .collect::<Option<Vec<_>>>()?;

            match types.get(module.values[result].ty) {
                // `vec4(v.xy, 0.0, 1.0)` flattens into scalars
                TypeKind::Vector { size, .. } => {
                    let scalars = values
                        .into_iter()
                        .flat_map(|value| match value {
                            ConstValue::Composite(elements) => elements,
                            scalar => vec![scalar],
                        })
                        .collect::<Vec<_>>();

                    (scalars.len() == usize::from(*size)).then_some(ConstValue::Composite(scalars))
                }
                _ => Some(ConstValue::Composite(values)),
            }
        }
        InstructionKind::Extract { composite, index } => {
            let index = usize::try_from(constant(*index)?.as_i64()?).ok()?;
            constant(*composite)?.elements().get(index).cloned()
        }
        InstructionKind::Swizzle { vector, components } => {
            let elements = constant(*vector)?.elements();

            let picked = components
                .iter()
                .map(|component| elements.get(*component as usize).cloned())
                .collect::<Option<Vec<_>>>()?;

            Some(ConstValue::Composite(picked))
        }
        InstructionKind::CallBuiltin { function, arguments } if function.is_pure() => {
            let arguments = arguments
                .iter()
                .map(|argument| constant(*argument).cloned())
                .collect::<Option<Vec<_>>>()?;

            function.evaluate(&arguments)?.ok()
        }
        _ => None,
    }
}

/// The only successor of a branch on a constant
fn fold_terminator(module: &Module, id: InstructionId) -> Option<BlockId> {
    let instruction = &module.instructions[id];

    if matches!(module.blocks[instruction.block].merge, Some(Merge::Loop { .. })) {
        return None;
    }

    let target = match &instruction.kind {
        InstructionKind::ConditionalBranch {
            condition,
            accept,
            reject,
        } => {
            if module.as_constant(*condition)?.as_bool()? {
                *accept
            } else {
                *reject
            }
        }
        InstructionKind::Switch {
            selector,
            cases,
            default,
        } => {
            let selector = module.as_constant(*selector)?.as_i64()?;

            cases
                .iter()
                .find(|(value, _)| *value == selector)
                .map_or(*default, |(_, block)| *block)
        }
        _ => return None,
    };

    // `break if` in a continuing block carries the only back edge of its loop
    let is_back_edge = instruction
        .kind
        .successors()
        .iter()
        .any(|block| matches!(module.blocks[*block].merge, Some(Merge::Loop { .. })));

    (!is_back_edge).then_some(target)
}

/// A phi with a single incoming value, or the same value on every edge
fn trivial_phi(module: &Module, id: InstructionId) -> Option<ValueId> {
    let InstructionKind::Phi { incoming } = &module.instructions[id].kind else {
        return None;
    };

    let (_, first) = *incoming.first()?;
    let result = module.instructions[id].result;

    (incoming.iter().all(|(_, value)| *value == first) && Some(first) != result).then_some(first)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::{
        diagnostics::{DEFAULT_MAX_ERRORS, Diagnostics},
        frontend::{SourceFile, lexer::Span},
        middle::{
            constant::Scalar,
            ir::{Function, builder::build_module, validate::validate},
            program::Program,
            ty::{ScalarKind, TypeTable},
        },
    };

    fn module_with_block() -> (Module, BlockId) {
        let mut module = Module::new(TypeTable::new());
        let function = module.functions.push(Function {
            name: "f".to_string(),
            stage: None,
            workgroup_size: None,
            interface: None,
            parameters: Vec::new(),
            return_type: None,
            blocks: Vec::new(),
        });
        let block = module.add_block(function);

        (module, block)
    }

    #[test]
    fn folds_arithmetic_chains() {
        let (mut module, block) = module_with_block();
        let i32 = module.types.i32();

        let two = module.constant(i32, ConstValue::Scalar(Scalar::I32(2)));
        let three = module.constant(i32, ConstValue::Scalar(Scalar::I32(3)));

        let (_, sum) = module.append(
            block,
            InstructionKind::Binary {
                operator: BinaryOperatorKind::Add,
                lhs: two,
                rhs: three,
            },
            Some(i32),
            Span::default(),
        );
        let (_, product) = module.append(
            block,
            InstructionKind::Binary {
                operator: BinaryOperatorKind::Multiply,
                lhs: sum.unwrap(),
                rhs: three,
            },
            Some(i32),
            Span::default(),
        );
        let (ret, _) = module.append(
            block,
            InstructionKind::Return { value: product },
            None,
            Span::default(),
        );

        assert!(ConstantFolding.run(&mut module));
        assert_eq!(module.blocks[block].instructions, [ret]);

        let InstructionKind::Return { value: Some(value) } = module.instructions[ret].kind else {
            panic!("expected a return value");
        };
        assert_eq!(module.as_constant(value), Some(&ConstValue::Scalar(Scalar::I32(15))));
        assert_eq!(validate(&module), []);
    }

    #[test]
    fn integer_division_by_zero_is_left_for_runtime() {
        let (mut module, block) = module_with_block();
        let u32 = module.types.u32();

        let one = module.constant(u32, ConstValue::Scalar(Scalar::U32(1)));
        let zero = module.constant(u32, ConstValue::Scalar(Scalar::U32(0)));

        module.append(
            block,
            InstructionKind::Binary {
                operator: BinaryOperatorKind::Divide,
                lhs: one,
                rhs: zero,
            },
            Some(u32),
            Span::default(),
        );
        module.append(block, InstructionKind::Return { value: None }, None, Span::default());

        assert!(!ConstantFolding.run(&mut module));
    }

    #[test]
    fn constant_conditions_drop_the_selection() {
        let program = Program::from_source(
            &SourceFile::from_memory(indoc! {"
                const enabled = false;

                fn f(x: f32) -> f32 {
                    var y = x;
                    if enabled {
                        y = 2.0 * x;
                    }
                    return y;
                }
            "}),
            DEFAULT_MAX_ERRORS,
        );
        assert!(program.is_valid(), "{:#?}", program.diagnostics);

        let mut module = build_module(&program, &mut Diagnostics::default()).unwrap();
        let f = module.function_by_name("f").unwrap();
        let entry = module.functions[f].entry_block().unwrap();

        assert!(matches!(module.blocks[entry].merge, Some(Merge::Selection(_))));
        assert!(ConstantFolding.run(&mut module));

        assert_eq!(module.blocks[entry].merge, None);
        assert!(matches!(
            module.terminator(entry).map(|terminator| &terminator.kind),
            Some(InstructionKind::Branch { .. })
        ));
        assert_eq!(validate(&module), []);
    }

    #[test]
    fn vectors_are_flattened_when_folding_constructors() {
        let (mut module, block) = module_with_block();
        let f32 = module.types.f32();
        let vec2 = module.types.vector(2, ScalarKind::F32);
        let vec3 = module.types.vector(3, ScalarKind::F32);

        let one = module.constant(f32, ConstValue::Scalar(Scalar::F32(1.0)));
        let pair = module.constant(
            vec2,
            ConstValue::Composite(vec![Scalar::F32(2.0).into(), Scalar::F32(3.0).into()]),
        );

        let (construct, _) = module.append(
            block,
            InstructionKind::Construct {
                components: vec![one, pair],
            },
            Some(vec3),
            Span::default(),
        );

        assert_eq!(
            fold(&module, construct),
            Some(ConstValue::Composite(vec![
                Scalar::F32(1.0).into(),
                Scalar::F32(2.0).into(),
                Scalar::F32(3.0).into(),
            ]))
        );
    }
}

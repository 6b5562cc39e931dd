//! Structural checks of an IR module: terminators, def-use lists and
//! dominance of definitions over their uses.

use std::collections::{BTreeMap, BTreeSet};

use crate::middle::ir::{BlockId, FunctionId, InstructionId, InstructionKind, IrError, Module, ValueKind};

/// Returns every inconsistency found in `module`. An empty list means the
/// module is well formed.
pub fn validate(module: &Module) -> Vec<IrError> {
    let mut errors = Vec::new();

    let attached = attached_instructions(module);

    for (id, function) in module.functions.enumerate() {
        for &block in &function.blocks {
            check_block(module, id, block, &mut errors);
        }

        check_dominance(module, id, &mut errors);
    }

    check_uses(module, &attached, &mut errors);

    errors
}

/// Instructions currently listed in a block of some function, with the
/// block listing them
fn attached_instructions(module: &Module) -> BTreeMap<InstructionId, BlockId> {
    module
        .functions
        .iter()
        .flat_map(|function| &function.blocks)
        .flat_map(|block| {
            module.blocks[*block]
                .instructions
                .iter()
                .map(move |instruction| (*instruction, *block))
        })
        .collect()
}

fn check_block(module: &Module, function: FunctionId, block: BlockId, errors: &mut Vec<IrError>) {
    let instructions = &module.blocks[block].instructions;

    for (position, &id) in instructions.iter().enumerate() {
        let instruction = &module.instructions[id];

        if instruction.block != block {
            errors.push(IrError::MisplacedInstruction(id, instruction.block));
        }

        if instruction.kind.is_terminator() && position + 1 != instructions.len() {
            errors.push(IrError::MisplacedTerminator(id));
        }

        for successor in instruction.kind.successors() {
            if module.blocks.get(successor).is_none_or(|target| target.function != function) {
                errors.push(IrError::ForeignBlock(id, successor));
            }
        }
    }

    if !module.is_terminated(block) {
        errors.push(IrError::MissingTerminator(
            block,
            module.functions[function].name.clone(),
        ));
    }
}

fn check_uses(module: &Module, attached: &BTreeMap<InstructionId, BlockId>, errors: &mut Vec<IrError>) {
    for &id in attached.keys() {
        let operands = module.instructions[id].kind.operands();

        for operand in operands.iter().copied().collect::<BTreeSet<_>>() {
            let expected = operands.iter().filter(|value| **value == operand).count();
            let listed = module.values[operand].uses.iter().filter(|user| **user == id).count();

            if listed < expected {
                errors.push(IrError::MissingUse(id, operand));
            }
        }
    }

    for (value, info) in module.values.enumerate() {
        for &user in info.uses.iter().collect::<BTreeSet<_>>() {
            let operands = module.instructions[user].kind.operands();

            let used = attached.contains_key(&user) && operands.contains(&value);
            let expected = operands.iter().filter(|operand| **operand == value).count();
            let listed = info.uses.iter().filter(|other| **other == user).count();

            if !used || listed != expected {
                errors.push(IrError::StaleUse(value, user));
            }
        }
    }
}

/// Dominator sets of the reachable blocks of a function
pub fn dominators(module: &Module, function: FunctionId) -> BTreeMap<BlockId, BTreeSet<BlockId>> {
    let reachable = module.reachable_blocks(function);
    let predecessors = module.predecessors(function);

    let Some(entry) = module.functions[function].entry_block() else {
        return BTreeMap::new();
    };

    let mut dominators = reachable
        .iter()
        .map(|block| {
            let initial = if *block == entry { BTreeSet::from([entry]) } else { reachable.clone() };
            (*block, initial)
        })
        .collect::<BTreeMap<_, _>>();

    let mut changed = true;
    while changed {
        changed = false;

        for &block in &reachable {
            if block == entry {
                continue;
            }

            let mut incoming = predecessors
                .get(&block)
                .into_iter()
                .flatten()
                .filter(|predecessor| reachable.contains(predecessor))
                .map(|predecessor| &dominators[predecessor]);

            let Some(first) = incoming.next() else {
                continue;
            };

            let mut set = incoming.fold(first.clone(), |set, other| set.intersection(other).copied().collect());
            set.insert(block);

            if set != dominators[&block] {
                dominators.insert(block, set);
                changed = true;
            }
        }
    }

    dominators
}

fn check_dominance(module: &Module, function: FunctionId, errors: &mut Vec<IrError>) {
    let dominators = dominators(module, function);

    // `user` is `None` when the use is at the end of `block`
    let dominates = |definition: InstructionId, user: Option<InstructionId>, block: BlockId| {
        let defined_in = module.instructions[definition].block;

        if defined_in != block {
            return dominators.get(&block).is_some_and(|set| set.contains(&defined_in));
        }

        let order = &module.blocks[block].instructions;
        let position = |id| order.iter().position(|other| *other == id);

        match (position(definition), user.map(position)) {
            (Some(definition), Some(Some(user))) => definition < user,
            (Some(_), None) => true,
            _ => false,
        }
    };

    for &block in dominators.keys() {
        for &user in &module.blocks[block].instructions {
            let kind = &module.instructions[user].kind;

            let uses = match kind {
                InstructionKind::Phi { incoming } => incoming.clone(),
                _ => kind.operands().into_iter().map(|value| (block, value)).collect(),
            };

            for (at, value) in uses {
                let ValueKind::Instruction(definition) = module.values[value].kind else {
                    continue;
                };

                if !dominators.contains_key(&at) {
                    continue;
                }

                // Phi operands are used at the end of the incoming block
                let position = (at == block && !matches!(kind, InstructionKind::Phi { .. })).then_some(user);

                if !dominates(definition, position, at) {
                    errors.push(IrError::NotDominated(value, user));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frontend::lexer::Span,
        middle::{
            constant::{ConstValue, Scalar},
            ir::{Function, Merge},
            ty::TypeTable,
        },
    };

    fn function(module: &mut Module) -> FunctionId {
        module.functions.push(Function {
            name: "f".to_string(),
            stage: None,
            workgroup_size: None,
            interface: None,
            parameters: Vec::new(),
            return_type: None,
            blocks: Vec::new(),
        })
    }

    #[test]
    fn well_formed_diamond() {
        let mut module = Module::new(TypeTable::new());
        let f = function(&mut module);
        let bool = module.types.bool();

        let entry = module.add_block(f);
        let accept = module.add_block(f);
        let merge = module.add_block(f);

        let condition = module.constant(bool, ConstValue::Scalar(Scalar::Bool(true)));
        let (_, negated) = module.append(
            entry,
            InstructionKind::Unary {
                operator: crate::frontend::ast::UnaryOperatorKind::LogicalNot,
                operand: condition,
            },
            Some(bool),
            Span::default(),
        );
        let negated = negated.unwrap();

        module.blocks[entry].merge = Some(Merge::Selection(merge));
        module.append(
            entry,
            InstructionKind::ConditionalBranch {
                condition: negated,
                accept,
                reject: merge,
            },
            None,
            Span::default(),
        );
        module.append(accept, InstructionKind::Branch { target: merge }, None, Span::default());
        module.append(
            merge,
            InstructionKind::Phi {
                incoming: vec![(entry, negated), (accept, condition)],
            },
            Some(bool),
            Span::default(),
        );
        module.append(merge, InstructionKind::Return { value: None }, None, Span::default());

        assert_eq!(validate(&module), []);

        let dominators = dominators(&module, f);
        assert_eq!(dominators[&merge], BTreeSet::from([entry, merge]));
    }

    #[test]
    fn reports_broken_invariants() {
        let mut module = Module::new(TypeTable::new());
        let f = function(&mut module);
        let i32 = module.types.i32();

        let entry = module.add_block(f);
        let other = module.add_block(f);

        let one = module.constant(i32, ConstValue::Scalar(Scalar::I32(1)));
        module.append(entry, InstructionKind::Branch { target: other }, None, Span::default());

        // Used in `other` but defined after the use
        let (add, _) = module.append(
            other,
            InstructionKind::Binary {
                operator: crate::frontend::ast::BinaryOperatorKind::Add,
                lhs: one,
                rhs: one,
            },
            Some(i32),
            Span::default(),
        );
        module.values[one].uses.pop();

        let errors = validate(&module);

        assert!(errors.contains(&IrError::MissingUse(add, one)));
        assert!(errors.contains(&IrError::MissingTerminator(other, "f".to_string())));
    }
}

//! Dead code elimination.
//!
//! Removes blocks that are neither reachable nor named by the merge metadata
//! of a live header, empties merge and continuing blocks that are live but
//! unreachable, prunes phi edges from blocks that no longer branch to the
//! phi, and deletes side-effect free instructions whose results are unused.

use std::collections::BTreeSet;

use crate::middle::{
    ir::{BlockId, FunctionId, InstructionId, InstructionKind, Merge, Module},
    optimization::Pass,
};

#[derive(Debug)]
pub struct DeadCodeElimination;

impl Pass for DeadCodeElimination {
    fn name(&self) -> &str {
        "dce"
    }

    fn run(&self, module: &mut Module) -> bool {
        let mut changed = false;

        for function in module.functions.indices() {
            changed |= remove_dead_blocks(module, function);
            changed |= clear_unreachable_blocks(module, function);
            changed |= prune_phis(module, function);
            changed |= remove_unused_instructions(module, function);
            changed |= remove_write_only_variables(module, function);
        }

        changed
    }
}

fn detach_block(module: &mut Module, block: BlockId) {
    // Reverse order keeps uses of earlier results until their users are gone
    for id in module.blocks[block].instructions.clone().into_iter().rev() {
        module.remove_instruction(id);
    }

    module.blocks[block].merge = None;
}

fn remove_dead_blocks(module: &mut Module, function: FunctionId) -> bool {
    let live = module.live_blocks(function);

    let dead = module.functions[function]
        .blocks
        .iter()
        .copied()
        .filter(|block| !live.contains(block))
        .collect::<Vec<_>>();

    for block in &dead {
        detach_block(module, *block);
    }

    module.functions[function].blocks.retain(|block| live.contains(block));

    !dead.is_empty()
}

/// Merge and continuing blocks no branch reaches only keep a terminator:
/// `Unreachable`, or a branch back to the loop header for continuing blocks
fn clear_unreachable_blocks(module: &mut Module, function: FunctionId) -> bool {
    let reachable = module.reachable_blocks(function);
    let mut changed = false;

    for block in module.functions[function].blocks.clone() {
        if reachable.contains(&block) {
            continue;
        }

        let header = module.functions[function].blocks.iter().copied().find(|header| {
            reachable.contains(header)
                && matches!(module.blocks[*header].merge, Some(Merge::Loop { continuing, .. }) if continuing == block)
        });

        let terminator = match header {
            Some(header) => InstructionKind::Branch { target: header },
            None => InstructionKind::Unreachable,
        };

        let instructions = &module.blocks[block].instructions;
        let is_cleared = instructions.len() == 1
            && module.blocks[block].merge.is_none()
            && module.instructions[instructions[0]].kind == terminator;

        if is_cleared {
            continue;
        }

        let span = instructions
            .last()
            .map(|last| module.instructions[*last].span)
            .unwrap_or_default();

        detach_block(module, block);
        module.append(block, terminator, None, span);
        changed = true;
    }

    changed
}

fn prune_phis(module: &mut Module, function: FunctionId) -> bool {
    let predecessors = module.predecessors(function);
    let mut changed = false;

    for block in module.functions[function].blocks.clone() {
        let Some(incoming_blocks) = predecessors.get(&block) else {
            continue;
        };

        for id in module.blocks[block].instructions.clone() {
            let InstructionKind::Phi { incoming } = &module.instructions[id].kind else {
                continue;
            };

            let pruned = incoming
                .iter()
                .copied()
                .filter(|(from, _)| incoming_blocks.contains(from))
                .collect::<Vec<_>>();

            if pruned.len() != incoming.len() {
                module.replace_kind(id, InstructionKind::Phi { incoming: pruned });
                changed = true;
            }
        }
    }

    changed
}

fn is_removable(module: &Module, id: InstructionId) -> bool {
    let instruction = &module.instructions[id];

    instruction
        .result
        .is_some_and(|result| module.values[result].uses.is_empty())
        && !instruction.kind.has_side_effects(module)
}

fn remove_unused_instructions(module: &mut Module, function: FunctionId) -> bool {
    let mut changed = false;

    loop {
        let unused = module.functions[function]
            .blocks
            .iter()
            .flat_map(|block| module.blocks[*block].instructions.iter().copied())
            .filter(|id| is_removable(module, *id))
            .collect::<Vec<_>>();

        if unused.is_empty() {
            return changed;
        }

        for id in unused {
            module.remove_instruction(id);
        }

        changed = true;
    }
}

/// Function variables that are only ever stored to, along with their stores
fn remove_write_only_variables(module: &mut Module, function: FunctionId) -> bool {
    let variables = module.functions[function]
        .blocks
        .iter()
        .flat_map(|block| module.blocks[*block].instructions.iter().copied())
        .filter(|id| matches!(module.instructions[*id].kind, InstructionKind::Variable { .. }))
        .filter_map(|id| Some((id, module.instructions[id].result?)))
        .collect::<Vec<_>>();

    let mut changed = false;

    for (variable, pointer) in variables {
        let users = module.values[pointer].uses.iter().copied().collect::<BTreeSet<_>>();

        let write_only = users.iter().all(|user| {
            matches!(module.instructions[*user].kind, InstructionKind::Store { pointer: target, .. } if target == pointer)
        });

        if !write_only {
            continue;
        }

        for store in users {
            module.remove_instruction(store);
        }

        module.remove_instruction(variable);

        changed = true;
    }

    changed
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::{
        diagnostics::{DEFAULT_MAX_ERRORS, Diagnostics},
        frontend::SourceFile,
        middle::{
            ir::{builder::build_module, validate::validate},
            optimization::ConstantFolding,
            program::Program,
        },
    };

    fn build(source: &str) -> Module {
        let program = Program::from_source(&SourceFile::from_memory(source), DEFAULT_MAX_ERRORS);
        assert!(program.is_valid(), "{:#?}", program.diagnostics);

        build_module(&program, &mut Diagnostics::default()).unwrap()
    }

    fn kinds(module: &Module, function: &str) -> Vec<InstructionKind> {
        let function = module.function_by_name(function).unwrap();

        module.functions[function]
            .blocks
            .iter()
            .flat_map(|block| &module.blocks[*block].instructions)
            .map(|id| module.instructions[*id].kind.clone())
            .collect()
    }

    #[test]
    fn unused_pure_values_are_removed() {
        let mut module = build(indoc! {"
            fn f(x: f32) -> f32 {
                let a = x * 2.0;
                let b = sqrt(a);
                return x;
            }
        "});

        assert!(DeadCodeElimination.run(&mut module));
        assert_eq!(kinds(&module, "f").len(), 1);
        assert_eq!(validate(&module), []);
    }

    #[test]
    fn stores_and_calls_are_kept() {
        let mut module = build(indoc! {"
            @group(0) @binding(0) var<storage, read_write> out: array<u32>;

            fn g() -> u32 {
                out[0] = 1u;
                return 1u;
            }

            fn f() {
                let unused = g();
            }
        "});

        DeadCodeElimination.run(&mut module);

        assert!(kinds(&module, "g").iter().any(|kind| matches!(kind, InstructionKind::Store { .. })));
        assert!(kinds(&module, "f").iter().any(|kind| matches!(kind, InstructionKind::Call { .. })));
        assert_eq!(validate(&module), []);
    }

    #[test]
    fn write_only_variables_disappear() {
        let mut module = build(indoc! {"
            fn f(x: i32) -> i32 {
                var scratch: i32;
                scratch = x;
                scratch = x + 1;
                return x;
            }
        "});

        assert!(DeadCodeElimination.run(&mut module));

        let kinds = kinds(&module, "f");
        assert!(
            !kinds
                .iter()
                .any(|kind| matches!(kind, InstructionKind::Variable { .. } | InstructionKind::Store { .. })),
            "{kinds:?}"
        );
        assert_eq!(validate(&module), []);
    }

    #[test]
    fn folded_branches_leave_no_dead_blocks() {
        let mut module = build(indoc! {"
            fn f(x: i32) -> i32 {
                if false {
                    return x * 2;
                } else {
                    return x;
                }
            }
        "});

        ConstantFolding.run(&mut module);
        assert!(DeadCodeElimination.run(&mut module));

        let f = module.function_by_name("f").unwrap();
        let reachable = module.reachable_blocks(f);
        assert_eq!(module.live_blocks(f), reachable);
        assert_eq!(module.functions[f].blocks.len(), reachable.len());
        assert_eq!(validate(&module), []);
    }
}

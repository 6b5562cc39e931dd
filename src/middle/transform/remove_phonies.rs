//! Rewrites phony assignments `_ = e;`, which not every backend can express.

use std::collections::BTreeMap;

use crate::{
    frontend::ast::{
        self, Block, DeclarationKind, ExpressionId, ExpressionKind, StatementId, StatementKind, Variable, VariableKind,
    },
    middle::{
        program::{CallTarget, Program},
        transform::{DataMap, Transform, strip_groupings, unique_name},
    },
};

/// Drops phony assignments without side effects. A phony call becomes a call
/// statement, and any other phony assignment a `let` that is never read.
#[derive(Debug, Default)]
pub struct RemovePhonies;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Remove,
    Call(ExpressionId),
    Bind(ExpressionId),
}

impl Transform for RemovePhonies {
    fn name(&self) -> &str {
        "remove-phonies"
    }

    fn apply(&self, program: &Program, _: &DataMap, _: &mut DataMap) -> Option<Program> {
        let actions = program
            .module
            .statements
            .enumerate()
            .filter_map(|(id, statement)| match statement.kind {
                StatementKind::Phony(expression) if program.expression(expression).is_some() => {
                    Some((id, action(program, expression)))
                }
                _ => None,
            })
            .collect::<BTreeMap<_, _>>();

        if actions.is_empty() {
            return None;
        }

        let mut module = program.module.clone();

        for (&id, &action) in &actions {
            let span = module.statement(id).span;

            let kind = match action {
                Action::Remove => continue,
                Action::Call(call) => StatementKind::Call(call),
                Action::Bind(expression) => {
                    let name = unique_name(&module, "phony");
                    let name = module.identifier(&name, span);

                    StatementKind::Variable(Variable {
                        span,
                        attributes: Vec::new(),
                        kind: VariableKind::Let,
                        name,
                        ty: None,
                        initializer: Some(expression),
                    })
                }
            };

            module.statements[id].kind = kind;
        }

        let removed = |statement: StatementId| actions.get(&statement) == Some(&Action::Remove);
        remove_statements(&mut module, removed);

        Some(Program::rebuild(module, program.max_errors()))
    }
}

fn action(program: &Program, expression: ExpressionId) -> Action {
    if !has_side_effects(program, expression) {
        return Action::Remove;
    }

    let inner = strip_groupings(&program.module, expression);

    match program.info.calls.get(&inner) {
        Some(target) if call_has_side_effects(target) => Action::Call(inner),
        _ => Action::Bind(expression),
    }
}

fn call_has_side_effects(target: &CallTarget) -> bool {
    match target {
        CallTarget::Function(_) => true,
        CallTarget::Builtin { function, .. } => !function.is_pure(),
        CallTarget::Construct(_) | CallTarget::Convert(_) | CallTarget::Bitcast(_) => false,
    }
}

fn has_side_effects(program: &Program, expression: ExpressionId) -> bool {
    let recurse = |expression: &ExpressionId| has_side_effects(program, *expression);

    match &program.module.expression(expression).kind {
        ExpressionKind::Literal(_) | ExpressionKind::Identifier(_) => false,
        ExpressionKind::Call { arguments, .. } => {
            program.info.calls.get(&expression).is_some_and(call_has_side_effects) || arguments.iter().any(recurse)
        }
        ExpressionKind::Index { base, index } => recurse(base) || recurse(index),
        ExpressionKind::Member { base, .. } => recurse(base),
        ExpressionKind::Unary { operand, .. } => recurse(operand),
        ExpressionKind::Binary { lhs, rhs, .. } => recurse(lhs) || recurse(rhs),
        ExpressionKind::Grouping(inner) => recurse(inner),
    }
}

/// Removes statements from every block of the module
fn remove_statements(module: &mut ast::Module, removed: impl Fn(StatementId) -> bool) {
    let retain = |block: &mut Block| block.statements.retain(|statement| !removed(*statement));

    for declaration in module.declarations.iter_mut() {
        if let DeclarationKind::Function(function) = &mut declaration.kind {
            retain(&mut function.body);
        }
    }

    for statement in module.statements.iter_mut() {
        match &mut statement.kind {
            StatementKind::Block(block) | StatementKind::While { body: block, .. } => retain(block),
            StatementKind::If { accept, .. } => retain(accept),
            StatementKind::Switch { clauses, .. } => {
                for clause in clauses {
                    retain(&mut clause.body);
                }
            }
            StatementKind::Loop { body, continuing } => {
                retain(body);

                if let Some(continuing) = continuing {
                    retain(&mut continuing.body);
                }
            }
            StatementKind::For {
                initializer,
                update,
                body,
                ..
            } => {
                retain(body);

                if initializer.is_some_and(&removed) {
                    *initializer = None;
                }

                if update.is_some_and(&removed) {
                    *update = None;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::middle::transform::tests::{printed, program};

    #[test]
    fn phonies_are_removed_or_rewritten() {
        let program = program(indoc! {"
            @group(0) @binding(0) var<storage, read_write> counter: atomic<u32>;
            var<private> total: i32;

            fn bump() -> i32 {
                total += 1;
                return total;
            }

            @compute @workgroup_size(1)
            fn main() {
                _ = total * 2;
                _ = (bump());
                _ = atomicAdd(&counter, 1u);
                _ = bump() + 1;
                if total < 4 {
                    _ = &total;
                }
            }
        "});

        let output = RemovePhonies.apply(&program, &DataMap::new(), &mut DataMap::new()).unwrap();
        assert!(output.is_valid(), "{:#?}", output.diagnostics);

        let text = printed(&output);
        assert!(!text.contains("_ ="), "{text}");
        assert!(text.contains("  bump();\n"), "{text}");
        assert!(text.contains("  atomicAdd(&counter, 1u);\n"), "{text}");
        assert!(text.contains("  let phony = (bump() + 1);\n"), "{text}");
        assert!(text.contains("if (total < 4) {\n  }"), "{text}");
    }

    #[test]
    fn programs_without_phonies_are_skipped() {
        let program = program("@compute @workgroup_size(1) fn main() { let x = 1; }\n");

        assert!(RemovePhonies.apply(&program, &DataMap::new(), &mut DataMap::new()).is_none());
    }
}

//! IR optimization passes. A [`PassManager`] runs its passes in sequence
//! until none of them reports a change, or until [`MAX_ITERATIONS`] rounds
//! have run.

mod const_fold;
mod dce;

pub use const_fold::ConstantFolding;
pub use dce::DeadCodeElimination;

use std::fmt::Debug;

use log::{debug, warn};
use strum::{Display, EnumString};

use crate::middle::ir::Module;

/// An optimization pass over an IR module
pub trait Pass: Debug {
    fn name(&self) -> &str;

    /// Runs the pass on a module. Returns `true` if anything was modified.
    fn run(&self, module: &mut Module) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum OptLevel {
    #[default]
    None,
    /// Constant folding and dead code elimination
    Basic,
}

/// Maximum number of fixed-point rounds before giving up
pub const MAX_ITERATIONS: usize = 10;

#[derive(Debug, Default)]
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
}

impl PassManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_level(level: OptLevel) -> Self {
        let mut manager = Self::new();

        match level {
            OptLevel::None => {}
            OptLevel::Basic => {
                manager.add_pass(Box::new(ConstantFolding));
                manager.add_pass(Box::new(DeadCodeElimination));
            }
        }

        manager
    }

    pub fn add_pass(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    /// Runs every pass until a fixed point is reached. Returns the number of
    /// rounds that changed the module.
    pub fn run(&self, module: &mut Module) -> usize {
        let mut rounds = 0;

        for _ in 0..MAX_ITERATIONS {
            let mut changed = false;

            for pass in &self.passes {
                let modified = pass.run(module);
                if modified {
                    debug!("pass '{}' modified the module", pass.name());
                }

                changed |= modified;
            }

            if !changed {
                break;
            }

            rounds += 1;
        }

        rounds
    }
}

/// Runs the passes of `level` on a module
pub fn optimize(module: &mut Module, level: OptLevel) {
    let rounds = PassManager::for_level(level).run(module);
    if rounds == MAX_ITERATIONS {
        warn!("optimizer stopped after {MAX_ITERATIONS} rounds without reaching a fixed point");
    }

    debug!("optimized at level {level} in {rounds} round(s)");
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::{
        diagnostics::{DEFAULT_MAX_ERRORS, Diagnostics},
        frontend::SourceFile,
        middle::{
            ir::{InstructionKind, builder::build_module, validate::validate},
            program::Program,
        },
    };

    fn build(source: &str) -> Module {
        let program = Program::from_source(&SourceFile::from_memory(source), DEFAULT_MAX_ERRORS);
        assert!(program.is_valid(), "{:#?}", program.diagnostics);

        build_module(&program, &mut Diagnostics::default()).unwrap()
    }

    #[test]
    fn no_passes_at_level_none() {
        let mut module = build(indoc! {"
            fn f(x: i32) -> i32 {
                let unused = x + 1;
                return x;
            }
        "});
        let before = module.instruction_count();

        assert_eq!(PassManager::for_level(OptLevel::None).run(&mut module), 0);
        assert_eq!(module.instruction_count(), before);
    }

    #[test]
    fn basic_level_reaches_a_fixed_point() {
        let mut module = build(indoc! {"
            fn f(x: i32) -> i32 {
                let unused = x * 3;
                if 1 > 2 {
                    return x;
                }
                return x + 1;
            }
        "});

        let manager = PassManager::for_level(OptLevel::Basic);
        let rounds = manager.run(&mut module);

        assert!(rounds > 0 && rounds < MAX_ITERATIONS);
        assert_eq!(manager.run(&mut module), 0);
        assert_eq!(validate(&module), []);

        let f = module.function_by_name("f").unwrap();
        let multiplies = module.functions[f]
            .blocks
            .iter()
            .flat_map(|block| &module.blocks[*block].instructions)
            .filter(|instruction| matches!(module.instructions[**instruction].kind, InstructionKind::Binary { .. }))
            .count();

        // Only `x + 1` survives
        assert_eq!(multiplies, 1);
    }

    #[test]
    fn levels_parse_from_strings() {
        assert_eq!("basic".parse::<OptLevel>(), Ok(OptLevel::Basic));
        assert_eq!(OptLevel::None.to_string(), "none");
    }
}

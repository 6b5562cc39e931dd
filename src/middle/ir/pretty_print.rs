use colored::Colorize;
use itertools::Itertools;

use crate::{
    index::Index,
    middle::ir::{BlockId, Function, InstructionKind, Merge, Module, ValueId, ValueKind},
};

/// Disassembles the module with terminal colors
pub fn pretty_print_module(module: &Module) -> String {
    let mut output = String::new();

    for global in module.globals.iter() {
        let binding = global
            .binding
            .map(|binding| format!(" {binding}"))
            .unwrap_or_default();

        let initializer = global
            .initializer
            .as_ref()
            .map(|value| format!(" {} {}", "=".white(), value.to_string().purple()))
            .unwrap_or_default();

        output += &format!(
            "{} {} {} {}{}{}\n",
            value_name(module, global.value),
            "=".white(),
            format!("var<{}, {}>", global.space, global.access).magenta(),
            module.types.colored_name(global.store),
            binding,
            initializer,
        );
        output += &format!("    {}\n", format!("; {}", global.name).bright_black());
    }

    if !module.globals.is_empty() {
        output.push('\n');
    }

    for function in module.functions.iter() {
        output += &pretty_print_function(module, function);
        output.push('\n');
    }

    output
}

/// [`pretty_print_module`] without colors
pub fn plain_module(module: &Module) -> String {
    strip_ansi_escapes::strip_str(pretty_print_module(module))
}

fn pretty_print_function(module: &Module, function: &Function) -> String {
    let mut output = String::new();

    if let Some(stage) = function.stage {
        output += &format!("{} ", format!("@{stage}").yellow());
    }

    if let Some([x, y, z]) = function.workgroup_size {
        output += &format!("{} ", format!("@workgroup_size({x}, {y}, {z})").yellow());
    }

    let parameters = function
        .parameters
        .iter()
        .map(|parameter| {
            format!(
                "{}: {}",
                value_name(module, parameter.value),
                module.types.colored_name(parameter.ty)
            )
        })
        .join(", ");

    let return_type = function
        .return_type
        .map(|ty| format!(" -> {}", module.types.colored_name(ty)))
        .unwrap_or_default();

    output += &format!(
        "{} {}{}{parameters}{}{return_type} {}\n",
        "fn".magenta(),
        function.name.blue(),
        "(".white(),
        ")".white(),
        "{".white()
    );

    for &block in &function.blocks {
        let merge = match module.blocks[block].merge {
            Some(Merge::Selection(merge)) => format!("  ; selection merge {}", block_name(merge)),
            Some(Merge::Loop { merge, continuing }) => format!(
                "  ; loop merge {} continuing {}",
                block_name(merge),
                block_name(continuing)
            ),
            None => String::new(),
        };

        output += &format!(
            "{}{}\n",
            format!("{}:", block_name(block)).bright_red(),
            merge.bright_black()
        );

        for &instruction in &module.blocks[block].instructions {
            let instruction = &module.instructions[instruction];
            let text = instruction_text(module, &instruction.kind);

            match instruction.result {
                Some(result) => {
                    output += &format!(
                        "    {}: {} {} {text}\n",
                        value_name(module, result),
                        module.types.colored_name(module.values[result].ty),
                        "=".white()
                    );
                }
                None => output += &format!("    {text}\n"),
            }
        }
    }

    output += &format!("{}\n", "}".white());
    output
}

fn block_name(block: BlockId) -> String {
    format!("bb{}", block.index())
}

/// Constants are printed inline, other values by number
fn value_name(module: &Module, value: ValueId) -> String {
    match &module.values[value].kind {
        ValueKind::Constant(constant) => constant.to_string().purple().to_string(),
        _ => format!("%{}", value.index()),
    }
}

fn values(module: &Module, values: &[ValueId]) -> String {
    values.iter().map(|value| value_name(module, *value)).join(", ")
}

fn instruction_text(module: &Module, kind: &InstructionKind) -> String {
    let op = |name: &str| name.cyan().to_string();
    let v = |value: &ValueId| value_name(module, *value);

    match kind {
        InstructionKind::Variable { store } => format!("{} {}", op("var"), module.types.colored_name(*store)),
        InstructionKind::Load { pointer } => format!("{} {}", op("load"), v(pointer)),
        InstructionKind::Store { pointer, value } => format!("{} {} {} {}", op("store"), v(pointer), "<-".white(), v(value)),
        InstructionKind::Access { base, indices } => {
            format!("{} {}[{}]", op("access"), v(base), values(module, indices))
        }
        InstructionKind::Extract { composite, index } => format!("{} {}[{}]", op("extract"), v(composite), v(index)),
        InstructionKind::Swizzle { vector, components } => {
            let components = components
                .iter()
                .map(|component| ["x", "y", "z", "w"].get(*component as usize).copied().unwrap_or("?"))
                .join("");
            format!("{} {}.{components}", op("swizzle"), v(vector))
        }
        InstructionKind::Construct { components } => format!("{} ({})", op("construct"), values(module, components)),
        InstructionKind::Convert { value } => format!("{} {}", op("convert"), v(value)),
        InstructionKind::Bitcast { value } => format!("{} {}", op("bitcast"), v(value)),
        InstructionKind::Unary { operator, operand } => format!("{}{}", operator.to_string().white(), v(operand)),
        InstructionKind::Binary { operator, lhs, rhs } => {
            format!("{} {} {}", v(lhs), operator.to_string().white(), v(rhs))
        }
        InstructionKind::Call { function, arguments } => format!(
            "{} {}({})",
            op("call"),
            module.functions[*function].name.blue(),
            values(module, arguments)
        ),
        InstructionKind::CallBuiltin { function, arguments } => format!(
            "{} {}({})",
            op("call"),
            function.name().green(),
            values(module, arguments)
        ),
        InstructionKind::Phi { incoming } => format!(
            "{} {}",
            op("phi"),
            incoming
                .iter()
                .map(|(block, value)| format!("[{}, {}]", block_name(*block).blue(), v(value)))
                .join(", ")
        ),
        InstructionKind::Branch { target } => format!("{} {}", op("br"), block_name(*target).blue()),
        InstructionKind::ConditionalBranch {
            condition,
            accept,
            reject,
        } => format!(
            "{} {} {} {}",
            op("br"),
            v(condition),
            block_name(*accept).blue(),
            block_name(*reject).blue()
        ),
        InstructionKind::Switch {
            selector,
            cases,
            default,
        } => format!(
            "{} {} [{}] {} {}",
            op("switch"),
            v(selector),
            cases
                .iter()
                .map(|(value, block)| format!("{value} => {}", block_name(*block).blue()))
                .join(", "),
            "default".cyan(),
            block_name(*default).blue()
        ),
        InstructionKind::Return { value } => match value {
            Some(value) => format!("{} {}", op("ret"), v(value)),
            None => op("ret"),
        },
        InstructionKind::Unreachable => op("unreachable"),
        InstructionKind::Discard => op("discard"),
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::{
        diagnostics::{DEFAULT_MAX_ERRORS, Diagnostics},
        frontend::SourceFile,
        middle::{ir::builder::build_module, program::Program},
    };

    #[test]
    fn disassembles_blocks_and_values() {
        let program = Program::from_source(
            &SourceFile::from_memory(indoc! {"
                @group(0) @binding(0) var<storage, read_write> data: array<u32>;

                @compute @workgroup_size(64)
                fn main(@builtin(global_invocation_id) id: vec3<u32>) {
                    if id.x < 4u {
                        data[id.x] = id.x * 2u;
                    }
                }
            "}),
            DEFAULT_MAX_ERRORS,
        );
        assert!(program.is_valid(), "{:#?}", program.diagnostics);

        let module = build_module(&program, &mut Diagnostics::default()).unwrap();
        let text = plain_module(&module);

        assert!(text.contains("var<storage, read_write> array<u32> @group(0) @binding(0)"), "{text}");
        assert!(text.contains("@compute @workgroup_size(64, 1, 1) fn main("), "{text}");
        assert!(text.contains("; selection merge bb"), "{text}");
        assert!(text.contains("store"), "{text}");
        assert!(text.contains("ret"), "{text}");
    }
}

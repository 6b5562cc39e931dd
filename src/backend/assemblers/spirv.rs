//! Writes SPIR-V in the textual assembly form accepted by `spirv-as`.
//!
//! Instructions go into the logical sections of a SPIR-V module and are
//! concatenated in the required order by [`Assembler::into_output`]. Type and
//! constant declarations are interned by their text, so declaring the same
//! type twice yields the same id.

use std::{collections::BTreeSet, fmt};

use hashbrown::HashMap;

/// A result id, written `%N`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(u32);

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct Assembler {
    bound: u32,
    capabilities: BTreeSet<&'static str>,
    extensions: BTreeSet<&'static str>,
    imports: String,
    entry_points: String,
    execution_modes: String,
    debug: String,
    annotations: String,
    declarations: String,
    functions: String,
    interned: HashMap<String, Id>,
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            bound: 1,
            ..Self::default()
        }
    }

    pub fn into_output(self) -> String {
        let mut output = String::new();

        push_line(&mut output, "; SPIR-V");
        push_line(&mut output, "; Version: 1.3");
        push_line(&mut output, format!("; Generator: {} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")));
        push_line(&mut output, format!("; Bound: {}", self.bound));
        push_line(&mut output, "; Schema: 0");

        for capability in &self.capabilities {
            push_line(&mut output, format!("OpCapability {capability}"));
        }

        for extension in &self.extensions {
            push_line(&mut output, format!("OpExtension \"{extension}\""));
        }

        output += &self.imports;
        push_line(&mut output, "OpMemoryModel Logical GLSL450");
        output += &self.entry_points;
        output += &self.execution_modes;
        output += &self.debug;
        output += &self.annotations;
        output += &self.declarations;
        output += &self.functions;

        output
    }

    /// Allocates a fresh id
    pub fn id(&mut self) -> Id {
        let id = Id(self.bound);
        self.bound += 1;
        id
    }

    pub fn capability(&mut self, capability: &'static str) {
        self.capabilities.insert(capability);
    }

    pub fn extension(&mut self, extension: &'static str) {
        self.extensions.insert(extension);
    }

    pub fn import(&mut self, set: &str) -> Id {
        let id = self.id();
        push_line(&mut self.imports, format!("{id} = OpExtInstImport \"{set}\""));
        id
    }

    pub fn entry_point(&mut self, model: &str, function: Id, name: &str, interface: &[Id]) {
        let mut line = format!("OpEntryPoint {model} {function} \"{name}\"");
        for variable in interface {
            line += &format!(" {variable}");
        }
        push_line(&mut self.entry_points, line);
    }

    pub fn execution_mode(&mut self, function: Id, mode: impl AsRef<str>) {
        push_line(&mut self.execution_modes, format!("OpExecutionMode {function} {}", mode.as_ref()));
    }

    pub fn name(&mut self, id: Id, name: &str) {
        push_line(&mut self.debug, format!("OpName {id} \"{name}\""));
    }

    pub fn member_name(&mut self, id: Id, member: usize, name: &str) {
        push_line(&mut self.debug, format!("OpMemberName {id} {member} \"{name}\""));
    }

    pub fn decorate(&mut self, id: Id, decoration: impl AsRef<str>) {
        push_line(&mut self.annotations, format!("OpDecorate {id} {}", decoration.as_ref()));
    }

    pub fn member_decorate(&mut self, id: Id, member: usize, decoration: impl AsRef<str>) {
        push_line(
            &mut self.annotations,
            format!("OpMemberDecorate {id} {member} {}", decoration.as_ref()),
        );
    }

    /// Declares a type or constant once, returning the id of the first
    /// identical declaration
    pub fn declare(&mut self, instruction: impl Into<String>) -> Id {
        let instruction = instruction.into();

        if let Some(id) = self.interned.get(&instruction) {
            return *id;
        }

        let id = self.declare_unique(&instruction);
        self.interned.insert(instruction, id);
        id
    }

    /// Declares something that must not be shared, like a struct type or a
    /// module-scope variable
    pub fn declare_unique(&mut self, instruction: impl AsRef<str>) -> Id {
        let id = self.id();
        push_line(&mut self.declarations, format!("{id} = {}", instruction.as_ref()));
        id
    }

    /// Emits a function body instruction without a result
    pub fn emit(&mut self, instruction: impl AsRef<str>) {
        self.functions.push_str("    ");
        push_line(&mut self.functions, instruction);
    }

    /// Emits a function body instruction, returning its result id
    pub fn emit_result(&mut self, instruction: impl AsRef<str>) -> Id {
        let id = self.id();
        self.emit_with(id, instruction);
        id
    }

    /// Emits an instruction whose result id was allocated up front
    pub fn emit_with(&mut self, id: Id, instruction: impl AsRef<str>) {
        self.emit(format!("{id} = {}", instruction.as_ref()));
    }

    /// Starts a function or basic block with a line that is not indented
    pub fn label(&mut self, id: Id) {
        push_line(&mut self.functions, format!("{id} = OpLabel"));
    }

    pub fn function_line(&mut self, line: impl AsRef<str>) {
        push_line(&mut self.functions, line);
    }

    pub fn comment(&mut self, comment: impl AsRef<str>) {
        self.emit(format!("; {}", comment.as_ref()));
    }
}

fn push_line(output: &mut String, line: impl AsRef<str>) {
    output.push_str(line.as_ref());
    output.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declarations_are_interned() {
        let mut assembler = Assembler::new();

        let float = assembler.declare("OpTypeFloat 32");
        let vector = assembler.declare(format!("OpTypeVector {float} 4"));

        assert_eq!(assembler.declare("OpTypeFloat 32"), float);
        assert_ne!(assembler.declare_unique(format!("OpTypeStruct {vector}")), assembler.declare_unique(format!("OpTypeStruct {vector}")));
    }

    #[test]
    fn sections_are_written_in_module_order() {
        let mut assembler = Assembler::new();
        assembler.capability("Shader");

        let void = assembler.declare("OpTypeVoid");
        let signature = assembler.declare(format!("OpTypeFunction {void}"));
        let function = assembler.id();
        assembler.entry_point("GLCompute", function, "main", &[]);
        assembler.execution_mode(function, "LocalSize 1 1 1");
        assembler.name(function, "main");

        assembler.function_line(format!("{function} = OpFunction {void} None {signature}"));
        let label = assembler.id();
        assembler.label(label);
        assembler.emit("OpReturn");
        assembler.function_line("OpFunctionEnd");

        let output = assembler.into_output();
        let lines = output.lines().skip(5).collect::<Vec<_>>();

        assert!(output.contains("; Bound: 5\n"), "{output}");
        assert_eq!(
            lines,
            [
                "OpCapability Shader",
                "OpMemoryModel Logical GLSL450",
                "OpEntryPoint GLCompute %3 \"main\"",
                "OpExecutionMode %3 LocalSize 1 1 1",
                "OpName %3 \"main\"",
                "%1 = OpTypeVoid",
                "%2 = OpTypeFunction %1",
                "%3 = OpFunction %1 None %2",
                "%4 = OpLabel",
                "    OpReturn",
                "OpFunctionEnd",
            ]
        );
    }
}

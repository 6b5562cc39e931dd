//! Implements `arrayLength` by reading buffer sizes from a uniform buffer,
//! for backends that cannot query the size of a storage buffer.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::{
    frontend::{
        ast::{
            self, Attribute, AttributeKind, BinaryOperatorKind, Declaration, DeclarationKind, ExpressionId,
            ExpressionKind, Literal, StatementKind, Struct, StructMember, TemplateArgument, TypeExpression,
            UnaryOperatorKind, Variable, VariableKind,
        },
        lexer::{IntSuffix, Span},
    },
    index::IndexVec,
    middle::{
        builtin::BuiltinFunction,
        program::{BindingPoint, CallTarget, Program, Resolution},
        transform::{DataKind, DataMap, RemappedBindings, Transform, strip_groupings, unique_name},
        ty::{TypeId, TypeKind, TypeTable},
    },
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArrayLengthFromUniformOptions {
    /// Where the generated uniform buffer is bound
    pub uniform_binding: BindingPoint,
    /// The slot of each storage buffer's byte size in the uniform buffer,
    /// keyed by the binding point in the source
    pub size_indices: BTreeMap<BindingPoint, u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArrayLengthFromUniformResult {
    /// The slots that the program reads. Only these need to be filled.
    pub used_size_indices: BTreeSet<u32>,
    pub uniform_binding: BindingPoint,
}

#[derive(Debug, Default)]
pub struct ArrayLengthFromUniform;

/// An `arrayLength` call whose buffer is known statically
struct LengthQuery {
    call: ExpressionId,
    size_index: u32,
    /// Byte offset of the runtime-sized array in its buffer
    offset: u32,
    stride: u32,
}

impl Transform for ArrayLengthFromUniform {
    fn name(&self) -> &str {
        "array-length-from-uniform"
    }

    fn requires(&self) -> Vec<DataKind> {
        vec![
            DataKind::of::<ArrayLengthFromUniformOptions>(),
            DataKind::of::<RemappedBindings>(),
        ]
    }

    fn apply(&self, program: &Program, inputs: &DataMap, outputs: &mut DataMap) -> Option<Program> {
        let options = inputs.get::<ArrayLengthFromUniformOptions>()?;
        let remapped = inputs.get::<RemappedBindings>()?;

        let queries = program
            .info
            .calls
            .iter()
            .filter(|(_, target)| {
                matches!(
                    target,
                    CallTarget::Builtin {
                        function: BuiltinFunction::ArrayLength,
                        ..
                    }
                )
            })
            .filter_map(|(call, _)| query(program, options, remapped, *call))
            .collect::<Vec<_>>();

        let used_size_indices = queries.iter().map(|query| query.size_index).collect::<BTreeSet<_>>();

        outputs.put(ArrayLengthFromUniformResult {
            used_size_indices: used_size_indices.clone(),
            uniform_binding: options.uniform_binding,
        });

        let highest = used_size_indices.last().copied()?;

        let mut module = program.module.clone();
        let struct_name = unique_name(&module, "BufferSizes");
        let struct_name = module.identifier(&struct_name, Span::default());
        let variable_name = unique_name(&module, "buffer_sizes");
        let variable_name = module.identifier(&variable_name, Span::default());
        let member = module.identifier("buffer_size", Span::default());

        for query in &queries {
            let base = module.add_expression(ExpressionKind::Identifier(variable_name), Span::default());
            let sizes = module.add_expression(ExpressionKind::Member { base, member }, Span::default());
            let vector = index(&mut module, sizes, query.size_index / 4);
            let mut length = index(&mut module, vector, query.size_index % 4);

            if query.offset > 0 {
                let offset = u32_literal(&mut module, query.offset);
                length = module.add_expression(
                    ExpressionKind::Binary {
                        lhs: length,
                        operator: BinaryOperatorKind::Subtract,
                        rhs: offset,
                    },
                    Span::default(),
                );
            }

            let stride = u32_literal(&mut module, query.stride);
            module.expressions[query.call].kind = ExpressionKind::Binary {
                lhs: length,
                operator: BinaryOperatorKind::Divide,
                rhs: stride,
            };
        }

        let uniform_struct = sizes_struct(&mut module, struct_name, member, highest / 4 + 1);
        let uniform_variable = sizes_variable(&mut module, variable_name, struct_name, options.uniform_binding);

        let mut declarations = vec![uniform_struct, uniform_variable];
        declarations.append(&mut module.declarations.raw);
        module.declarations = IndexVec::from_raw(declarations);

        debug!(
            "replaced {} arrayLength calls, uniform at {}",
            queries.len(),
            options.uniform_binding
        );

        Some(Program::rebuild(module, program.max_errors()))
    }
}

fn query(
    program: &Program,
    options: &ArrayLengthFromUniformOptions,
    remapped: &RemappedBindings,
    call: ExpressionId,
) -> Option<LengthQuery> {
    let ExpressionKind::Call { arguments, .. } = &program.module.expression(call).kind else {
        return None;
    };

    let argument = *arguments.first()?;
    let (variable, member) = buffer_of(program, argument)?;

    let binding = program.global(variable)?.binding?;
    let original = remapped.original(binding).unwrap_or(binding);
    let size_index = *options.size_indices.get(&original)?;

    let pointer = program.expression_type(argument)?;
    let TypeKind::Pointer { pointee, .. } = program.types.get(pointer) else {
        return None;
    };
    let TypeKind::Array { element, .. } = program.types.get(*pointee) else {
        return None;
    };

    let offset = match member {
        Some(member) => member_offset(&program.types, program.global(variable)?.ty, &member)?,
        None => 0,
    };

    Some(LengthQuery {
        call,
        size_index,
        offset,
        stride: program.types.stride_of(*element),
    })
}

/// The buffer variable behind a pointer argument of `arrayLength`, and the
/// struct member holding the array if the buffer is a struct
fn buffer_of(program: &Program, pointer: ExpressionId) -> Option<(ast::DeclarationId, Option<String>)> {
    let module = &program.module;
    let pointer = strip_groupings(module, pointer);

    match &module.expression(pointer).kind {
        ExpressionKind::Unary {
            operator: UnaryOperatorKind::AddressOf,
            operand,
        } => {
            let operand = strip_groupings(module, *operand);

            match &module.expression(operand).kind {
                ExpressionKind::Identifier(_) => match program.info.resolutions.get(&operand)? {
                    Resolution::Global(id) => Some((*id, None)),
                    _ => None,
                },
                ExpressionKind::Member { base, member } => {
                    let base = strip_groupings(module, *base);

                    match program.info.resolutions.get(&base)? {
                        Resolution::Global(id) => Some((*id, Some(module.name(*member).to_string()))),
                        _ => None,
                    }
                }
                _ => None,
            }
        }
        ExpressionKind::Identifier(_) => match program.info.resolutions.get(&pointer)? {
            Resolution::Local(statement) => {
                let StatementKind::Variable(variable) = &module.statement(*statement).kind else {
                    return None;
                };

                match variable.kind {
                    VariableKind::Let => buffer_of(program, variable.initializer?),
                    _ => None,
                }
            }
            _ => None,
        },
        _ => None,
    }
}

fn member_offset(types: &TypeTable, ty: TypeId, member: &str) -> Option<u32> {
    let TypeKind::Struct(structure) = types.get(ty) else {
        return None;
    };

    structure.member(member).map(|(_, member)| member.offset)
}

fn u32_literal(module: &mut ast::Module, value: u32) -> ExpressionId {
    module.add_expression(
        ExpressionKind::Literal(Literal::Int(i64::from(value), IntSuffix::U)),
        Span::default(),
    )
}

fn index(module: &mut ast::Module, base: ExpressionId, value: u32) -> ExpressionId {
    let index = u32_literal(module, value);

    module.add_expression(ExpressionKind::Index { base, index }, Span::default())
}

/// `struct BufferSizes { buffer_size: array<vec4<u32>, vectors> }`
fn sizes_struct(
    module: &mut ast::Module,
    name: ast::Identifier,
    member: ast::Identifier,
    vectors: u32,
) -> Declaration {
    let u32 = module.add_named_type("u32", Span::default());
    let vec4 = module.identifier("vec4", Span::default());
    let vec4 = module.add_type(TypeExpression {
        span: Span::default(),
        name: vec4,
        template: vec![TemplateArgument::Type(u32)],
    });

    let count = module.add_expression(
        ExpressionKind::Literal(Literal::Int(i64::from(vectors), IntSuffix::None)),
        Span::default(),
    );
    let array = module.identifier("array", Span::default());
    let array = module.add_type(TypeExpression {
        span: Span::default(),
        name: array,
        template: vec![TemplateArgument::Type(vec4), TemplateArgument::Expression(count)],
    });

    Declaration {
        span: Span::default(),
        kind: DeclarationKind::Struct(Struct {
            span: Span::default(),
            name,
            members: vec![StructMember {
                span: Span::default(),
                attributes: Vec::new(),
                name: member,
                ty: array,
            }],
        }),
    }
}

/// `@group(g) @binding(b) var<uniform> buffer_sizes: BufferSizes;`
fn sizes_variable(
    module: &mut ast::Module,
    name: ast::Identifier,
    ty: ast::Identifier,
    binding: BindingPoint,
) -> Declaration {
    let group = module.add_expression(
        ExpressionKind::Literal(Literal::Int(i64::from(binding.group), IntSuffix::None)),
        Span::default(),
    );
    let binding = module.add_expression(
        ExpressionKind::Literal(Literal::Int(i64::from(binding.binding), IntSuffix::None)),
        Span::default(),
    );

    let uniform = module.identifier("uniform", Span::default());
    let ty = module.add_type(TypeExpression {
        span: Span::default(),
        name: ty,
        template: Vec::new(),
    });

    Declaration {
        span: Span::default(),
        kind: DeclarationKind::Variable(Variable {
            span: Span::default(),
            attributes: vec![
                Attribute {
                    span: Span::default(),
                    kind: AttributeKind::Group(group),
                },
                Attribute {
                    span: Span::default(),
                    kind: AttributeKind::Binding(binding),
                },
            ],
            kind: VariableKind::Var {
                address_space: Some(uniform),
                access: None,
            },
            name,
            ty: Some(ty),
            initializer: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::middle::transform::tests::{printed, program};

    const SOURCE: &str = indoc! {"
        struct Buffer {
            count: u32,
            values: array<f32>,
        }

        @group(0) @binding(0) var<storage, read_write> a: Buffer;
        @group(1) @binding(3) var<storage, read> b: array<vec2<f32>>;

        @compute @workgroup_size(1)
        fn main() {
            let p = &a.values;
            a.count = arrayLength(p) + arrayLength(&b);
        }
    "};

    fn run(
        source: &str,
        size_indices: BTreeMap<BindingPoint, u32>,
        remapped: RemappedBindings,
    ) -> (Option<Program>, DataMap) {
        let inputs = DataMap::new()
            .with(ArrayLengthFromUniformOptions {
                uniform_binding: BindingPoint::new(2, 0),
                size_indices,
            })
            .with(remapped);

        let mut outputs = DataMap::new();
        let output = ArrayLengthFromUniform.apply(&program(source), &inputs, &mut outputs);

        (output, outputs)
    }

    #[test]
    fn lengths_are_read_from_the_uniform() {
        let (output, data) = run(
            SOURCE,
            BTreeMap::from([(BindingPoint::new(0, 0), 1), (BindingPoint::new(1, 3), 6)]),
            RemappedBindings::default(),
        );
        let output = output.unwrap();

        assert!(output.is_valid(), "{:#?}", output.diagnostics);

        let text = printed(&output);
        assert!(text.contains("buffer_size : array<vec4<u32>, 2>"), "{text}");
        assert!(text.contains("@group(2) @binding(0) var<uniform> buffer_sizes : BufferSizes;"), "{text}");
        assert!(text.contains("((buffer_sizes.buffer_size[0u][1u] - 4u) / 4u)"), "{text}");
        assert!(text.contains("(buffer_sizes.buffer_size[1u][2u] / 8u)"), "{text}");

        let result = data.get::<ArrayLengthFromUniformResult>().unwrap();
        assert_eq!(result.used_size_indices, BTreeSet::from([1, 6]));
    }

    #[test]
    fn indices_are_keyed_by_the_original_binding() {
        let remapped = RemappedBindings {
            bindings: BTreeMap::from([(BindingPoint::new(5, 5), BindingPoint::new(0, 0))]),
        };

        let (output, data) = run(SOURCE, BTreeMap::from([(BindingPoint::new(5, 5), 0)]), remapped);

        let text = printed(&output.unwrap());
        assert!(text.contains("buffer_size[0u][0u]"), "{text}");
        assert!(text.contains("arrayLength(&b)"), "{text}");
        assert_eq!(
            data.get::<ArrayLengthFromUniformResult>().map(|result| result.used_size_indices.len()),
            Some(1)
        );
    }

    #[test]
    fn programs_without_queries_are_skipped() {
        let (output, data) = run(
            "@compute @workgroup_size(1) fn main() {}\n",
            BTreeMap::new(),
            RemappedBindings::default(),
        );

        assert!(output.is_none());
        assert!(data.get::<ArrayLengthFromUniformResult>().unwrap().used_size_indices.is_empty());
    }
}

use proptest::prelude::*;
use wgslc::{
    CompileOptions, OptLevel, SourceFile, Target, analyze, legalize, lower,
    middle::{
        ir::validate::validate,
        ty::{ScalarKind, TypeKind, TypeTable},
    },
};

fn scalar() -> impl Strategy<Value = ScalarKind> {
    prop_oneof![
        Just(ScalarKind::Bool),
        Just(ScalarKind::I32),
        Just(ScalarKind::U32),
        Just(ScalarKind::F32),
        Just(ScalarKind::F16),
    ]
}

fn type_kind() -> impl Strategy<Value = TypeKind> {
    prop_oneof![
        scalar().prop_map(TypeKind::Scalar),
        (2u8..=4, scalar()).prop_map(|(size, scalar)| TypeKind::Vector { size, scalar }),
        (2u8..=4, 2u8..=4).prop_map(|(columns, rows)| TypeKind::Matrix {
            columns,
            rows,
            scalar: ScalarKind::F32,
        }),
    ]
}

/// A random `f32` expression over `a`, `b` and literals
fn expression() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        Just("a".to_string()),
        Just("b".to_string()),
        (0u32..100).prop_map(|n| format!("{n}.5")),
    ];

    leaf.prop_recursive(4, 32, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone(), prop_oneof![Just("+"), Just("-"), Just("*")])
                .prop_map(|(lhs, rhs, op)| format!("({lhs} {op} {rhs})")),
            (inner.clone(), inner.clone()).prop_map(|(lhs, rhs)| format!("max({lhs}, {rhs})")),
            (inner.clone(), inner.clone(), inner)
                .prop_map(|(condition, accept, reject)| format!("select({reject}, {accept}, {condition} < 1.0)")),
        ]
    })
}

fn shader(body: &str) -> String {
    format!(
        "@group(0) @binding(0) var<storage, read_write> data: array<f32>;\n\n\
         @compute @workgroup_size(1)\n\
         fn main() {{\n    \
             let a = data[0];\n    \
             let b = data[1];\n    \
             data[2] = {body};\n\
         }}\n"
    )
}

proptest! {
    #[test]
    fn interning_is_idempotent(kinds in prop::collection::vec(type_kind(), 1..16)) {
        let mut types = TypeTable::new();

        let first = kinds.iter().map(|kind| types.intern(kind.clone())).collect::<Vec<_>>();
        let count = types.len();
        let second = kinds.iter().map(|kind| types.intern(kind.clone())).collect::<Vec<_>>();

        prop_assert_eq!(first, second);
        prop_assert_eq!(types.len(), count);
    }

    #[test]
    fn generated_code_is_deterministic(body in expression(), target in prop_oneof![
        Just(Target::Vulkan),
        Just(Target::D3d12),
        Just(Target::Metal),
        Just(Target::Opengl),
    ]) {
        let source = SourceFile::from_memory(shader(&body));
        let options = CompileOptions::new(target);

        let first = wgslc::compile(&source, &options);
        prop_assert!(first.is_ok(), "{}", shader(&body));
        prop_assert_eq!(first, wgslc::compile(&source, &options));
    }

    #[test]
    fn lowered_ir_is_consistent(body in expression(), optimize in any::<bool>()) {
        let source = SourceFile::from_memory(shader(&body));
        let level = if optimize { OptLevel::Basic } else { OptLevel::None };
        let options = CompileOptions::new(Target::Vulkan).with_opt_level(level);

        let program = analyze(&source, &options).unwrap();
        let program = legalize(&source, &program, &options).unwrap();
        let module = lower(&source, &program, &options).unwrap();

        let errors = validate(&module);
        prop_assert!(errors.is_empty(), "{:?}", errors);
    }
}

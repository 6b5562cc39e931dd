use indoc::indoc;

use crate::{
    diagnostics::DEFAULT_MAX_ERRORS,
    frontend::SourceFile,
    middle::{
        constant::{ConstValue, Scalar},
        program::{BindingPoint, Program},
    },
};

fn resolve(source: &str) -> Program {
    Program::from_source(&SourceFile::from_memory(source), DEFAULT_MAX_ERRORS)
}

fn errors(source: &str) -> Vec<String> {
    resolve(source)
        .diagnostics
        .iter()
        .filter(|diagnostic| diagnostic.severity.is_error())
        .map(|diagnostic| diagnostic.message.clone())
        .collect()
}

#[track_caller]
fn assert_valid(source: &str) {
    let errors = errors(source);
    assert!(errors.is_empty(), "unexpected errors: {errors:#?}");
}

#[track_caller]
fn assert_single_error(source: &str, expected: &str) {
    let errors = errors(source);
    assert_eq!(errors.len(), 1, "expected one error, got {errors:#?}");
    assert!(
        errors[0].contains(expected),
        "expected an error containing {expected:?}, got {:?}",
        errors[0]
    );
}

fn global_value(program: &Program, name: &str) -> Option<ConstValue> {
    let id = program.module.find_declaration(name)?;
    program.global(id)?.value.clone()
}

#[test]
fn duplicate_bindings_are_reported_once() {
    let source = indoc! {"
        @group(0) @binding(1) var<uniform> a: vec4<f32>;
        @group(0) @binding(1) var<uniform> b: vec4<f32>;

        @fragment
        fn main() -> @location(0) vec4<f32> {
            return a + b;
        }
    "};

    assert_eq!(errors(source), ["binding @group(0) @binding(1) is used by 2 variables"]);
}

#[test]
fn unresolved_identifier() {
    let source = indoc! {"
        fn f() -> i32 {
            return y;
        }
    "};

    assert_single_error(source, "unresolved identifier 'y'");
}

#[test]
fn cyclic_constants() {
    let source = indoc! {"
        const a = b;
        const b = a;
    "};

    assert_eq!(errors(source), ["cyclic dependency found: 'a' -> 'b' -> 'a'"]);
}

#[test]
fn recursion_is_rejected() {
    let source = indoc! {"
        fn f() -> i32 {
            return f();
        }
    "};

    assert_single_error(source, "recursion is not permitted: 'f' calls itself");
}

#[test]
fn missing_return() {
    let source = indoc! {"
        fn f(x: i32) -> i32 {
            if x > 0 {
                return 1;
            }
        }
    "};

    assert_single_error(source, "missing return at end of function");
}

#[test]
fn infinite_loops_do_not_need_a_return() {
    assert_valid(indoc! {"
        fn f() -> i32 {
            loop {
                return 1;
            }
        }
    "});
}

#[test]
fn compute_requires_workgroup_size() {
    assert_single_error(
        "@compute fn main() {}",
        "compute entry point 'main' requires a @workgroup_size attribute",
    );
}

#[test]
fn implicit_override_ids_skip_explicit_ones() {
    let program = resolve(indoc! {"
        @id(1) override a: f32 = 1.0;
        override b: i32;
        override c = 2u;

        @compute @workgroup_size(1)
        fn main() {
            _ = a;
            _ = b;
            _ = c;
        }
    "});

    assert!(program.is_valid(), "{:#?}", program.diagnostics);

    let id = |name: &str| {
        let declaration = program.module.find_declaration(name).unwrap();
        program.global(declaration).unwrap().override_id
    };

    assert_eq!(id("a"), Some(1));
    assert_eq!(id("b"), Some(0));
    assert_eq!(id("c"), Some(2));
}

#[test]
fn duplicate_override_ids() {
    let source = indoc! {"
        @id(3) override a: f32;
        @id(3) override b: f32;
    "};

    assert_single_error(source, "@id(3) is used by more than one override");
}

#[test]
fn const_assertions() {
    let source = indoc! {"
        const x = 3;
        const_assert x > 2;
        const_assert x < 2;
    "};

    assert_single_error(source, "const assertion failed");
}

#[test]
fn constants_fold_and_materialize() {
    let program = resolve(indoc! {"
        const a = 2 + 3 * 4;
        const b: f32 = a;
        const v = vec3(1, 2, 3);
        const s = v.y + v.z;
    "});

    assert!(program.is_valid(), "{:#?}", program.diagnostics);
    assert_eq!(global_value(&program, "a"), Some(ConstValue::Scalar(Scalar::AbstractInt(14))));
    assert_eq!(global_value(&program, "b"), Some(ConstValue::Scalar(Scalar::F32(14.0))));
    assert_eq!(global_value(&program, "s"), Some(ConstValue::Scalar(Scalar::AbstractInt(5))));
}

#[test]
fn constant_division_by_zero() {
    assert_single_error("const a = 1 / 0;", "integer division by zero is invalid");
}

#[test]
fn abstract_float_does_not_convert_to_integer() {
    let source = indoc! {"
        fn f() {
            var x: i32 = 1.5;
        }
    "};

    assert_single_error(source, "type mismatch");
}

#[test]
fn shadowing_in_nested_scopes() {
    assert_valid(indoc! {"
        const x = 1;

        fn f() -> i32 {
            let x = 2i;
            {
                let x = 3i;
            }
            return x;
        }
    "});
}

#[test]
fn redeclaration_in_the_same_scope() {
    let source = indoc! {"
        fn f() {
            let a = 1;
            let a = 2;
        }
    "};

    assert_single_error(source, "redeclaration of 'a'");
}

#[test]
fn break_outside_of_a_loop() {
    let source = indoc! {"
        fn f() {
            break;
        }
    "};

    assert_single_error(source, "break statement must be in a loop or switch case");
}

#[test]
fn vertex_entry_points_return_a_position() {
    let source = indoc! {"
        @vertex
        fn main() -> @location(0) vec4<f32> {
            return vec4<f32>(1.0);
        }
    "};

    assert_single_error(source, "vertex entry point 'main' must return a @builtin(position) value");
}

#[test]
fn stage_restricted_builtins_are_checked_through_calls() {
    let source = indoc! {"
        @group(0) @binding(0) var t: texture_2d<f32>;
        @group(0) @binding(1) var s: sampler;

        fn helper() -> vec4<f32> {
            return textureSample(t, s, vec2<f32>(0.5));
        }

        @compute @workgroup_size(1)
        fn main() {
            _ = helper();
        }
    "};

    assert_single_error(source, "'textureSample' can only be used in fragment shaders");
}

#[test]
fn workgroup_variables_outside_compute() {
    let source = indoc! {"
        var<workgroup> counter: u32;

        @fragment
        fn main() -> @location(0) vec4<f32> {
            let c = counter;
            return vec4<f32>(f32(c));
        }
    "};

    assert_single_error(source, "workgroup variable 'counter' can only be used in compute shaders");
}

#[test]
fn f16_requires_the_extension() {
    let source = indoc! {"
        fn f() {
            let x = 1.0h;
        }
    "};

    assert_single_error(source, "enable f16");

    assert_valid(indoc! {"
        enable f16;

        fn f() {
            let x = 1.0h;
        }
    "});
}

#[test]
fn errors_in_one_function_do_not_hide_others() {
    let program = resolve(indoc! {"
        fn a() {
            let x: i32 = true;
        }

        fn b() {
            let y = undefined_name;
        }

        fn c() -> i32 {
            return 1;
        }
    "});

    assert_eq!(program.diagnostics.error_count(), 2);

    let c = program.module.find_declaration("c").unwrap();
    assert!(program.function(c).is_some());
}

#[test]
fn transitive_globals_and_bindings() {
    let program = resolve(indoc! {"
        @group(0) @binding(0) var<storage, read_write> data: array<u32>;

        fn helper() {
            data[0] = 1u;
        }

        @compute @workgroup_size(64)
        fn main() {
            helper();
        }
    "});

    assert!(program.is_valid(), "{:#?}", program.diagnostics);

    let data = program.module.find_declaration("data").unwrap();
    let helper = program.module.find_declaration("helper").unwrap();
    let main = program.module.find_declaration("main").unwrap();

    let info = program.function(main).unwrap();
    assert!(info.transitive_globals.contains(&data));
    assert!(info.transitive_calls.contains(&helper));
    assert_eq!(info.bindings.get(&BindingPoint::new(0, 0)), Some(&data));

    assert!(program.function(helper).unwrap().ancestor_entry_points.contains(&main));
    assert_eq!(program.resolved_workgroup_size(main), Some([64, 1, 1]));
}

#[test]
fn constant_index_out_of_bounds() {
    let source = indoc! {"
        fn f() {
            var a: array<i32, 4>;
            a[4] = 1;
        }
    "};

    assert_single_error(source, "index 4 is out of bounds");
}

#[test]
fn duplicate_switch_selectors() {
    let source = indoc! {"
        fn f(x: i32) {
            switch x {
                case 1, 2: {}
                case 2: {}
                default: {}
            }
        }
    "};

    assert_single_error(source, "duplicate switch case '2'");
}

#[test]
fn switch_requires_a_default() {
    let source = indoc! {"
        fn f(x: i32) {
            switch x {
                case 1: {}
            }
        }
    "};

    assert_single_error(source, "exactly one default clause");
}

#[test]
fn swizzles_and_matrix_products() {
    assert_valid(indoc! {"
        const m = mat2x2(1.0, 0.0, 0.0, 1.0);

        fn f() -> vec2<f32> {
            let v = vec4<f32>(1.0, 2.0, 3.0, 4.0);
            return m * v.zy;
        }
    "});
}

#[test]
fn assignment_to_a_let() {
    let source = indoc! {"
        fn f() {
            let x = 1;
            x = 2;
        }
    "};

    assert_single_error(source, "cannot assign to 'x'");
}

use indoc::indoc;
use wgslc::{
    CompileOptions, DiagnosticSource, Severity, SourceFile, Target, analyze, compile, frontend::parser::Parser,
    frontend::ast::PipelineStage,
};

#[test]
fn minimal_vertex_shader_compiles_cleanly() {
    let source = SourceFile::from_memory(indoc! {"
        @vertex
        fn main() -> @builtin(position) vec4<f32> {
            return vec4<f32>(0.0, 0.0, 0.0, 1.0);
        }
    "});

    let program = analyze(&source, &CompileOptions::default()).unwrap();
    assert!(program.diagnostics.is_empty(), "{:#?}", program.diagnostics);

    let shader = compile(&source, &CompileOptions::default()).unwrap();
    assert_eq!(shader.reflection.entry_points.len(), 1);

    let entry_point = &shader.reflection.entry_points[0];
    assert_eq!(entry_point.name, "main");
    assert_eq!(entry_point.stage, PipelineStage::Vertex);
    assert!(shader.code.contains("OpEntryPoint Vertex"), "{}", shader.code);
}

#[test]
fn duplicate_bindings_are_one_error() {
    let source = SourceFile::from_memory(indoc! {"
        @group(0) @binding(1) var<uniform> a: vec4<f32>;
        @group(0) @binding(1) var<uniform> b: vec4<f32>;

        @fragment
        fn main() -> @location(0) vec4<f32> {
            return a + b;
        }
    "});

    let error = compile(&source, &CompileOptions::default()).unwrap_err();
    let errors = error
        .diagnostics
        .iter()
        .filter(|diagnostic| diagnostic.severity.is_error())
        .collect::<Vec<_>>();

    assert_eq!(errors.len(), 1, "{}", error.report);
    assert_eq!(errors[0].source, DiagnosticSource::Resolver);
    assert!(errors[0].message.contains("@group(0) @binding(1)"), "{}", errors[0].message);
    assert!(error.report.contains("error: binding @group(0) @binding(1)"), "{}", error.report);
}

#[test]
fn syntax_errors_stay_inside_their_function() {
    let source = SourceFile::from_memory(indoc! {"
        fn broken() {
            let x = (1 + 2;
        }

        fn fine() -> i32 {
            return 1;
        }
    "});

    let error = analyze(&source, &CompileOptions::default()).unwrap_err();
    assert_eq!(error.diagnostics.len(), 1, "{}", error.report);

    let diagnostic = &error.diagnostics[0];
    assert_eq!(diagnostic.severity, Severity::Error);
    assert_eq!(diagnostic.source, DiagnosticSource::Parser);
    assert_eq!(diagnostic.range(&source).start.line, 2);

    let output = Parser::parse_module(&source, 25);
    let names = output
        .module
        .functions()
        .map(|(_, function)| output.module.name(function.name).to_string())
        .collect::<Vec<_>>();
    assert_eq!(names, ["fine"]);
}

#[test]
fn overridden_workgroup_sizes_produce_distinct_artifacts() {
    let source = SourceFile::from_memory(indoc! {"
        override x: u32 = 1u;

        @group(0) @binding(0) var<storage, read_write> data: array<u32>;

        @compute @workgroup_size(x)
        fn main(@builtin(global_invocation_id) id: vec3<u32>) {
            data[id.x] = id.x;
        }
    "});

    let small = compile(&source, &CompileOptions::default().with_override("x", 4.0)).unwrap();
    let large = compile(&source, &CompileOptions::default().with_override("x", 64.0)).unwrap();

    assert_ne!(small.code, large.code);
    assert_eq!(small.reflection.entry_points[0].workgroup_size, Some([4, 1, 1]));
    assert_eq!(large.reflection.entry_points[0].workgroup_size, Some([64, 1, 1]));
    assert!(small.code.contains("LocalSize 4 1 1"), "{}", small.code);
    assert!(large.code.contains("LocalSize 64 1 1"), "{}", large.code);
}

#[test]
fn compute_entry_points_need_a_workgroup_size() {
    let source = SourceFile::from_memory("@compute fn main() {}");

    let error = analyze(&source, &CompileOptions::default()).unwrap_err();
    assert!(error.report.contains("workgroup_size"), "{}", error.report);
}

#[test]
fn unknown_entry_points_are_reported() {
    let source = SourceFile::from_memory(indoc! {"
        @fragment
        fn main() -> @location(0) vec4<f32> {
            return vec4<f32>(1.0);
        }
    "});

    let options = CompileOptions::new(Target::Metal).with_entry_point("missing");
    let error = compile(&source, &options).unwrap_err();

    assert!(error.report.contains("entry point 'missing' not found"), "{}", error.report);
    assert!(error.diagnostics.iter().any(|d| d.source == DiagnosticSource::Transform));
}

#[test]
fn overrides_are_set_by_name_after_selecting_an_entry_point() {
    let source = SourceFile::from_memory(indoc! {"
        override x: u32 = 4u;

        @group(0) @binding(0) var<storage, read_write> data: array<u32>;

        @compute @workgroup_size(x)
        fn main(@builtin(global_invocation_id) id: vec3<u32>) {
            data[id.x] = id.x;
        }

        @compute @workgroup_size(1)
        fn other() {}
    "});

    for target in [Target::Vulkan, Target::Opengl] {
        let options = CompileOptions::new(target).with_entry_point("main").with_override("x", 8.0);

        let shader = match compile(&source, &options) {
            Ok(shader) => shader,
            Err(error) => panic!("{target} failed:\n{}", error.report),
        };
        assert_eq!(shader.reflection.entry_points[0].workgroup_size, Some([8, 1, 1]));
    }

    // OpenGL selects the only entry point on its own
    let single = SourceFile::from_memory("override x: u32 = 4u;\n@compute @workgroup_size(x) fn main() {}\n");
    let options = CompileOptions::new(Target::Opengl).with_override("x", 16.0);
    let shader = compile(&single, &options).unwrap();

    assert_eq!(shader.reflection.entry_points[0].workgroup_size, Some([16, 1, 1]));
    assert!(shader.code.contains("local_size_x = 16"), "{}", shader.code);
}

#[test]
fn long_expressions_are_rejected_without_crashing() {
    let chain = |terms: usize| {
        let sum = vec!["x"; terms].join(" + ");
        format!("@compute @workgroup_size(1)\nfn main() {{\n    let x = 1u;\n    let y = {sum};\n}}\n")
    };

    let error = analyze(&SourceFile::from_memory(chain(600)), &CompileOptions::default()).unwrap_err();
    assert_eq!(error.diagnostics.len(), 1, "{}", error.report);
    assert_eq!(error.diagnostics[0].source, DiagnosticSource::Parser);
    assert!(error.report.contains("nested more than"), "{}", error.report);

    let source = SourceFile::from_memory(chain(48));
    for target in [Target::Vulkan, Target::D3d12, Target::Metal, Target::Opengl] {
        if let Err(error) = compile(&source, &CompileOptions::new(target)) {
            panic!("{target} failed:\n{}", error.report);
        }
    }
}

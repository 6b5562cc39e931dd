use indoc::indoc;
use strum::IntoEnumIterator;
use wgslc::{
    CompileOptions, DiagnosticSource, OptLevel, SourceFile, Target, backend::ResourceKind, compile,
    middle::program::BindingPoint,
};

const LIGHTING: &str = indoc! {"
    struct Camera {
        view_projection: mat4x4<f32>,
        position: vec3<f32>,
    }

    struct VertexOutput {
        @builtin(position) position: vec4<f32>,
        @location(0) normal: vec3<f32>,
        @location(1) uv: vec2<f32>,
    }

    @group(0) @binding(0) var<uniform> camera: Camera;
    @group(1) @binding(0) var albedo: texture_2d<f32>;
    @group(1) @binding(1) var albedo_sampler: sampler;

    const AMBIENT: f32 = 0.1;

    fn shade(normal: vec3<f32>, color: vec3<f32>) -> vec3<f32> {
        let light = normalize(vec3<f32>(1.0, 1.0, 0.5));
        let diffuse = max(dot(normalize(normal), light), 0.0);
        return color * (AMBIENT + diffuse);
    }

    @vertex
    fn vs_main(@location(0) position: vec3<f32>, @location(1) normal: vec3<f32>, @location(2) uv: vec2<f32>) -> VertexOutput {
        var output: VertexOutput;
        output.position = camera.view_projection * vec4<f32>(position, 1.0);
        output.normal = normal;
        output.uv = uv;
        return output;
    }

    @fragment
    fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
        let texel = textureSample(albedo, albedo_sampler, input.uv);
        if texel.a < 0.01 {
            discard;
        }
        return vec4<f32>(shade(input.normal, texel.rgb), texel.a);
    }
"};

const PREFIX_SUM: &str = indoc! {"
    struct Params {
        count: u32,
        scale: f32,
    }

    @group(0) @binding(0) var<uniform> params: Params;
    @group(0) @binding(1) var<storage, read> input: array<f32>;
    @group(0) @binding(2) var<storage, read_write> output: array<f32>;

    var<workgroup> scratch: array<f32, 64>;

    @compute @workgroup_size(64)
    fn main(@builtin(local_invocation_id) local: vec3<u32>, @builtin(global_invocation_id) global: vec3<u32>) {
        let index = global.x;
        if index < arrayLength(&input) {
            scratch[local.x] = input[index] * params.scale;
        }
        workgroupBarrier();

        var total = 0.0;
        for (var i = 0u; i <= local.x; i++) {
            total += scratch[i];
        }

        if index < min(params.count, arrayLength(&output)) {
            output[index] = total;
        }
    }
"};

fn compile_for(source: &str, target: Target, entry_point: Option<&str>) -> wgslc::CompiledShader {
    let mut options = CompileOptions::new(target).with_opt_level(OptLevel::Basic);
    options.entry_point = entry_point.map(str::to_string);

    match compile(&SourceFile::from_memory(source), &options) {
        Ok(shader) => shader,
        Err(error) => panic!("{target} failed:\n{}", error.report),
    }
}

#[test]
fn every_target_compiles_a_render_pipeline() {
    for target in Target::iter() {
        let entry_point = match target {
            Target::Opengl => Some("fs_main"),
            _ => None,
        };

        let shader = compile_for(LIGHTING, target, entry_point);
        assert_eq!(shader.target, target);
        assert!(!shader.code.is_empty());
    }
}

#[test]
fn every_target_compiles_a_compute_pipeline() {
    for target in Target::iter() {
        let shader = compile_for(PREFIX_SUM, target, None);
        let reflection = &shader.reflection.entry_points[0];

        assert_eq!(reflection.workgroup_size, Some([64, 1, 1]));
        assert!(
            reflection
                .resources
                .iter()
                .any(|resource| matches!(resource.kind, ResourceKind::StorageBuffer { .. })),
            "{}",
            shader.reflection
        );
    }
}

#[test]
fn spirv_keeps_bind_groups() {
    let shader = compile_for(LIGHTING, Target::Vulkan, None);

    assert!(shader.code.contains("OpEntryPoint Vertex"), "{}", shader.code);
    assert!(shader.code.contains("OpEntryPoint Fragment"), "{}", shader.code);
    assert!(shader.code.contains("DescriptorSet 1"), "{}", shader.code);
    assert!(shader.code.contains("OpImageSampleImplicitLod"), "{}", shader.code);
    assert!(shader.code.contains("OpMatrixTimesVector"), "{}", shader.code);

    let fragment = shader.reflection.entry_point("fs_main").unwrap();
    let bindings = fragment.resources.iter().map(|resource| resource.binding).collect::<Vec<_>>();
    assert_eq!(bindings, [BindingPoint::new(1, 0), BindingPoint::new(1, 1)]);
}

#[test]
fn hlsl_uses_registers() {
    let shader = compile_for(PREFIX_SUM, Target::D3d12, None);

    assert!(shader.code.contains("[numthreads(64, 1, 1)]"), "{}", shader.code);
    assert!(shader.code.contains("register(b0, space0)"), "{}", shader.code);
    assert!(shader.code.contains("groupshared"), "{}", shader.code);
    assert!(shader.code.contains("GroupMemoryBarrierWithGroupSync()"), "{}", shader.code);
}

#[test]
fn metal_reads_buffer_sizes_from_a_uniform() {
    let shader = compile_for(PREFIX_SUM, Target::Metal, None);

    assert!(shader.code.contains("kernel void"), "{}", shader.code);
    assert!(shader.code.contains("buffer_size"), "{}", shader.code);

    // Metal has no bind groups, so the sizes buffer lands after the flattened
    // bindings in group 0
    let resources = &shader.reflection.entry_points[0].resources;
    assert!(resources.iter().all(|resource| resource.binding.group == 0));
    assert!(resources.iter().any(|resource| resource.binding == BindingPoint::new(0, 3)));
}

#[test]
fn glsl_needs_a_single_entry_point() {
    let error = compile(
        &SourceFile::from_memory(LIGHTING),
        &CompileOptions::new(Target::Opengl),
    )
    .unwrap_err();

    assert!(error.diagnostics.iter().any(|d| d.source == DiagnosticSource::Backend));
    assert!(error.report.contains("more than one entry point"), "{}", error.report);

    let shader = compile_for(LIGHTING, Target::Opengl, Some("vs_main"));
    assert!(shader.code.starts_with("#version 450"), "{}", shader.code);
    assert!(shader.code.contains("gl_Position"), "{}", shader.code);
    assert_eq!(shader.reflection.entry_points.len(), 1);
}

#[test]
fn f16_is_rejected_by_opengl() {
    let source = indoc! {"
        enable f16;

        @group(0) @binding(0) var<storage, read_write> values: array<f16>;

        @compute @workgroup_size(1)
        fn main() {
            values[0] = values[0] * 2.0h;
        }
    "};

    let error = compile(&SourceFile::from_memory(source), &CompileOptions::new(Target::Opengl)).unwrap_err();
    assert!(error.report.contains("'f16' is not supported on opengl"), "{}", error.report);

    let shader = compile_for(source, Target::Vulkan, None);
    assert!(shader.code.contains("OpCapability Float16"), "{}", shader.code);
    assert!(shader.code.contains("OpTypeFloat 16"), "{}", shader.code);
}

#[test]
fn calls_without_a_result_are_statements() {
    let source = indoc! {"
        @group(0) @binding(0) var<storage, read_write> counts: array<u32, 64>;

        fn reset(index: u32) {
            counts[index] = 0u;
        }

        @compute @workgroup_size(64)
        fn main(@builtin(local_invocation_index) index: u32) {
            reset(index);
            workgroupBarrier();
            storageBarrier();
        }
    "};

    for target in Target::iter() {
        let shader = compile_for(source, target, None);

        let expected: &[&str] = match target {
            Target::Vulkan => &["OpFunctionCall", "OpControlBarrier"],
            Target::D3d12 => &["GroupMemoryBarrierWithGroupSync();", "DeviceMemoryBarrierWithGroupSync();"],
            Target::Metal => &[
                "threadgroup_barrier(mem_flags::mem_threadgroup);",
                "threadgroup_barrier(mem_flags::mem_device);",
            ],
            Target::Opengl => &["barrier();", "memoryBarrierBuffer();"],
        };

        for text in expected {
            assert!(shader.code.contains(text), "{target} is missing '{text}':\n{}", shader.code);
        }

        if target != Target::Vulkan {
            assert!(shader.code.contains("reset(index"), "{}", shader.code);
        }
    }
}

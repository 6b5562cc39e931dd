use std::{sync::Arc, thread};

use indoc::indoc;
use strum::IntoEnumIterator;
use wgslc::{CompileOptions, SourceFile, Target, compile};

const SOURCE: &str = indoc! {"
    struct Particle {
        position: vec2<f32>,
        velocity: vec2<f32>,
    }

    override damping: f32 = 0.98;

    @group(0) @binding(0) var<storage, read_write> particles: array<Particle, 256>;

    fn advance(particle: Particle) -> Particle {
        var next = particle;
        next.velocity = next.velocity * damping;
        next.position = next.position + next.velocity;
        if next.position.y < 0.0 {
            next.velocity = vec2<f32>(next.velocity.x, -next.velocity.y);
        }
        return next;
    }

    @compute @workgroup_size(32)
    fn main(@builtin(global_invocation_id) id: vec3<u32>) {
        switch id.x % 3u {
            case 0u: {
                particles[id.x] = advance(particles[id.x]);
            }
            case 1u, 2u: {
                particles[id.x].velocity = vec2<f32>(0.0, -1.0);
            }
            default: {}
        }
    }
"};

const BROKEN: &str = indoc! {"
    fn a() -> i32 {
        return b;
    }

    fn c() {
        let x: u32 = -1;
    }

    fn d() -> f32 {
        return true;
    }
"};

#[test]
fn output_is_identical_across_runs() {
    let source = SourceFile::from_memory(SOURCE);

    for target in Target::iter() {
        let options = CompileOptions::new(target);
        let first = compile(&source, &options).unwrap();

        for _ in 0..3 {
            assert_eq!(compile(&source, &options).unwrap(), first, "{target} is not deterministic");
        }
    }
}

#[test]
fn diagnostics_are_reported_in_source_order() {
    let source = SourceFile::from_memory(BROKEN);

    let first = compile(&source, &CompileOptions::default()).unwrap_err();
    let second = compile(&source, &CompileOptions::default()).unwrap_err();
    assert_eq!(first, second);

    // Every function reports its own error
    let lines = first
        .diagnostics
        .iter()
        .filter(|diagnostic| diagnostic.severity.is_error())
        .map(|diagnostic| diagnostic.range(&source).start.line)
        .collect::<Vec<_>>();

    assert_eq!(lines, [2, 6, 10], "{}", first.report);
}

#[test]
fn the_error_limit_stops_reporting() {
    let source = SourceFile::from_memory(BROKEN);
    let options = CompileOptions {
        max_errors: 2,
        ..CompileOptions::default()
    };

    let error = compile(&source, &options).unwrap_err();
    let errors = error
        .diagnostics
        .iter()
        .filter(|diagnostic| diagnostic.severity.is_error())
        .count();

    assert_eq!(errors, 2, "{}", error.report);
}

#[test]
fn independent_compilations_run_concurrently() {
    let source = Arc::new(SourceFile::from_memory(SOURCE));

    let expected = Target::iter()
        .map(|target| compile(&source, &CompileOptions::new(target)).unwrap())
        .collect::<Vec<_>>();

    let handles = (0..8)
        .map(|i| {
            let source = Arc::clone(&source);
            thread::spawn(move || {
                let targets = Target::iter().collect::<Vec<_>>();
                let target = targets[i % targets.len()];
                (i % targets.len(), compile(&source, &CompileOptions::new(target)).unwrap())
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        let (index, shader) = handle.join().unwrap();
        assert_eq!(shader, expected[index]);
    }
}

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;

use atrium::logging::{LogEvent, LogSink};
use atrium::{
    CompilerOutcome, CompilerSpec, Engine, Logger, OptionsBag, OverlayOptions, RenderConfig,
};

#[derive(Clone, Default)]
struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _event: &LogEvent) {}
}

const PAGES: usize = 16;
const OVERLAYS: usize = 5;

fn render_script(c: &mut Criterion) {
    c.bench_function("render_script", |b| {
        b.iter(|| {
            let mut engine = build_engine();
            for page in 0..PAGES {
                let mut options = OptionsBag::new();
                options.insert("content".into(), json!(format!("page {page}")));
                options.insert("url".into(), json!(format!("/pages/{page}")));
                engine.render(black_box(options)).expect("render");
            }
        });
    });
}

fn render_noop_detection(c: &mut Criterion) {
    c.bench_function("render_noop_detection", |b| {
        b.iter(|| {
            let mut engine = build_engine();
            for _ in 0..PAGES {
                let mut options = OptionsBag::new();
                options.insert("content".into(), json!("unchanged"));
                engine.render(black_box(options)).expect("render");
            }
        });
    });
}

fn overlay_open_close(c: &mut Criterion) {
    c.bench_function("overlay_open_close", |b| {
        b.iter(|| {
            let mut engine = build_engine();
            let mut layers = Vec::with_capacity(OVERLAYS);
            for _ in 0..OVERLAYS {
                layers.push(
                    engine
                        .open_layer(OverlayOptions::default(), None)
                        .expect("open"),
                );
            }
            // Dismissing the bottom overlay peels everything above it.
            engine.dismiss(black_box(layers[0]), None).expect("dismiss");
        });
    });
}

fn build_engine() -> Engine {
    let mut config = RenderConfig::default();
    config.logger = Some(Logger::new(NullSink));
    config.enable_metrics();
    let mut engine = Engine::with_config(config);
    engine.register_compiler(CompilerSpec::new("fragment"), |_, _, _| {
        Ok(CompilerOutcome::Done)
    });
    engine
}

criterion_group!(
    benches,
    render_script,
    render_noop_detection,
    overlay_open_close
);
criterion_main!(benches);

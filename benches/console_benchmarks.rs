//! Benchmarks for the console hot paths.
//!
//! Run with: cargo bench
//!
//! These cover the per-message work done while a run is streaming: protocol
//! parsing and validation, producer-side serialization and console appends.
//! No wasm assets are required.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use lesson_sandbox_rs::console::{Console, LogLevel};
use lesson_sandbox_rs::protocol::{serialize_arg, ProtocolMessage, RunGate};

fn bench_console_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("console");
    group.throughput(Throughput::Elements(1));

    group.bench_function("append", |b| {
        let console = Console::new();
        b.iter(|| {
            console.append(black_box("a line of output"), LogLevel::Info);
        });
    });

    group.bench_function("append_with_subscriber", |b| {
        let console = Console::new();
        let _rx = console.subscribe();
        b.iter(|| {
            console.append(black_box("a line of output"), LogLevel::Info);
        });
    });

    group.finish();
}

fn bench_protocol(c: &mut Criterion) {
    let gate = RunGate::new();
    let run = gate.mint();
    let line = format!(
        r#"{{"source":"lesson-sandbox-console","runId":{},"level":"log","args":["hello","world"]}}"#,
        run.raw()
    );

    let mut group = c.benchmark_group("protocol");
    group.throughput(Throughput::Bytes(line.len() as u64));

    group.bench_function("parse_and_validate", |b| {
        b.iter(|| {
            let msg = ProtocolMessage::parse(black_box(&line)).unwrap();
            black_box(msg.is_valid(&gate) && !msg.rendered().is_empty())
        });
    });

    group.bench_function("parse_foreign_line", |b| {
        b.iter(|| black_box(ProtocolMessage::parse(black_box("plain guest output"))));
    });

    group.finish();
}

fn bench_serialize_arg(c: &mut Criterion) {
    let string = serde_json::json!("a plain string argument");
    let object = serde_json::json!({"values": [1, 2, 3], "nested": {"ok": true}});

    let mut group = c.benchmark_group("serialize_arg");
    group.bench_function("string_passthrough", |b| {
        b.iter(|| black_box(serialize_arg(black_box(&string))));
    });
    group.bench_function("json_object", |b| {
        b.iter(|| black_box(serialize_arg(black_box(&object))));
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_console_append,
    bench_protocol,
    bench_serialize_arg
);
criterion_main!(benches);

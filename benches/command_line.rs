//! Command-line splitting and joining benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use ptybridge::{join_command_line, parse, parse_with, ParseOptions};

fn bench_parse_plain(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_line");

    let plain = "program --flag value ".repeat(200);
    group.throughput(Throughput::Bytes(plain.len() as u64));

    group.bench_function("parse_plain", |b| b.iter(|| black_box(parse(black_box(&plain)))));

    group.finish();
}

fn bench_parse_quoted(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_line");

    // Quoted regions, escaped quotes and single quotes
    let quoted = r#"run "C:\Program Files\app" 'it''s' \"x\" "a \"b\" c" "#.repeat(100);
    group.throughput(Throughput::Bytes(quoted.len() as u64));

    let options = ParseOptions {
        support_single_quotes: true,
        ..ParseOptions::default()
    };
    group.bench_function("parse_quoted", |b| {
        b.iter(|| black_box(parse_with(black_box(&quoted), options)))
    });

    group.finish();
}

fn bench_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_line");

    let tokens: Vec<String> = (0..200)
        .map(|i| match i % 4 {
            0 => "plain".to_string(),
            1 => "with space".to_string(),
            2 => r#"quote"inside"#.to_string(),
            _ => r"trailing\slash\".to_string(),
        })
        .collect();

    group.bench_function("join", |b| b.iter(|| black_box(join_command_line(black_box(&tokens)))));

    group.finish();
}

criterion_group!(benches, bench_parse_plain, bench_parse_quoted, bench_join);

criterion_main!(benches);

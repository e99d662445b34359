use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use xins_core::{CallResultData, Element, ElementBuilder, HttpRequest, parse_result, result_to_bytes};
use xins_core::convention::gather_params;
use hyper::Method;

/// Helper to build a result with `params` parameters and `rows` data rows
fn build_result(params: usize, rows: usize) -> CallResultData {
    let mut result = CallResultData::success();
    for i in 0..params {
        result.set_parameter(&format!("param{}", i), &format!("value <{}> & more", i));
    }

    if rows > 0 {
        let mut data = Element::new("data").unwrap();
        for i in 0..rows {
            data.add_child(
                ElementBuilder::new("row")
                    .unwrap()
                    .attribute("id", &i.to_string())
                    .text("some text content")
                    .build(),
            );
        }
        result = result.with_data(data);
    }
    result
}

fn bench_output(c: &mut Criterion) {
    let mut group = c.benchmark_group("result_output");

    for (params, rows) in [(1, 0), (10, 0), (10, 100)] {
        let result = build_result(params, rows);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}p_{}r", params, rows)),
            &result,
            |b, result| {
                b.iter(|| result_to_bytes(black_box(result), None));
            },
        );
    }

    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("result_parse");

    for (params, rows) in [(1, 0), (10, 0), (10, 100)] {
        let bytes = result_to_bytes(&build_result(params, rows), None);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}p_{}r", params, rows)),
            &bytes,
            |b, bytes| {
                b.iter(|| parse_result(black_box(bytes)).unwrap());
            },
        );
    }

    group.finish();
}

fn bench_error_cases(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_errors");

    group.bench_function("wrong_root", |b| {
        b.iter(|| parse_result(black_box(b"<product/>")).is_err());
    });

    group.bench_function("duplicate_data", |b| {
        b.iter(|| parse_result(black_box(b"<result><data/><data/></result>")).is_err());
    });

    group.bench_function("malformed", |b| {
        b.iter(|| parse_result(black_box(b"<result><param name=\"a\">")).is_err());
    });

    group.finish();
}

fn bench_gather_params(c: &mut Criterion) {
    let query: String = (0..20)
        .map(|i| format!("p{}=v{}", i, i))
        .collect::<Vec<_>>()
        .join("&");
    let request = HttpRequest::new(Method::GET, &format!("/?_function=Echo&{}", query));

    c.bench_function("gather_params_20", |b| {
        b.iter(|| gather_params(black_box(&request)).unwrap());
    });
}

criterion_group!(
    benches,
    bench_output,
    bench_parse,
    bench_error_cases,
    bench_gather_params
);
criterion_main!(benches);

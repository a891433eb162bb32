//! Criterion benchmarks for the request/response transforms.
//!
//! Run with: cargo bench -p tenancy-core

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde_json::{json, Value};

use tenancy_core::routes::{InboundResponse, OutboundRequest};
use tenancy_core::tenant::{self, TENANT_HEADER};
use tenancy_core::transform::retain_owned;
use tenancy_core::{PathExpr, RouteTable, TenantId};

fn tenant(id: &'static str) -> TenantId {
    let mut headers = HeaderMap::new();
    headers.insert(TENANT_HEADER, HeaderValue::from_static(id));
    tenant::resolve(&headers).unwrap()
}

/// Listing with `n` definitions spread over four tenants plus Global.
fn listing(n: usize) -> Vec<Value> {
    let owners = ["acme", "other", "frinx", "GLOBAL", "demo"];
    (0..n)
        .map(|i| {
            json!({
                "name": format!("{}___task_{i}", owners[i % owners.len()]),
                "type": "HTTP",
                "retryCount": 3,
                "inputKeys": ["uri", "method"]
            })
        })
        .collect()
}

/// Workflow with `n` tasks, every fourth one nested in a decision branch.
/// Names carry `prefix` as stored by the backend, or none when authored.
fn workflow(n: usize, prefix: &str) -> Value {
    let tasks: Vec<Value> = (0..n)
        .map(|i| {
            let task = json!({"name": format!("{prefix}task_{i}"), "taskReferenceName": format!("t{i}"), "type": "SIMPLE"});
            if i % 4 == 0 {
                json!({
                    "name": format!("decide_{i}"),
                    "taskReferenceName": format!("d{i}"),
                    "type": "DECISION",
                    "decisionCases": {"yes": [task]}
                })
            } else {
                task
            }
        })
        .collect();
    json!({"name": format!("{prefix}provision"), "version": 1, "tasks": tasks})
}

fn bench_path_find(c: &mut Criterion) {
    let doc = workflow(64, "");
    let mut group = c.benchmark_group("path_find");

    for expr in ["$.name", "$.tasks[*].name", "$.tasks..taskReferenceName"] {
        let path = PathExpr::parse(expr).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(expr), &path, |b, path| {
            b.iter(|| black_box(path.find(black_box(&doc))))
        });
    }

    group.finish();
}

fn bench_list_filter(c: &mut Criterion) {
    let acme = tenant("acme");
    let mut group = c.benchmark_group("list_filter");

    for size in [16, 256, 4096] {
        let items = listing(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &items, |b, items| {
            b.iter_batched(
                || items.clone(),
                |mut items| black_box(retain_owned(&acme, &mut items)),
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_workflow_hooks(c: &mut Criterion) {
    let table = RouteTable::metadata();
    let acme = tenant("acme");
    let authored = Bytes::from(workflow(64, "").to_string());

    let mut group = c.benchmark_group("workflow_hooks");
    group.throughput(Throughput::Bytes(authored.len() as u64));

    group.bench_function("create_before", |b| {
        let matched = table.dispatch(&Method::POST, "/api/metadata/workflow").unwrap();
        let hook = matched.route.pre.unwrap();
        b.iter(|| {
            let mut req = OutboundRequest::new(
                Method::POST,
                "/api/metadata/workflow",
                None,
                HeaderMap::new(),
                authored.clone(),
            );
            black_box(hook(&matched.context(&acme), &mut req).unwrap())
        })
    });

    let stored = workflow(64, "acme___");

    group.bench_function("get_one_after", |b| {
        let matched = table.dispatch(&Method::GET, "/api/metadata/workflow/provision").unwrap();
        let hook = matched.route.post.unwrap();
        b.iter_batched(
            || InboundResponse {
                status: StatusCode::OK,
                body: stored.clone(),
            },
            |mut resp| black_box(hook(&matched.context(&acme), &mut resp).unwrap()),
            criterion::BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_path_find, bench_list_filter, bench_workflow_hooks);
criterion_main!(benches);

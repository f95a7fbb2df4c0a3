//! Classification and decision benchmarks
//!
//! Classification runs on every inbound request, so it should stay in the
//! low-microsecond range even for requests that fall through the whole chain.

use cmdb_authz::{
    Action, Authorizer, BusinessScopeCache, Classifier, InMemoryAuthCenter, RequestContext,
    ResourceAttribute, ResourceType, UserInfo, WarmRefreshPolicy,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use http::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn bench_classify(c: &mut Criterion) {
    let classifier = Classifier::new().unwrap();
    let mut group = c.benchmark_group("classify");

    let cases = [
        ("first_group_exact", Method::POST, "/api/v3/hosts/search", json!({"bk_biz_id": 3})),
        ("user_api_pattern", Method::GET, "/api/v3/userapi/data/3/q1/0/20", Value::Null),
        ("last_group_pattern", Method::DELETE, "/api/v3/biz/0/42", Value::Null),
        ("unmatched", Method::GET, "/api/v3/topo/internal/0/3", Value::Null),
    ];

    for (name, method, uri, body) in cases {
        let ctx = RequestContext::new(method, uri, body).unwrap();
        group.bench_with_input(BenchmarkId::new("rule", name), &ctx, |b, ctx| {
            b.iter(|| classifier.classify(black_box(ctx)).unwrap());
        });
    }

    group.finish();
}

fn bench_request_context(c: &mut Criterion) {
    let body = br#"{"bk_biz_id": 3, "condition": [{"field": "bk_host_innerip", "operator": "$eq", "value": "10.0.0.1"}]}"#;

    c.bench_function("request_context_from_raw", |b| {
        b.iter(|| {
            RequestContext::from_raw(
                Method::POST,
                black_box("/api/v3/hosts/search?start=0&limit=20"),
                black_box(body),
            )
            .unwrap()
        });
    });
}

fn bench_in_memory_batch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("in_memory_batch");

    for size in [1usize, 10, 100] {
        let engine = InMemoryAuthCenter::new();
        rt.block_on(async {
            engine
                .grant_type("alice", ResourceType::Business, Action::Find, 0)
                .await
                .unwrap();
        });

        let user = UserInfo::new("alice", "0");
        let resources: Vec<ResourceAttribute> = (1..=size as i64)
            .map(|id| ResourceAttribute::new(ResourceType::Business, Action::Find).with_instance(id))
            .collect();

        group.bench_with_input(BenchmarkId::new("resources", size), &resources, |b, resources| {
            b.iter(|| {
                rt.block_on(async {
                    engine
                        .authorize_batch(black_box(&user), black_box(resources))
                        .await
                        .unwrap()
                })
            });
        });
    }

    group.finish();
}

fn bench_scoped_query(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let engine = Arc::new(InMemoryAuthCenter::new());
    rt.block_on(async {
        for id in 1..=50 {
            engine.grant_business("alice", id).await;
        }
    });

    let cache = BusinessScopeCache::new(engine, WarmRefreshPolicy::FailRequest);
    let user = UserInfo::new("alice", "0");

    c.bench_function("scoped_query_warm", |b| {
        b.iter(|| {
            rt.block_on(async {
                cache
                    .scoped_query(&user, |scope| async move {
                        Ok::<_, cmdb_authz::AuthzError>(scope.allows(25))
                    })
                    .await
                    .unwrap()
            })
        });
    });
}

criterion_group!(
    benches,
    bench_classify,
    bench_request_context,
    bench_in_memory_batch,
    bench_scoped_query
);
criterion_main!(benches);

//! # Agent-Mesh Benchmarks
//!
//! Hot paths every tool call crosses:
//!
//! | Path | Work |
//! |------|------|
//! | sign | canonical payload + MAC / Ed25519 signature |
//! | verify | parse, window checks, MAC / signature check |
//! | validate_access | policy lookup + access-log append |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mesh_security::{KeyAlgorithm, SigningPolicy, SigningService, TenantIsolationEngine};
use mesh_tests::fixtures::{mesh_policy, TENANT_X};
use mesh_types::{Headers, IsolationLevel};
use std::time::Duration;

fn bench_sign_verify(c: &mut Criterion) {
    let mut group = c.benchmark_group("signing");
    group.measurement_time(Duration::from_secs(5));

    for algorithm in KeyAlgorithm::ALL {
        let signing = SigningService::new(SigningPolicy::default());
        signing.create_key("crypto", TENANT_X, algorithm, None);
        let headers = Headers::new(TENANT_X, "crypto").with_reply_to("mesh://crypto/results");

        group.bench_with_input(
            BenchmarkId::new("sign", algorithm.as_str()),
            &headers,
            |b, headers| b.iter(|| signing.sign(black_box(headers), "crypto", algorithm)),
        );

        let Ok(signed) = signing.sign(&headers, "crypto", algorithm) else {
            continue;
        };
        group.bench_with_input(
            BenchmarkId::new("verify", algorithm.as_str()),
            &signed,
            |b, signed| b.iter(|| signing.verify(black_box(signed))),
        );
    }

    group.finish();
}

fn bench_validate_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("isolation");

    for level in [IsolationLevel::Strict, IsolationLevel::Permissive] {
        let engine = TenantIsolationEngine::new(mesh_policy(level), 10_000);
        let headers = Headers::new(TENANT_X, "crypto");
        group.bench_function(BenchmarkId::new("validate_access", format!("{level:?}")), |b| {
            b.iter(|| {
                engine
                    .validate_access(black_box(&headers), "erp", "check_compliance", "call_tool")
                    .is_ok()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_sign_verify, bench_validate_access);
criterion_main!(benches);

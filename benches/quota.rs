//! Benchmarks for quota bookkeeping and dedup lookups.

use chrono::Utc;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use outreach::core::types::CandidateId;
use outreach::{AutomationJob, DeliveryRecord, InMemoryStorage, JobId, JobSpec, Platform, Quota, Storage};
use tokio::runtime::Runtime;

fn bench_reserve(c: &mut Criterion) {
    c.bench_function("quota_reserve_release", |b| {
        let mut quota = Quota::new(40, Utc::now());
        b.iter(|| {
            if quota.reserve_and_record() {
                quota.release();
            }
        })
    });
}

fn bench_contacted_candidates(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("storage_contacted_candidates");

    for count in [100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("inmemory", count), count, |b, &count| {
            let storage = InMemoryStorage::new();
            let job_id = JobId::new("job1");
            rt.block_on(async {
                let spec = JobSpec::new("job1", "campaign", Platform::Reddit, "rust", "Hi {username}");
                let job = AutomationJob::new(spec, Utc::now()).unwrap();
                storage.save_job(job).await.unwrap();
                for i in 0..count {
                    let record = DeliveryRecord::delivered(
                        job_id.clone(),
                        CandidateId::new(format!("user_{}", i)),
                        "Hi there",
                    );
                    storage.record_delivery(record).await.unwrap();
                }
            });

            b.iter(|| rt.block_on(async { storage.contacted_candidates(&job_id).await.unwrap() }));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_reserve, bench_contacted_candidates);
criterion_main!(benches);

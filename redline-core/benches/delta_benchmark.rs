use criterion::{black_box, criterion_group, criterion_main, Criterion};
use redline_core::{
    apply_delta, build_delta, text_changes, Delta, Edit, RevisionSync, TextChange,
};

fn sample_text(len: usize) -> String {
    "The quick brown fox jumps over the lazy dog. "
        .chars()
        .cycle()
        .take(len)
        .collect()
}

fn scattered_edits(count: usize, stride: usize) -> Vec<Edit> {
    (0..count)
        .map(|i| Edit::replace(i * stride, 2, "ab"))
        .collect()
}

fn bench_build_delta(c: &mut Criterion) {
    let edits = scattered_edits(64, 40);

    c.bench_function("build_delta_64_edits", |b| {
        b.iter(|| {
            black_box(build_delta(black_box(&edits)).unwrap());
        })
    });
}

fn bench_apply_delta(c: &mut Criterion) {
    let text = sample_text(4096);
    let delta = build_delta(&scattered_edits(64, 40)).unwrap();

    c.bench_function("apply_delta_4K", |b| {
        b.iter(|| {
            black_box(apply_delta(black_box(&text), black_box(&delta)).unwrap());
        })
    });
}

fn bench_delta_serialize(c: &mut Criterion) {
    let delta = build_delta(&scattered_edits(16, 40)).unwrap();

    c.bench_function("delta_to_json_16_edits", |b| {
        b.iter(|| {
            black_box(serde_json::to_string(black_box(&delta)).unwrap());
        })
    });
}

fn bench_initial_submission(c: &mut Criterion) {
    let text = sample_text(64 * 1024);

    c.bench_function("delta_from_text_64K", |b| {
        b.iter(|| {
            black_box(Delta::from_text(black_box(&text)));
        })
    });
}

fn bench_rebase_deep_history(c: &mut Criterion) {
    let mut sync = RevisionSync::new(1024);
    sync.record_edit(0, Vec::new());
    for rev in 1..=1000u64 {
        sync.record_edit(rev, text_changes(&[Edit::insert((rev as usize * 7) % 500, "x")]));
    }

    c.bench_function("rebase_across_1000_revisions", |b| {
        b.iter(|| {
            black_box(sync.rebase(black_box(250..260), black_box(0)));
        })
    });
}

fn bench_record_with_pruning(c: &mut Criterion) {
    c.bench_function("record_edit_pruned_256", |b| {
        b.iter(|| {
            let mut sync = RevisionSync::new(256);
            for rev in 0..1000u64 {
                sync.record_edit(rev, vec![TextChange::insert(0, "y")]);
            }
            black_box(sync.len());
        })
    });
}

criterion_group!(
    benches,
    bench_build_delta,
    bench_apply_delta,
    bench_delta_serialize,
    bench_initial_submission,
    bench_rebase_deep_history,
    bench_record_with_pruning,
);
criterion_main!(benches);

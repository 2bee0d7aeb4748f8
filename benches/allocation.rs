use criterion::{black_box, criterion_group, criterion_main, Criterion};

use brkalloc::{Allocator, Arena};

const HEAP_SIZE: usize = 64 * 1024;

/// Run a benchmark, which repeatedly allocates and deallocates the same
/// block. The benchmark will allocate the given amount of blocks beforehand
/// (before running the actual benchmark) in order to fill up the heap with
/// unrelated allocations, so the cost of the free-list scan at different
/// occupancy levels becomes visible.
///
/// # Panics
/// This will panic, if the requested pre-allocations fill up the whole heap
/// (so the actual benchmark cannot allocate blocks anymore).
fn benchmark_with_preallocation(c: &mut Criterion, name: &str, pre_allocations: usize) {
    let allocator = Allocator::new(Arena::<HEAP_SIZE>::new());
    // pre-allocate much memory to see the real impact of the linear search
    for _ in 0..pre_allocations {
        allocator.malloc(1);
    }

    // make sure, that there is enough room for the next allocation
    let ptr = allocator.malloc(1);
    assert!(!ptr.is_null());
    unsafe { allocator.free(ptr) };

    // run actual benchmark: allocate & deallocate the same block repeatedly
    c.bench_function(name, |b| {
        b.iter(|| {
            let ptr = allocator.malloc(1);
            let ptr = black_box(ptr);
            unsafe { allocator.free(ptr) };
        });
    });
}

fn no_memory_usage(c: &mut Criterion) {
    benchmark_with_preallocation(c, "no_memory_usage", 0);
}

fn low_memory_usage(c: &mut Criterion) {
    benchmark_with_preallocation(c, "low_memory_usage", 8);
}

fn medium_memory_usage(c: &mut Criterion) {
    benchmark_with_preallocation(c, "medium_memory_usage", 510);
}

fn high_memory_usage(c: &mut Criterion) {
    benchmark_with_preallocation(c, "high_memory_usage", 1020);
}

criterion_group!(
    benches,
    no_memory_usage,
    low_memory_usage,
    medium_memory_usage,
    high_memory_usage
);
criterion_main!(benches);

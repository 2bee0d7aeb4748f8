//! Randomized workload against a fixed arena.
//!
//! Interleaves malloc/realloc/free with payload patterns and audits the
//! heap with the checker every few operations. Seeded, so a failure is
//! reproducible.

use brkalloc::{Allocator, Arena};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const HEAP_SIZE: usize = 1 << 20;
const STEPS: usize = 4000;
const MAX_LIVE: usize = 64;
const MAX_REQUEST: usize = 2048;

struct Live {
    ptr: *mut u8,
    size: usize,
    pattern: u8,
}

fn fill(allocation: &Live) {
    for i in 0..allocation.size {
        unsafe { allocation.ptr.add(i).write(allocation.pattern.wrapping_add(i as u8)) };
    }
}

fn verify(allocation: &Live, upto: usize) {
    for i in 0..upto.min(allocation.size) {
        let byte = unsafe { allocation.ptr.add(i).read() };
        assert_eq!(
            byte,
            allocation.pattern.wrapping_add(i as u8),
            "payload of {:p} damaged at offset {i}",
            allocation.ptr,
        );
    }
}

fn assert_disjoint(live: &[Live], candidate: *mut u8, size: usize) {
    let start = candidate as usize;
    let end = start + size;
    for other in live {
        let other_start = other.ptr as usize;
        let other_end = other_start + other.size;
        assert!(
            end <= other_start || other_end <= start,
            "allocation {candidate:p} overlaps {:p}",
            other.ptr,
        );
    }
}

#[test]
fn randomized_workload_stays_consistent() {
    let allocator = Allocator::new(Arena::<HEAP_SIZE>::new());
    let mut rng = StdRng::seed_from_u64(0x5eed_b10c);
    let mut live: Vec<Live> = Vec::new();

    for step in 0..STEPS {
        match rng.gen_range(0..100) {
            // allocate, sometimes zeroed
            0..=54 => {
                if live.len() >= MAX_LIVE {
                    continue;
                }
                let size = rng.gen_range(1..=MAX_REQUEST);
                let zeroed = rng.gen_bool(0.2);
                let ptr = if zeroed {
                    allocator.calloc(size, 1)
                } else {
                    allocator.malloc(size)
                };
                if ptr.is_null() {
                    continue; // arena full; frees below will make room
                }
                assert_eq!(ptr as usize % 16, 0);
                assert_disjoint(&live, ptr, size);
                if zeroed {
                    for i in 0..size {
                        assert_eq!(unsafe { ptr.add(i).read() }, 0);
                    }
                }
                let allocation = Live {
                    ptr,
                    size,
                    pattern: rng.gen(),
                };
                fill(&allocation);
                live.push(allocation);
            }
            // release a random allocation
            55..=84 => {
                if live.is_empty() {
                    continue;
                }
                let index = rng.gen_range(0..live.len());
                let allocation = live.swap_remove(index);
                verify(&allocation, allocation.size);
                unsafe { allocator.free(allocation.ptr) };
            }
            // resize a random allocation
            _ => {
                if live.is_empty() {
                    continue;
                }
                let index = rng.gen_range(0..live.len());
                let new_size = rng.gen_range(1..=MAX_REQUEST);
                let old = &live[index];
                let new_ptr = unsafe { allocator.realloc(old.ptr, new_size) };
                if new_ptr.is_null() {
                    continue; // the old allocation must still be intact
                }
                assert_eq!(new_ptr as usize % 16, 0);
                let mut allocation = live.swap_remove(index);
                allocation.ptr = new_ptr;
                let surviving = allocation.size.min(new_size);
                verify(&allocation, surviving);
                allocation.size = new_size;
                fill(&allocation);
                assert_disjoint(&live, new_ptr, new_size);
                live.push(allocation);
            }
        }

        if step % 64 == 0 {
            assert_eq!(allocator.check_heap(line!()), 0, "step {step}");
        }
    }

    // drain everything and end with a fully audited heap
    for allocation in live.drain(..) {
        verify(&allocation, allocation.size);
        unsafe { allocator.free(allocation.ptr) };
    }
    assert_eq!(allocator.check_heap(line!()), 0);
}

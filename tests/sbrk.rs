//! Smoke test against the real process break.
//!
//! Everything lives in a single test function: the break is a per-process
//! resource, so two tests driving it from different harness threads would
//! interleave their extensions.
#![cfg(unix)]

use brkalloc::{Allocator, Sbrk};

#[test]
#[ignore = "moves the process break, which the platform allocator may also use; run in isolation"]
fn malloc_free_realloc_on_the_process_break() {
    let allocator = Allocator::new(Sbrk::new());

    let a = allocator.malloc(100);
    let b = allocator.malloc(1);
    assert!(!a.is_null());
    assert!(!b.is_null());
    assert_eq!(a as usize % 16, 0);
    assert_eq!(b as usize % 16, 0);
    assert_ne!(a, b);

    for i in 0..100 {
        unsafe { a.add(i).write(i as u8) };
    }
    unsafe { allocator.free(b) };

    let grown = unsafe { allocator.realloc(a, 4096) };
    assert!(!grown.is_null());
    for i in 0..100 {
        assert_eq!(unsafe { grown.add(i).read() }, i as u8);
    }

    let zeroed = allocator.calloc(128, 8);
    assert!(!zeroed.is_null());
    for i in 0..1024 {
        assert_eq!(unsafe { zeroed.add(i).read() }, 0);
    }

    unsafe {
        allocator.free(grown);
        allocator.free(zeroed);
    }
    assert_eq!(allocator.check_heap(line!()), 0);
}

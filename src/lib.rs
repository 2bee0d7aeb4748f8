//! Boundary-tag memory allocator with an explicit free list.
//!
//! This crate provides the classical four-operation allocation interface
//! ([`malloc`](Allocator::malloc), [`free`](Allocator::free),
//! [`realloc`](Allocator::realloc) and [`calloc`](Allocator::calloc)) on
//! top of a single contiguous, monotonically growable region of raw memory.
//! Every returned pointer is aligned to 16 bytes and the allocator works
//! for any heap the address space can hold. The [`Allocator`] type also
//! implements [`core::alloc::GlobalAlloc`], so it can be installed with
//! `#[global_allocator]` to back the `alloc` collections on `#![no_std]`
//! targets.
//!
//! # Usage
//! Pick a heap source and hand it to the allocator. For a self-contained
//! heap inside the binary use an [`Arena`] (here 4K, adjust to your needs):
//! ```no_run
//! #[global_allocator]
//! static ALLOCATOR: brkalloc::Allocator<brkalloc::Arena<4096>> =
//!     brkalloc::Allocator::new(brkalloc::Arena::new());
//!
//! extern crate alloc;
//! ```
//! On Unix the [`Sbrk`] source manages the real process break instead. The
//! C-style entry points can also be called directly:
//! ```no_run
//! let allocator = brkalloc::Allocator::new(brkalloc::Arena::<4096>::new());
//!
//! let ptr = allocator.malloc(24);
//! assert!(!ptr.is_null());
//! assert_eq!(ptr as usize % 16, 0);
//! // SAFETY: `ptr` came from this allocator and is released only once.
//! unsafe { allocator.free(ptr) };
//! ```
//!
//! # Implementation
//! The heap is a sequence of blocks, each bracketed by an 8-byte header and
//! an identical 8-byte footer holding the block size and an allocated flag:
//!
//! ```text
//! +--------+----------------------------------+--------+
//! | size|a |             payload              | size|a |
//! +--------+----------------------------------+--------+
//!          ^ the pointer handed to the caller
//! ```
//!
//! Block sizes are multiples of 16 and at least 32, so a free block always
//! has room for two list pointers in its payload. Those pointers thread all
//! free blocks into an unordered doubly linked list with push-front
//! insertion.
//!
//! 1.  `malloc` rounds the request up to the block granularity, adds the
//!     tag overhead and scans the free list front to back. The first block
//!     that fits is used: if the remainder after carving the request out
//!     would itself be a valid block, the block is split and the remainder
//!     re-enters the list; otherwise the whole block is handed out and the
//!     few surplus bytes ride along as internal fragmentation.
//! 2.  On a miss the heap is extended by exactly the adjusted size and the
//!     new block is carved from the fresh bytes, leaving the free list
//!     untouched.
//! 3.  `free` flips the allocated flag, pushes the block onto the list and
//!     merges it with free physical neighbours on both sides. The footer of
//!     the preceding block sits directly before the freed block's header,
//!     so the left neighbour is found in constant time. Coalescing keeps
//!     the invariant that no two adjacent blocks are ever both free.
//! 4.  `realloc` allocates, copies the surviving payload prefix and frees;
//!     `calloc` allocates and zeroes.
//!
//! The heavy lifting happens in [`RawAllocator`], a single-threaded core
//! that can be used on its own where locking is undesirable. [`Allocator`]
//! wraps it in a spin lock, which makes the facade shareable but does not
//! make the algorithm concurrent: callers are serialized.
//!
//! A read-only auditor, [`check_heap()`](Allocator::check_heap), walks the
//! whole heap and the free list and reports every invariant violation via
//! the [`log`] crate. It is cheap enough to sprinkle through stress tests
//! after every few operations.
#![no_std]

mod raw_allocator;
mod source;

pub use raw_allocator::block::ALIGNMENT;
pub use raw_allocator::{OutOfHeap, RawAllocator};
#[cfg(unix)]
pub use source::Sbrk;
pub use source::{Arena, HeapSource};

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};

/// A lock-protected allocator over a growable heap.
///
/// This is the shareable front of the crate: a [`RawAllocator`] behind a
/// spin lock. Every public operation takes the lock, runs the
/// single-threaded core to completion and releases it, so a `static`
/// allocator can serve as the `#[global_allocator]`.
///
/// See the [crate-level](crate) documentation for usage and the block
/// layout.
pub struct Allocator<S> {
    inner: spin::Mutex<RawAllocator<S>>,
}

impl<S: HeapSource> Allocator<S> {
    /// Create a new [`Allocator`] on top of the given heap source.
    ///
    /// This is a `const fn`, so the allocator can be assigned to a
    /// `static` directly.
    #[must_use = "assign the allocator to a static variable and apply the `#[global_allocator]`-attribute to make it the global allocator"]
    pub const fn new(source: S) -> Self {
        Self {
            inner: spin::Mutex::new(RawAllocator::new(source)),
        }
    }

    /// Establish the heap sentinels and clear the free list.
    ///
    /// Allocation self-initializes on first use, so calling this is only
    /// necessary to re-arm the allocator (after resetting the provider).
    pub fn init(&self) -> Result<(), OutOfHeap> {
        self.inner.lock().init()
    }

    /// Allocate `size` bytes and return a 16-byte-aligned pointer.
    ///
    /// Returns null when `size` is zero or the heap is exhausted.
    pub fn malloc(&self, size: usize) -> *mut u8 {
        self.inner
            .lock()
            .malloc(size)
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    /// Release an allocation. Null is ignored.
    ///
    /// # Safety
    /// `ptr` must be null or a pointer obtained from this allocator that
    /// has not been released since.
    pub unsafe fn free(&self, ptr: *mut u8) {
        self.inner.lock().free(ptr);
    }

    /// Resize an allocation, moving it if necessary.
    ///
    /// A null `ptr` allocates, a zero `size` frees and returns null. On
    /// failure null is returned and the old allocation stays valid.
    ///
    /// # Safety
    /// As for [`free()`](Self::free).
    pub unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        self.inner
            .lock()
            .realloc(ptr, size)
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    /// Allocate `count * size` zeroed bytes.
    ///
    /// Returns null when the product overflows, is zero or the heap is
    /// exhausted.
    pub fn calloc(&self, count: usize, size: usize) -> *mut u8 {
        self.inner
            .lock()
            .calloc(count, size)
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    /// Audit the heap and report every invariant violation via [`log`].
    ///
    /// `line` is echoed into each report; pass [`line!()`]. Returns the
    /// number of violations, `0` for a healthy heap.
    pub fn check_heap(&self, line: u32) -> usize {
        self.inner.lock().check_heap(line)
    }
}

// SAFETY: all heap access is serialized by the spin lock; the uniform
// 16-byte alignment satisfies every layout up to that bound and larger
// alignments are refused with a null return.
unsafe impl<S: HeapSource> GlobalAlloc for Allocator<S> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        self.malloc(layout.size().max(1))
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.free(ptr);
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        self.calloc(layout.size().max(1), 1)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        self.realloc(ptr, new_size.max(1))
    }
}

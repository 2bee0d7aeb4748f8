//! Heap providers: the memory underneath the allocator.
//!
//! The allocator core is written against the [`HeapSource`] trait, which is
//! the classical three-primitive break interface: query the low end of the
//! heap, query the current break and move the break upwards. Two providers
//! are shipped:
//!
//! - [`Sbrk`] moves the real process break via `libc` (Unix only).
//! - [`Arena`] emulates the break inside a fixed, statically sized buffer,
//!   which makes the allocator usable without an operating system and makes
//!   tests deterministic.

use core::mem::MaybeUninit;
use core::ptr;

use crate::raw_allocator::block::ALIGNMENT;

/// A monotonically growable, contiguous region of raw memory.
///
/// The region starts at [`heap_lo()`](Self::heap_lo) and currently ends at
/// [`heap_hi()`](Self::heap_hi) (exclusive). [`sbrk()`](Self::sbrk) extends
/// the region and returns the old end, so the caller knows where the fresh
/// bytes begin. The region never shrinks.
///
/// # Safety
/// Implementors must guarantee all of the following, since the allocator
/// writes block metadata through raw pointers derived from these methods:
///
/// - `heap_lo()` is aligned to [`ALIGNMENT`](crate::ALIGNMENT) bytes and
///   never changes once the first byte has been handed out.
/// - `[heap_lo(), heap_hi())` is one contiguous range that is readable,
///   writable and exclusively owned by the caller.
/// - a successful `sbrk(delta)` grows the range by exactly `delta` bytes and
///   returns the previous `heap_hi()`; on failure the range is unchanged.
pub unsafe trait HeapSource {
    /// The fixed low address of the heap.
    fn heap_lo(&mut self) -> *mut u8;

    /// The current break, i.e. one past the last usable byte.
    fn heap_hi(&mut self) -> *mut u8;

    /// Extend the heap by `delta` bytes, returning the old break.
    ///
    /// Returns `None` when the provider refuses to grow.
    fn sbrk(&mut self, delta: usize) -> Option<*mut u8>;
}

/// The process break, moved with `sbrk(2)`.
///
/// On first use the break is padded up to the next 16-byte boundary so the
/// prologue arithmetic of the allocator holds. Since the break is a
/// per-process resource there should be at most one `Sbrk`-backed allocator
/// in a process; a second instance would interleave extensions with the
/// first and corrupt both heaps.
#[cfg(unix)]
pub struct Sbrk {
    /// Aligned base of the managed region; null until the first use.
    lo: *mut u8,
}

#[cfg(unix)]
impl Sbrk {
    /// Create a new, unused process-break source.
    #[must_use]
    pub const fn new() -> Self {
        Self { lo: ptr::null_mut() }
    }

    /// `sbrk` reports failure by returning `(void*)-1`.
    fn failed(brk: *mut libc::c_void) -> bool {
        brk == usize::MAX as *mut libc::c_void
    }
}

#[cfg(unix)]
impl Default for Sbrk {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: the raw base pointer is only written on first use and only read
// while the owning allocator has exclusive access (`&mut self`).
#[cfg(unix)]
unsafe impl Send for Sbrk {}

// SAFETY: `libc::sbrk` hands out a contiguous, exclusively owned data
// segment extension; the base is fixed after the one-time alignment step.
#[cfg(unix)]
unsafe impl HeapSource for Sbrk {
    fn heap_lo(&mut self) -> *mut u8 {
        if self.lo.is_null() {
            // Pad the initial break up to the block alignment; `sbrk(0)` is
            // a pure query and cannot fail.
            let brk = unsafe { libc::sbrk(0) } as usize;
            let pad = brk.wrapping_neg() % ALIGNMENT;
            if pad != 0 {
                unsafe { libc::sbrk(pad as libc::intptr_t) };
            }
            self.lo = unsafe { libc::sbrk(0) }.cast();
        }
        self.lo
    }

    fn heap_hi(&mut self) -> *mut u8 {
        let _ = self.heap_lo();
        unsafe { libc::sbrk(0) }.cast()
    }

    fn sbrk(&mut self, delta: usize) -> Option<*mut u8> {
        let _ = self.heap_lo();
        if delta > isize::MAX as usize {
            return None;
        }
        let old = unsafe { libc::sbrk(delta as libc::intptr_t) };
        if Self::failed(old) {
            None
        } else {
            Some(old.cast())
        }
    }
}

/// A fixed-size model heap with a software break.
///
/// This is the in-memory counterpart of the process break: a 16-aligned
/// buffer of `N` bytes of which the first `brk` are "mapped". It backs the
/// allocator on targets without an operating system and is what the test
/// suite runs against, since exhaustion and growth become deterministic.
#[repr(align(16))]
pub struct Arena<const N: usize> {
    memory: [MaybeUninit<u8>; N],
    brk: usize,
}

impl<const N: usize> Arena<N> {
    /// Create a new arena with the break at zero.
    ///
    /// # Panics
    /// Panics if `N` is not a multiple of 16 or is smaller than 80 bytes
    /// (the prologue plus one minimum-sized block, rounded up).
    #[must_use]
    pub const fn new() -> Self {
        assert!(N >= 80, "too small heap memory: minimum size is 80");
        assert!(N % ALIGNMENT == 0, "memory size has to be divisible by 16");
        Self {
            memory: [MaybeUninit::uninit(); N],
            brk: 0,
        }
    }

    /// Number of bytes the break can still advance by.
    pub fn remaining(&self) -> usize {
        N - self.brk
    }

    /// Move the break back to zero, re-arming the arena for a fresh run.
    ///
    /// Any allocator state built on top of the old break contents is
    /// invalidated; pair this with a fresh `init` of the allocator.
    pub fn reset(&mut self) {
        self.brk = 0;
    }
}

impl<const N: usize> Default for Arena<N> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: the buffer is owned inline and `#[repr(align(16))]` fixes the
// base alignment; the break only moves forward within the buffer, so
// `[heap_lo, heap_hi)` is contiguous and exclusively owned.
unsafe impl<const N: usize> HeapSource for Arena<N> {
    fn heap_lo(&mut self) -> *mut u8 {
        self.memory.as_mut_ptr().cast()
    }

    fn heap_hi(&mut self) -> *mut u8 {
        let brk = self.brk;
        self.heap_lo().wrapping_add(brk)
    }

    fn sbrk(&mut self, delta: usize) -> Option<*mut u8> {
        if delta > N - self.brk {
            return None;
        }
        let old = self.heap_hi();
        self.brk += delta;
        Some(old)
    }
}

#[cfg(test)]
mod tests {
    use super::{Arena, HeapSource};

    #[test]
    fn fresh_arena_has_empty_range() {
        let mut arena = Arena::<160>::new();
        assert_eq!(arena.heap_lo(), arena.heap_hi());
        assert_eq!(arena.remaining(), 160);
    }

    #[test]
    fn base_is_aligned() {
        let mut arena = Arena::<160>::new();
        assert_eq!(arena.heap_lo() as usize % 16, 0);
    }

    #[test]
    fn sbrk_returns_old_break_and_advances() {
        let mut arena = Arena::<160>::new();
        let lo = arena.heap_lo();

        let old = arena.sbrk(48).unwrap();
        assert_eq!(old, lo);
        assert_eq!(arena.heap_hi(), lo.wrapping_add(48));

        let old = arena.sbrk(16).unwrap();
        assert_eq!(old, lo.wrapping_add(48));
        assert_eq!(arena.remaining(), 160 - 64);
    }

    #[test]
    fn sbrk_refuses_past_capacity() {
        let mut arena = Arena::<160>::new();
        assert!(arena.sbrk(96).is_some());
        assert!(arena.sbrk(80).is_none());
        // a failed extension leaves the break untouched
        assert_eq!(arena.remaining(), 64);
        assert!(arena.sbrk(64).is_some());
    }

    #[test]
    fn reset_rewinds_the_break() {
        let mut arena = Arena::<160>::new();
        arena.sbrk(160).unwrap();
        assert_eq!(arena.remaining(), 0);
        arena.reset();
        assert_eq!(arena.remaining(), 160);
        assert_eq!(arena.heap_lo(), arena.heap_hi());
    }
}

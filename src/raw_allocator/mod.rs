//! The single-threaded allocator core.
//!
//! [`RawAllocator`] owns a [`HeapSource`] and manages every byte between the
//! source's low address and its break. The heap is bracketed by two
//! sentinels established by [`init()`](RawAllocator::init):
//!
//! ```text
//! heap_lo                                                      heap_hi
//! v                                                                  v
//! +-------+----------------+-------+-------+-- ... --+-------+-------+
//! | 8 pad | 16 pad         | block | block |         | block | 16 rs |
//! +-------+----------------+-------+-------+-- ... --+-------+-------+
//!         ^ heap_first                                       ^
//!                          ^ first real block header         heap_last
//! ```
//!
//! The 24 bytes of prologue padding place every block header at an address
//! congruent to 8 (mod 16), so every payload is 16-byte aligned.
//! `heap_last` tracks the address one past the last real block (always 16
//! bytes short of the break); block traversal terminates there and freshly
//! created blocks are written there.
//!
//! Allocation is first-fit over the explicit free list, splitting when the
//! remainder can stand alone as a minimum-sized block and extending the
//! heap when the list has no fit. Freeing pushes the block onto the list
//! and immediately merges it with free physical neighbours, so no two
//! adjacent free blocks ever persist.

pub(crate) mod block;
mod check;
mod free_list;

use core::fmt;
use core::ptr::{self, NonNull};

use log::trace;

use crate::source::HeapSource;
use block::{round_up, BlockPtr, Header, DOUBLE_WORD, MIN_BLOCK_SIZE, WORD};
use free_list::FreeList;

/// The heap provider refused to extend the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfHeap;

impl fmt::Display for OutOfHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("heap provider refused to extend the heap")
    }
}

/// The two sentinels bracketing the real blocks.
#[derive(Clone, Copy)]
struct Bounds {
    /// `heap_lo + 8`: start of the prologue region. The first real block
    /// header sits 16 bytes after this.
    heap_first: NonNull<u8>,
    /// One past the last real block, 16 bytes short of the break. Never
    /// dereferenced as a block; traversal stops here and heap extension
    /// writes the new block here.
    heap_last: NonNull<u8>,
}

/// A boundary-tag allocator with an explicit free list over a growable heap.
///
/// This is the lock-free core: all operations take `&mut self` and run to
/// completion on the calling thread. [`Allocator`](crate::Allocator) wraps
/// it in a lock for shared use.
///
/// Once the first block has been handed out, the allocator must not be
/// moved: with an in-place source such as [`Arena`](crate::Arena) the heap
/// bytes (and the pointers threaded through them) live inside `self`.
pub struct RawAllocator<S> {
    source: S,
    bounds: Option<Bounds>,
    free_list: FreeList,
}

// SAFETY: the core holds raw pointers only into its own heap region, which
// is exclusively owned; sending the allocator moves that ownership along.
unsafe impl<S: Send> Send for RawAllocator<S> {}

impl<S> RawAllocator<S> {
    /// Create an allocator on top of the given heap source.
    ///
    /// No heap access happens here; the prologue is established lazily by
    /// the first allocation (or an explicit [`init()`](Self::init)).
    #[must_use]
    pub const fn new(source: S) -> Self {
        Self {
            source,
            bounds: None,
            free_list: FreeList::new(),
        }
    }
}

impl<S: HeapSource> RawAllocator<S> {
    /// Establish the heap sentinels and clear the free list.
    ///
    /// Extends the heap by the 40 prologue bytes (24 bytes of padding plus
    /// the 16-byte reserve that `heap_last` stays short of the break by)
    /// and derives both sentinels from the provider's current addresses.
    /// Calling this on a live heap re-arms the allocator for a fresh run;
    /// the provider is expected to have been reset by the caller in that
    /// case.
    pub fn init(&mut self) -> Result<(), OutOfHeap> {
        self.free_list.clear();
        self.source.sbrk(2 * DOUBLE_WORD + WORD).ok_or(OutOfHeap)?;
        let lo = self.source.heap_lo();
        let hi = self.source.heap_hi();
        debug_assert_eq!(lo as usize % DOUBLE_WORD, 0);
        // SAFETY: the extension succeeded, so the heap spans at least 40
        // bytes and both offsets stay inside it.
        self.bounds = Some(unsafe {
            Bounds {
                heap_first: NonNull::new_unchecked(lo.add(WORD)),
                heap_last: NonNull::new_unchecked(hi.sub(DOUBLE_WORD)),
            }
        });
        Ok(())
    }

    /// Allocate `size` bytes, returning a 16-byte-aligned payload pointer.
    ///
    /// Returns `None` for a zero-sized request, on arithmetic overflow of
    /// the adjusted size and when the heap cannot be extended.
    pub fn malloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        if self.bounds.is_none() {
            self.init().ok()?;
        }
        let adjusted = adjust_request(size)?;
        let block = match self.find_fit(adjusted) {
            Some(block) => block,
            None => self.create_space(adjusted)?,
        };
        Some(block.payload())
    }

    /// Release a block previously returned by this allocator.
    ///
    /// A null `ptr` is a no-op. The block is marked free, pushed onto the
    /// free list and merged with adjacent free blocks.
    ///
    /// # Safety
    /// `ptr` must be null or a pointer obtained from
    /// [`malloc()`](Self::malloc)/[`realloc()`](Self::realloc)/
    /// [`calloc()`](Self::calloc) of this allocator that has not been
    /// released since.
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        let payload = match NonNull::new(ptr) {
            Some(payload) => payload,
            None => return,
        };
        let block = BlockPtr::from_payload(payload);
        let size = block.size();
        block.set_header(Header::free(size));
        block.set_footer();
        self.free_list.push_front(block);
        self.coalesce(block);
    }

    /// Resize an allocation, moving it if necessary.
    ///
    /// A zero `size` frees `ptr` and returns `None`; a null `ptr` behaves
    /// like [`malloc()`](Self::malloc). Otherwise a new block is allocated,
    /// the smaller of the old and new payload sizes is copied over and the
    /// old block is released. On allocation failure `None` is returned and
    /// the old block stays untouched.
    ///
    /// # Safety
    /// As for [`free()`](Self::free).
    pub unsafe fn realloc(&mut self, ptr: *mut u8, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            self.free(ptr);
            return None;
        }
        let old_payload = match NonNull::new(ptr) {
            Some(payload) => payload,
            None => return self.malloc(size),
        };
        let new_payload = self.malloc(size)?;
        let old_block = BlockPtr::from_payload(old_payload);
        let to_copy = (old_block.size() - DOUBLE_WORD).min(size);
        ptr::copy_nonoverlapping(old_payload.as_ptr(), new_payload.as_ptr(), to_copy);
        self.free(old_payload.as_ptr());
        Some(new_payload)
    }

    /// Allocate `count * size` bytes with every payload byte zeroed.
    ///
    /// The product is overflow-checked; overflow reports exhaustion.
    pub fn calloc(&mut self, count: usize, size: usize) -> Option<NonNull<u8>> {
        let bytes = count.checked_mul(size)?;
        let payload = self.malloc(bytes)?;
        // SAFETY: the block owns `bytes` payload bytes starting at the
        // returned pointer.
        unsafe { payload.as_ptr().write_bytes(0, bytes) };
        Some(payload)
    }

    /// First-fit scan of the free list.
    ///
    /// Splits the hit when the remainder can stand alone as a block,
    /// otherwise consumes it whole. Returns the allocated block, or `None`
    /// when no listed block fits.
    fn find_fit(&mut self, adjusted: usize) -> Option<BlockPtr> {
        let mut current = self.free_list.head();
        while let Some(block) = current {
            // SAFETY: listed blocks are free blocks in live heap memory.
            unsafe {
                let size = block.size();
                if size >= MIN_BLOCK_SIZE + adjusted {
                    return Some(self.split(block, adjusted));
                } else if size >= adjusted {
                    self.free_list.remove(block);
                    block.set_header(Header::allocated(size));
                    block.set_footer();
                    return Some(block);
                }
                current = FreeList::next_of(block);
            }
        }
        None
    }

    /// Carve an `adjusted`-byte allocated block out of the front of `block`
    /// and return the trailing remainder to the free list.
    ///
    /// # Safety
    /// `block` must be a listed free block at least `MIN_BLOCK_SIZE +
    /// adjusted` bytes large.
    unsafe fn split(&mut self, block: BlockPtr, adjusted: usize) -> BlockPtr {
        self.free_list.remove(block);
        let old_size = block.size();
        block.set_header(Header::allocated(adjusted));
        block.set_footer();
        let remainder = block.next_physical();
        remainder.set_header(Header::free(old_size - adjusted));
        remainder.set_footer();
        self.free_list.push_front(remainder);
        block
    }

    /// Manufacture a block of exactly `size` bytes by extending the heap.
    ///
    /// The new block starts at the old `heap_last`, is marked allocated and
    /// never enters the free list. On provider failure the heap is
    /// unchanged and `None` is returned.
    fn create_space(&mut self, size: usize) -> Option<BlockPtr> {
        let bounds = self.bounds?;
        self.source.sbrk(size)?;
        trace!("extended the heap by {size} bytes");
        let block = BlockPtr::at(bounds.heap_last);
        // SAFETY: the extension succeeded, so the block owns `size` bytes
        // and the advanced sentinel stays inside the heap.
        unsafe {
            block.set_header(Header::allocated(size));
            block.set_footer();
            self.bounds = Some(Bounds {
                heap_last: NonNull::new_unchecked(bounds.heap_last.as_ptr().add(size)),
                ..bounds
            });
        }
        Some(block)
    }

    /// Merge `block` with a free physical predecessor, if any.
    ///
    /// Returns the surviving block: the merged predecessor, or `block`
    /// itself when no merge happened.
    ///
    /// # Safety
    /// `block` must be a listed free block.
    unsafe fn coalesce_left(&mut self, block: BlockPtr) -> BlockPtr {
        let bounds = match self.bounds {
            Some(bounds) => bounds,
            None => return block,
        };
        // The word before the first real block is prologue padding, not a
        // boundary tag.
        let left_footer = block.addr().wrapping_sub(WORD);
        if left_footer == bounds.heap_first.as_ptr().wrapping_add(WORD) {
            return block;
        }
        let tag = block.preceding_footer();
        if tag.is_allocated() {
            return block;
        }
        let left = block.prev_physical();
        debug_assert_eq!(left.header(), tag);
        self.free_list.remove(block);
        self.free_list.remove(left);
        left.set_header(Header::free(left.size() + block.size()));
        left.set_footer();
        self.free_list.push_front(left);
        left
    }

    /// Merge `block` with its free physical neighbours on both sides.
    ///
    /// # Safety
    /// `block` must be a listed free block.
    unsafe fn coalesce(&mut self, block: BlockPtr) {
        let block = self.coalesce_left(block);
        let bounds = match self.bounds {
            Some(bounds) => bounds,
            None => return,
        };
        let right = block.next_physical();
        if right.addr() != bounds.heap_last.as_ptr() && !right.is_allocated() {
            // Folding the successor leftwards lands on the block just
            // merged, extending it once more.
            self.coalesce_left(right);
        }
    }

    /// Iterate over every real block in address order (the implicit walk).
    pub(crate) fn blocks(&self) -> Blocks {
        match self.bounds {
            Some(bounds) => Blocks {
                current: bounds.heap_first.as_ptr().wrapping_add(DOUBLE_WORD),
                end: bounds.heap_last.as_ptr(),
            },
            None => Blocks {
                current: ptr::null_mut(),
                end: ptr::null_mut(),
            },
        }
    }
}

/// Header/footer overhead plus the payload rounded up to the block
/// granularity. This is the size actually carved out of the heap; it is
/// never below [`MIN_BLOCK_SIZE`].
fn adjust_request(size: usize) -> Option<usize> {
    // rounding would wrap for sizes in the top 15 bytes of the address
    // space; no heap can satisfy those anyway
    size.checked_add(DOUBLE_WORD - 1)?;
    round_up(size, DOUBLE_WORD).checked_add(DOUBLE_WORD)
}

/// Iterator of the implicit block sequence, from the first real block up to
/// the epilogue sentinel.
pub(crate) struct Blocks {
    current: *mut u8,
    end: *mut u8,
}

impl Iterator for Blocks {
    type Item = BlockPtr;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current.is_null() || self.current >= self.end {
            return None;
        }
        // SAFETY: traversal trusts the in-heap size fields, which is the
        // invariant the walk exists to exercise; a corrupted (zero) size
        // ends the walk at the damaged block instead of running away.
        let block = BlockPtr::at(unsafe { NonNull::new_unchecked(self.current) });
        let size = unsafe { block.size() };
        self.current = if size == 0 {
            self.end
        } else {
            self.current.wrapping_add(size)
        };
        Some(block)
    }
}

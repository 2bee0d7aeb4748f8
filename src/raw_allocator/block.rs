//! The in-heap block representation.
//!
//! Every block, allocated or free, is laid out as
//!
//! ```text
//! +--------+--------------------------+--------+
//! | header |         payload          | footer |
//! +--------+--------------------------+--------+
//! ^ 8 bytes                             8 bytes
//! ```
//!
//! where header and footer hold the same [`Header`] word: the block size
//! (including both tag words) with the allocated flag in bit 0. The size is
//! always a multiple of 16, so bits 1..=3 are zero. The footer doubles as a
//! boundary tag: the word directly before a block's header is the footer of
//! its physical predecessor, which is what makes constant-time left
//! coalescing possible.
//!
//! All pointer arithmetic of the allocator is funneled through [`BlockPtr`],
//! a copyable cursor owning the raw header address. Everything above this
//! module speaks in terms of blocks, not addresses.

use core::ptr::NonNull;

use static_assertions::const_assert_eq;

/// One tag word. Headers and footers are single words.
pub(crate) const WORD: usize = 8;
/// A header/footer pair, and likewise the payload rounding granularity.
pub(crate) const DOUBLE_WORD: usize = 2 * WORD;
/// Every payload pointer handed out is aligned to this many bytes.
pub const ALIGNMENT: usize = DOUBLE_WORD;
/// Smallest representable block: header + footer + room for the free links.
pub(crate) const MIN_BLOCK_SIZE: usize = 2 * DOUBLE_WORD;

// The tag codec stores a word per tag and the free links are two words, so
// this crate only works on targets with 8-byte pointers.
const_assert_eq!(WORD, core::mem::size_of::<usize>());

/// Least multiple of `m` that is greater than or equal to `n`.
pub(crate) fn round_up(n: usize, m: usize) -> usize {
    (n + m - 1) / m * m
}

/// A decoded header (or footer) word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header(usize);

impl Header {
    const ALLOCATED_BIT: usize = 0b1;
    const SIZE_MASK: usize = !0xF;

    /// Tag word for an allocated block of `size` bytes.
    pub fn allocated(size: usize) -> Self {
        debug_assert_eq!(size & !Self::SIZE_MASK, 0);
        Self(size | Self::ALLOCATED_BIT)
    }

    /// Tag word for a free block of `size` bytes.
    pub fn free(size: usize) -> Self {
        debug_assert_eq!(size & !Self::SIZE_MASK, 0);
        Self(size)
    }

    /// Reinterpret a raw word read from the heap.
    pub const fn from_word(word: usize) -> Self {
        Self(word)
    }

    /// The raw word as written to the heap.
    pub const fn into_word(self) -> usize {
        self.0
    }

    /// Block size in bytes, including header and footer.
    pub const fn size(self) -> usize {
        self.0 & Self::SIZE_MASK
    }

    pub const fn is_allocated(self) -> bool {
        self.0 & Self::ALLOCATED_BIT != 0
    }
}

/// Cursor to a block, addressed by its header word.
///
/// A `BlockPtr` is just an address with block-shaped accessors; it makes no
/// promise that the address holds a valid block. Every accessor that reads
/// or writes through the address is `unsafe` and requires the block to lie
/// in live heap memory with an intact header.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockPtr(NonNull<u8>);

impl BlockPtr {
    /// Cursor at the given header address.
    pub const fn at(header: NonNull<u8>) -> Self {
        Self(header)
    }

    /// Recover the block cursor from a payload pointer handed out earlier.
    ///
    /// # Safety
    /// `payload` must have been produced by [`payload()`](Self::payload) of
    /// a block in live heap memory.
    pub unsafe fn from_payload(payload: NonNull<u8>) -> Self {
        Self(NonNull::new_unchecked(payload.as_ptr().sub(WORD)))
    }

    /// The raw header address.
    pub fn addr(self) -> *mut u8 {
        self.0.as_ptr()
    }

    /// The user-visible payload pointer, one word past the header.
    pub fn payload(self) -> NonNull<u8> {
        // SAFETY: offsetting a non-null heap address by one word cannot
        // wrap to null.
        unsafe { NonNull::new_unchecked(self.0.as_ptr().wrapping_add(WORD)) }
    }

    /// Read the header word.
    ///
    /// # Safety
    /// The block must lie in live heap memory.
    pub unsafe fn header(self) -> Header {
        Header::from_word(self.addr().cast::<usize>().read())
    }

    /// Write the header word. [`set_footer()`](Self::set_footer) must be
    /// called afterwards to keep both tags identical.
    ///
    /// # Safety
    /// The block must lie in live heap memory with room for `header.size()`
    /// bytes.
    pub unsafe fn set_header(self, header: Header) {
        self.addr().cast::<usize>().write(header.into_word());
    }

    /// Copy the current header word into the footer slot.
    ///
    /// # Safety
    /// The header must have been written already and the block must own the
    /// `size()` bytes the footer offset is computed from.
    pub unsafe fn set_footer(self) {
        let header = self.header();
        self.footer_slot(header.size()).write(header.into_word());
    }

    /// Read the footer word.
    ///
    /// # Safety
    /// As for [`set_footer()`](Self::set_footer).
    pub unsafe fn footer(self) -> Header {
        Header::from_word(self.footer_slot(self.size()).read())
    }

    fn footer_slot(self, size: usize) -> *mut usize {
        self.addr().wrapping_add(size - WORD).cast()
    }

    /// Block size decoded from the header.
    ///
    /// # Safety
    /// The block must lie in live heap memory.
    pub unsafe fn size(self) -> usize {
        self.header().size()
    }

    /// Allocated flag decoded from the header.
    ///
    /// # Safety
    /// The block must lie in live heap memory.
    pub unsafe fn is_allocated(self) -> bool {
        self.header().is_allocated()
    }

    /// The block starting directly after this one.
    ///
    /// # Safety
    /// The block must lie in live heap memory; the result is only a valid
    /// block if this one is not the last before the epilogue.
    pub unsafe fn next_physical(self) -> BlockPtr {
        Self(NonNull::new_unchecked(self.addr().add(self.size())))
    }

    /// The boundary tag of the physical predecessor: the word directly
    /// before this block's header.
    ///
    /// # Safety
    /// There must be a block (not the prologue padding) directly before
    /// this one.
    pub unsafe fn preceding_footer(self) -> Header {
        Header::from_word(self.addr().sub(WORD).cast::<usize>().read())
    }

    /// The block directly before this one, located via the boundary tag.
    ///
    /// # Safety
    /// As for [`preceding_footer()`](Self::preceding_footer).
    pub unsafe fn prev_physical(self) -> BlockPtr {
        let size = self.preceding_footer().size();
        Self(NonNull::new_unchecked(self.addr().sub(size)))
    }
}

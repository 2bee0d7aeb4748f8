//! The heap checker: a read-only auditor of every allocator invariant.
//!
//! Each violation is reported as one `log::error!` record ending with the
//! caller-supplied line number, so a failing workload can be pinned to the
//! call site that exposed it. The checker never mutates the heap and never
//! aborts; it simply counts what it finds.

use log::error;

use super::block::{BlockPtr, DOUBLE_WORD, MIN_BLOCK_SIZE, WORD};
use super::free_list::FreeList;
use super::RawAllocator;
use crate::source::HeapSource;

impl<S: HeapSource> RawAllocator<S> {
    /// Audit the heap, reporting every invariant violation.
    ///
    /// Walks the implicit block sequence and the explicit free list and
    /// cross-checks them. `line` is echoed into every report; pass
    /// [`line!()`]. Returns the number of violations found, `0` for a
    /// healthy heap.
    ///
    /// The block structure is not mutated; the receiver is `&mut` only
    /// because querying the heap source requires it.
    pub fn check_heap(&mut self, line: u32) -> usize {
        let lo = self.source.heap_lo() as usize;
        let hi = self.source.heap_hi() as usize;
        let mut violations = 0;

        let bounds = match self.bounds {
            Some(bounds) => bounds,
            None => {
                error!("heap check: prologue is missing (line {line})");
                error!("heap check: epilogue is missing (line {line})");
                return 2;
            }
        };
        let heap_first = bounds.heap_first.as_ptr() as usize;
        let heap_last = bounds.heap_last.as_ptr() as usize;
        if heap_first != lo + WORD {
            error!("heap check: prologue moved to {heap_first:#x} (line {line})");
            violations += 1;
        }
        if heap_last != hi - DOUBLE_WORD {
            error!("heap check: epilogue moved to {heap_last:#x} (line {line})");
            violations += 1;
        }

        // implicit walk: every block in address order
        let mut free_balance: i64 = 0;
        let mut previous_free = false;
        for block in self.blocks() {
            let addr = block.addr() as usize;
            // SAFETY: the walk only visits addresses below the epilogue
            // sentinel, which are backed by heap memory.
            let header = unsafe { block.header() };
            let size = header.size();
            let well_sized = size % DOUBLE_WORD == 0 && size >= MIN_BLOCK_SIZE;

            if !header.is_allocated() {
                free_balance += 1;
                if previous_free {
                    error!("heap check: block {addr:#x} escaped coalescing (line {line})");
                    violations += 1;
                }
            }
            if size % DOUBLE_WORD != 0 {
                error!("heap check: block {addr:#x} has unaligned size {size} (line {line})");
                violations += 1;
            }
            if size < MIN_BLOCK_SIZE {
                error!("heap check: block {addr:#x} is below the minimum size (line {line})");
                violations += 1;
            }
            if addr < lo || addr >= hi {
                error!("heap check: block {addr:#x} lies outside the heap (line {line})");
                violations += 1;
            }
            if addr.wrapping_sub(heap_first) % DOUBLE_WORD != 0 {
                error!("heap check: block {addr:#x} is misaligned (line {line})");
                violations += 1;
            }
            // only look for the footer where a sane size says it is
            let in_heap = addr >= lo && addr.checked_add(size).map_or(false, |end| end <= heap_last);
            if well_sized && in_heap {
                let footer = unsafe { block.footer() };
                if footer != header {
                    error!("heap check: block {addr:#x} footer differs from header (line {line})");
                    violations += 1;
                }
            }
            previous_free = !header.is_allocated();
        }

        // explicit walk: every listed block, with back-link verification
        let mut previous: Option<BlockPtr> = None;
        let mut current = self.free_list.head();
        while let Some(node) = current {
            let addr = node.addr() as usize;
            if addr < lo || addr >= hi {
                error!("heap check: free-list node {addr:#x} lies outside the heap (line {line})");
                violations += 1;
                // the links of a foreign address cannot be trusted
                break;
            }
            // SAFETY: the node lies in heap memory; its links are the two
            // words after the header.
            unsafe {
                if FreeList::prev_of(node) != previous {
                    error!("heap check: free-list back link broken at {addr:#x} (line {line})");
                    violations += 1;
                }
                free_balance -= 1;
                previous = Some(node);
                current = FreeList::next_of(node);
            }
        }

        if free_balance > 0 {
            error!("heap check: free list stores too few blocks (line {line})");
            violations += 1;
        } else if free_balance < 0 {
            error!("heap check: free list stores too many blocks (line {line})");
            violations += 1;
        }
        violations
    }
}

//! Heap consistency checking.
//!
//! [`ExplicitAllocator::check_heap`] verifies the structural invariants the
//! allocator maintains between calls, in three passes:
//!
//! 1. an address-order walk from the prologue to the epilogue (alignment,
//!    matching tags, legal sizes, no adjacent free blocks, sentinel shape),
//! 2. a free-list walk from the head (in-bounds, well-formed, free, and
//!    link-symmetric entries),
//! 3. a cross-check that every free block in the heap appears on the list.
//!
//! The checker reports the first violation it finds and never mutates; it
//! is a diagnostic for tests and debugging sessions, not part of the hot
//! path. With `verbose` set it also prints every block it walks.

use core::fmt;
use core::ptr::null_mut;

use crate::block::{
  DSIZE, MIN_BLOCK, WSIZE, block_alloc, block_size, footer, get, header, next_block, next_free,
  prev_free, tag_alloc, tag_size,
};
use crate::explicit::ExplicitAllocator;
use crate::mem::PageSource;

/// A structural violation found while walking the heap or the free list.
///
/// The payload address identifies the offending block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeapViolation {
  /// The prologue is missing, resized, moved, or marked free.
  BadPrologue,
  /// The epilogue is not an allocated zero-size header at the top of the
  /// heap.
  BadEpilogue,
  /// A payload address is not double-word aligned.
  Misaligned { bp: usize },
  /// A block's header and footer words disagree.
  TagMismatch { bp: usize },
  /// A block is smaller than the minimum block size.
  BadSize { bp: usize },
  /// A free block sits directly next to another free block.
  UncoalescedNeighbors { bp: usize },
  /// An address-order step left the managed region.
  WalkOutOfBounds { at: usize },
  /// A free-list entry points outside the heap.
  WildLink { bp: usize },
  /// A free-list entry has its allocation bit set.
  AllocatedInFreeList { bp: usize },
  /// A list entry's stored predecessor differs from the walk predecessor.
  AsymmetricLinks { bp: usize },
  /// A free block in the heap is unreachable from the list head.
  UnlistedFreeBlock { bp: usize },
}

impl fmt::Display for HeapViolation {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match *self {
      Self::BadPrologue => write!(f, "bad prologue block"),
      Self::BadEpilogue => write!(f, "bad epilogue header"),
      Self::Misaligned { bp } => {
        write!(f, "block {bp:#x} is not double-word aligned")
      }
      Self::TagMismatch { bp } => {
        write!(f, "block {bp:#x}: header does not match footer")
      }
      Self::BadSize { bp } => write!(f, "block {bp:#x} has an illegal size"),
      Self::UncoalescedNeighbors { bp } => {
        write!(f, "block {bp:#x} escaped coalescing with the next block")
      }
      Self::WalkOutOfBounds { at } => {
        write!(f, "heap walk left the managed region at {at:#x}")
      }
      Self::WildLink { bp } => {
        write!(f, "free-list entry {bp:#x} lies outside the heap")
      }
      Self::AllocatedInFreeList { bp } => {
        write!(f, "allocated block {bp:#x} is on the free list")
      }
      Self::AsymmetricLinks { bp } => {
        write!(f, "free-list links around {bp:#x} are not symmetric")
      }
      Self::UnlistedFreeBlock { bp } => {
        write!(f, "free block {bp:#x} is missing from the free list")
      }
    }
  }
}

impl<S: PageSource> ExplicitAllocator<S> {
  /// Verifies the heap's structural invariants.
  ///
  /// Returns the first violation found, if any. With `verbose` set, every
  /// walked block is printed to stdout. The heap is never modified.
  pub fn check_heap(
    &self,
    verbose: bool,
  ) -> Result<(), HeapViolation> {
    let result = unsafe { self.run_checks(verbose) };
    if let Err(violation) = result {
      log::error!("heap check failed: {violation}");
    }
    result
  }

  unsafe fn run_checks(
    &self,
    verbose: bool,
  ) -> Result<(), HeapViolation> {
    let lo = self.source.heap_lo() as usize;
    let hi = self.source.heap_hi() as usize;

    if verbose {
      println!("heap [{lo:#x}..{hi:#x}]:");
    }

    unsafe {
      // The prologue anchors everything; check it before trusting any
      // navigation that starts from it.
      if self.base as usize != lo + 2 * WSIZE
        || block_size(self.base) != DSIZE
        || !block_alloc(self.base)
      {
        return Err(HeapViolation::BadPrologue);
      }
      check_block(self.base)?;

      // Pass 1: walk every block in address order.
      let mut bp = next_block(self.base);
      loop {
        let h = bp as usize - WSIZE;
        if h < lo || h > hi {
          return Err(HeapViolation::WalkOutOfBounds { at: bp as usize });
        }
        if block_size(bp) == 0 {
          break;
        }
        if verbose {
          print_block(bp);
        }

        check_block(bp)?;
        if block_size(bp) < MIN_BLOCK {
          return Err(HeapViolation::BadSize { bp: bp as usize });
        }
        let next = next_block(bp);
        if !block_alloc(bp) && block_size(next) > 0 && !block_alloc(next) {
          return Err(HeapViolation::UncoalescedNeighbors { bp: bp as usize });
        }

        bp = next;
      }

      // The walk ended on a zero-size header: it must be the epilogue,
      // allocated and flush with the high-water mark.
      if verbose {
        print_block(bp);
      }
      if !block_alloc(bp) || bp as usize != hi + 1 {
        return Err(HeapViolation::BadEpilogue);
      }

      // Pass 2: walk the free list.
      let mut prev: *mut u8 = null_mut();
      let mut bp = self.head;
      while !bp.is_null() {
        let addr = bp as usize;
        if addr < lo || addr > hi {
          return Err(HeapViolation::WildLink { bp: addr });
        }
        check_block(bp)?;
        if block_alloc(bp) {
          return Err(HeapViolation::AllocatedInFreeList { bp: addr });
        }
        // Symmetry also rules out cycles: a revisited entry's stored
        // predecessor cannot match two different walk predecessors.
        if prev_free(bp) != prev {
          return Err(HeapViolation::AsymmetricLinks { bp: addr });
        }

        prev = bp;
        bp = next_free(bp);
      }

      // Pass 3: list membership is exactly "allocation bit clear".
      let mut bp = next_block(self.base);
      while block_size(bp) > 0 {
        if !block_alloc(bp) && !self.on_free_list(bp) {
          return Err(HeapViolation::UnlistedFreeBlock { bp: bp as usize });
        }
        bp = next_block(bp);
      }
    }

    Ok(())
  }

  unsafe fn on_free_list(
    &self,
    bp: *mut u8,
  ) -> bool {
    unsafe {
      let mut cur = self.head;
      while !cur.is_null() {
        if cur == bp {
          return true;
        }
        cur = next_free(cur);
      }
      false
    }
  }
}

/// Alignment and tag agreement, the per-block checks shared by all passes.
unsafe fn check_block(bp: *mut u8) -> Result<(), HeapViolation> {
  unsafe {
    if bp as usize % DSIZE != 0 {
      return Err(HeapViolation::Misaligned { bp: bp as usize });
    }
    if get(header(bp)) != get(footer(bp)) {
      return Err(HeapViolation::TagMismatch { bp: bp as usize });
    }
  }
  Ok(())
}

unsafe fn print_block(bp: *mut u8) {
  unsafe {
    let htag = get(header(bp));
    if tag_size(htag) == 0 {
      println!("{bp:p}: end of heap");
      return;
    }

    let ftag = get(footer(bp));
    println!(
      "{:p}: header: [{}:{}] footer: [{}:{}]",
      bp,
      tag_size(htag),
      if tag_alloc(htag) { 'a' } else { 'f' },
      tag_size(ftag),
      if tag_alloc(ftag) { 'a' } else { 'f' },
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::block::{pack, put, set_next_free, set_prev_free};
  use crate::mem::MmapSource;

  fn test_heap() -> ExplicitAllocator<MmapSource> {
    ExplicitAllocator::init(MmapSource::new(1 << 20).unwrap()).unwrap()
  }

  #[test]
  fn healthy_heap_passes() {
    let mut heap = test_heap();

    unsafe {
      let p = heap.allocate(64);
      let q = heap.allocate(200);
      heap.deallocate(p);
      assert_eq!(heap.check_heap(false), Ok(()));
      heap.deallocate(q);
      assert_eq!(heap.check_heap(false), Ok(()));
    }
  }

  #[test]
  fn detects_smashed_footer() {
    let mut heap = test_heap();

    unsafe {
      let p = heap.allocate(64);
      // Flip the allocation bit in the footer only.
      put(footer(p), pack(block_size(p), false));

      assert_eq!(
        heap.check_heap(false),
        Err(HeapViolation::TagMismatch { bp: p as usize })
      );
    }
  }

  #[test]
  fn detects_undersized_block() {
    let mut heap = test_heap();

    unsafe {
      let p = heap.allocate(64);
      // Shrink the block below the minimum, keeping header == footer:
      // with size DSIZE the footer lands on the first payload word.
      put(header(p), pack(DSIZE, true));
      put(p, pack(DSIZE, true));

      assert_eq!(
        heap.check_heap(false),
        Err(HeapViolation::BadSize { bp: p as usize })
      );
    }
  }

  #[test]
  fn detects_runaway_block_size() {
    let mut heap = test_heap();

    unsafe {
      let p = heap.allocate(64);
      // A block claiming to extend far past the epilogue. The oversized
      // "footer" stays inside the test reservation, so writing it is
      // harmless.
      let bogus = 1 << 16;
      put(header(p), pack(bogus, true));
      put(p.add(bogus).sub(DSIZE), pack(bogus, true));

      assert!(matches!(
        heap.check_heap(false),
        Err(HeapViolation::WalkOutOfBounds { .. })
      ));
    }
  }

  #[test]
  fn detects_allocated_block_on_the_list() {
    let mut heap = test_heap();

    unsafe {
      let p = heap.allocate(64);
      // Splice the allocated block in at the head.
      set_prev_free(p, null_mut());
      set_next_free(p, heap.head);
      if !heap.head.is_null() {
        set_prev_free(heap.head, p);
      }
      heap.head = p;

      assert_eq!(
        heap.check_heap(false),
        Err(HeapViolation::AllocatedInFreeList { bp: p as usize })
      );
    }
  }

  #[test]
  fn detects_asymmetric_links() {
    let mut heap = test_heap();

    unsafe {
      let x = heap.allocate(64);
      let _g1 = heap.allocate(64);
      let y = heap.allocate(64);
      let _g2 = heap.allocate(64);
      heap.deallocate(x);
      heap.deallocate(y);

      // List is y -> x; cut x's back-link.
      set_prev_free(x, null_mut());

      assert_eq!(
        heap.check_heap(false),
        Err(HeapViolation::AsymmetricLinks { bp: x as usize })
      );
    }
  }

  #[test]
  fn detects_wild_link() {
    let mut heap = test_heap();

    unsafe {
      let x = heap.allocate(64);
      let _guard = heap.allocate(64);
      heap.deallocate(x);

      let beyond = (heap.source.heap_hi() as usize + DSIZE) as *mut u8;
      set_next_free(x, beyond);

      assert_eq!(
        heap.check_heap(false),
        Err(HeapViolation::WildLink { bp: beyond as usize })
      );
    }
  }

  #[test]
  fn detects_misaligned_link() {
    let mut heap = test_heap();

    unsafe {
      let x = heap.allocate(64);
      let _guard = heap.allocate(64);
      heap.deallocate(x);

      set_next_free(x, (x as usize + 1) as *mut u8);

      assert_eq!(
        heap.check_heap(false),
        Err(HeapViolation::Misaligned { bp: x as usize + 1 })
      );
    }
  }

  #[test]
  fn detects_free_block_missing_from_list() {
    let mut heap = test_heap();

    unsafe {
      let x = heap.allocate(64);
      let _guard = heap.allocate(64);
      heap.deallocate(x);

      // Drop the whole list; x stays free in the heap.
      heap.head = null_mut();

      assert_eq!(
        heap.check_heap(false),
        Err(HeapViolation::UnlistedFreeBlock { bp: x as usize })
      );
    }
  }

  #[test]
  fn detects_corrupted_sentinels() {
    let mut heap = test_heap();

    unsafe {
      // Epilogue: clear its allocation bit.
      let mut bp = next_block(heap.base);
      while block_size(bp) > 0 {
        bp = next_block(bp);
      }
      put(header(bp), pack(0, false));
      assert_eq!(heap.check_heap(false), Err(HeapViolation::BadEpilogue));
      put(header(bp), pack(0, true));
      assert_eq!(heap.check_heap(false), Ok(()));

      // Prologue: clear its allocation bit.
      put(header(heap.base), pack(DSIZE, false));
      assert_eq!(heap.check_heap(false), Err(HeapViolation::BadPrologue));
    }
  }
}

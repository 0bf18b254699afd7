//! Block layout and boundary-tag arithmetic.
//!
//! Every block in the heap is a run of bytes framed by two identical tag
//! words, with the payload address `bp` in between:
//!
//! ```text
//!   bp - WSIZE          bp                  bp + size - DSIZE   bp + size
//!   ┌───────────────┬───────────────────────┬───────────────┬──────────
//!   │ header        │ payload               │ footer        │ next
//!   │ size | alloc  │ (links when free)     │ size | alloc  │ header
//!   └───────────────┴───────────────────────┴───────────────┴──────────
//! ```
//!
//! A tag packs the total block size (header and footer included) with the
//! allocation flag in the low bit; sizes are always multiples of `DSIZE`,
//! so the low bits are free for flags. The footer is a verbatim copy of the
//! header, which is what makes `prev_block` O(1): the word just below `bp`
//! is the previous block's footer.
//!
//! When a block is free, the first two payload words hold the free-list
//! links: the predecessor pointer at offset 0 and the successor pointer at
//! offset `WSIZE`. Both are payload addresses of other free blocks or null.
//!
//! Everything here is raw pointer arithmetic over addresses handed out by
//! the allocator; callers must pass payload addresses of well-formed blocks.

use core::mem;

/// Word and tag size in bytes: the natural machine word.
pub const WSIZE: usize = mem::size_of::<usize>();

/// Double word: payload alignment and size quantum.
pub const DSIZE: usize = 2 * WSIZE;

/// Default heap-extension granularity in bytes.
pub const CHUNKSIZE: usize = 1 << 12;

/// Smallest legal block: header + footer + two link words.
pub const MIN_BLOCK: usize = 2 * DSIZE;

/// Packs a block size and an allocation flag into a tag word.
#[inline]
pub fn pack(
  size: usize,
  alloc: bool,
) -> usize {
  size | alloc as usize
}

/// Size field of a tag word.
#[inline]
pub fn tag_size(tag: usize) -> usize {
  tag & !(DSIZE - 1)
}

/// Allocation flag of a tag word.
#[inline]
pub fn tag_alloc(tag: usize) -> bool {
  tag & 0x1 != 0
}

/// Reads the tag word at `p`.
#[inline]
pub unsafe fn get(p: *const u8) -> usize {
  unsafe { (p as *const usize).read() }
}

/// Writes the tag word `tag` at `p`.
#[inline]
pub unsafe fn put(
  p: *mut u8,
  tag: usize,
) {
  unsafe { (p as *mut usize).write(tag) }
}

/// Header address of the block with payload `bp`.
#[inline]
pub unsafe fn header(bp: *mut u8) -> *mut u8 {
  unsafe { bp.sub(WSIZE) }
}

/// Footer address of the block with payload `bp`.
///
/// Derived from the header, so the header must already hold the block's
/// current size.
#[inline]
pub unsafe fn footer(bp: *mut u8) -> *mut u8 {
  unsafe { bp.add(block_size(bp)).sub(DSIZE) }
}

/// Total size of the block with payload `bp`, read from its header.
#[inline]
pub unsafe fn block_size(bp: *mut u8) -> usize {
  unsafe { tag_size(get(header(bp))) }
}

/// Allocation flag of the block with payload `bp`, read from its header.
#[inline]
pub unsafe fn block_alloc(bp: *mut u8) -> bool {
  unsafe { tag_alloc(get(header(bp))) }
}

/// Payload address of the block following `bp` in address order.
#[inline]
pub unsafe fn next_block(bp: *mut u8) -> *mut u8 {
  unsafe { bp.add(block_size(bp)) }
}

/// Payload address of the block preceding `bp` in address order.
///
/// Reads the previous block's footer, which sits in the word just below
/// this block's header.
#[inline]
pub unsafe fn prev_block(bp: *mut u8) -> *mut u8 {
  unsafe { bp.sub(tag_size(get(bp.sub(DSIZE)))) }
}

/// Successor link of the free block `bp` (second payload word).
#[inline]
pub unsafe fn next_free(bp: *mut u8) -> *mut u8 {
  unsafe { (bp.add(WSIZE) as *const *mut u8).read() }
}

/// Stores `q` as the successor link of the free block `bp`.
#[inline]
pub unsafe fn set_next_free(
  bp: *mut u8,
  q: *mut u8,
) {
  unsafe { (bp.add(WSIZE) as *mut *mut u8).write(q) }
}

/// Predecessor link of the free block `bp` (first payload word).
#[inline]
pub unsafe fn prev_free(bp: *mut u8) -> *mut u8 {
  unsafe { (bp as *const *mut u8).read() }
}

/// Stores `q` as the predecessor link of the free block `bp`.
#[inline]
pub unsafe fn set_prev_free(
  bp: *mut u8,
  q: *mut u8,
) {
  unsafe { (bp as *mut *mut u8).write(q) }
}

#[cfg(test)]
mod tests {
  use super::*;
  use core::ptr;

  #[test]
  fn tag_round_trip() {
    for size in [0usize, DSIZE, MIN_BLOCK, 4096, 4096 + MIN_BLOCK] {
      for alloc in [false, true] {
        let tag = pack(size, alloc);
        assert_eq!(tag_size(tag), size);
        assert_eq!(tag_alloc(tag), alloc);
      }
    }
  }

  #[test]
  fn tag_size_masks_all_flag_bits() {
    // Sizes are DSIZE multiples, so every bit below DSIZE belongs to flags.
    let tag = pack(MIN_BLOCK, true) | (DSIZE - 2);
    assert_eq!(tag_size(tag), MIN_BLOCK);
    assert!(tag_alloc(tag));
  }

  /// Double-word aligned backing storage for a hand-built miniature heap.
  #[repr(align(16))]
  struct Arena([u8; 16 * MIN_BLOCK]);

  /// Lays out prologue | block a (allocated) | block b (free) | epilogue
  /// and returns the payload addresses of a and b.
  unsafe fn build_arena(arena: &mut Arena) -> (*mut u8, *mut u8) {
    let base = arena.0.as_mut_ptr();
    let a_size = 3 * DSIZE;
    let b_size = 4 * DSIZE;

    unsafe {
      put(base, 0);
      put(base.add(WSIZE), pack(DSIZE, true));
      put(base.add(2 * WSIZE), pack(DSIZE, true));

      let a = base.add(2 * WSIZE + DSIZE);
      put(header(a), pack(a_size, true));
      put(a.add(a_size).sub(DSIZE), pack(a_size, true));

      let b = a.add(a_size);
      put(header(b), pack(b_size, false));
      put(b.add(b_size).sub(DSIZE), pack(b_size, false));
      set_prev_free(b, ptr::null_mut());
      set_next_free(b, ptr::null_mut());

      put(header(b.add(b_size)), pack(0, true));

      (a, b)
    }
  }

  #[test]
  fn navigation_over_hand_built_heap() {
    let mut arena = Arena([0; 16 * MIN_BLOCK]);

    unsafe {
      let (a, b) = build_arena(&mut arena);

      assert_eq!(block_size(a), 3 * DSIZE);
      assert!(block_alloc(a));
      assert_eq!(block_size(b), 4 * DSIZE);
      assert!(!block_alloc(b));

      assert_eq!(next_block(a), b);
      assert_eq!(prev_block(b), a);

      // Header and footer of the same block decode identically.
      assert_eq!(get(header(a)), get(footer(a)));
      assert_eq!(get(header(b)), get(footer(b)));

      // The epilogue terminates forward navigation.
      let epilogue = next_block(b);
      assert_eq!(block_size(epilogue), 0);
      assert!(block_alloc(epilogue));
    }
  }

  #[test]
  fn free_links_live_in_the_payload() {
    let mut arena = Arena([0; 16 * MIN_BLOCK]);

    unsafe {
      let (a, b) = build_arena(&mut arena);

      assert!(prev_free(b).is_null());
      assert!(next_free(b).is_null());

      set_prev_free(b, a);
      set_next_free(b, b);
      assert_eq!(prev_free(b), a);
      assert_eq!(next_free(b), b);

      // The links occupy the first two payload words and nothing else.
      assert_eq!(get(b), a as usize);
      assert_eq!(get(b.add(WSIZE)), b as usize);
    }
  }
}

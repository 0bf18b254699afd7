//! # rmalloc - An Explicit Free-List Memory Allocator
//!
//! This crate provides a classical **malloc-style allocator** in Rust:
//! boundary-tagged blocks on a contiguous heap, an explicit doubly-linked
//! free list, first-fit placement with splitting, and immediate coalescing.
//!
//! ## Overview
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                           HEAP MEMORY                                │
//!   │                                                                      │
//!   │  ┌────┬────────┬─────────┬────────┬─────────┬────────────┬────────┐  │
//!   │  │pad │prologue│ alloc   │ free   │ alloc   │ free       │epilogue│  │
//!   │  └────┴────────┴─────────┴────────┴─────────┴────────────┴────────┘  │
//!   │                           ▲                  ▲                       │
//!   │                head ──────┼──────────────────┘                       │
//!   │                           └── free list threaded through payloads    │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Each block carries its size and status in a header word and an
//!   identical footer word, so both neighbors are one read away.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   rmalloc
//!   ├── align      - Alignment macro (align_to!)
//!   ├── block      - Block layout and tag arithmetic (internal)
//!   ├── mem        - Page sources (SbrkSource, MmapSource)
//!   ├── explicit   - ExplicitAllocator and LockedAllocator
//!   └── check      - Heap consistency checker
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rmalloc::{ExplicitAllocator, MmapSource};
//!
//! fn main() {
//!     let source = MmapSource::new(1 << 20).expect("failed to reserve heap");
//!     let mut heap = ExplicitAllocator::init(source).expect("failed to init heap");
//!
//!     unsafe {
//!         // Allocate 64 bytes, use them, grow them, release them.
//!         let p = heap.allocate(64);
//!         p.write(42);
//!
//!         let p = heap.reallocate(p, 256);
//!         heap.deallocate(p);
//!     }
//!
//!     // Verify the heap's invariants at any quiescent point.
//!     heap.check_heap(false).expect("heap is consistent");
//! }
//! ```
//!
//! ## How It Works
//!
//! Allocation normalizes the request to a double-word multiple (plus tag
//! overhead), scans the free list first-fit, and splits the chosen block
//! when the remainder can stand alone. When nothing fits, the heap grows
//! through a [`PageSource`] (the program break via [`SbrkSource`], or a
//! fixed reservation via [`MmapSource`]) and the new memory fuses with
//! any free block already at the top.
//!
//! Freeing clears the tags and merges with free neighbors immediately, in
//! constant time, using the footer of the previous block and the header of
//! the next. The merged block is pushed at the head of the free list, so
//! placement favors recently released memory.
//!
//! ## Features
//!
//! - **In-band bookkeeping**: the free list lives inside free payloads;
//!   nothing tracks the allocator but the heap itself
//! - **Immediate coalescing**: no two free blocks are ever adjacent
//! - **In-place reallocation**: growth absorbs a free successor block
//!   before falling back to allocate-copy-free
//! - **Checkable invariants**: `check_heap` verifies the whole structure
//!   and reports the first violation
//!
//! ## Limitations
//!
//! - **Single-threaded core**: wrap it in [`LockedAllocator`] (or
//!   serialize calls yourself) to share it
//! - **Monotonic heap**: memory is never returned to the source
//! - **Double-word alignment only**: stricter layouts are refused by the
//!   `GlobalAlloc` wrapper
//! - **Unix-only sources**: both page sources are built on `libc`
//!
//! ## Safety
//!
//! This crate is inherently unsafe as it deals with raw memory management.
//! Allocation and deallocation require `unsafe` blocks, and the usual
//! rules apply: no use after free, no double free, no foreign pointers.

pub mod align;
mod block;
mod check;
mod explicit;
mod mem;

pub use block::{CHUNKSIZE, DSIZE, MIN_BLOCK, WSIZE};
pub use check::HeapViolation;
pub use explicit::{ExplicitAllocator, LockedAllocator};
pub use mem::{DEFAULT_RESERVE, MmapSource, PageSource, SbrkSource};

//! Page sources: where the heap's bytes come from.
//!
//! The allocator itself never talks to the operating system. It grows its
//! managed region through a [`PageSource`], which hands out spans of new
//! bytes at the current upper end of the region:
//!
//! ```text
//!   heap_lo                                  heap_hi
//!   ┌────────────────────────────────────────┐
//!   │            managed region              │ ← extend(n) appends n bytes
//!   └────────────────────────────────────────┘   and returns their start
//! ```
//!
//! Two sources are provided:
//!
//! * [`SbrkSource`] moves the program break with `sbrk(2)`, the classic
//!   way a process heap grows.
//! * [`MmapSource`] reserves a fixed anonymous mapping up front and serves
//!   extensions by bumping a private break inside it. Growth is then
//!   deterministic and self-contained, which is what the tests and the
//!   demo use.

use core::ptr::{self, NonNull};

use libc::{c_void, intptr_t, sbrk};

use crate::align_to;
use crate::block::DSIZE;

/// Default reservation for [`MmapSource::default`]: 20 MiB.
pub const DEFAULT_RESERVE: usize = 20 * (1 << 20);

/// A provider of heap pages.
///
/// The allocator calls [`extend`](Self::extend) with double-word multiples
/// only, and assumes successive extensions are contiguous: the bytes
/// returned by one call start exactly where the previous call's bytes
/// ended. Prior contents must be preserved.
///
/// # Safety
///
/// Implementations must return addresses of real, writable, exclusively
/// owned memory: the first extension double-word aligned, every later one
/// contiguous with the last. The allocator builds its block structure
/// directly on these bytes.
pub unsafe trait PageSource {
  /// Grows the managed region by `incr` bytes and returns the address of
  /// the first new byte, or `None` if the source is exhausted.
  fn extend(
    &mut self,
    incr: usize,
  ) -> Option<NonNull<u8>>;

  /// Address of the first byte of the managed region.
  fn heap_lo(&self) -> *mut u8;

  /// Address of the last byte of the managed region.
  ///
  /// Meaningful only after the first successful [`extend`](Self::extend).
  fn heap_hi(&self) -> *mut u8;
}

/// A [`PageSource`] backed by the program break.
///
/// # Caveats
///
/// The contiguity contract holds only while nothing else moves the break:
/// one live `SbrkSource` per process, and no concurrent `sbrk`/`brk` use
/// elsewhere. Memory handed out is never returned; the break only moves
/// up.
pub struct SbrkSource {
  /// Program break at construction: low edge of the managed region.
  lo: *mut u8,

  /// Current program break: one past the managed region.
  brk: *mut u8,
}

impl SbrkSource {
  /// Captures the current program break as the region's low edge, nudging
  /// it up first if it does not sit on a double-word boundary.
  pub fn new() -> Self {
    let mut brk = unsafe { sbrk(0) } as usize;

    let aligned = align_to!(brk, DSIZE);
    if aligned != brk {
      let moved = unsafe { sbrk((aligned - brk) as intptr_t) };
      if moved != usize::MAX as *mut c_void {
        brk = aligned;
      }
    }

    let brk = brk as *mut u8;
    Self { lo: brk, brk }
  }
}

impl Default for SbrkSource {
  fn default() -> Self {
    Self::new()
  }
}

// Raw pointers keep this from being auto-Send; the pointers refer to the
// process break, which is valid from any thread.
unsafe impl Send for SbrkSource {}

unsafe impl PageSource for SbrkSource {
  fn extend(
    &mut self,
    incr: usize,
  ) -> Option<NonNull<u8>> {
    // sbrk returns the old break on success and (void*)-1 on failure.
    let old = unsafe { sbrk(incr as intptr_t) };
    if old == usize::MAX as *mut c_void {
      log::warn!("sbrk could not extend the heap by {incr} bytes");
      return None;
    }

    let old = old as *mut u8;
    self.brk = unsafe { old.add(incr) };
    log::trace!("program break moved to {:?}", self.brk);
    NonNull::new(old)
  }

  fn heap_lo(&self) -> *mut u8 {
    self.lo
  }

  fn heap_hi(&self) -> *mut u8 {
    self.brk.wrapping_sub(1)
  }
}

/// A [`PageSource`] that bump-extends inside a fixed anonymous mapping.
///
/// The whole reservation is mapped read-write at construction time;
/// `extend` just advances a private break pointer through it, so the
/// region is contiguous by construction and exhaustion is exact.
pub struct MmapSource {
  /// Start of the reservation.
  lo: *mut u8,

  /// Private break: one past the bytes handed out so far.
  brk: *mut u8,

  /// Total bytes reserved.
  limit: usize,
}

impl MmapSource {
  /// Reserves `limit` bytes of private anonymous memory.
  ///
  /// Returns `None` if the mapping cannot be established.
  pub fn new(limit: usize) -> Option<Self> {
    let region = unsafe {
      libc::mmap(
        ptr::null_mut(),
        limit,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
      )
    };
    if region == libc::MAP_FAILED {
      log::warn!("mmap could not reserve {limit} bytes");
      return None;
    }

    let lo = region as *mut u8;
    Some(Self { lo, brk: lo, limit })
  }

  /// Bytes still available for extension.
  pub fn remaining(&self) -> usize {
    self.limit - (self.brk as usize - self.lo as usize)
  }
}

impl Default for MmapSource {
  /// Reserves [`DEFAULT_RESERVE`] bytes; if the mapping fails, yields a
  /// source whose every extension fails.
  fn default() -> Self {
    Self::new(DEFAULT_RESERVE).unwrap_or(Self {
      lo: ptr::null_mut(),
      brk: ptr::null_mut(),
      limit: 0,
    })
  }
}

unsafe impl Send for MmapSource {}

impl Drop for MmapSource {
  fn drop(&mut self) {
    if !self.lo.is_null() {
      unsafe {
        libc::munmap(self.lo as *mut c_void, self.limit);
      }
    }
  }
}

unsafe impl PageSource for MmapSource {
  fn extend(
    &mut self,
    incr: usize,
  ) -> Option<NonNull<u8>> {
    if incr > self.remaining() {
      log::warn!(
        "reservation exhausted: {incr} bytes requested, {} remaining",
        self.remaining()
      );
      return None;
    }

    let old = self.brk;
    self.brk = unsafe { self.brk.add(incr) };
    log::trace!("reserved break moved to {:?}", self.brk);
    NonNull::new(old)
  }

  fn heap_lo(&self) -> *mut u8 {
    self.lo
  }

  fn heap_hi(&self) -> *mut u8 {
    self.brk.wrapping_sub(1)
  }
}

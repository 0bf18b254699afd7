use std::io::Read;

use rmalloc::{DSIZE, ExplicitAllocator, MmapSource};

/// Waits until the user presses ENTER.
/// Useful when you want to follow the heap dumps step by step, or inspect
/// the process with tools like `pmap` or `gdb` between operations.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Dumps every block in the heap, then asserts the invariants still hold.
fn dump(heap: &ExplicitAllocator<MmapSource>) {
  if let Err(violation) = heap.check_heap(true) {
    println!("!! heap check failed: {violation}");
  }
}

fn main() {
  // A fixed 1 MiB reservation keeps the walk deterministic; swap in
  // SbrkSource to grow the real program break instead.
  let source = MmapSource::new(1 << 20).expect("failed to reserve demo heap");
  let mut heap = ExplicitAllocator::init(source).expect("failed to initialize heap");

  unsafe {
    // --------------------------------------------------------------------
    // 1) Fresh heap: prologue, one free chunk, epilogue.
    // --------------------------------------------------------------------
    println!("[1] Freshly initialized heap");
    dump(&heap);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Three 64-byte allocations, each carved off the same free chunk.
    // --------------------------------------------------------------------
    let a = heap.allocate(64);
    let b = heap.allocate(64);
    let c = heap.allocate(64);
    println!("\n[2] Allocated a = {a:?}, b = {b:?}, c = {c:?}");

    // Write something into the payloads to show they are usable.
    a.write_bytes(0xAA, 64);
    b.write_bytes(0xBB, 64);
    c.write_bytes(0xCC, 64);
    println!("[2] Payloads filled; alignment of a = {}", a as usize % DSIZE);
    dump(&heap);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Free the middle block. It cannot merge with either neighbor,
    //    so it simply joins the free list.
    // --------------------------------------------------------------------
    heap.deallocate(b);
    println!("\n[3] Freed b; note the free block sandwiched between a and c");
    dump(&heap);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Free the first block. Its right neighbor (old b) is free, so the
    //    two fuse into one larger block.
    // --------------------------------------------------------------------
    heap.deallocate(a);
    println!("\n[4] Freed a; a and b coalesced into one block");
    dump(&heap);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) Grow c in place. The block after c is free, so reallocation
    //    absorbs it instead of copying.
    // --------------------------------------------------------------------
    let c2 = heap.reallocate(c, 200);
    println!(
      "\n[5] reallocate(c, 200) {} the block in place",
      if c2 == c { "grew" } else { "did NOT grow" }
    );
    dump(&heap);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) Reuse of freed memory: a fresh request fits the coalesced hole
    //    at the old a, most recently freed first.
    // --------------------------------------------------------------------
    let d = heap.allocate(96);
    println!(
      "\n[6] allocate(96) returned {d:?} ({})",
      if d == a { "reused the coalesced a+b hole" } else { "placed elsewhere" }
    );
    dump(&heap);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 7) A request larger than any free block forces a heap extension;
    //    the new pages appear as one free block at the top.
    // --------------------------------------------------------------------
    let big = heap.allocate(8 * 1024);
    println!("\n[7] allocate(8 KiB) extended the heap, returned {big:?}");
    dump(&heap);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 8) End of demo. Release everything; the heap collapses back into
    //    a handful of free blocks and the reservation is unmapped on drop.
    // --------------------------------------------------------------------
    heap.deallocate(c2);
    heap.deallocate(d);
    heap.deallocate(big);
    println!("\n[8] All blocks released");
    dump(&heap);
  }
}

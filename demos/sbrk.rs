use std::{io::Read, ptr};

use nextfit::{Heap, Sbrk};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how the program break moves.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break.
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    Sbrk::program_break(),
  );
}

fn print_blocks(heap: &Heap<Sbrk>) {
  for block in heap.blocks() {
    println!(
      "    {:#x}  {:>6} bytes  {}",
      block.addr,
      block.size,
      if block.allocated { "allocated" } else { "free" }
    );
  }
}

fn main() {
  env_logger::init();

  let mut heap = Heap::new(Sbrk::new());

  unsafe {
    print_program_break("start");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) The first allocation lays down the sentinels and grows the heap
    //    by one 4 KiB chunk.
    // --------------------------------------------------------------------
    let first = heap.allocate(4).cast::<u32>();
    if first.is_null() {
      println!("\n[1] Could not grow the program break");
      return;
    }
    first.write(0xDEADBEEF);
    println!("\n[1] Allocate u32 at {:?}, value = 0x{:X}", first, first.read());
    print_program_break("after init");
    print_blocks(&heap);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Odd-sized allocations are rounded up to 8 bytes plus tags, and
    //    carved off the front of the free block.
    // --------------------------------------------------------------------
    let second = heap.allocate(12);
    ptr::write_bytes(second, 0xAB, 12);
    println!("\n[2] Allocate [u8; 12] at {:?}, usable size = {}", second, heap.usable_size(second));
    print_blocks(&heap);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Free the first block. It cannot merge: both neighbours are in use.
    // --------------------------------------------------------------------
    heap.free(first.cast());
    println!("\n[3] Freed first block");
    print_blocks(&heap);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Free the second block. It merges with the freed first block and
    //    the free tail into a single block.
    // --------------------------------------------------------------------
    heap.free(second);
    println!("\n[4] Freed second block");
    print_blocks(&heap);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) A large allocation does not fit, so the heap grows.
    // --------------------------------------------------------------------
    print_program_break("before large alloc");
    let big = heap.allocate(64 * 1024);
    println!("\n[5] Allocate 64 KiB at {:?}", big);
    print_program_break("after large alloc");
    if big.is_null() {
      // Something else in the process (usually the system malloc) moved
      // the break since our last grant.
      println!("[5] The break is no longer ours to extend, stopping here.");
      return;
    }
    print_blocks(&heap);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) Shrink it with reallocate: contents move to a fresh block.
    // --------------------------------------------------------------------
    ptr::write_bytes(big, 0x5A, 64);
    let small = heap.reallocate(big, 64);
    println!("\n[6] Reallocated to 64 bytes at {:?}, first byte = 0x{:X}", small, small.read());
    print_blocks(&heap);

    match heap.check() {
      Ok(stats) => println!("\n[7] Heap consistent: {stats:?}"),
      Err(err) => println!("\n[7] Heap corrupted: {err}"),
    }

    // The break is never lowered; the OS reclaims everything at exit.
    println!("\n[8] End of example.");
  }
}

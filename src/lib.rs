//! # nextfit - A Boundary-Tag Heap Allocator
//!
//! This crate provides a general-purpose **implicit free list** allocator
//! with boundary tags, next-fit placement and immediate coalescing. It
//! manages a single contiguous heap that only ever grows, through a
//! caller-supplied `grow` primitive (`sbrk(2)` or an owned buffer).
//!
//! ## Overview
//!
//! The heap is a sequence of blocks. Every block carries its size and an
//! allocated bit twice, in a header before its payload and in a footer
//! after it:
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌─────┬──────┬──────┬────────────────┬────────────┬───────────┬─────┐
//!   │ pad │ start│ start│    block       │   block    │   block   │ end │
//!   │     │ hdr  │ ftr  │  (allocated)   │   (free)   │ (alloc.)  │ hdr │
//!   └─────┴──────┴──────┴────────────────┴────────────┴───────────┴─────┘
//!          └─ start sentinel (8, alloc) ─┘                          ▲
//!                                     ▲                             │
//!                                     └── search cursor       end sentinel
//!                                                             (0, alloc)
//! ```
//!
//! Because both ends of a block are tagged, the previous and next block
//! are found in O(1), which makes merging free neighbours cheap.
//!
//! ## Crate Structure
//!
//! ```text
//!   nextfit
//!   ├── align      - Tag sizes, align! macro, request adjustment
//!   ├── block      - Boundary tag accessors (internal)
//!   ├── check      - Block iterator and heap consistency checker
//!   ├── config     - HeapConfig (initial and chunk growth sizes)
//!   ├── error      - AllocError
//!   ├── heap       - Heap: init, allocate, free, reallocate
//!   └── provider   - MemoryProvider trait, Sbrk and Region providers
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use nextfit::{Heap, Region};
//!
//! let mut heap = Heap::new(Region::new(1 << 16).unwrap());
//!
//! unsafe {
//!     let ptr = heap.allocate(size_of::<u64>()).cast::<u64>();
//!     ptr.write(42);
//!     assert_eq!(ptr.read(), 42);
//!
//!     let ptr = heap.reallocate(ptr.cast(), 64).cast::<u64>();
//!     assert_eq!(ptr.read(), 42);
//!
//!     heap.free(ptr.cast());
//! }
//!
//! assert!(heap.check().is_ok());
//! ```
//!
//! ## How It Works
//!
//! ```text
//!   allocate(n):
//!
//!   n ──► adjust (tags + round to 8) ──► next-fit from cursor ──► hit?
//!                                                                 │
//!                        ┌──────────── no ────────────────────────┤
//!                        ▼                                        │ yes
//!      grow by max(adjusted, chunk) ──► merge with free tail      │
//!                        │                                        ▼
//!                        └──────────────────────────────► place (split)
//! ```
//!
//! Freeing a block marks it free and immediately merges it with any free
//! neighbour, so two free blocks are never adjacent.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **Never shrinks**: Memory is never returned to the provider
//! - **Trusted callers**: Invalid or double frees are undefined behavior
//!   (enable the `validate` feature to catch common misuse)
//! - **Linear search**: Allocation is O(number of blocks)
//!
//! ## Safety
//!
//! This crate is inherently unsafe as it deals with raw memory management.
//! Freeing and reallocating require `unsafe` blocks.

pub mod align;
mod block;
mod check;
mod config;
mod error;
mod heap;
mod provider;

pub use check::{BlockInfo, Blocks, CheckError, HeapStats};
pub use config::{CHUNK_SIZE, HeapConfig};
pub use error::{AllocError, Result};
pub use heap::Heap;
pub use provider::{MemoryProvider, Region, Sbrk};

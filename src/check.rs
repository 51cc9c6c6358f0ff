//! Heap walking and consistency checking.

use std::marker::PhantomData;

use thiserror::Error;

use crate::{
  align::{DSIZE, MIN_BLOCK_SIZE, WSIZE},
  block::{Block, Tag},
  heap::{Heap, SKELETON_SIZE},
  provider::MemoryProvider,
};

/// A snapshot of one block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
  /// Payload address.
  pub addr: usize,
  /// Block size, tags included.
  pub size: usize,
  pub allocated: bool,
}

/// Totals gathered by [`Heap::check`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
  pub heap_size: usize,
  pub blocks: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
  pub allocated_bytes: usize,
}

/// A violated heap invariant, located by block payload address.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckError {
  #[error("start sentinel at {addr:#x} is damaged")]
  BadPrologue { addr: usize },

  #[error("end sentinel at {addr:#x} is damaged or misplaced")]
  BadEpilogue { addr: usize },

  #[error("block at {addr:#x} is not aligned to {DSIZE} bytes")]
  Misaligned { addr: usize },

  #[error("block at {addr:#x} is {size} bytes, below the minimum block size")]
  TooSmall { addr: usize, size: usize },

  #[error("block at {addr:#x} runs past the end of the heap")]
  OutOfBounds { addr: usize },

  #[error("block at {addr:#x} has a header that differs from its footer")]
  TagMismatch { addr: usize },

  #[error("free block at {addr:#x} follows another free block")]
  AdjacentFree { addr: usize },

  #[error("blocks cover {counted} bytes but the provider granted {granted}")]
  SizeMismatch { counted: usize, granted: usize },

  #[error("search cursor {addr:#x} does not point at a block")]
  CursorMisplaced { addr: usize },
}

/// Iterator over the blocks between the two sentinels.
pub struct Blocks<'a> {
  block: Block,
  _heap: PhantomData<&'a ()>,
}

impl Iterator for Blocks<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<Self::Item> {
    if self.block.is_null() {
      return None;
    }

    unsafe {
      let tag = self.block.tag();
      if tag.size() == 0 {
        self.block = Block::null();
        return None;
      }

      let info = BlockInfo {
        addr: self.block.addr(),
        size: tag.size(),
        allocated: tag.is_allocated(),
      };
      self.block = self.block.next();

      Some(info)
    }
  }
}

impl<P: MemoryProvider> Heap<P> {
  /// Walks every real block in address order.
  pub fn blocks(&self) -> Blocks<'_> {
    let block = if self.is_initialized() {
      unsafe { self.prologue.next() }
    } else {
      Block::null()
    };

    Blocks {
      block,
      _heap: PhantomData,
    }
  }

  /// Verifies the structural invariants of the whole heap.
  ///
  /// An uninitialized heap is trivially consistent.
  pub fn check(&self) -> Result<HeapStats, CheckError> {
    let mut stats = HeapStats {
      heap_size: self.heap_size,
      ..HeapStats::default()
    };
    if !self.is_initialized() {
      return Ok(stats);
    }

    let end = self.heap_start as usize + self.heap_size;

    unsafe {
      let prologue = self.prologue;
      if prologue.tag() != Tag::new(DSIZE, true) || prologue.footer_tag() != prologue.tag() {
        return Err(CheckError::BadPrologue { addr: prologue.addr() });
      }

      let mut counted = SKELETON_SIZE;
      let mut prev_free = false;
      let mut cursor_seen = self.cursor == prologue;
      let mut block = prologue.next();

      loop {
        let addr = block.addr();
        if addr % DSIZE != 0 {
          return Err(CheckError::Misaligned { addr });
        }
        if addr > end {
          return Err(CheckError::OutOfBounds { addr });
        }
        cursor_seen |= block == self.cursor;

        let tag = block.tag();
        if tag.size() == 0 {
          if !tag.is_allocated() || addr != end {
            return Err(CheckError::BadEpilogue { addr });
          }
          break;
        }

        if tag.size() < MIN_BLOCK_SIZE {
          return Err(CheckError::TooSmall { addr, size: tag.size() });
        }
        if addr - WSIZE + tag.size() > end - WSIZE {
          return Err(CheckError::OutOfBounds { addr });
        }
        if block.footer_tag() != tag {
          return Err(CheckError::TagMismatch { addr });
        }

        if tag.is_allocated() {
          stats.allocated_bytes += tag.size();
        } else {
          if prev_free {
            return Err(CheckError::AdjacentFree { addr });
          }
          stats.free_blocks += 1;
          stats.free_bytes += tag.size();
        }
        prev_free = !tag.is_allocated();
        stats.blocks += 1;
        counted += tag.size();

        block = block.next();
      }

      if counted != self.heap_size {
        return Err(CheckError::SizeMismatch {
          counted,
          granted: self.heap_size,
        });
      }
      if !cursor_seen {
        return Err(CheckError::CursorMisplaced { addr: self.cursor.addr() });
      }
    }

    Ok(stats)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{config::HeapConfig, provider::Region};

  fn heap() -> Heap<Region> {
    Heap::with_config(Region::new(1 << 16).unwrap(), HeapConfig::default())
  }

  #[test]
  fn test_uninitialized_heap_is_empty() {
    let heap = heap();

    assert_eq!(heap.blocks().count(), 0);
    assert_eq!(heap.check(), Ok(HeapStats::default()));
  }

  #[test]
  fn test_stats() {
    let mut heap = heap();
    let a = heap.allocate(100);
    let _b = heap.allocate(10);
    unsafe { heap.free(a) };

    let stats = heap.check().unwrap();

    assert_eq!(stats.heap_size, SKELETON_SIZE + 4096);
    assert_eq!(stats.blocks, 3);
    assert_eq!(stats.free_blocks, 2);
    assert_eq!(stats.allocated_bytes, 24);
    assert_eq!(stats.free_bytes, 4096 - 24);
    assert_eq!(stats.allocated_bytes + stats.free_bytes + SKELETON_SIZE, stats.heap_size);
  }

  #[test]
  fn test_detects_tag_mismatch() {
    let mut heap = heap();
    let a = heap.allocate(32);

    unsafe {
      let block = Block::from_payload(a);
      Tag::new(block.size(), false).write(block.footer());
    }

    assert_eq!(heap.check(), Err(CheckError::TagMismatch { addr: a as usize }));
  }

  #[test]
  fn test_detects_adjacent_free_blocks() {
    let mut heap = heap();
    let a = heap.allocate(32);

    unsafe {
      // Mark free without coalescing.
      let block = Block::from_payload(a);
      block.set(block.size(), false);

      assert_eq!(
        heap.check(),
        Err(CheckError::AdjacentFree {
          addr: block.next().addr()
        })
      );
    }
  }

  #[test]
  fn test_detects_misplaced_end_sentinel() {
    let mut heap = heap();
    heap.init().unwrap();
    heap.heap_size += DSIZE;

    assert!(matches!(heap.check(), Err(CheckError::BadEpilogue { .. })));
  }

  #[test]
  fn test_detects_misplaced_cursor() {
    let mut heap = heap();
    let a = heap.allocate(32);
    heap.cursor = Block::from_payload(unsafe { a.add(DSIZE) });

    assert_eq!(
      heap.check(),
      Err(CheckError::CursorMisplaced {
        addr: a as usize + DSIZE
      })
    );
  }
}

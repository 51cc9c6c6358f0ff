use std::ptr::{self, NonNull};

use log::{debug, trace, warn};

use crate::{
  align::{self, DSIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, WSIZE},
  block::{Block, Tag},
  config::HeapConfig,
  error::{AllocError, Result},
  provider::MemoryProvider,
};

/// Bytes of the fixed skeleton: padding word, start sentinel, end sentinel.
pub(crate) const SKELETON_SIZE: usize = 4 * WSIZE;

/// A boundary-tag heap with next-fit placement.
///
/// The heap owns its provider, its base and its roving search cursor, so
/// several independent heaps can coexist. It is not thread safe.
pub struct Heap<P: MemoryProvider> {
  provider: P,
  config: HeapConfig,
  /// Start sentinel; null until the heap is initialized.
  pub(crate) prologue: Block,
  /// Where the next fit search starts.
  pub(crate) cursor: Block,
  pub(crate) heap_start: *mut u8,
  pub(crate) heap_size: usize,
}

impl<P: MemoryProvider> Heap<P> {
  /// Creates an uninitialized heap with the default configuration.
  ///
  /// Nothing is requested from the provider until [`init`](Self::init) or
  /// the first allocation.
  pub const fn new(provider: P) -> Self {
    Self::with_config(provider, HeapConfig::new())
  }

  pub const fn with_config(
    provider: P,
    config: HeapConfig,
  ) -> Self {
    Self {
      provider,
      config,
      prologue: Block::null(),
      cursor: Block::null(),
      heap_start: ptr::null_mut(),
      heap_size: 0,
    }
  }

  pub fn is_initialized(&self) -> bool {
    !self.prologue.is_null()
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  pub fn provider(&self) -> &P {
    &self.provider
  }

  pub fn provider_mut(&mut self) -> &mut P {
    &mut self.provider
  }

  /// Total bytes granted by the provider so far.
  pub fn heap_size(&self) -> usize {
    self.heap_size
  }

  /// Lays down the sentinels and performs the initial growth.
  ///
  /// Does nothing if the heap is already initialized. If only the initial
  /// growth fails, the sentinels stay in place and later allocations grow
  /// the heap on demand.
  pub fn init(&mut self) -> Result<()> {
    if self.is_initialized() {
      return Ok(());
    }
    self.config.validate()?;

    let start = self.provider.grow(SKELETON_SIZE)?.as_ptr();

    unsafe {
      Tag::new(0, false).write(start);
      Tag::new(DSIZE, true).write(start.add(WSIZE));
      Tag::new(DSIZE, true).write(start.add(2 * WSIZE));
      Tag::new(0, true).write(start.add(3 * WSIZE));

      self.heap_start = start;
      self.heap_size = SKELETON_SIZE;
      self.prologue = Block::from_payload(start.add(2 * WSIZE));
      self.cursor = self.prologue;
    }
    debug!("heap initialized at {start:?}");

    self.extend_heap(self.config.initial_size / WSIZE)?;
    self.cursor = unsafe { self.prologue.next() };

    Ok(())
  }

  /// Grows the heap by `words` tag words (rounded up to an even count) and
  /// returns the resulting free block, merged with a free predecessor.
  fn extend_heap(
    &mut self,
    words: usize,
  ) -> Result<Block> {
    let size = align::words_to_bytes(words).ok_or(AllocError::RequestTooLarge {
      size: words.saturating_mul(WSIZE),
    })?;

    // Every block between the sentinels may end up merged into one, so the
    // whole heap must stay encodable in a single tag.
    let blocks_size = (self.heap_size - SKELETON_SIZE).checked_add(size);
    if blocks_size.is_none_or(|total| total > MAX_BLOCK_SIZE) {
      return Err(AllocError::OutOfMemory { requested: size });
    }

    let start = self.provider.grow(size)?.as_ptr();
    debug_assert_eq!(start as usize, self.heap_start as usize + self.heap_size);
    self.heap_size += size;
    debug!("heap grown by {size} bytes to {} bytes", self.heap_size);

    unsafe {
      // The new header overwrites the old end sentinel.
      let block = Block::from_payload(start);
      block.set(size, false);
      Tag::new(0, true).write(block.next().header());

      Ok(self.coalesce(block))
    }
  }

  /// Next-fit search for a free block of at least `size` bytes.
  ///
  /// Scans from the cursor up to the end sentinel, then wraps around from
  /// the first block up to where the scan started.
  fn find_fit(
    &mut self,
    size: usize,
  ) -> Option<Block> {
    unsafe {
      let start = self.cursor;

      let mut block = start;
      while block.size() > 0 {
        if !block.is_allocated() && size <= block.size() {
          self.cursor = block;
          return Some(block);
        }
        block = block.next();
      }

      block = self.prologue.next();
      while block < start {
        if !block.is_allocated() && size <= block.size() {
          self.cursor = block;
          return Some(block);
        }
        block = block.next();
      }

      None
    }
  }

  /// Marks `size` bytes of the free `block` allocated, splitting off the
  /// rest as a new free block when it can hold a minimal block.
  ///
  /// # Safety
  ///
  /// `block` must be a free block of at least `size` bytes.
  unsafe fn place(
    &mut self,
    block: Block,
    size: usize,
  ) {
    unsafe {
      let block_size = block.size();

      if block_size - size >= MIN_BLOCK_SIZE {
        block.set(size, true);
        block.next().set(block_size - size, false);
        trace!(
          "placed {size} bytes at {:?}, split off {} bytes",
          block.payload(),
          block_size - size
        );
      } else {
        block.set(block_size, true);
        trace!("placed {block_size} bytes at {:?}", block.payload());
      }
    }
  }

  /// Merges the free `block` with its free neighbours and returns the
  /// merged block.
  ///
  /// # Safety
  ///
  /// `block` must be a free block inside the heap.
  unsafe fn coalesce(
    &mut self,
    block: Block,
  ) -> Block {
    unsafe {
      let prev_allocated = block.prev_tag().is_allocated();
      let next_allocated = block.next().is_allocated();
      let mut size = block.size();

      let merged = match (prev_allocated, next_allocated) {
        (true, true) => return block,
        (true, false) => {
          size += block.next().size();
          block.set(size, false);
          block
        }
        (false, true) => {
          let prev = block.prev();
          size += prev.size();
          prev.set(size, false);
          prev
        }
        (false, false) => {
          let prev = block.prev();
          size += prev.size() + block.next().size();
          prev.set(size, false);
          prev
        }
      };
      trace!("coalesced {:?} into {size} bytes at {:?}", block.payload(), merged.payload());

      if self.cursor > merged && self.cursor < merged.next() {
        self.cursor = merged;
      }

      merged
    }
  }

  /// Allocates at least `size` bytes, reporting why an allocation failed.
  ///
  /// Returns `Ok(None)` for zero-sized requests.
  pub fn try_allocate(
    &mut self,
    size: usize,
  ) -> Result<Option<NonNull<u8>>> {
    self.init()?;

    if size == 0 {
      return Ok(None);
    }

    let adjusted = align::adjust_request(size).ok_or(AllocError::RequestTooLarge { size })?;

    let block = match self.find_fit(adjusted) {
      Some(block) => block,
      None => self.extend_heap(adjusted.max(self.config.chunk_size) / WSIZE)?,
    };

    unsafe {
      self.place(block, adjusted);
    }

    Ok(NonNull::new(block.payload()))
  }

  /// Allocates at least `size` bytes aligned to [`DSIZE`].
  ///
  /// Returns null for zero-sized requests and when the provider cannot
  /// grow the heap any further.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    match self.try_allocate(size) {
      Ok(Some(address)) => address.as_ptr(),
      Ok(None) => ptr::null_mut(),
      Err(err) => {
        warn!("allocation of {size} bytes failed: {err}");
        ptr::null_mut()
      }
    }
  }

  /// Releases a block and merges it with free neighbours.
  ///
  /// # Safety
  ///
  /// `address` must be null or a live pointer returned by this heap.
  pub unsafe fn free(
    &mut self,
    address: *mut u8,
  ) {
    if address.is_null() {
      return;
    }
    if let Err(err) = self.init() {
      warn!("free of {address:?} on a heap that failed to initialize: {err}");
      return;
    }

    let block = Block::from_payload(address);

    unsafe {
      #[cfg(feature = "validate")]
      self.validate_live(block);

      block.set(block.size(), false);
      self.coalesce(block);
    }
  }

  /// Moves a block's contents into a fresh block of `size` bytes.
  ///
  /// A zero `size` frees `address`; a null `address` allocates. When the
  /// new allocation fails the original block is left untouched and null is
  /// returned.
  ///
  /// # Safety
  ///
  /// `address` must be null or a live pointer returned by this heap.
  pub unsafe fn reallocate(
    &mut self,
    address: *mut u8,
    size: usize,
  ) -> *mut u8 {
    if size == 0 {
      unsafe { self.free(address) };
      return ptr::null_mut();
    }
    if address.is_null() {
      return self.allocate(size);
    }

    #[cfg(feature = "validate")]
    unsafe {
      self.validate_live(Block::from_payload(address));
    }

    let new_address = self.allocate(size);
    if new_address.is_null() {
      return ptr::null_mut();
    }

    unsafe {
      let count = size.min(self.usable_size(address));
      ptr::copy_nonoverlapping(address, new_address, count);
      self.free(address);
    }

    new_address
  }

  /// Payload bytes of a live block, which may exceed the requested size.
  ///
  /// # Safety
  ///
  /// `address` must be a live pointer returned by this heap.
  pub unsafe fn usable_size(
    &self,
    address: *mut u8,
  ) -> usize {
    unsafe { Block::from_payload(address).payload_size() }
  }

  #[cfg(feature = "validate")]
  unsafe fn validate_live(
    &self,
    block: Block,
  ) {
    let addr = block.addr();
    let start = self.heap_start as usize;
    let end = start + self.heap_size;

    assert!(addr % DSIZE == 0, "pointer {addr:#x} is not aligned to {DSIZE} bytes");
    assert!(
      addr >= start + SKELETON_SIZE && addr < end,
      "pointer {addr:#x} does not belong to this heap"
    );

    unsafe {
      let tag = block.tag();
      assert!(
        tag.size() >= MIN_BLOCK_SIZE && addr - WSIZE + tag.size() < end,
        "pointer {addr:#x} has a corrupted header"
      );
      assert_eq!(tag, block.footer_tag(), "pointer {addr:#x} has mismatched boundary tags");
      assert!(tag.is_allocated(), "pointer {addr:#x} is not allocated (double free?)");
    }
  }
}

//! Boundary-tag accessors.
//!
//! The heap is an implicit list of blocks. Each block is framed by a header
//! word and a footer word that both hold the block size and the allocated
//! bit, so neighbours are reachable in O(1) in either direction:
//!
//! ```text
//!            ┌────────┬──────────────────────────────┬────────┐
//!   ... prev │ header │           payload            │ footer │ next ...
//!            └────────┴──────────────────────────────┴────────┘
//!                     ▲
//!                     └── Block (payload address)
//! ```
//!
//! Every raw read or write of heap metadata goes through this module.

use std::ptr;

use crate::align::{DSIZE, WSIZE};

/// A packed `(size, allocated)` boundary tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tag(u32);

impl Tag {
  const ALLOCATED: u32 = 0x1;
  const SIZE_MASK: u32 = !0x7;

  /// Packs a size and an allocated flag. `size` must be a multiple of
  /// [`DSIZE`] and fit in a tag word.
  pub fn new(
    size: usize,
    allocated: bool,
  ) -> Self {
    debug_assert_eq!(size % DSIZE, 0, "block size {size} is not aligned");
    debug_assert!(u32::try_from(size).is_ok(), "block size {size} overflows a tag");
    Self(size as u32 | u32::from(allocated))
  }

  pub fn size(self) -> usize {
    (self.0 & Self::SIZE_MASK) as usize
  }

  pub fn is_allocated(self) -> bool {
    self.0 & Self::ALLOCATED != 0
  }

  /// Reads the tag stored at `addr`.
  ///
  /// # Safety
  ///
  /// `addr` must be valid for a 4-byte aligned read inside the heap.
  pub unsafe fn read(addr: *const u8) -> Self {
    unsafe { Self(ptr::read(addr.cast::<u32>())) }
  }

  /// Writes the tag to `addr`.
  ///
  /// # Safety
  ///
  /// `addr` must be valid for a 4-byte aligned write inside the heap.
  pub unsafe fn write(
    self,
    addr: *mut u8,
  ) {
    unsafe { ptr::write(addr.cast::<u32>(), self.0) }
  }
}

/// Handle to a block, identified by its payload address.
///
/// The handle is a plain address; all accessors are `unsafe` because they
/// trust the surrounding tags to be well formed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Block(*mut u8);

impl Block {
  pub const fn null() -> Self {
    Self(ptr::null_mut())
  }

  pub const fn from_payload(payload: *mut u8) -> Self {
    Self(payload)
  }

  pub fn is_null(self) -> bool {
    self.0.is_null()
  }

  pub fn payload(self) -> *mut u8 {
    self.0
  }

  pub fn addr(self) -> usize {
    self.0 as usize
  }

  /// # Safety
  ///
  /// The block must lie inside an initialized heap.
  pub unsafe fn header(self) -> *mut u8 {
    unsafe { self.0.sub(WSIZE) }
  }

  /// # Safety
  ///
  /// The block's header must be valid.
  pub unsafe fn footer(self) -> *mut u8 {
    unsafe { self.0.add(self.size()).sub(DSIZE) }
  }

  /// # Safety
  ///
  /// The block's header must be valid.
  pub unsafe fn tag(self) -> Tag {
    unsafe { Tag::read(self.header()) }
  }

  /// # Safety
  ///
  /// The block's footer must be valid.
  pub unsafe fn footer_tag(self) -> Tag {
    unsafe { Tag::read(self.footer()) }
  }

  /// Total block size, tags included.
  ///
  /// # Safety
  ///
  /// The block's header must be valid.
  pub unsafe fn size(self) -> usize {
    unsafe { self.tag().size() }
  }

  /// Payload bytes available to the caller.
  ///
  /// # Safety
  ///
  /// The block's header must be valid and the block must not be a sentinel.
  pub unsafe fn payload_size(self) -> usize {
    unsafe { self.size() - DSIZE }
  }

  /// # Safety
  ///
  /// The block's header must be valid.
  pub unsafe fn is_allocated(self) -> bool {
    unsafe { self.tag().is_allocated() }
  }

  /// The block that physically follows this one.
  ///
  /// # Safety
  ///
  /// The block's header must be valid and the block must not be the end
  /// sentinel.
  pub unsafe fn next(self) -> Self {
    unsafe { Self(self.0.add(self.size())) }
  }

  /// Footer tag of the block that physically precedes this one.
  ///
  /// # Safety
  ///
  /// The block must not be the start sentinel.
  pub unsafe fn prev_tag(self) -> Tag {
    unsafe { Tag::read(self.0.sub(DSIZE)) }
  }

  /// The block that physically precedes this one, found through its footer.
  ///
  /// # Safety
  ///
  /// The block must not be the start sentinel.
  pub unsafe fn prev(self) -> Self {
    unsafe { Self(self.0.sub(self.prev_tag().size())) }
  }

  /// Rewrites both header and footer.
  ///
  /// # Safety
  ///
  /// `size` bytes starting at the header must belong to the heap.
  pub unsafe fn set(
    self,
    size: usize,
    allocated: bool,
  ) {
    unsafe {
      let tag = Tag::new(size, allocated);
      tag.write(self.header());
      tag.write(self.0.add(size).sub(DSIZE));
    }
  }
}

//! Sources of raw heap memory.
//!
//! A [`MemoryProvider`] is the only way a heap gets bigger. It hands out
//! fresh bytes directly after everything it handed out before, and never
//! takes anything back.

use std::{
  alloc::{self, Layout},
  ptr::{self, NonNull},
};

use libc::{c_void, intptr_t, sbrk};
use log::warn;

use crate::{
  align,
  error::{AllocError, Result},
};

/// A monotonic `grow` primitive.
///
/// Implementations must guarantee that:
///
/// - the returned bytes directly follow all previously granted bytes
/// - the first grant starts on a [`DSIZE`](crate::align::DSIZE) boundary
/// - granted memory is never moved, shrunk or reused
/// - a failed call leaves the provider unchanged
pub trait MemoryProvider {
  /// Extends the managed region by `bytes` and returns the start of the
  /// newly granted bytes.
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>>;
}

impl<P: MemoryProvider + ?Sized> MemoryProvider for &mut P {
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>> {
    (**self).grow(bytes)
  }
}

/// The process data segment, grown with `sbrk(2)`.
///
/// Only one `Sbrk` should exist per process, and nothing else may move the
/// program break while it is in use. A grant that turns out not to be
/// contiguous with the previous one is undone and reported as
/// [`AllocError::NonContiguous`].
pub struct Sbrk {
  end: *mut u8,
}

impl Default for Sbrk {
  fn default() -> Self {
    Self::new()
  }
}

impl Sbrk {
  pub const fn new() -> Self {
    Self {
      end: ptr::null_mut(),
    }
  }

  /// Current program break, as reported by `sbrk(0)`.
  pub fn program_break() -> *mut u8 {
    unsafe { sbrk(0).cast() }
  }

  fn failed(address: *mut c_void) -> bool {
    address == usize::MAX as *mut c_void
  }
}

impl Sbrk {
  /// Grows through `brk`, a primitive with the contract of `sbrk(2)`: move
  /// the break by the given increment and return the old break, or
  /// `(void *) -1` on failure.
  fn grow_with<F>(
    &mut self,
    bytes: usize,
    mut brk: F,
  ) -> Result<NonNull<u8>>
  where
    F: FnMut(intptr_t) -> *mut c_void,
  {
    let out_of_memory = AllocError::OutOfMemory { requested: bytes };
    let increment = intptr_t::try_from(bytes).map_err(|_| out_of_memory.clone())?;

    if self.end.is_null() {
      let current = brk(0) as usize;
      let pad = align!(current) - current;
      if pad != 0 && Self::failed(brk(pad as intptr_t)) {
        return Err(out_of_memory);
      }
    }

    let address = brk(increment);
    if Self::failed(address) {
      return Err(out_of_memory);
    }

    let address = address.cast::<u8>();
    if !self.end.is_null() && address != self.end {
      if Self::failed(brk(-increment)) {
        warn!("could not roll back {bytes} bytes of non-contiguous growth at {address:?}");
      }
      return Err(AllocError::NonContiguous {
        expected: self.end as usize,
        actual: address as usize,
      });
    }

    self.end = address.wrapping_add(bytes);
    NonNull::new(address).ok_or(out_of_memory)
  }
}

impl MemoryProvider for Sbrk {
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>> {
    self.grow_with(bytes, |increment| unsafe { sbrk(increment) })
  }
}

/// A fixed-capacity buffer with a forward-only break.
///
/// Useful for running independent heaps side by side, and for bounding a
/// heap's growth.
pub struct Region {
  base: NonNull<u8>,
  capacity: usize,
  brk: usize,
}

impl Region {
  pub const ALIGN: usize = 16;

  /// Allocates a region able to grant up to `capacity` bytes in total.
  pub fn new(capacity: usize) -> Result<Self> {
    if capacity == 0 {
      return Err(AllocError::InvalidCapacity { capacity });
    }
    let layout = Layout::from_size_align(capacity, Self::ALIGN)
      .map_err(|_| AllocError::InvalidCapacity { capacity })?;

    let base = NonNull::new(unsafe { alloc::alloc(layout) })
      .ok_or(AllocError::OutOfMemory { requested: capacity })?;

    Ok(Self {
      base,
      capacity,
      brk: 0,
    })
  }

  pub fn base(&self) -> *mut u8 {
    self.base.as_ptr()
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Bytes granted so far.
  pub fn used(&self) -> usize {
    self.brk
  }

  pub fn remaining(&self) -> usize {
    self.capacity - self.brk
  }
}

impl MemoryProvider for Region {
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>> {
    if bytes > self.remaining() {
      return Err(AllocError::OutOfMemory { requested: bytes });
    }

    let address = unsafe { self.base.add(self.brk) };
    self.brk += bytes;

    Ok(address)
  }
}

impl Drop for Region {
  fn drop(&mut self) {
    unsafe {
      let layout = Layout::from_size_align_unchecked(self.capacity, Self::ALIGN);
      alloc::dealloc(self.base.as_ptr(), layout);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::align::DSIZE;

  #[test]
  fn test_region_grows_contiguously() {
    let mut region = Region::new(256).unwrap();
    assert_eq!(region.capacity(), 256);

    let first = region.grow(16).unwrap();
    let second = region.grow(64).unwrap();

    assert_eq!(first.as_ptr(), region.base());
    assert_eq!(first.as_ptr() as usize % DSIZE, 0);
    assert_eq!(second.as_ptr() as usize, first.as_ptr() as usize + 16);
    assert_eq!(region.used(), 80);
    assert_eq!(region.remaining(), 176);
  }

  #[test]
  fn test_region_exhaustion_has_no_side_effects() {
    let mut region = Region::new(64).unwrap();
    region.grow(48).unwrap();

    assert_eq!(region.grow(32), Err(AllocError::OutOfMemory { requested: 32 }));
    assert_eq!(region.used(), 48);

    let last = region.grow(16).unwrap();
    assert_eq!(last.as_ptr() as usize, region.base() as usize + 48);
    assert_eq!(region.remaining(), 0);
  }

  #[test]
  fn test_region_rejects_zero_capacity() {
    assert!(matches!(Region::new(0), Err(AllocError::InvalidCapacity { capacity: 0 })));
  }

  fn grant<P: MemoryProvider>(
    mut provider: P,
    bytes: usize,
  ) -> Result<NonNull<u8>> {
    provider.grow(bytes)
  }

  #[test]
  fn test_provider_by_reference() {
    let mut region = Region::new(64).unwrap();

    grant(&mut region, 32).unwrap();

    assert_eq!(region.used(), 32);
  }

  /// A program break over a test buffer.
  struct FakeBreak {
    base: *mut u8,
    offset: usize,
    capacity: usize,
    refuse_shrink: bool,
  }

  impl FakeBreak {
    fn new(buffer: &mut [u64]) -> Self {
      // Start four bytes past an 8-byte boundary.
      Self {
        base: buffer.as_mut_ptr().cast::<u8>().wrapping_add(4),
        offset: 0,
        capacity: size_of_val(buffer) - 4,
        refuse_shrink: false,
      }
    }

    fn current(&self) -> usize {
      self.base as usize + self.offset
    }

    fn sbrk(
      &mut self,
      increment: intptr_t,
    ) -> *mut c_void {
      let old = self.offset;
      let Some(new) = old.checked_add_signed(increment) else {
        return usize::MAX as *mut c_void;
      };
      if new > self.capacity || (increment < 0 && self.refuse_shrink) {
        return usize::MAX as *mut c_void;
      }
      self.offset = new;
      self.base.wrapping_add(old).cast()
    }
  }

  #[test]
  fn test_sbrk_pads_first_grant() {
    let mut buffer = [0u64; 64];
    let mut fake = FakeBreak::new(&mut buffer);
    let mut provider = Sbrk::new();

    let first = provider.grow_with(64, |increment| fake.sbrk(increment)).unwrap();
    let second = provider.grow_with(32, |increment| fake.sbrk(increment)).unwrap();

    assert_eq!(first.as_ptr() as usize % DSIZE, 0);
    assert_eq!(first.as_ptr() as usize, fake.base as usize + 4);
    assert_eq!(second.as_ptr() as usize, first.as_ptr() as usize + 64);
    assert_eq!(fake.current(), second.as_ptr() as usize + 32);
  }

  #[test]
  fn test_sbrk_refuses_non_contiguous_growth() {
    let mut buffer = [0u64; 64];
    let mut fake = FakeBreak::new(&mut buffer);
    let mut provider = Sbrk::new();

    let first = provider.grow_with(64, |increment| fake.sbrk(increment)).unwrap();
    // Someone else moves the break.
    fake.sbrk(24);
    let moved = fake.current();

    assert_eq!(
      provider.grow_with(32, |increment| fake.sbrk(increment)),
      Err(AllocError::NonContiguous {
        expected: first.as_ptr() as usize + 64,
        actual: moved,
      })
    );
    assert_eq!(fake.current(), moved);
  }

  #[test]
  fn test_sbrk_reports_failed_rollback() {
    let mut buffer = [0u64; 64];
    let mut fake = FakeBreak::new(&mut buffer);
    let mut provider = Sbrk::new();

    provider.grow_with(64, |increment| fake.sbrk(increment)).unwrap();
    fake.sbrk(24);
    fake.refuse_shrink = true;
    let moved = fake.current();

    assert!(matches!(
      provider.grow_with(32, |increment| fake.sbrk(increment)),
      Err(AllocError::NonContiguous { .. })
    ));
    assert_eq!(fake.current(), moved + 32);
  }

  #[test]
  fn test_sbrk_exhaustion_keeps_break() {
    let mut buffer = [0u64; 64];
    let mut fake = FakeBreak::new(&mut buffer);
    let mut provider = Sbrk::new();

    provider.grow_with(64, |increment| fake.sbrk(increment)).unwrap();
    let before = fake.current();

    assert_eq!(
      provider.grow_with(4096, |increment| fake.sbrk(increment)),
      Err(AllocError::OutOfMemory { requested: 4096 })
    );
    assert_eq!(fake.current(), before);
  }

  #[test]
  #[ignore = "moves the process break"]
  fn test_sbrk_grows_contiguously() {
    let mut provider = Sbrk::new();

    let first = provider.grow(64).unwrap();
    assert_eq!(first.as_ptr() as usize % DSIZE, 0);

    match provider.grow(64) {
      Ok(second) => assert_eq!(second.as_ptr() as usize, first.as_ptr() as usize + 64),
      Err(err) => assert!(matches!(err, AllocError::NonContiguous { .. })),
    }
  }
}

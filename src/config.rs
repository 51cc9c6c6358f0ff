use crate::{
  align::{DSIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE},
  error::{AllocError, Result},
};

/// Default number of bytes requested from the provider at a time.
pub const CHUNK_SIZE: usize = 1 << 12;

/// Growth parameters of a [`Heap`](crate::Heap).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapConfig {
  /// Bytes added by the growth performed during initialization.
  pub initial_size: usize,
  /// Minimum bytes added whenever an allocation finds no fit.
  pub chunk_size: usize,
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self::new()
  }
}

impl HeapConfig {
  pub const fn new() -> Self {
    Self {
      initial_size: CHUNK_SIZE,
      chunk_size: CHUNK_SIZE,
    }
  }

  #[must_use]
  pub const fn with_initial_size(
    mut self,
    initial_size: usize,
  ) -> Self {
    self.initial_size = initial_size;
    self
  }

  #[must_use]
  pub const fn with_chunk_size(
    mut self,
    chunk_size: usize,
  ) -> Self {
    self.chunk_size = chunk_size;
    self
  }

  pub fn validate(&self) -> Result<()> {
    check_size("initial_size", self.initial_size)?;
    check_size("chunk_size", self.chunk_size)
  }
}

fn check_size(
  field: &'static str,
  value: usize,
) -> Result<()> {
  if value % DSIZE != 0 || !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&value) {
    return Err(AllocError::InvalidConfig { field, value });
  }
  Ok(())
}

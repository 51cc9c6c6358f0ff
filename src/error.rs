use thiserror::Error;

/// Errors raised while growing or configuring a heap.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocError {
  #[error("out of memory (requested: {requested} bytes)")]
  OutOfMemory { requested: usize },

  #[error("provider returned {actual:#x}, expected contiguous growth at {expected:#x}")]
  NonContiguous { expected: usize, actual: usize },

  #[error("request of {size} bytes exceeds the largest encodable block")]
  RequestTooLarge { size: usize },

  #[error("invalid {field}: {value} (must be a multiple of 8 and at least 16)")]
  InvalidConfig { field: &'static str, value: usize },

  #[error("invalid region capacity: {capacity}")]
  InvalidCapacity { capacity: usize },
}

pub type Result<T> = std::result::Result<T, AllocError>;

//! Block size arithmetic.
//!
//! Every block size is a multiple of [`DSIZE`], the alignment unit, which is
//! two boundary-tag words wide.

use std::mem;

/// Size of one boundary-tag word (header or footer).
pub const WSIZE: usize = mem::size_of::<u32>();

/// Alignment unit: all block sizes and payload addresses are multiples of it.
pub const DSIZE: usize = 2 * WSIZE;

/// Smallest block: header, footer and one alignment unit of payload.
pub const MIN_BLOCK_SIZE: usize = 2 * DSIZE;

/// Largest block size a tag word can encode.
pub const MAX_BLOCK_SIZE: usize = (u32::MAX as usize) & !(DSIZE - 1);

/// Rounds the given byte count up to the alignment unit.
///
/// # Examples
///
/// ```rust
/// use nextfit::align;
/// use nextfit::align::DSIZE;
///
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(DSIZE), DSIZE);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::align::DSIZE - 1) & !($crate::align::DSIZE - 1)
  };
}

/// Converts a payload request into a block size.
///
/// The block size covers the header and footer, is rounded up to [`DSIZE`]
/// and is never below [`MIN_BLOCK_SIZE`]. Returns `None` when the result
/// overflows or cannot be encoded in a tag.
pub fn adjust_request(size: usize) -> Option<usize> {
  if size <= DSIZE {
    return Some(MIN_BLOCK_SIZE);
  }

  let adjusted = size.checked_add(2 * DSIZE - 1)? / DSIZE * DSIZE;

  (adjusted <= MAX_BLOCK_SIZE).then_some(adjusted)
}

/// Rounds a word count up to an even number of words and returns it in bytes.
pub fn words_to_bytes(words: usize) -> Option<usize> {
  let even = words.checked_add(words % 2)?;
  even.checked_mul(WSIZE)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_align() {
    let mut alignments = Vec::new();

    for i in 0..10 {
      let sizes = (DSIZE * i + 1)..=(DSIZE * (i + 1));

      let expected_alignment = DSIZE * (i + 1);

      alignments.push((sizes, expected_alignment));
    }

    for (sizes, expected) in alignments {
      for size in sizes {
        assert_eq!(expected, align!(size));
      }
    }
  }

  #[test]
  fn test_adjust_small_requests() {
    for size in 0..=DSIZE {
      assert_eq!(adjust_request(size), Some(MIN_BLOCK_SIZE));
    }
  }

  #[test]
  fn test_adjust_adds_overhead() {
    assert_eq!(adjust_request(9), Some(24));
    assert_eq!(adjust_request(16), Some(24));
    assert_eq!(adjust_request(17), Some(32));
    assert_eq!(adjust_request(32), Some(40));
    assert_eq!(adjust_request(56), Some(64));
    assert_eq!(adjust_request(100), Some(112));
  }

  #[test]
  fn test_adjust_rejects_huge_requests() {
    assert_eq!(adjust_request(usize::MAX), None);
    assert_eq!(adjust_request(MAX_BLOCK_SIZE), None);
    assert_eq!(adjust_request(MAX_BLOCK_SIZE - DSIZE), Some(MAX_BLOCK_SIZE));
  }

  #[test]
  fn test_words_to_bytes_rounds_to_even() {
    assert_eq!(words_to_bytes(0), Some(0));
    assert_eq!(words_to_bytes(1), Some(DSIZE));
    assert_eq!(words_to_bytes(2), Some(DSIZE));
    assert_eq!(words_to_bytes(1023), Some(4096));
    assert_eq!(words_to_bytes(1024), Some(4096));
    assert_eq!(words_to_bytes(usize::MAX), None);
  }
}

//! Contracts for moving binary payloads in and out of the store.
//!
//! Reads are two-phase: the engine first announces the payload size via
//! [`BlobSink::reserve`], then delivers the bytes with one or more
//! [`BlobSink::write_chunk`] calls. Writes pull the bytes from a
//! [`DataSource`]; the engine copies them into the statement before the
//! insert returns.

use crate::error::{Result, TileDocError};

/// Receives a payload read from the store.
///
/// `reserve` is called exactly once and advertises the total size; returning
/// `false` means "not interested" and suppresses all further calls. Every
/// subsequent `write_chunk` lies fully within the reserved size. Returning
/// `false` from `write_chunk` stops the delivery of further chunks.
pub trait BlobSink {
    fn reserve(&mut self, size: usize) -> Result<bool>;

    fn write_chunk(&mut self, offset: usize, data: &[u8]) -> Result<bool>;
}

/// Provides the payload bytes for an insert. The slice only has to stay
/// valid for the duration of the insert call.
pub trait DataSource {
    fn bytes(&self) -> &[u8];
}

impl DataSource for [u8] {
    fn bytes(&self) -> &[u8] {
        self
    }
}

impl DataSource for &[u8] {
    fn bytes(&self) -> &[u8] {
        self
    }
}

impl DataSource for Vec<u8> {
    fn bytes(&self) -> &[u8] {
        self.as_slice()
    }
}

impl<const N: usize> DataSource for [u8; N] {
    fn bytes(&self) -> &[u8] {
        self.as_slice()
    }
}

/// A [`BlobSink`] collecting the payload into a heap buffer it owns.
#[derive(Debug, Default)]
pub struct BlobBuffer {
    buffer: Vec<u8>,
    reserved: bool,
}

impl BlobBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `reserve` has been called, i.e. whether a read delivered
    /// (possibly zero bytes of) data.
    pub fn has_data(&self) -> bool {
        self.reserved
    }

    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_data(self) -> Vec<u8> {
        self.buffer
    }
}

impl BlobSink for BlobBuffer {
    fn reserve(&mut self, size: usize) -> Result<bool> {
        if self.reserved {
            return Err(TileDocError::LogicError(
                "the sink has already been reserved".to_string(),
            ));
        }

        self.buffer = vec![0; size];
        self.reserved = true;
        Ok(true)
    }

    fn write_chunk(&mut self, offset: usize, data: &[u8]) -> Result<bool> {
        if !self.reserved {
            return Err(TileDocError::LogicError(
                "'reserve' was not called before".to_string(),
            ));
        }

        let end = offset
            .checked_add(data.len())
            .filter(|end| *end <= self.buffer.len())
            .ok_or_else(|| {
                TileDocError::InvalidArgument(format!(
                    "chunk [{offset}, {offset}+{}) exceeds the reserved size {}",
                    data.len(),
                    self.buffer.len()
                ))
            })?;

        self.buffer[offset..end].copy_from_slice(data);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_chunks_into_reserved_buffer() {
        let mut sink = BlobBuffer::new();
        assert!(!sink.has_data());
        assert!(sink.reserve(6).unwrap());
        assert!(sink.write_chunk(0, b"abc").unwrap());
        assert!(sink.write_chunk(3, b"def").unwrap());
        assert!(sink.has_data());
        assert_eq!(sink.data(), b"abcdef");
    }

    #[test]
    fn zero_byte_reserve_is_valid() {
        let mut sink = BlobBuffer::new();
        assert!(sink.reserve(0).unwrap());
        assert!(sink.has_data());
        assert!(sink.data().is_empty());
    }

    #[test]
    fn double_reserve_is_a_logic_error() {
        let mut sink = BlobBuffer::new();
        sink.reserve(4).unwrap();
        assert!(matches!(
            sink.reserve(4),
            Err(TileDocError::LogicError(_))
        ));
    }

    #[test]
    fn write_before_reserve_is_a_logic_error() {
        let mut sink = BlobBuffer::new();
        assert!(matches!(
            sink.write_chunk(0, b"x"),
            Err(TileDocError::LogicError(_))
        ));
    }

    #[test]
    fn out_of_bounds_chunk_is_rejected() {
        let mut sink = BlobBuffer::new();
        sink.reserve(4).unwrap();
        assert!(matches!(
            sink.write_chunk(2, b"abc"),
            Err(TileDocError::InvalidArgument(_))
        ));
        assert!(matches!(
            sink.write_chunk(usize::MAX, b"a"),
            Err(TileDocError::InvalidArgument(_))
        ));
    }
}

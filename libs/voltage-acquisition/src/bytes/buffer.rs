//! Bounds-checked frame buffer
//!
//! Owned byte buffer with a write end (append) and a read cursor. Every
//! access is checked against the buffer length and its fixed capacity, so
//! frame packing and unpacking never index past the data.

use thiserror::Error;

/// Buffer access errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("buffer full: {needed} bytes needed, {available} available")]
    Overflow { needed: usize, available: usize },

    #[error("buffer underrun: {needed} bytes needed, {remaining} remaining")]
    Underrun { needed: usize, remaining: usize },
}

/// Byte buffer with a bounded write end and a read cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    data: Vec<u8>,
    capacity: usize,
    read_pos: usize,
}

impl FrameBuffer {
    /// Create an empty buffer holding at most `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            read_pos: 0,
        }
    }

    /// Wrap received bytes for reading
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec(),
            capacity: bytes.len(),
            read_pos: 0,
        }
    }

    fn reserve(&self, needed: usize) -> Result<(), BufferError> {
        let available = self.capacity - self.data.len();
        if needed > available {
            return Err(BufferError::Overflow { needed, available });
        }
        Ok(())
    }

    /// Push a single byte
    #[inline]
    pub fn push_u8(&mut self, byte: u8) -> Result<(), BufferError> {
        self.reserve(1)?;
        self.data.push(byte);
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> Result<(), BufferError> {
        self.reserve(2)?;
        self.data.extend_from_slice(&value.to_be_bytes());
        Ok(())
    }

    /// Push u16 in little-endian (RTU checksum trailer)
    #[inline]
    pub fn push_u16_le(&mut self, value: u16) -> Result<(), BufferError> {
        self.reserve(2)?;
        self.data.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Extend with a byte slice
    #[inline]
    pub fn extend(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        self.reserve(bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Overwrite a big-endian u16 at an absolute offset (length fields)
    pub fn patch_u16(&mut self, offset: usize, value: u16) -> Result<(), BufferError> {
        if offset + 2 > self.data.len() {
            return Err(BufferError::Underrun {
                needed: offset + 2,
                remaining: self.data.len(),
            });
        }
        self.data[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    /// Read a single byte and advance
    pub fn read_u8(&mut self) -> Result<u8, BufferError> {
        let bytes = self.read_slice(1)?;
        Ok(bytes[0])
    }

    /// Read a big-endian u16 and advance
    pub fn read_u16(&mut self) -> Result<u16, BufferError> {
        let bytes = self.read_slice(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Read `len` bytes and advance
    pub fn read_slice(&mut self, len: usize) -> Result<&[u8], BufferError> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(BufferError::Underrun {
                needed: len,
                remaining,
            });
        }
        let start = self.read_pos;
        self.read_pos += len;
        Ok(&self.data[start..start + len])
    }

    /// Bytes not yet consumed by the read cursor
    pub fn remaining(&self) -> usize {
        self.data.len() - self.read_pos
    }

    /// Get immutable data slice
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Get current length
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consume into the underlying bytes
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

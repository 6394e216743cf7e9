//! Little-endian cursor over cell payloads, and the matching writer
//!
//! The layout interleaves LEB128 varints with fixed-width arrays that must start on an
//! aligned offset, so both sides track an absolute position and expose `align`.
//! Every read checks the remaining length and fails with [`CacheError::Truncated`].

use crate::{CacheError, Result};

/// Forward-only reader over an immutable byte buffer
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    data: &'a [u8],
    position: usize,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Current offset from the start of the buffer
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.data.len()
    }

    #[inline]
    fn take(&mut self, needed: usize) -> Result<&'a [u8]> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(CacheError::Truncated {
                offset: self.position,
                needed,
                remaining,
            });
        }
        let bytes = &self.data[self.position..self.position + needed];
        self.position += needed;
        Ok(bytes)
    }

    #[inline]
    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    /// Round the position up to the next multiple of `alignment`
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        if alignment > 1 {
            let padding = (alignment - self.position % alignment) % alignment;
            self.take(padding)?;
        }
        Ok(())
    }

    /// Advance without interpreting the bytes
    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.take(count).map(|_| ())
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    /// Read an unsigned LEB128 varint of at most 5 bytes
    pub fn read_varint32(&mut self) -> Result<u32> {
        let start = self.position;
        let mut value = 0u32;
        for shift in (0..35).step_by(7) {
            let [byte] = self.take_array::<1>()?;
            // The last byte may only carry the remaining high bits
            if shift == 28 && byte > 0x0f {
                break;
            }
            value |= ((byte & 0x7f) as u32) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CacheError::VarintOverflow { offset: start })
    }

    /// Read an unsigned LEB128 varint of at most 10 bytes
    pub fn read_varint64(&mut self) -> Result<u64> {
        let start = self.position;
        let mut value = 0u64;
        for shift in (0..70).step_by(7) {
            let [byte] = self.take_array::<1>()?;
            // The last byte may only carry the remaining high bits
            if shift == 63 && byte > 0x01 {
                break;
            }
            value |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CacheError::VarintOverflow { offset: start })
    }

    /// Read a varint count and widen it for use as a length
    pub fn read_count(&mut self) -> Result<usize> {
        self.read_varint32().map(|count| count as usize)
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        self.take(count)
    }

    pub fn read_f32_array(&mut self, count: usize) -> Result<Vec<f32>> {
        let bytes = self.take(byte_len(self.position, count, 4)?)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }

    pub fn read_i64_array(&mut self, count: usize) -> Result<Vec<i64>> {
        let bytes = self.take(byte_len(self.position, count, 8)?)?;
        Ok(bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut array = [0u8; 8];
                array.copy_from_slice(chunk);
                i64::from_le_bytes(array)
            })
            .collect())
    }
}

/// Byte width of `count` elements, reported as truncation when it cannot even be addressed
fn byte_len(offset: usize, count: usize, width: usize) -> Result<usize> {
    count.checked_mul(width).ok_or(CacheError::Truncated {
        offset,
        needed: usize::MAX,
        remaining: 0,
    })
}

/// Append-only little-endian buffer producing the layout [`WireReader`] consumes
#[derive(Debug, Default, Clone)]
pub struct WireWriter {
    buffer: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Pad with zeros up to the next multiple of `alignment`
    pub fn align(&mut self, alignment: usize) {
        if alignment > 1 {
            let padding = (alignment - self.buffer.len() % alignment) % alignment;
            self.buffer.resize(self.buffer.len() + padding, 0);
        }
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_varint32(&mut self, value: u32) {
        self.write_varint64(value as u64);
    }

    pub fn write_varint64(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buffer.push((value as u8 & 0x7f) | 0x80);
            value >>= 7;
        }
        self.buffer.push(value as u8);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn write_f32_array(&mut self, values: &[f32]) {
        for value in values {
            self.write_f32(*value);
        }
    }

    pub fn write_i64_array(&mut self, values: &[i64]) {
        for value in values {
            self.write_i64(*value);
        }
    }
}

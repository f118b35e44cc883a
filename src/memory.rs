//! Flat byte-addressable memory used by `load`, `store`, `put` and `print s`

use std::fmt;
use thiserror::Error;

pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum MemoryError {
    #[error("invalid access width {0}, expected 1, 2, 4 or 8")]
    InvalidWidth(usize),
    #[error("access of {width} byte(s) at offset {offset} exceeds capacity {capacity}")]
    OutOfBounds {
        offset: usize,
        width: usize,
        capacity: usize,
    },
}

/// Fixed capacity, zero-initialized byte buffer. Values are little-endian.
#[derive(Debug, Clone)]
pub struct Memory {
    bytes: Vec<u8>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Memory {
            bytes: vec![0; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Read `width` bytes at `offset` and zero-extend them.
    pub fn load(&self, offset: usize, width: usize) -> Result<u64, MemoryError> {
        let range = self.check(offset, width)?;
        let mut raw = [0u8; 8];
        raw[..width].copy_from_slice(&self.bytes[range]);
        Ok(u64::from_le_bytes(raw))
    }

    /// Write the low-order `width` bytes of `value` at `offset`. Nothing is written on failure.
    pub fn store(&mut self, offset: usize, width: usize, value: u64) -> Result<(), MemoryError> {
        let range = self.check(offset, width)?;
        self.bytes[range].copy_from_slice(&value.to_le_bytes()[..width]);
        Ok(())
    }

    pub fn load_byte(&self, offset: usize) -> Result<u8, MemoryError> {
        self.load(offset, 1).map(|byte| byte as u8)
    }

    pub fn store_byte(&mut self, offset: usize, byte: u8) -> Result<(), MemoryError> {
        self.store(offset, 1, byte as u64)
    }

    fn check(&self, offset: usize, width: usize) -> Result<std::ops::Range<usize>, MemoryError> {
        if !matches!(width, 1 | 2 | 4 | 8) {
            return Err(MemoryError::InvalidWidth(width));
        }

        match offset.checked_add(width) {
            Some(end) if end <= self.capacity() => Ok(offset..end),
            _ => Err(MemoryError::OutOfBounds {
                offset,
                width,
                capacity: self.capacity(),
            }),
        }
    }
}

/// Dump of the smallest 16-byte aligned span that covers every nonzero byte.
impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Memory state:")?;

        let (first, last) = match (
            self.bytes.iter().position(|&b| b != 0),
            self.bytes.iter().rposition(|&b| b != 0),
        ) {
            (Some(first), Some(last)) => (first, last),
            _ => return writeln!(f, "Unmodified"),
        };

        let mut addr_width = 1;
        let mut rest = self.capacity().saturating_sub(1) >> 4;
        while rest > 0 {
            addr_width += 1;
            rest >>= 4;
        }

        let start = first & !0xF;
        let end = ((last + 16) & !0xF).min(self.capacity());

        writeln!(
            f,
            "0x{:0w$x}-0x{:0w$x}:",
            start,
            end - 1,
            w = addr_width
        )?;

        for row in (start..end).step_by(16) {
            write!(f, "    0x{:0w$x}: ", row, w = addr_width)?;
            let row_end = (row + 16).min(end);
            for (k, byte) in self.bytes[row..row_end].iter().enumerate() {
                write!(f, "{:02x}", byte)?;
                if (k + 1) % 4 == 0 {
                    write!(f, " ")?;
                }
            }
            writeln!(f)?;
        }

        Ok(())
    }
}

//! Page geometry of the device and the page-boundary splitter.
//!
//! The M95 array is organised in pages. A single WRITE instruction latches
//! data into one page only: once the internal address counter reaches the end
//! of the page it wraps to the start of that same page, overwriting whatever
//! was there. Every write is therefore cut into chunks that never cross a page
//! boundary.

use crate::error::RangeError;

/// Widest page supported by the driver (M95M04).
pub const MAX_PAGE_WIDTH: u16 = 512;

/// Addresses go out as 24 bits.
const ADDRESS_SPACE: u32 = 1 << 24;

/// Static layout of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Geometry {
    page_width: u16,
    page_count: u32,
    device_size: u32,
}

impl Geometry {
    /// M95M04: 4 Mbit, 512-byte pages.
    pub const M95M04: Geometry = Geometry {
        page_width: 512,
        page_count: 1024,
        device_size: 512 * 1024,
    };

    /// M95M01: 1 Mbit, 256-byte pages.
    pub const M95M01: Geometry = Geometry {
        page_width: 256,
        page_count: 512,
        device_size: 256 * 512,
    };

    /// Describe a device of `page_count` pages of `page_width` bytes.
    ///
    /// Returns `None` for an empty device, a page wider than
    /// [`MAX_PAGE_WIDTH`] or a device that does not fit in 24-bit addressing.
    pub const fn new(page_width: u16, page_count: u32) -> Option<Self> {
        if page_width == 0 || page_width > MAX_PAGE_WIDTH || page_count == 0 {
            return None;
        }
        let device_size = match (page_width as u32).checked_mul(page_count) {
            Some(size) if size <= ADDRESS_SPACE => size,
            _ => return None,
        };
        Some(Self {
            page_width,
            page_count,
            device_size,
        })
    }

    pub const fn page_width(&self) -> u16 {
        self.page_width
    }

    pub const fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Total size in bytes.
    pub const fn device_size(&self) -> u32 {
        self.device_size
    }

    /// Number of bytes that fit between `address` and the end of its page.
    pub const fn bytes_to_page_end(&self, address: u32) -> u32 {
        let width = self.page_width as u32;
        width - (address % width)
    }

    /// Check that `[address, address + length)` is a non-empty range inside
    /// the device.
    pub fn check_range(&self, address: u32, length: usize) -> Result<u32, RangeError> {
        if length == 0 {
            return Err(RangeError::ZeroLength);
        }
        let length = u32::try_from(length).map_err(|_| RangeError::OutOfBounds)?;
        match address.checked_add(length) {
            Some(end) if end <= self.device_size => Ok(length),
            _ => Err(RangeError::OutOfBounds),
        }
    }

    /// Split a request into page-bounded chunks.
    ///
    /// ```
    /// # use m95_eeprom::{Chunk, Geometry};
    /// let plan = Geometry::M95M04.chunks(500, 1000).unwrap();
    /// let chunks: Vec<Chunk> = plan.collect();
    /// assert_eq!(
    ///     chunks,
    ///     [
    ///         Chunk { address: 500, length: 12 },
    ///         Chunk { address: 512, length: 512 },
    ///         Chunk { address: 1024, length: 476 },
    ///     ]
    /// );
    /// ```
    pub fn chunks(&self, address: u32, length: usize) -> Result<ChunkPlan, RangeError> {
        let remaining = self.check_range(address, length)?;
        Ok(ChunkPlan {
            page_width: self.page_width,
            address,
            remaining,
        })
    }

    /// Chunks covering the whole device, one full page each.
    pub fn pages(&self) -> ChunkPlan {
        ChunkPlan {
            page_width: self.page_width,
            address: 0,
            remaining: self.device_size,
        }
    }
}

/// One page-bounded sub-write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Chunk {
    pub address: u32,
    pub length: u16,
}

impl Chunk {
    pub const fn len(&self) -> usize {
        self.length as usize
    }

    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub const fn end(&self) -> u32 {
        self.address + self.length as u32
    }
}

/// Lazily yields the chunks of a request in address order.
///
/// Only the cursor is stored, so a plan can be parked between timer ticks and
/// resumed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    page_width: u16,
    address: u32,
    remaining: u32,
}

impl ChunkPlan {
    /// Address of the next chunk.
    pub const fn address(&self) -> u32 {
        self.address
    }

    /// Bytes not yet handed out.
    pub const fn remaining(&self) -> u32 {
        self.remaining
    }

    pub const fn is_finished(&self) -> bool {
        self.remaining == 0
    }
}

impl Iterator for ChunkPlan {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.remaining == 0 {
            return None;
        }
        let width = self.page_width as u32;
        let room = width - (self.address % width);
        let length = room.min(self.remaining);
        let chunk = Chunk {
            address: self.address,
            length: length as u16,
        };
        self.address += length;
        self.remaining -= length;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.remaining == 0 {
            return (0, Some(0));
        }
        let width = self.page_width as u32;
        let first = (width - (self.address % width)).min(self.remaining);
        let rest = self.remaining - first;
        let count = 1 + rest.div_ceil(width) as usize;
        (count, Some(count))
    }
}

impl ExactSizeIterator for ChunkPlan {}

// SPDX-License-Identifier: GPL-3.0-only
//! Chunked transactions and I2C address encoding
//!
//! Vendor entry points move a small, fixed number of bytes per call. The
//! helpers here split a longer request into consecutive chunks, call a
//! single-chunk primitive for each one and stitch the results together.
//! The first failing chunk aborts the whole request; nothing written by
//! earlier chunks is rolled back.

use std::ops::Range;

use crate::error::{Error, Result, TransportFault};

/// Maximum AUX payload of a native DPCD transaction
pub const DP_AUX_MAX_PAYLOAD: u32 = 16;

/// One slice of a chunked transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Device address of the first byte in this chunk
    pub address: u32,
    /// Position of this chunk inside the caller's buffer
    pub range: Range<usize>,
    /// Whether this is the final chunk of the request
    pub last: bool,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Iterator over the chunks of a request
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    address: u32,
    offset: usize,
    total: usize,
    max: usize,
}

impl ChunkPlan {
    /// Plan `total` bytes starting at `address`, at most `max` bytes per chunk
    ///
    /// Fails if the last byte would lie beyond `u32::MAX`.
    pub fn new(address: u32, total: usize, max: u32) -> Result<Self> {
        debug_assert!(max > 0, "chunk size must be non-zero");
        if total > 0 {
            let span = u32::try_from(total - 1)
                .map_err(|_| Error::AddressOverflow { address, len: total })?;
            address
                .checked_add(span)
                .ok_or(Error::AddressOverflow { address, len: total })?;
        }
        Ok(Self {
            address,
            offset: 0,
            total,
            max: max.max(1) as usize,
        })
    }

    /// Number of native calls the plan will issue
    pub fn chunk_count(&self) -> usize {
        self.total.div_ceil(self.max)
    }
}

impl Iterator for ChunkPlan {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.offset >= self.total {
            return None;
        }
        let size = (self.total - self.offset).min(self.max);
        let chunk = Chunk {
            address: self.address,
            range: self.offset..self.offset + size,
            last: self.offset + size == self.total,
        };
        self.offset += size;
        // Cannot overflow, checked in `new`; wraps only after the final chunk.
        self.address = self.address.wrapping_add(size as u32);
        Some(chunk)
    }
}

/// Read `length` bytes through a single-chunk primitive
///
/// `read_chunk` must return exactly `chunk.len()` bytes.
pub fn read_chunked<F>(
    backend: &'static str,
    op: &'static str,
    address: u32,
    length: u32,
    max: u32,
    mut read_chunk: F,
) -> Result<Vec<u8>>
where
    F: FnMut(&Chunk) -> Result<Vec<u8>>,
{
    let plan = ChunkPlan::new(address, length as usize, max)?;
    let mut result = Vec::with_capacity(length as usize);
    for chunk in plan {
        let data = read_chunk(&chunk)?;
        if data.len() != chunk.len() {
            return Err(Error::transport(
                backend,
                op,
                TransportFault::ShortTransfer {
                    expected: chunk.len(),
                    actual: data.len(),
                },
            ));
        }
        result.extend_from_slice(&data);
    }
    Ok(result)
}

/// Write `data` through a single-chunk primitive
pub fn write_chunked<F>(address: u32, data: &[u8], max: u32, mut write_chunk: F) -> Result<()>
where
    F: FnMut(&Chunk, &[u8]) -> Result<()>,
{
    for chunk in ChunkPlan::new(address, data.len(), max)? {
        write_chunk(&chunk, &data[chunk.range.clone()])?;
    }
    Ok(())
}

/// Reject a zero-length DPCD read
#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) fn require_dpcd_length(length: u32) -> Result<()> {
    if length == 0 {
        return Err(Error::InvalidLength {
            op: "dpcd read",
            len: 0,
            max: u32::MAX as usize,
        });
    }
    Ok(())
}

/// I2C target packed into a single 32-bit address
///
/// The 7-bit slave address sits in the low bits, the register offset starts
/// at bit 8. `0x1A50` addresses register `0x1A` on slave `0x50`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct I2cAddress {
    pub slave: u8,
    pub register: u32,
}

impl I2cAddress {
    pub fn decode(address: u32) -> Self {
        Self {
            slave: (address & 0x7F) as u8,
            register: address >> 8,
        }
    }

    pub fn encode(self) -> u32 {
        u32::from(self.slave & 0x7F) | (self.register << 8)
    }

    /// 8-bit bus address (slave shifted left, R/W bit clear)
    pub fn bus_address(self) -> u32 {
        u32::from(self.slave) << 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn test_chunk_count_and_sizes() {
        for max in [1u32, 3, 16, 128] {
            for len in 0..300usize {
                let plan = ChunkPlan::new(0x100, len, max).unwrap();
                let expected = len.div_ceil(max as usize);
                assert_eq!(plan.chunk_count(), expected);

                let chunks: Vec<_> = plan.collect();
                assert_eq!(chunks.len(), expected, "len {len} max {max}");

                let mut address = 0x100u32;
                for (i, chunk) in chunks.iter().enumerate() {
                    assert!(chunk.len() <= max as usize);
                    assert!(!chunk.is_empty());
                    assert_eq!(chunk.address, address);
                    assert_eq!(chunk.last, i + 1 == chunks.len());
                    address += chunk.len() as u32;
                }
            }
        }
    }

    #[test]
    fn test_read_chunked_reassembles_reference() {
        let device = reference(1024);
        for len in [1u32, 15, 16, 17, 33, 100] {
            let mut calls = Vec::new();
            let data = read_chunked("test", "read", 5, len, 16, |chunk| {
                calls.push((chunk.address, chunk.len()));
                let start = chunk.address as usize;
                Ok(device[start..start + chunk.len()].to_vec())
            })
            .unwrap();

            assert_eq!(data, device[5..5 + len as usize]);
            assert_eq!(calls.len(), (len as usize).div_ceil(16));
            // Offsets strictly increase by the previous chunk's size
            for pair in calls.windows(2) {
                assert_eq!(pair[1].0, pair[0].0 + pair[0].1 as u32);
            }
        }
    }

    #[test]
    fn test_read_chunked_aborts_on_failure() {
        let mut calls = 0;
        let err = read_chunked("test", "read", 0, 64, 16, |chunk| {
            calls += 1;
            if chunk.address == 32 {
                Err(Error::transport("test", "read", TransportFault::AuxTimeout))
            } else {
                Ok(vec![0; chunk.len()])
            }
        })
        .unwrap_err();

        assert_eq!(calls, 3);
        assert!(matches!(
            err,
            Error::Transport {
                fault: TransportFault::AuxTimeout,
                ..
            }
        ));
    }

    #[test]
    fn test_read_chunked_rejects_short_chunk() {
        let err = read_chunked("test", "read", 0, 20, 16, |chunk| Ok(vec![0; chunk.len() - 1]))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport {
                fault: TransportFault::ShortTransfer {
                    expected: 16,
                    actual: 15
                },
                ..
            }
        ));
    }

    #[test]
    fn test_write_chunked_preserves_order() {
        let data = reference(40);
        let mut written = Vec::new();
        let mut addresses = Vec::new();
        write_chunked(0x200, &data, 16, |chunk, bytes| {
            assert_eq!(bytes.len(), chunk.len());
            addresses.push(chunk.address);
            written.extend_from_slice(bytes);
            Ok(())
        })
        .unwrap();

        assert_eq!(written, data);
        assert_eq!(addresses, vec![0x200, 0x210, 0x220]);
    }

    #[test]
    fn test_write_chunked_stops_at_first_failure() {
        let mut seen = Vec::new();
        let result = write_chunked(0, &[0u8; 48], 16, |chunk, _| {
            seen.push(chunk.address);
            if chunk.address == 16 {
                return Err(Error::NotImplemented);
            }
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(seen, vec![0, 16]);
    }

    #[test]
    fn test_address_overflow_rejected() {
        assert!(ChunkPlan::new(u32::MAX, 1, 16).is_ok());
        assert!(matches!(
            ChunkPlan::new(u32::MAX, 2, 16),
            Err(Error::AddressOverflow { .. })
        ));
        assert!(ChunkPlan::new(u32::MAX, 0, 16).is_ok());
    }

    #[test]
    fn test_zero_length_dpcd_rejected() {
        assert!(matches!(
            require_dpcd_length(0),
            Err(Error::InvalidLength { len: 0, .. })
        ));
        assert!(require_dpcd_length(1).is_ok());
    }

    #[test]
    fn test_i2c_address_decode() {
        let addr = I2cAddress::decode(0x50 | (0x1A << 8));
        assert_eq!(addr.slave, 0x50);
        assert_eq!(addr.register, 0x1A);
        assert_eq!(addr.encode(), 0x1A50);
        assert_eq!(addr.bus_address(), 0xA0);

        // Bit 7 is not part of the slave address
        assert_eq!(I2cAddress::decode(0xD0).slave, 0x50);
    }
}

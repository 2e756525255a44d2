// SPDX-License-Identifier: GPL-3.0-only
//! Test doubles

use std::sync::{Arc, Mutex};

use crate::driver::{Driver, SharedDriver};
use crate::error::{Error, Result};
use crate::transaction::{read_chunked, require_dpcd_length, write_chunked, I2cAddress};

/// In-memory driver that records the size of every simulated native call
#[derive(Debug)]
pub struct MockDriver {
    name: String,
    max_chunk: u32,
    state: Mutex<MockState>,
}

#[derive(Debug)]
struct MockState {
    dpcd: Vec<u8>,
    calls: Vec<(u32, usize)>,
    closed: bool,
    releases: usize,
}

impl MockDriver {
    pub fn new(name: &str, max_chunk: u32) -> Self {
        Self {
            name: name.to_string(),
            max_chunk,
            state: Mutex::new(MockState {
                dpcd: (0..0x1000u32).map(|i| (i % 251) as u8).collect(),
                calls: Vec::new(),
                closed: false,
                releases: 0,
            }),
        }
    }

    pub fn shared(name: &str, max_chunk: u32) -> SharedDriver {
        Arc::new(Self::new(name, max_chunk))
    }

    pub fn calls(&self) -> Vec<(u32, usize)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn releases(&self) -> usize {
        self.state.lock().unwrap().releases
    }
}

impl Driver for MockDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_dpcd(&self, address: u32, length: u32) -> Result<Vec<u8>> {
        require_dpcd_length(length)?;
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(Error::SessionClosed("mock"));
        }
        read_chunked("mock", "ReadDPCD", address, length, self.max_chunk, |chunk| {
            state.calls.push((chunk.address, chunk.len()));
            let start = chunk.address as usize;
            Ok(state.dpcd[start..start + chunk.len()].to_vec())
        })
    }

    fn write_dpcd(&self, address: u32, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(Error::SessionClosed("mock"));
        }
        write_chunked(address, data, self.max_chunk, |chunk, bytes| {
            state.calls.push((chunk.address, chunk.len()));
            let start = chunk.address as usize;
            state.dpcd[start..start + bytes.len()].copy_from_slice(bytes);
            Ok(())
        })
    }

    fn read_i2c(&self, address: u32, length: u32) -> Result<Vec<u8>> {
        let target = I2cAddress::decode(address);
        Ok(vec![target.slave; length as usize])
    }

    fn write_i2c(&self, _address: u32, _data: &[u8]) -> Result<()> {
        Err(Error::NotImplemented)
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if !state.closed {
            state.closed = true;
            state.releases += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_issues_bounded_calls_in_order() {
        let driver = MockDriver::new("mock", 16);
        let data = driver.read_dpcd(0x100, 40).unwrap();

        assert_eq!(data.len(), 40);
        assert_eq!(data[0], (0x100 % 251) as u8);
        assert_eq!(driver.calls(), vec![(0x100, 16), (0x110, 16), (0x120, 8)]);
    }

    #[test]
    fn test_write_then_read_back() {
        let driver = MockDriver::new("mock", 16);
        let payload: Vec<u8> = (0..20).collect();
        driver.write_dpcd(0x200, &payload).unwrap();
        assert_eq!(driver.read_dpcd(0x200, 20).unwrap(), payload);
    }

    #[test]
    fn test_zero_length_policy() {
        let driver = MockDriver::new("mock", 16);
        assert!(matches!(
            driver.read_dpcd(0, 0),
            Err(Error::InvalidLength { .. })
        ));
        assert!(driver.read_i2c(0x1A50, 0).unwrap().is_empty());
        assert!(driver.write_dpcd(0, &[]).is_ok());
        assert!(driver.calls().is_empty());
    }
}

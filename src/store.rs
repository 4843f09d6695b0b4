//! Server-side process image
//!
//! [`DataStore`] holds the four Modbus address spaces as fixed-extent arrays,
//! each behind its own reader/writer lock. A read returns a consistent
//! snapshot of the requested range and a multi-cell write becomes visible
//! all-or-nothing; operations on different regions do not contend.
//!
//! Out-of-range access yields [`ExceptionCode::IllegalDataAddress`] so the
//! dispatcher can answer with an in-band exception instead of dropping the
//! connection. Every cell starts at `false`/`0`.

use std::ops::Range;
use std::sync::RwLock;

use crate::constants::DEFAULT_STORE_SIZE;
use crate::protocol::ExceptionCode;

/// Thread-safe store for coils, discrete inputs, holding and input registers
#[derive(Debug)]
pub struct DataStore {
    coils: RwLock<Vec<bool>>,
    discrete_inputs: RwLock<Vec<bool>>,
    holding_registers: RwLock<Vec<u16>>,
    input_registers: RwLock<Vec<u16>>,
}

impl DataStore {
    /// Create a store covering the full 16-bit address space in every region
    pub fn new() -> Self {
        Self::with_sizes(
            DEFAULT_STORE_SIZE,
            DEFAULT_STORE_SIZE,
            DEFAULT_STORE_SIZE,
            DEFAULT_STORE_SIZE,
        )
    }

    /// Create a store with an explicit extent per region
    pub fn with_sizes(
        coils: usize,
        discrete_inputs: usize,
        holding_registers: usize,
        input_registers: usize,
    ) -> Self {
        Self {
            coils: RwLock::new(vec![false; coils]),
            discrete_inputs: RwLock::new(vec![false; discrete_inputs]),
            holding_registers: RwLock::new(vec![0; holding_registers]),
            input_registers: RwLock::new(vec![0; input_registers]),
        }
    }

    fn range(extent: usize, address: u16, count: usize) -> Result<Range<usize>, ExceptionCode> {
        let start = address as usize;
        let end = start
            .checked_add(count)
            .ok_or(ExceptionCode::IllegalDataAddress)?;
        if end > extent {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        Ok(start..end)
    }

    fn read_bits(
        region: &RwLock<Vec<bool>>,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, ExceptionCode> {
        let bits = region
            .read()
            .map_err(|_| ExceptionCode::ServerDeviceFailure)?;
        let range = Self::range(bits.len(), address, count as usize)?;
        Ok(bits[range].to_vec())
    }

    fn read_words(
        region: &RwLock<Vec<u16>>,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ExceptionCode> {
        let words = region
            .read()
            .map_err(|_| ExceptionCode::ServerDeviceFailure)?;
        let range = Self::range(words.len(), address, count as usize)?;
        Ok(words[range].to_vec())
    }

    fn write_bits(
        region: &RwLock<Vec<bool>>,
        address: u16,
        values: &[bool],
    ) -> Result<(), ExceptionCode> {
        let mut bits = region
            .write()
            .map_err(|_| ExceptionCode::ServerDeviceFailure)?;
        let range = Self::range(bits.len(), address, values.len())?;
        bits[range].copy_from_slice(values);
        Ok(())
    }

    fn write_words(
        region: &RwLock<Vec<u16>>,
        address: u16,
        values: &[u16],
    ) -> Result<(), ExceptionCode> {
        let mut words = region
            .write()
            .map_err(|_| ExceptionCode::ServerDeviceFailure)?;
        let range = Self::range(words.len(), address, values.len())?;
        words[range].copy_from_slice(values);
        Ok(())
    }

    /// Read coil states (FC01)
    pub fn read_coils(&self, address: u16, count: u16) -> Result<Vec<bool>, ExceptionCode> {
        Self::read_bits(&self.coils, address, count)
    }

    /// Read discrete input states (FC02)
    pub fn read_discrete_inputs(
        &self,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, ExceptionCode> {
        Self::read_bits(&self.discrete_inputs, address, count)
    }

    /// Read holding registers (FC03)
    pub fn read_holding_registers(
        &self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ExceptionCode> {
        Self::read_words(&self.holding_registers, address, count)
    }

    /// Read input registers (FC04)
    pub fn read_input_registers(
        &self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ExceptionCode> {
        Self::read_words(&self.input_registers, address, count)
    }

    /// Write coils (FC05/FC15); all-or-nothing
    pub fn write_coils(&self, address: u16, values: &[bool]) -> Result<(), ExceptionCode> {
        Self::write_bits(&self.coils, address, values)
    }

    /// Write holding registers (FC06/FC16); all-or-nothing
    pub fn write_holding_registers(
        &self,
        address: u16,
        values: &[u16],
    ) -> Result<(), ExceptionCode> {
        Self::write_words(&self.holding_registers, address, values)
    }

    /// Server-local update of discrete inputs, which are read-only over the wire
    pub fn set_discrete_inputs(&self, address: u16, values: &[bool]) -> Result<(), ExceptionCode> {
        Self::write_bits(&self.discrete_inputs, address, values)
    }

    /// Server-local update of input registers, which are read-only over the wire
    pub fn set_input_registers(&self, address: u16, values: &[u16]) -> Result<(), ExceptionCode> {
        Self::write_words(&self.input_registers, address, values)
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_initial_state() {
        let store = DataStore::new();
        assert_eq!(store.read_coils(0, 4).unwrap(), vec![false; 4]);
        assert_eq!(store.read_discrete_inputs(100, 1).unwrap(), vec![false]);
        assert_eq!(store.read_holding_registers(0xFFFF, 1).unwrap(), vec![0]);
        assert_eq!(store.read_input_registers(0, 8).unwrap(), vec![0; 8]);
    }

    #[test]
    fn test_write_then_read() {
        let store = DataStore::new();

        store.write_coils(10, &[true, false, true]).unwrap();
        assert_eq!(store.read_coils(10, 3).unwrap(), vec![true, false, true]);

        store.write_holding_registers(0, &[0xFFFF, 7]).unwrap();
        assert_eq!(store.read_holding_registers(0, 2).unwrap(), vec![0xFFFF, 7]);

        // The four spaces are disjoint
        assert_eq!(store.read_input_registers(0, 2).unwrap(), vec![0, 0]);
        assert_eq!(store.read_discrete_inputs(10, 3).unwrap(), vec![false; 3]);
    }

    #[test]
    fn test_read_only_spaces_settable_locally() {
        let store = DataStore::new();
        store.set_input_registers(5, &[42]).unwrap();
        store.set_discrete_inputs(5, &[true]).unwrap();
        assert_eq!(store.read_input_registers(5, 1).unwrap(), vec![42]);
        assert_eq!(store.read_discrete_inputs(5, 1).unwrap(), vec![true]);
    }

    #[test]
    fn test_out_of_range_is_illegal_data_address() {
        let store = DataStore::with_sizes(16, 16, 16, 16);
        assert_eq!(
            store.read_coils(10, 7).unwrap_err(),
            ExceptionCode::IllegalDataAddress
        );
        assert_eq!(
            store.write_holding_registers(16, &[1]).unwrap_err(),
            ExceptionCode::IllegalDataAddress
        );
        // Range ending exactly at the extent is fine
        assert!(store.read_coils(10, 6).is_ok());

        // addr + count past the end of the full address space must not wrap
        let full = DataStore::new();
        assert_eq!(
            full.read_holding_registers(0xFFFF, 2).unwrap_err(),
            ExceptionCode::IllegalDataAddress
        );
    }

    #[test]
    fn test_concurrent_writes_not_torn() {
        let store = Arc::new(DataStore::new());
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..500u16 {
                    store.write_holding_registers(0, &[i; 100]).unwrap();
                }
            })
        };
        for _ in 0..500 {
            let snapshot = store.read_holding_registers(0, 100).unwrap();
            assert!(
                snapshot.iter().all(|&v| v == snapshot[0]),
                "torn read: {snapshot:?}"
            );
        }
        writer.join().unwrap();
    }
}

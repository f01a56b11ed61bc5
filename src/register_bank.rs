/// Register and coil banks for slave-side data storage
///
/// A bank is a zero-based, fixed-size array of 16-bit registers or boolean coils.
/// Banks do no locking of their own: a slave session holds them as
/// [`SharedRegisterBank`] / [`SharedCoilBank`], and whoever else touches the same
/// bank goes through the same lock.

use std::sync::{Arc, RwLock};
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::ADDRESS_MAX;

/// A register bank shared between slave sessions
pub type SharedRegisterBank = Arc<RwLock<RegisterBank>>;

/// A coil bank shared between slave sessions
pub type SharedCoilBank = Arc<RwLock<CoilBank>>;

fn clamp_size(size: usize) -> usize {
    size.clamp(1, ADDRESS_MAX)
}

fn check_range(index: usize, length: usize, size: usize) -> ModbusResult<()> {
    match index.checked_add(length) {
        Some(end) if end <= size => Ok(()),
        _ => Err(ModbusError::invalid_address(index, length, size)),
    }
}

/// Bank of 16-bit registers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBank {
    registers: Vec<u16>,
}

impl RegisterBank {
    /// Create a bank of `size` zeroed registers, clamped to [1, 65535]
    pub fn new(size: usize) -> Self {
        Self {
            registers: vec![0; clamp_size(size)],
        }
    }

    /// Wrap the bank for sharing with slave sessions
    pub fn shared(size: usize) -> SharedRegisterBank {
        Arc::new(RwLock::new(Self::new(size)))
    }

    /// Number of registers in the bank
    pub fn size(&self) -> usize {
        self.registers.len()
    }

    pub fn get(&self, index: usize) -> ModbusResult<u16> {
        check_range(index, 1, self.size())?;
        Ok(self.registers[index])
    }

    pub fn set(&mut self, index: usize, value: u16) -> ModbusResult<()> {
        check_range(index, 1, self.size())?;
        self.registers[index] = value;
        Ok(())
    }

    /// Copy of `length` registers starting at `index`
    pub fn get_range(&self, index: usize, length: usize) -> ModbusResult<Vec<u16>> {
        check_range(index, length, self.size())?;
        Ok(self.registers[index..index + length].to_vec())
    }

    /// Overwrite registers starting at `index` with `values`
    pub fn set_range(&mut self, index: usize, values: &[u16]) -> ModbusResult<()> {
        check_range(index, values.len(), self.size())?;
        self.registers[index..index + values.len()].copy_from_slice(values);
        Ok(())
    }
}

/// Bank of boolean coils
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoilBank {
    coils: Vec<bool>,
}

impl CoilBank {
    /// Create a bank of `size` cleared coils, clamped to [1, 65535]
    pub fn new(size: usize) -> Self {
        Self {
            coils: vec![false; clamp_size(size)],
        }
    }

    /// Wrap the bank for sharing with slave sessions
    pub fn shared(size: usize) -> SharedCoilBank {
        Arc::new(RwLock::new(Self::new(size)))
    }

    /// Number of coils in the bank
    pub fn size(&self) -> usize {
        self.coils.len()
    }

    pub fn get(&self, index: usize) -> ModbusResult<bool> {
        check_range(index, 1, self.size())?;
        Ok(self.coils[index])
    }

    pub fn set(&mut self, index: usize, value: bool) -> ModbusResult<()> {
        check_range(index, 1, self.size())?;
        self.coils[index] = value;
        Ok(())
    }

    pub fn get_range(&self, index: usize, length: usize) -> ModbusResult<Vec<bool>> {
        check_range(index, length, self.size())?;
        Ok(self.coils[index..index + length].to_vec())
    }

    pub fn set_range(&mut self, index: usize, values: &[bool]) -> ModbusResult<()> {
        check_range(index, values.len(), self.size())?;
        self.coils[index..index + values.len()].copy_from_slice(values);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_is_clamped() {
        assert_eq!(RegisterBank::new(0).size(), 1);
        assert_eq!(RegisterBank::new(100).size(), 100);
        assert_eq!(RegisterBank::new(70000).size(), 65535);
        assert_eq!(CoilBank::new(0).size(), 1);
        assert_eq!(CoilBank::new(1 << 20).size(), 65535);
    }

    #[test]
    fn test_register_operations() {
        let mut bank = RegisterBank::new(10);
        assert_eq!(bank.get(3).unwrap(), 0);

        bank.set(5, 42).unwrap();
        assert_eq!(bank.get(5).unwrap(), 42);

        bank.set_range(7, &[100, 200, 300]).unwrap();
        assert_eq!(bank.get_range(6, 4).unwrap(), vec![0, 100, 200, 300]);
    }

    #[test]
    fn test_register_bounds() {
        let mut bank = RegisterBank::new(10);
        assert!(bank.get(10).is_err());
        assert!(bank.set(10, 1).is_err());
        assert!(bank.get_range(8, 3).is_err());
        assert!(bank.set_range(9, &[1, 2]).is_err());
        assert!(bank.get_range(usize::MAX, 2).is_err());
        // A failed range write leaves the bank untouched
        assert_eq!(bank.get(9).unwrap(), 0);
        assert!(bank.get_range(10, 0).is_ok());
    }

    #[test]
    fn test_coil_operations() {
        let mut bank = CoilBank::new(8);
        bank.set(2, true).unwrap();
        assert!(bank.get(2).unwrap());

        bank.set_range(4, &[true, false, true]).unwrap();
        assert_eq!(bank.get_range(3, 4).unwrap(), vec![false, true, false, true]);
        assert!(bank.get_range(6, 3).is_err());
    }
}

use crate::nrf_timebase::Registers;
use std::collections::HashMap;

/// Peripheral register space as plain memory, with every write recorded in order.
/// Unwritten registers read 0.
#[derive(Default)]
pub struct RegisterFile {
    values: HashMap<u32, u32>,
    pub writes: Vec<(u32, u32)>,
}

impl RegisterFile {
    pub fn new() -> RegisterFile {
        RegisterFile::default()
    }

    /// Sets a register as the hardware would, without recording a write.
    pub fn set(&mut self, addr: u32, value: u32) {
        self.values.insert(addr, value);
    }

    pub fn value(&self, addr: u32) -> u32 {
        self.values.get(&addr).copied().unwrap_or(0)
    }

    /// The value most recently written to `addr`, if any.
    pub fn last_write(&self, addr: u32) -> Option<u32> {
        self.writes
            .iter()
            .rev()
            .find(|&&(a, _)| a == addr)
            .map(|&(_, value)| value)
    }

    pub fn wrote(&self, addr: u32, value: u32) -> bool {
        self.writes.contains(&(addr, value))
    }
}

impl Registers for RegisterFile {
    fn read(&self, addr: u32) -> u32 {
        self.value(addr)
    }

    fn write(&mut self, addr: u32, value: u32) {
        self.values.insert(addr, value);
        self.writes.push((addr, value));
    }
}

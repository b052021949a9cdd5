//! Main memory implementation.
//!
//! A flat array of integer cells shared by every core. Memory is the
//! authoritative store for an address whenever no cache holds it in a
//! valid state; caches write values back here on eviction and on
//! invalidation of a MODIFIED line.

use std::fmt;
use std::sync::Mutex;

use bit_vec::BitVec;
use thiserror::Error;

/// The address of a cell in main memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub usize);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The value stored in a memory cell or cache line.
pub type Value = i32;

/// Raised when a trace names an address outside the configured memory.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("address {addr} outside memory of {size} cells")]
pub struct MemoryError {
    pub addr: usize,
    pub size: usize,
}

struct Cells {
    values: Vec<Value>,
    /// Which cells have ever been written, either directly by an executor
    /// or through a cache write-back. Drives the end-of-run report.
    written: BitVec,
}

/// The main memory. Owned by the simulation and handed to every core as a
/// shared reference; a single coarse mutex serializes cell accesses.
pub struct MainMemory {
    size: usize,
    cells: Mutex<Cells>,
}

impl MainMemory {
    /// Create a memory of `size` zeroed cells.
    pub fn new(size: usize) -> MainMemory {
        assert!(size > 0, "memory must have at least one cell");
        MainMemory {
            size,
            cells: Mutex::new(Cells {
                values: vec![0; size],
                written: BitVec::from_elem(size, false),
            }),
        }
    }

    /// The number of cells.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Validate that `address` names a cell.
    pub fn check(&self, address: Address) -> Result<(), MemoryError> {
        if address.0 < self.size {
            Ok(())
        } else {
            Err(MemoryError {
                addr: address.0,
                size: self.size,
            })
        }
    }

    /// Read the cell at `address`.
    pub fn read(&self, address: Address) -> Result<Value, MemoryError> {
        self.check(address)?;
        let cells = self.cells.lock().expect("memory lock poisoned");
        Ok(cells.values[address.0])
    }

    /// Write `value` to the cell at `address`.
    pub fn write(&self, address: Address, value: Value) -> Result<(), MemoryError> {
        self.check(address)?;
        let mut cells = self.cells.lock().expect("memory lock poisoned");
        cells.values[address.0] = value;
        cells.written.set(address.0, true);
        Ok(())
    }

    /// Copy of the full memory image.
    pub fn snapshot(&self) -> Vec<Value> {
        let cells = self.cells.lock().expect("memory lock poisoned");
        cells.values.clone()
    }

    /// Addresses of every cell that has ever been written.
    pub fn written_cells(&self) -> Vec<Address> {
        let cells = self.cells.lock().expect("memory lock poisoned");
        cells
            .written
            .iter()
            .enumerate()
            .filter(|&(_, written)| written)
            .map(|(addr, _)| Address(addr))
            .collect()
    }
}

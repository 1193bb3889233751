use crate::error::MemoryError;

/// Total addressable memory.
pub const MEM_SIZE: usize = 256;

/// Start of the memory-mapped display window; everything below it is
/// program/data space.
pub const DISPLAY_BASE: usize = 0xC0;

/// Largest loadable program image, in bytes.
pub const PROGRAM_CAPACITY: usize = DISPLAY_BASE;

const BLANK: u8 = 0x20;

/// Collaborator notified whenever a store lands in the display window.
///
/// `cells` is the full 64-byte window starting at `DISPLAY_BASE`.
pub trait DisplaySink {
    fn refresh(&mut self, cells: &[u8]);
}

/// Sink that drops every notification. Useful for tests and headless runs.
pub struct NullDisplay;

impl DisplaySink for NullDisplay {
    fn refresh(&mut self, _cells: &[u8]) {}
}

/// Flat byte memory with a memory-mapped display window.
///
/// Addresses are `i32` because effective-address arithmetic (SP or a base
/// register plus a signed offset) can transiently leave [0,255]; any access
/// outside the array is a hard error for the caller to turn into a fault.
pub struct Ram {
    data: [u8; MEM_SIZE],
    display: Box<dyn DisplaySink>,
}

impl Default for Ram {
    fn default() -> Self {
        Ram::new(Box::new(NullDisplay))
    }
}

impl Ram {
    pub fn new(display: Box<dyn DisplaySink>) -> Self {
        let mut data = [0; MEM_SIZE];
        data[DISPLAY_BASE..].fill(BLANK);
        Ram { data, display }
    }

    pub fn size(&self) -> usize {
        MEM_SIZE
    }

    pub fn load(&self, addr: i32) -> Result<u8, MemoryError> {
        match usize::try_from(addr).ok().and_then(|a| self.data.get(a)) {
            Some(byte) => Ok(*byte),
            None => Err(MemoryError::OutOfBounds { addr }),
        }
    }

    pub fn store(&mut self, addr: i32, value: u8) -> Result<(), MemoryError> {
        let idx = usize::try_from(addr)
            .ok()
            .filter(|a| *a < MEM_SIZE)
            .ok_or(MemoryError::OutOfBounds { addr })?;
        self.data[idx] = value;
        if idx >= DISPLAY_BASE {
            self.display.refresh(&self.data[DISPLAY_BASE..]);
        }
        Ok(())
    }

    /// Load a program image at address 0.
    ///
    /// Clears the whole program region first; the display window is left
    /// untouched.
    pub fn load_program(&mut self, program: &[u8]) -> Result<(), MemoryError> {
        if program.len() > PROGRAM_CAPACITY {
            return Err(MemoryError::ProgramTooLarge {
                len: program.len(),
            });
        }
        self.data[..PROGRAM_CAPACITY].fill(0);
        self.data[..program.len()].copy_from_slice(program);
        Ok(())
    }

    /// Clear the program region and blank the display window.
    pub fn reset(&mut self) {
        self.data[..PROGRAM_CAPACITY].fill(0);
        self.data[DISPLAY_BASE..].fill(BLANK);
        self.display.refresh(&self.data[DISPLAY_BASE..]);
    }

    /// Current display window contents.
    pub fn display_cells(&self) -> &[u8] {
        &self.data[DISPLAY_BASE..]
    }
}

use std::{error::Error, fmt};

/// Bounds-checked access to a guest's linear memory.
///
/// Offsets and lengths come straight from guest registers, so every access
/// validates `[offset, offset + len)` against the current memory size before
/// touching a byte. The runtime hands out an implementation per call; the
/// dispatcher never sees a raw pointer.
pub trait GuestMemory {
    /// Current size of linear memory in bytes.
    fn size(&self) -> usize;

    fn bytes(&self) -> &[u8];

    fn bytes_mut(&mut self) -> &mut [u8];

    /// Validate a range without copying it.
    fn check(&self, offset: u32, len: u32) -> Result<(), MemoryError> {
        guest_range(offset, len, self.size()).map(|_| ())
    }

    fn read(&self, offset: u32, len: u32) -> Result<Vec<u8>, MemoryError> {
        let (start, end) = guest_range(offset, len, self.size())?;
        Ok(self.bytes()[start..end].to_vec())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), MemoryError> {
        let len = u32::try_from(data.len()).map_err(|_| MemoryError::AddressOverflow {
            offset,
            len: data.len(),
        })?;
        let (start, end) = guest_range(offset, len, self.size())?;
        self.bytes_mut()[start..end].copy_from_slice(data);
        Ok(())
    }

    /// Wasm is little-endian, unlike the network fields inside a sockaddr.
    fn write_u32_le(&mut self, offset: u32, value: u32) -> Result<(), MemoryError> {
        self.write(offset, &value.to_le_bytes())
    }
}

impl GuestMemory for [u8] {
    fn size(&self) -> usize {
        self.len()
    }

    fn bytes(&self) -> &[u8] {
        self
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl GuestMemory for Vec<u8> {
    fn size(&self) -> usize {
        self.len()
    }

    fn bytes(&self) -> &[u8] {
        self.as_slice()
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

fn guest_range(offset: u32, len: u32, size: usize) -> Result<(usize, usize), MemoryError> {
    let start = offset as usize;
    // Only reachable where usize is 32 bits.
    let end = start
        .checked_add(len as usize)
        .ok_or(MemoryError::AddressOverflow {
            offset,
            len: len as usize,
        })?;
    if end > size {
        return Err(MemoryError::OutOfBounds { offset, len, size });
    }
    Ok((start, end))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    AddressOverflow { offset: u32, len: usize },
    OutOfBounds { offset: u32, len: u32, size: usize },
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::AddressOverflow { offset, len } => {
                write!(f, "address overflow at {offset:#x} (len {len})")
            }
            MemoryError::OutOfBounds { offset, len, size } => {
                let range_end = (*offset as usize).saturating_add(*len as usize);
                write!(
                    f,
                    "guest range {offset:#x}..{range_end:#x} outside linear memory ({size} bytes)"
                )
            }
        }
    }
}

impl Error for MemoryError {}

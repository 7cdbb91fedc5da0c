use crate::device::RegisterSpace;

/// Frame and PDU codec errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Invalid coil value
    #[error("Invalid coil value: {0}")]
    CoilValue(u16),
    /// Invalid buffer size
    #[error("Invalid buffer size")]
    BufferSize,
    /// Invalid function code
    #[error("Invalid function code: 0x{0:0>2X}")]
    FnCode(u8),
    /// Invalid exception code
    #[error("Invalid exception code: 0x{0:0>2X}")]
    ExceptionCode(u8),
    /// Invalid CRC
    #[error("Invalid CRC: expected = 0x{0:0>4X}, actual = 0x{1:0>4X}")]
    Crc(u16, u16),
    /// Invalid byte count
    #[error("Invalid byte count: {0}")]
    ByteCount(u8),
    /// Invalid MEI type for Read Device Identification
    #[error("Invalid MEI type: 0x{0:0>2X}")]
    MeiType(u8),
}

/// Register store access errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// An address of the requested span is not mapped in the given space.
    #[error("Address {address} out of range for {space}")]
    OutOfRange { space: RegisterSpace, address: u16 },
    /// A typed value was written through a definition of another data type.
    #[error("Value does not fit data type {0}")]
    TypeMismatch(&'static str),
}

/// Device profile load errors. Fatal at startup only.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("Failed to parse device profile: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("I/O error while loading device profile: {0}")]
    Io(#[from] std::io::Error),
    #[error("Register definitions overlap at {space} address {address}")]
    Overlap { space: RegisterSpace, address: u16 },
    #[error("Register definition at {space} address {address} exceeds the address space")]
    OutOfBounds { space: RegisterSpace, address: u16 },
    #[error("Value for {space} address {address} does not fit data type {data_type}")]
    ValueType {
        space: RegisterSpace,
        address: u16,
        data_type: &'static str,
    },
}

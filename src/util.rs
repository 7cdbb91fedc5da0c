//! Common helpers

use crate::error::Error;

/// A coil represents a single bit.
///
/// - `true` is equivalent to `ON`, `1` and `0xFF00`.
/// - `false` is equivalent to `OFF`, `0` and `0x0000`.
pub type Coil = bool;

/// Turn a bool into a u16 coil value
#[must_use]
pub const fn bool_to_u16_coil(state: bool) -> u16 {
    if state {
        0xFF00
    } else {
        0x0000
    }
}

/// Turn a u16 coil value into a boolean value.
pub const fn u16_coil_to_bool(coil: u16) -> Result<bool, Error> {
    match coil {
        0xFF00 => Ok(true),
        0x0000 => Ok(false),
        _ => Err(Error::CoilValue(coil)),
    }
}

/// Calculate the number of bytes required for a given number of coils.
#[must_use]
pub const fn packed_coils_len(bitcount: usize) -> usize {
    bitcount.div_ceil(8)
}

/// Pack coils into a byte vector.
#[must_use]
pub fn pack_coils(coils: &[Coil]) -> Vec<u8> {
    let mut bytes = vec![0; packed_coils_len(coils.len())];
    coils.iter().enumerate().for_each(|(i, b)| {
        let v = u8::from(*b);
        bytes[i / 8] |= v << (i % 8);
    });
    bytes
}

/// Unpack `count` coils from a byte slice.
pub fn unpack_coils(bytes: &[u8], count: u16) -> Result<Vec<Coil>, Error> {
    if bytes.len() < packed_coils_len(count as usize) {
        return Err(Error::BufferSize);
    }
    Ok((0..count)
        .map(|i| (bytes[(i / 8) as usize] >> (i % 8)) & 0b1 > 0)
        .collect())
}

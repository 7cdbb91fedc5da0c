//! Modbus RTU framing: CRC16, deterministic frame lengths and response encoding.

use crate::frame::{ResponseAdu, SlaveId};
use byteorder::{BigEndian, ByteOrder};

// [MODBUS over Serial Line Specification and Implementation Guide V1.02](http://modbus.org/docs/Modbus_over_serial_line_V1_02.pdf), page 13
// "The maximum size of a MODBUS RTU frame is 256 bytes."
pub const MAX_FRAME_LEN: usize = 256;

/// Smallest possible ADU: unit address, function code and the CRC.
pub const MIN_FRAME_LEN: usize = 4;

/// Unit addresses outside `1..=247` cannot start a valid frame.
pub(crate) const fn plausible_unit_address(byte: u8) -> bool {
    byte >= 1 && byte <= 247
}

/// An extracted RTU frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFrame<'a> {
    pub slave: SlaveId,
    pub pdu: &'a [u8],
}

/// Result of probing a buffer for a frame at a fixed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameCheck {
    /// Not enough bytes buffered to decide.
    Incomplete,
    /// Enough bytes, but the trailing CRC does not match.
    Invalid,
    /// A CRC-valid frame of the given ADU length.
    Valid(usize),
}

/// Calculate the CRC (Cyclic Redundancy Check) sum.
///
/// The result is pre-swapped so that `to_be_bytes()` yields the on-wire
/// order (low byte first, high byte second).
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0xFFFF;
    for x in data {
        crc ^= u16::from(*x);
        for _ in 0..8 {
            if (crc & 0x0001) != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc.rotate_right(8)
}

/// Extract the expected ADU length out of a request buffer.
///
/// `None` means the length is not knowable yet (more bytes needed).
/// Function codes without an entry in the table map to the minimum frame
/// length, so that corrupt input always reaches the CRC check and from
/// there the resynchronization logic.
#[must_use]
pub const fn request_adu_len(adu_buf: &[u8]) -> Option<usize> {
    if adu_buf.len() < 2 {
        return None;
    }
    let fn_code = adu_buf[1];
    match fn_code {
        0x01..=0x06 => Some(8),
        0x0F | 0x10 => {
            if adu_buf.len() > 6 {
                Some(9 + adu_buf[6] as usize)
            } else {
                // incomplete frame
                None
            }
        }
        0x11 => Some(4),
        0x2B => Some(7),
        _ => Some(MIN_FRAME_LEN),
    }
}

/// Probe for a request frame starting at `start`.
pub(crate) fn check_frame_at(buf: &[u8], start: usize) -> FrameCheck {
    let window = &buf[start..];
    let Some(adu_len) = request_adu_len(window) else {
        return FrameCheck::Incomplete;
    };
    if window.len() < adu_len {
        return FrameCheck::Incomplete;
    }
    let (data, crc_buf) = window[..adu_len].split_at(adu_len - 2);
    let expected_crc = BigEndian::read_u16(crc_buf);
    if expected_crc == crc16(data) {
        FrameCheck::Valid(adu_len)
    } else {
        FrameCheck::Invalid
    }
}

/// Extract a CRC-verified request frame from the front of a buffer.
///
/// Returns `Ok(None)` while the frame is still incomplete and
/// `Err(Error::Crc)` when the buffered candidate fails verification.
pub fn extract_frame(buf: &[u8]) -> Result<Option<DecodedFrame<'_>>, crate::Error> {
    match check_frame_at(buf, 0) {
        FrameCheck::Incomplete => Ok(None),
        FrameCheck::Invalid => {
            let adu_len = request_adu_len(buf).unwrap_or(MIN_FRAME_LEN);
            let expected = BigEndian::read_u16(&buf[adu_len - 2..adu_len]);
            Err(crate::Error::Crc(expected, crc16(&buf[..adu_len - 2])))
        }
        FrameCheck::Valid(adu_len) => {
            let (adu, _) = buf[..adu_len].split_at(adu_len - 2);
            let (slave, pdu) = adu.split_at(1);
            Ok(Some(DecodedFrame {
                slave: slave[0],
                pdu,
            }))
        }
    }
}

/// Encode an RTU response: unit address, PDU and trailing CRC.
///
/// The produced bytes are byte-identical to what the extraction logic
/// accepts on the next round trip.
pub fn encode_response(adu: &ResponseAdu, buf: &mut Vec<u8>) {
    let start = buf.len();
    buf.push(adu.hdr.slave);
    adu.pdu.encode(buf);
    let crc = crc16(&buf[start..]);
    buf.extend_from_slice(&crc.to_be_bytes());
}

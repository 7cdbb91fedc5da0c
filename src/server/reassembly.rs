//! Byte-stream reassembly for RTU request frames.
//!
//! Serial input arrives in arbitrary chunks. Bytes are accumulated until
//! either a CRC-verified frame can be extracted or the line has been
//! silent long enough to discard the fragment.

use crate::codec::rtu::{
    check_frame_at, plausible_unit_address, FrameCheck, MAX_FRAME_LEN, MIN_FRAME_LEN,
};
use crate::frame::SlaveId;
use std::time::Duration;

/// How far into the buffer resynchronization looks for a frame start.
const RESYNC_SCAN_LEN: usize = 20;

/// The inter-frame silence that separates two RTU frames.
///
/// 3.5 character times of 11 bits each, rounded up and padded by 2 ms,
/// with a floor of 5 ms for fast baud rates.
#[must_use]
pub fn silence_timeout(baud_rate: u32) -> Duration {
    let millis = (38_500 + u64::from(baud_rate) - 1) / u64::from(baud_rate) + 2;
    Duration::from_millis(millis.max(5))
}

/// A frame pulled out of the reassembly buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFrame {
    pub slave: SlaveId,
    pub pdu: Vec<u8>,
}

/// Accumulates raw serial bytes and yields CRC-verified frames.
///
/// When the front of the buffer fails CRC verification the buffer is
/// scanned for a later frame start (a plausible unit address whose frame
/// verifies); failing that, a single front byte is dropped so that noise
/// bleeds out one byte per attempt instead of poisoning the buffer.
#[derive(Debug, Default)]
pub struct ReassemblyBuffer {
    buf: Vec<u8>,
}

impl ReassemblyBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Discard all buffered bytes, e.g. after a silence timeout.
    pub fn clear(&mut self) {
        if !self.buf.is_empty() {
            log::warn!("Discarding {} unframed byte(s)", self.buf.len());
            self.buf.clear();
        }
    }

    /// Try to extract the next frame from the front of the buffer.
    ///
    /// Returns `None` when more bytes are needed. Call repeatedly until
    /// `None` after each `push`, as one chunk may complete several frames.
    pub fn try_extract(&mut self) -> Option<ExtractedFrame> {
        loop {
            match check_frame_at(&self.buf, 0) {
                FrameCheck::Incomplete => {
                    if self.buf.len() > MAX_FRAME_LEN {
                        log::warn!("Frame candidate exceeds maximum length, dropping one byte");
                        self.buf.remove(0);
                        continue;
                    }
                    return None;
                }
                FrameCheck::Valid(adu_len) => {
                    let frame = ExtractedFrame {
                        slave: self.buf[0],
                        pdu: self.buf[1..adu_len - 2].to_vec(),
                    };
                    self.buf.drain(..adu_len);
                    return Some(frame);
                }
                FrameCheck::Invalid => {
                    if let Some(offset) = self.resync_offset() {
                        log::warn!("CRC mismatch, resynchronizing {offset} byte(s) into buffer");
                        self.buf.drain(..offset);
                    } else {
                        log::warn!("CRC mismatch, dropping one byte");
                        self.buf.remove(0);
                        if self.buf.len() < MIN_FRAME_LEN {
                            return None;
                        }
                    }
                }
            }
        }
    }

    /// Look for a verified frame start behind the corrupt front bytes.
    fn resync_offset(&self) -> Option<usize> {
        let scan_end = self
            .buf
            .len()
            .saturating_sub(MIN_FRAME_LEN - 1)
            .min(RESYNC_SCAN_LEN);
        (1..scan_end)
            .filter(|&offset| plausible_unit_address(self.buf[offset]))
            .find(|&offset| matches!(check_frame_at(&self.buf, offset), FrameCheck::Valid(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::rtu::crc16;

    fn frame(body: &[u8]) -> Vec<u8> {
        let mut buf = body.to_vec();
        let crc = crc16(body);
        buf.extend_from_slice(&crc.to_be_bytes());
        buf
    }

    #[test]
    fn timeout_scales_with_baud_rate() {
        assert_eq!(silence_timeout(9600), Duration::from_millis(7));
        assert_eq!(silence_timeout(19_200), Duration::from_millis(5));
        assert_eq!(silence_timeout(115_200), Duration::from_millis(5));
        assert_eq!(silence_timeout(1200), Duration::from_millis(35));
    }

    #[test]
    fn frame_split_across_chunks() {
        let bytes = frame(&[0x01, 0x03, 0x00, 0x0A, 0x00, 0x01]);
        let mut buffer = ReassemblyBuffer::new();

        buffer.push(&bytes[..3]);
        assert_eq!(buffer.try_extract(), None);

        buffer.push(&bytes[3..]);
        let extracted = buffer.try_extract().unwrap();
        assert_eq!(extracted.slave, 0x01);
        assert_eq!(extracted.pdu, vec![0x03, 0x00, 0x0A, 0x00, 0x01]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn two_frames_in_one_chunk() {
        let mut bytes = frame(&[0x01, 0x03, 0x00, 0x0A, 0x00, 0x01]);
        bytes.extend_from_slice(&frame(&[0x02, 0x06, 0x00, 0x01, 0x12, 0x34]));

        let mut buffer = ReassemblyBuffer::new();
        buffer.push(&bytes);

        assert_eq!(buffer.try_extract().unwrap().slave, 0x01);
        assert_eq!(buffer.try_extract().unwrap().slave, 0x02);
        assert_eq!(buffer.try_extract(), None);
    }

    #[test]
    fn resync_skips_corrupt_prefix() {
        // A corrupt fragment directly followed by a valid frame.
        let mut bytes = vec![0x01, 0x03, 0x00, 0xFF, 0x00, 0xFF, 0x00, 0x00];
        let good = frame(&[0x01, 0x03, 0x00, 0x0A, 0x00, 0x01]);
        bytes.extend_from_slice(&good);

        let mut buffer = ReassemblyBuffer::new();
        buffer.push(&bytes);

        let extracted = buffer.try_extract().unwrap();
        assert_eq!(extracted.slave, 0x01);
        assert_eq!(extracted.pdu, vec![0x03, 0x00, 0x0A, 0x00, 0x01]);
        assert_eq!(buffer.try_extract(), None);
        assert!(buffer.is_empty());
    }

    #[test]
    fn noise_bleeds_out_one_byte_at_a_time() {
        let mut buffer = ReassemblyBuffer::new();
        // Unknown function code, full minimum-length candidate, bad CRC.
        buffer.push(&[0x01, 0x66, 0x00, 0x00]);
        assert_eq!(buffer.try_extract(), None);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn clear_discards_fragment() {
        let mut buffer = ReassemblyBuffer::new();
        buffer.push(&[0x01, 0x03]);
        buffer.clear();
        assert!(buffer.is_empty());
    }
}

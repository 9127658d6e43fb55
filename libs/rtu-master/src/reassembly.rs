//! Reassembly of fragmented transport reads
//!
//! Serial reads do not respect frame boundaries. One buffer per session
//! (the line is a single byte stream) holds short reads until enough bytes
//! have arrived to attempt a decode:
//!
//! ```text
//! Empty   + chunk >= threshold  -> forward chunk
//! Empty   + chunk <  threshold  -> Holding(chunk)
//! Holding + chunk               -> concatenate; forward if >= threshold,
//!                                  otherwise keep holding
//! ```
//!
//! An exception response (5 bytes, 0x80 bit in the function code) is
//! forwarded as soon as it is complete, below any threshold. A candidate the
//! decoder finds incomplete goes back in with [`ReassemblyBuffer::restore`].
//! Fragments are only ever appended in arrival order.

use bytes::{Bytes, BytesMut};
use tracing::warn;

use crate::constants::MAX_RTU_FRAME_SIZE;
use crate::frame::is_exception_response;

#[derive(Debug, Default)]
pub struct ReassemblyBuffer {
    held: Option<BytesMut>,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport read. Returns a candidate frame once at least
    /// `threshold` bytes, or a whole exception response, are available.
    pub fn push(&mut self, chunk: &[u8], threshold: usize) -> Option<Bytes> {
        let mut held = self.held.take().unwrap_or_default();
        held.extend_from_slice(chunk);

        if held.len() >= threshold || is_exception_response(&held) {
            return Some(held.freeze());
        }
        self.keep(held);
        None
    }

    /// Put back a candidate that turned out to be short
    pub fn restore(&mut self, candidate: &[u8]) {
        let mut held = self.held.take().unwrap_or_default();
        held.extend_from_slice(candidate);
        self.keep(held);
    }

    fn keep(&mut self, held: BytesMut) {
        if held.len() > MAX_RTU_FRAME_SIZE {
            warn!("RTU reassembly overflow: {}B dropped", held.len());
            return;
        }
        self.held = Some(held);
    }

    pub fn is_holding(&self) -> bool {
        self.held.is_some()
    }

    pub fn held_len(&self) -> usize {
        self.held.as_ref().map_or(0, BytesMut::len)
    }

    pub fn clear(&mut self) {
        self.held = None;
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::frame::{try_decode_response, DecodeOutcome};

    fn frame(payload_len: u8) -> Vec<u8> {
        let mut frame = vec![0x01, 0x03, payload_len];
        frame.extend((0..payload_len).map(|i| i.wrapping_mul(7)));
        let crc = crate::crc::crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    #[test]
    fn test_full_read_forwarded() {
        let mut buffer = ReassemblyBuffer::new();
        let data = frame(12);

        let out = buffer.push(&data, 16).unwrap();
        assert_eq!(&out[..], &data[..]);
        assert!(!buffer.is_holding());
    }

    #[test]
    fn test_short_read_held() {
        let mut buffer = ReassemblyBuffer::new();
        assert!(buffer.push(&[0x01, 0x03, 0x0C], 16).is_none());
        assert!(buffer.is_holding());
        assert_eq!(buffer.held_len(), 3);
    }

    #[test]
    fn test_eight_plus_eight() {
        let mut buffer = ReassemblyBuffer::new();
        let data = frame(11);
        assert_eq!(data.len(), 16);

        assert!(buffer.push(&data[..8], 16).is_none());
        let out = buffer.push(&data[8..], 16).unwrap();
        assert_eq!(&out[..], &data[..]);
        assert!(!buffer.is_holding());
    }

    #[test]
    fn test_every_two_way_split_matches_single_read() {
        let data = frame(12);
        let min = 16;
        let whole = match try_decode_response(&data, data.len()) {
            DecodeOutcome::Frame(f) => f.to_response(),
            other => panic!("unexpected outcome: {other:?}"),
        };

        for k in 1..min {
            let mut buffer = ReassemblyBuffer::new();
            assert!(buffer.push(&data[..k], min).is_none(), "k={k}");
            let out = buffer.push(&data[k..], min).unwrap();
            match try_decode_response(&out, data.len()) {
                DecodeOutcome::Frame(f) => assert_eq!(f.to_response(), whole, "k={k}"),
                other => panic!("k={k}: unexpected outcome: {other:?}"),
            }
        }
    }

    #[test]
    fn test_three_way_fragmentation() {
        let mut buffer = ReassemblyBuffer::new();
        let data = frame(12);

        assert!(buffer.push(&data[..5], 16).is_none());
        assert!(buffer.push(&data[5..10], 16).is_none());
        assert_eq!(buffer.held_len(), 10);
        let out = buffer.push(&data[10..], 16).unwrap();
        assert_eq!(&out[..], &data[..]);
    }

    #[test]
    fn test_long_frame_restored_until_complete() {
        let mut buffer = ReassemblyBuffer::new();
        let data = frame(20);
        assert_eq!(data.len(), 25);

        // First read reaches the threshold but not the expected length
        let first = buffer.push(&data[..16], 16).unwrap();
        assert_eq!(try_decode_response(&first, 25), DecodeOutcome::Incomplete);
        buffer.restore(&first);
        assert_eq!(buffer.held_len(), 16);

        let out = buffer.push(&data[16..], 16).unwrap();
        assert_eq!(&out[..], &data[..]);
        assert!(matches!(try_decode_response(&out, 25), DecodeOutcome::Frame(_)));
    }

    #[test]
    fn test_exception_forwarded_below_threshold() {
        let mut buffer = ReassemblyBuffer::new();
        let mut exception = vec![0x01, 0x83, 0x02];
        let crc = crate::crc::crc16(&exception);
        exception.extend_from_slice(&crc.to_le_bytes());

        assert!(buffer.push(&exception[..3], 16).is_none());
        let out = buffer.push(&exception[3..], 16).unwrap();
        assert_eq!(&out[..], &exception[..]);
        assert!(!buffer.is_holding());
    }

    #[test]
    fn test_clear() {
        let mut buffer = ReassemblyBuffer::new();
        buffer.push(&[0x01], 16);
        buffer.clear();
        assert!(!buffer.is_holding());

        // Next short read starts a fresh hold rather than merging
        assert!(buffer.push(&[0x02, 0x03], 16).is_none());
        assert_eq!(buffer.held_len(), 2);
    }

    #[test]
    fn test_overflow_dropped() {
        let mut buffer = ReassemblyBuffer::new();
        let chunk = [0u8; 200];
        assert!(buffer.push(&chunk, 1000).is_none());
        assert!(buffer.push(&chunk, 1000).is_none());
        assert!(!buffer.is_holding());
    }
}

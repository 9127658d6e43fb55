//! Modbus RTU frame codec
//!
//! Request: `[unit][0x03][start BE(2)][count BE(2)][CRC LE(2)]`
//! Response: `[unit][0x03][byte count][payload...][CRC LE(2)]`
//!
//! Decoding never fails for structurally valid input; it reports what it
//! found through [`DecodeOutcome`].

use crate::constants::{
    CRC_LEN, EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, MAX_READ_REGISTERS, MAX_UNIT_ADDRESS,
    MIN_RESPONSE_LEN, MIN_UNIT_ADDRESS, REQUEST_FRAME_LEN, REQUEST_HEADER_LEN,
    RESPONSE_HEADER_LEN,
};
use crate::crc;
use crate::error::{Result, RtuError};

/// One "read holding registers" request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    /// Slave unit address
    pub unit: u8,
    /// First register address
    pub start: u16,
    /// Number of registers
    pub count: u16,
}

impl ReadRequest {
    pub fn new(unit: u8, start: u16, count: u16) -> Self {
        Self { unit, start, count }
    }

    /// Check the unit address and register window against the addressable range
    pub fn check_addresses(&self) -> Result<()> {
        if !(MIN_UNIT_ADDRESS..=MAX_UNIT_ADDRESS).contains(&self.unit) {
            return Err(RtuError::bad_address(format!(
                "unit {} outside {}..={}",
                self.unit, MIN_UNIT_ADDRESS, MAX_UNIT_ADDRESS
            )));
        }
        if u32::from(self.start) + u32::from(self.count) > 0x1_0000 {
            return Err(RtuError::bad_address(format!(
                "registers {}+{} exceed the 16-bit address space",
                self.start, self.count
            )));
        }
        Ok(())
    }

    /// Encode into an 8-byte RTU frame
    pub fn encode(&self) -> Result<[u8; REQUEST_FRAME_LEN]> {
        encode_read_request(self.unit, self.start, self.count)
    }

    /// Length of a well-formed answer to this request
    pub fn expected_response_len(&self) -> usize {
        expected_response_len(self.count)
    }
}

/// Successful reading: register bytes plus the raw frame they came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResponse {
    /// Register payload, header and CRC trimmed
    pub data: Vec<u8>,
    /// Complete response frame as received
    pub buffer: Vec<u8>,
}

impl ReadResponse {
    /// Payload as big-endian 16-bit registers. A trailing odd byte is ignored.
    pub fn registers(&self) -> Vec<u16> {
        self.data
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect()
    }
}

/// Build a read holding registers request frame
pub fn encode_read_request(unit: u8, start: u16, count: u16) -> Result<[u8; REQUEST_FRAME_LEN]> {
    if !(MIN_UNIT_ADDRESS..=MAX_UNIT_ADDRESS).contains(&unit) {
        return Err(RtuError::invalid_argument(format!(
            "unit address {unit} outside {MIN_UNIT_ADDRESS}..={MAX_UNIT_ADDRESS}"
        )));
    }
    if count == 0 || count > MAX_READ_REGISTERS {
        return Err(RtuError::invalid_argument(format!(
            "register count {count} outside 1..={MAX_READ_REGISTERS}"
        )));
    }
    if u32::from(start) + u32::from(count) > 0x1_0000 {
        return Err(RtuError::invalid_argument(format!(
            "start register {start} + count {count} overflows"
        )));
    }

    let mut frame = [0u8; REQUEST_FRAME_LEN];
    frame[0] = unit;
    frame[1] = FC_READ_HOLDING_REGISTERS;
    frame[2..4].copy_from_slice(&start.to_be_bytes());
    frame[4..6].copy_from_slice(&count.to_be_bytes());

    let crc = crc::crc16(&frame[..REQUEST_HEADER_LEN]);
    frame[REQUEST_HEADER_LEN..].copy_from_slice(&crc.to_le_bytes());

    Ok(frame)
}

/// `unit + FC + byte count + 2*count + CRC`
pub fn expected_response_len(count: u16) -> usize {
    RESPONSE_HEADER_LEN + 2 * usize::from(count) + CRC_LEN
}

/// Result of one decode attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome<'a> {
    /// Complete frame with a valid CRC
    Frame(ResponseFrame<'a>),
    /// Not enough bytes yet
    Incomplete,
    /// Enough bytes, wrong trailing CRC
    ChecksumMismatch { expected: u16, received: u16 },
}

/// Borrowed view over a CRC-checked response frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseFrame<'a> {
    raw: &'a [u8],
}

impl<'a> ResponseFrame<'a> {
    pub fn unit_address(&self) -> u8 {
        self.raw[0]
    }

    pub fn function_code(&self) -> u8 {
        self.raw[1]
    }

    pub fn is_exception(&self) -> bool {
        self.raw[1] & EXCEPTION_FLAG != 0
    }

    /// Exception code of an exception response
    pub fn exception_code(&self) -> Option<u8> {
        self.is_exception().then(|| self.raw[2])
    }

    /// Byte count announced in the header
    pub fn byte_count(&self) -> u8 {
        self.raw[2]
    }

    /// Whether the announced byte count matches the bytes actually present
    pub fn byte_count_matches(&self) -> bool {
        self.is_exception() || usize::from(self.byte_count()) == self.payload().len()
    }

    /// Register bytes between header and CRC
    pub fn payload(&self) -> &'a [u8] {
        &self.raw[RESPONSE_HEADER_LEN..self.raw.len() - CRC_LEN]
    }

    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    pub fn to_response(&self) -> ReadResponse {
        ReadResponse {
            data: self.payload().to_vec(),
            buffer: self.raw.to_vec(),
        }
    }
}

/// True once `buf` holds enough bytes for an exception response
pub fn is_exception_response(buf: &[u8]) -> bool {
    buf.len() >= MIN_RESPONSE_LEN && buf[1] & EXCEPTION_FLAG != 0
}

/// Try to decode a response frame.
///
/// A normal response is `Incomplete` until `expected_len` bytes are present.
/// An exception response is always 5 bytes and is decoded as soon as they
/// have arrived, whatever length the request expected.
pub fn try_decode_response(buf: &[u8], expected_len: usize) -> DecodeOutcome<'_> {
    let raw = if is_exception_response(buf) {
        &buf[..MIN_RESPONSE_LEN]
    } else if buf.len() < expected_len.max(MIN_RESPONSE_LEN) {
        return DecodeOutcome::Incomplete;
    } else {
        buf
    };

    match crc::verify(raw) {
        Ok(()) => DecodeOutcome::Frame(ResponseFrame { raw }),
        Err((expected, received)) => DecodeOutcome::ChecksumMismatch { expected, received },
    }
}

/// Get exception description
pub fn exception_description(exception_code: u8) -> &'static str {
    match exception_code {
        0x01 => "Illegal Function",
        0x02 => "Illegal Data Address",
        0x03 => "Illegal Data Value",
        0x04 => "Slave Device Failure",
        0x05 => "Acknowledge",
        0x06 => "Slave Device Busy",
        0x08 => "Memory Parity Error",
        0x0A => "Gateway Path Unavailable",
        0x0B => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}

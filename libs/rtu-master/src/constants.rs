//! Modbus RTU protocol constants

/// Read Holding Registers, the only function code this master issues
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Bit set in the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Request header: unit(1) + FC(1) + start(2) + count(2)
pub const REQUEST_HEADER_LEN: usize = 6;

/// Request header + CRC(2)
pub const REQUEST_FRAME_LEN: usize = REQUEST_HEADER_LEN + CRC_LEN;

/// Response header: unit(1) + FC(1) + byte count(1)
pub const RESPONSE_HEADER_LEN: usize = 3;

pub const CRC_LEN: usize = 2;

/// Smallest decodable response (exception frame: unit + FC + code + CRC)
pub const MIN_RESPONSE_LEN: usize = 5;

/// Maximum Modbus RTU frame size
pub const MAX_RTU_FRAME_SIZE: usize = 256;

/// Maximum registers per FC03 request
pub const MAX_READ_REGISTERS: u16 = 125;

/// Lowest/highest addressable slave. 0 is broadcast and never answers a read.
pub const MIN_UNIT_ADDRESS: u8 = 1;
pub const MAX_UNIT_ADDRESS: u8 = 247;

/// Default reassembly threshold. Transport tuning, not a protocol constant.
pub const DEFAULT_MIN_FRAME_LEN: usize = 16;

pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_START_REGISTER: u16 = 0;
pub const DEFAULT_REGISTER_COUNT: u16 = 6;

/// Capacity of the session command channel
pub const DEFAULT_QUEUE_DEPTH: usize = 32;

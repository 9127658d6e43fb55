//! Modbus CRC-16
//!
//! Initial register 0xFFFF, reflected polynomial 0xA001, LSB first. The
//! result is transmitted little-endian at the end of every RTU frame.

/// Calculate CRC16 checksum (Modbus RTU standard)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

/// Check the trailing little-endian CRC of a complete frame.
///
/// Returns `(calculated, received)` on mismatch.
pub fn verify(frame: &[u8]) -> Result<(), (u16, u16)> {
    if frame.len() < 2 {
        return Err((crc16(frame), 0));
    }
    let (body, tail) = frame.split_at(frame.len() - 2);
    let calculated = crc16(body);
    let received = u16::from_le_bytes([tail[0], tail[1]]);
    if calculated == received {
        Ok(())
    } else {
        Err((calculated, received))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_crc16_calculation() {
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]), 0x0A84);
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x06]), 0xC8C5);
        assert_eq!(crc16(&[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]), 0x8776);
    }

    #[test]
    fn test_crc16_check_string() {
        // CRC-16/MODBUS catalogue check value
        assert_eq!(crc16(b"123456789"), 0x4B37);
    }

    #[test]
    fn test_crc16_empty_data() {
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn test_crc16_consistency() {
        let data = [0x01, 0x03, 0x0C, 0x41, 0x42, 0x43];
        assert_eq!(crc16(&data), crc16(&data));
    }

    #[test]
    fn test_single_bit_flip_changes_crc() {
        let data = [0x01, 0x03, 0x00, 0x00, 0x00, 0x06];
        let original = crc16(&data);

        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut flipped = data;
                flipped[byte] ^= 1 << bit;
                assert_ne!(crc16(&flipped), original, "byte {byte} bit {bit}");
            }
        }
    }

    #[test]
    fn test_verify() {
        assert!(verify(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x06, 0xC5, 0xC8]).is_ok());
        assert_eq!(
            verify(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x06, 0xC5, 0xC9]),
            Err((0xC8C5, 0xC9C5))
        );
        assert!(verify(&[0x01]).is_err());
    }
}

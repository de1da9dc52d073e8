//! CRC computation for PNI compass frames
//!
//! Frames are protected by a CRC-16/XMODEM (polynomial 0x1021, initial
//! value 0) over every byte preceding the CRC field. The CRC is sent MSB
//! first, like every other multi-byte field in the protocol.

const CRC_ALGO: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_XMODEM);

/// Compute the frame CRC over a byte slice.
pub fn compute_crc(data: &[u8]) -> u16 {
    let mut digest = CRC_ALGO.digest();
    digest.update(data);
    digest.finalize()
}

/// Verify that a complete frame ends with a valid CRC.
///
/// The frame should include all bytes up to and including the CRC. Frames
/// shorter than the smallest legal frame are rejected.
pub fn verify_crc(frame: &[u8]) -> bool {
    if frame.len() < crate::MIN_FRAME_LEN {
        return false;
    }

    let data_end = frame.len() - 2;
    let computed = compute_crc(&frame[..data_end]);
    let stored = u16::from_be_bytes([frame[data_end], frame[data_end + 1]]);

    computed == stored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_check_value() {
        // Standard CRC-16/XMODEM check value
        assert_eq!(compute_crc(b"123456789"), 0x31C3);
    }

    #[test]
    fn test_crc_from_datasheet_examples() {
        // kGetModInfo: 00 05 01 EF D4
        assert_eq!(compute_crc(&[0x00, 0x05, 0x01]), 0xEFD4);
        // kGetData: 00 05 04 BF 71
        assert_eq!(compute_crc(&[0x00, 0x05, 0x04]), 0xBF71);

        assert!(verify_crc(&[0x00, 0x05, 0x01, 0xEF, 0xD4]));
        assert!(verify_crc(&[0x00, 0x05, 0x04, 0xBF, 0x71]));
    }

    #[test]
    fn test_verify_crc_invalid() {
        assert!(!verify_crc(&[0x00, 0x05, 0x01, 0xEF, 0xD5]));
        // Byte order matters
        assert!(!verify_crc(&[0x00, 0x05, 0x01, 0xD4, 0xEF]));
    }

    #[test]
    fn test_verify_crc_short_frame() {
        assert!(!verify_crc(&[]));
        assert!(!verify_crc(&[0x00, 0x04, 0x00, 0x00]));
    }
}

//! Sommes de contrôle CRC-32
//!
//! Deux variantes cohabitent dans un transport-stream :
//! - CRC-32/MPEG-2 (non réfléchi, init 0xFFFFFFFF) en queue de chaque
//!   section PSI ;
//! - CRC-32 classique (ISO-HDLC, le `crc32b` de zlib) utilisé comme
//!   hash de nommage des segments HLS.

use crc::{CRC_32_ISO_HDLC, CRC_32_MPEG_2, Crc};

const MPEG: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);
const IEEE: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-32/MPEG-2 des sections PSI.
pub fn crc32_mpeg(data: &[u8]) -> u32 {
    MPEG.checksum(data)
}

/// CRC-32 classique (zlib `crc32b`).
pub fn crc32_ieee(data: &[u8]) -> u32 {
    IEEE.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        // Vecteurs de référence du catalogue CRC ("123456789").
        assert_eq!(crc32_mpeg(b"123456789"), 0x0376_E6E7);
        assert_eq!(crc32_ieee(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn empty_input() {
        assert_eq!(crc32_mpeg(b""), 0xFFFF_FFFF);
        assert_eq!(crc32_ieee(b""), 0x0000_0000);
    }
}

//! Integrity checks used by the supported framings.

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ChecksumAlgorithm {
    /// 16 bit wrapping sum of bytes.
    Sum16,
    /// Sum of bytes truncated to 15 bits (SiRF OSP).
    Sum15,
    /// 8 bit Fletcher, `CK_A << 8 | CK_B` (u-blox UBX).
    Fletcher8,
    /// XOR of all bytes.
    Xor8,
}

impl ChecksumAlgorithm {
    pub fn compute(&self, bytes: &[u8]) -> u16 {
        match self {
            Self::Sum16 => sum16(bytes),
            Self::Sum15 => sum16(bytes) & 0x7fff,
            Self::Fletcher8 => fletcher8(bytes),
            Self::Xor8 => bytes.iter().fold(0u8, |acc, byte| acc ^ byte).into(),
        }
    }

    /// Width of the stored checksum on the wire.
    pub fn width(&self) -> usize {
        match self {
            Self::Xor8 => 1,
            _ => 2,
        }
    }
}

pub fn sum16(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |acc, byte| acc.wrapping_add(u16::from(*byte)))
}

pub fn fletcher8(bytes: &[u8]) -> u16 {
    let (a, b) = bytes.iter().fold((0u8, 0u8), |(a, b), byte| {
        let a = a.wrapping_add(*byte);
        (a, b.wrapping_add(a))
    });
    (u16::from(a) << 8) | u16::from(b)
}

#[cfg(test)]
mod tests {
    use crate::checksum::{
        ChecksumAlgorithm,
        fletcher8,
        sum16,
    };

    #[test]
    fn it_sums_with_wraparound() {
        assert_eq!(sum16(&[]), 0);
        assert_eq!(sum16(&[0xff; 258]), (0xffu32 * 258 % 0x10000) as u16);
    }

    #[test]
    fn it_truncates_sirf_sums_to_15_bits() {
        let bytes = [0xff; 200];
        assert_eq!(
            ChecksumAlgorithm::Sum15.compute(&bytes),
            ((0xff * 200) & 0x7fff) as u16
        );
    }

    #[test]
    fn it_computes_ubx_fletcher() {
        // UBX-CFG-MSG poll for NAV-PVT: b5 62 06 01 02 00 01 07 | 11 3a
        let body = [0x06, 0x01, 0x02, 0x00, 0x01, 0x07];
        assert_eq!(fletcher8(&body), 0x113a);
    }

    #[test]
    fn it_xors_bytes() {
        assert_eq!(ChecksumAlgorithm::Xor8.compute(&[0x0f, 0xf0, 0x01]), 0xfe);
        assert_eq!(ChecksumAlgorithm::Xor8.width(), 1);
    }
}

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::EncodeError;

/// Zero-copy byte reader for decoding frames.
pub mod reader;
/// Byte writer for encoding frames into a caller-owned buffer.
pub mod writer;

use writer::Writer;

/// Encodes into a freshly allocated buffer of exactly `len` bytes.
pub fn encode_to_vec<F>(len: usize, encode: F) -> Result<Vec<u8>, EncodeError>
where
    F: FnOnce(&mut Writer<'_>) -> Result<(), EncodeError>,
{
    let mut buf = vec![0u8; len];
    let written = {
        let mut w = Writer::new(&mut buf);
        encode(&mut w)?;
        w.position()
    };
    buf.truncate(written);
    Ok(buf)
}

/// Complemented XOR over `bytes`, the trailing check byte of a TP1 frame.
pub fn xor_checksum(bytes: &[u8]) -> u8 {
    !bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Space separated hex dump, `06 00 80`.
#[derive(Debug, Clone, Copy)]
pub struct Hex<'a>(pub &'a [u8]);

impl fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{encode_to_vec, xor_checksum, Hex};
    use alloc::string::ToString;

    #[test]
    fn checksum_of_known_frame() {
        // L_Data low from 1.1.1 to 1/2/3, GroupValue_Write 0
        let frame = [0xBC, 0x11, 0x01, 0x0A, 0x03, 0xE1, 0x00, 0x80];
        assert_eq!(xor_checksum(&frame), 0x3B);
    }

    #[test]
    fn hex_formats_spaced_upper() {
        assert_eq!(Hex(&[0x06, 0x10, 0xab]).to_string(), "06 10 AB");
        assert_eq!(Hex(&[]).to_string(), "");
    }

    #[test]
    fn encode_to_vec_truncates_to_written() {
        let out = encode_to_vec(8, |w| w.write_be_u16(0x0420)).unwrap();
        assert_eq!(out, [0x04, 0x20]);
    }
}

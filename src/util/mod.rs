use std::fmt::Write as _;

use bytes::Buf;

use crate::config::ByteOrder;

pub trait BufReadBytesExt {
    fn try_get_uint_with(&mut self, order: ByteOrder, width: usize) -> Option<u64>;
}

impl<B: Buf> BufReadBytesExt for B {
    fn try_get_uint_with(&mut self, order: ByteOrder, width: usize) -> Option<u64> {
        if self.remaining() < width {
            return None;
        }
        let value = match order {
            ByteOrder::Little => self.get_uint_le(width),
            ByteOrder::Big => self.get_uint(width),
        };
        Some(value)
    }
}

/// Reads an unsigned integer of `width` bytes at `offset` without a cursor.
pub fn read_uint(bytes: &[u8], offset: usize, width: usize, order: ByteOrder) -> Option<u64> {
    let mut slice = bytes.get(offset..)?;
    slice.try_get_uint_with(order, width)
}

pub fn align_up(offset: u64, unit: u64) -> u64 {
    if unit <= 1 {
        offset
    }
    else {
        offset.div_ceil(unit) * unit
    }
}

pub fn align_down(offset: u64, unit: u64) -> u64 {
    if unit <= 1 {
        offset
    }
    else {
        offset - offset % unit
    }
}

/// Classic 16 bytes per line dump, offsets relative to `base`.
pub fn hex_dump(base: u64, bytes: &[u8]) -> String {
    let mut output = String::new();

    for (i, chunk) in bytes.chunks(16).enumerate() {
        let offset = base + 16 * i as u64;
        let _ = write!(output, "{offset:08x}:");

        for group in chunk.chunks(4) {
            let _ = write!(output, " {}", hex::encode(group));
        }

        output.push('\n');
    }

    output
}

#[cfg(test)]
mod tests {
    use crate::{
        config::ByteOrder,
        util::{
            align_down,
            align_up,
            hex_dump,
            read_uint,
        },
    };

    #[test]
    fn it_aligns_to_quads() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(1, 4), 4);
        assert_eq!(align_up(4, 4), 4);
        assert_eq!(align_down(7, 4), 4);
        assert_eq!(align_up(7, 1), 7);
    }

    #[test]
    fn it_reads_both_byte_orders() {
        let bytes = [0x12, 0x34, 0x56];
        assert_eq!(read_uint(&bytes, 0, 2, ByteOrder::Little), Some(0x3412));
        assert_eq!(read_uint(&bytes, 1, 2, ByteOrder::Big), Some(0x3456));
        assert_eq!(read_uint(&bytes, 2, 2, ByteOrder::Big), None);
    }

    #[test]
    fn it_dumps_hex_lines() {
        let dump = hex_dump(0x200, &[0xde, 0xdf, 0x00, 0xef, 0x01]);
        assert_eq!(dump, "00000200: dedf00ef 01\n");
    }
}

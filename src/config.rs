//! Per-format framing parameters.
//!
//! Everything the parser and the resync engine know about a wire format is
//! in a [`ProtocolConfig`]. The formats themselves live in
//! [`protocol`][crate::protocol].

use std::ops::Range;

use serde::Serialize;

use crate::{
    checksum::ChecksumAlgorithm,
    util::read_uint,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ByteOrder {
    Little,
    Big,
}

/// An unsigned integer at a fixed offset in the record header.
#[derive(Clone, Copy, Debug)]
pub struct UintField {
    pub offset: usize,
    pub width: usize,
    pub order: ByteOrder,
}

impl UintField {
    pub const fn new(offset: usize, width: usize, order: ByteOrder) -> Self {
        Self {
            offset,
            width,
            order,
        }
    }

    pub fn read(&self, bytes: &[u8]) -> Option<u64> {
        read_uint(bytes, self.offset, self.width, self.order)
    }

    pub fn write(&self, bytes: &mut [u8], value: u64) {
        let range = self.offset..self.offset + self.width;
        match self.order {
            ByteOrder::Little => {
                for (i, byte) in bytes[range].iter_mut().enumerate() {
                    *byte = (value >> (8 * i)) as u8;
                }
            }
            ByteOrder::Big => {
                for (i, byte) in bytes[range].iter_mut().rev().enumerate() {
                    *byte = (value >> (8 * i)) as u8;
                }
            }
        }
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.width
    }
}

/// What the length field counts.
#[derive(Clone, Copy, Debug)]
pub enum LengthCounts {
    /// The whole record, header included.
    Total,
    /// The bytes from `start` up to the `trailer` at the end of the record.
    Body { start: usize, trailer: usize },
}

#[derive(Clone, Copy, Debug)]
pub struct LengthField {
    pub field: UintField,
    pub counts: LengthCounts,
}

#[derive(Clone, Debug)]
pub struct HeaderLayout {
    pub size: usize,
    pub length: LengthField,
    pub tag: UintField,
    pub record_number: Option<UintField>,
    /// Raw timestamp bytes carried in the header.
    pub timestamp: Option<Range<usize>>,
}

#[derive(Clone, Copy, Debug)]
pub enum ChecksumPlacement {
    /// Stored in the header. It is zeroed for the computation, which covers
    /// the rest of the record.
    Header { offset: usize },
    /// Stored `from_end` bytes before the end of the record. Covers the bytes
    /// up to it.
    Trailer { from_end: usize },
}

#[derive(Clone, Copy, Debug)]
pub struct ChecksumSpec {
    pub algorithm: ChecksumAlgorithm,
    pub order: ByteOrder,
    pub coverage_start: usize,
    pub placement: ChecksumPlacement,
}

impl ChecksumSpec {
    pub fn field(&self, total: usize) -> UintField {
        let offset = match self.placement {
            ChecksumPlacement::Header { offset } => offset,
            ChecksumPlacement::Trailer { from_end } => total - from_end,
        };
        UintField::new(offset, self.algorithm.width(), self.order)
    }

    pub fn coverage(&self, total: usize) -> Range<usize> {
        match self.placement {
            ChecksumPlacement::Header { .. } => self.coverage_start..total,
            ChecksumPlacement::Trailer { from_end } => self.coverage_start..total - from_end,
        }
    }

    /// Computes the checksum of a complete record, ignoring whatever is stored
    /// in the checksum field.
    pub fn compute(&self, record: &[u8]) -> u16 {
        let field = self.field(record.len());
        let coverage = self.coverage(record.len());

        match self.placement {
            ChecksumPlacement::Header { .. } => {
                let mut zeroed = record[coverage.clone()].to_vec();
                for i in field.range() {
                    if coverage.contains(&i) {
                        zeroed[i - coverage.start] = 0;
                    }
                }
                self.algorithm.compute(&zeroed)
            }
            ChecksumPlacement::Trailer { .. } => self.algorithm.compute(&record[coverage]),
        }
    }
}

/// A record type the resync engine accepts as a landing point.
#[derive(Clone, Copy, Debug)]
pub struct SyncRecord {
    pub tag: u16,
    pub length: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct SyncMarker {
    pub bytes: &'static [u8],
    /// Offset of the marker inside a record.
    pub offset: usize,
    /// Whether every record starts with the marker, or only sync records
    /// carry it.
    pub every_record: bool,
    /// Empty means any well-formed header is accepted.
    pub accept: &'static [SyncRecord],
}

/// Short pseudo record telling the reader to skip to the next sector.
#[derive(Clone, Copy, Debug)]
pub struct Filler {
    pub length: usize,
    pub tag: u16,
}

/// Which sector sequence numbers of 0 are exempt from the continuity check.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ZeroSequence {
    /// Only a 0 on the first sector read.
    #[value(name = "first")]
    FirstSectorOnly,
    /// Every 0, e.g. after the card was re-formatted.
    #[default]
    Always,
}

#[derive(Clone, Copy, Debug)]
pub struct SectorLayout {
    pub size: usize,
    pub payload: usize,
    pub sequence: UintField,
    pub checksum: UintField,
    pub algorithm: ChecksumAlgorithm,
    pub zero_sequence: ZeroSequence,
    /// Leading sectors that carry no records (the directory).
    pub skip: u64,
}

impl SectorLayout {
    /// Logical offset of the first record byte.
    pub fn data_start(&self) -> u64 {
        self.skip * self.payload as u64
    }
}

#[derive(Clone, Debug)]
pub struct ProtocolConfig {
    pub name: &'static str,
    pub header: HeaderLayout,
    pub sync: SyncMarker,
    pub checksum: ChecksumSpec,
    pub end_marker: Option<&'static [u8]>,
    /// Upper bound for the value of the length field.
    pub max_length: usize,
    pub alignment: usize,
    /// Consecutive all-zero alignment units after which resync gives up.
    pub max_zero_units: usize,
    /// First logical offset holding records when not reading sectors.
    pub data_start: u64,
    pub reject_zero_record_number: bool,
    pub filler: Option<Filler>,
    pub sectors: Option<SectorLayout>,
}

impl ProtocolConfig {
    /// Total wire length for a length field value, if the value is within
    /// bounds.
    pub fn total_length(&self, value: u64) -> Option<usize> {
        let value = usize::try_from(value).ok()?;
        if value > self.max_length {
            return None;
        }

        let total = match self.header.length.counts {
            LengthCounts::Total => value,
            LengthCounts::Body { start, trailer } => start + value + trailer,
        };

        (total >= self.header.size + self.trailer_size()).then_some(total)
    }

    /// Length field value for a record with `payload` bytes after the header.
    pub fn length_value(&self, payload: usize) -> u64 {
        let total = self.header.size + payload + self.trailer_size();
        match self.header.length.counts {
            LengthCounts::Total => total as u64,
            LengthCounts::Body { start, trailer } => (total - start - trailer) as u64,
        }
    }

    pub fn trailer_size(&self) -> usize {
        match self.header.length.counts {
            LengthCounts::Total => 0,
            LengthCounts::Body { trailer, .. } => trailer,
        }
    }

    /// Bytes between header and trailer.
    pub fn payload_range(&self, total: usize) -> Range<usize> {
        self.header.size..total - self.trailer_size()
    }

    pub fn accepts_sync_record(&self, tag: u16, total: usize) -> bool {
        self.sync.accept.is_empty()
            || self
                .sync
                .accept
                .iter()
                .any(|record| record.tag == tag && record.length == total)
    }

    pub fn start_offset(&self) -> u64 {
        match &self.sectors {
            Some(sectors) => sectors.data_start(),
            None => self.data_start,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        config::{
            ByteOrder,
            UintField,
        },
        protocol::{
            dblk,
            sirf,
            ubx,
        },
    };

    #[test]
    fn it_writes_fields_in_either_order() {
        let mut bytes = [0u8; 4];
        UintField::new(0, 2, ByteOrder::Little).write(&mut bytes, 0x1234);
        UintField::new(2, 2, ByteOrder::Big).write(&mut bytes, 0x5678);
        assert_eq!(bytes, [0x34, 0x12, 0x56, 0x78]);
    }

    #[test]
    fn it_bounds_record_lengths() {
        let config = dblk::config();
        assert_eq!(config.total_length(28), Some(28));
        assert_eq!(config.total_length(19), None);
        assert_eq!(config.total_length(1025), None);

        let config = sirf::config();
        assert_eq!(config.total_length(1), Some(9));
        assert_eq!(config.total_length(0), None);
        assert_eq!(config.total_length(2048), None);
        assert_eq!(config.payload_range(49), 5..45);

        let config = ubx::config();
        assert_eq!(config.total_length(0), Some(8));
        assert_eq!(config.length_value(92), 92);
        assert_eq!(config.payload_range(100), 6..98);
    }

    #[test]
    fn it_keeps_the_timestamp_range_in_copies() {
        let config = dblk::config();
        let copy = config.clone();
        assert_eq!(copy.header.timestamp, Some(8..18));
        assert_eq!(config.header.timestamp, copy.header.timestamp);
        assert_eq!(sirf::config().header.timestamp, None);
    }
}

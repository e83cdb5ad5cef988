//! Reading and validating single records.

use std::ops::Range;

use bytes::{
    Bytes,
    BytesMut,
};

use crate::{
    Error,
    config::ProtocolConfig,
    registry::Registry,
    source::{
        ByteSource,
        Fill,
    },
    util::align_up,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// Total wire length of the record.
    pub length: usize,
    pub tag: u16,
    pub record_number: Option<u32>,
    /// Raw timestamp bytes, decoding them is up to the format.
    pub timestamp: Option<Bytes>,
    /// Checksum as stored in the record.
    pub checksum: Option<u16>,
}

/// A record that passed all framing checks.
#[derive(Clone, Debug)]
pub struct Record {
    /// Logical offset of the first byte.
    pub offset: u64,
    pub header: FrameHeader,
    pub raw: Bytes,
    /// Range of `raw` between header and trailer.
    pub payload: Range<usize>,
}

impl Record {
    pub fn payload(&self) -> &[u8] {
        &self.raw[self.payload.clone()]
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// Why a record was rejected.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Corruption {
    #[error("sync marker missing")]
    SyncMarker,

    #[error("length field {value} out of bounds")]
    Length { value: u64 },

    #[error("record number is zero")]
    ZeroRecordNumber,

    #[error("end marker missing")]
    EndMarker,

    #[error("checksum mismatch: stored {stored:#06x}, computed {computed:#06x}")]
    Checksum { stored: u16, computed: u16 },

    #[error("{name} records are {required} bytes, got {length}")]
    RequiredLength {
        name: &'static str,
        required: usize,
        length: usize,
    },

    #[error("sector {sector} discarded")]
    Sector { sector: u64 },
}

impl Corruption {
    /// Whether this counts as a checksum error in the statistics.
    pub fn is_checksum_error(&self) -> bool {
        matches!(self, Self::Checksum { .. } | Self::Sector { .. })
    }
}

#[derive(Clone, Debug)]
pub enum Parsed {
    Record(Record),

    /// The record at `offset` is bad. Resynchronization should scan from
    /// `resume_at`.
    Corrupt {
        offset: u64,
        resume_at: u64,
        reason: Corruption,
        /// Header bytes as read, if any.
        header: Bytes,
    },

    /// Filler up to the next sector was skipped.
    Skipped { offset: u64, resume_at: u64 },

    EndOfData { offset: u64 },
}

#[derive(Debug)]
pub struct FrameParser {
    config: ProtocolConfig,
}

impl FrameParser {
    pub fn new(config: ProtocolConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Reads the record at the current (aligned) position of `source`.
    ///
    /// On success the source is left at the aligned position after the
    /// record. After a [`Parsed::Corrupt`] the position is unspecified.
    pub fn next<S: ByteSource>(&mut self, source: &mut S, registry: &Registry) -> Result<Parsed, Error> {
        let config = &self.config;
        let header_size = config.header.size;

        let offset = align_up(source.position(), config.alignment as u64);
        source.seek(offset)?;

        let mut raw = BytesMut::zeroed(header_size);
        match source.fill(&mut raw)? {
            Fill::Complete => {}
            Fill::EndOfData { .. } => return Ok(Parsed::EndOfData { offset }),
            Fill::Discarded { sector, resume_at } => {
                return Ok(corrupt(offset, resume_at, Corruption::Sector { sector }, raw));
            }
        }

        let sync = &config.sync;
        if sync.every_record && raw.get(sync.offset..sync.offset + sync.bytes.len()) != Some(sync.bytes) {
            return Ok(corrupt(offset, offset, Corruption::SyncMarker, raw));
        }

        let length_value = config.header.length.field.read(&raw).unwrap_or_default();
        let tag = config.header.tag.read(&raw).unwrap_or_default() as u16;

        if let Some(filler) = &config.filler {
            if length_value == filler.length as u64 && tag == filler.tag {
                if let Some(next) = source.next_boundary(offset) {
                    tracing::trace!(offset, next, "skipping filler");
                    source.seek(next)?;
                    return Ok(Parsed::Skipped {
                        offset,
                        resume_at: next,
                    });
                }
            }
        }

        let Some(length) = config.total_length(length_value)
        else {
            return Ok(corrupt(
                offset,
                offset,
                Corruption::Length {
                    value: length_value,
                },
                raw,
            ));
        };

        let record_number = config
            .header
            .record_number
            .and_then(|field| field.read(&raw))
            .map(|number| number as u32);
        if config.reject_zero_record_number && record_number == Some(0) {
            return Ok(corrupt(offset, offset, Corruption::ZeroRecordNumber, raw));
        }

        raw.resize(length, 0);
        match source.fill(&mut raw[header_size..])? {
            Fill::Complete => {}
            Fill::EndOfData { .. } => return Ok(Parsed::EndOfData { offset }),
            Fill::Discarded { sector, resume_at } => {
                raw.truncate(header_size);
                return Ok(corrupt(offset, resume_at, Corruption::Sector { sector }, raw));
            }
        }

        if let Some(marker) = config.end_marker {
            if !raw.ends_with(marker) {
                raw.truncate(header_size);
                return Ok(corrupt(offset, offset, Corruption::EndMarker, raw));
            }
        }

        let stored = config
            .checksum
            .field(length)
            .read(&raw)
            .unwrap_or_default() as u16;
        let computed = config.checksum.compute(&raw);
        if stored != computed {
            raw.truncate(header_size);
            return Ok(corrupt(
                offset,
                offset,
                Corruption::Checksum { stored, computed },
                raw,
            ));
        }

        if let Some(entry) = registry.get(tag) {
            if let Some(required) = entry.required_len() {
                if required != length {
                    raw.truncate(header_size);
                    return Ok(corrupt(
                        offset,
                        offset,
                        Corruption::RequiredLength {
                            name: entry.name,
                            required,
                            length,
                        },
                        raw,
                    ));
                }
            }
        }

        source.seek(align_up(offset + length as u64, config.alignment as u64))?;

        let raw = raw.freeze();
        let header = FrameHeader {
            length,
            tag,
            record_number,
            timestamp: config
                .header
                .timestamp
                .clone()
                .map(|range| raw.slice(range)),
            checksum: Some(stored),
        };

        Ok(Parsed::Record(Record {
            offset,
            header,
            payload: config.payload_range(length),
            raw,
        }))
    }
}

fn corrupt(offset: u64, resume_at: u64, reason: Corruption, header: BytesMut) -> Parsed {
    Parsed::Corrupt {
        offset,
        resume_at,
        reason,
        header: header.freeze(),
    }
}

/// Builds a valid record. Fields the format does not have are ignored.
pub fn encode(
    config: &ProtocolConfig,
    tag: u16,
    record_number: Option<u32>,
    timestamp: Option<&[u8]>,
    payload: &[u8],
) -> Vec<u8> {
    let header = &config.header;
    let length = header.size + payload.len() + config.trailer_size();
    let mut raw = vec![0u8; length];

    if config.sync.every_record {
        let sync = &config.sync;
        raw[sync.offset..sync.offset + sync.bytes.len()].copy_from_slice(sync.bytes);
    }

    header
        .length
        .field
        .write(&mut raw, config.length_value(payload.len()));
    header.tag.write(&mut raw, tag.into());

    if let (Some(field), Some(number)) = (header.record_number, record_number) {
        field.write(&mut raw, number.into());
    }
    if let (Some(range), Some(timestamp)) = (header.timestamp.clone(), timestamp) {
        let count = timestamp.len().min(range.len());
        raw[range.start..range.start + count].copy_from_slice(&timestamp[..count]);
    }

    raw[header.size..header.size + payload.len()].copy_from_slice(payload);

    if let Some(marker) = config.end_marker {
        raw[length - marker.len()..].copy_from_slice(marker);
    }

    let checksum = config.checksum.compute(&raw);
    config.checksum.field(length).write(&mut raw, checksum.into());

    raw
}

/// Appends zero padding up to the format's alignment.
pub fn pad(config: &ProtocolConfig, stream: &mut Vec<u8>) {
    let aligned = align_up(stream.len() as u64, config.alignment as u64) as usize;
    stream.resize(aligned, 0);
}

//! Finding the next record after corruption.
//!
//! The engine scans forward one alignment unit at a time for the format's
//! sync marker. A hit is only accepted if the header around it looks like a
//! record the format allows to resync on. Long runs of zero bytes mean the
//! rest of the medium was never written, and the scan gives up.

use crate::{
    Error,
    config::ProtocolConfig,
    source::{
        ByteSource,
        Fill,
    },
    stats::DecodeStats,
    util::{
        align_down,
        align_up,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resync {
    /// A plausible record starts at this offset. The source is positioned
    /// there.
    Found(u64),

    /// The data ended while scanning.
    EndOfData(u64),

    /// Too many zero units in a row.
    Exhausted(u64),
}

#[derive(Debug, Default)]
pub struct ResyncEngine {
    last_start: Option<u64>,
}

impl ResyncEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans from `start` for the next record, never returning `bad`.
    pub fn resync<S: ByteSource>(
        &mut self,
        config: &ProtocolConfig,
        source: &mut S,
        start: u64,
        bad: Option<u64>,
        stats: &mut DecodeStats,
    ) -> Result<Resync, Error> {
        stats.resyncs += 1;

        let unit = config.alignment.max(1);
        let marker = config.sync.bytes;
        let origin = align_down(start, unit as u64);

        let mut position = origin;
        if self.last_start == Some(origin) {
            // the previous resync from here led nowhere
            position = align_up(origin + (config.sync.offset + marker.len()) as u64, unit as u64);
        }
        self.last_start = Some(origin);

        tracing::debug!(start, origin, position, ?bad, "resyncing");

        source.seek(position)?;
        let mut window: Vec<u8> = Vec::with_capacity(marker.len() + unit);
        let mut chunk = vec![0u8; unit];
        let mut zeros = 0;

        loop {
            match source.fill(&mut chunk)? {
                Fill::Complete => {}
                Fill::EndOfData { .. } => {
                    tracing::debug!(position, "end of data while resyncing");
                    return Ok(Resync::EndOfData(position));
                }
                Fill::Discarded { sector, resume_at } => {
                    tracing::debug!(sector, resume_at, "sector discarded while resyncing");
                    stats.checksum_errors += 1;
                    window.clear();
                    zeros = 0;
                    position = resume_at;
                    continue;
                }
            }

            if chunk.iter().all(|byte| *byte == 0) {
                zeros += 1;
                if zeros > config.max_zero_units {
                    tracing::warn!(position, zeros, "too many zeros, giving up");
                    return Ok(Resync::Exhausted(position));
                }
            }
            else {
                zeros = 0;
            }

            for (i, byte) in chunk.iter().enumerate() {
                window.push(*byte);
                if window.len() > marker.len() {
                    window.remove(0);
                }
                if window != marker {
                    continue;
                }

                let end = position + i as u64 + 1;
                let Some(candidate) = (end - marker.len() as u64).checked_sub(config.sync.offset as u64)
                else {
                    continue;
                };
                if candidate % unit as u64 != 0 || candidate < origin || Some(candidate) == bad {
                    continue;
                }

                if self.plausible(config, source, candidate)? {
                    tracing::debug!(candidate, "resynced");
                    source.seek(candidate)?;
                    return Ok(Resync::Found(candidate));
                }

                tracing::trace!(candidate, "rejected sync candidate");
                source.seek(position + unit as u64)?;
            }

            position += unit as u64;
        }
    }

    /// Checks the header at `candidate` against the format's resync rules.
    fn plausible<S: ByteSource>(
        &self,
        config: &ProtocolConfig,
        source: &mut S,
        candidate: u64,
    ) -> Result<bool, Error> {
        let mut header = vec![0u8; config.header.size];
        source.seek(candidate)?;
        if source.fill(&mut header)? != Fill::Complete {
            return Ok(false);
        }

        let length_value = config.header.length.field.read(&header).unwrap_or_default();
        let Some(length) = config.total_length(length_value)
        else {
            return Ok(false);
        };
        let tag = config.header.tag.read(&header).unwrap_or_default() as u16;

        if config.reject_zero_record_number {
            let number = config
                .header
                .record_number
                .and_then(|field| field.read(&header));
            if number == Some(0) {
                return Ok(false);
            }
        }

        Ok(config.accepts_sync_record(tag, length))
    }
}

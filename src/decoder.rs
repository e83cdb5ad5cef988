//! The decode loop.
//!
//! [`StreamDecoder`] pulls records from a [`ByteSource`] through the
//! [`FrameParser`], resynchronizes after corruption, applies the record
//! filters and limits, decodes and hands every record to the registry's
//! emitters. Counters go to [`DecodeStats`], which is complete no matter
//! how the run ended.

use std::collections::BTreeSet;

use crate::{
    Error,
    config::ProtocolConfig,
    emit::Emit,
    frame::{
        FrameParser,
        Parsed,
        Record,
    },
    registry::Registry,
    resync::{
        Resync,
        ResyncEngine,
    },
    source::{
        ByteSource,
        Stop,
    },
    stats::{
        DecodeStats,
        Report,
    },
    util::hex_dump,
};

/// Which records are decoded and when to stop.
#[derive(Clone, Debug, Default)]
pub struct Limits {
    /// Stop after this many records.
    pub count: Option<u64>,
    /// Stop at the first record starting past this offset.
    pub end_offset: Option<u64>,
    /// Skip records numbered below this.
    pub first_record: Option<u32>,
    /// Stop at the first record numbered above this.
    pub last_record: Option<u32>,
    /// Only these types, all if `None`.
    pub tags: Option<BTreeSet<u16>>,
}

#[derive(Clone, Debug, Default)]
pub struct DecodeOptions {
    pub verbosity: u8,
    /// Start offset. Negative values count from the end, `-1` is the end
    /// itself. Defaults to the format's first record offset.
    pub jump: Option<i64>,
    pub limits: Limits,
    pub stop: Stop,
}

/// How a decode run ended. All of these are clean.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    EndOfData,
    /// Resync ran into too many zeros, the rest was never written.
    Exhausted,
    Limit,
    Stopped,
}

pub struct StreamDecoder<S> {
    source: S,
    parser: FrameParser,
    resync: ResyncEngine,
    registry: Registry,
    stats: DecodeStats,
    options: DecodeOptions,
    last_record_number: Option<u32>,
    handled: u64,
}

impl<S: ByteSource> StreamDecoder<S> {
    pub fn new(source: S, config: ProtocolConfig, registry: Registry, options: DecodeOptions) -> Self {
        Self {
            source,
            parser: FrameParser::new(config),
            resync: ResyncEngine::new(),
            registry,
            stats: DecodeStats::default(),
            options,
            last_record_number: None,
            handled: 0,
        }
    }

    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &ProtocolConfig {
        self.parser.config()
    }

    /// End of processing summary.
    pub fn report(&self) -> Report<'_> {
        self.stats.report(&self.registry)
    }

    /// Decodes until the data ends, a limit is hit or the decoder is stopped.
    ///
    /// The statistics are final when this returns, also on error.
    pub fn run(&mut self) -> Result<Termination, Error> {
        let result = self.decode();

        if let Err(error) = &result {
            tracing::error!(?error, "decoding aborted");
            self.stats.end_offset = self.source.position();
        }
        self.stats.sequence_gaps = self.source.sequence_gaps();
        self.stats.last_sequence = self.source.last_sequence();
        self.registry.finish();

        result
    }

    fn start_offset(&mut self) -> Result<u64, Error> {
        let jump = match self.options.jump {
            None => return Ok(self.parser.config().start_offset()),
            Some(jump) => jump,
        };

        if let Ok(offset) = u64::try_from(jump) {
            return Ok(offset);
        }

        let size = self.source.size()?;
        if jump == -1 {
            return Ok(size);
        }
        size.checked_sub(jump.unsigned_abs())
            .ok_or(Error::InvalidJump { jump, size })
    }

    fn decode(&mut self) -> Result<Termination, Error> {
        let start = self.start_offset()?;
        tracing::debug!(start, protocol = self.parser.config().name, "starting");
        self.source.seek(start)?;

        loop {
            if self.options.stop.is_stopped() {
                self.stats.end_offset = self.source.position();
                return Ok(Termination::Stopped);
            }

            match self.parser.next(&mut self.source, &self.registry)? {
                Parsed::Record(record) => {
                    self.stats.end_offset = self.source.position();
                    if let Some(termination) = self.handle(record) {
                        return Ok(termination);
                    }
                }
                Parsed::Skipped { .. } => {}
                Parsed::Corrupt {
                    offset,
                    resume_at,
                    reason,
                    header,
                } => {
                    tracing::warn!(offset, %reason, "corrupt record");
                    if self.options.verbosity >= 3 && !header.is_empty() {
                        tracing::info!("header at {offset}:\n{}", hex_dump(offset, &header));
                    }
                    if reason.is_checksum_error() {
                        self.stats.checksum_errors += 1;
                    }

                    let config = self.parser.config();
                    match self.resync.resync(
                        config,
                        &mut self.source,
                        resume_at,
                        Some(offset),
                        &mut self.stats,
                    )? {
                        Resync::Found(_) => {}
                        Resync::EndOfData(offset) => {
                            self.stats.end_offset = offset;
                            return Ok(self.end_of_data());
                        }
                        Resync::Exhausted(offset) => {
                            self.stats.end_offset = offset;
                            return Ok(Termination::Exhausted);
                        }
                    }
                }
                Parsed::EndOfData { offset } => {
                    self.stats.end_offset = offset;
                    return Ok(self.end_of_data());
                }
            }
        }
    }

    /// A tail mode source only ends when stopped.
    fn end_of_data(&self) -> Termination {
        if self.options.stop.is_stopped() {
            Termination::Stopped
        }
        else {
            Termination::EndOfData
        }
    }

    /// Filters, counts, decodes and emits one record.
    ///
    /// Records of unknown type and records that fail to decode are counted
    /// but not emitted.
    fn handle(&mut self, record: Record) -> Option<Termination> {
        let limits = &self.options.limits;
        let tag = record.header.tag;

        if limits.end_offset.is_some_and(|end| record.offset > end) {
            self.stats.end_offset = record.offset;
            return Some(Termination::Limit);
        }

        if let Some(number) = record.header.record_number {
            if let Some(last) = self.last_record_number {
                let expected = last.wrapping_add(1);
                if number != expected {
                    self.stats.record_gaps += 1;
                    if number <= last {
                        tracing::warn!(offset = record.offset, last, number, "record number went backwards");
                    }
                    else {
                        tracing::warn!(offset = record.offset, expected, number, "record number gap");
                    }
                }
            }
            self.last_record_number = Some(number);
        }

        if limits.tags.as_ref().is_some_and(|tags| !tags.contains(&tag)) {
            self.stats.filtered += 1;
            return None;
        }

        if let Some(number) = record.header.record_number {
            if limits.last_record.is_some_and(|last| number > last) {
                self.stats.end_offset = record.offset;
                return Some(Termination::Limit);
            }
            if limits.first_record.is_some_and(|first| number < first) {
                self.stats.filtered += 1;
                return None;
            }
        }

        self.stats.count_record(tag, record.len());
        self.handled += 1;
        let done = limits.count.is_some_and(|count| self.handled >= count);

        let Some(entry) = self.registry.get(tag).copied()
        else {
            tracing::debug!(offset = record.offset, tag, "unknown record type");
            self.stats.unknown_types += 1;
            return done.then_some(Termination::Limit);
        };

        match (entry.decode)(&record) {
            Ok(fields) => {
                self.stats.emit_errors += self.registry.emit(&Emit {
                    verbosity: self.options.verbosity,
                    record: &record,
                    name: Some(entry.name),
                    fields: &fields,
                });
            }
            Err(error) => {
                tracing::warn!(offset = record.offset, name = entry.name, %error, "decode failed");
                self.stats.decode_errors += 1;
            }
        }

        done.then_some(Termination::Limit)
    }
}

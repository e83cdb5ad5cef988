use std::{
    collections::BTreeMap,
    fmt::{
        self,
        Display,
    },
};

use serde::Serialize;

use crate::registry::Registry;

/// Counters kept for one decode run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DecodeStats {
    pub records: u64,
    pub bytes: u64,
    pub per_type: BTreeMap<u16, u64>,
    pub checksum_errors: u64,
    pub unknown_types: u64,
    pub resyncs: u64,
    /// Sequence number of the last storage sector read.
    pub last_sequence: Option<u16>,
    pub sequence_gaps: u64,
    /// Record numbers that went backwards or skipped ahead.
    pub record_gaps: u64,
    pub decode_errors: u64,
    pub emit_errors: u64,
    /// Records dropped by the type filter or the record number bounds.
    pub filtered: u64,
    /// Logical offset at which decoding stopped.
    pub end_offset: u64,
}

impl DecodeStats {
    pub fn count_record(&mut self, tag: u16, length: usize) {
        self.records += 1;
        self.bytes += length as u64;
        *self.per_type.entry(tag).or_default() += 1;
    }

    /// Summary with type names resolved through `registry`.
    pub fn report<'a>(&'a self, registry: &'a Registry) -> Report<'a> {
        Report {
            stats: self,
            registry,
        }
    }
}

pub struct Report<'a> {
    stats: &'a DecodeStats,
    registry: &'a Registry,
}

impl Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats;

        writeln!(
            f,
            "*** end of processing @{} (0x{:x}), processed: {} records, {} bytes",
            stats.end_offset, stats.end_offset, stats.records, stats.bytes
        )?;
        writeln!(
            f,
            "*** resyncs: {}, chksum_errs: {}, unk_types: {}, seq_gaps: {}, rec_gaps: {}",
            stats.resyncs,
            stats.checksum_errors,
            stats.unknown_types,
            stats.sequence_gaps,
            stats.record_gaps
        )?;
        if stats.decode_errors > 0 || stats.emit_errors > 0 || stats.filtered > 0 {
            writeln!(
                f,
                "*** decode_errs: {}, emit_errs: {}, filtered: {}",
                stats.decode_errors, stats.emit_errors, stats.filtered
            )?;
        }
        if let Some(sequence) = stats.last_sequence {
            writeln!(f, "*** last sector sequence: {sequence}")?;
        }

        for (tag, count) in &stats.per_type {
            match self.registry.name(*tag) {
                Some(name) => writeln!(f, "    {name:<16} ({tag:#06x}): {count}")?,
                None => writeln!(f, "    {:<16} ({tag:#06x}): {count}", "unknown")?,
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        protocol::Protocol,
        stats::DecodeStats,
    };

    #[test]
    fn it_reports_counts_with_names() {
        let registry = Protocol::Sirf.registry().build();
        let mut stats = DecodeStats::default();
        stats.count_record(2, 49);
        stats.count_record(2, 49);
        stats.count_record(0xfe, 12);
        stats.end_offset = 110;

        let report = stats.report(&registry).to_string();
        assert!(report.contains("processed: 3 records, 110 bytes"));
        assert!(report.contains("NAV_DATA"));
        assert!(report.contains("(0x0002): 2"));
        assert!(report.contains("unknown"));
    }
}

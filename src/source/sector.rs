//! Reassembly of sector-fragmented storage.
//!
//! The tag writes its log in fixed-size sectors. Each sector carries a
//! payload followed by a trailer with a sequence number and a checksum. This
//! module strips the trailers and presents the payloads as one logical
//! stream: logical offset `L` lives in sector `L / payload` at byte
//! `L % payload`.

use crate::{
    Error,
    config::{
        SectorLayout,
        ZeroSequence,
    },
    source::{
        ByteSource,
        Fill,
    },
};

#[derive(Debug)]
struct LoadedSector {
    index: u64,
    payload: Vec<u8>,
}

#[derive(Debug)]
enum Load {
    Loaded,
    EndOfData,
    Discarded,
}

#[derive(Debug)]
pub struct SectorReassembler<S> {
    inner: S,
    layout: SectorLayout,
    position: u64,
    current: Option<LoadedSector>,
    /// Highest sector validated so far, with its sequence number.
    highest: Option<(u64, u16)>,
    sequence_gaps: u64,
    buffer: Vec<u8>,
}

impl<S: ByteSource> SectorReassembler<S> {
    pub fn new(inner: S, layout: SectorLayout) -> Self {
        Self {
            inner,
            layout,
            position: 0,
            current: None,
            highest: None,
            sequence_gaps: 0,
            buffer: vec![0; layout.size],
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn payload_size(&self) -> u64 {
        self.layout.payload as u64
    }

    fn load(&mut self, index: u64) -> Result<Load, Error> {
        let physical = index * self.layout.size as u64;
        self.inner.seek(physical)?;

        match self.inner.fill(&mut self.buffer)? {
            Fill::Complete => {}
            Fill::EndOfData { filled } => {
                if filled > 0 {
                    tracing::debug!(sector = index, filled, "partial sector at end of data");
                }
                return Ok(Load::EndOfData);
            }
            Fill::Discarded { .. } => return Ok(Load::Discarded),
        }

        let stored = self.layout.checksum.read(&self.buffer);
        let computed = self
            .layout
            .algorithm
            .compute(&self.buffer[..self.layout.checksum.offset]);

        if stored != Some(u64::from(computed)) {
            tracing::warn!(
                sector = index,
                offset = physical,
                ?stored,
                computed,
                "sector checksum mismatch, discarding sector"
            );
            self.current = None;
            return Ok(Load::Discarded);
        }

        let sequence = self.layout.sequence.read(&self.buffer).unwrap_or_default() as u16;
        self.check_sequence(index, sequence);

        self.current = Some(LoadedSector {
            index,
            payload: self.buffer[..self.layout.payload].to_vec(),
        });

        Ok(Load::Loaded)
    }

    fn check_sequence(&mut self, index: u64, sequence: u16) {
        match self.highest {
            Some((highest, _)) if index <= highest => return,
            Some((highest, previous)) if index == highest + 1 => {
                let exempt = sequence == 0
                    && (self.layout.zero_sequence == ZeroSequence::Always
                        || index == self.layout.skip);
                let expected = previous.wrapping_add(1);

                if !exempt && sequence != expected {
                    tracing::warn!(sector = index, sequence, expected, "sector sequence gap");
                    self.sequence_gaps += 1;
                }
            }
            _ => {}
        }

        self.highest = Some((index, sequence));
    }
}

impl<S: ByteSource> ByteSource for SectorReassembler<S> {
    fn fill(&mut self, buffer: &mut [u8]) -> Result<Fill, Error> {
        let payload_size = self.payload_size();
        let mut filled = 0;

        while filled < buffer.len() {
            let index = self.position / payload_size;
            let within = (self.position % payload_size) as usize;

            let loaded = matches!(&self.current, Some(sector) if sector.index == index);
            if !loaded {
                match self.load(index)? {
                    Load::Loaded => {}
                    Load::EndOfData => return Ok(Fill::EndOfData { filled }),
                    Load::Discarded => {
                        let resume_at = (index + 1) * payload_size;
                        self.position = resume_at;
                        return Ok(Fill::Discarded {
                            sector: index,
                            resume_at,
                        });
                    }
                }
            }

            let Some(sector) = &self.current
            else {
                return Ok(Fill::EndOfData { filled });
            };

            let count = (buffer.len() - filled).min(self.layout.payload - within);
            buffer[filled..filled + count].copy_from_slice(&sector.payload[within..within + count]);
            filled += count;
            self.position += count as u64;
        }

        Ok(Fill::Complete)
    }

    fn seek(&mut self, offset: u64) -> Result<(), Error> {
        self.position = offset;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn size(&mut self) -> Result<u64, Error> {
        let physical = self.inner.size()?;
        let sector_size = self.layout.size as u64;
        let partial = (physical % sector_size).min(self.payload_size());
        Ok(physical / sector_size * self.payload_size() + partial)
    }

    fn next_boundary(&self, offset: u64) -> Option<u64> {
        Some((offset / self.payload_size() + 1) * self.payload_size())
    }

    fn sequence_gaps(&self) -> u64 {
        self.sequence_gaps
    }

    fn last_sequence(&self) -> Option<u16> {
        self.highest.map(|(_, sequence)| sequence)
    }
}

/// Builds one physical sector around `payload`, which is zero padded to the
/// payload size.
pub fn encode_sector(layout: &SectorLayout, sequence: u16, payload: &[u8]) -> Vec<u8> {
    let mut sector = vec![0u8; layout.size];
    let count = payload.len().min(layout.payload);
    sector[..count].copy_from_slice(&payload[..count]);
    layout.sequence.write(&mut sector, sequence.into());

    let checksum = layout.algorithm.compute(&sector[..layout.checksum.offset]);
    layout.checksum.write(&mut sector, checksum.into());

    sector
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::{
        config::ZeroSequence,
        protocol::dblk,
        source::{
            ByteSource,
            Fill,
            Input,
            SectorReassembler,
            sector::encode_sector,
        },
    };

    fn image(sectors: &[Vec<u8>]) -> Input<Cursor<Vec<u8>>> {
        Input::new(Cursor::new(sectors.concat()))
    }

    #[test]
    fn it_strips_trailers_and_joins_sectors() {
        let layout = dblk::SECTORS;
        let sectors = [
            encode_sector(&layout, 0, &[0xaa; 508]),
            encode_sector(&layout, 1, &[0x11; 508]),
            encode_sector(&layout, 2, &[0x22; 508]),
        ];
        let mut reassembler = SectorReassembler::new(image(&sectors), layout);

        reassembler.seek(1014).unwrap();
        let mut buffer = [0u8; 8];
        assert_eq!(reassembler.fill(&mut buffer).unwrap(), Fill::Complete);
        assert_eq!(buffer, [0x11, 0x11, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22]);
        assert_eq!(reassembler.position(), 1022);
        assert_eq!(reassembler.sequence_gaps(), 0);
        assert_eq!(reassembler.size().unwrap(), 3 * 508);
    }

    #[test]
    fn it_discards_sectors_with_bad_checksums() {
        let layout = dblk::SECTORS;
        let mut bad = encode_sector(&layout, 2, &[0x22; 508]);
        bad[17] ^= 0x40;
        let sectors = [
            encode_sector(&layout, 0, &[]),
            encode_sector(&layout, 1, &[0x11; 508]),
            bad,
            encode_sector(&layout, 3, &[0x33; 508]),
        ];
        let mut reassembler = SectorReassembler::new(image(&sectors), layout);

        reassembler.seek(1010).unwrap();
        let mut buffer = [0u8; 16];
        assert_eq!(
            reassembler.fill(&mut buffer).unwrap(),
            Fill::Discarded {
                sector: 2,
                resume_at: 1524
            }
        );
        assert_eq!(reassembler.position(), 1524);

        assert_eq!(reassembler.fill(&mut buffer).unwrap(), Fill::Complete);
        assert_eq!(buffer, [0x33; 16]);
        assert_eq!(reassembler.sequence_gaps(), 0);
    }

    #[test]
    fn it_counts_sequence_gaps_and_keeps_going() {
        let layout = dblk::SECTORS;
        let sectors = [
            encode_sector(&layout, 0, &[]),
            encode_sector(&layout, 1, &[1; 508]),
            encode_sector(&layout, 7, &[2; 508]),
            encode_sector(&layout, 8, &[3; 508]),
        ];
        let mut reassembler = SectorReassembler::new(image(&sectors), layout);
        reassembler.seek(508).unwrap();

        let mut buffer = vec![0u8; 3 * 508];
        assert_eq!(reassembler.fill(&mut buffer).unwrap(), Fill::Complete);
        assert_eq!(buffer[508], 2);
        assert_eq!(buffer[1016], 3);
        assert_eq!(reassembler.sequence_gaps(), 1);
        assert_eq!(reassembler.last_sequence(), Some(8));
    }

    #[test]
    fn it_applies_the_zero_sequence_policy() {
        let sectors = |layout| {
            [
                encode_sector(&layout, 0, &[]),
                encode_sector(&layout, 1, &[1; 508]),
                encode_sector(&layout, 0, &[2; 508]),
            ]
        };

        for (policy, gaps) in [(ZeroSequence::Always, 0), (ZeroSequence::FirstSectorOnly, 1)] {
            let mut layout = dblk::SECTORS;
            layout.zero_sequence = policy;
            let mut reassembler = SectorReassembler::new(image(&sectors(layout)), layout);
            reassembler.seek(508).unwrap();

            let mut buffer = vec![0u8; 2 * 508];
            assert_eq!(reassembler.fill(&mut buffer).unwrap(), Fill::Complete);
            assert_eq!(reassembler.sequence_gaps(), gaps, "{policy:?}");
        }
    }

    #[test]
    fn it_ends_at_a_partial_sector() {
        let layout = dblk::SECTORS;
        let mut bytes = encode_sector(&layout, 0, &[]);
        bytes.extend_from_slice(&[0u8; 100]);
        let mut reassembler = SectorReassembler::new(Input::new(Cursor::new(bytes)), layout);

        reassembler.seek(508).unwrap();
        let mut buffer = [0u8; 4];
        assert_eq!(
            reassembler.fill(&mut buffer).unwrap(),
            Fill::EndOfData { filled: 0 }
        );
    }
}

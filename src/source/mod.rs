//! Byte sources the decoder pulls from.
//!
//! A [`ByteSource`] is a seekable cursor over a logical byte stream. Static
//! files end at their last byte; in tail mode an [`Input`] keeps waiting for
//! the file to grow until it is told to [`Stop`].

pub mod sector;

use std::{
    io::{
        Read,
        Seek,
        SeekFrom,
    },
    sync::{
        Arc,
        atomic::{
            AtomicBool,
            Ordering,
        },
    },
    time::{
        Duration,
        Instant,
    },
};

pub use self::sector::SectorReassembler;
use crate::{
    Error,
    config::ProtocolConfig,
};

/// Longest single sleep while waiting for data, so a stop request is noticed
/// promptly.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Result of [`ByteSource::fill`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fill {
    /// The buffer was filled completely.
    Complete,

    /// The stream ended permanently after `filled` bytes.
    EndOfData { filled: usize },

    /// A storage unit failed validation and was dropped. The cursor was moved
    /// to `resume_at`, the first byte after it.
    Discarded { sector: u64, resume_at: u64 },
}

pub trait ByteSource {
    /// Fills `buffer` from the current position.
    fn fill(&mut self, buffer: &mut [u8]) -> Result<Fill, Error>;

    fn seek(&mut self, offset: u64) -> Result<(), Error>;

    fn position(&self) -> u64;

    /// Logical size of the stream as it is right now.
    fn size(&mut self) -> Result<u64, Error>;

    /// Start of the storage unit following the one containing `offset`, for
    /// sources that have such units.
    fn next_boundary(&self, _offset: u64) -> Option<u64> {
        None
    }

    fn sequence_gaps(&self) -> u64 {
        0
    }

    fn last_sequence(&self) -> Option<u16> {
        None
    }
}

impl<T: ?Sized + ByteSource> ByteSource for &mut T {
    fn fill(&mut self, buffer: &mut [u8]) -> Result<Fill, Error> {
        T::fill(*self, buffer)
    }

    fn seek(&mut self, offset: u64) -> Result<(), Error> {
        T::seek(*self, offset)
    }

    fn position(&self) -> u64 {
        T::position(*self)
    }

    fn size(&mut self) -> Result<u64, Error> {
        T::size(*self)
    }

    fn next_boundary(&self, offset: u64) -> Option<u64> {
        T::next_boundary(*self, offset)
    }

    fn sequence_gaps(&self) -> u64 {
        T::sequence_gaps(*self)
    }

    fn last_sequence(&self) -> Option<u16> {
        T::last_sequence(*self)
    }
}

impl<T: ?Sized + ByteSource> ByteSource for Box<T> {
    fn fill(&mut self, buffer: &mut [u8]) -> Result<Fill, Error> {
        T::fill(self, buffer)
    }

    fn seek(&mut self, offset: u64) -> Result<(), Error> {
        T::seek(self, offset)
    }

    fn position(&self) -> u64 {
        T::position(self)
    }

    fn size(&mut self) -> Result<u64, Error> {
        T::size(self)
    }

    fn next_boundary(&self, offset: u64) -> Option<u64> {
        T::next_boundary(self, offset)
    }

    fn sequence_gaps(&self) -> u64 {
        T::sequence_gaps(self)
    }

    fn last_sequence(&self) -> Option<u16> {
        T::last_sequence(self)
    }
}

/// Puts the format's sector layer, if it has one, on top of `source`.
pub fn layered<'a, S: ByteSource + Send + 'a>(
    source: S,
    config: &ProtocolConfig,
) -> Box<dyn ByteSource + Send + 'a> {
    match config.sectors {
        Some(layout) => Box::new(SectorReassembler::new(source, layout)),
        None => Box::new(source),
    }
}

/// Cooperative cancellation flag, shared between the decoder and whoever
/// wants to stop it.
#[derive(Clone, Debug, Default)]
pub struct Stop(Arc<AtomicBool>);

impl Stop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Sleeps for `duration` or until stopped. Returns `false` if stopped.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;

        loop {
            if self.is_stopped() {
                return false;
            }

            let now = Instant::now();
            if now >= deadline {
                return true;
            }

            std::thread::sleep((deadline - now).min(STOP_POLL_INTERVAL));
        }
    }
}

#[derive(Clone, Debug)]
pub struct Tail {
    /// Pause between attempts to read more data.
    pub timeout: Duration,
    pub stop: Stop,
}

/// [`ByteSource`] over any seekable reader, usually a file.
#[derive(Debug)]
pub struct Input<R> {
    reader: R,
    position: u64,
    tail: Option<Tail>,
}

impl<R: Read + Seek> Input<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            position: 0,
            tail: None,
        }
    }

    /// Keep waiting for more data at the end of the stream.
    pub fn with_tail(mut self, tail: Tail) -> Self {
        self.tail = Some(tail);
        self
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Returns `true` if the caller should try reading again.
    fn wait_for_data(&self) -> bool {
        match &self.tail {
            Some(tail) if !tail.stop.is_stopped() => {
                tracing::trace!(position = self.position, timeout = ?tail.timeout, "waiting for data");
                tail.stop.sleep(tail.timeout)
            }
            _ => false,
        }
    }
}

impl<R: Read + Seek> ByteSource for Input<R> {
    fn fill(&mut self, buffer: &mut [u8]) -> Result<Fill, Error> {
        let mut filled = 0;

        while filled < buffer.len() {
            match self.reader.read(&mut buffer[filled..]) {
                Ok(0) => {
                    if !self.wait_for_data() {
                        return Ok(Fill::EndOfData { filled });
                    }
                }
                Ok(num_bytes_read) => {
                    filled += num_bytes_read;
                    self.position += num_bytes_read as u64;
                }
                Err(error) if Error::is_retryable(&error) => {}
                Err(error) => return Err(Error::io(self.position, error)),
            }
        }

        Ok(Fill::Complete)
    }

    fn seek(&mut self, offset: u64) -> Result<(), Error> {
        if offset != self.position {
            self.reader
                .seek(SeekFrom::Start(offset))
                .map_err(|error| Error::io(offset, error))?;
            self.position = offset;
        }
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn size(&mut self) -> Result<u64, Error> {
        let size = self
            .reader
            .seek(SeekFrom::End(0))
            .map_err(|error| Error::io(self.position, error))?;
        self.reader
            .seek(SeekFrom::Start(self.position))
            .map_err(|error| Error::io(self.position, error))?;
        Ok(size)
    }
}

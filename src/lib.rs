//! # tagdump
//!
//! Decoder for framed, checksummed record streams: the tag's typed data log
//! (with or without its SD card sector layer), SiRF binary and u-blox UBX.
//!
//! Bytes come from a [`source::ByteSource`], are framed and validated by the
//! [`frame::FrameParser`], decoded through a [`registry::Registry`] and
//! handed to [`emit::Emitter`]s. After corruption the
//! [`resync::ResyncEngine`] finds the next plausible record. The
//! [`decoder::StreamDecoder`] drives all of it.

pub mod checksum;
pub mod config;
pub mod decoder;
pub mod emit;
mod error;
pub mod frame;
pub mod layout;
pub mod protocol;
pub mod registry;
pub mod resync;
pub mod source;
pub mod stats;
pub mod util;

pub use crate::error::Error;

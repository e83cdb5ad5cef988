//! The record formats tagdump knows about.

pub mod dblk;
pub mod sirf;
pub mod ubx;

use crate::{
    config::ProtocolConfig,
    registry::{
        Entry,
        RegistryBuilder,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Protocol {
    /// Tag data log
    Dblk,
    /// SiRF binary
    Sirf,
    /// u-blox UBX
    Ubx,
}

impl Protocol {
    pub fn config(&self) -> ProtocolConfig {
        match self {
            Self::Dblk => dblk::config(),
            Self::Sirf => sirf::config(),
            Self::Ubx => ubx::config(),
        }
    }

    pub fn entries(&self) -> &'static [Entry] {
        match self {
            Self::Dblk => dblk::ENTRIES,
            Self::Sirf => sirf::ENTRIES,
            Self::Ubx => ubx::ENTRIES,
        }
    }

    /// Builder with all of the format's decoders, but no emitters yet.
    pub fn registry(&self) -> RegistryBuilder {
        RegistryBuilder::new().entries(self.entries().iter().copied())
    }
}

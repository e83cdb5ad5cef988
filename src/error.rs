use std::io::ErrorKind;

/// Fatal errors. Everything else the decoder meets is either corruption
/// (handled by resync) or advisory.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o error at offset {offset}")]
    Io {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("jump to {jump} is outside of the stream (size {size})")]
    InvalidJump { jump: i64, size: u64 },
}

impl Error {
    pub fn io(offset: u64, source: std::io::Error) -> Self {
        Self::Io { offset, source }
    }

    pub(crate) fn is_retryable(error: &std::io::Error) -> bool {
        error.kind() == ErrorKind::Interrupted
    }
}

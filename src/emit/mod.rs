//! Output sinks for decoded records.
//!
//! Emitters are bound to a [`Registry`][crate::registry::Registry] and get
//! every record they are bound to, in stream order, after it was decoded.

mod csv;
mod json;
mod text;

pub use self::{
    csv::CsvEmitter,
    json::JsonEmitter,
    text::TextEmitter,
};
use crate::{
    frame::Record,
    layout::Fields,
};

/// Everything an emitter gets to see about one record.
#[derive(Clone, Copy, Debug)]
pub struct Emit<'a> {
    pub verbosity: u8,
    pub record: &'a Record,
    /// `None` for types the registry has no decoder for.
    pub name: Option<&'static str>,
    pub fields: &'a Fields,
}

impl Emit<'_> {
    pub fn name(&self) -> &'static str {
        self.name.unwrap_or("unknown")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("io error")]
    Io(#[from] std::io::Error),

    #[error("json error")]
    Json(#[from] serde_json::Error),

    #[error("csv error")]
    Csv(#[from] ::csv::Error),
}

pub trait Emitter {
    fn emit(&mut self, emit: &Emit<'_>) -> Result<(), EmitError>;

    /// Called once after the last record.
    fn finish(&mut self) -> Result<(), EmitError> {
        Ok(())
    }
}

impl<T: ?Sized + Emitter> Emitter for Box<T> {
    fn emit(&mut self, emit: &Emit<'_>) -> Result<(), EmitError> {
        T::emit(self, emit)
    }

    fn finish(&mut self) -> Result<(), EmitError> {
        T::finish(self)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use bytes::Bytes;

    use crate::{
        frame::{
            FrameHeader,
            Record,
        },
        layout::{
            Fields,
            Value,
        },
    };

    pub fn note_record() -> Record {
        let raw = Bytes::from_static(b"\x18\x00\x17\x00\x07\x00\x00\x00\0\0\0\0\0\0\0\0\0\0\x00\x00hi!!");
        Record {
            offset: 1024,
            header: FrameHeader {
                length: raw.len(),
                tag: 23,
                record_number: Some(7),
                timestamp: None,
                checksum: Some(0),
            },
            payload: 20..24,
            raw,
        }
    }

    pub fn note_fields() -> Fields {
        Fields::new()
            .with("note", Value::Text("hi!!".into()))
            .with(
                "sats",
                Value::List(vec![Fields::new().with("id", Value::Unsigned(3))]),
            )
    }
}

use std::io::Write;

use serde::Serialize;

use crate::{
    emit::{
        Emit,
        EmitError,
        Emitter,
    },
    layout::Value,
};

#[derive(Debug, Serialize)]
struct Row<'a> {
    offset: u64,
    recnum: Option<u32>,
    #[serde(rename = "type")]
    tag: u16,
    name: &'static str,
    path: &'a str,
    value: String,
}

/// Long format time series: one row per scalar field.
pub struct CsvEmitter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> CsvEmitter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(writer),
        }
    }

    pub fn into_inner(self) -> Result<W, EmitError> {
        self.writer
            .into_inner()
            .map_err(|error| EmitError::Io(error.into_error()))
    }
}

impl<W: Write> Emitter for CsvEmitter<W> {
    fn emit(&mut self, emit: &Emit<'_>) -> Result<(), EmitError> {
        let record = emit.record;

        for (path, value) in emit.fields.flatten() {
            let value = match value {
                Value::Text(text) => text.clone(),
                value => value.to_string(),
            };
            self.writer.serialize(Row {
                offset: record.offset,
                recnum: record.header.record_number,
                tag: record.header.tag,
                name: emit.name(),
                path: &path,
                value,
            })?;
        }

        Ok(())
    }

    fn finish(&mut self) -> Result<(), EmitError> {
        self.writer.flush()?;
        Ok(())
    }
}

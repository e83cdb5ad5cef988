use std::io::Write;

use crate::{
    emit::{
        Emit,
        EmitError,
        Emitter,
    },
    util::hex_dump,
};

/// Human readable dump, one line per record.
///
/// Decoded fields follow at verbosity 1 and above, a hex dump of the whole
/// record at 3 and above.
#[derive(Debug)]
pub struct TextEmitter<W> {
    writer: W,
}

impl<W: Write> TextEmitter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Emitter for TextEmitter<W> {
    fn emit(&mut self, emit: &Emit<'_>) -> Result<(), EmitError> {
        let record = emit.record;
        let header = &record.header;

        write!(self.writer, "@{:<8} ({:#08x})", record.offset, record.offset)?;
        match header.record_number {
            Some(number) => write!(self.writer, " {number:>7}")?,
            None => write!(self.writer, " {:>7}", "-")?,
        }
        writeln!(
            self.writer,
            " {:>4} {:<16} ({:#06x})",
            header.length,
            emit.name(),
            header.tag
        )?;

        if emit.verbosity >= 1 && !emit.fields.is_empty() {
            writeln!(self.writer, "    {}", emit.fields)?;
        }

        if emit.verbosity >= 3 {
            self.writer
                .write_all(hex_dump(record.offset, &record.raw).as_bytes())?;
        }

        Ok(())
    }

    fn finish(&mut self) -> Result<(), EmitError> {
        self.writer.flush()?;
        Ok(())
    }
}

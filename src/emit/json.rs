use std::io::Write;

use serde::Serialize;

use crate::{
    emit::{
        Emit,
        EmitError,
        Emitter,
    },
    layout::Fields,
};

#[derive(Debug, Serialize)]
struct Line<'a> {
    offset: u64,
    #[serde(rename = "type")]
    tag: u16,
    name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    recnum: Option<u32>,
    len: usize,
    fields: &'a Fields,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw: Option<String>,
}

/// One JSON object per record and line.
#[derive(Debug)]
pub struct JsonEmitter<W> {
    writer: W,
}

impl<W: Write> JsonEmitter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Emitter for JsonEmitter<W> {
    fn emit(&mut self, emit: &Emit<'_>) -> Result<(), EmitError> {
        let record = emit.record;
        let line = Line {
            offset: record.offset,
            tag: record.header.tag,
            name: emit.name(),
            recnum: record.header.record_number,
            len: record.header.length,
            fields: emit.fields,
            raw: (emit.verbosity >= 3).then(|| hex::encode(&record.raw)),
        };

        serde_json::to_writer(&mut self.writer, &line)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), EmitError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::emit::{
        Emit,
        Emitter,
        JsonEmitter,
        tests::{
            note_fields,
            note_record,
        },
    };

    #[test]
    fn it_writes_json_lines() {
        let record = note_record();
        let fields = note_fields();
        let mut emitter = JsonEmitter::new(vec![]);

        for _ in 0..2 {
            emitter
                .emit(&Emit {
                    verbosity: 0,
                    record: &record,
                    name: Some("NOTE"),
                    fields: &fields,
                })
                .unwrap();
        }

        let output = String::from_utf8(emitter.into_inner()).unwrap();
        let lines = output.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);

        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["offset"], 1024);
        assert_eq!(value["type"], 23);
        assert_eq!(value["name"], "NOTE");
        assert_eq!(value["recnum"], 7);
        assert_eq!(value["fields"]["note"], "hi!!");
        assert_eq!(value["fields"]["sats"][0]["id"], 3);
        assert!(value.get("raw").is_none());
    }
}

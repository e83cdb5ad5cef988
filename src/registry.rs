//! Type tag to decoder mapping.
//!
//! A [`Registry`] is built once per run through [`RegistryBuilder`] and only
//! read from afterwards. Besides the decoders it owns the emitters the
//! decoded records are handed to.

use std::collections::{
    BTreeMap,
    BTreeSet,
};

use crate::{
    emit::{
        Emit,
        Emitter,
    },
    frame::Record,
    layout::Fields,
};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("field {field} needs {needed} bytes, {remaining} remaining")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("field {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

/// Pure function from a validated record to its fields.
pub type DecodeFn = fn(&Record) -> Result<Fields, DecodeError>;

#[derive(Clone, Copy, Debug)]
pub struct Entry {
    pub tag: u16,
    pub name: &'static str,
    /// Total record length this type must have, 0 if variable.
    pub required_len: usize,
    pub decode: DecodeFn,
}

impl Entry {
    pub const fn new(tag: u16, name: &'static str, decode: DecodeFn) -> Self {
        Self {
            tag,
            name,
            required_len: 0,
            decode,
        }
    }

    pub const fn fixed(mut self, required_len: usize) -> Self {
        self.required_len = required_len;
        self
    }

    pub fn required_len(&self) -> Option<usize> {
        (self.required_len != 0).then_some(self.required_len)
    }
}

struct Binding {
    /// `None` binds the emitter to every type.
    tags: Option<BTreeSet<u16>>,
    emitter: Box<dyn Emitter + Send>,
}

#[derive(Default)]
pub struct RegistryBuilder {
    entries: BTreeMap<u16, Entry>,
    bindings: Vec<Binding>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(mut self, entry: Entry) -> Self {
        if let Some(previous) = self.entries.insert(entry.tag, entry) {
            tracing::warn!(tag = entry.tag, previous = previous.name, name = entry.name, "decoder replaced");
        }
        self
    }

    pub fn entries(self, entries: impl IntoIterator<Item = Entry>) -> Self {
        entries.into_iter().fold(self, Self::entry)
    }

    /// Emitter for every record type.
    pub fn emitter(mut self, emitter: impl Emitter + Send + 'static) -> Self {
        self.bindings.push(Binding {
            tags: None,
            emitter: Box::new(emitter),
        });
        self
    }

    /// Emitter for some record types only.
    pub fn emitter_for(
        mut self,
        tags: impl IntoIterator<Item = u16>,
        emitter: impl Emitter + Send + 'static,
    ) -> Self {
        self.bindings.push(Binding {
            tags: Some(tags.into_iter().collect()),
            emitter: Box::new(emitter),
        });
        self
    }

    pub fn build(self) -> Registry {
        Registry {
            entries: self.entries,
            bindings: self.bindings,
        }
    }
}

pub struct Registry {
    entries: BTreeMap<u16, Entry>,
    bindings: Vec<Binding>,
}

impl Registry {
    pub fn get(&self, tag: u16) -> Option<&Entry> {
        self.entries.get(&tag)
    }

    pub fn name(&self, tag: u16) -> Option<&'static str> {
        self.get(tag).map(|entry| entry.name)
    }

    /// Looks a type up by name (case insensitive) or by number (decimal or
    /// `0x` hex).
    pub fn resolve(&self, name_or_number: &str) -> Option<u16> {
        let number = match name_or_number.strip_prefix("0x") {
            Some(hex) => u16::from_str_radix(hex, 16).ok(),
            None => name_or_number.parse().ok(),
        };

        number.or_else(|| {
            self.entries
                .values()
                .find(|entry| entry.name.eq_ignore_ascii_case(name_or_number))
                .map(|entry| entry.tag)
        })
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    /// Hands a decoded record to the bound emitters in registration order.
    /// Returns the number of emitters that failed.
    pub fn emit(&mut self, emit: &Emit<'_>) -> u64 {
        let mut failures = 0;

        for binding in &mut self.bindings {
            let bound = binding
                .tags
                .as_ref()
                .is_none_or(|tags| tags.contains(&emit.record.header.tag));
            if !bound {
                continue;
            }

            if let Err(error) = binding.emitter.emit(emit) {
                tracing::warn!(offset = emit.record.offset, ?error, "emitter failed");
                failures += 1;
            }
        }

        failures
    }

    /// Flushes all emitters, failures are logged.
    pub fn finish(&mut self) {
        for binding in &mut self.bindings {
            if let Err(error) = binding.emitter.finish() {
                tracing::warn!(?error, "emitter failed to finish");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        Mutex,
    };

    use bytes::Bytes;

    use crate::{
        emit::{
            Emit,
            EmitError,
            Emitter,
        },
        frame::{
            FrameHeader,
            Record,
        },
        layout::{
            Fields,
            Value,
        },
        registry::{
            DecodeError,
            Entry,
            RegistryBuilder,
        },
    };

    fn decode_nothing(_record: &Record) -> Result<Fields, DecodeError> {
        Ok(Fields::new())
    }

    #[derive(Clone, Default)]
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<(&'static str, u16)>>>,
        fail: bool,
    }

    impl Emitter for Recorder {
        fn emit(&mut self, emit: &Emit<'_>) -> Result<(), EmitError> {
            self.log
                .lock()
                .unwrap()
                .push((self.name, emit.record.header.tag));
            if self.fail {
                Err(EmitError::Io(std::io::Error::other("broken pipe")))
            }
            else {
                Ok(())
            }
        }
    }

    fn record(tag: u16) -> Record {
        Record {
            offset: 0,
            header: FrameHeader {
                length: 4,
                tag,
                record_number: None,
                timestamp: None,
                checksum: None,
            },
            raw: Bytes::from_static(&[0; 4]),
            payload: 0..4,
        }
    }

    #[test]
    fn it_resolves_names_and_numbers() {
        let registry = RegistryBuilder::new()
            .entry(Entry::new(3, "SYNC", decode_nothing).fixed(28))
            .entry(Entry::new(23, "NOTE", decode_nothing))
            .build();

        assert_eq!(registry.resolve("sync"), Some(3));
        assert_eq!(registry.resolve("23"), Some(23));
        assert_eq!(registry.resolve("0x17"), Some(23));
        assert_eq!(registry.resolve("bogus"), None);
        assert_eq!(registry.get(3).unwrap().required_len(), Some(28));
        assert_eq!(registry.get(23).unwrap().required_len(), None);
    }

    #[test]
    fn it_emits_in_order_and_keeps_going_after_failures() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut registry = RegistryBuilder::new()
            .emitter(Recorder {
                name: "first",
                log: log.clone(),
                fail: true,
            })
            .emitter_for(
                [7],
                Recorder {
                    name: "sevens",
                    log: log.clone(),
                    fail: false,
                },
            )
            .emitter(Recorder {
                name: "last",
                log: log.clone(),
                fail: false,
            })
            .build();

        let fields = Fields::new().with("x", Value::Unsigned(1));
        for tag in [7, 8] {
            let record = record(tag);
            let failures = registry.emit(&Emit {
                verbosity: 1,
                record: &record,
                name: None,
                fields: &fields,
            });
            assert_eq!(failures, 1);
        }

        assert_eq!(
            *log.lock().unwrap(),
            [
                ("first", 7),
                ("sevens", 7),
                ("last", 7),
                ("first", 8),
                ("last", 8)
            ]
        );
    }
}

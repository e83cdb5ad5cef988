//! Declarative record layouts and the values decoded from them.
//!
//! A layout is a `&'static [Field]` describing fixed-width fields in wire
//! order. Decoding a layout yields [`Fields`], an ordered list of named
//! [`Value`]s that emitters render without knowing the record type.

use std::fmt::{
    self,
    Display,
};

use bytes::Buf;
use serde::{
    Serialize,
    Serializer,
    ser::SerializeMap,
};

use crate::{
    config::ByteOrder,
    registry::DecodeError,
    util::BufReadBytesExt,
};

#[derive(Clone, Copy, Debug)]
pub enum Kind {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    Bytes(usize),
    /// NUL padded text of fixed size.
    Text(usize),
    /// Reserved bytes, not reported.
    Skip(usize),
    /// Whatever is left, as bytes.
    BytesRest,
    /// Whatever is left, as text.
    TextRest,
    Group(&'static [Field]),
}

impl Kind {
    /// Wire size, `None` for the variable sized kinds.
    pub fn size(&self) -> Option<usize> {
        match self {
            Self::U8 | Self::I8 => Some(1),
            Self::U16 | Self::I16 => Some(2),
            Self::U32 | Self::I32 => Some(4),
            Self::U64 | Self::I64 => Some(8),
            Self::Bytes(n) | Self::Text(n) | Self::Skip(n) => Some(*n),
            Self::BytesRest | Self::TextRest => None,
            Self::Group(fields) => size(fields),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Field {
    pub name: &'static str,
    pub kind: Kind,
}

pub const fn field(name: &'static str, kind: Kind) -> Field {
    Field { name, kind }
}

/// Fixed size of a layout, `None` if it ends in a variable sized field.
pub fn size(fields: &[Field]) -> Option<usize> {
    fields
        .iter()
        .try_fold(0, |total, field| Some(total + field.kind.size()?))
}

/// Like [`size`], but variable sized fields count as empty.
pub fn min_size(fields: &[Field]) -> usize {
    fields
        .iter()
        .map(|field| field.kind.size().unwrap_or_default())
        .sum()
}

pub fn decode(fields: &[Field], order: ByteOrder, buffer: &mut &[u8]) -> Result<Fields, DecodeError> {
    let mut decoded = Fields::new();

    for field in fields {
        if let Some(value) = decode_field(field, order, buffer)? {
            decoded.push(field.name, value);
        }
    }

    Ok(decoded)
}

fn decode_field(field: &Field, order: ByteOrder, buffer: &mut &[u8]) -> Result<Option<Value>, DecodeError> {
    if let Some(needed) = field.kind.size() {
        if buffer.remaining() < needed {
            return Err(DecodeError::Truncated {
                field: field.name,
                needed,
                remaining: buffer.remaining(),
            });
        }
    }

    let value = match field.kind {
        Kind::U8 => Value::Unsigned(uint(buffer, order, 1)),
        Kind::U16 => Value::Unsigned(uint(buffer, order, 2)),
        Kind::U32 => Value::Unsigned(uint(buffer, order, 4)),
        Kind::U64 => Value::Unsigned(uint(buffer, order, 8)),
        Kind::I8 => Value::Signed(sign_extend(uint(buffer, order, 1), 1)),
        Kind::I16 => Value::Signed(sign_extend(uint(buffer, order, 2), 2)),
        Kind::I32 => Value::Signed(sign_extend(uint(buffer, order, 4), 4)),
        Kind::I64 => Value::Signed(uint(buffer, order, 8) as i64),
        Kind::Bytes(n) => Value::Bytes(take(buffer, n).to_vec()),
        Kind::Text(n) => Value::Text(text(take(buffer, n))),
        Kind::Skip(n) => {
            buffer.advance(n);
            return Ok(None);
        }
        Kind::BytesRest => {
            let n = buffer.len();
            Value::Bytes(take(buffer, n).to_vec())
        }
        Kind::TextRest => {
            let n = buffer.len();
            Value::Text(text(take(buffer, n)))
        }
        Kind::Group(fields) => Value::Group(decode(fields, order, buffer)?),
    };

    Ok(Some(value))
}

fn uint(buffer: &mut &[u8], order: ByteOrder, width: usize) -> u64 {
    buffer.try_get_uint_with(order, width).unwrap_or_default()
}

fn sign_extend(value: u64, width: usize) -> i64 {
    let shift = 64 - 8 * width as u32;
    ((value << shift) as i64) >> shift
}

fn take<'a>(buffer: &mut &'a [u8], n: usize) -> &'a [u8] {
    let slice: &'a [u8] = *buffer;
    let (head, tail) = slice.split_at(n);
    *buffer = tail;
    head
}

fn text(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Text(String),
    Bytes(#[serde(serialize_with = "serialize_hex")] Vec<u8>),
    Group(Fields),
    List(Vec<Fields>),
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Unsigned(value) => Some(*value),
            Self::Signed(value) => u64::try_from(*value).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Unsigned(value) => i64::try_from(*value).ok(),
            Self::Signed(value) => Some(*value),
            _ => None,
        }
    }
}

fn serialize_hex<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsigned(value) => write!(f, "{value}"),
            Self::Signed(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value:.7}"),
            Self::Text(value) => write!(f, "{value:?}"),
            Self::Bytes(value) => write!(f, "{}", hex::encode(value)),
            Self::Group(fields) => write!(f, "{{{fields}}}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{{{item}}}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Named values in wire order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Fields(Vec<(&'static str, Value)>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &'static str, value: Value) {
        self.0.push((name, value));
    }

    pub fn with(mut self, name: &'static str, value: Value) -> Self {
        self.push(name, value);
        self
    }

    pub fn extend(&mut self, other: Fields) {
        self.0.extend(other.0);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0
            .iter()
            .find_map(|(key, value)| (*key == name).then_some(value))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.0.iter().map(|(name, value)| (*name, value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Scalar leaves with dotted paths, groups are descended into and lists
    /// are indexed.
    pub fn flatten(&self) -> Vec<(String, &Value)> {
        let mut leaves = vec![];
        self.flatten_into("", &mut leaves);
        leaves
    }

    fn flatten_into<'a>(&'a self, prefix: &str, leaves: &mut Vec<(String, &'a Value)>) {
        for (name, value) in &self.0 {
            let path = if prefix.is_empty() {
                name.to_string()
            }
            else {
                format!("{prefix}.{name}")
            };

            match value {
                Value::Group(fields) => fields.flatten_into(&path, leaves),
                Value::List(items) => {
                    for (i, item) in items.iter().enumerate() {
                        item.flatten_into(&format!("{path}.{i}"), leaves);
                    }
                }
                _ => leaves.push((path, value)),
            }
        }
    }
}

impl Serialize for Fields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl Display for Fields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        config::ByteOrder,
        layout::{
            Field,
            Fields,
            Kind,
            Value,
            decode,
            field,
            min_size,
            size,
        },
        registry::DecodeError,
    };

    const INNER: &[Field] = &[field("a", Kind::U8), field("b", Kind::I16)];

    const OUTER: &[Field] = &[
        field("x", Kind::I32),
        field("reserved", Kind::Skip(2)),
        field("inner", Kind::Group(INNER)),
        field("name", Kind::Text(4)),
        field("rest", Kind::BytesRest),
    ];

    #[test]
    fn it_computes_layout_sizes() {
        assert_eq!(size(INNER), Some(3));
        assert_eq!(size(OUTER), None);
        assert_eq!(min_size(OUTER), 4 + 2 + 3 + 4);
    }

    #[test]
    fn it_decodes_nested_layouts() {
        let bytes = [
            0xff, 0xff, 0xff, 0xfe, // x
            0xaa, 0xbb, // reserved
            0x07, 0x80, 0x00, // inner
            b'o', b'k', 0, 0, // name
            0x01, 0x02,
        ];
        let fields = decode(OUTER, ByteOrder::Big, &mut &bytes[..]).unwrap();

        assert_eq!(fields.get("x"), Some(&Value::Signed(-2)));
        assert_eq!(fields.get("reserved"), None);
        assert_eq!(
            fields.get("inner"),
            Some(&Value::Group(
                Fields::new()
                    .with("a", Value::Unsigned(7))
                    .with("b", Value::Signed(-32768))
            ))
        );
        assert_eq!(fields.get("name"), Some(&Value::Text("ok".into())));
        assert_eq!(fields.get("rest"), Some(&Value::Bytes(vec![1, 2])));
        assert_eq!(
            fields.to_string(),
            r#"x=-2 inner={a=7 b=-32768} name="ok" rest=0102"#
        );
    }

    #[test]
    fn it_reports_truncated_fields() {
        let error = decode(INNER, ByteOrder::Little, &mut &[1u8, 2][..]).unwrap_err();
        assert!(matches!(
            error,
            DecodeError::Truncated {
                field: "b",
                needed: 2,
                remaining: 1
            }
        ));
    }

    #[test]
    fn it_flattens_and_serializes() {
        let fields = Fields::new()
            .with("a", Value::Unsigned(1))
            .with(
                "sats",
                Value::List(vec![
                    Fields::new().with("id", Value::Unsigned(3)),
                    Fields::new().with("id", Value::Unsigned(9)),
                ]),
            )
            .with("raw", Value::Bytes(vec![0xde, 0xad]));

        let paths = fields
            .flatten()
            .into_iter()
            .map(|(path, _)| path)
            .collect::<Vec<_>>();
        assert_eq!(paths, ["a", "sats.0.id", "sats.1.id", "raw"]);

        assert_eq!(
            serde_json::to_string(&fields).unwrap(),
            r#"{"a":1,"sats":[{"id":3},{"id":9}],"raw":"dead"}"#
        );
    }
}

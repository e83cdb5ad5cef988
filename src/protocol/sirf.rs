//! SiRF binary (OSP) packets.
//!
//! `a0 a2 | len u16 | mid data... | checksum u16 | b0 b3`, big endian. `len`
//! counts the message id and the data, the checksum is the 15 bit sum of the
//! same bytes.

use bytes::Bytes;

use crate::{
    checksum::ChecksumAlgorithm,
    config::{
        ByteOrder,
        ChecksumPlacement,
        ChecksumSpec,
        HeaderLayout,
        LengthCounts,
        LengthField,
        ProtocolConfig,
        SyncMarker,
        UintField,
    },
    frame::{
        FrameHeader,
        Record,
        encode,
    },
    layout::{
        self,
        Field,
        Fields,
        Kind,
        Value,
        field,
    },
    registry::{
        DecodeError,
        Entry,
    },
};

pub const NAV_DATA: u16 = 2;
pub const NAV_TRACK: u16 = 4;
pub const SW_VER: u16 = 6;
pub const CLK_STAT: u16 = 7;
pub const CPU_THRUPUT: u16 = 9;
pub const ACK: u16 = 11;
pub const NACK: u16 = 12;
pub const VIS_LIST: u16 = 13;
pub const OK_TO_SEND: u16 = 18;
pub const NAV_LIB: u16 = 28;
pub const GEO_DATA: u16 = 41;
pub const EXT_EPHEMERIS: u16 = 56;
pub const GPIO: u16 = 65;
pub const HW_CONFIG_REQ: u16 = 71;
pub const CW_DATA: u16 = 92;
pub const TCXO_LEARNING: u16 = 93;

pub const START: [u8; 2] = [0xa0, 0xa2];
pub const END: [u8; 2] = [0xb0, 0xb3];
pub const MAX_PAYLOAD: usize = 2047;

/// Bytes around the message id and data.
const OVERHEAD: usize = 8;

pub fn config() -> ProtocolConfig {
    ProtocolConfig {
        name: "sirf",
        header: HeaderLayout {
            size: 5,
            length: LengthField {
                field: UintField::new(2, 2, ByteOrder::Big),
                counts: LengthCounts::Body {
                    start: 4,
                    trailer: 4,
                },
            },
            tag: UintField::new(4, 1, ByteOrder::Big),
            record_number: None,
            timestamp: None,
        },
        sync: SyncMarker {
            bytes: &START,
            offset: 0,
            every_record: true,
            accept: &[],
        },
        checksum: ChecksumSpec {
            algorithm: ChecksumAlgorithm::Sum15,
            order: ByteOrder::Big,
            coverage_start: 4,
            placement: ChecksumPlacement::Trailer { from_end: 4 },
        },
        end_marker: Some(&END),
        max_length: MAX_PAYLOAD,
        alignment: 1,
        max_zero_units: 4096,
        data_start: 0,
        reject_zero_record_number: false,
        filler: None,
        sectors: None,
    }
}

const NAV_DATA_BODY: &[Field] = &[
    field("xpos", Kind::I32),
    field("ypos", Kind::I32),
    field("zpos", Kind::I32),
    field("xvel", Kind::I16),
    field("yvel", Kind::I16),
    field("zvel", Kind::I16),
    field("mode1", Kind::U8),
    field("hdop", Kind::U8),
    field("mode2", Kind::U8),
    field("week10", Kind::U16),
    field("tow", Kind::U32),
    field("nsats", Kind::U8),
    field("prns", Kind::Bytes(12)),
];

const NAV_TRACK_HEADER: &[Field] = &[
    field("week", Kind::U16),
    field("tow", Kind::U32),
    field("chans", Kind::U8),
];

const NAV_TRACK_CHANNEL: &[Field] = &[
    field("sv_id", Kind::U8),
    field("az", Kind::U8),
    field("el", Kind::U8),
    field("state", Kind::U16),
    field("cno", Kind::Bytes(10)),
];

const CLK_STAT_BODY: &[Field] = &[
    field("week", Kind::U16),
    field("tow", Kind::U32),
    field("nsats", Kind::U8),
    field("drift", Kind::U32),
    field("bias", Kind::U32),
    field("gps_time", Kind::U32),
];

const ACK_BODY: &[Field] = &[field("ack_id", Kind::U8), field("sub_id", Kind::BytesRest)];

const VIS_LIST_HEADER: &[Field] = &[field("count", Kind::U8)];

const VIS_LIST_SAT: &[Field] = &[
    field("sv_id", Kind::U8),
    field("az", Kind::I16),
    field("el", Kind::I16),
];

const OK_TO_SEND_BODY: &[Field] = &[field("ok_to_send", Kind::U8)];

const GEO_DATA_BODY: &[Field] = &[
    field("nav_valid", Kind::U16),
    field("nav_type", Kind::U16),
    field("week_x", Kind::U16),
    field("tow", Kind::U32),
    field("utc_year", Kind::U16),
    field("utc_month", Kind::U8),
    field("utc_day", Kind::U8),
    field("utc_hour", Kind::U8),
    field("utc_min", Kind::U8),
    field("utc_ms", Kind::U16),
    field("sat_mask", Kind::U32),
    field("lat", Kind::I32),
    field("lon", Kind::I32),
    field("alt_elipsoid", Kind::I32),
    field("alt_msl", Kind::I32),
    field("map_datum", Kind::U8),
    field("sog", Kind::U16),
    field("cog", Kind::U16),
    field("mag_var", Kind::U16),
    field("climb", Kind::I16),
    field("heading_rate", Kind::I16),
    field("ehpe", Kind::U32),
    field("evpe", Kind::U32),
    field("ete", Kind::U32),
    field("ehve", Kind::U16),
    field("clock_bias", Kind::I32),
    field("clock_bias_err", Kind::I32),
    field("clock_drift", Kind::I32),
    field("clock_drift_err", Kind::I32),
    field("distance", Kind::U32),
    field("distance_err", Kind::U16),
    field("head_err", Kind::U16),
    field("nsats", Kind::U8),
    field("hdop", Kind::U8),
    field("additional_mode", Kind::U8),
];

const SW_VER_LEGACY: &[Field] = &[field("version", Kind::TextRest)];

const RAW_BODY: &[Field] = &[field("data", Kind::BytesRest)];

fn decode_with(record: &Record, body: &[Field]) -> Result<Fields, DecodeError> {
    layout::decode(body, ByteOrder::Big, &mut record.payload())
}

fn decode_nav_data(record: &Record) -> Result<Fields, DecodeError> {
    decode_with(record, NAV_DATA_BODY)
}

/// `count` fixed size items in a row.
fn decode_list(
    buffer: &mut &[u8],
    count: u64,
    item: &[Field],
) -> Result<Vec<Fields>, DecodeError> {
    (0..count)
        .map(|_| layout::decode(item, ByteOrder::Big, buffer))
        .collect()
}

fn decode_nav_track(record: &Record) -> Result<Fields, DecodeError> {
    let mut buffer = record.payload();
    let mut fields = layout::decode(NAV_TRACK_HEADER, ByteOrder::Big, &mut buffer)?;
    let count = fields.get("chans").and_then(Value::as_u64).unwrap_or_default();
    fields.push(
        "channels",
        Value::List(decode_list(&mut buffer, count, NAV_TRACK_CHANNEL)?),
    );
    Ok(fields)
}

fn decode_vis_list(record: &Record) -> Result<Fields, DecodeError> {
    let mut buffer = record.payload();
    let fields = layout::decode(VIS_LIST_HEADER, ByteOrder::Big, &mut buffer)?;
    let count = fields.get("count").and_then(Value::as_u64).unwrap_or_default();
    Ok(fields.with(
        "sats",
        Value::List(decode_list(&mut buffer, count, VIS_LIST_SAT)?),
    ))
}

/// Either two length prefixed strings (software and library version), or a
/// single string on older firmware.
fn decode_sw_ver(record: &Record) -> Result<Fields, DecodeError> {
    let payload = record.payload();

    if let [first, second, rest @ ..] = payload {
        let (first, second) = (usize::from(*first), usize::from(*second));
        if first + second == rest.len() {
            let text = |bytes: &[u8]| {
                let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
                Value::Text(String::from_utf8_lossy(&bytes[..end]).into_owned())
            };
            return Ok(Fields::new()
                .with("sirf_version", text(&rest[..first]))
                .with("customer_version", text(&rest[first..])));
        }
    }

    decode_with(record, SW_VER_LEGACY)
}

fn decode_clk_stat(record: &Record) -> Result<Fields, DecodeError> {
    decode_with(record, CLK_STAT_BODY)
}

fn decode_ack(record: &Record) -> Result<Fields, DecodeError> {
    decode_with(record, ACK_BODY)
}

fn decode_ok_to_send(record: &Record) -> Result<Fields, DecodeError> {
    decode_with(record, OK_TO_SEND_BODY)
}

fn decode_geo_data(record: &Record) -> Result<Fields, DecodeError> {
    let mut fields = decode_with(record, GEO_DATA_BODY)?;

    for (raw, degrees) in [("lat", "lat_deg"), ("lon", "lon_deg")] {
        if let Some(value) = fields.get(raw).and_then(Value::as_i64) {
            fields.push(degrees, Value::Float(value as f64 * 1e-7));
        }
    }

    Ok(fields)
}

fn decode_raw(record: &Record) -> Result<Fields, DecodeError> {
    decode_with(record, RAW_BODY)
}

const fn fixed(body: usize) -> usize {
    body + 1 + OVERHEAD
}

pub const ENTRIES: &[Entry] = &[
    Entry::new(NAV_DATA, "NAV_DATA", decode_nav_data).fixed(fixed(40)),
    Entry::new(NAV_TRACK, "NAV_TRACK", decode_nav_track),
    Entry::new(SW_VER, "SW_VER", decode_sw_ver),
    Entry::new(CLK_STAT, "CLK_STAT", decode_clk_stat).fixed(fixed(19)),
    Entry::new(CPU_THRUPUT, "CPU_THRUPUT", decode_raw),
    Entry::new(ACK, "ACK", decode_ack),
    Entry::new(NACK, "NACK", decode_ack),
    Entry::new(VIS_LIST, "VIS_LIST", decode_vis_list),
    Entry::new(OK_TO_SEND, "OK_TO_SEND", decode_ok_to_send).fixed(fixed(1)),
    Entry::new(NAV_LIB, "NAV_LIB", decode_raw),
    Entry::new(GEO_DATA, "GEO_DATA", decode_geo_data).fixed(fixed(90)),
    Entry::new(EXT_EPHEMERIS, "EXT_EPHEMERIS", decode_raw),
    Entry::new(GPIO, "GPIO", decode_raw),
    Entry::new(HW_CONFIG_REQ, "HW_CONFIG_REQ", decode_raw),
    Entry::new(CW_DATA, "CW_DATA", decode_raw),
    Entry::new(TCXO_LEARNING, "TCXO_LEARNING", decode_raw),
];

pub fn entry(mid: u16) -> Option<&'static Entry> {
    ENTRIES.iter().find(|entry| entry.tag == mid)
}

pub fn encode_packet(mid: u16, data: &[u8]) -> Vec<u8> {
    encode(&config(), mid, None, None, data)
}

/// Decodes a complete packet carried inside another record. `offset` is the
/// logical offset of the packet's first byte.
pub fn decode_embedded(offset: u64, packet: Bytes) -> Result<Fields, DecodeError> {
    let invalid = |message: &str| DecodeError::Invalid {
        field: "sirf",
        message: message.to_owned(),
    };

    let config = config();
    if !packet.starts_with(&START) {
        return Err(invalid("no start of packet"));
    }

    let length = config
        .header
        .length
        .field
        .read(&packet)
        .and_then(|value| config.total_length(value))
        .filter(|length| *length <= packet.len())
        .ok_or_else(|| invalid("bad length"))?;
    let packet = packet.slice(..length);

    if !packet.ends_with(&END) {
        return Err(invalid("no end of packet"));
    }

    let stored = config.checksum.field(length).read(&packet).unwrap_or_default() as u16;
    if stored != config.checksum.compute(&packet) {
        return Err(invalid("checksum mismatch"));
    }

    let mid = packet[4];
    let mut fields = Fields::new().with("mid", Value::Unsigned(mid.into()));

    if let Some(entry) = entry(mid.into()) {
        let record = Record {
            offset,
            header: FrameHeader {
                length,
                tag: mid.into(),
                record_number: None,
                timestamp: None,
                checksum: Some(stored),
            },
            payload: config.payload_range(length),
            raw: packet,
        };
        fields.push("name", Value::Text(entry.name.to_owned()));
        fields.push("packet", Value::Group((entry.decode)(&record)?));
    }

    Ok(fields)
}

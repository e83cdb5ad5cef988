//! u-blox UBX messages.
//!
//! `b5 62 | class | id | len u16 le | payload | ck_a ck_b`. The checksum is
//! an 8 bit Fletcher over class, id, length and payload. Records are tagged
//! `class << 8 | id`.

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

pub const NAV_POSLLH: u16 = 0x0102;
pub const NAV_STATUS: u16 = 0x0103;
pub const NAV_PVT: u16 = 0x0107;
pub const NAV_TIMEUTC: u16 = 0x0121;
pub const NAV_SAT: u16 = 0x0135;
pub const INF_ERROR: u16 = 0x0400;
pub const INF_WARNING: u16 = 0x0401;
pub const INF_NOTICE: u16 = 0x0402;
pub const INF_TEST: u16 = 0x0403;
pub const INF_DEBUG: u16 = 0x0404;
pub const ACK_NAK: u16 = 0x0500;
pub const ACK_ACK: u16 = 0x0501;
pub const CFG_PRT: u16 = 0x0600;
pub const CFG_MSG: u16 = 0x0601;
pub const MON_VER: u16 = 0x0a04;

pub const START: [u8; 2] = [0xb5, 0x62];
pub const MAX_PAYLOAD: usize = 2048;

const OVERHEAD: usize = 8;

pub fn config() -> ProtocolConfig {
    ProtocolConfig {
        name: "ubx",
        header: HeaderLayout {
            size: 6,
            length: LengthField {
                field: UintField::new(4, 2, ByteOrder::Little),
                counts: LengthCounts::Body {
                    start: 6,
                    trailer: 2,
                },
            },
            tag: UintField::new(2, 2, ByteOrder::Big),
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
            algorithm: ChecksumAlgorithm::Fletcher8,
            order: ByteOrder::Big,
            coverage_start: 2,
            placement: ChecksumPlacement::Trailer { from_end: 2 },
        },
        end_marker: None,
        max_length: MAX_PAYLOAD,
        alignment: 1,
        max_zero_units: 4096,
        data_start: 0,
        reject_zero_record_number: false,
        filler: None,
        sectors: None,
    }
}

const NAV_POSLLH_BODY: &[Field] = &[
    field("itow", Kind::U32),
    field("lon", Kind::I32),
    field("lat", Kind::I32),
    field("height", Kind::I32),
    field("hmsl", Kind::I32),
    field("hacc", Kind::U32),
    field("vacc", Kind::U32),
];

const NAV_STATUS_BODY: &[Field] = &[
    field("itow", Kind::U32),
    field("gps_fix", Kind::U8),
    field("flags", Kind::U8),
    field("fix_stat", Kind::U8),
    field("flags2", Kind::U8),
    field("ttff", Kind::U32),
    field("msss", Kind::U32),
];

const NAV_PVT_BODY: &[Field] = &[
    field("itow", Kind::U32),
    field("year", Kind::U16),
    field("month", Kind::U8),
    field("day", Kind::U8),
    field("hour", Kind::U8),
    field("min", Kind::U8),
    field("sec", Kind::U8),
    field("valid", Kind::U8),
    field("tacc", Kind::U32),
    field("nano", Kind::I32),
    field("fix_type", Kind::U8),
    field("flags", Kind::U8),
    field("flags2", Kind::U8),
    field("num_sv", Kind::U8),
    field("lon", Kind::I32),
    field("lat", Kind::I32),
    field("height", Kind::I32),
    field("hmsl", Kind::I32),
    field("hacc", Kind::U32),
    field("vacc", Kind::U32),
    field("vel_n", Kind::I32),
    field("vel_e", Kind::I32),
    field("vel_d", Kind::I32),
    field("gspeed", Kind::I32),
    field("head_mot", Kind::I32),
    field("sacc", Kind::U32),
    field("head_acc", Kind::U32),
    field("pdop", Kind::U16),
    field("reserved1", Kind::Skip(6)),
    field("head_veh", Kind::I32),
    field("mag_dec", Kind::I16),
    field("mag_acc", Kind::U16),
];

const NAV_TIMEUTC_BODY: &[Field] = &[
    field("itow", Kind::U32),
    field("tacc", Kind::U32),
    field("nano", Kind::I32),
    field("year", Kind::U16),
    field("month", Kind::U8),
    field("day", Kind::U8),
    field("hour", Kind::U8),
    field("min", Kind::U8),
    field("sec", Kind::U8),
    field("valid", Kind::U8),
];

const ACK_BODY: &[Field] = &[field("cls_id", Kind::U8), field("msg_id", Kind::U8)];

const MON_VER_HEADER: &[Field] = &[
    field("sw_version", Kind::Text(30)),
    field("hw_version", Kind::Text(10)),
];

const MON_VER_EXTENSION: usize = 30;

const INF_BODY: &[Field] = &[field("text", Kind::TextRest)];

const RAW_BODY: &[Field] = &[field("data", Kind::BytesRest)];

fn decode_with(record: &Record, body: &[Field]) -> Result<Fields, DecodeError> {
    layout::decode(body, ByteOrder::Little, &mut record.payload())
}

/// Adds `lat_deg` and `lon_deg` for the 1e-7 degree fields.
fn with_degrees(mut fields: Fields) -> Fields {
    for (raw, degrees) in [("lat", "lat_deg"), ("lon", "lon_deg")] {
        if let Some(value) = fields.get(raw).and_then(Value::as_i64) {
            fields.push(degrees, Value::Float(value as f64 * 1e-7));
        }
    }
    fields
}

fn decode_nav_posllh(record: &Record) -> Result<Fields, DecodeError> {
    decode_with(record, NAV_POSLLH_BODY).map(with_degrees)
}

fn decode_nav_status(record: &Record) -> Result<Fields, DecodeError> {
    decode_with(record, NAV_STATUS_BODY)
}

fn decode_nav_pvt(record: &Record) -> Result<Fields, DecodeError> {
    decode_with(record, NAV_PVT_BODY).map(with_degrees)
}

fn decode_nav_timeutc(record: &Record) -> Result<Fields, DecodeError> {
    decode_with(record, NAV_TIMEUTC_BODY)
}

fn decode_ack(record: &Record) -> Result<Fields, DecodeError> {
    decode_with(record, ACK_BODY)
}

fn decode_mon_ver(record: &Record) -> Result<Fields, DecodeError> {
    let mut buffer = record.payload();
    let mut fields = layout::decode(MON_VER_HEADER, ByteOrder::Little, &mut buffer)?;

    let extensions = buffer
        .chunks(MON_VER_EXTENSION)
        .map(|chunk| {
            let end = chunk.iter().position(|b| *b == 0).unwrap_or(chunk.len());
            Fields::new().with(
                "extension",
                Value::Text(String::from_utf8_lossy(&chunk[..end]).into_owned()),
            )
        })
        .collect();
    fields.push("extensions", Value::List(extensions));

    Ok(fields)
}

fn decode_inf(record: &Record) -> Result<Fields, DecodeError> {
    decode_with(record, INF_BODY)
}

fn decode_raw(record: &Record) -> Result<Fields, DecodeError> {
    decode_with(record, RAW_BODY)
}

pub const ENTRIES: &[Entry] = &[
    Entry::new(NAV_POSLLH, "NAV-POSLLH", decode_nav_posllh).fixed(28 + OVERHEAD),
    Entry::new(NAV_STATUS, "NAV-STATUS", decode_nav_status).fixed(16 + OVERHEAD),
    Entry::new(NAV_PVT, "NAV-PVT", decode_nav_pvt).fixed(92 + OVERHEAD),
    Entry::new(NAV_TIMEUTC, "NAV-TIMEUTC", decode_nav_timeutc).fixed(20 + OVERHEAD),
    Entry::new(NAV_SAT, "NAV-SAT", decode_raw),
    Entry::new(INF_ERROR, "INF-ERROR", decode_inf),
    Entry::new(INF_WARNING, "INF-WARNING", decode_inf),
    Entry::new(INF_NOTICE, "INF-NOTICE", decode_inf),
    Entry::new(INF_TEST, "INF-TEST", decode_inf),
    Entry::new(INF_DEBUG, "INF-DEBUG", decode_inf),
    Entry::new(ACK_NAK, "ACK-NAK", decode_ack).fixed(2 + OVERHEAD),
    Entry::new(ACK_ACK, "ACK-ACK", decode_ack).fixed(2 + OVERHEAD),
    Entry::new(CFG_PRT, "CFG-PRT", decode_raw),
    Entry::new(CFG_MSG, "CFG-MSG", decode_raw),
    Entry::new(MON_VER, "MON-VER", decode_mon_ver),
];

pub fn encode_message(tag: u16, payload: &[u8]) -> Vec<u8> {
    encode(&config(), tag, None, None, payload)
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;

    use crate::{
        frame::{
            FrameParser,
            Parsed,
        },
        layout::{
            Fields,
            Value,
        },
        protocol::{
            Protocol,
            ubx,
        },
        source::Input,
    };

    fn decode(message: Vec<u8>) -> Fields {
        let registry = Protocol::Ubx.registry().build();
        let mut parser = FrameParser::new(ubx::config());
        let mut input = Input::new(std::io::Cursor::new(message));
        let Parsed::Record(record) = parser.next(&mut input, &registry).unwrap()
        else {
            panic!("expected a message");
        };
        (registry.get(record.header.tag).unwrap().decode)(&record).unwrap()
    }

    #[test]
    fn it_frames_like_the_receiver() {
        // UBX-CFG-MSG poll for NAV-PVT as sent by u-center
        let message = ubx::encode_message(ubx::CFG_MSG, &[0x01, 0x07]);
        assert_eq!(
            message,
            [0xb5, 0x62, 0x06, 0x01, 0x02, 0x00, 0x01, 0x07, 0x11, 0x3a]
        );
    }

    #[test]
    fn it_decodes_nav_pvt() {
        let mut body = vec![];
        body.put_u32_le(475_200_000);
        body.put_u16_le(2020);
        body.put_slice(&[3, 14, 15, 9, 26, 0x37]);
        body.put_u32_le(20);
        body.put_i32_le(-5000);
        body.put_slice(&[3, 0x01, 0x00, 11]);
        body.put_i32_le(-1_223_456_789);
        body.put_i32_le(374_567_890);
        body.resize(92, 0);

        let fields = decode(ubx::encode_message(ubx::NAV_PVT, &body));
        assert_eq!(fields.get("year"), Some(&Value::Unsigned(2020)));
        assert_eq!(fields.get("nano"), Some(&Value::Signed(-5000)));
        assert_eq!(fields.get("num_sv"), Some(&Value::Unsigned(11)));
        assert_eq!(fields.get("reserved1"), None);
        let Some(Value::Float(lon)) = fields.get("lon_deg")
        else {
            panic!("lon_deg missing");
        };
        assert!((lon + 122.3456789).abs() < 1e-9);
    }

    #[test]
    fn it_decodes_mon_ver_extensions() {
        let mut body = vec![0u8; 40];
        body[..13].copy_from_slice(b"ROM CORE 3.01");
        body[30..38].copy_from_slice(b"00080000");
        let mut extension = [0u8; 30];
        extension[..12].copy_from_slice(b"PROTVER=18.0");
        body.extend_from_slice(&extension);

        let fields = decode(ubx::encode_message(ubx::MON_VER, &body));
        assert_eq!(fields.get("hw_version"), Some(&Value::Text("00080000".into())));
        let Some(Value::List(extensions)) = fields.get("extensions")
        else {
            panic!("extensions missing: {fields}");
        };
        assert_eq!(
            extensions[0].get("extension"),
            Some(&Value::Text("PROTVER=18.0".into()))
        );
    }
}

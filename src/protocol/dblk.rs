//! The tag's typed data log ("dblk").
//!
//! Records are quad aligned and start with a 20 byte little endian header:
//!
//! | offset | field  | type      |
//! |--------|--------|-----------|
//! | 0      | len    | u16       |
//! | 2      | type   | u16       |
//! | 4      | recnum | u32       |
//! | 8      | rtctime| 10 bytes  |
//! | 18     | recsum | u16       |
//!
//! `recsum` is the 16 bit sum of every byte of the record except itself.
//! SYNC and REBOOT records carry [`MAJIK`] at offset 24 and are the points
//! the decoder resynchronizes on.
//!
//! On the SD card the log is split into 512 byte sectors with a 4 byte
//! trailer, see [`SECTORS`]. The file system view hides the trailers and
//! only has a 512 byte directory in front.

use std::fmt::{
    self,
    Display,
};

use bytes::{
    Buf,
    BufMut,
};
use chrono::{
    NaiveDate,
    NaiveDateTime,
};

use crate::{
    checksum::ChecksumAlgorithm,
    config::{
        ByteOrder,
        ChecksumPlacement,
        ChecksumSpec,
        Filler,
        HeaderLayout,
        LengthCounts,
        LengthField,
        ProtocolConfig,
        SectorLayout,
        SyncMarker,
        SyncRecord,
        UintField,
        ZeroSequence,
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
    protocol::sirf,
    registry::{
        DecodeError,
        Entry,
    },
};

pub const NONE: u16 = 0;
pub const REBOOT: u16 = 1;
pub const VERSION: u16 = 2;
pub const SYNC: u16 = 3;
pub const EVENT: u16 = 4;
pub const DEBUG: u16 = 5;
pub const SYNC_FLUSH: u16 = 6;
pub const SYNC_REBOOT: u16 = 7;
pub const GPS_VERSION: u16 = 16;
pub const GPS_TIME: u16 = 17;
pub const GPS_GEO: u16 = 18;
pub const GPS_XYZ: u16 = 19;
pub const SENSOR_DATA: u16 = 20;
pub const SENSOR_SET: u16 = 21;
pub const TEST: u16 = 22;
pub const NOTE: u16 = 23;
pub const CONFIG: u16 = 24;
pub const GPS_PROTO_STATS: u16 = 25;
pub const GPS_TRK: u16 = 26;
pub const GPS_CLK: u16 = 27;
pub const GPS_RAW_SIRFBIN: u16 = 32;
pub const TAGNET: u16 = 33;
pub const RADIO: u16 = 34;

pub const MAJIK: u32 = 0xdedf_00ef;

pub const HEADER_SIZE: usize = 20;
pub const SYNC_LEN: usize = 28;
pub const REBOOT_LEN: usize = 112;
pub const VERSION_LEN: usize = 168;
pub const EVENT_LEN: usize = 40;
pub const GPS_HEADER_LEN: usize = 28;
pub const MAX_RECORD_LEN: usize = 1024;

const MAJIK_BYTES: [u8; 4] = MAJIK.to_le_bytes();
const MAJIK_OFFSET: usize = 24;

/// The directory in front of the records.
pub const DIRECTORY_SIZE: u64 = 512;

pub const SECTORS: SectorLayout = SectorLayout {
    size: 512,
    payload: 508,
    sequence: UintField::new(508, 2, ByteOrder::Little),
    checksum: UintField::new(510, 2, ByteOrder::Little),
    algorithm: ChecksumAlgorithm::Sum16,
    zero_sequence: ZeroSequence::Always,
    skip: 1,
};

const SYNC_RECORDS: &[SyncRecord] = &[
    SyncRecord {
        tag: SYNC,
        length: SYNC_LEN,
    },
    SyncRecord {
        tag: SYNC_FLUSH,
        length: SYNC_LEN,
    },
    SyncRecord {
        tag: SYNC_REBOOT,
        length: SYNC_LEN,
    },
    SyncRecord {
        tag: REBOOT,
        length: REBOOT_LEN,
    },
];

pub fn config() -> ProtocolConfig {
    ProtocolConfig {
        name: "dblk",
        header: HeaderLayout {
            size: HEADER_SIZE,
            length: LengthField {
                field: UintField::new(0, 2, ByteOrder::Little),
                counts: LengthCounts::Total,
            },
            tag: UintField::new(2, 2, ByteOrder::Little),
            record_number: Some(UintField::new(4, 4, ByteOrder::Little)),
            timestamp: Some(8..18),
        },
        sync: SyncMarker {
            bytes: &MAJIK_BYTES,
            offset: MAJIK_OFFSET,
            every_record: false,
            accept: SYNC_RECORDS,
        },
        checksum: ChecksumSpec {
            algorithm: ChecksumAlgorithm::Sum16,
            order: ByteOrder::Little,
            coverage_start: 0,
            placement: ChecksumPlacement::Header { offset: 18 },
        },
        end_marker: None,
        max_length: MAX_RECORD_LEN,
        alignment: 4,
        max_zero_units: 1024,
        data_start: DIRECTORY_SIZE,
        reject_zero_record_number: true,
        filler: Some(Filler {
            length: 4,
            tag: NONE,
        }),
        sectors: None,
    }
}

/// Same log, read from the raw sectors of the card.
pub fn sector_config(zero_sequence: ZeroSequence) -> ProtocolConfig {
    let mut config = config();
    config.sectors = Some(SectorLayout {
        zero_sequence,
        ..SECTORS
    });
    config
}

/// Real time clock stamp in the record header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RtcTime {
    /// 1/32768 s ticks.
    pub sub_sec: u16,
    pub sec: u8,
    pub min: u8,
    pub hr: u8,
    pub dow: u8,
    pub day: u8,
    pub mon: u8,
    pub year: u16,
}

impl RtcTime {
    pub const SIZE: usize = 10;

    pub fn parse(mut bytes: &[u8]) -> Option<Self> {
        if bytes.remaining() < Self::SIZE {
            return None;
        }
        Some(Self {
            sub_sec: bytes.get_u16_le(),
            sec: bytes.get_u8(),
            min: bytes.get_u8(),
            hr: bytes.get_u8(),
            dow: bytes.get_u8(),
            day: bytes.get_u8(),
            mon: bytes.get_u8(),
            year: bytes.get_u16_le(),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        let mut buffer = &mut bytes[..];
        buffer.put_u16_le(self.sub_sec);
        buffer.put_u8(self.sec);
        buffer.put_u8(self.min);
        buffer.put_u8(self.hr);
        buffer.put_u8(self.dow);
        buffer.put_u8(self.day);
        buffer.put_u8(self.mon);
        buffer.put_u16_le(self.year);
        bytes
    }

    pub fn from_datetime(datetime: NaiveDateTime) -> Self {
        use chrono::{
            Datelike,
            Timelike,
        };

        Self {
            sub_sec: (u64::from(datetime.nanosecond() % 1_000_000_000) * 32768 / 1_000_000_000) as u16,
            sec: datetime.second() as u8,
            min: datetime.minute() as u8,
            hr: datetime.hour() as u8,
            dow: datetime.weekday().num_days_from_sunday() as u8,
            day: datetime.day() as u8,
            mon: datetime.month() as u8,
            year: datetime.year() as u16,
        }
    }

    /// `None` for stamps that are not a valid date, e.g. before the clock was
    /// set.
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        let micros = u32::from(self.sub_sec) * 15625 / 512;
        NaiveDate::from_ymd_opt(self.year.into(), self.mon.into(), self.day.into())?.and_hms_micro_opt(
            self.hr.into(),
            self.min.into(),
            self.sec.into(),
            micros,
        )
    }
}

impl Display for RtcTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(datetime) => write!(f, "{}", datetime.format("%Y/%m/%d-%H:%M:%S%.3f")),
            None => write!(
                f,
                "{:02}:{:02}:{:02}.{:05} (unset)",
                self.hr, self.min, self.sec, self.sub_sec
            ),
        }
    }
}

const SYNC_BODY: &[Field] = &[field("prev_sync", Kind::U32), field("majik", Kind::U32)];

const OW_CONTROL_BLOCK: &[Field] = &[
    field("ow_sig", Kind::U32),
    field("ow_rpt_flags", Kind::U32),
    field("uptime", Kind::U64),
    field("reset_status", Kind::U32),
    field("reset_others", Kind::U32),
    field("from_base", Kind::U32),
    field("panic_count", Kind::U32),
    field("fault_gold", Kind::U32),
    field("reboot_count", Kind::U32),
    field("ow_req", Kind::U8),
    field("reboot_reason", Kind::U8),
    field("ow_boot_mode", Kind::U8),
    field("owt_action", Kind::U8),
    field("ow_sig_b", Kind::U32),
    field("strange", Kind::U32),
    field("strange_loc", Kind::U32),
    field("vec_chk_fail", Kind::U32),
    field("image_chk_fail", Kind::U32),
    field("elapsed", Kind::U64),
    field("ow_sig_c", Kind::U32),
];

const REBOOT_BODY: &[Field] = &[
    field("prev_sync", Kind::U32),
    field("majik", Kind::U32),
    field("core_rev", Kind::U16),
    field("core_minor", Kind::U16),
    field("base", Kind::U32),
    field("owcb", Kind::Group(OW_CONTROL_BLOCK)),
];

const IMAGE_VERSION: &[Field] = &[
    field("build", Kind::U16),
    field("minor", Kind::U8),
    field("major", Kind::U8),
];

const HW_VERSION: &[Field] = &[field("hw_rev", Kind::U8), field("hw_model", Kind::U8)];

const IMAGE_INFO: &[Field] = &[
    field("sig", Kind::U32),
    field("image_start", Kind::U32),
    field("image_length", Kind::U32),
    field("vector_chk", Kind::U32),
    field("image_chk", Kind::U32),
    field("ver_id", Kind::Group(IMAGE_VERSION)),
    field("descriptor0", Kind::Text(44)),
    field("descriptor1", Kind::Text(44)),
    field("stamp_date", Kind::Text(30)),
    field("hw_ver", Kind::Group(HW_VERSION)),
];

const VERSION_BODY: &[Field] = &[
    field("base", Kind::U32),
    field("image_info", Kind::Group(IMAGE_INFO)),
];

const EVENT_BODY: &[Field] = &[
    field("ev", Kind::U16),
    field("pcode", Kind::U8),
    field("w", Kind::U8),
    field("arg0", Kind::U32),
    field("arg1", Kind::U32),
    field("arg2", Kind::U32),
    field("arg3", Kind::U32),
];

const GPS_HEADER: &[Field] = &[
    field("mark", Kind::U32),
    field("chip", Kind::U8),
    field("dir", Kind::U8),
    field("pad", Kind::Skip(2)),
];

const GPS_BODY: &[Field] = &[
    field("mark", Kind::U32),
    field("chip", Kind::U8),
    field("dir", Kind::U8),
    field("pad", Kind::Skip(2)),
    field("data", Kind::BytesRest),
];

const SENSOR_BODY: &[Field] = &[
    field("sched_delta", Kind::U32),
    field("sns_id", Kind::U16),
    field("pad", Kind::Skip(2)),
    field("data", Kind::BytesRest),
];

const NOTE_BODY: &[Field] = &[field("note", Kind::TextRest)];

const RAW_BODY: &[Field] = &[field("data", Kind::BytesRest)];

/// Header time stamp, when it is a valid date, followed by the body layout.
fn decode_body(record: &Record, body: &[Field]) -> Result<Fields, DecodeError> {
    let mut fields = Fields::new();

    let time = record
        .header
        .timestamp
        .as_deref()
        .and_then(RtcTime::parse)
        .filter(|time| time.to_datetime().is_some());
    if let Some(time) = time {
        fields.push("time", Value::Text(time.to_string()));
    }

    fields.extend(layout::decode(body, ByteOrder::Little, &mut record.payload())?);
    Ok(fields)
}

fn decode_sync(record: &Record) -> Result<Fields, DecodeError> {
    decode_body(record, SYNC_BODY)
}

fn decode_reboot(record: &Record) -> Result<Fields, DecodeError> {
    decode_body(record, REBOOT_BODY)
}

fn decode_version(record: &Record) -> Result<Fields, DecodeError> {
    decode_body(record, VERSION_BODY)
}

fn decode_event(record: &Record) -> Result<Fields, DecodeError> {
    decode_body(record, EVENT_BODY)
}

fn decode_gps(record: &Record) -> Result<Fields, DecodeError> {
    decode_body(record, GPS_BODY)
}

fn decode_sensor(record: &Record) -> Result<Fields, DecodeError> {
    decode_body(record, SENSOR_BODY)
}

fn decode_note(record: &Record) -> Result<Fields, DecodeError> {
    decode_body(record, NOTE_BODY)
}

fn decode_raw(record: &Record) -> Result<Fields, DecodeError> {
    decode_body(record, RAW_BODY)
}

/// GPS header followed by the SiRF packet exactly as the chip sent it.
fn decode_gps_raw(record: &Record) -> Result<Fields, DecodeError> {
    let mut fields = decode_body(record, GPS_HEADER)?;
    let start = record.payload.start + layout::min_size(GPS_HEADER);
    let packet = record.raw.slice(start..record.payload.end);
    fields.extend(sirf::decode_embedded(record.offset + start as u64, packet)?);
    Ok(fields)
}

pub const ENTRIES: &[Entry] = &[
    Entry::new(REBOOT, "REBOOT", decode_reboot).fixed(REBOOT_LEN),
    Entry::new(VERSION, "VERSION", decode_version).fixed(VERSION_LEN),
    Entry::new(SYNC, "SYNC", decode_sync).fixed(SYNC_LEN),
    Entry::new(EVENT, "EVENT", decode_event).fixed(EVENT_LEN),
    Entry::new(DEBUG, "DEBUG", decode_raw),
    Entry::new(SYNC_FLUSH, "SYNC_FLUSH", decode_sync).fixed(SYNC_LEN),
    Entry::new(SYNC_REBOOT, "SYNC_REBOOT", decode_sync).fixed(SYNC_LEN),
    Entry::new(GPS_VERSION, "GPS_VERSION", decode_gps),
    Entry::new(GPS_TIME, "GPS_TIME", decode_gps),
    Entry::new(GPS_GEO, "GPS_GEO", decode_gps),
    Entry::new(GPS_XYZ, "GPS_XYZ", decode_gps),
    Entry::new(SENSOR_DATA, "SENSOR_DATA", decode_sensor),
    Entry::new(SENSOR_SET, "SENSOR_SET", decode_sensor),
    Entry::new(TEST, "TEST", decode_raw),
    Entry::new(NOTE, "NOTE", decode_note),
    Entry::new(CONFIG, "CONFIG", decode_raw),
    Entry::new(GPS_PROTO_STATS, "GPS_PROTO_STATS", decode_gps),
    Entry::new(GPS_TRK, "GPS_TRK", decode_gps),
    Entry::new(GPS_CLK, "GPS_CLK", decode_gps),
    Entry::new(GPS_RAW_SIRFBIN, "GPS_RAW_SIRFBIN", decode_gps_raw),
    Entry::new(TAGNET, "TAGNET", decode_raw),
    Entry::new(RADIO, "RADIO", decode_raw),
];

pub fn encode_sync(config: &ProtocolConfig, record_number: u32, prev_sync: u32) -> Vec<u8> {
    let mut body = Vec::with_capacity(SYNC_LEN - HEADER_SIZE);
    body.put_u32_le(prev_sync);
    body.put_u32_le(MAJIK);
    encode(config, SYNC, Some(record_number), None, &body)
}

pub fn encode_reboot(
    config: &ProtocolConfig,
    record_number: u32,
    time: RtcTime,
    reboot_count: u32,
) -> Vec<u8> {
    let mut body = Vec::with_capacity(REBOOT_LEN - HEADER_SIZE);
    body.put_u32_le(0);
    body.put_u32_le(MAJIK);
    body.put_u16_le(1);
    body.put_u16_le(0);
    body.put_u32_le(0x0002_0000);
    // owcb: signatures, flags and uptime
    body.put_u32_le(0xfaba_fabb);
    body.put_u32_le(0);
    body.put_u64_le(0);
    // reset_status .. fault_gold
    body.put_bytes(0, 5 * 4);
    body.put_u32_le(reboot_count);
    body.put_bytes(0, 4);
    body.put_u32_le(0xfaba_fabb);
    // strange .. image_chk_fail
    body.put_bytes(0, 4 * 4);
    body.put_u64_le(0);
    body.put_u32_le(0xfaba_fabb);

    encode(
        config,
        REBOOT,
        Some(record_number),
        Some(&time.to_bytes()),
        &body,
    )
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use crate::{
        frame::{
            FrameParser,
            Parsed,
            Record,
            encode,
            pad,
        },
        layout::Value,
        protocol::{
            Protocol,
            dblk::{
                self,
                RtcTime,
            },
            sirf,
        },
        source::Input,
    };

    fn first_record(bytes: Vec<u8>) -> Record {
        let registry = Protocol::Dblk.registry().build();
        let mut parser = FrameParser::new(dblk::config());
        let mut input = Input::new(std::io::Cursor::new(bytes));
        match parser.next(&mut input, &registry).unwrap() {
            Parsed::Record(record) => record,
            other => panic!("expected a record, got {other:?}"),
        }
    }

    #[test]
    fn it_round_trips_rtc_time() {
        let datetime = NaiveDate::from_ymd_opt(2018, 6, 17)
            .unwrap()
            .and_hms_milli_opt(14, 3, 27, 500)
            .unwrap();
        let time = RtcTime::from_datetime(datetime);
        assert_eq!(time.sub_sec, 16384);
        assert_eq!(RtcTime::parse(&time.to_bytes()), Some(time));
        assert_eq!(time.to_datetime(), Some(datetime));
        assert_eq!(time.to_string(), "2018/06/17-14:03:27.500");
        assert!(RtcTime::default().to_string().ends_with("(unset)"));
    }

    #[test]
    fn it_builds_reboot_records_of_the_right_size() {
        let config = dblk::config();
        let time = RtcTime {
            year: 2019,
            mon: 1,
            day: 2,
            ..Default::default()
        };
        let bytes = dblk::encode_reboot(&config, 7, time, 3);
        assert_eq!(bytes.len(), dblk::REBOOT_LEN);

        let record = first_record(bytes);
        let registry = Protocol::Dblk.registry().build();
        let fields = (registry.get(dblk::REBOOT).unwrap().decode)(&record).unwrap();

        assert_eq!(
            fields.get("time"),
            Some(&Value::Text("2019/01/02-00:00:00.000".into()))
        );
        assert_eq!(fields.get("majik"), Some(&Value::Unsigned(dblk::MAJIK.into())));
        let Some(Value::Group(owcb)) = fields.get("owcb")
        else {
            panic!("owcb missing: {fields}");
        };
        assert_eq!(owcb.get("reboot_count"), Some(&Value::Unsigned(3)));
        assert_eq!(owcb.get("ow_sig_c"), Some(&Value::Unsigned(0xfaba_fabb)));
    }

    #[test]
    fn it_decodes_events_and_notes() {
        let config = dblk::config();

        let mut body = vec![0u8; 20];
        body[0] = 9;
        body[4] = 0x2a;
        let record = first_record(encode(&config, dblk::EVENT, Some(1), None, &body));
        let registry = Protocol::Dblk.registry().build();
        let fields = (registry.get(dblk::EVENT).unwrap().decode)(&record).unwrap();
        assert_eq!(fields.get("ev"), Some(&Value::Unsigned(9)));
        assert_eq!(fields.get("arg0"), Some(&Value::Unsigned(0x2a)));
        assert_eq!(fields.get("time"), None);

        let mut bytes = encode(&config, dblk::NOTE, Some(2), None, b"battery swapped");
        pad(&config, &mut bytes);
        let record = first_record(bytes);
        let fields = (registry.get(dblk::NOTE).unwrap().decode)(&record).unwrap();
        assert_eq!(
            fields.get("note"),
            Some(&Value::Text("battery swapped".into()))
        );
    }

    #[test]
    fn it_decodes_embedded_sirf_packets() {
        let config = dblk::config();
        let mut body = vec![0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        body.extend(sirf::encode_packet(sirf::OK_TO_SEND, &[1]));
        let mut bytes = encode(&config, dblk::GPS_RAW_SIRFBIN, Some(4), None, &body);
        pad(&config, &mut bytes);

        let record = first_record(bytes);
        let registry = Protocol::Dblk.registry().build();
        let fields = (registry.get(dblk::GPS_RAW_SIRFBIN).unwrap().decode)(&record).unwrap();

        assert_eq!(fields.get("mark"), Some(&Value::Unsigned(1)));
        assert_eq!(fields.get("mid"), Some(&Value::Unsigned(18)));
        assert_eq!(fields.get("name"), Some(&Value::Text("OK_TO_SEND".into())));
    }
}

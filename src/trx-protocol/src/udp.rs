// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! The decoder UDP datagram protocol (§4.2/§4.3/§6).
//!
//! Every frame starts with a 32-bit big-endian magic and schema version,
//! then a 32-bit message type and a length-prefixed, Latin-1 identifier
//! string. The protocol nominally specifies UTF-16BE strings but the real
//! sender writes single-byte Latin-1 with a 32-bit length prefix
//! (`0xFFFF_FFFF` = null) -- this codec follows the wire, not the paper
//! spec, the way this workspace's other framed protocols favor the
//! observed byte layout over the documented one.

use chrono::{DateTime, Utc};

pub const MAGIC: u32 = 0xADBC_CBDA;
pub const SCHEMA_VERSION: u32 = 2;
const NULL_LEN: u32 = 0xFFFF_FFFF;

pub mod msg_type {
    pub const HEARTBEAT: u32 = 0;
    pub const STATUS: u32 = 1;
    pub const DECODE: u32 = 2;
    pub const CLEAR: u32 = 3;
    pub const REPLY: u32 = 4;
    pub const QSO_LOGGED: u32 = 5;
    pub const CLOSE: u32 = 6;
    pub const HALT_TX: u32 = 8;
    pub const FREE_TEXT: u32 = 9;
    pub const CONFIGURE: u32 = 15;
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("datagram too short: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("bad magic: expected {MAGIC:#010x}, got {0:#010x}")]
    BadMagic(u32),
    #[error("unsupported schema version {0}")]
    UnsupportedSchema(u32),
    #[error("unknown message type {0}")]
    UnknownMessageType(u32),
    #[error("Latin-1 string length prefix exceeds remaining datagram")]
    StringOverrun,
}

/// The 13-byte structured timestamp used by the QSO-Logged message: a
/// signed Julian day number, unsigned milliseconds-of-day, and a spec byte
/// whose meaning this protocol does not otherwise use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JulianTimestamp {
    pub julian_day: i64,
    pub ms_of_day: u32,
    pub time_spec: u8,
}

impl JulianTimestamp {
    pub const NULL_JULIAN_DAY: i64 = 0;

    /// Julian day 0 is null per §4.2.
    pub fn to_unix_ms(self) -> Option<i64> {
        if self.julian_day == Self::NULL_JULIAN_DAY {
            return None;
        }
        let epoch_day = self.julian_day - 2_440_588;
        Some(epoch_day * 86_400_000 + self.ms_of_day as i64)
    }

    pub fn from_unix_ms(unix_ms: i64) -> Self {
        let epoch_day = unix_ms.div_euclid(86_400_000);
        let ms_of_day = unix_ms.rem_euclid(86_400_000) as u32;
        Self {
            julian_day: epoch_day + 2_440_588,
            ms_of_day,
            time_spec: 0,
        }
    }

    pub fn from_iso(iso: &str) -> Option<Self> {
        let dt: DateTime<Utc> = iso.parse().ok()?;
        Some(Self::from_unix_ms(dt.timestamp_millis()))
    }

    pub fn to_iso(self) -> Option<String> {
        let ms = self.to_unix_ms()?;
        let dt = DateTime::<Utc>::from_timestamp_millis(ms)?;
        Some(dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
    }
}

pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FrameError> {
        if self.buf.len() < self.pos + n {
            return Err(FrameError::Truncated { need: n, have: self.buf.len() - self.pos });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, FrameError> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> Result<bool, FrameError> {
        Ok(self.u8()? != 0)
    }

    pub fn u32(&mut self) -> Result<u32, FrameError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn i32(&mut self) -> Result<i32, FrameError> {
        Ok(i32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn u64(&mut self) -> Result<u64, FrameError> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn i64(&mut self) -> Result<i64, FrameError> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn f64(&mut self) -> Result<f64, FrameError> {
        Ok(f64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// A length-prefixed, 8-bit-clean (Latin-1) string. `0xFFFF_FFFF`
    /// denotes null, `0` denotes empty.
    pub fn latin1_string(&mut self) -> Result<Option<String>, FrameError> {
        let len = self.u32()?;
        if len == NULL_LEN {
            return Ok(None);
        }
        let bytes = self.take(len as usize).map_err(|_| FrameError::StringOverrun)?;
        Ok(Some(bytes.iter().map(|&b| b as char).collect()))
    }

    pub fn julian_timestamp(&mut self) -> Result<JulianTimestamp, FrameError> {
        Ok(JulianTimestamp {
            julian_day: self.i64()?,
            ms_of_day: self.u32()?,
            time_spec: self.u8()?,
        })
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(64) }
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn bool(&mut self, v: bool) -> &mut Self {
        self.u8(v as u8)
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn f64(&mut self, v: f64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    /// Encode `Some("")` as a zero-length string and `None` as the null
    /// length marker -- the "do not change" sentinel the Configure message
    /// relies on (§4.3).
    pub fn latin1_string(&mut self, v: Option<&str>) -> &mut Self {
        match v {
            None => {
                self.u32(NULL_LEN);
            }
            Some(s) => {
                let bytes: Vec<u8> = s.chars().map(|c| c as u8).collect();
                self.u32(bytes.len() as u32);
                self.buf.extend_from_slice(&bytes);
            }
        }
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

fn write_header(w: &mut Writer, message_type: u32, id: Option<&str>) {
    w.u32(MAGIC).u32(SCHEMA_VERSION).u32(message_type).latin1_string(id);
}

/// A parsed decoder → server frame (§4.2).
#[derive(Debug, Clone, PartialEq)]
pub enum IngestMessage {
    Heartbeat {
        id: Option<String>,
    },
    Status {
        id: Option<String>,
        dial_hz: u64,
        mode: Option<String>,
        dx_call: Option<String>,
        report: Option<String>,
        tx_mode: Option<String>,
        tx_enabled: bool,
        transmitting: bool,
        decoding: bool,
        rx_audio_offset_hz: u32,
        tx_audio_offset_hz: u32,
    },
    Decode {
        id: Option<String>,
        new: bool,
        time_ms_of_day: u32,
        snr_db: i32,
        dt_sec: f64,
        delta_freq_hz: u32,
        mode: Option<String>,
        message: Option<String>,
        low_confidence: bool,
        off_air: bool,
    },
    QsoLogged {
        id: Option<String>,
        time_off: JulianTimestamp,
        dx_call: Option<String>,
        dx_grid: Option<String>,
        tx_frequency_hz: u64,
        mode: Option<String>,
        report_sent: Option<String>,
        report_received: Option<String>,
        tx_power: Option<String>,
        comments: Option<String>,
        name: Option<String>,
        time_on: JulianTimestamp,
    },
    Close {
        id: Option<String>,
    },
}

/// Parse one UDP datagram from a decoder. Malformed frames are reported as
/// `FrameError`; the caller drops them and continues (§7 protocol-parse
/// policy) rather than treating this as fatal.
pub fn parse_ingest(datagram: &[u8]) -> Result<IngestMessage, FrameError> {
    let mut r = Reader::new(datagram);
    let magic = r.u32()?;
    if magic != MAGIC {
        return Err(FrameError::BadMagic(magic));
    }
    let schema = r.u32()?;
    if schema != SCHEMA_VERSION {
        return Err(FrameError::UnsupportedSchema(schema));
    }
    let message_type = r.u32()?;
    let id = r.latin1_string()?;

    use msg_type::*;
    let msg = match message_type {
        HEARTBEAT => IngestMessage::Heartbeat { id },
        STATUS => IngestMessage::Status {
            id,
            dial_hz: r.u64()?,
            mode: r.latin1_string()?,
            dx_call: r.latin1_string()?,
            report: r.latin1_string()?,
            tx_mode: r.latin1_string()?,
            tx_enabled: r.bool()?,
            transmitting: r.bool()?,
            decoding: r.bool()?,
            rx_audio_offset_hz: r.u32()?,
            tx_audio_offset_hz: r.u32()?,
        },
        DECODE => IngestMessage::Decode {
            id,
            new: r.bool()?,
            time_ms_of_day: r.u32()?,
            snr_db: r.i32()?,
            dt_sec: r.f64()?,
            delta_freq_hz: r.u32()?,
            mode: r.latin1_string()?,
            message: r.latin1_string()?,
            low_confidence: r.bool()?,
            off_air: r.bool()?,
        },
        QSO_LOGGED => IngestMessage::QsoLogged {
            id,
            time_off: r.julian_timestamp()?,
            dx_call: r.latin1_string()?,
            dx_grid: r.latin1_string()?,
            tx_frequency_hz: r.u64()?,
            mode: r.latin1_string()?,
            report_sent: r.latin1_string()?,
            report_received: r.latin1_string()?,
            tx_power: r.latin1_string()?,
            comments: r.latin1_string()?,
            name: r.latin1_string()?,
            time_on: r.julian_timestamp()?,
        },
        CLOSE => IngestMessage::Close { id },
        other => return Err(FrameError::UnknownMessageType(other)),
    };
    Ok(msg)
}

/// Modifier bit for [`encode_reply`]: "shift held", which causes the
/// decoder to auto-enable TX.
pub const REPLY_MODIFIER_SHIFT_HELD: u8 = 0x02;

/// Encode a Reply frame (type 4): answer a specific prior decode.
#[allow(clippy::too_many_arguments)]
pub fn encode_reply(
    id: &str,
    time_ms_of_day: u32,
    snr_db: i32,
    dt_sec: f64,
    delta_freq_hz: u32,
    mode: &str,
    message: &str,
    low_confidence: bool,
    modifiers: u8,
) -> Vec<u8> {
    let mut w = Writer::new();
    write_header(&mut w, msg_type::REPLY, Some(id));
    w.u32(time_ms_of_day)
        .i32(snr_db)
        .f64(dt_sec)
        .u32(delta_freq_hz)
        .latin1_string(Some(mode))
        .latin1_string(Some(message))
        .bool(low_confidence)
        .u8(modifiers);
    w.finish()
}

/// Encode a Free-text frame (type 9): set or send arbitrary outbound text.
pub fn encode_free_text(id: &str, text: &str, send: bool) -> Vec<u8> {
    let mut w = Writer::new();
    write_header(&mut w, msg_type::FREE_TEXT, Some(id));
    w.latin1_string(Some(text)).bool(send);
    w.finish()
}

/// Fields the decoder should leave unchanged when set to `None`/absent.
#[derive(Debug, Clone, Default)]
pub struct ConfigureFrame<'a> {
    pub mode: Option<&'a str>,
    pub frequency_tolerance_hz: Option<u32>,
    pub submode: Option<&'a str>,
    pub fast_mode: Option<bool>,
    pub tr_period_secs: Option<u32>,
    pub rx_audio_offset_hz: Option<u32>,
    pub dx_call: Option<&'a str>,
    pub dx_grid: Option<&'a str>,
    pub generate_messages: Option<bool>,
}

/// Encode a Configure frame (type 15). Any empty string or `0xFFFF_FFFF`
/// length means "do not change" on the decoder side.
pub fn encode_configure(id: &str, cfg: &ConfigureFrame<'_>) -> Vec<u8> {
    let mut w = Writer::new();
    write_header(&mut w, msg_type::CONFIGURE, Some(id));
    w.latin1_string(cfg.mode)
        .u32(cfg.frequency_tolerance_hz.unwrap_or(NULL_LEN))
        .latin1_string(cfg.submode)
        .bool(cfg.fast_mode.unwrap_or(false))
        .u32(cfg.tr_period_secs.unwrap_or(NULL_LEN))
        .u32(cfg.rx_audio_offset_hz.unwrap_or(NULL_LEN))
        .latin1_string(cfg.dx_call)
        .latin1_string(cfg.dx_grid)
        .bool(cfg.generate_messages.unwrap_or(false));
    w.finish()
}

/// Encode a Halt-Tx frame (type 8).
pub fn encode_halt_tx(id: &str, auto_tx_only: bool) -> Vec<u8> {
    let mut w = Writer::new();
    write_header(&mut w, msg_type::HALT_TX, Some(id));
    w.bool(auto_tx_only);
    w.finish()
}

/// Window selector for [`encode_clear`]: 0 = band activity, 1 = rx
/// frequency, 2 = both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearWindow {
    BandActivity = 0,
    RxFrequency = 1,
    Both = 2,
}

/// Encode a Clear frame (type 3).
pub fn encode_clear(id: &str, window: ClearWindow) -> Vec<u8> {
    let mut w = Writer::new();
    write_header(&mut w, msg_type::CLEAR, Some(id));
    w.u8(window as u8);
    w.finish()
}

/// Encode a graceful-shutdown Close frame (type 6), same wire shape in
/// either direction.
pub fn encode_close(id: &str) -> Vec<u8> {
    let mut w = Writer::new();
    write_header(&mut w, msg_type::CLOSE, Some(id));
    w.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_round_trips() {
        let mut w = Writer::new();
        write_header(&mut w, msg_type::HEARTBEAT, Some("wsjtx-A"));
        let bytes = w.finish();
        match parse_ingest(&bytes).unwrap() {
            IngestMessage::Heartbeat { id } => assert_eq!(id.as_deref(), Some("wsjtx-A")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn status_round_trips_all_fields() {
        let mut w = Writer::new();
        write_header(&mut w, msg_type::STATUS, Some("wsjtx-B"));
        w.u64(14_074_000)
            .latin1_string(Some("USB"))
            .latin1_string(Some("EA4IFI"))
            .latin1_string(Some("-05"))
            .latin1_string(Some("FT8"))
            .bool(true)
            .bool(true)
            .bool(false)
            .u32(1500)
            .u32(1500);
        let bytes = w.finish();
        match parse_ingest(&bytes).unwrap() {
            IngestMessage::Status { dial_hz, tx_enabled, transmitting, rx_audio_offset_hz, .. } => {
                assert_eq!(dial_hz, 14_074_000);
                assert!(tx_enabled);
                assert!(transmitting);
                assert_eq!(rx_audio_offset_hz, 1500);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn null_string_round_trips() {
        let mut w = Writer::new();
        w.latin1_string(None);
        let mut r = Reader::new(&w.finish());
        assert_eq!(r.latin1_string().unwrap(), None);
    }

    #[test]
    fn latin1_preserves_high_bytes() {
        let raw = "caf\u{e9}"; // 'é' is 0xE9 in Latin-1
        let mut w = Writer::new();
        w.latin1_string(Some(raw));
        let mut r = Reader::new(&w.finish());
        assert_eq!(r.latin1_string().unwrap().as_deref(), Some(raw));
    }

    #[test]
    fn julian_day_zero_is_null() {
        let ts = JulianTimestamp { julian_day: 0, ms_of_day: 1234, time_spec: 0 };
        assert_eq!(ts.to_unix_ms(), None);
    }

    #[test]
    fn julian_round_trips_through_iso_truncated_to_millis() {
        let iso = "2026-07-28T14:03:12.500Z";
        let ts = JulianTimestamp::from_iso(iso).unwrap();
        assert_eq!(ts.to_iso().unwrap(), iso);
    }

    #[test]
    fn reply_frame_round_trips_logical_content() {
        let bytes = encode_reply("wsjtx-B", 50_400_000, -5, 0.2, 1500, "FT8", "EA4IFI", false, REPLY_MODIFIER_SHIFT_HELD);
        let mut r = Reader::new(&bytes);
        assert_eq!(r.u32().unwrap(), MAGIC);
        assert_eq!(r.u32().unwrap(), SCHEMA_VERSION);
        assert_eq!(r.u32().unwrap(), msg_type::REPLY);
        assert_eq!(r.latin1_string().unwrap().as_deref(), Some("wsjtx-B"));
        assert_eq!(r.u32().unwrap(), 50_400_000);
        assert_eq!(r.i32().unwrap(), -5);
        assert_eq!(r.f64().unwrap(), 0.2);
        assert_eq!(r.u32().unwrap(), 1500);
        assert_eq!(r.latin1_string().unwrap().as_deref(), Some("FT8"));
        assert_eq!(r.latin1_string().unwrap().as_deref(), Some("EA4IFI"));
        assert!(!r.bool().unwrap());
        assert_eq!(r.u8().unwrap(), REPLY_MODIFIER_SHIFT_HELD);
    }

    #[test]
    fn decode_message_drops_on_truncated_datagram() {
        let bytes = vec![0xAD, 0xBC, 0xCB, 0xDA, 0x00, 0x00, 0x00, 0x02];
        assert!(parse_ingest(&bytes).is_err());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut w = Writer::new();
        w.u32(0xDEAD_BEEF).u32(SCHEMA_VERSION).u32(msg_type::HEARTBEAT).latin1_string(None);
        assert!(matches!(parse_ingest(&w.finish()), Err(FrameError::BadMagic(_))));
    }

    #[test]
    fn configure_do_not_change_uses_null_sentinels() {
        let bytes = encode_configure("wsjtx-A", &ConfigureFrame { mode: Some("FT8"), ..Default::default() });
        let mut r = Reader::new(&bytes);
        r.u32().unwrap();
        r.u32().unwrap();
        r.u32().unwrap();
        r.latin1_string().unwrap();
        r.latin1_string().unwrap();
        assert_eq!(r.u32().unwrap(), NULL_LEN);
    }
}

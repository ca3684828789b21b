// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Decode records: the internal, routing-aware shape kept in per-channel
//! ring buffers, and the public shape handed across the AI tool boundary.

use serde::{Deserialize, Serialize};

/// One decoded message as observed on a channel. Never leaves the core with
/// its `channel_index`/`letter` intact -- see [`PublicDecodeRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalDecodeRecord {
    pub channel_index: u8,
    pub letter: char,
    /// ISO-8601 UTC timestamp, e.g. `2026-07-28T14:03:12.500Z`.
    pub timestamp: String,
    /// Unix epoch milliseconds, used for ring-window math; not exposed
    /// publicly (the ISO `timestamp` is what crosses the AI boundary).
    pub ts_ms: i64,
    pub band: Option<String>,
    pub mode: String,
    pub dial_hz: u64,
    pub audio_offset_hz: i32,
    pub rf_hz: u64,
    pub snr_db: i32,
    pub dt_sec: f64,
    pub call: String,
    pub grid: Option<String>,
    pub is_cq: bool,
    pub is_my_call: bool,
    pub is_directed_cq_to_me: bool,
    pub cq_target_token: Option<String>,
    pub raw: String,
    pub new: bool,
    pub low_confidence: bool,
    pub off_air: bool,
}

/// The shape returned across the AI JSON-RPC boundary: no routing fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicDecodeRecord {
    pub id: String,
    pub timestamp: String,
    pub band: Option<String>,
    pub mode: String,
    pub dial_hz: u64,
    pub audio_offset_hz: i32,
    pub rf_hz: u64,
    pub snr_db: i32,
    pub dt_sec: f64,
    pub call: String,
    pub grid: Option<String>,
    pub is_cq: bool,
    pub is_my_call: bool,
    pub is_directed_cq_to_me: bool,
    pub cq_target_token: Option<String>,
    pub raw: String,
    pub new: bool,
    pub low_confidence: bool,
    pub off_air: bool,
}

impl InternalDecodeRecord {
    /// Strip routing identifiers and assign a snapshot-scoped public id.
    pub fn to_public(&self, index_in_snapshot: usize) -> PublicDecodeRecord {
        PublicDecodeRecord {
            id: format!("{}-{}-{}", self.letter, self.timestamp, index_in_snapshot),
            timestamp: self.timestamp.clone(),
            band: self.band.clone(),
            mode: self.mode.clone(),
            dial_hz: self.dial_hz,
            audio_offset_hz: self.audio_offset_hz,
            rf_hz: self.rf_hz,
            snr_db: self.snr_db,
            dt_sec: self.dt_sec,
            call: self.call.clone(),
            grid: self.grid.clone(),
            is_cq: self.is_cq,
            is_my_call: self.is_my_call,
            is_directed_cq_to_me: self.is_directed_cq_to_me,
            cq_target_token: self.cq_target_token.clone(),
            raw: self.raw.clone(),
            new: self.new,
            low_confidence: self.low_confidence,
            off_air: self.off_air,
        }
    }
}

/// A point-in-time, id-stamped view handed to the AI tool layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodeSnapshot {
    pub snapshot_id: String,
    pub generated_at: String,
    pub decodes: Vec<PublicDecodeRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> InternalDecodeRecord {
        InternalDecodeRecord {
            channel_index: 2,
            letter: 'C',
            timestamp: "2026-07-28T14:03:12.500Z".into(),
            ts_ms: 1_784_736_192_500,
            band: Some("20m".into()),
            mode: "FT8".into(),
            dial_hz: 14_074_000,
            audio_offset_hz: 1500,
            rf_hz: 14_075_500,
            snr_db: -5,
            dt_sec: 0.2,
            call: "EA4IFI".into(),
            grid: Some("IM79".into()),
            is_cq: true,
            is_my_call: false,
            is_directed_cq_to_me: true,
            cq_target_token: None,
            raw: "CQ EA4IFI IM79".into(),
            new: true,
            low_confidence: false,
            off_air: false,
        }
    }

    #[test]
    fn public_record_has_no_routing_fields() {
        let public = sample().to_public(0);
        let value = serde_json::to_value(&public).unwrap();
        assert!(value.get("channel_index").is_none());
        assert!(value.get("letter").is_none());
        assert_eq!(value.get("call").unwrap(), "EA4IFI");
    }
}

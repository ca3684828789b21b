// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Per-channel state: one entry per SDR slice (A..D), fixed cardinality.

use serde::{Deserialize, Serialize};

use crate::mode::OperatingMode;
use crate::radio::{default_bands, Freq};

/// Fixed number of channels the core ever manages.
pub const NUM_CHANNELS: usize = 4;

pub const UDP_INGEST_BASE_PORT: u16 = 2237;
pub const HRD_CHANNEL_BASE_PORT: u16 = 7809;
pub const HRD_AGGREGATE_PORT: u16 = 7800;

/// Map a zero-based channel index to its slice letter (A..D).
pub fn letter_for_index(index: u8) -> char {
    (b'A' + index) as char
}

pub fn udp_port_for_index(index: u8) -> u16 {
    UDP_INGEST_BASE_PORT + index as u16
}

pub fn hrd_port_for_index(index: u8) -> u16 {
    HRD_CHANNEL_BASE_PORT + index as u16
}

pub fn audio_rx_for_index(index: u8) -> u8 {
    index + 1
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChannelStatus {
    Offline,
    Idle,
    Decoding,
    Calling,
    InQso,
    Error,
}

impl Default for ChannelStatus {
    fn default() -> Self {
        Self::Offline
    }
}

/// A decoder process bound to one channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecoderInstance {
    pub name: String,
    pub channel_index: u8,
    pub pid: Option<u32>,
    pub running: bool,
    pub restart_count: u32,
    /// Unix-epoch milliseconds of the last spawn attempt.
    pub last_start_ms: Option<i64>,
    pub last_error: Option<String>,
}

impl DecoderInstance {
    pub fn new(name: impl Into<String>, channel_index: u8) -> Self {
        Self {
            name: name.into(),
            channel_index,
            pid: None,
            running: false,
            restart_count: 0,
            last_start_ms: None,
            last_error: None,
        }
    }
}

/// One SDR slice as presented to the rest of the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub index: u8,
    pub letter: char,
    pub instance_name: String,
    pub freq_hz: u64,
    pub mode: OperatingMode,
    pub band: Option<String>,
    pub is_tx: bool,
    pub audio_rx: u8,
    pub audio_tx: u8,
    pub udp_port: u16,
    pub hrd_port: u16,

    /// Fields last reported by the decoder's Status frame (§4.2).
    pub digital_mode: Option<String>,
    pub decoder_tx_enabled: bool,
    pub decoder_transmitting: bool,
    pub decoder_decoding: bool,
    pub rx_audio_offset_hz: u32,
    pub tx_audio_offset_hz: u32,

    pub status: ChannelStatus,
    pub connected: bool,
    pub last_heartbeat_ms: Option<i64>,
    pub last_decode_ms: Option<i64>,
    pub decode_count: u64,
    pub qso_count: u64,
}

impl Channel {
    pub fn new(index: u8) -> Self {
        let letter = letter_for_index(index);
        Self {
            index,
            letter,
            instance_name: format!("wsjtx-{letter}"),
            freq_hz: 0,
            mode: OperatingMode::default(),
            band: None,
            is_tx: false,
            audio_rx: audio_rx_for_index(index),
            audio_tx: 1,
            udp_port: udp_port_for_index(index),
            hrd_port: hrd_port_for_index(index),
            digital_mode: None,
            decoder_tx_enabled: false,
            decoder_transmitting: false,
            decoder_decoding: false,
            rx_audio_offset_hz: 0,
            tx_audio_offset_hz: 0,
            status: ChannelStatus::default(),
            connected: false,
            last_heartbeat_ms: None,
            last_decode_ms: None,
            decode_count: 0,
            qso_count: 0,
        }
    }

    /// Recompute `band` from `freq_hz` using the default band plan.
    pub fn recompute_band(&mut self) {
        let bands = default_bands();
        self.band = Freq::new(self.freq_hz).band_name(&bands);
    }

    /// The mode the outside world should see: the decoder's reported digital
    /// submode when present, else the rig-control operating mode.
    pub fn effective_mode(&self) -> String {
        self.digital_mode
            .clone()
            .unwrap_or_else(|| self.mode.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_assignment_matches_index() {
        let ch = Channel::new(2);
        assert_eq!(ch.letter, 'C');
        assert_eq!(ch.udp_port, 2239);
        assert_eq!(ch.hrd_port, 7811);
        assert_eq!(ch.audio_rx, 3);
    }

    #[test]
    fn recompute_band_sets_label() {
        let mut ch = Channel::new(0);
        ch.freq_hz = 14_074_000;
        ch.recompute_band();
        assert_eq!(ch.band.as_deref(), Some("20m"));
    }

    #[test]
    fn effective_mode_prefers_digital_mode() {
        let mut ch = Channel::new(0);
        ch.mode = OperatingMode::Usb;
        ch.digital_mode = Some("FT8".to_string());
        assert_eq!(ch.effective_mode(), "FT8");
    }
}

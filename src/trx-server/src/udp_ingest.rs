// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Per-slice UDP ingest (§4.2) and egress (§4.3), unified on one socket
//! per channel since the decoder both sends its status/decode traffic and
//! receives control frames on the same loopback port. The `recv_from`
//! loop never panics or returns on a malformed datagram (§7
//! protocol-parse policy): unknown types and truncated frames are logged
//! at `debug` with a running counter and the loop continues.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{debug, info};

use trx_core::decode::InternalDecodeRecord;
use trx_core::qso::QsoRecord;
use trx_core::radio::{default_bands, Freq};
use trx_core::enrich;
use trx_protocol::udp::{parse_ingest, IngestMessage};

use crate::app::{now_ms, AppState};
use crate::qso_driver::{ChannelCommand, DecodeContext};

/// Bind the per-channel ingest/egress socket and spawn its read loop.
/// Returns the socket so the caller can hand it to the channel's QSO
/// driver for outbound Reply frames.
pub async fn bind(index: u8, port: u16) -> std::io::Result<Arc<UdpSocket>> {
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let socket = UdpSocket::bind(addr).await?;
    info!(channel = index, port, "bound UDP ingest/egress socket");
    Ok(Arc::new(socket))
}

pub fn spawn(index: u8, socket: Arc<UdpSocket>, app: Arc<AppState>) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 8192];
        let malformed_count = AtomicU64::new(0);
        loop {
            let (len, peer) = match socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(err) => {
                    debug!(channel = index, "udp recv error: {err}");
                    continue;
                }
            };

            app.send_to_channel(index, ChannelCommand::PeerAddr(peer));

            match parse_ingest(&buf[..len]) {
                Ok(msg) => handle_message(index, &app, msg).await,
                Err(err) => {
                    let count = malformed_count.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(channel = index, count, "discarding malformed ingest frame: {err}");
                }
            }
        }
    });
}

async fn handle_message(index: u8, app: &Arc<AppState>, msg: IngestMessage) {
    let now = now_ms();
    match msg {
        IngestMessage::Heartbeat { .. } => {
            app.core.lock().expect("state core mutex never poisoned").record_heartbeat(index, now);
        }
        IngestMessage::Status {
            dial_hz,
            mode,
            tx_enabled,
            transmitting,
            decoding,
            rx_audio_offset_hz,
            tx_audio_offset_hz,
            ..
        } => {
            app.core.lock().expect("state core mutex never poisoned").update_from_decoder_status(
                index,
                dial_hz,
                mode,
                tx_enabled,
                transmitting,
                decoding,
                rx_audio_offset_hz,
                tx_audio_offset_hz,
            );
        }
        IngestMessage::Decode {
            snr_db,
            dt_sec,
            delta_freq_hz,
            mode,
            message,
            low_confidence,
            off_air,
            new,
            ..
        } => {
            let Some(raw) = message else { return };
            let raw_upper = raw.to_ascii_uppercase();
            let parsed = enrich::parse_decode_text(&raw_upper);
            let Some(call) = parsed.call.clone() else {
                debug!(channel = index, "dropping decode with no recognizable callsign: {raw}");
                return;
            };

            let (freq_hz, band) = {
                let core = app.core.lock().expect("state core mutex never poisoned");
                let ch = core.channel(index);
                (ch.map(|c| c.freq_hz).unwrap_or(0), ch.and_then(|c| c.band.clone()))
            };
            let is_directed_cq_to_me = if parsed.is_cq {
                enrich::is_directed_cq_to_me(parsed.cq_target_token.as_deref(), &app.station)
            } else {
                false
            };
            let is_my_call = enrich::is_my_call(&raw_upper, &app.station.callsign);

            let record = InternalDecodeRecord {
                channel_index: index,
                letter: (b'A' + index) as char,
                timestamp: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
                ts_ms: now,
                band,
                mode: mode.clone().unwrap_or_default(),
                dial_hz: freq_hz,
                audio_offset_hz: delta_freq_hz as i32,
                rf_hz: freq_hz + delta_freq_hz as u64,
                snr_db,
                dt_sec,
                call: call.clone(),
                grid: parsed.grid,
                is_cq: parsed.is_cq,
                is_my_call,
                is_directed_cq_to_me,
                cq_target_token: parsed.cq_target_token,
                raw: raw.clone(),
                new,
                low_confidence,
                off_air,
            };

            app.core.lock().expect("state core mutex never poisoned").add_decode(record, now);

            app.send_to_channel(
                index,
                ChannelCommand::Decode(DecodeContext {
                    raw,
                    snr_db,
                    dt_sec,
                    delta_freq_hz,
                    mode: mode.unwrap_or_else(|| "FT8".to_string()),
                }),
            );
        }
        IngestMessage::QsoLogged {
            dx_call,
            dx_grid,
            tx_frequency_hz,
            mode,
            report_sent,
            report_received,
            tx_power,
            comments,
            name,
            time_on,
            time_off,
            ..
        } => {
            let Some(call) = dx_call else {
                debug!(channel = index, "dropping QsoLogged frame with no dx call");
                return;
            };
            let bands = default_bands();
            let band = Freq::new(tx_frequency_hz).band_name(&bands).unwrap_or_else(|| "unknown".to_string());
            let instance_name = app
                .core
                .lock()
                .expect("state core mutex never poisoned")
                .channel(index)
                .map(|c| c.instance_name.clone())
                .unwrap_or_default();
            let notes = match (comments, name) {
                (Some(c), Some(n)) => Some(format!("{n}; {c}")),
                (Some(c), None) => Some(c),
                (None, Some(n)) => Some(n),
                (None, None) => None,
            };
            let record = QsoRecord {
                time_on: time_on.to_iso().unwrap_or_default(),
                time_off: time_off.to_iso().unwrap_or_default(),
                call,
                grid: dx_grid,
                band,
                dial_hz: tx_frequency_hz,
                mode: mode.unwrap_or_default(),
                report_sent,
                report_received,
                tx_power_watts: tx_power.and_then(|p| p.parse().ok()),
                letter: (b'A' + index) as char,
                channel_index: index,
                instance_name,
                notes,
            };

            let already_worked = {
                let logbook = app.logbook.lock().await;
                logbook.is_worked(&record.call, &record.band, &record.mode)
            };
            if already_worked {
                info!(channel = index, call = %record.call, "duplicate contact reported by decoder: already worked on this band/mode");
            }

            let write_result = {
                let app = app.clone();
                let record = record.clone();
                tokio::task::spawn_blocking(move || {
                    let mut logbook = app.logbook.blocking_lock();
                    logbook.log_qso(&record)
                })
                .await
                .expect("logbook write task panicked")
            };
            match write_result {
                Ok(()) => {
                    app.core.lock().expect("state core mutex never poisoned").note_qso_logged(index);
                    info!(channel = index, call = %record.call, "decoder-reported QSO logged");
                }
                Err(err) => info!(channel = index, "failed to write decoder-reported ADIF entry: {err}"),
            }
        }
        IngestMessage::Close { .. } => {
            debug!(channel = index, "decoder sent a Close frame, marking channel offline");
            app.core.lock().expect("state core mutex never poisoned").channel_closed(index);
        }
    }
}

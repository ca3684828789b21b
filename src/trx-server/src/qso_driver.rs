// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Per-channel autonomous QSO driver (§4.7). One task per channel owns a
//! `QsoState` and an `mpsc` inbox; it never touches another channel's
//! state. `process_event` is pure -- this module's job is only to arm the
//! single-shot timeout timer, translate `QsoAction` into an outbound UDP
//! Reply frame, and log completed contacts.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

use trx_core::qso::{process_event, QsoAction, QsoEvent, QsoRecord, QsoState, REPLY_TIMEOUT_SECS};
use trx_protocol::udp::{encode_reply, JulianTimestamp, REPLY_MODIFIER_SHIFT_HELD};

use crate::app::{now_ms, AppState};

/// A decode relayed from the ingest loop, carrying the wire fields a
/// Reply frame needs alongside the pure `QsoEvent` payload.
#[derive(Debug, Clone)]
pub struct DecodeContext {
    pub raw: String,
    pub snr_db: i32,
    pub dt_sec: f64,
    pub delta_freq_hz: u32,
    pub mode: String,
}

/// Commands a channel's QSO driver accepts. `Start`/`Decode` mirror
/// `trx_core::qso::QsoEvent`; `PeerAddr` keeps the driver's reply target
/// current as the ingest loop observes the decoder's source port; `Close`
/// sends a graceful-shutdown Close frame ahead of a supervisor-driven
/// process restart (§4.6).
#[derive(Debug, Clone)]
pub enum ChannelCommand {
    Start { target_call: String, decode: DecodeContext },
    Decode(DecodeContext),
    PeerAddr(SocketAddr),
    Close,
}

/// Spawn the driver task for one channel. `instance_name` is the UDP
/// protocol id string (e.g. "wsjtx-A") every frame to this decoder carries.
pub fn spawn(
    index: u8,
    instance_name: String,
    socket: Arc<UdpSocket>,
    app: Arc<AppState>,
    mut rx: mpsc::UnboundedReceiver<ChannelCommand>,
) {
    tokio::spawn(async move {
        let mut state = QsoState::Idle;
        let mut peer: Option<SocketAddr> = None;
        let mut last_ctx = DecodeContext {
            raw: String::new(),
            snr_db: 0,
            dt_sec: 0.0,
            delta_freq_hz: 0,
            mode: "FT8".to_string(),
        };
        let mut deadline: Option<Instant> = None;

        loop {
            let sleep = async {
                match deadline {
                    Some(when) => tokio::time::sleep_until(when).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                cmd = rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    match cmd {
                        ChannelCommand::PeerAddr(addr) => peer = Some(addr),
                        ChannelCommand::Close => {
                            if let Some(peer) = peer {
                                let frame = trx_protocol::udp::encode_close(&instance_name);
                                let _ = socket.send_to(&frame, peer).await;
                            }
                        }
                        ChannelCommand::Start { target_call, decode } => {
                            last_ctx = decode;
                            let (next, action) = process_event(&state, QsoEvent::Start {
                                target_call,
                                my_call: app.station.callsign.clone(),
                                my_grid: app.my_grid.clone().unwrap_or_default(),
                            });
                            state = next;
                            app.set_qso_active(index, state.is_active());
                            deadline = Some(Instant::now() + Duration::from_secs(REPLY_TIMEOUT_SECS));
                            apply_action(&app, index, &instance_name, &socket, peer, &last_ctx, action).await;
                        }
                        ChannelCommand::Decode(decode) => {
                            last_ctx = decode.clone();
                            let (next, action) = process_event(&state, QsoEvent::DecodeMessage {
                                raw: decode.raw,
                                snr_db: decode.snr_db,
                            });
                            let completed = matches!(next, QsoState::Complete { .. });
                            let failed = matches!(next, QsoState::Failed { .. });
                            state = next;
                            app.set_qso_active(index, state.is_active());
                            if completed {
                                log_completed_qso(&app, index, &instance_name, &state, &last_ctx).await;
                                deadline = None;
                            } else if failed {
                                warn!(channel = index, "QSO failed: {:?}", state);
                                deadline = None;
                            } else if state.is_active() {
                                deadline = Some(Instant::now() + Duration::from_secs(REPLY_TIMEOUT_SECS));
                            }
                            apply_action(&app, index, &instance_name, &socket, peer, &last_ctx, action).await;
                        }
                    }
                }
                () = sleep => {
                    let (next, action) = process_event(&state, QsoEvent::Timeout);
                    let failed = matches!(next, QsoState::Failed { .. });
                    state = next;
                    app.set_qso_active(index, state.is_active());
                    if failed || !state.is_active() {
                        deadline = None;
                    } else {
                        deadline = Some(Instant::now() + Duration::from_secs(REPLY_TIMEOUT_SECS));
                    }
                    apply_action(&app, index, &instance_name, &socket, peer, &last_ctx, action).await;
                }
            }
        }
        app.set_qso_active(index, false);
    });
}

async fn apply_action(
    app: &Arc<AppState>,
    index: u8,
    instance_name: &str,
    socket: &Arc<UdpSocket>,
    peer: Option<SocketAddr>,
    ctx: &DecodeContext,
    action: QsoAction,
) {
    let QsoAction::SendReply { message, report_modifier } = action else { return };
    let Some(peer) = peer else {
        warn!(channel = index, "no known decoder peer address; dropping reply");
        return;
    };
    let modifiers = if report_modifier { REPLY_MODIFIER_SHIFT_HELD } else { 0 };
    let time_ms_of_day = (now_ms() % 86_400_000) as u32;
    let frame = encode_reply(
        instance_name,
        time_ms_of_day,
        ctx.snr_db,
        ctx.dt_sec,
        ctx.delta_freq_hz,
        &ctx.mode,
        &message,
        false,
        modifiers,
    );
    if let Err(err) = socket.send_to(&frame, peer).await {
        warn!(channel = index, "failed to send reply frame: {err}");
        return;
    }
    let _ = app;
    info!(channel = index, message, "sent reply frame");
}

async fn log_completed_qso(app: &Arc<AppState>, index: u8, instance_name: &str, state: &QsoState, ctx: &DecodeContext) {
    let Some(qctx) = state.context() else { return };
    let band = app
        .core
        .lock()
        .expect("state core mutex never poisoned")
        .channel(index)
        .and_then(|c| c.band.clone())
        .unwrap_or_else(|| "unknown".to_string());
    let dial_hz = app.core.lock().expect("state core mutex never poisoned").channel(index).map(|c| c.freq_hz).unwrap_or(0);
    let letter = (b'A' + index) as char;

    let now = chrono::Utc::now();
    let record = QsoRecord {
        time_on: now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        time_off: JulianTimestamp::from_unix_ms(now_ms()).to_iso().unwrap_or_default(),
        call: qctx.target_call.clone(),
        grid: None,
        band,
        dial_hz,
        mode: ctx.mode.clone(),
        report_sent: None,
        report_received: None,
        tx_power_watts: None,
        letter,
        channel_index: index,
        instance_name: instance_name.to_string(),
        notes: None,
    };

    let already_worked = {
        let logbook = app.logbook.lock().await;
        logbook.is_worked(&record.call, &record.band, &record.mode)
    };
    if already_worked {
        warn!(channel = index, call = %record.call, "duplicate contact: already worked on this band/mode");
    }

    // The ADIF append is a blocking `std::fs` call (§5); run it off the
    // executor thread rather than holding the async mutex across it.
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
            info!(channel = index, call = %record.call, "QSO logged");
        }
        Err(err) => warn!(channel = index, "failed to write ADIF entry: {err}"),
    }
}

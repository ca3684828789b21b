// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! HRD-style rig-control TCP servers (§4.4): four per-channel listeners
//! plus one aggregate listener for external loggers. Each accepted
//! connection gets its own handler task reading length-framed HRD
//! messages and replying per the command grammar; a malformed command
//! gets `RPRT -1` rather than dropping the connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use trx_protocol::hrd::{decode_frame, encode_lines, parse_command, peek_frame_len, rprt, rprt_line, ButtonKind, Command};
use trx_protocol::mode::parse_mode;

use crate::app::AppState;

/// What the notifier task compares snapshots on to decide whether an
/// unsolicited update line is due (§4.4).
#[derive(Debug, Clone, PartialEq)]
struct WatchedState {
    freq_hz: u64,
    mode: String,
    ptt_on: bool,
}

/// `None` selects the aggregate server's behavior (reports on the current
/// TX channel); `Some(index)` pins a per-channel listener to that slice.
pub async fn spawn_listener(port: u16, channel: Option<u8>, app: Arc<AppState>) -> std::io::Result<()> {
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let listener = TcpListener::bind(addr).await?;
    info!(port, channel = ?channel, "HRD rig-control listener bound");

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let app = app.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, channel, &app).await {
                            warn!(peer = %peer, "HRD connection ended: {err}");
                        }
                    });
                }
                Err(err) => warn!("HRD accept error: {err}"),
            }
        }
    });
    Ok(())
}

async fn handle_connection(stream: TcpStream, channel: Option<u8>, app: &Arc<AppState>) -> std::io::Result<()> {
    let (mut read_half, write_half) = tokio::io::split(stream);
    let write_half = Arc::new(AsyncMutex::new(write_half));

    let notifier = tokio::spawn(spawn_unsolicited_updates(write_half.clone(), channel, app.clone()));

    let mut buf = Vec::new();
    let result: std::io::Result<()> = 'outer: loop {
        let frame = match read_frame(&mut read_half, &mut buf).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break Ok(()),
            Err(err) => break Err(err),
        };
        let text = match decode_frame(&frame) {
            Ok(text) => text,
            Err(_) => continue,
        };
        for line in text.lines() {
            let reply = dispatch(line, channel, app);
            let refs: Vec<&str> = reply.iter().map(String::as_str).collect();
            let mut w = write_half.lock().await;
            if let Err(err) = w.write_all(&encode_lines(&refs)).await {
                break 'outer Err(err);
            }
        }
    };
    notifier.abort();
    result
}

/// Watch the state core's debounced snapshot fan-out and push unsolicited
/// `frequency`/`mode`/`ptt` lines whenever this listener's effective
/// channel's values change (§4.4), independent of the command/response
/// traffic sharing the same socket.
async fn spawn_unsolicited_updates(write_half: Arc<AsyncMutex<WriteHalf<TcpStream>>>, channel: Option<u8>, app: Arc<AppState>) {
    let mut rx = app.snapshot_rx.clone();
    let mut last: Option<WatchedState> = None;
    loop {
        let snap = rx.borrow().clone();
        let index = effective_channel(channel, &app);
        if let Some(ch) = snap.channels.get(index as usize) {
            let current = WatchedState { freq_hz: ch.freq_hz, mode: ch.mode.to_string(), ptt_on: ch.is_tx };
            if let Some(prev) = &last {
                let mut lines = Vec::new();
                if prev.freq_hz != current.freq_hz {
                    lines.push(format!("frequency {}", current.freq_hz));
                }
                if prev.mode != current.mode {
                    lines.push(format!("mode {}", current.mode));
                }
                if prev.ptt_on != current.ptt_on {
                    lines.push(format!("ptt {}", if current.ptt_on { "on" } else { "off" }));
                }
                if !lines.is_empty() {
                    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
                    let mut w = write_half.lock().await;
                    if w.write_all(&encode_lines(&refs)).await.is_err() {
                        return;
                    }
                }
            }
            last = Some(current);
        }
        if rx.changed().await.is_err() {
            return;
        }
        // Give the debounce window a moment to settle a burst of mutations
        // into one snapshot before re-reading it.
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Read one complete HRD frame, buffering across multiple `read` calls
/// since TCP gives no message boundaries.
async fn read_frame(stream: &mut ReadHalf<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<Option<Vec<u8>>> {
    let mut chunk = [0u8; 4096];
    loop {
        if buf.len() >= 4 {
            if let Ok(declared) = peek_frame_len(&buf[0..4]) {
                if buf.len() >= declared {
                    let frame = buf[0..declared].to_vec();
                    buf.drain(0..declared);
                    return Ok(Some(frame));
                }
            }
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Resolve which channel a command selector without an explicit `[N]`
/// prefix (the aggregate listener's case) applies to: the current TX
/// channel, falling back to channel 0.
fn effective_channel(channel: Option<u8>, app: &Arc<AppState>) -> u8 {
    channel.unwrap_or_else(|| app.latest_snapshot().tx_channel.unwrap_or(0))
}

fn dispatch(line: &str, channel: Option<u8>, app: &Arc<AppState>) -> Vec<String> {
    let index = effective_channel(channel, app);
    match parse_command(line) {
        Command::GetFrequency => {
            let snap = app.latest_snapshot();
            match snap.channels.get(index as usize) {
                Some(ch) => vec![format!("{}", ch.freq_hz), rprt_line(rprt::OK)],
                None => vec![rprt_line(rprt::UNRECOGNIZED)],
            }
        }
        Command::SetFrequencyHz(hz) => {
            if !app.backend.is_connected() {
                return vec![rprt_line(rprt::BACKEND_UNAVAILABLE)];
            }
            let backend = app.backend.clone();
            tokio::spawn(async move {
                let _ = backend.tune_slice(index, hz).await;
            });
            vec![rprt_line(rprt::OK)]
        }
        Command::GetMode => {
            // §4.4: the underlying rig mode (USB/LSB/.../AM), not the
            // decoder-reported digital submode `Channel::effective_mode`
            // exposes to the AI tool surface.
            let snap = app.latest_snapshot();
            match snap.channels.get(index as usize) {
                Some(ch) => vec![ch.mode.to_string()],
                None => vec![rprt_line(rprt::UNRECOGNIZED)],
            }
        }
        Command::SetMode { mode } => {
            if !app.backend.is_connected() {
                return vec![rprt_line(rprt::BACKEND_UNAVAILABLE)];
            }
            let backend = app.backend.clone();
            let parsed = parse_mode(&mode);
            tokio::spawn(async move {
                let _ = backend.set_slice_mode(index, parsed).await;
            });
            vec![rprt_line(rprt::OK)]
        }
        Command::GetButtonSelect(kind) => {
            let snap = app.latest_snapshot();
            let on = match (kind, snap.channels.get(index as usize)) {
                (ButtonKind::Tx, Some(ch)) => ch.is_tx,
                (ButtonKind::Ptt, Some(ch)) => ch.decoder_transmitting,
                _ => false,
            };
            vec![if on { "1".to_string() } else { "0".to_string() }, rprt_line(rprt::OK)]
        }
        Command::SetButtonSelect { kind, on } => {
            if kind == ButtonKind::Tx {
                if !app.backend.is_connected() {
                    return vec![rprt_line(rprt::BACKEND_UNAVAILABLE)];
                }
                let backend = app.backend.clone();
                tokio::spawn(async move {
                    let _ = backend.set_slice_tx(index, on).await;
                });
            }
            vec![rprt_line(rprt::OK)]
        }
        Command::GetRadio | Command::GetRadios => vec!["Ham Radio Deluxe".to_string()],
        Command::GetContext | Command::GetContexts => {
            let snap = app.latest_snapshot();
            vec![snap.channels.iter().map(|c| c.letter.to_string()).collect::<Vec<_>>().join(",")]
        }
        Command::Unknown(_) => vec![rprt_line(rprt::UNRECOGNIZED)],
    }
}

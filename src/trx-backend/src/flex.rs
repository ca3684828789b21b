// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! The concrete SDR [`RadioBackend`]: a line-oriented command/response TCP
//! client on port 4992 (§4.5). Commands are sent as `C<seq>|<command>\n`;
//! responses come back `S<handle>|<payload>` and unsolicited slice status
//! lines arrive as `S<handle>|slice <index> key=value key=value ...`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

use trx_core::{DynResult, OperatingMode};

use crate::{BackendEvent, BoxFuture, RadioBackend, SliceInfo};

pub const DEFAULT_PORT: u16 = 4992;
const MAX_BACKOFF: Duration = Duration::from_secs(60);

struct Shared {
    slices: HashMap<u8, SliceInfo>,
    writer: Option<tokio::net::tcp::OwnedWriteHalf>,
}

/// Backend for the vendor SDR's slice-receiver protocol. Owns the
/// connection lifecycle; slice state lives in a shared table updated by
/// the reader task and read back synchronously by `list_slices`.
pub struct FlexBackend {
    connected: Arc<AtomicBool>,
    seq: AtomicU32,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<BackendEvent>,
}

impl FlexBackend {
    #[must_use]
    pub fn new(events: mpsc::UnboundedSender<BackendEvent>) -> Self {
        Self {
            connected: Arc::new(AtomicBool::new(false)),
            seq: AtomicU32::new(1),
            shared: Arc::new(Mutex::new(Shared { slices: HashMap::new(), writer: None })),
            events,
        }
    }

    async fn send_command(&self, command: &str) -> DynResult<()> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let line = format!("C{seq}|{command}\n");
        let mut shared = self.shared.lock().await;
        match shared.writer.as_mut() {
            Some(writer) => {
                writer.write_all(line.as_bytes()).await?;
                Ok(())
            }
            None => Err("flex backend is not connected".into()),
        }
    }

    /// Spawn the background reconnect-and-read loop. Runs until the
    /// process exits; backoff resets to 1 s after any successful connect.
    fn spawn_reconnect_loop(host: String, shared: Arc<Mutex<Shared>>, events: mpsc::UnboundedSender<BackendEvent>, connected: Arc<AtomicBool>) {
        tokio::spawn(async move {
            let mut backoff = Duration::from_secs(1);
            loop {
                match TcpStream::connect((host.as_str(), DEFAULT_PORT)).await {
                    Ok(stream) => {
                        backoff = Duration::from_secs(1);
                        connected.store(true, Ordering::SeqCst);
                        let _ = events.send(BackendEvent::Connected);
                        let (read_half, write_half) = stream.into_split();
                        {
                            let mut guard = shared.lock().await;
                            guard.writer = Some(write_half);
                        }
                        read_loop(read_half, &shared, &events).await;
                        connected.store(false, Ordering::SeqCst);
                        {
                            let mut guard = shared.lock().await;
                            guard.writer = None;
                            guard.slices.clear();
                        }
                        let _ = events.send(BackendEvent::Disconnected);
                    }
                    Err(err) => {
                        let _ = events.send(BackendEvent::Error(err.to_string()));
                    }
                }
                tokio::time::sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
            }
        });
    }
}

async fn read_loop(
    read_half: tokio::net::tcp::OwnedReadHalf,
    shared: &Arc<Mutex<Shared>>,
    events: &mpsc::UnboundedSender<BackendEvent>,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => handle_line(&line, shared, events).await,
            Ok(None) => return, // peer closed the connection
            Err(err) => {
                let _ = events.send(BackendEvent::Error(err.to_string()));
                return;
            }
        }
    }
}

async fn handle_line(line: &str, shared: &Arc<Mutex<Shared>>, events: &mpsc::UnboundedSender<BackendEvent>) {
    let Some((_handle, payload)) = line.split_once('|') else { return };
    let Some(rest) = payload.strip_prefix("slice ") else { return };
    let mut tokens = rest.split_whitespace();
    let Some(index_token) = tokens.next() else { return };
    let Ok(index) = index_token.parse::<u8>() else { return };

    let mut fields: HashMap<&str, &str> = HashMap::new();
    for token in tokens {
        if let Some((key, value)) = token.split_once('=') {
            fields.insert(key, value);
        }
    }

    let mut guard = shared.lock().await;
    let active = fields.get("active").map(|v| *v == "1").unwrap_or(true);
    let existed = guard.slices.contains_key(&index);

    if !active {
        if guard.slices.remove(&index).is_some() {
            let _ = events.send(BackendEvent::SliceRemoved { slice_index: index });
        }
        return;
    }

    let entry = guard.slices.entry(index).or_insert_with(|| SliceInfo {
        slice_index: index,
        freq_hz: 0,
        mode: OperatingMode::Usb,
        is_tx: false,
        audio_rx: index + 1,
    });

    if let Some(mhz) = fields.get("RF_frequency").or_else(|| fields.get("freq")) {
        if let Ok(mhz) = mhz.parse::<f64>() {
            entry.freq_hz = (mhz * 1_000_000.0).round() as u64;
        }
    }
    if let Some(mode) = fields.get("mode") {
        entry.mode = parse_flex_mode(mode);
    }
    if let Some(tx) = fields.get("tx") {
        entry.is_tx = *tx == "1";
    }

    let snapshot = entry.clone();
    drop(guard);

    if existed {
        let _ = events.send(BackendEvent::SliceUpdated(snapshot));
    } else {
        let _ = events.send(BackendEvent::SliceAdded(snapshot));
    }
}

fn parse_flex_mode(s: &str) -> OperatingMode {
    match s.to_ascii_uppercase().as_str() {
        "USB" => OperatingMode::Usb,
        "LSB" => OperatingMode::Lsb,
        "CW" => OperatingMode::Cw,
        "DIGU" => OperatingMode::DigU,
        "DIGL" => OperatingMode::DigL,
        "FM" => OperatingMode::Fm,
        "AM" => OperatingMode::Am,
        other => OperatingMode::Other(other.to_string()),
    }
}

fn mode_to_flex_token(mode: &OperatingMode) -> String {
    match mode {
        OperatingMode::Usb => "USB".to_string(),
        OperatingMode::Lsb => "LSB".to_string(),
        OperatingMode::Cw => "CW".to_string(),
        OperatingMode::DigU => "DIGU".to_string(),
        OperatingMode::DigL => "DIGL".to_string(),
        OperatingMode::Fm => "FM".to_string(),
        OperatingMode::Am => "AM".to_string(),
        OperatingMode::Other(s) => s.clone(),
    }
}

impl RadioBackend for FlexBackend {
    fn connect<'a>(&'a self, host: &'a str) -> BoxFuture<'a, DynResult<()>> {
        let host = host.to_string();
        Box::pin(async move {
            Self::spawn_reconnect_loop(host, self.shared.clone(), self.events.clone(), self.connected.clone());
            // `connect` returns once the loop is launched; actual
            // connectedness is observed via `is_connected`/events, since
            // the loop retries forever rather than failing once.
            Ok(())
        })
    }

    fn disconnect<'a>(&'a self) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.connected.store(false, Ordering::SeqCst);
            let mut shared = self.shared.lock().await;
            shared.writer = None;
            shared.slices.clear();
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn list_slices(&self) -> Vec<SliceInfo> {
        self.shared
            .try_lock()
            .map(|guard| guard.slices.values().cloned().collect())
            .unwrap_or_default()
    }

    fn tune_slice<'a>(&'a self, index: u8, freq_hz: u64) -> BoxFuture<'a, DynResult<()>> {
        Box::pin(async move {
            let mhz = freq_hz as f64 / 1_000_000.0;
            self.send_command(&format!("slice tune {index} {mhz:.6}")).await
        })
    }

    fn set_slice_mode<'a>(&'a self, index: u8, mode: OperatingMode) -> BoxFuture<'a, DynResult<()>> {
        Box::pin(async move {
            let token = mode_to_flex_token(&mode);
            self.send_command(&format!("slice set {index} mode={token}")).await
        })
    }

    fn set_slice_tx<'a>(&'a self, index: u8, tx: bool) -> BoxFuture<'a, DynResult<()>> {
        Box::pin(async move {
            let flag = if tx { 1 } else { 0 };
            self.send_command(&format!("slice set {index} tx={flag}")).await
        })
    }

    fn set_slice_audio<'a>(&'a self, index: u8, audio_rx: u8) -> BoxFuture<'a, DynResult<()>> {
        Box::pin(async move { self.send_command(&format!("slice set {index} audio_rx={audio_rx}")).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mode_tokens() {
        assert_eq!(parse_flex_mode("usb"), OperatingMode::Usb);
        assert_eq!(parse_flex_mode("DIGU"), OperatingMode::DigU);
        assert_eq!(mode_to_flex_token(&OperatingMode::DigL), "DIGL");
    }

    #[tokio::test]
    async fn handle_line_emits_slice_added_then_updated() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(Shared { slices: HashMap::new(), writer: None }));

        handle_line("S12345678|slice 0 RF_frequency=14.074000 mode=DIGU tx=0 active=1", &shared, &tx).await;
        match rx.try_recv().unwrap() {
            BackendEvent::SliceAdded(info) => {
                assert_eq!(info.slice_index, 0);
                assert_eq!(info.freq_hz, 14_074_000);
            }
            other => panic!("expected SliceAdded, got {other:?}"),
        }

        handle_line("S12345678|slice 0 RF_frequency=14.074000 mode=DIGU tx=1 active=1", &shared, &tx).await;
        match rx.try_recv().unwrap() {
            BackendEvent::SliceUpdated(info) => assert!(info.is_tx),
            other => panic!("expected SliceUpdated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn handle_line_emits_slice_removed_on_inactive() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(Shared { slices: HashMap::new(), writer: None }));

        handle_line("S1|slice 2 RF_frequency=7.074000 mode=USB active=1", &shared, &tx).await;
        rx.try_recv().unwrap();
        handle_line("S1|slice 2 active=0", &shared, &tx).await;
        match rx.try_recv().unwrap() {
            BackendEvent::SliceRemoved { slice_index } => assert_eq!(slice_index, 2),
            other => panic!("expected SliceRemoved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ignores_non_slice_lines() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(Shared { slices: HashMap::new(), writer: None }));
        handle_line("S1|version=3.2.1", &shared, &tx).await;
        assert!(rx.try_recv().is_err());
    }
}

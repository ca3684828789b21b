// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! The AI-facing JSON-RPC-over-stdio tool/resource surface (§4.9). One
//! request or response per line on stdin/stdout; all diagnostics go to
//! `tracing` (stderr) since stdout is the wire itself. Four tools, one
//! resource, and a debounced `notifications/resources/updated` push.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{error, warn};

use trx_protocol::jsonrpc::{error_code, Notification, Request, Response, RpcError};

use crate::app::{now_ms, AppState};
use crate::qso_driver::{ChannelCommand, DecodeContext};

const DECODE_WINDOW_SECS: i64 = 60;
const NOTIFY_DEBOUNCE_MS: u64 = 500;

/// Run the stdio JSON-RPC loop until stdin closes. Spawns a sibling task
/// that watches the state core's change fan-out and pushes debounced
/// `notifications/resources/updated` lines on the same stdout writer.
pub async fn run(app: Arc<AppState>) {
    let stdout = Arc::new(Mutex::new(tokio::io::stdout()));
    spawn_notifier(app.clone(), stdout.clone());

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                error!("error reading JSON-RPC stdio line: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(&app, &line).await;
        if let Some(response) = response {
            write_line(&stdout, &response).await;
        }
    }
}

async fn handle_line(app: &Arc<AppState>, line: &str) -> Option<Value> {
    let request: Request = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(err) => {
            return Some(
                serde_json::to_value(Response::err(Value::Null, RpcError::new(error_code::INVALID_REQUEST, err.to_string())))
                    .expect("Response always serializes"),
            );
        }
    };
    let id = request.id.clone().unwrap_or(Value::Null);

    let result = match request.method.as_str() {
        "initialize" => Ok(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": { "tools": {}, "resources": {} },
            "serverInfo": { "name": "trx-server", "version": env!("CARGO_PKG_VERSION") },
        })),
        "tools/list" => Ok(tools_list()),
        "resources/list" => Ok(resources_list()),
        "resources/read" => resources_read(app, &request.params),
        "tools/call" => tools_call(app, &request.params),
        _ => Err(RpcError::new(error_code::METHOD_NOT_FOUND, format!("unknown method {}", request.method))),
    };

    let response = match result {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::err(id, err),
    };
    Some(serde_json::to_value(response).expect("Response always serializes"))
}

fn tools_list() -> Value {
    json!({
        "tools": [
            {
                "name": "call_cq",
                "description": "Call CQ on the best available channel, optionally on a given band/frequency/mode",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "band": { "type": "string" },
                        "freq_hz": { "type": "integer" },
                        "mode": { "type": "string" },
                    },
                },
            },
            {
                "name": "answer_decoded_station",
                "description": "Answer a previously observed decode by its snapshot id",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "decode_id": { "type": "string" },
                        "force_mode": { "type": "string" },
                    },
                    "required": ["decode_id"],
                },
            },
            {
                "name": "rig_get_state",
                "description": "Read-only view of all four channels and the TX channel",
                "inputSchema": { "type": "object", "properties": {} },
            },
            {
                "name": "rig_emergency_stop",
                "description": "Drop TX on every channel immediately",
                "inputSchema": { "type": "object", "properties": {} },
            },
        ]
    })
}

fn resources_list() -> Value {
    json!({
        "resources": [
            { "uri": "wsjt-x://decodes", "name": "Recent decodes", "mimeType": "application/json" }
        ]
    })
}

fn resources_read(app: &Arc<AppState>, params: &Value) -> Result<Value, RpcError> {
    let uri = params.get("uri").and_then(Value::as_str).unwrap_or_default();
    if uri != "wsjt-x://decodes" {
        return Err(RpcError::new(error_code::INVALID_PARAMS, format!("unknown resource {uri}")));
    }
    let snapshot = decode_snapshot(app);
    Ok(json!({
        "contents": [{
            "uri": uri,
            "mimeType": "application/json",
            "text": serde_json::to_string(&snapshot).expect("DecodeSnapshot always serializes"),
        }]
    }))
}

fn decode_snapshot(app: &Arc<AppState>) -> trx_core::DecodeSnapshot {
    let now = now_ms();
    let snapshot_id = uuid::Uuid::new_v4().to_string();
    let generated_at = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
    app.core
        .lock()
        .expect("state core mutex never poisoned")
        .decode_snapshot(DECODE_WINDOW_SECS * 1000, now, snapshot_id, generated_at)
}

fn tools_call(app: &Arc<AppState>, params: &Value) -> Result<Value, RpcError> {
    let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
    match name {
        "call_cq" => call_cq(app, &arguments),
        "answer_decoded_station" => answer_decoded_station(app, &arguments),
        "rig_get_state" => Ok(rig_get_state(app)),
        "rig_emergency_stop" => rig_emergency_stop(app),
        other => Err(RpcError::new(error_code::METHOD_NOT_FOUND, format!("unknown tool {other}"))),
    }
}

/// Prefer a connected channel already tuned to the requested band; fall
/// back to the current TX channel, then channel 0.
fn pick_best_channel(app: &Arc<AppState>, band: Option<&str>) -> u8 {
    let snap = app.latest_snapshot();
    if let Some(band) = band {
        if let Some(ch) = snap.channels.iter().find(|c| c.connected && c.band.as_deref() == Some(band)) {
            return ch.index;
        }
    }
    snap.tx_channel.unwrap_or(0)
}

fn call_cq(app: &Arc<AppState>, args: &Value) -> Result<Value, RpcError> {
    let band = args.get("band").and_then(Value::as_str);
    let freq_hz = args.get("freq_hz").and_then(Value::as_u64);
    let mode = args.get("mode").and_then(Value::as_str).unwrap_or("FT8").to_string();

    let index = pick_best_channel(app, band);
    app.core.lock().expect("state core mutex never poisoned").set_tx_channel(index);

    if let Some(freq_hz) = freq_hz {
        if app.backend.is_connected() {
            let backend = app.backend.clone();
            tokio::spawn(async move {
                let _ = backend.tune_slice(index, freq_hz).await;
            });
        }
    }

    let snap = app.latest_snapshot();
    let channel = snap.channels.get(index as usize);
    Ok(json!({
        "status": "calling_cq",
        "band": channel.and_then(|c| c.band.clone()),
        "freq_hz": channel.map(|c| c.freq_hz),
        "mode": mode,
    }))
}

fn answer_decoded_station(app: &Arc<AppState>, args: &Value) -> Result<Value, RpcError> {
    let decode_id = args
        .get("decode_id")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::new(error_code::INVALID_PARAMS, "decode_id is required"))?;

    let snapshot = decode_snapshot(app);
    let record = snapshot
        .decodes
        .iter()
        .find(|d| d.id == decode_id)
        .ok_or_else(|| RpcError::application(format!("no decode with id {decode_id}")))?;

    let now = now_ms();
    let (index, peer_freq, peer_mode) = {
        let core = app.core.lock().expect("state core mutex never poisoned");
        let mut found = None;
        for ch in &core.snapshot().channels {
            if let Some(decode) = core.most_recent_decode_for(ch.index, &record.call, DECODE_WINDOW_SECS, now) {
                if decode.timestamp == record.timestamp && decode.snr_db == record.snr_db {
                    found = Some((ch.index, ch.freq_hz, ch.effective_mode()));
                    break;
                }
            }
        }
        found
    }
    .ok_or_else(|| RpcError::application("matching internal decode no longer in any channel's ring"))?;

    if app.is_qso_active(index) {
        return Err(RpcError::application(trx_core::CoreError::QsoAlreadyActive(index).to_string()));
    }

    let band = app.latest_snapshot().channels.get(index as usize).and_then(|c| c.band.clone());
    // Best-effort duplicate check: a contended lock here just means the
    // logbook task is mid-write, not worth blocking this call on.
    if let Ok(logbook) = app.logbook.try_lock() {
        if logbook.is_worked(&record.call, band.as_deref().unwrap_or(""), &peer_mode) {
            warn!(channel = index, call = %record.call, "answering a station already in the worked-index");
        }
    }

    app.core.lock().expect("state core mutex never poisoned").set_tx_channel(index);
    app.send_to_channel(
        index,
        ChannelCommand::Start {
            target_call: record.call.clone(),
            decode: DecodeContext { raw: record.raw.clone(), snr_db: record.snr_db, dt_sec: record.dt_sec, delta_freq_hz: record.audio_offset_hz as u32, mode: peer_mode.clone() },
        },
    );

    Ok(json!({
        "status": "answering",
        "band": band,
        "freq_hz": peer_freq,
        "mode": peer_mode,
        "target_call": record.call,
    }))
}

fn channel_status_str(status: trx_core::ChannelStatus) -> &'static str {
    use trx_core::ChannelStatus::*;
    match status {
        Offline => "offline",
        Idle => "idle",
        Decoding => "decoding",
        Calling => "calling",
        InQso => "in_qso",
        Error => "error",
    }
}

fn rig_get_state(app: &Arc<AppState>) -> Value {
    let snap = app.latest_snapshot();
    let channels: Vec<Value> = snap
        .channels
        .iter()
        .map(|c| {
            json!({
                "letter": c.letter.to_string(),
                "freq_hz": c.freq_hz,
                "band": c.band,
                "mode": c.effective_mode(),
                "is_tx": c.is_tx,
                "status": channel_status_str(c.status),
                "connected": c.connected,
                "last_decode_ms": c.last_decode_ms,
            })
        })
        .collect();
    json!({
        "channels": channels,
        "tx_channel_letter": snap.tx_channel.map(|i| (b'A' + i) as char).map(|c| c.to_string()),
        "backend_connected": snap.backend_connected,
    })
}

fn rig_emergency_stop(app: &Arc<AppState>) -> Result<Value, RpcError> {
    if !app.backend.is_connected() {
        return Err(RpcError::application("radio backend is not connected"));
    }
    let backend = app.backend.clone();
    let snap = app.latest_snapshot();
    let indices: Vec<u8> = snap.channels.iter().map(|c| c.index).collect();
    tokio::spawn(async move {
        for index in indices {
            let _ = backend.set_slice_tx(index, false).await;
        }
    });
    Ok(json!({ "status": "all channels stopped" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use trx_backend::DummyBackend;
    use trx_core::station::{Continent, StationProfile};
    use trx_core::{InternalDecodeRecord, Logbook};

    fn tempdir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "trx-rs-ai-tools-test-{}-{}",
            std::process::id(),
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn app_with_one_decode() -> Arc<AppState> {
        let dir = tempdir();
        let logbook = Logbook::open(dir.join("log.adi"), "K1XYZ", Some("FN42"));
        let backend = Arc::new(DummyBackend::new(4));
        let station = StationProfile::new("K1XYZ", Continent::Na, "W");
        let app = AppState::new(backend, station, Some("FN42".into()), logbook);

        let record = InternalDecodeRecord {
            channel_index: 0,
            letter: 'A',
            timestamp: "2026-07-28T14:03:12.500Z".into(),
            ts_ms: now_ms(),
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
        };
        app.core.lock().unwrap().add_decode(record, now_ms());
        app
    }

    #[test]
    fn answer_decoded_station_rejects_a_busy_channel() {
        let app = app_with_one_decode();
        let snapshot = decode_snapshot(&app);
        let decode_id = snapshot.decodes[0].id.clone();
        let args = json!({ "decode_id": decode_id });

        app.set_qso_active(0, true);
        let err = answer_decoded_station(&app, &args).unwrap_err();
        assert!(err.message.contains("already"));
    }

    #[test]
    fn answer_decoded_station_succeeds_when_channel_is_idle() {
        let app = app_with_one_decode();
        let snapshot = decode_snapshot(&app);
        let decode_id = snapshot.decodes[0].id.clone();
        let args = json!({ "decode_id": decode_id });

        let result = answer_decoded_station(&app, &args).unwrap();
        assert_eq!(result["status"], json!("answering"));
        assert_eq!(result["target_call"], json!("EA4IFI"));
    }
}

async fn write_line(stdout: &Arc<Mutex<tokio::io::Stdout>>, value: &Value) {
    let mut text = serde_json::to_string(value).expect("Value always serializes");
    text.push('\n');
    let mut stdout = stdout.lock().await;
    if let Err(err) = stdout.write_all(text.as_bytes()).await {
        error!("failed writing JSON-RPC stdio line: {err}");
    }
    let _ = stdout.flush().await;
}

/// Subscribe to the state core's debounced change fan-out and push a
/// `notifications/resources/updated` line, locally debounced to 500 ms,
/// whenever a snapshot carries a fresh decode.
fn spawn_notifier(app: Arc<AppState>, stdout: Arc<Mutex<tokio::io::Stdout>>) {
    let mut rx = app.snapshot_rx.clone();
    tokio::spawn(async move {
        loop {
            if rx.changed().await.is_err() {
                break;
            }
            let added = rx.borrow().added_since_last_notify;
            if !added {
                continue;
            }
            tokio::time::sleep(Duration::from_millis(NOTIFY_DEBOUNCE_MS)).await;
            let notification = Notification::new(
                "notifications/resources/updated",
                Some(json!({ "uri": "wsjt-x://decodes" })),
            );
            write_line(&stdout, &serde_json::to_value(notification).expect("Notification always serializes")).await;
        }
    });
}

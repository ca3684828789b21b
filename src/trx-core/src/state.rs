// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! The canonical world state (§4.1). Pure, synchronous, no I/O: the owning
//! binary drives the debounce timer and the heartbeat watchdog by calling
//! `maybe_emit`/`sweep_heartbeats` from its own periodic tasks and wires
//! listener callbacks at startup. No back-pointers to collaborators are
//! held anywhere here -- only a flat list of boxed callbacks, the way this
//! workspace's event emitter breaks the same cycle for a single rig.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::channel::{Channel, ChannelStatus, DecoderInstance, NUM_CHANNELS};
use crate::decode::{DecodeSnapshot, InternalDecodeRecord, PublicDecodeRecord};

pub const DEBOUNCE_MS: i64 = 100;
pub const HEARTBEAT_TIMEOUT_MS: i64 = 30_000;
pub const DEFAULT_RING_WINDOW_MS: i64 = 15 * 60 * 1000;
pub const MAX_RESTARTS: u32 = 5;
pub const MIN_RESTART_INTERVAL_MS: i64 = 5_000;

/// Unique identifier for a registered change listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelsSnapshot {
    pub channels: [Channel; NUM_CHANNELS],
    pub tx_channel: Option<u8>,
    pub backend_connected: bool,
    /// True when at least one decode was added since the previous emitted
    /// snapshot; drives the AI tool layer's `resources/updated` push.
    pub added_since_last_notify: bool,
}

/// Emitted by the heartbeat watchdog when an instance should be respawned.
#[derive(Debug, Clone)]
pub struct RestartRequest {
    pub channel_index: u8,
    pub instance_name: String,
    pub restart_count: u32,
}

struct Inner {
    channels: [Channel; NUM_CHANNELS],
    instances: [Option<DecoderInstance>; NUM_CHANNELS],
    rings: [VecDeque<InternalDecodeRecord>; NUM_CHANNELS],
    tx_channel: Option<u8>,
    backend_connected: bool,
    ring_window_ms: i64,
    dirty: bool,
    added_since_last_notify: bool,
    last_emit_ms: Option<i64>,
}

/// Owns the canonical channel/instance/decode-ring state. Mutators are the
/// only entry points collaborators use; reads go through `snapshot()`.
pub struct StateCore {
    inner: Inner,
    listeners: Vec<(ListenerId, Box<dyn Fn(&ChannelsSnapshot) + Send + Sync>)>,
}

impl Default for StateCore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCore {
    pub fn new() -> Self {
        Self {
            inner: Inner {
                channels: std::array::from_fn(|i| Channel::new(i as u8)),
                instances: Default::default(),
                rings: Default::default(),
                tx_channel: None,
                backend_connected: false,
                ring_window_ms: DEFAULT_RING_WINDOW_MS,
                dirty: false,
                added_since_last_notify: false,
                last_emit_ms: None,
            },
            listeners: Vec::new(),
        }
    }

    pub fn with_ring_window_ms(mut self, ms: i64) -> Self {
        self.inner.ring_window_ms = ms;
        self
    }

    /// Register a callback invoked (in registration order) whenever a
    /// debounced change is flushed. Callbacks must not block.
    pub fn register_listener<F>(&mut self, f: F) -> ListenerId
    where
        F: Fn(&ChannelsSnapshot) + Send + Sync + 'static,
    {
        let id = ListenerId::new();
        self.listeners.push((id, Box::new(f)));
        id
    }

    pub fn unregister_listener(&mut self, id: ListenerId) {
        self.listeners.retain(|(lid, _)| *lid != id);
    }

    fn mark_dirty(&mut self) {
        self.inner.dirty = true;
    }

    pub fn snapshot(&self) -> ChannelsSnapshot {
        ChannelsSnapshot {
            channels: self.inner.channels.clone(),
            tx_channel: self.inner.tx_channel,
            backend_connected: self.inner.backend_connected,
            added_since_last_notify: self.inner.added_since_last_notify,
        }
    }

    pub fn channel(&self, index: u8) -> Option<&Channel> {
        self.inner.channels.get(index as usize)
    }

    pub fn instance(&self, index: u8) -> Option<&DecoderInstance> {
        self.inner.instances.get(index as usize)?.as_ref()
    }

    // -- mutators -----------------------------------------------------

    pub fn set_backend_connected(&mut self, connected: bool) {
        if self.inner.backend_connected != connected {
            self.inner.backend_connected = connected;
            self.mark_dirty();
        }
    }

    pub fn set_tx_channel(&mut self, index: u8) {
        if self.inner.tx_channel == Some(index) {
            return;
        }
        for (i, ch) in self.inner.channels.iter_mut().enumerate() {
            ch.is_tx = i as u8 == index;
        }
        self.inner.tx_channel = Some(index);
        self.mark_dirty();
    }

    pub fn update_from_backend(
        &mut self,
        index: u8,
        freq_hz: Option<u64>,
        mode: Option<crate::mode::OperatingMode>,
        is_tx: Option<bool>,
        audio_rx: Option<u8>,
    ) {
        let changed = {
            let Some(ch) = self.inner.channels.get_mut(index as usize) else { return };
            let mut changed = false;
            if let Some(freq_hz) = freq_hz {
                if ch.freq_hz != freq_hz {
                    ch.freq_hz = freq_hz;
                    ch.recompute_band();
                    changed = true;
                }
            }
            if let Some(mode) = mode {
                if ch.mode != mode {
                    ch.mode = mode;
                    changed = true;
                }
            }
            if let Some(audio_rx) = audio_rx {
                if ch.audio_rx != audio_rx {
                    ch.audio_rx = audio_rx;
                    changed = true;
                }
            }
            changed
        };
        if let Some(true) = is_tx {
            self.set_tx_channel(index);
        }
        if changed {
            self.mark_dirty();
        }
    }

    pub fn update_from_decoder_status(
        &mut self,
        index: u8,
        dial_hz: u64,
        digital_mode: Option<String>,
        tx_enabled: bool,
        transmitting: bool,
        decoding: bool,
        rx_audio_offset_hz: u32,
        tx_audio_offset_hz: u32,
    ) {
        let Some(ch) = self.inner.channels.get_mut(index as usize) else { return };
        if ch.freq_hz != dial_hz {
            ch.freq_hz = dial_hz;
            ch.recompute_band();
        }
        ch.digital_mode = digital_mode;
        ch.decoder_tx_enabled = tx_enabled;
        ch.decoder_transmitting = transmitting;
        ch.decoder_decoding = decoding;
        ch.rx_audio_offset_hz = rx_audio_offset_hz;
        ch.tx_audio_offset_hz = tx_audio_offset_hz;

        if transmitting && ch.status != ChannelStatus::InQso {
            ch.status = ChannelStatus::Calling;
        } else if decoding && ch.status == ChannelStatus::Idle {
            ch.status = ChannelStatus::Decoding;
        }
        self.mark_dirty();
    }

    pub fn record_heartbeat(&mut self, index: u8, now_ms: i64) {
        let Some(ch) = self.inner.channels.get_mut(index as usize) else { return };
        ch.last_heartbeat_ms = Some(now_ms);
        if !ch.connected {
            ch.connected = true;
            self.mark_dirty();
        }
        if ch.status == ChannelStatus::Offline {
            ch.status = ChannelStatus::Idle;
            self.mark_dirty();
        }
    }

    pub fn add_decode(&mut self, record: InternalDecodeRecord, now_ms: i64) {
        let index = record.channel_index as usize;
        let Some(ch) = self.inner.channels.get_mut(index) else { return };
        ch.last_decode_ms = Some(now_ms);
        ch.decode_count += 1;
        if let Some(ring) = self.inner.rings.get_mut(index) {
            ring.push_back(record);
            evict_old(ring, now_ms, self.inner.ring_window_ms);
        }
        self.inner.added_since_last_notify = true;
        self.mark_dirty();
    }

    /// Record that a QSO completed on this channel. The worked-index and
    /// ADIF append are the logbook's responsibility, not the core's.
    pub fn note_qso_logged(&mut self, index: u8) {
        if let Some(ch) = self.inner.channels.get_mut(index as usize) {
            ch.qso_count += 1;
        }
        self.mark_dirty();
    }

    pub fn set_channel_status(&mut self, index: u8, status: ChannelStatus) {
        if let Some(ch) = self.inner.channels.get_mut(index as usize) {
            if ch.status != status {
                ch.status = status;
                self.mark_dirty();
            }
        }
    }

    /// A decoder's own Close frame (§4.2, message type 6): mark the channel
    /// offline. The listener itself keeps running -- a fresh Heartbeat
    /// lifts it back to idle the same way a first-ever heartbeat does.
    pub fn channel_closed(&mut self, index: u8) {
        if let Some(ch) = self.inner.channels.get_mut(index as usize) {
            ch.connected = false;
            ch.status = ChannelStatus::Offline;
            self.mark_dirty();
        }
    }

    pub fn register_instance(&mut self, index: u8, instance: DecoderInstance) {
        if let Some(slot) = self.inner.instances.get_mut(index as usize) {
            // The channel's own `instance_name` (used e.g. to stamp a
            // decoder-reported QsoLogged record) must track whatever name
            // the supervisor actually assigned -- "IC-7300" in standard
            // mode, not the flex "wsjtx-{letter}" default every channel is
            // constructed with.
            if let Some(ch) = self.inner.channels.get_mut(index as usize) {
                ch.instance_name = instance.name.clone();
            }
            // Preserve prior TX assignment across a re-registration: the
            // open question in §9 is resolved by simply not touching is_tx.
            *slot = Some(instance);
            self.mark_dirty();
        }
    }

    pub fn set_instance_pid(&mut self, index: u8, pid: u32, now_ms: i64) {
        if let Some(Some(inst)) = self.inner.instances.get_mut(index as usize) {
            inst.pid = Some(pid);
            inst.running = true;
            inst.last_start_ms = Some(now_ms);
            self.mark_dirty();
        }
    }

    pub fn instance_stopped(&mut self, index: u8, error: Option<String>) {
        if let Some(Some(inst)) = self.inner.instances.get_mut(index as usize) {
            inst.running = false;
            inst.pid = None;
            inst.last_error = error;
            self.mark_dirty();
        }
    }

    pub fn unregister_instance(&mut self, index: u8) {
        if let Some(slot) = self.inner.instances.get_mut(index as usize) {
            *slot = None;
            self.mark_dirty();
        }
    }

    /// 5-second cadence heartbeat sweep. Returns channels whose heartbeat
    /// has gone stale and, subject to the restart policy, a restart request.
    pub fn sweep_heartbeats(&mut self, now_ms: i64) -> Vec<RestartRequest> {
        let mut requests = Vec::new();
        for index in 0..NUM_CHANNELS {
            let stale = {
                let ch = &self.inner.channels[index];
                ch.connected
                    && ch
                        .last_heartbeat_ms
                        .map(|t| now_ms - t > HEARTBEAT_TIMEOUT_MS)
                        .unwrap_or(false)
            };
            if !stale {
                continue;
            }
            self.inner.channels[index].connected = false;
            self.inner.channels[index].status = ChannelStatus::Offline;
            self.mark_dirty();

            if let Some(inst) = self.inner.instances[index].as_mut() {
                inst.running = false;
                inst.last_error = Some("heartbeat timeout".to_string());
                let can_restart = inst.restart_count < MAX_RESTARTS
                    && inst
                        .last_start_ms
                        .map(|t| now_ms - t >= MIN_RESTART_INTERVAL_MS)
                        .unwrap_or(true);
                if can_restart {
                    inst.restart_count += 1;
                    requests.push(RestartRequest {
                        channel_index: index as u8,
                        instance_name: inst.name.clone(),
                        restart_count: inst.restart_count,
                    });
                } else if inst.restart_count >= MAX_RESTARTS {
                    self.inner.channels[index].status = ChannelStatus::Error;
                }
            }
        }
        requests
    }

    /// Flush a pending change if the debounce window has elapsed. Returns
    /// true if listeners were invoked.
    pub fn maybe_emit(&mut self, now_ms: i64) -> bool {
        if !self.inner.dirty {
            return false;
        }
        let due = self
            .inner
            .last_emit_ms
            .map(|t| now_ms - t >= DEBOUNCE_MS)
            .unwrap_or(true);
        if !due {
            return false;
        }
        let snap = self.snapshot();
        for (_, listener) in &self.listeners {
            listener(&snap);
        }
        self.inner.dirty = false;
        self.inner.added_since_last_notify = false;
        self.inner.last_emit_ms = Some(now_ms);
        true
    }

    /// Build the decode snapshot for the AI resource surface: all decodes
    /// within `window_ms` of `now_ms`, newest first, across every channel.
    pub fn decode_snapshot(&self, window_ms: i64, now_ms: i64, snapshot_id: String, generated_at: String) -> DecodeSnapshot {
        let mut all: Vec<&InternalDecodeRecord> = Vec::new();
        for ring in &self.inner.rings {
            for rec in ring {
                if now_ms - rec.ts_ms <= window_ms {
                    all.push(rec);
                }
            }
        }
        all.sort_by(|a, b| b.ts_ms.cmp(&a.ts_ms));
        let decodes: Vec<PublicDecodeRecord> = all
            .into_iter()
            .enumerate()
            .map(|(i, rec)| rec.to_public(i))
            .collect();
        DecodeSnapshot { snapshot_id, generated_at, decodes }
    }

    /// Find the most recent decode for `call` on `channel_index` within
    /// `within_secs` of `now_ms`; used by `execute-qso` (§4.7).
    pub fn most_recent_decode_for(
        &self,
        channel_index: u8,
        call: &str,
        within_secs: i64,
        now_ms: i64,
    ) -> Option<&InternalDecodeRecord> {
        self.inner
            .rings
            .get(channel_index as usize)?
            .iter()
            .rev()
            .find(|r| r.call.eq_ignore_ascii_case(call) && now_ms - r.ts_ms <= within_secs * 1000)
    }
}

fn evict_old(ring: &mut VecDeque<InternalDecodeRecord>, now_ms: i64, window_ms: i64) {
    while let Some(front) = ring.front() {
        if now_ms - front.ts_ms <= window_ms {
            break;
        }
        ring.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::OperatingMode;

    #[test]
    fn at_most_one_tx_channel() {
        let mut core = StateCore::new();
        core.set_tx_channel(1);
        core.set_tx_channel(2);
        let snap = core.snapshot();
        let tx_count = snap.channels.iter().filter(|c| c.is_tx).count();
        assert_eq!(tx_count, 1);
        assert!(snap.channels[2].is_tx);
        assert_eq!(snap.tx_channel, Some(2));
    }

    #[test]
    fn heartbeat_sweep_marks_offline_after_timeout() {
        let mut core = StateCore::new();
        core.record_heartbeat(0, 0);
        core.register_instance(0, DecoderInstance::new("wsjtx-A", 0));
        core.set_instance_pid(0, 1234, 0);
        let requests = core.sweep_heartbeats(HEARTBEAT_TIMEOUT_MS + 1);
        assert!(!core.snapshot().channels[0].connected);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].restart_count, 1);
    }

    #[test]
    fn restart_cap_stops_respawning() {
        let mut core = StateCore::new();
        core.register_instance(0, DecoderInstance::new("wsjtx-A", 0));
        core.set_instance_pid(0, 1, 0);
        let mut now = 0i64;
        for _ in 0..MAX_RESTARTS {
            core.record_heartbeat(0, now);
            now += HEARTBEAT_TIMEOUT_MS + MIN_RESTART_INTERVAL_MS + 1;
            let reqs = core.sweep_heartbeats(now);
            assert_eq!(reqs.len(), 1);
            core.set_instance_pid(0, 1, now);
        }
        core.record_heartbeat(0, now);
        now += HEARTBEAT_TIMEOUT_MS + MIN_RESTART_INTERVAL_MS + 1;
        let reqs = core.sweep_heartbeats(now);
        assert!(reqs.is_empty());
        assert_eq!(core.snapshot().channels[0].status, ChannelStatus::Error);
    }

    #[test]
    fn debounce_emits_at_most_once_per_window() {
        let mut core = StateCore::new();
        let fired = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let fired2 = fired.clone();
        core.register_listener(move |_| {
            fired2.fetch_add(1, Ordering::Relaxed);
        });
        core.set_tx_channel(0);
        assert!(core.maybe_emit(0));
        core.set_tx_channel(1);
        assert!(!core.maybe_emit(50));
        assert!(core.maybe_emit(100));
        assert_eq!(fired.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn channel_closed_marks_offline() {
        let mut core = StateCore::new();
        core.record_heartbeat(0, 0);
        assert!(core.snapshot().channels[0].connected);
        core.channel_closed(0);
        let ch = &core.snapshot().channels[0];
        assert!(!ch.connected);
        assert_eq!(ch.status, ChannelStatus::Offline);
    }

    #[test]
    fn decoder_status_sets_calling_when_transmitting() {
        let mut core = StateCore::new();
        core.record_heartbeat(0, 0);
        core.update_from_decoder_status(0, 14_074_000, Some("FT8".into()), true, true, false, 0, 0);
        assert_eq!(core.snapshot().channels[0].status, ChannelStatus::Calling);
        let _ = OperatingMode::Usb;
    }

    #[test]
    fn register_instance_updates_channel_instance_name() {
        let mut core = StateCore::new();
        assert_eq!(core.snapshot().channels[0].instance_name, "wsjtx-A");
        core.register_instance(0, DecoderInstance::new("IC-7300", 0));
        assert_eq!(core.snapshot().channels[0].instance_name, "IC-7300");
    }
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! The shared handle every task in this binary holds a clone of. Owns the
//! state core, the logbook, the radio backend, and the per-channel command
//! channels into the QSO driver -- nothing here is a back-pointer to a
//! specific task, per §9's "no cyclic references" design note.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use trx_backend::RadioBackend;
use trx_core::channel::NUM_CHANNELS;
use trx_core::station::StationProfile;
use trx_core::{ChannelsSnapshot, Logbook, StateCore};

use crate::qso_driver::ChannelCommand;

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct AppState {
    pub core: Mutex<StateCore>,
    pub logbook: tokio::sync::Mutex<Logbook>,
    pub backend: Arc<dyn RadioBackend>,
    pub station: StationProfile,
    pub my_grid: Option<String>,
    pub snapshot_rx: watch::Receiver<ChannelsSnapshot>,
    /// One slot per channel, filled in by the supervisor as each slice's
    /// QSO driver task comes up and cleared again on slice-removed --
    /// `standard` mode's single hard-coded channel fills slot 0 once at
    /// startup and never clears it.
    qso_tx: Vec<Mutex<Option<mpsc::UnboundedSender<ChannelCommand>>>>,
    /// One flag per channel, flipped by the QSO driver task as its state
    /// machine leaves/re-enters `Idle`. Lets `ai_tools` reject a second
    /// `Start` on a busy channel before it ever reaches the driver.
    qso_active: Vec<AtomicBool>,
}

impl AppState {
    /// Build the shared state, wiring the debounce fan-out into a
    /// `watch` channel every other task can cheaply subscribe to instead
    /// of locking the core just to read the latest snapshot.
    pub fn new(backend: Arc<dyn RadioBackend>, station: StationProfile, my_grid: Option<String>, logbook: Logbook) -> Arc<Self> {
        let mut core = StateCore::new();
        let initial = core.snapshot();
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);
        core.register_listener(move |snap| {
            let _ = snapshot_tx.send(snap.clone());
        });
        Arc::new(Self {
            core: Mutex::new(core),
            logbook: tokio::sync::Mutex::new(logbook),
            backend,
            station,
            my_grid,
            snapshot_rx,
            qso_tx: (0..NUM_CHANNELS).map(|_| Mutex::new(None)).collect(),
            qso_active: (0..NUM_CHANNELS).map(|_| AtomicBool::new(false)).collect(),
        })
    }

    pub fn latest_snapshot(&self) -> ChannelsSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn set_channel_sender(&self, index: u8, tx: mpsc::UnboundedSender<ChannelCommand>) {
        if let Some(slot) = self.qso_tx.get(index as usize) {
            *slot.lock().expect("qso_tx mutex never poisoned") = Some(tx);
        }
    }

    pub fn clear_channel_sender(&self, index: u8) {
        if let Some(slot) = self.qso_tx.get(index as usize) {
            *slot.lock().expect("qso_tx mutex never poisoned") = None;
        }
    }

    pub fn send_to_channel(&self, index: u8, cmd: ChannelCommand) {
        if let Some(slot) = self.qso_tx.get(index as usize) {
            if let Some(tx) = slot.lock().expect("qso_tx mutex never poisoned").as_ref() {
                let _ = tx.send(cmd);
            }
        }
    }

    pub fn is_qso_active(&self, index: u8) -> bool {
        self.qso_active
            .get(index as usize)
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn set_qso_active(&self, index: u8, active: bool) {
        if let Some(flag) = self.qso_active.get(index as usize) {
            flag.store(active, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trx_backend::DummyBackend;
    use trx_core::station::{Continent, StationProfile};

    fn tempdir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "trx-rs-app-test-{}-{}",
            std::process::id(),
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn qso_active_flag_defaults_clear_and_is_per_channel() {
        let dir = tempdir();
        let logbook = Logbook::open(dir.join("log.adi"), "K1XYZ", Some("FN42"));
        let backend = Arc::new(DummyBackend::new(4));
        let station = StationProfile::new("K1XYZ", Continent::Na, "W");
        let app = AppState::new(backend, station, Some("FN42".into()), logbook);

        assert!(!app.is_qso_active(0));
        assert!(!app.is_qso_active(1));

        app.set_qso_active(0, true);
        assert!(app.is_qso_active(0));
        assert!(!app.is_qso_active(1));

        app.set_qso_active(0, false);
        assert!(!app.is_qso_active(0));
    }
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! A scripted, in-memory [`RadioBackend`] used by `mode = "standard"` and
//! by tests, mirroring the reference `DummyRig`: every call succeeds
//! immediately and mutates a local table rather than touching the
//! network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use trx_core::{DynResult, OperatingMode};

use crate::{BoxFuture, RadioBackend, SliceInfo};

pub struct DummyBackend {
    connected: AtomicBool,
    slices: Mutex<Vec<SliceInfo>>,
}

impl DummyBackend {
    /// Build a dummy backend pre-populated with `count` slices (0-indexed,
    /// 20m USB by default), so `standard` mode has channels to drive
    /// without a real SDR on the network.
    #[must_use]
    pub fn new(count: u8) -> Self {
        let slices = (0..count)
            .map(|i| SliceInfo {
                slice_index: i,
                freq_hz: 14_074_000,
                mode: OperatingMode::DigU,
                is_tx: i == 0,
                audio_rx: i + 1,
            })
            .collect();
        Self { connected: AtomicBool::new(false), slices: Mutex::new(slices) }
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new(4)
    }
}

impl RadioBackend for DummyBackend {
    fn connect<'a>(&'a self, _host: &'a str) -> BoxFuture<'a, DynResult<()>> {
        Box::pin(async move {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn disconnect<'a>(&'a self) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.connected.store(false, Ordering::SeqCst);
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn list_slices(&self) -> Vec<SliceInfo> {
        self.slices.lock().expect("dummy backend mutex never poisoned").clone()
    }

    fn tune_slice<'a>(&'a self, index: u8, freq_hz: u64) -> BoxFuture<'a, DynResult<()>> {
        Box::pin(async move {
            let mut slices = self.slices.lock().expect("dummy backend mutex never poisoned");
            match slices.iter_mut().find(|s| s.slice_index == index) {
                Some(slice) => {
                    slice.freq_hz = freq_hz;
                    Ok(())
                }
                None => Err(format!("no such slice {index}").into()),
            }
        })
    }

    fn set_slice_mode<'a>(&'a self, index: u8, mode: OperatingMode) -> BoxFuture<'a, DynResult<()>> {
        Box::pin(async move {
            let mut slices = self.slices.lock().expect("dummy backend mutex never poisoned");
            match slices.iter_mut().find(|s| s.slice_index == index) {
                Some(slice) => {
                    slice.mode = mode;
                    Ok(())
                }
                None => Err(format!("no such slice {index}").into()),
            }
        })
    }

    fn set_slice_tx<'a>(&'a self, index: u8, tx: bool) -> BoxFuture<'a, DynResult<()>> {
        Box::pin(async move {
            let mut slices = self.slices.lock().expect("dummy backend mutex never poisoned");
            if !slices.iter().any(|s| s.slice_index == index) {
                return Err(format!("no such slice {index}").into());
            }
            for slice in slices.iter_mut() {
                slice.is_tx = tx && slice.slice_index == index;
            }
            Ok(())
        })
    }

    fn set_slice_audio<'a>(&'a self, index: u8, audio_rx: u8) -> BoxFuture<'a, DynResult<()>> {
        Box::pin(async move {
            let mut slices = self.slices.lock().expect("dummy backend mutex never poisoned");
            match slices.iter_mut().find(|s| s.slice_index == index) {
                Some(slice) => {
                    slice.audio_rx = audio_rx;
                    Ok(())
                }
                None => Err(format!("no such slice {index}").into()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_flips_connected_flag() {
        let backend = DummyBackend::new(1);
        assert!(!backend.is_connected());
        backend.connect("127.0.0.1").await.unwrap();
        assert!(backend.is_connected());
    }

    #[tokio::test]
    async fn tune_slice_updates_freq() {
        let backend = DummyBackend::new(2);
        backend.tune_slice(1, 7_074_000).await.unwrap();
        let slices = backend.list_slices();
        assert_eq!(slices[1].freq_hz, 7_074_000);
    }

    #[tokio::test]
    async fn set_slice_tx_clears_other_slices() {
        let backend = DummyBackend::new(3);
        backend.set_slice_tx(2, true).await.unwrap();
        let slices = backend.list_slices();
        assert!(slices[2].is_tx);
        assert!(!slices[0].is_tx && !slices[1].is_tx);
    }

    #[tokio::test]
    async fn tune_unknown_slice_errors() {
        let backend = DummyBackend::new(1);
        assert!(backend.tune_slice(9, 1_000).await.is_err());
    }
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! The radio backend capability set (§4.5, §9 "Polymorphism").
//!
//! `RadioBackend` is a pure trait: connect/disconnect/list/tune/mode/tx/
//! audio plus event emission. [`FlexBackend`] is the concrete SDR
//! implementation; [`DummyBackend`] is a scripted in-memory stand-in for
//! tests and `mode = "standard"` operation, mirroring the boxed-future
//! style this workspace already used for its single-rig CAT trait
//! instead of pulling in `async-trait`.

use std::future::Future;
use std::pin::Pin;

use trx_core::{DynResult, OperatingMode};

mod dummy;
mod flex;

pub use dummy::DummyBackend;
pub use flex::FlexBackend;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A single SDR slice as the backend reports it, before it is folded into
/// a `Channel` by the decoder supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceInfo {
    pub slice_index: u8,
    pub freq_hz: u64,
    pub mode: OperatingMode,
    pub is_tx: bool,
    pub audio_rx: u8,
}

/// Events the backend pushes asynchronously; delivered over an mpsc
/// channel rather than synchronous callbacks, since they cross an I/O
/// task boundary (unlike the state core's in-process listener list).
#[derive(Debug, Clone)]
pub enum BackendEvent {
    Connected,
    Disconnected,
    SliceAdded(SliceInfo),
    SliceRemoved { slice_index: u8 },
    SliceUpdated(SliceInfo),
    Error(String),
}

/// The abstract capability set every radio backend implements.
pub trait RadioBackend: Send + Sync {
    fn connect<'a>(&'a self, host: &'a str) -> BoxFuture<'a, DynResult<()>>;
    fn disconnect<'a>(&'a self) -> BoxFuture<'a, ()>;
    fn is_connected(&self) -> bool;
    fn list_slices(&self) -> Vec<SliceInfo>;
    fn tune_slice<'a>(&'a self, index: u8, freq_hz: u64) -> BoxFuture<'a, DynResult<()>>;
    fn set_slice_mode<'a>(&'a self, index: u8, mode: OperatingMode) -> BoxFuture<'a, DynResult<()>>;
    fn set_slice_tx<'a>(&'a self, index: u8, tx: bool) -> BoxFuture<'a, DynResult<()>>;
    fn set_slice_audio<'a>(&'a self, index: u8, audio_rx: u8) -> BoxFuture<'a, DynResult<()>>;
}

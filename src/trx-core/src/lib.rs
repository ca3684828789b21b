// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod channel;
pub mod decode;
pub mod enrich;
pub mod error;
pub mod logbook;
pub mod mode;
pub mod qso;
pub mod radio;
pub mod state;
pub mod station;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use channel::{Channel, ChannelStatus, DecoderInstance, NUM_CHANNELS};
pub use decode::{DecodeSnapshot, InternalDecodeRecord, PublicDecodeRecord};
pub use error::CoreError;
pub use logbook::Logbook;
pub use mode::OperatingMode;
pub use qso::{QsoAction, QsoContext, QsoEvent, QsoRecord, QsoState};
pub use state::{ChannelsSnapshot, RestartRequest, StateCore};

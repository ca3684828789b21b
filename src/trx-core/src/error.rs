// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Structured, caller-visible error cases for the channel state core.
//!
//! Faults that a task simply logs and moves past (malformed frame, backend
//! hiccup) are not represented here; they never leave the listener that
//! observed them. This enum is for cases a caller needs to branch on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("channel {0} is not connected")]
    ChannelNotConnected(u8),

    #[error("channel index {0} out of range (expected 0..4)")]
    ChannelOutOfRange(u8),

    #[error("decode {0} not found in the current snapshot")]
    DecodeNotFound(String),

    #[error("a QSO is already in progress on channel {0}")]
    QsoAlreadyActive(u8),

    #[error("no recent decode from {0} to answer")]
    NoRecentDecode(String),

    #[error("radio backend is not connected")]
    BackendDisconnected,

    #[error("failed to write logbook entry: {0}")]
    AdifWriteFailed(String),

    #[error("malformed ADIF record: {0}")]
    AdifParseFailed(String),
}

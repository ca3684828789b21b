// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Wire-format conversions for trx-rs: the decoder UDP protocol, the
//! HRD-style rig-control TCP framing, and the AI tool surface's JSON-RPC
//! envelope.

pub mod hrd;
pub mod jsonrpc;
pub mod mode;
pub mod udp;

pub use mode::{mode_to_string, parse_mode};

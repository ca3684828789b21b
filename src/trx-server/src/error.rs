// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Server-level error cases (§7 "Fatal" row): things that abort startup
//! before any listener binds. Everything else -- transient network,
//! protocol-parse, child-process, disk, user/tool errors -- is handled
//! locally per §7 and never surfaces here.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] trx_app::ConfigError),

    #[error("failed to bind {kind} listener on {addr}: {source}")]
    PortBind { kind: &'static str, addr: std::net::SocketAddr, #[source] source: std::io::Error },

    #[error("decoder executable not found at {0}")]
    DecoderPathMissing(PathBuf),

    #[error("invalid station continent {0:?}: expected one of eu/na/sa/af/as/oc/an")]
    InvalidContinent(String),
}

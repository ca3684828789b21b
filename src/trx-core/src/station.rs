// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use serde::{Deserialize, Serialize};

/// The seven ITU-ish continent codes used by CQ targeting (§4.10).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Continent {
    Eu,
    Na,
    Sa,
    Af,
    As,
    Oc,
    An,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationProfile {
    pub callsign: String,
    pub continent: Continent,
    pub dxcc_prefix: String,
    #[serde(default)]
    pub known_prefixes: Vec<String>,
}

impl StationProfile {
    pub fn new(callsign: impl Into<String>, continent: Continent, dxcc_prefix: impl Into<String>) -> Self {
        Self {
            callsign: callsign.into(),
            continent,
            dxcc_prefix: dxcc_prefix.into(),
            known_prefixes: Vec::new(),
        }
    }
}

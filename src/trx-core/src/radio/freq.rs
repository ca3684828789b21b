// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use serde::{Deserialize, Serialize};

/// Supported band range in Hz, carrying its conventional amateur-radio name
/// (the "fixed frequency-to-band table" §3 calls for) rather than a name
/// derived from wavelength -- the band name is a regulatory convention, not
/// a physical computation, and a few bands (e.g. 60m) don't land anywhere
/// near their name's literal wavelength.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Band {
    pub name: String,
    pub low_hz: u64,
    pub high_hz: u64,
    pub tx_allowed: bool,
}

/// Frequency wrapper (Hz).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Freq {
    pub hz: u64,
}

impl Freq {
    #[must_use]
    pub fn new(hz: u64) -> Self {
        Self { hz }
    }

    /// Return the band name for this frequency, if any, using the provided band list.
    pub fn band_name(&self, bands: &[Band]) -> Option<String> {
        band_for_freq(bands, self).map(|b| b.name.clone())
    }
}

/// Find the band that contains the given frequency (inclusive), if any.
pub fn band_for_freq<'a>(bands: &'a [Band], freq: &Freq) -> Option<&'a Band> {
    bands
        .iter()
        .find(|b| freq.hz >= b.low_hz && freq.hz <= b.high_hz)
}

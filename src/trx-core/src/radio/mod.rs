// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod bands;
pub mod freq;

pub use bands::default_bands;
pub use freq::{band_for_freq, Band, Freq};

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use super::freq::Band;

/// The amateur HF/VHF/UHF band plan used to derive a channel's band label
/// from its dial frequency. Names are the conventional amateur-radio band
/// names (§3's "fixed frequency-to-band table"), not a computed wavelength
/// label -- 60m in particular sits nowhere near 60 meters physically.
/// tx_allowed is left true throughout; licensing enforcement is out of
/// scope here.
pub fn default_bands() -> Vec<Band> {
    vec![
        Band {
            name: "160m".to_string(),
            low_hz: 1_800_000,
            high_hz: 2_000_000,
            tx_allowed: true,
        },
        Band {
            name: "80m".to_string(),
            low_hz: 3_500_000,
            high_hz: 4_000_000,
            tx_allowed: true,
        },
        Band {
            name: "60m".to_string(),
            low_hz: 5_330_500,
            high_hz: 5_403_500,
            tx_allowed: true,
        },
        Band {
            name: "40m".to_string(),
            low_hz: 7_000_000,
            high_hz: 7_300_000,
            tx_allowed: true,
        },
        Band {
            name: "30m".to_string(),
            low_hz: 10_100_000,
            high_hz: 10_150_000,
            tx_allowed: true,
        },
        Band {
            name: "20m".to_string(),
            low_hz: 14_000_000,
            high_hz: 14_350_000,
            tx_allowed: true,
        },
        Band {
            name: "17m".to_string(),
            low_hz: 18_068_000,
            high_hz: 18_168_000,
            tx_allowed: true,
        },
        Band {
            name: "15m".to_string(),
            low_hz: 21_000_000,
            high_hz: 21_450_000,
            tx_allowed: true,
        },
        Band {
            name: "12m".to_string(),
            low_hz: 24_890_000,
            high_hz: 24_990_000,
            tx_allowed: true,
        },
        Band {
            name: "10m".to_string(),
            low_hz: 28_000_000,
            high_hz: 29_700_000,
            tx_allowed: true,
        },
        Band {
            name: "6m".to_string(),
            low_hz: 50_000_000,
            high_hz: 54_000_000,
            tx_allowed: true,
        },
        Band {
            name: "2m".to_string(),
            low_hz: 144_000_000,
            high_hz: 148_000_000,
            tx_allowed: true,
        },
        Band {
            name: "70cm".to_string(),
            low_hz: 420_000_000,
            high_hz: 450_000_000,
            tx_allowed: true,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::freq::{band_for_freq, Freq};

    #[test]
    fn twenty_meters_resolves() {
        let bands = default_bands();
        let band = band_for_freq(&bands, &Freq::new(14_074_000)).expect("band");
        assert_eq!(band.low_hz, 14_000_000);
        assert_eq!(band.name, "20m");
    }

    #[test]
    fn band_names_are_conventional_not_wavelength_derived() {
        let bands = default_bands();
        assert_eq!(Freq::new(14_074_000).band_name(&bands).as_deref(), Some("20m"));
        assert_eq!(Freq::new(7_074_000).band_name(&bands).as_deref(), Some("40m"));
        assert_eq!(Freq::new(21_074_000).band_name(&bands).as_deref(), Some("15m"));
    }

    #[test]
    fn out_of_band_is_none() {
        let bands = default_bands();
        assert!(band_for_freq(&bands, &Freq::new(1_000)).is_none());
    }
}

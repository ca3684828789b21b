// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Rig-mode string conversions used by the HRD command grammar (§4.4).

use trx_core::OperatingMode;

/// Parse an HRD `get mode` / `set dropdown Mode <MODE>` token into an
/// [`OperatingMode`]. Unknown tokens round-trip through `Other`.
pub fn parse_mode(s: &str) -> OperatingMode {
    match s.to_ascii_uppercase().as_str() {
        "USB" => OperatingMode::Usb,
        "LSB" => OperatingMode::Lsb,
        "CW" => OperatingMode::Cw,
        "DIGU" => OperatingMode::DigU,
        "DIGL" => OperatingMode::DigL,
        "FM" => OperatingMode::Fm,
        "AM" => OperatingMode::Am,
        other => OperatingMode::Other(other.to_string()),
    }
}

pub fn mode_to_string(mode: &OperatingMode) -> String {
    mode.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_modes() {
        for (s, m) in [
            ("USB", OperatingMode::Usb),
            ("LSB", OperatingMode::Lsb),
            ("CW", OperatingMode::Cw),
            ("DIGU", OperatingMode::DigU),
            ("DIGL", OperatingMode::DigL),
            ("FM", OperatingMode::Fm),
            ("AM", OperatingMode::Am),
        ] {
            assert_eq!(parse_mode(s), m);
            assert_eq!(mode_to_string(&parse_mode(s)), s);
        }
    }

    #[test]
    fn unknown_mode_round_trips_via_other() {
        let parsed = parse_mode("rtty");
        assert_eq!(parsed, OperatingMode::Other("RTTY".to_string()));
        assert_eq!(mode_to_string(&parsed), "RTTY");
    }
}

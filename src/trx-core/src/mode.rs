// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Operating mode as exposed over the rig-control surface.
//!
//! The HRD-style command grammar (see `trx-protocol::hrd`) only ever needs
//! these seven values; a decoder's own digital submode (FT8, FT4, ...) is
//! tracked separately on `Channel::digital_mode`.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum OperatingMode {
    Usb,
    Lsb,
    Cw,
    DigU,
    DigL,
    Fm,
    Am,
    Other(String),
}

impl Default for OperatingMode {
    fn default() -> Self {
        Self::Usb
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Usb => "USB",
            Self::Lsb => "LSB",
            Self::Cw => "CW",
            Self::DigU => "DIGU",
            Self::DigL => "DIGL",
            Self::Fm => "FM",
            Self::Am => "AM",
            Self::Other(s) => s.as_str(),
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_usb() {
        assert_eq!(OperatingMode::default(), OperatingMode::Usb);
    }

    #[test]
    fn display_matches_hrd_tokens() {
        assert_eq!(OperatingMode::DigU.to_string(), "DIGU");
        assert_eq!(OperatingMode::DigL.to_string(), "DIGL");
        assert_eq!(OperatingMode::Other("RTTY".into()).to_string(), "RTTY");
    }
}

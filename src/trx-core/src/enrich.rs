// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Decode enrichment: callsign/grid extraction and CQ targeting rules.
//!
//! All of this runs server-side; clients are never allowed to recompute
//! `is_directed_cq_to_me` themselves, so the evaluation table here is the
//! single source of truth.

use std::sync::OnceLock;

use regex::Regex;

use crate::station::{Continent, StationProfile};

fn callsign_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z0-9]{1,3}[0-9][A-Z]{1,4}(/[A-Z0-9]+)?$").unwrap())
}

fn grid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-R]{2}[0-9]{2}([A-Xa-x]{2})?$").unwrap())
}

pub fn is_valid_callsign(token: &str) -> bool {
    callsign_re().is_match(token)
}

pub fn is_valid_grid(token: &str) -> bool {
    grid_re().is_match(token)
}

const REGION_TOKENS: &[&str] = &[
    "DX", "NA", "SA", "EU", "AS", "AF", "OC", "JA", "ASIA", "EUROPE", "AFRICA",
];

/// The parsed shape of one decoded message line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDecode {
    pub is_cq: bool,
    pub call: Option<String>,
    pub grid: Option<String>,
    pub cq_target_token: Option<String>,
}

/// Parse a raw decoded message (already uppercased by convention) per §4.10.
pub fn parse_decode_text(raw: &str) -> ParsedDecode {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    if tokens.is_empty() {
        return ParsedDecode::default();
    }

    if tokens[0].eq_ignore_ascii_case("CQ") {
        // The CQ-target token (§4.10 "CQ target token extraction") is drawn
        // from a fixed keyword list and is independent of callsign parsing.
        let cq_target_token = tokens
            .get(1)
            .map(|t| t.to_ascii_uppercase())
            .filter(|t| REGION_TOKENS.contains(&t.as_str()));

        // Callsign parsing: the second token if valid, otherwise the third
        // (skipping an optional region token of <=3 chars, which need not
        // be one of the fixed CQ-target keywords -- e.g. "CQ VK W1ABC").
        let (call, call_index) = match tokens.get(1).filter(|t| is_valid_callsign(t)) {
            Some(t) => (Some(t.to_string()), 1),
            None => match tokens.get(2).filter(|t| is_valid_callsign(t)) {
                Some(t) => (Some(t.to_string()), 2),
                None => (None, 1),
            },
        };

        let grid = tokens
            .iter()
            .skip(call_index + 1)
            .find(|t| is_valid_grid(t))
            .map(|t| t.to_string());

        return ParsedDecode {
            is_cq: true,
            call,
            grid,
            cq_target_token,
        };
    }

    let call = tokens
        .iter()
        .take(2)
        .find(|t| is_valid_callsign(t))
        .map(|t| t.to_string());
    let grid = tokens.iter().find(|t| is_valid_grid(t)).map(|t| t.to_string());

    ParsedDecode {
        is_cq: false,
        call,
        grid,
        cq_target_token: None,
    }
}

/// Authoritative "is this CQ directed at me" evaluation (§4.10 table).
pub fn is_directed_cq_to_me(cq_target_token: Option<&str>, station: &StationProfile) -> bool {
    let Some(token) = cq_target_token else {
        return true;
    };
    match token {
        "DX" => true,
        "NA" => station.continent == Continent::Na,
        "SA" => station.continent == Continent::Sa,
        "EU" | "EUROPE" => station.continent == Continent::Eu,
        "AS" | "ASIA" => station.continent == Continent::As,
        "AF" | "AFRICA" => station.continent == Continent::Af,
        "OC" => station.continent == Continent::Oc,
        "JA" => {
            let p = station.dxcc_prefix.to_ascii_uppercase();
            p.starts_with("JA") || p.starts_with("JR") || p.starts_with("7J")
        }
        _ => false,
    }
}

/// True when the decoded tokens open with my callsign, i.e. the message is
/// directed to me specifically (not a general CQ).
pub fn is_my_call(raw: &str, my_call: &str) -> bool {
    let tokens: Vec<String> = raw
        .split_whitespace()
        .map(|t| t.to_ascii_uppercase())
        .collect();
    let my_call = my_call.to_ascii_uppercase();
    tokens.get(0) == Some(&my_call) || tokens.get(1) == Some(&my_call)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(continent: Continent, dxcc: &str) -> StationProfile {
        StationProfile::new("K1XYZ", continent, dxcc)
    }

    #[test]
    fn plain_cq_has_no_target() {
        let p = parse_decode_text("CQ DL9XYZ JO31");
        assert!(p.is_cq);
        assert_eq!(p.call.as_deref(), Some("DL9XYZ"));
        assert_eq!(p.grid.as_deref(), Some("JO31"));
        assert_eq!(p.cq_target_token, None);
        assert!(is_directed_cq_to_me(p.cq_target_token.as_deref(), &station(Continent::Sa, "HB9")));
    }

    #[test]
    fn na_targeted_cq_respects_continent() {
        let p = parse_decode_text("CQ NA W1ABC FN42");
        assert_eq!(p.cq_target_token.as_deref(), Some("NA"));
        assert!(!is_directed_cq_to_me(p.cq_target_token.as_deref(), &station(Continent::Eu, "HB9")));
        assert!(is_directed_cq_to_me(p.cq_target_token.as_deref(), &station(Continent::Na, "W")));
    }

    #[test]
    fn ja_targeted_cq_checks_dxcc_prefix() {
        let p = parse_decode_text("CQ JA JA1XYZ PM95");
        assert_eq!(p.cq_target_token.as_deref(), Some("JA"));
        assert!(!is_directed_cq_to_me(p.cq_target_token.as_deref(), &station(Continent::As, "HB9")));
        assert!(is_directed_cq_to_me(p.cq_target_token.as_deref(), &station(Continent::As, "JR6")));
    }

    #[test]
    fn directed_reply_parses_both_calls() {
        let p = parse_decode_text("K1XYZ DL9XYZ +03");
        assert!(!p.is_cq);
        assert_eq!(p.call.as_deref(), Some("K1XYZ"));
    }

    #[test]
    fn callsign_pattern_rejects_bare_words() {
        assert!(!is_valid_callsign("RR73"));
        assert!(is_valid_callsign("W1ABC"));
        assert!(is_valid_callsign("VK2/W1ABC"));
    }

    #[test]
    fn is_my_call_checks_first_two_tokens() {
        assert!(is_my_call("K1XYZ DL9XYZ +03", "k1xyz"));
        assert!(!is_my_call("CQ DL9XYZ JO31", "K1XYZ"));
    }
}

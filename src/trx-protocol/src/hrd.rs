// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! HRD-style rig-control TCP wire framing and command grammar (§4.4).
//!
//! Each message is a fixed 16-byte header (total size, two magic words,
//! a checksum) followed by a UTF-16LE, null-terminated payload string.
//! §9's open question on the checksum algorithm is resolved by computing
//! a real XOR-sum on send and tolerating any value on receive -- this
//! workspace errs on the side of accepting whatever third-party loggers
//! send rather than rejecting frames over a field nobody agrees on.

pub const MAGIC_1: u32 = 0x1234_ABCD;
pub const MAGIC_2: u32 = 0xABCD_1234;
const HEADER_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame shorter than the 16-byte header")]
    Truncated,
    #[error("declared size {declared} is smaller than the header")]
    SizeTooSmall { declared: u32 },
    #[error("incomplete frame: need {need} bytes, have {have}")]
    Incomplete { need: usize, have: usize },
    #[error("payload has an odd number of bytes, not valid UTF-16LE")]
    OddPayload,
}

pub fn xor_checksum(payload: &[u8]) -> u32 {
    payload.iter().fold(0u32, |acc, &b| acc ^ (b as u32))
}

/// Encode one HRD message: header + UTF-16LE payload + a null terminator.
pub fn encode_frame(text: &str) -> Vec<u8> {
    let mut payload: Vec<u8> = text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
    payload.extend_from_slice(&[0, 0]); // null terminator (one UTF-16 code unit)

    let total_size = (HEADER_LEN + payload.len()) as u32;
    let checksum = xor_checksum(&payload);

    let mut out = Vec::with_capacity(total_size as usize);
    out.extend_from_slice(&total_size.to_le_bytes());
    out.extend_from_slice(&MAGIC_1.to_le_bytes());
    out.extend_from_slice(&MAGIC_2.to_le_bytes());
    out.extend_from_slice(&checksum.to_le_bytes());
    out.extend_from_slice(&payload);
    out
}

/// Parse the declared total size out of a header prefix, so the caller
/// (a length-delimited TCP reader) knows how many more bytes to buffer.
pub fn peek_frame_len(header: &[u8]) -> Result<usize, FrameError> {
    if header.len() < 4 {
        return Err(FrameError::Truncated);
    }
    let declared = u32::from_le_bytes(header[0..4].try_into().unwrap());
    if (declared as usize) < HEADER_LEN {
        return Err(FrameError::SizeTooSmall { declared });
    }
    Ok(declared as usize)
}

/// Decode a complete frame (header + payload) into its UTF-16LE payload
/// string, stopping at the first null code unit. The magic words and
/// checksum are not validated against the declared values -- only their
/// presence is required -- to tolerate the variety of third-party logger
/// implementations this surface talks to.
pub fn decode_frame(frame: &[u8]) -> Result<String, FrameError> {
    if frame.len() < HEADER_LEN {
        return Err(FrameError::Truncated);
    }
    let declared = peek_frame_len(frame)?;
    if frame.len() < declared {
        return Err(FrameError::Incomplete { need: declared, have: frame.len() });
    }
    let payload = &frame[HEADER_LEN..declared];
    if payload.len() % 2 != 0 {
        return Err(FrameError::OddPayload);
    }
    let units: Vec<u16> = payload
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    Ok(String::from_utf16_lossy(&units))
}

/// `RPRT` status codes (§4.4).
pub mod rprt {
    pub const OK: i32 = 0;
    pub const UNRECOGNIZED: i32 = -1;
    pub const BACKEND_UNAVAILABLE: i32 = -9;
}

pub fn rprt_line(code: i32) -> String {
    format!("RPRT {code}")
}

/// Wrap one or more logical lines the way unsolicited updates and command
/// responses are sent: CRLF-terminated, then framed.
pub fn encode_lines(lines: &[&str]) -> Vec<u8> {
    let mut text = String::new();
    for line in lines {
        text.push_str(line);
        text.push_str("\r\n");
    }
    encode_frame(&text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonKind {
    Tx,
    Ptt,
}

/// A parsed HRD command-grammar line (§4.4). Unrecognized input is
/// preserved verbatim so the caller can reply `RPRT -1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    GetFrequency,
    SetFrequencyHz(u64),
    GetMode,
    SetMode { mode: String },
    GetButtonSelect(ButtonKind),
    SetButtonSelect { kind: ButtonKind, on: bool },
    GetRadio,
    GetRadios,
    GetContext,
    GetContexts,
    Unknown(String),
}

/// Strip an optional leading `"[N] "` radio selector.
fn strip_selector(line: &str) -> &str {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix('[') {
        if let Some(close) = rest.find(']') {
            return rest[close + 1..].trim_start();
        }
    }
    trimmed
}

fn strip_braces(token: &str) -> &str {
    token.trim_start_matches('{').trim_end_matches('}')
}

pub fn parse_command(line: &str) -> Command {
    let line = strip_selector(line);
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let lower: Vec<String> = tokens.iter().map(|t| t.to_ascii_lowercase()).collect();
    let lower_refs: Vec<&str> = lower.iter().map(String::as_str).collect();

    match lower_refs.as_slice() {
        ["get", "frequency"] | ["get", "frequency-hz"] => Command::GetFrequency,
        ["set", "frequency-hz", hz] => match hz.parse() {
            Ok(hz) => Command::SetFrequencyHz(hz),
            Err(_) => Command::Unknown(line.to_string()),
        },
        ["get", "mode"] => Command::GetMode,
        ["set", "dropdown", "mode", ..] if tokens.len() >= 4 => {
            Command::SetMode { mode: tokens[3].to_string() }
        }
        ["get", "button-select", sel] => match strip_braces(sel).to_ascii_uppercase().as_str() {
            "TX" => Command::GetButtonSelect(ButtonKind::Tx),
            "PTT" => Command::GetButtonSelect(ButtonKind::Ptt),
            _ => Command::Unknown(line.to_string()),
        },
        ["set", "button-select", sel, value] => {
            let kind = match strip_braces(sel).to_ascii_uppercase().as_str() {
                "TX" => ButtonKind::Tx,
                "PTT" => ButtonKind::Ptt,
                _ => return Command::Unknown(line.to_string()),
            };
            match *value {
                "0" => Command::SetButtonSelect { kind, on: false },
                "1" => Command::SetButtonSelect { kind, on: true },
                _ => Command::Unknown(line.to_string()),
            }
        }
        ["get", "radio"] => Command::GetRadio,
        ["get", "radios"] => Command::GetRadios,
        ["get", "context"] => Command::GetContext,
        ["get", "contexts"] => Command::GetContexts,
        _ => Command::Unknown(line.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips_ascii_text() {
        let encoded = encode_frame("frequency 14074000\r\n");
        let decoded = decode_frame(&encoded).unwrap();
        assert_eq!(decoded, "frequency 14074000\r\n");
    }

    #[test]
    fn frame_header_carries_both_magics() {
        let encoded = encode_frame("hi");
        assert_eq!(&encoded[4..8], &MAGIC_1.to_le_bytes());
        assert_eq!(&encoded[8..12], &MAGIC_2.to_le_bytes());
    }

    #[test]
    fn peek_len_matches_full_encoded_length() {
        let encoded = encode_frame("get frequency");
        let declared = peek_frame_len(&encoded[0..4]).unwrap();
        assert_eq!(declared, encoded.len());
    }

    #[test]
    fn strips_radio_selector_prefix() {
        assert_eq!(parse_command("[1] get frequency"), Command::GetFrequency);
    }

    #[test]
    fn parses_set_frequency() {
        assert_eq!(parse_command("SET frequency-hz 14074000"), Command::SetFrequencyHz(14_074_000));
    }

    #[test]
    fn parses_button_select_with_braces() {
        assert_eq!(parse_command("get button-select {TX}"), Command::GetButtonSelect(ButtonKind::Tx));
        assert_eq!(
            parse_command("set button-select {PTT} 1"),
            Command::SetButtonSelect { kind: ButtonKind::Ptt, on: true }
        );
    }

    #[test]
    fn parses_dropdown_mode() {
        assert_eq!(parse_command("set dropdown Mode DIGU 0"), Command::SetMode { mode: "DIGU".to_string() });
    }

    #[test]
    fn unknown_command_is_preserved() {
        assert_eq!(parse_command("frobnicate"), Command::Unknown("frobnicate".to_string()));
    }
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Per-channel autonomous QSO state machine (§4.7).
//!
//! Modeled the way the rig lifecycle machine this workspace used to carry
//! is modeled: a tagged enum holding only the data relevant to its state,
//! and a driver that pattern-matches `(state, event)` tuples into the next
//! state. The machine never performs I/O itself -- `process_event` returns
//! the action the caller should take (arm a timer, send a frame) and the
//! caller's task executes it.

use serde::Serialize;

pub const REPLY_TIMEOUT_SECS: u64 = 15;
pub const MAX_RETRIES: u8 = 3;

/// A logged contact, independent of how it is persisted (ADIF lives in
/// `trx-server`; this is the pure data shape).
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct QsoRecord {
    pub time_on: String,
    pub time_off: String,
    pub call: String,
    pub grid: Option<String>,
    pub band: String,
    pub dial_hz: u64,
    pub mode: String,
    pub report_sent: Option<String>,
    pub report_received: Option<String>,
    pub tx_power_watts: Option<u32>,
    pub letter: char,
    pub channel_index: u8,
    pub instance_name: String,
    pub notes: Option<String>,
}

/// The `(call, band, mode)` worked-index key, normalized per §4.8.
pub fn worked_key(call: &str, band: &str, mode: &str) -> String {
    format!(
        "{}:{}:{}",
        call.to_ascii_uppercase(),
        band.to_ascii_lowercase(),
        mode.to_ascii_uppercase()
    )
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", content = "data")]
pub enum QsoState {
    Idle,
    CallingCq(QsoContext),
    WaitingReply { ctx: QsoContext, retries: u8 },
    SendingReport { ctx: QsoContext, report: String },
    WaitingReport { ctx: QsoContext, retries: u8 },
    SendingRr73(QsoContext),
    Waiting73 { ctx: QsoContext, retries: u8 },
    Complete { ctx: QsoContext },
    Failed { ctx: QsoContext, reason: String },
}

impl Default for QsoState {
    fn default() -> Self {
        Self::Idle
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QsoContext {
    pub target_call: String,
    pub my_call: String,
    pub my_grid: String,
}

#[derive(Debug, Clone)]
pub enum QsoEvent {
    /// Begin a contact; `decode_raw` is the text of the decode being answered.
    Start { target_call: String, my_call: String, my_grid: String },
    /// A new decode was routed to this channel while a QSO is in progress.
    DecodeMessage { raw: String, snr_db: i32 },
    /// The single-shot per-state timer expired.
    Timeout,
}

/// What the driver should do in response to a transition. `None` means no
/// outbound frame is needed for this step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QsoAction {
    None,
    SendReply { message: String, report_modifier: bool },
}

/// Format a signal report the way WSJT-X free-text replies carry it:
/// two-digit zero-padded, explicitly signed.
pub fn format_report(snr_db: i32) -> String {
    format!("{}{:02}", if snr_db < 0 { "-" } else { "+" }, snr_db.abs())
}

impl QsoState {
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle | Self::Complete { .. } | Self::Failed { .. })
    }

    pub fn context(&self) -> Option<&QsoContext> {
        match self {
            Self::Idle => None,
            Self::CallingCq(ctx) | Self::SendingRr73(ctx) => Some(ctx),
            Self::WaitingReply { ctx, .. }
            | Self::SendingReport { ctx, .. }
            | Self::WaitingReport { ctx, .. }
            | Self::Waiting73 { ctx, .. }
            | Self::Complete { ctx }
            | Self::Failed { ctx, .. } => Some(ctx),
        }
    }
}

/// Advance the machine. Returns `(next_state, action)`; `next_state` is the
/// same value as before when the event did not apply to the current state.
///
/// `SendingReport`/`SendingRr73` are transient: they exist only to carry the
/// outbound message for one step and are drained to their corresponding
/// `Waiting*` state before this function returns, so a caller never
/// observes them as `state` on a later call. Without this, the next real
/// decode (the peer's ack) would be handed to `step` with `state` still
/// `SendingReport`/`SendingRr73`, match the unconditional transient arm, and
/// be silently discarded instead of advancing `WaitingReport`/`Waiting73`.
pub fn process_event(state: &QsoState, event: QsoEvent) -> (QsoState, QsoAction) {
    let (next, action) = step(state, event);
    (drain_transient(next), action)
}

fn drain_transient(mut state: QsoState) -> QsoState {
    loop {
        state = match state {
            QsoState::SendingReport { ctx, .. } => QsoState::WaitingReport { ctx, retries: 0 },
            QsoState::SendingRr73(ctx) => QsoState::Waiting73 { ctx, retries: 0 },
            other => return other,
        };
    }
}

fn step(state: &QsoState, event: QsoEvent) -> (QsoState, QsoAction) {
    match (state, event) {
        (QsoState::Idle, QsoEvent::Start { target_call, my_call, my_grid }) => {
            let ctx = QsoContext { target_call: target_call.clone(), my_call, my_grid };
            let next = QsoState::WaitingReply { ctx, retries: 0 };
            (
                next,
                QsoAction::SendReply {
                    message: target_call,
                    report_modifier: true,
                },
            )
        }

        (QsoState::WaitingReply { ctx, retries }, QsoEvent::DecodeMessage { raw, snr_db }) => {
            let prefix = format!("{} {}", ctx.my_call, ctx.target_call);
            if raw.to_ascii_uppercase().starts_with(&prefix.to_ascii_uppercase()) {
                let report = format_report(snr_db);
                let next = QsoState::SendingReport { ctx: ctx.clone(), report: report.clone() };
                let msg = format!("{} {} {}", ctx.target_call, ctx.my_call, report);
                (next, QsoAction::SendReply { message: msg, report_modifier: false })
            } else {
                (QsoState::WaitingReply { ctx: ctx.clone(), retries: *retries }, QsoAction::None)
            }
        }
        (QsoState::WaitingReply { ctx, retries }, QsoEvent::Timeout) => {
            if *retries >= MAX_RETRIES {
                (
                    QsoState::Failed { ctx: ctx.clone(), reason: "no reply".into() },
                    QsoAction::None,
                )
            } else {
                let next_retries = retries + 1;
                let msg = ctx.target_call.clone();
                (
                    QsoState::WaitingReply { ctx: ctx.clone(), retries: next_retries },
                    QsoAction::SendReply { message: msg, report_modifier: true },
                )
            }
        }

        (QsoState::WaitingReport { ctx, retries }, QsoEvent::DecodeMessage { raw, .. }) => {
            let upper = raw.to_ascii_uppercase();
            let has_both = upper.contains(&ctx.my_call.to_ascii_uppercase())
                && upper.contains(&ctx.target_call.to_ascii_uppercase());
            let has_report_ack = upper.split_whitespace().any(|t| {
                t.starts_with('R') || t.starts_with('+') || t.starts_with('-')
            });
            if has_both && has_report_ack {
                let next = QsoState::SendingRr73(ctx.clone());
                let msg = format!("{} {} RR73", ctx.target_call, ctx.my_call);
                (next, QsoAction::SendReply { message: msg, report_modifier: false })
            } else {
                (QsoState::WaitingReport { ctx: ctx.clone(), retries: *retries }, QsoAction::None)
            }
        }
        (QsoState::WaitingReport { ctx, retries }, QsoEvent::Timeout) => {
            if *retries >= MAX_RETRIES {
                (QsoState::Failed { ctx: ctx.clone(), reason: "no report ack".into() }, QsoAction::None)
            } else {
                (QsoState::WaitingReport { ctx: ctx.clone(), retries: retries + 1 }, QsoAction::None)
            }
        }

        (QsoState::Waiting73 { ctx, .. }, QsoEvent::DecodeMessage { raw, .. }) => {
            let upper = raw.to_ascii_uppercase();
            let has_both = upper.contains(&ctx.my_call.to_ascii_uppercase())
                && upper.contains(&ctx.target_call.to_ascii_uppercase());
            if has_both && upper.contains("73") {
                (QsoState::Complete { ctx: ctx.clone() }, QsoAction::None)
            } else {
                (state.clone(), QsoAction::None)
            }
        }
        (QsoState::Waiting73 { ctx, retries }, QsoEvent::Timeout) => {
            if *retries >= MAX_RETRIES {
                (QsoState::Failed { ctx: ctx.clone(), reason: "no 73".into() }, QsoAction::None)
            } else {
                (QsoState::Waiting73 { ctx: ctx.clone(), retries: retries + 1 }, QsoAction::None)
            }
        }

        // No-op for any other (state, event) combination: idle decode noise,
        // events arriving after completion/failure, etc.
        _ => (state.clone(), QsoAction::None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_arms_waiting_reply_and_sends_reply() {
        let (state, action) = process_event(
            &QsoState::Idle,
            QsoEvent::Start {
                target_call: "EA4IFI".into(),
                my_call: "K1XYZ".into(),
                my_grid: "FN42".into(),
            },
        );
        assert!(matches!(state, QsoState::WaitingReply { retries: 0, .. }));
        assert_eq!(
            action,
            QsoAction::SendReply { message: "EA4IFI".into(), report_modifier: true }
        );
    }

    #[test]
    fn waiting_reply_retries_up_to_the_bound_then_fails() {
        let ctx = QsoContext { target_call: "EA4IFI".into(), my_call: "K1XYZ".into(), my_grid: "FN42".into() };
        let mut state = QsoState::WaitingReply { ctx: ctx.clone(), retries: 0 };
        for expected_retry in 1..=MAX_RETRIES {
            let (next, action) = process_event(&state, QsoEvent::Timeout);
            assert!(matches!(&next, QsoState::WaitingReply { retries, .. } if *retries == expected_retry));
            assert_eq!(action, QsoAction::SendReply { message: ctx.target_call.clone(), report_modifier: true });
            state = next;
        }
        let (next, _) = process_event(&state, QsoEvent::Timeout);
        assert!(matches!(next, QsoState::Failed { .. }));
        state = next;
        assert!(!state.is_active());
    }

    #[test]
    fn full_happy_path_reaches_complete() {
        // `SendingReport`/`SendingRr73` are transient and drained inside
        // `process_event` itself, so the peer's very next real decode (the
        // report ack, then the 73) is matched directly against
        // `WaitingReport`/`Waiting73` -- no filler tick needed in between.
        let ctx = QsoContext { target_call: "EA4IFI".into(), my_call: "K1XYZ".into(), my_grid: "FN42".into() };
        let (s, _) = process_event(&QsoState::Idle, QsoEvent::Start {
            target_call: ctx.target_call.clone(), my_call: ctx.my_call.clone(), my_grid: ctx.my_grid.clone(),
        });
        let (s, action) = process_event(&s, QsoEvent::DecodeMessage { raw: "K1XYZ EA4IFI -05".into(), snr_db: -5 });
        assert_eq!(action, QsoAction::SendReply { message: "EA4IFI K1XYZ -05".into(), report_modifier: false });
        assert!(matches!(s, QsoState::WaitingReport { .. }));
        let (s, action) = process_event(&s, QsoEvent::DecodeMessage { raw: "K1XYZ EA4IFI R-05".into(), snr_db: 0 });
        assert_eq!(action, QsoAction::SendReply { message: "EA4IFI K1XYZ RR73".into(), report_modifier: false });
        assert!(matches!(s, QsoState::Waiting73 { .. }));
        let (s, _) = process_event(&s, QsoEvent::DecodeMessage { raw: "EA4IFI K1XYZ 73".into(), snr_db: 0 });
        assert!(matches!(s, QsoState::Complete { .. }));
        assert!(!s.is_active());
    }

    #[test]
    fn report_ack_immediately_following_the_report_is_not_swallowed() {
        // Regression test for the transient-state bug: previously the state
        // returned to the caller after the report was sent was still
        // `SendingReport`, so the peer's ack on the very next decode matched
        // an unconditional transient arm and was discarded, stalling the
        // machine in `WaitingReport` until it timed out.
        let ctx = QsoContext { target_call: "EA4IFI".into(), my_call: "K1XYZ".into(), my_grid: "FN42".into() };
        let (s, _) = process_event(&QsoState::WaitingReply { ctx: ctx.clone(), retries: 0 }, QsoEvent::DecodeMessage {
            raw: "K1XYZ EA4IFI -05".into(),
            snr_db: -5,
        });
        let (s, action) = process_event(&s, QsoEvent::DecodeMessage { raw: "K1XYZ EA4IFI R-05".into(), snr_db: 0 });
        assert!(matches!(s, QsoState::Waiting73 { .. }), "expected ack to advance past WaitingReport, got {s:?}");
        assert_eq!(action, QsoAction::SendReply { message: "EA4IFI K1XYZ RR73".into(), report_modifier: false });
    }

    #[test]
    fn report_format_is_two_digit_signed() {
        assert_eq!(format_report(-5), "-05");
        assert_eq!(format_report(3), "+03");
        assert_eq!(format_report(-17), "-17");
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log record formatting for the per-request stream:
//! `LEVEL    TIMESTAMP [source] message`, ANSI-free.

use std::sync::OnceLock;

use regex::Regex;

#[allow(clippy::unwrap_used)] // literal pattern
fn ansi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1B\[[0-?]*[ -/]*[@-~]").unwrap())
}

#[allow(clippy::unwrap_used)] // literal pattern
fn agent_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[Agent\]|📍 Step|🦾 \[ACTION|📄 Result").unwrap())
}

/// Strip ANSI escapes and trailing carriage returns (emojis survive).
pub fn strip_ansi(s: &str) -> String {
    ansi_re().replace_all(s, "").trim_end_matches('\r').to_owned()
}

/// Whether a stdout line is an agent event worth teeing into the stream.
pub fn is_agent_line(s: &str) -> bool {
    agent_line_re().is_match(s)
}

/// One stream record: `LEVEL    TIMESTAMP [source] message`.
pub fn format_record(level: &str, source: &str, message: &str) -> String {
    format!("{level:<8} {} [{source}] {message}", timestamp_now())
}

/// Current UTC time as `YYYY-MM-DD HH:MM:SS`.
pub fn timestamp_now() -> String {
    let secs = epoch_secs();
    let (y, m, d) = civil_date(secs / 86400);
    let time = secs % 86400;
    format!(
        "{y:04}-{m:02}-{d:02} {:02}:{:02}:{:02}",
        time / 3600,
        (time % 3600) / 60,
        time % 60
    )
}

pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Civil calendar from days since epoch (Howard Hinnant's algorithm).
fn civil_date(days: u64) -> (i64, u64, u64) {
    let z = days as i64 + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

#[cfg(test)]
#[path = "logfmt_tests.rs"]
mod tests;

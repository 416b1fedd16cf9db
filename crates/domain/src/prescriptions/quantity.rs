//! Dispensing quantity derived from the written frequency and duration.

use std::sync::LazyLock;

use regex::Regex;

/// Doses per day assumed when the frequency phrasing is not recognised.
pub const DEFAULT_DOSES_PER_DAY: u32 = 2;

/// Course length assumed when the duration carries no day count.
pub const DEFAULT_DAYS: u32 = 7;

const FREQUENCY_TABLE: &[(&str, u32)] = &[
    ("once daily", 1),
    ("once a day", 1),
    ("daily", 1),
    ("od", 1),
    ("qd", 1),
    ("1+0+0", 1),
    ("0+1+0", 1),
    ("0+0+1", 1),
    ("twice daily", 2),
    ("twice a day", 2),
    ("bd", 2),
    ("bid", 2),
    ("1+0+1", 2),
    ("1+1+0", 2),
    ("0+1+1", 2),
    ("three times daily", 3),
    ("three times a day", 3),
    ("thrice daily", 3),
    ("tds", 3),
    ("tid", 3),
    ("1+1+1", 3),
    ("four times daily", 4),
    ("four times a day", 4),
    ("qid", 4),
    ("1+1+1+1", 4),
];

static DAY_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*days?\b").unwrap());

pub fn doses_per_day(frequency: &str) -> u32 {
    let normalized = frequency.trim().to_lowercase();
    FREQUENCY_TABLE
        .iter()
        .find(|(phrase, _)| *phrase == normalized)
        .map(|(_, doses)| *doses)
        .unwrap_or(DEFAULT_DOSES_PER_DAY)
}

pub fn days(duration: &str) -> u32 {
    DAY_COUNT
        .captures(duration)
        // Digits only, so a parse failure is an overflow
        .map(|caps| caps[1].parse().unwrap_or(u32::MAX))
        .unwrap_or(DEFAULT_DAYS)
}

/// Units to dispense for a course: `max(1, doses/day × days)`.
pub fn derive_quantity(frequency: &str, duration: &str) -> u32 {
    doses_per_day(frequency).saturating_mul(days(duration)).max(1)
}

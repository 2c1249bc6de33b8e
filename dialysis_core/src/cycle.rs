//! Recurrence descriptor parsing and date matching.
//!
//! Free-text cadences ("MWF", "Every 3 days", "Alternate days") are parsed
//! once into a closed [`CyclePattern`]. Matching is a pure function of the
//! pattern, the anchor date and the candidate date.
//!
//! Descriptors outside the supported set parse to [`CyclePattern::Unknown`],
//! which matches nothing.

use chrono::{Datelike, NaiveDate, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// "every 3 days", "once every 4 days", "q3d", "q 3 days"
static EVERY_N_DAYS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:once\s+)?(?:every|q)\s*(\d+)\s*(?:days?|d)$").expect("valid regex")
});

const ALL_DAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// A set of weekdays stored as a bitmask (bit 0 = Monday)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Weekdays(u8);

impl Weekdays {
    pub fn from_days(days: &[Weekday]) -> Self {
        let mut set = Weekdays::default();
        for day in days {
            set.insert(*day);
        }
        set
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << day.num_days_from_monday();
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Days in the set, Monday first
    pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
        ALL_DAYS.iter().copied().filter(move |d| self.contains(*d))
    }
}

/// Supported treatment cadences
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CyclePattern {
    Daily,
    WeekdaySet(Weekdays),
    AlternateDays,
    EveryNDays(u32),
    SameWeekday,
    /// Unrecognized descriptor, kept verbatim for error messages
    Unknown(String),
}

impl CyclePattern {
    /// Parse a free-text recurrence descriptor
    pub fn parse(descriptor: &str) -> CyclePattern {
        let normalized = descriptor
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        match normalized.as_str() {
            "daily" | "everyday" | "every day" | "each day" => return CyclePattern::Daily,
            "alternate" | "alternate day" | "alternate days" | "alternate-day"
            | "alternate-days" | "every other day" | "every alternate day" => {
                return CyclePattern::AlternateDays
            }
            "weekly" | "once a week" | "once weekly" | "every week" | "same day"
            | "same day weekly" => return CyclePattern::SameWeekday,
            _ => {}
        }

        if let Some(caps) = EVERY_N_DAYS.captures(&normalized) {
            return match caps[1].parse::<u32>() {
                Ok(0) | Err(_) => CyclePattern::Unknown(descriptor.trim().to_string()),
                Ok(1) => CyclePattern::Daily,
                Ok(2) => CyclePattern::AlternateDays,
                Ok(n) => CyclePattern::EveryNDays(n),
            };
        }

        if let Some(days) = parse_weekday_set(&normalized) {
            return CyclePattern::WeekdaySet(days);
        }

        CyclePattern::Unknown(descriptor.trim().to_string())
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, CyclePattern::Unknown(_))
    }

    /// Whether a session is due on `candidate` for a series anchored at `anchor`
    pub fn matches(&self, anchor: NaiveDate, candidate: NaiveDate) -> bool {
        if candidate < anchor {
            return false;
        }
        let offset = (candidate - anchor).num_days();

        match self {
            CyclePattern::Daily => true,
            CyclePattern::WeekdaySet(days) => days.contains(candidate.weekday()),
            CyclePattern::AlternateDays => offset % 2 == 0,
            CyclePattern::EveryNDays(n) => offset % i64::from(*n) == 0,
            CyclePattern::SameWeekday => candidate.weekday() == anchor.weekday(),
            CyclePattern::Unknown(_) => false,
        }
    }

    /// Matching dates in the inclusive range `[start, end]`
    pub fn matching_dates(
        &self,
        anchor: NaiveDate,
        start: NaiveDate,
        end: NaiveDate,
    ) -> impl Iterator<Item = NaiveDate> + '_ {
        start
            .iter_days()
            .take_while(move |d| *d <= end)
            .filter(move |d| self.matches(anchor, *d))
    }
}

impl fmt::Display for CyclePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CyclePattern::Daily => write!(f, "daily"),
            CyclePattern::WeekdaySet(days) => {
                let names: Vec<String> = days.iter().map(|d| d.to_string()).collect();
                write!(f, "{}", names.join("/"))
            }
            CyclePattern::AlternateDays => write!(f, "alternate days"),
            CyclePattern::EveryNDays(n) => write!(f, "every {} days", n),
            CyclePattern::SameWeekday => write!(f, "weekly"),
            CyclePattern::Unknown(raw) => write!(f, "unrecognized ({})", raw),
        }
    }
}

/// Compact clinic codes written without separators
fn compact_code(code: &str) -> Option<Weekdays> {
    use Weekday::*;
    let days: &[Weekday] = match code {
        "mwf" => &[Mon, Wed, Fri],
        "tts" | "tths" | "tthsa" | "tthsat" | "tuthsa" | "tuthsat" => &[Tue, Thu, Sat],
        "mw" => &[Mon, Wed],
        "wf" => &[Wed, Fri],
        "mf" => &[Mon, Fri],
        "mth" | "mthu" => &[Mon, Thu],
        "tf" | "tuf" => &[Tue, Fri],
        "tth" | "tuth" => &[Tue, Thu],
        "wsa" | "wsat" => &[Wed, Sat],
        _ => return None,
    };
    Some(Weekdays::from_days(days))
}

fn weekday_token(token: &str) -> Option<Weekday> {
    let day = match token {
        "m" | "mo" | "mon" | "monday" => Weekday::Mon,
        "tu" | "tue" | "tues" | "tuesday" => Weekday::Tue,
        "w" | "we" | "wed" | "weds" | "wednesday" => Weekday::Wed,
        "th" | "thu" | "thur" | "thurs" | "thursday" => Weekday::Thu,
        "f" | "fr" | "fri" | "friday" => Weekday::Fri,
        "sa" | "sat" | "saturday" => Weekday::Sat,
        "su" | "sun" | "sunday" => Weekday::Sun,
        _ => return None,
    };
    Some(day)
}

fn parse_weekday_set(normalized: &str) -> Option<Weekdays> {
    let tokens: Vec<&str> = normalized
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|t| !t.is_empty() && *t != "and")
        .collect();

    if tokens.is_empty() {
        return None;
    }

    if tokens.len() == 1 {
        if let Some(days) = compact_code(tokens[0]) {
            return Some(days);
        }
    }

    let mut days = Weekdays::default();
    for token in tokens {
        days.insert(weekday_token(token)?);
    }
    Some(days)
}

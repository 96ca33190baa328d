//! Durations, absolute/relative dates, and the temporal predicate.
//!
//! All arithmetic is checked; an instant that would fall before the
//! representable range clamps to `DateTime::<Utc>::MIN_UTC`.

use super::error::ExprError;
use chrono::{DateTime, FixedOffset, Months, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use std::fmt;

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

impl TimeUnit {
    fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "hour" | "hours" => Some(Self::Hours),
            "day" | "days" => Some(Self::Days),
            "week" | "weeks" => Some(Self::Weeks),
            "month" | "months" => Some(Self::Months),
            "year" | "years" => Some(Self::Years),
            _ => None,
        }
    }

    fn singular(&self) -> &'static str {
        match self {
            Self::Hours => "hour",
            Self::Days => "day",
            Self::Weeks => "week",
            Self::Months => "month",
            Self::Years => "year",
        }
    }
}

/// A calendar span such as `3 days` or `1 month`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub amount: u32,
    pub unit: TimeUnit,
}

impl Span {
    pub fn new(amount: u32, unit: TimeUnit) -> Self {
        Self { amount, unit }
    }

    /// Parse `<integer> <unit>`; the unit may be singular or plural.
    pub fn parse(text: &str) -> Result<Self, ExprError> {
        let mut parts = text.split_whitespace();
        let (Some(amount), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ExprError::new(text, "expected '<integer> <unit>'"));
        };
        let amount: u32 = amount
            .parse()
            .map_err(|_| ExprError::new(text, format!("invalid amount '{}'", amount)))?;
        let unit = TimeUnit::parse(unit).ok_or_else(|| {
            ExprError::new(
                text,
                format!("unknown unit '{}' (hours, days, weeks, months, years)", unit),
            )
        })?;
        Ok(Self { amount, unit })
    }

    /// `instant - self`, clamped at the earliest representable instant.
    pub fn before(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        let amount = i64::from(self.amount);
        let shifted = match self.unit {
            TimeUnit::Hours => TimeDelta::try_hours(amount).and_then(|d| instant.checked_sub_signed(d)),
            TimeUnit::Days => TimeDelta::try_days(amount).and_then(|d| instant.checked_sub_signed(d)),
            TimeUnit::Weeks => TimeDelta::try_weeks(amount).and_then(|d| instant.checked_sub_signed(d)),
            TimeUnit::Months => instant.checked_sub_months(Months::new(self.amount)),
            TimeUnit::Years => self
                .amount
                .checked_mul(12)
                .and_then(|m| instant.checked_sub_months(Months::new(m))),
        };
        shifted.unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = self.unit.singular();
        if self.amount == 1 {
            write!(f, "1 {}", unit)
        } else {
            write!(f, "{} {}s", self.amount, unit)
        }
    }
}

/// The operand of `before` / `after` / `since`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateSpec {
    Now,
    Today,
    Yesterday,
    Ago(Span),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Instant(DateTime<FixedOffset>),
}

impl DateSpec {
    pub fn parse(text: &str) -> Result<Self, ExprError> {
        let trimmed = text.trim();
        let lower = trimmed.to_ascii_lowercase();
        match lower.as_str() {
            "now" => return Ok(Self::Now),
            "today" => return Ok(Self::Today),
            "yesterday" => return Ok(Self::Yesterday),
            _ => {}
        }
        if let Some(span) = lower.strip_suffix(" ago") {
            return Span::parse(span).map(Self::Ago);
        }
        if let Ok(instant) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(Self::Instant(instant));
        }
        for format in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
                return Ok(Self::DateTime(naive));
            }
        }
        NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .map(Self::Date)
            .map_err(|_| {
                ExprError::new(
                    text,
                    "expected a date (YYYY-MM-DD, RFC 3339, 'YYYY-MM-DD HH:MM:SS') or a relative phrase",
                )
            })
    }

    /// Resolve to an absolute UTC instant relative to `now`.
    pub fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Now => now,
            Self::Today => start_of_day(now.date_naive()),
            Self::Yesterday => now
                .date_naive()
                .pred_opt()
                .map(start_of_day)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            Self::Ago(span) => span.before(now),
            Self::Date(date) => start_of_day(*date),
            Self::DateTime(naive) => naive.and_utc(),
            Self::Instant(instant) => instant.with_timezone(&Utc),
        }
    }
}

impl fmt::Display for DateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Now => write!(f, "now"),
            Self::Today => write!(f, "today"),
            Self::Yesterday => write!(f, "yesterday"),
            Self::Ago(span) => write!(f, "{} ago", span),
            Self::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            Self::DateTime(naive) => write!(f, "{}", naive.format("%Y-%m-%d %H:%M:%S")),
            Self::Instant(instant) => write!(f, "{}", instant.to_rfc3339()),
        }
    }
}

/// `within` / `before` / `after` / `since`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Temporal {
    Within(Span),
    Before(DateSpec),
    After(DateSpec),
    Since(DateSpec),
}

impl Temporal {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Within(_) => "within",
            Self::Before(_) => "before",
            Self::After(_) => "after",
            Self::Since(_) => "since",
        }
    }

    /// Whether `value` satisfies the predicate at `now`.
    pub fn holds(&self, value: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            Self::Within(span) => span.before(now) <= value && value <= now,
            Self::Before(spec) => value < spec.resolve(now),
            Self::After(spec) => value > spec.resolve(now),
            Self::Since(spec) => value >= spec.resolve(now),
        }
    }
}

impl fmt::Display for Temporal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Within(span) => write!(f, "within {}", span),
            Self::Before(spec) | Self::After(spec) | Self::Since(spec) => {
                write!(f, "{} {}", self.keyword(), spec)
            }
        }
    }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// Parse a stored date string: RFC 3339, naive date-time, or date-only.
pub fn parse_date_text(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Some(instant.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(start_of_day)
}

/// Parse a date-only string, used for whole-day literal equality.
pub fn parse_day(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok()
}

/// Interpret a row value as an instant. Numbers are unix seconds.
pub fn parse_instant(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => parse_date_text(s),
        serde_json::Value::Number(n) => {
            if let Some(secs) = n.as_i64() {
                DateTime::from_timestamp(secs, 0)
            } else {
                let secs = n.as_f64()?;
                if !secs.is_finite() {
                    return None;
                }
                let whole = secs.floor();
                let nanos = ((secs - whole) * 1e9) as u32;
                DateTime::from_timestamp(whole as i64, nanos)
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(text: &str) -> DateTime<Utc> {
        parse_date_text(text).unwrap()
    }

    #[test]
    fn test_span_parse_and_display() {
        let s = Span::parse("3 days").unwrap();
        assert_eq!(s, Span::new(3, TimeUnit::Days));
        assert_eq!(s.to_string(), "3 days");
        assert_eq!(Span::parse("1 Week").unwrap().to_string(), "1 week");
        assert!(Span::parse("three days").is_err());
        assert!(Span::parse("3 fortnights").is_err());
        assert!(Span::parse("3").is_err());
    }

    #[test]
    fn test_within_boundary_inclusive() {
        let now = at("2024-02-01T00:00:00Z");
        let within = Temporal::Within(Span::new(7, TimeUnit::Days));
        assert!(within.holds(at("2024-01-25"), now));
        assert!(within.holds(at("2024-01-31T12:00:00Z"), now));
        assert!(within.holds(now, now));
        assert!(!within.holds(at("2024-01-24T23:59:59Z"), now));
        assert!(!within.holds(at("2024-02-02"), now));
    }

    #[test]
    fn test_before_after_strict_since_inclusive() {
        let now = at("2024-02-01T00:00:00Z");
        let jan = DateSpec::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert!(!Temporal::Before(jan.clone()).holds(at("2024-01-01"), now));
        assert!(!Temporal::After(jan.clone()).holds(at("2024-01-01"), now));
        assert!(Temporal::Since(jan.clone()).holds(at("2024-01-01"), now));
        assert!(Temporal::After(jan).holds(at("2024-01-01T00:00:01Z"), now));
    }

    #[test]
    fn test_relative_dates() {
        let now = at("2024-03-15T10:30:00Z");
        assert_eq!(DateSpec::parse("today").unwrap().resolve(now), at("2024-03-15"));
        assert_eq!(DateSpec::parse("Yesterday").unwrap().resolve(now), at("2024-03-14"));
        assert_eq!(
            DateSpec::parse("2 months ago").unwrap().resolve(now),
            at("2024-01-15T10:30:00Z")
        );
        assert_eq!(
            DateSpec::parse("1 year ago").unwrap().resolve(now),
            at("2023-03-15T10:30:00Z")
        );
    }

    #[test]
    fn test_date_spec_display_round_trip() {
        for text in [
            "now",
            "today",
            "yesterday",
            "3 weeks ago",
            "2024-01-01",
            "2024-01-01 08:00:00",
            "2024-01-01T08:00:00+02:00",
        ] {
            let spec = DateSpec::parse(text).unwrap();
            assert_eq!(DateSpec::parse(&spec.to_string()).unwrap(), spec, "{}", text);
        }
    }

    #[test]
    fn test_bad_date_rejected() {
        assert!(DateSpec::parse("2024-13-45").is_err());
        assert!(DateSpec::parse("soon").is_err());
    }

    #[test]
    fn test_huge_span_clamps() {
        let now = at("2024-01-01");
        let span = Span::new(u32::MAX, TimeUnit::Years);
        assert_eq!(span.before(now), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_parse_instant_forms() {
        let expected = at("2024-01-01T00:00:00Z");
        assert_eq!(parse_instant(&serde_json::json!("2024-01-01")), Some(expected));
        assert_eq!(
            parse_instant(&serde_json::json!("2024-01-01 00:00:00")),
            Some(expected)
        );
        assert_eq!(parse_instant(&serde_json::json!(1_704_067_200)), Some(expected));
        assert_eq!(parse_instant(&serde_json::json!(true)), None);
        assert_eq!(parse_instant(&serde_json::json!("not a date")), None);
    }
}

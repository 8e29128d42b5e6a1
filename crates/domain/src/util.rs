use std::time::Duration;

use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};
use uuid::Uuid;

const MIDNIGHT_MARGIN: Duration = Duration::from_secs(5 * 60);
const MIN_CACHE_TTL: Duration = Duration::from_secs(60);

pub fn uuid_v7_without_dashes() -> String {
    Uuid::now_v7().simple().to_string()
}

pub fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

pub fn now_secs() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

pub fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

/// Parses `YYYY-MM-DD`.
pub fn parse_date(value: &str) -> Option<Date> {
    Date::parse(value.trim(), format_description!("[year]-[month]-[day]")).ok()
}

/// Parses `YYYY-MM-DD HH:MM:SS` as UTC.
pub fn parse_datetime(value: &str) -> Option<OffsetDateTime> {
    PrimitiveDateTime::parse(
        value.trim(),
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    )
    .ok()
    .map(PrimitiveDateTime::assume_utc)
}

pub fn format_date(date: Date) -> String {
    date.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| "1970-01-01".to_string())
}

/// Time left until the next UTC midnight, less a small margin so cached
/// values roll over before the day's first snapshot lands.
pub fn ttl_until_midnight(now: OffsetDateTime) -> Duration {
    let Some(tomorrow) = now.date().next_day() else {
        return MIN_CACHE_TTL;
    };
    let midnight = PrimitiveDateTime::new(tomorrow, Time::MIDNIGHT).assume_utc();
    let remaining = (midnight - now).unsigned_abs();
    remaining.saturating_sub(MIDNIGHT_MARGIN).max(MIN_CACHE_TTL)
}

/// Collects `#tag` tokens in order of first appearance.
pub fn extract_hashtags(content: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    let mut rest = content;
    while let Some(start) = rest.find('#') {
        let after = &rest[start + 1..];
        let end = after
            .find(|ch: char| ch.is_whitespace() || ch == '#' || ch == ',' || ch == '.')
            .unwrap_or(after.len());
        let tag = after[..end].trim();
        if !tag.is_empty() && !tags.iter().any(|existing| existing == tag) {
            tags.push(tag.to_string());
        }
        rest = &after[end..];
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn parses_cdc_datetime_as_utc() {
        let parsed = parse_datetime("2025-01-01 00:00:00").unwrap();
        assert_eq!(parsed.unix_timestamp(), 1_735_689_600);
        assert!(parse_datetime("not a date").is_none());
    }

    #[test]
    fn midnight_ttl_keeps_margin_and_floor() {
        let ttl = ttl_until_midnight(datetime!(2026-03-01 23:00:00 UTC));
        assert_eq!(ttl, Duration::from_secs(55 * 60));
        let ttl = ttl_until_midnight(datetime!(2026-03-01 23:58:00 UTC));
        assert_eq!(ttl, MIN_CACHE_TTL);
    }

    #[test]
    fn hashtags_are_deduplicated() {
        let tags = extract_hashtags("weekend #hiking trip #food,#hiking again");
        assert_eq!(tags, vec!["hiking".to_string(), "food".to_string()]);
        assert!(extract_hashtags("no tags here").is_empty());
    }
}

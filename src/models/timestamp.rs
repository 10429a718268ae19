use std::fmt::Display;
use std::ops::Add;
use std::ops::Sub;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use chrono::DateTime;
use chrono::Local;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Dedicated struct for timestamps (and durations). Counts the number of
/// milliseconds elapsed since the Unix epoch (00:00 UTC on 1 Jan 1970).
#[derive(
    Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct Timestamp(pub u64);

impl Add for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Self) -> Self::Output {
        Timestamp(self.0 + rhs.0)
    }
}

impl Sub for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Self) -> Self::Output {
        Timestamp(self.0 - rhs.0)
    }
}

impl Timestamp {
    pub fn now() -> Timestamp {
        Timestamp(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_millis() as u64,
        )
    }

    pub const fn zero() -> Timestamp {
        Timestamp(0)
    }

    pub const fn days(num: u64) -> Timestamp {
        Timestamp(num * 24 * 60 * 60 * 1000)
    }

    pub const fn hours(num: u64) -> Timestamp {
        Timestamp(num * 60 * 60 * 1000)
    }

    pub const fn minutes(num: u64) -> Timestamp {
        Timestamp(num * 60 * 1000)
    }

    pub const fn seconds(num: u64) -> Timestamp {
        Timestamp(num * 1000)
    }

    pub const fn millis(num: u64) -> Timestamp {
        Timestamp(num)
    }

    pub const fn to_millis(self) -> u64 {
        self.0
    }

    pub fn from_duration(duration: std::time::Duration) -> Timestamp {
        Timestamp(duration.as_millis() as u64)
    }

    pub fn format(&self, format_descriptor: &str) -> String {
        match DateTime::from_timestamp_millis(self.0 as i64) {
            Some(dt) => dt.format(format_descriptor).to_string(),
            None => "".to_string(),
        }
    }

    pub fn standard_format(&self) -> String {
        let Some(utc) = DateTime::<Utc>::from_timestamp_millis(self.0 as i64) else {
            return "".to_string();
        };
        let local: DateTime<Local> = DateTime::from(utc);
        local.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, false)
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_constructors_agree() {
        assert_eq!(Timestamp::hours(1), Timestamp::minutes(60));
        assert_eq!(Timestamp::minutes(1), Timestamp::seconds(60));
        assert_eq!(Timestamp::seconds(1), Timestamp::millis(1000));
        assert_eq!(Timestamp::days(1), Timestamp::hours(24));
    }

    #[test]
    fn arithmetic_and_ordering() {
        let t0 = Timestamp::millis(5_000);
        let ttl = Timestamp::hours(1);
        let expiry = t0 + ttl;
        assert!(expiry > t0);
        assert_eq!(expiry - ttl, t0);
    }

    #[test]
    fn print_now() {
        println!("{}", Timestamp::now());
    }
}

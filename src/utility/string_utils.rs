//! # StringUtils
//! This module contains utility functions around string handling that are used in the project.

use core::fmt::Write;

use chrono::{Datelike, NaiveDateTime, Timelike};
use embassy_time::Duration;
use heapless::String;

/// Fixed-capacity string helpers.
pub struct StringUtils;

impl StringUtils {
    /// This function converts a `NaiveDateTime` to a string
    /// The output string will be in the format "YYYY-MM-DD HH:MM:SS",
    /// one example being `"2024-06-26 22:01:27"`
    pub fn convert_datetime_to_str(dt: NaiveDateTime) -> String<19> {
        let mut s: String<19> = String::new();
        let _ = write!(
            s,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            dt.year(),
            dt.month(),
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second()
        );
        s
    }

    /// This function converts an uptime to a string
    /// The output string will be in the format "Dd HH:MM:SS", days are left out while zero
    /// one example being `"3d 04:05:06"`
    pub fn convert_uptime_to_str(uptime: Duration) -> String<24> {
        let total = uptime.as_secs();
        let days = total / 86_400;
        let hours = (total % 86_400) / 3_600;
        let minutes = (total % 3_600) / 60;
        let seconds = total % 60;

        let mut s: String<24> = String::new();
        if days > 0 {
            let _ = write!(s, "{days}d ");
        }
        let _ = write!(s, "{hours:02}:{minutes:02}:{seconds:02}");
        s
    }

    /// Appends `tail` to `s`, cutting it at the capacity of `s` instead of failing.
    pub fn push_truncated<const N: usize>(s: &mut String<N>, tail: &str) {
        for c in tail.chars() {
            if s.push(c).is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn datetime_is_zero_padded() {
        let dt = NaiveDate::from_ymd_opt(2024, 6, 3)
            .unwrap()
            .and_hms_opt(7, 5, 9)
            .unwrap();
        assert_eq!(StringUtils::convert_datetime_to_str(dt), "2024-06-03 07:05:09");
    }

    #[test]
    fn uptime_shows_days_only_when_needed() {
        assert_eq!(
            StringUtils::convert_uptime_to_str(Duration::from_secs(3_723)),
            "01:02:03"
        );
        assert_eq!(
            StringUtils::convert_uptime_to_str(Duration::from_secs(3 * 86_400 + 4 * 3_600 + 5 * 60 + 6)),
            "3d 04:05:06"
        );
    }

    #[test]
    fn push_truncated_stops_at_capacity() {
        let mut s: String<4> = String::new();
        StringUtils::push_truncated(&mut s, "abcdef");
        assert_eq!(s, "abcd");
    }
}

//! Notice timestamp formatting. Persisted timestamps are always UTC
//! seconds; display formatting applies the configured time zone at the
//! point of rendering, never the other way around.

use chrono::{TimeZone, Utc};
use chrono_tz::Tz;

/// Formats `epoch_secs` as `mm-dd HH:MM` in `tz_name`. Falls back to UTC if
/// `tz_name` does not parse as a known zone.
pub fn format_short(epoch_secs: i64, tz_name: &str) -> String {
    let tz: Tz = tz_name.parse().unwrap_or(chrono_tz::UTC);
    let dt = Utc
        .timestamp_opt(epoch_secs, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
        .with_timezone(&tz);
    dt.format("%m-%d %H:%M").to_string()
}

/// Formats `epoch_secs` for a `[Notice <timestamp>]` title, in `tz_name`.
pub fn format_notice_title(epoch_secs: i64, tz_name: &str) -> String {
    format!("[Notice {}]", format_short(epoch_secs, tz_name))
}

/// Formats an uptime duration as `<H>h<M>m`.
pub fn format_uptime(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    format!("{hours}h{minutes:02}m")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_known_epoch_in_utc() {
        // 2021-01-01T00:00:00Z
        assert_eq!(format_short(1_609_459_200, "UTC"), "01-01 00:00");
    }

    #[test]
    fn falls_back_to_utc_on_unknown_zone() {
        assert_eq!(format_short(1_609_459_200, "Not/AZone"), "01-01 00:00");
    }

    #[test]
    fn notice_title_wraps_in_brackets() {
        assert_eq!(format_notice_title(1_609_459_200, "UTC"), "[Notice 01-01 00:00]");
    }

    #[test]
    fn uptime_formats_hours_and_minutes() {
        assert_eq!(format_uptime(0), "0h00m");
        assert_eq!(format_uptime(65), "0h01m");
        assert_eq!(format_uptime(3 * 3600 + 12 * 60), "3h12m");
    }
}

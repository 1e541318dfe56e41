use chrono::{DateTime, NaiveTime, Utc};

use super::notification_models::{NotificationFrequency, NotificationSettings};

/// A daily time-of-day window, evaluated in UTC. The window is half-open
/// (`start` inclusive, `end` exclusive) and wraps past midnight when
/// `start > end`. Equal bounds describe an empty window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    start: NaiveTime,
    end: NaiveTime,
}

impl QuietHours {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start < self.end {
            self.start <= time && time < self.end
        } else if self.start > self.end {
            time >= self.start || time < self.end
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    FrequencyNever,
    QuietHours,
}

/// Decides once per event whether anything may be delivered. Hourly and
/// daily frequencies have no digest queue behind them and deliver like
/// instant.
pub fn evaluate(settings: &NotificationSettings, now: DateTime<Utc>) -> Option<Suppression> {
    if settings.frequency == NotificationFrequency::Never {
        return Some(Suppression::FrequencyNever);
    }
    if let Some(window) = settings.quiet_hours() {
        if window.contains(now.time()) {
            return Some(Suppression::QuietHours);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn overnight_window_wraps_midnight() {
        let window = QuietHours::new(t(22, 0), t(6, 0));
        assert!(window.contains(t(23, 30)));
        assert!(window.contains(t(5, 0)));
        assert!(window.contains(t(22, 0)));
        assert!(!window.contains(t(6, 0)));
        assert!(!window.contains(t(12, 0)));
    }

    #[test]
    fn daytime_window() {
        let window = QuietHours::new(t(9, 0), t(17, 0));
        assert!(window.contains(t(12, 0)));
        assert!(!window.contains(t(20, 0)));
        assert!(!window.contains(t(8, 59)));
    }

    #[test]
    fn equal_bounds_never_suppress() {
        let window = QuietHours::new(t(8, 0), t(8, 0));
        assert!(!window.contains(t(8, 0)));
        assert!(!window.contains(t(20, 0)));
    }

    #[test]
    fn never_frequency_suppresses_regardless_of_time() {
        let mut settings = NotificationSettings::defaults(1);
        settings.frequency = NotificationFrequency::Never;
        let noon = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(evaluate(&settings, noon), Some(Suppression::FrequencyNever));
    }

    #[test]
    fn quiet_hours_gate_uses_time_of_day() {
        let mut settings = NotificationSettings::defaults(1);
        settings.quiet_hours_start = Some(t(22, 0));
        settings.quiet_hours_end = Some(t(6, 0));

        let late = Utc.with_ymd_and_hms(2024, 3, 1, 23, 30, 0).unwrap();
        let noon = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(evaluate(&settings, late), Some(Suppression::QuietHours));
        assert_eq!(evaluate(&settings, noon), None);
    }

    #[test]
    fn digest_frequencies_deliver_immediately() {
        let mut settings = NotificationSettings::defaults(1);
        settings.frequency = NotificationFrequency::Daily;
        assert_eq!(evaluate(&settings, Utc::now()), None);
    }
}

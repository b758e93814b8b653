//! UTC calendar-field comparisons used by the first-launch heuristics.

use chrono::{DateTime, Datelike, Timelike, Utc};

pub fn is_same_year(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.year() == b.year()
}

pub fn is_same_month(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    is_same_year(a, b) && a.month() == b.month()
}

pub fn is_same_day(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    is_same_month(a, b) && a.day() == b.day()
}

pub fn is_same_hour(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    is_same_day(a, b) && a.hour() == b.hour()
}

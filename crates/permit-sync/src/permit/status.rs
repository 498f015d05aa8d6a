use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::record::PermitRecord;

/// How a permit reads to someone glancing at the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermitStatus {
    Upcoming,
    Active,
    ExpiresTomorrow,
    ExpiresToday,
    Expired,
}

impl PermitStatus {
    /// A permit is honoured through 23:59:59 of its `valid_to` day, whatever
    /// time is printed on the receipt.
    pub fn classify(record: &PermitRecord, now: NaiveDateTime) -> Self {
        if now > record.expires_at() {
            return Self::Expired;
        }
        if now < record.valid_from.as_naive() {
            return Self::Upcoming;
        }

        let today = now.date();
        let last_day = record.valid_to.date();
        if today == last_day {
            Self::ExpiresToday
        } else if today + Duration::days(1) == last_day {
            Self::ExpiresTomorrow
        } else {
            Self::Active
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Upcoming => "Not yet valid",
            Self::Active => "Active",
            Self::ExpiresTomorrow => "Expires tomorrow",
            Self::ExpiresToday => "Expires today",
            Self::Expired => "Expired",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permit::record::PermitTimestamp;
    use chrono::NaiveDate;

    fn record() -> PermitRecord {
        PermitRecord {
            permit_number: "T6151625".to_string(),
            plate_number: "ABC123".to_string(),
            valid_from: PermitTimestamp::parse("Nov 7, 2025: 18:00").expect("from"),
            valid_to: PermitTimestamp::parse("Nov 14, 2025: 17:59").expect("to"),
            barcode_value: None,
            barcode_label: None,
            amount_paid: None,
        }
    }

    fn at(day: u32, hour: u32, minute: u32, second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 11, day)
            .expect("valid date")
            .and_hms_opt(hour, minute, second)
            .expect("valid time")
    }

    #[test]
    fn expired_only_after_end_of_valid_to_day() {
        let record = record();
        assert_eq!(record.status_at(at(14, 23, 59, 59)), PermitStatus::ExpiresToday);
        assert_eq!(record.status_at(at(15, 0, 0, 0)), PermitStatus::Expired);
    }

    #[test]
    fn printed_end_time_does_not_shorten_the_last_day() {
        assert_eq!(record().status_at(at(14, 18, 30, 0)), PermitStatus::ExpiresToday);
    }

    #[test]
    fn day_before_boundary_expires_tomorrow() {
        let record = record();
        assert_eq!(record.status_at(at(13, 0, 0, 0)), PermitStatus::ExpiresTomorrow);
        assert_eq!(record.status_at(at(13, 23, 59, 59)), PermitStatus::ExpiresTomorrow);
        assert_eq!(record.status_at(at(12, 12, 0, 0)), PermitStatus::Active);
    }

    #[test]
    fn before_valid_from_is_upcoming() {
        let record = record();
        assert_eq!(record.status_at(at(7, 17, 59, 0)), PermitStatus::Upcoming);
        assert_eq!(record.status_at(at(7, 18, 0, 0)), PermitStatus::Active);
    }
}

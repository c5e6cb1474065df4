use std::collections::{BTreeMap, BTreeSet};

use bigdecimal::BigDecimal;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, NaiveTime, Utc, Weekday};
use device_protocol::{AttendanceEvent, PunchType};
use serde::{Deserialize, Serialize};

/// Per-user-per-day enriched view.
///
/// `Deserialize` is derived alongside `Serialize` because the Gateway
/// parses this exact shape back out of a Location Service's response body
/// when merging across Locations - one wire type, not a duplicated
/// Gateway-side copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttendanceRecord {
    pub user_id: String,
    pub user_name: String,
    pub date: NaiveDate,
    pub location_id: Option<String>,
    pub first_in: Option<DateTime<Utc>>,
    pub last_out: Option<DateTime<Utc>>,
    pub total_hours: BigDecimal,
    pub is_working_day: bool,
    pub is_holiday: bool,
    pub holiday_name: Option<String>,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    EarlyLeave,
    Holiday,
    Weekend,
    OnlyIn,
    OnlyOut,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub location_id: Option<String>,
    pub device_name: Option<String>,
    pub total_users: u32,
    pub present: u32,
    pub absent: u32,
    pub holiday: u32,
    pub weekend: u32,
    pub attendance_rate: BigDecimal,
}

/// The cross-site/per-site policy the enrichment algorithm is a pure
/// function of: weekend days, fixed holidays, the working-hour window, and
/// grace minutes.
#[derive(Debug, Clone)]
pub struct AttendancePolicy {
    pub weekend_days: BTreeSet<Weekday>,
    pub holidays: BTreeSet<NaiveDate>,
    pub work_start: NaiveTime,
    pub work_end: NaiveTime,
    pub grace_minutes: i64,
}

impl Default for AttendancePolicy {
    fn default() -> Self {
        Self {
            weekend_days: [Weekday::Fri, Weekday::Sat].into_iter().collect(),
            holidays: BTreeSet::new(),
            work_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            work_end: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            grace_minutes: 10,
        }
    }
}

struct Bucket {
    first_in: Option<DateTime<Utc>>,
    last_out: Option<DateTime<Utc>>,
}

impl Bucket {
    fn empty() -> Self {
        Self {
            first_in: None,
            last_out: None,
        }
    }

    /// Fold one event into the bucket: `in`/`unknown` events can set
    /// `first_in`, `out`/`unknown` events can set `last_out`; a singleton
    /// `unknown` event sets both sides.
    fn fold(&mut self, event: &AttendanceEvent) {
        let ts = event.timestamp;
        if matches!(event.punch_type, PunchType::In | PunchType::Unknown) {
            self.first_in = Some(match self.first_in {
                Some(existing) => existing.min(ts),
                None => ts,
            });
        }
        if matches!(event.punch_type, PunchType::Out | PunchType::Unknown) {
            self.last_out = Some(match self.last_out {
                Some(existing) => existing.max(ts),
                None => ts,
            });
        }
    }
}

/// Enrich raw punch events into per-user-per-day records for every date in
/// `[start, end]` and every known `user_id`. `request_holidays` is unioned
/// with `policy.holidays`. Pure function: no I/O, deterministic given its
/// inputs, independent of device-call order.
pub fn enrich_attendance(
    events: &[AttendanceEvent],
    known_user_ids: &BTreeSet<String>,
    user_names: &BTreeMap<String, String>,
    start: NaiveDate,
    end: NaiveDate,
    policy: &AttendancePolicy,
    request_holidays: &BTreeSet<NaiveDate>,
    location_id: Option<&str>,
) -> Vec<AttendanceRecord> {
    let mut buckets: BTreeMap<(String, NaiveDate), Bucket> = BTreeMap::new();
    for event in events {
        let local_date = event.timestamp.date_naive();
        if local_date < start || local_date > end {
            continue;
        }
        buckets
            .entry((event.user_id.clone(), local_date))
            .or_insert_with(Bucket::empty)
            .fold(event);
    }

    let mut records = Vec::new();
    let mut date = start;
    while date <= end {
        let is_holiday = policy.holidays.contains(&date) || request_holidays.contains(&date);
        let is_weekend = policy.weekend_days.contains(&date.weekday());
        let is_working_day = !(is_holiday || is_weekend);

        for user_id in known_user_ids {
            let bucket = buckets.get(&(user_id.clone(), date));
            let first_in = bucket.and_then(|b| b.first_in);
            let last_out = bucket.and_then(|b| b.last_out);
            let total_hours = common_hours::total_hours(first_in, last_out);

            let status = classify_status(
                is_holiday,
                is_weekend,
                first_in,
                last_out,
                policy,
            );

            records.push(AttendanceRecord {
                user_id: user_id.clone(),
                user_name: user_names.get(user_id).cloned().unwrap_or_else(|| user_id.clone()),
                date,
                location_id: location_id.map(str::to_string),
                first_in,
                last_out,
                total_hours,
                is_working_day,
                is_holiday,
                holiday_name: None,
                status,
            });
        }
        date += ChronoDuration::days(1);
    }

    // Sort by (date ASC, user_id ASC).
    records.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.user_id.cmp(&b.user_id)));
    records
}

fn classify_status(
    is_holiday: bool,
    is_weekend: bool,
    first_in: Option<DateTime<Utc>>,
    last_out: Option<DateTime<Utc>>,
    policy: &AttendancePolicy,
) -> AttendanceStatus {
    if is_holiday {
        return AttendanceStatus::Holiday;
    }
    if is_weekend {
        return AttendanceStatus::Weekend;
    }
    match (first_in, last_out) {
        (None, None) => AttendanceStatus::Absent,
        (Some(_), None) => AttendanceStatus::OnlyIn,
        (None, Some(_)) => AttendanceStatus::OnlyOut,
        (Some(first_in), Some(last_out)) => {
            let grace = ChronoDuration::minutes(policy.grace_minutes);
            let work_start = first_in.date_naive().and_time(policy.work_start);
            let work_end = last_out.date_naive().and_time(policy.work_end);
            let work_start = chrono::DateTime::<Utc>::from_naive_utc_and_offset(work_start, Utc);
            let work_end = chrono::DateTime::<Utc>::from_naive_utc_and_offset(work_end, Utc);
            if first_in > work_start + grace {
                AttendanceStatus::Late
            } else if last_out < work_end - grace {
                AttendanceStatus::EarlyLeave
            } else {
                AttendanceStatus::Present
            }
        }
    }
}

/// Reduce a set of records for one date into a `DailySummary`.
/// `attendance_rate` is recomputed from the reduced counts, never carried
/// over from a per-user ratio.
pub fn summarize_day(
    date: NaiveDate,
    location_id: Option<&str>,
    device_name: Option<&str>,
    records: &[&AttendanceRecord],
) -> DailySummary {
    let total_users = records.len() as u32;
    let present = records
        .iter()
        .filter(|r| matches!(r.status, AttendanceStatus::Present | AttendanceStatus::Late | AttendanceStatus::EarlyLeave | AttendanceStatus::OnlyIn | AttendanceStatus::OnlyOut))
        .count() as u32;
    let absent = records.iter().filter(|r| r.status == AttendanceStatus::Absent).count() as u32;
    let holiday = records.iter().filter(|r| r.status == AttendanceStatus::Holiday).count() as u32;
    let weekend = records.iter().filter(|r| r.status == AttendanceStatus::Weekend).count() as u32;

    DailySummary {
        date,
        location_id: location_id.map(str::to_string),
        device_name: device_name.map(str::to_string),
        total_users,
        present,
        absent,
        holiday,
        weekend,
        attendance_rate: common_hours::attendance_rate(present, total_users),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use device_protocol::PunchType;

    fn ev(user: &str, h: u32, m: u32, kind: PunchType) -> AttendanceEvent {
        AttendanceEvent {
            user_id: user.to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 1, 6, h, m, 0).unwrap(),
            punch_type: kind,
            device_name: "front-door".to_string(),
        }
    }

    #[test]
    fn present_within_grace() {
        let events = vec![ev("u1", 8, 5, PunchType::In), ev("u1", 17, 10, PunchType::Out)];
        let mut known = BTreeSet::new();
        known.insert("u1".to_string());
        let date = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        let records = enrich_attendance(
            &events,
            &known,
            &BTreeMap::new(),
            date,
            date,
            &AttendancePolicy::default(),
            &BTreeSet::new(),
            Some("loc-a"),
        );
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.status, AttendanceStatus::Present);
        assert!(record.is_working_day);
        assert_eq!(record.total_hours.to_string(), "9.08");
    }

    #[test]
    fn holiday_overrides_status_but_still_computes_hours() {
        let events = vec![ev("u1", 8, 5, PunchType::In), ev("u1", 17, 10, PunchType::Out)];
        let mut known = BTreeSet::new();
        known.insert("u1".to_string());
        let date = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        let mut holidays = BTreeSet::new();
        holidays.insert(date);
        let records = enrich_attendance(
            &events,
            &known,
            &BTreeMap::new(),
            date,
            date,
            &AttendancePolicy::default(),
            &holidays,
            None,
        );
        let record = &records[0];
        assert_eq!(record.status, AttendanceStatus::Holiday);
        assert!(!record.is_working_day);
        assert_eq!(record.total_hours.to_string(), "9.08");
    }

    #[test]
    fn absent_when_no_events() {
        let mut known = BTreeSet::new();
        known.insert("u1".to_string());
        let date = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        let records = enrich_attendance(
            &[],
            &known,
            &BTreeMap::new(),
            date,
            date,
            &AttendancePolicy::default(),
            &BTreeSet::new(),
            None,
        );
        assert_eq!(records[0].status, AttendanceStatus::Absent);
        assert_eq!(records[0].total_hours.to_string(), "0");
    }

    #[test]
    fn only_in_when_no_out_punch() {
        let events = vec![ev("u1", 8, 5, PunchType::In)];
        let mut known = BTreeSet::new();
        known.insert("u1".to_string());
        let date = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        let records = enrich_attendance(
            &events,
            &known,
            &BTreeMap::new(),
            date,
            date,
            &AttendancePolicy::default(),
            &BTreeSet::new(),
            None,
        );
        assert_eq!(records[0].status, AttendanceStatus::OnlyIn);
    }

    #[test]
    fn late_arrival_past_grace() {
        let events = vec![ev("u1", 8, 20, PunchType::In), ev("u1", 17, 0, PunchType::Out)];
        let mut known = BTreeSet::new();
        known.insert("u1".to_string());
        let date = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        let records = enrich_attendance(
            &events,
            &known,
            &BTreeMap::new(),
            date,
            date,
            &AttendancePolicy::default(),
            &BTreeSet::new(),
            None,
        );
        assert_eq!(records[0].status, AttendanceStatus::Late);
    }

    #[test]
    fn weekend_classification() {
        // 2025-01-03 is a Friday, a configured weekend day by default.
        let date = NaiveDate::from_ymd_opt(2025, 1, 3).unwrap();
        let mut known = BTreeSet::new();
        known.insert("u1".to_string());
        let records = enrich_attendance(
            &[],
            &known,
            &BTreeMap::new(),
            date,
            date,
            &AttendancePolicy::default(),
            &BTreeSet::new(),
            None,
        );
        assert_eq!(records[0].status, AttendanceStatus::Weekend);
        assert!(!records[0].is_working_day);
    }

    #[test]
    fn summary_recomputes_rate_from_counts() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        let present = AttendanceRecord {
            user_id: "u1".into(),
            user_name: "U1".into(),
            date,
            location_id: None,
            first_in: None,
            last_out: None,
            total_hours: BigDecimal::from(0),
            is_working_day: true,
            is_holiday: false,
            holiday_name: None,
            status: AttendanceStatus::Present,
        };
        let mut absent = present.clone();
        absent.status = AttendanceStatus::Absent;
        let refs = vec![&present, &absent];
        let summary = summarize_day(date, Some("loc-a"), None, &refs);
        assert_eq!(summary.total_users, 2);
        assert_eq!(summary.present, 1);
        assert_eq!(summary.absent, 1);
        assert_eq!(summary.attendance_rate.to_string(), "0.5000");
    }
}

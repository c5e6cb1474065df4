use std::collections::BTreeMap;

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use device_protocol::{Device, User};
use location_service::{AttendanceRecord, DailySummary};
use serde::{Deserialize, Serialize};

/// One registered Location as the Dashboard sees it through `GET /places`.
#[derive(Debug, Clone, Serialize)]
pub struct PlaceSummary {
    pub id: String,
    pub display_name: String,
    pub address: String,
    pub enabled: bool,
    pub device_count: usize,
}

/// A device enriched with the Location that owns it, returned from
/// `GET /devices/all`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayDevice {
    pub location_id: String,
    #[serde(flatten)]
    pub device: Device,
}

/// A user merged across every Location it was seen at, returned from
/// `GET /users/all`. Defaults to one row per `(location_id, user_id)`
/// unless the caller asks to merge by `user_id`, in which case a user
/// present at several Locations collapses into one row listing every
/// `location_id` it appeared under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayUser {
    pub user_id: String,
    pub name: String,
    pub card_no: Option<String>,
    pub privilege: Option<String>,
    pub location_ids: Vec<String>,
    pub device_names: Vec<String>,
}

/// Whether `GET /users/all` keeps one row per Location or collapses rows
/// that share a `user_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserMergeMode {
    PerLocation,
    ByUserId,
}

fn gateway_user(location_id: &str, user: &User) -> GatewayUser {
    GatewayUser {
        user_id: user.user_id.clone(),
        name: user.name.clone(),
        card_no: user.card_no.clone(),
        privilege: user.privilege,
        location_ids: vec![location_id.to_string()],
        device_names: user.device_names.clone(),
    }
}

/// Merge users gathered from one `(location_id, Vec<User>)` pair per
/// Location. `PerLocation` keeps every Location's row as-is (sorted by
/// `location_id` then `user_id`); `ByUserId` folds rows sharing a
/// `user_id` into one, unioning `location_ids` and `device_names`.
pub fn merge_users(per_location: Vec<(String, Vec<User>)>, mode: UserMergeMode) -> Vec<GatewayUser> {
    match mode {
        UserMergeMode::PerLocation => {
            let mut rows: Vec<GatewayUser> = per_location
                .iter()
                .flat_map(|(location_id, users)| users.iter().map(move |u| gateway_user(location_id, u)))
                .collect();
            rows.sort_by(|a, b| a.location_ids.cmp(&b.location_ids).then_with(|| a.user_id.cmp(&b.user_id)));
            rows
        }
        UserMergeMode::ByUserId => {
            let mut by_id: BTreeMap<String, GatewayUser> = BTreeMap::new();
            for (location_id, users) in &per_location {
                for user in users {
                    by_id
                        .entry(user.user_id.clone())
                        .and_modify(|existing| {
                            if !existing.location_ids.contains(location_id) {
                                existing.location_ids.push(location_id.clone());
                            }
                            for device in &user.device_names {
                                if !existing.device_names.contains(device) {
                                    existing.device_names.push(device.clone());
                                }
                            }
                        })
                        .or_insert_with(|| gateway_user(location_id, user));
                }
            }
            let mut rows: Vec<GatewayUser> = by_id.into_values().collect();
            for row in &mut rows {
                row.location_ids.sort();
                row.device_names.sort();
            }
            rows
        }
    }
}

/// Merge attendance records gathered from several Locations into one
/// ordered list: concatenate, then sort by `(location_id, date, user_id)`
/// so the merged response is deterministic regardless of the order
/// Locations answered in.
pub fn merge_attendance(per_location: Vec<Vec<AttendanceRecord>>) -> Vec<AttendanceRecord> {
    let mut merged: Vec<AttendanceRecord> = per_location.into_iter().flatten().collect();
    merged.sort_by(|a, b| {
        a.location_id
            .cmp(&b.location_id)
            .then_with(|| a.date.cmp(&b.date))
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    merged
}

/// Merge per-Location daily summaries for the same calendar date into one:
/// sum every integer field, then recompute `attendance_rate` from the
/// summed counts. Never sums or averages the per-Location rates
/// themselves - that would silently misweight Locations of different
/// sizes.
pub fn merge_daily_summaries(per_location: Vec<DailySummary>) -> Vec<DailySummary> {
    let mut by_date: BTreeMap<NaiveDate, DailySummary> = BTreeMap::new();
    for summary in per_location {
        by_date
            .entry(summary.date)
            .and_modify(|existing| {
                existing.total_users += summary.total_users;
                existing.present += summary.present;
                existing.absent += summary.absent;
                existing.holiday += summary.holiday;
                existing.weekend += summary.weekend;
                existing.location_id = None;
                existing.device_name = None;
            })
            .or_insert(summary);
    }
    by_date
        .into_values()
        .map(|mut summary| {
            summary.attendance_rate = common_hours::attendance_rate(summary.present, summary.total_users);
            summary
        })
        .collect()
}

pub fn bigdecimal_zero() -> BigDecimal {
    BigDecimal::from(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, name: &str) -> User {
        User {
            user_id: id.to_string(),
            name: name.to_string(),
            card_no: None,
            privilege: None,
            device_names: vec!["front-door".to_string()],
        }
    }

    #[test]
    fn per_location_mode_keeps_duplicate_user_ids_separate() {
        let per_location = vec![
            ("loc-a".to_string(), vec![user("u1", "Alice")]),
            ("loc-b".to_string(), vec![user("u1", "Alice")]),
        ];
        let merged = merge_users(per_location, UserMergeMode::PerLocation);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn by_user_id_mode_collapses_and_unions_locations() {
        let per_location = vec![
            ("loc-a".to_string(), vec![user("u1", "Alice")]),
            ("loc-b".to_string(), vec![user("u1", "Alice")]),
        ];
        let merged = merge_users(per_location, UserMergeMode::ByUserId);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].location_ids, vec!["loc-a".to_string(), "loc-b".to_string()]);
    }

    fn record(location_id: &str, user_id: &str, date: NaiveDate) -> AttendanceRecord {
        AttendanceRecord {
            user_id: user_id.to_string(),
            user_name: user_id.to_string(),
            date,
            location_id: Some(location_id.to_string()),
            first_in: None,
            last_out: None,
            total_hours: bigdecimal_zero(),
            is_working_day: true,
            is_holiday: false,
            holiday_name: None,
            status: location_service::AttendanceStatus::Absent,
        }
    }

    #[test]
    fn attendance_merge_sorts_by_location_then_date_then_user() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        let per_location = vec![
            vec![record("loc-b", "u2", date)],
            vec![record("loc-a", "u1", date), record("loc-a", "u2", date)],
        ];
        let merged = merge_attendance(per_location);
        let keys: Vec<(Option<String>, String)> = merged.into_iter().map(|r| (r.location_id, r.user_id)).collect();
        assert_eq!(
            keys,
            vec![
                (Some("loc-a".to_string()), "u1".to_string()),
                (Some("loc-a".to_string()), "u2".to_string()),
                (Some("loc-b".to_string()), "u2".to_string()),
            ]
        );
    }

    fn summary(location_id: &str, date: NaiveDate, total: u32, present: u32) -> DailySummary {
        DailySummary {
            date,
            location_id: Some(location_id.to_string()),
            device_name: None,
            total_users: total,
            present,
            absent: total - present,
            holiday: 0,
            weekend: 0,
            attendance_rate: common_hours::attendance_rate(present, total),
        }
    }

    #[test]
    fn summary_merge_sums_counts_and_recomputes_rate() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        let merged = merge_daily_summaries(vec![summary("loc-a", date, 10, 8), summary("loc-b", date, 5, 1)]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].total_users, 15);
        assert_eq!(merged[0].present, 9);
        // 9/15 = 0.6000, not the average of 0.8000 and 0.2000.
        assert_eq!(merged[0].attendance_rate.to_string(), "0.6000");
    }
}

use chrono::NaiveDateTime;
use sqlx::mysql::MySqlRow;
use sqlx::Row;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// `state_flag` value FAS writes for a currently employed worker.
const EMPLOYED_STATE: &str = "1";

/// Employee master record from the legacy `employee` table, joined with
/// `partner` for the company name. Legacy columns are nullable in practice
/// whatever the schema says, so string fields decode through `Option`.
#[derive(Debug, Clone)]
pub struct FasEmployee {
    pub empl_cd: String,
    pub name: String,
    pub part_cd: String,
    pub company_name: String,
    pub phone: String,
    pub social_no: String,
    pub role_cd: String,
    pub state_flag: String,
    pub viol_cnt: i64,
    pub updated_at: Option<NaiveDateTime>,
}

impl FasEmployee {
    pub(crate) fn from_row(row: &MySqlRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            empl_cd: opt_string(row, "empl_cd")?,
            name: opt_string(row, "empl_nm")?,
            part_cd: opt_string(row, "part_cd")?,
            company_name: opt_string(row, "part_nm")?,
            phone: opt_string(row, "tel_no")?,
            social_no: opt_string(row, "social_no")?,
            role_cd: opt_string(row, "role_cd")?,
            state_flag: opt_string(row, "state_flag")?,
            viol_cnt: row.try_get::<Option<i64>, _>("viol_cnt")?.unwrap_or(0),
            updated_at: row.try_get("update_dt")?,
        })
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state_flag == EMPLOYED_STATE
    }
}

/// One worker-day of attendance, in the shape of the `access_daily` summary
/// table. Rows reconstructed from the raw event tables are normalized into
/// this shape before merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FasAttendance {
    pub empl_cd: String,
    /// `YYYYMMDD`
    pub accs_day: String,
    /// `HHMM`, `None` when the source had no check-in.
    pub in_time: Option<String>,
    /// `HHMM`, `None` when the worker has not checked out.
    pub out_time: Option<String>,
    pub state: i64,
    pub part_cd: String,
}

impl FasAttendance {
    pub(crate) fn from_row(row: &MySqlRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            empl_cd: opt_string(row, "empl_cd")?,
            accs_day: opt_string(row, "accs_day")?,
            in_time: non_empty(row.try_get("in_time")?),
            out_time: non_empty(row.try_get("out_time")?),
            state: row.try_get::<Option<i64>, _>("state")?.unwrap_or(0),
            part_cd: opt_string(row, "part_cd")?,
        })
    }
}

fn opt_string(row: &MySqlRow, column: &str) -> Result<String, sqlx::Error> {
    Ok(row.try_get::<Option<String>, _>(column)?.unwrap_or_default())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|time| !time.is_empty() && time != "0000")
}

/// Folds a record into the per-(worker, day) map. When several sources
/// report the same worker-day, the earliest check-in wins, the latest
/// check-out wins, and the first non-empty company code sticks.
pub(crate) fn merge_attendance(
    by_worker_day: &mut HashMap<(String, String), FasAttendance>,
    record: FasAttendance,
) {
    let key = (record.empl_cd.clone(), record.accs_day.clone());
    match by_worker_day.entry(key) {
        Entry::Vacant(slot) => {
            slot.insert(record);
        }
        Entry::Occupied(mut slot) => {
            let merged = slot.get_mut();
            if let Some(in_time) = record.in_time {
                if merged.in_time.as_ref().is_none_or(|kept| in_time < *kept) {
                    merged.in_time = Some(in_time);
                }
            }
            if let Some(out_time) = record.out_time {
                if merged.out_time.as_ref().is_none_or(|kept| out_time > *kept) {
                    merged.out_time = Some(out_time);
                }
            }
            if merged.part_cd.is_empty() && !record.part_cd.is_empty() {
                merged.part_cd = record.part_cd;
            }
        }
    }
}

/// Ascending by check-in time, records without one last.
pub(crate) fn sort_by_in_time(mut records: Vec<FasAttendance>) -> Vec<FasAttendance> {
    records.sort_by(|a, b| match (&a.in_time, &b.in_time) {
        (Some(left), Some(right)) => left.cmp(right),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(empl_cd: &str, in_time: Option<&str>, out_time: Option<&str>) -> FasAttendance {
        FasAttendance {
            empl_cd: empl_cd.to_string(),
            accs_day: "20260310".to_string(),
            in_time: in_time.map(str::to_string),
            out_time: out_time.map(str::to_string),
            state: 1,
            part_cd: String::new(),
        }
    }

    #[test]
    fn test_merge_takes_earliest_in_and_latest_out() {
        let mut by_worker_day = HashMap::new();
        merge_attendance(&mut by_worker_day, record("7", Some("0800"), None));
        merge_attendance(&mut by_worker_day, record("7", Some("0750"), Some("1700")));

        let merged = &by_worker_day[&("7".to_string(), "20260310".to_string())];
        assert_eq!(merged.in_time.as_deref(), Some("0750"));
        assert_eq!(merged.out_time.as_deref(), Some("1700"));
    }

    #[test]
    fn test_merge_keeps_distinct_days_apart() {
        let mut by_worker_day = HashMap::new();
        let mut other_day = record("7", Some("0900"), None);
        other_day.accs_day = "20260311".to_string();

        merge_attendance(&mut by_worker_day, record("7", Some("0800"), None));
        merge_attendance(&mut by_worker_day, other_day);
        assert_eq!(by_worker_day.len(), 2);
    }

    #[test]
    fn test_merge_keeps_first_company_code() {
        let mut by_worker_day = HashMap::new();
        let mut first = record("7", Some("0800"), None);
        first.part_cd = "P01".to_string();
        let mut second = record("7", Some("0750"), None);
        second.part_cd = "P99".to_string();

        merge_attendance(&mut by_worker_day, first);
        merge_attendance(&mut by_worker_day, second);

        let merged = &by_worker_day[&("7".to_string(), "20260310".to_string())];
        assert_eq!(merged.part_cd, "P01");
        assert_eq!(merged.in_time.as_deref(), Some("0750"));
    }

    #[test]
    fn test_sort_orders_missing_in_time_last() {
        let sorted = sort_by_in_time(vec![
            record("1", None, None),
            record("2", Some("0930"), None),
            record("3", Some("0710"), None),
        ]);

        let order: Vec<&str> = sorted.iter().map(|r| r.empl_cd.as_str()).collect();
        assert_eq!(order, ["3", "2", "1"]);
    }

    #[test]
    fn test_active_follows_state_flag() {
        let mut employee = FasEmployee {
            empl_cd: "7".to_string(),
            name: "Kim".to_string(),
            part_cd: String::new(),
            company_name: String::new(),
            phone: String::new(),
            social_no: String::new(),
            role_cd: String::new(),
            state_flag: "1".to_string(),
            viol_cnt: 0,
            updated_at: None,
        };
        assert!(employee.is_active());

        employee.state_flag = "9".to_string();
        assert!(!employee.is_active());
    }
}

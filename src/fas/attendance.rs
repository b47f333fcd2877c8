//! Attendance reads with the three-tier source fallback.
//!
//! Deployments differ in which tables exist and which are populated:
//! `access_daily` is a precomputed per-day summary, `access` holds raw gate
//! events for the current period, `access_history` holds archived events.
//! Reads prefer the summary and reconstruct from the raw tables when it is
//! empty or missing. A source that errors is logged and skipped; only when
//! every candidate fails does the read itself fail.

use sqlx::mysql::MySqlRow;
use std::collections::HashMap;
use tracing::debug;

use crate::fas::employee::bind_all;
use crate::fas::model::{merge_attendance, sort_by_in_time, FasAttendance};
use crate::fas::{day_with_dash, query_with_timeout, FasError, FasGateway};

/// Outcome of a single worker's attendance check for one day.
pub struct WorkerAttendance {
    pub has_attendance: bool,
    pub records: Vec<FasAttendance>,
}

impl FasGateway {
    fn daily_summary_sql(&self, scoped_to_worker: bool) -> String {
        let mut sql = format!(
            "SELECT ad.empl_cd, ad.accs_day, ad.in_time, ad.out_time, ad.state, ad.part_cd \
             FROM {} ad \
             WHERE ad.site_cd = ? AND ad.accs_day = ? \
               AND ad.in_time IS NOT NULL AND ad.in_time != '' AND ad.in_time != '0000'",
            self.tbl("access_daily"),
        );
        if scoped_to_worker {
            sql.push_str(" AND ad.empl_cd = ?");
        }
        sql
    }

    /// Reconstructs summary-shaped rows from a raw gate-event table:
    /// earliest event as check-in, latest as check-out.
    fn raw_events_sql(&self, table: &str, scoped_to_worker: bool) -> String {
        let mut sql = format!(
            "SELECT a.empl_cd, DATE_FORMAT(a.accs_dt, '%Y%m%d') AS accs_day, \
                    DATE_FORMAT(MIN(a.accs_dt), '%H%i') AS in_time, \
                    DATE_FORMAT(MAX(a.accs_dt), '%H%i') AS out_time, \
                    1 AS state, MAX(a.part_cd) AS part_cd \
             FROM {} a \
             WHERE a.site_cd = ? AND DATE(a.accs_dt) = ?",
            self.tbl(table),
        );
        if scoped_to_worker {
            sql.push_str(" AND a.empl_cd = ?");
        }
        sql.push_str(" GROUP BY a.empl_cd, DATE_FORMAT(a.accs_dt, '%Y%m%d')");
        sql
    }

    async fn fetch_candidate(
        &self,
        pool: &sqlx::MySqlPool,
        label: &str,
        sql: &str,
        params: &[String],
    ) -> Result<Vec<FasAttendance>, FasError> {
        let rows: Vec<MySqlRow> = query_with_timeout(bind_all(sql, params).fetch_all(pool)).await?;
        rows.iter()
            .map(FasAttendance::from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(FasError::Query)
            .inspect(|records| debug!(source = label, rows = records.len(), "FAS attendance read"))
    }

    /// All attendance for one day at the gateway's site.
    ///
    /// # Errors
    /// Returns [`FasError::AllSourcesFailed`] only when the summary and both
    /// raw-event tables all error; a partial outage degrades to whatever the
    /// surviving sources report.
    pub async fn daily_attendance(&self, accs_day: &str) -> Result<Vec<FasAttendance>, FasError> {
        let pool = self.acquire().await?;
        let summary_params = [self.site_cd().to_string(), accs_day.to_string()];

        let summary_failed = match self
            .fetch_candidate(
                &pool,
                "access_daily",
                &self.daily_summary_sql(false),
                &summary_params,
            )
            .await
        {
            Ok(records) if !records.is_empty() => return Ok(sort_by_in_time(records)),
            Ok(_) => false,
            Err(err) => {
                debug!("FAS daily summary unavailable: {err}");
                true
            }
        };

        let raw_params = [self.site_cd().to_string(), day_with_dash(accs_day)];
        let mut by_worker_day = HashMap::new();
        let mut failures = 0;
        for table in ["access", "access_history"] {
            match self
                .fetch_candidate(&pool, table, &self.raw_events_sql(table, false), &raw_params)
                .await
            {
                Ok(records) => {
                    for record in records {
                        merge_attendance(&mut by_worker_day, record);
                    }
                }
                Err(err) => {
                    failures += 1;
                    debug!(source = table, "FAS attendance source failed: {err}");
                }
            }
        }

        if failures == 2 && summary_failed {
            return Err(FasError::AllSourcesFailed);
        }
        Ok(sort_by_in_time(by_worker_day.into_values().collect()))
    }

    /// Did one worker attend on `accs_day`? Checks all three sources and
    /// merges, so a worker only present in the archive still verifies.
    ///
    /// # Errors
    /// Returns [`FasError::AllSourcesFailed`] only when every source errors,
    /// which callers treat differently from a definite "absent".
    pub async fn check_worker_attendance(
        &self,
        empl_cd: &str,
        accs_day: &str,
    ) -> Result<WorkerAttendance, FasError> {
        let pool = self.acquire().await?;

        let summary_params = [
            self.site_cd().to_string(),
            accs_day.to_string(),
            empl_cd.to_string(),
        ];
        let raw_params = [
            self.site_cd().to_string(),
            day_with_dash(accs_day),
            empl_cd.to_string(),
        ];

        let candidates = [
            ("access_daily", self.daily_summary_sql(true), &summary_params),
            ("access", self.raw_events_sql("access", true), &raw_params),
            (
                "access_history",
                self.raw_events_sql("access_history", true),
                &raw_params,
            ),
        ];

        let mut by_worker_day = HashMap::new();
        let mut failures = 0usize;
        for (label, sql, params) in &candidates {
            match self.fetch_candidate(&pool, label, sql, *params).await {
                Ok(records) => {
                    for record in records {
                        merge_attendance(&mut by_worker_day, record);
                    }
                }
                Err(err) => {
                    failures += 1;
                    debug!(source = label, "FAS attendance source failed: {err}");
                }
            }
        }

        if failures == candidates.len() {
            return Err(FasError::AllSourcesFailed);
        }

        let records = sort_by_in_time(by_worker_day.into_values().collect());
        Ok(WorkerAttendance {
            has_attendance: !records.is_empty(),
            records,
        })
    }
}

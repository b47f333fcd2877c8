//! Gateway to FAS, the site's legacy attendance system (MariaDB).
//!
//! FAS was never designed for this access pattern: deployments sit at
//! different schema migration stages, so attendance may live in a
//! precomputed daily table, in raw gate-event tables, or both. The gateway
//! owns connection caching, query timeouts and the multi-source merge;
//! callers only see employee and attendance records.

pub mod attendance;
pub mod employee;
pub mod model;
pub mod pool;
pub mod source;

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Timelike, Utc};
use sqlx::mysql::MySqlPool;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub use attendance::WorkerAttendance;
pub use model::{FasAttendance, FasEmployee};
pub use pool::FasPool;
pub use source::{FasSource, FasTarget};

pub(crate) const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Sites run on KST regardless of where the service runs.
const KST_OFFSET_SECS: i32 = 9 * 3600;

/// Gate hardware flushes the previous day's events until early morning, so
/// the attendance day rolls over at 05:00, not midnight.
const DAY_CUTOVER_HOUR: u32 = 5;

#[derive(Debug, Error)]
pub enum FasError {
    #[error("FAS query timed out after {0:?}")]
    Timeout(Duration),
    #[error("FAS connection failed: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("FAS query failed: {0}")]
    Query(#[from] sqlx::Error),
    #[error("every FAS attendance source failed")]
    AllSourcesFailed,
}

/// Pooled FAS client bound to one connection target and one logical source
/// (site code + database the legacy tables live in).
pub struct FasGateway {
    pool: FasPool,
    target: FasTarget,
    source: FasSource,
}

impl FasGateway {
    #[must_use]
    pub fn new(target: FasTarget, source: FasSource) -> Self {
        Self {
            pool: FasPool::new(),
            target,
            source,
        }
    }

    #[must_use]
    pub fn site_cd(&self) -> &str {
        &self.source.site_cd
    }

    /// Qualifies a table with the source database unless it is the one the
    /// pool connects to; employee and attendance tables may live in a
    /// different logical database than the connection default.
    pub(crate) fn tbl(&self, table: &str) -> String {
        self.source.qualify(self.target.database(), table)
    }

    pub(crate) async fn acquire(&self) -> Result<MySqlPool, FasError> {
        self.pool.acquire(&self.target).await
    }

    /// Evicts and closes idle cached connections; wired to a timer by the
    /// server so borrows never pay for cleanup.
    pub async fn sweep(&self) {
        self.pool.sweep().await;
    }
}

/// Races a query against the fixed deadline; a timeout resolves to a
/// definite [`FasError::Timeout`] instead of hanging the login path. The
/// underlying operation may still complete in the background.
pub(crate) async fn query_with_timeout<T>(
    fut: impl Future<Output = Result<T, sqlx::Error>>,
) -> Result<T, FasError> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result.map_err(FasError::Query),
        Err(_) => Err(FasError::Timeout(QUERY_TIMEOUT)),
    }
}

/// Attendance day (`YYYYMMDD`) for a wall-clock instant, in KST with the
/// 05:00 cutover: 04:59 still belongs to the previous day.
#[must_use]
pub fn attendance_day(now: DateTime<Utc>) -> String {
    let offset = FixedOffset::east_opt(KST_OFFSET_SECS).expect("fixed KST offset");
    let mut local = now.with_timezone(&offset);
    if local.hour() < DAY_CUTOVER_HOUR {
        local -= ChronoDuration::days(1);
    }
    local.format("%Y%m%d").to_string()
}

/// `YYYYMMDD` → `YYYY-MM-DD` for the raw event tables, which filter on
/// `DATE(accs_dt)`.
pub(crate) fn day_with_dash(accs_day: &str) -> String {
    if accs_day.len() == 8 {
        format!(
            "{}-{}-{}",
            &accs_day[..4],
            &accs_day[4..6],
            &accs_day[6..8]
        )
    } else {
        accs_day.to_string()
    }
}

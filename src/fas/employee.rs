//! Employee lookups against the legacy `employee`/`partner` tables.

use sqlx::mysql::{MySqlArguments, MySqlRow};
use sqlx::query::Query;
use sqlx::MySql;

use crate::fas::model::FasEmployee;
use crate::fas::{query_with_timeout, FasError, FasGateway};

const EMPLOYEE_COLUMNS: &str = "e.empl_cd, e.empl_nm, e.part_cd, e.tel_no, e.social_no, \
     e.role_cd, e.state_flag, e.viol_cnt, e.update_dt, p.part_nm";

pub(crate) fn bind_all<'q>(sql: &'q str, params: &'q [String]) -> Query<'q, MySql, MySqlArguments> {
    let mut query = sqlx::query(sql);
    for param in params {
        query = query.bind(param);
    }
    query
}

impl FasGateway {
    fn employee_from_clause(&self) -> String {
        format!(
            "FROM {} e LEFT JOIN {} p ON e.site_cd = p.site_cd AND e.part_cd = p.part_cd",
            self.tbl("employee"),
            self.tbl("partner"),
        )
    }

    /// Finds the site's employee record for a phone number. Both sides are
    /// compared with dashes stripped; FAS operators type phone numbers in
    /// every format imaginable.
    ///
    /// # Errors
    /// Connection failures, query errors and timeouts surface as
    /// [`FasError`]; an absent employee is `Ok(None)`.
    pub async fn employee_by_phone(&self, phone: &str) -> Result<Option<FasEmployee>, FasError> {
        let pool = self.acquire().await?;
        let normalized = phone.replace('-', "");

        let sql = format!(
            "SELECT {EMPLOYEE_COLUMNS} {} \
             WHERE e.site_cd = ? AND REPLACE(e.tel_no, '-', '') = ? \
             LIMIT 1",
            self.employee_from_clause(),
        );
        let params = [self.site_cd().to_string(), normalized];

        let row: Option<MySqlRow> =
            query_with_timeout(bind_all(&sql, &params).fetch_optional(&pool)).await?;
        row.map(|row| FasEmployee::from_row(&row))
            .transpose()
            .map_err(FasError::Query)
    }

    /// Employee record by FAS employee code.
    ///
    /// # Errors
    /// See [`FasGateway::employee_by_phone`].
    pub async fn employee_info(&self, empl_cd: &str) -> Result<Option<FasEmployee>, FasError> {
        let pool = self.acquire().await?;

        let sql = format!(
            "SELECT {EMPLOYEE_COLUMNS} {} \
             WHERE e.site_cd = ? AND e.empl_cd = ? \
             LIMIT 1",
            self.employee_from_clause(),
        );
        let params = [self.site_cd().to_string(), empl_cd.to_string()];

        let row: Option<MySqlRow> =
            query_with_timeout(bind_all(&sql, &params).fetch_optional(&pool)).await?;
        row.map(|row| FasEmployee::from_row(&row))
            .transpose()
            .map_err(FasError::Query)
    }
}

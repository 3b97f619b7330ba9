use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{mysql::MySqlPoolOptions, MySqlPool};
use tokio::sync::OnceCell;

use crate::auth::{Role, Session};
use crate::dates::DateRange;
use crate::store::{MetricsStore, SettingsStore, StoreError, SyncedReportRecord, TokenLogEntry};
use crate::token::StoredToken;

static POOL: OnceCell<MySqlPool> = OnceCell::const_new();

async fn ensure_schema(pool: &MySqlPool) -> Result<(), sqlx::Error> {
  // Idempotent; runs once per cold start.
  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS users (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        username VARCHAR(128) NOT NULL,
        password_hash VARCHAR(255) NOT NULL,
        name VARCHAR(128) NOT NULL,
        phone VARCHAR(64) NULL,
        company VARCHAR(128) NULL,
        plan VARCHAR(32) NOT NULL DEFAULT 'basic',
        status VARCHAR(16) NOT NULL DEFAULT 'active',
        role VARCHAR(16) NOT NULL DEFAULT 'client',
        meta_account_id VARCHAR(64) NULL,
        campaign_id VARCHAR(64) NULL,
        created_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
        updated_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3) ON UPDATE CURRENT_TIMESTAMP(3),
        UNIQUE KEY uq_users_username (username),
        KEY idx_users_created (created_at)
      );
    "#,
  )
  .execute(pool)
  .await?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS sessions (
        id CHAR(36) PRIMARY KEY,
        user_id BIGINT NOT NULL,
        role VARCHAR(16) NOT NULL,
        expires_at TIMESTAMP(3) NOT NULL,
        created_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
        KEY idx_sessions_user (user_id)
      );
    "#,
  )
  .execute(pool)
  .await?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS meta_reports (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        client_id VARCHAR(128) NOT NULL,
        account_id VARCHAR(64) NOT NULL,
        campaign_id VARCHAR(64) NOT NULL,
        campaign_name VARCHAR(512) NOT NULL,
        date DATE NOT NULL,
        impressions BIGINT NOT NULL,
        clicks BIGINT NOT NULL,
        ctr DOUBLE NOT NULL,
        cpc DOUBLE NOT NULL,
        cpm DOUBLE NOT NULL,
        spend DOUBLE NOT NULL,
        reach BIGINT NOT NULL,
        frequency DOUBLE NOT NULL,
        conversions BIGINT NOT NULL,
        cost_per_conversion DOUBLE NOT NULL,
        synced_at TIMESTAMP(3) NOT NULL,
        UNIQUE KEY uq_meta_reports_day (client_id, campaign_id, date),
        KEY idx_meta_reports_client_date (client_id, date)
      );
    "#,
  )
  .execute(pool)
  .await?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS report_history (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        client_id VARCHAR(128) NOT NULL,
        start_date DATE NOT NULL,
        end_date DATE NOT NULL,
        report_json LONGTEXT NOT NULL,
        created_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
        KEY idx_report_history_client (client_id, created_at)
      );
    "#,
  )
  .execute(pool)
  .await?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS reports (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        user_id BIGINT NOT NULL,
        period VARCHAR(64) NOT NULL,
        payload_json LONGTEXT NOT NULL,
        created_by VARCHAR(128) NULL,
        created_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
        KEY idx_reports_user_created (user_id, created_at)
      );
    "#,
  )
  .execute(pool)
  .await?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS settings (
        setting_key VARCHAR(128) PRIMARY KEY,
        value TEXT NOT NULL,
        expires_at TIMESTAMP(3) NULL,
        updated_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3) ON UPDATE CURRENT_TIMESTAMP(3)
      );
    "#,
  )
  .execute(pool)
  .await?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS token_logs (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        action VARCHAR(32) NOT NULL,
        status VARCHAR(16) NOT NULL,
        expires_at TIMESTAMP(3) NULL,
        error_message TEXT NULL,
        created_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
        KEY idx_token_logs_created (created_at)
      );
    "#,
  )
  .execute(pool)
  .await?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS meta_connections (
        client_id VARCHAR(128) PRIMARY KEY,
        access_token TEXT NOT NULL,
        updated_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3) ON UPDATE CURRENT_TIMESTAMP(3)
      );
    "#,
  )
  .execute(pool)
  .await?;

  Ok(())
}

pub async fn get_pool(database_url: &str) -> Result<&'static MySqlPool, sqlx::Error> {
  POOL
    .get_or_try_init(|| async move {
      let pool = MySqlPoolOptions::new().max_connections(5).connect(database_url).await?;
      ensure_schema(&pool).await?;
      Ok::<_, sqlx::Error>(pool)
    })
    .await
}

/// `SettingsStore` and `MetricsStore` over the shared pool.
#[derive(Clone)]
pub struct MySqlStore {
  pool: MySqlPool,
}

impl MySqlStore {
  pub fn new(pool: &MySqlPool) -> Self {
    Self { pool: pool.clone() }
  }
}

type ReportTuple = (
  String,
  String,
  String,
  String,
  NaiveDate,
  i64,
  i64,
  f64,
  f64,
  f64,
  f64,
  i64,
  f64,
  i64,
  f64,
  DateTime<Utc>,
);

const REPORT_COLUMNS: &str = "client_id, account_id, campaign_id, campaign_name, date, impressions, clicks, \
  ctr, cpc, cpm, spend, reach, frequency, conversions, cost_per_conversion, synced_at";

fn record_from_tuple(t: ReportTuple) -> SyncedReportRecord {
  let (
    client_id,
    account_id,
    campaign_id,
    campaign_name,
    date,
    impressions,
    clicks,
    ctr,
    cpc,
    cpm,
    spend,
    reach,
    frequency,
    conversions,
    cost_per_conversion,
    synced_at,
  ) = t;
  SyncedReportRecord {
    client_id,
    account_id,
    campaign_id,
    campaign_name,
    date,
    impressions,
    clicks,
    ctr,
    cpc,
    cpm,
    spend,
    reach,
    frequency,
    conversions,
    cost_per_conversion,
    synced_at,
  }
}

#[async_trait]
impl SettingsStore for MySqlStore {
  async fn get_setting(&self, key: &str) -> Result<Option<StoredToken>, StoreError> {
    let row = sqlx::query_as::<_, (String, Option<DateTime<Utc>>, DateTime<Utc>)>(
      r#"
        SELECT value, expires_at, updated_at
        FROM settings
        WHERE setting_key = ?
        LIMIT 1;
      "#,
    )
    .bind(key)
    .fetch_optional(&self.pool)
    .await?;

    Ok(row.map(|(value, expires_at, updated_at)| StoredToken {
      value,
      expires_at,
      updated_at: Some(updated_at),
    }))
  }

  async fn put_setting(&self, key: &str, value: &str, expires_at: Option<DateTime<Utc>>) -> Result<(), StoreError> {
    sqlx::query(
      r#"
        INSERT INTO settings (setting_key, value, expires_at)
        VALUES (?, ?, ?)
        ON DUPLICATE KEY UPDATE
          value = VALUES(value),
          expires_at = VALUES(expires_at),
          updated_at = CURRENT_TIMESTAMP(3);
      "#,
    )
    .bind(key)
    .bind(value)
    .bind(expires_at)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn tenant_token(&self, client_id: &str) -> Result<Option<String>, StoreError> {
    let row = sqlx::query_as::<_, (String,)>(
      r#"
        SELECT access_token
        FROM meta_connections
        WHERE client_id = ?
        LIMIT 1;
      "#,
    )
    .bind(client_id)
    .fetch_optional(&self.pool)
    .await?;
    Ok(row.map(|(token,)| token))
  }

  async fn append_token_log(&self, entry: &TokenLogEntry) -> Result<(), StoreError> {
    sqlx::query(
      r#"
        INSERT INTO token_logs (action, status, expires_at, error_message, created_at)
        VALUES (?, ?, ?, ?, ?);
      "#,
    )
    .bind(&entry.action)
    .bind(&entry.status)
    .bind(entry.expires_at)
    .bind(entry.error_message.as_deref())
    .bind(entry.created_at)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn recent_token_logs(&self, limit: u32) -> Result<Vec<TokenLogEntry>, StoreError> {
    let rows = sqlx::query_as::<_, (String, String, Option<DateTime<Utc>>, Option<String>, DateTime<Utc>)>(
      r#"
        SELECT action, status, expires_at, error_message, created_at
        FROM token_logs
        ORDER BY created_at DESC, id DESC
        LIMIT ?;
      "#,
    )
    .bind(limit)
    .fetch_all(&self.pool)
    .await?;

    Ok(
      rows
        .into_iter()
        .map(|(action, status, expires_at, error_message, created_at)| TokenLogEntry {
          action,
          status,
          expires_at,
          error_message,
          created_at,
        })
        .collect(),
    )
  }
}

#[async_trait]
impl MetricsStore for MySqlStore {
  async fn upsert_reports(&self, records: &[SyncedReportRecord]) -> Result<u64, StoreError> {
    let mut tx = self.pool.begin().await?;

    for r in records {
      sqlx::query(
        r#"
          INSERT INTO meta_reports
            (client_id, account_id, campaign_id, campaign_name, date, impressions, clicks,
             ctr, cpc, cpm, spend, reach, frequency, conversions, cost_per_conversion, synced_at)
          VALUES
            (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
          ON DUPLICATE KEY UPDATE
            account_id = VALUES(account_id),
            campaign_name = VALUES(campaign_name),
            impressions = VALUES(impressions),
            clicks = VALUES(clicks),
            ctr = VALUES(ctr),
            cpc = VALUES(cpc),
            cpm = VALUES(cpm),
            spend = VALUES(spend),
            reach = VALUES(reach),
            frequency = VALUES(frequency),
            conversions = VALUES(conversions),
            cost_per_conversion = VALUES(cost_per_conversion),
            synced_at = VALUES(synced_at);
        "#,
      )
      .bind(&r.client_id)
      .bind(&r.account_id)
      .bind(&r.campaign_id)
      .bind(&r.campaign_name)
      .bind(r.date)
      .bind(r.impressions)
      .bind(r.clicks)
      .bind(r.ctr)
      .bind(r.cpc)
      .bind(r.cpm)
      .bind(r.spend)
      .bind(r.reach)
      .bind(r.frequency)
      .bind(r.conversions)
      .bind(r.cost_per_conversion)
      .bind(r.synced_at)
      .execute(&mut *tx)
      .await?;
    }

    tx.commit().await?;
    Ok(records.len() as u64)
  }

  async fn reports_in_range(&self, client_id: &str, range: DateRange) -> Result<Vec<SyncedReportRecord>, StoreError> {
    let sql = format!(
      "SELECT {REPORT_COLUMNS} FROM meta_reports WHERE client_id = ? AND date >= ? AND date <= ? ORDER BY date ASC, campaign_id ASC;"
    );
    let rows = sqlx::query_as::<_, ReportTuple>(&sql)
      .bind(client_id)
      .bind(range.since)
      .bind(range.until)
      .fetch_all(&self.pool)
      .await?;
    Ok(rows.into_iter().map(record_from_tuple).collect())
  }

  async fn recent_reports(
    &self,
    client_id: Option<&str>,
    range: Option<DateRange>,
    limit: u32,
  ) -> Result<Vec<SyncedReportRecord>, StoreError> {
    let sql = format!(
      "SELECT {REPORT_COLUMNS} FROM meta_reports \
       WHERE (? IS NULL OR client_id = ?) AND (? IS NULL OR (date >= ? AND date <= ?)) \
       ORDER BY date DESC, campaign_id ASC LIMIT ?;"
    );
    let since = range.map(|r| r.since);
    let until = range.map(|r| r.until);
    let rows = sqlx::query_as::<_, ReportTuple>(&sql)
      .bind(client_id)
      .bind(client_id)
      .bind(since)
      .bind(since)
      .bind(until)
      .bind(limit)
      .fetch_all(&self.pool)
      .await?;
    Ok(rows.into_iter().map(record_from_tuple).collect())
  }

  async fn append_report_history(&self, client_id: &str, range: DateRange, report: &Value) -> Result<(), StoreError> {
    sqlx::query(
      r#"
        INSERT INTO report_history (client_id, start_date, end_date, report_json)
        VALUES (?, ?, ?, ?);
      "#,
    )
    .bind(client_id)
    .bind(range.since)
    .bind(range.until)
    .bind(report.to_string())
    .execute(&self.pool)
    .await?;
    Ok(())
  }
}

/// Account row without the password hash.
#[derive(Debug, Clone, Serialize)]
pub struct UserRow {
  pub id: i64,
  pub username: String,
  pub name: String,
  pub phone: Option<String>,
  pub company: Option<String>,
  pub plan: String,
  pub status: String,
  pub role: String,
  pub meta_account_id: Option<String>,
  pub campaign_id: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

type UserTuple = (
  i64,
  String,
  String,
  Option<String>,
  Option<String>,
  String,
  String,
  String,
  Option<String>,
  Option<String>,
  DateTime<Utc>,
  DateTime<Utc>,
);

const USER_COLUMNS: &str =
  "id, username, name, phone, company, plan, status, role, meta_account_id, campaign_id, created_at, updated_at";

fn user_from_tuple(t: UserTuple) -> UserRow {
  let (id, username, name, phone, company, plan, status, role, meta_account_id, campaign_id, created_at, updated_at) = t;
  UserRow {
    id,
    username,
    name,
    phone,
    company,
    plan,
    status,
    role,
    meta_account_id,
    campaign_id,
    created_at,
    updated_at,
  }
}

pub async fn fetch_user(pool: &MySqlPool, id: i64) -> Result<Option<UserRow>, sqlx::Error> {
  let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ? LIMIT 1;");
  let row = sqlx::query_as::<_, UserTuple>(&sql).bind(id).fetch_optional(pool).await?;
  Ok(row.map(user_from_tuple))
}

/// User plus stored password hash, for login only.
pub async fn fetch_user_credentials(pool: &MySqlPool, username: &str) -> Result<Option<(UserRow, String)>, sqlx::Error> {
  let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ? LIMIT 1;");
  let Some(user) = sqlx::query_as::<_, UserTuple>(&sql)
    .bind(username)
    .fetch_optional(pool)
    .await?
    .map(user_from_tuple)
  else {
    return Ok(None);
  };

  let hash = sqlx::query_scalar::<_, String>("SELECT password_hash FROM users WHERE id = ? LIMIT 1;")
    .bind(user.id)
    .fetch_one(pool)
    .await?;
  Ok(Some((user, hash)))
}

pub async fn update_password_hash(pool: &MySqlPool, id: i64, password_hash: &str) -> Result<(), sqlx::Error> {
  sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?;")
    .bind(password_hash)
    .bind(id)
    .execute(pool)
    .await?;
  Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
  pub search: Option<String>,
  pub status: Option<String>,
  pub plan: Option<String>,
  pub page: u32,
  pub limit: u32,
}

pub async fn list_users(pool: &MySqlPool, filter: &UserFilter) -> Result<(Vec<UserRow>, i64), sqlx::Error> {
  let pattern = filter.search.as_deref().map(|s| format!("%{s}%"));
  let where_clause = "(? IS NULL OR name LIKE ? OR username LIKE ?) AND (? IS NULL OR status = ?) AND (? IS NULL OR plan = ?)";

  let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM users WHERE {where_clause};"))
    .bind(pattern.as_deref())
    .bind(pattern.as_deref())
    .bind(pattern.as_deref())
    .bind(filter.status.as_deref())
    .bind(filter.status.as_deref())
    .bind(filter.plan.as_deref())
    .bind(filter.plan.as_deref())
    .fetch_one(pool)
    .await?;

  let limit = filter.limit.max(1);
  let offset = (filter.page.max(1) - 1).saturating_mul(limit);
  let sql = format!(
    "SELECT {USER_COLUMNS} FROM users WHERE {where_clause} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?;"
  );
  let rows = sqlx::query_as::<_, UserTuple>(&sql)
    .bind(pattern.as_deref())
    .bind(pattern.as_deref())
    .bind(pattern.as_deref())
    .bind(filter.status.as_deref())
    .bind(filter.status.as_deref())
    .bind(filter.plan.as_deref())
    .bind(filter.plan.as_deref())
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

  Ok((rows.into_iter().map(user_from_tuple).collect(), total))
}

pub async fn list_users_for_export(pool: &MySqlPool) -> Result<Vec<UserRow>, sqlx::Error> {
  let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, id DESC;");
  let rows = sqlx::query_as::<_, UserTuple>(&sql).fetch_all(pool).await?;
  Ok(rows.into_iter().map(user_from_tuple).collect())
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct UserStats {
  pub total: i64,
  pub active: i64,
  pub pending: i64,
  pub inactive: i64,
}

pub async fn user_stats(pool: &MySqlPool) -> Result<UserStats, sqlx::Error> {
  let (total, active, pending, inactive): (i64, i64, i64, i64) = sqlx::query_as(
    r#"
      SELECT
        COUNT(*),
        CAST(COALESCE(SUM(status = 'active'), 0) AS SIGNED),
        CAST(COALESCE(SUM(status = 'pending'), 0) AS SIGNED),
        CAST(COALESCE(SUM(status = 'inactive'), 0) AS SIGNED)
      FROM users;
    "#,
  )
  .fetch_one(pool)
  .await?;

  Ok(UserStats {
    total,
    active,
    pending,
    inactive,
  })
}

pub async fn username_taken(pool: &MySqlPool, username: &str, exclude_id: Option<i64>) -> Result<bool, sqlx::Error> {
  let row = sqlx::query_as::<_, (i64,)>(
    r#"
      SELECT id FROM users
      WHERE username = ? AND (? IS NULL OR id <> ?)
      LIMIT 1;
    "#,
  )
  .bind(username)
  .bind(exclude_id)
  .bind(exclude_id)
  .fetch_optional(pool)
  .await?;
  Ok(row.is_some())
}

#[derive(Debug, Clone)]
pub struct NewUser {
  pub username: String,
  pub password_hash: String,
  pub name: String,
  pub phone: Option<String>,
  pub plan: String,
  pub status: String,
  pub role: Role,
  pub meta_account_id: Option<String>,
  pub campaign_id: Option<String>,
}

pub async fn insert_user(pool: &MySqlPool, user: &NewUser) -> Result<UserRow, sqlx::Error> {
  let result = sqlx::query(
    r#"
      INSERT INTO users
        (username, password_hash, name, phone, company, plan, status, role, meta_account_id, campaign_id)
      VALUES
        (?, ?, ?, ?, NULL, ?, ?, ?, ?, ?);
    "#,
  )
  .bind(&user.username)
  .bind(&user.password_hash)
  .bind(&user.name)
  .bind(user.phone.as_deref())
  .bind(&user.plan)
  .bind(&user.status)
  .bind(user.role.as_str())
  .bind(user.meta_account_id.as_deref())
  .bind(user.campaign_id.as_deref())
  .execute(pool)
  .await?;

  let id = result.last_insert_id() as i64;
  fetch_user(pool, id).await?.ok_or(sqlx::Error::RowNotFound)
}

/// `None` leaves a column untouched; `Some(None)` clears a nullable one.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
  pub name: Option<String>,
  pub username: Option<String>,
  pub phone: Option<Option<String>>,
  pub company: Option<Option<String>>,
  pub plan: Option<String>,
  pub status: Option<String>,
  pub meta_account_id: Option<Option<String>>,
  pub campaign_id: Option<Option<String>>,
}

pub async fn update_user(pool: &MySqlPool, id: i64, update: &UserUpdate) -> Result<Option<UserRow>, sqlx::Error> {
  let set_flag = |v: &Option<Option<String>>| v.is_some();
  let inner = |v: &Option<Option<String>>| v.clone().flatten();

  sqlx::query(
    r#"
      UPDATE users SET
        name = COALESCE(?, name),
        username = COALESCE(?, username),
        phone = CASE WHEN ? THEN ? ELSE phone END,
        company = CASE WHEN ? THEN ? ELSE company END,
        plan = COALESCE(?, plan),
        status = COALESCE(?, status),
        meta_account_id = CASE WHEN ? THEN ? ELSE meta_account_id END,
        campaign_id = CASE WHEN ? THEN ? ELSE campaign_id END,
        updated_at = CURRENT_TIMESTAMP(3)
      WHERE id = ?;
    "#,
  )
  .bind(update.name.as_deref())
  .bind(update.username.as_deref())
  .bind(set_flag(&update.phone))
  .bind(inner(&update.phone))
  .bind(set_flag(&update.company))
  .bind(inner(&update.company))
  .bind(update.plan.as_deref())
  .bind(update.status.as_deref())
  .bind(set_flag(&update.meta_account_id))
  .bind(inner(&update.meta_account_id))
  .bind(set_flag(&update.campaign_id))
  .bind(inner(&update.campaign_id))
  .bind(id)
  .execute(pool)
  .await?;

  fetch_user(pool, id).await
}

pub async fn delete_user(pool: &MySqlPool, id: i64) -> Result<bool, sqlx::Error> {
  let mut tx = pool.begin().await?;
  sqlx::query("DELETE FROM sessions WHERE user_id = ?;")
    .bind(id)
    .execute(&mut *tx)
    .await?;
  let result = sqlx::query("DELETE FROM users WHERE id = ?;")
    .bind(id)
    .execute(&mut *tx)
    .await?;
  tx.commit().await?;
  Ok(result.rows_affected() > 0)
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientSummary {
  pub user_id: i64,
  pub username: String,
  pub name: String,
  pub meta_account_id: Option<String>,
}

pub async fn list_clients(pool: &MySqlPool) -> Result<Vec<ClientSummary>, sqlx::Error> {
  let rows = sqlx::query_as::<_, (i64, String, String, Option<String>)>(
    r#"
      SELECT id, username, name, meta_account_id
      FROM users
      WHERE role = 'client'
      ORDER BY username ASC;
    "#,
  )
  .fetch_all(pool)
  .await?;

  Ok(
    rows
      .into_iter()
      .map(|(user_id, username, name, meta_account_id)| ClientSummary {
        user_id,
        username,
        name,
        meta_account_id,
      })
      .collect(),
  )
}

pub async fn insert_session(pool: &MySqlPool, session: &Session) -> Result<(), sqlx::Error> {
  sqlx::query(
    r#"
      INSERT INTO sessions (id, user_id, role, expires_at)
      VALUES (?, ?, ?, ?);
    "#,
  )
  .bind(&session.id)
  .bind(session.user_id)
  .bind(session.role.as_str())
  .bind(session.expires_at)
  .execute(pool)
  .await?;
  Ok(())
}

/// Live session for `id`; expired rows and unknown roles read as absent.
pub async fn fetch_session(pool: &MySqlPool, id: &str, now: DateTime<Utc>) -> Result<Option<Session>, sqlx::Error> {
  let row = sqlx::query_as::<_, (String, i64, String, DateTime<Utc>)>(
    r#"
      SELECT id, user_id, role, expires_at
      FROM sessions
      WHERE id = ? AND expires_at > ?
      LIMIT 1;
    "#,
  )
  .bind(id)
  .bind(now)
  .fetch_optional(pool)
  .await?;

  Ok(row.and_then(|(id, user_id, role, expires_at)| {
    Some(Session {
      id,
      user_id,
      role: Role::parse(&role)?,
      expires_at,
    })
  }))
}

pub async fn delete_session(pool: &MySqlPool, id: &str) -> Result<(), sqlx::Error> {
  sqlx::query("DELETE FROM sessions WHERE id = ?;")
    .bind(id)
    .execute(pool)
    .await?;
  Ok(())
}

/// Admin-authored report shown on the client dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct ComposedReportRow {
  pub id: i64,
  pub user_id: i64,
  pub period: String,
  pub payload: Value,
  pub created_by: Option<String>,
  pub created_at: DateTime<Utc>,
}

type ComposedTuple = (i64, i64, String, String, Option<String>, DateTime<Utc>);

fn composed_from_tuple((id, user_id, period, payload_json, created_by, created_at): ComposedTuple) -> ComposedReportRow {
  ComposedReportRow {
    id,
    user_id,
    period,
    payload: serde_json::from_str(&payload_json).unwrap_or(Value::Null),
    created_by,
    created_at,
  }
}

pub async fn insert_composed_report(
  pool: &MySqlPool,
  user_id: i64,
  period: &str,
  payload: &Value,
  created_by: Option<&str>,
) -> Result<ComposedReportRow, sqlx::Error> {
  let result = sqlx::query(
    r#"
      INSERT INTO reports (user_id, period, payload_json, created_by)
      VALUES (?, ?, ?, ?);
    "#,
  )
  .bind(user_id)
  .bind(period)
  .bind(payload.to_string())
  .bind(created_by)
  .execute(pool)
  .await?;

  let row = sqlx::query_as::<_, ComposedTuple>(
    r#"
      SELECT id, user_id, period, payload_json, created_by, created_at
      FROM reports
      WHERE id = ?;
    "#,
  )
  .bind(result.last_insert_id() as i64)
  .fetch_one(pool)
  .await?;
  Ok(composed_from_tuple(row))
}

pub async fn latest_composed_report(pool: &MySqlPool, user_id: i64) -> Result<Option<ComposedReportRow>, sqlx::Error> {
  let row = sqlx::query_as::<_, ComposedTuple>(
    r#"
      SELECT id, user_id, period, payload_json, created_by, created_at
      FROM reports
      WHERE user_id = ?
      ORDER BY created_at DESC, id DESC
      LIMIT 1;
    "#,
  )
  .bind(user_id)
  .fetch_optional(pool)
  .await?;
  Ok(row.map(composed_from_tuple))
}

pub async fn list_composed_reports(
  pool: &MySqlPool,
  user_id: Option<i64>,
  limit: u32,
) -> Result<Vec<ComposedReportRow>, sqlx::Error> {
  let rows = sqlx::query_as::<_, ComposedTuple>(
    r#"
      SELECT id, user_id, period, payload_json, created_by, created_at
      FROM reports
      WHERE (? IS NULL OR user_id = ?)
      ORDER BY created_at DESC, id DESC
      LIMIT ?;
    "#,
  )
  .bind(user_id)
  .bind(user_id)
  .bind(limit)
  .fetch_all(pool)
  .await?;
  Ok(rows.into_iter().map(composed_from_tuple).collect())
}

use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use herald_common::{
    BatchId, BatchUpdate, DeliveryMode, Email, EmailBatch, EmailId, EmailStatus, EmailUpdate,
    audit::{AuditAction, AuditEvent, ErrorSnapshot},
    model::{MAX_RESPONSE_LEN, cap_len},
};
use serde::Deserialize;
use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};

use crate::{
    StoreError,
    r#trait::{AuditFilter, BackingStore, BatchFilter},
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS emails (
        id TEXT PRIMARY KEY NOT NULL,
        subject TEXT NOT NULL,
        body TEXT NOT NULL,
        owner TEXT,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT
    )",
    "CREATE INDEX IF NOT EXISTS emails_status ON emails (status)",
    "CREATE TABLE IF NOT EXISTS email_batches (
        id TEXT PRIMARY KEY NOT NULL,
        email_id TEXT NOT NULL REFERENCES emails (id),
        recipients TEXT NOT NULL,
        mode TEXT NOT NULL,
        status TEXT NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        last_attempted_at TEXT,
        sent_at TEXT,
        failed_at TEXT,
        last_error TEXT,
        error_code TEXT,
        response TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS email_batches_email ON email_batches (email_id, status)",
    "CREATE INDEX IF NOT EXISTS email_batches_status ON email_batches (status)",
    "CREATE TABLE IF NOT EXISTS audit_events (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        email_id TEXT NOT NULL,
        batch_id TEXT,
        action TEXT NOT NULL,
        details TEXT NOT NULL,
        error_message TEXT,
        error_code TEXT,
        metadata TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        actor TEXT
    )",
    "CREATE INDEX IF NOT EXISTS audit_events_email ON audit_events (email_id)",
    "CREATE INDEX IF NOT EXISTS audit_events_batch ON audit_events (batch_id)",
];

/// Configuration for the SQLite backing store
///
/// ```ron
/// store: Sqlite(
///     url: "sqlite:///var/lib/herald/herald.db",
///     max_connections: 8,
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a writer waits on a locked database
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

fn default_url() -> String {
    String::from("sqlite://herald.db")
}

const fn default_max_connections() -> u32 {
    8
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}

/// SQLite-backed store
///
/// Conditional updates are `UPDATE … WHERE status IN (…)` statements; zero
/// rows affected on an existing record is a missed precondition.
#[derive(Debug, Clone)]
pub struct SqliteBackingStore {
    pool: SqlitePool,
}

impl SqliteBackingStore {
    /// Open (creating if needed) the database and apply the schema.
    ///
    /// An in-memory url is pinned to a single long-lived connection, since
    /// every SQLite connection would otherwise get its own empty database.
    pub async fn connect(config: &SqliteConfig) -> crate::Result<Self> {
        let in_memory = config.url.contains(":memory:");

        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(config.max_connections.max(1))
                .connect_with(options)
                .await?
        };

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(url = %config.url, "SQLite store ready");

        Ok(store)
    }

    /// A fresh private in-memory database
    pub async fn in_memory() -> crate::Result<Self> {
        Self::connect(&SqliteConfig {
            url: String::from("sqlite::memory:"),
            ..SqliteConfig::default()
        })
        .await
    }

    async fn migrate(&self) -> crate::Result<()> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn email_exists(&self, id: EmailId) -> crate::Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM emails WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn batch_exists(&self, id: BatchId) -> crate::Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM email_batches WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn parse<T>(row: &SqliteRow, column: &str) -> crate::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e: T::Err| StoreError::Corrupted(format!("{column}: {e}")))
}

fn parse_opt<T>(row: &SqliteRow, column: &str) -> crate::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|raw| {
        raw.parse()
            .map_err(|e: T::Err| StoreError::Corrupted(format!("{column}: {e}")))
    })
    .transpose()
}

fn email_from_row(row: &SqliteRow) -> crate::Result<Email> {
    Ok(Email {
        id: parse(row, "id")?,
        subject: row.try_get("subject")?,
        body: row.try_get("body")?,
        owner: row.try_get("owner")?,
        status: parse(row, "status")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn mode_str(mode: DeliveryMode) -> &'static str {
    match mode {
        DeliveryMode::Individual => "INDIVIDUAL",
        DeliveryMode::Bcc => "BCC",
    }
}

fn mode_from_str(column: &str) -> crate::Result<DeliveryMode> {
    match column {
        "INDIVIDUAL" => Ok(DeliveryMode::Individual),
        "BCC" => Ok(DeliveryMode::Bcc),
        other => Err(StoreError::Corrupted(format!("mode: {other}"))),
    }
}

fn batch_from_row(row: &SqliteRow) -> crate::Result<EmailBatch> {
    let recipients: String = row.try_get("recipients")?;
    let mode: String = row.try_get("mode")?;

    Ok(EmailBatch {
        id: parse(row, "id")?,
        email_id: parse(row, "email_id")?,
        recipients: serde_json::from_str(&recipients)?,
        mode: mode_from_str(&mode)?,
        status: parse(row, "status")?,
        attempts: row.try_get("attempts")?,
        last_attempted_at: row.try_get("last_attempted_at")?,
        sent_at: row.try_get("sent_at")?,
        failed_at: row.try_get("failed_at")?,
        last_error: row.try_get("last_error")?,
        error_code: row.try_get("error_code")?,
        response: row.try_get("response")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn audit_from_row(row: &SqliteRow) -> crate::Result<AuditEvent> {
    let metadata: String = row.try_get("metadata")?;
    let error_message: Option<String> = row.try_get("error_message")?;
    let error_code: Option<String> = row.try_get("error_code")?;

    Ok(AuditEvent {
        id: parse(row, "id")?,
        email_id: parse(row, "email_id")?,
        batch_id: parse_opt(row, "batch_id")?,
        action: parse::<AuditAction>(row, "action")?,
        details: row.try_get("details")?,
        error: error_message.map(|message| ErrorSnapshot {
            message,
            code: error_code,
        }),
        metadata: serde_json::from_str(&metadata)?,
        timestamp: row.try_get("timestamp")?,
        actor: row.try_get("actor")?,
    })
}

#[async_trait]
impl BackingStore for SqliteBackingStore {
    async fn insert_email(&self, email: &Email) -> crate::Result<()> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO emails
                (id, subject, body, owner, status, created_at, updated_at, started_at, completed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(email.id.to_string())
        .bind(&email.subject)
        .bind(&email.body)
        .bind(&email.owner)
        .bind(email.status.as_str())
        .bind(email.created_at)
        .bind(email.updated_at)
        .bind(email.started_at)
        .bind(email.completed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists {
                kind: "Email",
                id: email.id.to_string(),
            });
        }

        Ok(())
    }

    async fn read_email(&self, id: EmailId) -> crate::Result<Email> {
        let row = sqlx::query("SELECT * FROM emails WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::email_not_found(id))?;

        email_from_row(&row)
    }

    async fn update_email(
        &self,
        id: EmailId,
        expected: Option<&[EmailStatus]>,
        update: &EmailUpdate,
    ) -> crate::Result<Option<Email>> {
        let set = match update {
            EmailUpdate::Start { .. } => {
                "status = 'SENDING', started_at = ?, completed_at = NULL, updated_at = ?"
            }
            EmailUpdate::Derived { .. } => {
                "status = ?, started_at = COALESCE(started_at, ?), completed_at = ?, updated_at = ?"
            }
            EmailUpdate::Reset { .. } => {
                "status = 'QUEUED', started_at = NULL, completed_at = NULL, updated_at = ?"
            }
            EmailUpdate::Fail { .. } => "status = 'FAILED', completed_at = ?, updated_at = ?",
        };

        let guard = expected.map_or_else(String::new, |statuses| {
            format!(" AND status IN ({})", placeholders(statuses.len()))
        });
        let sql = format!("UPDATE emails SET {set} WHERE id = ?{guard}");

        let mut query = sqlx::query(&sql);
        query = match *update {
            EmailUpdate::Start { at } => query.bind(at).bind(at),
            EmailUpdate::Derived { status, at } => {
                let started = (status != EmailStatus::Queued).then_some(at);
                let completed = status.is_terminal().then_some(at);
                query
                    .bind(status.as_str())
                    .bind(started)
                    .bind(completed)
                    .bind(at)
            }
            EmailUpdate::Reset { at } => query.bind(at),
            EmailUpdate::Fail { at } => query.bind(at).bind(at),
        };
        query = query.bind(id.to_string());
        for status in expected.unwrap_or_default() {
            query = query.bind(status.as_str());
        }

        if query.execute(&self.pool).await?.rows_affected() == 0 {
            return if self.email_exists(id).await? {
                Ok(None)
            } else {
                Err(StoreError::email_not_found(id))
            };
        }

        self.read_email(id).await.map(Some)
    }

    async fn list_emails(&self, statuses: Option<&[EmailStatus]>) -> crate::Result<Vec<Email>> {
        let sql = statuses.map_or_else(
            || String::from("SELECT * FROM emails ORDER BY id"),
            |statuses| {
                format!(
                    "SELECT * FROM emails WHERE status IN ({}) ORDER BY id",
                    placeholders(statuses.len())
                )
            },
        );

        let mut query = sqlx::query(&sql);
        for status in statuses.unwrap_or_default() {
            query = query.bind(status.as_str());
        }

        query
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(email_from_row)
            .collect()
    }

    async fn insert_batches(&self, batches: &[EmailBatch]) -> crate::Result<()> {
        let mut tx = self.pool.begin().await?;

        for batch in batches {
            sqlx::query(
                "INSERT INTO email_batches
                    (id, email_id, recipients, mode, status, attempts, last_attempted_at,
                     sent_at, failed_at, last_error, error_code, response, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(batch.id.to_string())
            .bind(batch.email_id.to_string())
            .bind(serde_json::to_string(&batch.recipients)?)
            .bind(mode_str(batch.mode))
            .bind(batch.status.as_str())
            .bind(batch.attempts)
            .bind(batch.last_attempted_at)
            .bind(batch.sent_at)
            .bind(batch.failed_at)
            .bind(&batch.last_error)
            .bind(&batch.error_code)
            .bind(&batch.response)
            .bind(batch.created_at)
            .bind(batch.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn read_batch(&self, id: BatchId) -> crate::Result<EmailBatch> {
        let row = sqlx::query("SELECT * FROM email_batches WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::batch_not_found(id))?;

        batch_from_row(&row)
    }

    async fn update_batch(
        &self,
        id: BatchId,
        update: &BatchUpdate,
    ) -> crate::Result<Option<EmailBatch>> {
        let set = match update {
            BatchUpdate::Claim { .. } => {
                "status = 'SENDING', attempts = attempts + 1, last_attempted_at = ?, updated_at = ?"
            }
            BatchUpdate::Sent { .. } => {
                "status = 'SENT', attempts = MAX(attempts, COALESCE(?, attempts)), sent_at = ?,
                 failed_at = NULL, response = ?, updated_at = ?"
            }
            BatchUpdate::Failed { .. } => {
                "status = 'FAILED', attempts = MAX(attempts, COALESCE(?, attempts)), failed_at = ?,
                 sent_at = NULL, last_error = ?, error_code = ?, updated_at = ?"
            }
            BatchUpdate::Reset { .. } => {
                "status = 'PENDING', attempts = 0, last_attempted_at = NULL, sent_at = NULL,
                 failed_at = NULL, last_error = NULL, error_code = NULL, response = NULL,
                 updated_at = ?"
            }
        };

        let allowed = update.allowed_from();
        let guard = allowed.map_or_else(String::new, |statuses| {
            format!(" AND status IN ({})", placeholders(statuses.len()))
        });
        let sql = format!("UPDATE email_batches SET {set} WHERE id = ?{guard}");

        let mut query = sqlx::query(&sql);
        query = match update {
            BatchUpdate::Claim { at } => query.bind(*at).bind(*at),
            BatchUpdate::Sent {
                at,
                attempts,
                response,
            } => query
                .bind(*attempts)
                .bind(*at)
                .bind(response.as_deref().map(|r| cap_len(r, MAX_RESPONSE_LEN)))
                .bind(*at),
            BatchUpdate::Failed {
                at,
                failure,
                attempts,
            } => query
                .bind(*attempts)
                .bind(*at)
                .bind(failure.message.clone())
                .bind(failure.code.clone())
                .bind(*at),
            BatchUpdate::Reset { at } => query.bind(*at),
        };
        query = query.bind(id.to_string());
        for status in allowed.unwrap_or_default() {
            query = query.bind(status.as_str());
        }

        if query.execute(&self.pool).await?.rows_affected() == 0 {
            return if self.batch_exists(id).await? {
                Ok(None)
            } else {
                Err(StoreError::batch_not_found(id))
            };
        }

        self.read_batch(id).await.map(Some)
    }

    async fn list_batches(&self, filter: &BatchFilter) -> crate::Result<Vec<EmailBatch>> {
        let mut clauses = Vec::new();
        if filter.email_id.is_some() {
            clauses.push(String::from("email_id = ?"));
        }
        if let Some(statuses) = &filter.statuses {
            clauses.push(format!("status IN ({})", placeholders(statuses.len())));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let sql = format!("SELECT * FROM email_batches{where_clause} ORDER BY created_at, id");

        let mut query = sqlx::query(&sql);
        if let Some(email_id) = filter.email_id {
            query = query.bind(email_id.to_string());
        }
        for status in filter.statuses.as_deref().unwrap_or_default() {
            query = query.bind(status.as_str());
        }

        query
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(batch_from_row)
            .collect()
    }

    async fn append_audit(&self, event: &AuditEvent) -> crate::Result<()> {
        sqlx::query(
            "INSERT INTO audit_events
                (id, email_id, batch_id, action, details, error_message, error_code, metadata,
                 timestamp, actor)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.id.to_string())
        .bind(event.email_id.to_string())
        .bind(event.batch_id.map(|id| id.to_string()))
        .bind(event.action.as_str())
        .bind(&event.details)
        .bind(event.error.as_ref().map(|e| e.message.clone()))
        .bind(event.error.as_ref().and_then(|e| e.code.clone()))
        .bind(serde_json::to_string(&event.metadata)?)
        .bind(event.timestamp)
        .bind(&event.actor)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_audit(&self, filter: AuditFilter) -> crate::Result<Vec<AuditEvent>> {
        let (sql, id) = match filter {
            AuditFilter::Email(id) => (
                "SELECT * FROM audit_events WHERE email_id = ? ORDER BY seq DESC",
                id.to_string(),
            ),
            AuditFilter::Batch(id) => (
                "SELECT * FROM audit_events WHERE batch_id = ? ORDER BY seq DESC",
                id.to_string(),
            ),
        };

        sqlx::query(sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(audit_from_row)
            .collect()
    }
}

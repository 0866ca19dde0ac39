use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::RequestStore;
use crate::models::{AccessRequest, Settlement};

const COLUMNS: &str = "id, requestor_name, login_name, system_name, access_type, reason, \
     requested_at, expires_at, status, responder_name, responder_handle, responded_at, \
     notification_message_ref, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RequestStore for PgStore {
    async fn insert(&self, request: &AccessRequest) -> anyhow::Result<bool> {
        // ON CONFLICT DO NOTHING keeps the existing row byte-for-byte intact
        let result = sqlx::query(
            r#"INSERT INTO access_requests
                   (id, requestor_name, login_name, system_name, access_type, reason,
                    requested_at, expires_at, status, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
               ON CONFLICT (id) DO NOTHING"#,
        )
        .bind(&request.id)
        .bind(&request.requestor_name)
        .bind(&request.login_name)
        .bind(&request.system_name)
        .bind(&request.access_type)
        .bind(&request.reason)
        .bind(request.requested_at)
        .bind(request.expires_at)
        .bind(request.status)
        .bind(request.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("insert access request failed: {:?}", e);
            e
        })?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<AccessRequest>> {
        let sql = format!("SELECT {} FROM access_requests WHERE id = $1", COLUMNS);
        let row = sqlx::query_as::<_, AccessRequest>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn attach_message_ref(&self, id: &str, message_ref: &str) -> anyhow::Result<()> {
        let result = sqlx::query(
            "UPDATE access_requests SET notification_message_ref = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(message_ref)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("request '{}' disappeared before its message ref was stored", id);
        }
        Ok(())
    }

    async fn settle_if_pending(
        &self,
        id: &str,
        settlement: &Settlement,
    ) -> anyhow::Result<Option<AccessRequest>> {
        // Single-statement compare-and-set: the row lock taken by UPDATE
        // serializes concurrent writers, and only the first sees 'pending'.
        let sql = format!(
            r#"UPDATE access_requests
               SET status = $2, responder_name = $3, responder_handle = $4, responded_at = $5
               WHERE id = $1
                 AND status = 'pending'
                 AND (NOT $6 OR expires_at > $5)
               RETURNING {}"#,
            COLUMNS
        );
        let row = sqlx::query_as::<_, AccessRequest>(&sql)
            .bind(id)
            .bind(settlement.status)
            .bind(&settlement.responder_name)
            .bind(&settlement.responder_handle)
            .bind(settlement.responded_at)
            .bind(settlement.requires_unexpired())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_overdue_pending(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<AccessRequest>> {
        // Served by idx_access_requests_status_expires
        let sql = format!(
            r#"SELECT {} FROM access_requests
               WHERE status = 'pending' AND expires_at <= $1
               ORDER BY expires_at ASC
               LIMIT $2"#,
            COLUMNS
        );
        let rows = sqlx::query_as::<_, AccessRequest>(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

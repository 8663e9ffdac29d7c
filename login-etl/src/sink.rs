use std::time::Instant;

use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;
use tracing::debug;

use crate::metrics_consts::BATCH_COMMIT_TIME;
use crate::record::LoginRecord;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("storage connection failed: {error}")]
    Connection {
        #[source]
        error: sqlx::Error,
    },
    #[error("batch insert failed: {error}")]
    Insert {
        #[source]
        error: sqlx::Error,
    },
}

// Column-oriented buffer for the vectorized UNNEST insert below.
struct LoginRowBatch {
    user_ids: Vec<String>,
    device_types: Vec<String>,
    masked_ips: Vec<String>,
    masked_device_ids: Vec<String>,
    locales: Vec<String>,
    app_versions: Vec<i32>,
    create_dates: Vec<String>,
}

impl LoginRowBatch {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            user_ids: Vec::with_capacity(capacity),
            device_types: Vec::with_capacity(capacity),
            masked_ips: Vec::with_capacity(capacity),
            masked_device_ids: Vec::with_capacity(capacity),
            locales: Vec::with_capacity(capacity),
            app_versions: Vec::with_capacity(capacity),
            create_dates: Vec::with_capacity(capacity),
        }
    }

    fn append(&mut self, record: &LoginRecord) {
        self.user_ids.push(record.user_id.clone());
        self.device_types.push(record.device_type.clone());
        self.masked_ips.push(record.masked_ip.clone());
        self.masked_device_ids.push(record.masked_device_id.clone());
        self.locales.push(record.locale.clone());
        self.app_versions.push(record.app_version);
        self.create_dates.push(record.create_date.clone());
    }
}

/// Writes batches of login records into the `user_logins` table.
#[derive(Clone)]
pub struct LoginSink {
    pool: PgPool,
}

impl LoginSink {
    pub async fn new(url: &str, max_connections: u32) -> Result<Self, SinkError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|error| SinkError::Connection { error })?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Commit a batch in one multi-row insert.
    ///
    /// A single statement keeps the batch atomic: a constraint violation on
    /// any row persists nothing. Redelivered messages are absorbed by the
    /// `(user_id, create_date)` natural key, so the returned count is rows
    /// actually inserted, not rows submitted. An empty batch issues no query.
    pub async fn commit(&self, records: &[LoginRecord]) -> Result<u64, SinkError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut batch = LoginRowBatch::with_capacity(records.len());
        for record in records {
            batch.append(record);
        }

        let start = Instant::now();
        let result = sqlx::query(
            r#"
INSERT INTO user_logins (user_id, device_type, masked_ip, masked_device_id, locale, app_version, create_date)
    (SELECT * FROM UNNEST(
        $1::text[],
        $2::text[],
        $3::text[],
        $4::text[],
        $5::text[],
        $6::int[],
        $7::text[]))
    ON CONFLICT (user_id, create_date) DO NOTHING
            "#,
        )
        .bind(&batch.user_ids)
        .bind(&batch.device_types)
        .bind(&batch.masked_ips)
        .bind(&batch.masked_device_ids)
        .bind(&batch.locales)
        .bind(&batch.app_versions)
        .bind(&batch.create_dates)
        .execute(&self.pool)
        .await
        .map_err(|error| SinkError::Insert { error })?;

        metrics::histogram!(BATCH_COMMIT_TIME).record(start.elapsed().as_millis() as f64);

        let inserted = result.rows_affected();
        debug!(
            submitted = records.len(),
            inserted, "committed login batch"
        );

        Ok(inserted)
    }
}

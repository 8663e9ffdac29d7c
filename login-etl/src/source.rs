use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;

/// One message as claimed from the queue. The delivery token is the queue row
/// id and is only valid for acknowledging this message.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RawMessage {
    pub delivery_token: i64,
    pub body: String,
}

/// Enumeration of errors for operations on the login queue.
/// Errors originate from sqlx and are wrapped to name the failing command.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue connection failed: {error}")]
    Connection {
        #[source]
        error: sqlx::Error,
    },
    #[error("queue {command} failed: {error}")]
    Query {
        command: &'static str,
        #[source]
        error: sqlx::Error,
    },
}

/// A login-event queue implemented on top of a PostgreSQL table.
///
/// Messages are claimed rather than removed on receive: a claimed row is
/// invisible to other workers (`FOR UPDATE SKIP LOCKED` at claim time, status
/// afterwards) until it is either acknowledged or its claim times out and
/// `reclaim` returns it to the available pool. Combined with the driver's
/// acknowledge-after-commit ordering this gives at-least-once delivery.
#[derive(Clone)]
pub struct LoginQueue {
    pool: PgPool,
}

impl LoginQueue {
    pub async fn new(url: &str, max_connections: u32) -> Result<Self, QueueError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|error| QueueError::Connection { error })?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Claim up to `max` available messages, oldest first.
    pub async fn receive(&self, max: i64) -> Result<Vec<RawMessage>, QueueError> {
        let mut messages: Vec<RawMessage> = sqlx::query_as(
            r#"
WITH available AS (
    SELECT id
    FROM login_queue
    WHERE status = 'available'
    ORDER BY id
    LIMIT $1
    FOR UPDATE SKIP LOCKED
)
UPDATE login_queue
SET status = 'claimed', claimed_at = NOW()
FROM available
WHERE login_queue.id = available.id
RETURNING login_queue.id AS delivery_token, login_queue.body
            "#,
        )
        .bind(max)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| QueueError::Query {
            command: "receive",
            error,
        })?;

        // UPDATE .. RETURNING does not preserve the CTE ordering
        messages.sort_by_key(|message| message.delivery_token);

        Ok(messages)
    }

    /// Remove claimed messages from the queue. Returns how many rows were
    /// actually deleted; tokens for already-removed messages are ignored.
    pub async fn acknowledge(&self, delivery_tokens: &[i64]) -> Result<u64, QueueError> {
        if delivery_tokens.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query("DELETE FROM login_queue WHERE id = ANY($1)")
            .bind(delivery_tokens)
            .execute(&self.pool)
            .await
            .map_err(|error| QueueError::Query {
                command: "acknowledge",
                error,
            })?;

        Ok(result.rows_affected())
    }

    /// Return claims older than `stalled_after` to the available pool, so
    /// messages from a crashed or wedged worker are eventually redelivered.
    pub async fn reclaim(&self, stalled_after: Duration) -> Result<u64, QueueError> {
        let result = sqlx::query(
            r#"
UPDATE login_queue
SET status = 'available', claimed_at = NULL
WHERE status = 'claimed' AND claimed_at < NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(stalled_after.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|error| QueueError::Query {
            command: "reclaim",
            error,
        })?;

        Ok(result.rows_affected())
    }

    /// Producer-side insert. The worker never calls this; it exists for the
    /// upstream login service and for tests.
    pub async fn enqueue(&self, body: &str) -> Result<(), QueueError> {
        sqlx::query("INSERT INTO login_queue (status, body) VALUES ('available', $1)")
            .bind(body)
            .execute(&self.pool)
            .await
            .map_err(|error| QueueError::Query {
                command: "enqueue",
                error,
            })?;

        Ok(())
    }
}

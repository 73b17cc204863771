//! Persistent markers for processed verify/IPN events.

use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;

#[derive(Debug, Clone)]
/// Record an event key, extending its expiry if it already exists.
pub struct MarkEventProcessed {
    pub event_key: String,
    pub ttl_secs: f64,
}

impl Processor<MarkEventProcessed> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:MarkEventProcessed")]
    async fn process(&self, mark: MarkEventProcessed) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO processed_events (event_key, expires_at)
            VALUES ($1, now() + make_interval(secs => $2))
            ON CONFLICT (event_key) DO UPDATE SET expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(mark.event_key)
        .bind(mark.ttl_secs)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct IsEventProcessed {
    pub event_key: String,
}

impl Processor<IsEventProcessed> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:IsEventProcessed")]
    async fn process(&self, query: IsEventProcessed) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM processed_events WHERE event_key = $1 AND expires_at > now())",
        )
        .bind(query.event_key)
        .fetch_one(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Delete expired markers. Returns the number of rows removed.
pub struct PurgeExpiredEvents;

impl Processor<PurgeExpiredEvents> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:PurgeExpiredEvents")]
    async fn process(&self, _: PurgeExpiredEvents) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM processed_events WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

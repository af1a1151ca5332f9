//! Work item operations on Postgres: seeding, claiming, state transitions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::*;
use crate::store::QueueStore;
use crate::telemetry::metrics;

/// Keys inserted per statement when seeding.
const SEED_CHUNK: usize = 1000;

fn record_transition(to: State) {
    metrics::state_transitions().add(1, &[KeyValue::new("to", to.as_str())]);
}

impl super::Db {
    async fn fetch_item(&self, key: &str) -> Result<Option<WorkItem>> {
        let row: Option<WorkItemRow> = sqlx::query_as("SELECT * FROM work_items WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(WorkItemRow::try_into_work_item).transpose()
    }

    /// Explain why a keyed update touched no rows.
    async fn missed_update(&self, key: &str, to: State) -> Error {
        match self.fetch_item(key).await {
            Ok(Some(item)) => Error::InvalidTransition {
                from: item.state.to_string(),
                to: to.to_string(),
            },
            Ok(None) => Error::NotFound(key.to_string()),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl QueueStore for super::Db {
    async fn seed(&self, keys: &[String]) -> Result<SeedReport> {
        let mut report = SeedReport::default();

        for chunk in keys.chunks(SEED_CHUNK) {
            let ids: Vec<Uuid> = chunk.iter().map(|_| Uuid::new_v4()).collect();
            let inserted = sqlx::query(
                "INSERT INTO work_items (id, key)
                 SELECT id, key FROM UNNEST($1::uuid[], $2::text[]) AS t(id, key)
                 ON CONFLICT (key) DO NOTHING",
            )
            .bind(&ids)
            .bind(chunk)
            .execute(&self.pool)
            .await?
            .rows_affected();

            report.inserted += inserted;
            report.skipped += chunk.len() as u64 - inserted;
        }

        Ok(report)
    }

    async fn claim_next(&self) -> Result<Option<Claim>> {
        // SKIP LOCKED keeps concurrent claimants off each other's rows; the
        // ORDER BY puts pending before stalled, and previously claimed
        // pending items before fresh ones.
        let row: Option<ClaimRow> = sqlx::query_as(
            "WITH next AS (
                 SELECT id, state AS prior_state FROM work_items
                 WHERE state = 'pending'
                    OR (state = 'in_progress' AND updated_at <= now() - make_interval(secs => $1))
                 ORDER BY (state = 'in_progress'), (claimed_at IS NULL), seq
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             UPDATE work_items w
             SET state = 'in_progress', claimed_at = now(), updated_at = now()
             FROM next WHERE w.id = next.id
             RETURNING w.*, next.prior_state",
        )
        .bind(self.stall_after.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        finish_claim(row, "claimed")
    }

    async fn claim_in_progress(&self) -> Result<Option<Claim>> {
        let row: Option<ClaimRow> = sqlx::query_as(
            "WITH next AS (
                 SELECT id, state AS prior_state FROM work_items
                 WHERE state = 'in_progress'
                 ORDER BY updated_at, seq
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             UPDATE work_items w
             SET claimed_at = now(), updated_at = now()
             FROM next WHERE w.id = next.id
             RETURNING w.*, next.prior_state",
        )
        .fetch_optional(&self.pool)
        .await?;

        finish_claim(row, "reclaimed")
    }

    async fn mark_in_progress(&self, key: &str) -> Result<()> {
        let rows = sqlx::query(
            "UPDATE work_items SET state = 'in_progress', attempts = attempts + 1, updated_at = now()
             WHERE key = $1 AND state IN ('pending', 'in_progress')",
        )
        .bind(key)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(self.missed_update(key, State::InProgress).await);
        }
        Ok(())
    }

    async fn mark_done(&self, key: &str, result: &ScrapeResult) -> Result<()> {
        let rows = sqlx::query(
            "UPDATE work_items SET state = 'done', result = $2, updated_at = now(), resolved_at = now()
             WHERE key = $1",
        )
        .bind(key)
        .bind(serde_json::to_value(result)?)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(Error::NotFound(key.to_string()));
        }
        record_transition(State::Done);
        Ok(())
    }

    async fn mark_failed(&self, key: &str) -> Result<()> {
        let rows = sqlx::query(
            "UPDATE work_items SET state = 'failed', updated_at = now(), resolved_at = now()
             WHERE key = $1",
        )
        .bind(key)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(Error::NotFound(key.to_string()));
        }
        record_transition(State::Failed);
        Ok(())
    }

    async fn reset_stalled(&self) -> Result<u64> {
        let rows = sqlx::query(
            "UPDATE work_items SET state = 'pending', updated_at = now() WHERE state = 'in_progress'",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows > 0 {
            metrics::state_transitions().add(rows, &[KeyValue::new("to", State::Pending.as_str())]);
        }
        Ok(rows)
    }

    async fn count_all(&self) -> Result<u64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM work_items")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    async fn state_counts(&self) -> Result<StateCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM work_items GROUP BY state")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = StateCounts::default();
        for (state, n) in rows {
            counts.add(state.parse()?, n as u64);
        }
        Ok(counts)
    }

    async fn get(&self, key: &str) -> Result<WorkItem> {
        self.fetch_item(key)
            .await?
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }
}

fn finish_claim(row: Option<ClaimRow>, kind: &'static str) -> Result<Option<Claim>> {
    let kind = if row.is_some() { kind } else { "empty" };
    metrics::claims().add(1, &[KeyValue::new("kind", kind)]);

    let Some(row) = row else {
        return Ok(None);
    };
    record_transition(State::InProgress);
    Ok(Some(Claim {
        from: row.prior_state.parse()?,
        item: row.item.try_into_work_item()?,
    }))
}

/// A claimed row plus the state it was claimed from.
#[derive(sqlx::FromRow)]
struct ClaimRow {
    #[sqlx(flatten)]
    item: WorkItemRow,
    prior_state: String,
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct WorkItemRow {
    id: Uuid,
    key: String,
    state: String,
    result: Option<serde_json::Value>,
    attempts: i32,
    claimed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl WorkItemRow {
    fn try_into_work_item(self) -> Result<WorkItem> {
        Ok(WorkItem {
            id: WorkId(self.id),
            state: self.state.parse()?,
            result: self.result.map(serde_json::from_value).transpose()?,
            attempts: self.attempts.max(0) as u32,
            key: self.key,
            claimed_at: self.claimed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            resolved_at: self.resolved_at,
        })
    }
}

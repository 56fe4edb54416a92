// src/db.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{VoteError, VoteResult};
use crate::models::{AuditLogEntry, Poll, PollOption, VoteRecord};
use crate::store::Store;

const ACTIVE_VOTE_INDEX: &str = "votes_one_active_per_identity";

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Postgres-backed store. Every write runs in its own transaction.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct PollRow {
    id: String,
    question: String,
    options: Json<Vec<PollOption>>,
    active: bool,
    created_at: DateTime<Utc>,
}

impl From<PollRow> for Poll {
    fn from(row: PollRow) -> Self {
        Poll {
            id: row.id,
            question: row.question,
            options: row.options.0,
            is_active: row.active,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    action: String,
    poll_id: String,
    identity: String,
    details: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditLogEntry {
    type Error = VoteError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(AuditLogEntry {
            id: row.id,
            action: row.action.parse().map_err(VoteError::Storage)?,
            poll_id: row.poll_id,
            identity: row.identity,
            details: row.details,
            created_at: row.created_at,
        })
    }
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> VoteResult<Self> {
        let pool = create_pool(database_url, max_connections).await?;
        Ok(Self::new(pool))
    }

    pub async fn run_migrations(&self) -> VoteResult<()> {
        sqlx::raw_sql(include_str!("../migrations/001_initial_schema.sql"))
            .execute(&self.pool)
            .await?;
        info!("Database schema is up to date");
        Ok(())
    }

    /// Insert catalog polls that are not present yet. Existing rows are left alone.
    pub async fn seed_polls(&self, polls: &[Poll]) -> VoteResult<()> {
        for poll in polls {
            let inserted = sqlx::query(
                r#"
                INSERT INTO polls (id, question, options, active, created_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(&poll.id)
            .bind(&poll.question)
            .bind(Json(&poll.options))
            .bind(poll.is_active)
            .bind(poll.created_at)
            .execute(&self.pool)
            .await?;

            if inserted.rows_affected() > 0 {
                info!(poll_id = %poll.id, "Seeded poll");
            }
        }
        Ok(())
    }
}

async fn insert_audit(conn: &mut PgConnection, entry: &AuditLogEntry) -> VoteResult<()> {
    sqlx::query(
        r#"
        INSERT INTO audit (id, action, poll_id, identity, details, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(entry.id)
    .bind(entry.action.as_str())
    .bind(&entry.poll_id)
    .bind(&entry.identity)
    .bind(&entry.details)
    .bind(entry.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

fn is_active_vote_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.is_unique_violation() && db.constraint() == Some(ACTIVE_VOTE_INDEX)
        }
        _ => false,
    }
}

#[async_trait]
impl Store for PgStore {
    async fn polls(&self) -> VoteResult<Vec<Poll>> {
        let rows = sqlx::query_as::<_, PollRow>(
            "SELECT id, question, options, active, created_at FROM polls ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Poll::from).collect())
    }

    async fn poll(&self, poll_id: &str) -> VoteResult<Option<Poll>> {
        let row = sqlx::query_as::<_, PollRow>(
            "SELECT id, question, options, active, created_at FROM polls WHERE id = $1",
        )
        .bind(poll_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Poll::from))
    }

    async fn votes_for_poll(&self, poll_id: &str) -> VoteResult<Vec<VoteRecord>> {
        let votes = sqlx::query_as::<_, VoteRecord>(
            r#"
            SELECT id, poll_id, option_id, identity, created_at, released
            FROM votes
            WHERE poll_id = $1
            ORDER BY seq
            "#,
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?;
        debug!(poll_id, count = votes.len(), "Loaded votes");
        Ok(votes)
    }

    async fn votes_for_identity(
        &self,
        poll_id: &str,
        identity: &str,
    ) -> VoteResult<Vec<VoteRecord>> {
        let votes = sqlx::query_as::<_, VoteRecord>(
            r#"
            SELECT id, poll_id, option_id, identity, created_at, released
            FROM votes
            WHERE poll_id = $1 AND identity = $2
            ORDER BY seq
            "#,
        )
        .bind(poll_id)
        .bind(identity)
        .fetch_all(&self.pool)
        .await?;
        Ok(votes)
    }

    async fn audit_for_poll(&self, poll_id: &str) -> VoteResult<Vec<AuditLogEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT id, action, poll_id, identity, details, created_at
            FROM audit
            WHERE poll_id = $1
            ORDER BY seq
            "#,
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AuditLogEntry::try_from).collect()
    }

    async fn record_vote(&self, vote: &VoteRecord, entry: &AuditLogEntry) -> VoteResult<()> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO votes (id, poll_id, option_id, identity, created_at, released)
            VALUES ($1, $2, $3, $4, $5, FALSE)
            "#,
        )
        .bind(vote.id)
        .bind(&vote.poll_id)
        .bind(&vote.option_id)
        .bind(&vote.identity)
        .bind(vote.created_at)
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            if is_active_vote_conflict(&err) {
                return Err(VoteError::AlreadyVoted {
                    poll_id: vote.poll_id.clone(),
                    identity: vote.identity.clone(),
                });
            }
            return Err(err.into());
        }

        insert_audit(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn release_vote(&self, vote_id: Uuid, entry: &AuditLogEntry) -> VoteResult<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE votes SET released = TRUE WHERE id = $1 AND NOT released")
            .bind(vote_id)
            .execute(&mut *tx)
            .await?;

        if updated.rows_affected() == 0 {
            return Err(VoteError::NoActiveVote {
                poll_id: entry.poll_id.clone(),
                identity: entry.identity.clone(),
            });
        }

        insert_audit(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(())
    }
}

/// These run against a live Postgres named by `DATABASE_URL`:
/// `DATABASE_URL=postgres://... cargo test -- --ignored`
#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_polls;
    use crate::models::AuditAction;
    use chrono::Duration;
    use tokio::sync::OnceCell;

    static SCHEMA: OnceCell<()> = OnceCell::const_new();

    async fn test_store() -> Option<PgStore> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set, skipping");
            return None;
        };
        let store = PgStore::connect(&url, 2).await.unwrap();
        SCHEMA
            .get_or_init(|| async {
                store.run_migrations().await.unwrap();
                store.seed_polls(&default_polls()).await.unwrap();
            })
            .await;
        Some(store)
    }

    fn unique_identity() -> String {
        format!("test-{}", Uuid::new_v4())
    }

    fn cast(
        identity: &str,
        option_id: &str,
        action: AuditAction,
        at: DateTime<Utc>,
    ) -> (VoteRecord, AuditLogEntry) {
        let vote = VoteRecord::new("poll_1", option_id, identity, at);
        let entry = AuditLogEntry::new(action, "poll_1", identity, format!("{action} {option_id}"), at);
        (vote, entry)
    }

    fn release(identity: &str, vote_id: Uuid) -> AuditLogEntry {
        AuditLogEntry::new(
            AuditAction::Release,
            "poll_1",
            identity,
            format!("Admin released IP. Previous Vote ID: {vote_id}"),
            Utc::now(),
        )
    }

    async fn audit_of(store: &PgStore, identity: &str) -> Vec<AuditLogEntry> {
        store
            .audit_for_poll("poll_1")
            .await
            .unwrap()
            .into_iter()
            .filter(|a| a.identity == identity)
            .collect()
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn second_active_vote_hits_partial_index() {
        let Some(store) = test_store().await else { return };
        let identity = unique_identity();

        let (first, entry) = cast(&identity, "opt_1", AuditAction::Vote, Utc::now());
        store.record_vote(&first, &entry).await.unwrap();

        let (second, entry) = cast(&identity, "opt_2", AuditAction::Vote, Utc::now());
        let err = store.record_vote(&second, &entry).await.unwrap_err();
        assert!(matches!(err, VoteError::AlreadyVoted { .. }), "got {err}");

        let votes = store.votes_for_identity("poll_1", &identity).await.unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].id, first.id);

        let audit = audit_of(&store, &identity).await;
        assert_eq!(audit.len(), 1);
        assert!(audit.iter().all(|a| a.id != entry.id));
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn double_release_is_no_active_vote() {
        let Some(store) = test_store().await else { return };
        let identity = unique_identity();

        let (vote, entry) = cast(&identity, "opt_3", AuditAction::Vote, Utc::now());
        store.record_vote(&vote, &entry).await.unwrap();
        store.release_vote(vote.id, &release(&identity, vote.id)).await.unwrap();

        let again = release(&identity, vote.id);
        let err = store.release_vote(vote.id, &again).await.unwrap_err();
        assert!(matches!(err, VoteError::NoActiveVote { .. }), "got {err}");

        let err = store
            .release_vote(Uuid::new_v4(), &release(&identity, vote.id))
            .await
            .unwrap_err();
        assert!(matches!(err, VoteError::NoActiveVote { .. }));

        let votes = store.votes_for_identity("poll_1", &identity).await.unwrap();
        assert!(votes[0].released);
        let actions: Vec<_> = audit_of(&store, &identity).await.iter().map(|a| a.action).collect();
        assert_eq!(actions, [AuditAction::Vote, AuditAction::Release]);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn reads_follow_append_order_not_timestamps() {
        let Some(store) = test_store().await else { return };
        let identity = unique_identity();
        let now = Utc::now();

        let (first, entry) = cast(&identity, "opt_1", AuditAction::Vote, now);
        store.record_vote(&first, &entry).await.unwrap();
        store.release_vote(first.id, &release(&identity, first.id)).await.unwrap();

        // Released rows no longer count against the partial index.
        let (second, entry) =
            cast(&identity, "opt_4", AuditAction::Revote, now - Duration::seconds(60));
        store.record_vote(&second, &entry).await.unwrap();

        let ids: Vec<_> = store
            .votes_for_identity("poll_1", &identity)
            .await
            .unwrap()
            .iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(ids, [first.id, second.id]);

        let in_poll: Vec<_> = store
            .votes_for_poll("poll_1")
            .await
            .unwrap()
            .into_iter()
            .filter(|v| v.identity == identity)
            .map(|v| (v.id, v.released))
            .collect();
        assert_eq!(in_poll, [(first.id, true), (second.id, false)]);

        let actions: Vec<_> = audit_of(&store, &identity).await.iter().map(|a| a.action).collect();
        assert_eq!(
            actions,
            [AuditAction::Vote, AuditAction::Release, AuditAction::Revote]
        );
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn catalog_round_trips_through_jsonb() {
        let Some(store) = test_store().await else { return };
        let poll = store.poll("poll_2").await.unwrap().unwrap();
        assert_eq!(poll.options.len(), 4);
        assert_eq!(poll.option("opt_b").map(|o| o.text.as_str()), Some("Node.js"));
        assert!(store.poll("poll_missing").await.unwrap().is_none());

        store.seed_polls(&default_polls()).await.unwrap();
        let ids: Vec<_> = store.polls().await.unwrap().into_iter().map(|p| p.id).collect();
        assert!(ids.contains(&"poll_1".to_string()));
        assert!(ids.contains(&"poll_2".to_string()));
    }
}

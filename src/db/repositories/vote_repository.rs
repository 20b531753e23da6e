use crate::db::connection::DbPool;
use crate::db::models::Vote;
use crate::error::StoreError;
use chrono::Utc;
use sqlx::{Error, Row};
use std::collections::HashMap;
use uuid::Uuid;

/// Records a vote unless `voter_address` already voted on this poll.
///
/// The existence check and the insert run as separate autocommit
/// statements so a busy database waits out the busy timeout instead of
/// failing a deferred transaction's lock upgrade. Two racing votes from one
/// address both pass the check; `UNIQUE(poll_id, voter_address)` rejects the
/// second insert.
pub async fn cast_vote(
    pool: &DbPool,
    poll_id: Uuid,
    option_index: i64,
    voter_address: &str,
) -> Result<Vote, StoreError> {
    let existing_vote = sqlx::query("SELECT id FROM votes WHERE poll_id = ? AND voter_address = ?")
        .bind(poll_id)
        .bind(voter_address)
        .fetch_optional(pool)
        .await?;

    if existing_vote.is_some() {
        return Err(StoreError::DuplicateVote);
    }

    let inserted = sqlx::query_as::<_, Vote>(
        "INSERT INTO votes (poll_id, option_index, voter_address, voted_at) VALUES (?, ?, ?, ?) \
         RETURNING id, poll_id, option_index, voter_address, voted_at",
    )
    .bind(poll_id)
    .bind(option_index)
    .bind(voter_address)
    .bind(Utc::now())
    .fetch_one(pool)
    .await;

    match inserted {
        Ok(vote) => Ok(vote),
        Err(Error::Database(e)) if e.is_unique_violation() => Err(StoreError::DuplicateVote),
        Err(e) => Err(e.into()),
    }
}

/// Vote counts keyed by option index. Options nobody picked are absent.
pub async fn get_results_by_option(
    pool: &DbPool,
    poll_id: Uuid,
) -> Result<HashMap<i64, i64>, Error> {
    let rows = sqlx::query(
        "SELECT option_index, COUNT(*) AS vote_count FROM votes WHERE poll_id = ? GROUP BY option_index",
    )
    .bind(poll_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| -> Result<(i64, i64), Error> {
            Ok((r.try_get("option_index")?, r.try_get("vote_count")?))
        })
        .collect()
}

pub async fn get_total_votes(pool: &DbPool, poll_id: Uuid) -> Result<i64, Error> {
    let row = sqlx::query("SELECT COUNT(*) AS total FROM votes WHERE poll_id = ?")
        .bind(poll_id)
        .fetch_one(pool)
        .await?;

    row.try_get("total")
}

use crate::db::connection::DbPool;
use crate::db::models::{NewPoll, Poll};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{Error, Row};
use uuid::Uuid;

pub async fn create_poll(pool: &DbPool, poll: NewPoll) -> Result<Poll, Error> {
    let created_at = Utc::now();

    sqlx::query(
        "INSERT INTO polls (id, title, description, options, deadline, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(poll.id)
    .bind(&poll.title)
    .bind(&poll.description)
    .bind(Json(&poll.options))
    .bind(poll.deadline)
    .bind(created_at)
    .execute(pool)
    .await?;

    Ok(Poll {
        id: poll.id,
        title: poll.title,
        description: poll.description,
        options: poll.options,
        deadline: poll.deadline,
        created_at,
    })
}

pub async fn get_poll(pool: &DbPool, poll_id: Uuid) -> Result<Option<Poll>, Error> {
    let row = sqlx::query(
        "SELECT id, title, description, options, deadline, created_at FROM polls WHERE id = ?",
    )
    .bind(poll_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| -> Result<Poll, Error> {
        let options: Json<Vec<String>> = r.try_get("options")?;
        Ok(Poll {
            id: r.try_get("id")?,
            title: r.try_get("title")?,
            description: r.try_get("description")?,
            options: options.0,
            deadline: r.try_get::<Option<DateTime<Utc>>, _>("deadline")?,
            created_at: r.try_get("created_at")?,
        })
    })
    .transpose()
}

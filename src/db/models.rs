use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub options: Vec<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Poll {
    /// A poll without a deadline never expires.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }
}

/// Fields needed to insert a poll; the store stamps `created_at`.
#[derive(Debug, Clone)]
pub struct NewPoll {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub options: Vec<String>,
    pub deadline: Option<DateTime<Utc>>,
}

#[allow(dead_code)]
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vote {
    pub id: i64,
    pub poll_id: Uuid,
    pub option_index: i64,
    pub voter_address: String,
    pub voted_at: DateTime<Utc>,
}

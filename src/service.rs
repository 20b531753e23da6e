use crate::db::{self, DbPool, NewPoll, Poll};
use crate::error::PollError;
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 10;

/// Browser `datetime-local` values carry no offset; they are read in the server's local zone.
const LOCAL_DEADLINE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S"];

#[derive(Debug, Default, Deserialize)]
pub struct PollDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub deadline: Option<String>,
}

/// Builds the shareable page links for a poll.
#[derive(Debug, Clone)]
pub struct ShareLinks {
    base: String,
}

impl ShareLinks {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn poll_url(&self, poll_id: Uuid) -> String {
        format!("{}/poll/{}", self.base, poll_id)
    }

    pub fn results_url(&self, poll_id: Uuid) -> String {
        format!("{}/results/{}", self.base, poll_id)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollView {
    #[serde(flatten)]
    pub poll: Poll,
    pub is_expired: bool,
}

impl PollView {
    fn at(poll: Poll, now: DateTime<Utc>) -> Self {
        let is_expired = poll.is_expired_at(now);
        Self { poll, is_expired }
    }
}

#[derive(Debug, Clone)]
pub struct CreatedPoll {
    pub poll: Poll,
    pub poll_url: String,
    pub results_url: String,
}

#[derive(Debug, Clone)]
pub struct VoteReceipt {
    pub vote_id: i64,
    pub results_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionResult {
    pub option: String,
    pub votes: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone)]
pub struct PollResults {
    pub poll: PollView,
    pub results: Vec<OptionResult>,
    pub total_votes: i64,
    pub poll_url: String,
}

pub struct PollService {
    db: DbPool,
}

impl PollService {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub async fn create_poll(
        &self,
        draft: PollDraft,
        links: &ShareLinks,
    ) -> Result<CreatedPoll, PollError> {
        let title = draft.title.trim();
        if title.is_empty() {
            return Err(PollError::validation("Title is required"));
        }

        let options = normalize_options(&draft.options);
        if options.len() < MIN_OPTIONS {
            return Err(PollError::validation(
                "At least 2 non-empty options are required",
            ));
        }
        if options.len() > MAX_OPTIONS {
            return Err(PollError::validation("At most 10 options are allowed"));
        }

        let deadline = parse_deadline(draft.deadline.as_deref())?;
        if deadline.is_some_and(|deadline| deadline <= Utc::now()) {
            return Err(PollError::validation("Deadline must be in the future"));
        }

        let poll = db::create_poll(
            &self.db,
            NewPoll {
                id: Uuid::new_v4(),
                title: title.to_string(),
                description: draft
                    .description
                    .as_deref()
                    .map(str::trim)
                    .unwrap_or_default()
                    .to_string(),
                options,
                deadline,
            },
        )
        .await?;

        info!(poll_id = %poll.id, options = poll.options.len(), "poll created");

        Ok(CreatedPoll {
            poll_url: links.poll_url(poll.id),
            results_url: links.results_url(poll.id),
            poll,
        })
    }

    /// `Ok(None)` when no poll has this id.
    pub async fn get_poll(&self, poll_id: Uuid) -> Result<Option<PollView>, PollError> {
        let poll = db::get_poll(&self.db, poll_id).await?;
        let now = Utc::now();
        Ok(poll.map(|poll| PollView::at(poll, now)))
    }

    pub async fn submit_vote(
        &self,
        poll_id: Uuid,
        option_index: Option<i64>,
        voter_address: &str,
        links: &ShareLinks,
    ) -> Result<VoteReceipt, PollError> {
        let option_index = option_index
            .filter(|index| *index >= 0)
            .ok_or_else(|| PollError::validation("Valid option selection is required"))?;

        let poll = db::get_poll(&self.db, poll_id)
            .await?
            .ok_or(PollError::NotFound)?;

        if poll.is_expired_at(Utc::now()) {
            return Err(PollError::Expired);
        }

        if option_index >= poll.options.len() as i64 {
            return Err(PollError::validation("Invalid option selected"));
        }

        let vote = db::cast_vote(&self.db, poll_id, option_index, voter_address).await?;

        info!(poll_id = %poll_id, vote_id = vote.id, "vote recorded");

        Ok(VoteReceipt {
            vote_id: vote.id,
            results_url: links.results_url(poll_id),
        })
    }

    pub async fn get_results(
        &self,
        poll_id: Uuid,
        links: &ShareLinks,
    ) -> Result<PollResults, PollError> {
        let (poll, counts, total_votes) = futures::try_join!(
            db::get_poll(&self.db, poll_id),
            db::get_results_by_option(&self.db, poll_id),
            db::get_total_votes(&self.db, poll_id),
        )?;

        let poll = poll.ok_or(PollError::NotFound)?;

        let results = poll
            .options
            .iter()
            .enumerate()
            .map(|(index, option)| {
                let votes = counts.get(&(index as i64)).copied().unwrap_or(0);
                OptionResult {
                    option: option.clone(),
                    votes,
                    percentage: percentage(votes, total_votes),
                }
            })
            .collect();

        Ok(PollResults {
            poll: PollView::at(poll, Utc::now()),
            results,
            total_votes,
            poll_url: links.poll_url(poll_id),
        })
    }
}

/// Trims, drops blanks, and removes exact repeats keeping the first one.
pub fn normalize_options(raw: &[String]) -> Vec<String> {
    let mut options: Vec<String> = Vec::with_capacity(raw.len());
    for option in raw.iter().map(|o| o.trim()).filter(|o| !o.is_empty()) {
        if !options.iter().any(|seen| seen == option) {
            options.push(option.to_string());
        }
    }
    options
}

pub fn parse_deadline(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, PollError> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(None),
        Some(raw) => raw,
    };

    if let Ok(deadline) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(deadline.with_timezone(&Utc)));
    }

    LOCAL_DEADLINE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .and_then(|naive| naive.and_local_timezone(Local).earliest())
        .map(|local| Some(local.with_timezone(&Utc)))
        .ok_or_else(|| PollError::validation("Deadline is not a valid date"))
}

/// Share of `total` as a percentage with one decimal place; 0 when nobody voted.
pub fn percentage(votes: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    (votes as f64 / total as f64 * 1000.0).round() / 10.0
}

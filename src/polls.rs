use crate::error::PollError;
use crate::service::{PollDraft, PollService, ShareLinks};
use crate::startup::AppState;
use axum::{
    extract::{ConnectInfo, Extension, Json, Path, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::HOST},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CastVoteRequest {
    #[serde(rename = "optionIndex", default)]
    pub option_index: Option<Value>,
}

/// Ids that are not UUIDs cannot name a poll, so they read as missing.
fn parse_poll_id(raw: &str) -> Result<Uuid, PollError> {
    Uuid::parse_str(raw).map_err(|_| PollError::NotFound)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn share_links(app_state: &AppState, headers: &HeaderMap) -> ShareLinks {
    if let Some(url) = &app_state.config.public_url {
        return ShareLinks::new(url.as_str());
    }

    let proto = header(headers, "x-forwarded-proto")
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .unwrap_or("http");
    let host = header(headers, HOST.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("localhost:{}", app_state.config.port));

    ShareLinks::new(format!("{proto}://{host}"))
}

/// First hop of `X-Forwarded-For`, else the peer address.
fn voter_address(headers: &HeaderMap, peer: Option<ConnectInfo<SocketAddr>>) -> String {
    header(headers, "x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Accepts a JSON integer or an integer string; absence is left to the service.
fn option_index(raw: Option<&Value>) -> Result<Option<i64>, PollError> {
    let invalid = || PollError::validation("Valid option selection is required");
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_i64().map(Some).ok_or_else(invalid),
        Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

fn malformed(rejection: JsonRejection) -> PollError {
    PollError::validation(format!("Malformed request body: {}", rejection.body_text()))
}

/// Create a new poll
pub async fn create_poll(
    Extension(app_state): Extension<AppState>,
    headers: HeaderMap,
    payload: Result<Json<PollDraft>, JsonRejection>,
) -> Result<impl IntoResponse, PollError> {
    let Json(draft) = payload.map_err(malformed)?;
    let links = share_links(&app_state, &headers);

    let created = PollService::new(app_state.db.clone())
        .create_poll(draft, &links)
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "poll": created.poll,
            "pollUrl": created.poll_url,
            "resultsUrl": created.results_url,
        })),
    ))
}

/// Get a poll with its derived expiry flag
pub async fn get_poll(
    Extension(app_state): Extension<AppState>,
    Path(poll_id): Path<String>,
) -> Result<impl IntoResponse, PollError> {
    let poll_id = parse_poll_id(&poll_id)?;

    let poll = PollService::new(app_state.db.clone())
        .get_poll(poll_id)
        .await?
        .ok_or(PollError::NotFound)?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "poll": poll,
        })),
    ))
}

/// Cast a vote, one per voter address
pub async fn vote_on_poll(
    Extension(app_state): Extension<AppState>,
    Path(poll_id): Path<String>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<CastVoteRequest>, JsonRejection>,
) -> Result<impl IntoResponse, PollError> {
    let Json(payload) = payload.map_err(malformed)?;
    let option_index = option_index(payload.option_index.as_ref())?;
    let poll_id = parse_poll_id(&poll_id)?;
    let links = share_links(&app_state, &headers);
    let voter = voter_address(&headers, peer);

    let receipt = PollService::new(app_state.db.clone())
        .submit_vote(poll_id, option_index, &voter, &links)
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Vote submitted successfully",
            "resultsUrl": receipt.results_url,
        })),
    ))
}

/// Get per-option tallies and percentages
pub async fn get_results(
    Extension(app_state): Extension<AppState>,
    Path(poll_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, PollError> {
    let poll_id = parse_poll_id(&poll_id)?;
    let links = share_links(&app_state, &headers);

    let results = PollService::new(app_state.db.clone())
        .get_results(poll_id, &links)
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "poll": results.poll,
            "results": results.results,
            "totalVotes": results.total_votes,
            "pollUrl": results.poll_url,
        })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::connection::memory_pool;
    use crate::startup::router;
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::Request,
    };
    use tower::ServiceExt;

    fn test_config(public_url: Option<&str>) -> Config {
        Config {
            port: 3000,
            database_url: "sqlite::memory:".to_string(),
            db_max_connections: 1,
            public_dir: "public".to_string(),
            public_url: public_url.map(str::to_string),
        }
    }

    async fn app() -> Router {
        router(AppState::new(memory_pool().await, test_config(None)))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post(uri: &str, voter: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .header("host", "polls.test")
            .header("x-forwarded-for", voter)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri)
            .header("host", "polls.test")
            .body(Body::empty())
            .unwrap()
    }

    async fn create(app: &Router, title: &str, options: &[&str]) -> String {
        let (status, body) = send(
            app,
            post("/api/polls", "creator", json!({ "title": title, "options": options })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["poll"]["id"].as_str().unwrap().to_string()
    }

    #[test]
    fn forwarded_for_wins_over_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        let peer = Some(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 5000))));
        assert_eq!(voter_address(&headers, peer), "203.0.113.7");
    }

    #[test]
    fn peer_address_is_the_fallback() {
        let peer = Some(ConnectInfo(SocketAddr::from(([192, 168, 1, 9], 5000))));
        assert_eq!(voter_address(&HeaderMap::new(), peer), "192.168.1.9");
        assert_eq!(voter_address(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn option_index_accepts_zero_and_integer_strings() {
        assert_eq!(option_index(Some(&json!(0))).unwrap(), Some(0));
        assert_eq!(option_index(Some(&json!("2"))).unwrap(), Some(2));
        assert_eq!(option_index(Some(&json!(-1))).unwrap(), Some(-1));
        assert_eq!(option_index(None).unwrap(), None);
        assert_eq!(option_index(Some(&Value::Null)).unwrap(), None);
        assert!(option_index(Some(&json!(1.5))).is_err());
        assert!(option_index(Some(&json!("first"))).is_err());
    }

    #[tokio::test]
    async fn public_url_overrides_host() {
        let app = router(AppState::new(
            memory_pool().await,
            test_config(Some("https://vote.example")),
        ));
        let (status, body) = send(
            &app,
            post("/api/polls", "creator", json!({ "title": "T", "options": ["A", "B"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = body["poll"]["id"].as_str().unwrap();
        assert_eq!(body["pollUrl"], format!("https://vote.example/poll/{id}"));
    }

    #[tokio::test]
    async fn create_returns_links_from_visible_host() {
        let app = app().await;
        let (status, body) = send(
            &app,
            post(
                "/api/polls",
                "creator",
                json!({ "title": "Colours", "options": ["Red", "Blue", "Red"] }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["poll"]["options"], json!(["Red", "Blue"]));
        assert_eq!(body["poll"]["description"], "");
        assert!(body["poll"]["created_at"].is_string());
        assert!(body["poll"]["deadline"].is_null());
        let id = body["poll"]["id"].as_str().unwrap();
        assert_eq!(body["pollUrl"], format!("http://polls.test/poll/{id}"));
        assert_eq!(body["resultsUrl"], format!("http://polls.test/results/{id}"));
    }

    #[tokio::test]
    async fn create_with_one_option_is_bad_request() {
        let app = app().await;
        let (status, body) = send(
            &app,
            post("/api/polls", "creator", json!({ "title": "Solo", "options": ["A", " "] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("2"));
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let app = app().await;
        let request = Request::post("/api/polls")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn get_poll_reports_expiry() {
        let app = app().await;
        let id = create(&app, "Lunch", &["Pizza", "Sushi"]).await;

        let (status, body) = send(&app, get(&format!("/api/polls/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["poll"]["isExpired"], false);
        assert_eq!(body["poll"]["title"], "Lunch");
        assert!(body["poll"]["created_at"].is_string());
        assert!(body["poll"].get("createdAt").is_none());
    }

    #[tokio::test]
    async fn unknown_and_malformed_ids_are_not_found() {
        let app = app().await;

        let (status, _) = send(&app, get(&format!("/api/polls/{}", Uuid::new_v4()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, get("/api/polls/not-a-poll/results")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Poll not found");
    }

    #[tokio::test]
    async fn duplicate_vote_is_conflict() {
        let app = app().await;
        let id = create(&app, "Once", &["A", "B"]).await;
        let uri = format!("/api/polls/{id}/vote");

        let (status, body) = send(&app, post(&uri, "198.51.100.1", json!({ "optionIndex": 0 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["resultsUrl"], format!("http://polls.test/results/{id}"));

        let (status, body) = send(&app, post(&uri, "198.51.100.1", json!({ "optionIndex": 1 }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "You have already voted in this poll");

        let (status, _) = send(&app, post(&uri, "198.51.100.2", json!({ "optionIndex": 1 }))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn vote_without_option_is_bad_request() {
        let app = app().await;
        let id = create(&app, "Empty", &["A", "B"]).await;

        let (status, _) = send(&app, post(&format!("/api/polls/{id}/vote"), "x", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn vote_on_unknown_poll_is_not_found() {
        let app = app().await;
        let uri = format!("/api/polls/{}/vote", Uuid::new_v4());
        let (status, _) = send(&app, post(&uri, "x", json!({ "optionIndex": 0 }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn lunch_results() {
        let app = app().await;
        let id = create(&app, "Lunch", &["Pizza", "Sushi"]).await;
        let uri = format!("/api/polls/{id}/vote");

        send(&app, post(&uri, "address-a", json!({ "optionIndex": 0 }))).await;
        send(&app, post(&uri, "address-b", json!({ "optionIndex": 1 }))).await;

        let (status, body) = send(&app, get(&format!("/api/polls/{id}/results"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["results"],
            json!([
                { "option": "Pizza", "votes": 1, "percentage": 50.0 },
                { "option": "Sushi", "votes": 1, "percentage": 50.0 },
            ])
        );
        assert_eq!(body["totalVotes"], 2);
        assert_eq!(body["pollUrl"], format!("http://polls.test/poll/{id}"));
        assert_eq!(body["poll"]["isExpired"], false);
    }
}

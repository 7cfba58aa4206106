//! Character: the external-action provider
//!
//! Quests act on the world through a "character": a bot account that opens
//! issues and posts comments on the player's fork, and reads the player's
//! replies. The engine only sees the `Character` trait; the GitHub REST
//! implementation lives behind it so tests can substitute a scripted double.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// External action failures. The quest engine never wraps or swallows
/// these; they propagate to the trigger handler unchanged.
#[derive(Debug, Error)]
pub enum CharacterError {
    #[error("github request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("github api error: {status} on {url}")]
    Api { status: u16, url: String },

    #[error("invalid repository reference: {0}")]
    BadRepo(String),
}

/// Issue/comment actions a quest stage may take.
#[async_trait]
pub trait Character: Send + Sync {
    /// Open an issue, returning its number.
    async fn create_issue(
        &self,
        repo: &str,
        title: &str,
        body: &str,
    ) -> Result<i64, CharacterError>;

    /// Post a comment on an issue, returning the comment id.
    async fn create_comment(
        &self,
        repo: &str,
        issue: i64,
        body: &str,
    ) -> Result<i64, CharacterError>;

    /// Comment bodies a specific user posted on an issue, keyed by comment
    /// id in ascending order, optionally restricted to comments at or after
    /// `since`.
    async fn comments_from_user_since(
        &self,
        repo: &str,
        issue: i64,
        user_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<BTreeMap<i64, String>, CharacterError>;
}

/// GitHub REST implementation, authenticated with a bot token.
pub struct GithubCharacter {
    client: reqwest::Client,
    token: String,
    api_base: String,
}

impl GithubCharacter {
    pub fn new(token: &str) -> Self {
        Self::with_api_base(token, "https://api.github.com")
    }

    pub fn with_api_base(token: &str, api_base: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.token)
            .header("User-Agent", "gitquest-server")
            .header("Accept", "application/vnd.github+json")
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, CharacterError> {
        if !resp.status().is_success() {
            return Err(CharacterError::Api {
                status: resp.status().as_u16(),
                url: resp.url().to_string(),
            });
        }
        Ok(resp)
    }
}

/// Reduce a repository reference (API URL or full name) to "owner/repo".
fn repo_path(repo: &str) -> Result<String, CharacterError> {
    let parts: Vec<&str> = repo
        .trim_end_matches('/')
        .split('/')
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() < 2 {
        return Err(CharacterError::BadRepo(repo.to_string()));
    }
    Ok(parts[parts.len() - 2..].join("/"))
}

#[derive(Deserialize)]
struct IssueResponse {
    number: i64,
}

#[derive(Deserialize)]
struct CommentResponse {
    id: i64,
    body: String,
    user: CommentUser,
    created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct CommentUser {
    id: i64,
}

#[async_trait]
impl Character for GithubCharacter {
    async fn create_issue(
        &self,
        repo: &str,
        title: &str,
        body: &str,
    ) -> Result<i64, CharacterError> {
        let url = format!("{}/repos/{}/issues", self.api_base, repo_path(repo)?);
        let resp = self
            .request(reqwest::Method::POST, &url)
            .json(&serde_json::json!({ "title": title, "body": body }))
            .send()
            .await?;
        let issue: IssueResponse = Self::check(resp).await?.json().await?;
        debug!("Created issue #{} on {}", issue.number, repo);
        Ok(issue.number)
    }

    async fn create_comment(
        &self,
        repo: &str,
        issue: i64,
        body: &str,
    ) -> Result<i64, CharacterError> {
        let url = format!(
            "{}/repos/{}/issues/{}/comments",
            self.api_base,
            repo_path(repo)?,
            issue
        );
        let resp = self
            .request(reqwest::Method::POST, &url)
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await?;
        let comment: CommentResponse = Self::check(resp).await?.json().await?;
        debug!("Posted comment {} on {}#{}", comment.id, repo, issue);
        Ok(comment.id)
    }

    async fn comments_from_user_since(
        &self,
        repo: &str,
        issue: i64,
        user_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<BTreeMap<i64, String>, CharacterError> {
        let mut url = format!(
            "{}/repos/{}/issues/{}/comments",
            self.api_base,
            repo_path(repo)?,
            issue
        );
        if let Some(since) = since {
            url.push_str(&format!("?since={}", since.to_rfc3339()));
        }

        let resp = self.request(reqwest::Method::GET, &url).send().await?;
        let comments: Vec<CommentResponse> = Self::check(resp).await?.json().await?;

        // `since` filters server-side by update time; keep the creation-time
        // filter as well so edited old comments do not reappear
        Ok(comments
            .into_iter()
            .filter(|c| c.user.id == user_id)
            .filter(|c| since.is_none_or(|s| c.created_at >= s))
            .map(|c| (c.id, c.body))
            .collect())
    }
}

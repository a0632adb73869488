//! Issue and pull request comments, located by marker.
//!
//! A marker is a literal string (usually an HTML comment such as
//! `<!-- release-domains:uat -->`) placed on the first line of the body.
//! Publishing with the same marker updates the one existing comment instead
//! of adding another.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::RemoteError;
use crate::http::{HttpRequest, HttpResponse, HttpTransport};
use crate::repository::RepositorySlug;
use crate::Result;

/// Default REST API root.
pub const GITHUB_API_BASE: &str = "https://api.github.com";

/// Comments requested per page while searching.
pub const PER_PAGE: usize = 100;

const API_VERSION: &str = "2022-11-28";
const ACCEPT: &str = "application/vnd.github.v3+json";

#[derive(Debug, Deserialize)]
struct IssueComment {
    id: u64,
    body: Option<String>,
}

/// What `upsert` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentAction {
    /// Id is absent when the create response carried none.
    Created(Option<u64>),
    Updated(u64),
}

impl CommentAction {
    pub fn id(&self) -> Option<u64> {
        match self {
            CommentAction::Created(id) => *id,
            CommentAction::Updated(id) => Some(*id),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedComment {
    id: Option<u64>,
}

/// Creates or updates marker-tagged comments.
pub struct CommentPublisher {
    transport: Arc<dyn HttpTransport>,
    api_base: String,
}

impl CommentPublisher {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            api_base: GITHUB_API_BASE.to_string(),
        }
    }

    /// Point at a different API root (GitHub Enterprise, tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Find the id of the first comment whose body contains `marker`.
    ///
    /// Lookup failures are logged and reported as "not found".
    pub async fn find(
        &self,
        token: &str,
        repository: &str,
        issue_number: u64,
        marker: &str,
    ) -> Option<u64> {
        match self.find_inner(token, repository, issue_number, marker).await {
            Ok(id) => id,
            Err(e) => {
                warn!(issue = issue_number, error = %e, "Error finding comment");
                None
            }
        }
    }

    async fn find_inner(
        &self,
        token: &str,
        repository: &str,
        issue_number: u64,
        marker: &str,
    ) -> Result<Option<u64>> {
        let slug = RepositorySlug::parse(repository)?;
        let base = format!(
            "{}/repos/{}/{}/issues/{}/comments",
            self.api_base, slug.owner, slug.repo, issue_number
        );

        let mut page = 1usize;
        loop {
            let url = format!("{base}?page={page}&per_page={PER_PAGE}");
            let request = self.authorized(HttpRequest::get(url), token);
            let response = self.transport.send(request).await?;
            let response = ensure_success(response, "Failed to fetch comments")?;

            let comments: Vec<IssueComment> = response.json()?;
            if comments.is_empty() {
                return Ok(None);
            }

            if let Some(found) = comments
                .iter()
                .find(|c| c.body.as_deref().is_some_and(|b| b.contains(marker)))
            {
                return Ok(Some(found.id));
            }

            if comments.len() < PER_PAGE {
                return Ok(None);
            }
            page += 1;
        }
    }

    /// Create or update the comment tagged with `marker`.
    ///
    /// The marker is prepended to `body` as its own line.
    pub async fn upsert(
        &self,
        token: &str,
        repository: &str,
        issue_number: u64,
        body: &str,
        marker: &str,
    ) -> Result<CommentAction> {
        let slug = RepositorySlug::parse(repository)?;
        let payload = json!({ "body": format!("{marker}\n{body}") });

        match self.find(token, repository, issue_number, marker).await {
            Some(comment_id) => {
                let url = format!(
                    "{}/repos/{}/{}/issues/comments/{}",
                    self.api_base, slug.owner, slug.repo, comment_id
                );
                let request = self.authorized(HttpRequest::patch(url, payload), token);
                let response = self.transport.send(request).await?;
                ensure_success(response, "Failed to update comment")?;

                info!(comment_id, "Updated existing comment");
                Ok(CommentAction::Updated(comment_id))
            }
            None => {
                let url = format!(
                    "{}/repos/{}/{}/issues/{}/comments",
                    self.api_base, slug.owner, slug.repo, issue_number
                );
                let request = self.authorized(HttpRequest::post(url, payload), token);
                let response = self.transport.send(request).await?;
                let response = ensure_success(response, "Failed to create comment")?;

                // The comment exists once the API accepted it.
                let id = match response.json::<CreatedComment>() {
                    Ok(created) => created.id,
                    Err(e) => {
                        warn!(error = %e, "Create response was not a comment");
                        None
                    }
                };
                info!(comment_id = ?id, "Created new comment");
                Ok(CommentAction::Created(id))
            }
        }
    }

    fn authorized(&self, request: HttpRequest, token: &str) -> HttpRequest {
        let request = request
            .bearer(token)
            .header("Accept", ACCEPT)
            .header("X-GitHub-Api-Version", API_VERSION);
        if request.body.is_some() {
            request.header("Content-Type", "application/json")
        } else {
            request
        }
    }
}

fn ensure_success(response: HttpResponse, context: &str) -> Result<HttpResponse> {
    if response.is_success() {
        return Ok(response);
    }
    Err(RemoteError::Status {
        context: context.to_string(),
        status: response.status,
        message: format!("HTTP {}: {}", response.status, response.body),
    })
}

//! Client for the code-host API.
//!
//! One call per tool: repository metadata (timestamps, fork and star counts)
//! plus the contributor listing, whose per-contributor contribution counts
//! are summed into a single activity figure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use octocrab::Octocrab;
use serde::Deserialize;
use toolstore::errors::{Result as SyncResult, SyncError};
use toolstore::fetch::CodeHost;
use toolstore::models::RepoInfo;

use crate::error::{RepoFetcherError, Result};

pub struct RepoClient {
    octocrab: Octocrab,
}

impl RepoClient {
    /// Creates a new client.
    ///
    /// Optionally uses a personal access token for authentication to increase
    /// rate limits.
    pub fn new(token: Option<String>) -> Result<Self> {
        let mut builder = Octocrab::builder();
        if let Some(token) = token {
            builder = builder.personal_token(token);
        }
        let octocrab = builder.build().map_err(RepoFetcherError::GitHub)?;
        Ok(Self { octocrab })
    }
}

#[derive(Debug, Deserialize)]
struct ContributorDto {
    #[serde(default)]
    contributions: i64,
}

#[async_trait]
impl CodeHost for RepoClient {
    async fn repo_metrics(&self, owner: &str, repo: &str) -> SyncResult<Option<RepoInfo>> {
        let repository = match self.octocrab.repos(owner, repo).get().await {
            Ok(repository) => repository,
            Err(err) if is_not_found(&err) => return Ok(None),
            Err(err) => return Err(SyncError::Transient(err.to_string())),
        };

        let contributions = match self
            .octocrab
            .get::<Vec<ContributorDto>, _, _>(
                format!("/repos/{owner}/{repo}/contributors"),
                None::<&()>,
            )
            .await
        {
            Ok(contributors) => sum_contributions(&contributors),
            Err(err) => {
                log::warn!("contributor listing failed for {owner}/{repo}: {err}");
                0
            }
        };

        Ok(Some(RepoInfo {
            // The caller keys metrics by the tool's declared link.
            url: String::new(),
            created_at: repository.created_at.map(date_only).unwrap_or_default(),
            updated_at: repository.updated_at.map(date_only).unwrap_or_default(),
            forks: repository.forks_count.unwrap_or(0) as i64,
            stars: repository.stargazers_count.unwrap_or(0) as i64,
            contributions,
        }))
    }
}

fn sum_contributions(contributors: &[ContributorDto]) -> i64 {
    contributors
        .iter()
        .map(|contributor| contributor.contributions)
        .sum()
}

fn date_only(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d").to_string()
}

fn is_not_found(err: &octocrab::Error) -> bool {
    matches!(err, octocrab::Error::GitHub { source, .. } if source.status_code.as_u16() == 404)
}

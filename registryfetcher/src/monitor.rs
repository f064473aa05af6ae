//! Client for the availability monitor.
//!
//! The monitor is asked which endpoint it tracks for a tool (the aggregate
//! lookup), then for that endpoint's recent health checks. The availability
//! score is the rounded percentage of successful checks in the sample.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use toolstore::errors::{Result as SyncResult, SyncError};
use toolstore::fetch::AvailabilityProbe;

use crate::error::{RegistryError, Result};

pub const DEFAULT_MONITOR_URL: &str = "https://openebench.bsc.es/monitor";

/// How many recent health checks the score is computed over.
const HEALTH_CHECK_SAMPLE: usize = 8;

pub struct MonitorClient {
    http: reqwest::Client,
    base_url: String,
}

impl MonitorClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T>(&self, url: &str, query: &[(&str, String)]) -> Result<T>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let response = self.http.get(url).query(query).send().await?;
        if !response.status().is_success() {
            return Err(RegistryError::Api(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }
        Ok(response.json().await?)
    }

    async fn fetch_availability(&self, id: &str) -> Result<Option<u8>> {
        // The monitor indexes tools by lower-cased registry ID.
        let aggregates: Vec<AggregateDto> = self
            .get_json(
                &format!("{}/rest/aggregate", self.base_url),
                &[("id", id.to_lowercase())],
            )
            .await?;

        let Some(endpoint) = monitored_endpoint(&aggregates) else {
            return Ok(None);
        };
        let segments: Vec<&str> = endpoint.rsplit('/').take(3).collect();
        let &[entry, kind, host] = segments.as_slice() else {
            return Ok(None);
        };

        let checks: Vec<CheckDto> = self
            .get_json(
                &format!("{}/rest/homepage/{host}/{kind}/{entry}", self.base_url),
                &[("limit", HEALTH_CHECK_SAMPLE.to_string())],
            )
            .await?;
        Ok(Some(success_percentage(&checks)))
    }
}

#[async_trait]
impl AvailabilityProbe for MonitorClient {
    async fn availability(&self, id: &str) -> SyncResult<Option<u8>> {
        self.fetch_availability(id)
            .await
            .map_err(|err| SyncError::Transient(err.to_string()))
    }
}

#[derive(Debug, Default, Deserialize)]
struct AggregateDto {
    #[serde(default)]
    entities: Vec<EntityDto>,
}

#[derive(Debug, Default, Deserialize)]
struct EntityDto {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    tools: Vec<ToolRefDto>,
}

#[derive(Debug, Deserialize)]
struct ToolRefDto {
    #[serde(rename = "@id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct CheckDto {
    #[serde(default)]
    code: i64,
}

/// Picks which monitored endpoint the score is computed for: the first `web`
/// entity wins outright, otherwise the last entity with any declared type.
fn monitored_endpoint(aggregates: &[AggregateDto]) -> Option<String> {
    let entities = &aggregates.first()?.entities;
    let mut fallback: Option<&str> = None;
    for entity in entities {
        let Some(kind) = entity.kind.as_deref().filter(|k| !k.is_empty()) else {
            continue;
        };
        let Some(tool) = entity.tools.last() else {
            continue;
        };
        if kind == "web" {
            return Some(tool.id.clone());
        }
        fallback = Some(tool.id.as_str());
    }
    fallback.map(str::to_string)
}

fn success_percentage(checks: &[CheckDto]) -> u8 {
    let successes = checks.iter().filter(|check| check.code == 200).count();
    (100.0 * successes as f64 / HEALTH_CHECK_SAMPLE as f64).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(kind: Option<&str>, ids: &[&str]) -> EntityDto {
        EntityDto {
            kind: kind.map(str::to_string),
            tools: ids
                .iter()
                .map(|id| ToolRefDto { id: id.to_string() })
                .collect(),
        }
    }

    #[test]
    fn web_entity_wins_over_later_entities() {
        let aggregates = vec![AggregateDto {
            entities: vec![
                entity(Some("cmd"), &["https://m/host/cmd/one"]),
                entity(Some("web"), &["https://m/host/web/old", "https://m/host/web/new"]),
                entity(Some("db"), &["https://m/host/db/x"]),
            ],
        }];
        assert_eq!(
            monitored_endpoint(&aggregates).as_deref(),
            Some("https://m/host/web/new")
        );
    }

    #[test]
    fn last_typed_entity_is_the_fallback() {
        let aggregates = vec![AggregateDto {
            entities: vec![
                entity(Some("cmd"), &["https://m/host/cmd/one"]),
                entity(None, &["https://m/host/none/x"]),
                entity(Some("db"), &["https://m/host/db/two"]),
            ],
        }];
        assert_eq!(
            monitored_endpoint(&aggregates).as_deref(),
            Some("https://m/host/db/two")
        );
    }

    #[test]
    fn empty_aggregate_has_no_endpoint() {
        assert_eq!(monitored_endpoint(&[]), None);
        assert_eq!(monitored_endpoint(&[AggregateDto::default()]), None);
    }

    #[test]
    fn six_of_eight_checks_is_seventy_five_percent() {
        let checks: Vec<CheckDto> = [200, 200, 200, 404, 200, 200, 500, 200]
            .into_iter()
            .map(|code| CheckDto { code })
            .collect();
        assert_eq!(success_percentage(&checks), 75);
    }

    #[test]
    fn all_failing_checks_score_zero() {
        let checks: Vec<CheckDto> = (0..8).map(|_| CheckDto { code: 503 }).collect();
        assert_eq!(success_percentage(&checks), 0);
    }
}

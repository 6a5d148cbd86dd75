//! bioRxiv / medRxiv preprint client.
//!
//! Uses the details API:
//!   {biorxiv_api}/details/{server}/{from}/{to}/{cursor}/json
//!
//! The API has no free-text search, so recent preprints are paged through
//! and filtered client-side against the query's key terms. Both servers use
//! the same term set.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sciharvest_common::HttpClient;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::{clean_text, json_str, StudySource};
use crate::fetcher::sanitize_identifier;
use crate::models::{Database, Endpoints, SearchQuery, SourceContext, SourceSpec, StudyRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Server {
    BioRxiv,
    MedRxiv,
}

impl Server {
    pub fn as_str(&self) -> &'static str {
        match self {
            Server::BioRxiv => "biorxiv",
            Server::MedRxiv => "medrxiv",
        }
    }

    fn database(&self) -> Database {
        match self {
            Server::BioRxiv => Database::BioRxiv,
            Server::MedRxiv => Database::MedRxiv,
        }
    }

    fn site<'a>(&self, endpoints: &'a Endpoints) -> &'a str {
        match self {
            Server::BioRxiv => &endpoints.biorxiv_site,
            Server::MedRxiv => &endpoints.medrxiv_site,
        }
    }
}

pub struct BioRxivClient {
    client: HttpClient,
    endpoints: Endpoints,
    window_days: i64,
    max_pages: usize,
}

impl BioRxivClient {
    pub fn new(ctx: &SourceContext) -> anyhow::Result<Self> {
        Ok(Self {
            client: ctx.client()?,
            endpoints: ctx.endpoints.clone(),
            window_days: ctx.biorxiv_window_days,
            max_pages: ctx.biorxiv_max_pages,
        })
    }

    /// Pages through one server until `budget` matching preprints are found.
    #[instrument(skip(self, query))]
    async fn fetch_server(
        &self,
        server: Server,
        interval: &str,
        query: &SearchQuery,
        budget: usize,
    ) -> anyhow::Result<Vec<StudyRecord>> {
        let mut matched = Vec::new();
        let mut cursor = 0usize;

        for _ in 0..self.max_pages {
            if matched.len() >= budget {
                break;
            }
            let url = format!(
                "{}/details/{}/{}/{}/json",
                self.endpoints.biorxiv_api,
                server.as_str(),
                interval,
                cursor
            );
            let resp: Value = self.client.get_json(&url, &[], &[]).await?;
            let collection = resp["collection"].as_array().cloned().unwrap_or_default();
            debug!(server = server.as_str(), cursor, fetched = collection.len(), "bioRxiv API page");
            if collection.is_empty() {
                break;
            }
            cursor += collection.len();

            for item in &collection {
                let title = item["title"].as_str().unwrap_or("");
                let abstract_text = item["abstract"].as_str().unwrap_or("");
                if !query.matches(title, abstract_text) {
                    continue;
                }
                matched.push(parse_item(item, server, &self.endpoints));
                if matched.len() >= budget {
                    break;
                }
            }
        }

        if matched.is_empty() {
            warn!(server = server.as_str(), "No matching preprints in window");
        }
        Ok(matched)
    }
}

#[async_trait]
impl StudySource for BioRxivClient {
    fn spec(&self) -> SourceSpec {
        SourceSpec::BioRxiv
    }

    async fn fetch_records(
        &self,
        query: &SearchQuery,
        max_results: usize,
    ) -> anyhow::Result<Vec<StudyRecord>> {
        let today = Utc::now().date_naive();
        let from = today - Duration::days(self.window_days);
        let interval = format!("{}/{}", from, today);

        let mut records = Vec::new();
        let mut last_err = None;
        for server in [Server::BioRxiv, Server::MedRxiv] {
            let budget = max_results.saturating_sub(records.len());
            if budget == 0 {
                break;
            }
            match self.fetch_server(server, &interval, query, budget).await {
                Ok(found) => records.extend(found),
                Err(e) => {
                    warn!(server = server.as_str(), error = %e, "Preprint server failed");
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) if records.is_empty() => Err(e),
            _ => Ok(records),
        }
    }

    /// `{server}_{doi suffix}`, e.g. `biorxiv_2023.01.01.500001`.
    fn file_identifier(&self, record: &StudyRecord) -> String {
        let prefix = match record.database {
            Database::MedRxiv => "medrxiv",
            _ => "biorxiv",
        };
        let suffix = record
            .doi
            .as_deref()
            .and_then(|d| d.rsplit('/').next())
            .filter(|s| !s.is_empty())
            .unwrap_or(record.unique_id.as_str());
        sanitize_identifier(&format!("{}_{}", prefix, suffix))
    }
}

pub(crate) fn parse_item(item: &Value, server: Server, endpoints: &Endpoints) -> StudyRecord {
    let mut r = StudyRecord::new(server.database());
    if let Some(t) = json_str(&item["title"]) {
        r.title = clean_text(&t);
    }
    r.authors = item["authors"]
        .as_str()
        .unwrap_or("")
        .split(';')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    r.journal = match server {
        Server::BioRxiv => "bioRxiv".to_string(),
        Server::MedRxiv => "medRxiv".to_string(),
    };
    if let Some(d) = json_str(&item["date"]) {
        r.publication_date = d;
    }
    if let Some(a) = json_str(&item["abstract"]) {
        r.abstract_text = clean_text(&a);
    }
    r.doi = json_str(&item["doi"]);
    r.source_url = match &r.doi {
        Some(doi) => format!("{}/content/{}", server.site(endpoints), doi),
        None => String::new(),
    };
    r
}

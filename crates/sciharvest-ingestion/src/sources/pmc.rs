//! PubMed Central client (E-utilities, db=pmc).
//!
//! esearch returns numeric PMC uids; esummary returns JSON document
//! summaries keyed by uid.

use async_trait::async_trait;
use sciharvest_common::HttpClient;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{clean_text, json_str, StudySource};
use crate::models::{
    normalize_pmcid, Database, Endpoints, SearchQuery, SourceContext, SourceSpec, StudyRecord,
};

pub struct PmcClient {
    client: HttpClient,
    endpoints: Endpoints,
    api_key: Option<String>,
}

impl PmcClient {
    pub fn new(ctx: &SourceContext) -> anyhow::Result<Self> {
        Ok(Self {
            client: ctx.client()?,
            endpoints: ctx.endpoints.clone(),
            api_key: ctx.pubmed_api_key.clone(),
        })
    }

    fn params(&self, extra: Vec<(&'static str, String)>) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("db", "pmc".to_string()),
            ("retmode", "json".to_string()),
        ];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        params.extend(extra);
        params
    }

    #[instrument(skip(self))]
    async fn esearch(&self, term: &str, max: usize) -> anyhow::Result<Vec<String>> {
        let params = self.params(vec![
            ("term", format!("{} AND open access[filter]", term)),
            ("retmax", max.to_string()),
        ]);
        let url = format!("{}/esearch.fcgi", self.endpoints.eutils);
        let resp: Value = self.client.get_json(&url, &params, &[]).await?;

        let ids: Vec<String> = resp["esearchresult"]["idlist"]
            .as_array()
            .map(|ids| ids.iter().filter_map(json_str).collect())
            .unwrap_or_default();
        debug!(n = ids.len(), "PMC esearch returned uids");
        Ok(ids)
    }

    #[instrument(skip(self))]
    async fn esummary(&self, uids: &[String]) -> anyhow::Result<Vec<StudyRecord>> {
        if uids.is_empty() {
            return Ok(vec![]);
        }
        let params = self.params(vec![("id", uids.join(","))]);
        let url = format!("{}/esummary.fcgi", self.endpoints.eutils);
        let resp: Value = self.client.get_json(&url, &params, &[]).await?;
        Ok(parse_summaries(&resp, uids, &self.endpoints))
    }
}

#[async_trait]
impl StudySource for PmcClient {
    fn spec(&self) -> SourceSpec {
        SourceSpec::Pmc
    }

    async fn fetch_records(
        &self,
        query: &SearchQuery,
        max_results: usize,
    ) -> anyhow::Result<Vec<StudyRecord>> {
        let uids = self.esearch(&query.boolean_query(), max_results).await?;
        self.esummary(&uids).await
    }
}

/// Builds records from an esummary response, in `uids` order.
pub(crate) fn parse_summaries(resp: &Value, uids: &[String], endpoints: &Endpoints) -> Vec<StudyRecord> {
    let result = &resp["result"];
    uids.iter()
        .filter_map(|uid| {
            let doc = result.get(uid)?;
            if !doc.is_object() {
                return None;
            }
            let mut r = StudyRecord::new(Database::Pmc);

            if let Some(t) = json_str(&doc["title"]) {
                r.title = clean_text(&t);
            }
            r.authors = doc["authors"]
                .as_array()
                .map(|a| a.iter().filter_map(|x| json_str(&x["name"])).collect())
                .unwrap_or_default();
            if let Some(j) = json_str(&doc["fulljournalname"]).or_else(|| json_str(&doc["source"])) {
                r.journal = j;
            }
            if let Some(d) = json_str(&doc["pubdate"]).or_else(|| json_str(&doc["epubdate"])) {
                r.publication_date = d;
            }

            if let Some(ids) = doc["articleids"].as_array() {
                for id in ids {
                    let value = json_str(&id["value"]);
                    match id["idtype"].as_str() {
                        Some("doi") => r.doi = value,
                        Some("pmid") => r.pmid = value.filter(|v| v != "0"),
                        Some("pmcid") => r.pmcid = value.as_deref().and_then(normalize_pmcid),
                        _ => {}
                    }
                }
            }
            if r.pmcid.is_none() {
                r.pmcid = normalize_pmcid(uid);
            }
            let pmcid = r.pmcid.clone().unwrap_or_else(|| format!("PMC{}", uid));
            r.source_url = endpoints.pmc_article(&pmcid);
            r.unique_id = pmcid;
            Some(r)
        })
        .collect()
}

//! Europe PMC REST API client.
//!
//! Endpoint: {europepmc_api}/search (resultType=core, cursorMark paging)

use async_trait::async_trait;
use sciharvest_common::HttpClient;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{clean_text, json_str, StudySource};
use crate::models::{
    normalize_pmcid, Database, Endpoints, SearchQuery, SourceContext, SourceSpec, StudyRecord,
};

const MAX_PAGE_SIZE: usize = 100;

pub struct EuropePmcClient {
    client: HttpClient,
    endpoints: Endpoints,
}

impl EuropePmcClient {
    pub fn new(ctx: &SourceContext) -> anyhow::Result<Self> {
        Ok(Self { client: ctx.client()?, endpoints: ctx.endpoints.clone() })
    }
}

#[async_trait]
impl StudySource for EuropePmcClient {
    fn spec(&self) -> SourceSpec {
        SourceSpec::EuropePmc
    }

    #[instrument(skip(self))]
    async fn fetch_records(
        &self,
        query: &SearchQuery,
        max_results: usize,
    ) -> anyhow::Result<Vec<StudyRecord>> {
        let url = format!("{}/search", self.endpoints.europepmc_api);
        let mut records = Vec::new();
        let mut cursor = "*".to_string();

        while records.len() < max_results {
            let page_size = (max_results - records.len()).min(MAX_PAGE_SIZE);
            let params = [
                ("query", query.boolean_query()),
                ("resultType", "core".to_string()),
                ("pageSize", page_size.to_string()),
                ("format", "json".to_string()),
                ("cursorMark", cursor.clone()),
            ];
            let resp: Value = self.client.get_json(&url, &params, &[]).await?;

            let results = resp["resultList"]["result"].as_array().cloned().unwrap_or_default();
            debug!(count = results.len(), "Europe PMC search page");
            if results.is_empty() {
                break;
            }
            records.extend(results.iter().map(|r| parse_result(r, &self.endpoints)));

            match json_str(&resp["nextCursorMark"]) {
                Some(next) if next != cursor => cursor = next,
                _ => break,
            }
        }

        records.truncate(max_results);
        Ok(records)
    }
}

/// Normalises one `resultList.result` entry.
pub(crate) fn parse_result(r: &Value, endpoints: &Endpoints) -> StudyRecord {
    let mut rec = StudyRecord::new(Database::EuropePmc);

    if let Some(t) = json_str(&r["title"]) {
        rec.title = clean_text(&t);
    }
    rec.authors = match r["authorList"]["author"].as_array() {
        Some(list) => list.iter().filter_map(|a| json_str(&a["fullName"])).collect(),
        None => json_str(&r["authorString"])
            .map(|s| {
                s.trim_end_matches('.')
                    .split(',')
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
    };
    if let Some(j) = json_str(&r["journalInfo"]["journal"]["title"])
        .or_else(|| json_str(&r["journalTitle"]))
        .or_else(|| json_str(&r["bookOrReportDetails"]["publisher"]))
    {
        rec.journal = j;
    }
    if let Some(d) = json_str(&r["firstPublicationDate"]).or_else(|| json_str(&r["pubYear"])) {
        rec.publication_date = d;
    }
    if let Some(a) = json_str(&r["abstractText"]) {
        rec.abstract_text = clean_text(&a);
    }

    rec.doi = json_str(&r["doi"]);
    rec.pmid = json_str(&r["pmid"]);
    rec.pmcid = json_str(&r["pmcid"]).as_deref().and_then(normalize_pmcid);

    let source = json_str(&r["source"]).unwrap_or_else(|| "MED".to_string());
    let id = json_str(&r["id"]).or_else(|| rec.pmid.clone());
    rec.source_url = match &id {
        Some(id) => format!("{}/article/{}/{}", endpoints.europepmc_site, source.to_lowercase(), id),
        None => String::new(),
    };
    rec.unique_id = rec.pmid.clone().or(id).unwrap_or_default();
    rec.source_type = Some(source);

    rec.pdf_link = open_access_pdf(r);
    rec
}

/// A free full-text PDF from `fullTextUrlList`, if the API lists one.
fn open_access_pdf(r: &Value) -> Option<String> {
    r["fullTextUrlList"]["fullTextUrl"]
        .as_array()?
        .iter()
        .filter(|u| u["documentStyle"].as_str() == Some("pdf"))
        .find(|u| matches!(u["availabilityCode"].as_str(), Some("OA") | Some("F")))
        .and_then(|u| json_str(&u["url"]))
}

//! Semantic Scholar Graph API client.
//!
//! Endpoint: {semantic_scholar_api}/paper/search

use async_trait::async_trait;
use sciharvest_common::HttpClient;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{clean_text, json_str, StudySource};
use crate::fetcher::sanitize_identifier;
use crate::models::{Database, Endpoints, SearchQuery, SourceContext, SourceSpec, StudyRecord};

const FIELDS: &str = "paperId,title,abstract,url,year,journal,authors,openAccessPdf,externalIds";
const MAX_PAGE_SIZE: usize = 100;

pub struct SemanticScholarClient {
    client: HttpClient,
    endpoints: Endpoints,
    api_key: Option<String>,
}

impl SemanticScholarClient {
    pub fn new(ctx: &SourceContext) -> anyhow::Result<Self> {
        Ok(Self {
            client: ctx.client()?,
            endpoints: ctx.endpoints.clone(),
            api_key: ctx.semantic_scholar_api_key.clone(),
        })
    }
}

#[async_trait]
impl StudySource for SemanticScholarClient {
    fn spec(&self) -> SourceSpec {
        SourceSpec::SemanticScholar
    }

    #[instrument(skip(self))]
    async fn fetch_records(
        &self,
        query: &SearchQuery,
        max_results: usize,
    ) -> anyhow::Result<Vec<StudyRecord>> {
        let url = format!("{}/paper/search", self.endpoints.semantic_scholar_api);
        let text = std::iter::once(query.query.as_str())
            .chain(query.terms.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        let headers: Vec<(&'static str, String)> = self
            .api_key
            .iter()
            .map(|k| ("x-api-key", k.clone()))
            .collect();

        let mut records = Vec::new();
        let mut offset = 0usize;
        while records.len() < max_results {
            let limit = (max_results - records.len()).min(MAX_PAGE_SIZE);
            let params = [
                ("query", text.clone()),
                ("offset", offset.to_string()),
                ("limit", limit.to_string()),
                ("fields", FIELDS.to_string()),
            ];
            let resp: Value = self.client.get_json(&url, &params, &headers).await?;
            let data = resp["data"].as_array().cloned().unwrap_or_default();
            debug!(offset, count = data.len(), "Semantic Scholar page");
            if data.is_empty() {
                break;
            }
            offset += data.len();
            records.extend(data.iter().map(parse_paper));
            if resp["next"].is_null() {
                break;
            }
        }

        records.truncate(max_results);
        Ok(records)
    }

    fn file_identifier(&self, record: &StudyRecord) -> String {
        let id = record.paper_id.as_deref().unwrap_or(record.unique_id.as_str());
        sanitize_identifier(&format!("semantic_{}", id.replace('/', "_")))
    }
}

pub(crate) fn parse_paper(item: &Value) -> StudyRecord {
    let mut r = StudyRecord::new(Database::SemanticScholar);
    if let Some(t) = json_str(&item["title"]) {
        r.title = clean_text(&t);
    }
    r.authors = item["authors"]
        .as_array()
        .map(|a| a.iter().filter_map(|x| json_str(&x["name"])).collect())
        .unwrap_or_default();
    if let Some(j) = json_str(&item["journal"]["name"]) {
        r.journal = j;
    }
    if let Some(y) = json_str(&item["year"]) {
        r.publication_date = y;
    }
    if let Some(a) = json_str(&item["abstract"]) {
        r.abstract_text = clean_text(&a);
    }
    r.paper_id = json_str(&item["paperId"]);
    r.source_url = json_str(&item["url"]).unwrap_or_default();
    r.pdf_link = json_str(&item["openAccessPdf"]["url"]);

    let ids = &item["externalIds"];
    r.doi = json_str(&ids["DOI"]);
    r.pmid = json_str(&ids["PubMed"]);
    r.pmcid = json_str(&ids["PubMedCentral"]).as_deref().and_then(crate::models::normalize_pmcid);
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_paper() {
        let item = json!({
            "paperId": "abc123",
            "title": "NMN pharmacokinetics",
            "year": 2022,
            "journal": {"name": "Scientific Reports"},
            "authors": [{"name": "A"}, {"name": null}],
            "url": "https://www.semanticscholar.org/paper/abc123",
            "openAccessPdf": {"url": "https://www.nature.com/articles/s41598-022-00001.pdf"},
            "externalIds": {"DOI": "10.1038/s41598-022-00001", "PubMedCentral": "9000001"}
        });
        let r = parse_paper(&item);
        assert_eq!(r.publication_date, "2022");
        assert_eq!(r.authors, vec!["A"]);
        assert_eq!(r.pmcid.as_deref(), Some("PMC9000001"));
        assert!(r.pdf_link.is_some());
    }

    #[test]
    fn test_null_open_access_pdf() {
        let r = parse_paper(&json!({"paperId": "x", "openAccessPdf": null, "journal": null}));
        assert!(r.pdf_link.is_none());
        assert_eq!(r.journal, crate::models::UNKNOWN_JOURNAL);
    }
}

//! DOAJ (Directory of Open Access Journals) article search.
//!
//! Endpoint: {doaj_api}/search/articles/{query}?page=N&pageSize=M
//!
//! The path query takes boolean syntax, so refinement terms are AND-ed in the
//! same way as for the E-utilities sources.

use async_trait::async_trait;
use sciharvest_common::HttpClient;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use super::{clean_text, json_str, StudySource};
use crate::fetcher::sanitize_identifier;
use crate::models::{Database, Endpoints, SearchQuery, SourceContext, SourceSpec, StudyRecord};

const MAX_PAGE_SIZE: usize = 100;

pub struct DoajClient {
    client: HttpClient,
    endpoints: Endpoints,
}

impl DoajClient {
    pub fn new(ctx: &SourceContext) -> anyhow::Result<Self> {
        Ok(Self { client: ctx.client()?, endpoints: ctx.endpoints.clone() })
    }
}

#[async_trait]
impl StudySource for DoajClient {
    fn spec(&self) -> SourceSpec {
        SourceSpec::Doaj
    }

    #[instrument(skip(self))]
    async fn fetch_records(
        &self,
        query: &SearchQuery,
        max_results: usize,
    ) -> anyhow::Result<Vec<StudyRecord>> {
        let url = search_url(&self.endpoints.doaj_api, &query.boolean_query())?;
        let page_size = max_results.clamp(1, MAX_PAGE_SIZE);

        let mut records = Vec::new();
        let mut page = 1usize;
        while records.len() < max_results {
            let params = [("page", page.to_string()), ("pageSize", page_size.to_string())];
            let resp: Value = self.client.get_json(&url, &params, &[]).await?;
            let results = resp["results"].as_array().cloned().unwrap_or_default();
            debug!(page, count = results.len(), "DOAJ search page");
            if results.is_empty() {
                break;
            }
            let full_page = results.len() >= page_size;
            records.extend(results.iter().map(|item| parse_article(&item["bibjson"], &self.endpoints)));
            if !full_page {
                break;
            }
            page += 1;
        }

        records.truncate(max_results);
        Ok(records)
    }

    fn file_identifier(&self, record: &StudyRecord) -> String {
        let id = record.doi.as_deref().unwrap_or(record.unique_id.as_str());
        sanitize_identifier(&format!("doaj_{}", id.replace('/', "_")))
    }
}

/// `{api}/search/articles/{query}` with the query as one encoded path segment.
fn search_url(api: &str, query: &str) -> anyhow::Result<String> {
    let mut url = Url::parse(&format!("{}/search/articles", api.trim_end_matches('/')))?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("DOAJ endpoint cannot carry a path: {}", api))?
        .push(query);
    Ok(url.to_string())
}

/// DOI from `bibjson.identifier`, which is a list of `{type, id}` in current
/// responses and a `{doi: ...}` object in older ones.
fn extract_doi(identifier: &Value) -> Option<String> {
    match identifier {
        Value::Array(list) => list
            .iter()
            .find(|i| i["type"].as_str().map(|t| t.eq_ignore_ascii_case("doi")).unwrap_or(false))
            .and_then(|i| json_str(&i["id"])),
        Value::Object(_) => json_str(&identifier["doi"]),
        _ => None,
    }
}

pub(crate) fn parse_article(bib: &Value, endpoints: &Endpoints) -> StudyRecord {
    let mut r = StudyRecord::new(Database::Doaj);

    if let Some(t) = json_str(&bib["title"]) {
        r.title = clean_text(&t);
    }
    r.authors = bib["author"]
        .as_array()
        .map(|authors| {
            authors
                .iter()
                .filter_map(|a| {
                    json_str(&a["name"]).or_else(|| {
                        let parts: Vec<String> = [json_str(&a["given"]), json_str(&a["family"])]
                            .into_iter()
                            .flatten()
                            .collect();
                        (!parts.is_empty()).then(|| parts.join(" "))
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    if let Some(j) = json_str(&bib["journal"]["title"]) {
        r.journal = j;
    }
    if let Some(year) = json_str(&bib["year"]) {
        r.publication_date = match json_str(&bib["month"]) {
            Some(month) => format!("{}-{:0>2}", year, month),
            None => year,
        };
    }
    if let Some(a) = json_str(&bib["abstract"]) {
        r.abstract_text = clean_text(&a);
    }
    r.doi = extract_doi(&bib["identifier"]);

    let mut fulltext = None;
    if let Some(links) = bib["link"].as_array() {
        for link in links {
            let url = json_str(&link["url"]);
            if link["type"].as_str() == Some("fulltext") && fulltext.is_none() {
                fulltext = url.clone();
            }
            let content_type = link["content_type"].as_str().unwrap_or("").to_lowercase();
            if content_type == "application/pdf" || content_type == "pdf" {
                r.pdf_link = url;
            }
        }
    }
    r.source_url = fulltext
        .or_else(|| r.doi.as_deref().map(|d| endpoints.doi_url(d)))
        .unwrap_or_default();
    r
}

//! ScienceDirect open-access search (HTML scrape).
//!
//! ScienceDirect has no keyless search API; the public results page is
//! parsed instead. The article PII is kept as `paper_id` so the resolver can
//! template the `/pdfft` download URL.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use sciharvest_common::HttpClient;
use tracing::{debug, instrument};
use url::Url;

use super::{clean_text, StudySource};
use crate::models::{Database, Endpoints, SearchQuery, SourceContext, SourceSpec, StudyRecord};

const PAGE_SIZE: usize = 25;

lazy_static! {
    static ref RESULT: Selector = Selector::parse(".result-item-content").unwrap();
    static ref TITLE: Selector = Selector::parse("a.result-list-title-link").unwrap();
    static ref AUTHOR: Selector = Selector::parse(".authors .author").unwrap();
    static ref JOURNAL: Selector = Selector::parse(".publication-title").unwrap();
    static ref DATE: Selector = Selector::parse(".srctitle-date-fields .preceding-comma").unwrap();
    static ref PII: Regex = Regex::new(r"/pii/([A-Z0-9]+)").unwrap();
}

pub struct ScienceDirectClient {
    client: HttpClient,
    endpoints: Endpoints,
}

impl ScienceDirectClient {
    pub fn new(ctx: &SourceContext) -> anyhow::Result<Self> {
        Ok(Self { client: ctx.client()?, endpoints: ctx.endpoints.clone() })
    }
}

#[async_trait]
impl StudySource for ScienceDirectClient {
    fn spec(&self) -> SourceSpec {
        SourceSpec::ScienceDirect
    }

    #[instrument(skip(self))]
    async fn fetch_records(
        &self,
        query: &SearchQuery,
        max_results: usize,
    ) -> anyhow::Result<Vec<StudyRecord>> {
        let url = format!("{}/search", self.endpoints.sciencedirect_site);
        let mut records = Vec::new();
        let mut offset = 0usize;

        while records.len() < max_results {
            let params = [
                ("qs", query.query.clone()),
                ("show", PAGE_SIZE.to_string()),
                ("offset", offset.to_string()),
                ("accessTypes", "openaccess".to_string()),
            ];
            let page = self.client.get_page_with(&url, &params).await?;
            let found = parse_results(&page.body, &page.final_url);
            debug!(offset, count = found.len(), "ScienceDirect results page");
            if found.is_empty() {
                break;
            }
            let full_page = found.len() >= PAGE_SIZE;
            records.extend(found);
            if !full_page {
                break;
            }
            offset += PAGE_SIZE;
        }

        records.truncate(max_results);
        Ok(records)
    }
}

/// PII embedded in a ScienceDirect article URL.
pub fn pii_from_url(url: &str) -> Option<String> {
    PII.captures(url).map(|c| c[1].to_string())
}

pub(crate) fn parse_results(html: &str, page_url: &str) -> Vec<StudyRecord> {
    let doc = Html::parse_document(html);
    let base = Url::parse(page_url).ok();

    doc.select(&RESULT)
        .filter_map(|item| {
            let link = item.select(&TITLE).next()?;
            let href = link.value().attr("href")?;
            let article_url = match &base {
                Some(b) => b.join(href).ok()?.to_string(),
                None => href.to_string(),
            };

            let mut r = StudyRecord::new(Database::ScienceDirect);
            r.title = clean_text(&link.text().collect::<String>());
            r.authors = item
                .select(&AUTHOR)
                .map(|a| clean_text(&a.text().collect::<String>()))
                .filter(|a| !a.is_empty())
                .collect();
            if let Some(j) = item.select(&JOURNAL).next() {
                r.journal = clean_text(&j.text().collect::<String>());
            }
            if let Some(d) = item.select(&DATE).next() {
                r.publication_date = clean_text(&d.text().collect::<String>()).replace(',', "");
            }
            r.paper_id = pii_from_url(&article_url);
            r.source_url = article_url;
            Some(r)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
    <ol>
      <li><div class="result-item-content">
        <h2><a class="result-list-title-link" href="/science/article/pii/S1550413122000018">NMN in <em>humans</em></a></h2>
        <div class="srctitle-date-fields"><span class="publication-title">Cell Metabolism</span><span class="preceding-comma">March 2022,</span></div>
        <ol class="authors"><li class="author">Jane Roe</li><li class="author">John Doe</li></ol>
      </div></li>
      <li><div class="result-item-content"><span>no link</span></div></li>
    </ol>"#;

    #[test]
    fn test_parse_results_page() {
        let records = parse_results(PAGE, "https://www.sciencedirect.com/search?qs=nmn");
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.title, "NMN in humans");
        assert_eq!(r.source_url, "https://www.sciencedirect.com/science/article/pii/S1550413122000018");
        assert_eq!(r.paper_id.as_deref(), Some("S1550413122000018"));
        assert_eq!(r.journal, "Cell Metabolism");
        assert_eq!(r.publication_date, "March 2022");
        assert_eq!(r.authors, vec!["Jane Roe", "John Doe"]);
    }
}

//! Google Scholar results scraper.
//!
//! Scholar is the most scrape-defensive source: pages are fetched slowly,
//! a robot-check page stops pagination, and the per-record delay is doubled.
//! `[PDF]` side links are unreliable, so they are probed before use.

use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use rand::seq::SliceRandom;
use regex::Regex;
use scraper::{Html, Selector};
use sciharvest_common::HttpClient;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{clean_text, StudySource};
use crate::fetcher::probe_pdf;
use crate::models::{Database, Endpoints, SearchQuery, SourceContext, SourceSpec, StudyRecord};
use crate::resolver::{PdfResolver, Resolution, Strategy};

const RESULTS_PER_PAGE: usize = 10;
const MAX_REFINEMENT_TERMS: usize = 3;
const ROBOT_MARKER: &str = "Please show you're not a robot";

lazy_static! {
    static ref RESULT: Selector = Selector::parse(".gs_r.gs_or.gs_scl").unwrap();
    static ref TITLE: Selector = Selector::parse(".gs_rt a").unwrap();
    static ref BYLINE: Selector = Selector::parse(".gs_a").unwrap();
    static ref SNIPPET: Selector = Selector::parse(".gs_rs").unwrap();
    static ref SIDE_LINK: Selector = Selector::parse(".gs_or_ggsm a, .gs_or_btn a").unwrap();
    static ref NEXT: Selector = Selector::parse("a.gs_ico_nav_next, .gs_ico_nav_next").unwrap();
    static ref YEAR: Regex = Regex::new(r"\b(?:19|20)\d{2}\b").unwrap();
    static ref VENUE: Regex = Regex::new(r" - (.*?), \d{4}").unwrap();
}

pub struct GoogleScholarClient {
    client: HttpClient,
    endpoints: Endpoints,
    page_delay: Duration,
}

/// One parsed results page.
#[derive(Debug, Default)]
pub(crate) struct ScholarPage {
    pub records: Vec<StudyRecord>,
    pub has_next: bool,
    pub blocked: bool,
}

impl GoogleScholarClient {
    pub fn new(ctx: &SourceContext) -> anyhow::Result<Self> {
        Ok(Self {
            client: ctx.client()?,
            endpoints: ctx.endpoints.clone(),
            page_delay: ctx.scholar_page_delay,
        })
    }

    /// Query plus at most three randomly chosen refinement terms.
    fn scholar_query(query: &SearchQuery) -> String {
        let mut rng = rand::thread_rng();
        let picked: Vec<&String> = query
            .terms
            .choose_multiple(&mut rng, MAX_REFINEMENT_TERMS)
            .collect();
        std::iter::once(query.query.as_str())
            .chain(picked.into_iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl StudySource for GoogleScholarClient {
    fn spec(&self) -> SourceSpec {
        SourceSpec::GoogleScholar
    }

    #[instrument(skip(self))]
    async fn fetch_records(
        &self,
        query: &SearchQuery,
        max_results: usize,
    ) -> anyhow::Result<Vec<StudyRecord>> {
        let q = Self::scholar_query(query);
        let url = format!("{}/scholar", self.endpoints.google_scholar);
        info!(query = %q, "Searching Google Scholar");

        let mut records: Vec<StudyRecord> = Vec::new();
        let mut page_no = 0usize;
        while records.len() < max_results {
            if page_no > 0 {
                tokio::time::sleep(self.page_delay).await;
            }
            let mut params = vec![
                ("q", q.clone()),
                ("hl", "en".to_string()),
                ("as_sdt", "0,5".to_string()),
                ("as_vis", "1".to_string()),
            ];
            if page_no > 0 {
                params.push(("start", (page_no * RESULTS_PER_PAGE).to_string()));
            }

            let page = match self.client.get_page_with(&url, &params).await {
                Ok(p) => p,
                Err(e) if page_no == 0 => return Err(e.into()),
                Err(e) => {
                    warn!(page = page_no, error = %e, "Scholar page failed, keeping earlier results");
                    break;
                }
            };
            if page.final_url.contains("sorry") || page.final_url.contains("robot") {
                warn!("Google Scholar redirected to a robot check");
                break;
            }

            let parsed = parse_page(&page.body, records.len());
            if parsed.blocked {
                warn!("Google Scholar detected scraping activity");
                break;
            }
            debug!(page = page_no, count = parsed.records.len(), "Scholar results page");
            if parsed.records.is_empty() {
                break;
            }
            for r in parsed.records {
                records.push(r);
                if records.len() >= max_results {
                    break;
                }
            }
            if !parsed.has_next {
                break;
            }
            page_no += 1;
        }

        Ok(records)
    }

    /// Verifies the `[PDF]` link, then the landing URL itself, before
    /// falling back to the shared chain.
    async fn resolve_pdf(&self, record: &StudyRecord, resolver: &PdfResolver) -> Option<Resolution> {
        if let Some(link) = record.pdf_link.as_deref() {
            match probe_pdf(&self.client, link).await {
                Some(url) => return Some(Resolution { url, strategy: Strategy::DirectMetadata }),
                None => debug!(link, "Scholar PDF link did not verify"),
            }
        }
        if !record.source_url.is_empty() {
            if let Some(url) = probe_pdf(&self.client, &record.source_url).await {
                return Some(Resolution { url, strategy: Strategy::SourcePage });
            }
        }

        let mut unverified = record.clone();
        unverified.pdf_link = None;
        resolver.resolve(&unverified).await
    }

    fn delay_factor(&self) -> u32 {
        2
    }
}

/// `gs_{second-level domain}_{n}`, or `gs_{n}` for odd hosts.
fn scholar_unique_id(article_url: &str, n: usize) -> String {
    let host = Url::parse(article_url).ok().and_then(|u| u.host_str().map(String::from));
    match host {
        Some(h) => {
            let parts: Vec<&str> = h.split('.').collect();
            if parts.len() > 1 {
                format!("gs_{}_{}", parts[parts.len() - 2], n)
            } else {
                format!("gs_{}", n)
            }
        }
        None => format!("gs_{}", n),
    }
}

/// Parses a results page. `offset` is the number of records already held.
pub(crate) fn parse_page(html: &str, offset: usize) -> ScholarPage {
    if html.contains(ROBOT_MARKER) {
        return ScholarPage { blocked: true, ..ScholarPage::default() };
    }
    let doc = Html::parse_document(html);
    let mut page = ScholarPage::default();

    for item in doc.select(&RESULT) {
        let Some(link) = item.select(&TITLE).next() else { continue };
        let href = link.value().attr("href").unwrap_or("");
        if !(href.starts_with("http://") || href.starts_with("https://")) {
            continue;
        }

        let mut r = StudyRecord::new(Database::GoogleScholar);
        r.title = clean_text(&link.text().collect::<String>());
        r.source_url = href.to_string();

        let byline = item
            .select(&BYLINE)
            .next()
            .map(|b| clean_text(&b.text().collect::<String>()))
            .unwrap_or_default();
        if !byline.is_empty() {
            let authors_part = byline.split(" - ").next().unwrap_or(byline.as_str());
            r.authors = authors_part
                .split(',')
                .map(|a| a.trim().trim_start_matches('…').trim().to_string())
                .filter(|a| !a.is_empty())
                .collect();
            if let Some(y) = YEAR.find(&byline) {
                r.publication_date = y.as_str().to_string();
            }
            if let Some(v) = VENUE.captures(&byline) {
                r.journal = v[1].trim().to_string();
            }
        }
        if let Some(s) = item.select(&SNIPPET).next() {
            let snippet = clean_text(&s.text().collect::<String>());
            if !snippet.is_empty() {
                r.abstract_text = snippet;
            }
        }
        r.pdf_link = item
            .select(&SIDE_LINK)
            .find(|a| a.text().collect::<String>().contains("PDF"))
            .and_then(|a| a.value().attr("href"))
            .filter(|h| !h.is_empty())
            .map(String::from);
        r.unique_id = scholar_unique_id(href, offset + page.records.len());
        page.records.push(r);
    }

    page.has_next = doc
        .select(&NEXT)
        .next()
        .map(|n| !n.value().classes().any(|c| c == "disabled"))
        .unwrap_or(false);
    page
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
    <div class="gs_r gs_or gs_scl">
      <div class="gs_ggs gs_fl"><div class="gs_or_ggsm"><a href="https://www.mdpi.com/2072-6643/13/1/1/pdf"><span>[PDF]</span> mdpi.com</a></div></div>
      <h3 class="gs_rt"><a href="https://www.mdpi.com/2072-6643/13/1/1">Effect of <b>NMN</b> on adults</a></h3>
      <div class="gs_a">J Smith, A Doe - Nutrients, 2021 - mdpi.com</div>
      <div class="gs_rs">A randomized trial of NMN.</div>
    </div>
    <div class="gs_r gs_or gs_scl">
      <h3 class="gs_rt"><a href="/citations?user=x">Not an article</a></h3>
    </div>
    <div class="gs_r gs_or gs_scl">
      <h3 class="gs_rt"><a href="https://pubmed.ncbi.nlm.nih.gov/1/">Second</a></h3>
    </div>
    <a class="gs_ico_nav_next" href="/scholar?start=10">Next</a>"#;

    #[test]
    fn test_parse_results_page() {
        let page = parse_page(PAGE, 0);
        assert!(!page.blocked);
        assert!(page.has_next);
        assert_eq!(page.records.len(), 2);

        let r = &page.records[0];
        assert_eq!(r.title, "Effect of NMN on adults");
        assert_eq!(r.authors, vec!["J Smith", "A Doe"]);
        assert_eq!(r.journal, "Nutrients");
        assert_eq!(r.publication_date, "2021");
        assert_eq!(r.unique_id, "gs_mdpi_0");
        assert_eq!(r.pdf_link.as_deref(), Some("https://www.mdpi.com/2072-6643/13/1/1/pdf"));

        assert_eq!(page.records[1].unique_id, "gs_nih_1");
        assert!(page.records[1].pdf_link.is_none());
    }

    #[test]
    fn test_robot_page_blocks() {
        let page = parse_page("<html><body>Please show you're not a robot</body></html>", 0);
        assert!(page.blocked);
        assert!(page.records.is_empty());
    }

    #[test]
    fn test_refinement_terms_capped() {
        let q = SearchQuery::new(
            "NMN",
            vec!["a1".into(), "b2".into(), "c3".into(), "d4".into(), "e5".into()],
        );
        let built = GoogleScholarClient::scholar_query(&q);
        assert!(built.starts_with("NMN "));
        assert_eq!(built.split(' ').count(), 1 + MAX_REFINEMENT_TERMS);
    }
}

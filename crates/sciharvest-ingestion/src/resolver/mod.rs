//! PDF link resolution chain.
//!
//! Strategies run cheapest and most reliable first and the first hit wins:
//!
//! 1. direct metadata (`pdf_link` from a source API)
//! 2. identifier templates (PMCID, bioRxiv DOI, ScienceDirect PII), no network
//! 3. source page scrape
//! 4. DOI redirect, then the publisher registry
//! 5. generic scan of the publisher page
//! 6. preprints.org template
//!
//! A failing strategy is logged and the chain moves on. The resolver only
//! proposes URLs; the fetcher decides whether they are real PDFs.

pub mod preprints;
pub mod publishers;

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use reqwest::Response;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use sciharvest_common::{HarvestError, HttpClient};
use tracing::{debug, info, instrument};
use url::Url;

use crate::models::{Database, Endpoints, SourceContext, StudyRecord};
use preprints::{is_preprints_doi, PreprintId};
use publishers::PublisherRegistry;

lazy_static! {
    static ref CITATION_PDF: Selector = Selector::parse(r#"meta[name="citation_pdf_url"]"#).unwrap();
    static ref FULL_TEXT_LINKS: Selector = Selector::parse(
        "#free-full-text-links-list a, .full-text-links a, .full-text-links-list a, .ftl a"
    )
    .unwrap();
    static ref PDF_BUTTONS: Selector = Selector::parse(
        "a.icon.pdf, a.icon.download-pdf, a.pdf-link, .article-download-links-list a, a.pdf-button"
    )
    .unwrap();
    static ref ANCHORS: Selector = Selector::parse("a[href]").unwrap();
    static ref BUTTONS: Selector = Selector::parse("button, a.btn, a.button").unwrap();
    static ref PMCID_IN_PAGE: Regex = Regex::new(r"PMC\d{5,}").unwrap();
}

/// Which strategy produced a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    DirectMetadata,
    IdentifierTemplate,
    SourcePage,
    DoiRedirect,
    PublisherRule,
    GenericScan,
    PreprintTemplate,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::DirectMetadata     => "direct_metadata",
            Strategy::IdentifierTemplate => "identifier_template",
            Strategy::SourcePage         => "source_page",
            Strategy::DoiRedirect        => "doi_redirect",
            Strategy::PublisherRule      => "publisher_rule",
            Strategy::GenericScan        => "generic_scan",
            Strategy::PreprintTemplate   => "preprint_template",
        }
    }
}

/// A candidate PDF URL and where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub url: String,
    pub strategy: Strategy,
}

impl Resolution {
    fn new(url: impl Into<String>, strategy: Strategy) -> Self {
        Self { url: url.into(), strategy }
    }
}

pub struct PdfResolver {
    client: HttpClient,
    endpoints: Endpoints,
    publishers: PublisherRegistry,
}

impl PdfResolver {
    pub fn new(ctx: &SourceContext) -> sciharvest_common::Result<Self> {
        Ok(Self {
            client: ctx.client()?,
            endpoints: ctx.endpoints.clone(),
            publishers: PublisherRegistry::builtin(),
        })
    }

    pub fn with_publishers(mut self, publishers: PublisherRegistry) -> Self {
        self.publishers = publishers;
        self
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Runs the chain; `None` once every strategy is exhausted.
    #[instrument(skip(self, record), fields(id = %record.unique_id, db = record.database.as_str()))]
    pub async fn resolve(&self, record: &StudyRecord) -> Option<Resolution> {
        if let Some(link) = record.pdf_link.as_deref().filter(|l| !l.trim().is_empty()) {
            debug!(url = link, "Using PDF link from source metadata");
            return Some(Resolution::new(link, Strategy::DirectMetadata));
        }

        if let Some(url) = self.from_identifiers(record) {
            debug!(url = %url, "Constructed PDF URL from identifier");
            return Some(Resolution::new(url, Strategy::IdentifierTemplate));
        }

        if !record.source_url.is_empty() {
            match self.from_source_page(record).await {
                Ok(Some(found)) => return Some(found),
                Ok(None) => debug!(url = %record.source_url, "No PDF link on source page"),
                Err(e) => debug!(url = %record.source_url, error = %e, "Source page scrape failed"),
            }
        }

        if let Some(doi) = record.doi.as_deref().filter(|d| !d.is_empty()) {
            if is_preprints_doi(doi) {
                debug!(doi, "Skipping DOI scrape for preprints.org");
            } else {
                match self.from_doi(doi).await {
                    Ok(Some(found)) => return Some(found),
                    Ok(None) => debug!(doi, "DOI landing page had no PDF link"),
                    Err(e) => debug!(doi, error = %e, "DOI redirect failed"),
                }
            }

            if let Some(id) = PreprintId::from_doi(doi) {
                let url = id.download_url(&self.endpoints.preprints_site);
                info!(url = %url, "Falling back to preprints.org download template");
                return Some(Resolution::new(url, Strategy::PreprintTemplate));
            }
        }

        info!("No PDF link found");
        None
    }

    /// Deterministic URL construction. Never touches the network.
    pub fn from_identifiers(&self, record: &StudyRecord) -> Option<String> {
        if let Some(pmcid) = record.normalized_pmcid() {
            return Some(self.endpoints.europepmc_pdf(&pmcid));
        }

        if let Some(doi) = record.doi.as_deref().filter(|d| d.starts_with("10.1101/")) {
            let site = match record.database {
                Database::BioRxiv => Some(&self.endpoints.biorxiv_site),
                Database::MedRxiv => Some(&self.endpoints.medrxiv_site),
                Database::EuropePmc if record.source_type.as_deref() == Some("PPR") => {
                    Some(&self.endpoints.biorxiv_site)
                }
                _ => None,
            };
            if let Some(site) = site {
                return Some(format!("{}/content/{}.full.pdf", site, doi));
            }
        }

        if record.database == Database::ScienceDirect {
            if let Some(pii) = record.paper_id.as_deref().filter(|p| !p.is_empty()) {
                return Some(format!(
                    "{}/science/article/pii/{}/pdfft",
                    self.endpoints.sciencedirect_site, pii
                ));
            }
        }
        None
    }

    async fn from_source_page(&self, record: &StudyRecord) -> sciharvest_common::Result<Option<Resolution>> {
        let resp = sciharvest_common::transport::ensure_success(self.client.get(&record.source_url).await?)?;
        let final_url = resp.url().to_string();
        if is_pdf_response(&resp) {
            return Ok(Some(Resolution::new(final_url, Strategy::SourcePage)));
        }
        let body = resp.text().await?;

        if let Some(url) = scan_source_page(&body, &final_url) {
            debug!(url = %url, "PDF link found on source page");
            return Ok(Some(Resolution::new(url, Strategy::SourcePage)));
        }
        if matches!(record.database, Database::PubMed | Database::EuropePmc) {
            if let Some(pmcid) = pmcid_in_page(&body) {
                debug!(pmcid = %pmcid, "PMCID found on source page");
                return Ok(Some(Resolution::new(
                    self.endpoints.europepmc_pdf(&pmcid),
                    Strategy::IdentifierTemplate,
                )));
            }
        }
        Ok(None)
    }

    async fn from_doi(&self, doi: &str) -> sciharvest_common::Result<Option<Resolution>> {
        let url = self.endpoints.doi_url(doi);
        let resp = self.client.get(&url).await?;
        if !resp.status().is_success() {
            return Err(HarvestError::Status { status: resp.status().as_u16(), url });
        }
        let final_url = resp.url().to_string();
        if is_pdf_response(&resp) {
            return Ok(Some(Resolution::new(final_url, Strategy::DoiRedirect)));
        }
        let body = resp.text().await?;
        debug!(landing = %final_url, "DOI resolved");
        Ok(scan_landing_page(&self.publishers, &body, &final_url))
    }
}

fn is_pdf_response(resp: &Response) -> bool {
    resp.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.to_lowercase().contains("application/pdf"))
        .unwrap_or(false)
}

/// Resolves `href` against `base`, dropping fragments, scripts and mail links.
pub(crate) fn absolutize(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let lower = href.to_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("mailto:") {
        return None;
    }
    match Url::parse(base) {
        Ok(b) => b.join(href).ok().map(|u| u.to_string()),
        Err(_) => Url::parse(href).ok().map(|u| u.to_string()),
    }
}

fn text_of(el: &ElementRef) -> String {
    el.text().collect::<String>().to_lowercase()
}

/// Citation meta tag, full-text link boxes, PDF buttons, then any anchor
/// mentioning "pdf".
pub(crate) fn scan_source_page(html: &str, page_url: &str) -> Option<String> {
    let doc = Html::parse_document(html);

    if let Some(url) = doc
        .select(&CITATION_PDF)
        .filter_map(|m| m.value().attr("content"))
        .find_map(|c| absolutize(page_url, c))
    {
        return Some(url);
    }

    let full_text = doc.select(&FULL_TEXT_LINKS).find_map(|a| {
        let href = a.value().attr("href")?;
        let text = text_of(&a);
        let lower = href.to_lowercase();
        let relevant = lower.contains("pdf")
            || lower.contains("fulltext")
            || text.contains("pdf")
            || text.contains("full text");
        relevant.then(|| absolutize(page_url, href)).flatten()
    });
    if full_text.is_some() {
        return full_text;
    }

    if let Some(url) = doc
        .select(&PDF_BUTTONS)
        .filter_map(|a| a.value().attr("href"))
        .find_map(|href| absolutize(page_url, href))
    {
        return Some(url);
    }

    doc.select(&ANCHORS).find_map(|a| {
        let href = a.value().attr("href")?;
        (href.to_lowercase().contains("pdf") || text_of(&a).contains("pdf"))
            .then(|| absolutize(page_url, href))
            .flatten()
    })
}

pub(crate) fn pmcid_in_page(html: &str) -> Option<String> {
    PMCID_IN_PAGE.find(html).map(|m| m.as_str().to_string())
}

/// Publisher rule when one matches and yields a URL, otherwise the generic scan.
pub(crate) fn scan_landing_page(
    publishers: &PublisherRegistry,
    html: &str,
    landing: &str,
) -> Option<Resolution> {
    if let Some(rule) = publishers.lookup(landing) {
        debug!(publisher = rule.name, "Applying publisher rule");
        if let Some(url) = rule.apply(html, landing) {
            return Some(Resolution::new(url, Strategy::PublisherRule));
        }
    }
    generic_scan(html, landing).map(|url| Resolution::new(url, Strategy::GenericScan))
}

/// Controls saying "pdf" and "download", then anchors whose href mentions
/// pdf, then anchors whose text does.
pub(crate) fn generic_scan(html: &str, page_url: &str) -> Option<String> {
    let doc = Html::parse_document(html);

    let control_href = |el: ElementRef| -> Option<String> {
        let v = el.value();
        let href = v
            .attr("href")
            .or_else(|| v.attr("data-href"))
            .or_else(|| v.attr("data-url"))?;
        absolutize(page_url, href)
    };

    let download_control = doc
        .select(&BUTTONS)
        .chain(doc.select(&ANCHORS))
        .filter(|el| {
            let text = text_of(el);
            text.contains("pdf") && text.contains("download")
        })
        .find_map(&control_href);
    if download_control.is_some() {
        return download_control;
    }

    let by_href = doc.select(&ANCHORS).find_map(|a| {
        let href = a.value().attr("href")?;
        href.to_lowercase()
            .contains("pdf")
            .then(|| absolutize(page_url, href))
            .flatten()
    });
    if by_href.is_some() {
        return by_href;
    }

    doc.select(&ANCHORS)
        .filter(|a| text_of(a).contains("pdf"))
        .find_map(&control_href)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> PdfResolver {
        PdfResolver::new(&SourceContext::default()).unwrap()
    }

    #[tokio::test]
    async fn test_metadata_link_wins_over_pmcid() {
        let mut r = StudyRecord::new(Database::EuropePmc);
        r.pmcid = Some("PMC1234567".into());
        r.pdf_link = Some("https://europepmc.org/abstract/MED/1?pdf=render".into());
        let res = resolver().resolve(&r).await.unwrap();
        assert_eq!(res.strategy, Strategy::DirectMetadata);
        assert_eq!(res.url, "https://europepmc.org/abstract/MED/1?pdf=render");
    }

    #[tokio::test]
    async fn test_pmcid_template_without_network() {
        let mut r = StudyRecord::new(Database::Pmc);
        r.pmcid = Some("PMC1234567".into());
        r.source_url = "http://127.0.0.1:9/unreachable".into();
        let res = resolver().resolve(&r).await.unwrap();
        assert_eq!(res.strategy, Strategy::IdentifierTemplate);
        assert_eq!(res.url, "https://europepmc.org/articles/PMC1234567/pdf/main.pdf");
    }

    #[test]
    fn test_biorxiv_doi_template() {
        let mut r = StudyRecord::new(Database::BioRxiv);
        r.doi = Some("10.1101/2023.01.01.500001".into());
        assert_eq!(
            resolver().from_identifiers(&r).as_deref(),
            Some("https://www.biorxiv.org/content/10.1101/2023.01.01.500001.full.pdf")
        );

        r.database = Database::MedRxiv;
        assert!(resolver().from_identifiers(&r).unwrap().starts_with("https://www.medrxiv.org/"));

        r.database = Database::Doaj;
        assert!(resolver().from_identifiers(&r).is_none());
    }

    #[test]
    fn test_sciencedirect_pii_template() {
        let mut r = StudyRecord::new(Database::ScienceDirect);
        r.paper_id = Some("S1550413122000018".into());
        assert_eq!(
            resolver().from_identifiers(&r).as_deref(),
            Some("https://www.sciencedirect.com/science/article/pii/S1550413122000018/pdfft")
        );
    }

    #[test]
    fn test_source_page_prefers_citation_meta() {
        let html = r#"<html><head><meta name="citation_pdf_url" content="/content/1.full.pdf"></head>
            <body><a href="/other.pdf">PDF</a></body></html>"#;
        assert_eq!(
            scan_source_page(html, "https://www.biorxiv.org/content/1").as_deref(),
            Some("https://www.biorxiv.org/content/1.full.pdf")
        );
    }

    #[test]
    fn test_source_page_full_text_container() {
        let html = r#"<div class="full-text-links-list">
              <a href="https://pubs.example.org/doi/10.1/x">Publisher site</a>
              <a href="https://pubs.example.org/doi/pdf/10.1/x">Full text</a>
            </div>
            <a href="/help.pdf">help pdf</a>"#;
        assert_eq!(
            scan_source_page(html, "https://pubmed.ncbi.nlm.nih.gov/1/").as_deref(),
            Some("https://pubs.example.org/doi/pdf/10.1/x")
        );
    }

    #[test]
    fn test_source_page_ignores_fragments() {
        let html = r##"<a href="#pdf">pdf</a><a href="javascript:void(0)">pdf</a>"##;
        assert!(scan_source_page(html, "https://x.org/").is_none());
    }

    #[test]
    fn test_generic_scan_order() {
        let html = r#"<a href="/files/supplement.pdf">Supplement</a>
            <button data-href="/download/paper">Download PDF</button>"#;
        assert_eq!(
            generic_scan(html, "https://journal.example/article/1").as_deref(),
            Some("https://journal.example/download/paper")
        );
        let html = r#"<a href="/article/1/viewer">View PDF</a>"#;
        assert_eq!(
            generic_scan(html, "https://journal.example/article/1").as_deref(),
            Some("https://journal.example/article/1/viewer")
        );
    }

    #[test]
    fn test_landing_page_uses_publisher_then_generic() {
        let registry = PublisherRegistry::builtin();
        let res = scan_landing_page(&registry, "<p></p>", "https://www.mdpi.com/2072-6643/13/1/1").unwrap();
        assert_eq!(res.strategy, Strategy::PublisherRule);
        assert_eq!(res.url, "https://www.mdpi.com/2072-6643/13/1/1/pdf");

        let res = scan_landing_page(
            &registry,
            r#"<a href="/paper.pdf">PDF</a>"#,
            "https://journals.plos.org/plosone/article?id=1",
        )
        .unwrap();
        assert_eq!(res.strategy, Strategy::GenericScan);
    }

    #[test]
    fn test_pmcid_found_in_page() {
        assert_eq!(pmcid_in_page("see PMC7654321 for text").as_deref(), Some("PMC7654321"));
        assert!(pmcid_in_page("no id here").is_none());
    }
}

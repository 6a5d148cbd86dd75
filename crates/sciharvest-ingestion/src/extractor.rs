//! Article text extraction for synthetic documents.
//!
//! Three sites with stable markup get dedicated handlers (PubMed, PMC,
//! Europe PMC); everything else goes through the generic heading/paragraph
//! walk. Parsing is synchronous and kept apart from the network calls.

use lazy_static::lazy_static;
use scraper::{ElementRef, Html, Selector};
use sciharvest_common::HttpClient;
use tracing::{debug, info, instrument};

use crate::models::{ArticleContent, Endpoints, SourceContext, StudyRecord};
use crate::resolver::absolutize;
use crate::resolver::preprints::{is_preprints_doi, PreprintId};
use crate::sources::clean_text;

lazy_static! {
    static ref PUBMED_ABSTRACT: Selector = Selector::parse("#abstract").unwrap();
    static ref ANCHORS: Selector = Selector::parse("a[href]").unwrap();

    static ref PMC_ABSTRACT: Selector = Selector::parse(".abstract").unwrap();
    static ref PMC_BODY: Selector = Selector::parse(".jig-ncbiinpagenav, .article").unwrap();
    static ref PMC_BLOCKS: Selector = Selector::parse("h2, h3, h4, p, div.sec").unwrap();
    static ref PMC_SEC_TITLE: Selector = Selector::parse(".sec-title").unwrap();
    static ref PMC_SEC_CONTENT: Selector = Selector::parse(".sec-content").unwrap();
    static ref PMC_FULL_TEXT: Selector = Selector::parse(".article-body, .article").unwrap();
    static ref PMC_REFS: Selector = Selector::parse(".ref-list, .references").unwrap();
    static ref PMC_REF_ITEMS: Selector = Selector::parse("li, .ref").unwrap();

    static ref EPMC_ABSTRACT: Selector = Selector::parse(".abstract-content").unwrap();
    static ref EPMC_BODY: Selector = Selector::parse("#free-full-text, #full-view-heading-content").unwrap();
    static ref EPMC_BLOCKS: Selector = Selector::parse("h2, h3, h4, p").unwrap();
    static ref EPMC_SECT: Selector = Selector::parse(".sect").unwrap();
    static ref EPMC_SECT_TITLE: Selector = Selector::parse(".title").unwrap();
    static ref EPMC_REFS: Selector = Selector::parse(".reference-list li").unwrap();

    static ref GENERIC_BODY: Selector =
        Selector::parse("article, .article, .content, main, #content, #main").unwrap();
    static ref GENERIC_BLOCKS: Selector = Selector::parse("h1, h2, h3, h4, p").unwrap();
    static ref PARAGRAPHS: Selector = Selector::parse("p").unwrap();
}

/// Which handler a page gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    PubMed,
    Pmc,
    EuropePmc,
    Generic,
}

impl PageKind {
    pub fn detect(url: &str, endpoints: &Endpoints) -> Self {
        if url.contains("pubmed.ncbi.nlm.nih.gov") || url.starts_with(&endpoints.pubmed_site) {
            PageKind::PubMed
        } else if url.contains("ncbi.nlm.nih.gov/pmc") || url.starts_with(&endpoints.pmc_site) {
            PageKind::Pmc
        } else if url.contains("europepmc.org") || url.starts_with(&endpoints.europepmc_site) {
            PageKind::EuropePmc
        } else {
            PageKind::Generic
        }
    }
}

pub struct ContentExtractor {
    client: HttpClient,
    endpoints: Endpoints,
}

impl ContentExtractor {
    pub fn new(ctx: &SourceContext) -> sciharvest_common::Result<Self> {
        Ok(Self { client: ctx.client()?, endpoints: ctx.endpoints.clone() })
    }

    /// Fetches one page and extracts what it can. `None` when the page
    /// cannot be fetched.
    #[instrument(skip(self, record))]
    pub async fn extract_content(&self, url: &str, record: &StudyRecord) -> Option<ArticleContent> {
        let page = match self.client.get_page(url).await {
            Ok(p) => p,
            Err(e) => {
                debug!(url, error = %e, "Extraction fetch failed");
                return None;
            }
        };

        let kind = match PageKind::detect(url, &self.endpoints) {
            PageKind::Generic => PageKind::detect(&page.final_url, &self.endpoints),
            k => k,
        };
        debug!(url, ?kind, "Extracting article content");

        match kind {
            PageKind::PubMed => {
                let (content, pmc_link) = parse_pubmed(&page.body, &page.final_url, record);
                let Some(pmc_link) = pmc_link else { return Some(content) };
                debug!(url = %pmc_link, "Following PMC full-text link");
                match self.client.get_page(&pmc_link).await {
                    Ok(pmc) => Some(parse_pmc(&pmc.body, record)),
                    Err(e) => {
                        debug!(url = %pmc_link, error = %e, "PMC page unavailable");
                        Some(content)
                    }
                }
            }
            PageKind::Pmc => Some(parse_pmc(&page.body, record)),
            PageKind::EuropePmc => Some(parse_europepmc(&page.body, record)),
            PageKind::Generic => Some(parse_generic(&page.body, record)),
        }
    }

    /// Pages worth trying for a record, most promising first.
    pub fn candidate_urls(&self, record: &StudyRecord) -> Vec<String> {
        let mut urls = Vec::new();

        let preprint = record
            .doi
            .as_deref()
            .filter(|d| is_preprints_doi(d))
            .and_then(PreprintId::from_doi);
        if let Some(pmcid) = record.normalized_pmcid() {
            urls.push(self.endpoints.pmc_article(&pmcid));
        } else if let Some(id) = preprint {
            urls.push(id.manuscript_url(&self.endpoints.preprints_site));
        } else if !record.source_url.is_empty() {
            urls.push(record.source_url.clone());
        }
        if let Some(pmid) = record.numeric_pmid() {
            urls.push(self.endpoints.europepmc_med_article(&pmid));
        }
        if let Some(doi) = record.doi.as_deref().filter(|d| !d.is_empty()) {
            urls.push(self.endpoints.doi_url(doi));
        }

        urls.dedup();
        urls
    }

    /// Escalates through [`Self::candidate_urls`] until a page yields at
    /// least two sections. Returns the richest result with any content.
    pub async fn extract_for_record(&self, record: &StudyRecord) -> Option<ArticleContent> {
        let mut best: Option<ArticleContent> = None;
        for url in self.candidate_urls(record) {
            let Some(content) = self.extract_content(&url, record).await else { continue };
            let sufficient = content.has_sufficient_sections();
            let better = best
                .as_ref()
                .map(|b| content.non_empty_sections() > b.non_empty_sections())
                .unwrap_or(true);
            if better {
                best = Some(content);
            }
            if sufficient {
                break;
            }
            debug!(url = %url, "Insufficient content, escalating");
        }

        match best {
            Some(c) if c.non_empty_sections() > 0 => {
                info!(sections = c.non_empty_sections(), "Extracted article content");
                Some(c)
            }
            _ => {
                info!("No content available");
                None
            }
        }
    }
}

fn text(el: &ElementRef) -> String {
    clean_text(&el.text().collect::<String>())
}

/// Heading/paragraph walk: a heading opens a section, paragraphs append to
/// the open one. Paragraphs before the first heading are dropped.
fn walk_sections<'a>(blocks: impl Iterator<Item = ElementRef<'a>>, content: &mut ArticleContent) {
    let mut current: Option<(String, Vec<String>)> = None;
    let flush = |cur: Option<(String, Vec<String>)>, content: &mut ArticleContent| {
        if let Some((title, paras)) = cur {
            content.push_section(&title, &paras.join("\n\n"));
        }
    };

    for el in blocks {
        match el.value().name() {
            "h1" | "h2" | "h3" | "h4" => {
                let heading = text(&el);
                if heading.is_empty() {
                    continue;
                }
                flush(current.take(), content);
                current = Some((heading, Vec::new()));
            }
            "p" => {
                let para = text(&el);
                if let Some((_, paras)) = current.as_mut() {
                    if !para.is_empty() {
                        paras.push(para);
                    }
                }
            }
            "div" if current.is_none() => {
                let title = el.select(&PMC_SEC_TITLE).next().map(|t| text(&t));
                let body = el.select(&PMC_SEC_CONTENT).next().map(|c| text(&c));
                if let (Some(title), Some(body)) = (title, body) {
                    content.push_section(&title, &body);
                }
            }
            _ => {}
        }
    }
    flush(current, content);
}

fn collect_references<'a>(items: impl Iterator<Item = ElementRef<'a>>, content: &mut ArticleContent) {
    let refs: Vec<String> = items.map(|li| text(&li)).filter(|r| !r.is_empty()).collect();
    if !refs.is_empty() {
        content.push_section("References", &refs.join("\n\n"));
        content.references = refs;
    }
}

/// Abstract only; PubMed rarely hosts full text. Also returns a PMC
/// article link when the page has one.
pub(crate) fn parse_pubmed(html: &str, page_url: &str, record: &StudyRecord) -> (ArticleContent, Option<String>) {
    let doc = Html::parse_document(html);
    let mut content = ArticleContent::from_record(record);
    content.abstract_text = String::new();

    if let Some(abs) = doc.select(&PUBMED_ABSTRACT).next() {
        let abstract_text = text(&abs);
        content.push_section("Abstract", &abstract_text);
        content.abstract_text = abstract_text;
    }

    let pmc_link = doc
        .select(&ANCHORS)
        .filter_map(|a| a.value().attr("href"))
        .find(|href| href.contains("pmc/articles/PMC"))
        .and_then(|href| absolutize(page_url, href));
    (content, pmc_link)
}

pub(crate) fn parse_pmc(html: &str, record: &StudyRecord) -> ArticleContent {
    let doc = Html::parse_document(html);
    let mut content = ArticleContent::from_record(record);
    content.abstract_text = String::new();

    if let Some(abs) = doc.select(&PMC_ABSTRACT).next() {
        let abstract_text = text(&abs);
        content.push_section("Abstract", &abstract_text);
        content.abstract_text = abstract_text;
    }
    if let Some(body) = doc.select(&PMC_BODY).next() {
        walk_sections(body.select(&PMC_BLOCKS), &mut content);
    }

    let only_abstract = content.sections.iter().all(|s| s.title == "Abstract");
    if only_abstract {
        if let Some(full) = doc.select(&PMC_FULL_TEXT).next() {
            content.push_section("Full Text", &text(&full));
        }
    }
    if let Some(refs) = doc.select(&PMC_REFS).next() {
        collect_references(refs.select(&PMC_REF_ITEMS), &mut content);
    }
    content
}

pub(crate) fn parse_europepmc(html: &str, record: &StudyRecord) -> ArticleContent {
    let doc = Html::parse_document(html);
    let mut content = ArticleContent::from_record(record);
    content.abstract_text = String::new();

    if let Some(abs) = doc.select(&EPMC_ABSTRACT).next() {
        let abstract_text = text(&abs);
        content.push_section("Abstract", &abstract_text);
        content.abstract_text = abstract_text;
    }
    if let Some(body) = doc.select(&EPMC_BODY).next() {
        walk_sections(body.select(&EPMC_BLOCKS), &mut content);
    }

    if content.sections.len() <= 1 {
        for sect in doc.select(&EPMC_SECT) {
            let title = sect.select(&EPMC_SECT_TITLE).next().map(|t| text(&t));
            let body = text(&sect);
            let (title, body) = match title {
                Some(t) => {
                    let stripped = body.replacen(t.as_str(), "", 1).trim().to_string();
                    (t, stripped)
                }
                None => ("Section".to_string(), body),
            };
            content.push_section(&title, &body);
        }
    }
    collect_references(doc.select(&EPMC_REFS), &mut content);
    content
}

/// Heading/paragraph pairing inside the main content region, else every
/// paragraph as one `Content` section.
pub(crate) fn parse_generic(html: &str, record: &StudyRecord) -> ArticleContent {
    let doc = Html::parse_document(html);
    let mut content = ArticleContent::from_record(record);

    let region = doc.select(&GENERIC_BODY).next().unwrap_or_else(|| doc.root_element());
    walk_sections(region.select(&GENERIC_BLOCKS), &mut content);

    if content.sections.is_empty() {
        let all: Vec<String> = region
            .select(&PARAGRAPHS)
            .map(|p| text(&p))
            .filter(|p| !p.is_empty())
            .collect();
        content.push_section("Content", &all.join("\n\n"));
    }
    content
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Database;

    fn record() -> StudyRecord {
        let mut r = StudyRecord::new(Database::PubMed);
        r.title = "NMN and aging".into();
        r
    }

    #[test]
    fn test_detect_page_kind() {
        let e = Endpoints::default();
        assert_eq!(PageKind::detect("https://pubmed.ncbi.nlm.nih.gov/1/", &e), PageKind::PubMed);
        assert_eq!(PageKind::detect("https://www.ncbi.nlm.nih.gov/pmc/articles/PMC1/", &e), PageKind::Pmc);
        assert_eq!(PageKind::detect("https://europepmc.org/article/MED/1", &e), PageKind::EuropePmc);
        assert_eq!(PageKind::detect("https://www.nature.com/articles/x", &e), PageKind::Generic);
    }

    #[test]
    fn test_generic_paragraphs_become_content_section() {
        let html = "<html><body><p>First paragraph.</p><p>Second   paragraph.</p></body></html>";
        let content = parse_generic(html, &record());
        assert_eq!(content.sections.len(), 1);
        assert_eq!(content.sections[0].title, "Content");
        assert_eq!(content.sections[0].content, "First paragraph.\n\nSecond paragraph.");
        assert_eq!(content.title, "NMN and aging");
    }

    #[test]
    fn test_generic_heading_pairing() {
        let html = r#"<main><p>lead</p><h2>Introduction</h2><p>Intro text.</p>
            <h2>Methods</h2><p>Mice.</p><p>Dosing.</p><h2>Empty</h2></main>"#;
        let content = parse_generic(html, &record());
        let titles: Vec<&str> = content.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Introduction", "Methods"]);
        assert_eq!(content.sections[1].content, "Mice.\n\nDosing.");
    }

    #[test]
    fn test_pubmed_abstract_and_pmc_link() {
        let html = r#"<div id="abstract"><p>We studied NMN.</p></div>
            <a href="https://www.ncbi.nlm.nih.gov/pmc/articles/PMC7654321/">Free PMC article</a>"#;
        let (content, link) = parse_pubmed(html, "https://pubmed.ncbi.nlm.nih.gov/1/", &record());
        assert_eq!(content.sections[0].title, "Abstract");
        assert_eq!(content.abstract_text, "We studied NMN.");
        assert_eq!(link.as_deref(), Some("https://www.ncbi.nlm.nih.gov/pmc/articles/PMC7654321/"));
    }

    #[test]
    fn test_pmc_sections_and_references() {
        let html = r#"<div class="abstract">Short abstract.</div>
            <div class="article">
              <h2>Introduction</h2><p>Background.</p>
              <h2>Results</h2><p>NAD+ rose.</p>
            </div>
            <div class="ref-list"><ul><li>Ref one.</li><li>Ref two.</li></ul></div>"#;
        let content = parse_pmc(html, &record());
        let titles: Vec<&str> = content.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Abstract", "Introduction", "Results", "References"]);
        assert_eq!(content.references, vec!["Ref one.", "Ref two."]);
    }

    #[test]
    fn test_pmc_full_text_fallback() {
        let html = r#"<div class="abstract">Abs.</div><div class="article-body">Whole body text.</div>"#;
        let content = parse_pmc(html, &record());
        assert_eq!(content.sections.last().unwrap().title, "Full Text");
    }

    #[test]
    fn test_europepmc_sect_fallback() {
        let html = r#"<div class="abstract-content">Abs.</div>
            <div class="sect"><span class="title">Discussion</span> NMN was safe.</div>
            <ul class="reference-list"><li>R1</li></ul>"#;
        let content = parse_europepmc(html, &record());
        assert_eq!(content.sections[1].title, "Discussion");
        assert_eq!(content.sections[1].content, "NMN was safe.");
        assert_eq!(content.references, vec!["R1"]);
    }

    #[test]
    fn test_candidate_url_order() {
        let extractor = ContentExtractor::new(&SourceContext::default()).unwrap();
        let mut r = record();
        r.source_url = "https://pubmed.ncbi.nlm.nih.gov/33888596/".into();
        r.pmid = Some("33888596".into());
        r.doi = Some("10.1126/science.abe9985".into());
        assert_eq!(
            extractor.candidate_urls(&r),
            vec![
                "https://pubmed.ncbi.nlm.nih.gov/33888596/".to_string(),
                "https://europepmc.org/article/med/33888596".to_string(),
                "https://doi.org/10.1126/science.abe9985".to_string(),
            ]
        );

        r.pmcid = Some("PMC8000001".into());
        assert_eq!(extractor.candidate_urls(&r)[0], "https://www.ncbi.nlm.nih.gov/pmc/articles/PMC8000001/");

        let mut p = StudyRecord::new(Database::EuropePmc);
        p.doi = Some("10.20944/preprints202101.0001.v1".into());
        assert_eq!(
            extractor.candidate_urls(&p)[0],
            "https://www.preprints.org/manuscript/202101.0001/v1"
        );
    }
}

//! Artifact fetcher: downloads candidate URLs and keeps only real PDFs.
//!
//! A response is a PDF when its content type says so, else when its body
//! starts with `%PDF`, else when it is an octet stream at a PDF-shaped URL.
//! An HTML answer is scanned once for an embedded PDF link (anchor, embed,
//! iframe or meta refresh) and that link is tried; there is no second hop.
//! Files written below [`MIN_PDF_BYTES`] are re-checked and removed if they
//! are not PDFs.

use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::header::{CONTENT_TYPE, REFERER};
use reqwest::Method;
use scraper::{Html, Selector};
use sciharvest_common::{HarvestError, HeaderProfile, HttpClient};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::models::{Endpoints, SourceContext};
use crate::resolver::absolutize;
use crate::resolver::preprints::{is_preprints_url, PreprintId};

pub const MIN_PDF_BYTES: u64 = 1000;
const PDF_MAGIC: &[u8] = b"%PDF";
const MAX_IDENTIFIER_LEN: usize = 150;

lazy_static! {
    static ref META_REFRESH: Selector = Selector::parse("meta[http-equiv]").unwrap();
    static ref EMBEDDED: Selector =
        Selector::parse(r#"embed[type="application/pdf"], iframe#pdf, iframe[src*=".pdf"]"#).unwrap();
    static ref CITATION_PDF: Selector = Selector::parse(r#"meta[name="citation_pdf_url"]"#).unwrap();
    static ref ANCHORS: Selector = Selector::parse("a[href]").unwrap();
    static ref PREPRINT_CONTROLS: Selector = Selector::parse(
        r##"a.btn, a.button, a.download-button, a[data-target="#downloadPDFModal"]"##
    )
    .unwrap();
    static ref PUBMED_ID: Regex = Regex::new(r"/(\d+)/?$").unwrap();
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Transport error: {0}")]
    Transport(#[from] HarvestError),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Not a PDF ({content_type}) at {url}")]
    NotPdf { url: String, content_type: String },

    #[error("Downloaded file {0} is not a valid PDF")]
    Invalid(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unparseable download URL: {0}")]
    Unparseable(String),
}

impl FetchError {
    /// Worth retrying the same URL with another header profile.
    fn rotates(&self) -> bool {
        matches!(self, FetchError::Transport(_) | FetchError::Status { .. })
    }
}

/// Outcome of inspecting a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pdf,
    Markup,
    Other,
}

/// Classifies a response by declared type, then magic bytes, then URL shape.
pub fn classify(content_type: &str, head: &[u8], url: &str) -> Verdict {
    let ct = content_type.to_lowercase();
    if ct.contains("application/pdf") {
        return Verdict::Pdf;
    }
    if head.starts_with(PDF_MAGIC) {
        return Verdict::Pdf;
    }
    let lower_url = url.to_lowercase();
    let path = lower_url.split(['?', '#']).next().unwrap_or("");
    if ct.contains("application/octet-stream") && (path.ends_with(".pdf") || path.contains("/pdf")) {
        return Verdict::Pdf;
    }
    if ct.contains("text/html") || ct.contains("application/xhtml") {
        return Verdict::Markup;
    }
    Verdict::Other
}

/// Filename-safe form of an identifier.
pub fn sanitize_identifier(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') { c } else { '_' })
        .take(MAX_IDENTIFIER_LEN)
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

/// `{pdf_dir}/{sanitised identifier}.pdf`
pub fn artifact_path(pdf_dir: &Path, identifier: &str) -> PathBuf {
    pdf_dir.join(format!("{}.pdf", sanitize_identifier(identifier)))
}

/// A PDF link embedded in a markup page: meta refresh, embed/iframe,
/// citation meta tag, then anchors pointing at `.pdf` or `/pdf/`.
pub fn find_embedded_pdf_link(html: &str, page_url: &str) -> Option<String> {
    let doc = Html::parse_document(html);

    let refresh = doc
        .select(&META_REFRESH)
        .filter(|m| m.value().attr("http-equiv").map(|v| v.eq_ignore_ascii_case("refresh")).unwrap_or(false))
        .filter_map(|m| m.value().attr("content"))
        .find_map(|content| {
            let lower = content.to_lowercase();
            let idx = lower.find("url=")?;
            let target = content.get(idx + 4..)?.trim().trim_matches(|c| c == '\'' || c == '"');
            absolutize(page_url, target)
        });
    if refresh.is_some() {
        return refresh;
    }

    if let Some(url) = doc
        .select(&EMBEDDED)
        .filter_map(|e| e.value().attr("src"))
        .find_map(|src| absolutize(page_url, src))
    {
        return Some(url);
    }

    if let Some(url) = doc
        .select(&CITATION_PDF)
        .filter_map(|m| m.value().attr("content"))
        .find_map(|c| absolutize(page_url, c))
    {
        return Some(url);
    }

    doc.select(&ANCHORS)
        .filter_map(|a| a.value().attr("href"))
        .filter(|href| {
            let lower = href.to_lowercase();
            let path = lower.split(['?', '#']).next().unwrap_or("");
            path.ends_with(".pdf") || path.contains("/pdf/")
        })
        .find_map(|href| absolutize(page_url, href))
}

/// Probes a candidate link and returns the URL that actually serves a PDF,
/// following one embedded link from an HTML answer.
pub async fn probe_pdf(client: &HttpClient, url: &str) -> Option<String> {
    let mut target = url.to_string();
    for hop in 0..2 {
        let resp = match client.get(&target).await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!(url = %target, status = r.status().as_u16(), "Probe rejected");
                return None;
            }
            Err(e) => {
                debug!(url = %target, error = %e, "Probe failed");
                return None;
            }
        };
        let final_url = resp.url().to_string();
        let content_type = content_type_of(&resp);
        let body = resp.bytes().await.ok()?;

        match classify(&content_type, &body, &final_url) {
            Verdict::Pdf => return Some(final_url),
            Verdict::Markup if hop == 0 => {
                let html = String::from_utf8_lossy(&body);
                target = find_embedded_pdf_link(&html, &final_url)?;
                debug!(url = %target, "Probe following embedded PDF link");
            }
            _ => return None,
        }
    }
    None
}

fn content_type_of(resp: &reqwest::Response) -> String {
    resp.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase()
}

/// `.../pubmed/{pmid}/` → PMC's PMID-keyed PDF route.
fn pubmed_pmc_fallback(url: &str, endpoints: &Endpoints) -> Option<String> {
    let is_pubmed = url.starts_with(&endpoints.pubmed_site) || url.contains("pubmed.ncbi.nlm.nih.gov");
    if !is_pubmed || url.contains("/pmc/") {
        return None;
    }
    let pmid = PUBMED_ID.captures(url)?;
    Some(format!("{}/articles/pmid/{}/pdf/", endpoints.pmc_site, &pmid[1]))
}

enum Downloaded {
    Saved(PathBuf),
    Markup { body: String, final_url: String },
}

/// Downloads artifacts into `{output_dir}/pdfs/`.
pub struct ArtifactFetcher {
    ctx: SourceContext,
    pdf_dir: PathBuf,
}

impl ArtifactFetcher {
    pub fn new(ctx: SourceContext, output_dir: &Path) -> Self {
        Self { ctx, pdf_dir: output_dir.join("pdfs") }
    }

    pub fn pdf_dir(&self) -> &Path {
        &self.pdf_dir
    }

    pub fn artifact_path(&self, identifier: &str) -> PathBuf {
        artifact_path(&self.pdf_dir, identifier)
    }

    /// Downloads `url` as the artifact for `identifier`.
    ///
    /// With `overwrite == false` an existing artifact is returned without
    /// any network traffic.
    #[instrument(skip(self))]
    pub async fn fetch(&self, url: &str, identifier: &str, overwrite: bool) -> Option<PathBuf> {
        let path = self.artifact_path(identifier);
        if !overwrite && path.exists() {
            info!(path = %path.display(), "Artifact already present, skipping download");
            return Some(path);
        }
        if let Err(e) = tokio::fs::create_dir_all(&self.pdf_dir).await {
            warn!(dir = %self.pdf_dir.display(), error = %e, "Cannot create artifact directory");
            return None;
        }

        let outcome = if self.is_preprint(url) {
            self.fetch_preprint(url, &path).await
        } else {
            self.fetch_rotating(url, &path).await
        };

        match outcome {
            Ok(saved) => {
                info!(path = %saved.display(), "Downloaded PDF");
                Some(saved)
            }
            Err(e) => {
                warn!(url, error = %e, "Download failed");
                None
            }
        }
    }

    fn is_preprint(&self, url: &str) -> bool {
        is_preprints_url(url) || url.starts_with(&self.ctx.endpoints.preprints_site)
    }

    /// Walks the header rotation, then the PubMed → PMC fallback.
    async fn fetch_rotating(&self, url: &str, path: &Path) -> Result<PathBuf, FetchError> {
        let client = self.ctx.client()?;
        let mut last_err = FetchError::Unparseable(url.to_string());

        for profile in HeaderProfile::ROTATION {
            match self.download(&client, url, profile, None, path).await {
                Ok(saved) => return Ok(saved),
                Err(e) => {
                    debug!(url, ?profile, error = %e, "Download attempt failed");
                    let rotate = e.rotates();
                    last_err = e;
                    if !rotate {
                        break;
                    }
                }
            }
        }

        if let Some(fallback) = pubmed_pmc_fallback(url, &self.ctx.endpoints) {
            debug!(url = %fallback, "Trying PMC route for PubMed identifier");
            match self.download(&client, &fallback, HeaderProfile::Browser, None, path).await {
                Ok(saved) => return Ok(saved),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    /// preprints.org gates downloads behind a session: visit the manuscript
    /// page with a cookie jar, prefer its download control, else the
    /// `/download` template, then `/download/file`.
    async fn fetch_preprint(&self, url: &str, path: &Path) -> Result<PathBuf, FetchError> {
        let Some(id) = PreprintId::from_url(url).or_else(|| PreprintId::from_doi(url)) else {
            return self.fetch_rotating(url, path).await;
        };
        let site = &self.ctx.endpoints.preprints_site;
        let client = HttpClient::new(self.ctx.http.with_cookies())?;
        let manuscript = id.manuscript_url(site);

        let mut download_url = id.download_url(site);
        match client.get_page(&manuscript).await {
            Ok(page) => {
                if let Some(control) = find_preprint_control(&page.body, &page.final_url) {
                    debug!(url = %control, "Using preprints.org download control");
                    download_url = control;
                }
            }
            Err(e) => debug!(url = %manuscript, error = %e, "Manuscript page unavailable, using template"),
        }

        match self
            .download(&client, &download_url, HeaderProfile::AcceptPdf, Some(&manuscript), path)
            .await
        {
            Ok(saved) => Ok(saved),
            Err(e) => {
                let alternate = id.alternate_download_url(site);
                debug!(error = %e, url = %alternate, "Trying alternate preprints.org download");
                self.download(&client, &alternate, HeaderProfile::AcceptPdf, Some(&manuscript), path)
                    .await
            }
        }
    }

    /// One URL, at most one embedded-link hop.
    async fn download(
        &self,
        client: &HttpClient,
        url: &str,
        profile: HeaderProfile,
        referer: Option<&str>,
        path: &Path,
    ) -> Result<PathBuf, FetchError> {
        match self.download_once(client, url, profile, referer, path).await? {
            Downloaded::Saved(saved) => Ok(saved),
            Downloaded::Markup { body, final_url } => {
                let not_pdf = || FetchError::NotPdf { url: final_url.clone(), content_type: "text/html".into() };
                let Some(link) = find_embedded_pdf_link(&body, &final_url) else {
                    return Err(not_pdf());
                };
                if link == url || link == final_url {
                    return Err(not_pdf());
                }
                debug!(from = %final_url, to = %link, "Following embedded PDF link");
                match self.download_once(client, &link, profile, referer, path).await? {
                    Downloaded::Saved(saved) => Ok(saved),
                    Downloaded::Markup { final_url, .. } => {
                        Err(FetchError::NotPdf { url: final_url, content_type: "text/html".into() })
                    }
                }
            }
        }
    }

    async fn download_once(
        &self,
        client: &HttpClient,
        url: &str,
        profile: HeaderProfile,
        referer: Option<&str>,
        path: &Path,
    ) -> Result<Downloaded, FetchError> {
        let resp = client
            .send(Method::GET, url, profile, |rb| match referer {
                Some(r) => rb.header(REFERER, r),
                None => rb,
            })
            .await?;
        let final_url = resp.url().to_string();
        if !resp.status().is_success() {
            return Err(FetchError::Status { status: resp.status().as_u16(), url: final_url });
        }
        let content_type = content_type_of(&resp);
        let bytes = resp.bytes().await.map_err(HarvestError::from)?;

        match classify(&content_type, &bytes, &final_url) {
            Verdict::Pdf => {
                let part = partial_path(path);
                tokio::fs::write(&part, &bytes).await?;
                validate_written(&part).await?;
                tokio::fs::rename(&part, path).await?;
                debug!(bytes = bytes.len(), url = %final_url, "PDF written");
                Ok(Downloaded::Saved(path.to_path_buf()))
            }
            Verdict::Markup => Ok(Downloaded::Markup {
                body: String::from_utf8_lossy(&bytes).into_owned(),
                final_url,
            }),
            Verdict::Other => Err(FetchError::NotPdf { url: final_url, content_type }),
        }
    }
}

/// Downloads land here first and replace the artifact only once validated.
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

/// Small files are re-opened and must start with the PDF signature.
async fn validate_written(path: &Path) -> Result<(), FetchError> {
    let len = tokio::fs::metadata(path).await?.len();
    if len >= MIN_PDF_BYTES {
        return Ok(());
    }
    let head = tokio::fs::read(path).await?;
    if head.starts_with(PDF_MAGIC) {
        return Ok(());
    }
    warn!(path = %path.display(), len, "Removing undersized non-PDF download");
    tokio::fs::remove_file(path).await?;
    Err(FetchError::Invalid(path.to_path_buf()))
}

fn find_preprint_control(html: &str, page_url: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    doc.select(&PREPRINT_CONTROLS)
        .filter(|a| {
            let text = a.text().collect::<String>().to_lowercase();
            let href = a.value().attr("href").unwrap_or("").to_lowercase();
            text.contains("download") || href.contains("download")
        })
        .filter_map(|a| a.value().attr("href"))
        .find_map(|href| absolutize(page_url, href))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_path_sits_beside_artifact() {
        let path = Path::new("/tmp/out/pdfs/pubmed_1.pdf");
        assert_eq!(partial_path(path), PathBuf::from("/tmp/out/pdfs/pubmed_1.pdf.part"));
    }

    #[test]
    fn test_magic_beats_declared_html() {
        assert_eq!(classify("text/html", b"%PDF-1.4\n", "https://x.org/a"), Verdict::Pdf);
    }

    #[test]
    fn test_declared_html_without_magic_is_not_pdf() {
        assert_eq!(classify("text/html; charset=utf-8", b"<html>", "https://x.org/a.pdf"), Verdict::Markup);
    }

    #[test]
    fn test_octet_stream_needs_pdf_url() {
        assert_eq!(classify("application/octet-stream", b"\x00\x01", "https://x.org/paper.pdf?dl=1"), Verdict::Pdf);
        assert_eq!(classify("application/octet-stream", b"\x00\x01", "https://x.org/article/pdf/1"), Verdict::Pdf);
        assert_eq!(classify("application/octet-stream", b"\x00\x01", "https://x.org/blob"), Verdict::Other);
        assert_eq!(classify("application/pdf", b"", "https://x.org/blob"), Verdict::Pdf);
    }

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("doaj_10.1/abc:def"), "doaj_10.1_abc_def");
        assert_eq!(sanitize_identifier("  "), "unnamed");
        assert_eq!(sanitize_identifier(&"x".repeat(400)).len(), MAX_IDENTIFIER_LEN);
    }

    #[test]
    fn test_embedded_link_sources() {
        let refresh = r#"<meta http-equiv="Refresh" content="0; URL='/files/paper.pdf'">"#;
        assert_eq!(
            find_embedded_pdf_link(refresh, "https://x.org/landing").as_deref(),
            Some("https://x.org/files/paper.pdf")
        );

        let embed = r#"<embed type="application/pdf" src="//cdn.x.org/p.pdf">"#;
        assert_eq!(find_embedded_pdf_link(embed, "https://x.org/").as_deref(), Some("https://cdn.x.org/p.pdf"));

        let anchor = r#"<a href="/about">About</a><a href="/article/pdf/12">Get</a>"#;
        assert_eq!(find_embedded_pdf_link(anchor, "https://x.org/").as_deref(), Some("https://x.org/article/pdf/12"));

        assert!(find_embedded_pdf_link("<p>nothing</p>", "https://x.org/").is_none());
    }

    #[test]
    fn test_pubmed_fallback_route() {
        let endpoints = Endpoints::default();
        assert_eq!(
            pubmed_pmc_fallback("https://pubmed.ncbi.nlm.nih.gov/33888596/", &endpoints).as_deref(),
            Some("https://www.ncbi.nlm.nih.gov/pmc/articles/pmid/33888596/pdf/")
        );
        assert!(pubmed_pmc_fallback("https://www.ncbi.nlm.nih.gov/pmc/articles/PMC1/", &endpoints).is_none());
        assert!(pubmed_pmc_fallback("https://www.nature.com/articles/1", &endpoints).is_none());
    }

    #[test]
    fn test_preprint_control_requires_download() {
        let html = r##"<a class="btn" href="/subscribe">Subscribe</a>
            <a class="btn" href="#">Download</a>
            <a class="btn" href="/manuscript/202101.0001/v1/download">Download PDF</a>"##;
        assert_eq!(
            find_preprint_control(html, "https://www.preprints.org/manuscript/202101.0001/v1").as_deref(),
            Some("https://www.preprints.org/manuscript/202101.0001/v1/download")
        );
    }

    #[tokio::test]
    async fn test_existing_artifact_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = ArtifactFetcher::new(SourceContext::default(), dir.path());
        let path = fetcher.artifact_path("pubmed_1");
        std::fs::create_dir_all(fetcher.pdf_dir()).unwrap();
        std::fs::write(&path, b"%PDF-1.4 cached").unwrap();

        let got = fetcher.fetch("http://127.0.0.1:9/never", "pubmed_1", false).await;
        assert_eq!(got, Some(path));
    }
}

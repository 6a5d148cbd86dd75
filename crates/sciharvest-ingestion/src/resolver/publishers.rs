//! Publisher registry for the DOI-redirect strategy.
//!
//! After a DOI resolves to a publisher landing page, the page host is looked
//! up here. A rule first tries its download-control selectors, then falls
//! back to rewriting the landing URL. Adding a publisher is one more entry
//! in [`PublisherRegistry::builtin`].

use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use super::absolutize;
use super::preprints::download_from_manuscript_url;

/// Deterministic landing-URL → PDF-URL rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlTransform {
    None,
    /// Appends a suffix unless the URL already ends with it.
    Append(&'static str),
    /// Replaces the first occurrence of a path fragment.
    Replace { from: &'static str, to: &'static str },
    /// preprints.org manuscript page → its `/download` endpoint.
    PreprintDownload,
}

impl UrlTransform {
    pub fn apply(&self, landing: &str) -> Option<String> {
        match self {
            UrlTransform::None => None,
            UrlTransform::Append(suffix) => {
                let base = landing.trim_end_matches('/');
                if base.ends_with(suffix) {
                    Some(base.to_string())
                } else {
                    Some(format!("{}{}", base, suffix))
                }
            }
            UrlTransform::Replace { from, to } => landing
                .contains(from)
                .then(|| landing.replacen(from, to, 1)),
            UrlTransform::PreprintDownload => download_from_manuscript_url(landing),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublisherRule {
    pub name: &'static str,
    /// Host substrings this rule answers for.
    pub hosts: &'static [&'static str],
    /// Download-control selectors, most specific first.
    pub selectors: &'static [&'static str],
    pub transform: UrlTransform,
}

impl PublisherRule {
    pub fn matches(&self, url: &str) -> bool {
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
            .unwrap_or_else(|| url.to_lowercase());
        self.hosts.iter().any(|h| host.contains(h))
    }

    /// First `href` matched by the rule's selectors.
    pub fn extract(&self, html: &str, page_url: &str) -> Option<String> {
        let doc = Html::parse_document(html);
        for raw in self.selectors {
            let Ok(selector) = Selector::parse(raw) else {
                debug!(publisher = self.name, selector = raw, "Skipping invalid selector");
                continue;
            };
            let hit = doc
                .select(&selector)
                .filter_map(|el| el.value().attr("href"))
                .find_map(|href| absolutize(page_url, href));
            if hit.is_some() {
                return hit;
            }
        }
        None
    }

    /// Selectors first, then the URL rewrite.
    pub fn apply(&self, html: &str, page_url: &str) -> Option<String> {
        self.extract(html, page_url)
            .or_else(|| self.transform.apply(page_url))
    }
}

#[derive(Debug, Clone)]
pub struct PublisherRegistry {
    rules: Vec<PublisherRule>,
}

impl Default for PublisherRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PublisherRegistry {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn builtin() -> Self {
        let rules = vec![
            PublisherRule {
                name: "preprints.org",
                hosts: &["preprints.org"],
                selectors: &[
                    "a.btn-download",
                    "a.downloadButton",
                    r##"a[data-target="#downloadPDFModal"]"##,
                    r#"a[title="Download"]"#,
                ],
                transform: UrlTransform::PreprintDownload,
            },
            PublisherRule {
                name: "biorxiv",
                hosts: &["biorxiv.org", "medrxiv.org"],
                selectors: &["a.article-dl-pdf-link", r#"a[title="Download PDF"]"#],
                transform: UrlTransform::Append(".full.pdf"),
            },
            PublisherRule {
                name: "nature",
                hosts: &["nature.com"],
                selectors: &["a.c-pdf-download__link", r#"a[data-track-action="download pdf"]"#],
                transform: UrlTransform::Append(".pdf"),
            },
            PublisherRule {
                name: "science",
                hosts: &["science.org", "sciencemag.org"],
                selectors: &[
                    "a.article-dl-pdf-link",
                    r#"a[data-toggle="tooltip"][title="Download PDF"]"#,
                ],
                transform: UrlTransform::Replace { from: "/doi/", to: "/doi/pdf/" },
            },
            PublisherRule {
                name: "cell",
                hosts: &["cell.com", "sciencedirect.com"],
                selectors: &["a.pdf-download-btn-link", r#"a.download-link[href*="pdf"]"#],
                transform: UrlTransform::Append("/pdfft"),
            },
            PublisherRule {
                name: "mdpi",
                hosts: &["mdpi.com"],
                selectors: &["a.download-files-pdf", r#"a[href*="pdf"][title="Download PDF"]"#],
                transform: UrlTransform::Append("/pdf"),
            },
            PublisherRule {
                name: "frontiers",
                hosts: &["frontiersin.org"],
                selectors: &["a.download-files-pdf", "a.pdf-link"],
                transform: UrlTransform::Replace { from: "/full", to: "/pdf" },
            },
            PublisherRule {
                name: "plos",
                hosts: &["plos"],
                selectors: &["a.pdfDownload", r#"a[data-doi][href*="pdf"]"#],
                transform: UrlTransform::None,
            },
            PublisherRule {
                name: "wiley",
                hosts: &["wiley.com"],
                selectors: &[],
                transform: UrlTransform::Append("/pdf"),
            },
            PublisherRule {
                name: "springer",
                hosts: &["springer.com"],
                selectors: &[],
                transform: UrlTransform::Append("/pdf"),
            },
        ];
        Self { rules }
    }

    pub fn register(&mut self, rule: PublisherRule) {
        self.rules.push(rule);
    }

    pub fn lookup(&self, url: &str) -> Option<&PublisherRule> {
        self.rules.iter().find(|r| r.matches(url))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_host_substring() {
        let registry = PublisherRegistry::builtin();
        assert_eq!(registry.lookup("https://www.nature.com/articles/s41586-020-2649-2").unwrap().name, "nature");
        assert_eq!(registry.lookup("https://journals.plos.org/plosone/article?id=1").unwrap().name, "plos");
        assert_eq!(registry.lookup("https://www.cell.com/cell-metabolism/fulltext/S1550").unwrap().name, "cell");
        assert!(registry.lookup("https://example.org/paper").is_none());
    }

    #[test]
    fn test_selector_beats_transform() {
        let registry = PublisherRegistry::builtin();
        let rule = registry.lookup("https://www.nature.com/articles/x").unwrap();
        let html = r#"<a class="c-pdf-download__link" href="/articles/x.pdf?download=1">PDF</a>"#;
        assert_eq!(
            rule.apply(html, "https://www.nature.com/articles/x").as_deref(),
            Some("https://www.nature.com/articles/x.pdf?download=1")
        );
        assert_eq!(
            rule.apply("<p>nothing</p>", "https://www.nature.com/articles/x").as_deref(),
            Some("https://www.nature.com/articles/x.pdf")
        );
    }

    #[test]
    fn test_transforms() {
        assert_eq!(
            UrlTransform::Replace { from: "/doi/", to: "/doi/pdf/" }
                .apply("https://www.science.org/doi/10.1126/science.abc")
                .as_deref(),
            Some("https://www.science.org/doi/pdf/10.1126/science.abc")
        );
        assert_eq!(
            UrlTransform::Append("/pdfft").apply("https://www.sciencedirect.com/science/article/pii/S1/").as_deref(),
            Some("https://www.sciencedirect.com/science/article/pii/S1/pdfft")
        );
        assert_eq!(UrlTransform::Append(".pdf").apply("https://x.org/a.pdf").as_deref(), Some("https://x.org/a.pdf"));
        assert!(UrlTransform::Replace { from: "/full", to: "/pdf" }.apply("https://x.org/abs").is_none());
        assert!(UrlTransform::None.apply("https://x.org").is_none());
    }

    #[test]
    fn test_plos_without_control_yields_nothing() {
        let registry = PublisherRegistry::builtin();
        let rule = registry.lookup("https://journals.plos.org/plosone/article?id=1").unwrap();
        assert!(rule.apply("<html></html>", "https://journals.plos.org/plosone/article?id=1").is_none());
    }

    #[test]
    fn test_register_custom_rule() {
        let mut registry = PublisherRegistry::empty();
        assert!(registry.is_empty());
        registry.register(PublisherRule {
            name: "elife",
            hosts: &["elifesciences.org"],
            selectors: &[],
            transform: UrlTransform::Append(".pdf"),
        });
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup("https://elifesciences.org/articles/1").is_some());
    }
}

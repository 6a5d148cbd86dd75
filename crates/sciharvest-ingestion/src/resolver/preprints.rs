//! preprints.org identifiers and URL templates.
//!
//! preprints.org blocks most scraping, so its download URLs are built from
//! the DOI (`10.20944/preprints{yyyymm}.{number}.v{version}`) rather than
//! discovered.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref FROM_DOI: Regex = Regex::new(r"preprints(\d+)\.(\d+)(?:\.v(\d+))?").unwrap();
    static ref FROM_URL: Regex = Regex::new(r"/manuscript/(\d+\.\d+)/v(\d+)/?").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprintId {
    /// `{yyyymm}.{number}`
    pub id: String,
    pub version: u32,
}

impl PreprintId {
    pub fn from_doi(doi: &str) -> Option<Self> {
        let lower = doi.to_lowercase();
        let caps = FROM_DOI.captures(&lower)?;
        let version = caps
            .get(3)
            .and_then(|v| v.as_str().parse().ok())
            .unwrap_or(1);
        Some(Self { id: format!("{}.{}", &caps[1], &caps[2]), version })
    }

    pub fn from_url(url: &str) -> Option<Self> {
        let caps = FROM_URL.captures(url)?;
        Some(Self { id: caps[1].to_string(), version: caps[2].parse().ok()? })
    }

    pub fn manuscript_url(&self, site: &str) -> String {
        format!("{}/manuscript/{}/v{}", site.trim_end_matches('/'), self.id, self.version)
    }

    pub fn download_url(&self, site: &str) -> String {
        format!("{}/download", self.manuscript_url(site))
    }

    /// Tried when `download_url` answers with a non-success status.
    pub fn alternate_download_url(&self, site: &str) -> String {
        format!("{}/download/file", self.manuscript_url(site))
    }
}

/// `.../manuscript/{id}/v{n}` → `.../manuscript/{id}/v{n}/download`, keeping
/// whatever host and prefix the page URL has.
pub fn download_from_manuscript_url(url: &str) -> Option<String> {
    let m = FROM_URL.find(url)?;
    Some(format!("{}/download", url[..m.end()].trim_end_matches('/')))
}

pub fn is_preprints_doi(doi: &str) -> bool {
    doi.to_lowercase().contains("preprints")
}

pub fn is_preprints_url(url: &str) -> bool {
    url.contains("preprints.org")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE: &str = "https://www.preprints.org";

    #[test]
    fn test_parse_versioned_doi() {
        let id = PreprintId::from_doi("10.20944/preprints202101.0001.v2").unwrap();
        assert_eq!(id, PreprintId { id: "202101.0001".into(), version: 2 });
        assert_eq!(id.manuscript_url(SITE), "https://www.preprints.org/manuscript/202101.0001/v2");
        assert_eq!(id.download_url(SITE), "https://www.preprints.org/manuscript/202101.0001/v2/download");
        assert_eq!(
            id.alternate_download_url(SITE),
            "https://www.preprints.org/manuscript/202101.0001/v2/download/file"
        );
    }

    #[test]
    fn test_unversioned_doi_defaults_to_v1() {
        let id = PreprintId::from_doi("10.20944/preprints202312.0456").unwrap();
        assert_eq!(id.version, 1);
    }

    #[test]
    fn test_parse_manuscript_url() {
        let id = PreprintId::from_url("https://www.preprints.org/manuscript/202101.0001/v3/").unwrap();
        assert_eq!(id.id, "202101.0001");
        assert_eq!(id.version, 3);
        assert!(PreprintId::from_url("https://www.preprints.org/about").is_none());
    }

    #[test]
    fn test_download_from_manuscript_url() {
        assert_eq!(
            download_from_manuscript_url("https://www.preprints.org/manuscript/202101.0001/v1/").as_deref(),
            Some("https://www.preprints.org/manuscript/202101.0001/v1/download")
        );
        assert!(download_from_manuscript_url("https://www.preprints.org/").is_none());
    }

    #[test]
    fn test_uppercase_doi() {
        let id = PreprintId::from_doi("10.20944/PREPRINTS202101.0001.V3").unwrap();
        assert_eq!(id, PreprintId { id: "202101.0001".into(), version: 3 });
    }

    #[test]
    fn test_non_preprints_doi() {
        assert!(PreprintId::from_doi("10.1101/2023.01.01.500001").is_none());
        assert!(!is_preprints_doi("10.1101/2023.01.01.500001"));
    }
}

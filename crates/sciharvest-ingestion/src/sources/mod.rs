//! Source adapters, one per literature database.
//!
//! Every adapter implements [`StudySource`]. The harvest pipeline is written
//! once against that trait; adapters only differ in the capability methods
//! they override.

pub mod biorxiv;
pub mod doaj;
pub mod europepmc;
pub mod googlescholar;
pub mod pmc;
pub mod pubmed;
pub mod sciencedirect;
pub mod semanticscholar;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::fetcher::sanitize_identifier;
use crate::models::{assign_unique_ids, SearchQuery, SourceContext, SourceSpec, StudyRecord};
use crate::resolver::{PdfResolver, Resolution};

/// Common interface for all literature source adapters.
#[async_trait]
pub trait StudySource: Send + Sync {
    fn spec(&self) -> SourceSpec;

    /// Adapter-specific search. Errors are reported by [`StudySource::search`].
    async fn fetch_records(
        &self,
        query: &SearchQuery,
        max_results: usize,
    ) -> anyhow::Result<Vec<StudyRecord>>;

    /// Searches and normalises. Never fails: a request-level failure is
    /// logged and yields an empty list.
    async fn search(&self, query: &SearchQuery, max_results: usize) -> Vec<StudyRecord> {
        match self.fetch_records(query, max_results).await {
            Ok(mut records) => {
                records.truncate(max_results);
                assign_unique_ids(&mut records, self.spec().as_str());
                info!(source = self.spec().as_str(), n = records.len(), "Records retrieved");
                records
            }
            Err(e) => {
                warn!(source = self.spec().as_str(), error = %e, "Search failed");
                Vec::new()
            }
        }
    }

    /// Artifact filename stem for a record.
    fn file_identifier(&self, record: &StudyRecord) -> String {
        sanitize_identifier(&format!("{}_{}", self.spec().as_str(), record.unique_id))
    }

    /// Finds a candidate PDF URL. Adapters override this when their
    /// metadata links need verifying before the shared chain runs.
    async fn resolve_pdf(&self, record: &StudyRecord, resolver: &PdfResolver) -> Option<Resolution> {
        resolver.resolve(record).await
    }

    /// Multiplier applied to the inter-request delay.
    fn delay_factor(&self) -> u32 {
        1
    }
}

/// Builds the adapter for a source.
pub fn build_source(spec: SourceSpec, ctx: &SourceContext) -> anyhow::Result<Box<dyn StudySource>> {
    let source: Box<dyn StudySource> = match spec {
        SourceSpec::PubMed          => Box::new(pubmed::PubMedClient::new(ctx)?),
        SourceSpec::Pmc             => Box::new(pmc::PmcClient::new(ctx)?),
        SourceSpec::EuropePmc       => Box::new(europepmc::EuropePmcClient::new(ctx)?),
        SourceSpec::BioRxiv         => Box::new(biorxiv::BioRxivClient::new(ctx)?),
        SourceSpec::Doaj            => Box::new(doaj::DoajClient::new(ctx)?),
        SourceSpec::ScienceDirect   => Box::new(sciencedirect::ScienceDirectClient::new(ctx)?),
        SourceSpec::SemanticScholar => Box::new(semanticscholar::SemanticScholarClient::new(ctx)?),
        SourceSpec::GoogleScholar   => Box::new(googlescholar::GoogleScholarClient::new(ctx)?),
    };
    Ok(source)
}

/// JSON string field, or `None` when missing, null, non-string or blank.
pub(crate) fn json_str(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Collapses runs of whitespace and strips inline markup.
pub(crate) fn clean_text(raw: &str) -> String {
    lazy_static::lazy_static! {
        static ref TAGS: regex::Regex = regex::Regex::new(r"<[^>]+>").unwrap();
    }
    TAGS.replace_all(raw, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_str_tolerates_drift() {
        assert_eq!(json_str(&json!("x")), Some("x".to_string()));
        assert_eq!(json_str(&json!(2021)), Some("2021".to_string()));
        assert_eq!(json_str(&json!(null)), None);
        assert_eq!(json_str(&json!("  ")), None);
        assert_eq!(json_str(&json!({"a": 1})), None);
    }

    #[test]
    fn test_clean_text_strips_markup() {
        assert_eq!(clean_text("<i>NMN</i>   improves\n insulin"), "NMN improves insulin");
    }

    #[test]
    fn test_every_source_builds() {
        let ctx = SourceContext::default();
        for spec in SourceSpec::ALL {
            let source = build_source(spec, &ctx).unwrap();
            assert_eq!(source.spec(), spec);
        }
    }

    #[test]
    fn test_scholar_delay_is_doubled() {
        let ctx = SourceContext::default();
        let scholar = build_source(SourceSpec::GoogleScholar, &ctx).unwrap();
        let pubmed = build_source(SourceSpec::PubMed, &ctx).unwrap();
        assert_eq!(scholar.delay_factor(), 2);
        assert_eq!(pubmed.delay_factor(), 1);
    }
}

//! Data models for the harvest pipeline.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sciharvest_common::{HttpClient, HttpConfig};

pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const UNKNOWN_JOURNAL: &str = "Unknown Journal";
pub const UNKNOWN_DATE: &str = "Unknown Date";
pub const NO_ABSTRACT: &str = "Abstract not available";

/// The database a record was discovered in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Database {
    #[serde(rename = "PubMed")]
    PubMed,
    #[serde(rename = "PMC")]
    Pmc,
    #[serde(rename = "Europe PMC")]
    EuropePmc,
    #[serde(rename = "bioRxiv")]
    BioRxiv,
    #[serde(rename = "medRxiv")]
    MedRxiv,
    #[serde(rename = "DOAJ")]
    Doaj,
    #[serde(rename = "ScienceDirect")]
    ScienceDirect,
    #[serde(rename = "Semantic Scholar")]
    SemanticScholar,
    #[serde(rename = "Google Scholar")]
    GoogleScholar,
}

impl Database {
    pub fn as_str(&self) -> &'static str {
        match self {
            Database::PubMed          => "pubmed",
            Database::Pmc             => "pmc",
            Database::EuropePmc       => "europepmc",
            Database::BioRxiv         => "biorxiv",
            Database::MedRxiv         => "medrxiv",
            Database::Doaj            => "doaj",
            Database::ScienceDirect   => "sciencedirect",
            Database::SemanticScholar => "semanticscholar",
            Database::GoogleScholar   => "googlescholar",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Database::PubMed          => "PubMed",
            Database::Pmc             => "PMC",
            Database::EuropePmc       => "Europe PMC",
            Database::BioRxiv         => "bioRxiv",
            Database::MedRxiv         => "medRxiv",
            Database::Doaj            => "DOAJ",
            Database::ScienceDirect   => "ScienceDirect",
            Database::SemanticScholar => "Semantic Scholar",
            Database::GoogleScholar   => "Google Scholar",
        }
    }
}

/// Which source adapters to run. bioRxiv and medRxiv share one adapter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceSpec {
    PubMed,
    Pmc,
    EuropePmc,
    BioRxiv,
    Doaj,
    ScienceDirect,
    SemanticScholar,
    GoogleScholar,
}

impl SourceSpec {
    pub const ALL: [SourceSpec; 8] = [
        SourceSpec::PubMed,
        SourceSpec::Pmc,
        SourceSpec::EuropePmc,
        SourceSpec::BioRxiv,
        SourceSpec::Doaj,
        SourceSpec::ScienceDirect,
        SourceSpec::SemanticScholar,
        SourceSpec::GoogleScholar,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceSpec::PubMed          => "pubmed",
            SourceSpec::Pmc             => "pmc",
            SourceSpec::EuropePmc       => "europepmc",
            SourceSpec::BioRxiv         => "biorxiv",
            SourceSpec::Doaj            => "doaj",
            SourceSpec::ScienceDirect   => "sciencedirect",
            SourceSpec::SemanticScholar => "semanticscholar",
            SourceSpec::GoogleScholar   => "googlescholar",
        }
    }

    /// Parses a user-facing key. Accepts a few common spellings.
    pub fn from_key(key: &str) -> Option<Self> {
        let k: String = key
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match k.as_str() {
            "pubmed"                          => Some(SourceSpec::PubMed),
            "pmc" | "pubmedcentral"           => Some(SourceSpec::Pmc),
            "europepmc" | "epmc"              => Some(SourceSpec::EuropePmc),
            "biorxiv" | "medrxiv"             => Some(SourceSpec::BioRxiv),
            "doaj"                            => Some(SourceSpec::Doaj),
            "sciencedirect"                   => Some(SourceSpec::ScienceDirect),
            "semanticscholar" | "semantic"    => Some(SourceSpec::SemanticScholar),
            "googlescholar" | "scholar"       => Some(SourceSpec::GoogleScholar),
            _ => None,
        }
    }
}

/// How a record's local artifact came to exist.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactOrigin {
    Downloaded,
    Synthesized,
}

impl ArtifactOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactOrigin::Downloaded => "downloaded",
            ArtifactOrigin::Synthesized => "synthesized",
        }
    }
}

/// The canonical unit flowing through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StudyRecord {
    pub title: String,
    pub authors: Vec<String>,
    pub journal: String,
    /// Free-form, never parsed.
    pub publication_date: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub source_url: String,
    pub pdf_link: Option<String>,
    pub local_artifact_path: Option<PathBuf>,
    pub artifact_origin: Option<ArtifactOrigin>,
    pub database: Database,
    pub doi: Option<String>,
    pub pmid: Option<String>,
    pub pmcid: Option<String>,
    pub paper_id: Option<String>,
    pub unique_id: String,
    /// Europe PMC source code (MED, PMC, PPR, ...).
    pub source_type: Option<String>,
}

impl StudyRecord {
    /// A record with placeholder core fields.
    pub fn new(database: Database) -> Self {
        Self {
            title: UNKNOWN_TITLE.to_string(),
            authors: Vec::new(),
            journal: UNKNOWN_JOURNAL.to_string(),
            publication_date: UNKNOWN_DATE.to_string(),
            abstract_text: NO_ABSTRACT.to_string(),
            source_url: String::new(),
            pdf_link: None,
            local_artifact_path: None,
            artifact_origin: None,
            database,
            doi: None,
            pmid: None,
            pmcid: None,
            paper_id: None,
            unique_id: String::new(),
            source_type: None,
        }
    }

    /// Digits of the PMID, if any.
    pub fn numeric_pmid(&self) -> Option<String> {
        let digits: String = self.pmid.as_deref()?.chars().filter(|c| c.is_ascii_digit()).collect();
        (!digits.is_empty()).then_some(digits)
    }

    /// The PMCID normalised to `PMC{digits}`.
    pub fn normalized_pmcid(&self) -> Option<String> {
        self.pmcid.as_deref().and_then(normalize_pmcid)
    }

    /// Every identifier this record can be found by, as `{kind}:{value}`
    /// keys. PMIDs and PMCID digits overlap, so each kind has its own prefix.
    pub fn identifier_variants(&self) -> Vec<String> {
        let mut out = self.natural_identifier_keys();
        if let Some(doi) = self.doi.as_deref().filter(|d| !d.is_empty()) {
            out.push(format!("doi:{}", doi.to_lowercase().replace('/', "_")));
        }
        if !self.unique_id.is_empty() {
            out.push(format!("id:{}", self.unique_id.to_lowercase()));
        }
        out
    }

    /// Keys for the identifiers a record carries independently of any
    /// adapter: DOI, PMID, PMCID digits, paper id.
    pub fn natural_identifier_keys(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(doi) = self.doi.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            out.push(format!("doi:{}", doi.to_lowercase()));
        }
        if let Some(pmid) = self.numeric_pmid() {
            out.push(format!("pmid:{pmid}"));
        }
        if let Some(pmcid) = self.normalized_pmcid() {
            out.push(format!("pmcid:{}", pmcid.trim_start_matches("PMC")));
        }
        if let Some(id) = self.paper_id.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            out.push(format!("paper:{}", id.to_lowercase()));
        }
        out
    }

    /// Natural identifier used when no adapter-specific one exists.
    fn natural_identifier(&self) -> Option<String> {
        if let Some(pmid) = self.numeric_pmid() {
            return Some(pmid);
        }
        if let Some(pmcid) = self.normalized_pmcid() {
            return Some(pmcid);
        }
        if let Some(doi) = self.doi.as_deref().filter(|d| !d.is_empty()) {
            return Some(doi.replace('/', "_"));
        }
        self.paper_id.as_deref().filter(|p| !p.is_empty()).map(|p| p.replace('/', "_"))
    }
}

/// `PMC1234567`, `pmc1234567` or `1234567` → `PMC1234567`.
pub fn normalize_pmcid(raw: &str) -> Option<String> {
    let digits: String = raw
        .trim()
        .trim_start_matches("PMC")
        .trim_start_matches("pmc")
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    (!digits.is_empty()).then(|| format!("PMC{}", digits))
}

/// Fills every empty `unique_id` and makes them unique within `records`.
///
/// Natural identifiers win; otherwise `{prefix}_{ordinal}`. Collisions get
/// the ordinal appended.
pub fn assign_unique_ids(records: &mut [StudyRecord], prefix: &str) {
    let mut seen: HashSet<String> = HashSet::new();
    for (i, record) in records.iter_mut().enumerate() {
        if record.unique_id.trim().is_empty() {
            record.unique_id = record
                .natural_identifier()
                .unwrap_or_else(|| format!("{}_{}", prefix, i));
        }
        if !seen.insert(record.unique_id.clone()) {
            let mut candidate = format!("{}_{}", record.unique_id, i);
            while seen.contains(&candidate) {
                candidate.push('_');
            }
            record.unique_id = candidate.clone();
            seen.insert(candidate);
        }
    }
}

/// One titled block of extracted text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Section {
    pub title: String,
    pub content: String,
}

impl Section {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self { title: title.into(), content: content.into() }
    }

    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// Scraped article structure, consumed once by the document builder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArticleContent {
    pub title: String,
    pub authors: Vec<String>,
    pub journal: String,
    pub publication_date: String,
    pub abstract_text: String,
    pub sections: Vec<Section>,
    pub references: Vec<String>,
}

impl ArticleContent {
    /// Seeds metadata from a record; sections start empty.
    pub fn from_record(record: &StudyRecord) -> Self {
        Self {
            title: record.title.clone(),
            authors: record.authors.clone(),
            journal: record.journal.clone(),
            publication_date: record.publication_date.clone(),
            abstract_text: record.abstract_text.clone(),
            sections: Vec::new(),
            references: Vec::new(),
        }
    }

    pub fn non_empty_sections(&self) -> usize {
        self.sections.iter().filter(|s| !s.is_empty()).count()
    }

    /// Enough structure to stop escalating to other URLs.
    pub fn has_sufficient_sections(&self) -> bool {
        self.non_empty_sections() >= 2
    }

    /// Adds a section unless it is blank or a duplicate title+content.
    pub fn push_section(&mut self, title: &str, content: &str) {
        let content = content.trim();
        if content.is_empty() {
            return;
        }
        let title = if title.trim().is_empty() { "Content" } else { title.trim() };
        if self.sections.iter().any(|s| s.title == title && s.content == content) {
            return;
        }
        self.sections.push(Section::new(title, content));
    }
}

/// A topic query plus refinement terms. Also the saved-query file format.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default)]
    pub terms: Vec<String>,
}

const QUERY_STOP_WORDS: &[&str] = &[
    "and", "or", "not", "the", "of", "in", "for", "with", "on", "to", "a", "an", "by",
];

impl SearchQuery {
    pub fn new(query: impl Into<String>, terms: Vec<String>) -> Self {
        Self { query: query.into(), terms }
    }

    /// `query AND (t1 OR t2 ...)` for boolean-capable search APIs.
    pub fn boolean_query(&self) -> String {
        let terms: Vec<&str> = self
            .terms
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect();
        if terms.is_empty() {
            self.query.clone()
        } else {
            format!("{} AND ({})", self.query, terms.join(" OR "))
        }
    }

    /// Lower-cased domain words of the query, for client-side relevance filters.
    pub fn key_terms(&self) -> Vec<String> {
        let mut terms: Vec<String> = self
            .query
            .split(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | '"' | ','))
            .map(|w| w.trim().to_lowercase())
            .filter(|w| w.len() >= 3 && !QUERY_STOP_WORDS.contains(&w.as_str()))
            .collect();
        terms.dedup();
        if terms.is_empty() && !self.query.trim().is_empty() {
            terms.push(self.query.trim().to_lowercase());
        }
        terms
    }

    /// True when any key term appears in the title or abstract.
    pub fn matches(&self, title: &str, abstract_text: &str) -> bool {
        let title = title.to_lowercase();
        let abstract_text = abstract_text.to_lowercase();
        self.key_terms()
            .iter()
            .any(|t| title.contains(t.as_str()) || abstract_text.contains(t.as_str()))
    }
}

/// Base URLs of every external service. `Default` is production.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoints {
    pub eutils: String,
    pub pubmed_site: String,
    pub pmc_site: String,
    pub europepmc_api: String,
    pub europepmc_site: String,
    pub biorxiv_api: String,
    pub biorxiv_site: String,
    pub medrxiv_site: String,
    pub doaj_api: String,
    pub sciencedirect_site: String,
    pub semantic_scholar_api: String,
    pub google_scholar: String,
    pub doi_resolver: String,
    pub preprints_site: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            eutils:               "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".to_string(),
            pubmed_site:          "https://pubmed.ncbi.nlm.nih.gov".to_string(),
            pmc_site:             "https://www.ncbi.nlm.nih.gov/pmc".to_string(),
            europepmc_api:        "https://www.ebi.ac.uk/europepmc/webservices/rest".to_string(),
            europepmc_site:       "https://europepmc.org".to_string(),
            biorxiv_api:          "https://api.biorxiv.org".to_string(),
            biorxiv_site:         "https://www.biorxiv.org".to_string(),
            medrxiv_site:         "https://www.medrxiv.org".to_string(),
            doaj_api:             "https://doaj.org/api".to_string(),
            sciencedirect_site:   "https://www.sciencedirect.com".to_string(),
            semantic_scholar_api: "https://api.semanticscholar.org/graph/v1".to_string(),
            google_scholar:       "https://scholar.google.com".to_string(),
            doi_resolver:         "https://doi.org".to_string(),
            preprints_site:       "https://www.preprints.org".to_string(),
        }
    }
}

impl Endpoints {
    /// Every service mounted under a distinct path of one base URL.
    pub fn rooted_at(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        let at = |path: &str| format!("{}/{}", base, path);
        Self {
            eutils:               at("eutils"),
            pubmed_site:          at("pubmed"),
            pmc_site:             at("pmc"),
            europepmc_api:        at("europepmc/api"),
            europepmc_site:       at("europepmc"),
            biorxiv_api:          at("biorxiv-api"),
            biorxiv_site:         at("biorxiv"),
            medrxiv_site:         at("medrxiv"),
            doaj_api:             at("doaj/api"),
            sciencedirect_site:   at("sciencedirect"),
            semantic_scholar_api: at("s2/graph/v1"),
            google_scholar:       at("scholar"),
            doi_resolver:         at("doi"),
            preprints_site:       at("preprints"),
        }
    }

    pub fn pubmed_article(&self, pmid: &str) -> String {
        format!("{}/{}/", self.pubmed_site, pmid)
    }

    pub fn pmc_article(&self, pmcid: &str) -> String {
        format!("{}/articles/{}/", self.pmc_site, pmcid)
    }

    pub fn europepmc_pdf(&self, pmcid: &str) -> String {
        format!("{}/articles/{}/pdf/main.pdf", self.europepmc_site, pmcid)
    }

    pub fn europepmc_med_article(&self, pmid: &str) -> String {
        format!("{}/article/med/{}", self.europepmc_site, pmid)
    }

    pub fn doi_url(&self, doi: &str) -> String {
        format!("{}/{}", self.doi_resolver, doi)
    }
}

/// Everything an adapter or resolver needs to reach the outside world.
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub endpoints: Endpoints,
    pub http: HttpConfig,
    pub pubmed_api_key: Option<String>,
    pub semantic_scholar_api_key: Option<String>,
    pub biorxiv_window_days: i64,
    pub biorxiv_max_pages: usize,
    /// Pause between Google Scholar result pages.
    pub scholar_page_delay: Duration,
}

impl Default for SourceContext {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            http: HttpConfig::default(),
            pubmed_api_key: None,
            semantic_scholar_api_key: None,
            biorxiv_window_days: 730,
            biorxiv_max_pages: 10,
            scholar_page_delay: Duration::from_secs(2),
        }
    }
}

impl SourceContext {
    /// A fresh client for one logical operation.
    pub fn client(&self) -> sciharvest_common::Result<HttpClient> {
        HttpClient::new(self.http.clone())
    }
}

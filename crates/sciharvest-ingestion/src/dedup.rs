//! Run-wide identifier index.
//!
//! Every identifier of every accepted record (DOI, PMID, PMCID, paper id,
//! unique id, artifact file identifier) maps to the record's position in the
//! run's result list. Keys carry their kind (`pmid:`, `pmcid:`, `doi:`,
//! `paper:`, `id:`); a bare identifier is only interpreted across kinds in
//! `lookup`. Built incrementally; used
//! to drop cross-term and cross-source duplicates and to find a record again
//! from any one of its identifiers.

use std::collections::HashMap;

use crate::models::StudyRecord;

/// Outcome of checking an incoming record against the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupResult {
    New,
    /// Already held at `position`, matched through `identifier`.
    Duplicate { position: usize, identifier: String },
}

#[derive(Debug, Default)]
pub struct IdentifierIndex {
    by_variant: HashMap<String, usize>,
}

fn key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

impl IdentifierIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Natural identifiers only. Synthesised `{source}_{n}` ids are unique
    /// per adapter, not across sources, so they never mark a duplicate.
    pub fn check(&self, record: &StudyRecord) -> DedupResult {
        for variant in record.natural_identifier_keys() {
            if let Some(&position) = self.by_variant.get(&variant) {
                return DedupResult::Duplicate { position, identifier: variant };
            }
        }
        DedupResult::New
    }

    /// Indexes every variant of `record`, plus its artifact identifier.
    /// Existing entries are kept, so the first record to claim a variant owns it.
    pub fn insert(&mut self, record: &StudyRecord, file_identifier: &str, position: usize) {
        let variants = record
            .identifier_variants()
            .into_iter()
            .chain((!file_identifier.trim().is_empty()).then(|| format!("id:{}", key(file_identifier))));
        for variant in variants {
            self.by_variant.entry(variant).or_insert(position);
        }
    }

    /// Position of the record known by `identifier`, in any variant form.
    /// Bare digits are tried as a PMID first, then as PMCID digits.
    pub fn lookup(&self, identifier: &str) -> Option<usize> {
        let k = key(identifier);
        if k.is_empty() {
            return None;
        }
        let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        let mut candidates = vec![format!("id:{k}"), format!("doi:{k}"), format!("paper:{k}")];
        if all_digits(&k) {
            candidates.push(format!("pmid:{k}"));
            candidates.push(format!("pmcid:{k}"));
        } else if let Some(digits) = k.strip_prefix("pmc").filter(|d| all_digits(d)) {
            candidates.push(format!("pmcid:{digits}"));
        }
        candidates.iter().find_map(|c| self.by_variant.get(c).copied())
    }

    pub fn len(&self) -> usize {
        self.by_variant.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_variant.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Database;

    fn record(db: Database, doi: Option<&str>, pmid: Option<&str>, pmcid: Option<&str>) -> StudyRecord {
        let mut r = StudyRecord::new(db);
        r.doi = doi.map(String::from);
        r.pmid = pmid.map(String::from);
        r.pmcid = pmcid.map(String::from);
        r.unique_id = format!("{}_0", db.as_str());
        r
    }

    #[test]
    fn test_cross_source_doi_duplicate() {
        let mut index = IdentifierIndex::new();
        let a = record(Database::PubMed, Some("10.1/ABC"), Some("111"), None);
        index.insert(&a, "pubmed_111", 0);

        let b = record(Database::EuropePmc, Some("10.1/abc"), None, None);
        assert_eq!(
            index.check(&b),
            DedupResult::Duplicate { position: 0, identifier: "doi:10.1/abc".into() }
        );
    }

    #[test]
    fn test_synthetic_ids_do_not_collide_across_sources() {
        let mut index = IdentifierIndex::new();
        let a = record(Database::Doaj, None, None, None);
        index.insert(&a, "doaj_0", 0);
        let mut b = record(Database::Doaj, None, None, None);
        b.title = "Another".into();
        assert_eq!(index.check(&b), DedupResult::New);
    }

    #[test]
    fn test_lookup_by_any_variant() {
        let mut index = IdentifierIndex::new();
        let r = record(Database::Pmc, Some("10.3390/nu13010001"), Some("33375178"), Some("PMC7823000"));
        index.insert(&r, "pmc_PMC7823000", 4);

        assert_eq!(index.lookup("PMC7823000"), Some(4));
        assert_eq!(index.lookup("7823000"), Some(4));
        assert_eq!(index.lookup("33375178"), Some(4));
        assert_eq!(index.lookup("10.3390_nu13010001"), Some(4));
        assert_eq!(index.lookup("10.3390/NU13010001"), Some(4));
        assert_eq!(index.lookup("pmc_pmc7823000"), Some(4));
        assert_eq!(index.lookup("unknown"), None);
    }

    #[test]
    fn test_pmid_does_not_match_pmcid_digits() {
        let mut index = IdentifierIndex::new();
        let a = record(Database::Pmc, Some("10.3390/nu13010001"), None, Some("PMC7823000"));
        index.insert(&a, "pmc_PMC7823000", 0);

        let b = record(Database::PubMed, Some("10.1016/j.cmet.2021.01.001"), Some("7823000"), None);
        assert_eq!(index.check(&b), DedupResult::New);

        let c = record(Database::EuropePmc, None, None, Some("7823000"));
        assert_eq!(
            index.check(&c),
            DedupResult::Duplicate { position: 0, identifier: "pmcid:7823000".into() }
        );
    }

    #[test]
    fn test_lookup_prefers_pmid_for_bare_digits() {
        let mut index = IdentifierIndex::new();
        let a = record(Database::Pmc, None, None, Some("PMC555"));
        index.insert(&a, "pmc_PMC555", 0);
        let b = record(Database::PubMed, None, Some("555"), None);
        index.insert(&b, "pubmed_555", 1);
        assert_eq!(index.lookup("555"), Some(1));
        assert_eq!(index.lookup("PMC555"), Some(0));
    }

    #[test]
    fn test_first_claim_wins() {
        let mut index = IdentifierIndex::new();
        let r = record(Database::PubMed, Some("10.1/x"), None, None);
        index.insert(&r, "a", 0);
        index.insert(&r, "b", 1);
        assert_eq!(index.lookup("10.1/x"), Some(0));
        assert_eq!(index.lookup("b"), Some(1));
    }
}

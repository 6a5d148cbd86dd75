//! Saved-query persistence: `saved_query.json` holding `{query, terms}`.

use std::path::{Path, PathBuf};

use sciharvest_common::Result;
use tracing::{debug, info};

use crate::models::SearchQuery;

pub const SAVED_QUERY_FILE: &str = "saved_query.json";

#[derive(Debug, Clone)]
pub struct QueryStore {
    path: PathBuf,
}

impl QueryStore {
    /// Store rooted in the run's output directory.
    pub fn new(output_dir: &Path) -> Self {
        Self { path: output_dir.join(SAVED_QUERY_FILE) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, query: &SearchQuery) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(query)?)?;
        info!(path = %self.path.display(), query = %query.query, "Query saved");
        Ok(())
    }

    /// `Ok(None)` when nothing has been saved yet.
    pub fn load(&self) -> Result<Option<SearchQuery>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No saved query");
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(QueryStore::new(dir.path()).load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueryStore::new(&dir.path().join("nested"));
        let q = SearchQuery::new("nicotinamide mononucleotide", vec!["aging".into(), "NAD+".into()]);
        store.save(&q).unwrap();
        assert_eq!(store.load().unwrap(), Some(q));
    }

    #[test]
    fn test_terms_default_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueryStore::new(dir.path());
        std::fs::write(store.path(), r#"{"query": "NMN"}"#).unwrap();
        let q = store.load().unwrap().unwrap();
        assert_eq!(q.query, "NMN");
        assert!(q.terms.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueryStore::new(dir.path());
        std::fs::write(store.path(), "not json").unwrap();
        assert!(store.load().is_err());
    }
}

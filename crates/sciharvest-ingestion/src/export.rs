//! Per-run output files: CSV and JSON record dumps plus the HTML report.

use std::path::{Path, PathBuf};

use chrono::Local;
use sciharvest_common::Result;
use serde::Serialize;
use tracing::info;

use crate::models::StudyRecord;
use crate::pipeline::HarvestResult;
use crate::report::render_report;

/// Flat CSV row. Authors are joined with `; ` so the column stays scalar.
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    title: &'a str,
    authors: String,
    journal: &'a str,
    publication_date: &'a str,
    #[serde(rename = "abstract")]
    abstract_text: &'a str,
    url: &'a str,
    pdf_link: &'a str,
    pdf_path: String,
    artifact_origin: &'a str,
    database: &'static str,
    doi: &'a str,
    pmid: &'a str,
    pmcid: &'a str,
    paper_id: &'a str,
    unique_id: &'a str,
}

impl<'a> From<&'a StudyRecord> for CsvRow<'a> {
    fn from(r: &'a StudyRecord) -> Self {
        Self {
            title: &r.title,
            authors: r.authors.join("; "),
            journal: &r.journal,
            publication_date: &r.publication_date,
            abstract_text: &r.abstract_text,
            url: &r.source_url,
            pdf_link: r.pdf_link.as_deref().unwrap_or_default(),
            pdf_path: r
                .local_artifact_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            artifact_origin: r.artifact_origin.map(|o| o.as_str()).unwrap_or_default(),
            database: r.database.display_name(),
            doi: r.doi.as_deref().unwrap_or_default(),
            pmid: r.pmid.as_deref().unwrap_or_default(),
            pmcid: r.pmcid.as_deref().unwrap_or_default(),
            paper_id: r.paper_id.as_deref().unwrap_or_default(),
            unique_id: &r.unique_id,
        }
    }
}

pub fn write_csv(records: &[StudyRecord], path: &Path) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().has_headers(true).from_path(path)?;
    for record in records {
        wtr.serialize(CsvRow::from(record))?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_json(records: &[StudyRecord], path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// `YYYYmmdd_HHMMSS` in local time, shared by every file of a run.
pub fn run_timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

#[derive(Debug, Clone)]
pub struct OutputFiles {
    pub csv: PathBuf,
    pub json: PathBuf,
    pub report: PathBuf,
}

/// Writes `studies_{ts}.csv`, `studies_{ts}.json` and
/// `studies_report_{ts}.html` into `dir`.
pub fn write_outputs(result: &HarvestResult, dir: &Path, timestamp: &str) -> Result<OutputFiles> {
    std::fs::create_dir_all(dir)?;
    let files = OutputFiles {
        csv: dir.join(format!("studies_{}.csv", timestamp)),
        json: dir.join(format!("studies_{}.json", timestamp)),
        report: dir.join(format!("studies_report_{}.html", timestamp)),
    };

    write_csv(&result.records, &files.csv)?;
    write_json(&result.records, &files.json)?;
    std::fs::write(&files.report, render_report(&result.query, &result.records))?;

    info!(
        records = result.records.len(),
        csv = %files.csv.display(),
        json = %files.json.display(),
        report = %files.report.display(),
        "Outputs written"
    );
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ArtifactOrigin, Database};

    fn records() -> Vec<StudyRecord> {
        let mut a = StudyRecord::new(Database::PubMed);
        a.title = "NMN, NAD+ and \"aging\"".into();
        a.authors = vec!["Roe J".into(), "Doe A".into()];
        a.pmid = Some("33888596".into());
        a.unique_id = "33888596".into();
        a.local_artifact_path = Some(PathBuf::from("studies/pdfs/pubmed_33888596.pdf"));
        a.artifact_origin = Some(ArtifactOrigin::Downloaded);

        let mut b = StudyRecord::new(Database::SemanticScholar);
        b.title = "Second".into();
        b.unique_id = "semanticscholar_1".into();
        vec![a, b]
    }

    #[test]
    fn test_csv_joins_authors_and_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        write_csv(&records(), &path).unwrap();

        let mut rdr = csv::Reader::from_path(&path).unwrap();
        let headers = rdr.headers().unwrap().clone();
        assert_eq!(&headers[0], "title");
        assert!(headers.iter().any(|h| h == "abstract"));

        let rows: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "NMN, NAD+ and \"aging\"");
        assert_eq!(&rows[0][1], "Roe J; Doe A");
        let db_col = headers.iter().position(|h| h == "database").unwrap();
        assert_eq!(&rows[1][db_col], "Semantic Scholar");
    }

    #[test]
    fn test_json_is_array_of_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_json(&records(), &path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
        assert_eq!(value[0]["pmid"], "33888596");
    }

    #[test]
    fn test_timestamp_shape() {
        let ts = run_timestamp();
        assert_eq!(ts.len(), 15);
        assert_eq!(ts.as_bytes()[8], b'_');
        assert!(ts.chars().filter(|c| *c != '_').all(|c| c.is_ascii_digit()));
    }
}

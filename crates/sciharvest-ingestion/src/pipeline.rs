//! End-to-end harvest pipeline.
//!
//! Orchestrates one run:
//!   1. Search each selected source
//!   2. Drop records already seen under another term or source
//!   3. Resolve a PDF link per record (adapter override or shared chain)
//!   4. Download it through the artifact fetcher
//!   5. Otherwise extract page text and build a synthetic PDF
//!   6. Wait `delay * delay_factor` before the next record
//!
//! Sources run one after another and records one after another. Nothing
//! here aborts the run: failures are logged, counted and the loop moves on.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::dedup::{DedupResult, IdentifierIndex};
use crate::extractor::ContentExtractor;
use crate::fetcher::{artifact_path, ArtifactFetcher};
use crate::models::{ArtifactOrigin, SearchQuery, SourceContext, SourceSpec, StudyRecord};
use crate::pdf_builder::build_document;
use crate::resolver::PdfResolver;
use crate::sources::{build_source, StudySource};

// ── Job config ────────────────────────────────────────────────────────────────

/// Parameters for a single harvest run.
#[derive(Debug, Clone)]
pub struct HarvestJob {
    pub query: SearchQuery,
    pub databases: Vec<SourceSpec>,
    pub output_dir: PathBuf,
    /// Pause after each record; scaled by the adapter's delay factor.
    pub delay: Duration,
    pub max_results: usize,
    pub overwrite: bool,
    /// Process only the first record of each source.
    pub test_mode: bool,
    /// Resolve and download artifacts. Off means metadata only.
    pub download: bool,
}

impl Default for HarvestJob {
    fn default() -> Self {
        Self {
            query: SearchQuery::default(),
            databases: SourceSpec::ALL.to_vec(),
            output_dir: PathBuf::from("studies"),
            delay: Duration::from_secs(1),
            max_results: 100,
            overwrite: true,
            test_mode: false,
            download: true,
        }
    }
}

impl HarvestJob {
    pub fn pdf_dir(&self) -> PathBuf {
        self.output_dir.join("pdfs")
    }
}

// ── Result summary ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceSummary {
    pub source: String,
    pub found: usize,
    pub kept: usize,
    pub downloaded: usize,
    pub synthesized: usize,
    pub missing: usize,
}

#[derive(Debug, Serialize)]
pub struct HarvestResult {
    pub run_id: Uuid,
    pub query: SearchQuery,
    pub per_source: Vec<SourceSummary>,
    pub downloaded: usize,
    pub synthesized: usize,
    pub missing: usize,
    pub duplicates_skipped: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    pub records: Vec<StudyRecord>,
    #[serde(skip)]
    index: IdentifierIndex,
}

impl HarvestResult {
    fn new(query: SearchQuery) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            query,
            per_source: Vec::new(),
            downloaded: 0,
            synthesized: 0,
            missing: 0,
            duplicates_skipped: 0,
            errors: Vec::new(),
            duration_ms: 0,
            records: Vec::new(),
            index: IdentifierIndex::new(),
        }
    }

    /// The record known by any of its identifier variants.
    pub fn find(&self, identifier: &str) -> Option<&StudyRecord> {
        self.index.lookup(identifier).and_then(|i| self.records.get(i))
    }

    fn accept(&mut self, record: StudyRecord, file_identifier: &str) {
        let position = self.records.len();
        self.index.insert(&record, file_identifier, position);
        self.records.push(record);
    }
}

// ── Pipeline orchestrator ─────────────────────────────────────────────────────

/// Runs every selected source through the shared per-source pipeline.
#[instrument(skip(job, ctx), fields(query = %job.query.query))]
pub async fn run_harvest(job: &HarvestJob, ctx: &SourceContext) -> HarvestResult {
    let t0 = std::time::Instant::now();
    let mut result = HarvestResult::new(job.query.clone());
    info!(run_id = %result.run_id, sources = job.databases.len(), "Starting harvest");

    if let Err(e) = tokio::fs::create_dir_all(job.pdf_dir()).await {
        let msg = format!("cannot create {}: {e}", job.pdf_dir().display());
        warn!("{}", &msg);
        result.errors.push(msg);
        return result;
    }

    let (resolver, extractor) = match (PdfResolver::new(ctx), ContentExtractor::new(ctx)) {
        (Ok(r), Ok(e)) => (r, e),
        (Err(e), _) | (_, Err(e)) => {
            let msg = format!("HTTP client setup failed: {e}");
            warn!("{}", &msg);
            result.errors.push(msg);
            return result;
        }
    };
    let fetcher = ArtifactFetcher::new(ctx.clone(), &job.output_dir);
    let fetcher = &fetcher;
    let download = move |url: String, identifier: String, overwrite: bool| async move {
        fetcher.fetch(&url, &identifier, overwrite).await
    };

    for &spec in &job.databases {
        let source = match build_source(spec, ctx) {
            Ok(s) => s,
            Err(e) => {
                let msg = format!("Source {} setup error: {e}", spec.as_str());
                warn!("{}", &msg);
                result.errors.push(msg);
                continue;
            }
        };
        let summary = process_source(source.as_ref(), job, &resolver, &extractor, &download, &mut result).await;
        info!(
            source = spec.as_str(),
            kept = summary.kept,
            downloaded = summary.downloaded,
            synthesized = summary.synthesized,
            missing = summary.missing,
            "Source complete"
        );
        result.downloaded += summary.downloaded;
        result.synthesized += summary.synthesized;
        result.missing += summary.missing;
        result.per_source.push(summary);
    }

    result.duration_ms = t0.elapsed().as_millis() as u64;
    info!(
        run_id = %result.run_id,
        records = result.records.len(),
        downloaded = result.downloaded,
        synthesized = result.synthesized,
        missing = result.missing,
        duplicates = result.duplicates_skipped,
        duration_ms = result.duration_ms,
        "Harvest complete"
    );
    result
}

/// Search → de-duplicate → resolve → download or synthesise → delay, for
/// one adapter. `download` has the `(url, identifier, overwrite)` shape of
/// [`ArtifactFetcher::fetch`].
async fn process_source<D, Fut>(
    source: &dyn StudySource,
    job: &HarvestJob,
    resolver: &PdfResolver,
    extractor: &ContentExtractor,
    download: &D,
    result: &mut HarvestResult,
) -> SourceSummary
where
    D: Fn(String, String, bool) -> Fut,
    Fut: Future<Output = Option<PathBuf>>,
{
    let spec = source.spec();
    let mut summary = SourceSummary { source: spec.as_str().to_string(), ..SourceSummary::default() };

    let mut records = source.search(&job.query, job.max_results).await;
    summary.found = records.len();
    if job.test_mode {
        records.truncate(1);
    }
    let pause = job.delay * source.delay_factor();

    for mut record in records {
        if let DedupResult::Duplicate { position, identifier } = result.index.check(&record) {
            debug!(title = %record.title, position, identifier = %identifier, "Skipping duplicate record");
            result.duplicates_skipped += 1;
            continue;
        }
        let file_identifier = source.file_identifier(&record);

        if job.download {
            match acquire_artifact(source, job, resolver, extractor, download, &mut record, &file_identifier).await {
                Some(ArtifactOrigin::Downloaded) => summary.downloaded += 1,
                Some(ArtifactOrigin::Synthesized) => summary.synthesized += 1,
                None => {
                    warn!(title = %record.title, id = %record.unique_id, "No PDF or content available");
                    summary.missing += 1;
                }
            }
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }

        summary.kept += 1;
        result.accept(record, &file_identifier);
    }
    summary
}

async fn acquire_artifact<D, Fut>(
    source: &dyn StudySource,
    job: &HarvestJob,
    resolver: &PdfResolver,
    extractor: &ContentExtractor,
    download: &D,
    record: &mut StudyRecord,
    file_identifier: &str,
) -> Option<ArtifactOrigin>
where
    D: Fn(String, String, bool) -> Fut,
    Fut: Future<Output = Option<PathBuf>>,
{
    if let Some(resolution) = source.resolve_pdf(record, resolver).await {
        info!(
            url = %resolution.url,
            strategy = resolution.strategy.as_str(),
            "Resolved PDF link"
        );
        record.pdf_link = Some(resolution.url.clone());
        if let Some(path) = download(resolution.url, file_identifier.to_string(), job.overwrite).await {
            record.local_artifact_path = Some(path);
            record.artifact_origin = Some(ArtifactOrigin::Downloaded);
            return record.artifact_origin;
        }
    }

    let content = extractor.extract_for_record(record).await?;
    let path = build_document(&content, &artifact_path(&job.pdf_dir(), file_identifier))?;
    record.local_artifact_path = Some(path);
    record.artifact_origin = Some(ArtifactOrigin::Synthesized);
    record.artifact_origin
}

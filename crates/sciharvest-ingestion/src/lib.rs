//! sciharvest-ingestion: Literature harvest pipeline.
//! Covers:
//! - Paper discovery (PubMed, PMC, Europe PMC, bioRxiv/medRxiv, DOAJ,
//!   ScienceDirect, Semantic Scholar, Google Scholar)
//! - PDF link resolution
//! - Artifact download and validation
//! - Content extraction and synthetic PDFs
//! - Deduplication
//! - CSV/JSON export and the HTML report

pub mod sources;
pub mod dedup;
pub mod export;
pub mod extractor;
pub mod fetcher;
pub mod models;
pub mod pdf_builder;
pub mod pipeline;
pub mod query_store;
pub mod report;
pub mod resolver;

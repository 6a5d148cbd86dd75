use super::*;

#[test]
fn test_empty_file_is_all_defaults() {
    let config: Config = toml::from_str("").unwrap();
    assert_eq!(config.harvest.output_dir, PathBuf::from("studies"));
    assert_eq!(config.harvest.max_results, 100);
    assert_eq!(config.harvest.databases, vec!["all"]);
    assert!(config.harvest.overwrite);
    assert_eq!(config.http.max_attempts, 3);
    assert!(config.http.downgrade_head);
    assert_eq!(config.sources.biorxiv_window_days, 730);
}

#[test]
fn test_partial_sections_keep_defaults() {
    let config: Config = toml::from_str(
        r#"
        [harvest]
        delay_secs = 0.5
        databases = ["pubmed", "europepmc"]

        [http]
        timeout_secs = 10

        [sources]
        pubmed_api_key = "abc123"
        "#,
    )
    .unwrap();
    assert_eq!(config.harvest.delay_secs, 0.5);
    assert_eq!(config.harvest.max_results, 100);
    assert_eq!(config.http.timeout_secs, 10);
    assert_eq!(config.http.backoff_ms, 500);

    let ctx = config.source_context();
    assert_eq!(ctx.pubmed_api_key.as_deref(), Some("abc123"));
    assert!(ctx.semantic_scholar_api_key.is_none());
    assert_eq!(ctx.http.timeout, Duration::from_secs(10));
    assert_eq!(ctx.scholar_page_delay, Duration::from_secs(2));
}

#[test]
fn test_empty_api_key_is_none() {
    let config: Config = toml::from_str("[sources]\nsemantic_scholar_api_key = \"\"").unwrap();
    assert!(config.source_context().semantic_scholar_api_key.is_none());
}

#[test]
fn test_load_from_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Config::load_from(&dir.path().join("nope.toml")).is_err());
}

#[test]
fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sciharvest.toml");
    std::fs::write(&path, "[harvest]\nmax_results = 5\noverwrite = false\n").unwrap();
    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.harvest.max_results, 5);
    assert!(!config.harvest.overwrite);
}

#[test]
fn test_parse_databases() {
    let keys = |ks: &[&str]| ks.iter().map(|k| k.to_string()).collect::<Vec<_>>();
    assert_eq!(parse_databases(&keys(&["all"])).len(), SourceSpec::ALL.len());
    assert_eq!(
        parse_databases(&keys(&["PubMed", "medrxiv", "biorxiv", "bogus"])),
        vec![SourceSpec::PubMed, SourceSpec::BioRxiv]
    );
    assert!(parse_databases(&[]).is_empty());
}

#[test]
fn test_secs_clamps() {
    assert_eq!(secs(-1.0), Duration::ZERO);
    assert_eq!(secs(f64::NAN), Duration::ZERO);
    assert_eq!(secs(1.5), Duration::from_millis(1500));
}

#[test]
fn test_secs_saturates_on_overflow() {
    assert_eq!(secs(1e30), Duration::MAX);
    assert_eq!(secs(f64::INFINITY), Duration::MAX);
}

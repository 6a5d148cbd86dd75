//! PubMed E-utilities client.
//!
//! Endpoints used:
//!   esearch: {eutils}/esearch.fcgi  (JSON id list)
//!   efetch:  {eutils}/efetch.fcgi   (PubmedArticleSet XML)

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use sciharvest_common::HttpClient;
use tracing::{debug, instrument, warn};

use super::{clean_text, StudySource};
use crate::models::{Database, Endpoints, SearchQuery, SourceContext, SourceSpec, StudyRecord};

pub struct PubMedClient {
    client: HttpClient,
    endpoints: Endpoints,
    api_key: Option<String>,
}

impl PubMedClient {
    pub fn new(ctx: &SourceContext) -> anyhow::Result<Self> {
        Ok(Self {
            client: ctx.client()?,
            endpoints: ctx.endpoints.clone(),
            api_key: ctx.pubmed_api_key.clone(),
        })
    }

    fn base_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }

    /// Search PubMed and return a list of PMIDs.
    #[instrument(skip(self))]
    async fn esearch(&self, term: &str, max: usize) -> anyhow::Result<Vec<String>> {
        let mut params = self.base_params();
        params.push(("db", "pubmed".to_string()));
        params.push(("term", term.to_string()));
        params.push(("retmax", max.to_string()));
        params.push(("retmode", "json".to_string()));

        let url = format!("{}/esearch.fcgi", self.endpoints.eutils);
        let resp: serde_json::Value = self.client.get_json(&url, &params, &[]).await?;

        let ids: Vec<String> = resp["esearchresult"]["idlist"]
            .as_array()
            .map(|ids| ids.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();

        debug!(?ids, "PubMed esearch returned PMIDs");
        Ok(ids)
    }

    /// Fetch PubMed XML for a list of PMIDs and parse into records.
    #[instrument(skip(self))]
    async fn efetch(&self, pmids: &[String]) -> anyhow::Result<Vec<StudyRecord>> {
        if pmids.is_empty() {
            return Ok(vec![]);
        }

        let mut params = self.base_params();
        params.push(("db", "pubmed".to_string()));
        params.push(("id", pmids.join(",")));
        params.push(("retmode", "xml".to_string()));

        let url = format!("{}/efetch.fcgi", self.endpoints.eutils);
        let xml = self.client.get_text(&url, &params).await?;

        let mut records = parse_pubmed_xml(&xml);
        for record in &mut records {
            if let Some(pmid) = &record.pmid {
                record.source_url = self.endpoints.pubmed_article(pmid);
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl StudySource for PubMedClient {
    fn spec(&self) -> SourceSpec {
        SourceSpec::PubMed
    }

    async fn fetch_records(
        &self,
        query: &SearchQuery,
        max_results: usize,
    ) -> anyhow::Result<Vec<StudyRecord>> {
        let pmids = self.esearch(&query.boolean_query(), max_results).await?;
        self.efetch(&pmids).await
    }
}

#[derive(Default)]
struct Flags {
    pmid: bool,
    title: bool,
    abstract_text: bool,
    last_name: bool,
    fore_name: bool,
    collective: bool,
    journal: bool,
    pub_date: bool,
    year: bool,
    month: bool,
    day: bool,
    medline_date: bool,
    article_id: Option<String>,
    /// Inside reference or correction lists, whose ids belong to other papers.
    foreign: usize,
}

fn attr(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.to_string()))
}

/// Parse efetch XML into records. Malformed input yields whatever was
/// parsed before the error.
pub(crate) fn parse_pubmed_xml(xml: &str) -> Vec<StudyRecord> {
    let mut records = Vec::new();
    let mut reader = Reader::from_str(xml);

    let mut current: Option<StudyRecord> = None;
    let mut f = Flags::default();
    let mut title = String::new();
    let mut abstract_parts: Vec<String> = Vec::new();
    let mut abstract_buf = String::new();
    let mut abstract_label: Option<String> = None;
    let mut last = String::new();
    let mut fore = String::new();
    let mut journal = String::new();
    let mut date_parts: Vec<String> = Vec::new();
    let mut medline_date = String::new();
    let mut text_buf = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"PubmedArticle" => {
                    current = Some(StudyRecord::new(Database::PubMed));
                    f = Flags::default();
                    title.clear();
                    abstract_parts.clear();
                    journal.clear();
                    date_parts.clear();
                    medline_date.clear();
                }
                b"ReferenceList" | b"CommentsCorrectionsList" => f.foreign += 1,
                b"PMID" if f.foreign == 0 => f.pmid = true,
                b"ArticleTitle" => f.title = true,
                b"AbstractText" => {
                    f.abstract_text = true;
                    abstract_buf.clear();
                    abstract_label = attr(e, "Label");
                }
                b"Author" => {
                    last.clear();
                    fore.clear();
                }
                b"LastName" => f.last_name = true,
                b"ForeName" => f.fore_name = true,
                b"CollectiveName" => f.collective = true,
                b"Title" => f.journal = true,
                b"PubDate" => f.pub_date = true,
                b"Year" if f.pub_date => f.year = true,
                b"Month" if f.pub_date => f.month = true,
                b"Day" if f.pub_date => f.day = true,
                b"MedlineDate" if f.pub_date => f.medline_date = true,
                b"ArticleId" if f.foreign == 0 => {
                    f.article_id = attr(e, "IdType");
                    text_buf.clear();
                }
                _ => {}
            },
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                if current.is_some() {
                    if f.pmid { text_buf.push_str(&text); }
                    if f.title { title.push_str(&text); }
                    if f.abstract_text { abstract_buf.push_str(&text); }
                    if f.last_name { last.push_str(&text); }
                    if f.fore_name { fore.push_str(&text); }
                    if f.collective { last.push_str(&text); }
                    if f.journal { journal.push_str(&text); }
                    if f.year || f.month || f.day { date_parts.push(text.trim().to_string()); }
                    if f.medline_date { medline_date.push_str(&text); }
                    if f.article_id.is_some() { text_buf.push_str(&text); }
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"ReferenceList" | b"CommentsCorrectionsList" => {
                    f.foreign = f.foreign.saturating_sub(1)
                }
                b"PMID" if f.pmid => {
                    f.pmid = false;
                    if let Some(ref mut r) = current {
                        if r.pmid.is_none() && !text_buf.trim().is_empty() {
                            r.pmid = Some(text_buf.trim().to_string());
                        }
                    }
                    text_buf.clear();
                }
                b"ArticleTitle" => f.title = false,
                b"AbstractText" => {
                    f.abstract_text = false;
                    let body = clean_text(&abstract_buf);
                    if !body.is_empty() {
                        abstract_parts.push(match abstract_label.take() {
                            Some(label) => format!("{}: {}", label, body),
                            None => body,
                        });
                    }
                }
                b"LastName" => f.last_name = false,
                b"ForeName" => f.fore_name = false,
                b"CollectiveName" => f.collective = false,
                b"Author" => {
                    if let Some(ref mut r) = current {
                        let name = if fore.trim().is_empty() {
                            last.trim().to_string()
                        } else {
                            format!("{} {}", fore.trim(), last.trim())
                        };
                        if !name.is_empty() {
                            r.authors.push(name);
                        }
                    }
                }
                b"Title" => f.journal = false,
                b"Year" => f.year = false,
                b"Month" => f.month = false,
                b"Day" => f.day = false,
                b"MedlineDate" => f.medline_date = false,
                b"PubDate" => f.pub_date = false,
                b"ArticleId" => {
                    if let (Some(kind), Some(r)) = (f.article_id.take(), current.as_mut()) {
                        let value = text_buf.trim().to_string();
                        if !value.is_empty() {
                            match kind.as_str() {
                                "doi" if r.doi.is_none() => r.doi = Some(value),
                                "pmc" if r.pmcid.is_none() => r.pmcid = Some(value),
                                _ => {}
                            }
                        }
                    }
                    text_buf.clear();
                }
                b"PubmedArticle" => {
                    if let Some(mut r) = current.take() {
                        let t = clean_text(&title);
                        if t.is_empty() {
                            warn!(pmid = ?r.pmid, "Skipping PubMed article with empty title");
                        } else {
                            r.title = t;
                            if !abstract_parts.is_empty() {
                                r.abstract_text = abstract_parts.join("\n\n");
                            }
                            if !journal.trim().is_empty() {
                                r.journal = clean_text(&journal);
                            }
                            if !date_parts.is_empty() {
                                r.publication_date = date_parts.join(" ");
                            } else if !medline_date.trim().is_empty() {
                                r.publication_date = medline_date.trim().to_string();
                            }
                            records.push(r);
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!("XML parse error: {}", e);
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NO_ABSTRACT, UNKNOWN_JOURNAL};

    #[test]
    fn test_parse_minimal_pubmed_xml() {
        let xml = r#"<?xml version="1.0"?>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation>
      <PMID>12345678</PMID>
      <Article>
        <Journal>
          <JournalIssue><PubDate><Year>2022</Year><Month>Mar</Month></PubDate></JournalIssue>
          <Title>Cell Metabolism</Title>
        </Journal>
        <ArticleTitle>NMN supplementation in <i>older</i> adults</ArticleTitle>
        <Abstract>
          <AbstractText Label="BACKGROUND">NAD+ declines with age.</AbstractText>
          <AbstractText Label="RESULTS">NMN was well tolerated.</AbstractText>
        </Abstract>
        <AuthorList>
          <Author><LastName>Yoshino</LastName><ForeName>Mihoko</ForeName></Author>
          <Author><CollectiveName>NMN Study Group</CollectiveName></Author>
        </AuthorList>
      </Article>
      <CommentsCorrectionsList>
        <CommentsCorrections><PMID>99999999</PMID></CommentsCorrections>
      </CommentsCorrectionsList>
    </MedlineCitation>
    <PubmedData>
      <ArticleIdList>
        <ArticleId IdType="pubmed">12345678</ArticleId>
        <ArticleId IdType="doi">10.1016/j.cmet.2022.01.001</ArticleId>
        <ArticleId IdType="pmc">PMC7654321</ArticleId>
      </ArticleIdList>
      <ReferenceList>
        <Reference><ArticleIdList><ArticleId IdType="pmc">PMC1111111</ArticleId></ArticleIdList></Reference>
      </ReferenceList>
    </PubmedData>
  </PubmedArticle>
</PubmedArticleSet>"#;

        let records = parse_pubmed_xml(xml);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.pmid.as_deref(), Some("12345678"));
        assert_eq!(r.title, "NMN supplementation in older adults");
        assert_eq!(r.authors, vec!["Mihoko Yoshino", "NMN Study Group"]);
        assert_eq!(r.journal, "Cell Metabolism");
        assert_eq!(r.publication_date, "2022 Mar");
        assert_eq!(r.doi.as_deref(), Some("10.1016/j.cmet.2022.01.001"));
        assert_eq!(r.pmcid.as_deref(), Some("PMC7654321"));
        assert!(r.abstract_text.starts_with("BACKGROUND: NAD+ declines"));
        assert!(r.abstract_text.contains("RESULTS: NMN was well tolerated."));
        assert!(r.pdf_link.is_none());
    }

    #[test]
    fn test_missing_fields_get_placeholders() {
        let xml = r#"<PubmedArticleSet><PubmedArticle><MedlineCitation>
            <PMID>1</PMID><Article><ArticleTitle>Bare</ArticleTitle></Article>
        </MedlineCitation></PubmedArticle></PubmedArticleSet>"#;
        let records = parse_pubmed_xml(xml);
        assert_eq!(records[0].journal, UNKNOWN_JOURNAL);
        assert_eq!(records[0].abstract_text, NO_ABSTRACT);
        assert!(records[0].authors.is_empty());
    }

    #[test]
    fn test_truncated_xml_is_not_fatal() {
        let records = parse_pubmed_xml("<PubmedArticleSet><PubmedArticle><PMID>1</PM");
        assert!(records.is_empty());
    }
}

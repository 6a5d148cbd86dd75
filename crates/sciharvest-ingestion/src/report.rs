//! Self-contained HTML report: per-database counts, filter buttons, a search
//! box and one card per record. No external assets, no server.

use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::Local;

use crate::models::{SearchQuery, StudyRecord, NO_ABSTRACT};

const ABSTRACT_PREVIEW_CHARS: usize = 600;

const STYLE: &str = r#"
body { font-family: Arial, sans-serif; margin: 0; padding: 20px; color: #2c3e50; }
.container { max-width: 1200px; margin: 0 auto; }
.header { text-align: center; margin-bottom: 30px; }
.summary { background: #f8f9fa; padding: 15px; border-radius: 5px; margin-bottom: 30px; }
.summary-grid { display: grid; grid-template-columns: repeat(auto-fill, minmax(180px, 1fr)); gap: 10px; }
.summary-item { padding: 8px; background: #e9ecef; border-radius: 4px; text-align: center; }
.search-input { padding: 10px; width: 100%; max-width: 500px; border-radius: 5px; border: 1px solid #ddd; margin-bottom: 20px; }
.filters { margin-bottom: 20px; display: flex; flex-wrap: wrap; gap: 10px; }
.filter-button { padding: 8px 15px; background: #f1f1f1; border: none; border-radius: 20px; cursor: pointer; }
.filter-button.active { background: #3498db; color: white; }
.study { border: 1px solid #ddd; padding: 20px; margin-bottom: 20px; border-radius: 5px; }
.study-title { font-size: 18px; font-weight: bold; margin-bottom: 10px; }
.study-meta { color: #7f8c8d; margin-bottom: 10px; font-size: 14px; }
.study-abstract { line-height: 1.6; }
.study-links a { color: #3498db; text-decoration: none; margin-right: 15px; }
.database-tag { display: inline-block; padding: 3px 8px; border-radius: 3px; font-size: 12px; margin-right: 8px; color: white; background: #607d8b; }
.origin-tag { font-size: 12px; color: #7f8c8d; }
#no-results { display: none; text-align: center; color: #7f8c8d; padding: 20px; }
"#;

const SCRIPT: &str = r#"
document.addEventListener('DOMContentLoaded', function () {
  const buttons = document.querySelectorAll('.filter-button');
  const studies = document.querySelectorAll('.study');
  const search = document.getElementById('study-search');
  const empty = document.getElementById('no-results');

  function apply() {
    const active = document.querySelector('.filter-button.active').getAttribute('data-filter');
    const term = search.value.toLowerCase();
    let shown = 0;
    studies.forEach(function (study) {
      const inFilter = active === 'all' || study.getAttribute('data-db') === active;
      const inSearch = term === '' || study.textContent.toLowerCase().includes(term);
      const visible = inFilter && inSearch;
      study.style.display = visible ? 'block' : 'none';
      if (visible) shown++;
    });
    empty.style.display = shown === 0 ? 'block' : 'none';
  }

  buttons.forEach(function (button) {
    button.addEventListener('click', function () {
      buttons.forEach(function (b) { b.classList.remove('active'); });
      button.classList.add('active');
      apply();
    });
  });
  search.addEventListener('input', apply);
});
"#;

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// CSS-safe class/filter key for a database display name.
fn filter_key(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

fn preview(text: &str) -> String {
    if text.chars().count() <= ABSTRACT_PREVIEW_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(ABSTRACT_PREVIEW_CHARS).collect();
    format!("{}...", cut.trim_end())
}

/// Renders the full report page for `records`.
pub fn render_report(query: &SearchQuery, records: &[StudyRecord]) -> String {
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for r in records {
        *counts.entry(r.database.display_name()).or_default() += 1;
    }

    let heading = if query.query.trim().is_empty() {
        "Scientific Studies".to_string()
    } else {
        escape_html(&query.query)
    };

    let mut html = String::new();
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"UTF-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
         <title>sciharvest report: {heading}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n\
         <div class=\"container\">\n<div class=\"header\">\n<h1>{heading}</h1>\n\
         <p>Generated {generated} &middot; {total} studies</p>\n</div>\n",
        heading = heading,
        STYLE = STYLE,
        generated = Local::now().format("%Y-%m-%d %H:%M:%S"),
        total = records.len(),
    );
    if !query.terms.is_empty() {
        let _ = writeln!(html, "<p>Terms: {}</p>", escape_html(&query.terms.join(", ")));
    }

    // ── Summary ──
    html.push_str("<div class=\"summary\">\n<div class=\"summary-grid\">\n");
    for (db, n) in &counts {
        let _ = writeln!(
            html,
            "<div class=\"summary-item\"><span class=\"database-label\">{}</span>: {}</div>",
            escape_html(db),
            n
        );
    }
    html.push_str("</div>\n</div>\n");

    // ── Controls ──
    html.push_str(
        "<input type=\"text\" id=\"study-search\" class=\"search-input\" \
         placeholder=\"Search studies by title, author, journal...\">\n<div class=\"filters\">\n\
         <button class=\"filter-button active\" data-filter=\"all\">All Sources</button>\n",
    );
    for db in counts.keys() {
        let _ = writeln!(
            html,
            "<button class=\"filter-button\" data-filter=\"{}\">{}</button>",
            filter_key(db),
            escape_html(db)
        );
    }
    html.push_str("</div>\n");

    // ── Records ──
    for r in records {
        let db = r.database.display_name();
        let _ = write!(
            html,
            "<div class=\"study\" data-db=\"{key}\">\n\
             <div class=\"study-title\">{title}</div>\n\
             <div class=\"study-meta\"><span class=\"database-tag\">{db}</span>{authors} &middot; {journal} &middot; {date}</div>\n",
            key = filter_key(db),
            title = escape_html(&r.title),
            db = escape_html(db),
            authors = escape_html(&r.authors.join(", ")),
            journal = escape_html(&r.journal),
            date = escape_html(&r.publication_date),
        );
        if !r.abstract_text.is_empty() && r.abstract_text != NO_ABSTRACT {
            let _ = writeln!(html, "<div class=\"study-abstract\">{}</div>", escape_html(&preview(&r.abstract_text)));
        }

        html.push_str("<div class=\"study-links\">");
        if !r.source_url.is_empty() {
            let _ = write!(html, "<a href=\"{}\" target=\"_blank\">View Source</a>", escape_html(&r.source_url));
        }
        if let Some(link) = r.pdf_link.as_deref() {
            let _ = write!(html, "<a href=\"{}\" target=\"_blank\">PDF Link</a>", escape_html(link));
        }
        if let Some(path) = r.local_artifact_path.as_ref() {
            let origin = r.artifact_origin.map(|o| o.as_str()).unwrap_or("local");
            let _ = write!(
                html,
                "<a href=\"{}\" target=\"_blank\">Local PDF</a><span class=\"origin-tag\">({})</span>",
                escape_html(&path.display().to_string()),
                origin
            );
        }
        html.push_str("</div>\n</div>\n");
    }

    let _ = write!(
        html,
        "<div id=\"no-results\">No studies found matching the selected filter or search term.</div>\n\
         </div>\n<script>{SCRIPT}</script>\n</body>\n</html>\n",
        SCRIPT = SCRIPT
    );
    html
}

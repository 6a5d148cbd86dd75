//! Synthetic document builder.
//!
//! Renders extracted article structure into a plain paginated PDF with the
//! standard Helvetica faces, so no font files are embedded. Layout: title,
//! authors, a journal/date line, then every section as a bold heading
//! followed by its paragraphs.

use std::path::{Path, PathBuf};

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use sciharvest_common::{HarvestError, Result};
use tracing::{info, warn};

use crate::models::ArticleContent;

const PAGE_WIDTH: f32 = 612.0;
const PAGE_HEIGHT: f32 = 792.0;
const MARGIN: f32 = 72.0;

const TITLE_SIZE: f32 = 16.0;
const HEADING_SIZE: f32 = 13.0;
const AUTHOR_SIZE: f32 = 11.0;
const BODY_SIZE: f32 = 10.0;
const META_SIZE: f32 = 9.0;

#[derive(Debug, Clone, Copy)]
enum Face {
    Regular,
    Bold,
}

impl Face {
    fn resource(&self) -> &'static str {
        match self {
            Face::Regular => "F1",
            Face::Bold => "F2",
        }
    }
}

/// Approximate Helvetica advance width, in 1/1000 em.
fn glyph_width(c: char) -> f32 {
    match c {
        'i' | 'j' | 'l' | '\'' | '|' => 222.0,
        ' ' | '.' | ',' | ':' | ';' | '!' | 'f' | 't' | 'I' | '/' | '(' | ')' | '[' | ']' => 278.0,
        'r' | '-' => 333.0,
        'm' | 'M' => 833.0,
        'w' | 'W' => 778.0,
        'A'..='Z' => 667.0,
        _ => 556.0,
    }
}

fn text_width(text: &str, size: f32) -> f32 {
    text.chars().map(glyph_width).sum::<f32>() * size / 1000.0
}

/// Greedy word wrap to `max_width` points. Over-long words are split.
fn wrap(text: &str, size: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        let candidate = if line.is_empty() { word.to_string() } else { format!("{} {}", line, word) };
        if text_width(&candidate, size) <= max_width {
            line = candidate;
            continue;
        }
        if !line.is_empty() {
            lines.push(std::mem::take(&mut line));
        }
        let mut chunk = String::new();
        for c in word.chars() {
            chunk.push(c);
            if text_width(&chunk, size) > max_width {
                chunk.pop();
                lines.push(std::mem::take(&mut chunk));
                chunk.push(c);
            }
        }
        line = chunk;
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

/// WinAnsi bytes: Latin-1 passes through, common typography is mapped to
/// ASCII, anything else becomes `?`.
fn encode_text(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{2018}' | '\u{2019}' => out.push(b'\''),
            '\u{201C}' | '\u{201D}' => out.push(b'"'),
            '\u{2013}' | '\u{2014}' | '\u{2212}' => out.push(b'-'),
            '\u{2022}' | '\u{00B7}' => out.push(b'-'),
            '\u{2026}' => out.extend_from_slice(b"..."),
            '\t' | '\n' | '\r' => out.push(b' '),
            c if (c as u32) < 0x20 => {}
            c if (c as u32) <= 0xFF => out.push(c as u32 as u8),
            _ => out.push(b'?'),
        }
    }
    out
}

/// Page-by-page operation lists with a running baseline.
struct Layout {
    pages: Vec<Vec<Operation>>,
    y: f32,
}

impl Layout {
    fn new() -> Self {
        Self { pages: vec![Vec::new()], y: PAGE_HEIGHT - MARGIN }
    }

    fn ensure_room(&mut self, leading: f32) {
        if self.y - leading < MARGIN {
            self.pages.push(Vec::new());
            self.y = PAGE_HEIGHT - MARGIN;
        }
    }

    fn line(&mut self, text: &str, face: Face, size: f32) {
        let leading = size * 1.3;
        self.ensure_room(leading);
        self.y -= leading;
        let ops = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![face.resource().into(), size.into()]),
            Operation::new("Td", vec![MARGIN.into(), self.y.into()]),
            Operation::new("Tj", vec![Object::string_literal(encode_text(text))]),
            Operation::new("ET", vec![]),
        ];
        if let Some(page) = self.pages.last_mut() {
            page.extend(ops);
        }
    }

    fn paragraph(&mut self, text: &str, face: Face, size: f32) {
        for l in wrap(text, size, PAGE_WIDTH - 2.0 * MARGIN) {
            self.line(&l, face, size);
        }
    }

    fn space(&mut self, points: f32) {
        self.y -= points;
    }
}

fn lay_out(content: &ArticleContent) -> Layout {
    let mut layout = Layout::new();

    layout.paragraph(&content.title, Face::Bold, TITLE_SIZE);
    layout.space(8.0);
    if !content.authors.is_empty() {
        layout.paragraph(&content.authors.join(", "), Face::Regular, AUTHOR_SIZE);
        layout.space(4.0);
    }
    layout.paragraph(
        &format!("{} - {}", content.journal, content.publication_date),
        Face::Regular,
        META_SIZE,
    );
    layout.space(16.0);

    for section in content.sections.iter().filter(|s| !s.is_empty()) {
        layout.paragraph(&section.title, Face::Bold, HEADING_SIZE);
        layout.space(4.0);
        for para in section.content.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            layout.paragraph(para, Face::Regular, BODY_SIZE);
            layout.space(6.0);
        }
        layout.space(10.0);
    }
    layout
}

fn render(content: &ArticleContent, path: &Path) -> Result<PathBuf> {
    if content.non_empty_sections() == 0 {
        return Err(HarvestError::Pdf("no content available".into()));
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let regular = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => regular, "F2" => bold },
    });

    let mut kids: Vec<Object> = Vec::new();
    for operations in lay_out(content).pages {
        let stream = Content { operations }
            .encode()
            .map_err(|e| HarvestError::Pdf(format!("Failed to encode page: {}", e)))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, stream));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );
    let catalog = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog);
    doc.compress();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    doc.save(path)?;
    Ok(path.to_path_buf())
}

/// Writes a synthetic PDF for `content`. `None` when there is nothing to
/// render or the file cannot be written.
pub fn build_document(content: &ArticleContent, path: &Path) -> Option<PathBuf> {
    match render(content, path) {
        Ok(p) => {
            info!(path = %p.display(), sections = content.non_empty_sections(), "Synthetic PDF written");
            Some(p)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Synthetic PDF not built");
            None
        }
    }
}
